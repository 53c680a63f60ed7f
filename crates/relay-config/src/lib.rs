//! relay-config: TOML configuration for the relay bridge.
//!
//! Per-language analysis server and debug adapter entries (commands,
//! handshake templates, capability tables), project bindings, RPC
//! tuning and log level.

pub mod config;
pub mod error;
pub mod load;
pub mod merge;
pub mod validate;

pub use config::{
    AnalysisServerEntry, Config, DebugAdapterEntry, LanguageConfig, LogConfig, LogLevel,
    ProjectEntry, RpcConfig,
};
pub use error::ConfigError;
pub use load::{load_config, load_from_str};
