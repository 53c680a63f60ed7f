//! relay-lsp: analysis channel for the relay bridge.
//!
//! Drives language servers over the shared protocol client: the
//! `initialize`/`initialized` handshake, document synchronization,
//! diagnostics collection and one session per (language, workspace).
pub mod diagnostics;
pub mod error;
pub mod registry;
pub mod session;
pub mod types;

pub use diagnostics::DiagnosticStore;
pub use error::LspError;
pub use registry::AnalysisRegistry;
pub use session::AnalysisSession;
pub use types::{
    client_capabilities, path_to_uri, uri_to_path, AnalysisServerConfig, Diagnostic,
    DiagnosticSeverity, DiagnosticsNotification, LspPosition, LspRange, SemanticTokenLegend,
};
