use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Log verbosity level.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    /// Most verbose.
    Trace,
    /// Debug messages.
    Debug,
    /// Informational messages (default).
    #[default]
    Info,
    /// Warnings only.
    Warn,
    /// Errors only.
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

/// Logging settings.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogConfig {
    /// Minimum level written to the log file.
    #[serde(default)]
    pub level: LogLevel,
}

/// Protocol client tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcConfig {
    /// Deadline for a single request in seconds. `0` waits until the
    /// peer answers or the channel closes.
    #[serde(default)]
    pub request_timeout_secs: u64,
    /// Delay before prefetching stack frames of a stopped thread.
    #[serde(default = "default_prefetch_delay")]
    pub prefetch_delay_ms: u64,
    /// Worker count of the deferred task pool.
    #[serde(default = "default_workers")]
    pub deferred_workers: usize,
}

fn default_prefetch_delay() -> u64 {
    150
}

fn default_workers() -> usize {
    2
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: 0,
            prefetch_delay_ms: default_prefetch_delay(),
            deferred_workers: default_workers(),
        }
    }
}

impl RpcConfig {
    /// Request deadline, `None` when unbounded.
    pub fn request_timeout(&self) -> Option<Duration> {
        (self.request_timeout_secs > 0).then(|| Duration::from_secs(self.request_timeout_secs))
    }

    pub fn prefetch_delay(&self) -> Duration {
        Duration::from_millis(self.prefetch_delay_ms)
    }
}

/// How to launch an analysis (language) server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisServerEntry {
    /// The command to run the server.
    pub command: String,
    /// Command-line arguments.
    #[serde(default)]
    pub args: Vec<String>,
    /// Passed verbatim as `initializationOptions`.
    #[serde(default)]
    pub initialization_options: Option<toml::Value>,
}

/// How to launch and talk to a debug adapter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DebugAdapterEntry {
    /// The command to run the adapter.
    pub command: String,
    /// Command-line arguments.
    #[serde(default)]
    pub args: Vec<String>,
    /// `adapterID` sent in the initialize request.
    pub adapter_id: String,
    /// Force (`true`) or suppress (`false`) `configurationDone`.
    /// Unset follows the adapter's advertised capability.
    #[serde(default)]
    pub configuration_done: Option<bool>,
    /// Extra `initialize` arguments merged over the defaults.
    #[serde(default)]
    pub initialize: Option<toml::Table>,
    /// `launch` request template with `${token}` placeholders.
    #[serde(default)]
    pub launch: toml::Table,
    /// `attach` request template with `${token}` placeholders.
    #[serde(default)]
    pub attach: toml::Table,
}

/// Everything the bridge knows about one language.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct LanguageConfig {
    /// File extensions (without dot) belonging to this language.
    #[serde(default)]
    pub extensions: Vec<String>,
    /// Analysis server, if any.
    #[serde(default)]
    pub analysis: Option<AnalysisServerEntry>,
    /// Debug adapter, if any.
    #[serde(default)]
    pub debug: Option<DebugAdapterEntry>,
    /// Declared capabilities, looked up by dotted path
    /// (e.g. `debug.scopes.local`).
    #[serde(default)]
    pub capabilities: toml::Table,
}

impl LanguageConfig {
    /// Declared capabilities as JSON, the shape the protocol layer uses.
    pub fn capabilities_json(&self) -> serde_json::Value {
        serde_json::to_value(&self.capabilities)
            .unwrap_or_else(|_| serde_json::Value::Object(Default::default()))
    }
}

/// Binds a project name to its root and language.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectEntry {
    /// Project root directory.
    pub root: PathBuf,
    /// Language id, must name an entry of `languages`.
    #[serde(default)]
    pub language: Option<String>,
}

/// Top-level relay configuration.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Logging settings.
    #[serde(default)]
    pub log: LogConfig,
    /// Protocol client tuning.
    #[serde(default)]
    pub rpc: RpcConfig,
    /// Per-language settings keyed by language id.
    #[serde(default)]
    pub languages: BTreeMap<String, LanguageConfig>,
    /// Known projects keyed by name.
    #[serde(default)]
    pub projects: BTreeMap<String, ProjectEntry>,
}

impl Config {
    /// Debug adapter entry for a language.
    pub fn debug_adapter(&self, language: &str) -> Option<&DebugAdapterEntry> {
        self.languages.get(language)?.debug.as_ref()
    }

    /// Analysis server entry for a language.
    pub fn analysis_server(&self, language: &str) -> Option<&AnalysisServerEntry> {
        self.languages.get(language)?.analysis.as_ref()
    }
}
