//! Analysis protocol types.
//!
//! Only the shapes the bridge itself inspects are typed here. Everything
//! else travels as raw JSON between the editor and the server.
use std::path::{Path, PathBuf};

use relay_core::Position;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// How to launch one analysis server for one workspace.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisServerConfig {
    /// Language identifier (e.g. "java", "python").
    pub language: String,
    /// Executable command name.
    pub command: String,
    /// Command-line arguments.
    pub args: Vec<String>,
    /// Workspace root, sent as `rootUri` and the only workspace folder.
    pub workspace: PathBuf,
    /// Passed verbatim as `initializationOptions`.
    pub initialization_options: Option<Value>,
}

/// 0-based line and character.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct LspPosition {
    pub line: u32,
    /// UTF-16 code units.
    pub character: u32,
}

impl LspPosition {
    pub fn new(line: u32, character: u32) -> Self {
        Self { line, character }
    }
}

impl From<Position> for LspPosition {
    fn from(pos: Position) -> Self {
        Self {
            line: pos.line as u32,
            character: pos.col as u32,
        }
    }
}

impl From<LspPosition> for Position {
    fn from(pos: LspPosition) -> Self {
        Self::new(pos.line as usize, pos.character as usize)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct LspRange {
    /// Inclusive.
    pub start: LspPosition,
    /// Exclusive.
    pub end: LspPosition,
}

impl LspRange {
    pub fn new(start: LspPosition, end: LspPosition) -> Self {
        Self { start, end }
    }
}

/// Diagnostic severity, numeric on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum DiagnosticSeverity {
    Error = 1,
    Warning = 2,
    Information = 3,
    Hint = 4,
}

impl TryFrom<u8> for DiagnosticSeverity {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, String> {
        match value {
            1 => Ok(DiagnosticSeverity::Error),
            2 => Ok(DiagnosticSeverity::Warning),
            3 => Ok(DiagnosticSeverity::Information),
            4 => Ok(DiagnosticSeverity::Hint),
            other => Err(format!("invalid diagnostic severity {other}")),
        }
    }
}

impl From<DiagnosticSeverity> for u8 {
    fn from(severity: DiagnosticSeverity) -> u8 {
        severity as u8
    }
}

/// A diagnostic published by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub range: LspRange,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<DiagnosticSeverity>,
    pub message: String,
    /// Producer, e.g. "javac".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// String or number.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<Value>,
}

/// Pushed to the editor whenever a file's diagnostics change.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiagnosticsNotification {
    pub language: String,
    pub workspace: PathBuf,
    pub uri: String,
    /// Empty when the file was cleared.
    pub diagnostics: Vec<Diagnostic>,
}

/// Token type and modifier names that decode semantic-token data.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SemanticTokenLegend {
    #[serde(default)]
    pub token_types: Vec<String>,
    #[serde(default)]
    pub token_modifiers: Vec<String>,
}

impl SemanticTokenLegend {
    /// Name of the token type at `index`.
    pub fn token_type(&self, index: usize) -> Option<&str> {
        self.token_types.get(index).map(String::as_str)
    }

    /// Modifier names whose bits are set in `bits`.
    pub fn modifiers(&self, bits: u32) -> Vec<&str> {
        self.token_modifiers
            .iter()
            .enumerate()
            .filter(|(i, _)| *i < 32 && bits & (1 << i) != 0)
            .map(|(_, name)| name.as_str())
            .collect()
    }
}

/// Client capabilities sent with `initialize`.
pub fn client_capabilities() -> Value {
    serde_json::json!({
        "textDocument": {
            "completion": {
                "completionItem": {
                    "snippetSupport": false,
                    "documentationFormat": ["plaintext", "markdown"]
                }
            },
            "hover": {
                "contentFormat": ["markdown", "plaintext"]
            },
            "definition": {
                "dynamicRegistration": false,
                "linkSupport": false
            },
            "references": {
                "dynamicRegistration": false
            },
            "documentSymbol": {
                "dynamicRegistration": false,
                "hierarchicalDocumentSymbolSupport": true
            },
            "publishDiagnostics": {
                "relatedInformation": false
            },
            "semanticTokens": {
                "dynamicRegistration": false,
                "requests": { "full": true, "range": false },
                "tokenTypes": [],
                "tokenModifiers": [],
                "formats": ["relative"]
            },
            "synchronization": {
                "didSave": true,
                "willSave": false,
                "dynamicRegistration": false
            }
        },
        "workspace": {
            "workspaceFolders": true,
            "configuration": false
        }
    })
}

/// `file://` URI of a path. Relative paths are resolved against the
/// current directory.
pub fn path_to_uri(path: &Path) -> String {
    let abs = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir().unwrap_or_default().join(path)
    };
    format!("file://{}", abs.to_string_lossy())
}

/// Path of a `file://` URI, `None` for other schemes.
pub fn uri_to_path(uri: &str) -> Option<PathBuf> {
    uri.strip_prefix("file://").map(PathBuf::from)
}
