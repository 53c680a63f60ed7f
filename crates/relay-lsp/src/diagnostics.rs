//! Diagnostics collector.
//!
//! Stores diagnostics per URI as servers publish them and pushes a
//! [`DiagnosticsNotification`] to the editor on every change.
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use relay_core::Emitter;
use serde_json::Value;

use crate::types::{Diagnostic, DiagnosticsNotification};

/// Diagnostics of one analysis session, keyed by document URI.
pub struct DiagnosticStore {
    language: String,
    workspace: PathBuf,
    store: HashMap<String, Vec<Diagnostic>>,
    emitter: Option<Arc<dyn Emitter<DiagnosticsNotification>>>,
}

impl std::fmt::Debug for DiagnosticStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiagnosticStore")
            .field("language", &self.language)
            .field("files", &self.store.len())
            .field("has_emitter", &self.emitter.is_some())
            .finish()
    }
}

impl DiagnosticStore {
    pub fn new(language: impl Into<String>, workspace: impl Into<PathBuf>) -> Self {
        Self {
            language: language.into(),
            workspace: workspace.into(),
            store: HashMap::new(),
            emitter: None,
        }
    }

    /// Push every change through `emitter`.
    pub fn with_emitter(mut self, emitter: Arc<dyn Emitter<DiagnosticsNotification>>) -> Self {
        self.emitter = Some(emitter);
        self
    }

    /// Replace the diagnostics of `uri`. An empty list clears the entry.
    pub fn publish(&mut self, uri: String, diagnostics: Vec<Diagnostic>) {
        if diagnostics.is_empty() {
            self.store.remove(&uri);
        } else {
            self.store.insert(uri.clone(), diagnostics);
        }
        if let Some(emitter) = &self.emitter {
            emitter.emit(DiagnosticsNotification {
                language: self.language.clone(),
                workspace: self.workspace.clone(),
                diagnostics: self.get(&uri).to_vec(),
                uri,
            });
        }
    }

    /// Apply raw `textDocument/publishDiagnostics` params. Entries that do
    /// not parse are skipped.
    pub fn publish_params(&mut self, params: &Value) -> bool {
        let (Some(uri), Some(items)) = (
            params.get("uri").and_then(Value::as_str),
            params.get("diagnostics").and_then(Value::as_array),
        ) else {
            tracing::debug!("publishDiagnostics without uri or diagnostics");
            return false;
        };
        let diagnostics = items
            .iter()
            .filter_map(|d| match serde_json::from_value(d.clone()) {
                Ok(diag) => Some(diag),
                Err(e) => {
                    tracing::debug!("skipping diagnostic: {}", e);
                    None
                }
            })
            .collect();
        self.publish(uri.to_string(), diagnostics);
        true
    }

    pub fn get(&self, uri: &str) -> &[Diagnostic] {
        self.store.get(uri).map_or(&[], |v| v.as_slice())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DiagnosticSeverity, LspPosition, LspRange};
    use relay_core::ChannelEmitter;
    use serde_json::json;

    fn make_diagnostic(line: u32, message: &str) -> Diagnostic {
        Diagnostic {
            range: LspRange::new(LspPosition::new(line, 0), LspPosition::new(line, 10)),
            severity: Some(DiagnosticSeverity::Error),
            message: message.to_string(),
            source: Some("test".to_string()),
            code: None,
        }
    }

    fn store() -> DiagnosticStore {
        DiagnosticStore::new("java", "/work")
    }

    #[test]
    fn store_publish_and_get() {
        let mut store = store();
        store.publish("file:///a.java".into(), vec![make_diagnostic(0, "error here")]);
        assert_eq!(store.get("file:///a.java")[0].message, "error here");
        assert!(store.get("file:///b.java").is_empty());
    }

    #[test]
    fn store_update_replaces_and_empty_clears() {
        let mut store = store();
        store.publish("file:///a.java".into(), vec![make_diagnostic(0, "old")]);
        store.publish("file:///a.java".into(), vec![make_diagnostic(1, "new")]);
        assert_eq!(store.get("file:///a.java")[0].message, "new");

        store.publish("file:///a.java".into(), vec![]);
        assert!(store.get("file:///a.java").is_empty());
        assert!(store.store.is_empty());
    }

    #[test]
    fn store_emits_every_change() {
        let (emitter, rx) = ChannelEmitter::<DiagnosticsNotification>::channel();
        let mut store = store().with_emitter(Arc::new(emitter));
        store.publish("file:///a.java".into(), vec![make_diagnostic(0, "e")]);
        store.publish("file:///a.java".into(), vec![]);

        let notes: Vec<DiagnosticsNotification> = rx.try_iter().collect();
        assert_eq!(notes.len(), 2);
        assert_eq!(notes[0].language, "java");
        assert_eq!(notes[0].diagnostics.len(), 1);
        assert!(notes[1].diagnostics.is_empty());
    }

    #[test]
    fn publish_params_skips_malformed_entries() {
        let mut store = store();
        let applied = store.publish_params(&json!({
            "uri": "file:///b.java",
            "diagnostics": [
                {"range": {"start": {"line": 2, "character": 0}, "end": {"line": 3, "character": 1}}, "message": "ok"},
                {"message": "no range"}
            ]
        }));
        assert!(applied);
        assert_eq!(store.get("file:///b.java").len(), 1);
        assert!(!store.publish_params(&json!({"uri": "file:///b.java"})));
    }
}
