//! One analysis server bound to one workspace.
//!
//! Wraps a JSON-RPC [`ProtocolClient`] with the analysis handshake,
//! document synchronization and diagnostics collection.
use std::sync::{Arc, Mutex, PoisonError};

use relay_core::Emitter;
use relay_rpc::{CapabilityMap, ClientOptions, JsonRpcWire, ProtocolClient, SessionState};
use serde_json::{json, Value};

use crate::diagnostics::DiagnosticStore;
use crate::error::LspError;
use crate::types::{
    client_capabilities, path_to_uri, AnalysisServerConfig, Diagnostic, DiagnosticsNotification,
    SemanticTokenLegend,
};

/// Capability path under which the server's advertised capabilities land.
const SERVER_CAPS: &str = "server";

pub struct AnalysisSession {
    config: AnalysisServerConfig,
    client: Arc<ProtocolClient<JsonRpcWire>>,
    diagnostics: Arc<Mutex<DiagnosticStore>>,
}

impl AnalysisSession {
    /// Spawn the configured server. The handshake runs on first use or
    /// through [`AnalysisSession::initialize`].
    pub fn start(
        config: AnalysisServerConfig,
        options: ClientOptions,
        capabilities: CapabilityMap,
        emitter: Arc<dyn Emitter<DiagnosticsNotification>>,
    ) -> Result<Self, LspError> {
        let client = ProtocolClient::spawn(
            format!("{}@{}", config.language, config.workspace.display()),
            JsonRpcWire,
            &config.command,
            &config.args,
            Some(&config.workspace),
            options,
            capabilities,
        )?;
        Ok(Self::attach(config, client, emitter))
    }

    /// Wrap an already connected client.
    pub fn attach(
        config: AnalysisServerConfig,
        client: Arc<ProtocolClient<JsonRpcWire>>,
        emitter: Arc<dyn Emitter<DiagnosticsNotification>>,
    ) -> Self {
        let diagnostics = Arc::new(Mutex::new(
            DiagnosticStore::new(config.language.clone(), config.workspace.clone())
                .with_emitter(emitter),
        ));
        let store = diagnostics.clone();
        client.on_event(
            "textDocument/publishDiagnostics",
            Arc::new(move |_: &str, params: Value| {
                store
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .publish_params(&params);
            }),
        );
        let name = client.name().to_string();
        client.on_event(
            "window/logMessage",
            Arc::new(move |_: &str, params: Value| {
                let message = params.get("message").and_then(Value::as_str).unwrap_or("");
                tracing::debug!("[{}] server: {}", name, message);
            }),
        );
        Self {
            config,
            client,
            diagnostics,
        }
    }

    pub fn language(&self) -> &str {
        &self.config.language
    }

    pub fn config(&self) -> &AnalysisServerConfig {
        &self.config
    }

    pub fn client(&self) -> &Arc<ProtocolClient<JsonRpcWire>> {
        &self.client
    }

    pub fn state(&self) -> SessionState {
        self.client.state()
    }

    pub fn is_alive(&self) -> bool {
        self.client.is_alive()
    }

    fn initialize_params(&self) -> Value {
        let root_uri = path_to_uri(&self.config.workspace);
        let folder_name = self
            .config
            .workspace
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| root_uri.clone());
        let mut params = json!({
            "processId": std::process::id(),
            "clientInfo": {
                "name": "relay",
                "version": env!("CARGO_PKG_VERSION")
            },
            "rootUri": root_uri,
            "rootPath": self.config.workspace.to_string_lossy(),
            "workspaceFolders": [{ "uri": root_uri, "name": folder_name }],
            "capabilities": client_capabilities(),
        });
        if let Some(options) = &self.config.initialization_options {
            params["initializationOptions"] = options.clone();
        }
        params
    }

    /// `initialize` → store server capabilities → `initialized` → ready.
    /// Safe to call repeatedly and concurrently.
    pub async fn initialize(&self) -> Result<(), LspError> {
        let client = self.client.clone();
        let params = self.initialize_params();
        self.client
            .initialize_with(|| async move {
                let result = client.send_request("initialize", params).await?;
                let caps = result.get("capabilities").cloned().unwrap_or(Value::Null);
                client.insert_capability(SERVER_CAPS, caps);
                client.send_notification("initialized", json!({})).await?;
                client.set_state(SessionState::Ready);
                tracing::info!("[{}] analysis server ready", client.name());
                Ok(())
            })
            .await?;
        Ok(())
    }

    /// Send a request once the session is ready.
    pub async fn request(&self, method: &str, params: Value) -> Result<Value, LspError> {
        self.initialize().await?;
        Ok(self.client.send_request(method, params).await?)
    }

    /// Send a notification once the session is ready.
    pub async fn notify(&self, method: &str, params: Value) -> Result<(), LspError> {
        self.initialize().await?;
        Ok(self.client.send_notification(method, params).await?)
    }

    pub async fn did_open(&self, uri: &str, text: &str) -> Result<(), LspError> {
        let params = json!({
            "textDocument": {
                "uri": uri,
                "languageId": self.config.language,
                "version": 1,
                "text": text
            }
        });
        self.notify("textDocument/didOpen", params).await
    }

    /// Full-text change.
    pub async fn did_change(&self, uri: &str, version: i32, text: &str) -> Result<(), LspError> {
        let params = json!({
            "textDocument": { "uri": uri, "version": version },
            "contentChanges": [{ "text": text }]
        });
        self.notify("textDocument/didChange", params).await
    }

    pub async fn did_save(&self, uri: &str) -> Result<(), LspError> {
        self.notify("textDocument/didSave", json!({ "textDocument": { "uri": uri } }))
            .await
    }

    pub async fn did_close(&self, uri: &str) -> Result<(), LspError> {
        self.notify("textDocument/didClose", json!({ "textDocument": { "uri": uri } }))
            .await
    }

    /// Server capabilities as advertised during the handshake.
    pub fn server_capabilities(&self) -> Value {
        self.client
            .capabilities()
            .lookup(SERVER_CAPS)
            .cloned()
            .unwrap_or(Value::Null)
    }

    /// Legend for decoding semantic tokens, if the server offers them.
    pub fn token_legend(&self) -> Option<SemanticTokenLegend> {
        let caps = self.client.capabilities();
        let legend = caps.lookup("server.semanticTokensProvider.legend")?;
        serde_json::from_value(legend.clone()).ok()
    }

    /// Current diagnostics of one document.
    pub fn diagnostics(&self, uri: &str) -> Vec<Diagnostic> {
        self.diagnostics
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(uri)
            .to_vec()
    }

    /// `shutdown` request and `exit` notification, then stop the process.
    pub async fn shutdown(&self) {
        if self.client.state() == SessionState::Ready {
            if let Err(e) = self.client.send_request("shutdown", Value::Null).await {
                tracing::debug!("[{}] shutdown request failed: {}", self.client.name(), e);
            }
            let _ = self.client.send_notification("exit", Value::Null).await;
        }
        self.client.shutdown().await;
    }
}

impl std::fmt::Debug for AnalysisSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnalysisSession")
            .field("language", &self.config.language)
            .field("workspace", &self.config.workspace)
            .field("state", &self.client.state())
            .finish()
    }
}
