//! One debug adapter process for one language.
//!
//! Wraps a sequence-numbered [`ProtocolClient`] with the debug handshake.
//! The handshake is split in two: [`DebugSession::initialize`] sends
//! `initialize` and records what the adapter advertises, and
//! [`DebugSession::finish_configuration`] runs once the adapter has sent
//! its `initialized` event and the breakpoints are in place. Only then is
//! the session ready.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use relay_config::DebugAdapterEntry;
use relay_rpc::{CapabilityMap, ClientOptions, DapWire, ProtocolClient, SessionState};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::sync::mpsc;

use crate::error::DebugError;
use crate::frame::LanguageRules;
use crate::launch::LaunchMode;
use crate::protocol::{Capabilities, DisconnectArguments, InitializeRequestArguments};

/// Capability path under which the adapter's `initialize` response lands.
const ADAPTER_CAPS: &str = "adapter";

const DISCONNECT_GRACE: Duration = Duration::from_secs(1);

/// An event as the adapter sent it.
#[derive(Debug, Clone, PartialEq)]
pub struct AdapterEvent {
    pub name: String,
    pub body: Value,
}

/// Events of one session, in arrival order.
pub type EventStream = mpsc::UnboundedReceiver<AdapterEvent>;

pub struct DebugSession {
    language: String,
    adapter: DebugAdapterEntry,
    client: Arc<ProtocolClient<DapWire>>,
}

impl DebugSession {
    /// Spawn the configured adapter.
    pub fn start(
        language: &str,
        adapter: DebugAdapterEntry,
        cwd: Option<&Path>,
        options: ClientOptions,
        capabilities: CapabilityMap,
    ) -> Result<(Arc<Self>, EventStream), DebugError> {
        let client = ProtocolClient::spawn(
            format!("{language}-debug"),
            DapWire,
            &adapter.command,
            &adapter.args,
            cwd,
            options,
            capabilities,
        )
        .map_err(|e| DebugError::from_rpc("spawn", e))?;
        Ok(Self::attach(language, adapter, client))
    }

    /// Wrap an already connected client. Every event is forwarded to the
    /// returned stream; the handler itself never blocks the reader.
    pub fn attach(
        language: &str,
        adapter: DebugAdapterEntry,
        client: Arc<ProtocolClient<DapWire>>,
    ) -> (Arc<Self>, EventStream) {
        let (tx, rx) = mpsc::unbounded_channel();
        client.on_any_event(Arc::new(move |name: &str, body: Value| {
            let _ = tx.send(AdapterEvent {
                name: name.to_string(),
                body,
            });
        }));
        let session = Arc::new(Self {
            language: language.to_string(),
            adapter,
            client,
        });
        (session, rx)
    }

    pub fn language(&self) -> &str {
        &self.language
    }

    pub fn adapter(&self) -> &DebugAdapterEntry {
        &self.adapter
    }

    pub fn client(&self) -> &Arc<ProtocolClient<DapWire>> {
        &self.client
    }

    pub fn state(&self) -> SessionState {
        self.client.state()
    }

    pub fn is_alive(&self) -> bool {
        self.client.is_alive()
    }

    pub fn is_ready(&self) -> bool {
        self.state() == SessionState::Ready
    }

    fn initialize_arguments(&self) -> Result<Value, DebugError> {
        let mut args = serde_json::to_value(InitializeRequestArguments::new(
            self.adapter.adapter_id.clone(),
        ))
        .map_err(|e| DebugError::Protocol(format!("cannot encode initialize arguments: {e}")))?;
        if let Some(extra) = &self.adapter.initialize {
            let extra = serde_json::to_value(extra)
                .map_err(|e| DebugError::Configuration(format!("invalid initialize table: {e}")))?;
            if let (Some(base), Value::Object(extra)) = (args.as_object_mut(), extra) {
                base.extend(extra);
            }
        }
        Ok(args)
    }

    /// Send `initialize` and record the adapter's capabilities. The
    /// session stays `Initializing` until [`Self::finish_configuration`].
    /// Safe to call repeatedly.
    pub async fn initialize(&self) -> Result<(), DebugError> {
        let client = self.client.clone();
        let args = self.initialize_arguments()?;
        self.client
            .initialize_with(|| async move {
                let body = client.send_request("initialize", args).await?;
                client.insert_capability(ADAPTER_CAPS, body);
                tracing::info!("[{}] adapter initialized", client.name());
                Ok(())
            })
            .await
            .map_err(|e| DebugError::from_rpc("initialize", e))
    }

    /// Send a request and return the raw response body.
    pub async fn request<A: Serialize>(
        &self,
        command: &str,
        arguments: A,
    ) -> Result<Value, DebugError> {
        let arguments = serde_json::to_value(arguments)
            .map_err(|e| DebugError::Protocol(format!("cannot encode '{command}' arguments: {e}")))?;
        self.client
            .send_request(command, arguments)
            .await
            .map_err(|e| DebugError::from_rpc(command, e))
    }

    /// Send a request and decode the response body.
    pub async fn request_as<T, A>(&self, command: &str, arguments: A) -> Result<T, DebugError>
    where
        T: DeserializeOwned,
        A: Serialize,
    {
        let body = self.request(command, arguments).await?;
        serde_json::from_value(body).map_err(|e| DebugError::invalid_body(command, e))
    }

    /// The adapter's `initialize` response, typed.
    pub fn adapter_capabilities(&self) -> Capabilities {
        self.client
            .capabilities()
            .lookup(ADAPTER_CAPS)
            .cloned()
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or_default()
    }

    /// Whether the adapter advertised `flag` (e.g. `supportsTerminateRequest`).
    pub fn supports(&self, flag: &str) -> bool {
        self.client
            .capability_bool(&format!("{ADAPTER_CAPS}.{flag}"), false)
    }

    pub fn rules(&self) -> LanguageRules {
        LanguageRules::from_capabilities(&self.client.capabilities())
    }

    /// The language entry can force `configurationDone` either way.
    pub fn wants_configuration_done(&self) -> bool {
        self.adapter
            .configuration_done
            .unwrap_or_else(|| self.supports("supportsConfigurationDoneRequest"))
    }

    /// Final handshake step, after the `initialized` event. The session
    /// is ready afterwards even if `configurationDone` was refused.
    pub async fn finish_configuration(&self) -> Result<(), DebugError> {
        let result = if self.wants_configuration_done() {
            self.request("configurationDone", Value::Null).await.map(|_| ())
        } else {
            Ok(())
        };
        self.client.set_state(SessionState::Ready);
        tracing::info!("[{}] debug session ready", self.client.name());
        result
    }

    /// Filter ids for `setExceptionBreakpoints`.
    ///
    /// Names come from `debug.exceptions.{caught,uncaught}`. When the
    /// adapter advertised its filters, names it does not know are dropped.
    pub fn exception_filters(&self, caught: bool, uncaught: bool) -> Vec<String> {
        let caps = self.client.capabilities();
        let mut filters = Vec::new();
        if caught {
            filters.push(caps.get_str("debug.exceptions.caught", "caught").to_string());
        }
        if uncaught {
            filters.push(
                caps.get_str("debug.exceptions.uncaught", "uncaught")
                    .to_string(),
            );
        }
        let advertised = self.adapter_capabilities().exception_breakpoint_filters;
        if !advertised.is_empty() {
            filters.retain(|f| advertised.iter().any(|a| &a.filter == f));
        }
        filters
    }

    /// The `launch` or `attach` template of the adapter entry.
    pub fn request_template(&self, mode: LaunchMode) -> Value {
        let table = match mode {
            LaunchMode::Launch => &self.adapter.launch,
            LaunchMode::Attach => &self.adapter.attach,
        };
        serde_json::to_value(table).unwrap_or_else(|_| Value::Object(Map::new()))
    }

    /// Ask the adapter to end the debuggee, then close the channel.
    pub async fn shutdown(&self) {
        if self.is_alive() {
            let args = DisconnectArguments {
                restart: Some(false),
                terminate_debuggee: Some(true),
            };
            match tokio::time::timeout(DISCONNECT_GRACE, self.request("disconnect", args)).await {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => tracing::debug!("[{}] disconnect: {}", self.language, e),
                Err(_) => tracing::debug!("[{}] disconnect timed out", self.language),
            }
        }
        self.client.shutdown().await;
    }
}

impl std::fmt::Debug for DebugSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DebugSession")
            .field("language", &self.language)
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{adapter_entry, connect};
    use serde_json::json;

    #[tokio::test]
    async fn initialize_records_capabilities_and_stays_initializing() {
        let (session, _events, mut adapter) = connect("java", adapter_entry());
        let init = tokio::spawn({
            let session = session.clone();
            async move { session.initialize().await }
        });

        let request = adapter.expect("initialize").await;
        assert_eq!(request["arguments"]["adapterID"], "fake");
        assert_eq!(request["arguments"]["linesStartAt1"], true);
        adapter
            .respond(
                &request,
                json!({
                    "supportsConfigurationDoneRequest": true,
                    "exceptionBreakpointFilters": [{"filter": "uncaught", "label": "Uncaught"}]
                }),
            )
            .await;
        init.await.unwrap().unwrap();

        assert_eq!(session.state(), SessionState::Initializing);
        assert!(session.supports("supportsConfigurationDoneRequest"));
        assert!(session.wants_configuration_done());
        assert_eq!(session.exception_filters(true, true), vec!["uncaught"]);
    }

    #[tokio::test]
    async fn finish_configuration_sends_configuration_done() {
        let (session, _events, mut adapter) = connect("java", adapter_entry());
        session
            .client()
            .insert_capability("adapter.supportsConfigurationDoneRequest", json!(true));

        let finish = tokio::spawn({
            let session = session.clone();
            async move { session.finish_configuration().await }
        });
        let request = adapter.expect("configurationDone").await;
        assert!(request.get("arguments").is_none());
        adapter.respond(&request, Value::Null).await;
        finish.await.unwrap().unwrap();
        assert!(session.is_ready());
    }

    #[tokio::test]
    async fn configuration_done_can_be_suppressed() {
        let mut entry = adapter_entry();
        entry.configuration_done = Some(false);
        let (session, _events, _adapter) = connect("java", entry);
        session
            .client()
            .insert_capability("adapter.supportsConfigurationDoneRequest", json!(true));
        session.finish_configuration().await.unwrap();
        assert!(session.is_ready());
    }

    #[tokio::test]
    async fn events_are_forwarded_in_order() {
        let (_session, mut events, adapter) = connect("java", adapter_entry());
        adapter.event("initialized", Value::Null).await;
        adapter.event("output", json!({"output": "hi"})).await;
        assert_eq!(events.recv().await.unwrap().name, "initialized");
        let output = events.recv().await.unwrap();
        assert_eq!(output.name, "output");
        assert_eq!(output.body["output"], "hi");
    }

    #[tokio::test]
    async fn failed_request_maps_to_request_failure() {
        let (session, _events, mut adapter) = connect("java", adapter_entry());
        let call = tokio::spawn({
            let session = session.clone();
            async move { session.request("threads", Value::Null).await }
        });
        let request = adapter.expect("threads").await;
        adapter.fail(&request, "not running").await;
        let err = call.await.unwrap().unwrap_err();
        assert_eq!(err.kind(), "RequestFailure");
        assert_eq!(err.to_string(), "threads failed: not running");
    }

    #[tokio::test]
    async fn request_templates_follow_mode() {
        let mut entry = adapter_entry();
        entry
            .attach
            .insert("port".into(), toml::Value::String("${port}".into()));
        let (session, _events, _adapter) = connect("java", entry);
        assert_eq!(session.request_template(LaunchMode::Attach), json!({"port": "${port}"}));
        assert_eq!(
            session.request_template(LaunchMode::Launch),
            json!({"request": "launch", "program": "${program}"})
        );
    }

    #[tokio::test]
    async fn default_filter_names() {
        let (session, _events, _adapter) = connect("java", adapter_entry());
        assert_eq!(session.exception_filters(true, false), vec!["caught"]);
        assert!(session.exception_filters(false, false).is_empty());
    }
}
