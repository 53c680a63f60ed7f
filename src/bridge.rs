//! Line-delimited JSON command loop between the editor and the channels.
//!
//! Each input line is `{"id": ..., "command": "...", "arguments": {...}}`
//! and gets exactly one output line `{"id": ..., "ok": ...}` or
//! `{"id": ..., "error": {...}}`. Notifications from either channel are
//! written as `{"notification": "debug" | "diagnostics", "body": ...}` on
//! the same stream.
use std::future::Future;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use relay_config::Config;
use relay_core::{Emitter, FsResolver};
use relay_dap::{CommandRouter, DebugContext, DebugManager};
use relay_lsp::{path_to_uri, AnalysisRegistry, AnalysisServerConfig, AnalysisSession, LspError};
use relay_rpc::{CapabilityMap, ClientOptions};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

/// Commands of the analysis channel.
pub const ANALYSIS_COMMANDS: &[&str] = &[
    "analysis.start",
    "analysis.stop",
    "analysis.sessions",
    "analysis.open",
    "analysis.change",
    "analysis.save",
    "analysis.close",
    "analysis.request",
    "analysis.diagnostics",
    "analysis.legend",
];

const SHUTDOWN: &str = "bridge.shutdown";

/// Serialized writer shared by responses and notifications.
pub struct LineSink {
    out: Mutex<Box<dyn Write + Send>>,
}

impl LineSink {
    pub fn new(out: Box<dyn Write + Send>) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }

    pub fn send(&self, message: &Value) {
        let mut out = self.out.lock().unwrap_or_else(PoisonError::into_inner);
        let written = serde_json::to_writer(&mut *out, message)
            .map_err(std::io::Error::from)
            .and_then(|()| out.write_all(b"\n"))
            .and_then(|()| out.flush());
        if let Err(e) = written {
            tracing::error!("cannot write to editor: {}", e);
        }
    }
}

/// Pushes one channel's notifications through the sink.
struct SinkEmitter {
    sink: Arc<LineSink>,
    channel: &'static str,
}

impl<M: Serialize> Emitter<M> for SinkEmitter {
    fn emit(&self, message: M) {
        match serde_json::to_value(&message) {
            Ok(body) => self.sink.send(&json!({ "notification": self.channel, "body": body })),
            Err(e) => tracing::warn!("dropping {} notification: {}", self.channel, e),
        }
    }
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    id: Value,
    command: String,
    #[serde(default)]
    arguments: Value,
}

#[derive(Debug, Deserialize)]
struct SessionArgs {
    language: String,
    project: String,
}

#[derive(Debug, Deserialize)]
struct DocumentArgs {
    language: String,
    project: String,
    path: PathBuf,
    #[serde(default)]
    text: String,
    #[serde(default)]
    version: i32,
}

#[derive(Debug, Deserialize)]
struct RequestArgs {
    language: String,
    project: String,
    method: String,
    #[serde(default)]
    params: Value,
}

/// Failure of an analysis command before or during the session call.
#[derive(Debug, thiserror::Error)]
enum AnalysisFailure {
    #[error("{0}")]
    Configuration(String),
    #[error(transparent)]
    Session(#[from] LspError),
}

impl AnalysisFailure {
    fn kind(&self) -> &'static str {
        match self {
            AnalysisFailure::Configuration(_) => "ConfigurationError",
            AnalysisFailure::Session(e) => e.kind(),
        }
    }
}

pub struct Bridge {
    config: Arc<Config>,
    analysis: AnalysisRegistry,
    debug: CommandRouter,
}

impl Bridge {
    /// Wire both channels to `sink`. Must be called inside a tokio runtime.
    pub fn new(config: Config, state_dir: PathBuf, sink: Arc<LineSink>) -> anyhow::Result<Self> {
        let config = Arc::new(config);
        let options = ClientOptions {
            request_timeout: config.rpc.request_timeout(),
        };

        let mut resolver = FsResolver::new();
        for (name, project) in &config.projects {
            resolver.add_project(name, &project.root, project.language.as_deref());
        }
        for (language, entry) in &config.languages {
            for ext in &entry.extensions {
                resolver.add_extension(ext, language);
            }
        }

        let analysis = AnalysisRegistry::new(options).with_emitter(Arc::new(SinkEmitter {
            sink: sink.clone(),
            channel: "diagnostics",
        }));
        let manager = DebugManager::new(DebugContext {
            config: config.clone(),
            resolver: Arc::new(resolver),
            emitter: Arc::new(SinkEmitter {
                sink,
                channel: "debug",
            }),
            state_dir,
        })?;

        Ok(Self {
            config,
            analysis,
            debug: CommandRouter::new(manager),
        })
    }

    /// Read commands until end of input or `bridge.shutdown`, then stop
    /// every session.
    pub async fn serve<R>(self: Arc<Self>, input: R, sink: Arc<LineSink>) -> anyhow::Result<()>
    where
        R: AsyncBufRead + Unpin,
    {
        let mut lines = input.lines();
        let mut running = Vec::new();
        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            let envelope: Envelope = match serde_json::from_str(&line) {
                Ok(envelope) => envelope,
                Err(e) => {
                    tracing::warn!("unreadable command line: {}", e);
                    let mut reply = error_body("ProtocolError", format!("invalid command: {e}"));
                    reply["id"] = Value::Null;
                    sink.send(&reply);
                    continue;
                }
            };
            if envelope.command == SHUTDOWN {
                for task in running.drain(..) {
                    if let Err(e) = task.await {
                        tracing::error!("command task failed: {}", e);
                    }
                }
                self.shutdown().await;
                sink.send(&json!({ "id": envelope.id, "ok": null }));
                return Ok(());
            }
            running.retain(|task: &tokio::task::JoinHandle<()>| !task.is_finished());
            let bridge = self.clone();
            let sink = sink.clone();
            let Envelope {
                id,
                command,
                arguments,
            } = envelope;
            running.push(tokio::spawn(async move {
                let label = command.clone();
                let work = async move { bridge.handle(&command, arguments).await };
                sink.send(&reply_guarded(&label, id, work).await);
            }));
        }
        tracing::info!("input closed");
        self.shutdown().await;
        Ok(())
    }

    /// Run one command and return its `{"ok"}` / `{"error"}` value.
    pub async fn handle(&self, command: &str, args: Value) -> Value {
        if CommandRouter::handles(command) {
            return self.debug.execute(command, args).await;
        }
        if !ANALYSIS_COMMANDS.contains(&command) {
            return error_body("ConfigurationError", format!("unknown command: {command}"));
        }
        match self.analysis_command(command, args).await {
            Ok(value) => json!({ "ok": value }),
            Err(e) => {
                tracing::warn!("{} failed: {}", command, e);
                error_body(e.kind(), e.to_string())
            }
        }
    }

    async fn analysis_command(&self, command: &str, args: Value) -> Result<Value, AnalysisFailure> {
        match command {
            "analysis.start" => {
                let a: SessionArgs = parse(command, args)?;
                let session = self.start_session(&a.language, &a.project).await?;
                Ok(session.server_capabilities())
            }
            "analysis.stop" => {
                let a: SessionArgs = parse(command, args)?;
                let root = self.project_root(&a.project)?;
                self.analysis.shutdown(&a.language, &root).await?;
                Ok(Value::Null)
            }
            "analysis.sessions" => {
                let active: Vec<Value> = self
                    .analysis
                    .active()
                    .await
                    .into_iter()
                    .map(|(language, workspace)| json!({ "language": language, "workspace": workspace }))
                    .collect();
                Ok(Value::Array(active))
            }
            "analysis.open" | "analysis.change" | "analysis.save" | "analysis.close" => {
                let a: DocumentArgs = parse(command, args)?;
                let session = self.start_session(&a.language, &a.project).await?;
                let uri = path_to_uri(&a.path);
                match command {
                    "analysis.open" => session.did_open(&uri, &a.text).await?,
                    "analysis.change" => session.did_change(&uri, a.version, &a.text).await?,
                    "analysis.save" => session.did_save(&uri).await?,
                    _ => session.did_close(&uri).await?,
                }
                Ok(Value::Null)
            }
            "analysis.request" => {
                let a: RequestArgs = parse(command, args)?;
                let session = self.start_session(&a.language, &a.project).await?;
                Ok(session.request(&a.method, a.params).await?)
            }
            "analysis.diagnostics" => {
                let a: DocumentArgs = parse(command, args)?;
                let root = self.project_root(&a.project)?;
                let session = self.analysis.require(&a.language, &root).await?;
                Ok(to_value(session.diagnostics(&path_to_uri(&a.path))))
            }
            "analysis.legend" => {
                let a: SessionArgs = parse(command, args)?;
                let root = self.project_root(&a.project)?;
                let session = self.analysis.require(&a.language, &root).await?;
                Ok(to_value(session.token_legend()))
            }
            other => Err(AnalysisFailure::Configuration(format!("unknown command: {other}"))),
        }
    }

    async fn start_session(
        &self,
        language: &str,
        project: &str,
    ) -> Result<Arc<AnalysisSession>, AnalysisFailure> {
        let workspace = self.project_root(project)?;
        let entry = self
            .config
            .analysis_server(language)
            .ok_or_else(|| LspError::NoServer(language.to_string()))?;
        let initialization_options = entry
            .initialization_options
            .as_ref()
            .map(serde_json::to_value)
            .transpose()
            .map_err(|e| {
                AnalysisFailure::Configuration(format!("bad initialization_options for {language}: {e}"))
            })?;
        let capabilities = self
            .config
            .languages
            .get(language)
            .map(|l| l.capabilities_json())
            .unwrap_or(Value::Null);
        let server = AnalysisServerConfig {
            language: language.to_string(),
            command: entry.command.clone(),
            args: entry.args.clone(),
            workspace,
            initialization_options,
        };
        Ok(self
            .analysis
            .get_or_start(server, CapabilityMap::new(capabilities))
            .await?)
    }

    fn project_root(&self, project: &str) -> Result<PathBuf, AnalysisFailure> {
        self.config
            .projects
            .get(project)
            .map(|p| p.root.clone())
            .ok_or_else(|| AnalysisFailure::Configuration(format!("unknown project: {project}")))
    }

    pub async fn shutdown(&self) {
        self.analysis.shutdown_all().await;
        self.debug.manager().shutdown().await;
    }
}

/// Where breakpoints and launch configurations are kept.
pub fn state_dir(config_dir: &Path) -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("relay"))
        .unwrap_or_else(|| config_dir.join("state"))
}

fn parse<T: DeserializeOwned>(command: &str, args: Value) -> Result<T, AnalysisFailure> {
    let args = if args.is_null() { json!({}) } else { args };
    serde_json::from_value(args)
        .map_err(|e| AnalysisFailure::Configuration(format!("invalid arguments for {command}: {e}")))
}

fn to_value<T: Serialize>(value: T) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}

/// Run one command on its own task and stamp the reply with `id`. A
/// command that panics still gets an error reply.
async fn reply_guarded<F>(command: &str, id: Value, work: F) -> Value
where
    F: Future<Output = Value> + Send + 'static,
{
    let mut reply = match tokio::spawn(work).await {
        Ok(reply) => reply,
        Err(e) => {
            tracing::error!("{} aborted: {}", command, e);
            error_body("ProtocolError", format!("{command} aborted: {e}"))
        }
    };
    if let Value::Object(map) = &mut reply {
        map.insert("id".into(), id);
    }
    reply
}

fn error_body(kind: &str, message: String) -> Value {
    json!({ "error": { "kind": kind, "message": message, "detail": [] } })
}
