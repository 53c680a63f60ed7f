//! Protocol client bound to a single server or adapter process.
//!
//! Owns the reader task, id allocation, the pending table, the
//! initialization state and the capability map. The envelope shape is a
//! type parameter so the same engine drives both channels.
use std::future::Future;
use std::path::Path;
use std::process::Stdio;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::watch;

use crate::capabilities::CapabilityMap;
use crate::dispatcher::{Dispatcher, EventHandler};
use crate::error::RpcError;
use crate::transport::{read_frame, FrameWriter};
use crate::wire::WireFormat;

/// Grace period for a process to exit on its own before it is killed.
const EXIT_GRACE: Duration = Duration::from_secs(2);

/// Lifecycle of a protocol session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Connected, handshake not started.
    NotInitialized,
    /// Handshake in progress.
    Initializing,
    /// Ready to handle requests.
    Ready,
    /// The channel is gone. Terminal.
    Closed,
}

/// Per-client tuning.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClientOptions {
    /// Deadline for each request. `None` waits until the peer answers or
    /// the channel closes.
    pub request_timeout: Option<Duration>,
}

/// A client connected to one peer over one framed channel.
pub struct ProtocolClient<F: WireFormat> {
    name: String,
    format: Arc<F>,
    next_id: Arc<AtomicI64>,
    writer: Arc<FrameWriter>,
    dispatcher: Arc<Dispatcher>,
    capabilities: RwLock<CapabilityMap>,
    state: Arc<watch::Sender<SessionState>>,
    init_lock: tokio::sync::Mutex<()>,
    options: ClientOptions,
    child: Mutex<Option<Child>>,
}

impl<F: WireFormat> ProtocolClient<F> {
    /// Connect over an existing pair of streams and start the reader task.
    pub fn connect<R, W>(
        name: impl Into<String>,
        format: F,
        reader: R,
        writer: W,
        options: ClientOptions,
        capabilities: CapabilityMap,
    ) -> Arc<Self>
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let (state, _) = watch::channel(SessionState::NotInitialized);
        let client = Arc::new(Self {
            name: name.into(),
            format: Arc::new(format),
            next_id: Arc::new(AtomicI64::new(1)),
            writer: Arc::new(FrameWriter::new(writer)),
            dispatcher: Arc::new(Dispatcher::new()),
            capabilities: RwLock::new(capabilities),
            state: Arc::new(state),
            init_lock: tokio::sync::Mutex::new(()),
            options,
            child: Mutex::new(None),
        });
        client.spawn_reader(reader);
        client
    }

    /// Start `command` and connect to its standard streams. Standard error
    /// is forwarded to the log.
    pub fn spawn(
        name: impl Into<String>,
        format: F,
        command: &str,
        args: &[String],
        cwd: Option<&Path>,
        options: ClientOptions,
        capabilities: CapabilityMap,
    ) -> Result<Arc<Self>, RpcError> {
        let name = name.into();
        let mut cmd = Command::new(command);
        cmd.args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = cwd {
            cmd.current_dir(dir);
        }
        let mut child = cmd.spawn().map_err(|source| RpcError::Spawn {
            command: command.to_string(),
            source,
        })?;

        let stdin = child.stdin.take().ok_or_else(|| missing_pipe(command, "stdin"))?;
        let stdout = child.stdout.take().ok_or_else(|| missing_pipe(command, "stdout"))?;
        if let Some(stderr) = child.stderr.take() {
            spawn_stderr_logger(name.clone(), stderr);
        }
        tracing::info!("[{}] started '{}' (pid {:?})", name, command, child.id());

        let client = Self::connect(name, format, stdout, stdin, options, capabilities);
        *client.child.lock().unwrap_or_else(PoisonError::into_inner) = Some(child);
        Ok(client)
    }

    fn spawn_reader<R>(&self, reader: R)
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        let name = self.name.clone();
        let format = self.format.clone();
        let dispatcher = self.dispatcher.clone();
        let writer = self.writer.clone();
        let next_id = self.next_id.clone();
        let state = self.state.clone();

        tokio::spawn(async move {
            let mut reader = BufReader::new(reader);
            loop {
                let message = match read_frame(&mut reader).await {
                    Ok(Some(message)) => message,
                    Ok(None) => {
                        tracing::info!("[{}] channel closed by peer", name);
                        break;
                    }
                    Err(e) => {
                        tracing::warn!("[{}] reader stopped: {}", name, e);
                        break;
                    }
                };
                tracing::trace!("[{}] <- {}", name, message);

                let inbound = match format.decode(message) {
                    Ok(inbound) => inbound,
                    Err(e) => {
                        tracing::warn!("[{}] dropping message: {}", name, e);
                        continue;
                    }
                };
                if let Some(request) = dispatcher.dispatch(inbound) {
                    let seq = next_id.fetch_add(1, Ordering::SeqCst);
                    let reply = format.error_reply(
                        seq,
                        &request.id,
                        &request.method,
                        &format!("unsupported request '{}'", request.method),
                    );
                    if let Err(e) = writer.write(&reply).await {
                        tracing::warn!("[{}] cannot answer '{}': {}", name, request.method, e);
                    }
                }
            }
            // Closed goes first so a request registered after the drain
            // sees it and bails out.
            state.send_replace(SessionState::Closed);
            dispatcher.close();
        });
    }

    /// Label used in logs, e.g. `java@/work/demo`.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Send a request and wait for its outcome.
    pub async fn send_request(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        if !self.is_alive() {
            return Err(RpcError::ChannelClosed);
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let rx = self.dispatcher.register(id);
        if !self.is_alive() {
            self.dispatcher.cancel(id);
            return Err(RpcError::ChannelClosed);
        }

        let message = self.format.request(id, method, params);
        tracing::debug!("[{}] -> {} #{}", self.name, method, id);
        if let Err(e) = self.writer.write(&message).await {
            self.dispatcher.cancel(id);
            return Err(e);
        }

        let outcome = match self.options.request_timeout {
            Some(limit) => match tokio::time::timeout(limit, rx).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    self.dispatcher.cancel(id);
                    return Err(RpcError::Timeout {
                        method: method.to_string(),
                        millis: limit.as_millis(),
                    });
                }
            },
            None => rx.await,
        };
        outcome
            .map_err(|_| RpcError::ChannelClosed)?
            .map_err(RpcError::Remote)
    }

    /// Send a notification (no response expected).
    pub async fn send_notification(&self, method: &str, params: Value) -> Result<(), RpcError> {
        if !self.is_alive() {
            return Err(RpcError::ChannelClosed);
        }
        let seq = self.next_id.fetch_add(1, Ordering::SeqCst);
        let message = self.format.notification(seq, method, params);
        tracing::debug!("[{}] -> {} (notification)", self.name, method);
        self.writer.write(&message).await
    }

    /// Handle events named `name`.
    ///
    /// Handlers run on the reader task and must not block; forward to a
    /// channel for anything that sends requests.
    pub fn on_event(&self, name: &str, handler: EventHandler) {
        self.dispatcher.on_event(name, handler);
    }

    /// Handle every event without a named handler.
    pub fn on_any_event(&self, handler: EventHandler) {
        self.dispatcher.on_any_event(handler);
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Move to `next`. A closed session stays closed.
    pub fn set_state(&self, next: SessionState) {
        self.state.send_if_modified(|current| {
            if *current == SessionState::Closed || *current == next {
                return false;
            }
            *current = next;
            true
        });
    }

    /// Run `handshake` once.
    ///
    /// Concurrent callers queue on the init lock; whoever comes second
    /// returns as soon as the first one has finished. The handshake is
    /// responsible for reaching [`SessionState::Ready`], either directly or
    /// later from an event. A failed handshake rolls back to
    /// `NotInitialized`.
    pub async fn initialize_with<H, Fut>(&self, handshake: H) -> Result<(), RpcError>
    where
        H: FnOnce() -> Fut,
        Fut: Future<Output = Result<(), RpcError>>,
    {
        let _guard = self.init_lock.lock().await;
        match self.state() {
            SessionState::Ready | SessionState::Initializing => return Ok(()),
            SessionState::Closed => return Err(RpcError::ChannelClosed),
            SessionState::NotInitialized => {}
        }

        self.set_state(SessionState::Initializing);
        tracing::info!("[{}] initializing", self.name);
        if let Err(e) = handshake().await {
            tracing::warn!("[{}] initialization failed: {}", self.name, e);
            self.set_state(SessionState::NotInitialized);
            return Err(e);
        }
        Ok(())
    }

    /// Block until the session is ready. Fails if it closes first.
    pub async fn wait_ready(&self) -> Result<(), RpcError> {
        let mut rx = self.state.subscribe();
        let state = *rx
            .wait_for(|s| matches!(s, SessionState::Ready | SessionState::Closed))
            .await
            .map_err(|_| RpcError::ChannelClosed)?;
        match state {
            SessionState::Ready => Ok(()),
            _ => Err(RpcError::ChannelClosed),
        }
    }

    /// Resolves once the session is closed.
    pub async fn closed(&self) {
        let mut rx = self.state.subscribe();
        let _ = rx.wait_for(|s| *s == SessionState::Closed).await;
    }

    /// Store a value at a dotted capability path.
    pub fn insert_capability(&self, path: &str, value: Value) {
        self.capabilities
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(path, value);
    }

    /// Snapshot of the capability map.
    pub fn capabilities(&self) -> CapabilityMap {
        self.capabilities
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn capability_bool(&self, path: &str, default: bool) -> bool {
        self.capabilities
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get_bool(path, default)
    }

    pub fn is_alive(&self) -> bool {
        self.state() != SessionState::Closed
    }

    pub fn pending_count(&self) -> usize {
        self.dispatcher.pending_count()
    }

    /// Wait briefly for the process to exit, kill it otherwise, and mark
    /// the session closed. Protocol-level goodbyes are the caller's job.
    pub async fn shutdown(&self) {
        let child = self
            .child
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(mut child) = child {
            if tokio::time::timeout(EXIT_GRACE, child.wait()).await.is_err() {
                tracing::info!("[{}] process did not exit, killing", self.name);
                if let Err(e) = child.kill().await {
                    tracing::warn!("[{}] kill failed: {}", self.name, e);
                }
            }
        }
        self.state.send_replace(SessionState::Closed);
        self.dispatcher.close();
    }
}

impl<F: WireFormat> std::fmt::Debug for ProtocolClient<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProtocolClient")
            .field("name", &self.name)
            .field("wire", &self.format.label())
            .field("state", &self.state())
            .field("pending", &self.pending_count())
            .finish()
    }
}

fn missing_pipe(command: &str, pipe: &str) -> RpcError {
    RpcError::Spawn {
        command: command.to_string(),
        source: std::io::Error::new(std::io::ErrorKind::BrokenPipe, format!("could not capture {pipe}")),
    }
}

fn spawn_stderr_logger<E>(name: String, stderr: E)
where
    E: AsyncRead + Send + Unpin + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if line.to_ascii_lowercase().contains("error") {
                tracing::warn!("[{}] stderr: {}", name, line);
            } else {
                tracing::debug!("[{}] stderr: {}", name, line);
            }
        }
    });
}
