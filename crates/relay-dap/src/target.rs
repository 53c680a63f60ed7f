//! A running debuggee and its threads.
//!
//! Adapter events are applied synchronously by [`DebugTarget::process_event`]
//! in arrival order, and each thread transition is emitted before the next
//! event is looked at. Queries (stack, variables, evaluate) issue requests
//! and cache their results against the thread's stop generation.

use std::collections::BTreeMap;
use std::path::Path;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use relay_core::{Emitter, SourceResolver};
use serde::Serialize;
use serde_json::Value;

use crate::deferred::VersionStamp;
use crate::error::DebugError;
use crate::frame::{DebugFrame, DebugVariable, LanguageRules, ScopeClass};
use crate::launch::{LaunchConfiguration, LaunchId};
use crate::notification::{ChangeKind, DebugNotification, ThreadEvent, ThreadEventKind};
use crate::protocol::{
    ContinueResponseBody, ContinuedEventBody, DisconnectArguments, EvaluateArguments,
    EvaluateResponseBody, ExitedEventBody, OutputEventBody, ProcessEventBody,
    RestartFrameArguments, ScopesArguments, ScopesResponseBody, StackTraceArguments,
    StackTraceResponseBody, StoppedEventBody, ThreadArguments, ThreadEventBody,
    ThreadsResponseBody, VariablesArguments, VariablesResponseBody,
};
use crate::session::DebugSession;
use crate::template::Template;
use crate::thread::{DebugThread, ThreadSnapshot, ThreadState};

pub type TargetId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetState {
    Created,
    Launching,
    Running,
    Terminated,
}

/// Execution control requested by the editor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebugAction {
    Resume,
    StepInto,
    StepOver,
    StepReturn,
    Suspend,
    Terminate,
    DropToFrame,
}

impl DebugAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            DebugAction::Resume => "RESUME",
            DebugAction::StepInto => "STEP_INTO",
            DebugAction::StepOver => "STEP_OVER",
            DebugAction::StepReturn => "STEP_RETURN",
            DebugAction::Suspend => "SUSPEND",
            DebugAction::Terminate => "TERMINATE",
            DebugAction::DropToFrame => "DROP_TO_FRAME",
        }
    }
}

impl FromStr for DebugAction {
    type Err = DebugError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "RESUME" => Ok(DebugAction::Resume),
            "STEP_INTO" => Ok(DebugAction::StepInto),
            "STEP_OVER" => Ok(DebugAction::StepOver),
            "STEP_RETURN" => Ok(DebugAction::StepReturn),
            "SUSPEND" => Ok(DebugAction::Suspend),
            "TERMINATE" => Ok(DebugAction::Terminate),
            "DROP_TO_FRAME" => Ok(DebugAction::DropToFrame),
            _ => Err(DebugError::Configuration(format!("unknown debug action: {s}"))),
        }
    }
}

/// What the adapter told us about the debuggee process.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ProcessInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_method: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TargetSnapshot {
    pub id: TargetId,
    pub launch: LaunchId,
    pub name: String,
    pub language: String,
    pub project: String,
    pub state: TargetState,
    pub process: ProcessInfo,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i64>,
    pub threads: Vec<ThreadSnapshot>,
}

/// Follow-up work an event calls for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventEffect {
    None,
    /// These threads just stopped.
    Stopped(Vec<i64>),
    Terminated,
}

struct TargetInner {
    state: TargetState,
    process: ProcessInfo,
    exit_code: Option<i64>,
    threads: BTreeMap<i64, DebugThread>,
}

pub struct DebugTarget {
    id: TargetId,
    launch: LaunchConfiguration,
    session: Arc<DebugSession>,
    inner: Mutex<TargetInner>,
    stamp: VersionStamp,
    emitter: Arc<dyn Emitter<DebugNotification>>,
    resolver: Option<Arc<dyn SourceResolver>>,
}

impl DebugTarget {
    pub fn new(
        id: TargetId,
        launch: LaunchConfiguration,
        session: Arc<DebugSession>,
        emitter: Arc<dyn Emitter<DebugNotification>>,
        resolver: Option<Arc<dyn SourceResolver>>,
    ) -> Self {
        Self {
            id,
            launch,
            session,
            inner: Mutex::new(TargetInner {
                state: TargetState::Created,
                process: ProcessInfo::default(),
                exit_code: None,
                threads: BTreeMap::new(),
            }),
            stamp: VersionStamp::new(),
            emitter,
            resolver,
        }
    }

    fn lock(&self) -> MutexGuard<'_, TargetInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn id(&self) -> TargetId {
        self.id
    }

    pub fn launch(&self) -> &LaunchConfiguration {
        &self.launch
    }

    pub fn session(&self) -> &Arc<DebugSession> {
        &self.session
    }

    pub fn state(&self) -> TargetState {
        self.lock().state
    }

    /// Bumped by every thread transition.
    pub fn stamp(&self) -> &VersionStamp {
        &self.stamp
    }

    pub fn snapshot(&self) -> TargetSnapshot {
        let inner = self.lock();
        self.snapshot_of(&inner)
    }

    fn snapshot_of(&self, inner: &TargetInner) -> TargetSnapshot {
        TargetSnapshot {
            id: self.id,
            launch: self.launch.id,
            name: self.launch.name.clone(),
            language: self.launch.language.clone(),
            project: self.launch.project.clone(),
            state: inner.state,
            process: inner.process.clone(),
            exit_code: inner.exit_code,
            threads: inner.threads.values().map(DebugThread::snapshot).collect(),
        }
    }

    pub fn threads(&self) -> Vec<ThreadSnapshot> {
        self.lock()
            .threads
            .values()
            .map(DebugThread::snapshot)
            .collect()
    }

    /// Ids of suspended threads, lowest first.
    pub fn suspended_threads(&self) -> Vec<i64> {
        self.lock()
            .threads
            .values()
            .filter(|t| t.is_suspended())
            .map(|t| t.id)
            .collect()
    }

    fn emit_target(&self, inner: &TargetInner, change: ChangeKind) {
        self.emitter.emit(DebugNotification::Target {
            change,
            target: self.snapshot_of(inner),
        });
    }

    fn emit_thread(
        &self,
        kind: ThreadEventKind,
        detail: Option<&str>,
        data: Option<Value>,
        thread: &DebugThread,
    ) {
        self.emitter.emit(DebugNotification::Thread(ThreadEvent {
            target: self.id,
            kind,
            detail: detail.map(str::to_string),
            data,
            thread: thread.snapshot(),
        }));
    }

    /// Send the rendered `launch` or `attach` request.
    pub async fn start_debug(
        &self,
        template: &Template,
        project_root: Option<&Path>,
    ) -> Result<(), DebugError> {
        {
            let mut inner = self.lock();
            if inner.state != TargetState::Created {
                return Err(DebugError::SessionState(format!(
                    "target {} was already started",
                    self.id
                )));
            }
            inner.state = TargetState::Launching;
            self.emit_target(&inner, ChangeKind::Change);
        }

        let vars = self.launch.template_vars(project_root);
        let arguments = template.render(&self.session.request_template(self.launch.mode), &vars);
        let command = self.launch.mode.command();
        tracing::info!(
            "[{}] target {}: {} '{}'",
            self.session.language(),
            self.id,
            command,
            self.launch.name
        );

        let result = self.session.request(command, arguments).await;
        let mut inner = self.lock();
        match result {
            Ok(_) => {
                // A fast debuggee may already have terminated.
                if inner.state == TargetState::Launching {
                    inner.state = TargetState::Running;
                    self.emit_target(&inner, ChangeKind::Change);
                }
                Ok(())
            }
            Err(e) => {
                tracing::warn!("[{}] target {} failed to start: {}", self.session.language(), self.id, e);
                inner.state = TargetState::Terminated;
                self.emit_target(&inner, ChangeKind::Change);
                Err(e)
            }
        }
    }

    /// Apply one adapter event.
    pub fn process_event(&self, name: &str, body: &Value) -> EventEffect {
        match name {
            "process" => {
                if let Some(body) = self.parse::<ProcessEventBody>(name, body) {
                    let mut inner = self.lock();
                    inner.process = ProcessInfo {
                        name: Some(body.name),
                        pid: body.system_process_id,
                        start_method: body.start_method,
                    };
                    self.emit_target(&inner, ChangeKind::Change);
                }
                EventEffect::None
            }
            "thread" => {
                if let Some(body) = self.parse::<ThreadEventBody>(name, body) {
                    self.apply_thread_event(body);
                }
                EventEffect::None
            }
            "stopped" => match self.parse::<StoppedEventBody>(name, body) {
                Some(body) => EventEffect::Stopped(self.apply_stop(body)),
                None => EventEffect::None,
            },
            "continued" => {
                if let Some(body) = self.parse::<ContinuedEventBody>(name, body) {
                    self.apply_resume(Some(body.thread_id), body.all_threads_continued, "continued");
                }
                EventEffect::None
            }
            "exited" => {
                if let Some(body) = self.parse::<ExitedEventBody>(name, body) {
                    let mut inner = self.lock();
                    inner.exit_code = Some(body.exit_code);
                    self.emit_target(&inner, ChangeKind::Change);
                }
                EventEffect::None
            }
            "terminated" => {
                self.terminate_all();
                EventEffect::Terminated
            }
            "output" => {
                if let Some(body) = self.parse::<OutputEventBody>(name, body) {
                    self.emitter.emit(DebugNotification::Output {
                        target: self.id,
                        category: body.category,
                        output: body.output,
                    });
                }
                EventEffect::None
            }
            other => {
                tracing::trace!("[{}] ignoring event '{}'", self.session.language(), other);
                EventEffect::None
            }
        }
    }

    fn parse<T: serde::de::DeserializeOwned>(&self, name: &str, body: &Value) -> Option<T> {
        match serde_json::from_value(body.clone()) {
            Ok(parsed) => Some(parsed),
            Err(e) => {
                tracing::warn!("[{}] malformed '{}' event: {}", self.session.language(), name, e);
                None
            }
        }
    }

    fn apply_thread_event(&self, body: ThreadEventBody) {
        let mut inner = self.lock();
        if inner.state == TargetState::Terminated {
            return;
        }
        self.stamp.bump();
        match body.reason.as_str() {
            "exited" => {
                if let Some(mut thread) = inner.threads.remove(&body.thread_id) {
                    thread.terminate();
                    self.emit_thread(ThreadEventKind::Terminate, Some("exited"), None, &thread);
                }
            }
            "started" => {
                if !inner.threads.contains_key(&body.thread_id) {
                    let thread = DebugThread::unnamed(body.thread_id);
                    self.emit_thread(ThreadEventKind::Create, Some("started"), None, &thread);
                    inner.threads.insert(body.thread_id, thread);
                }
            }
            reason => {
                let thread = self.thread_entry(&mut inner, body.thread_id);
                self.emit_thread(ThreadEventKind::Change, Some(reason), None, thread);
            }
        }
    }

    /// Registered thread, created (and announced) when first seen.
    fn thread_entry<'a>(&self, inner: &'a mut TargetInner, id: i64) -> &'a mut DebugThread {
        inner.threads.entry(id).or_insert_with(|| {
            let thread = DebugThread::unnamed(id);
            self.emit_thread(ThreadEventKind::Create, None, None, &thread);
            thread
        })
    }

    fn apply_stop(&self, body: StoppedEventBody) -> Vec<i64> {
        let mut inner = self.lock();
        if inner.state == TargetState::Terminated {
            return Vec::new();
        }
        self.stamp.bump();
        if let Some(id) = body.thread_id {
            self.thread_entry(&mut inner, id);
        }
        let ids: Vec<i64> = if body.all_threads_stopped {
            inner.threads.keys().copied().collect()
        } else {
            body.thread_id.into_iter().collect()
        };
        let data = body.text.map(Value::String);
        for id in &ids {
            if let Some(thread) = inner.threads.get_mut(id) {
                thread.suspend(&body.reason, body.description.clone());
                self.emit_thread(ThreadEventKind::Change, Some(body.reason.as_str()), data.clone(), thread);
            }
        }
        ids
    }

    fn apply_resume(&self, thread_id: Option<i64>, all: bool, detail: &str) {
        let mut inner = self.lock();
        if inner.state == TargetState::Terminated {
            return;
        }
        self.stamp.bump();
        let ids: Vec<i64> = if all {
            inner.threads.keys().copied().collect()
        } else {
            thread_id.into_iter().collect()
        };
        for id in ids {
            let thread = self.thread_entry(&mut inner, id);
            if thread.state != ThreadState::Running {
                thread.resume();
                self.emit_thread(ThreadEventKind::Change, Some(detail), None, thread);
            }
        }
    }

    fn terminate_all(&self) {
        let mut inner = self.lock();
        if inner.state == TargetState::Terminated {
            return;
        }
        self.stamp.bump();
        let threads = std::mem::take(&mut inner.threads);
        for (_, mut thread) in threads {
            thread.terminate();
            self.emit_thread(ThreadEventKind::Terminate, Some("terminated"), None, &thread);
        }
        inner.state = TargetState::Terminated;
        self.emit_target(&inner, ChangeKind::Change);
        tracing::info!("[{}] target {} terminated", self.session.language(), self.id);
    }

    /// Mark the target terminated without an adapter event, e.g. when the
    /// adapter process died.
    pub fn mark_terminated(&self) {
        self.terminate_all();
    }

    /// Perform `action`. Returns `false` when the target is not running.
    pub async fn debug_action(
        &self,
        action: DebugAction,
        thread_id: Option<i64>,
        frame_index: Option<usize>,
    ) -> Result<bool, DebugError> {
        if self.state() != TargetState::Running {
            return Ok(false);
        }
        let thread_id = match thread_id {
            Some(id) => id,
            None => self.default_thread()?,
        };
        tracing::debug!("target {}: {} thread {}", self.id, action.as_str(), thread_id);

        match action {
            DebugAction::Resume => {
                let body = self.request_thread("continue", thread_id).await?;
                let all = if body.is_null() {
                    true
                } else {
                    serde_json::from_value::<ContinueResponseBody>(body)
                        .map_err(|e| DebugError::invalid_body("continue", e))?
                        .all_threads_continued
                        .unwrap_or(true)
                };
                self.apply_resume(Some(thread_id), all, "resume");
            }
            DebugAction::StepInto => {
                self.request_thread("stepIn", thread_id).await?;
                self.apply_resume(Some(thread_id), false, "step_into");
            }
            DebugAction::StepOver => {
                self.request_thread("next", thread_id).await?;
                self.apply_resume(Some(thread_id), false, "step_over");
            }
            DebugAction::StepReturn => {
                self.request_thread("stepOut", thread_id).await?;
                self.apply_resume(Some(thread_id), false, "step_return");
            }
            DebugAction::Suspend => {
                // The adapter answers with a `stopped` event.
                self.request_thread("pause", thread_id).await?;
            }
            DebugAction::Terminate => {
                if self.session.supports("supportsTerminateRequest") {
                    self.session
                        .request("terminate", serde_json::json!({}))
                        .await?;
                } else {
                    let args = DisconnectArguments {
                        restart: Some(false),
                        terminate_debuggee: Some(true),
                    };
                    self.session.request("disconnect", args).await?;
                }
            }
            DebugAction::DropToFrame => {
                let index = frame_index.unwrap_or(0);
                let frames = self.stack(thread_id).await?;
                let frame = frames.get(index).ok_or_else(|| {
                    DebugError::SessionState(format!("thread {thread_id} has no frame {index}"))
                })?;
                self.session
                    .request("restartFrame", RestartFrameArguments { frame_id: frame.id })
                    .await?;
                self.apply_resume(Some(thread_id), false, "drop_to_frame");
            }
        }
        Ok(true)
    }

    async fn request_thread(&self, command: &str, thread_id: i64) -> Result<Value, DebugError> {
        self.session
            .request(command, ThreadArguments { thread_id })
            .await
    }

    /// First suspended thread, else the first known one.
    fn default_thread(&self) -> Result<i64, DebugError> {
        let inner = self.lock();
        inner
            .threads
            .values()
            .find(|t| t.is_suspended())
            .or_else(|| inner.threads.values().next())
            .map(|t| t.id)
            .ok_or_else(|| DebugError::SessionState(format!("target {} has no threads", self.id)))
    }

    /// Ask the adapter for its thread list and merge it in. New threads
    /// are announced.
    pub async fn refresh_threads(&self) -> Result<Vec<ThreadSnapshot>, DebugError> {
        let body: ThreadsResponseBody = self.session.request_as("threads", Value::Null).await?;
        let mut inner = self.lock();
        if inner.state != TargetState::Terminated {
            for remote in body.threads {
                match inner.threads.get_mut(&remote.id) {
                    Some(thread) => thread.name = remote.name,
                    None => {
                        let thread = DebugThread::new(remote.id, remote.name);
                        self.emit_thread(ThreadEventKind::Create, None, None, &thread);
                        inner.threads.insert(remote.id, thread);
                    }
                }
            }
        }
        Ok(inner.threads.values().map(DebugThread::snapshot).collect())
    }

    fn suspended_generation(&self, thread_id: i64) -> Result<u64, DebugError> {
        let inner = self.lock();
        let thread = inner
            .threads
            .get(&thread_id)
            .ok_or_else(|| DebugError::SessionState(format!("unknown thread {thread_id}")))?;
        if !thread.is_suspended() {
            return Err(DebugError::SessionState(format!(
                "thread {thread_id} is not suspended"
            )));
        }
        Ok(thread.stop_generation())
    }

    fn cached_frames(&self, thread_id: i64) -> Option<Vec<DebugFrame>> {
        self.lock()
            .threads
            .get(&thread_id)
            .and_then(|t| t.frames().map(<[DebugFrame]>::to_vec))
    }

    /// Frames of a suspended thread, fetched once per stop.
    pub async fn stack(&self, thread_id: i64) -> Result<Vec<DebugFrame>, DebugError> {
        let generation = self.suspended_generation(thread_id)?;
        if let Some(frames) = self.cached_frames(thread_id) {
            return Ok(frames);
        }

        let args = StackTraceArguments {
            thread_id,
            start_frame: Some(0),
            levels: None,
        };
        let body: StackTraceResponseBody = self.session.request_as("stackTrace", args).await?;
        let mut frames: Vec<DebugFrame> = body
            .stack_frames
            .into_iter()
            .enumerate()
            .map(|(index, frame)| DebugFrame::from_protocol(index, frame))
            .collect();
        if let Some(resolver) = &self.resolver {
            for frame in &mut frames {
                frame.locate(resolver.as_ref(), &self.launch.project);
            }
        }

        if let Some(thread) = self.lock().threads.get_mut(&thread_id) {
            if !thread.store_frames(generation, frames.clone()) {
                tracing::debug!("thread {} moved on, frames not cached", thread_id);
            }
        }
        Ok(frames)
    }

    /// Variables of frame `index`. Local scopes are expanded, every other
    /// scope is returned as a single placeholder to expand on demand.
    pub async fn frame_variables(
        &self,
        thread_id: i64,
        index: usize,
    ) -> Result<Vec<DebugVariable>, DebugError> {
        let frames = self.stack(thread_id).await?;
        let generation = self.suspended_generation(thread_id)?;
        let frame = frames
            .get(index)
            .ok_or_else(|| DebugError::SessionState(format!("thread {thread_id} has no frame {index}")))?;
        if let Some(variables) = &frame.variables {
            return Ok(variables.clone());
        }
        if frame.synthetic {
            return Ok(Vec::new());
        }

        let rules = self.session.rules();
        let body: ScopesResponseBody = self
            .session
            .request_as("scopes", ScopesArguments { frame_id: frame.id })
            .await?;
        let scopes: Vec<_> = body.scopes.iter().map(|s| rules.scope(s)).collect();
        let mut variables = Vec::new();
        for scope in &scopes {
            if scope.delayable {
                variables.push(scope.placeholder());
            } else {
                variables.extend(self.fetch_variables(&rules, scope.reference, scope.class).await?);
            }
        }

        if let Some(thread) = self.lock().threads.get_mut(&thread_id) {
            thread.store_frame_contents(generation, index, scopes, variables.clone());
        }
        Ok(variables)
    }

    /// Children of a structured variable or a delayed scope.
    pub async fn variable_children(&self, reference: i64) -> Result<Vec<DebugVariable>, DebugError> {
        if reference <= 0 {
            return Ok(Vec::new());
        }
        let rules = self.session.rules();
        self.fetch_variables(&rules, reference, ScopeClass::Other).await
    }

    async fn fetch_variables(
        &self,
        rules: &LanguageRules,
        reference: i64,
        class: ScopeClass,
    ) -> Result<Vec<DebugVariable>, DebugError> {
        let body: VariablesResponseBody = self
            .session
            .request_as(
                "variables",
                VariablesArguments {
                    variables_reference: reference,
                },
            )
            .await?;
        Ok(body
            .variables
            .iter()
            .map(|v| rules.variable(v, class))
            .collect())
    }

    pub async fn evaluate(
        &self,
        frame_id: i64,
        expression: &str,
    ) -> Result<EvaluateResponseBody, DebugError> {
        let args = EvaluateArguments {
            expression: expression.to_string(),
            frame_id: Some(frame_id),
            context: Some("repl".into()),
        };
        self.session.request_as("evaluate", args).await
    }
}

impl std::fmt::Debug for DebugTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DebugTarget")
            .field("id", &self.id)
            .field("launch", &self.launch.name)
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::launch::{LaunchCatalog, LaunchMode};
    use crate::test_support::{adapter_entry, connect, FakeAdapter};
    use relay_core::ChannelEmitter;
    use serde_json::json;
    use std::sync::mpsc::Receiver;

    fn launch() -> LaunchConfiguration {
        let mut catalog = LaunchCatalog::new();
        let id = catalog.create("Main", "java", "demo", LaunchMode::Launch);
        let config = catalog.working_copy(id).unwrap();
        config.set_attribute(crate::launch::LaunchAttribute::Program, "/bin/demo");
        catalog.get(id).unwrap().clone()
    }

    fn target() -> (Arc<DebugTarget>, FakeAdapter, Receiver<DebugNotification>) {
        let (session, _events, adapter) = connect("java", adapter_entry());
        let (emitter, rx) = ChannelEmitter::channel();
        let target = Arc::new(DebugTarget::new(1, launch(), session, Arc::new(emitter), None));
        (target, adapter, rx)
    }

    fn drain(rx: &Receiver<DebugNotification>) -> Vec<DebugNotification> {
        rx.try_iter().collect()
    }

    fn thread_kinds(notes: &[DebugNotification]) -> Vec<(ThreadEventKind, Option<String>)> {
        notes
            .iter()
            .filter_map(|n| match n {
                DebugNotification::Thread(e) => Some((e.kind, e.detail.clone())),
                _ => None,
            })
            .collect()
    }

    async fn started(target: &Arc<DebugTarget>, adapter: &mut FakeAdapter) {
        let run = tokio::spawn({
            let target = target.clone();
            async move { target.start_debug(&Template::new().unwrap(), None).await }
        });
        let request = adapter.expect("launch").await;
        assert_eq!(request["arguments"]["program"], "/bin/demo");
        adapter.respond(&request, Value::Null).await;
        run.await.unwrap().unwrap();
    }

    #[test]
    fn actions_parse() {
        assert_eq!("resume".parse::<DebugAction>().unwrap(), DebugAction::Resume);
        assert_eq!("DROP_TO_FRAME".parse::<DebugAction>().unwrap(), DebugAction::DropToFrame);
        assert!("jump".parse::<DebugAction>().is_err());
    }

    #[tokio::test]
    async fn launch_moves_target_to_running() {
        let (target, mut adapter, rx) = target();
        assert_eq!(target.state(), TargetState::Created);
        started(&target, &mut adapter).await;
        assert_eq!(target.state(), TargetState::Running);
        let states: Vec<TargetState> = drain(&rx)
            .into_iter()
            .filter_map(|n| match n {
                DebugNotification::Target { target, .. } => Some(target.state),
                _ => None,
            })
            .collect();
        assert_eq!(states, vec![TargetState::Launching, TargetState::Running]);
    }

    #[tokio::test]
    async fn failed_launch_terminates_target() {
        let (target, mut adapter, _rx) = target();
        let run = tokio::spawn({
            let target = target.clone();
            async move { target.start_debug(&Template::new().unwrap(), None).await }
        });
        let request = adapter.expect("launch").await;
        adapter.fail(&request, "no such program").await;
        let err = run.await.unwrap().unwrap_err();
        assert_eq!(err.kind(), "RequestFailure");
        assert_eq!(target.state(), TargetState::Terminated);
    }

    #[tokio::test]
    async fn thread_lifecycle_is_emitted_in_order() {
        let (target, _adapter, rx) = target();
        target.process_event("thread", &json!({"reason": "started", "threadId": 1}));
        let effect = target.process_event(
            "stopped",
            &json!({"reason": "breakpoint", "threadId": 1, "text": "hit"}),
        );
        assert_eq!(effect, EventEffect::Stopped(vec![1]));
        target.process_event("continued", &json!({"threadId": 1}));
        target.process_event("thread", &json!({"reason": "exited", "threadId": 1}));

        assert_eq!(
            thread_kinds(&drain(&rx)),
            vec![
                (ThreadEventKind::Create, Some("started".into())),
                (ThreadEventKind::Change, Some("breakpoint".into())),
                (ThreadEventKind::Change, Some("continued".into())),
                (ThreadEventKind::Terminate, Some("exited".into())),
            ]
        );
        assert!(target.threads().is_empty());
    }

    #[tokio::test]
    async fn stop_of_unknown_thread_creates_it() {
        let (target, _adapter, rx) = target();
        target.process_event("stopped", &json!({"reason": "pause", "threadId": 9}));
        let kinds = thread_kinds(&drain(&rx));
        assert_eq!(kinds[0].0, ThreadEventKind::Create);
        assert_eq!(kinds[1], (ThreadEventKind::Change, Some("pause".into())));
        assert_eq!(target.suspended_threads(), vec![9]);
    }

    #[tokio::test]
    async fn all_threads_stopped_suspends_everything() {
        let (target, _adapter, _rx) = target();
        for id in [1, 2, 3] {
            target.process_event("thread", &json!({"reason": "started", "threadId": id}));
        }
        let effect = target.process_event(
            "stopped",
            &json!({"reason": "exception", "threadId": 2, "allThreadsStopped": true}),
        );
        assert_eq!(effect, EventEffect::Stopped(vec![1, 2, 3]));
        assert_eq!(target.suspended_threads(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn stop_without_all_threads_suspends_only_the_named_thread() {
        let (target, _adapter, rx) = target();
        for id in [1, 2, 3] {
            target.process_event("thread", &json!({"reason": "started", "threadId": id}));
        }
        drain(&rx);
        let effect = target.process_event("stopped", &json!({"reason": "breakpoint", "threadId": 2}));
        assert_eq!(effect, EventEffect::Stopped(vec![2]));
        assert_eq!(target.suspended_threads(), vec![2]);
        assert_eq!(
            thread_kinds(&drain(&rx)),
            vec![(ThreadEventKind::Change, Some("breakpoint".into()))]
        );
    }

    #[tokio::test]
    async fn continued_for_all_threads_resumes_everything() {
        let (target, _adapter, rx) = target();
        for id in [1, 2, 3] {
            target.process_event("thread", &json!({"reason": "started", "threadId": id}));
        }
        target.process_event(
            "stopped",
            &json!({"reason": "pause", "threadId": 1, "allThreadsStopped": true}),
        );
        assert_eq!(target.suspended_threads(), vec![1, 2, 3]);
        drain(&rx);

        target.process_event("continued", &json!({"threadId": 1, "allThreadsContinued": true}));
        assert!(target.suspended_threads().is_empty());
        assert_eq!(
            thread_kinds(&drain(&rx)),
            vec![(ThreadEventKind::Change, Some("continued".into())); 3]
        );
    }

    #[tokio::test]
    async fn terminated_clears_threads_and_ignores_later_events() {
        let (target, _adapter, rx) = target();
        target.process_event("thread", &json!({"reason": "started", "threadId": 1}));
        target.process_event("exited", &json!({"exitCode": 3}));
        assert_eq!(target.process_event("terminated", &Value::Null), EventEffect::Terminated);
        assert_eq!(target.state(), TargetState::Terminated);
        assert_eq!(target.snapshot().exit_code, Some(3));
        drain(&rx);

        target.process_event("stopped", &json!({"reason": "pause", "threadId": 1}));
        assert!(drain(&rx).is_empty());
        assert!(target.threads().is_empty());
    }

    #[tokio::test]
    async fn output_and_process_events() {
        let (target, _adapter, rx) = target();
        target.process_event(
            "process",
            &json!({"name": "demo", "systemProcessId": 42, "startMethod": "launch"}),
        );
        target.process_event("output", &json!({"category": "stdout", "output": "hi\n"}));
        assert_eq!(target.snapshot().process.pid, Some(42));
        let notes = drain(&rx);
        assert!(matches!(
            notes.last(),
            Some(DebugNotification::Output { output, .. }) if output == "hi\n"
        ));
    }

    #[tokio::test]
    async fn malformed_event_is_ignored() {
        let (target, _adapter, rx) = target();
        assert_eq!(target.process_event("stopped", &json!({"threadId": 1})), EventEffect::None);
        assert!(drain(&rx).is_empty());
    }

    #[tokio::test]
    async fn action_on_idle_target_is_refused() {
        let (target, _adapter, _rx) = target();
        assert!(!target.debug_action(DebugAction::Resume, Some(1), None).await.unwrap());
    }

    #[tokio::test]
    async fn step_over_resumes_thread_locally() {
        let (target, mut adapter, rx) = target();
        started(&target, &mut adapter).await;
        target.process_event("stopped", &json!({"reason": "breakpoint", "threadId": 1}));
        drain(&rx);

        let step = tokio::spawn({
            let target = target.clone();
            async move { target.debug_action(DebugAction::StepOver, None, None).await }
        });
        let request = adapter.expect("next").await;
        assert_eq!(request["arguments"]["threadId"], 1);
        adapter.respond(&request, Value::Null).await;
        assert!(step.await.unwrap().unwrap());
        assert!(target.suspended_threads().is_empty());
        assert_eq!(
            thread_kinds(&drain(&rx)),
            vec![(ThreadEventKind::Change, Some("step_over".into()))]
        );
    }

    #[tokio::test]
    async fn terminate_falls_back_to_disconnect() {
        let (target, mut adapter, _rx) = target();
        started(&target, &mut adapter).await;
        target.process_event("thread", &json!({"reason": "started", "threadId": 1}));
        let action = tokio::spawn({
            let target = target.clone();
            async move { target.debug_action(DebugAction::Terminate, None, None).await }
        });
        let request = adapter.expect("disconnect").await;
        assert_eq!(request["arguments"]["terminateDebuggee"], true);
        adapter.respond(&request, Value::Null).await;
        assert!(action.await.unwrap().unwrap());
    }

    #[tokio::test]
    async fn stack_is_cached_per_stop() {
        let (target, mut adapter, _rx) = target();
        target.process_event("stopped", &json!({"reason": "breakpoint", "threadId": 1}));

        let fetch = tokio::spawn({
            let target = target.clone();
            async move { target.stack(1).await }
        });
        let request = adapter.expect("stackTrace").await;
        adapter
            .respond(
                &request,
                json!({"stackFrames": [
                    {"id": 10, "name": "main", "line": 3, "column": 1, "source": {"path": "/w/Main.java"}},
                    {"id": 11, "name": "<label>", "line": 0, "column": 0, "presentationHint": "label"}
                ]}),
            )
            .await;
        let frames = fetch.await.unwrap().unwrap();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].line, Some(3));
        assert!(frames[1].synthetic);

        // Served from the cache; the adapter sees no second request.
        assert_eq!(target.stack(1).await.unwrap(), frames);
        assert_eq!(target.threads()[0].frame_count, Some(2));
    }

    #[tokio::test]
    async fn stack_of_running_thread_is_refused() {
        let (target, _adapter, _rx) = target();
        target.process_event("thread", &json!({"reason": "started", "threadId": 1}));
        let err = target.stack(1).await.unwrap_err();
        assert_eq!(err.kind(), "SessionStateError");
    }

    #[tokio::test]
    async fn frame_variables_expand_locals_and_delay_statics() {
        let (target, mut adapter, _rx) = target();
        target.process_event("stopped", &json!({"reason": "breakpoint", "threadId": 1}));

        let fetch = tokio::spawn({
            let target = target.clone();
            async move { target.frame_variables(1, 0).await }
        });
        let request = adapter.expect("stackTrace").await;
        adapter
            .respond(&request, json!({"stackFrames": [{"id": 10, "name": "main", "line": 1}]}))
            .await;
        let request = adapter.expect("scopes").await;
        assert_eq!(request["arguments"]["frameId"], 10);
        adapter
            .respond(
                &request,
                json!({"scopes": [
                    {"name": "Locals", "variablesReference": 5},
                    {"name": "Statics", "variablesReference": 6, "expensive": true}
                ]}),
            )
            .await;
        let request = adapter.expect("variables").await;
        assert_eq!(request["arguments"]["variablesReference"], 5);
        adapter
            .respond(
                &request,
                json!({"variables": [
                    {"name": "n", "value": "1", "type": "int"},
                    {"name": "items", "value": "[2]", "variablesReference": 7, "indexedVariables": 2}
                ]}),
            )
            .await;

        let vars = fetch.await.unwrap().unwrap();
        assert_eq!(vars.len(), 3);
        assert_eq!(vars[0].name, "n");
        assert!(vars[0].is_local);
        assert_eq!(vars[1].kind, crate::frame::VariableKind::Array);
        assert_eq!(vars[2].kind, crate::frame::VariableKind::ScopePlaceholder);
        assert!(vars[2].is_static);

        // Cached with the frame.
        assert_eq!(target.frame_variables(1, 0).await.unwrap(), vars);
    }

    #[tokio::test]
    async fn refresh_threads_names_and_announces() {
        let (target, mut adapter, rx) = target();
        target.process_event("thread", &json!({"reason": "started", "threadId": 1}));
        drain(&rx);
        let fetch = tokio::spawn({
            let target = target.clone();
            async move { target.refresh_threads().await }
        });
        let request = adapter.expect("threads").await;
        adapter
            .respond(
                &request,
                json!({"threads": [{"id": 1, "name": "main"}, {"id": 2, "name": "worker"}]}),
            )
            .await;
        let threads = fetch.await.unwrap().unwrap();
        assert_eq!(threads[0].name, "main");
        assert_eq!(threads[1].name, "worker");
        assert_eq!(thread_kinds(&drain(&rx)), vec![(ThreadEventKind::Create, None)]);
    }
}
