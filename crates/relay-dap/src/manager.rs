//! Global debugger state.
//!
//! Owns the breakpoint and launch catalogs (persisted after every
//! mutation), one debug session per language, and the targets running on
//! them. Breakpoint changes are pushed to every ready session whose
//! language matches the file; a session that is still configuring gets the
//! full set when its adapter sends `initialized`.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use relay_config::Config;
use relay_core::{Anchor, Emitter, Position, SourceFile, SourceResolver};
use relay_rpc::{CapabilityMap, ClientOptions};
use serde::Deserialize;

use crate::breakpoint::{
    Breakpoint, BreakpointCatalog, BreakpointId, BreakpointKind, BreakpointProperty,
};
use crate::deferred::DeferredPool;
use crate::error::DebugError;
use crate::frame::{DebugFrame, DebugVariable};
use crate::launch::{LaunchAttribute, LaunchCatalog, LaunchConfiguration, LaunchId, LaunchMode};
use crate::notification::{ChangeKind, DebugNotification};
use crate::protocol::{
    EvaluateResponseBody, SetBreakpointsArguments, SetBreakpointsResponseBody,
    SetExceptionBreakpointsArguments, Source,
};
use crate::session::{AdapterEvent, DebugSession, EventStream};
use crate::store::DebugStore;
use crate::target::{DebugAction, DebugTarget, EventEffect, TargetId, TargetSnapshot, TargetState};
use crate::template::Template;
use crate::thread::ThreadSnapshot;

/// Everything the manager needs from its host.
#[derive(Clone)]
pub struct DebugContext {
    pub config: Arc<Config>,
    pub resolver: Arc<dyn SourceResolver>,
    pub emitter: Arc<dyn Emitter<DebugNotification>>,
    /// Where breakpoints and launch configurations are persisted.
    pub state_dir: PathBuf,
}

/// A launch configuration as the editor creates it.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewLaunch {
    pub name: String,
    pub language: String,
    pub project: String,
    #[serde(default)]
    pub mode: LaunchMode,
    #[serde(default, rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub attributes: BTreeMap<LaunchAttribute, String>,
    /// Save right away instead of leaving the configuration pending.
    #[serde(default)]
    pub save: bool,
}

/// Changes to a launch configuration. Absent fields are left alone; an
/// empty attribute value removes the attribute.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LaunchEdit {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub mode: Option<LaunchMode>,
    #[serde(default)]
    pub project: Option<String>,
    #[serde(default)]
    pub attributes: BTreeMap<LaunchAttribute, String>,
}

pub struct DebugManager {
    ctx: DebugContext,
    options: ClientOptions,
    store: DebugStore,
    template: Template,
    prefetch_delay: Duration,
    breakpoints: Mutex<BreakpointCatalog>,
    launches: Mutex<LaunchCatalog>,
    sessions: tokio::sync::Mutex<HashMap<String, Arc<DebugSession>>>,
    targets: Mutex<BTreeMap<TargetId, Arc<DebugTarget>>>,
    next_target: AtomicU64,
    pool: DeferredPool,
}

impl DebugManager {
    /// Load persisted state and start the deferred pool. Must be called
    /// inside a tokio runtime.
    pub fn new(ctx: DebugContext) -> Result<Arc<Self>, DebugError> {
        let store = DebugStore::new(&ctx.state_dir);
        let breakpoints = store.load_breakpoints().unwrap_or_else(|e| {
            tracing::error!("ignoring stored breakpoints: {}", e);
            Vec::new()
        });
        let launches = store.load_launches().unwrap_or_else(|e| {
            tracing::error!("ignoring stored launch configurations: {}", e);
            Vec::new()
        });
        tracing::info!(
            "debug state: {} breakpoints, {} launch configurations",
            breakpoints.len(),
            launches.len()
        );

        let rpc = &ctx.config.rpc;
        Ok(Arc::new(Self {
            options: ClientOptions {
                request_timeout: rpc.request_timeout(),
            },
            prefetch_delay: rpc.prefetch_delay(),
            pool: DeferredPool::new(rpc.deferred_workers),
            store,
            template: Template::new()?,
            breakpoints: Mutex::new(BreakpointCatalog::from_breakpoints(breakpoints)),
            launches: Mutex::new(LaunchCatalog::from_saved(launches)),
            sessions: tokio::sync::Mutex::new(HashMap::new()),
            targets: Mutex::new(BTreeMap::new()),
            next_target: AtomicU64::new(1),
            ctx,
        }))
    }

    fn lock_breakpoints(&self) -> MutexGuard<'_, BreakpointCatalog> {
        self.breakpoints.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_launches(&self) -> MutexGuard<'_, LaunchCatalog> {
        self.launches.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_targets(&self) -> MutexGuard<'_, BTreeMap<TargetId, Arc<DebugTarget>>> {
        self.targets.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, note: DebugNotification) {
        self.ctx.emitter.emit(note);
    }

    // -----------------------------------------------------------------------
    // Persistence
    // -----------------------------------------------------------------------

    // A failed write is logged, not returned: the in-memory catalog stays
    // authoritative and the next mutation rewrites the whole file.
    fn persist_breakpoints(&self, catalog: &BreakpointCatalog) {
        if let Err(e) = self.store.save_breakpoints(catalog.all()) {
            tracing::error!("saving breakpoints failed: {}", e);
        }
    }

    fn persist_launches(&self, catalog: &LaunchCatalog) {
        if let Err(e) = self.store.save_launches(catalog.saved()) {
            tracing::error!("saving launch configurations failed: {}", e);
        }
    }

    // -----------------------------------------------------------------------
    // Breakpoints
    // -----------------------------------------------------------------------

    pub fn breakpoints(&self) -> Vec<Breakpoint> {
        self.lock_breakpoints().all().cloned().collect()
    }

    fn anchor_for(&self, project: &str, path: &Path, line: u32, column: Option<u32>) -> Option<Anchor> {
        match self.ctx.resolver.open(project, path) {
            Ok(file) => anchor_in(file.as_ref(), line, column),
            Err(e) => {
                tracing::debug!("no anchor for {}: {}", path.display(), e);
                None
            }
        }
    }

    /// Move the line breakpoints of `path` to where their anchors resolve
    /// now, and anchor those restored without one. Returns the moved
    /// breakpoints.
    fn relocate(&self, path: &Path) -> Vec<Breakpoint> {
        let entries: Vec<(BreakpointId, String, u32, Option<u32>, Option<Anchor>)> = self
            .lock_breakpoints()
            .for_file(path)
            .into_iter()
            .filter_map(|bp| match &bp.kind {
                BreakpointKind::Line {
                    project,
                    line,
                    column,
                    anchor,
                    ..
                } => Some((bp.id, project.clone(), *line, *column, *anchor)),
                BreakpointKind::Exception { .. } => None,
            })
            .collect();
        let Some((_, project, ..)) = entries.first() else {
            return Vec::new();
        };
        let file = match self.ctx.resolver.open(project, path) {
            Ok(file) => file,
            Err(e) => {
                tracing::debug!("breakpoints of {} stay put: {}", path.display(), e);
                return Vec::new();
            }
        };

        let mut moved = Vec::new();
        let mut catalog = self.lock_breakpoints();
        for (id, _, line, column, anchor) in entries {
            let Some(anchor) = anchor else {
                if let Some(anchor) = anchor_in(file.as_ref(), line, column) {
                    catalog.relocate(id, line, Some(anchor));
                }
                continue;
            };
            let current = file
                .resolve_anchor(&anchor)
                .and_then(|offset| file.position_of(offset).ok())
                .and_then(|pos| u32::try_from(pos.line + 1).ok());
            match current {
                Some(now) if now != line => {
                    if catalog.relocate(id, now, None) {
                        tracing::debug!("breakpoint {} moved from line {} to {}", id, line, now);
                        moved.extend(catalog.get(id).cloned());
                    }
                }
                _ => {}
            }
        }
        if !moved.is_empty() {
            self.persist_breakpoints(&catalog);
        }
        moved
    }

    /// Add a line breakpoint. `None` when one already exists on that line.
    pub async fn add_line_breakpoint(
        &self,
        project: &str,
        path: &Path,
        line: u32,
        column: Option<u32>,
    ) -> Result<Option<BreakpointId>, DebugError> {
        if line == 0 {
            return Err(DebugError::Configuration("line numbers start at 1".into()));
        }
        let anchor = self.anchor_for(project, path, line, column);
        let breakpoint = {
            let mut catalog = self.lock_breakpoints();
            let Some(id) = catalog.add_line(project, path, line, column, anchor) else {
                tracing::debug!("breakpoint already set at {}:{}", path.display(), line);
                return Ok(None);
            };
            self.persist_breakpoints(&catalog);
            catalog.get(id).cloned()
        };
        let Some(breakpoint) = breakpoint else {
            return Ok(None);
        };
        let id = breakpoint.id;
        self.emit(DebugNotification::Breakpoint {
            change: ChangeKind::Add,
            breakpoint,
        });
        self.sync_file(project, path).await;
        Ok(Some(id))
    }

    /// Create or update the single exception breakpoint.
    pub async fn set_exception_breakpoint(
        &self,
        caught: bool,
        uncaught: bool,
        project: Option<&str>,
    ) -> Result<BreakpointId, DebugError> {
        let (id, created, breakpoint) = {
            let mut catalog = self.lock_breakpoints();
            let (id, created) = catalog.set_exception(caught, uncaught);
            self.persist_breakpoints(&catalog);
            (id, created, catalog.get(id).cloned())
        };
        if let Some(breakpoint) = breakpoint {
            let change = if created {
                ChangeKind::Add
            } else {
                ChangeKind::Change
            };
            self.emit(DebugNotification::Breakpoint { change, breakpoint });
        }
        self.sync_exceptions(project).await;
        Ok(id)
    }

    /// Apply property edits in order. `CLEAR` removes the breakpoint and
    /// ends processing. Edits are applied all or nothing.
    pub async fn edit_breakpoint(
        &self,
        id: BreakpointId,
        edits: &[(String, String)],
    ) -> Result<(), DebugError> {
        let (change, breakpoint) = {
            let mut catalog = self.lock_breakpoints();
            let mut edited = catalog
                .get(id)
                .cloned()
                .ok_or_else(|| DebugError::Configuration(format!("unknown breakpoint: {id}")))?;
            let mut clear = false;
            for (property, value) in edits {
                let property = property.parse::<BreakpointProperty>()?;
                if property == BreakpointProperty::Clear {
                    clear = true;
                    break;
                }
                edited.apply(property, value)?;
            }
            let outcome = if clear {
                catalog.remove(id).map(|bp| (ChangeKind::Remove, bp))
            } else {
                catalog.get_mut(id).map(|slot| {
                    *slot = edited.clone();
                    (ChangeKind::Change, edited)
                })
            };
            self.persist_breakpoints(&catalog);
            outcome.ok_or_else(|| DebugError::Configuration(format!("unknown breakpoint: {id}")))?
        };

        let resync = breakpoint.kind.clone();
        self.emit(DebugNotification::Breakpoint { change, breakpoint });
        match resync {
            BreakpointKind::Line { project, path, .. } => self.sync_file(&project, &path).await,
            BreakpointKind::Exception { .. } => self.sync_exceptions(None).await,
        }
        Ok(())
    }

    /// Remove every breakpoint. Returns how many were removed.
    pub async fn clear_all_breakpoints(&self) -> Result<usize, DebugError> {
        let removed = {
            let mut catalog = self.lock_breakpoints();
            let removed = catalog.clear();
            self.persist_breakpoints(&catalog);
            removed
        };
        let mut files: Vec<(String, PathBuf)> = Vec::new();
        let mut exception = false;
        for breakpoint in &removed {
            match &breakpoint.kind {
                BreakpointKind::Line { project, path, .. } => {
                    let file = (project.clone(), path.clone());
                    if !files.contains(&file) {
                        files.push(file);
                    }
                }
                BreakpointKind::Exception { .. } => exception = true,
            }
            self.emit(DebugNotification::Breakpoint {
                change: ChangeKind::Remove,
                breakpoint: breakpoint.clone(),
            });
        }
        for (project, path) in files {
            self.sync_file(&project, &path).await;
        }
        if exception {
            self.sync_exceptions(None).await;
        }
        Ok(removed.len())
    }

    // -----------------------------------------------------------------------
    // Breakpoint synchronization
    // -----------------------------------------------------------------------

    fn language_of(&self, project: Option<&str>, path: Option<&Path>) -> Option<String> {
        path.and_then(|p| self.ctx.resolver.language_of(p))
            .or_else(|| project.and_then(|p| self.ctx.resolver.project_language(p)))
    }

    /// Live sessions for `language`, or all of them when it is unknown.
    async fn sessions_for(&self, language: Option<&str>) -> Vec<Arc<DebugSession>> {
        self.sessions
            .lock()
            .await
            .values()
            .filter(|s| s.is_alive() && language.map_or(true, |l| s.language() == l))
            .cloned()
            .collect()
    }

    async fn sync_file(&self, project: &str, path: &Path) {
        let language = self.language_of(Some(project), Some(path));
        for session in self.sessions_for(language.as_deref()).await {
            if session.is_ready() {
                self.sync_file_with(&session, path).await;
            }
        }
    }

    /// One `setBreakpoints` carrying every enabled breakpoint of `path`,
    /// possibly none.
    async fn sync_file_with(&self, session: &DebugSession, path: &Path) {
        for breakpoint in self.relocate(path) {
            self.emit(DebugNotification::Breakpoint {
                change: ChangeKind::Change,
                breakpoint,
            });
        }
        let (ids, breakpoints): (Vec<BreakpointId>, Vec<_>) = self
            .lock_breakpoints()
            .for_file(path)
            .into_iter()
            .filter_map(|bp| bp.to_source_breakpoint().map(|sb| (bp.id, sb)))
            .unzip();
        let args = SetBreakpointsArguments {
            source: Source {
                name: path.file_name().map(|n| n.to_string_lossy().into_owned()),
                path: Some(path.to_string_lossy().into_owned()),
                source_reference: None,
            },
            breakpoints,
        };
        let body: SetBreakpointsResponseBody = match session.request_as("setBreakpoints", args).await {
            Ok(body) => body,
            Err(e) => {
                tracing::warn!(
                    "[{}] setBreakpoints for {} failed: {}",
                    session.language(),
                    path.display(),
                    e
                );
                return;
            }
        };
        let changed: Vec<Breakpoint> = {
            let mut catalog = self.lock_breakpoints();
            catalog
                .apply_verification(&ids, &body.breakpoints)
                .into_iter()
                .filter_map(|id| catalog.get(id).cloned())
                .collect()
        };
        for breakpoint in changed {
            self.emit(DebugNotification::Breakpoint {
                change: ChangeKind::Change,
                breakpoint,
            });
        }
    }

    async fn sync_exceptions(&self, project: Option<&str>) {
        let language = self.language_of(project, None);
        for session in self.sessions_for(language.as_deref()).await {
            if session.is_ready() {
                self.sync_exceptions_with(&session).await;
            }
        }
    }

    async fn sync_exceptions_with(&self, session: &DebugSession) {
        let (caught, uncaught) = self
            .lock_breakpoints()
            .exception()
            .filter(|bp| bp.enabled)
            .and_then(|bp| match bp.kind {
                BreakpointKind::Exception { caught, uncaught } => Some((caught, uncaught)),
                BreakpointKind::Line { .. } => None,
            })
            .unwrap_or((false, false));
        let args = SetExceptionBreakpointsArguments {
            filters: session.exception_filters(caught, uncaught),
        };
        if let Err(e) = session.request("setExceptionBreakpoints", args).await {
            tracing::warn!("[{}] setExceptionBreakpoints failed: {}", session.language(), e);
        }
    }

    /// Every file whose language matches the session, then the exception
    /// filters.
    async fn sync_all(&self, session: &DebugSession) {
        let files = self.lock_breakpoints().files();
        for (project, path) in files {
            let language = self.language_of(Some(&project), Some(&path));
            if language.as_deref().map_or(true, |l| l == session.language()) {
                self.sync_file_with(session, &path).await;
            }
        }
        self.sync_exceptions_with(session).await;
    }

    // -----------------------------------------------------------------------
    // Launch configurations
    // -----------------------------------------------------------------------

    pub fn launches(&self) -> Vec<LaunchConfiguration> {
        self.lock_launches().list().into_iter().cloned().collect()
    }

    pub fn launch(&self, id: LaunchId) -> Result<LaunchConfiguration, DebugError> {
        self.lock_launches()
            .get(id)
            .cloned()
            .ok_or_else(|| DebugError::Configuration(format!("unknown launch configuration: {id}")))
    }

    fn emit_launch(&self, change: ChangeKind, configuration: LaunchConfiguration) {
        self.emit(DebugNotification::Launch {
            change,
            configuration,
        });
    }

    pub fn create_launch(&self, new: NewLaunch) -> Result<LaunchConfiguration, DebugError> {
        if new.name.trim().is_empty() {
            return Err(DebugError::Configuration("launch configuration needs a name".into()));
        }
        let config = {
            let mut catalog = self.lock_launches();
            let id = catalog.create(&new.name, &new.language, &new.project, new.mode);
            let config = catalog.working_copy(id)?;
            config.kind = new.kind;
            config.attributes = new.attributes;
            if new.save {
                catalog.save(id)?;
                self.persist_launches(&catalog);
            }
            catalog.get(id).cloned()
        };
        let config = config.ok_or_else(|| DebugError::Configuration("launch configuration vanished".into()))?;
        self.emit_launch(ChangeKind::Add, config.clone());
        Ok(config)
    }

    /// Copy a configuration under a new id. The copy is saved.
    pub fn clone_launch(&self, id: LaunchId) -> Result<LaunchConfiguration, DebugError> {
        let config = {
            let mut catalog = self.lock_launches();
            let copy = catalog.clone_config(id)?;
            self.persist_launches(&catalog);
            catalog.get(copy).cloned()
        };
        let config = config.ok_or_else(|| DebugError::Configuration("launch configuration vanished".into()))?;
        self.emit_launch(ChangeKind::Add, config.clone());
        Ok(config)
    }

    /// Edit the working copy. Saved configurations change only on commit.
    pub fn edit_launch(&self, id: LaunchId, edit: LaunchEdit) -> Result<LaunchConfiguration, DebugError> {
        let mut catalog = self.lock_launches();
        let saved = catalog.get(id).map(|c| c.saved).unwrap_or(false);
        let working = catalog.working_copy(id)?;
        if let Some(name) = edit.name {
            working.name = name;
        }
        if let Some(kind) = edit.kind {
            working.kind = kind;
        }
        if let Some(mode) = edit.mode {
            working.mode = mode;
        }
        if let Some(project) = edit.project {
            working.project = project;
        }
        for (attr, value) in &edit.attributes {
            working.set_attribute(*attr, value);
        }
        let working = working.clone();
        drop(catalog);
        if !saved {
            self.emit_launch(ChangeKind::Change, working.clone());
        }
        Ok(working)
    }

    /// Fold the working copy into the configuration.
    pub fn commit_launch(&self, id: LaunchId) -> Result<LaunchConfiguration, DebugError> {
        let (committed, config) = {
            let mut catalog = self.lock_launches();
            let committed = catalog.commit(id)?;
            if committed {
                self.persist_launches(&catalog);
            }
            (committed, catalog.get(id).cloned())
        };
        let config = config.ok_or_else(|| DebugError::Configuration(format!("unknown launch configuration: {id}")))?;
        if committed {
            self.emit_launch(ChangeKind::Change, config.clone());
        }
        Ok(config)
    }

    /// Commit pending edits and persist.
    pub fn save_launch(&self, id: LaunchId) -> Result<LaunchConfiguration, DebugError> {
        let config = {
            let mut catalog = self.lock_launches();
            catalog.save(id)?;
            self.persist_launches(&catalog);
            catalog.get(id).cloned()
        };
        let config = config.ok_or_else(|| DebugError::Configuration(format!("unknown launch configuration: {id}")))?;
        self.emit_launch(ChangeKind::Change, config.clone());
        Ok(config)
    }

    pub fn delete_launch(&self, id: LaunchId) -> Result<(), DebugError> {
        let removed = {
            let mut catalog = self.lock_launches();
            let removed = catalog.delete(id)?;
            self.persist_launches(&catalog);
            removed
        };
        self.emit_launch(ChangeKind::Remove, removed);
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Sessions and targets
    // -----------------------------------------------------------------------

    fn project_root(&self, project: &str) -> Option<PathBuf> {
        self.ctx
            .config
            .projects
            .get(project)
            .map(|p| p.root.clone())
    }

    fn target_on(&self, session: &Arc<DebugSession>) -> Option<Arc<DebugTarget>> {
        self.lock_targets()
            .values()
            .find(|t| Arc::ptr_eq(t.session(), session) && t.state() != TargetState::Terminated)
            .cloned()
    }

    fn target(&self, id: TargetId) -> Result<Arc<DebugTarget>, DebugError> {
        self.lock_targets()
            .get(&id)
            .cloned()
            .ok_or_else(|| DebugError::Configuration(format!("unknown target: {id}")))
    }

    pub fn targets(&self) -> Vec<TargetSnapshot> {
        self.lock_targets()
            .values()
            .map(|t| t.snapshot())
            .collect()
    }

    /// Register an already connected session and start consuming its
    /// events.
    pub async fn insert_session(self: &Arc<Self>, session: Arc<DebugSession>, events: EventStream) {
        let replaced = self
            .sessions
            .lock()
            .await
            .insert(session.language().to_string(), session.clone());
        if let Some(old) = replaced {
            if !Arc::ptr_eq(&old, &session) {
                old.shutdown().await;
            }
        }
        self.spawn_event_loop(session, events);
    }

    /// Reserve a target for `launch` on the live session of its language,
    /// starting the adapter on demand. A dead session is replaced. The
    /// target is registered before the sessions lock is released, so a
    /// concurrent run for the same language sees it.
    async fn claim_target(
        self: &Arc<Self>,
        launch: LaunchConfiguration,
        cwd: Option<&Path>,
    ) -> Result<Arc<DebugTarget>, DebugError> {
        let language = launch.language.clone();
        let mut sessions = self.sessions.lock().await;
        let live = sessions.get(&language).filter(|s| s.is_alive()).cloned();
        let session = match live {
            Some(existing) => {
                if self.target_on(&existing).is_some() {
                    return Err(DebugError::SessionState(format!(
                        "a {language} debug target is already running"
                    )));
                }
                existing
            }
            None => {
                let adapter = self
                    .ctx
                    .config
                    .debug_adapter(&language)
                    .cloned()
                    .ok_or_else(|| {
                        DebugError::Configuration(format!(
                            "no debug adapter configured for {language}"
                        ))
                    })?;
                let capabilities = CapabilityMap::new(
                    self.ctx
                        .config
                        .languages
                        .get(&language)
                        .map(|l| l.capabilities_json())
                        .unwrap_or_default(),
                );
                let (session, events) =
                    DebugSession::start(&language, adapter, cwd, self.options, capabilities)?;
                sessions.insert(language.clone(), session.clone());
                self.spawn_event_loop(session.clone(), events);
                session
            }
        };

        let id = self.next_target.fetch_add(1, Ordering::SeqCst);
        let target = Arc::new(DebugTarget::new(
            id,
            launch,
            session,
            self.ctx.emitter.clone(),
            Some(self.ctx.resolver.clone()),
        ));
        self.lock_targets().insert(id, target.clone());
        drop(sessions);

        self.emit(DebugNotification::Target {
            change: ChangeKind::Add,
            target: target.snapshot(),
        });
        Ok(target)
    }

    /// Start a target for launch configuration `launch_id`.
    pub async fn run(self: &Arc<Self>, launch_id: LaunchId) -> Result<TargetId, DebugError> {
        let launch = self.launch(launch_id)?;
        let root = self.project_root(&launch.project);
        let target = self.claim_target(launch, root.as_deref()).await?;
        if let Err(e) = target.session().initialize().await {
            target.mark_terminated();
            return Err(e);
        }
        target.start_debug(&self.template, root.as_deref()).await?;
        Ok(target.id())
    }

    fn spawn_event_loop(self: &Arc<Self>, session: Arc<DebugSession>, events: EventStream) {
        let manager = Arc::downgrade(self);
        tokio::spawn(run_events(manager, session, events));
    }

    async fn handle_event(&self, session: &Arc<DebugSession>, event: AdapterEvent) {
        if event.name == "initialized" {
            tracing::info!("[{}] adapter initialized, sending configuration", session.language());
            self.sync_all(session).await;
            if let Err(e) = session.finish_configuration().await {
                tracing::warn!("[{}] configurationDone failed: {}", session.language(), e);
            }
            return;
        }
        let Some(target) = self.target_on(session) else {
            tracing::debug!(
                "[{}] event '{}' without a live target",
                session.language(),
                event.name
            );
            return;
        };
        match target.process_event(&event.name, &event.body) {
            EventEffect::Stopped(threads) => self.schedule_prefetch(&target, threads),
            EventEffect::Terminated => self.retire_session(session).await,
            EventEffect::None => {}
        }
    }

    /// Fetch stacks of freshly stopped threads after a short delay, unless
    /// the target moved on in the meantime.
    fn schedule_prefetch(&self, target: &Arc<DebugTarget>, threads: Vec<i64>) {
        let version = target.stamp().current();
        for thread_id in threads {
            let target = target.clone();
            self.pool.schedule(
                self.prefetch_delay,
                target.stamp().clone(),
                version,
                async move {
                    if let Err(e) = target.stack(thread_id).await {
                        tracing::debug!("stack prefetch of thread {} failed: {}", thread_id, e);
                    }
                },
            );
        }
    }

    /// Disconnect a session whose target has ended.
    async fn retire_session(&self, session: &Arc<DebugSession>) {
        {
            let mut sessions = self.sessions.lock().await;
            if sessions
                .get(session.language())
                .is_some_and(|s| Arc::ptr_eq(s, session))
            {
                sessions.remove(session.language());
            }
        }
        session.shutdown().await;
    }

    async fn session_closed(&self, session: &Arc<DebugSession>) {
        if let Some(target) = self.target_on(session) {
            tracing::warn!("[{}] adapter went away", session.language());
            target.mark_terminated();
        }
        let mut sessions = self.sessions.lock().await;
        if sessions
            .get(session.language())
            .is_some_and(|s| Arc::ptr_eq(s, session))
        {
            sessions.remove(session.language());
        }
    }

    // -----------------------------------------------------------------------
    // Execution control and inspection
    // -----------------------------------------------------------------------

    pub async fn debug_action(
        &self,
        target: TargetId,
        action: DebugAction,
        thread: Option<i64>,
        frame: Option<usize>,
    ) -> Result<bool, DebugError> {
        self.target(target)?.debug_action(action, thread, frame).await
    }

    /// Threads of a target, refreshed from the adapter while it runs.
    pub async fn threads(&self, target: TargetId) -> Result<Vec<ThreadSnapshot>, DebugError> {
        let target = self.target(target)?;
        if target.state() == TargetState::Running {
            match target.refresh_threads().await {
                Ok(threads) => return Ok(threads),
                Err(e) => tracing::debug!("thread refresh failed: {}", e),
            }
        }
        Ok(target.threads())
    }

    pub async fn stack(&self, target: TargetId, thread: i64) -> Result<Vec<DebugFrame>, DebugError> {
        self.target(target)?.stack(thread).await
    }

    pub async fn frame_variables(
        &self,
        target: TargetId,
        thread: i64,
        frame: usize,
    ) -> Result<Vec<DebugVariable>, DebugError> {
        self.target(target)?.frame_variables(thread, frame).await
    }

    pub async fn variable_children(
        &self,
        target: TargetId,
        reference: i64,
    ) -> Result<Vec<DebugVariable>, DebugError> {
        self.target(target)?.variable_children(reference).await
    }

    /// Evaluate in the first suspended thread (optionally a specific one)
    /// of a running target in `project`, in frame `frame` or the top one.
    pub async fn evaluate_expression(
        &self,
        project: Option<&str>,
        expression: &str,
        thread: Option<i64>,
        frame: Option<usize>,
    ) -> Result<EvaluateResponseBody, DebugError> {
        let candidates: Vec<Arc<DebugTarget>> = self
            .lock_targets()
            .values()
            .filter(|t| t.state() == TargetState::Running)
            .filter(|t| project.map_or(true, |p| t.launch().project == p))
            .cloned()
            .collect();
        for target in candidates {
            for thread_id in target.suspended_threads() {
                if thread.is_some_and(|wanted| wanted != thread_id) {
                    continue;
                }
                let frames = match target.stack(thread_id).await {
                    Ok(frames) => frames,
                    Err(e) => {
                        tracing::debug!("no frames for thread {}: {}", thread_id, e);
                        continue;
                    }
                };
                let chosen = match frame {
                    Some(index) => frames.get(index),
                    None => frames.first(),
                };
                if let Some(chosen) = chosen {
                    return target.evaluate(chosen.id, expression).await;
                }
            }
        }
        Err(DebugError::SessionState("no evaluation to do".into()))
    }

    /// Disconnect every session.
    pub async fn shutdown(&self) {
        let sessions: Vec<Arc<DebugSession>> = self.sessions.lock().await.drain().map(|(_, s)| s).collect();
        for session in sessions {
            session.shutdown().await;
        }
        for target in self.lock_targets().values() {
            target.mark_terminated();
        }
    }
}

impl std::fmt::Debug for DebugManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DebugManager")
            .field("state_dir", &self.ctx.state_dir)
            .field("targets", &self.lock_targets().len())
            .finish()
    }
}

fn anchor_in(file: &dyn SourceFile, line: u32, column: Option<u32>) -> Option<Anchor> {
    let position = Position::from_one_based(line, column.unwrap_or(1));
    match file.offset_of(position) {
        Ok(offset) => Some(file.anchor_at(offset)),
        Err(e) => {
            tracing::debug!("no anchor for {}:{}: {}", file.path().display(), line, e);
            None
        }
    }
}

/// Consume one session's events until its channel closes.
async fn run_events(manager: Weak<DebugManager>, session: Arc<DebugSession>, mut events: EventStream) {
    loop {
        let event = tokio::select! {
            biased;
            event = events.recv() => event,
            _ = session.client().closed() => events.try_recv().ok(),
        };
        let Some(event) = event else {
            break;
        };
        let Some(manager) = manager.upgrade() else {
            return;
        };
        manager.handle_event(&session, event).await;
    }
    tracing::debug!("[{}] event loop finished", session.language());
    if let Some(manager) = manager.upgrade() {
        manager.session_closed(&session).await;
    }
}
