//! Analysis sessions keyed by (language, workspace).
//!
//! Sessions are started on first use and replaced when their server has
//! died. All lookups go through one async lock so two callers never race
//! to spawn the same server.
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use relay_core::{Emitter, NullEmitter};
use relay_rpc::{CapabilityMap, ClientOptions};
use tokio::sync::Mutex;

use crate::error::LspError;
use crate::session::AnalysisSession;
use crate::types::{AnalysisServerConfig, DiagnosticsNotification};

type SessionKey = (String, PathBuf);

pub struct AnalysisRegistry {
    sessions: Mutex<HashMap<SessionKey, Arc<AnalysisSession>>>,
    options: ClientOptions,
    emitter: Arc<dyn Emitter<DiagnosticsNotification>>,
}

impl AnalysisRegistry {
    pub fn new(options: ClientOptions) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            options,
            emitter: Arc::new(NullEmitter),
        }
    }

    /// Route diagnostics of every session through `emitter`.
    pub fn with_emitter(mut self, emitter: Arc<dyn Emitter<DiagnosticsNotification>>) -> Self {
        self.emitter = emitter;
        self
    }

    /// Running session for `config`, starting (and initializing) one if
    /// none is alive.
    pub async fn get_or_start(
        &self,
        config: AnalysisServerConfig,
        capabilities: CapabilityMap,
    ) -> Result<Arc<AnalysisSession>, LspError> {
        let key = (config.language.clone(), config.workspace.clone());
        let session = {
            let mut sessions = self.sessions.lock().await;
            let live = sessions.get(&key).filter(|s| s.is_alive()).cloned();
            match live {
                Some(existing) => existing,
                None => {
                    if sessions.contains_key(&key) {
                        tracing::info!("replacing dead analysis session for {}", key.0);
                    }
                    let session = Arc::new(AnalysisSession::start(
                        config,
                        self.options,
                        capabilities,
                        self.emitter.clone(),
                    )?);
                    sessions.insert(key, session.clone());
                    session
                }
            }
        };
        session.initialize().await?;
        Ok(session)
    }

    /// Register an externally created session (used by tests and by
    /// callers that connect over their own streams).
    pub async fn insert(&self, session: AnalysisSession) -> Arc<AnalysisSession> {
        let key = (
            session.language().to_string(),
            session.config().workspace.clone(),
        );
        let session = Arc::new(session);
        self.sessions.lock().await.insert(key, session.clone());
        session
    }

    /// Existing session, alive or not.
    pub async fn get(&self, language: &str, workspace: &Path) -> Option<Arc<AnalysisSession>> {
        self.sessions
            .lock()
            .await
            .get(&(language.to_string(), workspace.to_path_buf()))
            .cloned()
    }

    /// Existing live session or [`LspError::NoSession`].
    pub async fn require(
        &self,
        language: &str,
        workspace: &Path,
    ) -> Result<Arc<AnalysisSession>, LspError> {
        self.get(language, workspace)
            .await
            .filter(|s| s.is_alive())
            .ok_or_else(|| LspError::NoSession {
                language: language.to_string(),
                workspace: workspace.display().to_string(),
            })
    }

    /// (language, workspace) pairs with a live server.
    pub async fn active(&self) -> Vec<(String, PathBuf)> {
        let mut keys: Vec<_> = self
            .sessions
            .lock()
            .await
            .iter()
            .filter(|(_, s)| s.is_alive())
            .map(|(k, _)| k.clone())
            .collect();
        keys.sort();
        keys
    }

    /// Shut down one session and forget it.
    pub async fn shutdown(&self, language: &str, workspace: &Path) -> Result<(), LspError> {
        let removed = self
            .sessions
            .lock()
            .await
            .remove(&(language.to_string(), workspace.to_path_buf()));
        match removed {
            Some(session) => {
                session.shutdown().await;
                Ok(())
            }
            None => Err(LspError::NoSession {
                language: language.to_string(),
                workspace: workspace.display().to_string(),
            }),
        }
    }

    pub async fn shutdown_all(&self) {
        let drained: Vec<_> = self.sessions.lock().await.drain().map(|(_, s)| s).collect();
        for session in drained {
            session.shutdown().await;
        }
    }
}

impl std::fmt::Debug for AnalysisRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnalysisRegistry")
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}
