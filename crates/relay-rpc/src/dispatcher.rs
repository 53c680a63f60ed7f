//! Request/response dispatcher.
//!
//! Tracks pending requests by id, routes responses to waiting callers
//! via oneshot channels, and hands events to handlers registered by name.
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use serde_json::Value;
use tokio::sync::oneshot;

use crate::error::ErrorPayload;
use crate::wire::Inbound;

/// Callback for a named event or notification.
pub type EventHandler = Arc<dyn Fn(&str, Value) + Send + Sync>;

/// Outcome delivered to a waiting request.
pub type DispatchResult = Result<Value, ErrorPayload>;

/// A request initiated by the peer that still needs a reply.
#[derive(Debug, Clone, PartialEq)]
pub struct ReverseRequest {
    pub id: Value,
    pub method: String,
}

/// Manages pending requests and routes inbound messages.
///
/// Shared between the reader task and every caller, so all state sits
/// behind its own lock and methods take `&self`.
#[derive(Default)]
pub struct Dispatcher {
    pending: Mutex<HashMap<i64, oneshot::Sender<DispatchResult>>>,
    handlers: RwLock<HashMap<String, EventHandler>>,
    fallback: RwLock<Option<EventHandler>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a pending request and return a receiver for its outcome.
    pub fn register(&self, id: i64) -> oneshot::Receiver<DispatchResult> {
        let (tx, rx) = oneshot::channel();
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, tx);
        rx
    }

    /// How many requests are pending.
    pub fn pending_count(&self) -> usize {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Forget a pending request. Returns true if it was still pending.
    pub fn cancel(&self, id: i64) -> bool {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id)
            .is_some()
    }

    /// Drop every pending responder. Waiting callers observe a closed
    /// channel.
    pub fn close(&self) {
        let dropped: Vec<_> = self
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .collect();
        if !dropped.is_empty() {
            tracing::debug!("failing {} pending request(s) on close", dropped.len());
        }
    }

    /// Handle events named `name`. Replaces any previous handler.
    pub fn on_event(&self, name: &str, handler: EventHandler) {
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string(), handler);
    }

    /// Handle every event that has no named handler.
    pub fn on_any_event(&self, handler: EventHandler) {
        *self.fallback.write().unwrap_or_else(PoisonError::into_inner) = Some(handler);
    }

    /// Route one inbound message.
    ///
    /// - Responses resolve the matching pending entry.
    /// - Events go to the named handler, else the fallback, else the log.
    /// - Peer requests are returned so the caller can reply.
    pub fn dispatch(&self, message: Inbound) -> Option<ReverseRequest> {
        match message {
            Inbound::Response { id, outcome } => {
                let sender = self
                    .pending
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .remove(&id);
                match sender {
                    // A dropped receiver means the caller gave up.
                    Some(tx) => {
                        let _ = tx.send(outcome);
                    }
                    None => tracing::warn!("received response for unknown request id: {}", id),
                }
                None
            }
            Inbound::Event { name, body } => {
                let handler = self
                    .handlers
                    .read()
                    .unwrap_or_else(PoisonError::into_inner)
                    .get(&name)
                    .cloned()
                    .or_else(|| {
                        self.fallback
                            .read()
                            .unwrap_or_else(PoisonError::into_inner)
                            .clone()
                    });
                match handler {
                    Some(handler) => handler(&name, body),
                    None => tracing::debug!("unhandled event: {}", name),
                }
                None
            }
            Inbound::Request { id, method, .. } => {
                tracing::debug!("received peer request (unsupported): {}", method);
                Some(ReverseRequest { id, method })
            }
        }
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("pending", &self.pending_count())
            .finish_non_exhaustive()
    }
}
