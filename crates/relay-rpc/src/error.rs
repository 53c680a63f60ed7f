//! Protocol client error types.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error body returned by the peer for a failed request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorPayload {
    /// JSON-RPC error code; the debug protocol has none.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<i64>,
    /// Human-readable message.
    pub message: String,
    /// Extra data attached by the peer.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl ErrorPayload {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            code: None,
            message: message.into(),
            data: None,
        }
    }
}

impl fmt::Display for ErrorPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(code) => write!(f, "{} (code {code})", self.message),
            None => f.write_str(&self.message),
        }
    }
}

/// Errors from protocol client operations.
#[derive(Debug, Error)]
pub enum RpcError {
    /// The server/adapter process could not be started.
    #[error("failed to start '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// I/O failure on the channel.
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// Malformed frame or unexpected message shape.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The peer answered with an error.
    #[error("request failed: {0}")]
    Remote(ErrorPayload),

    /// No answer arrived before the configured deadline.
    #[error("request '{method}' timed out after {millis} ms")]
    Timeout { method: String, millis: u128 },

    /// The channel died while the request was outstanding.
    #[error("channel closed")]
    ChannelClosed,
}

impl RpcError {
    /// Message of a remote failure, if this is one.
    pub fn remote_message(&self) -> Option<&str> {
        match self {
            RpcError::Remote(payload) => Some(&payload.message),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_display_with_and_without_code() {
        let mut p = ErrorPayload::new("boom");
        assert_eq!(p.to_string(), "boom");
        p.code = Some(-32601);
        assert_eq!(p.to_string(), "boom (code -32601)");
    }

    #[test]
    fn remote_error_display() {
        let err = RpcError::Remote(ErrorPayload::new("no such thread"));
        assert_eq!(err.to_string(), "request failed: no such thread");
        assert_eq!(err.remote_message(), Some("no such thread"));
    }

    #[test]
    fn timeout_display() {
        let err = RpcError::Timeout {
            method: "evaluate".into(),
            millis: 1500,
        };
        assert_eq!(err.to_string(), "request 'evaluate' timed out after 1500 ms");
        assert_eq!(err.remote_message(), None);
    }

    #[test]
    fn io_converts_to_transport() {
        let err: RpcError = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe").into();
        assert!(matches!(err, RpcError::Transport(_)));
    }

    #[test]
    fn spawn_error_names_command() {
        let err = RpcError::Spawn {
            command: "jdtls".into(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "missing"),
        };
        assert!(err.to_string().contains("jdtls"));
    }
}
