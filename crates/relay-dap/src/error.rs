//! Debug error types.

use relay_core::CoreError;
use relay_rpc::RpcError;
use thiserror::Error;

/// Errors from debug manager and session operations.
#[derive(Debug, Error)]
pub enum DebugError {
    /// Malformed frame or a body that does not have the expected shape.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The adapter answered `success: false`.
    #[error("{command} failed: {message}")]
    RequestFailed {
        /// The request that failed.
        command: String,
        /// The adapter's message.
        message: String,
    },

    /// Unknown launch configuration, project, file or breakpoint.
    #[error("{0}")]
    Configuration(String),

    /// The target, thread or frame is not in a state that allows the action.
    #[error("{0}")]
    SessionState(String),

    /// The adapter channel failed or closed.
    #[error("transport error: {0}")]
    Transport(#[source] RpcError),

    /// Local file I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Persisted state could not be read or written.
    #[error("persistence error: {0}")]
    Persistence(String),
}

impl DebugError {
    /// Map a protocol client error raised by `command`.
    pub fn from_rpc(command: &str, err: RpcError) -> Self {
        match err {
            RpcError::Remote(payload) => DebugError::RequestFailed {
                command: command.to_string(),
                message: payload.message,
            },
            RpcError::Protocol(msg) => DebugError::Protocol(msg),
            other => DebugError::Transport(other),
        }
    }

    /// Category reported at the command boundary.
    pub fn kind(&self) -> &'static str {
        match self {
            DebugError::Protocol(_) => "ProtocolError",
            DebugError::RequestFailed { .. } => "RequestFailure",
            DebugError::Configuration(_) => "ConfigurationError",
            DebugError::SessionState(_) => "SessionStateError",
            DebugError::Transport(_) | DebugError::Io(_) => "TransportError",
            DebugError::Persistence(_) => "PersistenceError",
        }
    }

    pub(crate) fn invalid_body(command: &str, err: serde_json::Error) -> Self {
        DebugError::Protocol(format!("unexpected '{command}' body: {err}"))
    }
}

impl From<CoreError> for DebugError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Io(e) => DebugError::Io(e),
            other => DebugError::Configuration(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_rpc::ErrorPayload;

    #[test]
    fn remote_error_becomes_request_failed() {
        let err = DebugError::from_rpc("launch", RpcError::Remote(ErrorPayload::new("no main class")));
        assert_eq!(err.to_string(), "launch failed: no main class");
        assert_eq!(err.kind(), "RequestFailure");
    }

    #[test]
    fn closed_channel_is_transport() {
        let err = DebugError::from_rpc("threads", RpcError::ChannelClosed);
        assert!(matches!(err, DebugError::Transport(RpcError::ChannelClosed)));
        assert_eq!(err.kind(), "TransportError");
        assert_eq!(err.to_string(), "transport error: channel closed");
    }

    #[test]
    fn protocol_error_keeps_message() {
        let err = DebugError::from_rpc("scopes", RpcError::Protocol("bad frame".into()));
        assert_eq!(err.kind(), "ProtocolError");
        assert_eq!(err.to_string(), "protocol error: bad frame");
    }

    #[test]
    fn core_errors_are_configuration_errors() {
        let err: DebugError = CoreError::UnknownProject("demo".into()).into();
        assert_eq!(err.kind(), "ConfigurationError");
        assert_eq!(err.to_string(), "unknown project: demo");
    }

    #[test]
    fn session_state_display_is_bare() {
        let err = DebugError::SessionState("no evaluation to do".into());
        assert_eq!(err.to_string(), "no evaluation to do");
        assert_eq!(err.kind(), "SessionStateError");
    }
}
