//! Analysis channel error types.
use relay_rpc::RpcError;

/// Errors from analysis session operations.
#[derive(Debug, thiserror::Error)]
pub enum LspError {
    /// The protocol client failed (spawn, transport, remote error, ...).
    #[error(transparent)]
    Rpc(#[from] RpcError),

    /// No analysis server is configured for the language.
    #[error("no analysis server configured for language: {0}")]
    NoServer(String),

    /// No running session for the language and workspace.
    #[error("no session for {language} in {workspace}")]
    NoSession { language: String, workspace: String },

    /// The server answered with something we cannot use.
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl LspError {
    /// Short machine-readable category, used at the command boundary.
    pub fn kind(&self) -> &'static str {
        match self {
            LspError::Rpc(RpcError::Remote(_)) => "RequestFailure",
            LspError::Rpc(RpcError::Protocol(_)) | LspError::InvalidResponse(_) => "ProtocolError",
            LspError::Rpc(_) => "TransportError",
            LspError::NoServer(_) => "ConfigurationError",
            LspError::NoSession { .. } => "SessionStateError",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_rpc::ErrorPayload;

    #[test]
    fn error_no_server_display() {
        let err = LspError::NoServer("rust".into());
        assert_eq!(err.to_string(), "no analysis server configured for language: rust");
        assert_eq!(err.kind(), "ConfigurationError");
    }

    #[test]
    fn error_rpc_is_transparent() {
        let err = LspError::from(RpcError::Remote(ErrorPayload::new("unknown method")));
        assert_eq!(err.to_string(), "request failed: unknown method");
        assert_eq!(err.kind(), "RequestFailure");
    }

    #[test]
    fn error_kinds() {
        assert_eq!(LspError::from(RpcError::ChannelClosed).kind(), "TransportError");
        assert_eq!(LspError::InvalidResponse("x".into()).kind(), "ProtocolError");
        let err = LspError::NoSession {
            language: "java".into(),
            workspace: "/w".into(),
        };
        assert_eq!(err.to_string(), "no session for java in /w");
    }
}
