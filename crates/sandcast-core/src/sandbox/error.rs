//! Error types for sandbox sessions.

use sandcast_state::ServiceError;

/// Errors produced while provisioning, driving or tearing down a session.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("failed to provision sandbox from {template_ref}: {source}")]
    ProvisionFailed {
        template_ref: String,
        #[source]
        source: ServiceError,
    },

    #[error("session {session_id} timed out after {timeout_ms}ms")]
    TimedOut { session_id: String, timeout_ms: u64 },

    #[error("session {session_id} is terminated")]
    Terminated { session_id: String },

    #[error("command `{command}` on session {session_id} failed: {source}")]
    Transport {
        session_id: String,
        command: String,
        #[source]
        source: ServiceError,
    },

    #[error("teardown of session {session_id} failed: {source}")]
    TeardownFailed {
        session_id: String,
        #[source]
        source: ServiceError,
    },

    #[error("invalid session configuration: {0}")]
    InvalidConfig(String),
}

impl SessionError {
    /// Whether the session can no longer accept commands.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionError::TimedOut { .. } | SessionError::Terminated { .. }
        )
    }
}

/// Result type for session operations.
pub type SessionResult<T> = std::result::Result<T, SessionError>;
