//! Error types for sandcast-state

use thiserror::Error;

/// Errors returned by the external services (build, registry, sandbox, version store).
#[derive(Error, Debug)]
pub enum ServiceError {
    /// Transport-level failure reaching the service
    #[error("Service unavailable: {0}")]
    Unavailable(String),

    /// The referenced template, tag, artifact or session does not exist
    #[error("Not found: {reference}")]
    NotFound { reference: String },

    /// The service understood the request but refused it
    #[error("Request rejected ({status}): {message}")]
    Rejected { status: u16, message: String },

    /// A sandbox session was already terminated by the service
    #[error("Session {session_id} is terminated")]
    SessionTerminated { session_id: String },

    /// Serialization error
    #[error("Serialization failed: {0}")]
    Serialization(String),

    /// IO error (version files, copy sources)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ServiceError {
    /// Whether this error came from the transport rather than the service itself.
    pub fn is_transport(&self) -> bool {
        matches!(self, ServiceError::Unavailable(_))
    }
}

impl From<serde_json::Error> for ServiceError {
    fn from(err: serde_json::Error) -> Self {
        ServiceError::Serialization(err.to_string())
    }
}

impl From<reqwest::Error> for ServiceError {
    fn from(err: reqwest::Error) -> Self {
        ServiceError::Unavailable(err.to_string())
    }
}
