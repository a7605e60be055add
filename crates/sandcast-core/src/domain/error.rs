//! Domain-level error taxonomy for sandcast.

/// Structural validation failures. Surfaced immediately, never retried.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("invalid version format \"{value}\": expected MAJOR.MINOR.PATCH")]
    InvalidVersionFormat { value: String },

    #[error("duplicate tag: {tag}")]
    DuplicateTag { tag: String },

    #[error("invalid tag \"{tag}\": {reason}")]
    InvalidTag { tag: String, reason: String },

    #[error("{field} must not be empty")]
    EmptyField { field: &'static str },

    #[error("base image must be the first step (found at step {index})")]
    BaseImageNotFirst { index: usize },

    #[error("template declares more than one base image")]
    DuplicateBaseImage,

    #[error("{field} must be a positive integer")]
    NonPositiveResource { field: &'static str },
}

/// sandcast domain errors.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("template not found: {0}")]
    MissingTemplate(String),

    #[error("invalid template manifest {path}: {reason}")]
    InvalidManifest { path: String, reason: String },

    #[error("service error: {0}")]
    Service(#[from] sandcast_state::ServiceError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for sandcast domain operations.
pub type Result<T> = std::result::Result<T, CoreError>;
