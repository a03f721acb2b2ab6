//! Error types for the derivo pipeline.

use thiserror::Error;

use crate::models::JobType;

/// Result type alias using derivo's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Typed reason the validator refused a generated artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    /// Destination file missing or zero bytes.
    Empty,
    /// File exists but is below the type-specific minimum size.
    TooSmall { size: u64, min: u64 },
    /// Image/PDF header did not decode to positive dimensions.
    BadHeader(String),
    /// Content hash matched a known generic placeholder render.
    PlaceholderSignature,
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RejectReason::Empty => write!(f, "artifact is empty or missing"),
            RejectReason::TooSmall { size, min } => {
                write!(f, "artifact is {} bytes, minimum is {}", size, min)
            }
            RejectReason::BadHeader(detail) => write!(f, "artifact header invalid: {}", detail),
            RejectReason::PlaceholderSignature => {
                write!(f, "artifact matches a known placeholder fingerprint")
            }
        }
    }
}

/// Core error type for derivo operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation failed (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Malformed payload or unsafe path. Permanent; never retried.
    #[error("Validation error: {0}")]
    Validation(String),

    /// External converter/renderer failed, timed out, or produced empty
    /// output. Retried with backoff.
    #[error("Tool error: {0}")]
    TransientTool(String),

    /// A prerequisite derivative is not ready yet. The caller enqueues the
    /// named dependency and fails fast with a retryable error.
    #[error("Missing dependency: {job_type} not ready")]
    MissingDependency { job_type: JobType },

    /// The per-path generation lock is held elsewhere.
    #[error("Generation busy: {0}")]
    ConcurrencyBusy(String),

    /// The validator refused a generated artifact. Treated as a tool error
    /// by the worker and retried.
    #[error("Artifact rejected: {0}")]
    PlaceholderRejected(RejectReason),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// File I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether a failed job attempt should go back to the queue with backoff.
    ///
    /// `Validation` is the only permanently-failing builder error; everything
    /// else in the builder path (tool failures, rejected artifacts, missing
    /// dependencies, I/O hiccups) is worth another attempt.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Error::Validation(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}
