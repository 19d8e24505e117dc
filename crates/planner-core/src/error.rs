//! Error types for the planner sync engine.

use thiserror::Error;

/// Result type alias using the planner's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for planner operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Local key-value storage failed (quota exceeded, corrupted database).
    #[error("Local storage error: {0}")]
    LocalStorage(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Remote store unreachable or transiently failing. Triggers queuing.
    #[error("Remote unavailable: {0}")]
    RemoteUnavailable(String),

    /// Authenticated but not allowed (e.g. not a team member)
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Operation requires a signed-in user
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Resource already in the requested state
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// File I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether a failed remote operation may succeed if retried later.
    ///
    /// Only recoverable failures are absorbed into the offline queue; every
    /// other error propagates to the caller.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Error::RemoteUnavailable(_))
    }

    /// Whether the error originates from the local storage layer.
    pub fn is_local(&self) -> bool {
        matches!(
            self,
            Error::LocalStorage(_) | Error::Serialization(_) | Error::Io(_)
        )
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::RemoteUnavailable(e.to_string())
    }
}
