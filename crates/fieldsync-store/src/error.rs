//! Error types for the store module.

use thiserror::Error;

/// Errors raised by the local store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Database error from SQLite.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Payload serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Record not found.
    #[error("record not found: {0}")]
    NotFound(String),

    /// Invalid data in storage.
    #[error("invalid data: {0}")]
    InvalidData(String),

    /// Migration error.
    #[error("migration error: {0}")]
    Migration(String),

    /// A blocking storage task could not complete.
    #[error("background task failed: {0}")]
    Background(String),
}

/// Result type for local store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors returned by the remote store and blob storage.
///
/// The variants are the retry classification: callers never inspect
/// messages to decide whether to try again.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RemoteError {
    /// Connection refused, reset, DNS failure and the like.
    #[error("network error: {0}")]
    Network(String),

    /// The request did not complete within the configured timeout.
    #[error("request timed out")]
    Timeout,

    /// The backend answered with an HTTP status.
    #[error("remote returned status {status}: {message}")]
    Status { status: u16, message: String },

    /// Credentials missing, expired or rejected.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// The backend rejected the row itself (constraint, schema).
    #[error("validation failed: {0}")]
    Validation(String),
}

impl RemoteError {
    /// Whether repeating the same request may succeed.
    ///
    /// Connectivity problems, timeouts, 5xx and 429 are transient;
    /// authentication, validation and every other 4xx are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            RemoteError::Network(_) | RemoteError::Timeout => true,
            RemoteError::Status { status, .. } => *status == 429 || *status >= 500,
            RemoteError::Unauthorized(_) | RemoteError::Validation(_) => false,
        }
    }

    /// Build an error from an HTTP status, mapping 401/403 and 400/409/422
    /// to their typed variants.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            401 | 403 => RemoteError::Unauthorized(message),
            400 | 409 | 422 => RemoteError::Validation(message),
            _ => RemoteError::Status { status, message },
        }
    }
}

/// Result type for remote and blob operations.
pub type RemoteResult<T> = std::result::Result<T, RemoteError>;
