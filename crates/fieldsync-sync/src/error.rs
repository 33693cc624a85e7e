//! Error types for the sync module.

use std::fmt;

use thiserror::Error;

use fieldsync_core::{EntityKind, TransformError};
use fieldsync_store::{RemoteError, StoreError};

/// Errors that can occur during sync operations.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The backend failed after retries were exhausted, or fail-fast.
    #[error("remote error: {0}")]
    Remote(#[from] RemoteError),

    /// Local store operation failed.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// A record could not be converted between local and remote shape.
    #[error("transform error: {0}")]
    Transform(#[from] TransformError),

    /// Another push, pull or full sync holds the engine.
    #[error("sync already in progress")]
    AlreadySyncing,

    /// The device is offline.
    #[error("offline")]
    Offline,

    /// The sync was cancelled; unsynced records stay pending.
    #[error("sync cancelled")]
    Cancelled,

    /// One or more kinds stopped on a batch- or page-level failure. The
    /// remaining kinds still ran.
    #[error("{operation} incomplete: {}", format_failures(.failures))]
    Incomplete {
        operation: SyncOperation,
        failures: Vec<KindFailure>,
    },

    /// No queued conflict matches the given record.
    #[error("no conflict queued for {kind}/{id}")]
    ConflictNotFound { kind: EntityKind, id: String },
}

/// Result type for sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;

/// Which half of a sync produced an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOperation {
    Push,
    Pull,
}

impl fmt::Display for SyncOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncOperation::Push => f.write_str("push"),
            SyncOperation::Pull => f.write_str("pull"),
        }
    }
}

/// A kind whose remaining batches or pages were abandoned.
#[derive(Debug, Clone, PartialEq)]
pub struct KindFailure {
    pub kind: EntityKind,
    pub error: String,
}

fn format_failures(failures: &[KindFailure]) -> String {
    failures
        .iter()
        .map(|f| format!("{} ({})", f.kind, f.error))
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_incomplete_message_names_kinds() {
        let err = SyncError::Incomplete {
            operation: SyncOperation::Pull,
            failures: vec![
                KindFailure {
                    kind: EntityKind::Contact,
                    error: "request timed out".into(),
                },
                KindFailure {
                    kind: EntityKind::Budget,
                    error: "network error: reset".into(),
                },
            ],
        };
        assert_eq!(
            err.to_string(),
            "pull incomplete: contacts (request timed out), budgets (network error: reset)"
        );
        assert_eq!(SyncError::AlreadySyncing.to_string(), "sync already in progress");
    }
}
