//! Per-kind counters returned by push and pull.

use std::collections::BTreeMap;

use serde::Serialize;

use fieldsync_core::EntityKind;

/// A single record that could not be synced this pass. The record keeps
/// its pending marker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecordError {
    pub record_id: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct KindPushReport {
    pub pushed: usize,
    pub deleted: usize,
    /// Pending records left alone because a conflict on them awaits
    /// resolution.
    pub held: usize,
    pub errors: Vec<RecordError>,
}

/// Blob uploads performed ahead of the file metadata push.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct UploadReport {
    pub uploaded: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PushReport {
    pub kinds: BTreeMap<EntityKind, KindPushReport>,
    pub uploads: UploadReport,
}

impl PushReport {
    pub fn kind(&self, kind: EntityKind) -> Option<&KindPushReport> {
        self.kinds.get(&kind)
    }

    pub fn total_pushed(&self) -> usize {
        self.kinds.values().map(|k| k.pushed).sum()
    }

    pub fn total_deleted(&self) -> usize {
        self.kinds.values().map(|k| k.deleted).sum()
    }

    pub fn total_errors(&self) -> usize {
        self.kinds.values().map(|k| k.errors.len()).sum()
    }

    pub fn total_held(&self) -> usize {
        self.kinds.values().map(|k| k.held).sum()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct KindPullReport {
    /// Remote versions written locally.
    pub pulled: usize,
    /// Remote versions ignored in favour of a pending local change.
    pub skipped: usize,
    /// Remote versions queued as conflicts.
    pub conflicts: usize,
    pub errors: Vec<RecordError>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PullReport {
    pub kinds: BTreeMap<EntityKind, KindPullReport>,
}

impl PullReport {
    pub fn kind(&self, kind: EntityKind) -> Option<&KindPullReport> {
        self.kinds.get(&kind)
    }

    pub fn total_pulled(&self) -> usize {
        self.kinds.values().map(|k| k.pulled).sum()
    }

    pub fn total_conflicts(&self) -> usize {
        self.kinds.values().map(|k| k.conflicts).sum()
    }

    pub fn total_errors(&self) -> usize {
        self.kinds.values().map(|k| k.errors.len()).sum()
    }
}
