//! Local records and their entity payloads.

use serde::{Deserialize, Serialize};

use crate::types::{EntityKind, RecordId};

/// Synchronization marker of a local record.
///
/// A record is exactly one of these; there is no "dirty and deleted" limbo.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SyncMarker {
    /// In sync with the last confirmed remote state.
    Clean,
    /// Changed locally, needs an upsert.
    Dirty,
    /// Deleted locally, needs a remote delete before it can be purged.
    Tombstoned,
}

impl SyncMarker {
    /// Whether the record still has local changes to push.
    pub fn is_pending(self) -> bool {
        !matches!(self, SyncMarker::Clean)
    }

    /// Integer code used by persistent stores.
    pub fn to_code(self) -> i64 {
        match self {
            SyncMarker::Clean => 0,
            SyncMarker::Dirty => 1,
            SyncMarker::Tombstoned => 2,
        }
    }

    /// Parse a persisted integer code.
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(SyncMarker::Clean),
            1 => Some(SyncMarker::Dirty),
            2 => Some(SyncMarker::Tombstoned),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub name: String,
    pub client_name: String,
    pub address: Option<String>,
    pub status: String,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Installation {
    pub project_id: RecordId,
    pub system_type: String,
    pub location: Option<String>,
    pub status: String,
    /// Calendar date, `YYYY-MM-DD`.
    pub installed_on: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contact {
    pub project_id: Option<RecordId>,
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub role: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Budget {
    pub project_id: RecordId,
    pub title: String,
    pub amount_cents: i64,
    pub currency: String,
    pub status: String,
}

/// Append-only audit entry describing a change to another record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub record_type: EntityKind,
    pub record_id: RecordId,
    pub action: String,
    pub summary: String,
    /// Milliseconds since the Unix epoch.
    pub occurred_at: i64,
}

/// Metadata of a binary attachment. The bytes live in blob storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileMeta {
    pub project_id: RecordId,
    pub file_name: String,
    pub mime_type: String,
    pub size_bytes: u64,
    pub storage_path: Option<String>,
    /// Local only: bytes are staged on device and not yet uploaded.
    pub pending_upload: bool,
}

/// Entity-specific payload, one variant per [`EntityKind`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EntityPayload {
    Project(Project),
    Installation(Installation),
    Contact(Contact),
    Budget(Budget),
    File(FileMeta),
    History(HistoryEntry),
}

impl EntityPayload {
    /// The kind this payload belongs to.
    pub fn kind(&self) -> EntityKind {
        match self {
            EntityPayload::Project(_) => EntityKind::Project,
            EntityPayload::Installation(_) => EntityKind::Installation,
            EntityPayload::Contact(_) => EntityKind::Contact,
            EntityPayload::Budget(_) => EntityKind::Budget,
            EntityPayload::File(_) => EntityKind::File,
            EntityPayload::History(_) => EntityKind::History,
        }
    }

    /// Human-readable label used in conflict listings.
    pub fn display_name(&self) -> String {
        match self {
            EntityPayload::Project(p) => p.name.clone(),
            EntityPayload::Installation(i) => i.system_type.clone(),
            EntityPayload::Contact(c) => c.name.clone(),
            EntityPayload::Budget(b) => b.title.clone(),
            EntityPayload::File(f) => f.file_name.clone(),
            EntityPayload::History(h) => h.summary.clone(),
        }
    }
}

/// A record as held by the local store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalRecord {
    pub id: RecordId,
    pub payload: EntityPayload,
    pub marker: SyncMarker,
    /// Last modification, milliseconds since the Unix epoch.
    pub updated_at: i64,
}

impl LocalRecord {
    /// Create a record that has local changes to push.
    pub fn dirty(id: RecordId, payload: EntityPayload, updated_at: i64) -> Self {
        Self {
            id,
            payload,
            marker: SyncMarker::Dirty,
            updated_at,
        }
    }

    /// Create a record mirroring confirmed remote state.
    pub fn clean(id: RecordId, payload: EntityPayload, updated_at: i64) -> Self {
        Self {
            id,
            payload,
            marker: SyncMarker::Clean,
            updated_at,
        }
    }

    pub fn kind(&self) -> EntityKind {
        self.payload.kind()
    }

    pub fn is_dirty(&self) -> bool {
        self.marker == SyncMarker::Dirty
    }

    pub fn is_tombstoned(&self) -> bool {
        self.marker == SyncMarker::Tombstoned
    }

    pub fn is_pending(&self) -> bool {
        self.marker.is_pending()
    }

    /// File metadata, if this is a file record.
    pub fn as_file(&self) -> Option<&FileMeta> {
        match &self.payload {
            EntityPayload::File(f) => Some(f),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_marker_codes() {
        for marker in [SyncMarker::Clean, SyncMarker::Dirty, SyncMarker::Tombstoned] {
            assert_eq!(SyncMarker::from_code(marker.to_code()), Some(marker));
        }
        assert_eq!(SyncMarker::from_code(7), None);
        assert!(!SyncMarker::Clean.is_pending());
        assert!(SyncMarker::Tombstoned.is_pending());
    }

    #[test]
    fn test_payload_kind() {
        let payload = EntityPayload::Budget(Budget {
            project_id: RecordId::new("p1"),
            title: "Roof".into(),
            amount_cents: 120_000,
            currency: "EUR".into(),
            status: "draft".into(),
        });
        let record = LocalRecord::dirty(RecordId::new("b1"), payload, 10);
        assert_eq!(record.kind(), EntityKind::Budget);
        assert!(record.is_dirty());
        assert!(record.as_file().is_none());
        assert_eq!(record.payload.display_name(), "Roof");
    }
}
