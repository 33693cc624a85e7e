//! Local store trait: the abstract interface for on-device persistence.
//!
//! Records are keyed by `(EntityKind, RecordId)`. Implementations must
//! tolerate concurrent writes to distinct keys; no cross-key transactions
//! are required.

use async_trait::async_trait;
use bytes::Bytes;

use fieldsync_core::{EntityKind, EntityPayload, LocalRecord, RecordId, SyncMarker};

use crate::error::{Result, StoreError};

/// The local store: async interface for on-device records.
#[async_trait]
pub trait LocalStore: Send + Sync {
    // ─────────────────────────────────────────────────────────────────────────
    // Record Operations
    // ─────────────────────────────────────────────────────────────────────────

    /// Get a record by kind and id.
    async fn get(&self, kind: EntityKind, id: &RecordId) -> Result<Option<LocalRecord>>;

    /// Insert or replace a record.
    async fn put(&self, record: &LocalRecord) -> Result<()>;

    /// Remove a record. Returns whether it existed.
    async fn delete(&self, kind: EntityKind, id: &RecordId) -> Result<bool>;

    /// All records of a kind carrying the given marker.
    async fn list_by_marker(&self, kind: EntityKind, marker: SyncMarker)
        -> Result<Vec<LocalRecord>>;

    /// Number of records of a kind carrying the given marker.
    async fn count_by_marker(&self, kind: EntityKind, marker: SyncMarker) -> Result<usize>;

    /// Mark a dirty record clean after a confirmed remote write.
    ///
    /// Only applies if the record is still dirty and its `updated_at` equals
    /// `expected_updated_at`; a record edited while the push was in flight
    /// stays dirty. Returns whether the marker changed.
    async fn mark_synced(
        &self,
        kind: EntityKind,
        id: &RecordId,
        expected_updated_at: i64,
    ) -> Result<bool>;

    // ─────────────────────────────────────────────────────────────────────────
    // Watermarks
    // ─────────────────────────────────────────────────────────────────────────

    /// Last successful pull boundary for a kind, epoch milliseconds.
    async fn get_watermark(&self, kind: EntityKind) -> Result<Option<i64>>;

    /// Persist new pull boundaries, all together.
    async fn set_watermarks(&self, watermarks: &[(EntityKind, i64)]) -> Result<()>;

    // ─────────────────────────────────────────────────────────────────────────
    // Staged Blobs (file bytes not yet uploaded)
    // ─────────────────────────────────────────────────────────────────────────

    async fn stage_blob(&self, id: &RecordId, bytes: Bytes) -> Result<()>;

    async fn staged_blob(&self, id: &RecordId) -> Result<Option<Bytes>>;

    async fn discard_staged_blob(&self, id: &RecordId) -> Result<()>;
}

/// Extension trait for common local store patterns.
///
/// These are the mutations application code performs; the sync engine
/// itself only reads and clears markers.
#[async_trait]
pub trait LocalStoreExt: LocalStore {
    /// Records with local changes: dirty first, then tombstoned.
    async fn list_pending(&self, kind: EntityKind) -> Result<Vec<LocalRecord>> {
        let mut records = self.list_by_marker(kind, SyncMarker::Dirty).await?;
        records.extend(self.list_by_marker(kind, SyncMarker::Tombstoned).await?);
        Ok(records)
    }

    /// Number of records of a kind awaiting push.
    async fn count_pending(&self, kind: EntityKind) -> Result<usize> {
        Ok(self.count_by_marker(kind, SyncMarker::Dirty).await?
            + self.count_by_marker(kind, SyncMarker::Tombstoned).await?)
    }

    /// Number of records awaiting push across every kind.
    async fn count_all_pending(&self) -> Result<usize> {
        let mut total = 0;
        for kind in EntityKind::ALL {
            total += self.count_pending(kind).await?;
        }
        Ok(total)
    }

    /// Create or edit a record locally, marking it dirty.
    async fn save_local(&self, id: RecordId, payload: EntityPayload, now: i64) -> Result<()> {
        self.put(&LocalRecord::dirty(id, payload, now)).await
    }

    /// Delete a record locally. It stays tombstoned until the remote
    /// delete is confirmed.
    async fn tombstone(&self, kind: EntityKind, id: &RecordId, now: i64) -> Result<()> {
        let mut record = self
            .get(kind, id)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("{}/{}", kind, id)))?;
        record.marker = SyncMarker::Tombstoned;
        record.updated_at = now;
        self.put(&record).await
    }

    /// Attach file bytes to a file record for later upload.
    async fn stage_file(&self, id: RecordId, mut payload: EntityPayload, bytes: Bytes, now: i64)
        -> Result<()>
    {
        if let EntityPayload::File(meta) = &mut payload {
            meta.pending_upload = true;
            meta.size_bytes = bytes.len() as u64;
        } else {
            return Err(StoreError::InvalidData(format!(
                "cannot stage bytes for a {} record",
                payload.kind()
            )));
        }
        self.stage_blob(&id, bytes).await?;
        self.save_local(id, payload, now).await
    }
}

impl<S: LocalStore + ?Sized> LocalStoreExt for S {}
