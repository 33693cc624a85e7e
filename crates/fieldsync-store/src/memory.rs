//! In-memory implementation of the LocalStore trait.
//!
//! This is primarily for testing. It has the same semantics as SQLite
//! but keeps everything in memory with no persistence.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;

use fieldsync_core::{EntityKind, LocalRecord, RecordId, SyncMarker};

use crate::error::Result;
use crate::traits::LocalStore;

/// In-memory local store.
///
/// All data is lost when the store is dropped.
pub struct MemoryLocalStore {
    inner: RwLock<MemoryStoreInner>,
}

#[derive(Default)]
struct MemoryStoreInner {
    /// Records keyed by kind, then id.
    records: HashMap<EntityKind, BTreeMap<RecordId, LocalRecord>>,

    /// Pull boundaries.
    watermarks: HashMap<EntityKind, i64>,

    /// File bytes awaiting upload.
    staged: HashMap<RecordId, Bytes>,
}

impl MemoryLocalStore {
    /// Create a new empty in-memory store.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(MemoryStoreInner::default()),
        }
    }

    /// Total number of records held, all markers included.
    pub fn len(&self) -> usize {
        self.inner.read().records.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryLocalStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LocalStore for MemoryLocalStore {
    async fn get(&self, kind: EntityKind, id: &RecordId) -> Result<Option<LocalRecord>> {
        let inner = self.inner.read();
        Ok(inner
            .records
            .get(&kind)
            .and_then(|records| records.get(id).cloned()))
    }

    async fn put(&self, record: &LocalRecord) -> Result<()> {
        let mut inner = self.inner.write();
        inner
            .records
            .entry(record.kind())
            .or_default()
            .insert(record.id.clone(), record.clone());
        Ok(())
    }

    async fn delete(&self, kind: EntityKind, id: &RecordId) -> Result<bool> {
        let mut inner = self.inner.write();
        Ok(inner
            .records
            .get_mut(&kind)
            .and_then(|records| records.remove(id))
            .is_some())
    }

    async fn list_by_marker(
        &self,
        kind: EntityKind,
        marker: SyncMarker,
    ) -> Result<Vec<LocalRecord>> {
        let inner = self.inner.read();
        Ok(inner
            .records
            .get(&kind)
            .map(|records| {
                records
                    .values()
                    .filter(|r| r.marker == marker)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn count_by_marker(&self, kind: EntityKind, marker: SyncMarker) -> Result<usize> {
        let inner = self.inner.read();
        Ok(inner
            .records
            .get(&kind)
            .map_or(0, |records| {
                records.values().filter(|r| r.marker == marker).count()
            }))
    }

    async fn mark_synced(
        &self,
        kind: EntityKind,
        id: &RecordId,
        expected_updated_at: i64,
    ) -> Result<bool> {
        let mut inner = self.inner.write();
        let record = inner
            .records
            .get_mut(&kind)
            .and_then(|records| records.get_mut(id));

        match record {
            Some(record)
                if record.marker == SyncMarker::Dirty
                    && record.updated_at == expected_updated_at =>
            {
                record.marker = SyncMarker::Clean;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn get_watermark(&self, kind: EntityKind) -> Result<Option<i64>> {
        Ok(self.inner.read().watermarks.get(&kind).copied())
    }

    async fn set_watermarks(&self, watermarks: &[(EntityKind, i64)]) -> Result<()> {
        let mut inner = self.inner.write();
        inner.watermarks.extend(watermarks.iter().copied());
        Ok(())
    }

    async fn stage_blob(&self, id: &RecordId, bytes: Bytes) -> Result<()> {
        self.inner.write().staged.insert(id.clone(), bytes);
        Ok(())
    }

    async fn staged_blob(&self, id: &RecordId) -> Result<Option<Bytes>> {
        Ok(self.inner.read().staged.get(id).cloned())
    }

    async fn discard_staged_blob(&self, id: &RecordId) -> Result<()> {
        self.inner.write().staged.remove(id);
        Ok(())
    }
}
