//! Test fixtures and helpers.
//!
//! Common setup code for integration tests.

use std::sync::Arc;

use fieldsync::SyncEngine;
use fieldsync_core::{
    to_remote, Budget, Clock, Contact, EntityKind, EntityPayload, FileMeta, HistoryEntry,
    Installation, LocalRecord, ManualClock, OwnerId, Project, RecordId,
};
use fieldsync_store::{
    LocalStoreExt, MemoryBlobStorage, MemoryLocalStore, MemoryRemoteStore, RemoteStore,
};
use fieldsync_sync::{SyncConfig, SyncContext};

/// Tenant used by [`TestFixture::new`].
pub const TEST_OWNER: &str = "tenant-1";

/// Clock start for fixtures: 2024-01-01T00:00:00Z.
pub const TEST_EPOCH: i64 = 1_704_067_200_000;

/// In-memory stores, a manual clock and a config, ready to build engines.
pub struct TestFixture {
    pub config: SyncConfig,
    pub local: Arc<MemoryLocalStore>,
    pub remote: Arc<MemoryRemoteStore>,
    pub blobs: Arc<MemoryBlobStorage>,
    pub clock: Arc<ManualClock>,
}

impl TestFixture {
    pub fn new() -> Self {
        Self::with_config(SyncConfig::new(TEST_OWNER))
    }

    /// The remote shares the fixture clock as its server time.
    pub fn with_config(config: SyncConfig) -> Self {
        let clock = Arc::new(ManualClock::new(TEST_EPOCH));
        Self {
            config,
            local: Arc::new(MemoryLocalStore::new()),
            remote: Arc::new(MemoryRemoteStore::with_clock(clock.clone())),
            blobs: Arc::new(MemoryBlobStorage::new()),
            clock,
        }
    }

    pub fn owner(&self) -> &OwnerId {
        &self.config.owner_id
    }

    pub fn now(&self) -> i64 {
        self.clock.now_millis()
    }

    /// A sync context over the fixture's stores.
    pub fn context(&self) -> SyncContext {
        self.context_with_remote(self.remote.clone())
    }

    /// A sync context whose remote is `remote`, e.g. a fault-injecting
    /// wrapper around [`TestFixture::remote`].
    pub fn context_with_remote(&self, remote: Arc<dyn RemoteStore>) -> SyncContext {
        SyncContext::new(
            self.local.clone(),
            remote,
            self.blobs.clone(),
            self.clock.clone(),
            self.config.clone(),
        )
    }

    pub fn engine(&self) -> SyncEngine {
        SyncEngine::from_context(self.context())
    }

    pub fn engine_with_remote(&self, remote: Arc<dyn RemoteStore>) -> SyncEngine {
        SyncEngine::from_context(self.context_with_remote(remote))
    }

    /// Save `count` dirty records of `kind` locally. Ids are
    /// `{table}-{index:04}`, so they sort in creation order.
    pub async fn seed_dirty(
        &self,
        kind: EntityKind,
        count: usize,
    ) -> fieldsync_store::Result<Vec<RecordId>> {
        let mut ids = Vec::with_capacity(count);
        for index in 0..count {
            let id = RecordId::new(format!("{}-{:04}", kind.table(), index));
            self.local
                .save_local(id.clone(), sample_payload(kind, index), self.now())
                .await?;
            ids.push(id);
        }
        Ok(ids)
    }

    /// Put a row on the remote as if another device had pushed it.
    pub fn seed_remote(&self, record: &LocalRecord) -> fieldsync_core::Result<()> {
        let row = to_remote(record, self.owner())?;
        self.remote.insert_row(record.kind().table(), row);
        Ok(())
    }

    /// Seed `count` remote rows of `kind`, one millisecond apart starting at
    /// `first_updated_at`.
    pub fn seed_remote_many(
        &self,
        kind: EntityKind,
        count: usize,
        first_updated_at: i64,
    ) -> fieldsync_core::Result<Vec<RecordId>> {
        let mut ids = Vec::with_capacity(count);
        for index in 0..count {
            let id = RecordId::new(format!("remote-{}-{:04}", kind.table(), index));
            let record = LocalRecord::clean(
                id.clone(),
                sample_payload(kind, index),
                first_updated_at + index as i64,
            );
            self.seed_remote(&record)?;
            ids.push(id);
        }
        Ok(ids)
    }
}

impl Default for TestFixture {
    fn default() -> Self {
        Self::new()
    }
}

/// Parent project id used by sample child payloads.
pub fn sample_project_id() -> RecordId {
    RecordId::new("projects-0000")
}

/// A plausible payload of `kind`, varied by `n`.
pub fn sample_payload(kind: EntityKind, n: usize) -> EntityPayload {
    match kind {
        EntityKind::Project => project(&format!("Project {n}")),
        EntityKind::Installation => EntityPayload::Installation(Installation {
            project_id: sample_project_id(),
            system_type: "heat-pump".into(),
            location: Some(format!("Unit {n}")),
            status: "planned".into(),
            installed_on: None,
        }),
        EntityKind::Contact => contact(&format!("Contact {n}")),
        EntityKind::Budget => EntityPayload::Budget(Budget {
            project_id: sample_project_id(),
            title: format!("Estimate {n}"),
            amount_cents: 10_000 + n as i64,
            currency: "EUR".into(),
            status: "draft".into(),
        }),
        EntityKind::File => EntityPayload::File(FileMeta {
            project_id: sample_project_id(),
            file_name: format!("photo-{n}.jpg"),
            mime_type: "image/jpeg".into(),
            size_bytes: 1_024,
            storage_path: Some(format!("{TEST_OWNER}/projects-0000/photo-{n}.jpg")),
            pending_upload: false,
        }),
        EntityKind::History => EntityPayload::History(HistoryEntry {
            record_type: EntityKind::Project,
            record_id: sample_project_id(),
            action: "update".into(),
            summary: format!("Edit {n}"),
            occurred_at: TEST_EPOCH + n as i64,
        }),
    }
}

pub fn project(name: &str) -> EntityPayload {
    EntityPayload::Project(Project {
        name: name.into(),
        client_name: "ACME Facilities".into(),
        address: None,
        status: "active".into(),
        notes: None,
    })
}

pub fn contact(name: &str) -> EntityPayload {
    EntityPayload::Contact(Contact {
        project_id: None,
        name: name.into(),
        email: None,
        phone: None,
        role: None,
    })
}

/// A file payload with bytes still to upload.
pub fn staged_file(file_name: &str) -> EntityPayload {
    EntityPayload::File(FileMeta {
        project_id: sample_project_id(),
        file_name: file_name.into(),
        mime_type: "application/octet-stream".into(),
        size_bytes: 0,
        storage_path: None,
        pending_upload: true,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use fieldsync_store::LocalStore;

    #[tokio::test]
    async fn test_seed_dirty_and_remote() {
        let fixture = TestFixture::new();
        let ids = fixture.seed_dirty(EntityKind::Budget, 3).await.unwrap();
        assert_eq!(ids[2], RecordId::new("budgets-0002"));
        assert_eq!(fixture.local.count_pending(EntityKind::Budget).await.unwrap(), 3);

        fixture
            .seed_remote_many(EntityKind::Contact, 2, TEST_EPOCH)
            .unwrap();
        assert_eq!(fixture.remote.row_count("contacts"), 2);
        assert!(fixture
            .local
            .get(EntityKind::Contact, &RecordId::new("remote-contacts-0000"))
            .await
            .unwrap()
            .is_none());
    }
}
