//! The sync engine: entry points, mutual exclusion and state bookkeeping.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

use fieldsync_core::{
    Clock, ConflictRecord, ConflictResolution, EntityKind, LocalRecord, RecordId, SyncMarker,
    SystemClock,
};
use fieldsync_store::{BlobStorage, LocalStore, RemoteStore};
use fieldsync_sync::{
    PullEngine, PullReport, PushEngine, PushReport, Result, Subscription, SyncConfig,
    SyncContext, SyncError, SyncProgress, SyncState, SyncStateManager, SyncStatePatch,
    SyncStatus,
};

/// Outcome of [`SyncEngine::full_sync`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncMetrics {
    pub success: bool,
    pub duration: Duration,
    pub push: PushReport,
    pub pull: PullReport,
}

/// Clears the engine's syncing flag when dropped.
struct SyncGuard {
    flag: Arc<AtomicBool>,
}

impl Drop for SyncGuard {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

/// The offline-first sync engine.
///
/// Owns the sync state, the conflict queue and the rate limiter for one
/// local store / remote store pair. At most one push, pull or full sync
/// runs at a time; a second call is rejected with
/// [`SyncError::AlreadySyncing`] rather than queued.
pub struct SyncEngine {
    ctx: SyncContext,
    syncing: Arc<AtomicBool>,
}

impl SyncEngine {
    /// Create an engine using the system clock.
    pub fn new(
        local: Arc<dyn LocalStore>,
        remote: Arc<dyn RemoteStore>,
        blobs: Arc<dyn BlobStorage>,
        config: SyncConfig,
    ) -> Self {
        Self::with_clock(local, remote, blobs, Arc::new(SystemClock), config)
    }

    pub fn with_clock(
        local: Arc<dyn LocalStore>,
        remote: Arc<dyn RemoteStore>,
        blobs: Arc<dyn BlobStorage>,
        clock: Arc<dyn Clock>,
        config: SyncConfig,
    ) -> Self {
        Self::from_context(SyncContext::new(local, remote, blobs, clock, config))
    }

    pub fn from_context(ctx: SyncContext) -> Self {
        Self {
            ctx,
            syncing: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn context(&self) -> &SyncContext {
        &self.ctx
    }

    pub fn state(&self) -> &SyncStateManager {
        &self.ctx.state
    }

    pub fn local(&self) -> &Arc<dyn LocalStore> {
        &self.ctx.local
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.ctx.clock
    }

    /// Observe sync state. The listener is called immediately with the
    /// current state.
    pub fn subscribe(&self, listener: impl Fn(&SyncState) + Send + Sync + 'static) -> Subscription {
        self.ctx.state.subscribe(listener)
    }

    /// Whether a push, pull or full sync is running.
    pub fn is_syncing(&self) -> bool {
        self.syncing.load(Ordering::SeqCst)
    }

    /// Record a connectivity change. Going offline cancels any running
    /// sync.
    pub fn set_online(&self, is_online: bool) -> SyncState {
        if !is_online {
            self.ctx.cancel.cancel();
        }
        self.ctx.state.set_online(is_online)
    }

    /// Ask a running sync to stop at its next checkpoint.
    pub fn cancel(&self) {
        self.ctx.cancel.cancel();
    }

    /// Recount pending records and publish the count.
    pub async fn refresh_pending_count(&self) -> Result<usize> {
        self.ctx
            .state
            .refresh_pending_count(self.ctx.local.as_ref())
            .await
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Sync Entry Points
    // ─────────────────────────────────────────────────────────────────────────

    /// Push local changes.
    pub async fn sync_push(&self) -> Result<PushReport> {
        let _guard = self.begin("push")?;
        let result = PushEngine::new(self.ctx.clone()).push().await;
        self.finish(&result).await;
        result
    }

    /// Pull remote changes.
    pub async fn sync_pull(&self) -> Result<PullReport> {
        let _guard = self.begin("pull")?;
        let result = PullEngine::new(self.ctx.clone()).pull().await;
        self.finish(&result).await;
        result
    }

    /// Push, then pull.
    pub async fn full_sync(&self) -> Result<SyncMetrics> {
        let _guard = self.begin("full sync")?;
        let started = Instant::now();

        let result: Result<SyncMetrics> = async {
            let push = PushEngine::new(self.ctx.clone()).push().await?;
            let pull = PullEngine::new(self.ctx.clone()).pull().await?;
            Ok::<_, SyncError>(SyncMetrics {
                success: true,
                duration: started.elapsed(),
                push,
                pull,
            })
        }
        .await;

        self.finish(&result).await;
        if let Ok(metrics) = &result {
            tracing::info!(
                duration_ms = metrics.duration.as_millis() as u64,
                pushed = metrics.push.total_pushed(),
                pulled = metrics.pull.total_pulled(),
                "full sync complete"
            );
        }
        result
    }

    fn begin(&self, operation: &str) -> Result<SyncGuard> {
        if self
            .syncing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(SyncError::AlreadySyncing);
        }
        let guard = SyncGuard {
            flag: self.syncing.clone(),
        };

        if !self.ctx.state.is_online() {
            return Err(SyncError::Offline);
        }

        self.ctx.cancel.reset();
        tracing::debug!(operation, "sync started");
        self.ctx.state.update_state(
            SyncStatePatch::new()
                .status(SyncStatus::Syncing)
                .progress(Some(SyncProgress {
                    current: 0,
                    total: 0,
                    operation: operation.to_string(),
                })),
        );
        Ok(guard)
    }

    async fn finish<T>(&self, result: &Result<T>) {
        if let Err(e) = self.refresh_pending_count().await {
            tracing::warn!(error = %e, "could not refresh pending count");
        }

        let patch = SyncStatePatch::new().progress(None);
        let patch = match result {
            Ok(_) => patch
                .status(SyncStatus::Idle)
                .last_error(None)
                .last_sync_at(Some(self.ctx.clock.now_millis())),
            Err(e) => {
                tracing::warn!(error = %e, "sync failed");
                patch.status(SyncStatus::Error).last_error(Some(e.to_string()))
            }
        };
        self.ctx.state.update_state(patch);
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Conflicts
    // ─────────────────────────────────────────────────────────────────────────

    /// Unresolved conflicts, oldest first.
    pub fn conflicts(&self) -> Vec<ConflictRecord> {
        self.ctx.conflicts.list()
    }

    /// Observe the conflict queue. Notified once per pull that found
    /// conflicts and after each resolution.
    pub fn subscribe_conflicts(
        &self,
        listener: impl Fn(&Vec<ConflictRecord>) + Send + Sync + 'static,
    ) -> Subscription {
        self.ctx.conflicts.subscribe(listener)
    }

    /// Settle a queued conflict.
    ///
    /// `KeepLocal` leaves the local edit pending so the next push
    /// overwrites the remote row. `AcceptRemote` stores the remote version
    /// as clean.
    pub async fn resolve_conflict(
        &self,
        kind: EntityKind,
        id: &RecordId,
        resolution: ConflictResolution,
    ) -> Result<()> {
        let conflict = self
            .ctx
            .conflicts
            .take(kind, id)
            .ok_or_else(|| SyncError::ConflictNotFound {
                kind,
                id: id.to_string(),
            })?;

        match resolution {
            ConflictResolution::KeepLocal => {
                if let Some(mut current) = self.ctx.local.get(kind, id).await? {
                    if current.is_pending() {
                        current.updated_at = current.updated_at.max(self.ctx.clock.now_millis());
                        self.ctx.local.put(&current).await?;
                    }
                }
            }
            ConflictResolution::AcceptRemote => {
                let remote = LocalRecord {
                    marker: SyncMarker::Clean,
                    ..conflict.remote_version
                };
                self.ctx.local.put(&remote).await?;
            }
        }

        tracing::info!(kind = %kind, id = %id, ?resolution, "conflict resolved");
        self.refresh_pending_count().await?;
        self.ctx.conflicts.notify();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fieldsync_core::{Contact, EntityPayload, ManualClock};
    use fieldsync_store::{
        LocalStoreExt, MemoryBlobStorage, MemoryLocalStore, MemoryRemoteStore,
    };

    fn contact(name: &str) -> EntityPayload {
        EntityPayload::Contact(Contact {
            project_id: None,
            name: name.into(),
            email: None,
            phone: None,
            role: None,
        })
    }

    fn engine() -> (SyncEngine, Arc<MemoryLocalStore>, Arc<MemoryRemoteStore>) {
        let local = Arc::new(MemoryLocalStore::new());
        let remote = Arc::new(MemoryRemoteStore::new());
        let engine = SyncEngine::with_clock(
            local.clone(),
            remote.clone(),
            Arc::new(MemoryBlobStorage::new()),
            Arc::new(ManualClock::new(50_000)),
            SyncConfig::new("t1"),
        );
        (engine, local, remote)
    }

    #[tokio::test]
    async fn test_full_sync_updates_state() {
        let (engine, local, remote) = engine();
        local.save_local(RecordId::new("c1"), contact("Ana"), 1_000).await.unwrap();

        let metrics = engine.full_sync().await.unwrap();
        assert!(metrics.success);
        assert_eq!(metrics.push.total_pushed(), 1);
        assert_eq!(remote.row_count("contacts"), 1);

        let state = engine.state().current();
        assert_eq!(state.status, SyncStatus::Idle);
        assert_eq!(state.pending_push, 0);
        assert_eq!(state.last_sync_at, Some(50_000));
        assert!(state.progress.is_none());
        assert!(!engine.is_syncing());
    }

    #[tokio::test]
    async fn test_offline_rejects() {
        let (engine, _, _) = engine();
        engine.set_online(false);
        assert!(matches!(engine.sync_pull().await, Err(SyncError::Offline)));
        assert_eq!(engine.state().current().status, SyncStatus::Offline);
        assert!(!engine.is_syncing());
    }

    #[tokio::test]
    async fn test_resolve_conflict_accept_remote() {
        let (engine, local, remote) = engine();
        local.save_local(RecordId::new("c1"), contact("Local"), 1_000).await.unwrap();
        let theirs = LocalRecord::clean(RecordId::new("c1"), contact("Remote"), 2_000);
        remote.insert_row(
            "contacts",
            fieldsync_core::to_remote(&theirs, &fieldsync_core::OwnerId::new("t1")).unwrap(),
        );

        engine.sync_pull().await.unwrap();
        assert_eq!(engine.conflicts().len(), 1);

        engine
            .resolve_conflict(EntityKind::Contact, &RecordId::new("c1"), ConflictResolution::AcceptRemote)
            .await
            .unwrap();
        assert!(engine.conflicts().is_empty());

        let stored = local.get(EntityKind::Contact, &RecordId::new("c1")).await.unwrap().unwrap();
        assert_eq!(stored.payload, contact("Remote"));
        assert!(!stored.is_pending());
        assert_eq!(engine.state().current().pending_push, 0);

        let missing = engine
            .resolve_conflict(EntityKind::Contact, &RecordId::new("c1"), ConflictResolution::KeepLocal)
            .await;
        assert!(matches!(missing, Err(SyncError::ConflictNotFound { .. })));
    }
}
