//! Push engine: sends local changes to the remote store.
//!
//! Kinds are pushed in dependency order. Upserts for every kind go first,
//! parents before children; deletions follow, children before parents.
//! Each kind's records are split into batches that run one after the
//! other, with the records inside a batch dispatched concurrently.
//!
//! A record that fails on its own (bad data, rejected row) is reported and
//! stays dirty. A retryable failure that outlasts its retries stops the
//! remaining batches of that kind, deletions included; other kinds still
//! run, and the push reports [`SyncError::Incomplete`] at the end.

use std::collections::BTreeSet;

use futures::future::join_all;

use fieldsync_core::{to_remote, EntityKind, LocalRecord, SyncMarker};
use fieldsync_store::{LocalStoreExt, RemoteError};

use crate::context::SyncContext;
use crate::error::{KindFailure, Result, SyncError, SyncOperation};
use crate::files;
use crate::report::{KindPushReport, PushReport, RecordError};
use crate::retry::retry_remote;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Upsert,
    Delete,
}

impl Phase {
    fn as_str(self) -> &'static str {
        match self {
            Phase::Upsert => "upsert",
            Phase::Delete => "delete",
        }
    }
}

/// Why a single record did not sync.
enum RecordFailure {
    /// Only this record is affected.
    Record(String),
    /// Retries ran out on a transient error; the batch is abandoned.
    Exhausted(RemoteError),
    /// Cancelled before dispatch.
    Cancelled,
}

impl From<RemoteError> for RecordFailure {
    fn from(err: RemoteError) -> Self {
        if err.is_retryable() {
            RecordFailure::Exhausted(err)
        } else {
            RecordFailure::Record(err.to_string())
        }
    }
}

struct Progress {
    done: usize,
    total: usize,
}

/// Pushes dirty and tombstoned records.
pub struct PushEngine {
    ctx: SyncContext,
}

impl PushEngine {
    pub fn new(ctx: SyncContext) -> Self {
        Self { ctx }
    }

    /// Rate limiter operation name for a kind.
    pub fn operation_name(kind: EntityKind) -> String {
        format!("push:{}", kind.table())
    }

    /// Run one push pass.
    pub async fn push(&self) -> Result<PushReport> {
        let mut report = PushReport::default();
        let mut failures = Vec::new();
        let mut aborted = BTreeSet::new();

        self.ctx.cancel.check()?;
        report.uploads = files::upload_pending(&self.ctx).await?;

        let mut progress = Progress {
            done: 0,
            total: self.ctx.local.count_all_pending().await?,
        };

        for kind in EntityKind::ALL {
            let records: Vec<LocalRecord> = self
                .ctx
                .local
                .list_by_marker(kind, SyncMarker::Dirty)
                .await?
                .into_iter()
                .filter(|r| r.as_file().map_or(true, |f| !f.pending_upload))
                .collect();

            let entry = report.kinds.entry(kind).or_default();
            let records = self.hold_conflicted(kind, records, entry, &mut progress);
            if records.is_empty() {
                continue;
            }

            if let Some(err) = self
                .push_phase(kind, Phase::Upsert, records, entry, &mut progress)
                .await?
            {
                aborted.insert(kind);
                failures.push(KindFailure {
                    kind,
                    error: err.to_string(),
                });
            }
        }

        for kind in EntityKind::deletion_order() {
            if aborted.contains(&kind) {
                continue;
            }
            let records = self
                .ctx
                .local
                .list_by_marker(kind, SyncMarker::Tombstoned)
                .await?;
            let entry = report.kinds.entry(kind).or_default();
            let records = self.hold_conflicted(kind, records, entry, &mut progress);
            if records.is_empty() {
                continue;
            }

            if let Some(err) = self
                .push_phase(kind, Phase::Delete, records, entry, &mut progress)
                .await?
            {
                failures.push(KindFailure {
                    kind,
                    error: err.to_string(),
                });
            }
        }

        tracing::info!(
            pushed = report.total_pushed(),
            deleted = report.total_deleted(),
            errors = report.total_errors(),
            uploads = report.uploads.uploaded,
            "push finished"
        );

        if failures.is_empty() {
            Ok(report)
        } else {
            Err(SyncError::Incomplete {
                operation: SyncOperation::Push,
                failures,
            })
        }
    }

    /// Drop records with a queued conflict. They stay pending until the
    /// conflict is resolved.
    fn hold_conflicted(
        &self,
        kind: EntityKind,
        records: Vec<LocalRecord>,
        entry: &mut KindPushReport,
        progress: &mut Progress,
    ) -> Vec<LocalRecord> {
        let (held, ready): (Vec<_>, Vec<_>) = records
            .into_iter()
            .partition(|r| self.ctx.conflicts.contains(kind, &r.id));
        if !held.is_empty() {
            tracing::debug!(kind = %kind, held = held.len(), "holding records with unresolved conflicts");
            entry.held += held.len();
            progress.done += held.len();
        }
        ready
    }

    /// Push one kind's records for one phase. Returns the error that
    /// abandoned the remaining batches, if any.
    async fn push_phase(
        &self,
        kind: EntityKind,
        phase: Phase,
        records: Vec<LocalRecord>,
        entry: &mut KindPushReport,
        progress: &mut Progress,
    ) -> Result<Option<RemoteError>> {
        let operation = Self::operation_name(kind);
        let batch_size = self.ctx.config.push_batch_size.max(1);

        for (index, batch) in records.chunks(batch_size).enumerate() {
            self.ctx.cancel.check()?;
            self.ctx.limiter.wait_for_limit(&operation).await;

            tracing::debug!(
                kind = %kind,
                phase = phase.as_str(),
                batch = index,
                size = batch.len(),
                "pushing batch"
            );

            let outcomes = join_all(batch.iter().map(|r| self.push_record(kind, phase, r))).await;

            let mut exhausted = None;
            for (record, outcome) in batch.iter().zip(outcomes) {
                match outcome {
                    Ok(()) => match phase {
                        Phase::Upsert => entry.pushed += 1,
                        Phase::Delete => entry.deleted += 1,
                    },
                    Err(RecordFailure::Record(message)) => {
                        tracing::debug!(kind = %kind, id = %record.id, error = %message, "record push failed");
                        entry.errors.push(RecordError {
                            record_id: record.id.to_string(),
                            message,
                        });
                    }
                    Err(RecordFailure::Exhausted(err)) => {
                        entry.errors.push(RecordError {
                            record_id: record.id.to_string(),
                            message: err.to_string(),
                        });
                        exhausted.get_or_insert(err);
                    }
                    Err(RecordFailure::Cancelled) => {}
                }
            }

            progress.done += batch.len();
            self.ctx.report_progress(
                &format!("push:{}", kind.table()),
                progress.done.min(progress.total),
                progress.total,
            );

            self.ctx.cancel.check()?;
            if let Some(err) = exhausted {
                let remaining = records.len().saturating_sub((index + 1) * batch_size);
                tracing::warn!(
                    kind = %kind,
                    phase = phase.as_str(),
                    remaining,
                    error = %err,
                    "batch failed after retries, skipping rest of kind"
                );
                return Ok(Some(err));
            }
        }

        Ok(None)
    }

    async fn push_record(
        &self,
        kind: EntityKind,
        phase: Phase,
        record: &LocalRecord,
    ) -> std::result::Result<(), RecordFailure> {
        if self.ctx.cancel.is_cancelled() {
            return Err(RecordFailure::Cancelled);
        }
        match phase {
            Phase::Upsert => self.upsert_record(kind, record).await,
            Phase::Delete => self.delete_record(kind, record).await,
        }
    }

    async fn upsert_record(
        &self,
        kind: EntityKind,
        record: &LocalRecord,
    ) -> std::result::Result<(), RecordFailure> {
        let config = &self.ctx.config;
        let row = to_remote(record, &config.owner_id)
            .map_err(|e| RecordFailure::Record(e.to_string()))?;

        retry_remote(&config.network_retry, config.request_timeout, "upsert", || {
            self.ctx.remote.upsert(kind.table(), vec![row.clone()])
        })
        .await?;

        // A record edited while in flight keeps its dirty marker.
        self.ctx
            .local
            .mark_synced(kind, &record.id, record.updated_at)
            .await
            .map_err(|e| RecordFailure::Record(e.to_string()))?;
        Ok(())
    }

    async fn delete_record(
        &self,
        kind: EntityKind,
        record: &LocalRecord,
    ) -> std::result::Result<(), RecordFailure> {
        let config = &self.ctx.config;
        retry_remote(&config.network_retry, config.request_timeout, "delete", || {
            self.ctx.remote.delete(kind.table(), &config.owner_id, &record.id)
        })
        .await?;

        self.ctx
            .local
            .delete(kind, &record.id)
            .await
            .map_err(|e| RecordFailure::Record(e.to_string()))?;

        if let Some(file) = record.as_file() {
            if let Some(path) = &file.storage_path {
                if let Err(e) = self.ctx.blobs.delete(path).await {
                    tracing::warn!(id = %record.id, path = %path, error = %e, "orphaned blob left in storage");
                }
            }
            if let Err(e) = self.ctx.local.discard_staged_blob(&record.id).await {
                tracing::warn!(id = %record.id, error = %e, "could not discard staged bytes");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use fieldsync_core::{EntityPayload, ManualClock, Project, RecordId};
    use fieldsync_store::{LocalStore, MemoryBlobStorage, MemoryLocalStore, MemoryRemoteStore};

    use crate::config::SyncConfig;

    fn project(name: &str) -> EntityPayload {
        EntityPayload::Project(Project {
            name: name.into(),
            client_name: "Acme".into(),
            address: None,
            status: "active".into(),
            notes: None,
        })
    }

    fn setup(config: SyncConfig) -> (SyncContext, Arc<MemoryLocalStore>, Arc<MemoryRemoteStore>) {
        let local = Arc::new(MemoryLocalStore::new());
        let remote = Arc::new(MemoryRemoteStore::new());
        let ctx = SyncContext::new(
            local.clone(),
            remote.clone(),
            Arc::new(MemoryBlobStorage::new()),
            Arc::new(ManualClock::new(1_700_000_000_000)),
            config,
        );
        (ctx, local, remote)
    }

    #[tokio::test]
    async fn test_push_clears_dirty_and_purges_tombstones() {
        let (ctx, local, remote) = setup(SyncConfig::new("t1"));
        local.save_local(RecordId::new("p1"), project("A"), 1_000).await.unwrap();
        local.save_local(RecordId::new("p2"), project("B"), 1_000).await.unwrap();
        local
            .put(&LocalRecord::clean(RecordId::new("p3"), project("C"), 1_000))
            .await
            .unwrap();
        local.tombstone(EntityKind::Project, &RecordId::new("p3"), 2_000).await.unwrap();

        let report = PushEngine::new(ctx).push().await.unwrap();
        let projects = report.kind(EntityKind::Project).unwrap();
        assert_eq!(projects.pushed, 2);
        assert_eq!(projects.deleted, 1);
        assert!(projects.errors.is_empty());

        assert_eq!(remote.row_count("projects"), 2);
        assert_eq!(local.count_all_pending().await.unwrap(), 0);
        assert!(local.get(EntityKind::Project, &RecordId::new("p3")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_push_batches_by_configured_size() {
        let (ctx, local, remote) = setup(SyncConfig::new("t1").with_push_batch_size(4));
        for i in 0..10 {
            local
                .save_local(RecordId::new(format!("p{:02}", i)), project("x"), 1_000)
                .await
                .unwrap();
        }

        let report = PushEngine::new(ctx.clone()).push().await.unwrap();
        assert_eq!(report.total_pushed(), 10);
        assert_eq!(remote.upsert_calls(), 10);

        let progress = ctx.state.current().progress.unwrap();
        assert_eq!(progress.current, 10);
        assert_eq!(progress.total, 10);
    }

    #[tokio::test]
    async fn test_cancelled_push_leaves_records_dirty() {
        let (ctx, local, remote) = setup(SyncConfig::new("t1"));
        local.save_local(RecordId::new("p1"), project("A"), 1_000).await.unwrap();

        ctx.cancel.cancel();
        let err = PushEngine::new(ctx).push().await.unwrap_err();
        assert!(matches!(err, SyncError::Cancelled));
        assert_eq!(remote.upsert_calls(), 0);
        assert_eq!(local.count_all_pending().await.unwrap(), 1);
    }
}
