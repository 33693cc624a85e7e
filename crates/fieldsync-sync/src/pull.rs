//! Pull engine: brings remote changes into the local store.
//!
//! Each kind is read in pages of rows newer than its watermark, ordered by
//! `(updated_at, id)`. Every row goes through conflict detection under the
//! kind's [`ConflictPolicy`](fieldsync_core::ConflictPolicy) before it is
//! written.
//!
//! A kind's next watermark is the newest server `updated_at` its pass read,
//! never the device clock, so edits committed late by a device that was
//! offline are still picked up. Watermarks are persisted only if every
//! kind completed, so a partial pull is simply repeated.

use futures::future::join_all;
use serde_json::Value;

use fieldsync_core::{
    detect, iso_to_millis, millis_to_iso, to_local, ConflictDecision, EntityKind, RemoteRow, OWNER_COLUMN,
    UPDATED_AT_COLUMN,
};
use fieldsync_store::SelectQuery;

use crate::context::SyncContext;
use crate::error::{KindFailure, Result, SyncError, SyncOperation};
use crate::report::{KindPullReport, PullReport, RecordError};
use crate::retry::retry_remote;

enum RowOutcome {
    Applied,
    Skipped,
    Conflict,
    Failed(RecordError),
    Cancelled,
}

/// Pulls remote rows for every kind.
pub struct PullEngine {
    ctx: SyncContext,
}

impl PullEngine {
    pub fn new(ctx: SyncContext) -> Self {
        Self { ctx }
    }

    /// Rate limiter operation name for a kind.
    pub fn operation_name(kind: EntityKind) -> String {
        format!("pull:{}", kind.table())
    }

    /// The select for one page of a kind.
    pub fn page_query(&self, kind: EntityKind, watermark: Option<i64>, offset: usize) -> SelectQuery {
        let page_size = self.ctx.config.pull_page_size.max(1);
        let mut query = SelectQuery::table(kind.table())
            .eq(OWNER_COLUMN, self.ctx.config.owner_id.as_str());
        if let Some(watermark) = watermark {
            query = query.gt(UPDATED_AT_COLUMN, millis_to_iso(watermark));
        }
        query
            .order(UPDATED_AT_COLUMN, true)
            .order("id", true)
            .range(offset, offset + page_size - 1)
    }

    /// Run one pull pass.
    pub async fn pull(&self) -> Result<PullReport> {
        let mut report = PullReport::default();
        let mut failures = Vec::new();
        let mut watermarks = Vec::new();

        for (index, kind) in EntityKind::ALL.into_iter().enumerate() {
            self.ctx.cancel.check()?;
            self.ctx.report_progress(
                &format!("pull:{}", kind.table()),
                index,
                EntityKind::ALL.len(),
            );

            let entry = report.kinds.entry(kind).or_default();
            match self.pull_kind(kind, entry).await {
                Ok(Some(newest)) => watermarks.push((kind, newest)),
                Ok(None) => {}
                Err(SyncError::Cancelled) => return Err(SyncError::Cancelled),
                Err(err) => {
                    tracing::warn!(kind = %kind, error = %err, "pull of kind abandoned");
                    failures.push(KindFailure {
                        kind,
                        error: err.to_string(),
                    });
                }
            }
        }

        let conflicts = report.total_conflicts();
        if conflicts > 0 {
            self.ctx.conflicts.notify();
        }

        tracing::info!(
            pulled = report.total_pulled(),
            conflicts,
            errors = report.total_errors(),
            "pull finished"
        );

        if !failures.is_empty() {
            return Err(SyncError::Incomplete {
                operation: SyncOperation::Pull,
                failures,
            });
        }

        if !watermarks.is_empty() {
            self.ctx.local.set_watermarks(&watermarks).await?;
        }
        Ok(report)
    }

    /// Pull every page of one kind. Returns the newest server timestamp
    /// read, or `None` if nothing newer than the watermark exists.
    async fn pull_kind(&self, kind: EntityKind, entry: &mut KindPullReport) -> Result<Option<i64>> {
        let watermark = self.ctx.local.get_watermark(kind).await?;
        let mut newest: Option<i64> = None;
        let page_size = self.ctx.config.pull_page_size.max(1);
        let operation = Self::operation_name(kind);
        let config = &self.ctx.config;
        let mut offset = 0;

        loop {
            self.ctx.cancel.check()?;
            let query = self.page_query(kind, watermark, offset);
            self.ctx.limiter.wait_for_limit(&operation).await;

            let rows = retry_remote(&config.network_retry, config.request_timeout, "select", || {
                self.ctx.remote.select(&query)
            })
            .await?;

            tracing::debug!(kind = %kind, offset, rows = rows.len(), "pulled page");

            let page_newest = rows
                .iter()
                .filter_map(|row| row.get(UPDATED_AT_COLUMN)?.as_str())
                .filter_map(iso_to_millis)
                .max();
            newest = newest.max(page_newest);

            let outcomes = join_all(rows.iter().map(|row| self.apply_row(kind, row))).await;
            for outcome in outcomes {
                match outcome {
                    RowOutcome::Applied => entry.pulled += 1,
                    RowOutcome::Skipped => entry.skipped += 1,
                    RowOutcome::Conflict => entry.conflicts += 1,
                    RowOutcome::Failed(error) => entry.errors.push(error),
                    RowOutcome::Cancelled => {}
                }
            }
            self.ctx.cancel.check()?;

            if rows.len() < page_size {
                return Ok(newest);
            }
            offset += page_size;
        }
    }

    async fn apply_row(&self, kind: EntityKind, row: &RemoteRow) -> RowOutcome {
        if self.ctx.cancel.is_cancelled() {
            return RowOutcome::Cancelled;
        }
        let fail = |message: String| {
            RowOutcome::Failed(RecordError {
                record_id: row
                    .get("id")
                    .and_then(Value::as_str)
                    .unwrap_or("<missing id>")
                    .to_string(),
                message,
            })
        };

        let remote = match to_local(kind, row) {
            Ok(remote) => remote,
            Err(e) => return fail(e.to_string()),
        };
        let local = match self.ctx.local.get(kind, &remote.id).await {
            Ok(local) => local,
            Err(e) => return fail(e.to_string()),
        };

        let now = self.ctx.clock.now_millis();
        match detect(local.as_ref(), &remote, kind.conflict_policy(), now) {
            Ok(ConflictDecision::Apply) => match self.ctx.local.put(&remote).await {
                Ok(()) => RowOutcome::Applied,
                Err(e) => fail(e.to_string()),
            },
            Ok(ConflictDecision::KeepLocal) => RowOutcome::Skipped,
            Ok(ConflictDecision::Conflict(conflict)) => {
                tracing::info!(kind = %kind, id = %conflict.record_id, "conflict detected");
                self.ctx.conflicts.record(*conflict);
                RowOutcome::Conflict
            }
            Err(e) => fail(e.to_string()),
        }
    }
}
