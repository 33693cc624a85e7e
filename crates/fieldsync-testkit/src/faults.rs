//! Fault injection for remote stores.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;

use fieldsync_core::{OwnerId, RecordId, RemoteRow};
use fieldsync_store::{RemoteError, RemoteResult, RemoteStore, SelectQuery};

/// Wraps a [`RemoteStore`] and fails or delays calls on demand.
///
/// Failures are checked in order: scripted one-shot failures first, then
/// per-table failures, then per-record failures. Injected failures never
/// reach the wrapped store.
pub struct FlakyRemote {
    inner: Arc<dyn RemoteStore>,
    scripted: Mutex<VecDeque<RemoteError>>,
    tables: Mutex<HashMap<String, RemoteError>>,
    records: Mutex<HashMap<String, RemoteError>>,
    latency: Mutex<Duration>,
    calls: AtomicUsize,
    injected: AtomicUsize,
}

impl FlakyRemote {
    pub fn new(inner: Arc<dyn RemoteStore>) -> Self {
        Self {
            inner,
            scripted: Mutex::new(VecDeque::new()),
            tables: Mutex::new(HashMap::new()),
            records: Mutex::new(HashMap::new()),
            latency: Mutex::new(Duration::ZERO),
            calls: AtomicUsize::new(0),
            injected: AtomicUsize::new(0),
        }
    }

    /// Fail the next `times` calls with `error`.
    pub fn fail_next(&self, times: usize, error: RemoteError) {
        let mut scripted = self.scripted.lock();
        scripted.extend(std::iter::repeat(error).take(times));
    }

    /// Fail every call touching `table`.
    pub fn fail_table(&self, table: &str, error: RemoteError) {
        self.tables.lock().insert(table.to_string(), error);
    }

    /// Fail every write of the row with id `id`.
    pub fn fail_record(&self, id: &str, error: RemoteError) {
        self.records.lock().insert(id.to_string(), error);
    }

    /// Sleep this long before every call.
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock() = latency;
    }

    /// Remove every injected fault and the latency.
    pub fn heal(&self) {
        self.scripted.lock().clear();
        self.tables.lock().clear();
        self.records.lock().clear();
        *self.latency.lock() = Duration::ZERO;
    }

    /// Calls received, failed ones included.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Calls answered with an injected failure.
    pub fn injected_failures(&self) -> usize {
        self.injected.load(Ordering::SeqCst)
    }

    async fn gate(&self, table: &str, ids: &[&str]) -> RemoteResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let latency = *self.latency.lock();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        if let Some(err) = self.injected_error(table, ids) {
            self.injected.fetch_add(1, Ordering::SeqCst);
            return Err(err);
        }
        Ok(())
    }

    fn injected_error(&self, table: &str, ids: &[&str]) -> Option<RemoteError> {
        if let Some(err) = self.scripted.lock().pop_front() {
            return Some(err);
        }
        if let Some(err) = self.tables.lock().get(table) {
            return Some(err.clone());
        }
        let records = self.records.lock();
        ids.iter().find_map(|id| records.get(*id).cloned())
    }
}

#[async_trait]
impl RemoteStore for FlakyRemote {
    async fn select(&self, query: &SelectQuery) -> RemoteResult<Vec<RemoteRow>> {
        self.gate(&query.table, &[]).await?;
        self.inner.select(query).await
    }

    async fn upsert(&self, table: &str, rows: Vec<RemoteRow>) -> RemoteResult<()> {
        let ids: Vec<&str> = rows
            .iter()
            .filter_map(|row| row.get("id").and_then(Value::as_str))
            .collect();
        self.gate(table, &ids).await?;
        self.inner.upsert(table, rows).await
    }

    async fn delete(&self, table: &str, owner: &OwnerId, id: &RecordId) -> RemoteResult<()> {
        self.gate(table, &[id.as_str()]).await?;
        self.inner.delete(table, owner, id).await
    }
}
