//! Remote store abstraction.
//!
//! Models a multi-tenant relational backend reachable over the network:
//! filtered, ordered, paginated selects plus row upserts and deletes.
//! Implementations may wrap a REST gateway, a database driver or, for
//! tests, the [`memory::MemoryRemoteStore`].

use std::cmp::Ordering;

use async_trait::async_trait;
use serde_json::Value;

use fieldsync_core::{iso_to_millis, OwnerId, RecordId, RemoteRow};

use crate::error::RemoteResult;

/// A column predicate.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Eq(String, Value),
    Gt(String, Value),
}

impl Filter {
    fn matches(&self, row: &RemoteRow) -> bool {
        match self {
            Filter::Eq(column, expected) => row
                .get(column)
                .map(|v| compare_values(v, expected) == Ordering::Equal)
                .unwrap_or(false),
            Filter::Gt(column, bound) => row
                .get(column)
                .map(|v| compare_values(v, bound) == Ordering::Greater)
                .unwrap_or(false),
        }
    }
}

/// A sort key.
#[derive(Debug, Clone, PartialEq)]
pub struct Order {
    pub column: String,
    pub ascending: bool,
}

/// A select request: `table`, filters, ordering and an inclusive row range.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectQuery {
    pub table: String,
    pub filters: Vec<Filter>,
    pub order: Vec<Order>,
    /// Inclusive `(from, to)` row offsets.
    pub range: Option<(usize, usize)>,
}

impl SelectQuery {
    /// Start a query against a table.
    pub fn table(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            filters: Vec::new(),
            order: Vec::new(),
            range: None,
        }
    }

    pub fn eq(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filters.push(Filter::Eq(column.into(), value.into()));
        self
    }

    pub fn gt(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filters.push(Filter::Gt(column.into(), value.into()));
        self
    }

    pub fn order(mut self, column: impl Into<String>, ascending: bool) -> Self {
        self.order.push(Order {
            column: column.into(),
            ascending,
        });
        self
    }

    /// Restrict to rows `from..=to` of the ordered result.
    pub fn range(mut self, from: usize, to: usize) -> Self {
        self.range = Some((from, to));
        self
    }

    /// Apply this query to an in-memory row set.
    pub fn evaluate<'a>(&self, rows: impl IntoIterator<Item = &'a RemoteRow>) -> Vec<RemoteRow> {
        let mut selected: Vec<&RemoteRow> = rows
            .into_iter()
            .filter(|row| self.filters.iter().all(|f| f.matches(row)))
            .collect();

        selected.sort_by(|a, b| {
            for key in &self.order {
                let ord = compare_values(
                    a.get(&key.column).unwrap_or(&Value::Null),
                    b.get(&key.column).unwrap_or(&Value::Null),
                );
                let ord = if key.ascending { ord } else { ord.reverse() };
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            Ordering::Equal
        });

        let (from, to) = self.range.unwrap_or((0, usize::MAX - 1));
        selected
            .into_iter()
            .skip(from)
            .take(to.saturating_sub(from).saturating_add(1))
            .cloned()
            .collect()
    }
}

/// Compare two JSON column values the way the backend orders them.
///
/// Timestamps compare chronologically, numbers numerically, other strings
/// lexicographically; `null` sorts first.
pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Null, _) => Ordering::Less,
        (_, Value::Null) => Ordering::Greater,
        (Value::Number(x), Value::Number(y)) => {
            let (x, y) = (x.as_f64().unwrap_or(0.0), y.as_f64().unwrap_or(0.0));
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Value::String(x), Value::String(y)) => match (iso_to_millis(x), iso_to_millis(y)) {
            (Some(x), Some(y)) => x.cmp(&y),
            _ => x.cmp(y),
        },
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        _ => a.to_string().cmp(&b.to_string()),
    }
}

/// The remote store: async interface to the central backend.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Run a filtered, ordered, paginated select.
    async fn select(&self, query: &SelectQuery) -> RemoteResult<Vec<RemoteRow>>;

    /// Insert or update rows by their `id` column. The backend stamps
    /// `updated_at` with its own commit time; the value sent is ignored.
    async fn upsert(&self, table: &str, rows: Vec<RemoteRow>) -> RemoteResult<()>;

    /// Delete a row owned by `owner`. Deleting a missing row succeeds.
    async fn delete(&self, table: &str, owner: &OwnerId, id: &RecordId) -> RemoteResult<()>;
}

/// An in-memory remote store for testing.
pub mod memory {
    use super::*;
    use std::collections::{BTreeMap, HashMap};
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};

    use std::sync::Arc;

    use parking_lot::RwLock;

    use fieldsync_core::{millis_to_iso, Clock, SystemClock, OWNER_COLUMN, UPDATED_AT_COLUMN};

    use crate::error::RemoteError;

    /// Tables of rows keyed by id, with per-operation call counters.
    ///
    /// Upserts stamp `updated_at` from the store's own clock, standing in
    /// for the server's commit time.
    pub struct MemoryRemoteStore {
        tables: RwLock<HashMap<String, BTreeMap<String, RemoteRow>>>,
        clock: Arc<dyn Clock>,
        selects: AtomicUsize,
        upserts: AtomicUsize,
        deletes: AtomicUsize,
    }

    impl Default for MemoryRemoteStore {
        fn default() -> Self {
            Self::new()
        }
    }

    impl MemoryRemoteStore {
        pub fn new() -> Self {
            Self::with_clock(Arc::new(SystemClock))
        }

        /// A store whose server time comes from `clock`.
        pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
            Self {
                tables: RwLock::new(HashMap::new()),
                clock,
                selects: AtomicUsize::new(0),
                upserts: AtomicUsize::new(0),
                deletes: AtomicUsize::new(0),
            }
        }

        /// Seed a row directly, bypassing call counters.
        pub fn insert_row(&self, table: &str, row: RemoteRow) {
            let id = row
                .get("id")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            self.tables
                .write()
                .entry(table.to_string())
                .or_default()
                .insert(id, row);
        }

        pub fn row(&self, table: &str, id: &str) -> Option<RemoteRow> {
            self.tables
                .read()
                .get(table)
                .and_then(|rows| rows.get(id).cloned())
        }

        pub fn rows(&self, table: &str) -> Vec<RemoteRow> {
            self.tables
                .read()
                .get(table)
                .map(|rows| rows.values().cloned().collect())
                .unwrap_or_default()
        }

        pub fn row_count(&self, table: &str) -> usize {
            self.tables.read().get(table).map_or(0, BTreeMap::len)
        }

        pub fn select_calls(&self) -> usize {
            self.selects.load(AtomicOrdering::SeqCst)
        }

        pub fn upsert_calls(&self) -> usize {
            self.upserts.load(AtomicOrdering::SeqCst)
        }

        pub fn delete_calls(&self) -> usize {
            self.deletes.load(AtomicOrdering::SeqCst)
        }
    }

    #[async_trait]
    impl RemoteStore for MemoryRemoteStore {
        async fn select(&self, query: &SelectQuery) -> RemoteResult<Vec<RemoteRow>> {
            self.selects.fetch_add(1, AtomicOrdering::SeqCst);
            let tables = self.tables.read();
            Ok(tables
                .get(&query.table)
                .map(|rows| query.evaluate(rows.values()))
                .unwrap_or_default())
        }

        async fn upsert(&self, table: &str, rows: Vec<RemoteRow>) -> RemoteResult<()> {
            self.upserts.fetch_add(1, AtomicOrdering::SeqCst);

            for row in &rows {
                for column in ["id", OWNER_COLUMN] {
                    if row.get(column).map_or(true, Value::is_null) {
                        return Err(RemoteError::Validation(format!(
                            "{} row is missing `{}`",
                            table, column
                        )));
                    }
                }
            }

            let committed_at = Value::String(millis_to_iso(self.clock.now_millis()));
            let mut tables = self.tables.write();
            let target = tables.entry(table.to_string()).or_default();
            for row in rows {
                let id = row
                    .get("id")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                let stored = target.entry(id).or_default();
                stored.extend(row);
                stored.insert(UPDATED_AT_COLUMN.to_string(), committed_at.clone());
            }
            Ok(())
        }

        async fn delete(&self, table: &str, owner: &OwnerId, id: &RecordId) -> RemoteResult<()> {
            self.deletes.fetch_add(1, AtomicOrdering::SeqCst);

            let mut tables = self.tables.write();
            if let Some(rows) = tables.get_mut(table) {
                let owned = rows
                    .get(id.as_str())
                    .and_then(|row| row.get(OWNER_COLUMN))
                    .and_then(Value::as_str)
                    .map(|o| o == owner.as_str());
                match owned {
                    Some(true) => {
                        rows.remove(id.as_str());
                    }
                    Some(false) => {
                        return Err(RemoteError::Unauthorized(format!(
                            "{}/{} belongs to another owner",
                            table, id
                        )))
                    }
                    None => {}
                }
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::memory::MemoryRemoteStore;
    use super::*;
    use std::sync::Arc;

    use fieldsync_core::{millis_to_iso, ManualClock};
    use serde_json::json;

    fn row(id: &str, owner: &str, updated_at: &str) -> RemoteRow {
        json!({ "id": id, "user_id": owner, "updated_at": updated_at, "name": id })
            .as_object()
            .cloned()
            .unwrap()
    }

    #[test]
    fn test_timestamps_compare_chronologically() {
        let a = json!("2024-01-01T10:00:00.500+00:00");
        let b = json!("2024-01-01T10:00:00.6Z");
        assert_eq!(compare_values(&a, &b), Ordering::Less);
        assert_eq!(compare_values(&json!(10), &json!(9.5)), Ordering::Greater);
        assert_eq!(compare_values(&Value::Null, &json!("x")), Ordering::Less);
    }

    #[tokio::test]
    async fn test_select_filters_orders_and_ranges() {
        let remote = MemoryRemoteStore::new();
        remote.insert_row("projects", row("b", "t1", "2024-01-02T00:00:00Z"));
        remote.insert_row("projects", row("a", "t1", "2024-01-02T00:00:00Z"));
        remote.insert_row("projects", row("c", "t1", "2024-01-01T00:00:00Z"));
        remote.insert_row("projects", row("d", "t2", "2024-01-03T00:00:00Z"));

        let query = SelectQuery::table("projects")
            .eq("user_id", "t1")
            .gt("updated_at", "2024-01-01T00:00:00Z")
            .order("updated_at", true)
            .order("id", true)
            .range(0, 9);
        let rows = remote.select(&query).await.unwrap();
        let ids: Vec<_> = rows.iter().map(|r| r["id"].as_str().unwrap()).collect();
        assert_eq!(ids, vec!["a", "b"]);

        let page = SelectQuery::table("projects")
            .eq("user_id", "t1")
            .order("id", true)
            .range(1, 1);
        let rows = remote.select(&page).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["id"], json!("b"));
        assert_eq!(remote.select_calls(), 2);
    }

    #[tokio::test]
    async fn test_upsert_merges_and_validates() {
        let remote = MemoryRemoteStore::new();
        remote
            .upsert("projects", vec![row("a", "t1", "2024-01-01T00:00:00Z")])
            .await
            .unwrap();

        let mut update = row("a", "t1", "2024-01-05T00:00:00Z");
        update.insert("name".into(), json!("renamed"));
        remote.upsert("projects", vec![update]).await.unwrap();
        assert_eq!(remote.row("projects", "a").unwrap()["name"], json!("renamed"));
        assert_eq!(remote.row_count("projects"), 1);

        let mut bad = row("b", "t1", "2024-01-01T00:00:00Z");
        bad.remove("user_id");
        let err = remote.upsert("projects", vec![bad]).await.unwrap_err();
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_upsert_stamps_server_time() {
        let clock = Arc::new(ManualClock::new(1_704_067_200_000));
        let remote = MemoryRemoteStore::with_clock(clock.clone());

        // Edited long ago on a device, committed now.
        remote
            .upsert("projects", vec![row("a", "t1", "2020-01-01T00:00:00Z")])
            .await
            .unwrap();
        assert_eq!(
            remote.row("projects", "a").unwrap()["updated_at"],
            json!(millis_to_iso(1_704_067_200_000))
        );

        clock.advance(5_000);
        remote
            .upsert("projects", vec![row("a", "t1", "2020-01-01T00:00:00Z")])
            .await
            .unwrap();
        assert_eq!(
            remote.row("projects", "a").unwrap()["updated_at"],
            json!(millis_to_iso(1_704_067_205_000))
        );
    }

    #[tokio::test]
    async fn test_delete_respects_owner() {
        let remote = MemoryRemoteStore::new();
        remote.insert_row("projects", row("a", "t1", "2024-01-01T00:00:00Z"));

        let foreign = remote
            .delete("projects", &OwnerId::new("t2"), &RecordId::new("a"))
            .await;
        assert!(foreign.is_err());

        remote
            .delete("projects", &OwnerId::new("t1"), &RecordId::new("a"))
            .await
            .unwrap();
        remote
            .delete("projects", &OwnerId::new("t1"), &RecordId::new("a"))
            .await
            .unwrap();
        assert_eq!(remote.row_count("projects"), 0);
        assert_eq!(remote.delete_calls(), 3);
    }
}
