//! SQLite implementation of the LocalStore trait.
//!
//! The primary on-device backend. It uses rusqlite with bundled SQLite,
//! wrapped in async via tokio::spawn_blocking. Payloads are stored as CBOR.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};

use fieldsync_core::{EntityKind, EntityPayload, LocalRecord, RecordId, SyncMarker};

use crate::error::{Result, StoreError};
use crate::migration;
use crate::traits::LocalStore;

/// SQLite-based local store.
///
/// Thread-safe via internal Mutex. All operations use spawn_blocking
/// to avoid blocking the async runtime.
pub struct SqliteLocalStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteLocalStore {
    /// Open a SQLite database at the given path, creating and migrating it
    /// as needed.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let mut conn = Connection::open(path)?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory SQLite database.
    pub fn open_memory() -> Result<Self> {
        let mut conn = Connection::open_in_memory()?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run a blocking operation on the connection off the async runtime.
    async fn run<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = conn.lock();
            f(&mut conn)
        })
        .await
        .map_err(|e| StoreError::Background(format!("spawn_blocking failed: {}", e)))?
    }
}

fn encode_payload(payload: &EntityPayload) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    ciborium::into_writer(payload, &mut buf)
        .map_err(|e| StoreError::Serialization(e.to_string()))?;
    Ok(buf)
}

fn decode_payload(bytes: &[u8]) -> Result<EntityPayload> {
    ciborium::from_reader(bytes).map_err(|e| StoreError::Serialization(e.to_string()))
}

fn kind_from_column(table: &str) -> Result<EntityKind> {
    EntityKind::from_table(table)
        .ok_or_else(|| StoreError::InvalidData(format!("unknown record kind: {}", table)))
}

/// Raw row as read from `records`, decoded outside the rusqlite closure so
/// CBOR failures surface as serialization errors.
struct RawRecord {
    kind: String,
    id: String,
    payload: Vec<u8>,
    marker: i64,
    updated_at: i64,
}

impl RawRecord {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            kind: row.get("kind")?,
            id: row.get("id")?,
            payload: row.get("payload")?,
            marker: row.get("marker")?,
            updated_at: row.get("updated_at")?,
        })
    }

    fn decode(self) -> Result<LocalRecord> {
        let kind = kind_from_column(&self.kind)?;
        let payload = decode_payload(&self.payload)?;
        if payload.kind() != kind {
            return Err(StoreError::InvalidData(format!(
                "{} row {} holds a {} payload",
                kind,
                self.id,
                payload.kind()
            )));
        }
        let marker = SyncMarker::from_code(self.marker)
            .ok_or_else(|| StoreError::InvalidData(format!("bad marker {}", self.marker)))?;
        Ok(LocalRecord {
            id: RecordId::new(self.id),
            payload,
            marker,
            updated_at: self.updated_at,
        })
    }
}

#[async_trait]
impl LocalStore for SqliteLocalStore {
    async fn get(&self, kind: EntityKind, id: &RecordId) -> Result<Option<LocalRecord>> {
        let id = id.clone();
        self.run(move |conn| {
            let raw = conn
                .query_row(
                    "SELECT kind, id, payload, marker, updated_at
                     FROM records WHERE kind = ?1 AND id = ?2",
                    params![kind.table(), id.as_str()],
                    RawRecord::from_row,
                )
                .optional()?;
            raw.map(RawRecord::decode).transpose()
        })
        .await
    }

    async fn put(&self, record: &LocalRecord) -> Result<()> {
        let payload = encode_payload(&record.payload)?;
        let kind = record.kind();
        let id = record.id.clone();
        let marker = record.marker.to_code();
        let updated_at = record.updated_at;

        self.run(move |conn| {
            conn.execute(
                "INSERT INTO records (kind, id, payload, marker, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(kind, id) DO UPDATE SET
                    payload = excluded.payload,
                    marker = excluded.marker,
                    updated_at = excluded.updated_at",
                params![kind.table(), id.as_str(), payload, marker, updated_at],
            )?;
            Ok(())
        })
        .await
    }

    async fn delete(&self, kind: EntityKind, id: &RecordId) -> Result<bool> {
        let id = id.clone();
        self.run(move |conn| {
            let removed = conn.execute(
                "DELETE FROM records WHERE kind = ?1 AND id = ?2",
                params![kind.table(), id.as_str()],
            )?;
            Ok(removed > 0)
        })
        .await
    }

    async fn list_by_marker(
        &self,
        kind: EntityKind,
        marker: SyncMarker,
    ) -> Result<Vec<LocalRecord>> {
        self.run(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT kind, id, payload, marker, updated_at
                 FROM records WHERE kind = ?1 AND marker = ?2
                 ORDER BY id",
            )?;
            let raw = stmt
                .query_map(params![kind.table(), marker.to_code()], RawRecord::from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            raw.into_iter().map(RawRecord::decode).collect()
        })
        .await
    }

    async fn count_by_marker(&self, kind: EntityKind, marker: SyncMarker) -> Result<usize> {
        self.run(move |conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM records WHERE kind = ?1 AND marker = ?2",
                params![kind.table(), marker.to_code()],
                |row| row.get(0),
            )?;
            Ok(count as usize)
        })
        .await
    }

    async fn mark_synced(
        &self,
        kind: EntityKind,
        id: &RecordId,
        expected_updated_at: i64,
    ) -> Result<bool> {
        let id = id.clone();
        self.run(move |conn| {
            let changed = conn.execute(
                "UPDATE records SET marker = ?1
                 WHERE kind = ?2 AND id = ?3 AND marker = ?4 AND updated_at = ?5",
                params![
                    SyncMarker::Clean.to_code(),
                    kind.table(),
                    id.as_str(),
                    SyncMarker::Dirty.to_code(),
                    expected_updated_at,
                ],
            )?;
            Ok(changed > 0)
        })
        .await
    }

    async fn get_watermark(&self, kind: EntityKind) -> Result<Option<i64>> {
        self.run(move |conn| {
            conn.query_row(
                "SELECT pulled_at FROM watermarks WHERE kind = ?1",
                params![kind.table()],
                |row| row.get(0),
            )
            .optional()
            .map_err(StoreError::from)
        })
        .await
    }

    async fn set_watermarks(&self, watermarks: &[(EntityKind, i64)]) -> Result<()> {
        let watermarks = watermarks.to_vec();
        self.run(move |conn| {
            let tx = conn.transaction()?;
            for (kind, pulled_at) in &watermarks {
                tx.execute(
                    "INSERT INTO watermarks (kind, pulled_at) VALUES (?1, ?2)
                     ON CONFLICT(kind) DO UPDATE SET pulled_at = excluded.pulled_at",
                    params![kind.table(), pulled_at],
                )?;
            }
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn stage_blob(&self, id: &RecordId, bytes: Bytes) -> Result<()> {
        let id = id.clone();
        self.run(move |conn| {
            conn.execute(
                "INSERT INTO staged_blobs (id, bytes) VALUES (?1, ?2)
                 ON CONFLICT(id) DO UPDATE SET bytes = excluded.bytes",
                params![id.as_str(), bytes.as_ref()],
            )?;
            Ok(())
        })
        .await
    }

    async fn staged_blob(&self, id: &RecordId) -> Result<Option<Bytes>> {
        let id = id.clone();
        self.run(move |conn| {
            let bytes: Option<Vec<u8>> = conn
                .query_row(
                    "SELECT bytes FROM staged_blobs WHERE id = ?1",
                    params![id.as_str()],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(bytes.map(Bytes::from))
        })
        .await
    }

    async fn discard_staged_blob(&self, id: &RecordId) -> Result<()> {
        let id = id.clone();
        self.run(move |conn| {
            conn.execute(
                "DELETE FROM staged_blobs WHERE id = ?1",
                params![id.as_str()],
            )?;
            Ok(())
        })
        .await
    }
}
