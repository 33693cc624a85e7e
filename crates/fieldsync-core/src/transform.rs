//! Bidirectional mapping between local records and remote rows.
//!
//! Each [`EntityKind`] owns exactly one [`Transform`] pair. The table is an
//! exhaustive `match`, so adding a kind without its transform fails to
//! compile.
//!
//! Remote rows are flat JSON objects with snake_case columns, a `user_id`
//! owner column and an ISO-8601 `updated_at`.

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Map, Value};

use crate::error::{Result, TransformError};
use crate::record::{
    Budget, Contact, EntityPayload, FileMeta, HistoryEntry, Installation, LocalRecord, Project,
};
use crate::types::{EntityKind, OwnerId, RecordId};

/// A remote row: column name to JSON value.
pub type RemoteRow = Map<String, Value>;

/// Columns maintained by the sync layer rather than by users.
pub const SYNC_METADATA_COLUMNS: [&str; 4] = ["id", "user_id", "updated_at", "created_at"];

/// Owner column present on every remote table.
pub const OWNER_COLUMN: &str = "user_id";

/// Server modification timestamp column.
pub const UPDATED_AT_COLUMN: &str = "updated_at";

/// The `{to_remote, to_local}` pair for one entity kind.
pub struct Transform {
    pub to_remote: fn(&LocalRecord, &OwnerId) -> Result<RemoteRow>,
    pub to_local: fn(&RemoteRow) -> Result<LocalRecord>,
}

static PROJECT: Transform = Transform {
    to_remote: project_to_remote,
    to_local: project_to_local,
};
static INSTALLATION: Transform = Transform {
    to_remote: installation_to_remote,
    to_local: installation_to_local,
};
static CONTACT: Transform = Transform {
    to_remote: contact_to_remote,
    to_local: contact_to_local,
};
static BUDGET: Transform = Transform {
    to_remote: budget_to_remote,
    to_local: budget_to_local,
};
static FILE: Transform = Transform {
    to_remote: file_to_remote,
    to_local: file_to_local,
};
static HISTORY: Transform = Transform {
    to_remote: history_to_remote,
    to_local: history_to_local,
};

/// Look up the transform pair for a kind.
pub fn transform_for(kind: EntityKind) -> &'static Transform {
    match kind {
        EntityKind::Project => &PROJECT,
        EntityKind::Installation => &INSTALLATION,
        EntityKind::Contact => &CONTACT,
        EntityKind::Budget => &BUDGET,
        EntityKind::File => &FILE,
        EntityKind::History => &HISTORY,
    }
}

/// Map a local record to its remote row.
pub fn to_remote(record: &LocalRecord, owner: &OwnerId) -> Result<RemoteRow> {
    (transform_for(record.kind()).to_remote)(record, owner)
}

/// Map a remote row of the given kind to a clean local record.
pub fn to_local(kind: EntityKind, row: &RemoteRow) -> Result<LocalRecord> {
    (transform_for(kind).to_local)(row)
}

/// Strip sync metadata, leaving only user-meaningful columns.
pub fn substantive(row: &RemoteRow) -> RemoteRow {
    row.iter()
        .filter(|(k, _)| !SYNC_METADATA_COLUMNS.contains(&k.as_str()))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

/// Format epoch milliseconds as an RFC 3339 UTC timestamp.
pub fn millis_to_iso(millis: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(millis)
        .unwrap_or_default()
        .to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Parse an RFC 3339 timestamp into epoch milliseconds.
pub fn iso_to_millis(value: &str) -> Option<i64> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|dt| dt.timestamp_millis())
}

// ─────────────────────────────────────────────────────────────────────────────
// Row helpers
// ─────────────────────────────────────────────────────────────────────────────

fn base_row(record: &LocalRecord, owner: &OwnerId) -> RemoteRow {
    let mut row = Map::new();
    row.insert("id".into(), Value::String(record.id.to_string()));
    row.insert(OWNER_COLUMN.into(), Value::String(owner.to_string()));
    row.insert(
        UPDATED_AT_COLUMN.into(),
        Value::String(millis_to_iso(record.updated_at)),
    );
    row
}

fn opt_string(value: &Option<String>) -> Value {
    value.clone().map(Value::String).unwrap_or(Value::Null)
}

fn mismatch(expected: EntityKind, record: &LocalRecord) -> TransformError {
    TransformError::KindMismatch {
        expected,
        actual: record.kind(),
    }
}

/// Typed accessors over a remote row.
struct RowReader<'a> {
    table: &'static str,
    row: &'a RemoteRow,
}

impl<'a> RowReader<'a> {
    fn new(kind: EntityKind, row: &'a RemoteRow) -> Self {
        Self {
            table: kind.table(),
            row,
        }
    }

    fn value(&self, column: &str) -> Option<&'a Value> {
        self.row.get(column).filter(|v| !v.is_null())
    }

    fn missing(&self, column: &str) -> TransformError {
        TransformError::MissingColumn {
            table: self.table,
            column: column.to_string(),
        }
    }

    fn wrong_type(&self, column: &str, expected: &'static str) -> TransformError {
        TransformError::WrongType {
            table: self.table,
            column: column.to_string(),
            expected,
        }
    }

    fn opt_str(&self, column: &str) -> Result<Option<String>> {
        match self.value(column) {
            None => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.clone())),
            Some(_) => Err(self.wrong_type(column, "string")),
        }
    }

    fn str(&self, column: &str) -> Result<String> {
        self.opt_str(column)?.ok_or_else(|| self.missing(column))
    }

    fn i64(&self, column: &str) -> Result<i64> {
        let value = self.value(column).ok_or_else(|| self.missing(column))?;
        value.as_i64().ok_or_else(|| self.wrong_type(column, "integer"))
    }

    fn u64(&self, column: &str) -> Result<u64> {
        let value = self.value(column).ok_or_else(|| self.missing(column))?;
        value
            .as_u64()
            .ok_or_else(|| self.wrong_type(column, "unsigned integer"))
    }

    fn timestamp(&self, column: &str) -> Result<i64> {
        let raw = self.str(column)?;
        iso_to_millis(&raw).ok_or(TransformError::InvalidTimestamp {
            column: column.to_string(),
            value: raw,
        })
    }

    fn id(&self) -> Result<RecordId> {
        self.str("id").map(RecordId::new)
    }

    fn clean(&self, payload: EntityPayload) -> Result<LocalRecord> {
        Ok(LocalRecord::clean(
            self.id()?,
            payload,
            self.timestamp(UPDATED_AT_COLUMN)?,
        ))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Per-kind transforms
// ─────────────────────────────────────────────────────────────────────────────

fn project_to_remote(record: &LocalRecord, owner: &OwnerId) -> Result<RemoteRow> {
    let EntityPayload::Project(p) = &record.payload else {
        return Err(mismatch(EntityKind::Project, record));
    };
    let mut row = base_row(record, owner);
    row.insert("name".into(), Value::String(p.name.clone()));
    row.insert("client_name".into(), Value::String(p.client_name.clone()));
    row.insert("address".into(), opt_string(&p.address));
    row.insert("status".into(), Value::String(p.status.clone()));
    row.insert("notes".into(), opt_string(&p.notes));
    Ok(row)
}

fn project_to_local(row: &RemoteRow) -> Result<LocalRecord> {
    let r = RowReader::new(EntityKind::Project, row);
    r.clean(EntityPayload::Project(Project {
        name: r.str("name")?,
        client_name: r.str("client_name")?,
        address: r.opt_str("address")?,
        status: r.str("status")?,
        notes: r.opt_str("notes")?,
    }))
}

fn installation_to_remote(record: &LocalRecord, owner: &OwnerId) -> Result<RemoteRow> {
    let EntityPayload::Installation(i) = &record.payload else {
        return Err(mismatch(EntityKind::Installation, record));
    };
    let mut row = base_row(record, owner);
    row.insert("project_id".into(), Value::String(i.project_id.to_string()));
    row.insert("system_type".into(), Value::String(i.system_type.clone()));
    row.insert("location".into(), opt_string(&i.location));
    row.insert("status".into(), Value::String(i.status.clone()));
    row.insert("installed_on".into(), opt_string(&i.installed_on));
    Ok(row)
}

fn installation_to_local(row: &RemoteRow) -> Result<LocalRecord> {
    let r = RowReader::new(EntityKind::Installation, row);
    r.clean(EntityPayload::Installation(Installation {
        project_id: RecordId::new(r.str("project_id")?),
        system_type: r.str("system_type")?,
        location: r.opt_str("location")?,
        status: r.str("status")?,
        installed_on: r.opt_str("installed_on")?,
    }))
}

fn contact_to_remote(record: &LocalRecord, owner: &OwnerId) -> Result<RemoteRow> {
    let EntityPayload::Contact(c) = &record.payload else {
        return Err(mismatch(EntityKind::Contact, record));
    };
    let mut row = base_row(record, owner);
    row.insert(
        "project_id".into(),
        opt_string(&c.project_id.as_ref().map(|id| id.to_string())),
    );
    row.insert("name".into(), Value::String(c.name.clone()));
    row.insert("email".into(), opt_string(&c.email));
    row.insert("phone".into(), opt_string(&c.phone));
    row.insert("role".into(), opt_string(&c.role));
    Ok(row)
}

fn contact_to_local(row: &RemoteRow) -> Result<LocalRecord> {
    let r = RowReader::new(EntityKind::Contact, row);
    r.clean(EntityPayload::Contact(Contact {
        project_id: r.opt_str("project_id")?.map(RecordId::new),
        name: r.str("name")?,
        email: r.opt_str("email")?,
        phone: r.opt_str("phone")?,
        role: r.opt_str("role")?,
    }))
}

fn budget_to_remote(record: &LocalRecord, owner: &OwnerId) -> Result<RemoteRow> {
    let EntityPayload::Budget(b) = &record.payload else {
        return Err(mismatch(EntityKind::Budget, record));
    };
    let mut row = base_row(record, owner);
    row.insert("project_id".into(), Value::String(b.project_id.to_string()));
    row.insert("title".into(), Value::String(b.title.clone()));
    row.insert("amount_cents".into(), Value::from(b.amount_cents));
    row.insert("currency".into(), Value::String(b.currency.clone()));
    row.insert("status".into(), Value::String(b.status.clone()));
    Ok(row)
}

fn budget_to_local(row: &RemoteRow) -> Result<LocalRecord> {
    let r = RowReader::new(EntityKind::Budget, row);
    r.clean(EntityPayload::Budget(Budget {
        project_id: RecordId::new(r.str("project_id")?),
        title: r.str("title")?,
        amount_cents: r.i64("amount_cents")?,
        currency: r.str("currency")?,
        status: r.str("status")?,
    }))
}

fn file_to_remote(record: &LocalRecord, owner: &OwnerId) -> Result<RemoteRow> {
    let EntityPayload::File(f) = &record.payload else {
        return Err(mismatch(EntityKind::File, record));
    };
    let mut row = base_row(record, owner);
    row.insert("project_id".into(), Value::String(f.project_id.to_string()));
    row.insert("file_name".into(), Value::String(f.file_name.clone()));
    row.insert("mime_type".into(), Value::String(f.mime_type.clone()));
    row.insert("size_bytes".into(), Value::from(f.size_bytes));
    row.insert("storage_path".into(), opt_string(&f.storage_path));
    Ok(row)
}

fn file_to_local(row: &RemoteRow) -> Result<LocalRecord> {
    let r = RowReader::new(EntityKind::File, row);
    r.clean(EntityPayload::File(FileMeta {
        project_id: RecordId::new(r.str("project_id")?),
        file_name: r.str("file_name")?,
        mime_type: r.str("mime_type")?,
        size_bytes: r.u64("size_bytes")?,
        storage_path: r.opt_str("storage_path")?,
        pending_upload: false,
    }))
}

fn history_to_remote(record: &LocalRecord, owner: &OwnerId) -> Result<RemoteRow> {
    let EntityPayload::History(h) = &record.payload else {
        return Err(mismatch(EntityKind::History, record));
    };
    let mut row = base_row(record, owner);
    row.insert(
        "record_type".into(),
        Value::String(h.record_type.table().to_string()),
    );
    row.insert("record_id".into(), Value::String(h.record_id.to_string()));
    row.insert("action".into(), Value::String(h.action.clone()));
    row.insert("summary".into(), Value::String(h.summary.clone()));
    row.insert(
        "occurred_at".into(),
        Value::String(millis_to_iso(h.occurred_at)),
    );
    Ok(row)
}

fn history_to_local(row: &RemoteRow) -> Result<LocalRecord> {
    let r = RowReader::new(EntityKind::History, row);
    let record_type = r.str("record_type")?;
    r.clean(EntityPayload::History(HistoryEntry {
        record_type: EntityKind::from_table(&record_type)
            .ok_or(TransformError::UnknownRecordType(record_type))?,
        record_id: RecordId::new(r.str("record_id")?),
        action: r.str("action")?,
        summary: r.str("summary")?,
        occurred_at: r.timestamp("occurred_at")?,
    }))
}
