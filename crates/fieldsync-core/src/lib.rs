//! # fieldsync core
//!
//! Pure primitives for fieldsync: entity kinds, local records, the
//! local/remote transform table and conflict detection.
//!
//! This crate contains no I/O, no storage, no networking.
//!
//! ## Key Types
//!
//! - [`EntityKind`] - The closed set of synchronized entity types
//! - [`LocalRecord`] - A record as held on device, with its [`SyncMarker`]
//! - [`RemoteRow`] - A record as held by the backend
//! - [`ConflictRecord`] - A divergence queued for manual resolution

pub mod clock;
pub mod conflict;
pub mod error;
pub mod record;
pub mod transform;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use conflict::{
    detect, ConflictDecision, ConflictRecord, ConflictResolution, Fingerprint,
};
pub use error::{Result, TransformError};
pub use record::{
    Budget, Contact, EntityPayload, FileMeta, HistoryEntry, Installation, LocalRecord, Project,
    SyncMarker,
};
pub use transform::{
    iso_to_millis, millis_to_iso, substantive, to_local, to_remote, transform_for, RemoteRow,
    Transform, OWNER_COLUMN, SYNC_METADATA_COLUMNS, UPDATED_AT_COLUMN,
};
pub use types::{ConflictPolicy, EntityKind, OwnerId, RecordId};
