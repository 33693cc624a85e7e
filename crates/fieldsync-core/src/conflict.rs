//! Conflict detection between a local record and its pulled remote version.
//!
//! Only sync metadata is ignored when comparing: two versions that differ
//! in `updated_at` alone are the same logical state (typically the server
//! echoing back our own push).

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::Result;
use crate::record::LocalRecord;
use crate::transform::{substantive, to_remote};
use crate::types::{ConflictPolicy, EntityKind, OwnerId, RecordId};

/// Blake3 hash of a record's substantive columns.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fingerprint(pub [u8; 32]);

impl Fingerprint {
    /// Fingerprint the user-meaningful content of a record.
    pub fn of(record: &LocalRecord) -> Result<Self> {
        // The owner column is stripped by `substantive`, so any value works.
        let row = to_remote(record, &OwnerId::new(""))?;
        let canonical = serde_json::to_vec(&substantive(&row)).unwrap_or_default();
        Ok(Self(*blake3::hash(&canonical).as_bytes()))
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", &self.to_hex()[..16])
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex()[..16])
    }
}

/// A divergence between local and remote state awaiting manual resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictRecord {
    pub record_type: EntityKind,
    pub record_id: RecordId,
    pub record_name: String,
    pub local_version: LocalRecord,
    pub remote_version: LocalRecord,
    pub local_fingerprint: Fingerprint,
    pub remote_fingerprint: Fingerprint,
    /// When the conflict was detected, epoch milliseconds.
    pub detected_at: i64,
}

impl ConflictRecord {
    /// Whether the local side of the conflict is a pending deletion.
    pub fn is_delete_conflict(&self) -> bool {
        self.local_version.is_tombstoned()
    }
}

/// How a manual conflict is settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConflictResolution {
    /// Keep the local edit; it is pushed on the next cycle.
    KeepLocal,
    /// Discard the local edit and store the remote version.
    AcceptRemote,
}

/// Outcome of comparing a local record with an incoming remote version.
#[derive(Debug, Clone, PartialEq)]
pub enum ConflictDecision {
    /// Write the remote version locally.
    Apply,
    /// Leave the local record as it is.
    KeepLocal,
    /// Queue for manual resolution; the local record is left untouched.
    Conflict(Box<ConflictRecord>),
}

/// Decide what to do with a pulled `remote` version given the current
/// `local` record (if any).
pub fn detect(
    local: Option<&LocalRecord>,
    remote: &LocalRecord,
    policy: ConflictPolicy,
    now: i64,
) -> Result<ConflictDecision> {
    let local = match local {
        Some(local) if local.is_pending() => local,
        _ => return Ok(ConflictDecision::Apply),
    };

    match policy {
        ConflictPolicy::LastWriteWins => {
            // A pending deletion is never undone by a pull.
            if local.is_tombstoned() || local.updated_at > remote.updated_at {
                Ok(ConflictDecision::KeepLocal)
            } else {
                Ok(ConflictDecision::Apply)
            }
        }
        ConflictPolicy::Manual => {
            let local_fingerprint = Fingerprint::of(local)?;
            let remote_fingerprint = Fingerprint::of(remote)?;

            if local_fingerprint == remote_fingerprint {
                // Same logical state. A pending deletion must survive the echo.
                return Ok(if local.is_tombstoned() {
                    ConflictDecision::KeepLocal
                } else {
                    ConflictDecision::Apply
                });
            }

            Ok(ConflictDecision::Conflict(Box::new(ConflictRecord {
                record_type: local.kind(),
                record_id: local.id.clone(),
                record_name: local.payload.display_name(),
                local_version: local.clone(),
                remote_version: remote.clone(),
                local_fingerprint,
                remote_fingerprint,
                detected_at: now,
            })))
        }
    }
}
