//! Strong type definitions for fieldsync.
//!
//! Identifiers are newtypes so a record id can never be passed where an
//! owner id is expected.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a single record, shared by its local and remote forms.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(String);

impl RecordId {
    /// Wrap an existing identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh random identifier.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Borrow the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RecordId({})", self.0)
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RecordId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for RecordId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Tenant / owner identifier carried by every remote row.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OwnerId(String);

impl OwnerId {
    /// Wrap an owner identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OwnerId({})", self.0)
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// How a pulled remote version is reconciled with a dirty local record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConflictPolicy {
    /// Diverging edits are queued for manual resolution.
    Manual,
    /// The newer `updated_at` wins.
    LastWriteWins,
}

/// The closed set of synchronized entity kinds.
///
/// Declaration order is the dependency order: parents come before the
/// children that reference them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Project,
    Installation,
    Contact,
    Budget,
    File,
    History,
}

impl EntityKind {
    /// All kinds, parents first.
    pub const ALL: [EntityKind; 6] = [
        EntityKind::Project,
        EntityKind::Installation,
        EntityKind::Contact,
        EntityKind::Budget,
        EntityKind::File,
        EntityKind::History,
    ];

    /// Remote table backing this kind.
    pub const fn table(self) -> &'static str {
        match self {
            EntityKind::Project => "projects",
            EntityKind::Installation => "installations",
            EntityKind::Contact => "contacts",
            EntityKind::Budget => "budgets",
            EntityKind::File => "files",
            EntityKind::History => "change_history",
        }
    }

    /// Parse a remote table name back into a kind.
    pub fn from_table(table: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.table() == table)
    }

    /// Conflict policy applied on the pull path.
    ///
    /// User-editable entities need manual resolution; history entries are
    /// append-only and file metadata is owned by the uploader.
    pub const fn conflict_policy(self) -> ConflictPolicy {
        match self {
            EntityKind::Project
            | EntityKind::Installation
            | EntityKind::Contact
            | EntityKind::Budget => ConflictPolicy::Manual,
            EntityKind::File | EntityKind::History => ConflictPolicy::LastWriteWins,
        }
    }

    /// Kinds in the order deletions must be pushed: children before parents.
    pub fn deletion_order() -> impl Iterator<Item = EntityKind> {
        Self::ALL.into_iter().rev()
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.table())
    }
}
