//! # fieldsync store
//!
//! Storage abstractions for fieldsync: the on-device [`LocalStore`], the
//! networked [`RemoteStore`] and [`BlobStorage`] for file contents.
//!
//! ## Overview
//!
//! The sync engine only ever talks to these traits. The primary local
//! implementation is [`SqliteLocalStore`]; [`MemoryLocalStore`],
//! [`MemoryRemoteStore`] and [`MemoryBlobStorage`] back the tests.
//!
//! ## Key Types
//!
//! - [`LocalStore`] / [`LocalStoreExt`] - On-device records, markers and watermarks
//! - [`RemoteStore`] / [`SelectQuery`] - The central backend
//! - [`BlobStorage`] - File bytes by path
//! - [`RemoteError`] - Remote failures, classified for retry
//!
//! ## Usage
//!
//! ```rust,no_run
//! use fieldsync_core::{EntityPayload, Project, RecordId};
//! use fieldsync_store::{LocalStoreExt, SqliteLocalStore};
//!
//! async fn example() {
//!     let store = SqliteLocalStore::open("fieldsync.db").unwrap();
//!
//!     let payload = EntityPayload::Project(Project {
//!         name: "Roof array".into(),
//!         client_name: "Acme".into(),
//!         address: None,
//!         status: "active".into(),
//!         notes: None,
//!     });
//!     store
//!         .save_local(RecordId::generate(), payload, 1_700_000_000_000)
//!         .await
//!         .unwrap();
//! }
//! ```
//!
//! ## Design Notes
//!
//! - **Marker-guarded clean-up**: `mark_synced` only clears a record whose
//!   `updated_at` still matches what was pushed
//! - **Atomic watermarks**: all kinds advance together or not at all
//! - **Tenant-scoped deletes**: remote deletes always carry the owner

pub mod blob;
pub mod error;
pub mod memory;
pub mod migration;
pub mod remote;
pub mod sqlite;
pub mod traits;

pub use blob::{memory::MemoryBlobStorage, BlobStorage};
pub use error::{RemoteError, RemoteResult, Result, StoreError};
pub use memory::MemoryLocalStore;
pub use remote::{compare_values, memory::MemoryRemoteStore, Filter, Order, RemoteStore, SelectQuery};
pub use sqlite::SqliteLocalStore;
pub use traits::{LocalStore, LocalStoreExt};
