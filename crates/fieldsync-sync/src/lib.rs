//! # fieldsync sync
//!
//! The machinery that moves records between the local and remote stores.
//!
//! ## Overview
//!
//! - [`PushEngine`] sends dirty and tombstoned records, parents first
//! - [`PullEngine`] pages remote changes in behind per-kind watermarks,
//!   routing divergent edits to the [`ConflictQueue`]
//! - [`files::upload_pending`] moves staged file bytes to blob storage
//! - [`Retry`] / [`retry_remote`] and [`RateLimiter`] pace remote calls
//! - [`SyncStateManager`] publishes [`SyncState`] to subscribers
//!
//! The engines share a [`SyncContext`]; mutual exclusion between passes is
//! the caller's job (see the `fieldsync` crate).
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use fieldsync_core::SystemClock;
//! use fieldsync_store::{MemoryBlobStorage, MemoryRemoteStore, SqliteLocalStore};
//! use fieldsync_sync::{PullEngine, PushEngine, SyncConfig, SyncContext};
//!
//! async fn example() {
//!     let ctx = SyncContext::new(
//!         Arc::new(SqliteLocalStore::open("fieldsync.db").unwrap()),
//!         Arc::new(MemoryRemoteStore::new()),
//!         Arc::new(MemoryBlobStorage::new()),
//!         Arc::new(SystemClock),
//!         SyncConfig::new("tenant-id"),
//!     );
//!
//!     let pushed = PushEngine::new(ctx.clone()).push().await.unwrap();
//!     let pulled = PullEngine::new(ctx).pull().await.unwrap();
//!     println!("{} up, {} down", pushed.total_pushed(), pulled.total_pulled());
//! }
//! ```

pub mod config;
pub mod conflicts;
pub mod context;
pub mod error;
pub mod files;
pub mod listeners;
pub mod pull;
pub mod push;
pub mod rate_limit;
pub mod report;
pub mod retry;
pub mod state;

pub use config::SyncConfig;
pub use conflicts::ConflictQueue;
pub use context::{CancelFlag, SyncContext};
pub use error::{KindFailure, Result, SyncError, SyncOperation};
pub use listeners::{Listeners, Subscription};
pub use pull::PullEngine;
pub use push::PushEngine;
pub use rate_limit::{RateLimitDecision, RateLimiter};
pub use report::{
    KindPullReport, KindPushReport, PullReport, PushReport, RecordError, UploadReport,
};
pub use retry::{retry, retry_remote, Retry, RetryPolicy};
pub use state::{SyncProgress, SyncState, SyncStateManager, SyncStatePatch, SyncStatus};
