//! # fieldsync
//!
//! Offline-first sync for field-service data. Projects, installations,
//! contacts, budgets, files and change history are edited against a local
//! store and reconciled with a central backend when connectivity allows.
//!
//! ## Overview
//!
//! - [`SyncEngine`]: push, pull and full sync with mutual exclusion,
//!   observable state and a conflict queue
//! - [`AutoSync`]: boot pull, debounced push, periodic pull and exit
//!   flush, driven by [`LifecycleEvent`]s and [`SyncPreferences`]
//! - [`OnlineMonitor`]: connectivity events plus polling, with a debounced
//!   reconnect sync
//!
//! ## Key Concepts
//!
//! - **Marker**: every local record is clean, dirty or tombstoned. Only a
//!   confirmed remote write clears it.
//! - **Watermark**: per-kind time of the last complete pull.
//! - **Conflict**: a pulled row that disagrees with a pending local edit.
//!   It is queued and the local edit is left alone.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use fieldsync::{AutoSync, LifecycleEvent, SyncEngine, SyncPreferences, TokioScheduler};
//! use fieldsync::store::{MemoryBlobStorage, MemoryRemoteStore, SqliteLocalStore};
//! use fieldsync::sync::SyncConfig;
//!
//! async fn example() {
//!     let engine = Arc::new(SyncEngine::new(
//!         Arc::new(SqliteLocalStore::open("fieldsync.db").unwrap()),
//!         Arc::new(MemoryRemoteStore::new()),
//!         Arc::new(MemoryBlobStorage::new()),
//!         SyncConfig::new("tenant-id"),
//!     ));
//!
//!     let auto = AutoSync::new(
//!         engine.clone(),
//!         Arc::new(TokioScheduler),
//!         Arc::new(SyncPreferences::default()),
//!     );
//!     auto.initialize();
//!     auto.on_authenticated().await;
//!
//!     // After each local edit:
//!     auto.trigger_debounced_sync();
//!
//!     // From the platform:
//!     auto.handle_lifecycle(LifecycleEvent::Hidden);
//! }
//! ```
//!
//! ## Re-exports
//!
//! - `fieldsync::core` - Records, payloads, transforms, conflict detection
//! - `fieldsync::store` - Local, remote and blob store interfaces
//! - `fieldsync::sync` - Push/pull engines, retry, rate limiting, state

pub mod engine;
pub mod monitor;
pub mod notify;
pub mod orchestrator;
pub mod prefs;
pub mod scheduler;

// Re-export component crates
pub use fieldsync_core as core;
pub use fieldsync_store as store;
pub use fieldsync_sync as sync;

pub use engine::{SyncEngine, SyncMetrics};
pub use monitor::{ConnectivityProbe, MonitorConfig, MutationQueue, OnlineMonitor, RealtimeChannel};
pub use notify::{LogNotifier, MemoryNotifier, Notification, NotificationLevel, NotificationSink};
pub use orchestrator::{AutoSync, AutoSyncConfig, LifecycleEvent};
pub use prefs::{MemoryPreferences, PreferenceSource, SyncPreferences};
pub use scheduler::{Scheduler, Task, TaskFactory, TimerHandle, TokioScheduler};

pub use fieldsync_core::{
    ConflictRecord, ConflictResolution, EntityKind, EntityPayload, LocalRecord, OwnerId, RecordId,
    SyncMarker,
};
pub use fieldsync_sync::{Result, SyncConfig, SyncError, SyncState, SyncStatus};
