//! Observable sync state.
//!
//! The state manager owns the single [`SyncState`] of an engine. Updates
//! are merged and broadcast to subscribers synchronously. Connectivity is
//! authoritative: once offline, a sync finishing late cannot move the
//! status back to idle or error.

use std::sync::Arc;

use parking_lot::{Mutex, ReentrantMutex};
use serde::Serialize;

use fieldsync_store::{LocalStore, LocalStoreExt};

use crate::error::Result;
use crate::listeners::{Listeners, Subscription};

/// Coarse engine status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    Offline,
    Idle,
    Syncing,
    Error,
}

/// Progress of the running sync.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncProgress {
    pub current: usize,
    pub total: usize,
    pub operation: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncState {
    pub status: SyncStatus,
    pub is_online: bool,
    /// Records awaiting push, as of the last refresh.
    pub pending_push: usize,
    /// End of the last successful sync, epoch milliseconds.
    pub last_sync_at: Option<i64>,
    pub last_error: Option<String>,
    pub progress: Option<SyncProgress>,
}

impl Default for SyncState {
    fn default() -> Self {
        Self {
            status: SyncStatus::Idle,
            is_online: true,
            pending_push: 0,
            last_sync_at: None,
            last_error: None,
            progress: None,
        }
    }
}

/// A partial update. Unset fields are left alone.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncStatePatch {
    pub status: Option<SyncStatus>,
    pub is_online: Option<bool>,
    pub pending_push: Option<usize>,
    pub last_sync_at: Option<Option<i64>>,
    pub last_error: Option<Option<String>>,
    pub progress: Option<Option<SyncProgress>>,
}

impl SyncStatePatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(mut self, status: SyncStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn online(mut self, is_online: bool) -> Self {
        self.is_online = Some(is_online);
        self
    }

    pub fn pending_push(mut self, pending: usize) -> Self {
        self.pending_push = Some(pending);
        self
    }

    pub fn last_sync_at(mut self, at: Option<i64>) -> Self {
        self.last_sync_at = Some(at);
        self
    }

    pub fn last_error(mut self, error: Option<String>) -> Self {
        self.last_error = Some(error);
        self
    }

    pub fn progress(mut self, progress: Option<SyncProgress>) -> Self {
        self.progress = Some(progress);
        self
    }

    fn apply(self, state: &mut SyncState) {
        if let Some(status) = self.status {
            state.status = status;
        }
        if let Some(is_online) = self.is_online {
            state.is_online = is_online;
        }
        if let Some(pending) = self.pending_push {
            state.pending_push = pending;
        }
        if let Some(at) = self.last_sync_at {
            state.last_sync_at = at;
        }
        if let Some(error) = self.last_error {
            state.last_error = error;
        }
        if let Some(progress) = self.progress {
            state.progress = progress;
        }
    }
}

/// Owner of the engine's [`SyncState`].
#[derive(Clone)]
pub struct SyncStateManager {
    state: Arc<Mutex<SyncState>>,
    /// Held from merge through broadcast so listeners see updates in the
    /// order they were applied. Reentrant for listeners that update.
    ordering: Arc<ReentrantMutex<()>>,
    listeners: Listeners<SyncState>,
}

impl Default for SyncStateManager {
    fn default() -> Self {
        Self::new()
    }
}

impl SyncStateManager {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(SyncState::default())),
            ordering: Arc::new(ReentrantMutex::new(())),
            listeners: Listeners::default(),
        }
    }

    /// Snapshot of the current state.
    pub fn current(&self) -> SyncState {
        self.state.lock().clone()
    }

    /// Register `listener`; it is called at once with the current state,
    /// then after every update.
    pub fn subscribe(&self, listener: impl Fn(&SyncState) + Send + Sync + 'static) -> Subscription {
        let _order = self.ordering.lock();
        listener(&self.current());
        self.listeners.add(listener)
    }

    /// Merge `patch` and broadcast the result.
    pub fn update_state(&self, patch: SyncStatePatch) -> SyncState {
        let _order = self.ordering.lock();
        let snapshot = {
            let mut state = self.state.lock();
            patch.apply(&mut state);
            if !state.is_online && matches!(state.status, SyncStatus::Idle | SyncStatus::Error) {
                state.status = SyncStatus::Offline;
            }
            state.clone()
        };
        self.listeners.emit(&snapshot);
        snapshot
    }

    /// Record a connectivity change.
    pub fn set_online(&self, is_online: bool) -> SyncState {
        let _order = self.ordering.lock();
        let current = self.current();
        let mut patch = SyncStatePatch::new().online(is_online);
        if !is_online {
            patch = patch.status(SyncStatus::Offline);
        } else if current.status == SyncStatus::Offline {
            patch = patch.status(SyncStatus::Idle);
        }
        self.update_state(patch)
    }

    pub fn is_syncing(&self) -> bool {
        self.state.lock().status == SyncStatus::Syncing
    }

    pub fn is_online(&self) -> bool {
        self.state.lock().is_online
    }

    /// Recount records awaiting push across every kind.
    pub async fn refresh_pending_count<S: LocalStore + ?Sized>(&self, local: &S) -> Result<usize> {
        let pending = local.count_all_pending().await?;
        self.update_state(SyncStatePatch::new().pending_push(pending));
        Ok(pending)
    }
}
