//! Shared collaborators of the push and pull engines.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use fieldsync_core::Clock;
use fieldsync_store::{BlobStorage, LocalStore, RemoteStore};

use crate::config::SyncConfig;
use crate::conflicts::ConflictQueue;
use crate::error::{Result, SyncError};
use crate::rate_limit::RateLimiter;
use crate::state::{SyncProgress, SyncStateManager, SyncStatePatch};

/// Cooperative cancellation signal, checked before each batch, page and
/// record.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// `Err(Cancelled)` once cancellation was requested.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(SyncError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Everything a sync pass needs. Cheap to clone.
#[derive(Clone)]
pub struct SyncContext {
    pub local: Arc<dyn LocalStore>,
    pub remote: Arc<dyn RemoteStore>,
    pub blobs: Arc<dyn BlobStorage>,
    pub clock: Arc<dyn Clock>,
    pub config: Arc<SyncConfig>,
    pub limiter: Arc<RateLimiter>,
    pub state: SyncStateManager,
    pub conflicts: ConflictQueue,
    pub cancel: CancelFlag,
}

impl SyncContext {
    /// Build a context with a fresh limiter, state and conflict queue.
    pub fn new(
        local: Arc<dyn LocalStore>,
        remote: Arc<dyn RemoteStore>,
        blobs: Arc<dyn BlobStorage>,
        clock: Arc<dyn Clock>,
        config: SyncConfig,
    ) -> Self {
        let limiter = Arc::new(RateLimiter::new(config.rate_limit_per_minute));
        Self {
            local,
            remote,
            blobs,
            clock,
            config: Arc::new(config),
            limiter,
            state: SyncStateManager::new(),
            conflicts: ConflictQueue::new(),
            cancel: CancelFlag::new(),
        }
    }

    pub(crate) fn report_progress(&self, operation: &str, current: usize, total: usize) {
        self.state.update_state(SyncStatePatch::new().progress(Some(SyncProgress {
            current,
            total,
            operation: operation.to_string(),
        })));
    }
}
