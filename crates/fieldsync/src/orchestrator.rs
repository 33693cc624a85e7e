//! Automatic sync driven by lifecycle events and user preferences.
//!
//! [`AutoSync`] decides *when* the engine runs:
//!
//! - one pull after sign-in ([`AutoSync::on_authenticated`])
//! - a debounced push after local edits ([`AutoSync::trigger_debounced_sync`])
//! - a periodic pull while the app is visible and online
//! - a best-effort push when the app is hidden or closed
//!
//! Timers go through a [`Scheduler`], so tests drive everything on virtual
//! time.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use futures::FutureExt;
use parking_lot::Mutex;

use fieldsync_store::LocalStoreExt;
use fieldsync_sync::{Subscription, SyncError, SyncStatePatch, SyncStatus};

use crate::engine::SyncEngine;
use crate::prefs::PreferenceSource;
use crate::scheduler::{Scheduler, TaskFactory, TimerHandle};

/// Platform lifecycle signals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    Visible,
    Hidden,
    /// The page is being hidden; `persisted` means it may be resumed from
    /// the back/forward cache.
    PageHide { persisted: bool },
    Unload,
    Online,
    Offline,
}

/// Timing knobs for [`AutoSync`].
#[derive(Debug, Clone)]
pub struct AutoSyncConfig {
    /// Quiet period after the last local edit before pushing.
    pub debounce: Duration,
    /// Delay before the push that follows hide or unload.
    pub exit_flush_delay: Duration,
    /// How long a boot pull error stays in the sync state.
    pub boot_error_ttl: Duration,
}

impl Default for AutoSyncConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_secs(3),
            exit_flush_delay: Duration::from_millis(2_500),
            boot_error_ttl: Duration::from_secs(5),
        }
    }
}

impl AutoSyncConfig {
    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    pub fn with_exit_flush_delay(mut self, delay: Duration) -> Self {
        self.exit_flush_delay = delay;
        self
    }

    pub fn with_boot_error_ttl(mut self, ttl: Duration) -> Self {
        self.boot_error_ttl = ttl;
        self
    }
}

#[derive(Default)]
struct Timers {
    debounce: Option<TimerHandle>,
    periodic: Option<TimerHandle>,
    exit_flush: Option<TimerHandle>,
    boot_error: Option<TimerHandle>,
}

impl Timers {
    fn clear(&mut self) {
        self.debounce = None;
        self.periodic = None;
        self.exit_flush = None;
        self.boot_error = None;
    }
}

struct Inner {
    engine: Arc<SyncEngine>,
    scheduler: Arc<dyn Scheduler>,
    prefs: Arc<dyn PreferenceSource>,
    config: AutoSyncConfig,
    timers: Mutex<Timers>,
    state_subscription: Mutex<Option<Subscription>>,
    active: AtomicBool,
    visible: AtomicBool,
    online: AtomicBool,
    boot_pulled: AtomicBool,
    exit_flush_pending: AtomicBool,
}

/// Lifecycle-driven sync policy over a [`SyncEngine`].
#[derive(Clone)]
pub struct AutoSync {
    inner: Arc<Inner>,
}

impl AutoSync {
    pub fn new(
        engine: Arc<SyncEngine>,
        scheduler: Arc<dyn Scheduler>,
        prefs: Arc<dyn PreferenceSource>,
    ) -> Self {
        Self::with_config(engine, scheduler, prefs, AutoSyncConfig::default())
    }

    pub fn with_config(
        engine: Arc<SyncEngine>,
        scheduler: Arc<dyn Scheduler>,
        prefs: Arc<dyn PreferenceSource>,
        config: AutoSyncConfig,
    ) -> Self {
        let online = engine.state().is_online();
        Self {
            inner: Arc::new(Inner {
                engine,
                scheduler,
                prefs,
                config,
                timers: Mutex::new(Timers::default()),
                state_subscription: Mutex::new(None),
                active: AtomicBool::new(false),
                visible: AtomicBool::new(true),
                online: AtomicBool::new(online),
                boot_pulled: AtomicBool::new(false),
                exit_flush_pending: AtomicBool::new(false),
            }),
        }
    }

    pub fn engine(&self) -> &Arc<SyncEngine> {
        &self.inner.engine
    }

    /// Start watching connectivity and arm the periodic pull.
    pub fn initialize(&self) {
        if self.inner.active.swap(true, Ordering::SeqCst) {
            return;
        }

        let weak = Arc::downgrade(&self.inner);
        let subscription = self.inner.engine.subscribe(move |state| {
            let Some(inner) = weak.upgrade() else { return };
            if inner.online.swap(state.is_online, Ordering::SeqCst) != state.is_online {
                tracing::debug!(online = state.is_online, "connectivity changed");
                Inner::update_periodic_sync(&inner);
            }
        });
        *self.inner.state_subscription.lock() = Some(subscription);

        Inner::update_periodic_sync(&self.inner);
        tracing::debug!("auto sync initialized");
    }

    /// Run the boot pull, once per orchestrator. Returns whether a pull was
    /// attempted.
    ///
    /// Failures land in the sync state and are cleared after
    /// [`AutoSyncConfig::boot_error_ttl`].
    pub async fn on_authenticated(&self) -> bool {
        let inner = &self.inner;
        if !inner.prefs.current().auto_pull_on_start {
            return false;
        }
        if inner.boot_pulled.swap(true, Ordering::SeqCst) {
            return false;
        }

        match inner.engine.sync_pull().await {
            Ok(report) => {
                tracing::info!(pulled = report.total_pulled(), "boot pull complete");
            }
            Err(e) => {
                tracing::warn!(error = %e, "boot pull failed");
                let message = e.to_string();
                inner
                    .engine
                    .state()
                    .update_state(SyncStatePatch::new().last_error(Some(message.clone())));
                Inner::schedule_boot_error_clear(inner, message);
            }
        }
        true
    }

    /// Push soon. Each call restarts the quiet period.
    pub fn trigger_debounced_sync(&self) {
        let weak = Arc::downgrade(&self.inner);
        let timer = self.inner.scheduler.schedule(
            self.inner.config.debounce,
            async move {
                if let Some(inner) = weak.upgrade() {
                    tokio::spawn(Inner::push_if_needed(inner));
                }
            }
            .boxed(),
        );
        self.inner.timers.lock().debounce = Some(timer);
    }

    /// Deliver a lifecycle event.
    pub fn handle_lifecycle(&self, event: LifecycleEvent) {
        let inner = &self.inner;
        tracing::debug!(?event, "lifecycle event");
        match event {
            LifecycleEvent::Visible => {
                inner.visible.store(true, Ordering::SeqCst);
                Inner::update_periodic_sync(inner);
            }
            LifecycleEvent::Hidden => {
                inner.visible.store(false, Ordering::SeqCst);
                Inner::update_periodic_sync(inner);
                Inner::schedule_exit_flush(inner);
            }
            LifecycleEvent::PageHide { persisted: true } => {}
            LifecycleEvent::PageHide { persisted: false } | LifecycleEvent::Unload => {
                Inner::schedule_exit_flush(inner);
            }
            LifecycleEvent::Online => {
                inner.engine.set_online(true);
            }
            LifecycleEvent::Offline => {
                inner.engine.set_online(false);
            }
        }
    }

    /// Re-read the periodic pull preferences and re-arm the timer.
    pub fn update_periodic_sync(&self) {
        Inner::update_periodic_sync(&self.inner);
    }

    /// Whether the periodic pull timer is armed.
    pub fn is_periodic_armed(&self) -> bool {
        self.inner.timers.lock().periodic.is_some()
    }

    /// Stop every timer and listener. Safe to call more than once.
    pub fn cleanup(&self) {
        let was_active = self.inner.active.swap(false, Ordering::SeqCst);
        let subscription = self.inner.state_subscription.lock().take();
        drop(subscription);
        self.inner.timers.lock().clear();
        self.inner.exit_flush_pending.store(false, Ordering::SeqCst);
        if was_active {
            tracing::debug!("auto sync stopped");
        }
    }
}

impl Inner {
    fn update_periodic_sync(inner: &Arc<Inner>) {
        let prefs = inner.prefs.current();
        let wanted = inner.active.load(Ordering::SeqCst)
            && prefs.periodic_pull_enabled
            && inner.visible.load(Ordering::SeqCst)
            && inner.online.load(Ordering::SeqCst);

        let timer = wanted.then(|| {
            let weak = Arc::downgrade(inner);
            let factory: TaskFactory = Arc::new(move || {
                let weak: Weak<Inner> = weak.clone();
                async move {
                    if let Some(inner) = weak.upgrade() {
                        tokio::spawn(Inner::pull_if_possible(inner));
                    }
                }
                .boxed()
            });
            inner
                .scheduler
                .schedule_repeating(prefs.periodic_interval(), factory)
        });

        // Swap under the lock, drop the old timer outside it.
        let previous = std::mem::replace(&mut inner.timers.lock().periodic, timer);
        drop(previous);
    }

    fn schedule_exit_flush(inner: &Arc<Inner>) {
        if !inner.prefs.current().auto_push_on_exit {
            return;
        }
        if inner.exit_flush_pending.swap(true, Ordering::SeqCst) {
            return;
        }

        let weak = Arc::downgrade(inner);
        let timer = inner.scheduler.schedule(
            inner.config.exit_flush_delay,
            async move {
                if let Some(inner) = weak.upgrade() {
                    inner.exit_flush_pending.store(false, Ordering::SeqCst);
                    tokio::spawn(Inner::push_if_needed(inner));
                }
            }
            .boxed(),
        );
        inner.timers.lock().exit_flush = Some(timer);
    }

    fn schedule_boot_error_clear(inner: &Arc<Inner>, message: String) {
        let weak = Arc::downgrade(inner);
        let timer = inner.scheduler.schedule(
            inner.config.boot_error_ttl,
            async move {
                let Some(inner) = weak.upgrade() else { return };
                let state = inner.engine.state();
                let current = state.current();
                if current.last_error.as_deref() != Some(message.as_str()) {
                    return;
                }
                let mut patch = SyncStatePatch::new().last_error(None);
                if current.status == SyncStatus::Error {
                    patch = patch.status(SyncStatus::Idle);
                }
                state.update_state(patch);
            }
            .boxed(),
        );
        inner.timers.lock().boot_error = Some(timer);
    }

    async fn push_if_needed(inner: Arc<Inner>) {
        let engine = &inner.engine;
        if !engine.state().is_online() || engine.is_syncing() {
            return;
        }
        match engine.local().count_all_pending().await {
            Ok(0) => return,
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(error = %e, "could not count pending records");
                return;
            }
        }

        match engine.sync_push().await {
            Ok(report) => tracing::debug!(pushed = report.total_pushed(), "background push complete"),
            Err(SyncError::AlreadySyncing) => {}
            Err(e) => tracing::warn!(error = %e, "background push failed"),
        }
    }

    async fn pull_if_possible(inner: Arc<Inner>) {
        let engine = &inner.engine;
        if !engine.state().is_online() || engine.is_syncing() {
            return;
        }
        match engine.sync_pull().await {
            Ok(report) => tracing::debug!(pulled = report.total_pulled(), "periodic pull complete"),
            Err(SyncError::AlreadySyncing) => {}
            Err(e) => tracing::warn!(error = %e, "periodic pull failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prefs::{MemoryPreferences, SyncPreferences};
    use crate::scheduler::TokioScheduler;
    use fieldsync_core::{Contact, EntityKind, EntityPayload, ManualClock, RecordId};
    use fieldsync_store::{MemoryBlobStorage, MemoryLocalStore, MemoryRemoteStore};
    use fieldsync_sync::{SyncConfig, SyncState};

    struct Harness {
        auto: AutoSync,
        prefs: Arc<MemoryPreferences>,
        local: Arc<MemoryLocalStore>,
        remote: Arc<MemoryRemoteStore>,
        states: Arc<Mutex<Vec<SyncState>>>,
        _subscription: Subscription,
    }

    impl Harness {
        fn new(prefs: SyncPreferences) -> Self {
            let local = Arc::new(MemoryLocalStore::new());
            let remote = Arc::new(MemoryRemoteStore::new());
            let engine = Arc::new(SyncEngine::with_clock(
                local.clone(),
                remote.clone(),
                Arc::new(MemoryBlobStorage::new()),
                Arc::new(ManualClock::new(10_000)),
                SyncConfig::new("t1"),
            ));
            let states = Arc::new(Mutex::new(Vec::new()));
            let sink = states.clone();
            let subscription = engine.subscribe(move |state| sink.lock().push(state.clone()));
            let prefs = Arc::new(MemoryPreferences::new(prefs));
            let auto = AutoSync::new(engine, Arc::new(TokioScheduler), prefs.clone());
            Self {
                auto,
                prefs,
                local,
                remote,
                states,
                _subscription: subscription,
            }
        }

        async fn dirty_contacts(&self, n: usize) {
            for i in 0..n {
                let payload = EntityPayload::Contact(Contact {
                    project_id: None,
                    name: format!("Contact {i}"),
                    email: None,
                    phone: None,
                    role: None,
                });
                self.local
                    .save_local(RecordId::new(format!("c{i}")), payload, 1_000 + i as i64)
                    .await
                    .unwrap();
            }
        }

        /// Number of times the status entered `Syncing`.
        fn sync_runs(&self) -> usize {
            let states = self.states.lock();
            states
                .windows(2)
                .filter(|w| w[0].status != SyncStatus::Syncing && w[1].status == SyncStatus::Syncing)
                .count()
        }
    }

    fn quiet_prefs() -> SyncPreferences {
        SyncPreferences {
            periodic_pull_enabled: false,
            ..SyncPreferences::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_boot_pull_runs_once() {
        let h = Harness::new(quiet_prefs());
        h.auto.initialize();

        assert!(h.auto.on_authenticated().await);
        assert!(!h.auto.on_authenticated().await);

        assert_eq!(h.remote.select_calls(), EntityKind::ALL.len());
        assert_eq!(h.sync_runs(), 1);
        let state = h.auto.engine().state().current();
        assert_eq!(state.status, SyncStatus::Idle);
        assert!(state.last_sync_at.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_boot_pull_disabled() {
        let h = Harness::new(SyncPreferences {
            auto_pull_on_start: false,
            ..quiet_prefs()
        });
        h.auto.initialize();
        assert!(!h.auto.on_authenticated().await);
        assert_eq!(h.remote.select_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_boot_pull_error_clears_after_ttl() {
        let h = Harness::new(quiet_prefs());
        h.auto.initialize();
        h.auto.handle_lifecycle(LifecycleEvent::Offline);

        assert!(h.auto.on_authenticated().await);
        assert_eq!(
            h.auto.engine().state().current().last_error.as_deref(),
            Some("offline")
        );

        tokio::time::sleep(Duration::from_millis(5_100)).await;
        assert_eq!(h.auto.engine().state().current().last_error, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_debounced_push_waits_for_quiet_period() {
        let h = Harness::new(quiet_prefs());
        h.auto.initialize();
        h.dirty_contacts(2).await;

        h.auto.trigger_debounced_sync();
        tokio::time::sleep(Duration::from_secs(1)).await;
        h.auto.trigger_debounced_sync();
        tokio::time::sleep(Duration::from_millis(2_900)).await;
        assert_eq!(h.remote.upsert_calls(), 0);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(h.remote.row_count("contacts"), 2);
        assert_eq!(h.sync_runs(), 1);
        assert_eq!(h.auto.engine().state().current().pending_push, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_debounced_push_skips_when_nothing_pending() {
        let h = Harness::new(quiet_prefs());
        h.auto.initialize();
        h.auto.trigger_debounced_sync();
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(h.sync_runs(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hidden_flushes_exactly_once() {
        let h = Harness::new(quiet_prefs());
        h.auto.initialize();
        h.dirty_contacts(3).await;

        h.auto.handle_lifecycle(LifecycleEvent::Hidden);
        h.auto.handle_lifecycle(LifecycleEvent::PageHide { persisted: false });
        h.auto.handle_lifecycle(LifecycleEvent::Unload);
        tokio::time::sleep(Duration::from_secs(3)).await;

        assert_eq!(h.sync_runs(), 1);
        assert_eq!(h.remote.row_count("contacts"), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_persisted_page_hide_does_not_flush() {
        let h = Harness::new(quiet_prefs());
        h.auto.initialize();
        h.dirty_contacts(1).await;

        h.auto.handle_lifecycle(LifecycleEvent::PageHide { persisted: true });
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(h.sync_runs(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_periodic_pull_follows_visibility_and_connectivity() {
        let h = Harness::new(SyncPreferences {
            periodic_pull_interval: 1,
            ..quiet_prefs()
        });
        h.prefs.update(|p| p.periodic_pull_enabled = true);
        h.auto.initialize();
        assert!(h.auto.is_periodic_armed());

        tokio::time::sleep(Duration::from_secs(61)).await;
        assert_eq!(h.sync_runs(), 1);

        h.auto.handle_lifecycle(LifecycleEvent::Hidden);
        assert!(!h.auto.is_periodic_armed());
        tokio::time::sleep(Duration::from_secs(300)).await;
        assert_eq!(h.sync_runs(), 1);

        h.auto.handle_lifecycle(LifecycleEvent::Visible);
        h.auto.handle_lifecycle(LifecycleEvent::Offline);
        assert!(!h.auto.is_periodic_armed());
        h.auto.handle_lifecycle(LifecycleEvent::Online);
        assert!(h.auto.is_periodic_armed());

        h.prefs.update(|p| p.periodic_pull_enabled = false);
        h.auto.update_periodic_sync();
        assert!(!h.auto.is_periodic_armed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cleanup_is_idempotent_and_stops_timers() {
        let h = Harness::new(SyncPreferences::default());
        h.auto.initialize();
        h.dirty_contacts(1).await;
        h.auto.trigger_debounced_sync();

        h.auto.cleanup();
        h.auto.cleanup();
        assert!(!h.auto.is_periodic_armed());

        tokio::time::sleep(Duration::from_secs(3_600)).await;
        assert_eq!(h.sync_runs(), 0);
    }
}
