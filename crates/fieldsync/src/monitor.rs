//! Connectivity watchdog.
//!
//! Connectivity events arrive through [`OnlineMonitor::handle_connectivity`];
//! a poll against a [`ConnectivityProbe`] catches transitions whose events
//! were missed. Coming back online reconnects the realtime channel at once
//! and, after a debounce, flushes pending work with a full sync.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use parking_lot::Mutex;

use fieldsync_store::RemoteResult;

use crate::engine::SyncEngine;
use crate::notify::{Notification, NotificationSink};
use crate::scheduler::{Scheduler, TaskFactory, TimerHandle};

/// Answers "are we online right now?".
#[async_trait]
pub trait ConnectivityProbe: Send + Sync {
    async fn is_online(&self) -> bool;
}

/// A live notification channel from the backend.
#[async_trait]
pub trait RealtimeChannel: Send + Sync {
    async fn reconnect(&self) -> RemoteResult<()>;
}

/// Mutations queued by the application while offline.
#[async_trait]
pub trait MutationQueue: Send + Sync {
    /// Apply queued mutations to the local store. Returns how many were
    /// applied.
    async fn drain(&self) -> fieldsync_sync::Result<usize>;
}

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub poll_interval: Duration,
    /// Time connectivity must hold before the reconnect sync starts.
    pub reconnect_debounce: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(30),
            reconnect_debounce: Duration::from_millis(2_000),
        }
    }
}

impl MonitorConfig {
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_reconnect_debounce(mut self, debounce: Duration) -> Self {
        self.reconnect_debounce = debounce;
        self
    }
}

/// Resets the reconnect flag when the flow ends.
struct FlowGuard<'a>(&'a AtomicBool);

impl Drop for FlowGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Watches connectivity and drives reconnect syncs.
///
/// Shared as `Arc<OnlineMonitor>`; scheduled work holds only a weak
/// reference, so dropping the last `Arc` stops everything.
pub struct OnlineMonitor {
    engine: Arc<SyncEngine>,
    scheduler: Arc<dyn Scheduler>,
    notifier: Arc<dyn NotificationSink>,
    probe: Option<Arc<dyn ConnectivityProbe>>,
    realtime: Option<Arc<dyn RealtimeChannel>>,
    queue: Option<Arc<dyn MutationQueue>>,
    config: MonitorConfig,
    reconnect_timer: Mutex<Option<TimerHandle>>,
    poll_timer: Mutex<Option<TimerHandle>>,
    reconnecting: AtomicBool,
}

impl OnlineMonitor {
    pub fn new(
        engine: Arc<SyncEngine>,
        scheduler: Arc<dyn Scheduler>,
        notifier: Arc<dyn NotificationSink>,
    ) -> Self {
        Self {
            engine,
            scheduler,
            notifier,
            probe: None,
            realtime: None,
            queue: None,
            config: MonitorConfig::default(),
            reconnect_timer: Mutex::new(None),
            poll_timer: Mutex::new(None),
            reconnecting: AtomicBool::new(false),
        }
    }

    pub fn with_probe(mut self, probe: Arc<dyn ConnectivityProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    pub fn with_realtime(mut self, channel: Arc<dyn RealtimeChannel>) -> Self {
        self.realtime = Some(channel);
        self
    }

    pub fn with_mutation_queue(mut self, queue: Arc<dyn MutationQueue>) -> Self {
        self.queue = Some(queue);
        self
    }

    pub fn with_config(mut self, config: MonitorConfig) -> Self {
        self.config = config;
        self
    }

    /// Whether a reconnect debounce is waiting to fire.
    pub fn reconnect_pending(&self) -> bool {
        self.reconnect_timer.lock().is_some()
    }

    /// Handle a connectivity transition.
    pub async fn handle_connectivity(self: &Arc<Self>, online: bool) {
        if online {
            self.went_online().await;
        } else {
            self.went_offline();
        }
    }

    async fn went_online(self: &Arc<Self>) {
        tracing::info!("connectivity restored");
        self.engine.set_online(true);

        if let Some(channel) = &self.realtime {
            if let Err(e) = channel.reconnect().await {
                tracing::warn!(error = %e, "realtime reconnect failed");
            }
        }

        let weak = Arc::downgrade(self);
        let timer = self.scheduler.schedule(
            self.config.reconnect_debounce,
            async move {
                if let Some(monitor) = weak.upgrade() {
                    let fired = monitor.reconnect_timer.lock().take();
                    if let Some(timer) = fired {
                        timer.detach();
                    }
                    tokio::spawn(async move { monitor.reconnect_sync().await });
                }
            }
            .boxed(),
        );
        let previous = self.reconnect_timer.lock().replace(timer);
        drop(previous);
    }

    fn went_offline(&self) {
        tracing::info!("connectivity lost");
        let pending = self.reconnect_timer.lock().take();
        drop(pending);

        self.engine.set_online(false);
        self.notifier.notify(Notification::warning(
            "You are offline. Changes are saved locally and will sync when you reconnect.",
        ));
    }

    async fn reconnect_sync(&self) {
        if self.reconnecting.swap(true, Ordering::SeqCst) {
            tracing::debug!("reconnect sync already running");
            return;
        }
        let _guard = FlowGuard(&self.reconnecting);

        if !self.engine.state().is_online() {
            return;
        }

        let pending = match self.engine.refresh_pending_count().await {
            Ok(pending) => pending,
            Err(e) => {
                tracing::warn!(error = %e, "could not count pending records");
                0
            }
        };

        if pending == 0 {
            self.notifier.notify(Notification::success("Back online."));
            return;
        }

        self.notifier.notify(Notification::info(format!(
            "Back online. Syncing {pending} pending change(s)..."
        )));

        if let Some(queue) = &self.queue {
            match queue.drain().await {
                Ok(applied) => tracing::debug!(applied, "mutation queue drained"),
                Err(e) => tracing::warn!(error = %e, "mutation queue drain failed"),
            }
        }

        match self.engine.full_sync().await {
            Ok(metrics) => {
                self.notifier.notify(Notification::success(format!(
                    "Sync complete: {} sent, {} received.",
                    metrics.push.total_pushed(),
                    metrics.pull.total_pulled()
                )));
            }
            Err(e) => {
                self.notifier
                    .notify(Notification::error(format!("Sync failed: {e}")));
            }
        }
    }

    /// Ask the probe for connectivity and act on a change. Returns the
    /// current connectivity.
    pub async fn poll(self: &Arc<Self>) -> bool {
        let known = self.engine.state().is_online();
        let Some(probe) = &self.probe else {
            return known;
        };

        let online = probe.is_online().await;
        if online != known {
            tracing::debug!(online, "poll detected connectivity change");
            self.handle_connectivity(online).await;
        }
        online
    }

    /// Start polling every [`MonitorConfig::poll_interval`].
    pub fn start(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        let factory: TaskFactory = Arc::new(move || {
            let weak = weak.clone();
            async move {
                if let Some(monitor) = weak.upgrade() {
                    tokio::spawn(async move {
                        monitor.poll().await;
                    });
                }
            }
            .boxed()
        });
        let timer = self
            .scheduler
            .schedule_repeating(self.config.poll_interval, factory);
        let previous = self.poll_timer.lock().replace(timer);
        drop(previous);
    }

    /// Stop polling and drop any pending reconnect.
    pub fn stop(&self) {
        let poll = self.poll_timer.lock().take();
        let reconnect = self.reconnect_timer.lock().take();
        drop((poll, reconnect));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    use crate::notify::{MemoryNotifier, NotificationLevel};
    use crate::scheduler::TokioScheduler;
    use fieldsync_core::{Contact, EntityPayload, ManualClock, RecordId};
    use fieldsync_store::{LocalStoreExt, MemoryBlobStorage, MemoryLocalStore, MemoryRemoteStore};
    use fieldsync_sync::SyncConfig;

    #[derive(Default)]
    struct CountingQueue {
        drains: AtomicUsize,
        delay: Duration,
    }

    #[async_trait]
    impl MutationQueue for CountingQueue {
        async fn drain(&self) -> fieldsync_sync::Result<usize> {
            self.drains.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            Ok(0)
        }
    }

    #[derive(Default)]
    struct CountingChannel {
        reconnects: AtomicUsize,
    }

    #[async_trait]
    impl RealtimeChannel for CountingChannel {
        async fn reconnect(&self) -> RemoteResult<()> {
            self.reconnects.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct SwitchProbe(AtomicBool);

    #[async_trait]
    impl ConnectivityProbe for SwitchProbe {
        async fn is_online(&self) -> bool {
            self.0.load(Ordering::SeqCst)
        }
    }

    struct Harness {
        monitor: Arc<OnlineMonitor>,
        engine: Arc<SyncEngine>,
        remote: Arc<MemoryRemoteStore>,
        local: Arc<MemoryLocalStore>,
        notifier: Arc<MemoryNotifier>,
        queue: Arc<CountingQueue>,
        channel: Arc<CountingChannel>,
    }

    fn harness(queue_delay: Duration) -> Harness {
        let local = Arc::new(MemoryLocalStore::new());
        let remote = Arc::new(MemoryRemoteStore::new());
        let engine = Arc::new(SyncEngine::with_clock(
            local.clone(),
            remote.clone(),
            Arc::new(MemoryBlobStorage::new()),
            Arc::new(ManualClock::new(10_000)),
            SyncConfig::new("t1"),
        ));
        let notifier = Arc::new(MemoryNotifier::new());
        let queue = Arc::new(CountingQueue {
            delay: queue_delay,
            ..Default::default()
        });
        let channel = Arc::new(CountingChannel::default());
        let monitor = Arc::new(
            OnlineMonitor::new(engine.clone(), Arc::new(TokioScheduler), notifier.clone())
                .with_realtime(channel.clone())
                .with_mutation_queue(queue.clone()),
        );
        Harness {
            monitor,
            engine,
            remote,
            local,
            notifier,
            queue,
            channel,
        }
    }

    async fn dirty_contacts(local: &MemoryLocalStore, n: usize) {
        for i in 0..n {
            let payload = EntityPayload::Contact(Contact {
                project_id: None,
                name: format!("Contact {i}"),
                email: None,
                phone: None,
                role: None,
            });
            local
                .save_local(RecordId::new(format!("c{i}")), payload, 1_000)
                .await
                .unwrap();
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_offline_within_debounce_cancels_reconnect_sync() {
        let h = harness(Duration::ZERO);
        dirty_contacts(&h.local, 3).await;
        h.engine.set_online(false);

        h.monitor.handle_connectivity(true).await;
        assert_eq!(h.channel.reconnects.load(Ordering::SeqCst), 1);
        assert!(h.monitor.reconnect_pending());

        tokio::time::sleep(Duration::from_millis(1_500)).await;
        h.monitor.handle_connectivity(false).await;
        assert!(!h.monitor.reconnect_pending());

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(h.queue.drains.load(Ordering::SeqCst), 0);
        assert_eq!(h.remote.upsert_calls(), 0);
        assert_eq!(h.notifier.all().last().map(|n| n.level), Some(NotificationLevel::Warning));
    }

    #[tokio::test(start_paused = true)]
    async fn test_staying_online_drains_and_syncs_once() {
        let h = harness(Duration::ZERO);
        dirty_contacts(&h.local, 3).await;
        h.engine.set_online(false);

        h.monitor.handle_connectivity(true).await;
        tokio::time::sleep(Duration::from_millis(2_100)).await;

        assert_eq!(h.queue.drains.load(Ordering::SeqCst), 1);
        assert_eq!(h.remote.row_count("contacts"), 3);
        assert_eq!(h.engine.state().current().pending_push, 0);
        assert!(!h.monitor.reconnect_pending());

        let levels: Vec<_> = h.notifier.all().into_iter().map(|n| n.level).collect();
        assert_eq!(levels, vec![NotificationLevel::Info, NotificationLevel::Success]);

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(h.queue.drains.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_nothing_pending_only_acknowledges() {
        let h = harness(Duration::ZERO);
        h.monitor.handle_connectivity(true).await;
        tokio::time::sleep(Duration::from_millis(2_100)).await;

        assert_eq!(h.queue.drains.load(Ordering::SeqCst), 0);
        assert_eq!(h.remote.select_calls(), 0);
        assert_eq!(h.notifier.take(), vec![Notification::success("Back online.")]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_flow_in_flight_is_not_repeated() {
        let h = harness(Duration::from_secs(10));
        dirty_contacts(&h.local, 1).await;

        h.monitor.handle_connectivity(true).await;
        tokio::time::sleep(Duration::from_millis(2_100)).await;
        assert_eq!(h.queue.drains.load(Ordering::SeqCst), 1);

        // First flow is still draining.
        h.monitor.handle_connectivity(true).await;
        tokio::time::sleep(Duration::from_millis(2_100)).await;
        assert_eq!(h.queue.drains.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(h.remote.row_count("contacts"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_detects_missed_transition() {
        let h = harness(Duration::ZERO);
        let probe = Arc::new(SwitchProbe(AtomicBool::new(true)));
        let monitor = Arc::new(
            OnlineMonitor::new(h.engine.clone(), Arc::new(TokioScheduler), h.notifier.clone())
                .with_probe(probe.clone()),
        );
        monitor.start();

        probe.0.store(false, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(31)).await;
        assert!(!h.engine.state().current().is_online);

        monitor.stop();
        probe.0.store(true, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert!(!h.engine.state().current().is_online);

        assert!(monitor.poll().await);
        assert!(h.engine.state().current().is_online);
    }
}
