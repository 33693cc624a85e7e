//! Timers behind a trait, so the orchestrator can run on any clock.

use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;

/// A unit of scheduled work.
pub type Task = BoxFuture<'static, ()>;

/// Produces a fresh task for every tick of a repeating timer.
pub type TaskFactory = Arc<dyn Fn() -> Task + Send + Sync>;

/// Schedules delayed and repeating work.
pub trait Scheduler: Send + Sync {
    /// Run `task` once after `delay`.
    fn schedule(&self, delay: Duration, task: Task) -> TimerHandle;

    /// Run a task from `factory` every `interval`, first after one
    /// interval.
    fn schedule_repeating(&self, interval: Duration, factory: TaskFactory) -> TimerHandle;
}

/// Cancels its timer when cancelled or dropped.
#[must_use = "dropping a TimerHandle cancels the timer"]
pub struct TimerHandle {
    cancel: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl TimerHandle {
    pub fn new(cancel: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// A handle with nothing to cancel.
    pub fn noop() -> Self {
        Self { cancel: None }
    }

    pub fn cancel(mut self) {
        self.cancel_now();
    }

    /// Drop the handle without cancelling the timer.
    pub fn detach(mut self) {
        self.cancel = None;
    }

    fn cancel_now(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for TimerHandle {
    fn drop(&mut self) {
        self.cancel_now();
    }
}

impl std::fmt::Debug for TimerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimerHandle")
            .field("armed", &self.cancel.is_some())
            .finish()
    }
}

/// Scheduler on the tokio runtime. Under a paused test runtime, timers
/// follow virtual time.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioScheduler;

impl Scheduler for TokioScheduler {
    fn schedule(&self, delay: Duration, task: Task) -> TimerHandle {
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            task.await;
        });
        let abort = handle.abort_handle();
        TimerHandle::new(move || abort.abort())
    }

    fn schedule_repeating(&self, interval: Duration, factory: TaskFactory) -> TimerHandle {
        let handle = tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                factory().await;
            }
        });
        let abort = handle.abort_handle();
        TimerHandle::new(move || abort.abort())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counter_task(counter: &Arc<AtomicUsize>) -> Task {
        let counter = counter.clone();
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
        }
        .boxed()
    }

    #[tokio::test(start_paused = true)]
    async fn test_schedule_fires_once_after_delay() {
        let fired = Arc::new(AtomicUsize::new(0));
        let _timer = TokioScheduler.schedule(Duration::from_secs(3), counter_task(&fired));

        tokio::time::sleep(Duration::from_millis(2_900)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_and_drop_stop_timers() {
        let fired = Arc::new(AtomicUsize::new(0));
        let timer = TokioScheduler.schedule(Duration::from_secs(1), counter_task(&fired));
        timer.cancel();
        {
            let _dropped = TokioScheduler.schedule(Duration::from_secs(1), counter_task(&fired));
        }
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeating_until_cancelled() {
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        let factory: TaskFactory = Arc::new(move || counter_task(&counter));
        let timer = TokioScheduler.schedule_repeating(Duration::from_secs(60), factory);

        tokio::time::sleep(Duration::from_secs(185)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 3);

        timer.cancel();
        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 3);
    }
}
