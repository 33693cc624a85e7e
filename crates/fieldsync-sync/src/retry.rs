//! Retry with exponential backoff.
//!
//! The delay before attempt `k + 1` is
//! `min(initial_delay * backoff_multiplier^(k - 1), max_delay)`, perturbed
//! by a relative jitter and clamped to `max_delay`.

use std::future::Future;
use std::time::Duration;

use rand::Rng;

use fieldsync_store::{RemoteError, RemoteResult};

/// Backoff parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, the first one included.
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
    /// Relative jitter applied to every delay; `0.2` means ±20%.
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
            backoff_multiplier: 2.0,
            jitter: 0.2,
        }
    }
}

impl RetryPolicy {
    /// Policy for calls to the remote store.
    pub fn network() -> Self {
        Self::default()
    }

    /// Policy for blob uploads: more attempts, steeper backoff.
    pub fn storage() -> Self {
        Self {
            max_attempts: 5,
            backoff_multiplier: 3.0,
            ..Self::default()
        }
    }

    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    /// Un-jittered delay after failed attempt `attempt` (1-based).
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1) as i32;
        let secs = self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        let max = self.max_delay.as_secs_f64();
        if secs.is_finite() && secs < max {
            Duration::from_secs_f64(secs.max(0.0))
        } else {
            self.max_delay
        }
    }

    /// Delay after failed attempt `attempt`, with jitter applied.
    pub fn delay_for(&self, attempt: u32, rng: &mut impl Rng) -> Duration {
        let base = self.base_delay(attempt);
        if self.jitter <= 0.0 {
            return base;
        }
        let factor = 1.0 + rng.gen_range(-self.jitter..=self.jitter);
        base.mul_f64(factor).min(self.max_delay)
    }
}

/// A configured retry loop.
///
/// ```rust,no_run
/// # use fieldsync_sync::{Retry, RetryPolicy};
/// # async fn example() -> Result<u32, String> {
/// let policy = RetryPolicy::default();
/// let result = Retry::new(&policy)
///     .on_retry(|attempt, err: &String| eprintln!("attempt {attempt} failed: {err}"))
///     .run(|| async { Ok::<_, String>(7) })
///     .await;
/// result
/// # }
/// ```
pub struct Retry<'a, E> {
    policy: &'a RetryPolicy,
    should_retry: Box<dyn Fn(&E) -> bool + Send + Sync + 'a>,
    on_retry: Option<Box<dyn Fn(u32, &E) + Send + Sync + 'a>>,
}

impl<'a, E> Retry<'a, E> {
    /// Retry every error.
    pub fn new(policy: &'a RetryPolicy) -> Self {
        Self {
            policy,
            should_retry: Box::new(|_| true),
            on_retry: None,
        }
    }

    /// Only retry errors for which `predicate` holds; others fail at once.
    pub fn retry_if(mut self, predicate: impl Fn(&E) -> bool + Send + Sync + 'a) -> Self {
        self.should_retry = Box::new(predicate);
        self
    }

    /// Called between attempts with the failed attempt number and its
    /// error. Not called after the final failure.
    pub fn on_retry(mut self, hook: impl Fn(u32, &E) + Send + Sync + 'a) -> Self {
        self.on_retry = Some(Box::new(hook));
        self
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or
    /// exhausts the policy. Returns the last error.
    pub async fn run<T, F, Fut>(&self, mut op: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    if attempt >= max_attempts || !(self.should_retry)(&err) {
                        return Err(err);
                    }
                    if let Some(hook) = &self.on_retry {
                        hook(attempt, &err);
                    }
                    let delay = self.policy.delay_for(attempt, &mut rand::thread_rng());
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

/// Retry every error under `policy`.
pub async fn retry<T, E, F, Fut>(policy: &RetryPolicy, op: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    Retry::new(policy).run(op).await
}

/// Retry a remote or blob call.
///
/// Each attempt is bounded by `timeout`, an expiry counting as
/// [`RemoteError::Timeout`]. Only errors that
/// [`RemoteError::is_retryable`] are retried.
pub async fn retry_remote<T, F, Fut>(
    policy: &RetryPolicy,
    timeout: Duration,
    operation: &str,
    mut op: F,
) -> RemoteResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = RemoteResult<T>>,
{
    Retry::new(policy)
        .retry_if(RemoteError::is_retryable)
        .on_retry(|attempt, err: &RemoteError| {
            tracing::debug!(operation, attempt, error = %err, "retrying remote call");
        })
        .run(|| {
            let call = op();
            async move {
                match tokio::time::timeout(timeout, call).await {
                    Ok(result) => result,
                    Err(_) => Err(RemoteError::Timeout),
                }
            }
        })
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use tokio::time::Instant;

    #[test]
    fn test_base_delay_grows_and_caps() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.base_delay(1), Duration::from_secs(1));
        assert_eq!(policy.base_delay(2), Duration::from_secs(2));
        assert_eq!(policy.base_delay(3), Duration::from_secs(4));
        assert_eq!(policy.base_delay(5), Duration::from_secs(10));
        assert_eq!(policy.base_delay(60), Duration::from_secs(10));

        let storage = RetryPolicy::storage();
        assert_eq!(storage.max_attempts, 5);
        assert_eq!(storage.base_delay(3), Duration::from_secs(9));
    }

    #[test]
    fn test_jitter_stays_in_band() {
        let policy = RetryPolicy::default();
        let mut rng = rand::thread_rng();
        for attempt in 1..=6 {
            let base = policy.base_delay(attempt).as_secs_f64();
            for _ in 0..50 {
                let d = policy.delay_for(attempt, &mut rng).as_secs_f64();
                assert!(d >= base * 0.8 - 1e-9);
                assert!(d <= base * 1.2 + 1e-9);
                assert!(d <= policy.max_delay.as_secs_f64());
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_fails_twice_then_succeeds() {
        let policy = RetryPolicy::default();
        let calls = AtomicU32::new(0);
        let stamps = Mutex::new(Vec::new());

        let result: Result<&str, String> = retry(&policy, || {
            stamps.lock().push(Instant::now());
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(format!("failure {}", n))
                } else {
                    Ok("done")
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        let stamps = stamps.lock();
        let first = stamps[1] - stamps[0];
        let second = stamps[2] - stamps[1];
        assert!(first <= second);
        assert!(second <= policy.max_delay);
    }

    #[tokio::test(start_paused = true)]
    async fn test_on_retry_between_attempts_only() {
        let policy = RetryPolicy::default();
        let hooks = Arc::new(Mutex::new(Vec::new()));
        let seen = hooks.clone();

        let result: Result<(), u32> = Retry::new(&policy)
            .on_retry(move |attempt, err| seen.lock().push((attempt, *err)))
            .run(|| async { Err(7) })
            .await;

        assert_eq!(result, Err(7));
        assert_eq!(*hooks.lock(), vec![(1, 7), (2, 7)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_remote_fails_fast_on_auth() {
        let calls = AtomicU32::new(0);
        let result: RemoteResult<()> = retry_remote(
            &RetryPolicy::network(),
            Duration::from_secs(30),
            "upsert",
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(RemoteError::from_status(401, "jwt expired")) }
            },
        )
        .await;

        assert!(matches!(result, Err(RemoteError::Unauthorized(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_remote_timeout_is_retried() {
        let calls = AtomicU32::new(0);
        let result: RemoteResult<u8> = retry_remote(
            &RetryPolicy::network(),
            Duration::from_millis(500),
            "select",
            || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n == 0 {
                        tokio::time::sleep(Duration::from_secs(5)).await;
                    }
                    Ok(1)
                }
            },
        )
        .await;

        assert_eq!(result, Ok(1));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_remote_exhausts_on_server_errors() {
        let calls = AtomicU32::new(0);
        let result: RemoteResult<()> = retry_remote(
            &RetryPolicy::network(),
            Duration::from_secs(30),
            "upsert",
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(RemoteError::from_status(503, "unavailable")) }
            },
        )
        .await;

        assert!(result.unwrap_err().is_retryable());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
