//! Self-imposed rate limiting of remote calls.
//!
//! One fixed window per operation name. Reaching the per-window ceiling
//! blocks the operation for an exponentially growing cooldown.

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

/// Cooldown after the first over-limit call.
pub const BASE_COOLDOWN: Duration = Duration::from_millis(1_000);

/// Upper bound on any cooldown.
pub const MAX_COOLDOWN: Duration = Duration::from_millis(64_000);

/// Default window length.
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(60);

/// Answer to a limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    /// How long to wait before checking again, when not allowed.
    pub retry_after: Option<Duration>,
}

impl RateLimitDecision {
    fn allow() -> Self {
        Self {
            allowed: true,
            retry_after: None,
        }
    }

    fn deny(retry_after: Duration) -> Self {
        Self {
            allowed: false,
            retry_after: Some(retry_after),
        }
    }
}

#[derive(Debug)]
struct RateLimitWindow {
    calls: u32,
    window_start: Instant,
    blocked: bool,
    blocked_until: Option<Instant>,
}

impl RateLimitWindow {
    fn new(now: Instant) -> Self {
        Self {
            calls: 0,
            window_start: now,
            blocked: false,
            blocked_until: None,
        }
    }
}

/// Per-operation call limiter.
#[derive(Debug)]
pub struct RateLimiter {
    max_calls: u32,
    window: Duration,
    windows: Mutex<HashMap<String, RateLimitWindow>>,
}

impl RateLimiter {
    /// Allow `max_calls` per operation per minute.
    pub fn new(max_calls: u32) -> Self {
        Self {
            max_calls: max_calls.max(1),
            window: DEFAULT_WINDOW,
            windows: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }

    pub fn max_calls(&self) -> u32 {
        self.max_calls
    }

    /// Record a call attempt for `operation` and say whether it may proceed.
    pub fn check_limit(&self, operation: &str) -> RateLimitDecision {
        let now = Instant::now();
        let mut windows = self.windows.lock();
        let window = windows
            .entry(operation.to_string())
            .or_insert_with(|| RateLimitWindow::new(now));

        if window.blocked {
            match window.blocked_until {
                Some(until) if now < until => return RateLimitDecision::deny(until - now),
                _ => {
                    window.blocked = false;
                    window.blocked_until = None;
                }
            }
        }

        if now.duration_since(window.window_start) >= self.window {
            window.calls = 0;
            window.window_start = now;
        }

        if window.calls >= self.max_calls {
            let excess = window.calls - self.max_calls;
            let cooldown = cooldown_for(excess);
            window.blocked = true;
            window.blocked_until = Some(now + cooldown);
            window.calls += 1;
            tracing::warn!(
                operation,
                calls = window.calls,
                cooldown_ms = cooldown.as_millis() as u64,
                "rate limit reached"
            );
            return RateLimitDecision::deny(cooldown);
        }

        window.calls += 1;
        RateLimitDecision::allow()
    }

    /// Wait until `operation` is allowed, consuming one call.
    pub async fn wait_for_limit(&self, operation: &str) {
        loop {
            let decision = self.check_limit(operation);
            match decision.retry_after {
                Some(delay) if !decision.allowed => tokio::time::sleep(delay).await,
                _ => return,
            }
        }
    }

    /// Wait for the limit, then run `op`.
    pub async fn throttle<T, F, Fut>(&self, operation: &str, op: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        self.wait_for_limit(operation).await;
        op().await
    }

    /// Forget every window and block.
    pub fn reset(&self) {
        self.windows.lock().clear();
    }
}

/// `min(1000ms * 2^excess, 64000ms)`.
pub fn cooldown_for(excess: u32) -> Duration {
    let millis = BASE_COOLDOWN
        .as_millis()
        .saturating_mul(1u128 << excess.min(16));
    Duration::from_millis(millis.min(MAX_COOLDOWN.as_millis()) as u64)
}
