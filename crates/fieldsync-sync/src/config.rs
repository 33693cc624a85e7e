//! Sync configuration.

use std::time::Duration;

use fieldsync_core::OwnerId;

use crate::retry::RetryPolicy;

/// Configuration for push and pull behavior.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Tenant whose rows are pushed and pulled.
    pub owner_id: OwnerId,
    /// Records per push batch.
    pub push_batch_size: usize,
    /// Rows per pull page.
    pub pull_page_size: usize,
    /// Remote calls allowed per operation per minute.
    pub rate_limit_per_minute: u32,
    /// Upper bound on any single remote call.
    pub request_timeout: Duration,
    /// Retry policy for remote store calls.
    pub network_retry: RetryPolicy,
    /// Retry policy for blob uploads.
    pub storage_retry: RetryPolicy,
}

impl SyncConfig {
    pub fn new(owner_id: impl Into<String>) -> Self {
        Self {
            owner_id: OwnerId::new(owner_id),
            push_batch_size: 50,
            pull_page_size: 100,
            rate_limit_per_minute: 100,
            request_timeout: Duration::from_secs(30),
            network_retry: RetryPolicy::network(),
            storage_retry: RetryPolicy::storage(),
        }
    }

    pub fn with_push_batch_size(mut self, size: usize) -> Self {
        self.push_batch_size = size.max(1);
        self
    }

    pub fn with_pull_page_size(mut self, size: usize) -> Self {
        self.pull_page_size = size.max(1);
        self
    }

    pub fn with_rate_limit(mut self, per_minute: u32) -> Self {
        self.rate_limit_per_minute = per_minute;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_network_retry(mut self, policy: RetryPolicy) -> Self {
        self.network_retry = policy;
        self
    }

    pub fn with_storage_retry(mut self, policy: RetryPolicy) -> Self {
        self.storage_retry = policy;
        self
    }
}
