//! Configuration for the sync engine.

use medsync_resilience::{CircuitConfig, RetryConfig};
use std::time::Duration;

/// Configuration for sync operations.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Server URL.
    pub server_url: String,
    /// Retry policy for each queued mutation.
    pub retry: RetryConfig,
    /// Breaker settings for the sync server dependency.
    pub circuit: CircuitConfig,
    /// Interval for periodic background drains. `None` disables the timer;
    /// the worker then only runs on triggers.
    pub sync_interval: Option<Duration>,
    /// Conflicts one entry may hit in a single pass before its record is
    /// deferred to the next pass.
    pub max_rebases_per_pass: u32,
}

impl SyncConfig {
    /// Creates a new sync configuration.
    pub fn new(server_url: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into(),
            retry: RetryConfig::default(),
            circuit: CircuitConfig::default(),
            sync_interval: None,
            max_rebases_per_pass: 1,
        }
    }

    /// Sets the retry configuration.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the sync server breaker configuration.
    pub fn with_circuit(mut self, circuit: CircuitConfig) -> Self {
        self.circuit = circuit;
        self
    }

    /// Sets the sync interval for automatic sync.
    pub fn with_sync_interval(mut self, interval: Duration) -> Self {
        self.sync_interval = Some(interval);
        self
    }

    /// Sets how many rebases one entry may go through in a single pass.
    pub fn with_max_rebases_per_pass(mut self, rebases: u32) -> Self {
        self.max_rebases_per_pass = rebases;
        self
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new("")
    }
}
