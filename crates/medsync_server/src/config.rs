//! Server configuration.

use medsync_resilience::CircuitConfig;
use std::time::Duration;

/// Configuration for the record server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Largest accepted request body in bytes.
    pub max_body_size: usize,
    /// Breaker settings for the record store.
    pub database_circuit: CircuitConfig,
}

impl ServerConfig {
    /// Creates a configuration with default limits.
    pub fn new() -> Self {
        Self {
            max_body_size: 1024 * 1024,
            database_circuit: CircuitConfig::new(5).with_cooldown(Duration::from_secs(30)),
        }
    }

    /// Sets the maximum request body size.
    pub fn with_max_body_size(mut self, size: usize) -> Self {
        self.max_body_size = size;
        self
    }

    /// Sets the record store's breaker configuration.
    pub fn with_database_circuit(mut self, config: CircuitConfig) -> Self {
        self.database_circuit = config;
        self
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new()
    }
}
