//! Named circuit breakers.

use crate::circuit::{CircuitBreaker, CircuitConfig, CircuitSnapshot};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Breakers keyed by dependency name.
///
/// Owned by the composition root and passed to whatever needs a breaker;
/// there is no process-wide instance.
#[derive(Debug, Default)]
pub struct CircuitRegistry {
    default_config: CircuitConfig,
    breakers: RwLock<HashMap<String, Arc<CircuitBreaker>>>,
}

impl CircuitRegistry {
    /// Creates an empty registry whose lazily created breakers use `default_config`.
    pub fn new(default_config: CircuitConfig) -> Self {
        Self {
            default_config,
            breakers: RwLock::new(HashMap::new()),
        }
    }

    /// Returns the breaker for `dependency`, creating it with the default
    /// configuration on first use.
    pub fn get_or_create(&self, dependency: &str) -> Arc<CircuitBreaker> {
        if let Some(breaker) = self.breakers.read().get(dependency) {
            return Arc::clone(breaker);
        }
        let mut breakers = self.breakers.write();
        Arc::clone(breakers.entry(dependency.to_string()).or_insert_with(|| {
            debug!(dependency, "registering circuit breaker");
            Arc::new(CircuitBreaker::new(dependency, self.default_config.clone()))
        }))
    }

    /// Registers a breaker with an explicit configuration, replacing any
    /// existing breaker for the same dependency.
    pub fn insert(&self, dependency: &str, config: CircuitConfig) -> Arc<CircuitBreaker> {
        let breaker = Arc::new(CircuitBreaker::new(dependency, config));
        self.breakers
            .write()
            .insert(dependency.to_string(), Arc::clone(&breaker));
        breaker
    }

    /// Returns the breaker for `dependency` if one is registered.
    pub fn get(&self, dependency: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.read().get(dependency).cloned()
    }

    /// Returns snapshots of every breaker, sorted by name.
    pub fn snapshots(&self) -> Vec<CircuitSnapshot> {
        let mut snapshots: Vec<_> = self
            .breakers
            .read()
            .values()
            .map(|breaker| breaker.snapshot())
            .collect();
        snapshots.sort_by(|a, b| a.dependency.cmp(&b.dependency));
        snapshots
    }
}
