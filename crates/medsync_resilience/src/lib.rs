//! # MedSync Resilience
//!
//! Fault-tolerance building blocks shared by the record server and the sync
//! client.
//!
//! This crate provides:
//! - [`ErrorClass`] and the [`Classify`] trait, with [`ErrorClassifier`] as
//!   the single place HTTP statuses are mapped to classes
//! - [`CircuitBreaker`] (Closed / Open / HalfOpen) and a [`CircuitRegistry`]
//!   of breakers keyed by dependency name
//! - [`RetryExecutor`], bounded exponential backoff that consults the
//!   classifier and routes attempts through a breaker
//! - [`CancellationToken`] for cooperative shutdown
//!
//! ## Failure accounting
//!
//! | Class | Retried | Counts toward the breaker |
//! |-------|---------|---------------------------|
//! | Retryable | yes, up to the budget | yes |
//! | Fatal | no | yes, unless `count_fatal` is off |
//! | Conflict | no | no |

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod cancel;
mod circuit;
mod classify;
mod error;
mod registry;
mod retry;

pub use cancel::CancellationToken;
pub use circuit::{
    CallPermit, CircuitBreaker, CircuitConfig, CircuitEvent, CircuitSnapshot, CircuitState,
};
pub use classify::{Classify, ErrorClass, ErrorClassifier};
pub use error::{AttemptError, CircuitError, CircuitOpenError, RetryError};
pub use registry::CircuitRegistry;
pub use retry::{RetryConfig, RetryExecutor};

/// Well-known dependency names.
pub mod dependencies {
    /// The server's record store.
    pub const DATABASE: &str = "database";
    /// The sync server, as seen from a client.
    pub const SYNC_SERVER: &str = "sync-server";
}
