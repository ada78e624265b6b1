//! Error types for circuit breaking and retry.

use crate::classify::{Classify, ErrorClass};
use std::time::Duration;
use thiserror::Error;

/// A call was rejected because the circuit is open.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("circuit open for {dependency}, retry after {retry_after:?}")]
pub struct CircuitOpenError {
    /// Dependency the breaker guards.
    pub dependency: String,
    /// Time until the breaker admits a trial. Zero while a trial is in flight.
    pub retry_after: Duration,
}

impl Classify for CircuitOpenError {
    fn class(&self) -> ErrorClass {
        // Not worth retrying within this call, but a later pass may succeed.
        ErrorClass::Retryable
    }
}

/// Outcome of a call wrapped by a [`crate::CircuitBreaker`].
#[derive(Error, Debug)]
pub enum CircuitError<E> {
    /// The breaker rejected the call; the wrapped function never ran.
    #[error(transparent)]
    Open(CircuitOpenError),

    /// The wrapped function ran and failed.
    #[error("{0}")]
    Inner(E),
}

/// Failure of a single attempt made by the retry executor.
#[derive(Error, Debug)]
pub enum AttemptError<E> {
    /// The operation returned an error.
    #[error("{0}")]
    Operation(E),

    /// The attempt exceeded its deadline and was abandoned.
    #[error("attempt deadline of {0:?} exceeded")]
    DeadlineExceeded(Duration),
}

impl<E> AttemptError<E> {
    /// Returns the operation error, if the attempt did not time out.
    pub fn into_operation(self) -> Option<E> {
        match self {
            AttemptError::Operation(e) => Some(e),
            AttemptError::DeadlineExceeded(_) => None,
        }
    }
}

impl<E: Classify> Classify for AttemptError<E> {
    fn class(&self) -> ErrorClass {
        match self {
            AttemptError::Operation(e) => e.class(),
            AttemptError::DeadlineExceeded(_) => ErrorClass::Retryable,
        }
    }
}

/// Final failure returned by [`crate::RetryExecutor::execute`].
///
/// Every variant carries the number of times the operation was invoked.
#[derive(Error, Debug)]
pub enum RetryError<E> {
    /// A fatal error; no retry was attempted.
    #[error("fatal error after {attempts} attempt(s): {error}")]
    Fatal {
        /// Invocations made.
        attempts: u32,
        /// The error.
        error: E,
    },

    /// A version conflict; never retried blindly.
    #[error("conflict after {attempts} attempt(s): {error}")]
    Conflict {
        /// Invocations made.
        attempts: u32,
        /// The error.
        error: E,
    },

    /// Every attempt failed with a retryable error.
    #[error("gave up after {attempts} attempt(s): {last}")]
    Exhausted {
        /// Invocations made.
        attempts: u32,
        /// The last attempt's failure.
        last: AttemptError<E>,
    },

    /// The circuit breaker rejected an attempt.
    #[error("circuit open for {dependency} after {attempts} attempt(s)")]
    CircuitOpen {
        /// Invocations made before the rejection.
        attempts: u32,
        /// Dependency the breaker guards.
        dependency: String,
        /// Time until the breaker admits a trial.
        retry_after: Duration,
    },

    /// Cancelled while waiting or while an attempt was in flight.
    #[error("cancelled after {attempts} attempt(s)")]
    Cancelled {
        /// Invocations started.
        attempts: u32,
    },
}

impl<E> RetryError<E> {
    /// Returns the number of invocations made.
    pub fn attempts(&self) -> u32 {
        match self {
            RetryError::Fatal { attempts, .. }
            | RetryError::Conflict { attempts, .. }
            | RetryError::Exhausted { attempts, .. }
            | RetryError::CircuitOpen { attempts, .. }
            | RetryError::Cancelled { attempts } => *attempts,
        }
    }

    /// Returns the underlying operation error, if there is one.
    pub fn into_inner(self) -> Option<E> {
        match self {
            RetryError::Fatal { error, .. } | RetryError::Conflict { error, .. } => Some(error),
            RetryError::Exhausted { last, .. } => last.into_operation(),
            RetryError::CircuitOpen { .. } | RetryError::Cancelled { .. } => None,
        }
    }

    /// Returns true if the breaker rejected the call.
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, RetryError::CircuitOpen { .. })
    }
}

impl<E> Classify for RetryError<E> {
    fn class(&self) -> ErrorClass {
        match self {
            RetryError::Fatal { .. } => ErrorClass::Fatal,
            RetryError::Conflict { .. } => ErrorClass::Conflict,
            RetryError::Exhausted { .. }
            | RetryError::CircuitOpen { .. }
            | RetryError::Cancelled { .. } => ErrorClass::Retryable,
        }
    }
}
