//! Circuit breaker.
//!
//! A breaker guards one dependency. It starts `Closed` and passes every call.
//! After `max_failures` consecutive counted failures it opens and rejects
//! calls without running them. Once `cooldown` has elapsed the next caller
//! becomes the single half-open trial: success closes the circuit, failure
//! reopens it and restarts the cooldown.
//!
//! All state lives behind one mutex that is only held for the transition
//! itself, never across the guarded call.

use crate::classify::{Classify, ErrorClass};
use crate::error::{CircuitError, CircuitOpenError};
use parking_lot::Mutex;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{debug, info, warn};

const EVENT_CAPACITY: usize = 64;

/// Breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CircuitState {
    /// Calls pass through.
    Closed,
    /// Calls are rejected.
    Open,
    /// One trial call is admitted.
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half-open",
        })
    }
}

/// Breaker configuration.
///
/// Built with [`CircuitConfig::new`], which keeps the threshold at least 1:
///
/// ```compile_fail
/// use medsync_resilience::CircuitConfig;
/// use std::time::Duration;
///
/// let config = CircuitConfig { max_failures: 0, cooldown: Duration::ZERO, count_fatal: true };
/// ```
#[derive(Debug, Clone)]
pub struct CircuitConfig {
    max_failures: u32,
    cooldown: Duration,
    count_fatal: bool,
}

impl CircuitConfig {
    /// Creates a configuration with the given threshold.
    pub fn new(max_failures: u32) -> Self {
        Self {
            max_failures: max_failures.max(1),
            cooldown: Duration::from_secs(30),
            count_fatal: true,
        }
    }

    /// Sets the cooldown.
    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }

    /// Sets whether fatal errors count toward the threshold.
    pub fn with_count_fatal(mut self, count_fatal: bool) -> Self {
        self.count_fatal = count_fatal;
        self
    }

    /// Consecutive counted failures that open the circuit. Never zero.
    pub fn max_failures(&self) -> u32 {
        self.max_failures
    }

    /// Time the circuit stays open before admitting a trial.
    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    /// Whether fatal errors count as dependency failures.
    pub fn count_fatal(&self) -> bool {
        self.count_fatal
    }

    fn counts(&self, class: ErrorClass) -> bool {
        match class {
            ErrorClass::Retryable => true,
            ErrorClass::Fatal => self.count_fatal,
            // The dependency answered correctly.
            ErrorClass::Conflict => false,
        }
    }
}

impl Default for CircuitConfig {
    fn default() -> Self {
        Self::new(5)
    }
}

/// A state transition, published to subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitEvent {
    /// Dependency the breaker guards.
    pub dependency: String,
    /// State before the transition.
    pub from: CircuitState,
    /// State after the transition.
    pub to: CircuitState,
}

/// Point-in-time view of a breaker.
#[derive(Debug, Clone)]
pub struct CircuitSnapshot {
    /// Dependency the breaker guards.
    pub dependency: String,
    /// Current state.
    pub state: CircuitState,
    /// Consecutive counted failures since the last success.
    pub consecutive_failures: u32,
    /// When the last counted failure happened.
    pub last_failure_at: Option<Instant>,
    /// When the circuit last opened.
    pub opened_at: Option<Instant>,
    /// Whether a half-open trial is running.
    pub trial_in_flight: bool,
}

#[derive(Debug)]
struct Inner {
    state: CircuitState,
    consecutive_failures: u32,
    last_failure_at: Option<Instant>,
    opened_at: Option<Instant>,
    trial_in_flight: bool,
}

type Transition = (CircuitState, CircuitState);

impl Inner {
    fn transition(&mut self, to: CircuitState) -> Option<Transition> {
        let from = self.state;
        if from == to {
            return None;
        }
        self.state = to;
        Some((from, to))
    }
}

/// Circuit breaker for one dependency.
///
/// Shared through an `Arc`; [`try_acquire`](Self::try_acquire) hands out a
/// [`CallPermit`] that reports the call's outcome back to the breaker.
pub struct CircuitBreaker {
    dependency: String,
    config: CircuitConfig,
    inner: Mutex<Inner>,
    events: broadcast::Sender<CircuitEvent>,
}

impl CircuitBreaker {
    /// Creates a closed breaker.
    pub fn new(dependency: impl Into<String>, config: CircuitConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            dependency: dependency.into(),
            config,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                last_failure_at: None,
                opened_at: None,
                trial_in_flight: false,
            }),
            events,
        }
    }

    /// Returns the guarded dependency's name.
    pub fn dependency(&self) -> &str {
        &self.dependency
    }

    /// Returns the configuration.
    pub fn config(&self) -> &CircuitConfig {
        &self.config
    }

    /// Returns the current state.
    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    /// Returns a diagnostic snapshot.
    pub fn snapshot(&self) -> CircuitSnapshot {
        let inner = self.inner.lock();
        CircuitSnapshot {
            dependency: self.dependency.clone(),
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            last_failure_at: inner.last_failure_at,
            opened_at: inner.opened_at,
            trial_in_flight: inner.trial_in_flight,
        }
    }

    /// Subscribes to state transitions.
    pub fn subscribe(&self) -> broadcast::Receiver<CircuitEvent> {
        self.events.subscribe()
    }

    /// Asks to make a call.
    ///
    /// Returns a permit when the call may proceed. In `Open` the call is
    /// rejected until the cooldown elapses, at which point this caller
    /// becomes the trial. In `HalfOpen` every caller except the trial is
    /// rejected.
    pub fn try_acquire(self: &Arc<Self>) -> Result<CallPermit, CircuitOpenError> {
        let now = Instant::now();
        let (result, transition) = {
            let mut inner = self.inner.lock();
            match inner.state {
                CircuitState::Closed => (Ok(false), None),
                CircuitState::Open => {
                    let opened_at = inner.opened_at.unwrap_or(now);
                    let elapsed = now.saturating_duration_since(opened_at);
                    if elapsed >= self.config.cooldown {
                        inner.trial_in_flight = true;
                        (Ok(true), inner.transition(CircuitState::HalfOpen))
                    } else {
                        (Err(self.config.cooldown - elapsed), None)
                    }
                }
                CircuitState::HalfOpen if inner.trial_in_flight => (Err(Duration::ZERO), None),
                CircuitState::HalfOpen => {
                    inner.trial_in_flight = true;
                    (Ok(true), None)
                }
            }
        };
        self.publish(transition);

        match result {
            Ok(trial) => Ok(CallPermit {
                breaker: Arc::clone(self),
                trial,
                recorded: false,
            }),
            Err(retry_after) => {
                debug!(dependency = %self.dependency, ?retry_after, "circuit rejected call");
                Err(CircuitOpenError {
                    dependency: self.dependency.clone(),
                    retry_after,
                })
            }
        }
    }

    /// Runs a synchronous call through the breaker.
    pub fn call<T, E, F>(self: &Arc<Self>, f: F) -> Result<T, CircuitError<E>>
    where
        E: Classify,
        F: FnOnce() -> Result<T, E>,
    {
        let permit = self.try_acquire().map_err(CircuitError::Open)?;
        let result = f();
        permit.record(result.as_ref().err().map(|e| e.class()));
        result.map_err(CircuitError::Inner)
    }

    /// Runs an async call through the breaker.
    ///
    /// If the returned future is dropped mid-call the outcome is not
    /// recorded and a held trial slot is released.
    pub async fn call_async<T, E, F, Fut>(self: &Arc<Self>, f: F) -> Result<T, CircuitError<E>>
    where
        E: Classify,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let permit = self.try_acquire().map_err(CircuitError::Open)?;
        let result = f().await;
        permit.record(result.as_ref().err().map(|e| e.class()));
        result.map_err(CircuitError::Inner)
    }

    fn on_outcome(&self, trial: bool, failure: Option<ErrorClass>) {
        let counted = failure.is_some_and(|class| self.config.counts(class));
        let now = Instant::now();
        let transition = {
            let mut inner = self.inner.lock();
            if trial {
                inner.trial_in_flight = false;
            }
            match (inner.state, trial, counted) {
                (CircuitState::Closed, _, false) => {
                    inner.consecutive_failures = 0;
                    None
                }
                (CircuitState::Closed, _, true) => {
                    inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);
                    inner.last_failure_at = Some(now);
                    if inner.consecutive_failures >= self.config.max_failures {
                        inner.opened_at = Some(now);
                        inner.transition(CircuitState::Open)
                    } else {
                        None
                    }
                }
                (CircuitState::HalfOpen, true, false) => {
                    inner.consecutive_failures = 0;
                    inner.opened_at = None;
                    inner.transition(CircuitState::Closed)
                }
                (CircuitState::HalfOpen, true, true) => {
                    inner.last_failure_at = Some(now);
                    inner.opened_at = Some(now);
                    inner.transition(CircuitState::Open)
                }
                // Outcome of a call admitted before the circuit changed state.
                _ => None,
            }
        };
        self.publish(transition);
    }

    fn release_trial(&self) {
        self.inner.lock().trial_in_flight = false;
    }

    fn publish(&self, transition: Option<Transition>) {
        let Some((from, to)) = transition else {
            return;
        };
        match to {
            CircuitState::Open => {
                warn!(dependency = %self.dependency, %from, %to, "circuit opened")
            }
            CircuitState::HalfOpen => {
                info!(dependency = %self.dependency, %from, %to, "circuit probing")
            }
            CircuitState::Closed => {
                info!(dependency = %self.dependency, %from, %to, "circuit closed")
            }
        }
        // No subscribers is fine.
        let _ = self.events.send(CircuitEvent {
            dependency: self.dependency.clone(),
            from,
            to,
        });
    }
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("dependency", &self.dependency)
            .field("config", &self.config)
            .field("state", &self.state())
            .finish()
    }
}

/// Permission to make one call through a breaker.
///
/// Report the outcome with [`record`](Self::record). Dropping the permit
/// without recording leaves the counters unchanged.
#[must_use = "a permit must record the call's outcome"]
pub struct CallPermit {
    breaker: Arc<CircuitBreaker>,
    trial: bool,
    recorded: bool,
}

impl CallPermit {
    /// Returns true if this call is the half-open trial.
    pub fn is_trial(&self) -> bool {
        self.trial
    }

    /// Records the outcome: `None` for success, otherwise the failure class.
    pub fn record(mut self, failure: Option<ErrorClass>) {
        self.recorded = true;
        self.breaker.on_outcome(self.trial, failure);
    }

    /// Records a success.
    pub fn success(self) {
        self.record(None);
    }
}

impl Drop for CallPermit {
    fn drop(&mut self) {
        if !self.recorded && self.trial {
            self.breaker.release_trial();
        }
    }
}

impl fmt::Debug for CallPermit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallPermit")
            .field("dependency", &self.breaker.dependency)
            .field("trial", &self.trial)
            .finish()
    }
}
