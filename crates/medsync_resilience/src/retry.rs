//! Classified retry with exponential backoff.

use crate::cancel::CancellationToken;
use crate::circuit::CircuitBreaker;
use crate::classify::{Classify, ErrorClass, ErrorClassifier};
use crate::error::{AttemptError, RetryError};
use rand::Rng;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Configuration for retry behavior.
///
/// ```
/// use medsync_resilience::RetryConfig;
/// use std::time::Duration;
///
/// let config = RetryConfig::new(0).with_initial_delay(Duration::from_millis(50));
/// assert_eq!(config.max_attempts(), 1);
/// assert_eq!(config.delay_for_attempt(2), Duration::from_millis(100));
/// ```
#[derive(Debug, Clone)]
pub struct RetryConfig {
    max_attempts: u32,
    initial_delay: Duration,
    max_delay: Duration,
    backoff_factor: f64,
    jitter: bool,
    attempt_timeout: Option<Duration>,
}

impl RetryConfig {
    /// Creates a configuration with the given attempt budget.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(1600),
            backoff_factor: 2.0,
            jitter: false,
            attempt_timeout: Some(Duration::from_secs(10)),
        }
    }

    /// Creates a configuration that makes exactly one attempt.
    pub fn no_retry() -> Self {
        Self::new(1)
    }

    /// Sets the initial delay.
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sets the maximum delay.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the backoff factor.
    pub fn with_backoff_factor(mut self, factor: f64) -> Self {
        self.backoff_factor = factor;
        self
    }

    /// Enables or disables jitter.
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Sets the per-attempt deadline. `None` lets attempts run unbounded.
    pub fn with_attempt_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.attempt_timeout = timeout;
        self
    }

    /// Maximum number of invocations, including the first. Never zero.
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay after the first failed attempt.
    pub fn initial_delay(&self) -> Duration {
        self.initial_delay
    }

    /// Upper bound on any single delay.
    pub fn max_delay(&self) -> Duration {
        self.max_delay
    }

    /// Multiplier applied per failed attempt.
    pub fn backoff_factor(&self) -> f64 {
        self.backoff_factor
    }

    /// Whether up to 25% random jitter is added to each delay.
    pub fn jitter(&self) -> bool {
        self.jitter
    }

    /// Deadline for a single attempt.
    pub fn attempt_timeout(&self) -> Option<Duration> {
        self.attempt_timeout
    }

    /// Delay to wait after failed attempt `attempt` (1-indexed).
    ///
    /// `min(initial_delay * backoff_factor^(attempt-1), max_delay)`; the
    /// defaults give 100, 200, 400, 800, 1600 ms.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let exponent = i32::try_from(attempt - 1).unwrap_or(i32::MAX);
        let base = self.initial_delay.as_secs_f64() * self.backoff_factor.powi(exponent);
        let capped = base.min(self.max_delay.as_secs_f64());

        let secs = if self.jitter {
            capped + capped * 0.25 * rand::thread_rng().gen::<f64>()
        } else {
            capped
        };
        Duration::try_from_secs_f64(secs).unwrap_or(self.max_delay)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(5)
    }
}

/// Runs an operation until it succeeds, fails non-retryably, or the attempt
/// budget runs out.
///
/// Fatal and conflict errors return after the attempt that produced them.
/// Retryable errors sleep `delay_for_attempt(n)` and try again. When a
/// breaker is attached every attempt goes through it, and a rejection ends
/// the call. The cancellation token is observed both while sleeping and
/// while an attempt is in flight.
#[derive(Debug, Clone)]
pub struct RetryExecutor {
    config: RetryConfig,
    breaker: Option<Arc<CircuitBreaker>>,
    cancel: CancellationToken,
}

impl RetryExecutor {
    /// Creates an executor without a breaker.
    pub fn new(config: RetryConfig) -> Self {
        Self {
            config,
            breaker: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Routes every attempt through `breaker`.
    pub fn with_breaker(mut self, breaker: Arc<CircuitBreaker>) -> Self {
        self.breaker = Some(breaker);
        self
    }

    /// Observes `token` for cancellation.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Returns the configuration.
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Returns the attached breaker.
    pub fn breaker(&self) -> Option<&Arc<CircuitBreaker>> {
        self.breaker.as_ref()
    }

    /// Returns the cancellation token.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Executes `op`, retrying retryable failures.
    pub async fn execute<T, E, F, Fut>(&self, mut op: F) -> Result<T, RetryError<E>>
    where
        E: Classify + fmt::Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut attempts: u32 = 0;

        loop {
            if self.cancel.is_cancelled() {
                return Err(RetryError::Cancelled { attempts });
            }

            let permit = match &self.breaker {
                Some(breaker) => match breaker.try_acquire() {
                    Ok(permit) => Some(permit),
                    Err(open) => {
                        return Err(RetryError::CircuitOpen {
                            attempts,
                            dependency: open.dependency,
                            retry_after: open.retry_after,
                        })
                    }
                },
                None => None,
            };

            attempts += 1;
            let outcome = tokio::select! {
                biased;
                // The unrecorded permit releases a held trial slot on drop.
                _ = self.cancel.cancelled() => return Err(RetryError::Cancelled { attempts }),
                outcome = self.attempt(op()) => outcome,
            };

            let error = match outcome {
                Ok(value) => {
                    if let Some(permit) = permit {
                        permit.success();
                    }
                    if attempts > 1 {
                        debug!(attempts, "operation succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(error) => error,
            };

            let class = ErrorClassifier::classify(&error);
            if let Some(permit) = permit {
                permit.record(Some(class));
            }

            let last = match (class, error) {
                (ErrorClass::Fatal, AttemptError::Operation(error)) => {
                    debug!(attempts, %error, "fatal error, not retrying");
                    return Err(RetryError::Fatal { attempts, error });
                }
                (ErrorClass::Conflict, AttemptError::Operation(error)) => {
                    debug!(attempts, %error, "conflict, not retrying");
                    return Err(RetryError::Conflict { attempts, error });
                }
                (_, last) => last,
            };

            if attempts >= self.config.max_attempts {
                warn!(attempts, error = %last, "retry budget exhausted");
                return Err(RetryError::Exhausted { attempts, last });
            }

            let delay = self.config.delay_for_attempt(attempts);
            debug!(attempts, ?delay, error = %last, "retryable failure, backing off");
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(RetryError::Cancelled { attempts }),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    async fn attempt<T, E, Fut>(&self, fut: Fut) -> Result<T, AttemptError<E>>
    where
        Fut: Future<Output = Result<T, E>>,
    {
        match self.config.attempt_timeout {
            Some(deadline) => match tokio::time::timeout(deadline, fut).await {
                Ok(result) => result.map_err(AttemptError::Operation),
                Err(_) => Err(AttemptError::DeadlineExceeded(deadline)),
            },
            None => fut.await.map_err(AttemptError::Operation),
        }
    }
}

impl Default for RetryExecutor {
    fn default() -> Self {
        Self::new(RetryConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_delay_sequence() {
        let config = RetryConfig::default();
        let delays: Vec<_> = (1..=6).map(|n| config.delay_for_attempt(n)).collect();
        assert_eq!(
            delays,
            [100, 200, 400, 800, 1600, 1600].map(Duration::from_millis)
        );
        assert_eq!(config.delay_for_attempt(0), Duration::ZERO);
    }

    #[test]
    fn jitter_stays_within_a_quarter() {
        let config = RetryConfig::default().with_jitter(true);
        for _ in 0..100 {
            let delay = config.delay_for_attempt(2);
            assert!(delay >= Duration::from_millis(200));
            assert!(delay <= Duration::from_millis(250));
        }
    }

    #[test]
    fn max_delay_caps_large_factors() {
        let config = RetryConfig::new(10)
            .with_initial_delay(Duration::from_secs(1))
            .with_max_delay(Duration::from_secs(5))
            .with_backoff_factor(10.0);
        assert_eq!(config.delay_for_attempt(9), Duration::from_secs(5));
    }

    #[test]
    fn no_retry_makes_one_attempt() {
        assert_eq!(RetryConfig::no_retry().max_attempts(), 1);
        assert_eq!(RetryConfig::new(0).max_attempts(), 1);
    }
}
