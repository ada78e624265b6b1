//! Circuit breaker state machine under a paused clock.

use medsync_resilience::{
    CircuitBreaker, CircuitConfig, CircuitError, CircuitEvent, CircuitState, Classify, ErrorClass,
};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug)]
struct Unavailable;

impl Classify for Unavailable {
    fn class(&self) -> ErrorClass {
        ErrorClass::Retryable
    }
}

const COOLDOWN: Duration = Duration::from_secs(30);

fn breaker(max_failures: u32) -> Arc<CircuitBreaker> {
    Arc::new(CircuitBreaker::new(
        "database",
        CircuitConfig::new(max_failures).with_cooldown(COOLDOWN),
    ))
}

fn fail(cb: &Arc<CircuitBreaker>) {
    let result: Result<(), _> = cb.call(|| Err(Unavailable));
    assert!(matches!(result, Err(CircuitError::Inner(_))));
}

#[tokio::test(start_paused = true)]
async fn opens_at_threshold_and_rejects_without_calling() {
    let cb = breaker(3);
    fail(&cb);
    fail(&cb);
    assert_eq!(cb.state(), CircuitState::Closed);
    fail(&cb);
    assert_eq!(cb.state(), CircuitState::Open);

    let calls = AtomicU32::new(0);
    let fourth: Result<(), CircuitError<Unavailable>> = cb.call(|| {
        calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });

    match fourth {
        Err(CircuitError::Open(open)) => {
            assert_eq!(open.dependency, "database");
            assert_eq!(open.retry_after, COOLDOWN);
        }
        other => panic!("expected open circuit, got {other:?}"),
    }
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn single_trial_after_cooldown_closes_on_success() {
    let cb = breaker(3);
    for _ in 0..3 {
        fail(&cb);
    }

    tokio::time::advance(COOLDOWN - Duration::from_millis(1)).await;
    assert!(cb.try_acquire().is_err());

    tokio::time::advance(Duration::from_millis(1)).await;
    let trial = cb.try_acquire().expect("trial admitted after cooldown");
    assert!(trial.is_trial());
    assert_eq!(cb.state(), CircuitState::HalfOpen);

    // Everyone else is turned away while the trial runs.
    for _ in 0..10 {
        let rejected = cb.try_acquire().unwrap_err();
        assert_eq!(rejected.retry_after, Duration::ZERO);
    }

    trial.success();
    let snapshot = cb.snapshot();
    assert_eq!(snapshot.state, CircuitState::Closed);
    assert_eq!(snapshot.consecutive_failures, 0);
    assert!(!snapshot.trial_in_flight);
    assert!(cb.try_acquire().is_ok());
}

#[tokio::test(start_paused = true)]
async fn failed_trial_reopens_and_restarts_cooldown() {
    let cb = breaker(1);
    fail(&cb);

    tokio::time::advance(COOLDOWN).await;
    cb.try_acquire()
        .unwrap()
        .record(Some(ErrorClass::Retryable));
    assert_eq!(cb.state(), CircuitState::Open);

    tokio::time::advance(COOLDOWN / 2).await;
    let open = cb.try_acquire().unwrap_err();
    assert_eq!(open.retry_after, COOLDOWN / 2);

    tokio::time::advance(COOLDOWN / 2).await;
    assert!(cb.try_acquire().unwrap().is_trial());
}

#[tokio::test(start_paused = true)]
async fn dropped_trial_frees_the_slot() {
    let cb = breaker(1);
    fail(&cb);
    tokio::time::advance(COOLDOWN).await;

    let trial = cb.try_acquire().unwrap();
    drop(trial);

    assert_eq!(cb.state(), CircuitState::HalfOpen);
    let next = cb.try_acquire().expect("slot released");
    assert!(next.is_trial());
    next.success();
    assert_eq!(cb.state(), CircuitState::Closed);
}

#[tokio::test(start_paused = true)]
async fn async_call_counts_failures() {
    let cb = breaker(2);
    for _ in 0..2 {
        let result: Result<(), _> = cb
            .call_async(|| async {
                tokio::time::sleep(Duration::from_millis(5)).await;
                Err(Unavailable)
            })
            .await;
        assert!(result.is_err());
    }
    assert_eq!(cb.state(), CircuitState::Open);
}

#[tokio::test(start_paused = true)]
async fn every_transition_is_broadcast() {
    let cb = breaker(2);
    let mut events = cb.subscribe();

    fail(&cb);
    fail(&cb);
    tokio::time::advance(COOLDOWN).await;
    let trial = cb.try_acquire().unwrap();
    trial.record(Some(ErrorClass::Fatal));
    tokio::time::advance(COOLDOWN).await;
    cb.try_acquire().unwrap().success();

    let mut seen = Vec::new();
    while let Ok(CircuitEvent { from, to, dependency }) = events.try_recv() {
        assert_eq!(dependency, "database");
        seen.push((from, to));
    }

    use CircuitState::*;
    assert_eq!(
        seen,
        [
            (Closed, Open),
            (Open, HalfOpen),
            (HalfOpen, Open),
            (Open, HalfOpen),
            (HalfOpen, Closed),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn concurrent_callers_get_one_trial() {
    let cb = breaker(1);
    fail(&cb);
    tokio::time::advance(COOLDOWN).await;

    let admitted = Arc::new(AtomicU32::new(0));
    let mut handles = Vec::new();
    for _ in 0..16 {
        let cb = Arc::clone(&cb);
        let admitted = Arc::clone(&admitted);
        handles.push(tokio::spawn(async move {
            if let Ok(permit) = cb.try_acquire() {
                admitted.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(50)).await;
                permit.success();
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(admitted.load(Ordering::SeqCst), 1);
    assert_eq!(cb.state(), CircuitState::Closed);
}
