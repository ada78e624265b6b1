//! The per-device background sync worker.

use crate::engine::SyncEngine;
use crate::report::SyncReport;
use std::sync::Arc;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Wakes the sync worker.
///
/// Requests coalesce: any number of calls while the worker is busy result
/// in one more drain pass.
#[derive(Debug, Clone, Default)]
pub struct SyncTrigger {
    notify: Arc<Notify>,
}

impl SyncTrigger {
    /// Creates a trigger not yet bound to a worker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Asks for a drain pass, e.g. after a local write.
    pub fn request_sync(&self) {
        self.notify.notify_one();
    }

    /// Reports that the device is back online.
    pub fn connectivity_restored(&self) {
        debug!("connectivity restored");
        self.notify.notify_one();
    }

    async fn notified(&self) {
        self.notify.notified().await;
    }
}

/// Background task draining one engine.
///
/// Runs one pass at start, then one per trigger and, when the engine's
/// configuration sets a `sync_interval`, one per interval.
pub struct SyncWorker {
    trigger: SyncTrigger,
    stop: Arc<Notify>,
    reports: watch::Receiver<Option<SyncReport>>,
    engine: Arc<SyncEngine>,
    handle: JoinHandle<()>,
}

impl SyncWorker {
    /// Spawns the worker on the current tokio runtime.
    pub fn spawn(engine: Arc<SyncEngine>) -> Self {
        Self::spawn_with_trigger(engine, SyncTrigger::new())
    }

    /// Spawns the worker woken by an existing trigger.
    pub fn spawn_with_trigger(engine: Arc<SyncEngine>, trigger: SyncTrigger) -> Self {
        let stop = Arc::new(Notify::new());
        let (tx, reports) = watch::channel(None);
        trigger.request_sync();

        let handle = tokio::spawn(run(
            Arc::clone(&engine),
            trigger.clone(),
            Arc::clone(&stop),
            tx,
        ));

        Self {
            trigger,
            stop,
            reports,
            engine,
            handle,
        }
    }

    /// Returns the trigger waking this worker.
    pub fn trigger(&self) -> &SyncTrigger {
        &self.trigger
    }

    /// Subscribes to drain reports.
    pub fn reports(&self) -> watch::Receiver<Option<SyncReport>> {
        self.reports.clone()
    }

    /// Returns the last published report.
    pub fn last_report(&self) -> Option<SyncReport> {
        self.reports.borrow().clone()
    }

    /// Stops the worker, cancelling a running pass, and waits for it.
    ///
    /// The engine stays cancelled; call
    /// [`SyncEngine::reset_cancel`] before draining it again.
    pub async fn shutdown(self) {
        self.engine.cancel();
        self.stop.notify_one();
        if let Err(e) = self.handle.await {
            warn!(error = %e, "sync worker task failed");
        }
        info!("sync worker stopped");
    }
}

async fn run(
    engine: Arc<SyncEngine>,
    trigger: SyncTrigger,
    stop: Arc<Notify>,
    reports: watch::Sender<Option<SyncReport>>,
) {
    let mut ticker = engine.config().sync_interval.map(|period| {
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker
    });

    info!(interval = ?engine.config().sync_interval, "sync worker started");
    loop {
        tokio::select! {
            biased;
            _ = stop.notified() => break,
            _ = trigger.notified() => {}
            _ = tick(&mut ticker) => {}
        }

        // Cancel cancels the pass, stop ends the loop.
        let drained = tokio::select! {
            biased;
            _ = stop.notified() => break,
            drained = engine.drain() => drained,
        };
        match drained {
            Ok(report) => {
                reports.send_replace(Some(report));
            }
            Err(e) => warn!(error = %e, "drain pass failed"),
        }
    }
}

async fn tick(ticker: &mut Option<tokio::time::Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}
