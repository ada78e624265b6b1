//! The sync engine: drains the mutation queue against the record server.

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::local::LocalStore;
use crate::queue::{MutationQueue, QueueEntry};
use crate::report::{FailedMutation, HaltReason, SyncReport, SyncStats};
use crate::resolver::{ConflictResolver, Decision};
use crate::transport::{into_result, RecordTransport};
use medsync_protocol::{
    Conflict, MutationKind, MutationResponse, RecordId, Resolution, Status, VersionedRecord,
};
use medsync_resilience::{
    dependencies, CancellationToken, CircuitBreaker, CircuitRegistry, RetryError, RetryExecutor,
};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// A conflict waiting for [`SyncEngine::resolve`].
#[derive(Debug, Clone)]
struct Parked {
    conflict: Conflict,
    remote: VersionedRecord,
}

/// What a drain pass does after one entry.
enum Flow {
    Continue,
    /// Skip the record's remaining entries for this pass.
    Block,
    Halt(HaltReason),
}

/// Clears the draining flag when the pass ends, however it ends.
struct DrainGuard<'a>(&'a AtomicBool);

impl<'a> DrainGuard<'a> {
    fn try_acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Drains queued mutations to the server.
///
/// Every submission goes through a [`RetryExecutor`] bound to the sync
/// server's [`CircuitBreaker`]. Entries are visited in sequence order. A
/// record whose entry could not be settled (a parked conflict, an exhausted
/// retry budget, a terminal failure) is skipped for the rest of the pass,
/// so a later mutation never overtakes an earlier one for the same record.
/// Other records keep draining.
///
/// # Conflicts
///
/// A `409` is never retried. The engine builds a [`Conflict`] and asks the
/// [`ConflictResolver`]:
///
/// | Decision | Effect |
/// |----------|--------|
/// | `KeepRemote` | the entry and later entries for the record are discarded, the server copy is adopted locally |
/// | `KeepLocal` | the entry is rebased on the server version and re-submitted |
/// | `Merged(p)` | as `KeepLocal`, carrying `p` |
/// | `Deferred` | the conflict is parked until [`SyncEngine::resolve`] |
pub struct SyncEngine {
    config: SyncConfig,
    queue: Arc<MutationQueue>,
    local: Arc<dyn LocalStore>,
    transport: Arc<dyn RecordTransport>,
    resolver: Arc<dyn ConflictResolver>,
    executor: RetryExecutor,
    draining: AtomicBool,
    parked: Mutex<BTreeMap<RecordId, Parked>>,
    stats: Mutex<SyncStats>,
}

impl SyncEngine {
    /// Creates a sync engine.
    ///
    /// The sync server breaker is taken from `registry`, registered with
    /// `config.circuit` if the registry does not have one yet.
    pub fn new(
        config: SyncConfig,
        queue: Arc<MutationQueue>,
        local: Arc<dyn LocalStore>,
        transport: Arc<dyn RecordTransport>,
        resolver: Arc<dyn ConflictResolver>,
        registry: &CircuitRegistry,
    ) -> Self {
        let breaker = registry
            .get(dependencies::SYNC_SERVER)
            .unwrap_or_else(|| registry.insert(dependencies::SYNC_SERVER, config.circuit.clone()));
        let executor = RetryExecutor::new(config.retry.clone())
            .with_breaker(breaker)
            .with_cancellation(CancellationToken::new());

        Self {
            config,
            queue,
            local,
            transport,
            resolver,
            executor,
            draining: AtomicBool::new(false),
            parked: Mutex::new(BTreeMap::new()),
            stats: Mutex::new(SyncStats::default()),
        }
    }

    /// Returns the configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Returns the mutation queue.
    pub fn queue(&self) -> &Arc<MutationQueue> {
        &self.queue
    }

    /// Returns the local store.
    pub fn local(&self) -> &Arc<dyn LocalStore> {
        &self.local
    }

    /// Returns the sync server breaker.
    pub fn breaker(&self) -> Option<&Arc<CircuitBreaker>> {
        self.executor.breaker()
    }

    /// Returns true while a drain pass is running.
    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::Acquire)
    }

    /// Returns cumulative statistics.
    pub fn stats(&self) -> SyncStats {
        self.stats.lock().clone()
    }

    /// Cancels the running pass and every later one until
    /// [`reset_cancel`](Self::reset_cancel).
    ///
    /// An in-flight submission stops waiting for its answer and the entry
    /// stays pending.
    pub fn cancel(&self) {
        self.executor.cancellation().cancel();
    }

    /// Returns true if the engine is cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.executor.cancellation().is_cancelled()
    }

    /// Allows drains to run again after [`cancel`](Self::cancel).
    pub fn reset_cancel(&self) {
        self.executor.cancellation().reset();
    }

    /// Runs one drain pass over the currently pending entries.
    ///
    /// Returns at once with a coalesced report if another pass is running.
    ///
    /// # Errors
    ///
    /// Only local failures (queue or local store) are errors. Server
    /// outcomes are reported in the [`SyncReport`].
    pub async fn drain(&self) -> SyncResult<SyncReport> {
        let Some(_guard) = DrainGuard::try_acquire(&self.draining) else {
            debug!("drain already in progress, coalescing");
            let report = SyncReport::coalesced();
            self.stats.lock().record(&report);
            return Ok(report);
        };

        let started = Instant::now();
        let mut report = SyncReport::default();
        let mut blocked: HashSet<RecordId> = self.parked.lock().keys().copied().collect();
        blocked.extend(self.queue.list_failed().iter().map(|e| e.record_id));

        for snapshot in self.queue.list_pending() {
            // Resolutions earlier in the pass may have discarded or rebased it.
            let Some(entry) = self.queue.get(snapshot.sequence) else {
                continue;
            };
            if blocked.contains(&entry.record_id) {
                report.deferred += 1;
                continue;
            }

            match self.sync_entry(entry.clone(), &mut report).await? {
                Flow::Continue => {}
                Flow::Block => {
                    blocked.insert(entry.record_id);
                }
                Flow::Halt(reason) => {
                    info!(%reason, sequence = entry.sequence, "drain halted");
                    report.halted = Some(reason);
                    break;
                }
            }
        }

        report.duration = started.elapsed();
        info!(
            synced = report.synced,
            conflicted = report.conflicted,
            failed = report.failed,
            deferred = report.deferred,
            resolved = report.resolved,
            halted = report.halted.is_some(),
            "drain pass finished"
        );
        self.stats.lock().record(&report);
        Ok(report)
    }

    async fn submit(&self, entry: &QueueEntry) -> Result<MutationResponse, RetryError<SyncError>> {
        let transport = &self.transport;
        let request = &entry.to_request();
        self.executor
            .execute(move || async move { transport.submit(request).await.and_then(into_result) })
            .await
    }

    async fn sync_entry(&self, mut entry: QueueEntry, report: &mut SyncReport) -> SyncResult<Flow> {
        let mut rebases = 0;

        loop {
            debug!(
                sequence = entry.sequence,
                record = %entry.record_id,
                kind = %entry.kind,
                expected = ?entry.expected_version,
                "submitting mutation"
            );

            let remote = match self.submit(&entry).await {
                Ok(response) => {
                    self.on_synced(&entry, response)?;
                    report.synced += 1;
                    return Ok(Flow::Continue);
                }
                Err(RetryError::Conflict { error, .. }) => match self.remote_copy(&entry, error).await? {
                    Some(remote) => remote,
                    None => {
                        report.deferred += 1;
                        return Ok(Flow::Block);
                    }
                },
                Err(RetryError::Fatal { error, attempts }) => {
                    warn!(
                        sequence = entry.sequence,
                        record = %entry.record_id,
                        attempts,
                        %error,
                        "mutation rejected"
                    );
                    self.queue.mark_failed(entry.sequence, true, error.to_string())?;
                    report.failed += 1;
                    report.failures.push(FailedMutation {
                        sequence: entry.sequence,
                        record_id: entry.record_id,
                        kind: entry.kind,
                        error: error.to_string(),
                    });
                    return Ok(Flow::Block);
                }
                Err(RetryError::Exhausted { last, attempts }) => {
                    debug!(sequence = entry.sequence, attempts, error = %last, "deferring mutation");
                    self.queue.mark_failed(entry.sequence, false, last.to_string())?;
                    report.deferred += 1;
                    return Ok(Flow::Block);
                }
                Err(RetryError::CircuitOpen {
                    attempts,
                    retry_after,
                    ..
                }) => {
                    if attempts > 0 {
                        self.queue.mark_failed(entry.sequence, false, "circuit open")?;
                    }
                    return Ok(Flow::Halt(HaltReason::CircuitOpen { retry_after }));
                }
                Err(RetryError::Cancelled { .. }) => return Ok(Flow::Halt(HaltReason::Cancelled)),
            };

            if rebases == 0 {
                report.conflicted += 1;
            }
            let conflict = Conflict::new(
                entry.sequence,
                entry.kind,
                entry.expected_version,
                entry.payload.clone(),
                remote.clone(),
            );
            info!(
                sequence = entry.sequence,
                record = %entry.record_id,
                local = conflict.local.version,
                remote = conflict.remote.version,
                "version conflict"
            );

            if rebases >= self.config.max_rebases_per_pass {
                debug!(sequence = entry.sequence, rebases, "conflict after rebase, deferring record");
                report.deferred += 1;
                return Ok(Flow::Block);
            }

            match self.resolver.resolve(&conflict) {
                Decision::Resolved(resolution) => {
                    report.resolved += 1;
                    match self.apply_resolution(&entry, &remote, &resolution)? {
                        Some(rebased) => {
                            rebases += 1;
                            entry = rebased;
                        }
                        None => return Ok(Flow::Continue),
                    }
                }
                Decision::Deferred => {
                    report.conflicts.push(conflict.clone());
                    self.parked
                        .lock()
                        .insert(entry.record_id, Parked { conflict, remote });
                    return Ok(Flow::Block);
                }
            }
        }
    }

    /// Returns the server's record for a conflict answer.
    ///
    /// A `409` without a body record is answered by fetching the record. If
    /// that fails too the entry is left pending and `None` is returned.
    async fn remote_copy(
        &self,
        entry: &QueueEntry,
        error: SyncError,
    ) -> SyncResult<Option<VersionedRecord>> {
        if let SyncError::Conflict { current } = error {
            return Ok(Some(*current));
        }
        match self.fetch(entry.record_id).await {
            Ok(Some(record)) => Ok(Some(record)),
            Ok(None) | Err(_) => {
                self.queue.mark_failed(entry.sequence, false, error.to_string())?;
                Ok(None)
            }
        }
    }

    fn on_synced(&self, entry: &QueueEntry, response: MutationResponse) -> SyncResult<()> {
        self.queue.mark_synced(entry.sequence)?;
        debug!(sequence = entry.sequence, record = %entry.record_id, "mutation synced");

        // Later local writes already shape the local copy.
        if !self.queue.pending_for(entry.record_id).is_empty() {
            return Ok(());
        }
        match (entry.kind, response.record) {
            (MutationKind::Delete, _) => self.local.remove(entry.record_id),
            (_, Some(record)) => self.local.record_synced(&record),
            (_, None) => Ok(()),
        }
    }

    /// Applies `resolution` to `entry`. Returns the rebased entry when it
    /// must be re-submitted.
    fn apply_resolution(
        &self,
        entry: &QueueEntry,
        remote: &VersionedRecord,
        resolution: &Resolution,
    ) -> SyncResult<Option<QueueEntry>> {
        debug!(
            sequence = entry.sequence,
            record = %entry.record_id,
            resolution = resolution.as_str(),
            "applying resolution"
        );
        let payload = match resolution {
            Resolution::KeepRemote => {
                for later in self.queue.pending_for(entry.record_id) {
                    if later.sequence >= entry.sequence {
                        self.queue.discard(later.sequence)?;
                    }
                }
                self.local.adopt_remote(remote)?;
                return Ok(None);
            }
            Resolution::KeepLocal => None,
            Resolution::Merged(payload) => Some(payload.clone()),
        };

        let rebased = self.queue.rebase(entry.sequence, remote.version, payload)?;
        self.refresh_local(entry.record_id)?;
        Ok(Some(rebased))
    }

    /// Rewrites the local copy to match the record's last pending entry.
    fn refresh_local(&self, record_id: RecordId) -> SyncResult<()> {
        let Some(last) = self.queue.pending_for(record_id).pop() else {
            return Ok(());
        };
        match (last.kind, last.payload.clone()) {
            (MutationKind::Delete, _) | (_, None) => Ok(()),
            (_, Some(payload)) => {
                let mut record = VersionedRecord::new(record_id, payload);
                record.version = last.result_version();
                self.local.put_local(record)
            }
        }
    }

    /// Resolves a parked conflict.
    ///
    /// The record is drained again on the next pass.
    pub fn resolve(&self, record_id: RecordId, resolution: Resolution) -> SyncResult<()> {
        let parked = self
            .parked
            .lock()
            .remove(&record_id)
            .ok_or(SyncError::NoPendingConflict(record_id))?;

        let Some(entry) = self.queue.get(parked.conflict.sequence) else {
            debug!(record = %record_id, "conflicting entry already gone");
            return Ok(());
        };
        if let Err(e) = self.apply_resolution(&entry, &parked.remote, &resolution) {
            self.parked.lock().insert(record_id, parked);
            return Err(e);
        }
        info!(record = %record_id, resolution = resolution.as_str(), "conflict resolved");
        Ok(())
    }

    /// Returns parked conflicts in record id order.
    pub fn pending_conflicts(&self) -> Vec<Conflict> {
        self.parked
            .lock()
            .values()
            .map(|p| p.conflict.clone())
            .collect()
    }

    /// Returns mutations the server rejected permanently.
    pub fn failed_mutations(&self) -> Vec<FailedMutation> {
        self.queue
            .list_failed()
            .into_iter()
            .map(|e| FailedMutation {
                sequence: e.sequence,
                record_id: e.record_id,
                kind: e.kind,
                error: e.last_error.unwrap_or_default(),
            })
            .collect()
    }

    /// Drops a terminal entry, unblocking its record.
    ///
    /// The local copy is left as is; [`refresh`](Self::refresh) replaces
    /// it with the server's.
    pub fn discard_failed(&self, sequence: u64) -> SyncResult<()> {
        match self.queue.get(sequence) {
            Some(entry) if entry.terminal => {
                self.queue.discard(sequence)?;
                info!(sequence, record = %entry.record_id, "failed mutation discarded");
                Ok(())
            }
            _ => Err(crate::error::QueueError::NotFound(sequence).into()),
        }
    }

    /// Fetches the server's copy of a record.
    ///
    /// Returns `None` if the server does not hold it.
    pub async fn fetch(&self, record_id: RecordId) -> SyncResult<Option<VersionedRecord>> {
        let transport = &self.transport;
        let result = self
            .executor
            .execute(move || async move {
                let response = transport.fetch(record_id).await?;
                if response.status == Status::NOT_FOUND {
                    return Ok(None);
                }
                into_result(response).map(|r| r.record)
            })
            .await;
        Ok(result?)
    }

    /// Replaces the local copy of a record with the server's.
    ///
    /// Records with pending mutations are left alone; the drain settles
    /// them.
    pub async fn refresh(&self, record_id: RecordId) -> SyncResult<Option<VersionedRecord>> {
        if !self.queue.pending_for(record_id).is_empty() {
            return Ok(self.local.get(record_id)?.map(|l| l.record));
        }
        match self.fetch(record_id).await? {
            Some(record) => {
                self.local.record_synced(&record)?;
                Ok(Some(record))
            }
            None => {
                self.local.remove(record_id)?;
                Ok(None)
            }
        }
    }
}

impl std::fmt::Debug for SyncEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("config", &self.config)
            .field("queue", &self.queue)
            .field("draining", &self.is_draining())
            .field("parked", &self.parked.lock().len())
            .finish()
    }
}
