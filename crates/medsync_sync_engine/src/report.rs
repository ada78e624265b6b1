//! Drain reports and cumulative statistics.

use medsync_protocol::{Conflict, MutationKind, RecordId};
use std::fmt;
use std::time::{Duration, Instant};

/// Why a drain pass stopped before visiting every entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HaltReason {
    /// The sync server's breaker is open.
    CircuitOpen {
        /// Time until the breaker will admit a trial.
        retry_after: Duration,
    },
    /// The pass was cancelled.
    Cancelled,
}

impl fmt::Display for HaltReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HaltReason::CircuitOpen { retry_after } => {
                write!(f, "circuit open, retry after {retry_after:?}")
            }
            HaltReason::Cancelled => f.write_str("cancelled"),
        }
    }
}

/// A mutation the server rejected permanently.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedMutation {
    /// Queue sequence.
    pub sequence: u64,
    /// Target record.
    pub record_id: RecordId,
    /// Mutation kind.
    pub kind: MutationKind,
    /// Rejection message.
    pub error: String,
}

/// Outcome of one drain pass.
///
/// Counters are per entry. An entry ends the pass in at most one of
/// `synced`, `failed`, `deferred` or `conflicts` (parked); an entry dropped
/// by a `KeepRemote` decision is in none of them. `conflicted` and
/// `resolved` overlap those: an entry rebased after a conflict and then
/// accepted counts in `conflicted`, `resolved` and `synced`.
#[derive(Debug, Clone, Default)]
pub struct SyncReport {
    /// Entries the server accepted.
    pub synced: u64,
    /// Entries that met at least one version conflict.
    pub conflicted: u64,
    /// Entries marked terminal.
    pub failed: u64,
    /// Entries left pending for a later pass, parked conflicts excluded.
    pub deferred: u64,
    /// Resolver decisions applied during the pass.
    pub resolved: u64,
    /// Set when the pass stopped early.
    pub halted: Option<HaltReason>,
    /// True when the call found another drain running and did nothing.
    pub coalesced: bool,
    /// Entries that became terminal during the pass.
    pub failures: Vec<FailedMutation>,
    /// Conflicts parked for a manual decision during the pass.
    pub conflicts: Vec<Conflict>,
    /// Wall time of the pass.
    pub duration: Duration,
}

impl SyncReport {
    /// Report for a drain that joined one already in progress.
    pub fn coalesced() -> Self {
        Self {
            coalesced: true,
            ..Self::default()
        }
    }

    /// Returns true if the pass neither halted nor left work behind.
    pub fn is_clean(&self) -> bool {
        self.halted.is_none() && self.deferred == 0 && self.failed == 0 && self.conflicts.is_empty()
    }
}

/// Totals across every drain pass of an engine.
#[derive(Debug, Clone, Default)]
pub struct SyncStats {
    /// Drain passes run, coalesced calls excluded.
    pub passes: u64,
    /// Drain calls that coalesced into a running pass.
    pub coalesced: u64,
    /// Entries synced.
    pub synced: u64,
    /// Conflicts encountered.
    pub conflicts: u64,
    /// Entries marked terminal.
    pub failed: u64,
    /// Passes that halted early.
    pub halted: u64,
    /// End of the last pass.
    pub last_sync_time: Option<Instant>,
    /// Halt reason or failure of the last pass.
    pub last_error: Option<String>,
}

impl SyncStats {
    pub(crate) fn record(&mut self, report: &SyncReport) {
        if report.coalesced {
            self.coalesced += 1;
            return;
        }
        self.passes += 1;
        self.synced += report.synced;
        self.conflicts += report.conflicted;
        self.failed += report.failed;
        self.last_sync_time = Some(Instant::now());
        self.last_error = match (&report.halted, report.failures.last()) {
            (Some(reason), _) => {
                self.halted += 1;
                Some(reason.to_string())
            }
            (None, Some(failure)) => Some(failure.error.clone()),
            (None, None) => None,
        };
    }
}
