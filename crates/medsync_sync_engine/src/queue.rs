//! Durable mutation queue.
//!
//! Local writes wait here until the server accepts them. The queue is an
//! append-only log of checksummed frames: every change to the queue is
//! written as one frame and synced before the call returns, then applied to
//! the in-memory view. Opening the queue replays the same frames through the
//! same apply step, so the reopened queue is exactly the queue that was
//! closed (or crashed).
//!
//! ## Frame types
//!
//! | Type | Frame | Effect |
//! |------|-------|--------|
//! | 1 | `Enqueued` | adds an entry |
//! | 2 | `Synced` | removes an accepted entry |
//! | 3 | `Failed` | bumps the retry count, optionally marks terminal |
//! | 4 | `Discarded` | removes an entry without syncing it |
//! | 5 | `Rebased` | moves an entry onto a newer server version |

use crate::error::{QueueError, QueueResult};
use medsync_protocol::{
    from_cbor, now_ms, to_cbor, MutationKind, MutationRequest, RecordId, INITIAL_VERSION,
    UNVERSIONED,
};
use medsync_storage::{
    append_frame, encode_frame, scan_frames, DirLock, FileBackend, StorageBackend, StorageError,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, info, warn};

/// Magic bytes at the start of every queue frame.
pub const QUEUE_MAGIC: [u8; 4] = *b"MSMQ";

/// Queue file name inside a queue directory.
pub const QUEUE_FILE: &str = "queue.log";

const FORMAT_VERSION: u16 = 1;

/// A mutation to enqueue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMutation {
    /// Target record.
    pub record_id: RecordId,
    /// Mutation kind.
    pub kind: MutationKind,
    /// Payload for creates and updates.
    pub payload: Option<Vec<u8>>,
    /// Version the mutation applies on top of. `None` for creates.
    pub expected_version: Option<u64>,
}

impl NewMutation {
    /// A create of a client-generated id.
    pub fn create(record_id: RecordId, payload: Vec<u8>) -> Self {
        Self {
            record_id,
            kind: MutationKind::Create,
            payload: Some(payload),
            expected_version: None,
        }
    }

    /// An update on top of `expected_version`.
    pub fn update(record_id: RecordId, expected_version: u64, payload: Vec<u8>) -> Self {
        Self {
            record_id,
            kind: MutationKind::Update,
            payload: Some(payload),
            expected_version: Some(expected_version),
        }
    }

    /// A delete of `expected_version`.
    pub fn delete(record_id: RecordId, expected_version: u64) -> Self {
        Self {
            record_id,
            kind: MutationKind::Delete,
            payload: None,
            expected_version: Some(expected_version),
        }
    }

    fn validate(&self) -> QueueResult<()> {
        let ok = match self.kind {
            MutationKind::Create => self.payload.is_some() && self.expected_version.is_none(),
            MutationKind::Update => self.payload.is_some() && self.expected_version.is_some(),
            MutationKind::Delete => self.expected_version.is_some(),
        };
        if ok {
            Ok(())
        } else {
            Err(QueueError::InvalidMutation(format!(
                "{} for {} has the wrong fields",
                self.kind, self.record_id
            )))
        }
    }
}

/// A queued mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueEntry {
    /// Position in the queue; strictly increasing. A compaction that
    /// leaves the queue empty restarts numbering at 1.
    pub sequence: u64,
    /// Target record.
    pub record_id: RecordId,
    /// Mutation kind.
    pub kind: MutationKind,
    /// Payload for creates and updates.
    pub payload: Option<Vec<u8>>,
    /// Version the mutation applies on top of. `None` for creates.
    pub expected_version: Option<u64>,
    /// Failed sync attempts (each a full retry cycle).
    pub retry_count: u32,
    /// Set when the server rejected the mutation permanently.
    pub terminal: bool,
    /// Last failure message.
    pub last_error: Option<String>,
    /// Local enqueue time in milliseconds since the Unix epoch.
    pub enqueued_at_ms: u64,
}

impl QueueEntry {
    /// Builds the wire request for this entry.
    pub fn to_request(&self) -> MutationRequest {
        MutationRequest {
            kind: self.kind,
            record_id: self.record_id,
            payload: self.payload.clone(),
            expected_version: self.expected_version,
        }
    }

    /// Version the record will have on the server once this entry is
    /// accepted.
    pub fn result_version(&self) -> u64 {
        match self.expected_version {
            Some(expected) => expected + 1,
            None => INITIAL_VERSION,
        }
    }

    /// Returns true if the entry is waiting to be sent.
    pub fn is_pending(&self) -> bool {
        !self.terminal
    }
}

/// One frame of the queue log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueueEvent {
    /// An entry was added.
    Enqueued(QueueEntry),
    /// The server accepted an entry.
    Synced {
        /// Entry sequence.
        sequence: u64,
    },
    /// A sync attempt for an entry failed.
    Failed {
        /// Entry sequence.
        sequence: u64,
        /// Whether the failure is permanent.
        terminal: bool,
        /// Failure message.
        error: String,
    },
    /// An entry was dropped without syncing.
    Discarded {
        /// Entry sequence.
        sequence: u64,
    },
    /// An entry was moved onto a newer server version.
    Rebased {
        /// Entry sequence.
        sequence: u64,
        /// New expected version.
        expected_version: u64,
        /// Kind after the rebase.
        kind: MutationKind,
        /// Payload after the rebase.
        payload: Option<Vec<u8>>,
    },
}

impl QueueEvent {
    /// Frame type byte for this event.
    pub fn frame_type(&self) -> u8 {
        match self {
            QueueEvent::Enqueued(_) => 1,
            QueueEvent::Synced { .. } => 2,
            QueueEvent::Failed { .. } => 3,
            QueueEvent::Discarded { .. } => 4,
            QueueEvent::Rebased { .. } => 5,
        }
    }

    /// Sequence of the entry this event concerns.
    pub fn sequence(&self) -> u64 {
        match self {
            QueueEvent::Enqueued(entry) => entry.sequence,
            QueueEvent::Synced { sequence }
            | QueueEvent::Failed { sequence, .. }
            | QueueEvent::Discarded { sequence }
            | QueueEvent::Rebased { sequence, .. } => *sequence,
        }
    }

    /// Short name for logs and CLI output.
    pub fn name(&self) -> &'static str {
        match self {
            QueueEvent::Enqueued(_) => "enqueued",
            QueueEvent::Synced { .. } => "synced",
            QueueEvent::Failed { .. } => "failed",
            QueueEvent::Discarded { .. } => "discarded",
            QueueEvent::Rebased { .. } => "rebased",
        }
    }
}

/// Decoded contents of a queue log, without repairing it.
#[derive(Debug, Clone, Default)]
pub struct QueueLog {
    /// Events with their byte offsets, in log order.
    pub events: Vec<(u64, QueueEvent)>,
    /// Length of the valid prefix.
    pub valid_len: u64,
    /// Bytes of a torn frame at the tail.
    pub torn_bytes: u64,
}

impl QueueLog {
    /// Reads and decodes every frame.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Corrupted`] for damage before the tail or a
    /// frame that does not decode.
    pub fn read(backend: &dyn StorageBackend) -> QueueResult<Self> {
        let scan = scan_frames(backend, QUEUE_MAGIC).map_err(|e| match e {
            StorageError::Corrupted(msg) => QueueError::Corrupted(msg),
            other => QueueError::Storage(other),
        })?;

        let mut events = Vec::with_capacity(scan.frames.len());
        for frame in scan.frames {
            if frame.version != FORMAT_VERSION {
                return Err(QueueError::Corrupted(format!(
                    "unsupported format version {} at offset {}",
                    frame.version, frame.offset
                )));
            }
            let event: QueueEvent = from_cbor(&frame.payload).map_err(|e| {
                QueueError::Corrupted(format!("undecodable frame at offset {}: {e}", frame.offset))
            })?;
            if event.frame_type() != frame.frame_type {
                return Err(QueueError::Corrupted(format!(
                    "frame type {} does not match {} event at offset {}",
                    frame.frame_type,
                    event.name(),
                    frame.offset
                )));
            }
            events.push((frame.offset, event));
        }

        Ok(Self {
            events,
            valid_len: scan.valid_len,
            torn_bytes: scan.torn_bytes,
        })
    }
}

struct State {
    backend: Box<dyn StorageBackend>,
    entries: BTreeMap<u64, QueueEntry>,
    next_sequence: u64,
}

impl State {
    fn empty(backend: Box<dyn StorageBackend>) -> Self {
        Self {
            backend,
            entries: BTreeMap::new(),
            next_sequence: 1,
        }
    }

    /// Persists `event`, then applies it.
    ///
    /// On error nothing is applied and the frame is rolled back out of the
    /// log. A failed enqueue still uses up its sequence.
    fn commit(&mut self, event: QueueEvent) -> QueueResult<()> {
        let payload = to_cbor(&event)?;
        if let Err(e) = append_frame(
            self.backend.as_mut(),
            QUEUE_MAGIC,
            FORMAT_VERSION,
            event.frame_type(),
            &payload,
        ) {
            if let QueueEvent::Enqueued(entry) = &event {
                self.next_sequence = self.next_sequence.max(entry.sequence + 1);
            }
            warn!(sequence = event.sequence(), event = event.name(), error = %e, "queue write failed");
            return Err(e.into());
        }
        self.apply(event)
    }

    /// Applies a frame read back from the log.
    ///
    /// Frames for an entry that is already gone are duplicates of a write
    /// whose rollback failed and are skipped.
    fn replay(&mut self, event: QueueEvent) -> QueueResult<()> {
        let sequence = event.sequence();
        if !matches!(event, QueueEvent::Enqueued(_)) && !self.entries.contains_key(&sequence) {
            debug!(sequence, event = event.name(), "skipping frame for a settled entry");
            return Ok(());
        }
        self.apply(event)
    }

    fn entry_mut(&mut self, sequence: u64) -> QueueResult<&mut QueueEntry> {
        self.entries
            .get_mut(&sequence)
            .ok_or(QueueError::NotFound(sequence))
    }

    fn apply(&mut self, event: QueueEvent) -> QueueResult<()> {
        match event {
            QueueEvent::Enqueued(entry) => {
                self.next_sequence = self.next_sequence.max(entry.sequence + 1);
                self.entries.insert(entry.sequence, entry);
            }
            QueueEvent::Synced { sequence } | QueueEvent::Discarded { sequence } => {
                self.entries
                    .remove(&sequence)
                    .ok_or(QueueError::NotFound(sequence))?;
            }
            QueueEvent::Failed {
                sequence,
                terminal,
                error,
            } => {
                let entry = self.entry_mut(sequence)?;
                entry.retry_count = entry.retry_count.saturating_add(1);
                entry.terminal |= terminal;
                entry.last_error = Some(error);
            }
            QueueEvent::Rebased {
                sequence,
                expected_version,
                kind,
                payload,
            } => {
                let entry = self.entry_mut(sequence)?;
                let record_id = entry.record_id;
                let old_result = entry.result_version();
                entry.expected_version = Some(expected_version);
                entry.kind = kind;
                entry.payload = payload;
                entry.terminal = false;
                let new_result = entry.result_version();

                // Later entries for the record were chained on the old
                // result version; move them by the same amount.
                for later in self
                    .entries
                    .range_mut(sequence + 1..)
                    .map(|(_, e)| e)
                    .filter(|e| e.record_id == record_id)
                {
                    if let Some(expected) = later.expected_version.as_mut() {
                        *expected = shift(*expected, old_result, new_result);
                    }
                }
            }
        }
        Ok(())
    }
}

fn shift(version: u64, from: u64, to: u64) -> u64 {
    if to >= from {
        version.saturating_add(to - from)
    } else {
        version.saturating_sub(from - to)
    }
}

/// Durable FIFO of pending mutations.
///
/// Entries are kept in sequence order. Terminal entries (rejected
/// permanently by the server) stay in the queue, outside the pending view,
/// until discarded.
pub struct MutationQueue {
    state: Mutex<State>,
    lock: Option<DirLock>,
}

impl MutationQueue {
    /// Opens a queue over `backend`, replaying its log.
    ///
    /// A torn frame at the tail is truncated.
    pub fn open(mut backend: Box<dyn StorageBackend>) -> QueueResult<Self> {
        let log = QueueLog::read(backend.as_ref())?;
        if log.torn_bytes > 0 {
            info!(
                valid_len = log.valid_len,
                torn_bytes = log.torn_bytes,
                "truncating torn queue frame"
            );
            backend.truncate(log.valid_len)?;
        }

        let frames = log.events.len();
        let mut state = State::empty(backend);
        for (offset, event) in log.events {
            state.replay(event).map_err(|e| {
                QueueError::Corrupted(format!("frame at offset {offset} does not replay: {e}"))
            })?;
        }

        info!(
            frames,
            entries = state.entries.len(),
            next_sequence = state.next_sequence,
            "mutation queue opened"
        );

        Ok(Self {
            state: Mutex::new(state),
            lock: None,
        })
    }

    /// Opens the queue stored in `dir`, taking an exclusive lock on the
    /// directory for the queue's lifetime.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Locked`] (wrapped) if another process or
    /// queue instance holds the directory.
    pub fn open_dir(dir: &Path) -> QueueResult<Self> {
        let lock = DirLock::acquire(dir)?;
        let backend = FileBackend::open(&dir.join(QUEUE_FILE))?;
        let mut queue = Self::open(Box::new(backend))?;
        queue.lock = Some(lock);
        Ok(queue)
    }

    /// Appends a mutation and returns the stored entry.
    ///
    /// The entry is durable when this returns.
    pub fn enqueue(&self, mutation: NewMutation) -> QueueResult<QueueEntry> {
        mutation.validate()?;
        let mut state = self.state.lock();
        let entry = QueueEntry {
            sequence: state.next_sequence,
            record_id: mutation.record_id,
            kind: mutation.kind,
            payload: mutation.payload,
            expected_version: mutation.expected_version,
            retry_count: 0,
            terminal: false,
            last_error: None,
            enqueued_at_ms: now_ms(),
        };
        state.commit(QueueEvent::Enqueued(entry.clone()))?;
        debug!(
            sequence = entry.sequence,
            record = %entry.record_id,
            kind = %entry.kind,
            "mutation enqueued"
        );
        Ok(entry)
    }

    /// Returns the oldest pending entry.
    pub fn peek(&self) -> Option<QueueEntry> {
        self.state
            .lock()
            .entries
            .values()
            .find(|e| e.is_pending())
            .cloned()
    }

    /// Removes an entry the server accepted.
    pub fn mark_synced(&self, sequence: u64) -> QueueResult<()> {
        let mut state = self.state.lock();
        state.entry_mut(sequence)?;
        state.commit(QueueEvent::Synced { sequence })
    }

    /// Records a failed sync attempt. Terminal entries leave the pending view.
    pub fn mark_failed(
        &self,
        sequence: u64,
        terminal: bool,
        error: impl Into<String>,
    ) -> QueueResult<()> {
        let mut state = self.state.lock();
        state.entry_mut(sequence)?;
        state.commit(QueueEvent::Failed {
            sequence,
            terminal,
            error: error.into(),
        })
    }

    /// Drops an entry without syncing it.
    pub fn discard(&self, sequence: u64) -> QueueResult<()> {
        let mut state = self.state.lock();
        state.entry_mut(sequence)?;
        state.commit(QueueEvent::Discarded { sequence })
    }

    /// Moves an entry onto server version `expected_version`.
    ///
    /// A create becomes an update. A delete stays a delete unless a merged
    /// payload is given, in which case it becomes an update carrying it.
    /// `payload`, when given, replaces the entry's payload. Later entries for
    /// the same record are shifted by the same number of versions.
    pub fn rebase(
        &self,
        sequence: u64,
        expected_version: u64,
        payload: Option<Vec<u8>>,
    ) -> QueueResult<QueueEntry> {
        let mut state = self.state.lock();
        let entry = state.entry_mut(sequence)?.clone();

        let (kind, payload) = match (entry.kind, payload) {
            (MutationKind::Delete, None) => (MutationKind::Delete, None),
            (_, Some(merged)) => (MutationKind::Update, Some(merged)),
            (_, None) => (MutationKind::Update, entry.payload.clone()),
        };

        state.commit(QueueEvent::Rebased {
            sequence,
            expected_version,
            kind,
            payload,
        })?;
        debug!(
            sequence,
            from = entry.expected_version.unwrap_or(UNVERSIONED),
            to = expected_version,
            "mutation rebased"
        );
        state.entry_mut(sequence).map(|e| e.clone())
    }

    /// Returns pending entries in sequence order.
    pub fn list_pending(&self) -> Vec<QueueEntry> {
        self.state
            .lock()
            .entries
            .values()
            .filter(|e| e.is_pending())
            .cloned()
            .collect()
    }

    /// Returns terminal entries in sequence order.
    pub fn list_failed(&self) -> Vec<QueueEntry> {
        self.state
            .lock()
            .entries
            .values()
            .filter(|e| e.terminal)
            .cloned()
            .collect()
    }

    /// Returns pending entries for one record in sequence order.
    pub fn pending_for(&self, record_id: RecordId) -> Vec<QueueEntry> {
        self.state
            .lock()
            .entries
            .values()
            .filter(|e| e.record_id == record_id && e.is_pending())
            .cloned()
            .collect()
    }

    /// Returns an entry by sequence.
    pub fn get(&self, sequence: u64) -> Option<QueueEntry> {
        self.state.lock().entries.get(&sequence).cloned()
    }

    /// Number of entries, terminal ones included.
    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    /// Returns true if the queue holds no entries.
    pub fn is_empty(&self) -> bool {
        self.state.lock().entries.is_empty()
    }

    /// Sequence the next enqueued entry will get.
    pub fn next_sequence(&self) -> u64 {
        self.state.lock().next_sequence
    }

    /// Writes the live entries to `target` as a fresh log, one `Enqueued`
    /// frame each. Returns the number of entries written.
    ///
    /// The queue itself is unchanged; the caller swaps the logs. A queue
    /// reopened on the compacted log numbers new entries after its last
    /// live entry, so sequences of settled entries may be handed out again.
    pub fn compact_into(&self, target: &mut dyn StorageBackend) -> QueueResult<usize> {
        let state = self.state.lock();
        let mut data = Vec::new();
        for entry in state.entries.values() {
            let event = QueueEvent::Enqueued(entry.clone());
            let payload = to_cbor(&event)?;
            data.extend(encode_frame(
                QUEUE_MAGIC,
                FORMAT_VERSION,
                event.frame_type(),
                &payload,
            )?);
        }
        target.append(&data)?;
        target.flush()?;
        target.sync()?;
        Ok(state.entries.len())
    }
}

impl std::fmt::Debug for MutationQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("MutationQueue")
            .field("entries", &state.entries.len())
            .field("next_sequence", &state.next_sequence)
            .field("locked", &self.lock.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use medsync_storage::InMemoryBackend;

    fn open(backend: &InMemoryBackend) -> MutationQueue {
        MutationQueue::open(Box::new(backend.clone())).unwrap()
    }

    #[test]
    fn fifo_order_and_sequences() {
        let queue = open(&InMemoryBackend::new());
        let a = RecordId::new();
        let b = RecordId::new();

        let first = queue.enqueue(NewMutation::create(a, vec![1])).unwrap();
        let second = queue.enqueue(NewMutation::create(b, vec![2])).unwrap();
        let third = queue.enqueue(NewMutation::update(a, 1, vec![3])).unwrap();

        assert_eq!((first.sequence, second.sequence, third.sequence), (1, 2, 3));
        assert_eq!(queue.peek().unwrap().sequence, 1);
        assert_eq!(
            queue.pending_for(a).iter().map(|e| e.sequence).collect::<Vec<_>>(),
            [1, 3]
        );

        queue.mark_synced(1).unwrap();
        assert_eq!(queue.peek().unwrap().sequence, 2);
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn replay_restores_state() {
        let backend = InMemoryBackend::new();
        let id = RecordId::new();
        {
            let queue = open(&backend);
            queue.enqueue(NewMutation::create(id, vec![1])).unwrap();
            queue.enqueue(NewMutation::update(id, 1, vec![2])).unwrap();
            queue.enqueue(NewMutation::delete(id, 2)).unwrap();
            queue.mark_synced(1).unwrap();
            queue.mark_failed(2, false, "timeout").unwrap();
            queue.mark_failed(3, true, "422").unwrap();
        }

        let queue = open(&backend);
        let pending = queue.list_pending();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].sequence, 2);
        assert_eq!(pending[0].retry_count, 1);
        assert_eq!(pending[0].last_error.as_deref(), Some("timeout"));

        let failed = queue.list_failed();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].sequence, 3);
        assert!(failed[0].terminal);

        // Sequences are never reused.
        let next = queue.enqueue(NewMutation::create(RecordId::new(), vec![])).unwrap();
        assert_eq!(next.sequence, 4);
    }

    #[test]
    fn sequences_survive_draining_the_queue() {
        let backend = InMemoryBackend::new();
        {
            let queue = open(&backend);
            let entry = queue.enqueue(NewMutation::create(RecordId::new(), vec![])).unwrap();
            queue.mark_synced(entry.sequence).unwrap();
        }
        let queue = open(&backend);
        assert!(queue.is_empty());
        assert_eq!(queue.next_sequence(), 2);
    }

    #[test]
    fn rebase_turns_create_into_update_and_shifts_successors() {
        let queue = open(&InMemoryBackend::new());
        let id = RecordId::new();
        queue.enqueue(NewMutation::create(id, b"a".to_vec())).unwrap();
        queue.enqueue(NewMutation::update(id, 1, b"b".to_vec())).unwrap();
        queue.enqueue(NewMutation::delete(id, 2)).unwrap();
        let other = queue
            .enqueue(NewMutation::update(RecordId::new(), 1, vec![]))
            .unwrap();

        // Server already holds the id at version 3.
        let rebased = queue.rebase(1, 3, None).unwrap();
        assert_eq!(rebased.kind, MutationKind::Update);
        assert_eq!(rebased.expected_version, Some(3));
        assert_eq!(rebased.payload.as_deref(), Some(&b"a"[..]));

        let chain: Vec<_> = queue
            .pending_for(id)
            .iter()
            .map(|e| e.expected_version)
            .collect();
        assert_eq!(chain, [Some(3), Some(4), Some(5)]);
        assert_eq!(queue.get(other.sequence).unwrap().expected_version, Some(1));
    }

    #[test]
    fn rebase_of_delete() {
        let queue = open(&InMemoryBackend::new());
        let id = RecordId::new();
        queue.enqueue(NewMutation::delete(id, 2)).unwrap();

        let kept = queue.rebase(1, 5, None).unwrap();
        assert_eq!(kept.kind, MutationKind::Delete);
        assert_eq!(kept.expected_version, Some(5));

        let merged = queue.rebase(1, 6, Some(b"merged".to_vec())).unwrap();
        assert_eq!(merged.kind, MutationKind::Update);
        assert_eq!(merged.payload.as_deref(), Some(&b"merged"[..]));
    }

    #[test]
    fn rebase_survives_replay() {
        let backend = InMemoryBackend::new();
        let id = RecordId::new();
        {
            let queue = open(&backend);
            queue.enqueue(NewMutation::create(id, vec![1])).unwrap();
            queue.enqueue(NewMutation::update(id, 1, vec![2])).unwrap();
            queue.rebase(1, 7, Some(vec![9])).unwrap();
        }
        let queue = open(&backend);
        let chain = queue.pending_for(id);
        assert_eq!(chain[0].expected_version, Some(7));
        assert_eq!(chain[0].payload, Some(vec![9]));
        assert_eq!(chain[1].expected_version, Some(8));
    }

    #[test]
    fn torn_tail_is_truncated() {
        let backend = InMemoryBackend::new();
        {
            let queue = open(&backend);
            queue.enqueue(NewMutation::create(RecordId::new(), vec![1])).unwrap();
            queue.enqueue(NewMutation::create(RecordId::new(), vec![2])).unwrap();
        }
        let intact = backend.data().len();
        let mut raw = backend.clone();
        raw.append(&QUEUE_MAGIC).unwrap();
        raw.append(&[1, 0, 1, 200]).unwrap();

        let queue = open(&backend);
        assert_eq!(queue.len(), 2);
        assert_eq!(backend.data().len(), intact);
    }

    #[test]
    fn mid_log_damage_is_corruption() {
        let backend = InMemoryBackend::new();
        {
            let queue = open(&backend);
            queue.enqueue(NewMutation::create(RecordId::new(), vec![1])).unwrap();
            queue.enqueue(NewMutation::create(RecordId::new(), vec![2])).unwrap();
        }
        let mut bytes = backend.data();
        bytes[14] ^= 0xFF;

        let result = MutationQueue::open(Box::new(InMemoryBackend::with_data(bytes)));
        assert!(matches!(result, Err(QueueError::Corrupted(_))));
    }

    #[test]
    fn invalid_mutations_are_refused() {
        let queue = open(&InMemoryBackend::new());
        let mut update = NewMutation::update(RecordId::new(), 1, vec![]);
        update.expected_version = None;
        assert!(matches!(
            queue.enqueue(update),
            Err(QueueError::InvalidMutation(_))
        ));
        assert!(queue.is_empty());
    }

    #[test]
    fn unknown_sequence() {
        let backend = InMemoryBackend::new();
        let queue = open(&backend);
        assert!(matches!(queue.mark_synced(9), Err(QueueError::NotFound(9))));
        assert!(matches!(queue.discard(9), Err(QueueError::NotFound(9))));
        assert!(matches!(queue.rebase(9, 2, None), Err(QueueError::NotFound(9))));
        // Nothing was written for the rejected calls.
        assert_eq!(queue.next_sequence(), 1);
        assert_eq!(backend.size().unwrap(), 0);
    }

    #[test]
    fn duplicate_settle_frames_replay() {
        let backend = InMemoryBackend::new();
        {
            let queue = open(&backend);
            let id = RecordId::new();
            queue.enqueue(NewMutation::create(id, b"a".to_vec())).unwrap();
            queue.enqueue(NewMutation::update(id, 1, b"b".to_vec())).unwrap();
            queue.mark_synced(1).unwrap();
        }

        // Frames left behind by writes whose rollback failed.
        let mut raw = backend.clone();
        for event in [
            QueueEvent::Synced { sequence: 1 },
            QueueEvent::Discarded { sequence: 1 },
            QueueEvent::Failed {
                sequence: 1,
                terminal: false,
                error: "timeout".into(),
            },
        ] {
            let payload = to_cbor(&event).unwrap();
            append_frame(&mut raw, QUEUE_MAGIC, FORMAT_VERSION, event.frame_type(), &payload)
                .unwrap();
        }

        let queue = open(&backend);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.peek().unwrap().sequence, 2);
    }

    #[test]
    fn failed_enqueue_uses_up_its_sequence() {
        let backend = InMemoryBackend::new();
        let queue = open(&backend);
        backend.fail_syncs(1);
        assert!(queue.enqueue(NewMutation::create(RecordId::new(), vec![])).is_err());
        assert!(queue.is_empty());
        assert_eq!(backend.size().unwrap(), 0);

        let entry = queue.enqueue(NewMutation::create(RecordId::new(), vec![])).unwrap();
        assert_eq!(entry.sequence, 2);
    }

    #[test]
    fn compaction_keeps_live_entries_only() {
        let queue = open(&InMemoryBackend::new());
        for i in 0..5u8 {
            queue.enqueue(NewMutation::create(RecordId::new(), vec![i])).unwrap();
        }
        queue.mark_synced(1).unwrap();
        queue.discard(2).unwrap();
        queue.mark_failed(3, true, "400").unwrap();

        let mut target = InMemoryBackend::new();
        assert_eq!(queue.compact_into(&mut target).unwrap(), 3);

        let compacted = open(&target);
        assert_eq!(compacted.len(), 3);
        assert_eq!(compacted.list_failed()[0].sequence, 3);
        assert_eq!(compacted.next_sequence(), 6);

        for sequence in [3, 4, 5] {
            queue.discard(sequence).unwrap();
        }
        let mut empty = InMemoryBackend::new();
        assert_eq!(queue.compact_into(&mut empty).unwrap(), 0);
        assert_eq!(open(&empty).next_sequence(), 1);
    }

    #[test]
    fn directory_is_locked() {
        let dir = tempfile::tempdir().unwrap();
        let queue = MutationQueue::open_dir(dir.path()).unwrap();
        assert!(matches!(
            MutationQueue::open_dir(dir.path()),
            Err(QueueError::Storage(StorageError::Locked(_)))
        ));
        drop(queue);
        assert!(MutationQueue::open_dir(dir.path()).is_ok());
    }
}
