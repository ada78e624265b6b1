//! The optimistic write path used by the UI.

use crate::error::{SyncError, SyncResult};
use crate::local::{LocalRecord, LocalStore};
use crate::queue::{MutationQueue, NewMutation, QueueEntry};
use crate::worker::SyncTrigger;
use medsync_protocol::{RecordId, VersionedRecord};
use std::sync::Arc;
use tracing::debug;

/// Device-side record writes.
///
/// Every write is enqueued (durable when the call returns), applied to the
/// local store, and then nudges the sync worker. Nothing here waits for the
/// network.
///
/// Writes to one record are chained: each queued mutation expects the
/// version the previous one will produce, so the local copy's `version`
/// always names the version the server will hold once the queue drains.
pub struct Replica {
    queue: Arc<MutationQueue>,
    local: Arc<dyn LocalStore>,
    trigger: SyncTrigger,
}

impl Replica {
    /// Creates a replica over `queue` and `local`, waking `trigger` after
    /// every write.
    pub fn new(queue: Arc<MutationQueue>, local: Arc<dyn LocalStore>, trigger: SyncTrigger) -> Self {
        Self {
            queue,
            local,
            trigger,
        }
    }

    /// Creates a record under a fresh client-generated id.
    pub fn create(&self, payload: Vec<u8>) -> SyncResult<RecordId> {
        let id = RecordId::new();
        self.create_with_id(id, payload)?;
        Ok(id)
    }

    /// Creates a record under `id`.
    pub fn create_with_id(&self, id: RecordId, payload: Vec<u8>) -> SyncResult<QueueEntry> {
        let entry = self.queue.enqueue(NewMutation::create(id, payload.clone()))?;
        self.local.put_local(VersionedRecord::new(id, payload))?;
        self.written(&entry);
        Ok(entry)
    }

    /// Replaces a record's payload.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::UnknownRecord`] if the record is not stored
    /// locally.
    pub fn update(&self, id: RecordId, payload: Vec<u8>) -> SyncResult<QueueEntry> {
        let current = self.current(id)?;
        let expected = current.record.version;
        let entry = self
            .queue
            .enqueue(NewMutation::update(id, expected, payload.clone()))?;
        self.local.put_local(current.record.next(payload))?;
        self.written(&entry);
        Ok(entry)
    }

    /// Deletes a record.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::UnknownRecord`] if the record is not stored
    /// locally.
    pub fn delete(&self, id: RecordId) -> SyncResult<QueueEntry> {
        let current = self.current(id)?;
        let entry = self
            .queue
            .enqueue(NewMutation::delete(id, current.record.version))?;
        self.local.remove(id)?;
        self.written(&entry);
        Ok(entry)
    }

    /// Returns the local copy of a record.
    pub fn get(&self, id: RecordId) -> SyncResult<Option<LocalRecord>> {
        self.local.get(id)
    }

    /// Returns the trigger this replica nudges.
    pub fn trigger(&self) -> &SyncTrigger {
        &self.trigger
    }

    fn current(&self, id: RecordId) -> SyncResult<LocalRecord> {
        self.local.get(id)?.ok_or(SyncError::UnknownRecord(id))
    }

    fn written(&self, entry: &QueueEntry) {
        debug!(
            sequence = entry.sequence,
            record = %entry.record_id,
            kind = %entry.kind,
            "local write queued"
        );
        self.trigger.request_sync();
    }
}
