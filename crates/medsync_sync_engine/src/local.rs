//! The device's local copy of records.

use crate::error::SyncResult;
use medsync_protocol::{RecordId, VersionedRecord};
use parking_lot::RwLock;
use std::collections::HashMap;
use tracing::debug;

/// A record as the device currently sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalRecord {
    /// The record. For a dirty record, `version` is the version the server
    /// will assign once every queued mutation is accepted.
    pub record: VersionedRecord,
    /// True while queued mutations for the record have not synced.
    pub dirty: bool,
}

/// Local storage the sync engine reads from and writes back to.
///
/// The UI writes through [`crate::Replica`], which calls
/// [`put_local`](LocalStore::put_local) and
/// [`remove`](LocalStore::remove). The engine calls
/// [`record_synced`](LocalStore::record_synced) when the server accepted the
/// last queued mutation for a record and
/// [`adopt_remote`](LocalStore::adopt_remote) when a conflict was resolved
/// in the server's favour.
pub trait LocalStore: Send + Sync {
    /// Returns the local copy of a record.
    fn get(&self, id: RecordId) -> SyncResult<Option<LocalRecord>>;

    /// Stores an optimistic local write.
    fn put_local(&self, record: VersionedRecord) -> SyncResult<()>;

    /// Stores the server's copy after the record fully synced.
    fn record_synced(&self, record: &VersionedRecord) -> SyncResult<()>;

    /// Replaces the local copy with the server's after a conflict.
    fn adopt_remote(&self, record: &VersionedRecord) -> SyncResult<()> {
        self.record_synced(record)
    }

    /// Removes a record.
    fn remove(&self, id: RecordId) -> SyncResult<()>;
}

/// In-memory local store.
#[derive(Debug, Default)]
pub struct MemoryLocalStore {
    records: RwLock<HashMap<RecordId, LocalRecord>>,
}

impl MemoryLocalStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of local records.
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    /// Returns true if no records are stored.
    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    /// Returns ids of records with unsynced local writes.
    pub fn dirty_ids(&self) -> Vec<RecordId> {
        self.records
            .read()
            .values()
            .filter(|r| r.dirty)
            .map(|r| r.record.id)
            .collect()
    }
}

impl LocalStore for MemoryLocalStore {
    fn get(&self, id: RecordId) -> SyncResult<Option<LocalRecord>> {
        Ok(self.records.read().get(&id).cloned())
    }

    fn put_local(&self, record: VersionedRecord) -> SyncResult<()> {
        self.records.write().insert(
            record.id,
            LocalRecord {
                record,
                dirty: true,
            },
        );
        Ok(())
    }

    fn record_synced(&self, record: &VersionedRecord) -> SyncResult<()> {
        self.records.write().insert(
            record.id,
            LocalRecord {
                record: record.clone(),
                dirty: false,
            },
        );
        Ok(())
    }

    fn adopt_remote(&self, record: &VersionedRecord) -> SyncResult<()> {
        debug!(record = %record.id, version = record.version, "adopting server copy");
        self.record_synced(record)
    }

    fn remove(&self, id: RecordId) -> SyncResult<()> {
        self.records.write().remove(&id);
        Ok(())
    }
}
