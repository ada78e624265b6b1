//! In-memory versioned store.

use crate::store::{rules, Row, StoreError, StoreResult, VersionedStore};
use medsync_protocol::{RecordId, VersionedRecord};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::debug;

/// A [`VersionedStore`] held in a map.
///
/// Each conditional write is one compare-and-set under the map's write
/// lock. [`set_unavailable`](Self::set_unavailable) simulates an outage.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    rows: RwLock<HashMap<RecordId, Row>>,
    unavailable: AtomicBool,
}

impl InMemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every call fail with [`StoreError::Unavailable`] until cleared.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Returns true if `id` has been deleted.
    pub fn is_tombstoned(&self, id: RecordId) -> bool {
        matches!(self.rows.read().get(&id), Some(Row::Deleted { .. }))
    }

    fn check_available(&self) -> StoreResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("in-memory store offline".into()));
        }
        Ok(())
    }
}

impl VersionedStore for InMemoryStore {
    fn create_with_id(&self, id: RecordId, payload: Vec<u8>) -> StoreResult<VersionedRecord> {
        self.check_available()?;
        let mut rows = self.rows.write();
        match rules::create(rows.get(&id), id, payload)? {
            Some(record) => {
                rows.insert(id, Row::Live(record.clone()));
                debug!(%id, "record created");
                Ok(record)
            }
            None => match rows.get(&id) {
                Some(Row::Live(existing)) => Ok(existing.clone()),
                _ => Err(StoreError::NotFound(id)),
            },
        }
    }

    fn get(&self, id: RecordId) -> StoreResult<VersionedRecord> {
        self.check_available()?;
        match self.rows.read().get(&id) {
            Some(Row::Live(record)) => Ok(record.clone()),
            _ => Err(StoreError::NotFound(id)),
        }
    }

    fn conditional_update(
        &self,
        id: RecordId,
        expected_version: u64,
        payload: Vec<u8>,
    ) -> StoreResult<VersionedRecord> {
        self.check_available()?;
        let mut rows = self.rows.write();
        let updated = rules::update(rows.get(&id), id, expected_version, payload)?;
        rows.insert(id, Row::Live(updated.clone()));
        debug!(%id, version = updated.version, "record updated");
        Ok(updated)
    }

    fn delete(&self, id: RecordId, expected_version: u64) -> StoreResult<()> {
        self.check_available()?;
        let mut rows = self.rows.write();
        let tombstone = rules::delete(rows.get(&id), id, expected_version)?;
        rows.insert(id, tombstone);
        debug!(%id, "record deleted");
        Ok(())
    }

    fn len(&self) -> usize {
        self.rows
            .read()
            .values()
            .filter(|row| matches!(row, Row::Live(_)))
            .count()
    }
}
