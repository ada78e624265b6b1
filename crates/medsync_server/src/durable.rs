//! Durable versioned store.
//!
//! Every accepted mutation appends the record's new row image to a frame log
//! and syncs it before the call returns. Opening the store replays the log;
//! the last image of each id wins.

use crate::store::{rules, Row, StoreError, StoreResult, VersionedStore};
use medsync_protocol::{from_cbor, to_cbor, RecordId, VersionedRecord};
use medsync_storage::{append_frame, scan_frames, FileBackend, StorageBackend};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info};

const STORE_MAGIC: [u8; 4] = *b"MSRS";
const FORMAT_VERSION: u16 = 1;
const FRAME_ROW_IMAGE: u8 = 1;

struct State {
    backend: Box<dyn StorageBackend>,
    rows: HashMap<RecordId, Row>,
}

impl State {
    /// Persists `row`, then installs it in the index.
    fn write(&mut self, row: Row) -> StoreResult<()> {
        let payload = to_cbor(&row).map_err(|e| StoreError::Corrupted(e.to_string()))?;
        append_frame(
            self.backend.as_mut(),
            STORE_MAGIC,
            FORMAT_VERSION,
            FRAME_ROW_IMAGE,
            &payload,
        )?;
        self.rows.insert(row.id(), row);
        Ok(())
    }
}

/// A [`VersionedStore`] persisted to a [`StorageBackend`].
///
/// The version compare, the frame append and the index update run as one
/// step under the store's lock.
pub struct DurableStore {
    state: Mutex<State>,
}

impl DurableStore {
    /// Opens a store over `backend`, replaying its log.
    ///
    /// A torn frame left by a crash is truncated.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Corrupted`] if a frame before the tail fails
    /// its checksum or does not decode.
    pub fn open(mut backend: Box<dyn StorageBackend>) -> StoreResult<Self> {
        let scan = scan_frames(backend.as_ref(), STORE_MAGIC).map_err(|e| match e {
            medsync_storage::StorageError::Corrupted(msg) => StoreError::Corrupted(msg),
            other => StoreError::Storage(other),
        })?;
        scan.repair(backend.as_mut())?;

        let mut rows = HashMap::new();
        for frame in &scan.frames {
            if frame.frame_type != FRAME_ROW_IMAGE {
                return Err(StoreError::Corrupted(format!(
                    "unknown frame type {} at offset {}",
                    frame.frame_type, frame.offset
                )));
            }
            let row: Row = from_cbor(&frame.payload).map_err(|e| {
                StoreError::Corrupted(format!("row image at offset {}: {e}", frame.offset))
            })?;
            rows.insert(row.id(), row);
        }

        info!(
            frames = scan.frames.len(),
            records = rows.len(),
            "record store opened"
        );

        Ok(Self {
            state: Mutex::new(State { backend, rows }),
        })
    }

    /// Opens (or creates) a store in a file.
    pub fn open_path(path: &Path) -> StoreResult<Self> {
        let backend = FileBackend::open_with_create_dirs(path)?;
        Self::open(Box::new(backend))
    }

    /// Returns the size of the log in bytes.
    pub fn log_size(&self) -> StoreResult<u64> {
        Ok(self.state.lock().backend.size()?)
    }
}

impl VersionedStore for DurableStore {
    fn create_with_id(&self, id: RecordId, payload: Vec<u8>) -> StoreResult<VersionedRecord> {
        let mut state = self.state.lock();
        match rules::create(state.rows.get(&id), id, payload)? {
            Some(record) => {
                state.write(Row::Live(record.clone()))?;
                debug!(%id, "record created");
                Ok(record)
            }
            None => match state.rows.get(&id) {
                Some(Row::Live(existing)) => Ok(existing.clone()),
                _ => Err(StoreError::NotFound(id)),
            },
        }
    }

    fn get(&self, id: RecordId) -> StoreResult<VersionedRecord> {
        match self.state.lock().rows.get(&id) {
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
        let mut state = self.state.lock();
        let updated = rules::update(state.rows.get(&id), id, expected_version, payload)?;
        state.write(Row::Live(updated.clone()))?;
        debug!(%id, version = updated.version, "record updated");
        Ok(updated)
    }

    fn delete(&self, id: RecordId, expected_version: u64) -> StoreResult<()> {
        let mut state = self.state.lock();
        let tombstone = rules::delete(state.rows.get(&id), id, expected_version)?;
        state.write(tombstone)?;
        debug!(%id, "record deleted");
        Ok(())
    }

    fn len(&self) -> usize {
        self.state
            .lock()
            .rows
            .values()
            .filter(|row| matches!(row, Row::Live(_)))
            .count()
    }
}
