//! The versioned record store contract.

use medsync_protocol::{RecordId, VersionedRecord};
use medsync_resilience::{Classify, ErrorClass};
use medsync_storage::StorageError;
use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors returned by a [`VersionedStore`].
#[derive(Error, Debug)]
pub enum StoreError {
    /// The caller's expected version is not the stored version.
    #[error("version conflict on {}: stored version is {}", .current.id, .current.version)]
    Conflict {
        /// The record as currently stored.
        current: Box<VersionedRecord>,
    },

    /// No live record has this id.
    #[error("record not found: {0}")]
    NotFound(RecordId),

    /// The store is temporarily unreachable.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// The store aborted the write (deadlock victim, serialization failure).
    #[error("serialization failure: {0}")]
    SerializationFailure(String),

    /// The write violates a store-level constraint.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Persisted state could not be decoded.
    #[error("store corrupted: {0}")]
    Corrupted(String),

    /// Underlying storage failure.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

impl StoreError {
    /// Builds a conflict carrying `current`.
    pub fn conflict(current: VersionedRecord) -> Self {
        StoreError::Conflict {
            current: Box::new(current),
        }
    }

    /// Returns true if the store answered correctly and the failure is the
    /// caller's (conflict, not found, validation).
    ///
    /// Such outcomes say nothing about the store's health.
    pub fn is_answer(&self) -> bool {
        match self {
            StoreError::Conflict { .. } | StoreError::NotFound(_) | StoreError::Validation(_) => {
                true
            }
            StoreError::Unavailable(_)
            | StoreError::SerializationFailure(_)
            | StoreError::Corrupted(_)
            | StoreError::Storage(_) => false,
        }
    }
}

impl Classify for StoreError {
    fn class(&self) -> ErrorClass {
        match self {
            StoreError::Conflict { .. } => ErrorClass::Conflict,
            StoreError::NotFound(_) | StoreError::Validation(_) | StoreError::Corrupted(_) => {
                ErrorClass::Fatal
            }
            StoreError::Unavailable(_) | StoreError::SerializationFailure(_) => {
                ErrorClass::Retryable
            }
            StoreError::Storage(e) => e.class(),
        }
    }
}

/// Record storage with optimistic concurrency control.
///
/// Every accepted mutation raises the record's version by exactly one. A
/// conditional write compares the stored version with the caller's and
/// writes in a single atomic step, so of any number of concurrent writers
/// holding the same expected version exactly one succeeds and the rest get
/// [`StoreError::Conflict`] with the winner's record.
///
/// Deleted ids are tombstoned: every later operation on them returns
/// [`StoreError::NotFound`] and a create never brings them back.
pub trait VersionedStore: Send + Sync {
    /// Inserts a record under a fresh server-generated id at version 1.
    fn create(&self, payload: Vec<u8>) -> StoreResult<VersionedRecord> {
        self.create_with_id(RecordId::new(), payload)
    }

    /// Inserts a record under a caller-chosen id at version 1.
    ///
    /// Replaying a create whose response was lost (same id, still at
    /// version 1, same payload) returns the stored record. Any other
    /// existing record is a conflict.
    fn create_with_id(&self, id: RecordId, payload: Vec<u8>) -> StoreResult<VersionedRecord>;

    /// Returns the current record.
    fn get(&self, id: RecordId) -> StoreResult<VersionedRecord>;

    /// Replaces the payload if the stored version equals `expected_version`.
    fn conditional_update(
        &self,
        id: RecordId,
        expected_version: u64,
        payload: Vec<u8>,
    ) -> StoreResult<VersionedRecord>;

    /// Deletes the record if the stored version equals `expected_version`.
    fn delete(&self, id: RecordId, expected_version: u64) -> StoreResult<()>;

    /// Number of live records.
    fn len(&self) -> usize;

    /// Returns true if there are no live records.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Stored state of one id.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub(crate) enum Row {
    Live(VersionedRecord),
    Deleted { id: RecordId, version: u64 },
}

impl Row {
    pub(crate) fn id(&self) -> RecordId {
        match self {
            Row::Live(record) => record.id,
            Row::Deleted { id, .. } => *id,
        }
    }
}

/// Outcome of checking a mutation against the current row.
///
/// Shared by every store so the version rules live in one place.
pub(crate) mod rules {
    use super::{Row, StoreError, StoreResult};
    use medsync_protocol::{RecordId, VersionedRecord, INITIAL_VERSION};

    pub(crate) fn create(
        current: Option<&Row>,
        id: RecordId,
        payload: Vec<u8>,
    ) -> StoreResult<Option<VersionedRecord>> {
        match current {
            None => Ok(Some(VersionedRecord::new(id, payload))),
            Some(Row::Deleted { .. }) => Err(StoreError::NotFound(id)),
            Some(Row::Live(existing))
                if existing.version == INITIAL_VERSION && existing.payload == payload =>
            {
                // Replay; nothing to write.
                Ok(None)
            }
            Some(Row::Live(existing)) => Err(StoreError::conflict(existing.clone())),
        }
    }

    pub(crate) fn update(
        current: Option<&Row>,
        id: RecordId,
        expected_version: u64,
        payload: Vec<u8>,
    ) -> StoreResult<VersionedRecord> {
        match current {
            None | Some(Row::Deleted { .. }) => Err(StoreError::NotFound(id)),
            Some(Row::Live(existing)) if existing.version != expected_version => {
                Err(StoreError::conflict(existing.clone()))
            }
            Some(Row::Live(existing)) => Ok(existing.next(payload)),
        }
    }

    pub(crate) fn delete(current: Option<&Row>, id: RecordId, expected_version: u64) -> StoreResult<Row> {
        match current {
            None | Some(Row::Deleted { .. }) => Err(StoreError::NotFound(id)),
            Some(Row::Live(existing)) if existing.version != expected_version => {
                Err(StoreError::conflict(existing.clone()))
            }
            Some(Row::Live(existing)) => Ok(Row::Deleted {
                id,
                version: existing.version + 1,
            }),
        }
    }
}
