//! Error types for the sync engine.

use medsync_protocol::{ProtocolError, RecordId, Status, VersionedRecord};
use medsync_resilience::{CircuitOpenError, Classify, ErrorClass, ErrorClassifier, RetryError};
use medsync_storage::StorageError;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Result type for queue operations.
pub type QueueResult<T> = Result<T, QueueError>;

/// A network-level failure: the request never produced an HTTP response.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportFailure {
    /// Nothing is listening, or the device is offline.
    #[error("connection refused: {0}")]
    ConnectionRefused(String),

    /// The connection dropped mid-request.
    #[error("connection reset: {0}")]
    ConnectionReset(String),

    /// No response within the client's deadline.
    #[error("request timed out")]
    Timeout,

    /// Any other network failure.
    #[error("transport failure: {0}")]
    Other(String),
}

impl Classify for TransportFailure {
    fn class(&self) -> ErrorClass {
        match self {
            TransportFailure::ConnectionRefused(_)
            | TransportFailure::ConnectionReset(_)
            | TransportFailure::Timeout
            | TransportFailure::Other(_) => ErrorClass::Retryable,
        }
    }
}

/// Errors raised by the durable mutation queue.
#[derive(Error, Debug)]
pub enum QueueError {
    /// Underlying storage failure.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// The queue log is damaged before its tail.
    #[error("queue log corrupted: {0}")]
    Corrupted(String),

    /// No entry has this sequence number.
    #[error("no queue entry with sequence {0}")]
    NotFound(u64),

    /// The mutation is missing fields its kind requires.
    #[error("invalid mutation: {0}")]
    InvalidMutation(String),

    /// A queue frame could not be encoded.
    #[error("frame encoding failed: {0}")]
    Encoding(#[from] ProtocolError),
}

impl Classify for QueueError {
    fn class(&self) -> ErrorClass {
        match self {
            QueueError::Storage(e) => e.class(),
            QueueError::Corrupted(_)
            | QueueError::NotFound(_)
            | QueueError::InvalidMutation(_)
            | QueueError::Encoding(_) => ErrorClass::Fatal,
        }
    }
}

/// Errors that can occur during sync operations.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Network or transport error.
    #[error(transparent)]
    Transport(#[from] TransportFailure),

    /// The server answered with a non-success status.
    #[error("server returned {status}: {message}")]
    Status {
        /// Status code.
        status: Status,
        /// Server-supplied message.
        message: String,
    },

    /// The server rejected the write with a version conflict.
    #[error("version conflict on {}: server is at version {}", .current.id, .current.version)]
    Conflict {
        /// The server's current record.
        current: Box<VersionedRecord>,
    },

    /// Protocol error (invalid message format).
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Mutation queue error.
    #[error("queue error: {0}")]
    Queue(#[from] QueueError),

    /// Local store error.
    #[error("local store error: {0}")]
    LocalStore(String),

    /// The record is not in the local store.
    #[error("unknown record: {0}")]
    UnknownRecord(RecordId),

    /// No conflict is parked for this record.
    #[error("no pending conflict for record {0}")]
    NoPendingConflict(RecordId),

    /// The sync server's breaker rejected the call.
    #[error(transparent)]
    CircuitOpen(#[from] CircuitOpenError),

    /// Sync was cancelled.
    #[error("sync cancelled")]
    Cancelled,
}

impl SyncError {
    /// Returns true if this error can be retried.
    pub fn is_retryable(&self) -> bool {
        self.class() == ErrorClass::Retryable
    }
}

impl From<RetryError<SyncError>> for SyncError {
    fn from(err: RetryError<SyncError>) -> Self {
        match err {
            RetryError::Fatal { error, .. } | RetryError::Conflict { error, .. } => error,
            RetryError::Exhausted { last, .. } => last
                .into_operation()
                .unwrap_or(SyncError::Transport(TransportFailure::Timeout)),
            RetryError::CircuitOpen {
                dependency,
                retry_after,
                ..
            } => SyncError::CircuitOpen(CircuitOpenError {
                dependency,
                retry_after,
            }),
            RetryError::Cancelled { .. } => SyncError::Cancelled,
        }
    }
}

impl Classify for SyncError {
    fn class(&self) -> ErrorClass {
        match self {
            SyncError::Transport(e) => e.class(),
            SyncError::Status { status, .. } => {
                ErrorClassifier::classify_status(status.code()).unwrap_or(ErrorClass::Fatal)
            }
            SyncError::Conflict { .. } => ErrorClass::Conflict,
            SyncError::Queue(e) => e.class(),
            SyncError::Protocol(_)
            | SyncError::LocalStore(_)
            | SyncError::UnknownRecord(_)
            | SyncError::NoPendingConflict(_) => ErrorClass::Fatal,
            SyncError::CircuitOpen(e) => e.class(),
            SyncError::Cancelled => ErrorClass::Retryable,
        }
    }
}
