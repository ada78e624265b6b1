//! Error types for storage operations.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Attempted to read beyond the end of storage.
    #[error("read beyond end of storage: offset {offset}, len {len}, size {size}")]
    ReadPastEnd {
        /// The requested read offset.
        offset: u64,
        /// The requested read length.
        len: usize,
        /// The current storage size.
        size: u64,
    },

    /// A frame failed its checksum or envelope checks before the log tail.
    #[error("storage corrupted: {0}")]
    Corrupted(String),

    /// Another process holds the directory lock.
    #[error("directory locked by another process: {0}")]
    Locked(PathBuf),

    /// The backend refuses writes (simulated outage or read-only medium).
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

impl StorageError {
    /// Returns true if the failure may clear up on its own.
    ///
    /// Interrupted or would-block I/O, and explicit unavailability, are
    /// transient. Corruption and lock contention are not.
    pub fn is_transient(&self) -> bool {
        match self {
            StorageError::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
            ),
            StorageError::Unavailable(_) => true,
            StorageError::ReadPastEnd { .. }
            | StorageError::Corrupted(_)
            | StorageError::Locked(_) => false,
        }
    }
}
