//! Exclusive directory lock.

use crate::error::{StorageError, StorageResult};
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

const LOCK_FILE: &str = "LOCK";

/// Holds an exclusive advisory lock on a directory for its lifetime.
///
/// The client keeps one per queue directory so a second process (or a
/// second worker in the same process) cannot replay the same queue.
#[derive(Debug)]
pub struct DirLock {
    dir: PathBuf,
    _file: File,
}

impl DirLock {
    /// Creates `dir` if needed and takes the lock without blocking.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Locked`] if another holder exists.
    pub fn acquire(dir: &Path) -> StorageResult<Self> {
        std::fs::create_dir_all(dir)?;
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(dir.join(LOCK_FILE))?;

        if file.try_lock_exclusive().is_err() {
            return Err(StorageError::Locked(dir.to_path_buf()));
        }

        Ok(Self {
            dir: dir.to_path_buf(),
            _file: file,
        })
    }

    /// Returns the locked directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}
