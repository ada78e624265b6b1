//! CLI command implementations.

pub mod compact;
pub mod dump;
pub mod inspect;
pub mod verify;

use medsync_storage::{FileBackend, InMemoryBackend, StorageBackend};
use medsync_sync_engine::queue::QUEUE_FILE;
use std::path::{Path, PathBuf};

/// Returns the queue log path inside `dir`, failing if there is none.
pub fn queue_file(dir: &Path) -> Result<PathBuf, Box<dyn std::error::Error>> {
    let path = dir.join(QUEUE_FILE);
    if !path.exists() {
        return Err(format!("No mutation queue found at {:?}", dir).into());
    }
    Ok(path)
}

/// Copies the queue log into memory.
///
/// Read-only commands replay the copy so that opening the queue never
/// repairs or locks the device's file.
pub fn snapshot(dir: &Path) -> Result<InMemoryBackend, Box<dyn std::error::Error>> {
    let backend = FileBackend::open(&queue_file(dir)?)?;
    Ok(InMemoryBackend::with_data(backend.read_all()?))
}

/// Formats a byte count for humans.
pub fn format_size(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} bytes", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}
