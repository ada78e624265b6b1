//! Compact command implementation.

use super::{format_size, queue_file};
use medsync_sync_engine::MutationQueue;
use std::path::Path;

/// Compaction statistics.
#[derive(Debug)]
pub struct CompactStats {
    /// Live entries carried over.
    pub entries: usize,
    /// Bytes before compaction.
    pub bytes_before: u64,
    /// Bytes after compaction.
    pub bytes_after: u64,
}

/// Runs the compact command.
pub fn run(path: &Path, dry_run: bool) -> Result<(), Box<dyn std::error::Error>> {
    println!("Compacting mutation queue at {:?}", path);
    if dry_run {
        println!("(dry run - no changes will be made)");
    }
    println!();

    let stats = compact(path, dry_run)?;

    println!("Compaction Analysis:");
    println!("  Live entries: {}", stats.entries);
    println!("  Size before:  {}", format_size(stats.bytes_before));
    println!("  Size after:   {}", format_size(stats.bytes_after));
    println!(
        "  Space saved:  {} ({:.1}%)",
        format_size(stats.bytes_before.saturating_sub(stats.bytes_after)),
        if stats.bytes_before > 0 {
            (stats.bytes_before.saturating_sub(stats.bytes_after) as f64
                / stats.bytes_before as f64)
                * 100.0
        } else {
            0.0
        }
    );

    if !dry_run {
        println!();
        println!("✓ Compaction complete");
    }

    Ok(())
}

/// Rewrites the queue log so that it holds one frame per live entry.
///
/// The queue directory is locked for the duration, so this fails while a
/// device process has the queue open. The new log is written beside the
/// old one and renamed over it.
pub fn compact(path: &Path, dry_run: bool) -> Result<CompactStats, Box<dyn std::error::Error>> {
    let log_path = queue_file(path)?;
    let bytes_before = std::fs::metadata(&log_path)?.len();
    let queue = MutationQueue::open_dir(path)?;

    let temp_path = log_path.with_extension("log.compact");
    if temp_path.exists() {
        std::fs::remove_file(&temp_path)?;
    }

    let entries = {
        let mut target = medsync_storage::FileBackend::open(&temp_path)?;
        queue.compact_into(&mut target)?
    };
    let bytes_after = std::fs::metadata(&temp_path)?.len();

    if dry_run {
        std::fs::remove_file(&temp_path)?;
    } else {
        std::fs::rename(&temp_path, &log_path)?;
        tracing::info!(entries, bytes_before, bytes_after, "queue log compacted");
    }
    drop(queue);

    Ok(CompactStats {
        entries,
        bytes_before,
        bytes_after,
    })
}
