//! Inspect command implementation.

use super::{format_size, snapshot};
use medsync_protocol::now_ms;
use medsync_storage::StorageBackend;
use medsync_sync_engine::{MutationQueue, QueueEntry, QueueLog};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;

/// Queue inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Queue directory.
    pub path: String,
    /// Log size in bytes.
    pub log_size: u64,
    /// Frames in the log.
    pub frame_count: usize,
    /// Bytes of a torn frame at the tail.
    pub torn_bytes: u64,
    /// Entries waiting to sync.
    pub pending: usize,
    /// Entries rejected permanently.
    pub failed: usize,
    /// Records with pending entries.
    pub records: usize,
    /// Sequence the next entry will get.
    pub next_sequence: u64,
    /// Age of the oldest pending entry in milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub oldest_pending_ms: Option<u64>,
    /// Entry listing (if requested).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entries: Option<Vec<EntryInfo>>,
}

/// One queue entry for output.
#[derive(Debug, Serialize)]
pub struct EntryInfo {
    /// Queue sequence.
    pub sequence: u64,
    /// Target record.
    pub record_id: String,
    /// Mutation kind.
    pub kind: String,
    /// Expected server version.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected_version: Option<u64>,
    /// Payload size in bytes.
    pub payload_size: usize,
    /// Failed sync attempts.
    pub retry_count: u32,
    /// Rejected permanently.
    pub terminal: bool,
    /// Last failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl From<&QueueEntry> for EntryInfo {
    fn from(entry: &QueueEntry) -> Self {
        Self {
            sequence: entry.sequence,
            record_id: entry.record_id.to_string(),
            kind: entry.kind.to_string(),
            expected_version: entry.expected_version,
            payload_size: entry.payload.as_ref().map_or(0, Vec::len),
            retry_count: entry.retry_count,
            terminal: entry.terminal,
            last_error: entry.last_error.clone(),
        }
    }
}

/// Runs the inspect command.
pub fn run(path: &Path, show_entries: bool, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let result = inspect(path, show_entries)?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        _ => {
            print_text_output(&result);
        }
    }

    Ok(())
}

/// Inspects the queue in `path` without modifying it.
pub fn inspect(path: &Path, show_entries: bool) -> Result<InspectResult, Box<dyn std::error::Error>> {
    let backend = snapshot(path)?;
    let log_size = backend.size()?;
    let log = QueueLog::read(&backend)?;
    let queue = MutationQueue::open(Box::new(backend))?;

    let pending = queue.list_pending();
    let failed = queue.list_failed();
    let mut per_record: BTreeMap<_, usize> = BTreeMap::new();
    for entry in &pending {
        *per_record.entry(entry.record_id).or_default() += 1;
    }

    let entries = show_entries.then(|| {
        pending
            .iter()
            .chain(failed.iter())
            .map(EntryInfo::from)
            .collect::<Vec<_>>()
    });

    Ok(InspectResult {
        path: path.display().to_string(),
        log_size,
        frame_count: log.events.len(),
        torn_bytes: log.torn_bytes,
        pending: pending.len(),
        failed: failed.len(),
        records: per_record.len(),
        next_sequence: queue.next_sequence(),
        oldest_pending_ms: pending
            .first()
            .map(|e| now_ms().saturating_sub(e.enqueued_at_ms)),
        entries,
    })
}

fn print_text_output(result: &InspectResult) {
    println!("MedSync Queue Inspection");
    println!("========================");
    println!();
    println!("Path: {}", result.path);
    println!();
    println!("Log:");
    println!("  Size:        {}", format_size(result.log_size));
    println!("  Frames:      {}", result.frame_count);
    if result.torn_bytes > 0 {
        println!("  Torn tail:   {} bytes (dropped on next open)", result.torn_bytes);
    }
    println!();
    println!("Entries:");
    println!("  Pending:       {}", result.pending);
    println!("  Failed:        {}", result.failed);
    println!("  Records:       {}", result.records);
    println!("  Next sequence: {}", result.next_sequence);
    if let Some(age) = result.oldest_pending_ms {
        println!("  Oldest:        {:.1}s ago", age as f64 / 1000.0);
    }

    if let Some(entries) = &result.entries {
        println!();
        for entry in entries {
            let expected = entry
                .expected_version
                .map_or_else(|| "-".to_string(), |v| v.to_string());
            let state = if entry.terminal { "FAILED" } else { "pending" };
            println!(
                "  #{:<6} {:<7} {} expected={} retries={} {}",
                entry.sequence, entry.kind, entry.record_id, expected, entry.retry_count, state
            );
            if let Some(error) = &entry.last_error {
                println!("          last error: {}", error);
            }
        }
    }
}
