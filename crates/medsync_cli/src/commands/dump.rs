//! Dump command implementation.

use super::snapshot;
use medsync_sync_engine::{QueueEvent, QueueLog};
use serde::Serialize;
use std::path::Path;

/// Queue log frame representation for output.
#[derive(Debug, Serialize)]
pub struct FrameInfo {
    /// Offset in the log file.
    pub offset: u64,
    /// Event name.
    pub event: &'static str,
    /// Entry sequence.
    pub sequence: u64,
    /// Target record (enqueue frames).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record_id: Option<String>,
    /// Mutation kind (enqueue and rebase frames).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    /// Expected version (enqueue and rebase frames).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected_version: Option<u64>,
    /// Payload size in bytes, if a payload is carried.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload_size: Option<usize>,
    /// Failure message (failure frames).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Whether the failure is permanent (failure frames).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub terminal: Option<bool>,
}

impl FrameInfo {
    fn new(offset: u64, event: &QueueEvent) -> Self {
        let mut info = Self {
            offset,
            event: event.name(),
            sequence: event.sequence(),
            record_id: None,
            kind: None,
            expected_version: None,
            payload_size: None,
            error: None,
            terminal: None,
        };
        match event {
            QueueEvent::Enqueued(entry) => {
                info.record_id = Some(entry.record_id.to_string());
                info.kind = Some(entry.kind.to_string());
                info.expected_version = entry.expected_version;
                info.payload_size = entry.payload.as_ref().map(Vec::len);
            }
            QueueEvent::Failed {
                terminal, error, ..
            } => {
                info.error = Some(error.clone());
                info.terminal = Some(*terminal);
            }
            QueueEvent::Rebased {
                expected_version,
                kind,
                payload,
                ..
            } => {
                info.kind = Some(kind.to_string());
                info.expected_version = Some(*expected_version);
                info.payload_size = payload.as_ref().map(Vec::len);
            }
            QueueEvent::Synced { .. } | QueueEvent::Discarded { .. } => {}
        }
        info
    }
}

/// Runs the dump command.
pub fn run(
    path: &Path,
    limit: Option<usize>,
    start_offset: u64,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let frames = read_frames(path, start_offset, limit)?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&frames)?);
        }
        _ => {
            print_text_output(&frames);
        }
    }

    Ok(())
}

fn read_frames(
    path: &Path,
    start_offset: u64,
    limit: Option<usize>,
) -> Result<Vec<FrameInfo>, Box<dyn std::error::Error>> {
    let backend = snapshot(path)?;
    let log = QueueLog::read(&backend)?;
    Ok(log
        .events
        .iter()
        .filter(|(offset, _)| *offset >= start_offset)
        .take(limit.unwrap_or(usize::MAX))
        .map(|(offset, event)| FrameInfo::new(*offset, event))
        .collect())
}

fn print_text_output(frames: &[FrameInfo]) {
    println!("Queue log frames ({} total)", frames.len());
    println!("==========================");

    for frame in frames {
        print!("[{:08}] {:<10} #{}", frame.offset, frame.event, frame.sequence);
        if let Some(record) = &frame.record_id {
            print!(" record={}", record);
        }
        if let Some(kind) = &frame.kind {
            print!(" kind={}", kind);
        }
        if let Some(version) = frame.expected_version {
            print!(" expected={}", version);
        }
        if let Some(size) = frame.payload_size {
            print!(" payload={}B", size);
        }
        if let Some(terminal) = frame.terminal {
            print!(" terminal={}", terminal);
        }
        if let Some(error) = &frame.error {
            print!(" error={:?}", error);
        }
        println!();
    }
}
