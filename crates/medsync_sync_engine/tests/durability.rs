//! Crash safety of the on-disk mutation queue.

use medsync_protocol::{MutationKind, RecordId};
use medsync_storage::{FileBackend, InMemoryBackend, StorageBackend, StorageError};
use medsync_sync_engine::queue::QUEUE_FILE;
use medsync_sync_engine::{
    MemoryLocalStore, MutationQueue, NewMutation, QueueError, QueueLog, Replica, SyncTrigger,
};
use std::fs::OpenOptions;
use std::io::Write;
use std::sync::Arc;

#[test]
fn enqueued_writes_survive_restart() {
    let dir = tempfile::tempdir().unwrap();
    let id;
    {
        let queue = Arc::new(MutationQueue::open_dir(dir.path()).unwrap());
        let replica = Replica::new(
            Arc::clone(&queue),
            Arc::new(MemoryLocalStore::new()),
            SyncTrigger::new(),
        );
        id = replica.create(b"v1".to_vec()).unwrap();
        replica.update(id, b"v2".to_vec()).unwrap();
        replica.delete(id).unwrap();
        // Process dies here: nothing was drained.
    }

    let queue = MutationQueue::open_dir(dir.path()).unwrap();
    let pending = queue.list_pending();
    assert_eq!(pending.len(), 3);
    assert!(pending.iter().all(|e| e.record_id == id));
    assert_eq!(
        pending.iter().map(|e| e.kind).collect::<Vec<_>>(),
        [MutationKind::Create, MutationKind::Update, MutationKind::Delete]
    );
    assert_eq!(pending[1].payload.as_deref(), Some(&b"v2"[..]));
}

#[test]
fn torn_append_is_dropped_on_restart() {
    let dir = tempfile::tempdir().unwrap();
    {
        let queue = MutationQueue::open_dir(dir.path()).unwrap();
        for i in 0..3u8 {
            queue.enqueue(NewMutation::create(RecordId::new(), vec![i])).unwrap();
        }
    }
    let path = dir.path().join(QUEUE_FILE);
    let intact = std::fs::metadata(&path).unwrap().len();

    // A crash halfway through writing a fourth frame.
    let mut file = OpenOptions::new().append(true).open(&path).unwrap();
    file.write_all(b"MSMQ\x01\x00\x01\x40\x00\x00\x00partial").unwrap();
    drop(file);

    let queue = MutationQueue::open_dir(dir.path()).unwrap();
    assert_eq!(queue.list_pending().len(), 3);
    assert_eq!(std::fs::metadata(&path).unwrap().len(), intact);

    // The queue keeps appending after the repaired tail.
    let entry = queue.enqueue(NewMutation::create(RecordId::new(), vec![])).unwrap();
    assert_eq!(entry.sequence, 4);
}

#[test]
fn damage_before_the_tail_refuses_to_open() {
    let dir = tempfile::tempdir().unwrap();
    {
        let queue = MutationQueue::open_dir(dir.path()).unwrap();
        queue.enqueue(NewMutation::create(RecordId::new(), b"one".to_vec())).unwrap();
        queue.enqueue(NewMutation::create(RecordId::new(), b"two".to_vec())).unwrap();
    }
    let path = dir.path().join(QUEUE_FILE);
    let mut bytes = std::fs::read(&path).unwrap();
    bytes[20] ^= 0x55;
    std::fs::write(&path, bytes).unwrap();

    assert!(matches!(
        MutationQueue::open_dir(dir.path()),
        Err(QueueError::Corrupted(_))
    ));
}

#[test]
fn one_writer_per_directory() {
    let dir = tempfile::tempdir().unwrap();
    let _queue = MutationQueue::open_dir(dir.path()).unwrap();
    assert!(matches!(
        MutationQueue::open_dir(dir.path()),
        Err(QueueError::Storage(StorageError::Locked(_)))
    ));
}

#[test]
fn compacted_log_replays_to_the_same_queue() {
    let dir = tempfile::tempdir().unwrap();
    let queue = MutationQueue::open_dir(dir.path()).unwrap();
    let id = RecordId::new();
    queue.enqueue(NewMutation::create(id, b"a".to_vec())).unwrap();
    queue.enqueue(NewMutation::update(id, 1, b"b".to_vec())).unwrap();
    queue.mark_synced(1).unwrap();
    queue.rebase(2, 4, None).unwrap();

    let compacted_path = dir.path().join("compacted.log");
    let mut target = FileBackend::open(&compacted_path).unwrap();
    assert_eq!(queue.compact_into(&mut target).unwrap(), 1);

    let log = QueueLog::read(&target).unwrap();
    assert_eq!(log.events.len(), 1);
    assert_eq!(log.torn_bytes, 0);
    assert!(target.size().unwrap() < std::fs::metadata(dir.path().join(QUEUE_FILE)).unwrap().len());

    let reopened = MutationQueue::open(Box::new(target)).unwrap();
    assert_eq!(reopened.list_pending(), queue.list_pending());
    assert_eq!(reopened.next_sequence(), queue.next_sequence());
}

#[test]
fn failed_sync_is_retried_without_damaging_the_log() {
    let disk = InMemoryBackend::new();
    let queue = MutationQueue::open(Box::new(disk.clone())).unwrap();
    let id = RecordId::new();
    queue.enqueue(NewMutation::create(id, b"v1".to_vec())).unwrap();
    queue.enqueue(NewMutation::update(id, 1, b"v2".to_vec())).unwrap();

    // The frame reaches the log but fsync reports EIO.
    disk.fail_syncs(1);
    assert!(matches!(
        queue.mark_synced(1),
        Err(QueueError::Storage(StorageError::Unavailable(_)))
    ));
    assert_eq!(queue.list_pending().len(), 2);
    queue.mark_synced(1).unwrap();

    disk.fail_syncs(1);
    assert!(queue.rebase(2, 3, None).is_err());
    assert_eq!(queue.get(2).unwrap().expected_version, Some(1));
    queue.rebase(2, 3, None).unwrap();

    disk.fail_syncs(1);
    assert!(queue.enqueue(NewMutation::delete(id, 4)).is_err());
    drop(queue);

    let reopened = MutationQueue::open(Box::new(disk)).unwrap();
    let pending = reopened.list_pending();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].sequence, 2);
    assert_eq!(pending[0].expected_version, Some(3));
}

#[test]
fn failed_compaction_leaves_the_queue_usable() {
    let disk = InMemoryBackend::new();
    let queue = MutationQueue::open(Box::new(disk.clone())).unwrap();
    queue.enqueue(NewMutation::create(RecordId::new(), b"a".to_vec())).unwrap();

    let mut target = InMemoryBackend::new();
    target.set_unavailable(true);
    assert!(queue.compact_into(&mut target).is_err());
    assert_eq!(target.size().unwrap(), 0);

    disk.set_unavailable(true);
    assert!(queue.enqueue(NewMutation::create(RecordId::new(), vec![])).is_err());
    disk.set_unavailable(false);
    queue.enqueue(NewMutation::create(RecordId::new(), vec![])).unwrap();
    drop(queue);

    assert_eq!(MutationQueue::open(Box::new(disk)).unwrap().len(), 2);
}
