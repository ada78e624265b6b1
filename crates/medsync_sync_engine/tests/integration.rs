//! Integration tests for sync engine and server.

use medsync_protocol::{
    Conflict, ConflictPolicy, MutationKind, MutationRequest, RecordId, Resolution,
    VersionedRecord,
};
use medsync_resilience::{CircuitConfig, CircuitRegistry, CircuitState, RetryConfig};
use medsync_server::{RecordServer, ServerConfig};
use medsync_storage::InMemoryBackend;
use medsync_sync_engine::{
    ConflictResolver, Decision, HaltReason, HttpTransport, LocalStore, LoopbackClient,
    LoopbackServer, ManualResolver, MemoryLocalStore, MockTransport, MutationQueue, NewMutation,
    PolicyResolver, Replica, SyncConfig, SyncEngine, SyncTrigger,
};
use medsync_protocol::HttpResponse;
use std::sync::Arc;
use std::time::Duration;

/// Routes loopback requests to an in-process record server.
#[derive(Clone)]
struct Server(Arc<RecordServer>);

impl LoopbackServer for Server {
    fn handle_post(&self, path: &str, body: &[u8]) -> HttpResponse {
        self.0.handle_post(path, body)
    }
}

struct Device {
    engine: Arc<SyncEngine>,
    replica: Replica,
    local: Arc<MemoryLocalStore>,
    queue: Arc<MutationQueue>,
    transport: Arc<HttpTransport<LoopbackClient<Server>>>,
}

impl Device {
    fn new(server: &Arc<RecordServer>, resolver: Arc<dyn ConflictResolver>) -> Self {
        Self::with_config(server, resolver, SyncConfig::new("http://records.test"))
    }

    fn with_config(
        server: &Arc<RecordServer>,
        resolver: Arc<dyn ConflictResolver>,
        config: SyncConfig,
    ) -> Self {
        let queue = Arc::new(MutationQueue::open(Box::new(InMemoryBackend::new())).unwrap());
        let local = Arc::new(MemoryLocalStore::new());
        let transport = Arc::new(HttpTransport::new(
            config.server_url.clone(),
            LoopbackClient::new(Server(Arc::clone(server))),
        ));
        let engine = Arc::new(SyncEngine::new(
            config,
            Arc::clone(&queue),
            local.clone(),
            transport.clone(),
            resolver,
            &CircuitRegistry::default(),
        ));
        let replica = Replica::new(Arc::clone(&queue), local.clone(), SyncTrigger::new());
        Self {
            engine,
            replica,
            local,
            queue,
            transport,
        }
    }

    fn set_offline(&self, offline: bool) {
        self.transport.client().set_offline(offline);
    }

    /// Seeds the local store with the server's copy.
    fn seed(&self, record: &VersionedRecord) {
        self.local.record_synced(record).unwrap();
    }

    fn payload(&self, id: RecordId) -> Vec<u8> {
        self.local.get(id).unwrap().unwrap().record.payload
    }
}

fn server() -> Arc<RecordServer> {
    Arc::new(RecordServer::new(ServerConfig::default()))
}

fn seeded(server: &RecordServer, payload: &[u8]) -> VersionedRecord {
    server.store().create(payload.to_vec()).unwrap()
}

#[tokio::test(start_paused = true)]
async fn offline_edit_against_newer_server_raises_conflict() {
    let server = server();
    let record = seeded(&server, b"bp=120/80");

    let a = Device::new(&server, Arc::new(ManualResolver));
    let b = Device::new(&server, Arc::new(ManualResolver));
    a.seed(&record);
    b.seed(&record);

    // A edits while offline; B is online and writes first.
    a.set_offline(true);
    a.replica.update(record.id, b"bp=130/85 (A)".to_vec()).unwrap();
    b.replica.update(record.id, b"bp=125/82 (B)".to_vec()).unwrap();
    assert_eq!(b.engine.drain().await.unwrap().synced, 1);

    a.set_offline(false);
    let report = a.engine.drain().await.unwrap();
    assert_eq!(report.conflicted, 1);
    assert_eq!(report.synced, 0);

    let conflict: &Conflict = &report.conflicts[0];
    assert_eq!(conflict.record_id, record.id);
    assert_eq!(conflict.local.version, 1);
    assert_eq!(conflict.local.payload.as_deref(), Some(&b"bp=130/85 (A)"[..]));
    assert_eq!(conflict.remote.version, 2);
    assert_eq!(conflict.remote.payload.as_deref(), Some(&b"bp=125/82 (B)"[..]));

    // Nothing was overwritten on the server.
    let stored = server.store().get(record.id).unwrap();
    assert_eq!(stored.version, 2);
    assert_eq!(stored.payload, b"bp=125/82 (B)");
    assert_eq!(a.queue.pending_for(record.id).len(), 1);
    assert_eq!(a.engine.pending_conflicts().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn keep_local_rebases_the_whole_chain() {
    let server = server();
    let record = seeded(&server, b"v1");
    let a = Device::new(&server, Arc::new(PolicyResolver::new(ConflictPolicy::KeepLocal)));
    a.seed(&record);

    a.replica.update(record.id, b"a1".to_vec()).unwrap();
    a.replica.update(record.id, b"a2".to_vec()).unwrap();
    server
        .store()
        .conditional_update(record.id, 1, b"server".to_vec())
        .unwrap();

    let report = a.engine.drain().await.unwrap();
    assert_eq!(report.conflicted, 1);
    assert_eq!(report.resolved, 1);
    assert_eq!(report.synced, 2);
    assert!(a.queue.is_empty());

    let stored = server.store().get(record.id).unwrap();
    assert_eq!(stored.version, 4);
    assert_eq!(stored.payload, b"a2");

    let local = a.local.get(record.id).unwrap().unwrap();
    assert!(!local.dirty);
    assert_eq!(local.record.version, 4);
}

#[tokio::test(start_paused = true)]
async fn keep_remote_adopts_server_copy() {
    let server = server();
    let record = seeded(&server, b"v1");
    let a = Device::new(&server, Arc::new(PolicyResolver::new(ConflictPolicy::KeepRemote)));
    a.seed(&record);

    a.replica.update(record.id, b"mine".to_vec()).unwrap();
    server
        .store()
        .conditional_update(record.id, 1, b"theirs".to_vec())
        .unwrap();

    let report = a.engine.drain().await.unwrap();
    assert_eq!(report.resolved, 1);
    assert!(a.queue.is_empty());
    assert_eq!(a.payload(record.id), b"theirs");
    assert_eq!(server.store().get(record.id).unwrap().version, 2);
}

#[tokio::test(start_paused = true)]
async fn merged_resolution_from_the_ui() {
    let server = server();
    let record = seeded(&server, b"v1");
    let a = Device::new(&server, Arc::new(ManualResolver));
    a.seed(&record);

    a.replica.update(record.id, b"+A".to_vec()).unwrap();
    server
        .store()
        .conditional_update(record.id, 1, b"+B".to_vec())
        .unwrap();
    a.engine.drain().await.unwrap();

    let conflict = a.engine.pending_conflicts().remove(0);
    let mut merged = conflict.remote.payload.unwrap();
    merged.extend(conflict.local.payload.unwrap());
    a.engine
        .resolve(record.id, Resolution::Merged(merged))
        .unwrap();
    assert_eq!(a.payload(record.id), b"+B+A");

    let report = a.engine.drain().await.unwrap();
    assert_eq!(report.synced, 1);
    let stored = server.store().get(record.id).unwrap();
    assert_eq!((stored.version, stored.payload), (3, b"+B+A".to_vec()));
}

#[tokio::test(start_paused = true)]
async fn closure_resolver_decides_per_conflict() {
    let server = server();
    let a_id = seeded(&server, b"a").id;
    let b_id = seeded(&server, b"b").id;

    // Creates of known ids keep the server copy, edits keep local.
    let resolver = |c: &Conflict| match c.kind {
        MutationKind::Create => Decision::Resolved(Resolution::KeepRemote),
        _ => Decision::Resolved(Resolution::KeepLocal),
    };
    let device = Device::new(&server, Arc::new(resolver));
    device.replica.create_with_id(a_id, b"dup".to_vec()).unwrap();
    device.seed(&server.store().get(b_id).unwrap());
    server.store().conditional_update(b_id, 1, b"b2".to_vec()).unwrap();
    device.replica.update(b_id, b"b-local".to_vec()).unwrap();

    let report = device.engine.drain().await.unwrap();
    assert_eq!(report.conflicted, 2);
    assert_eq!(report.resolved, 2);
    assert_eq!(device.payload(a_id), b"a");
    assert_eq!(server.store().get(b_id).unwrap().payload, b"b-local");
}

#[tokio::test(start_paused = true)]
async fn replayed_create_is_idempotent() {
    let server = server();
    let device = Device::new(&server, Arc::new(ManualResolver));
    let entry = device.replica.create_with_id(RecordId::new(), b"x".to_vec()).unwrap();

    // The first submission reached the server but its answer was lost.
    server.handle_mutation(MutationRequest::create(entry.record_id, b"x".to_vec()));

    let report = device.engine.drain().await.unwrap();
    assert_eq!(report.synced, 1);
    assert_eq!(report.conflicted, 0);
    assert_eq!(server.store().get(entry.record_id).unwrap().version, 1);
}

#[tokio::test(start_paused = true)]
async fn rejected_mutation_does_not_block_others() {
    let server = Arc::new(
        RecordServer::new(ServerConfig::default()).with_validator(Arc::new(
            |_: MutationKind, _: RecordId, payload: &[u8]| {
                if payload.starts_with(b"invalid") {
                    Err("systolic out of range".to_string())
                } else {
                    Ok(())
                }
            },
        )),
    );
    let device = Device::new(&server, Arc::new(ManualResolver));
    let bad = device.replica.create(b"invalid bp".to_vec()).unwrap();
    let good = device.replica.create(b"bp=120/80".to_vec()).unwrap();

    let report = device.engine.drain().await.unwrap();
    assert_eq!(report.failed, 1);
    assert_eq!(report.synced, 1);
    assert_eq!(report.failures[0].record_id, bad);
    assert!(report.failures[0].error.contains("422"));
    assert!(server.store().get(good).is_ok());

    let failed = device.engine.failed_mutations();
    assert_eq!(failed.len(), 1);
    assert!(device.queue.peek().is_none());
}

#[tokio::test(start_paused = true)]
async fn offline_writes_sync_after_reconnect() {
    let server = server();
    let config = SyncConfig::new("http://records.test").with_retry(RetryConfig::new(3));
    let device = Device::with_config(&server, Arc::new(ManualResolver), config);

    device.set_offline(true);
    let id = device.replica.create(b"v1".to_vec()).unwrap();
    device.replica.update(id, b"v2".to_vec()).unwrap();

    let report = device.engine.drain().await.unwrap();
    assert_eq!(report.synced, 0);
    assert_eq!(report.deferred, 2);
    assert_eq!(device.queue.peek().unwrap().retry_count, 1);
    assert!(device.transport.last_error().is_some());

    device.set_offline(false);
    device.replica.trigger().connectivity_restored();
    let report = device.engine.drain().await.unwrap();
    assert_eq!(report.synced, 2);
    assert_eq!(server.store().get(id).unwrap().payload, b"v2");
    assert!(!device.local.get(id).unwrap().unwrap().dirty);
}

#[tokio::test(start_paused = true)]
async fn open_circuit_halts_the_pass() {
    let server = server();
    let cooldown = Duration::from_secs(30);
    let config = SyncConfig::new("http://records.test")
        .with_retry(RetryConfig::new(2))
        .with_circuit(CircuitConfig::new(2).with_cooldown(cooldown));
    let device = Device::with_config(&server, Arc::new(ManualResolver), config);
    for i in 0..3u8 {
        device.replica.create(vec![i]).unwrap();
    }

    device.set_offline(true);
    let report = device.engine.drain().await.unwrap();
    assert_eq!(report.deferred, 1);
    match report.halted {
        Some(HaltReason::CircuitOpen { retry_after }) => assert!(retry_after <= cooldown),
        other => panic!("expected circuit open, got {other:?}"),
    }
    let breaker = device.engine.breaker().unwrap();
    assert_eq!(breaker.state(), CircuitState::Open);
    assert_eq!(device.queue.list_pending().len(), 3);

    // Before the cooldown the pass halts without a network call.
    device.set_offline(false);
    let early = device.engine.drain().await.unwrap();
    assert!(matches!(early.halted, Some(HaltReason::CircuitOpen { .. })));
    assert_eq!(server.record_count(), 0);

    tokio::time::advance(cooldown).await;
    let report = device.engine.drain().await.unwrap();
    assert_eq!(report.synced, 3);
    assert_eq!(breaker.state(), CircuitState::Closed);
    assert_eq!(server.record_count(), 3);
}

#[tokio::test(start_paused = true)]
async fn concurrent_drain_coalesces() {
    let queue = Arc::new(MutationQueue::open(Box::new(InMemoryBackend::new())).unwrap());
    let transport = Arc::new(MockTransport::new());
    transport.set_delay(Duration::from_secs(1));
    let engine = SyncEngine::new(
        SyncConfig::default(),
        Arc::clone(&queue),
        Arc::new(MemoryLocalStore::new()),
        transport.clone(),
        Arc::new(ManualResolver),
        &CircuitRegistry::default(),
    );
    queue.enqueue(NewMutation::create(RecordId::new(), vec![])).unwrap();

    let (first, second) = tokio::join!(engine.drain(), async {
        tokio::time::sleep(Duration::from_millis(10)).await;
        engine.drain().await
    });
    let (first, second) = (first.unwrap(), second.unwrap());
    assert!(!first.coalesced);
    assert_eq!(first.synced, 1);
    assert!(second.coalesced);
    assert_eq!(second.synced, 0);
    assert_eq!(transport.requests().len(), 1);

    let stats = engine.stats();
    assert_eq!((stats.passes, stats.coalesced), (1, 1));
}

#[tokio::test(start_paused = true)]
async fn slow_server_keeps_sequence_order() {
    let queue = Arc::new(MutationQueue::open(Box::new(InMemoryBackend::new())).unwrap());
    let transport = Arc::new(MockTransport::new());
    transport.set_delay(Duration::from_millis(250));
    let engine = SyncEngine::new(
        SyncConfig::default(),
        Arc::clone(&queue),
        Arc::new(MemoryLocalStore::new()),
        transport.clone(),
        Arc::new(ManualResolver),
        &CircuitRegistry::default(),
    );

    let x = RecordId::new();
    let y = RecordId::new();
    queue.enqueue(NewMutation::create(x, vec![1])).unwrap();
    queue.enqueue(NewMutation::create(y, vec![1])).unwrap();
    queue.enqueue(NewMutation::update(x, 1, vec![2])).unwrap();
    queue.enqueue(NewMutation::update(y, 1, vec![2])).unwrap();
    queue.enqueue(NewMutation::delete(x, 2)).unwrap();

    let report = engine.drain().await.unwrap();
    assert_eq!(report.synced, 5);

    let sent: Vec<_> = transport
        .requests()
        .iter()
        .map(|r| (r.record_id, r.kind, r.expected_version))
        .collect();
    assert_eq!(
        sent,
        [
            (x, MutationKind::Create, None),
            (y, MutationKind::Create, None),
            (x, MutationKind::Update, Some(1)),
            (y, MutationKind::Update, Some(1)),
            (x, MutationKind::Delete, Some(2)),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn cancel_stops_in_flight_submission() {
    let queue = Arc::new(MutationQueue::open(Box::new(InMemoryBackend::new())).unwrap());
    let transport = Arc::new(MockTransport::new());
    transport.set_delay(Duration::from_secs(5));
    let engine = Arc::new(SyncEngine::new(
        SyncConfig::default(),
        Arc::clone(&queue),
        Arc::new(MemoryLocalStore::new()),
        transport.clone(),
        Arc::new(ManualResolver),
        &CircuitRegistry::default(),
    ));
    queue.enqueue(NewMutation::create(RecordId::new(), vec![])).unwrap();

    let drain = tokio::spawn({
        let engine = Arc::clone(&engine);
        async move { engine.drain().await }
    });
    tokio::time::sleep(Duration::from_secs(1)).await;
    engine.cancel();

    let report = drain.await.unwrap().unwrap();
    assert_eq!(report.halted, Some(HaltReason::Cancelled));
    assert_eq!(report.synced, 0);
    assert_eq!(queue.list_pending().len(), 1);
    assert_eq!(queue.peek().unwrap().retry_count, 0);
}

#[tokio::test(start_paused = true)]
async fn refresh_replaces_clean_local_copy() {
    let server = server();
    let record = seeded(&server, b"v1");
    let device = Device::new(&server, Arc::new(ManualResolver));
    device.seed(&record);
    server
        .store()
        .conditional_update(record.id, 1, b"v2".to_vec())
        .unwrap();

    let fresh = device.engine.refresh(record.id).await.unwrap().unwrap();
    assert_eq!(fresh.version, 2);
    assert_eq!(device.payload(record.id), b"v2");

    server.store().delete(record.id, 2).unwrap();
    assert!(device.engine.refresh(record.id).await.unwrap().is_none());
    assert!(device.local.get(record.id).unwrap().is_none());
}
