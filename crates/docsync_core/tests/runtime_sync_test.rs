//! End-to-end tests for the document runtime: backlog drain, echo
//! suppression, snapshot handshake, policy knobs, and ordering guarantees,
//! driven through mock sync/realtime adapters and a recording storage
//! wrapper.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use docsync_core::{
    BoxFuture, DocsyncError, DocumentRegistry, MemoryStorage, PullRequest, PullResponse,
    PushRequest, PushResponse, RealtimeAdapter, RealtimeCallback, RealtimeSubscription,
    RegistryOptions, Result, SnapshotPolicy, StorageAdapter, StorageResult, SyncAdapter,
    SyncDirection, SyncPhase, SyncRequest,
};

// =========================================================================
// Mock adapters
// =========================================================================

#[derive(Debug, Clone)]
struct RecordedPull {
    state_vector: Option<Vec<u8>>,
    request_snapshot: bool,
}

#[derive(Debug, Clone)]
struct RecordedPush {
    update: Vec<u8>,
    is_snapshot: bool,
}

/// Sync backend that records every call. Pull responses come from a script
/// (one payload batch per pull, empty once exhausted); pushes fail while
/// `offline` is set.
#[derive(Default)]
struct MockSyncAdapter {
    pulls: Mutex<Vec<RecordedPull>>,
    pushes: Mutex<Vec<RecordedPush>>,
    scripted_pulls: Mutex<VecDeque<Vec<Vec<u8>>>>,
    offline: AtomicBool,
    /// Shared operation log, interleaved with storage ops in ordering tests.
    ops: Arc<Mutex<Vec<String>>>,
}

impl MockSyncAdapter {
    fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn with_ops(ops: Arc<Mutex<Vec<String>>>) -> Arc<Self> {
        Arc::new(Self {
            ops,
            ..Default::default()
        })
    }

    fn script_pull(&self, payloads: Vec<Vec<u8>>) {
        self.scripted_pulls.lock().unwrap().push_back(payloads);
    }

    fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    fn pulls(&self) -> Vec<RecordedPull> {
        self.pulls.lock().unwrap().clone()
    }

    fn pushes(&self) -> Vec<RecordedPush> {
        self.pushes.lock().unwrap().clone()
    }

    fn incremental_pushes(&self) -> Vec<Vec<u8>> {
        self.pushes()
            .into_iter()
            .filter(|p| !p.is_snapshot)
            .map(|p| p.update)
            .collect()
    }
}

impl SyncAdapter for MockSyncAdapter {
    fn pull<'a>(&'a self, request: PullRequest) -> BoxFuture<'a, Result<PullResponse>> {
        self.pulls.lock().unwrap().push(RecordedPull {
            state_vector: request.state_vector.clone(),
            request_snapshot: request.request_snapshot,
        });
        self.ops.lock().unwrap().push("pull".into());
        let payloads = self
            .scripted_pulls
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_default();
        Box::pin(async move {
            Ok(PullResponse {
                payloads,
                last_synced: None,
            })
        })
    }

    fn push<'a>(&'a self, request: PushRequest) -> BoxFuture<'a, Result<PushResponse>> {
        if self.offline.load(Ordering::SeqCst) {
            return Box::pin(async { Err(DocsyncError::Transport("offline".into())) });
        }
        self.pushes.lock().unwrap().push(RecordedPush {
            update: request.update.clone(),
            is_snapshot: request.is_snapshot,
        });
        self.ops
            .lock()
            .unwrap()
            .push(format!("push:{}", if request.is_snapshot { "snapshot" } else { "update" }));
        Box::pin(async move {
            Ok(PushResponse {
                last_synced: Some("2026-07-01T12:00:00Z".into()),
            })
        })
    }
}

/// Realtime transport that records publishes and lets tests deliver
/// inbound payloads through the stored subscription callbacks.
#[derive(Default)]
struct MockRealtimeAdapter {
    subscribers: Arc<Mutex<HashMap<String, Vec<(u64, RealtimeCallback)>>>>,
    next_id: Mutex<u64>,
    published: Mutex<Vec<(String, Vec<u8>)>>,
}

impl MockRealtimeAdapter {
    fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn deliver(&self, doc_id: &str, payload: &[u8]) {
        let callbacks: Vec<RealtimeCallback> = self
            .subscribers
            .lock()
            .unwrap()
            .get(doc_id)
            .map(|subs| subs.iter().map(|(_, cb)| Arc::clone(cb)).collect())
            .unwrap_or_default();
        for callback in callbacks {
            callback(payload);
        }
    }

    fn published(&self) -> Vec<(String, Vec<u8>)> {
        self.published.lock().unwrap().clone()
    }
}

impl RealtimeAdapter for MockRealtimeAdapter {
    fn subscribe(&self, doc_id: &str, on_update: RealtimeCallback) -> Result<RealtimeSubscription> {
        let id = {
            let mut next = self.next_id.lock().unwrap();
            *next += 1;
            *next
        };
        self.subscribers
            .lock()
            .unwrap()
            .entry(doc_id.to_string())
            .or_default()
            .push((id, on_update));

        let subscribers = Arc::clone(&self.subscribers);
        let doc_id = doc_id.to_string();
        Ok(RealtimeSubscription::new(move || {
            if let Some(subs) = subscribers.lock().unwrap().get_mut(&doc_id) {
                subs.retain(|(sub_id, _)| *sub_id != id);
            }
        }))
    }

    fn publish<'a>(&'a self, doc_id: &'a str, payload: &'a [u8]) -> BoxFuture<'a, Result<()>> {
        self.published
            .lock()
            .unwrap()
            .push((doc_id.to_string(), payload.to_vec()));
        Box::pin(async { Ok(()) })
    }
}

/// Storage wrapper recording operation order into a shared log, for
/// persistence-before-push assertions.
struct RecordingStorage {
    inner: MemoryStorage,
    ops: Arc<Mutex<Vec<String>>>,
}

impl RecordingStorage {
    fn new(ops: Arc<Mutex<Vec<String>>>) -> Self {
        Self {
            inner: MemoryStorage::new(),
            ops,
        }
    }
}

impl StorageAdapter for RecordingStorage {
    fn get_snapshot<'a>(&'a self, id: &'a str) -> BoxFuture<'a, StorageResult<Option<docsync_core::SnapshotRecord>>> {
        self.inner.get_snapshot(id)
    }

    fn get_updates<'a>(&'a self, id: &'a str) -> BoxFuture<'a, StorageResult<Option<Vec<Vec<u8>>>>> {
        self.inner.get_updates(id)
    }

    fn get_pending_sync<'a>(&'a self, id: &'a str) -> BoxFuture<'a, StorageResult<Option<Vec<Vec<u8>>>>> {
        self.inner.get_pending_sync(id)
    }

    fn get_sync_checkpoint<'a>(&'a self, id: &'a str) -> BoxFuture<'a, StorageResult<Option<String>>> {
        self.inner.get_sync_checkpoint(id)
    }

    fn append_update<'a>(&'a self, id: &'a str, update: &'a [u8]) -> BoxFuture<'a, StorageResult<()>> {
        self.ops.lock().unwrap().push("append_update".into());
        self.inner.append_update(id, update)
    }

    fn set_snapshot<'a>(&'a self, id: &'a str, snapshot: &'a [u8]) -> BoxFuture<'a, StorageResult<()>> {
        self.inner.set_snapshot(id, snapshot)
    }

    fn mark_pending_sync<'a>(&'a self, id: &'a str, updates: &'a [Vec<u8>]) -> BoxFuture<'a, StorageResult<()>> {
        self.inner.mark_pending_sync(id, updates)
    }

    fn clear_pending_sync<'a>(&'a self, id: &'a str) -> BoxFuture<'a, StorageResult<()>> {
        self.inner.clear_pending_sync(id)
    }

    fn mark_snapshot_synced<'a>(&'a self, id: &'a str, generation: u64) -> BoxFuture<'a, StorageResult<()>> {
        self.inner.mark_snapshot_synced(id, generation)
    }

    fn set_sync_checkpoint<'a>(&'a self, id: &'a str, value: &'a str) -> BoxFuture<'a, StorageResult<()>> {
        self.inner.set_sync_checkpoint(id, value)
    }

    fn remove<'a>(&'a self, id: &'a str) -> BoxFuture<'a, StorageResult<()>> {
        self.inner.remove(id)
    }
}

fn options_with_sync(sync: Arc<MockSyncAdapter>) -> RegistryOptions {
    RegistryOptions {
        sync: Some(sync),
        ..Default::default()
    }
}

// =========================================================================
// Scenarios
// =========================================================================

#[tokio::test]
async fn offline_then_online_backlog_drain() {
    let storage = Arc::new(MemoryStorage::new());

    // Offline phase: no sync adapter configured.
    {
        let registry = DocumentRegistry::new(storage.clone(), RegistryOptions::default());
        let doc = registry.open("d1").await.unwrap();
        doc.mutate(|data| data.set_i64("count", 3)).await.unwrap();
        assert_eq!(
            storage.get_pending_sync("d1").await.unwrap().unwrap().len(),
            1
        );
        registry.close("d1");
    }

    // Online phase: reopen against the same storage with a sync adapter.
    let sync = MockSyncAdapter::new();
    let registry = DocumentRegistry::new(storage.clone(), options_with_sync(sync.clone()));
    let doc = registry.open("d1").await.unwrap();
    doc.flush().await.unwrap();

    let pushes = sync.pushes();
    assert_eq!(pushes.len(), 2);
    assert!(pushes[0].is_snapshot);
    assert!(!pushes[1].is_snapshot);

    assert_eq!(doc.pending_sync_len(), 0);
    assert!(
        storage
            .get_pending_sync("d1")
            .await
            .unwrap()
            .unwrap()
            .is_empty()
    );
    assert_eq!(doc.data().get_i64("count"), Some(3));
}

#[tokio::test]
async fn realtime_echo_suppression() {
    // Author the inbound update on a separate replica and grab its log entry.
    let remote_update = {
        let storage = Arc::new(MemoryStorage::new());
        let registry = DocumentRegistry::new(storage.clone(), RegistryOptions::default());
        let doc = registry.open("d1").await.unwrap();
        doc.mutate(|data| data.set_i64("count", 9)).await.unwrap();
        storage.get_updates("d1").await.unwrap().unwrap().remove(0)
    };

    let storage = Arc::new(MemoryStorage::new());
    let realtime = MockRealtimeAdapter::new();
    let registry = DocumentRegistry::new(
        storage.clone(),
        RegistryOptions {
            realtime: Some(realtime.clone()),
            ..Default::default()
        },
    );
    let doc = registry.open("d1").await.unwrap();

    realtime.deliver("d1", &remote_update);
    doc.flush().await.unwrap();

    // Applied and durable, but never published back and never marked pending.
    assert_eq!(doc.data().get_i64("count"), Some(9));
    assert!(realtime.published().is_empty());
    assert_eq!(storage.get_updates("d1").await.unwrap().unwrap().len(), 1);
    assert_eq!(doc.pending_sync_len(), 0);
}

#[tokio::test]
async fn snapshot_sync_single_send() {
    let sync = MockSyncAdapter::new();
    let mut options = options_with_sync(sync.clone());
    options.sync_policy.snapshot_sync.send = false;
    options.snapshot_every = SnapshotPolicy {
        updates: Some(1),
        bytes: None,
    };

    let registry = DocumentRegistry::new(Arc::new(MemoryStorage::new()), options);
    let doc = registry.open("d1").await.unwrap();

    doc.mutate(|data| data.set_i64("count", 1)).await.unwrap();
    doc.mutate(|data| data.set_i64("count", 2)).await.unwrap();

    // Exactly one snapshot push despite two cadence snapshots: the first
    // snapshot always goes, later generation bumps are suppressed.
    let pushes = sync.pushes();
    let kinds: Vec<bool> = pushes.iter().map(|p| p.is_snapshot).collect();
    assert_eq!(kinds, vec![true, false, false]);
}

#[tokio::test]
async fn cold_start_snapshot_request_off() {
    let sync = MockSyncAdapter::new();
    let mut options = options_with_sync(sync.clone());
    options.sync_policy.snapshot_sync.request_on_new_document = false;

    let registry = DocumentRegistry::new(Arc::new(MemoryStorage::new()), options);
    registry.open("d1").await.unwrap();

    let pulls = sync.pulls();
    assert_eq!(pulls.len(), 1);
    assert!(!pulls[0].request_snapshot);
    assert!(pulls[0].state_vector.is_some());
}

#[tokio::test]
async fn cold_start_requests_snapshot_by_default() {
    let sync = MockSyncAdapter::new();
    let registry = DocumentRegistry::new(
        Arc::new(MemoryStorage::new()),
        options_with_sync(sync.clone()),
    );
    registry.open("d1").await.unwrap();

    let pulls = sync.pulls();
    assert_eq!(pulls.len(), 1);
    assert!(pulls[0].request_snapshot);
    assert!(pulls[0].state_vector.is_none());
}

#[tokio::test]
async fn pull_before_push_disabled() {
    let sync = MockSyncAdapter::new();
    let mut options = options_with_sync(sync.clone());
    options.sync_policy.pull_before_push = false;

    let registry = DocumentRegistry::new(Arc::new(MemoryStorage::new()), options);
    let doc = registry.open("d1").await.unwrap();
    doc.mutate(|data| data.set_i64("count", 1)).await.unwrap();

    // Only the initial pull; the push still happened.
    assert_eq!(sync.pulls().len(), 1);
    assert_eq!(sync.incremental_pushes().len(), 1);
}

#[tokio::test]
async fn manual_sync_push_with_force_snapshot() {
    let storage = Arc::new(MemoryStorage::new());
    let sync = MockSyncAdapter::new();
    sync.set_offline(true);

    let registry = DocumentRegistry::new(storage.clone(), options_with_sync(sync.clone()));
    let doc = registry.open("d1").await.unwrap();

    // The mutation's own push attempt fails; the backlog entry stays.
    let result = doc.mutate(|data| data.set_i64("count", 1)).await;
    assert!(matches!(result, Err(DocsyncError::Transport(_))));
    assert_eq!(doc.pending_sync_len(), 1);

    sync.set_offline(false);
    doc.sync(SyncRequest {
        pull: false,
        push: true,
        force_snapshot: true,
    })
    .await
    .unwrap();

    // Fresh snapshot stored (generation bumped past the handshake's one),
    // then pushed, then the pending incremental drained.
    let record = storage.get_snapshot("d1").await.unwrap().unwrap();
    assert_eq!(record.snapshot_generation, 2);

    let pushes = sync.pushes();
    assert_eq!(pushes.len(), 2);
    assert!(pushes[0].is_snapshot);
    assert!(!pushes[1].is_snapshot);
    assert_eq!(doc.pending_sync_len(), 0);
}

// =========================================================================
// Quantified invariants
// =========================================================================

#[tokio::test]
async fn persistence_precedes_push() {
    // Storage and sync record into the same log, so relative order is
    // directly observable.
    let ops = Arc::new(Mutex::new(Vec::new()));
    let storage = Arc::new(RecordingStorage::new(Arc::clone(&ops)));
    let sync = MockSyncAdapter::with_ops(Arc::clone(&ops));

    let registry = DocumentRegistry::new(storage, options_with_sync(sync.clone()));
    let doc = registry.open("d1").await.unwrap();
    doc.mutate(|data| data.set_i64("count", 1)).await.unwrap();

    let ops = ops.lock().unwrap().clone();
    let first_append = ops.iter().position(|op| op == "append_update").unwrap();
    let first_push = ops.iter().position(|op| op.starts_with("push:")).unwrap();
    assert!(
        first_append < first_push,
        "update must be durable before any push: {ops:?}"
    );
    assert_eq!(sync.incremental_pushes().len(), 1);
}

#[tokio::test]
async fn local_updates_keep_order_everywhere() {
    let storage = Arc::new(MemoryStorage::new());
    let sync = MockSyncAdapter::new();
    let registry = DocumentRegistry::new(storage.clone(), options_with_sync(sync.clone()));
    let doc = registry.open("d1").await.unwrap();

    let tasks: Vec<_> = (0..4)
        .map(|i| doc.mutate(move |data| data.set_i64("count", i)))
        .collect();
    for task in tasks {
        task.await.unwrap();
    }

    let log = storage.get_updates("d1").await.unwrap().unwrap();
    let pushed = sync.incremental_pushes();

    // Same updates, same order, in the log and on the wire.
    assert_eq!(pushed.len(), 4);
    assert_eq!(log, pushed);
    assert_eq!(doc.pending_sync_len(), 0);
    assert_eq!(doc.data().get_i64("count"), Some(3));
}

#[tokio::test]
async fn pulled_updates_are_persisted_but_never_pushed() {
    // Author a remote update.
    let remote_update = {
        let storage = Arc::new(MemoryStorage::new());
        let registry = DocumentRegistry::new(storage.clone(), RegistryOptions::default());
        let doc = registry.open("d1").await.unwrap();
        doc.mutate(|data| data.set_str("title", "from server"))
            .await
            .unwrap();
        storage.get_updates("d1").await.unwrap().unwrap().remove(0)
    };

    let storage = Arc::new(MemoryStorage::new());
    let sync = MockSyncAdapter::new();
    sync.script_pull(vec![remote_update]);

    let registry = DocumentRegistry::new(storage.clone(), options_with_sync(sync.clone()));
    let doc = registry.open("d1").await.unwrap();
    doc.flush().await.unwrap();

    assert_eq!(doc.data().get_str("title").as_deref(), Some("from server"));
    // Persisted without marking pending, and nothing was pushed.
    assert_eq!(storage.get_updates("d1").await.unwrap().unwrap().len(), 1);
    assert_eq!(doc.pending_sync_len(), 0);
    assert!(sync.pushes().is_empty());
}

#[tokio::test]
async fn round_trip_reproduces_model_view() {
    // Replica A authors and pushes.
    let sync_a = MockSyncAdapter::new();
    let registry_a = DocumentRegistry::new(
        Arc::new(MemoryStorage::new()),
        options_with_sync(sync_a.clone()),
    );
    let doc_a = registry_a.open("d1").await.unwrap();
    doc_a
        .mutate(|data| {
            data.set_str("title", "shared");
            data.set_i64("count", 7);
        })
        .await
        .unwrap();

    // The server hands replica B the snapshot A pushed.
    let snapshot = sync_a
        .pushes()
        .into_iter()
        .find(|p| p.is_snapshot)
        .unwrap()
        .update;

    let sync_b = MockSyncAdapter::new();
    sync_b.script_pull(vec![snapshot]);
    let registry_b = DocumentRegistry::new(
        Arc::new(MemoryStorage::new()),
        options_with_sync(sync_b.clone()),
    );
    let doc_b = registry_b.open("d1").await.unwrap();

    assert_eq!(doc_b.data().get_str("title").as_deref(), Some("shared"));
    assert_eq!(doc_b.data().get_i64("count"), Some(7));
}

#[tokio::test]
async fn push_checkpoint_is_persisted() {
    let storage = Arc::new(MemoryStorage::new());
    let sync = MockSyncAdapter::new();
    let registry = DocumentRegistry::new(storage.clone(), options_with_sync(sync.clone()));
    let doc = registry.open("d1").await.unwrap();

    doc.mutate(|data| data.set_i64("count", 1)).await.unwrap();

    assert_eq!(
        storage.get_sync_checkpoint("d1").await.unwrap().as_deref(),
        Some("2026-07-01T12:00:00Z")
    );
}

#[tokio::test]
async fn failed_push_keeps_head_and_later_retry_succeeds() {
    let sync = MockSyncAdapter::new();
    sync.set_offline(true);
    let registry = DocumentRegistry::new(
        Arc::new(MemoryStorage::new()),
        options_with_sync(sync.clone()),
    );
    let doc = registry.open("d1").await.unwrap();

    assert!(doc.mutate(|data| data.set_i64("count", 1)).await.is_err());
    assert_eq!(doc.pending_sync_len(), 1);

    // No background retry: nothing drains until the next local mutation.
    doc.flush().await.unwrap();
    assert_eq!(doc.pending_sync_len(), 1);

    sync.set_offline(false);
    doc.mutate(|data| data.set_i64("count", 2)).await.unwrap();

    // The second mutation's sequence pushed the stale head first; the new
    // entry waits its turn.
    assert_eq!(sync.incremental_pushes().len(), 1);
    assert_eq!(doc.pending_sync_len(), 1);

    // A manual push drains the rest.
    doc.sync(SyncRequest {
        pull: false,
        push: true,
        force_snapshot: false,
    })
    .await
    .unwrap();
    assert_eq!(doc.pending_sync_len(), 0);
    assert_eq!(sync.incremental_pushes().len(), 2);
}

#[tokio::test]
async fn sync_events_fire_around_pull_and_push() {
    let sync = MockSyncAdapter::new();
    let registry = DocumentRegistry::new(
        Arc::new(MemoryStorage::new()),
        options_with_sync(sync.clone()),
    );

    let events = Arc::new(Mutex::new(Vec::new()));
    let events_clone = Arc::clone(&events);
    registry.on_sync_event(Arc::new(move |event| {
        events_clone
            .lock()
            .unwrap()
            .push((event.direction, event.phase, event.is_snapshot));
    }));

    let doc = registry.open("d1").await.unwrap();
    doc.mutate(|data| data.set_i64("count", 1)).await.unwrap();

    let events = events.lock().unwrap().clone();
    // Initial pull start/success.
    assert_eq!(events[0], (SyncDirection::Pull, SyncPhase::Started, false));
    assert_eq!(events[1], (SyncDirection::Pull, SyncPhase::Succeeded, false));
    // The outgoing sequence pulled, pushed the snapshot, pushed the update.
    assert!(events.contains(&(SyncDirection::Push, SyncPhase::Started, true)));
    assert!(events.contains(&(SyncDirection::Push, SyncPhase::Succeeded, true)));
    assert!(events.contains(&(SyncDirection::Push, SyncPhase::Succeeded, false)));
}

#[tokio::test]
async fn push_failure_emits_failed_event() {
    let sync = MockSyncAdapter::new();
    sync.set_offline(true);
    let registry = DocumentRegistry::new(
        Arc::new(MemoryStorage::new()),
        options_with_sync(sync.clone()),
    );

    let failures = Arc::new(Mutex::new(Vec::new()));
    let failures_clone = Arc::clone(&failures);
    registry.on_sync_event(Arc::new(move |event| {
        if event.phase == SyncPhase::Failed {
            failures_clone
                .lock()
                .unwrap()
                .push(event.error.clone().unwrap_or_default());
        }
    }));

    let doc = registry.open("d1").await.unwrap();
    let _ = doc.mutate(|data| data.set_i64("count", 1)).await;

    let failures = failures.lock().unwrap();
    assert_eq!(failures.len(), 1);
    assert!(failures[0].contains("offline"));
}

#[tokio::test]
async fn realtime_publish_happens_after_push() {
    let sync = MockSyncAdapter::new();
    let realtime = MockRealtimeAdapter::new();
    let registry = DocumentRegistry::new(
        Arc::new(MemoryStorage::new()),
        RegistryOptions {
            sync: Some(sync.clone()),
            realtime: Some(realtime.clone()),
            ..Default::default()
        },
    );

    let doc = registry.open("d1").await.unwrap();
    doc.mutate(|data| data.set_i64("count", 1)).await.unwrap();

    let published = realtime.published();
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].0, "d1");
    // The published blob is the same bytes the incremental push carried.
    assert_eq!(published[0].1, sync.incremental_pushes()[0]);
}

#[tokio::test]
async fn publish_failure_is_not_fatal() {
    struct FailingRealtime;

    impl RealtimeAdapter for FailingRealtime {
        fn subscribe(
            &self,
            _doc_id: &str,
            _on_update: RealtimeCallback,
        ) -> Result<RealtimeSubscription> {
            Ok(RealtimeSubscription::new(|| {}))
        }

        fn publish<'a>(&'a self, _doc_id: &'a str, _payload: &'a [u8]) -> BoxFuture<'a, Result<()>> {
            Box::pin(async { Err(DocsyncError::RealtimePublish("socket closed".into())) })
        }
    }

    let errors = Arc::new(Mutex::new(Vec::new()));
    let errors_clone = Arc::clone(&errors);
    let registry = DocumentRegistry::new(
        Arc::new(MemoryStorage::new()),
        RegistryOptions {
            realtime: Some(Arc::new(FailingRealtime)),
            on_error: Some(Arc::new(move |err| {
                errors_clone.lock().unwrap().push(err.to_string());
            })),
            ..Default::default()
        },
    );

    let doc = registry.open("d1").await.unwrap();
    // The mutation still succeeds; the publish failure goes to the hook.
    doc.mutate(|data| data.set_i64("count", 1)).await.unwrap();

    let errors = errors.lock().unwrap();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].contains("socket closed"));
}

#[tokio::test]
async fn two_replicas_converge_over_local_hub() {
    use docsync_core::LocalRealtimeHub;

    let hub = Arc::new(LocalRealtimeHub::new());

    let registry_a = DocumentRegistry::new(
        Arc::new(MemoryStorage::new()),
        RegistryOptions {
            realtime: Some(hub.clone()),
            ..Default::default()
        },
    );
    let registry_b = DocumentRegistry::new(
        Arc::new(MemoryStorage::new()),
        RegistryOptions {
            realtime: Some(hub.clone()),
            ..Default::default()
        },
    );

    let doc_a = registry_a.open("shared").await.unwrap();
    let doc_b = registry_b.open("shared").await.unwrap();

    doc_a.mutate(|data| data.set_str("from", "a")).await.unwrap();
    doc_b.flush().await.unwrap();
    assert_eq!(doc_b.data().get_str("from").as_deref(), Some("a"));

    doc_b.mutate(|data| data.set_i64("count", 2)).await.unwrap();
    doc_a.flush().await.unwrap();
    assert_eq!(doc_a.data().get_i64("count"), Some(2));
}
