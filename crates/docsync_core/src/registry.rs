//! Document registry and handles.
//!
//! The registry owns the live documents (one managed document per id), the
//! shared adapters, and the policies. `open` hydrates a document from
//! storage, runs the initial pull, subscribes it to realtime, and replays
//! the pending backlog; the returned handle is the public surface for
//! mutation, reads, manual sync, and lifecycle.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, RwLock};
use std::task::{Context, Poll};

use tokio::sync::oneshot;

use crate::codec::{Codec, IdentityCodec};
use crate::config::{SnapshotPolicy, SyncPolicy, SyncRequest};
use crate::doc::DataWriter;
use crate::document::{DataView, ManagedDocument};
use crate::error::{DocsyncError, Result};
use crate::events::{ErrorCallback, EventBus, SubscriptionId, SyncEventCallback};
use crate::orchestrator::SyncOrchestrator;
use crate::origin::UpdateOrigin;
use crate::persistence::{PersistenceCoordinator, SnapshotOptions};
use crate::realtime::{RealtimeAdapter, RealtimeCallback};
use crate::storage::StorageAdapter;
use crate::sync::SyncAdapter;

/// Configuration for a [`DocumentRegistry`].
///
/// Only the storage adapter is mandatory (and passed separately); sync and
/// realtime are optional, the codec defaults to pass-through, and policies
/// default per their own types.
#[derive(Default)]
pub struct RegistryOptions {
    /// Request/response sync backend.
    pub sync: Option<Arc<dyn SyncAdapter>>,
    /// Live pub/sub transport.
    pub realtime: Option<Arc<dyn RealtimeAdapter>>,
    /// Blob codec; identity when absent.
    pub codec: Option<Arc<dyn Codec>>,
    /// Outgoing sync behavior.
    pub sync_policy: SyncPolicy,
    /// Local snapshot cadence.
    pub snapshot_every: SnapshotPolicy,
    /// Hook for non-fatal background errors.
    pub on_error: Option<ErrorCallback>,
}

impl std::fmt::Debug for RegistryOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryOptions")
            .field("sync", &self.sync.is_some())
            .field("realtime", &self.realtime.is_some())
            .field("codec", &self.codec.is_some())
            .field("sync_policy", &self.sync_policy)
            .field("snapshot_every", &self.snapshot_every)
            .finish_non_exhaustive()
    }
}

pub(crate) struct RegistryInner {
    docs: RwLock<HashMap<String, Arc<ManagedDocument>>>,
    open_lock: tokio::sync::Mutex<()>,
    persistence: Arc<PersistenceCoordinator>,
    sync: Option<Arc<SyncOrchestrator>>,
    realtime: Option<Arc<dyn RealtimeAdapter>>,
    events: Arc<EventBus>,
}

impl RegistryInner {
    /// Hydrate a fresh managed document from storage and run the initial
    /// pull. An initial-pull failure is reported and does not block the
    /// open; storage failures do.
    async fn hydrate(&self, doc: &Arc<ManagedDocument>) -> Result<()> {
        let id = doc.id();
        let storage = self.persistence.storage();

        let snapshot_record = self
            .persistence
            .optional_read(storage.get_snapshot(id).await)?;
        let updates = storage.get_updates(id).await?;
        let pending = self
            .persistence
            .optional_read(storage.get_pending_sync(id).await)?;
        let checkpoint = self
            .persistence
            .optional_read(storage.get_sync_checkpoint(id).await)?;

        let brand_new = snapshot_record.is_none()
            && updates.is_none()
            && pending.as_ref().is_none_or(|p| p.is_empty());

        if let Some(record) = &snapshot_record {
            if let Some(blob) = &record.snapshot {
                self.apply_stored_blob(doc, blob);
            }
        }
        for blob in updates.iter().flatten() {
            self.apply_stored_blob(doc, blob);
        }

        doc.with_state(|s| {
            if let Some(record) = &snapshot_record {
                s.snapshot_generation = record.snapshot_generation;
                s.synced_snapshot_generation = record
                    .synced_snapshot_generation
                    .min(record.snapshot_generation);
            }
            s.pending_sync = pending.unwrap_or_default().into();
            s.last_synced = checkpoint;
            s.is_brand_new = brand_new;
        });

        log::debug!(
            "hydrated '{id}': brand_new={brand_new}, log={}, pending={}",
            updates.as_ref().map_or(0, Vec::len),
            doc.with_state(|s| s.pending_sync.len()),
        );

        if let Some(sync) = &self.sync {
            if let Err(err) = sync.initial_pull(doc).await {
                self.events.report_error(&err);
            }
        }
        Ok(())
    }

    /// Decode and apply one stored blob during hydration. A corrupt blob is
    /// reported and skipped; the rest of the log still applies.
    fn apply_stored_blob(&self, doc: &ManagedDocument, blob: &[u8]) {
        let result = self
            .persistence
            .codec()
            .decode(blob)
            .and_then(|raw| doc.apply_external(&raw, UpdateOrigin::Storage).map(drop));
        if let Err(err) = result {
            self.events.report_error(&err);
        }
    }

    /// Post-insert wiring: realtime subscription, then one outgoing task
    /// per surviving pending entry.
    fn attach(inner: &Arc<Self>, doc: &Arc<ManagedDocument>) {
        Self::subscribe_realtime(inner, doc);

        if inner.sync.is_some() {
            let backlog = doc.with_state(|s| s.pending_sync.len());
            if backlog > 0 {
                log::info!("replaying {backlog} pending updates for '{}'", doc.id());
            }
            for _ in 0..backlog {
                Self::enqueue_outgoing(inner, doc);
            }
        }
    }

    fn subscribe_realtime(inner: &Arc<Self>, doc: &Arc<ManagedDocument>) {
        let Some(adapter) = &inner.realtime else {
            return;
        };

        let weak = Arc::downgrade(inner);
        let id = doc.id().to_string();
        let callback: RealtimeCallback = Arc::new(move |payload: &[u8]| {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            let doc = inner.docs.read().unwrap().get(&id).cloned();
            let Some(doc) = doc else {
                return;
            };

            let payload = payload.to_vec();
            let inner_for_job = Arc::clone(&inner);
            let doc_for_job = Arc::clone(&doc);
            drop(doc.queue().enqueue(async move {
                let result = inner_for_job
                    .inbound_realtime_pipeline(&doc_for_job, payload)
                    .await;
                if let Err(err) = &result {
                    inner_for_job.events.report_error(err);
                }
                result
            }));
        });

        match adapter.subscribe(doc.id(), callback) {
            Ok(subscription) => doc.set_realtime_subscription(subscription),
            Err(err) => inner.events.report_error(&err),
        }
    }

    fn enqueue_outgoing(inner: &Arc<Self>, doc: &Arc<ManagedDocument>) {
        let Some(sync) = inner.sync.clone() else {
            return;
        };
        let inner_for_job = Arc::clone(inner);
        let doc_for_job = Arc::clone(doc);
        drop(doc.queue().enqueue(async move {
            let result = sync.outgoing_sequence(&doc_for_job).await;
            if let Err(err) = &result {
                inner_for_job.events.report_error(err);
            }
            result
        }));
    }

    /// The serialized pipeline behind every local mutation: persist each
    /// emitted update (appending to the log and the pending list), run the
    /// outgoing sync sequence, then publish to realtime.
    async fn local_update_pipeline(
        &self,
        doc: &Arc<ManagedDocument>,
        updates: Vec<Vec<u8>>,
    ) -> Result<()> {
        let mut encoded = Vec::with_capacity(updates.len());
        for raw in &updates {
            encoded.push(self.persistence.append(doc, raw, true).await?);
        }

        if let Some(sync) = &self.sync {
            for _ in &encoded {
                sync.outgoing_sequence(doc).await?;
            }
        }

        if let Some(realtime) = &self.realtime {
            for blob in &encoded {
                if let Err(err) = realtime.publish(doc.id(), blob).await {
                    let err = match err {
                        publish @ DocsyncError::RealtimePublish(_) => publish,
                        other => DocsyncError::RealtimePublish(other.to_string()),
                    };
                    self.events.report_error(&err);
                }
            }
        }
        Ok(())
    }

    /// The serialized pipeline behind every inbound realtime payload:
    /// decode, apply with the realtime origin, persist the genuinely new
    /// updates without marking them pending.
    async fn inbound_realtime_pipeline(
        &self,
        doc: &Arc<ManagedDocument>,
        payload: Vec<u8>,
    ) -> Result<()> {
        let raw = self.persistence.codec().decode(&payload)?;
        let emitted = doc.apply_external(&raw, UpdateOrigin::Realtime)?;
        for update in emitted {
            self.persistence.append(doc, &update.bytes, false).await?;
        }
        Ok(())
    }

    async fn manual_sync(
        inner: &Arc<Self>,
        doc: &Arc<ManagedDocument>,
        request: SyncRequest,
    ) -> Result<()> {
        let inner = Arc::clone(inner);
        let doc_for_job = Arc::clone(doc);
        doc.queue()
            .run(async move {
                match inner.sync.clone() {
                    Some(sync) => sync.manual_sync(&doc_for_job, request).await,
                    None => {
                        if request.force_snapshot {
                            inner
                                .persistence
                                .store_snapshot(
                                    &doc_for_job,
                                    SnapshotOptions {
                                        mark_synced: false,
                                        reset_counters: true,
                                    },
                                )
                                .await?;
                        }
                        if request.pull || request.push {
                            return Err(DocsyncError::Transport(
                                "no sync adapter configured".into(),
                            ));
                        }
                        Ok(())
                    }
                }
            })
            .await
    }
}

/// Registry of live documents.
///
/// Holds exactly one managed document per id; `open` is idempotent. The
/// storage adapter is shared across documents, as are the optional sync and
/// realtime adapters.
pub struct DocumentRegistry {
    inner: Arc<RegistryInner>,
}

impl DocumentRegistry {
    /// Create a registry over the given storage backend.
    pub fn new(storage: Arc<dyn StorageAdapter>, options: RegistryOptions) -> Self {
        let codec: Arc<dyn Codec> = options.codec.unwrap_or_else(|| Arc::new(IdentityCodec));
        let events = Arc::new(EventBus::new());
        if let Some(hook) = options.on_error {
            events.set_error_hook(hook);
        }

        let persistence = Arc::new(PersistenceCoordinator::new(
            storage,
            codec,
            options.snapshot_every,
        ));
        let sync = options.sync.map(|adapter| {
            Arc::new(SyncOrchestrator::new(
                adapter,
                options.sync_policy,
                Arc::clone(&persistence),
                Arc::clone(&events),
            ))
        });

        Self {
            inner: Arc::new(RegistryInner {
                docs: RwLock::new(HashMap::new()),
                open_lock: tokio::sync::Mutex::new(()),
                persistence,
                sync,
                realtime: options.realtime,
                events,
            }),
        }
    }

    /// Open a document, hydrating it from storage on first open. Returns
    /// the existing handle when the id is already open.
    ///
    /// Must run inside a tokio runtime: the document's serializer spawns
    /// its worker task here.
    pub async fn open(&self, id: &str) -> Result<DocumentHandle> {
        if let Some(doc) = self.inner.docs.read().unwrap().get(id).cloned() {
            return Ok(self.handle(doc));
        }

        let _guard = self.inner.open_lock.lock().await;
        if let Some(doc) = self.inner.docs.read().unwrap().get(id).cloned() {
            return Ok(self.handle(doc));
        }

        let doc = Arc::new(ManagedDocument::new(id));
        self.inner.hydrate(&doc).await?;
        self.inner
            .docs
            .write()
            .unwrap()
            .insert(id.to_string(), Arc::clone(&doc));
        RegistryInner::attach(&self.inner, &doc);
        Ok(self.handle(doc))
    }

    /// Drop a document from the registry without touching storage. The
    /// realtime subscription is cancelled synchronously; in-flight sync
    /// tasks finish and their results are discarded. Returns `false` when
    /// the id was not open.
    pub fn close(&self, id: &str) -> bool {
        let doc = self.inner.docs.write().unwrap().remove(id);
        match doc {
            Some(doc) => {
                doc.clear_realtime_subscription();
                true
            }
            None => false,
        }
    }

    /// Close the document and delete all its storage records.
    pub async fn remove(&self, id: &str) -> Result<()> {
        self.close(id);
        self.inner.persistence.storage().remove(id).await
    }

    /// Run a manual sync for an open document. Fails with
    /// [`DocsyncError::NotLoaded`] for unknown ids.
    pub async fn sync_now(&self, id: &str, request: SyncRequest) -> Result<()> {
        let doc = self
            .inner
            .docs
            .read()
            .unwrap()
            .get(id)
            .cloned()
            .ok_or_else(|| DocsyncError::NotLoaded(id.to_string()))?;
        RegistryInner::manual_sync(&self.inner, &doc, request).await
    }

    /// Subscribe to sync-phase events.
    pub fn on_sync_event(&self, listener: SyncEventCallback) -> SubscriptionId {
        self.inner.events.subscribe(listener)
    }

    /// Remove a sync-event listener.
    pub fn unsubscribe_sync_event(&self, id: SubscriptionId) -> bool {
        self.inner.events.unsubscribe(id)
    }

    /// Number of currently open documents.
    pub fn open_count(&self) -> usize {
        self.inner.docs.read().unwrap().len()
    }

    fn handle(&self, doc: Arc<ManagedDocument>) -> DocumentHandle {
        DocumentHandle {
            inner: Arc::clone(&self.inner),
            doc,
        }
    }
}

impl std::fmt::Debug for DocumentRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentRegistry")
            .field("open_count", &self.open_count())
            .finish_non_exhaustive()
    }
}

/// Handle to an open document.
///
/// Cheap to clone; all clones refer to the same managed document.
#[derive(Clone)]
pub struct DocumentHandle {
    inner: Arc<RegistryInner>,
    doc: Arc<ManagedDocument>,
}

impl DocumentHandle {
    /// The document id.
    pub fn id(&self) -> &str {
        self.doc.id()
    }

    /// Read access to the document's root map.
    pub fn data(&self) -> DataView {
        DataView {
            doc: Arc::clone(&self.doc),
        }
    }

    /// Mutate the document in a single CRDT transaction.
    ///
    /// The transaction commits synchronously; persistence, sync, and
    /// realtime publication run afterwards on the document's serializer.
    /// The returned task resolves when that pipeline finishes: await it
    /// for completion and errors, or drop it for fire-and-forget (errors
    /// then go to the error hook and the event bus).
    pub fn mutate<F>(&self, f: F) -> SyncTask
    where
        F: FnOnce(&mut DataWriter<'_, '_>),
    {
        self.mutate_inner(None, f)
    }

    /// Like [`DocumentHandle::mutate`], with a caller-supplied origin tag
    /// on the transaction. The update still counts as local authorship.
    pub fn mutate_with_origin<F>(&self, origin: &str, f: F) -> SyncTask
    where
        F: FnOnce(&mut DataWriter<'_, '_>),
    {
        self.mutate_inner(Some(origin), f)
    }

    fn mutate_inner<F>(&self, origin: Option<&str>, f: F) -> SyncTask
    where
        F: FnOnce(&mut DataWriter<'_, '_>),
    {
        let emitted = self.doc.commit_local(origin, f);
        let local: Vec<Vec<u8>> = emitted
            .into_iter()
            .filter(|u| u.origin == UpdateOrigin::Local)
            .map(|u| u.bytes)
            .collect();
        if local.is_empty() {
            return SyncTask::ready(Ok(()));
        }

        let inner = Arc::clone(&self.inner);
        let doc = Arc::clone(&self.doc);
        let rx = self.doc.queue().enqueue(async move {
            let result = inner.local_update_pipeline(&doc, local).await;
            if let Err(err) = &result {
                inner.events.report_error(err);
            }
            result
        });
        SyncTask::pending(rx)
    }

    /// Run a manual sync for this document.
    pub async fn sync(&self, request: SyncRequest) -> Result<()> {
        RegistryInner::manual_sync(&self.inner, &self.doc, request).await
    }

    /// Wait until every task currently queued for this document has run.
    pub async fn flush(&self) -> Result<()> {
        self.doc.queue().run(async { Ok(()) }).await
    }

    /// Number of locally authored updates not yet acknowledged by a push.
    pub fn pending_sync_len(&self) -> usize {
        self.doc.with_state(|s| s.pending_sync.len())
    }

    /// Close the document in the registry. See [`DocumentRegistry::close`].
    pub fn close(&self) -> bool {
        let doc = self.inner.docs.write().unwrap().remove(self.doc.id());
        match doc {
            Some(doc) => {
                doc.clear_realtime_subscription();
                true
            }
            None => false,
        }
    }

    /// Close the document and delete all its storage records.
    pub async fn remove(self) -> Result<()> {
        self.close();
        self.inner.persistence.storage().remove(self.doc.id()).await
    }
}

impl std::fmt::Debug for DocumentHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentHandle")
            .field("id", &self.id())
            .finish_non_exhaustive()
    }
}

/// Future resolving when a mutation's persistence/sync/publish pipeline has
/// finished.
///
/// Dropping the task does not cancel the pipeline; it only discards the
/// result.
#[derive(Debug)]
pub struct SyncTask {
    state: SyncTaskState,
}

#[derive(Debug)]
enum SyncTaskState {
    Ready(Option<Result<()>>),
    Pending(oneshot::Receiver<Result<()>>),
}

impl SyncTask {
    fn ready(result: Result<()>) -> Self {
        Self {
            state: SyncTaskState::Ready(Some(result)),
        }
    }

    fn pending(rx: oneshot::Receiver<Result<()>>) -> Self {
        Self {
            state: SyncTaskState::Pending(rx),
        }
    }
}

impl Future for SyncTask {
    type Output = Result<()>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match &mut self.get_mut().state {
            SyncTaskState::Ready(result) => {
                Poll::Ready(result.take().unwrap_or(Err(DocsyncError::QueueClosed)))
            }
            SyncTaskState::Pending(rx) => Pin::new(rx).poll(cx).map(|received| match received {
                Ok(result) => result,
                Err(_) => Err(DocsyncError::QueueClosed),
            }),
        }
    }
}
