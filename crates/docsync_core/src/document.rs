//! Per-document managed state.
//!
//! A `ManagedDocument` owns the CRDT replica, the counters and snapshot
//! generations, the pending-sync backlog, the per-document task serializer,
//! and the realtime subscription handle. It is shared behind an `Arc`
//! between the registry, document handles, and in-flight serializer tasks.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use yrs::Any;

use crate::doc::{CoreDoc, DataWriter, EmittedUpdate};
use crate::error::Result;
use crate::origin::UpdateOrigin;
use crate::realtime::RealtimeSubscription;
use crate::serializer::TaskQueue;

/// Mutable bookkeeping for one document. Guarded by a mutex; critical
/// sections never span an await point.
#[derive(Debug, Default)]
pub(crate) struct DocState {
    /// Updates appended since the last snapshot. Reset on snapshot.
    pub updates_since_snapshot: u64,
    /// Bytes appended since the last snapshot. Reset on snapshot.
    pub bytes_since_snapshot: u64,
    /// Bumped every time a snapshot is stored. Strictly monotonic for the
    /// lifetime of the document.
    pub snapshot_generation: u64,
    /// Last generation acknowledged by a successful snapshot push.
    /// Invariant: `synced_snapshot_generation <= snapshot_generation`.
    pub synced_snapshot_generation: u64,
    /// True until the first sync pull completes. Controls the
    /// snapshot-request on a cold pull.
    pub is_brand_new: bool,
    /// Locally authored, transport-encoded updates not yet acknowledged by
    /// a push. FIFO.
    pub pending_sync: VecDeque<Vec<u8>>,
    /// The server checkpoint from the latest pull/push response.
    pub last_synced: Option<String>,
}

pub(crate) struct ManagedDocument {
    id: String,
    crdt: Mutex<CoreDoc>,
    state: Mutex<DocState>,
    queue: TaskQueue,
    realtime_unsub: Mutex<Option<RealtimeSubscription>>,
}

impl ManagedDocument {
    /// Create an empty managed document. Must run inside a tokio runtime
    /// (the serializer spawns its worker task here).
    pub(crate) fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            crdt: Mutex::new(CoreDoc::new()),
            state: Mutex::new(DocState::default()),
            queue: TaskQueue::new(id),
            realtime_unsub: Mutex::new(None),
        }
    }

    pub(crate) fn id(&self) -> &str {
        &self.id
    }

    pub(crate) fn queue(&self) -> &TaskQueue {
        &self.queue
    }

    pub(crate) fn with_state<T>(&self, f: impl FnOnce(&mut DocState) -> T) -> T {
        let mut state = self.state.lock().unwrap();
        f(&mut state)
    }

    /// Run a locally authored transaction; returns the emitted updates.
    pub(crate) fn commit_local<F>(&self, origin: Option<&str>, f: F) -> Vec<EmittedUpdate>
    where
        F: FnOnce(&mut DataWriter<'_, '_>),
    {
        self.crdt.lock().unwrap().commit_local(origin, f)
    }

    /// Apply an external update blob with the given origin; returns the
    /// genuinely new updates the transaction emitted.
    pub(crate) fn apply_external(
        &self,
        update: &[u8],
        origin: UpdateOrigin,
    ) -> Result<Vec<EmittedUpdate>> {
        self.crdt.lock().unwrap().apply_external(update, origin)
    }

    pub(crate) fn state_vector(&self) -> Vec<u8> {
        self.crdt.lock().unwrap().state_vector()
    }

    pub(crate) fn full_state(&self) -> Vec<u8> {
        self.crdt.lock().unwrap().full_state()
    }

    pub(crate) fn get_any(&self, key: &str) -> Option<Any> {
        self.crdt.lock().unwrap().get_any(key)
    }

    pub(crate) fn keys(&self) -> Vec<String> {
        self.crdt.lock().unwrap().keys()
    }

    pub(crate) fn data_len(&self) -> usize {
        self.crdt.lock().unwrap().len()
    }

    pub(crate) fn set_realtime_subscription(&self, subscription: RealtimeSubscription) {
        let mut unsub = self.realtime_unsub.lock().unwrap();
        *unsub = Some(subscription);
    }

    /// Drop the realtime subscription, unsubscribing synchronously.
    pub(crate) fn clear_realtime_subscription(&self) {
        let mut unsub = self.realtime_unsub.lock().unwrap();
        *unsub = None;
    }
}

impl std::fmt::Debug for ManagedDocument {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock().unwrap();
        f.debug_struct("ManagedDocument")
            .field("id", &self.id)
            .field("snapshot_generation", &state.snapshot_generation)
            .field("pending_sync", &state.pending_sync.len())
            .finish_non_exhaustive()
    }
}

/// Read access to a document's root map.
///
/// Views are cheap clones of the document handle; reads always reflect the
/// replica's current state, including updates applied from storage, sync,
/// or realtime.
#[derive(Debug, Clone)]
pub struct DataView {
    pub(crate) doc: Arc<ManagedDocument>,
}

impl DataView {
    /// Read a string field.
    pub fn get_str(&self, key: &str) -> Option<String> {
        match self.doc.get_any(key)? {
            Any::String(value) => Some(value.to_string()),
            _ => None,
        }
    }

    /// Read an integer field.
    pub fn get_i64(&self, key: &str) -> Option<i64> {
        match self.doc.get_any(key)? {
            Any::BigInt(value) => Some(value),
            Any::Number(value) => Some(value as i64),
            _ => None,
        }
    }

    /// Read a float field.
    pub fn get_f64(&self, key: &str) -> Option<f64> {
        match self.doc.get_any(key)? {
            Any::Number(value) => Some(value),
            Any::BigInt(value) => Some(value as f64),
            _ => None,
        }
    }

    /// Read a boolean field.
    pub fn get_bool(&self, key: &str) -> Option<bool> {
        match self.doc.get_any(key)? {
            Any::Bool(value) => Some(value),
            _ => None,
        }
    }

    /// Parse a field stored as JSON text.
    pub fn get_json(&self, key: &str) -> Option<serde_json::Value> {
        match self.doc.get_any(key)? {
            Any::String(value) => serde_json::from_str(&value).ok(),
            _ => None,
        }
    }

    /// All field names in the root map.
    pub fn keys(&self) -> Vec<String> {
        self.doc.keys()
    }

    /// Number of fields in the root map.
    pub fn len(&self) -> usize {
        self.doc.data_len()
    }

    /// True when the root map has no fields.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
