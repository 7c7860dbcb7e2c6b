//! The in-memory CRDT replica.
//!
//! `CoreDoc` wraps a yrs [`Doc`] whose root container is a map named
//! `"data"`. Every transaction is tagged with an origin token; the update
//! observer classifies each emitted update by that token and records it in
//! an outbox, which the caller drains after the transaction commits. That
//! drain is the dispatch point: the managed document routes each emitted
//! update according to its origin.

use std::sync::{Arc, Mutex};

use yrs::updates::decoder::Decode;
use yrs::updates::encoder::Encode;
use yrs::{Any, Doc, Map, MapRef, Out, ReadTxn, StateVector, Transact, TransactionMut, Update};

use crate::error::{DocsyncError, Result};
use crate::origin::{OriginTokens, UpdateOrigin};

/// Name of the root map holding document data.
const DATA_MAP_NAME: &str = "data";

/// An update captured by the CRDT's update hook, classified by origin.
#[derive(Debug, Clone)]
pub(crate) struct EmittedUpdate {
    pub bytes: Vec<u8>,
    pub origin: UpdateOrigin,
}

/// A yrs document plus the origin-classifying update hook.
///
/// Not internally synchronized: callers hold it behind a mutex whose
/// critical section covers the emit→dispatch step. All methods are
/// synchronous; there are no await points while the document is borrowed.
pub(crate) struct CoreDoc {
    doc: Doc,
    data: MapRef,
    tokens: Arc<OriginTokens>,
    outbox: Arc<Mutex<Vec<EmittedUpdate>>>,
    _updates_sub: yrs::Subscription,
}

impl CoreDoc {
    pub(crate) fn new() -> Self {
        let doc = Doc::new();
        let data = doc.get_or_insert_map(DATA_MAP_NAME);
        let tokens = Arc::new(OriginTokens::new());
        let outbox = Arc::new(Mutex::new(Vec::new()));

        let sub = {
            let tokens = Arc::clone(&tokens);
            let outbox = Arc::clone(&outbox);
            doc.observe_update_v1(move |txn, event| {
                let origin = tokens.classify(txn.origin());
                outbox.lock().unwrap().push(EmittedUpdate {
                    bytes: event.update.clone(),
                    origin,
                });
            })
            .expect("failed to observe document updates")
        };

        Self {
            doc,
            data,
            tokens,
            outbox,
            _updates_sub: sub,
        }
    }

    fn drain_outbox(&self) -> Vec<EmittedUpdate> {
        std::mem::take(&mut *self.outbox.lock().unwrap())
    }

    /// Run a locally authored transaction and return the updates it
    /// emitted. A caller-supplied origin tag still classifies as local.
    pub(crate) fn commit_local<F>(&self, origin: Option<&str>, f: F) -> Vec<EmittedUpdate>
    where
        F: FnOnce(&mut DataWriter<'_, '_>),
    {
        {
            let mut txn = match origin {
                Some(tag) => self.doc.transact_mut_with(tag),
                None => self.doc.transact_mut(),
            };
            let mut writer = DataWriter {
                map: &self.data,
                txn: &mut txn,
            };
            f(&mut writer);
        }
        self.drain_outbox()
    }

    /// Apply an update blob received from storage, sync, or realtime,
    /// tagged with the matching private origin token. Returns the updates
    /// the transaction actually emitted (the genuinely new portion).
    pub(crate) fn apply_external(
        &self,
        update: &[u8],
        origin: UpdateOrigin,
    ) -> Result<Vec<EmittedUpdate>> {
        let decoded = Update::decode_v1(update)
            .map_err(|e| DocsyncError::Crdt(format!("failed to decode update: {e}")))?;

        {
            let mut txn = self.doc.transact_mut_with(self.tokens.token_for(origin));
            txn.apply_update(decoded)
                .map_err(|e| DocsyncError::Crdt(format!("failed to apply update: {e}")))?;
        }
        Ok(self.drain_outbox())
    }

    /// Encode the current state vector.
    pub(crate) fn state_vector(&self) -> Vec<u8> {
        let txn = self.doc.transact();
        txn.state_vector().encode_v1()
    }

    /// Encode the full state as a single update blob.
    pub(crate) fn full_state(&self) -> Vec<u8> {
        let txn = self.doc.transact();
        txn.encode_state_as_update_v1(&StateVector::default())
    }

    pub(crate) fn get_any(&self, key: &str) -> Option<Any> {
        let txn = self.doc.transact();
        match self.data.get(&txn, key) {
            Some(Out::Any(any)) => Some(any),
            _ => None,
        }
    }

    pub(crate) fn keys(&self) -> Vec<String> {
        let txn = self.doc.transact();
        self.data.keys(&txn).map(String::from).collect()
    }

    pub(crate) fn len(&self) -> usize {
        let txn = self.doc.transact();
        self.data.len(&txn) as usize
    }
}

impl std::fmt::Debug for CoreDoc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoreDoc")
            .field("keys", &self.len())
            .finish_non_exhaustive()
    }
}

/// Write access to a document's root map inside a `mutate` transaction.
///
/// All changes made through one writer commit as a single update.
pub struct DataWriter<'a, 'doc> {
    map: &'a MapRef,
    txn: &'a mut TransactionMut<'doc>,
}

impl DataWriter<'_, '_> {
    /// Set a string field.
    pub fn set_str(&mut self, key: &str, value: &str) {
        self.map.insert(self.txn, key, Any::from(value));
    }

    /// Set an integer field.
    pub fn set_i64(&mut self, key: &str, value: i64) {
        self.map.insert(self.txn, key, Any::BigInt(value));
    }

    /// Set a float field.
    pub fn set_f64(&mut self, key: &str, value: f64) {
        self.map.insert(self.txn, key, Any::Number(value));
    }

    /// Set a boolean field.
    pub fn set_bool(&mut self, key: &str, value: bool) {
        self.map.insert(self.txn, key, Any::Bool(value));
    }

    /// Store a structured value as its JSON text.
    pub fn set_json(&mut self, key: &str, value: &serde_json::Value) {
        self.map.insert(self.txn, key, Any::from(value.to_string().as_str()));
    }

    /// Remove a field. Returns `true` if it existed.
    pub fn remove(&mut self, key: &str) -> bool {
        self.map.remove(self.txn, key).is_some()
    }

    /// Read an integer field mid-transaction (for read-modify-write).
    pub fn get_i64(&self, key: &str) -> Option<i64> {
        match self.map.get(&*self.txn, key) {
            Some(Out::Any(Any::BigInt(value))) => Some(value),
            Some(Out::Any(Any::Number(value))) => Some(value as i64),
            _ => None,
        }
    }

    /// Read a string field mid-transaction.
    pub fn get_str(&self, key: &str) -> Option<String> {
        match self.map.get(&*self.txn, key) {
            Some(Out::Any(Any::String(value))) => Some(value.to_string()),
            _ => None,
        }
    }
}
