//! Realtime transport contract and the in-process hub.
//!
//! The realtime transport is fire-and-forget pub/sub: the runtime publishes
//! an update after it is durable (and pushed, when sync is configured), and
//! applies whatever arrives on the subscription with the realtime origin so
//! it never echoes back out. Reconnect-and-rejoin is the adapter's concern;
//! the runtime tracks no connection state.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::error::Result;
use crate::storage::BoxFuture;

/// Callback invoked with each inbound realtime payload.
pub type RealtimeCallback = Arc<dyn Fn(&[u8]) + Send + Sync>;

/// Handle to an active realtime subscription. Dropping it unsubscribes.
pub struct RealtimeSubscription {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl RealtimeSubscription {
    /// Wrap an unsubscribe action.
    pub fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// Unsubscribe now instead of on drop.
    pub fn cancel(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for RealtimeSubscription {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl std::fmt::Debug for RealtimeSubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RealtimeSubscription")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}

/// Live pub/sub transport.
///
/// Payloads are opaque post-codec bytes. Adapters may be shared across
/// documents; the runtime serializes calls per document.
pub trait RealtimeAdapter: Send + Sync {
    /// Subscribe to a document's channel. The callback may be invoked from
    /// any thread.
    fn subscribe(&self, doc_id: &str, on_update: RealtimeCallback) -> Result<RealtimeSubscription>;

    /// Publish a payload to a document's channel.
    fn publish<'a>(&'a self, doc_id: &'a str, payload: &'a [u8]) -> BoxFuture<'a, Result<()>>;
}

/// In-process realtime transport.
///
/// Fans every published payload out to all subscribers of the channel,
/// synchronously, in the publisher's call. Useful for tests and for
/// multiple replicas living in one process; delivery to the publisher's own
/// document is harmless because re-applying a known update emits nothing.
#[derive(Default)]
pub struct LocalRealtimeHub {
    channels: Arc<Mutex<HashMap<String, HashMap<u64, RealtimeCallback>>>>,
    next_id: AtomicU64,
}

impl LocalRealtimeHub {
    /// Create an empty hub.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of active subscribers on a channel.
    pub fn subscriber_count(&self, doc_id: &str) -> usize {
        self.channels
            .lock()
            .unwrap()
            .get(doc_id)
            .map_or(0, |subs| subs.len())
    }
}

impl RealtimeAdapter for LocalRealtimeHub {
    fn subscribe(&self, doc_id: &str, on_update: RealtimeCallback) -> Result<RealtimeSubscription> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let mut channels = self.channels.lock().unwrap();
        channels
            .entry(doc_id.to_string())
            .or_default()
            .insert(id, on_update);

        let channels = Arc::clone(&self.channels);
        let doc_id = doc_id.to_string();
        Ok(RealtimeSubscription::new(move || {
            let mut channels = channels.lock().unwrap();
            if let Some(subs) = channels.get_mut(&doc_id) {
                subs.remove(&id);
                if subs.is_empty() {
                    channels.remove(&doc_id);
                }
            }
        }))
    }

    fn publish<'a>(&'a self, doc_id: &'a str, payload: &'a [u8]) -> BoxFuture<'a, Result<()>> {
        let subscribers: Vec<RealtimeCallback> = self
            .channels
            .lock()
            .unwrap()
            .get(doc_id)
            .map(|subs| subs.values().cloned().collect())
            .unwrap_or_default();

        Box::pin(async move {
            for subscriber in subscribers {
                subscriber(payload);
            }
            Ok(())
        })
    }
}

impl std::fmt::Debug for LocalRealtimeHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let channels = self.channels.lock().unwrap();
        f.debug_struct("LocalRealtimeHub")
            .field("channel_count", &channels.len())
            .finish()
    }
}
