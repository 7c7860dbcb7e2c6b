//! Observable sync-phase events.
//!
//! The event bus is a thread-safe callback registry. Every pull and push
//! emits a start event followed by a success or error event, so UI and
//! telemetry can track sync activity without hooking the adapters
//! themselves. Listener panics are caught and routed to the error hook;
//! emission never propagates a listener failure.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};

use crate::error::DocsyncError;

/// A unique identifier for an event subscription.
pub type SubscriptionId = u64;

/// Callback function type for sync events.
pub type SyncEventCallback = Arc<dyn Fn(&SyncEvent) + Send + Sync>;

/// Callback invoked for non-fatal background errors.
pub type ErrorCallback = Arc<dyn Fn(&DocsyncError) + Send + Sync>;

/// Whether the event describes a pull or a push.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncDirection {
    /// Fetching updates from the sync backend.
    Pull,
    /// Sending a local update or snapshot to the sync backend.
    Push,
}

/// Phase of a pull or push operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    /// The operation is about to hit the transport.
    Started,
    /// The operation completed.
    Succeeded,
    /// The operation failed; see [`SyncEvent::error`].
    Failed,
}

/// A sync-phase event emitted around every pull and push.
#[derive(Debug, Clone)]
pub struct SyncEvent {
    /// Document the operation belongs to.
    pub doc_id: String,
    /// Pull or push.
    pub direction: SyncDirection,
    /// Started, succeeded, or failed.
    pub phase: SyncPhase,
    /// True when the pushed payload is a full-state snapshot.
    pub is_snapshot: bool,
    /// True when the pull asked the server for a snapshot (cold start).
    pub request_snapshot: bool,
    /// Payload size, when known.
    pub bytes: Option<usize>,
    /// Error message for [`SyncPhase::Failed`].
    pub error: Option<String>,
    /// When the event was emitted.
    pub timestamp: DateTime<Utc>,
}

impl SyncEvent {
    fn new(doc_id: &str, direction: SyncDirection, phase: SyncPhase) -> Self {
        Self {
            doc_id: doc_id.to_string(),
            direction,
            phase,
            is_snapshot: false,
            request_snapshot: false,
            bytes: None,
            error: None,
            timestamp: Utc::now(),
        }
    }

    /// A [`SyncPhase::Started`] event.
    pub fn started(doc_id: &str, direction: SyncDirection) -> Self {
        Self::new(doc_id, direction, SyncPhase::Started)
    }

    /// A [`SyncPhase::Succeeded`] event.
    pub fn succeeded(doc_id: &str, direction: SyncDirection) -> Self {
        Self::new(doc_id, direction, SyncPhase::Succeeded)
    }

    /// A [`SyncPhase::Failed`] event carrying the error message.
    pub fn failed(doc_id: &str, direction: SyncDirection, error: &DocsyncError) -> Self {
        let mut event = Self::new(doc_id, direction, SyncPhase::Failed);
        event.error = Some(error.to_string());
        event
    }

    /// Tag the event as a snapshot push.
    pub fn with_snapshot(mut self, is_snapshot: bool) -> Self {
        self.is_snapshot = is_snapshot;
        self
    }

    /// Tag the event as a snapshot-requesting pull.
    pub fn with_request_snapshot(mut self, request_snapshot: bool) -> Self {
        self.request_snapshot = request_snapshot;
        self
    }

    /// Attach the payload size.
    pub fn with_bytes(mut self, bytes: usize) -> Self {
        self.bytes = Some(bytes);
        self
    }
}

/// Thread-safe registry of sync-event listeners plus the error hook.
pub struct EventBus {
    listeners: RwLock<HashMap<SubscriptionId, SyncEventCallback>>,
    next_id: AtomicU64,
    on_error: RwLock<Option<ErrorCallback>>,
}

impl EventBus {
    /// Create an empty bus with no error hook.
    pub fn new() -> Self {
        Self {
            listeners: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            on_error: RwLock::new(None),
        }
    }

    /// Install the error hook for non-fatal background errors.
    pub fn set_error_hook(&self, hook: ErrorCallback) {
        let mut on_error = self.on_error.write().unwrap();
        *on_error = Some(hook);
    }

    /// Subscribe to sync events. Returns an id for [`EventBus::unsubscribe`].
    pub fn subscribe(&self, callback: SyncEventCallback) -> SubscriptionId {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let mut listeners = self.listeners.write().unwrap();
        listeners.insert(id, callback);
        id
    }

    /// Remove a listener. Returns `true` if it existed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut listeners = self.listeners.write().unwrap();
        listeners.remove(&id).is_some()
    }

    /// Emit an event to all listeners. A panicking listener is reported via
    /// the error hook and does not affect other listeners.
    pub fn emit(&self, event: &SyncEvent) {
        let listeners = self.listeners.read().unwrap();
        for listener in listeners.values() {
            let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                listener(event);
            }));
            if let Err(panic) = outcome {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                drop(panic);
                self.report_error(&DocsyncError::Listener(message));
            }
        }
    }

    /// Route a non-fatal background error to the error hook, or the logger
    /// when no hook is installed.
    pub fn report_error(&self, error: &DocsyncError) {
        let hook = self.on_error.read().unwrap().clone();
        match hook {
            Some(hook) => hook(error),
            None => log::error!("{error}"),
        }
    }

    /// Number of active listeners.
    pub fn subscriber_count(&self) -> usize {
        self.listeners.read().unwrap().len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriber_count", &self.subscriber_count())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_subscribe_and_emit() {
        let bus = EventBus::new();
        let counter = Arc::new(AtomicUsize::new(0));

        let counter_clone = Arc::clone(&counter);
        let _id = bus.subscribe(Arc::new(move |_event| {
            counter_clone.fetch_add(1, Ordering::SeqCst);
        }));

        bus.emit(&SyncEvent::started("d1", SyncDirection::Pull));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unsubscribe() {
        let bus = EventBus::new();
        let counter = Arc::new(AtomicUsize::new(0));

        let counter_clone = Arc::clone(&counter);
        let id = bus.subscribe(Arc::new(move |_event| {
            counter_clone.fetch_add(1, Ordering::SeqCst);
        }));

        assert!(bus.unsubscribe(id));
        assert!(!bus.unsubscribe(id));

        bus.emit(&SyncEvent::started("d1", SyncDirection::Push));
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_listener_panic_is_isolated_and_reported() {
        let bus = EventBus::new();
        let reported = Arc::new(Mutex::new(Vec::new()));
        let counter = Arc::new(AtomicUsize::new(0));

        let reported_clone = Arc::clone(&reported);
        bus.set_error_hook(Arc::new(move |err| {
            reported_clone.lock().unwrap().push(err.to_string());
        }));

        bus.subscribe(Arc::new(|_| panic!("listener exploded")));
        let counter_clone = Arc::clone(&counter);
        bus.subscribe(Arc::new(move |_| {
            counter_clone.fetch_add(1, Ordering::SeqCst);
        }));

        bus.emit(&SyncEvent::succeeded("d1", SyncDirection::Pull));

        // The healthy listener still ran and the panic reached the hook.
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        let reported = reported.lock().unwrap();
        assert_eq!(reported.len(), 1);
        assert!(reported[0].contains("listener exploded"));
    }

    #[test]
    fn test_event_constructors() {
        let event = SyncEvent::failed(
            "d1",
            SyncDirection::Push,
            &DocsyncError::Transport("offline".into()),
        )
        .with_snapshot(true)
        .with_bytes(42);

        assert_eq!(event.phase, SyncPhase::Failed);
        assert!(event.is_snapshot);
        assert_eq!(event.bytes, Some(42));
        assert!(event.error.as_deref().unwrap().contains("offline"));
    }
}
