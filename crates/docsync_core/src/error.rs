use thiserror::Error;

/// Unified error type for engine operations.
///
/// Variants map onto the failure classes of the runtime: storage faults are
/// fatal for the operation that hit them, transport faults leave the
/// pending-sync backlog in place for a later retry, and decode faults discard
/// the offending inbound payload without touching local state.
#[derive(Debug, Error)]
pub enum DocsyncError {
    /// An optional storage method is not implemented by the configured
    /// backend. The runtime warns once per method and continues with
    /// in-memory behavior; this variant should not escape to callers.
    #[error("storage adapter does not implement `{0}`")]
    Unsupported(&'static str),

    /// A storage backend failed. The operation in progress is aborted and
    /// the pending-sync list is not advanced.
    #[error("storage error: {0}")]
    Storage(String),

    /// SQLite error from the `sqlite` storage backend.
    #[cfg(feature = "sqlite")]
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// General I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A pull or push against the sync backend failed. The head of the
    /// pending-sync queue stays put; the next local mutation or a manual
    /// sync retries it.
    #[error("sync transport error: {0}")]
    Transport(String),

    /// Publishing to the realtime transport failed. Never fatal: the update
    /// is already durable by the time publication is attempted.
    #[error("realtime publish error: {0}")]
    RealtimePublish(String),

    /// A codec or wire payload could not be decoded. The inbound update is
    /// discarded and local state is untouched.
    #[error("decode error: {0}")]
    Decode(String),

    /// The CRDT rejected an update blob.
    #[error("CRDT error: {0}")]
    Crdt(String),

    /// A sync-event listener panicked. Routed to the error hook, never
    /// propagated past the event bus.
    #[error("sync event listener failed: {0}")]
    Listener(String),

    /// Contract violation: the operation names a document id that is not
    /// currently open.
    #[error("document '{0}' is not loaded")]
    NotLoaded(String),

    /// The per-document task queue shut down before the task completed,
    /// because the document was closed or removed mid-flight.
    #[error("document task queue closed before the task completed")]
    QueueClosed,
}

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, DocsyncError>;
