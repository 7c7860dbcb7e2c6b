//! Sync adapter contract.
//!
//! The sync backend is request/response and opaque-blob: the runtime pulls
//! whatever the server has beyond its state vector (or a snapshot on cold
//! start) and pushes its pending updates one at a time. The trait is
//! transport-agnostic; the `rest-client` feature provides the default REST
//! implementation over the [`crate::protocol`] wire shape.

use crate::error::Result;
use crate::storage::BoxFuture;

/// A pull issued by the runtime.
#[derive(Debug, Clone)]
pub struct PullRequest {
    /// Document to pull.
    pub doc_id: String,
    /// The replica's state vector. `None` on a brand-new document's
    /// snapshot-requesting first pull.
    pub state_vector: Option<Vec<u8>>,
    /// Ask the server for a full snapshot instead of increments.
    pub request_snapshot: bool,
    /// Checkpoint from the previous server response, if any.
    pub last_synced: Option<String>,
}

/// Result of a pull.
///
/// A snapshot blob and incremental updates are deliberately not
/// distinguished here: both are opaque CRDT payloads applied identically,
/// in order.
#[derive(Debug, Clone, Default)]
pub struct PullResponse {
    /// Payload blobs to apply, oldest first. Empty when up-to-date.
    pub payloads: Vec<Vec<u8>>,
    /// New checkpoint to persist, if the server returned one.
    pub last_synced: Option<String>,
}

/// A push issued by the runtime.
#[derive(Debug, Clone)]
pub struct PushRequest {
    /// Document to push.
    pub doc_id: String,
    /// The payload blob (post-codec).
    pub update: Vec<u8>,
    /// True when the payload is a full-state snapshot.
    pub is_snapshot: bool,
    /// Checkpoint from the previous server response, if any.
    pub last_synced: Option<String>,
}

/// Result of a push.
#[derive(Debug, Clone, Default)]
pub struct PushResponse {
    /// New checkpoint to persist, if the server returned one.
    pub last_synced: Option<String>,
}

/// Request/response sync backend.
///
/// Adapters may be shared across documents and must tolerate concurrent
/// calls for different documents; within one document the runtime already
/// serializes all calls.
pub trait SyncAdapter: Send + Sync {
    /// Fetch payloads the replica is missing.
    fn pull<'a>(&'a self, request: PullRequest) -> BoxFuture<'a, Result<PullResponse>>;

    /// Send one payload to the backend.
    fn push<'a>(&'a self, request: PushRequest) -> BoxFuture<'a, Result<PushResponse>>;
}
