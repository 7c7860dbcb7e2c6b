//! Storage adapter contract.
//!
//! The runtime persists four kinds of records per document: the latest
//! snapshot (plus its generations), the append-only update log, the
//! pending-sync list, and the sync checkpoint. Only the log operations and
//! `remove` are required; everything else is optional and defaults to an
//! [`DocsyncError::Unsupported`] result, which the runtime maps to a
//! warn-once fallback with in-memory-only behavior for that feature.
//!
//! ## Object safety
//!
//! Backends may be genuinely asynchronous (IndexedDB/OPFS-style) or
//! synchronous behind a lock (SQLite). The trait is object-safe, so all
//! methods return boxed futures; synchronous backends wrap their work in a
//! ready future.

use std::future::Future;
use std::pin::Pin;

use crate::error::{DocsyncError, Result};

/// A boxed future for object-safe async adapter methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T>;

/// The snapshot record for a document, as returned by
/// [`StorageAdapter::get_snapshot`].
#[derive(Debug, Clone, Default)]
pub struct SnapshotRecord {
    /// The latest full-state snapshot blob, if one was ever stored.
    pub snapshot: Option<Vec<u8>>,
    /// Incremented by the backend on every [`StorageAdapter::set_snapshot`].
    pub snapshot_generation: u64,
    /// The last generation acknowledged by a successful snapshot push.
    /// Always `<= snapshot_generation`.
    pub synced_snapshot_generation: u64,
}

fn unsupported<T>(method: &'static str) -> BoxFuture<'static, StorageResult<T>>
where
    T: Send + 'static,
{
    Box::pin(async move { Err(DocsyncError::Unsupported(method)) })
}

/// Persistence backend for document state.
///
/// All byte buffers returned to the runtime must be independently owned by
/// the caller: backends clone on read and never hand out shared mutable
/// buffers. A backend may be shared across documents; the runtime issues at
/// most one request per document at a time, but requests for different
/// documents can arrive concurrently.
pub trait StorageAdapter: Send + Sync {
    /// Read the snapshot record. `None` when the document has no snapshot
    /// record at all.
    fn get_snapshot<'a>(&'a self, id: &'a str) -> BoxFuture<'a, StorageResult<Option<SnapshotRecord>>> {
        let _ = id;
        unsupported("get_snapshot")
    }

    /// Read the ordered update log. `None` means the document is unknown;
    /// an empty vec means known-and-empty.
    fn get_updates<'a>(&'a self, id: &'a str) -> BoxFuture<'a, StorageResult<Option<Vec<Vec<u8>>>>>;

    /// Read the pending-sync list. Same `None`/empty semantics as
    /// [`StorageAdapter::get_updates`].
    fn get_pending_sync<'a>(
        &'a self,
        id: &'a str,
    ) -> BoxFuture<'a, StorageResult<Option<Vec<Vec<u8>>>>> {
        let _ = id;
        unsupported("get_pending_sync")
    }

    /// Read the sync checkpoint (the server's `dateLastSynced` for this
    /// document).
    fn get_sync_checkpoint<'a>(&'a self, id: &'a str) -> BoxFuture<'a, StorageResult<Option<String>>> {
        let _ = id;
        unsupported("get_sync_checkpoint")
    }

    /// Append one update to the ordered log.
    fn append_update<'a>(&'a self, id: &'a str, update: &'a [u8]) -> BoxFuture<'a, StorageResult<()>>;

    /// Store the latest snapshot and bump the stored `snapshot_generation`.
    fn set_snapshot<'a>(&'a self, id: &'a str, snapshot: &'a [u8]) -> BoxFuture<'a, StorageResult<()>> {
        let _ = (id, snapshot);
        unsupported("set_snapshot")
    }

    /// Replace the pending-sync list.
    fn mark_pending_sync<'a>(
        &'a self,
        id: &'a str,
        updates: &'a [Vec<u8>],
    ) -> BoxFuture<'a, StorageResult<()>> {
        let _ = (id, updates);
        unsupported("mark_pending_sync")
    }

    /// Equivalent to `mark_pending_sync(id, [])`.
    fn clear_pending_sync<'a>(&'a self, id: &'a str) -> BoxFuture<'a, StorageResult<()>> {
        let _ = id;
        unsupported("clear_pending_sync")
    }

    /// Advance `synced_snapshot_generation`. Monotone-max, capped at the
    /// stored `snapshot_generation`.
    fn mark_snapshot_synced<'a>(
        &'a self,
        id: &'a str,
        generation: u64,
    ) -> BoxFuture<'a, StorageResult<()>> {
        let _ = (id, generation);
        unsupported("mark_snapshot_synced")
    }

    /// Store the sync checkpoint returned by the backend.
    fn set_sync_checkpoint<'a>(
        &'a self,
        id: &'a str,
        value: &'a str,
    ) -> BoxFuture<'a, StorageResult<()>> {
        let _ = (id, value);
        unsupported("set_sync_checkpoint")
    }

    /// Delete every record for the document.
    fn remove<'a>(&'a self, id: &'a str) -> BoxFuture<'a, StorageResult<()>>;
}
