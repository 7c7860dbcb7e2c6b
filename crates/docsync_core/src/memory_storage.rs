//! In-memory storage backend.
//!
//! Implements the full capability set of [`StorageAdapter`] on top of a
//! `HashMap` behind an `RwLock`. Used by tests and as a reference for the
//! adapter semantics; data is lost when the value is dropped.

use std::collections::HashMap;
use std::sync::RwLock;

use crate::storage::{BoxFuture, SnapshotRecord, StorageAdapter, StorageResult};

#[derive(Debug, Default, Clone)]
struct DocRecord {
    snapshot: Option<Vec<u8>>,
    snapshot_generation: u64,
    synced_snapshot_generation: u64,
    updates: Vec<Vec<u8>>,
    pending: Vec<Vec<u8>>,
    checkpoint: Option<String>,
}

/// In-memory [`StorageAdapter`] with the full capability set.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    docs: RwLock<HashMap<String, DocRecord>>,
}

impl MemoryStorage {
    /// Create a new empty in-memory storage.
    pub fn new() -> Self {
        Self::default()
    }

    fn with_doc<T>(&self, id: &str, f: impl FnOnce(&mut DocRecord) -> T) -> T {
        let mut docs = self.docs.write().unwrap();
        f(docs.entry(id.to_string()).or_default())
    }

    fn read_doc<T>(&self, id: &str, f: impl FnOnce(Option<&DocRecord>) -> T) -> T {
        let docs = self.docs.read().unwrap();
        f(docs.get(id))
    }

    fn ready<T: Send + 'static>(value: StorageResult<T>) -> BoxFuture<'static, StorageResult<T>> {
        Box::pin(async move { value })
    }
}

impl StorageAdapter for MemoryStorage {
    fn get_snapshot<'a>(&'a self, id: &'a str) -> BoxFuture<'a, StorageResult<Option<SnapshotRecord>>> {
        let record = self.read_doc(id, |doc| {
            doc.filter(|d| d.snapshot.is_some() || d.snapshot_generation > 0)
                .map(|d| SnapshotRecord {
                    snapshot: d.snapshot.clone(),
                    snapshot_generation: d.snapshot_generation,
                    synced_snapshot_generation: d.synced_snapshot_generation,
                })
        });
        Self::ready(Ok(record))
    }

    fn get_updates<'a>(&'a self, id: &'a str) -> BoxFuture<'a, StorageResult<Option<Vec<Vec<u8>>>>> {
        let updates = self.read_doc(id, |doc| doc.map(|d| d.updates.clone()));
        Self::ready(Ok(updates))
    }

    fn get_pending_sync<'a>(
        &'a self,
        id: &'a str,
    ) -> BoxFuture<'a, StorageResult<Option<Vec<Vec<u8>>>>> {
        let pending = self.read_doc(id, |doc| doc.map(|d| d.pending.clone()));
        Self::ready(Ok(pending))
    }

    fn get_sync_checkpoint<'a>(&'a self, id: &'a str) -> BoxFuture<'a, StorageResult<Option<String>>> {
        let checkpoint = self.read_doc(id, |doc| doc.and_then(|d| d.checkpoint.clone()));
        Self::ready(Ok(checkpoint))
    }

    fn append_update<'a>(&'a self, id: &'a str, update: &'a [u8]) -> BoxFuture<'a, StorageResult<()>> {
        self.with_doc(id, |doc| doc.updates.push(update.to_vec()));
        Self::ready(Ok(()))
    }

    fn set_snapshot<'a>(&'a self, id: &'a str, snapshot: &'a [u8]) -> BoxFuture<'a, StorageResult<()>> {
        self.with_doc(id, |doc| {
            doc.snapshot = Some(snapshot.to_vec());
            doc.snapshot_generation += 1;
        });
        Self::ready(Ok(()))
    }

    fn mark_pending_sync<'a>(
        &'a self,
        id: &'a str,
        updates: &'a [Vec<u8>],
    ) -> BoxFuture<'a, StorageResult<()>> {
        self.with_doc(id, |doc| doc.pending = updates.to_vec());
        Self::ready(Ok(()))
    }

    fn clear_pending_sync<'a>(&'a self, id: &'a str) -> BoxFuture<'a, StorageResult<()>> {
        self.with_doc(id, |doc| doc.pending.clear());
        Self::ready(Ok(()))
    }

    fn mark_snapshot_synced<'a>(
        &'a self,
        id: &'a str,
        generation: u64,
    ) -> BoxFuture<'a, StorageResult<()>> {
        self.with_doc(id, |doc| {
            let capped = generation.min(doc.snapshot_generation);
            doc.synced_snapshot_generation = doc.synced_snapshot_generation.max(capped);
        });
        Self::ready(Ok(()))
    }

    fn set_sync_checkpoint<'a>(
        &'a self,
        id: &'a str,
        value: &'a str,
    ) -> BoxFuture<'a, StorageResult<()>> {
        self.with_doc(id, |doc| doc.checkpoint = Some(value.to_string()));
        Self::ready(Ok(()))
    }

    fn remove<'a>(&'a self, id: &'a str) -> BoxFuture<'a, StorageResult<()>> {
        self.docs.write().unwrap().remove(id);
        Self::ready(Ok(()))
    }
}
