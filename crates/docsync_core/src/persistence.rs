//! Persistence coordination.
//!
//! Wraps the storage adapter with the runtime's bookkeeping: every appended
//! update goes through the codec exactly once, counters drive the snapshot
//! cadence, the pending-sync list is mirrored in memory and in storage, and
//! missing optional storage methods degrade to in-memory behavior with a
//! single warning per method.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use crate::codec::Codec;
use crate::config::SnapshotPolicy;
use crate::document::ManagedDocument;
use crate::error::{DocsyncError, Result};
use crate::storage::StorageAdapter;

/// Options for storing a snapshot.
#[derive(Debug, Clone, Copy)]
pub(crate) struct SnapshotOptions {
    /// Also advance `synced_snapshot_generation` and tell storage.
    pub mark_synced: bool,
    /// Reset the cadence counters.
    pub reset_counters: bool,
}

pub(crate) struct PersistenceCoordinator {
    storage: Arc<dyn StorageAdapter>,
    codec: Arc<dyn Codec>,
    snapshot_every: SnapshotPolicy,
    warned: Mutex<HashSet<&'static str>>,
}

impl PersistenceCoordinator {
    pub(crate) fn new(
        storage: Arc<dyn StorageAdapter>,
        codec: Arc<dyn Codec>,
        snapshot_every: SnapshotPolicy,
    ) -> Self {
        Self {
            storage,
            codec,
            snapshot_every,
            warned: Mutex::new(HashSet::new()),
        }
    }

    pub(crate) fn storage(&self) -> &Arc<dyn StorageAdapter> {
        &self.storage
    }

    pub(crate) fn codec(&self) -> &Arc<dyn Codec> {
        &self.codec
    }

    /// Collapse an optional-method result. `Ok(true)` means the backend ran
    /// it, `Ok(false)` means the backend lacks it (warned once); real
    /// failures propagate.
    fn optional(&self, result: Result<()>) -> Result<bool> {
        match result {
            Ok(()) => Ok(true),
            Err(DocsyncError::Unsupported(method)) => {
                let mut warned = self.warned.lock().unwrap();
                if warned.insert(method) {
                    log::warn!(
                        "storage adapter does not implement `{method}`; \
                         continuing with in-memory state for that feature"
                    );
                }
                Ok(false)
            }
            Err(err) => Err(err),
        }
    }

    /// Same collapse for optional getters: missing method reads as absent.
    pub(crate) fn optional_read<T>(&self, result: Result<Option<T>>) -> Result<Option<T>> {
        match result {
            Err(DocsyncError::Unsupported(_)) => Ok(None),
            other => other,
        }
    }

    /// Append one raw CRDT update to the log. Encodes through the codec,
    /// optionally marks it pending, bumps the cadence counters, and cuts a
    /// snapshot when the cadence says so. Returns the encoded blob.
    pub(crate) async fn append(
        &self,
        doc: &ManagedDocument,
        update: &[u8],
        mark_pending: bool,
    ) -> Result<Vec<u8>> {
        let encoded = self.codec.encode(update)?;

        self.storage.append_update(doc.id(), &encoded).await?;

        if mark_pending {
            let next: Vec<Vec<u8>> = doc.with_state(|s| {
                let mut list: Vec<Vec<u8>> = s.pending_sync.iter().cloned().collect();
                list.push(encoded.clone());
                list
            });
            let result = self.storage.mark_pending_sync(doc.id(), &next).await;
            self.optional(result)?;
            doc.with_state(|s| s.pending_sync.push_back(encoded.clone()));
        }

        doc.with_state(|s| {
            s.updates_since_snapshot += 1;
            s.bytes_since_snapshot += encoded.len() as u64;
        });

        self.maybe_snapshot(doc).await?;
        Ok(encoded)
    }

    /// Cut a snapshot if either cadence threshold is met.
    pub(crate) async fn maybe_snapshot(&self, doc: &ManagedDocument) -> Result<()> {
        let due = doc.with_state(|s| {
            self.snapshot_every
                .is_due(s.updates_since_snapshot, s.bytes_since_snapshot)
        });
        if !due {
            return Ok(());
        }
        self.store_snapshot(
            doc,
            SnapshotOptions {
                mark_synced: false,
                reset_counters: true,
            },
        )
        .await
    }

    /// Compute and store a full-state snapshot, bumping the generation.
    ///
    /// The in-memory generation advances even when the backend lacks
    /// `set_snapshot`, so the snapshot-sync handshake keeps working against
    /// snapshot-less backends.
    pub(crate) async fn store_snapshot(
        &self,
        doc: &ManagedDocument,
        options: SnapshotOptions,
    ) -> Result<()> {
        let encoded = self.codec.encode(&doc.full_state())?;

        let result = self.storage.set_snapshot(doc.id(), &encoded).await;
        self.optional(result)?;

        let (generation, synced) = doc.with_state(|s| {
            s.snapshot_generation += 1;
            if options.reset_counters {
                s.updates_since_snapshot = 0;
                s.bytes_since_snapshot = 0;
            }
            if options.mark_synced {
                s.synced_snapshot_generation = s.snapshot_generation;
            }
            (s.snapshot_generation, s.synced_snapshot_generation)
        });

        if options.mark_synced {
            let result = self.storage.mark_snapshot_synced(doc.id(), synced).await;
            self.optional(result)?;
        }

        log::debug!(
            "stored snapshot generation {generation} for '{}' ({} bytes)",
            doc.id(),
            encoded.len()
        );
        Ok(())
    }

    /// Record a successful snapshot push: advance the synced generation to
    /// `generation` (capped at the current one) in memory and in storage.
    pub(crate) async fn mark_snapshot_synced(
        &self,
        doc: &ManagedDocument,
        generation: u64,
    ) -> Result<()> {
        let synced = doc.with_state(|s| {
            let capped = generation.min(s.snapshot_generation);
            s.synced_snapshot_generation = s.synced_snapshot_generation.max(capped);
            s.synced_snapshot_generation
        });
        let result = self.storage.mark_snapshot_synced(doc.id(), synced).await;
        self.optional(result)?;
        Ok(())
    }

    /// Drop the first `n` pending entries and persist the remainder.
    pub(crate) async fn clear_pending_prefix(&self, doc: &ManagedDocument, n: usize) -> Result<()> {
        let remaining: Vec<Vec<u8>> =
            doc.with_state(|s| s.pending_sync.iter().skip(n).cloned().collect());

        let result = if remaining.is_empty() {
            self.storage.clear_pending_sync(doc.id()).await
        } else {
            self.storage.mark_pending_sync(doc.id(), &remaining).await
        };
        self.optional(result)?;

        doc.with_state(|s| {
            for _ in 0..n.min(s.pending_sync.len()) {
                s.pending_sync.pop_front();
            }
        });
        Ok(())
    }

    /// Persist the checkpoint a sync response returned. `None` leaves the
    /// current checkpoint untouched.
    pub(crate) async fn record_checkpoint(
        &self,
        doc: &ManagedDocument,
        checkpoint: Option<String>,
    ) -> Result<()> {
        let Some(checkpoint) = checkpoint else {
            return Ok(());
        };
        doc.with_state(|s| s.last_synced = Some(checkpoint.clone()));
        let result = self.storage.set_sync_checkpoint(doc.id(), &checkpoint).await;
        self.optional(result)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::IdentityCodec;
    use crate::memory_storage::MemoryStorage;
    use crate::storage::{BoxFuture, StorageResult};

    fn coordinator(
        storage: Arc<dyn StorageAdapter>,
        snapshot_every: SnapshotPolicy,
    ) -> PersistenceCoordinator {
        PersistenceCoordinator::new(storage, Arc::new(IdentityCodec), snapshot_every)
    }

    #[tokio::test]
    async fn test_append_marks_pending_and_counts() {
        let storage = Arc::new(MemoryStorage::new());
        let persistence = coordinator(storage.clone(), SnapshotPolicy::disabled());
        let doc = ManagedDocument::new("d1");

        persistence.append(&doc, b"u1", true).await.unwrap();
        persistence.append(&doc, b"u2", false).await.unwrap();

        assert_eq!(storage.get_updates("d1").await.unwrap().unwrap().len(), 2);
        assert_eq!(
            storage.get_pending_sync("d1").await.unwrap().unwrap(),
            vec![b"u1".to_vec()]
        );
        doc.with_state(|s| {
            assert_eq!(s.pending_sync.len(), 1);
            assert_eq!(s.updates_since_snapshot, 2);
            assert_eq!(s.bytes_since_snapshot, 4);
        });
    }

    #[tokio::test]
    async fn test_snapshot_cadence_by_updates() {
        let storage = Arc::new(MemoryStorage::new());
        let persistence = coordinator(
            storage.clone(),
            SnapshotPolicy {
                updates: Some(2),
                bytes: None,
            },
        );
        let doc = ManagedDocument::new("d1");
        doc.commit_local(None, |data| data.set_i64("count", 1));

        persistence.append(&doc, b"u1", false).await.unwrap();
        doc.with_state(|s| assert_eq!(s.snapshot_generation, 0));

        persistence.append(&doc, b"u2", false).await.unwrap();
        doc.with_state(|s| {
            assert_eq!(s.snapshot_generation, 1);
            assert_eq!(s.updates_since_snapshot, 0);
            assert_eq!(s.bytes_since_snapshot, 0);
        });

        let record = storage.get_snapshot("d1").await.unwrap().unwrap();
        assert_eq!(record.snapshot_generation, 1);
        assert!(record.snapshot.is_some());

        // The log is never truncated by a snapshot.
        assert_eq!(storage.get_updates("d1").await.unwrap().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_clear_pending_prefix() {
        let storage = Arc::new(MemoryStorage::new());
        let persistence = coordinator(storage.clone(), SnapshotPolicy::disabled());
        let doc = ManagedDocument::new("d1");

        persistence.append(&doc, b"u1", true).await.unwrap();
        persistence.append(&doc, b"u2", true).await.unwrap();

        persistence.clear_pending_prefix(&doc, 1).await.unwrap();
        assert_eq!(
            storage.get_pending_sync("d1").await.unwrap().unwrap(),
            vec![b"u2".to_vec()]
        );

        persistence.clear_pending_prefix(&doc, 1).await.unwrap();
        assert!(storage.get_pending_sync("d1").await.unwrap().unwrap().is_empty());
        doc.with_state(|s| assert!(s.pending_sync.is_empty()));
    }

    #[tokio::test]
    async fn test_synced_generation_capped() {
        let storage = Arc::new(MemoryStorage::new());
        let persistence = coordinator(storage.clone(), SnapshotPolicy::disabled());
        let doc = ManagedDocument::new("d1");

        persistence
            .store_snapshot(
                &doc,
                SnapshotOptions {
                    mark_synced: false,
                    reset_counters: true,
                },
            )
            .await
            .unwrap();

        persistence.mark_snapshot_synced(&doc, 17).await.unwrap();
        doc.with_state(|s| {
            assert_eq!(s.snapshot_generation, 1);
            assert_eq!(s.synced_snapshot_generation, 1);
        });
    }

    /// A backend missing every optional method.
    struct LogOnlyStorage(MemoryStorage);

    impl StorageAdapter for LogOnlyStorage {
        fn get_updates<'a>(
            &'a self,
            id: &'a str,
        ) -> BoxFuture<'a, StorageResult<Option<Vec<Vec<u8>>>>> {
            self.0.get_updates(id)
        }

        fn append_update<'a>(
            &'a self,
            id: &'a str,
            update: &'a [u8],
        ) -> BoxFuture<'a, StorageResult<()>> {
            self.0.append_update(id, update)
        }

        fn remove<'a>(&'a self, id: &'a str) -> BoxFuture<'a, StorageResult<()>> {
            self.0.remove(id)
        }
    }

    #[tokio::test]
    async fn test_missing_optional_methods_fall_back_in_memory() {
        let storage = Arc::new(LogOnlyStorage(MemoryStorage::new()));
        let persistence = coordinator(storage.clone(), SnapshotPolicy::disabled());
        let doc = ManagedDocument::new("d1");
        doc.commit_local(None, |data| data.set_i64("count", 1));

        // Pending list and snapshots degrade to in-memory bookkeeping.
        persistence.append(&doc, b"u1", true).await.unwrap();
        doc.with_state(|s| assert_eq!(s.pending_sync.len(), 1));

        persistence
            .store_snapshot(
                &doc,
                SnapshotOptions {
                    mark_synced: true,
                    reset_counters: true,
                },
            )
            .await
            .unwrap();
        doc.with_state(|s| {
            assert_eq!(s.snapshot_generation, 1);
            assert_eq!(s.synced_snapshot_generation, 1);
        });

        persistence.clear_pending_prefix(&doc, 1).await.unwrap();
        doc.with_state(|s| assert!(s.pending_sync.is_empty()));

        // The required log still works.
        assert_eq!(storage.get_updates("d1").await.unwrap().unwrap().len(), 1);
    }
}
