//! Sync orchestration.
//!
//! Implements the pull/push sequences against the sync adapter: the initial
//! pull on open, the outgoing sequence for each locally authored update
//! (pull-before-push, snapshot handshake, incremental push, pop the pending
//! head), and manual sync. All entry points here run on the document's
//! serializer, so per-document operations never interleave.

use std::sync::Arc;

use crate::config::{SyncPolicy, SyncRequest};
use crate::document::ManagedDocument;
use crate::error::{DocsyncError, Result};
use crate::events::{EventBus, SyncDirection, SyncEvent};
use crate::origin::UpdateOrigin;
use crate::persistence::{PersistenceCoordinator, SnapshotOptions};
use crate::sync::{PullRequest, PushRequest, SyncAdapter};

pub(crate) struct SyncOrchestrator {
    adapter: Arc<dyn SyncAdapter>,
    policy: SyncPolicy,
    persistence: Arc<PersistenceCoordinator>,
    events: Arc<EventBus>,
}

impl SyncOrchestrator {
    pub(crate) fn new(
        adapter: Arc<dyn SyncAdapter>,
        policy: SyncPolicy,
        persistence: Arc<PersistenceCoordinator>,
        events: Arc<EventBus>,
    ) -> Self {
        Self {
            adapter,
            policy,
            persistence,
            events,
        }
    }

    /// The cold pull run during hydration.
    ///
    /// A brand-new document pulls without a state vector and (policy
    /// permitting) asks for a snapshot; anything else pulls with its
    /// current state vector. When the pull returned payload, the resulting
    /// state is snapshotted locally and marked synced, since the server
    /// already has everything in it.
    pub(crate) async fn initial_pull(&self, doc: &ManagedDocument) -> Result<()> {
        let brand_new = doc.with_state(|s| s.is_brand_new);
        let request_snapshot = brand_new && self.policy.snapshot_sync.request_on_new_document;
        let state_vector = if request_snapshot {
            None
        } else {
            Some(doc.state_vector())
        };

        let applied = self.pull_once(doc, state_vector, request_snapshot).await?;
        doc.with_state(|s| s.is_brand_new = false);

        if applied {
            self.persistence
                .store_snapshot(
                    doc,
                    SnapshotOptions {
                        mark_synced: true,
                        reset_counters: true,
                    },
                )
                .await?;
        }
        Ok(())
    }

    /// One pull round-trip: emit events, apply each returned payload with
    /// origin SYNC, persist what was genuinely new, record the checkpoint.
    /// Returns whether any payload arrived.
    async fn pull_once(
        &self,
        doc: &ManagedDocument,
        state_vector: Option<Vec<u8>>,
        request_snapshot: bool,
    ) -> Result<bool> {
        let last_synced = doc.with_state(|s| s.last_synced.clone());
        self.events.emit(
            &SyncEvent::started(doc.id(), SyncDirection::Pull)
                .with_request_snapshot(request_snapshot),
        );

        let request = PullRequest {
            doc_id: doc.id().to_string(),
            state_vector,
            request_snapshot,
            last_synced,
        };
        let response = match self.adapter.pull(request).await {
            Ok(response) => response,
            Err(err) => {
                self.events.emit(
                    &SyncEvent::failed(doc.id(), SyncDirection::Pull, &err)
                        .with_request_snapshot(request_snapshot),
                );
                return Err(err);
            }
        };

        let mut applied = false;
        let mut total_bytes = 0;
        for payload in &response.payloads {
            total_bytes += payload.len();
            match self.apply_pulled_payload(doc, payload).await {
                Ok(()) => applied = true,
                // A malformed payload is discarded; local state is untouched
                // and the rest of the batch still applies.
                Err(err) => match err {
                    DocsyncError::Decode(_) | DocsyncError::Crdt(_) => {
                        self.events.report_error(&err);
                    }
                    fatal => return Err(fatal),
                },
            }
        }

        self.persistence
            .record_checkpoint(doc, response.last_synced)
            .await?;
        self.events.emit(
            &SyncEvent::succeeded(doc.id(), SyncDirection::Pull)
                .with_request_snapshot(request_snapshot)
                .with_bytes(total_bytes),
        );
        Ok(applied)
    }

    async fn apply_pulled_payload(&self, doc: &ManagedDocument, payload: &[u8]) -> Result<()> {
        let raw = self.persistence.codec().decode(payload)?;
        let emitted = doc.apply_external(&raw, UpdateOrigin::Sync)?;
        for update in emitted {
            self.persistence.append(doc, &update.bytes, false).await?;
        }
        Ok(())
    }

    /// The snapshot-sync handshake.
    ///
    /// Guarantees the server has seen a snapshot before any incremental
    /// update: a document that never snapshotted gets one now, and a local
    /// generation ahead of the synced one is pushed with `is_snapshot`,
    /// unless policy suppresses re-sends (the first snapshot always goes).
    pub(crate) async fn sync_snapshot_if_needed(&self, doc: &ManagedDocument) -> Result<()> {
        if doc.with_state(|s| s.snapshot_generation) == 0 {
            self.persistence
                .store_snapshot(
                    doc,
                    SnapshotOptions {
                        mark_synced: false,
                        reset_counters: true,
                    },
                )
                .await?;
        }

        let (generation, synced) =
            doc.with_state(|s| (s.snapshot_generation, s.synced_snapshot_generation));
        if generation <= synced {
            return Ok(());
        }
        if !self.policy.snapshot_sync.send && synced != 0 {
            return Ok(());
        }

        let snapshot = self.persistence.codec().encode(&doc.full_state())?;
        self.push_blob(doc, snapshot, true).await?;
        self.persistence.mark_snapshot_synced(doc, generation).await?;
        Ok(())
    }

    /// Push the head of the pending queue, popping it on success. Returns
    /// whether there was a head to push.
    async fn push_pending_head(&self, doc: &ManagedDocument) -> Result<bool> {
        let head = doc.with_state(|s| s.pending_sync.front().cloned());
        let Some(update) = head else {
            return Ok(false);
        };

        self.push_blob(doc, update, false).await?;
        self.persistence.clear_pending_prefix(doc, 1).await?;
        Ok(true)
    }

    async fn push_blob(&self, doc: &ManagedDocument, update: Vec<u8>, is_snapshot: bool) -> Result<()> {
        let size = update.len();
        self.events.emit(
            &SyncEvent::started(doc.id(), SyncDirection::Push)
                .with_snapshot(is_snapshot)
                .with_bytes(size),
        );

        let request = PushRequest {
            doc_id: doc.id().to_string(),
            update,
            is_snapshot,
            last_synced: doc.with_state(|s| s.last_synced.clone()),
        };
        match self.adapter.push(request).await {
            Ok(response) => {
                self.persistence
                    .record_checkpoint(doc, response.last_synced)
                    .await?;
                self.events.emit(
                    &SyncEvent::succeeded(doc.id(), SyncDirection::Push)
                        .with_snapshot(is_snapshot)
                        .with_bytes(size),
                );
                Ok(())
            }
            Err(err) => {
                self.events.emit(
                    &SyncEvent::failed(doc.id(), SyncDirection::Push, &err)
                        .with_snapshot(is_snapshot),
                );
                Err(err)
            }
        }
    }

    /// The outgoing sequence run for each locally authored update: pull
    /// before push (policy), snapshot handshake, then push the pending
    /// head. A transport failure leaves the head queued for a later retry.
    pub(crate) async fn outgoing_sequence(&self, doc: &ManagedDocument) -> Result<()> {
        if self.policy.pull_before_push {
            self.pull_once(doc, Some(doc.state_vector()), false).await?;
        }
        self.sync_snapshot_if_needed(doc).await?;
        self.push_pending_head(doc).await?;
        Ok(())
    }

    /// Drain the whole pending backlog: handshake once, then FIFO pushes
    /// until the queue is empty.
    pub(crate) async fn drain_pending(&self, doc: &ManagedDocument) -> Result<()> {
        self.sync_snapshot_if_needed(doc).await?;
        while self.push_pending_head(doc).await? {}
        Ok(())
    }

    /// Manual sync, as requested through `sync_now`.
    pub(crate) async fn manual_sync(&self, doc: &ManagedDocument, request: SyncRequest) -> Result<()> {
        if request.pull {
            self.pull_once(doc, Some(doc.state_vector()), false).await?;
        }
        if request.force_snapshot {
            self.persistence
                .store_snapshot(
                    doc,
                    SnapshotOptions {
                        mark_synced: false,
                        reset_counters: true,
                    },
                )
                .await?;
        }
        if request.push {
            self.drain_pending(doc).await?;
        }
        Ok(())
    }
}
