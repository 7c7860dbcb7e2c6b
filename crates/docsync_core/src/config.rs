//! Policy knobs for sync and snapshot behavior.

use serde::{Deserialize, Serialize};

/// Controls the outgoing sync sequence.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncPolicy {
    /// Run a state-vector pull before every outgoing push. Default `true`.
    pub pull_before_push: bool,

    /// Snapshot-related sync behavior.
    pub snapshot_sync: SnapshotSyncPolicy,
}

impl Default for SyncPolicy {
    fn default() -> Self {
        Self {
            pull_before_push: true,
            snapshot_sync: SnapshotSyncPolicy::default(),
        }
    }
}

/// Controls how snapshots participate in sync.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SnapshotSyncPolicy {
    /// Re-send the snapshot whenever the local generation advances past the
    /// synced one. When `false`, the first snapshot is still sent; only
    /// subsequent generation bumps are suppressed. Default `true`.
    pub send: bool,

    /// Let a brand-new document ask the server for a snapshot on its first
    /// pull. When `false`, new documents pull incrementally with their
    /// (empty) state vector. Default `true`.
    pub request_on_new_document: bool,
}

impl Default for SnapshotSyncPolicy {
    fn default() -> Self {
        Self {
            send: true,
            request_on_new_document: true,
        }
    }
}

/// Local snapshot cadence.
///
/// A snapshot is cut as soon as either configured threshold is reached.
/// Snapshots are bootstrap accelerators: the update log is never truncated.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct SnapshotPolicy {
    /// Snapshot after this many appended updates. `None` disables the
    /// update-count trigger.
    pub updates: Option<u64>,

    /// Snapshot after this many appended bytes. `None` disables the
    /// byte-count trigger.
    pub bytes: Option<u64>,
}

impl Default for SnapshotPolicy {
    fn default() -> Self {
        Self {
            updates: Some(100),
            bytes: Some(256 * 1024),
        }
    }
}

impl SnapshotPolicy {
    /// A policy that never snapshots on cadence. Explicit snapshots (the
    /// sync handshake, `force_snapshot`) still work.
    pub fn disabled() -> Self {
        Self {
            updates: None,
            bytes: None,
        }
    }

    pub(crate) fn is_due(&self, updates_since: u64, bytes_since: u64) -> bool {
        self.updates.is_some_and(|n| updates_since >= n)
            || self.bytes.is_some_and(|n| bytes_since >= n)
    }
}

/// Options for a manual sync, as accepted by `sync_now`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncRequest {
    /// Run a state-vector pull. Default `true`.
    pub pull: bool,

    /// Run the snapshot handshake and drain the whole pending-sync backlog.
    /// Default `true`.
    pub push: bool,

    /// Store a fresh local snapshot before pushing. Default `false`.
    pub force_snapshot: bool,
}

impl Default for SyncRequest {
    fn default() -> Self {
        Self {
            pull: true,
            push: true,
            force_snapshot: false,
        }
    }
}
