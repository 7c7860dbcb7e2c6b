//! Update origin tagging.
//!
//! Every update emitted by a document's CRDT is classified by the channel
//! that produced it. The runtime owns three private transaction-origin
//! tokens (storage, sync, realtime); anything else, including a
//! caller-supplied origin on `mutate`, counts as local authorship.

use std::sync::atomic::{AtomicU64, Ordering};

use yrs::Origin;

/// The channel an update was produced by.
///
/// Classification drives the dispatch table: storage updates are already
/// durable and are ignored; sync and realtime updates are persisted but
/// never propagated back to their originating channel; local updates are
/// persisted, marked pending, pushed, and published.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UpdateOrigin {
    /// Applied during hydration from the persistent log or snapshot.
    Storage,
    /// Applied from a sync pull or push acknowledgement.
    Sync,
    /// Applied from the live realtime subscription.
    Realtime,
    /// Authored on this replica.
    Local,
}

impl std::fmt::Display for UpdateOrigin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UpdateOrigin::Storage => write!(f, "storage"),
            UpdateOrigin::Sync => write!(f, "sync"),
            UpdateOrigin::Realtime => write!(f, "realtime"),
            UpdateOrigin::Local => write!(f, "local"),
        }
    }
}

static NEXT_NONCE: AtomicU64 = AtomicU64::new(1);

/// Private origin tokens for one document runtime.
///
/// The token bytes embed a per-instance nonce and a NUL prefix, so a
/// caller-supplied origin string cannot collide with them. Classification is
/// identity comparison against the three tokens, never content inspection.
pub(crate) struct OriginTokens {
    storage: Origin,
    sync: Origin,
    realtime: Origin,
    local: Origin,
}

impl OriginTokens {
    pub(crate) fn new() -> Self {
        let nonce = NEXT_NONCE.fetch_add(1, Ordering::Relaxed);
        let token = |kind: &str| Origin::from(format!("\u{0}docsync/{nonce}/{kind}").as_str());
        Self {
            storage: token("storage"),
            sync: token("sync"),
            realtime: token("realtime"),
            local: token("local"),
        }
    }

    /// The transaction origin to tag an internally applied update with.
    pub(crate) fn token_for(&self, origin: UpdateOrigin) -> Origin {
        match origin {
            UpdateOrigin::Storage => self.storage.clone(),
            UpdateOrigin::Sync => self.sync.clone(),
            UpdateOrigin::Realtime => self.realtime.clone(),
            UpdateOrigin::Local => self.local.clone(),
        }
    }

    /// Classify a transaction origin. Unknown origins (including `None` and
    /// caller-supplied tags) are local authorship.
    pub(crate) fn classify(&self, origin: Option<&Origin>) -> UpdateOrigin {
        match origin {
            Some(o) if *o == self.storage => UpdateOrigin::Storage,
            Some(o) if *o == self.sync => UpdateOrigin::Sync,
            Some(o) if *o == self.realtime => UpdateOrigin::Realtime,
            _ => UpdateOrigin::Local,
        }
    }
}

impl std::fmt::Debug for OriginTokens {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OriginTokens").finish_non_exhaustive()
    }
}
