#![doc = include_str!("../README.md")]
#![warn(missing_docs)]

/// Blob codec hook applied to persisted and transported payloads
pub mod codec;

/// Sync and snapshot policies
pub mod config;

/// Error (common error types)
pub mod error;

/// Observable sync-phase events
pub mod events;

/// In-memory storage backend
pub mod memory_storage;

/// REST wire protocol bodies
pub mod protocol;

/// Realtime transport contract and the in-process hub
pub mod realtime;

/// Document registry and handles
pub mod registry;

/// Storage adapter contract
pub mod storage;

/// Sync adapter contract
pub mod sync;

/// SQLite storage backend
#[cfg(feature = "sqlite")]
pub mod sqlite_storage;

/// REST sync client
#[cfg(feature = "rest-client")]
pub mod rest;

mod doc;
mod document;
mod orchestrator;
mod origin;
mod persistence;
mod serializer;

pub use codec::{Codec, IdentityCodec};
pub use config::{SnapshotPolicy, SnapshotSyncPolicy, SyncPolicy, SyncRequest};
pub use doc::DataWriter;
pub use document::DataView;
pub use error::{DocsyncError, Result};
pub use events::{
    ErrorCallback, EventBus, SubscriptionId, SyncDirection, SyncEvent, SyncEventCallback,
    SyncPhase,
};
pub use memory_storage::MemoryStorage;
pub use origin::UpdateOrigin;
pub use realtime::{LocalRealtimeHub, RealtimeAdapter, RealtimeCallback, RealtimeSubscription};
pub use registry::{DocumentHandle, DocumentRegistry, RegistryOptions, SyncTask};
#[cfg(feature = "rest-client")]
pub use rest::RestSyncAdapter;
#[cfg(feature = "sqlite")]
pub use sqlite_storage::SqliteStorage;
pub use storage::{BoxFuture, SnapshotRecord, StorageAdapter, StorageResult};
pub use sync::{PullRequest, PullResponse, PushRequest, PushResponse, SyncAdapter};
