#![doc = include_str!("../README.md")]

/// Block data model, differ, delta application and merge engine
pub mod block;

/// Realtime collaboration (CRDT document, wire protocol, transports)
pub mod collab;

/// Configuration options
pub mod config;

/// Error (common error types)
pub mod error;

/// Durable local state (delta backups, synced ids, CRDT replicas)
pub mod store;

/// Delta sync coordinator and its collaborators
pub mod sync;

pub use block::{
    Block, BlockType, DeltaAction, DeltaBlock, LastSyncedIds, apply_deltas, diff_blocks,
    merge_blocks, should_merge,
};
pub use collab::{CollabDoc, RealtimeCollabChannel};
pub use config::Config;
pub use error::{FolioError, Result};
pub use store::{LocalStore, MemoryStore, OfflineBackupStore};
pub use sync::{DocumentContext, ShareType, SyncCoordinator, SyncState};
