//! Durable per-document local state.
//!
//! This module defines the [`LocalStore`] trait which abstracts over the
//! device-local storage backends (SQLite for native, memory for tests).
//!
//! # Storage Model
//!
//! Each document id owns three independent slots:
//! 1. **Delta backup**: the single unacknowledged delta batch, encoded. Writing
//!    overwrites; see [`OfflineBackupStore`].
//! 2. **Last-synced ids**: the ids the server acknowledged on the last round
//!    trip.
//! 3. **CRDT replica**: the encoded state of the document's collaborative doc.
//!
//! These are the only pieces of sync state that survive a reload.

mod backup;
mod memory;
#[cfg(all(not(target_arch = "wasm32"), feature = "sqlite"))]
mod sqlite;

pub use backup::OfflineBackupStore;
pub use memory::MemoryStore;
#[cfg(all(not(target_arch = "wasm32"), feature = "sqlite"))]
pub use sqlite::SqliteStore;

use crate::block::LastSyncedIds;
use crate::error::FolioError;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, FolioError>;

/// Trait for device-local storage backends.
///
/// Values are opaque to the backend; encoding is done by the callers.
pub trait LocalStore: Send + Sync {
    /// Load the encoded pending delta batch for a document.
    fn load_backup(&self, document_id: &str) -> StorageResult<Option<String>>;

    /// Store the encoded pending delta batch, replacing any previous one.
    fn save_backup(&self, document_id: &str, encoded: &str) -> StorageResult<()>;

    /// Remove the pending delta batch. Removing a missing batch is not an error.
    fn delete_backup(&self, document_id: &str) -> StorageResult<()>;

    /// Ids of all documents with a pending delta batch, sorted.
    fn list_backups(&self) -> StorageResult<Vec<String>>;

    /// Load the last-synced marker set. Returns an empty set if never written.
    fn load_synced_ids(&self, document_id: &str) -> StorageResult<LastSyncedIds>;

    fn save_synced_ids(&self, document_id: &str, ids: &LastSyncedIds) -> StorageResult<()>;

    /// Load the encoded CRDT replica.
    ///
    /// Returns `None` if the document has no replica yet.
    fn load_replica(&self, document_id: &str) -> StorageResult<Option<Vec<u8>>>;

    /// Save the full encoded CRDT replica, overwriting the previous one.
    fn save_replica(&self, document_id: &str, state: &[u8]) -> StorageResult<()>;

    /// Drop every slot for a document.
    fn forget(&self, document_id: &str) -> StorageResult<()>;
}
