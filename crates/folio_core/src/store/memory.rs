//! In-memory storage implementation for testing.
//!
//! This provides a simple in-memory implementation of [`LocalStore`]
//! for use in unit tests and development.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::{LocalStore, StorageResult};
use crate::block::LastSyncedIds;

/// In-memory local store.
///
/// Thread-safe via `RwLock`; data is lost when dropped. Clones share the same
/// underlying maps, which lets tests hand one handle to a coordinator and
/// inspect it through another.
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    inner: Arc<RwLock<Slots>>,
}

#[derive(Debug, Default)]
struct Slots {
    backups: HashMap<String, String>,
    synced_ids: HashMap<String, LastSyncedIds>,
    replicas: HashMap<String, Vec<u8>>,
}

impl MemoryStore {
    /// Create a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Slots> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Slots> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }
}

impl LocalStore for MemoryStore {
    fn load_backup(&self, document_id: &str) -> StorageResult<Option<String>> {
        Ok(self.read().backups.get(document_id).cloned())
    }

    fn save_backup(&self, document_id: &str, encoded: &str) -> StorageResult<()> {
        self.write()
            .backups
            .insert(document_id.to_string(), encoded.to_string());
        Ok(())
    }

    fn delete_backup(&self, document_id: &str) -> StorageResult<()> {
        self.write().backups.remove(document_id);
        Ok(())
    }

    fn list_backups(&self) -> StorageResult<Vec<String>> {
        let mut ids: Vec<String> = self.read().backups.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }

    fn load_synced_ids(&self, document_id: &str) -> StorageResult<LastSyncedIds> {
        Ok(self
            .read()
            .synced_ids
            .get(document_id)
            .cloned()
            .unwrap_or_default())
    }

    fn save_synced_ids(&self, document_id: &str, ids: &LastSyncedIds) -> StorageResult<()> {
        self.write()
            .synced_ids
            .insert(document_id.to_string(), ids.clone());
        Ok(())
    }

    fn load_replica(&self, document_id: &str) -> StorageResult<Option<Vec<u8>>> {
        Ok(self.read().replicas.get(document_id).cloned())
    }

    fn save_replica(&self, document_id: &str, state: &[u8]) -> StorageResult<()> {
        self.write()
            .replicas
            .insert(document_id.to_string(), state.to_vec());
        Ok(())
    }

    fn forget(&self, document_id: &str) -> StorageResult<()> {
        let mut slots = self.write();
        slots.backups.remove(document_id);
        slots.synced_ids.remove(document_id);
        slots.replicas.remove(document_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backup_slot_overwrites() {
        let store = MemoryStore::new();
        store.save_backup("doc", "first").unwrap();
        store.save_backup("doc", "second").unwrap();

        assert_eq!(store.load_backup("doc").unwrap().as_deref(), Some("second"));
        assert_eq!(store.list_backups().unwrap(), vec!["doc"]);
    }

    #[test]
    fn test_slots_are_independent() {
        let store = MemoryStore::new();
        store.save_backup("doc", "batch").unwrap();
        store.save_replica("doc", &[1, 2, 3]).unwrap();
        store
            .save_synced_ids("doc", &LastSyncedIds::from_iter(["a"]))
            .unwrap();

        store.delete_backup("doc").unwrap();

        assert!(store.load_backup("doc").unwrap().is_none());
        assert_eq!(store.load_replica("doc").unwrap(), Some(vec![1, 2, 3]));
        assert!(store.load_synced_ids("doc").unwrap().contains("a"));
    }

    #[test]
    fn test_clones_share_state() {
        let store = MemoryStore::new();
        let handle = store.clone();
        store.save_replica("doc", &[9]).unwrap();
        assert_eq!(handle.load_replica("doc").unwrap(), Some(vec![9]));
    }

    #[test]
    fn test_forget_clears_everything() {
        let store = MemoryStore::new();
        store.save_backup("doc", "batch").unwrap();
        store.save_replica("doc", &[1]).unwrap();
        store.forget("doc").unwrap();

        assert!(store.load_backup("doc").unwrap().is_none());
        assert!(store.load_replica("doc").unwrap().is_none());
        assert!(store.load_synced_ids("doc").unwrap().is_empty());
    }
}
