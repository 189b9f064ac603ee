use std::sync::Arc;

use base64::{Engine as _, engine::general_purpose::STANDARD};

use super::{LocalStore, StorageResult};
use crate::block::DeltaBlock;
use crate::error::FolioError;

/// Single-slot durable queue for a document's unacknowledged delta batch.
///
/// Batches are always computed against the last acknowledged baseline, so a
/// newer batch supersedes the previous one instead of appending to it.
#[derive(Clone)]
pub struct OfflineBackupStore {
    store: Arc<dyn LocalStore>,
}

impl OfflineBackupStore {
    pub fn new(store: Arc<dyn LocalStore>) -> Self {
        Self { store }
    }

    /// Replace the pending batch for `document_id`. An empty batch clears it.
    pub fn save(&self, document_id: &str, deltas: &[DeltaBlock]) -> StorageResult<()> {
        if deltas.is_empty() {
            return self.delete(document_id);
        }
        let json = serde_json::to_vec(deltas)?;
        self.store.save_backup(document_id, &STANDARD.encode(json))?;
        log::debug!(
            "[Store] Saved backup of {} deltas for {}",
            deltas.len(),
            document_id
        );
        Ok(())
    }

    /// The pending batch, if any.
    ///
    /// An undecodable batch is logged, cleared and reported as absent.
    pub fn find(&self, document_id: &str) -> StorageResult<Option<Vec<DeltaBlock>>> {
        let Some(encoded) = self.store.load_backup(document_id)? else {
            return Ok(None);
        };

        match decode(document_id, &encoded) {
            Ok(deltas) => Ok(Some(deltas)),
            Err(e) => {
                log::warn!("[Store] Discarding unreadable backup: {}", e);
                self.store.delete_backup(document_id)?;
                Ok(None)
            }
        }
    }

    pub fn delete(&self, document_id: &str) -> StorageResult<()> {
        self.store.delete_backup(document_id)
    }

    pub fn has_pending(&self, document_id: &str) -> StorageResult<bool> {
        Ok(self.store.load_backup(document_id)?.is_some())
    }

    /// Ids of all documents with a pending batch.
    pub fn list(&self) -> StorageResult<Vec<String>> {
        self.store.list_backups()
    }

    /// The underlying store.
    pub fn store(&self) -> &Arc<dyn LocalStore> {
        &self.store
    }
}

fn decode(document_id: &str, encoded: &str) -> Result<Vec<DeltaBlock>, FolioError> {
    let malformed = |reason: String| FolioError::MalformedLocalCache {
        document_id: document_id.to_string(),
        reason,
    };
    let bytes = STANDARD
        .decode(encoded.trim())
        .map_err(|e| malformed(format!("backup is not base64: {e}")))?;
    serde_json::from_slice(&bytes).map_err(|e| malformed(format!("backup is not a delta list: {e}")))
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::block::{DeltaAction, DeltaBlock};
    use crate::store::MemoryStore;

    fn batch(ids: &[&str]) -> Vec<DeltaBlock> {
        ids.iter()
            .map(|id| DeltaBlock::bare(*id, DeltaAction::Delete, Utc::now()))
            .collect()
    }

    #[test]
    fn test_newer_batch_supersedes() {
        let backups = OfflineBackupStore::new(Arc::new(MemoryStore::new()));
        let d1 = batch(&["a", "b"]);
        let d2 = batch(&["c"]);

        backups.save("doc", &d1).unwrap();
        backups.save("doc", &d2).unwrap();

        assert_eq!(backups.find("doc").unwrap(), Some(d2));
    }

    #[test]
    fn test_delete_clears_slot() {
        let backups = OfflineBackupStore::new(Arc::new(MemoryStore::new()));
        backups.save("doc", &batch(&["a"])).unwrap();
        backups.delete("doc").unwrap();
        assert_eq!(backups.find("doc").unwrap(), None);
        assert!(!backups.has_pending("doc").unwrap());
    }

    #[test]
    fn test_empty_batch_clears_slot() {
        let backups = OfflineBackupStore::new(Arc::new(MemoryStore::new()));
        backups.save("doc", &batch(&["a"])).unwrap();
        backups.save("doc", &[]).unwrap();
        assert!(backups.list().unwrap().is_empty());
    }

    #[test]
    fn test_encoding_is_base64_json() {
        let store = MemoryStore::new();
        let backups = OfflineBackupStore::new(Arc::new(store.clone()));
        backups.save("doc", &batch(&["a"])).unwrap();

        let raw = store.load_backup("doc").unwrap().unwrap();
        let json: serde_json::Value =
            serde_json::from_slice(&STANDARD.decode(raw).unwrap()).unwrap();
        assert_eq!(json[0]["id"], "a");
        assert_eq!(json[0]["action"], "delete");
    }

    #[test]
    fn test_malformed_backup_is_discarded() {
        let store = MemoryStore::new();
        store.save_backup("doc", "%%% not base64 %%%").unwrap();
        let backups = OfflineBackupStore::new(Arc::new(store.clone()));

        assert_eq!(backups.find("doc").unwrap(), None);
        assert!(store.load_backup("doc").unwrap().is_none());
    }
}
