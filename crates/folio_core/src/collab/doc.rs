//! Collaborative block document.
//!
//! [`CollabDoc`] wraps a yrs [`Doc`] holding one Y.Map of block id to block
//! JSON:
//!
//! ```text
//! Y.Doc
//! └── Y.Map "blocks"
//!     ├── "6f1c…" → {"id":"6f1c…","order":0,"blockType":"describe",…}
//!     └── …
//! ```
//!
//! Concurrent edits to different blocks merge; concurrent edits to the same
//! block resolve last-writer-wins at the map entry.

use yrs::updates::decoder::Decode;
use yrs::updates::encoder::Encode;
use yrs::{Doc, Map, MapRef, Origin, ReadTxn, StateVector, Transact, Update};

use crate::block::Block;
use crate::error::{FolioError, Result};
use crate::store::LocalStore;
use crate::sync::EditorDocument;

/// Name of the Y.Map holding the blocks.
const BLOCKS_MAP_NAME: &str = "blocks";

/// Transaction origin for updates that came from elsewhere.
pub(crate) const REMOTE_ORIGIN: &str = "remote";

/// A CRDT document holding a chapter's blocks.
pub struct CollabDoc {
    doc: Doc,
    blocks_map: MapRef,
}

impl Default for CollabDoc {
    fn default() -> Self {
        Self::new()
    }
}

impl CollabDoc {
    /// Create an empty document.
    pub fn new() -> Self {
        let doc = Doc::new();
        let blocks_map = doc.get_or_insert_map(BLOCKS_MAP_NAME);
        Self { doc, blocks_map }
    }

    /// Build a document from an encoded state.
    pub fn from_state(state: &[u8]) -> Result<Self> {
        let this = Self::new();
        this.apply_update(state)?;
        Ok(this)
    }

    /// Load the replica saved for `document_id`.
    ///
    /// A missing replica yields an empty document. So does an undecodable one,
    /// after logging: the server copy then becomes authoritative.
    pub fn load(store: &dyn LocalStore, document_id: &str) -> Result<Self> {
        let Some(state) = store.load_replica(document_id)? else {
            return Ok(Self::new());
        };
        match Self::from_state(&state) {
            Ok(doc) => Ok(doc),
            Err(e) => {
                let err = FolioError::MalformedLocalCache {
                    document_id: document_id.to_string(),
                    reason: e.to_string(),
                };
                log::warn!("[Collab] {}; starting from an empty replica", err);
                Ok(Self::new())
            }
        }
    }

    /// Save the full state as the replica for `document_id`.
    pub fn save(&self, store: &dyn LocalStore, document_id: &str) -> Result<()> {
        store.save_replica(document_id, &self.encode_state_as_update())
    }

    /// Get the underlying yrs document.
    pub fn doc(&self) -> &Doc {
        &self.doc
    }

    // ==================== Block Operations ====================

    pub fn block(&self, id: &str) -> Option<Block> {
        let txn = self.doc.transact();
        self.blocks_map.get(&txn, id).and_then(|value| {
            let json = value.to_string(&txn);
            serde_json::from_str(&json).ok()
        })
    }

    /// All blocks, sorted by `order` (ties by id).
    ///
    /// Entries that fail to parse are skipped.
    pub fn blocks(&self) -> Vec<Block> {
        let txn = self.doc.transact();
        let mut blocks: Vec<Block> = self
            .blocks_map
            .iter(&txn)
            .filter_map(|(key, value)| {
                let json = value.to_string(&txn);
                match serde_json::from_str::<Block>(&json) {
                    Ok(block) => Some(block),
                    Err(e) => {
                        log::warn!("[Collab] Skipping unreadable block '{}': {}", key, e);
                        None
                    }
                }
            })
            .collect();
        blocks.sort_by(|a, b| a.order.total_cmp(&b.order).then_with(|| a.id.cmp(&b.id)));
        blocks
    }

    pub fn len(&self) -> usize {
        let txn = self.doc.transact();
        self.blocks_map.len(&txn) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Insert or overwrite one block.
    pub fn upsert_block(&self, block: &Block) -> Result<()> {
        let json = serde_json::to_string(block)?;
        let mut txn = self.doc.transact_mut();
        self.blocks_map.insert(&mut txn, block.id.as_str(), json);
        Ok(())
    }

    pub fn remove_block(&self, id: &str) {
        let mut txn = self.doc.transact_mut();
        self.blocks_map.remove(&mut txn, id);
    }

    /// Make the document hold exactly `blocks`, touching only entries that
    /// changed. Runs as one transaction, so observers see a single update.
    pub fn replace_blocks(&self, blocks: &[Block]) -> Result<()> {
        let encoded = blocks
            .iter()
            .map(|b| Ok((b.id.as_str(), serde_json::to_string(b)?)))
            .collect::<Result<Vec<_>>>()?;

        let mut txn = self.doc.transact_mut();

        let stale: Vec<String> = self
            .blocks_map
            .keys(&txn)
            .filter(|key| !encoded.iter().any(|(id, _)| id == key))
            .map(str::to_string)
            .collect();
        for key in stale {
            self.blocks_map.remove(&mut txn, &key);
        }

        for (id, json) in encoded {
            let unchanged = self
                .blocks_map
                .get(&txn, id)
                .is_some_and(|current| current.to_string(&txn) == json);
            if !unchanged {
                self.blocks_map.insert(&mut txn, id, json);
            }
        }
        Ok(())
    }

    // ==================== Sync Operations ====================

    /// Encode the current state vector for the diff handshake.
    pub fn encode_state_vector(&self) -> Vec<u8> {
        let txn = self.doc.transact();
        txn.state_vector().encode_v1()
    }

    /// Encode the full document state as an update.
    pub fn encode_state_as_update(&self) -> Vec<u8> {
        let txn = self.doc.transact();
        txn.encode_state_as_update_v1(&StateVector::default())
    }

    /// Encode only the updates a peer with `remote_state_vector` is missing.
    pub fn encode_diff(&self, remote_state_vector: &[u8]) -> Result<Vec<u8>> {
        let sv = StateVector::decode_v1(remote_state_vector)
            .map_err(|e| FolioError::Crdt(format!("Failed to decode state vector: {}", e)))?;
        let txn = self.doc.transact();
        Ok(txn.encode_state_as_update_v1(&sv))
    }

    /// Apply an update that came from a peer, the server, or storage.
    ///
    /// Applied under the remote origin, so [`observe_local_updates`]
    /// callbacks do not see it.
    ///
    /// [`observe_local_updates`]: Self::observe_local_updates
    pub fn apply_update(&self, update: &[u8]) -> Result<()> {
        let decoded = Update::decode_v1(update)
            .map_err(|e| FolioError::Crdt(format!("Failed to decode update: {}", e)))?;
        let mut txn = self.doc.transact_mut_with(REMOTE_ORIGIN);
        txn.apply_update(decoded)
            .map_err(|e| FolioError::Crdt(format!("Failed to apply update: {}", e)))?;
        Ok(())
    }

    /// Subscribe to updates produced by local mutations.
    ///
    /// The callback runs while the transaction commits and must not touch
    /// this document.
    pub fn observe_local_updates<F>(&self, callback: F) -> Result<yrs::Subscription>
    where
        F: Fn(&[u8]) + Send + Sync + 'static,
    {
        let remote = Origin::from(REMOTE_ORIGIN);
        self.doc
            .observe_update_v1(move |txn, event| {
                if txn.origin() != Some(&remote) {
                    callback(&event.update);
                }
            })
            .map_err(|e| FolioError::Crdt(format!("Failed to observe updates: {}", e)))
    }
}

impl EditorDocument for CollabDoc {
    fn to_blocks(&self) -> Vec<Block> {
        self.blocks()
    }
}
