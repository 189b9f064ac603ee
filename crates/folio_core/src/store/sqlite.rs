//! SQLite-backed local store.
//!
//! Persists delta backups, last-synced ids and CRDT replicas in a single
//! database file so pending edits survive a process restart.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use rusqlite::{Connection, OptionalExtension, params};

use super::{LocalStore, StorageResult};
use crate::block::LastSyncedIds;
use crate::error::FolioError;

/// SQLite-backed local store.
///
/// The connection is wrapped in a `Mutex`; SQLite itself runs in serialized
/// threading mode.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create a database at the given path.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or if schema
    /// initialization fails.
    pub fn open<P: AsRef<Path>>(path: P) -> StorageResult<Self> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Create an in-memory database for testing.
    pub fn in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn init_schema(&self) -> StorageResult<()> {
        self.conn().execute_batch(
            r#"
            -- One pending delta batch per document (base64 JSON)
            CREATE TABLE IF NOT EXISTS delta_backups (
                document_id TEXT PRIMARY KEY,
                payload TEXT NOT NULL,
                saved_at INTEGER NOT NULL
            );

            -- Ids acknowledged on the last successful round trip (JSON array)
            CREATE TABLE IF NOT EXISTS synced_ids (
                document_id TEXT PRIMARY KEY,
                ids TEXT NOT NULL
            );

            -- Encoded collaborative doc state
            CREATE TABLE IF NOT EXISTS replicas (
                document_id TEXT PRIMARY KEY,
                state BLOB NOT NULL,
                updated_at INTEGER NOT NULL
            );
            "#,
        )?;
        Ok(())
    }
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

impl LocalStore for SqliteStore {
    fn load_backup(&self, document_id: &str) -> StorageResult<Option<String>> {
        let payload = self
            .conn()
            .query_row(
                "SELECT payload FROM delta_backups WHERE document_id = ?",
                params![document_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(payload)
    }

    fn save_backup(&self, document_id: &str, encoded: &str) -> StorageResult<()> {
        self.conn().execute(
            "INSERT OR REPLACE INTO delta_backups (document_id, payload, saved_at) VALUES (?, ?, ?)",
            params![document_id, encoded, now_millis()],
        )?;
        Ok(())
    }

    fn delete_backup(&self, document_id: &str) -> StorageResult<()> {
        self.conn().execute(
            "DELETE FROM delta_backups WHERE document_id = ?",
            params![document_id],
        )?;
        Ok(())
    }

    fn list_backups(&self) -> StorageResult<Vec<String>> {
        let conn = self.conn();
        let mut stmt =
            conn.prepare("SELECT document_id FROM delta_backups ORDER BY document_id ASC")?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(ids)
    }

    fn load_synced_ids(&self, document_id: &str) -> StorageResult<LastSyncedIds> {
        let raw: Option<String> = self
            .conn()
            .query_row(
                "SELECT ids FROM synced_ids WHERE document_id = ?",
                params![document_id],
                |row| row.get(0),
            )
            .optional()?;

        match raw {
            Some(json) => serde_json::from_str(&json).map_err(|e| FolioError::MalformedLocalCache {
                document_id: document_id.to_string(),
                reason: format!("synced ids: {e}"),
            }),
            None => Ok(LastSyncedIds::new()),
        }
    }

    fn save_synced_ids(&self, document_id: &str, ids: &LastSyncedIds) -> StorageResult<()> {
        let json = serde_json::to_string(&ids.sorted())?;
        self.conn().execute(
            "INSERT OR REPLACE INTO synced_ids (document_id, ids) VALUES (?, ?)",
            params![document_id, json],
        )?;
        Ok(())
    }

    fn load_replica(&self, document_id: &str) -> StorageResult<Option<Vec<u8>>> {
        let state = self
            .conn()
            .query_row(
                "SELECT state FROM replicas WHERE document_id = ?",
                params![document_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(state)
    }

    fn save_replica(&self, document_id: &str, state: &[u8]) -> StorageResult<()> {
        self.conn().execute(
            "INSERT OR REPLACE INTO replicas (document_id, state, updated_at) VALUES (?, ?, ?)",
            params![document_id, state, now_millis()],
        )?;
        Ok(())
    }

    fn forget(&self, document_id: &str) -> StorageResult<()> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        for table in ["delta_backups", "synced_ids", "replicas"] {
            tx.execute(
                &format!("DELETE FROM {table} WHERE document_id = ?"),
                params![document_id],
            )?;
        }
        tx.commit()?;
        Ok(())
    }
}
