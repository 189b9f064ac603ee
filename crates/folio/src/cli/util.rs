//! Shared CLI utilities

use std::path::Path;

use serde::Serialize;
use serde::de::DeserializeOwned;

use folio_core::config::Config;
use folio_core::error::{FolioError, Result};
use folio_core::store::SqliteStore;

/// Read and parse a JSON file.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let contents = std::fs::read_to_string(path).map_err(|e| FolioError::FileRead {
        path: path.to_path_buf(),
        source: e,
    })?;
    Ok(serde_json::from_str(&contents)?)
}

/// Pretty-print a value as JSON on stdout.
pub fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Open the SQLite store the config points at, creating its directory.
pub fn open_store(config: &Config) -> Result<SqliteStore> {
    let path = config.resolved_store_path()?;
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }
    log::debug!("Opening store at {}", path.display());
    SqliteStore::open(&path)
}
