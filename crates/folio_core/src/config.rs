//! Configuration for Folio.
//!
//! Persisted as TOML, typically at `~/.config/folio/config.toml`:
//!
//! ```toml
//! server_url = "https://api.folio.example"
//! auth_token = "…"
//!
//! [sync]
//! debounce_ms = 500
//! max_wait_ms = 3000
//! chunk_size = 100
//! autosave_ms = 600000
//!
//! [collab]
//! websocket_url = "wss://collab.folio.example/ws"
//! ```
//!
//! Every field has a default, so a partial file (or none at all) is valid.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{FolioError, Result};
use crate::sync::DebounceConfig;

/// User-configurable settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Base URL of the block API (e.g. "https://api.folio.example")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_url: Option<String>,

    /// Bearer token for the block API and the realtime server
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,

    /// Location of the local SQLite store. Falls back to the platform data
    /// directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub store_path: Option<PathBuf>,

    #[serde(default)]
    pub sync: SyncConfig,

    #[serde(default)]
    pub collab: CollabConfig,
}

/// Delta sync timings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Quiet period after the last edit before saving
    pub debounce_ms: u64,
    /// Longest a continuous stream of edits can hold off a save
    pub max_wait_ms: u64,
    /// Deltas per request for shared documents
    pub chunk_size: usize,
    /// Quiet period (and ceiling) before an autosave snapshot
    pub autosave_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 500,
            max_wait_ms: 3000,
            chunk_size: 100,
            autosave_ms: 600_000,
        }
    }
}

/// Realtime channel settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollabConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub websocket_url: Option<String>,
    pub send_interval_ms: u64,
    pub max_wait_ms: u64,
}

impl Default for CollabConfig {
    fn default() -> Self {
        Self {
            websocket_url: None,
            send_interval_ms: 1000,
            max_wait_ms: 3000,
        }
    }
}

impl CollabConfig {
    /// Outbound coalescing window for the realtime channel.
    pub fn debounce(&self) -> DebounceConfig {
        DebounceConfig::from_millis(self.send_interval_ms, self.max_wait_ms)
    }
}

impl Config {
    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| FolioError::FileRead {
            path: path.to_path_buf(),
            source: e,
        })?;
        Ok(toml::from_str(&contents)?)
    }

    /// Load config from a specific path, or defaults if the file is missing.
    pub fn load_from_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load_from(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Save config to a specific path, creating parent directories.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)?;
        std::fs::write(path, contents).map_err(|e| FolioError::FileWrite {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// The server URL, or an error telling the user to configure one.
    pub fn require_server_url(&self) -> Result<&str> {
        self.server_url
            .as_deref()
            .filter(|url| !url.trim().is_empty())
            .ok_or(FolioError::ServerNotConfigured)
    }
}

// ============================================================================
// Native-only implementation (not available in WASM)
// ============================================================================

#[cfg(not(target_arch = "wasm32"))]
impl Config {
    /// Get the config file path (~/.config/folio/config.toml)
    pub fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("folio").join("config.toml"))
    }

    /// Load config from the default location, or defaults if it doesn't exist
    pub fn load() -> Result<Self> {
        match Self::config_path() {
            Some(path) => Self::load_from_or_default(&path),
            None => Ok(Self::default()),
        }
    }

    /// Save config to the default location
    pub fn save(&self) -> Result<()> {
        let path = Self::config_path().ok_or(FolioError::NoConfigDir)?;
        self.save_to(&path)
    }

    /// Where the local store lives: `store_path` if set, otherwise
    /// `<data dir>/folio/folio.db`.
    pub fn resolved_store_path(&self) -> Result<PathBuf> {
        if let Some(path) = &self.store_path {
            return Ok(path.clone());
        }
        dirs::data_dir()
            .map(|dir| dir.join("folio").join("folio.db"))
            .ok_or(FolioError::NoConfigDir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.sync.debounce_ms, 500);
        assert_eq!(config.sync.max_wait_ms, 3000);
        assert_eq!(config.sync.chunk_size, 100);
        assert_eq!(config.sync.autosave_ms, 600_000);
        assert_eq!(config.collab.send_interval_ms, 1000);
        assert_eq!(config.collab.debounce().max_wait, Duration::from_millis(3000));
        assert!(matches!(
            config.require_server_url(),
            Err(FolioError::ServerNotConfigured)
        ));
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let config: Config = toml::from_str(
            r#"
            server_url = "https://api.example.com"

            [sync]
            chunk_size = 10
            "#,
        )
        .unwrap();

        assert_eq!(config.require_server_url().unwrap(), "https://api.example.com");
        assert_eq!(config.sync.chunk_size, 10);
        assert_eq!(config.sync.debounce_ms, 500);
        assert_eq!(config.collab, CollabConfig::default());
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let config = Config {
            server_url: Some("https://api.example.com".into()),
            auth_token: Some("secret".into()),
            store_path: Some(dir.path().join("folio.db")),
            ..Default::default()
        };
        config.save_to(&path).unwrap();

        assert_eq!(Config::load_from(&path).unwrap(), config);
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.toml");

        assert!(matches!(
            Config::load_from(&path),
            Err(FolioError::FileRead { .. })
        ));
        assert_eq!(Config::load_from_or_default(&path).unwrap(), Config::default());
    }

    #[test]
    fn test_invalid_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "server_url = [").unwrap();

        assert!(matches!(
            Config::load_from(&path),
            Err(FolioError::ConfigParse(_))
        ));
    }

    #[test]
    fn test_explicit_store_path_wins() {
        let config = Config {
            store_path: Some(PathBuf::from("/tmp/folio-test.db")),
            ..Default::default()
        };
        assert_eq!(
            config.resolved_store_path().unwrap(),
            PathBuf::from("/tmp/folio-test.db")
        );
    }
}
