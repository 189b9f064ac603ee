use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;

/// Unified error type for folio operations
#[derive(Debug, Error)]
pub enum FolioError {
    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to read file '{path}': {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to write file '{path}': {source}")]
    FileWrite {
        path: PathBuf,
        source: std::io::Error,
    },

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Base64 decode error: {0}")]
    Base64(#[from] base64::DecodeError),

    // Config errors
    #[error("Config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Config serialize error: {0}")]
    ConfigSerialize(#[from] toml::ser::Error),

    #[error("Could not determine config directory")]
    NoConfigDir,

    #[error("Server URL is not configured. Run 'folio config init --server <url>' first.")]
    ServerNotConfigured,

    // Storage errors
    #[cfg(all(not(target_arch = "wasm32"), feature = "sqlite"))]
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// The local cache for a document could not be decoded. Callers recover by
    /// treating the cache as empty.
    #[error("Malformed local cache for document '{document_id}': {reason}")]
    MalformedLocalCache { document_id: String, reason: String },

    // Block errors
    #[error("Invalid delta for block '{id}': {reason}")]
    InvalidDelta { id: String, reason: String },

    // Sync errors
    /// Network failure talking to the remote store. Retried on the next edit,
    /// focus, or reconnect.
    #[error("Network error: {0}")]
    Network(String),

    #[error("Server rejected request with status {status}: {message}")]
    Server { status: u16, message: String },

    #[error("Sync state '{from}' does not accept '{event}'")]
    InvalidTransition { from: String, event: String },

    // Realtime errors
    #[error("CRDT error: {0}")]
    Crdt(String),

    #[error("Transport error: {0}")]
    Transport(String),
}

/// Result type alias for folio operations
pub type Result<T> = std::result::Result<T, FolioError>;

impl FolioError {
    /// Whether this error is a transient network condition that a later retry
    /// may resolve. Transient failures leave the edit in the offline backup.
    pub fn is_transient(&self) -> bool {
        match self {
            FolioError::Network(_) | FolioError::Transport(_) => true,
            FolioError::Server { status, .. } => *status >= 500 || *status == 408 || *status == 429,
            _ => false,
        }
    }
}

/// A serializable representation of FolioError for IPC and CLI output
#[derive(Debug, Clone, Serialize)]
pub struct SerializableError {
    /// Error kind/variant name
    pub kind: String,
    /// Human-readable error message
    pub message: String,
    /// Associated path (if applicable)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

impl From<&FolioError> for SerializableError {
    fn from(err: &FolioError) -> Self {
        let kind = match err {
            FolioError::Io(_) => "Io",
            FolioError::FileRead { .. } => "FileRead",
            FolioError::FileWrite { .. } => "FileWrite",
            FolioError::Json(_) => "Json",
            FolioError::Base64(_) => "Base64",
            FolioError::ConfigParse(_) => "ConfigParse",
            FolioError::ConfigSerialize(_) => "ConfigSerialize",
            FolioError::NoConfigDir => "NoConfigDir",
            FolioError::ServerNotConfigured => "ServerNotConfigured",
            #[cfg(all(not(target_arch = "wasm32"), feature = "sqlite"))]
            FolioError::Sqlite(_) => "Sqlite",
            FolioError::MalformedLocalCache { .. } => "MalformedLocalCache",
            FolioError::InvalidDelta { .. } => "InvalidDelta",
            FolioError::Network(_) => "Network",
            FolioError::Server { .. } => "Server",
            FolioError::InvalidTransition { .. } => "InvalidTransition",
            FolioError::Crdt(_) => "Crdt",
            FolioError::Transport(_) => "Transport",
        }
        .to_string();

        let path = match err {
            FolioError::FileRead { path, .. } => Some(path.clone()),
            FolioError::FileWrite { path, .. } => Some(path.clone()),
            _ => None,
        };

        Self {
            kind,
            message: err.to_string(),
            path,
        }
    }
}

impl From<FolioError> for SerializableError {
    fn from(err: FolioError) -> Self {
        SerializableError::from(&err)
    }
}

impl FolioError {
    /// Convert to a serializable representation for IPC
    pub fn to_serializable(&self) -> SerializableError {
        SerializableError::from(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(FolioError::Network("connection reset".into()).is_transient());
        assert!(
            FolioError::Server {
                status: 503,
                message: "unavailable".into()
            }
            .is_transient()
        );
        assert!(
            !FolioError::Server {
                status: 400,
                message: "bad delta".into()
            }
            .is_transient()
        );
        assert!(!FolioError::NoConfigDir.is_transient());
    }

    #[test]
    fn test_serializable_error_kind() {
        let err = FolioError::MalformedLocalCache {
            document_id: "doc-1".into(),
            reason: "bad base64".into(),
        };
        let ser = err.to_serializable();
        assert_eq!(ser.kind, "MalformedLocalCache");
        assert!(ser.message.contains("doc-1"));
        assert!(ser.path.is_none());
    }
}
