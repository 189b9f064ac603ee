//! Collaborators of the sync coordinator.
//!
//! The coordinator talks to the outside world through three seams:
//! [`BlockRemote`] (baseline fetch and delta push), [`SnapshotService`]
//! (protective copies before destructive merges) and [`Connectivity`]
//! (online/offline). Futures are boxed so the traits stay object-safe.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::block::{Block, DeltaBlock};
use crate::error::Result;

/// A boxed future for object-safe async methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Who can see a document, which decides where it is persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShareType {
    /// Lives only on this device. Never backed up, never chunked.
    Local,
    #[default]
    Private,
    Public,
}

impl ShareType {
    pub fn is_local(self) -> bool {
        matches!(self, ShareType::Local)
    }
}

/// Identity of the document being edited.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentContext {
    pub id: String,
    #[serde(default)]
    pub share: ShareType,
    /// Whether the current user may edit. Updates are ignored otherwise.
    #[serde(default = "default_can_edit")]
    pub can_edit: bool,
}

fn default_can_edit() -> bool {
    true
}

impl DocumentContext {
    pub fn new(id: impl Into<String>, share: ShareType) -> Self {
        Self {
            id: id.into(),
            share,
            can_edit: true,
        }
    }

    pub fn read_only(mut self) -> Self {
        self.can_edit = false;
        self
    }
}

/// Why a snapshot was taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SnapshotReason {
    /// Before a merge or backup replay.
    Merge,
    Manual,
    Autosave,
}

/// A server-side copy of a document's blocks at a point in time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub id: String,
    pub document_id: String,
    pub reason: SnapshotReason,
    pub created_at: DateTime<Utc>,
}

/// Authoritative block store reached over the delta-sync endpoint.
pub trait BlockRemote: Send + Sync {
    /// Fetch the current server blocks for a document.
    fn fetch_blocks<'a>(&'a self, ctx: &'a DocumentContext) -> BoxFuture<'a, Result<Vec<Block>>>;

    /// Send one batch of deltas.
    ///
    /// The server may answer with its authoritative block list.
    fn sync_deltas<'a>(
        &'a self,
        ctx: &'a DocumentContext,
        deltas: &'a [DeltaBlock],
    ) -> BoxFuture<'a, Result<Option<Vec<Block>>>>;
}

/// Creates protective snapshots.
pub trait SnapshotService: Send + Sync {
    fn create_snapshot<'a>(
        &'a self,
        document_id: &'a str,
        reason: SnapshotReason,
    ) -> BoxFuture<'a, Result<Snapshot>>;
}

/// Snapshot service that does nothing, for local-only setups.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoSnapshots;

impl SnapshotService for NoSnapshots {
    fn create_snapshot<'a>(
        &'a self,
        document_id: &'a str,
        reason: SnapshotReason,
    ) -> BoxFuture<'a, Result<Snapshot>> {
        Box::pin(async move {
            Ok(Snapshot {
                id: String::new(),
                document_id: document_id.to_string(),
                reason,
                created_at: Utc::now(),
            })
        })
    }
}

/// Reports whether the network is reachable.
pub trait Connectivity: Send + Sync {
    fn is_online(&self) -> bool;
}

/// Connectivity backed by a shared flag the host flips.
#[derive(Debug, Clone)]
pub struct OnlineFlag(Arc<AtomicBool>);

impl OnlineFlag {
    pub fn new(online: bool) -> Self {
        Self(Arc::new(AtomicBool::new(online)))
    }

    pub fn set(&self, online: bool) {
        self.0.store(online, Ordering::SeqCst);
    }
}

impl Default for OnlineFlag {
    fn default() -> Self {
        Self::new(true)
    }
}

impl Connectivity for OnlineFlag {
    fn is_online(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}
