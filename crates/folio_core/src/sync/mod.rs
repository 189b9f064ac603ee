//! Delta synchronization against the authoritative block store.
//!
//! - [`state`]: the Waiting/Syncing/Synced/Error machine that gates requests
//! - [`debounce`]: cancellable trailing-edge timer with a max-wait ceiling
//! - [`remote`]: collaborator traits (fetch, push, snapshot, connectivity)
//! - [`coordinator`]: ties the above to the differ, merge engine and backup

pub mod coordinator;
pub mod debounce;
#[cfg(all(not(target_arch = "wasm32"), feature = "native-sync"))]
pub mod http;
pub mod remote;
pub mod state;

pub use coordinator::{
    CoordinatorConfig, EditorDocument, Notice, NoticeLevel, SubscriptionId, SyncCoordinator,
    SyncCoordinatorBuilder, SyncEvent, SyncObserver,
};
pub use debounce::{DebounceConfig, Debouncer};
#[cfg(all(not(target_arch = "wasm32"), feature = "native-sync"))]
pub use http::HttpBlockRemote;
pub use remote::{
    BlockRemote, BoxFuture, Connectivity, DocumentContext, NoSnapshots, OnlineFlag, ShareType,
    Snapshot, SnapshotReason, SnapshotService,
};
pub use state::{SyncState, SyncStateMachine, SyncTrigger};
