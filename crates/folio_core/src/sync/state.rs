use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{FolioError, Result};

/// Sync status of the open document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    /// Baseline matches what the server acknowledged.
    Synced,
    /// Local edits are pending (debounce window, or parked offline).
    Waiting,
    /// A request is in flight.
    Syncing,
    /// The last request failed; the edit sits in the offline backup.
    Error,
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SyncState::Synced => "synced",
            SyncState::Waiting => "waiting",
            SyncState::Syncing => "syncing",
            SyncState::Error => "error",
        };
        f.write_str(name)
    }
}

/// Inputs that move the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncTrigger {
    /// Document load or re-initialization started.
    Load,
    /// The editor reported a change.
    Edit,
    /// The debounce timer elapsed and a save begins.
    Fire,
    /// The save was written to the offline backup instead of sent.
    Park,
    /// The request (or load) completed, or there was nothing to send.
    Succeeded,
    /// The request (or load) failed.
    Failed,
}

impl fmt::Display for SyncTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Guards network I/O for one document.
///
/// ```text
/// Synced ──edit──▶ Waiting ──fire──▶ Syncing ──ok──▶ Synced
///   ▲                 ▲                │ └──fail──▶ Error ──edit──▶ Waiting
///   └──────ok─────────┼──── park ──────┘
/// ```
///
/// A `Fire` while `Syncing` is rejected: at most one request is in flight.
/// An `Edit` while `Syncing` leaves the state alone; the caller re-schedules
/// once the request settles.
#[derive(Debug, Clone)]
pub struct SyncStateMachine {
    state: SyncState,
}

impl Default for SyncStateMachine {
    fn default() -> Self {
        Self {
            state: SyncState::Synced,
        }
    }
}

impl SyncStateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> SyncState {
        self.state
    }

    /// Compute the successor of `state` under `trigger` without mutating.
    pub fn next(state: SyncState, trigger: SyncTrigger) -> Option<SyncState> {
        use SyncState::*;
        use SyncTrigger::*;

        match (state, trigger) {
            (_, Load) => Some(Syncing),
            (Synced | Waiting | Error, Edit) => Some(Waiting),
            (Syncing, Edit) => Some(Syncing),
            (Waiting, Fire) => Some(Syncing),
            (Syncing, Park) => Some(Waiting),
            (Syncing, Succeeded) => Some(Synced),
            (Syncing, Failed) => Some(Error),
            _ => None,
        }
    }

    /// Apply `trigger`, returning the new state.
    ///
    /// # Errors
    ///
    /// Returns [`FolioError::InvalidTransition`] if the current state does not
    /// accept the trigger. The state is left unchanged.
    pub fn apply(&mut self, trigger: SyncTrigger) -> Result<SyncState> {
        match Self::next(self.state, trigger) {
            Some(next) => {
                self.state = next;
                Ok(next)
            }
            None => Err(FolioError::InvalidTransition {
                from: self.state.to_string(),
                event: trigger.to_string(),
            }),
        }
    }

    /// Whether a request may start now.
    pub fn can_fire(&self) -> bool {
        Self::next(self.state, SyncTrigger::Fire).is_some()
    }
}
