//! Transport seam for the realtime channel.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use super::protocol::ClientMessage;
use crate::error::{FolioError, Result};

/// What a transport reports back to its channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Connected,
    Disconnected,
    /// A text frame from the server.
    Message(String),
}

/// Outbound half of a realtime connection.
///
/// `send` must not block; implementations queue onto their writer.
pub trait CollabTransport: Send + Sync {
    fn send(&self, message: ClientMessage) -> Result<()>;

    fn is_connected(&self) -> bool;
}

/// In-memory transport that records what was sent.
#[derive(Debug, Clone, Default)]
pub struct MemoryTransport {
    connected: Arc<AtomicBool>,
    sent: Arc<Mutex<Vec<ClientMessage>>>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    /// Messages sent so far, oldest first.
    pub fn sent(&self) -> Vec<ClientMessage> {
        self.sent.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Take and clear the sent messages.
    pub fn drain(&self) -> Vec<ClientMessage> {
        std::mem::take(&mut *self.sent.lock().unwrap_or_else(|e| e.into_inner()))
    }
}

impl CollabTransport for MemoryTransport {
    fn send(&self, message: ClientMessage) -> Result<()> {
        if !self.is_connected() {
            return Err(FolioError::Transport("not connected".to_string()));
        }
        self.sent
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(message);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}
