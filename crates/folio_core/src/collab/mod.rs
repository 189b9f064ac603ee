//! Realtime collaboration over a CRDT block document.
//!
//! The flow for one document:
//!
//! ```text
//! editor edits ─► CollabDoc ─► local update ─► coalesce ─► sync message ─► server
//! server ─► sync/diff message ─► CollabDoc (remote origin) ─► block observers
//! ```
//!
//! On (re)connect the channel joins the document room, flushes queued
//! updates, then sends its state vector so the server replies with only
//! what this client is missing.

mod channel;
mod doc;
mod protocol;
mod transport;
#[cfg(all(not(target_arch = "wasm32"), feature = "native-sync"))]
mod websocket;

pub use channel::{BlocksObserver, RealtimeCollabChannel};
pub use doc::CollabDoc;
pub use protocol::{ClientMessage, ServerMessage};
pub use transport::{CollabTransport, MemoryTransport, TransportEvent};
#[cfg(all(not(target_arch = "wasm32"), feature = "native-sync"))]
pub use websocket::{WebSocketTransport, backoff_delay};
