//! Realtime wire messages.
//!
//! JSON text frames tagged by `event`. Binary CRDT payloads travel as
//! standard base64.
//!
//! ```text
//! client → server  {"event":"join","documentId":"…"}
//! client → server  {"event":"diff","documentId":"…","stateVector":"AQID"}
//! client → server  {"event":"sync","documentId":"…","update":"AAEC…"}
//! server → client  {"event":"sync","update":"AAEC…"}
//! server → client  {"event":"diff","update":"AAEC…"}
//! ```

use base64::{Engine as _, engine::general_purpose::STANDARD};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Message sent by the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum ClientMessage {
    /// Enter the room for a document.
    #[serde(rename_all = "camelCase")]
    Join { document_id: String },

    /// Ask for everything the server has that this state vector lacks.
    #[serde(rename_all = "camelCase")]
    Diff {
        document_id: String,
        state_vector: String,
    },

    /// A local update for the server to apply and broadcast.
    #[serde(rename_all = "camelCase")]
    Sync { document_id: String, update: String },
}

impl ClientMessage {
    pub fn join(document_id: &str) -> Self {
        ClientMessage::Join {
            document_id: document_id.to_string(),
        }
    }

    pub fn diff(document_id: &str, state_vector: &[u8]) -> Self {
        ClientMessage::Diff {
            document_id: document_id.to_string(),
            state_vector: STANDARD.encode(state_vector),
        }
    }

    pub fn sync(document_id: &str, update: &[u8]) -> Self {
        ClientMessage::Sync {
            document_id: document_id.to_string(),
            update: STANDARD.encode(update),
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decoded update payload of a `sync` message.
    pub fn update_bytes(&self) -> Result<Option<Vec<u8>>> {
        match self {
            ClientMessage::Sync { update, .. } => Ok(Some(STANDARD.decode(update)?)),
            _ => Ok(None),
        }
    }
}

/// Message received from the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum ServerMessage {
    /// An update broadcast by another client.
    #[serde(rename_all = "camelCase")]
    Sync {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        document_id: Option<String>,
        update: String,
    },

    /// Response to a diff request.
    #[serde(rename_all = "camelCase")]
    Diff {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        document_id: Option<String>,
        update: String,
    },
}

impl ServerMessage {
    pub fn parse(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn sync(update: &[u8]) -> Self {
        ServerMessage::Sync {
            document_id: None,
            update: STANDARD.encode(update),
        }
    }

    pub fn diff(update: &[u8]) -> Self {
        ServerMessage::Diff {
            document_id: None,
            update: STANDARD.encode(update),
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Document the message is addressed to, when the server says.
    pub fn document_id(&self) -> Option<&str> {
        match self {
            ServerMessage::Sync { document_id, .. } | ServerMessage::Diff { document_id, .. } => {
                document_id.as_deref()
            }
        }
    }

    pub fn update_bytes(&self) -> Result<Vec<u8>> {
        match self {
            ServerMessage::Sync { update, .. } | ServerMessage::Diff { update, .. } => {
                Ok(STANDARD.decode(update)?)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_wire_shape() {
        let join = serde_json::to_value(ClientMessage::join("doc-1")).unwrap();
        assert_eq!(join, serde_json::json!({"event": "join", "documentId": "doc-1"}));

        let diff = serde_json::to_value(ClientMessage::diff("doc-1", &[1, 2, 3])).unwrap();
        assert_eq!(diff["event"], "diff");
        assert_eq!(diff["stateVector"], "AQID");
    }

    #[test]
    fn test_server_message_parse() {
        let msg = ServerMessage::parse(r#"{"event":"sync","update":"AQID"}"#).unwrap();
        assert_eq!(msg.update_bytes().unwrap(), vec![1, 2, 3]);
        assert_eq!(msg.document_id(), None);

        let msg =
            ServerMessage::parse(r#"{"event":"diff","documentId":"d","update":""}"#).unwrap();
        assert!(matches!(msg, ServerMessage::Diff { .. }));
        assert_eq!(msg.document_id(), Some("d"));
    }

    #[test]
    fn test_unknown_event_is_an_error() {
        assert!(ServerMessage::parse(r#"{"event":"presence","users":[]}"#).is_err());
    }

    #[test]
    fn test_bad_base64_is_an_error() {
        let msg = ServerMessage::parse(r#"{"event":"sync","update":"***"}"#).unwrap();
        assert!(matches!(
            msg.update_bytes(),
            Err(crate::error::FolioError::Base64(_))
        ));
    }
}
