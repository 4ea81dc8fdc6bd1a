//! Wire envelope types
//!
//! Every frame exchanged with the peer is a JSON object tagged by an
//! `action` field. Automerge sync traffic rides inside the `automerge`
//! action as a base64-encoded sync message.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};

/// Opaque, externally-assigned document identifier
pub type DocId = String;

/// One Automerge sync message addressed to a single document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncPayload {
    /// Target document
    pub id: DocId,
    /// Base64-encoded Automerge sync message bytes
    pub msg: String,
}

impl SyncPayload {
    /// Wrap raw sync message bytes for a document
    pub fn new(id: &str, msg_bytes: &[u8]) -> Self {
        Self {
            id: id.to_string(),
            msg: BASE64.encode(msg_bytes),
        }
    }

    /// Decode the sync message bytes
    pub fn msg_bytes(&self) -> Result<Vec<u8>, base64::DecodeError> {
        BASE64.decode(&self.msg)
    }
}

/// Transport frame, both directions
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum Envelope {
    /// Sync-protocol traffic for one document
    Automerge { data: SyncPayload },

    /// Request updates for the listed documents
    Subscribe { ids: Vec<DocId> },

    /// Stop receiving updates for the listed documents
    Unsubscribe { ids: Vec<DocId> },

    /// Peer-reported error, diagnostic only
    Error { message: String },

    /// Subscription acknowledgement, diagnostic only
    Subscribed {
        #[serde(default)]
        ids: Vec<DocId>,
    },
}

impl Envelope {
    /// Encode the frame as a JSON string
    pub fn encode(&self) -> String {
        serde_json::to_string(self).expect("envelope encoding failed")
    }

    /// Decode a frame from a JSON string
    pub fn decode(frame: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(frame)
    }
}
