//! Sync-protocol instance bound to one open transport session
//!
//! A `Connection` wraps the Automerge sync protocol: one `sync::State`
//! and one mirror replica per document. The mirror is the
//! synchronization layer's own view of each document, distinct from the
//! session's canonical store. It starts empty on every fresh connection;
//! the peer drives initial content after the subscribe announcement, and
//! local content enters through [`Connection::announce`].
//!
//! A connection owns no state that outlives the transport session it is
//! bound to. It is created on transport-open and discarded on close.

use std::collections::HashMap;

use automerge::sync::{self, Message as SyncMessage, SyncDoc};
use automerge::AutoCommit;
use thiserror::Error;

use crate::message::{DocId, SyncPayload};

/// Errors that can occur processing sync traffic
#[derive(Error, Debug)]
pub enum ConnectionError {
    /// The payload carries invalid base64
    #[error("Sync payload has an invalid base64 encoding: {0}")]
    InvalidEncoding(#[from] base64::DecodeError),

    /// The payload bytes are not a valid sync message
    #[error("Malformed sync message: {0}")]
    MalformedMessage(#[from] sync::ReadMessageError),

    /// The merge engine rejected the message or replica
    #[error("Merge engine error: {0}")]
    Engine(#[from] automerge::AutomergeError),
}

/// A replica update reported by the synchronization layer
///
/// Fed to the session's reconciliation routine, which decides whether
/// anything actually changed.
pub struct DocUpdate {
    pub id: DocId,
    pub replica: AutoCommit,
}

/// One live sync-protocol instance
#[derive(Default)]
pub struct Connection {
    docs: HashMap<DocId, AutoCommit>,
    states: HashMap<DocId, sync::State>,
}

impl Connection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one peer sync message into the per-document protocol state
    /// machine
    ///
    /// Returns whatever the peer now needs, plus the updated replica for
    /// reconciliation.
    pub fn receive(
        &mut self,
        payload: &SyncPayload,
    ) -> Result<(Vec<SyncPayload>, Option<DocUpdate>), ConnectionError> {
        let bytes = payload.msg_bytes()?;
        let message = SyncMessage::decode(&bytes)?;

        let doc = self
            .docs
            .entry(payload.id.clone())
            .or_insert_with(AutoCommit::new);
        let state = self
            .states
            .entry(payload.id.clone())
            .or_insert_with(sync::State::new);

        doc.sync().receive_sync_message(state, message)?;

        let mut outbound = Vec::new();
        if let Some(reply) = doc.sync().generate_sync_message(state) {
            outbound.push(SyncPayload::new(&payload.id, &reply.encode()));
        }

        let update = DocUpdate {
            id: payload.id.clone(),
            replica: doc.fork(),
        };
        Ok((outbound, Some(update)))
    }

    /// Write a replica back into the sync layer
    ///
    /// Merges the replica into the mirror, generates whatever the peer
    /// now needs, and reports the merged replica through the same update
    /// path a received message would take.
    pub fn announce(
        &mut self,
        id: &str,
        mut replica: AutoCommit,
    ) -> Result<(Vec<SyncPayload>, Option<DocUpdate>), ConnectionError> {
        let doc = self
            .docs
            .entry(id.to_string())
            .or_insert_with(AutoCommit::new);
        doc.merge(&mut replica)?;

        let state = self
            .states
            .entry(id.to_string())
            .or_insert_with(sync::State::new);

        let mut outbound = Vec::new();
        if let Some(message) = doc.sync().generate_sync_message(state) {
            outbound.push(SyncPayload::new(id, &message.encode()));
        }

        let update = DocUpdate {
            id: id.to_string(),
            replica: doc.fork(),
        };
        Ok((outbound, Some(update)))
    }

    /// Whether the sync layer currently knows this document
    pub fn contains(&self, id: &str) -> bool {
        self.docs.contains_key(id)
    }
}
