//! Transport collaborator boundary
//!
//! The socket itself is supplied by the host: the session only needs to
//! know whether it is currently open and how to write one text frame.
//! Connect, reconnect and close policy all live on the host side.

use thiserror::Error;

/// A transport write failed
#[derive(Error, Debug)]
#[error("Transport send failed: {reason}")]
pub struct TransportError {
    reason: String,
}

impl TransportError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Host-supplied socket collaborator
pub trait Transport {
    /// Whether the underlying socket is currently open
    fn is_open(&self) -> bool;

    /// Write one text frame to the peer
    fn send(&mut self, frame: &str) -> Result<(), TransportError>;
}
