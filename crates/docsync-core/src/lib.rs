//! docsync Core Library
//!
//! Client-side session manager that keeps a set of locally-held
//! Automerge documents synchronized with a remote peer over a
//! persistent, reconnectable transport. The replication algorithm
//! itself belongs to Automerge; this crate is the session and
//! subscription layer above it: connection lifecycle, subscription
//! membership, pause/resume suppression, and the reconciliation routine
//! that folds sync-layer updates into the canonical store and notifies
//! the host exactly once per meaningful change.
//!
//! # Quick Start
//!
//! ```text
//! let mut config = SessionConfig::new(transport);
//! config.saved_data = saved_blob;
//! config.on_change = Some(Box::new(|id, _doc| println!("{} changed", id)));
//! let mut session = SyncSession::new(config)?;
//!
//! session.subscribe(&["doc1".to_string()]);
//!
//! // wire the host's socket events through:
//! //   open    -> session.handle_open()
//! //   message -> session.handle_message(&frame)
//! //   close   -> session.handle_close()
//! ```
//!
//! # Modules
//!
//! - `session`: session controller and reconciliation (main entry point)
//! - `store`: canonical document store and blob persistence
//! - `subscription`: subscription set reconciliation
//! - `pause`: pause registry for outbound suppression
//! - `connection`: sync-protocol instance bound to one transport session
//! - `message`: JSON wire envelope
//! - `clock`: version vectors and causal-order comparison
//! - `transport`: socket collaborator boundary

pub mod clock;
pub mod connection;
pub mod message;
pub mod pause;
pub mod session;
pub mod store;
pub mod subscription;
pub mod transport;

pub use clock::{causally_at_most, version_vector, VersionVector};
pub use connection::{Connection, ConnectionError, DocUpdate};
pub use message::{DocId, Envelope, SyncPayload};
pub use pause::PauseRegistry;
pub use session::{ChangeFn, SaveFn, SessionConfig, SessionError, SessionState, SyncSession};
pub use store::{DocStore, StoreError};
pub use subscription::SubscriptionManager;
pub use transport::{Transport, TransportError};
