//! Session controller
//!
//! Owns the connection lifecycle and the four state containers that
//! survive it: the document store, the subscription set, the pause set,
//! and the connection-or-absent slot. Transport events drive the
//! lifecycle; the merge engine's per-document updates feed the
//! reconciliation routine, which decides what to persist, what to
//! re-announce, and what to report to the host.
//!
//! Everything here runs single-threaded and event-driven: each public
//! entry point executes atomically, and the one deferred step (the
//! write-back of a reconciled replica into the sync layer) is queued and
//! drained after the current handler returns, never inside it.

use std::collections::VecDeque;

use automerge::{AutoCommit, AutomergeError, Change};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::connection::{Connection, ConnectionError, DocUpdate};
use crate::message::{DocId, Envelope, SyncPayload};
use crate::pause::PauseRegistry;
use crate::store::{DocStore, StoreError};
use crate::subscription::SubscriptionManager;
use crate::transport::Transport;

/// Persistence hook, invoked with the full serialized store
pub type SaveFn = Box<dyn FnMut(&str)>;

/// Change notification hook, invoked once per externally-visible change
pub type ChangeFn = Box<dyn FnMut(&str, &AutoCommit)>;

/// Errors fatal to session construction
#[derive(Error, Debug)]
pub enum SessionError {
    /// The initial blob failed to load
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Connection lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No live sync-protocol instance
    Disconnected,
    /// A connection is bound to the open transport
    Connected,
}

/// Session configuration
///
/// The transport is required; everything else is optional.
pub struct SessionConfig<T> {
    /// Socket collaborator
    pub transport: T,
    /// Persistence callback, invoked with the full serialized blob
    pub save: Option<SaveFn>,
    /// Initial blob to seed the document store
    pub saved_data: Option<String>,
    /// Callback invoked `(id, replica)` on every externally-visible change
    pub on_change: Option<ChangeFn>,
}

impl<T> SessionConfig<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            save: None,
            saved_data: None,
            on_change: None,
        }
    }
}

/// Client-side session manager for a set of replicated documents
pub struct SyncSession<T: Transport> {
    transport: T,
    docs: DocStore,
    subscriptions: SubscriptionManager,
    paused: PauseRegistry,
    conn: Option<Connection>,
    /// Write-backs scheduled by reconciliation, drained after the
    /// current event handler returns
    deferred: VecDeque<(DocId, AutoCommit)>,
    save: Option<SaveFn>,
    on_change: Option<ChangeFn>,
}

impl<T: Transport> SyncSession<T> {
    /// Create a session, seeding the document store from `saved_data`
    ///
    /// Fails if the blob is structurally invalid or any entry is
    /// corrupted.
    pub fn new(config: SessionConfig<T>) -> Result<Self, SessionError> {
        let docs = DocStore::load_all(config.saved_data.as_deref())?;
        Ok(Self {
            transport: config.transport,
            docs,
            subscriptions: SubscriptionManager::new(),
            paused: PauseRegistry::new(),
            conn: None,
            deferred: VecDeque::new(),
            save: config.save,
            on_change: config.on_change,
        })
    }

    pub fn state(&self) -> SessionState {
        if self.conn.is_some() {
            SessionState::Connected
        } else {
            SessionState::Disconnected
        }
    }

    pub fn docs(&self) -> &DocStore {
        &self.docs
    }

    pub fn docs_mut(&mut self) -> &mut DocStore {
        &mut self.docs
    }

    pub fn subscriptions(&self) -> &SubscriptionManager {
        &self.subscriptions
    }

    pub fn paused(&self) -> &PauseRegistry {
        &self.paused
    }

    // ==================== Transport lifecycle ====================

    /// The transport became open: bind a fresh connection and re-announce
    /// the full current subscription set exactly once
    pub fn handle_open(&mut self) {
        info!("transport open");
        self.conn = Some(Connection::new());

        let members = self.subscriptions.members().to_vec();
        if !members.is_empty() {
            debug!("re-announcing {} subscription(s)", members.len());
            self.send(&Envelope::Subscribe { ids: members });
        }
        self.drain_deferred();
    }

    /// The transport closed: tear down the live protocol session
    ///
    /// The document store, subscription set and pause set all survive.
    pub fn handle_close(&mut self) {
        info!("transport closed");
        self.conn = None;
    }

    /// The transport reported an error
    ///
    /// Diagnostic only; the transport follows up with a close event,
    /// which is what drives the state machine.
    pub fn handle_error(&mut self, detail: &str) {
        warn!("transport error: {}", detail);
    }

    /// One inbound transport frame
    pub fn handle_message(&mut self, frame: &str) {
        match Envelope::decode(frame) {
            Ok(envelope) => self.dispatch(envelope),
            Err(err) => warn!("unrecognized frame: {}", err),
        }
        self.drain_deferred();
    }

    fn dispatch(&mut self, envelope: Envelope) {
        if self.conn.is_none() {
            debug!("frame received while disconnected, ignoring");
            return;
        }
        match envelope {
            Envelope::Automerge { data } => self.receive_sync(data),
            Envelope::Error { message } => {
                warn!("peer reported error: {}", message);
            }
            Envelope::Subscribed { ids } => {
                debug!("subscription acknowledged for {:?}", ids);
            }
            Envelope::Subscribe { .. } | Envelope::Unsubscribe { .. } => {
                warn!("unexpected client-bound action, ignoring");
            }
        }
    }

    fn receive_sync(&mut self, payload: SyncPayload) {
        let result = match self.conn.as_mut() {
            Some(conn) => conn.receive(&payload),
            None => return,
        };
        self.apply_protocol_output(&payload.id, result);
    }

    // ==================== Reconciliation ====================

    /// Fold a sync-layer update for one document into the canonical store
    fn reconcile(&mut self, update: DocUpdate) {
        let DocUpdate {
            id,
            replica: mut incoming,
        } = update;

        // Synthesize an empty merge base for a previously-unknown id.
        let mut merged = self.docs.get_or_init(&id);
        let heads = merged.get_heads();
        // get_changes borrows from the incoming replica; the changes must
        // be owned before they can be applied to the merge base.
        let changes: Vec<Change> = incoming
            .get_changes(&heads)
            .into_iter()
            .cloned()
            .collect();
        let changed = !changes.is_empty();

        if changed {
            if let Err(err) = merged.apply_changes(changes) {
                warn!("failed to apply changes for '{}': {}", id, err);
                return;
            }
            // The write-back into the sync layer is deferred to after the
            // current handler returns, breaking reentrant-callback cycles.
            self.deferred.push_back((id.clone(), merged.fork()));
        }

        // Every id seen by reconciliation stays in the store from here on.
        self.docs.insert(id.clone(), merged);
        self.subscriptions.mark_reconciled(&id);

        if changed {
            self.persist_and_notify(&id);
        } else {
            debug!("empty change set for '{}', nothing to report", id);
        }
    }

    fn persist_and_notify(&mut self, id: &str) {
        if self.save.is_some() {
            match self.docs.save_all() {
                Ok(blob) => {
                    if let Some(save) = self.save.as_mut() {
                        save(&blob);
                    }
                }
                Err(err) => warn!("failed to serialize document store: {}", err),
            }
        }
        if let Some(on_change) = self.on_change.as_mut() {
            if let Some(doc) = self.docs.get(id) {
                on_change(id, doc);
            }
        }
    }

    /// Drain the deferred write-back queue
    ///
    /// A write-back scheduled before the transport closed may fire with
    /// the connection gone; that is a safe no-op.
    fn drain_deferred(&mut self) {
        while let Some((id, replica)) = self.deferred.pop_front() {
            let result = match self.conn.as_mut() {
                Some(conn) => conn.announce(&id, replica),
                None => {
                    debug!("dropping write-back for '{}': connection closed", id);
                    continue;
                }
            };
            self.apply_protocol_output(&id, result);
        }
    }

    /// Handle one connection call's output: send what the peer needs and
    /// reconcile the reported update
    fn apply_protocol_output(
        &mut self,
        id: &str,
        result: Result<(Vec<SyncPayload>, Option<DocUpdate>), ConnectionError>,
    ) {
        match result {
            Ok((outbound, update)) => {
                for payload in outbound {
                    self.send(&Envelope::Automerge { data: payload });
                }
                if let Some(update) = update {
                    self.reconcile(update);
                }
            }
            Err(err) => warn!("sync protocol error for '{}': {}", id, err),
        }
    }

    fn announce_now(&mut self, id: &str, replica: AutoCommit) {
        let result = match self.conn.as_mut() {
            Some(conn) => conn.announce(id, replica),
            None => return,
        };
        self.apply_protocol_output(id, result);
    }

    fn send(&mut self, envelope: &Envelope) {
        if let Err(err) = self.transport.send(&envelope.encode()) {
            warn!("transport send failed: {}", err);
        }
    }

    // ==================== Host operations ====================

    /// Apply a local mutation to a known document
    ///
    /// Returns false, with no state mutated, if the id is unknown or the
    /// mutator fails. While paused, the new replica is retained locally
    /// only; otherwise it is announced to the live sync layer, if any.
    pub fn change<F>(&mut self, id: &str, mutator: F) -> bool
    where
        F: FnOnce(&mut AutoCommit) -> Result<(), AutomergeError>,
    {
        let Some(current) = self.docs.get_mut(id) else {
            warn!("change requested for unknown document '{}'", id);
            return false;
        };

        let mut next = current.fork();
        if let Err(err) = mutator(&mut next) {
            warn!("mutator failed for '{}': {}", id, err);
            return false;
        }
        self.docs.insert(id.to_string(), next.fork());

        if self.paused.is_paused(id) {
            debug!("document '{}' is paused, keeping change local", id);
            return true;
        }
        if self.conn.is_some() {
            self.announce_now(id, next);
            self.drain_deferred();
        }
        true
    }

    /// Request remote updates for these documents
    ///
    /// Membership takes effect immediately; if the transport is open the
    /// call's net-new ids are announced now, otherwise the accumulated
    /// set is replayed when the transport next opens.
    pub fn subscribe(&mut self, ids: &[DocId]) {
        if ids.is_empty() {
            return;
        }
        let net_new = self.subscriptions.subscribe(ids);
        if !net_new.is_empty() && self.transport.is_open() {
            self.send(&Envelope::Subscribe { ids: net_new });
        }
    }

    /// Stop receiving remote updates for these documents
    ///
    /// Local retention is unaffected. Removal applies even while
    /// disconnected so a later reconnect does not re-request the ids.
    pub fn unsubscribe(&mut self, ids: &[DocId]) {
        if ids.is_empty() {
            return;
        }
        let removed = self.subscriptions.unsubscribe(ids);
        if self.transport.is_open() {
            self.send(&Envelope::Unsubscribe { ids: removed });
        }
    }

    /// Withhold local edits to these documents from the peer
    pub fn pause(&mut self, ids: &[DocId]) {
        if ids.is_empty() {
            return;
        }
        self.paused.pause(ids);
    }

    /// Re-enable outbound propagation for these documents
    ///
    /// Every id must be known to the active sync layer, or the whole call
    /// fails with the pause set unchanged. On success each resumed id's
    /// canonical replica is re-announced so edits accumulated while
    /// paused reach the peer. Unlike `pause`, this validates against the
    /// sync layer; the asymmetry is inherited behavior.
    pub fn resume(&mut self, ids: &[DocId]) -> bool {
        if ids.is_empty() {
            return true;
        }

        let all_known = match self.conn.as_ref() {
            Some(conn) => ids.iter().all(|id| conn.contains(id)),
            None => false,
        };
        if !all_known {
            warn!("cannot resume: document not known to the active sync layer");
            return false;
        }

        self.paused.resume(ids);
        for id in ids {
            let replica = self.docs.get_or_init(id);
            self.announce_now(id, replica);
        }
        self.drain_deferred();
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::{Cell, RefCell};
    use std::rc::Rc;

    use automerge::transaction::Transactable;
    use automerge::ROOT;

    use crate::transport::TransportError;

    /// Records every frame the session writes
    #[derive(Clone, Default)]
    struct MockTransport {
        open: Rc<Cell<bool>>,
        sent: Rc<RefCell<Vec<String>>>,
    }

    impl Transport for MockTransport {
        fn is_open(&self) -> bool {
            self.open.get()
        }

        fn send(&mut self, frame: &str) -> Result<(), TransportError> {
            self.sent.borrow_mut().push(frame.to_string());
            Ok(())
        }
    }

    fn session_with(
        transport: MockTransport,
    ) -> SyncSession<MockTransport> {
        SyncSession::new(SessionConfig::new(transport)).unwrap()
    }

    fn ids(names: &[&str]) -> Vec<DocId> {
        names.iter().map(|name| name.to_string()).collect()
    }

    fn frames(transport: &MockTransport) -> Vec<Envelope> {
        transport
            .sent
            .borrow()
            .iter()
            .map(|frame| Envelope::decode(frame).unwrap())
            .collect()
    }

    #[test]
    fn test_subscribe_before_open_sends_nothing() {
        let transport = MockTransport::default();
        let mut session = session_with(transport.clone());

        session.subscribe(&ids(&["doc1"]));
        assert!(transport.sent.borrow().is_empty());
        assert!(session.subscriptions().is_member("doc1"));
    }

    #[test]
    fn test_open_replays_accumulated_set_once() {
        let transport = MockTransport::default();
        let mut session = session_with(transport.clone());

        session.subscribe(&ids(&["doc1", "doc2"]));
        session.unsubscribe(&ids(&["doc2"]));
        session.subscribe(&ids(&["doc3"]));

        transport.open.set(true);
        session.handle_open();

        let sent = frames(&transport);
        assert_eq!(sent.len(), 1);
        match &sent[0] {
            Envelope::Subscribe { ids } => {
                assert_eq!(ids, &vec!["doc1".to_string(), "doc3".to_string()]);
            }
            other => panic!("expected subscribe frame, got {:?}", other),
        }
    }

    #[test]
    fn test_open_with_empty_set_sends_nothing() {
        let transport = MockTransport::default();
        let mut session = session_with(transport.clone());

        transport.open.set(true);
        session.handle_open();
        assert!(transport.sent.borrow().is_empty());
        assert_eq!(session.state(), SessionState::Connected);
    }

    #[test]
    fn test_subscribe_while_open_sends_net_new_only() {
        let transport = MockTransport::default();
        let mut session = session_with(transport.clone());
        transport.open.set(true);
        session.handle_open();

        session.subscribe(&ids(&["doc1"]));
        session.subscribe(&ids(&["doc1", "doc2"]));

        let sent = frames(&transport);
        assert_eq!(sent.len(), 2);
        match &sent[1] {
            Envelope::Subscribe { ids } => assert_eq!(ids, &vec!["doc2".to_string()]),
            other => panic!("expected subscribe frame, got {:?}", other),
        }
        // fully-duplicate request announces nothing
        session.subscribe(&ids(&["doc2"]));
        assert_eq!(transport.sent.borrow().len(), 2);
    }

    #[test]
    fn test_close_keeps_state_containers() {
        let transport = MockTransport::default();
        let mut session = session_with(transport.clone());
        session.subscribe(&ids(&["doc1"]));
        session.pause(&ids(&["doc1"]));

        transport.open.set(true);
        session.handle_open();
        transport.open.set(false);
        session.handle_close();

        assert_eq!(session.state(), SessionState::Disconnected);
        assert!(session.subscriptions().is_member("doc1"));
        assert!(session.paused().is_paused("doc1"));
    }

    #[test]
    fn test_change_unknown_id_fails_without_mutation() {
        let transport = MockTransport::default();
        let mut session = session_with(transport.clone());

        let applied = session.change("missing", |doc| {
            doc.put(ROOT, "title", "x")?;
            Ok(())
        });
        assert!(!applied);
        assert!(session.docs().is_empty());
        assert!(transport.sent.borrow().is_empty());
    }

    #[test]
    fn test_failed_mutator_leaves_store_untouched() {
        let transport = MockTransport::default();
        let mut session = session_with(transport.clone());
        session.docs_mut().insert("doc1".to_string(), AutoCommit::new());

        let applied = session.change("doc1", |doc| {
            // list insert on the root map is rejected by the engine
            doc.insert(ROOT, 0, "x")?;
            Ok(())
        });
        assert!(!applied);

        let doc = session.docs_mut().get_mut("doc1").unwrap();
        assert!(doc.get_heads().is_empty());
    }

    #[test]
    fn test_paused_change_stays_local() {
        let transport = MockTransport::default();
        let mut session = session_with(transport.clone());
        session.docs_mut().insert("doc1".to_string(), AutoCommit::new());
        transport.open.set(true);
        session.handle_open();
        session.pause(&ids(&["doc1"]));

        let applied = session.change("doc1", |doc| {
            doc.put(ROOT, "title", "local only")?;
            Ok(())
        });
        assert!(applied);

        // store advanced, wire silent
        let doc = session.docs_mut().get_mut("doc1").unwrap();
        assert_eq!(doc.get_heads().len(), 1);
        assert!(transport.sent.borrow().is_empty());
    }

    #[test]
    fn test_unpaused_change_announces() {
        let transport = MockTransport::default();
        let mut session = session_with(transport.clone());
        session.docs_mut().insert("doc1".to_string(), AutoCommit::new());
        transport.open.set(true);
        session.handle_open();

        let applied = session.change("doc1", |doc| {
            doc.put(ROOT, "title", "shared")?;
            Ok(())
        });
        assert!(applied);

        let sent = frames(&transport);
        assert!(sent
            .iter()
            .any(|frame| matches!(frame, Envelope::Automerge { data } if data.id == "doc1")));
    }

    #[test]
    fn test_resume_without_connection_fails() {
        let transport = MockTransport::default();
        let mut session = session_with(transport.clone());
        session.pause(&ids(&["doc1"]));

        assert!(!session.resume(&ids(&["doc1"])));
        assert!(session.paused().is_paused("doc1"));
    }

    #[test]
    fn test_resume_unknown_to_sync_layer_fails() {
        let transport = MockTransport::default();
        let mut session = session_with(transport.clone());
        session.docs_mut().insert("doc1".to_string(), AutoCommit::new());
        transport.open.set(true);
        session.handle_open();
        session.pause(&ids(&["doc1"]));

        // doc1 was never announced or received, so the sync layer has
        // no record of it
        assert!(!session.resume(&ids(&["doc1"])));
        assert!(session.paused().is_paused("doc1"));
    }

    #[test]
    fn test_resume_reannounces_paused_edits() {
        let transport = MockTransport::default();
        let mut session = session_with(transport.clone());
        session.docs_mut().insert("doc1".to_string(), AutoCommit::new());
        transport.open.set(true);
        session.handle_open();

        // make the doc known to the sync layer first
        session.change("doc1", |doc| {
            doc.put(ROOT, "title", "v1")?;
            Ok(())
        });
        session.pause(&ids(&["doc1"]));
        session.change("doc1", |doc| {
            doc.put(ROOT, "title", "v2")?;
            Ok(())
        });

        let before = transport.sent.borrow().len();
        assert!(session.resume(&ids(&["doc1"])));
        assert!(!session.paused().is_paused("doc1"));

        // the accumulated edit goes out on resume
        assert!(transport.sent.borrow().len() > before);
    }

    #[test]
    fn test_write_back_after_close_is_a_no_op() {
        let transport = MockTransport::default();
        let mut session = session_with(transport.clone());
        transport.open.set(true);
        session.handle_open();
        transport.open.set(false);
        session.handle_close();

        // A write-back scheduled before the close fires against the
        // now-absent connection.
        session
            .deferred
            .push_back(("doc1".to_string(), AutoCommit::new()));
        session.drain_deferred();

        assert!(session.deferred.is_empty());
        assert!(transport.sent.borrow().is_empty());
        assert_eq!(session.state(), SessionState::Disconnected);
    }

    #[test]
    fn test_frames_ignored_while_disconnected() {
        let transport = MockTransport::default();
        let mut session = session_with(transport.clone());

        session.handle_message(r#"{"action":"error","message":"boom"}"#);
        session.handle_message(r#"{"action":"subscribed","ids":["doc1"]}"#);
        assert_eq!(session.state(), SessionState::Disconnected);
        assert!(transport.sent.borrow().is_empty());
    }

    #[test]
    fn test_unknown_action_leaves_state_untouched() {
        let transport = MockTransport::default();
        let mut session = session_with(transport.clone());
        transport.open.set(true);
        session.handle_open();

        session.handle_message(r#"{"action":"frobnicate"}"#);
        session.handle_message("not json at all");

        assert_eq!(session.state(), SessionState::Connected);
        assert!(session.docs().is_empty());
        assert!(transport.sent.borrow().is_empty());
    }

    #[test]
    fn test_peer_error_keeps_connection_open() {
        let transport = MockTransport::default();
        let mut session = session_with(transport.clone());
        transport.open.set(true);
        session.handle_open();

        session.handle_message(r#"{"action":"error","message":"server hiccup"}"#);
        assert_eq!(session.state(), SessionState::Connected);
    }

    #[test]
    fn test_construction_fails_on_malformed_blob() {
        let transport = MockTransport::default();
        let mut config = SessionConfig::new(transport);
        config.saved_data = Some("not json".to_string());

        assert!(matches!(
            SyncSession::new(config),
            Err(SessionError::Store(_))
        ));
    }

    #[test]
    fn test_saved_data_seeds_store() {
        let mut seed = DocStore::new();
        let mut doc = AutoCommit::new();
        doc.put(ROOT, "title", "persisted").unwrap();
        seed.insert("doc1".to_string(), doc);
        let blob = seed.save_all().unwrap();

        let transport = MockTransport::default();
        let mut config = SessionConfig::new(transport);
        config.saved_data = Some(blob);

        let session = SyncSession::new(config).unwrap();
        assert!(session.docs().contains("doc1"));
    }
}
