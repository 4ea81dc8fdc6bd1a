//! Subscription set reconciliation
//!
//! Tracks which document ids the session wants remote updates for,
//! including ids requested before a transport is available. Membership
//! preserves the caller's submitted order because the wire message does.

use std::collections::HashSet;

use crate::message::DocId;

/// The set of document ids this session is subscribed to
#[derive(Debug, Default)]
pub struct SubscriptionManager {
    /// Ordered, deduplicated membership
    members: Vec<DocId>,
    /// Ids subscribed but not yet reconciled at least once
    pending: HashSet<DocId>,
}

impl SubscriptionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold the net-new ids into the membership
    ///
    /// Deduplicates `ids` against both itself and the existing membership
    /// and returns the net-new ids, in submitted order. The return value
    /// is what an open transport announces for this call.
    pub fn subscribe(&mut self, ids: &[DocId]) -> Vec<DocId> {
        let mut net_new: Vec<DocId> = Vec::new();
        for id in ids {
            if self.is_member(id) || net_new.contains(id) {
                continue;
            }
            net_new.push(id.clone());
        }

        for id in &net_new {
            self.members.push(id.clone());
            self.pending.insert(id.clone());
        }
        net_new
    }

    /// Remove ids from the membership
    ///
    /// Returns the deduplicated ids, in submitted order, for the wire.
    /// Removal applies even while disconnected so a later reconnect does
    /// not re-request them.
    pub fn unsubscribe(&mut self, ids: &[DocId]) -> Vec<DocId> {
        let mut requested: Vec<DocId> = Vec::new();
        for id in ids {
            if !requested.contains(id) {
                requested.push(id.clone());
            }
        }

        self.members.retain(|member| !requested.contains(member));
        for id in &requested {
            self.pending.remove(id);
        }
        requested
    }

    /// The full accumulated membership, in subscription order
    ///
    /// This is exactly what gets re-announced when a connection opens.
    pub fn members(&self) -> &[DocId] {
        &self.members
    }

    pub fn is_member(&self, id: &str) -> bool {
        self.members.iter().any(|member| member == id)
    }

    /// Clear the subscribe-wait bookkeeping for a reconciled id
    pub fn mark_reconciled(&mut self, id: &str) -> bool {
        self.pending.remove(id)
    }

    pub fn is_pending(&self, id: &str) -> bool {
        self.pending.contains(id)
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}
