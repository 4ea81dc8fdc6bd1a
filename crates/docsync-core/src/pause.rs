//! Pause registry
//!
//! Document ids whose local edits must not be propagated to the remote
//! peer. Independent of the subscription set: remote updates for a
//! paused document are still accepted and persisted; only outbound
//! propagation is withheld.

use std::collections::HashSet;

use crate::message::DocId;

/// The set of paused document ids
#[derive(Debug, Default)]
pub struct PauseRegistry {
    paused: HashSet<DocId>,
}

impl PauseRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Withhold local edits to these documents from the peer
    pub fn pause(&mut self, ids: &[DocId]) {
        for id in ids {
            self.paused.insert(id.clone());
        }
    }

    /// Re-enable outbound propagation for these documents
    pub fn resume(&mut self, ids: &[DocId]) {
        for id in ids {
            self.paused.remove(id);
        }
    }

    pub fn is_paused(&self, id: &str) -> bool {
        self.paused.contains(id)
    }

    pub fn len(&self) -> usize {
        self.paused.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paused.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pause_and_resume() {
        let mut registry = PauseRegistry::new();
        registry.pause(&["a".to_string(), "b".to_string(), "a".to_string()]);
        assert_eq!(registry.len(), 2);
        assert!(registry.is_paused("a"));

        registry.resume(&["a".to_string()]);
        assert!(!registry.is_paused("a"));
        assert!(registry.is_paused("b"));
    }

    #[test]
    fn test_resume_unknown_is_harmless() {
        let mut registry = PauseRegistry::new();
        registry.resume(&["missing".to_string()]);
        assert!(registry.is_empty());
    }
}
