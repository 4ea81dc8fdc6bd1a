//! Canonical document store
//!
//! In-memory mapping from document id to the local Automerge replica,
//! loaded from and saved to a single JSON blob. Each entry is encoded
//! independently as base64 of the Automerge save bytes; a decode failure
//! for any entry fails the whole load so partial corruption is surfaced
//! rather than masked.

use std::collections::HashMap;

use automerge::AutoCommit;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use thiserror::Error;

use crate::message::DocId;

/// Errors that can occur loading or saving the document blob
#[derive(Error, Debug)]
pub enum StoreError {
    /// The blob is not a valid JSON map of document ids to encodings
    #[error("Malformed document blob: {0}")]
    MalformedBlob(#[from] serde_json::Error),

    /// One entry carries invalid base64
    #[error("Document '{id}' has an invalid base64 encoding: {source}")]
    InvalidEncoding {
        id: DocId,
        #[source]
        source: base64::DecodeError,
    },

    /// One entry failed to decode as an Automerge document
    #[error("Document '{id}' is corrupted: {source}")]
    CorruptDocument {
        id: DocId,
        #[source]
        source: automerge::AutomergeError,
    },
}

/// In-memory mapping from document id to the canonical local replica
///
/// Entries are added by the initial load and by reconciliation when it
/// observes the first update for a previously-unknown id. They are never
/// removed for the lifetime of the session; unsubscribing only stops
/// future remote propagation.
#[derive(Default)]
pub struct DocStore {
    docs: HashMap<DocId, AutoCommit>,
}

impl DocStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a store from a serialized blob
    ///
    /// An absent or empty blob yields an empty store. Any structural or
    /// per-entry decode failure is propagated, never recovered.
    pub fn load_all(blob: Option<&str>) -> Result<Self, StoreError> {
        let Some(blob) = blob.filter(|blob| !blob.is_empty()) else {
            return Ok(Self::new());
        };

        let encoded: HashMap<DocId, String> = serde_json::from_str(blob)?;
        let mut docs = HashMap::with_capacity(encoded.len());
        for (id, entry) in encoded {
            let bytes = BASE64
                .decode(&entry)
                .map_err(|source| StoreError::InvalidEncoding {
                    id: id.clone(),
                    source,
                })?;
            let doc =
                AutoCommit::load(&bytes).map_err(|source| StoreError::CorruptDocument {
                    id: id.clone(),
                    source,
                })?;
            docs.insert(id, doc);
        }

        Ok(Self { docs })
    }

    /// Serialize every entry into a single blob
    ///
    /// Exact structural inverse of [`DocStore::load_all`].
    pub fn save_all(&mut self) -> Result<String, StoreError> {
        let encoded: HashMap<&DocId, String> = self
            .docs
            .iter_mut()
            .map(|(id, doc)| (id, BASE64.encode(doc.save())))
            .collect();
        Ok(serde_json::to_string(&encoded)?)
    }

    /// Return a copy of the stored replica for `id`, or a fresh empty
    /// replica if the id is unknown
    ///
    /// Does not insert; insertion happens only when the caller commits a
    /// result back via [`DocStore::insert`].
    pub fn get_or_init(&mut self, id: &str) -> AutoCommit {
        match self.docs.get_mut(id) {
            Some(doc) => doc.fork(),
            None => AutoCommit::new(),
        }
    }

    /// Commit a replica as the canonical copy for `id`
    pub fn insert(&mut self, id: DocId, doc: AutoCommit) {
        self.docs.insert(id, doc);
    }

    pub fn get(&self, id: &str) -> Option<&AutoCommit> {
        self.docs.get(id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut AutoCommit> {
        self.docs.get_mut(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.docs.contains_key(id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &DocId> {
        self.docs.keys()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&DocId, &mut AutoCommit)> {
        self.docs.iter_mut()
    }

    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use automerge::transaction::Transactable;
    use automerge::{ReadDoc, ROOT};

    fn doc_with_title(title: &str) -> AutoCommit {
        let mut doc = AutoCommit::new();
        doc.put(ROOT, "title", title).unwrap();
        doc
    }

    fn title_of(doc: &AutoCommit) -> String {
        match doc.get(ROOT, "title").unwrap() {
            Some((value, _)) => value.to_str().unwrap().to_string(),
            None => panic!("missing title"),
        }
    }

    #[test]
    fn test_load_absent_blob() {
        assert!(DocStore::load_all(None).unwrap().is_empty());
        assert!(DocStore::load_all(Some("")).unwrap().is_empty());
    }

    #[test]
    fn test_round_trip() {
        let mut store = DocStore::new();
        store.insert("doc1".to_string(), doc_with_title("first"));
        store.insert("doc2".to_string(), doc_with_title("second"));

        let blob = store.save_all().unwrap();
        let loaded = DocStore::load_all(Some(&blob)).unwrap();

        assert_eq!(loaded.len(), 2);
        assert_eq!(title_of(loaded.get("doc1").unwrap()), "first");
        assert_eq!(title_of(loaded.get("doc2").unwrap()), "second");
    }

    #[test]
    fn test_malformed_blob_fails() {
        let result = DocStore::load_all(Some("not json"));
        assert!(matches!(result, Err(StoreError::MalformedBlob(_))));
    }

    #[test]
    fn test_bad_entry_fails_whole_load() {
        let blob = r#"{"doc1":"!!! not base64 !!!"}"#;
        let result = DocStore::load_all(Some(blob));
        assert!(matches!(result, Err(StoreError::InvalidEncoding { .. })));
    }

    #[test]
    fn test_corrupt_entry_fails_whole_load() {
        // Valid base64, but not an Automerge document
        let blob = format!(r#"{{"doc1":"{}"}}"#, BASE64.encode(b"garbage"));
        let result = DocStore::load_all(Some(&blob));
        assert!(matches!(result, Err(StoreError::CorruptDocument { .. })));
    }

    #[test]
    fn test_get_or_init_does_not_insert() {
        let mut store = DocStore::new();
        let _fresh = store.get_or_init("doc1");
        assert!(!store.contains("doc1"));
        assert!(store.is_empty());
    }

    #[test]
    fn test_get_or_init_forks_stored_replica() {
        let mut store = DocStore::new();
        store.insert("doc1".to_string(), doc_with_title("stored"));

        let copy = store.get_or_init("doc1");
        assert_eq!(title_of(&copy), "stored");
    }
}
