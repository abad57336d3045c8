//! Registry of documents keyed by resource id.
//!
//! The registry map sits behind a read-write lock that is only held long
//! enough to find or insert a document handle. Each document has its own
//! mutex, so edits to one document never wait on reads of another.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::document::{Document, ResourceId, Snapshot, Submission};
use crate::error::OtError;
use crate::operation::Operation;

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Maximum retained revisions per document.
    pub history_limit: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self { history_limit: 1000 }
    }
}

/// Shared handle to one document.
pub type SharedDocument = Arc<Mutex<Document>>;

/// Result of a successful apply.
#[derive(Debug, Clone, PartialEq)]
pub struct Applied {
    pub resource_id: ResourceId,
    /// Version produced by this apply.
    pub version: u64,
    /// Operations as actually applied, for broadcast.
    pub operations: Vec<Operation>,
}

/// The transform engine.
pub struct Engine {
    config: EngineConfig,
    documents: RwLock<HashMap<ResourceId, SharedDocument>>,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            documents: RwLock::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Return the document for `id`, creating it at version 0 with `seed`
    /// if it does not exist yet. The seed is ignored for existing documents.
    pub fn get_or_create_document(&self, id: ResourceId, seed: &str) -> SharedDocument {
        if let Some(doc) = self.documents.read().get(&id) {
            return doc.clone();
        }

        let mut documents = self.documents.write();
        documents
            .entry(id)
            .or_insert_with(|| {
                log::debug!("Creating document {id}");
                Arc::new(Mutex::new(Document::new(id, seed, self.config.history_limit)))
            })
            .clone()
    }

    /// Look up an existing document.
    pub fn document(&self, id: ResourceId) -> Option<SharedDocument> {
        self.documents.read().get(&id).cloned()
    }

    pub fn contains(&self, id: ResourceId) -> bool {
        self.documents.read().contains_key(&id)
    }

    pub fn document_count(&self) -> usize {
        self.documents.read().len()
    }

    pub fn snapshot(&self, id: ResourceId) -> Result<Snapshot, OtError> {
        let doc = self.document(id).ok_or(OtError::DocumentNotFound(id))?;
        let snapshot = doc.lock().snapshot();
        Ok(snapshot)
    }

    /// Transform and apply a submission.
    ///
    /// The registry lock is released before the document lock is taken.
    pub fn apply(&self, submission: &Submission) -> Result<Applied, OtError> {
        let doc = self
            .document(submission.resource_id)
            .ok_or(OtError::DocumentNotFound(submission.resource_id))?;

        let mut doc = doc.lock();
        let operations = doc.apply(submission)?;

        log::trace!(
            "Applied {} op(s) from user {} to document {} (base {} -> v{})",
            operations.len(),
            submission.author,
            submission.resource_id,
            submission.base_version,
            doc.version()
        );

        Ok(Applied {
            resource_id: submission.resource_id,
            version: doc.version(),
            operations,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_or_create_is_idempotent() {
        let engine = Engine::default();
        let a = engine.get_or_create_document(1, "abc");
        let b = engine.get_or_create_document(1, "ignored");
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(b.lock().content(), "abc");
        assert_eq!(engine.document_count(), 1);
    }

    #[test]
    fn test_apply_unknown_document() {
        let engine = Engine::default();
        let err = engine
            .apply(&Submission::new(9, 1, 0, vec![Operation::insert(0, "x")]))
            .unwrap_err();
        assert_eq!(err, OtError::DocumentNotFound(9));
        assert!(!engine.contains(9));
    }

    #[test]
    fn test_snapshot_unknown_document() {
        let engine = Engine::default();
        assert_eq!(engine.snapshot(3), Err(OtError::DocumentNotFound(3)));
    }

    #[test]
    fn test_insert_then_stale_delete() {
        let engine = Engine::default();
        engine.get_or_create_document(1, "abc");

        let first = engine
            .apply(&Submission::new(1, 10, 0, vec![Operation::insert(1, "X")]))
            .unwrap();
        assert_eq!(first.version, 1);

        let second = engine
            .apply(&Submission::new(1, 20, 0, vec![Operation::delete(0, 1)]))
            .unwrap();
        assert_eq!(second.version, 2);
        assert_eq!(second.operations, vec![Operation::delete(0, 1)]);

        let snap = engine.snapshot(1).unwrap();
        assert_eq!(snap.content, "Xbc");
        assert_eq!(snap.version, 2);
    }

    #[test]
    fn test_history_limit_from_config() {
        let engine = Engine::new(EngineConfig { history_limit: 2 });
        engine.get_or_create_document(5, "");
        for v in 0..4 {
            engine
                .apply(&Submission::new(5, 1, v, vec![Operation::insert(0, "a")]))
                .unwrap();
        }
        let doc = engine.document(5).unwrap();
        assert_eq!(doc.lock().history_len(), 2);
        assert_eq!(doc.lock().version(), 4);
    }

    #[test]
    fn test_documents_are_independent() {
        let engine = Engine::default();
        engine.get_or_create_document(1, "one");
        engine.get_or_create_document(2, "two");
        engine
            .apply(&Submission::new(1, 1, 0, vec![Operation::delete(0, 3)]))
            .unwrap();
        assert_eq!(engine.snapshot(1).unwrap().content, "");
        assert_eq!(engine.snapshot(2).unwrap().content, "two");
        assert_eq!(engine.snapshot(2).unwrap().version, 0);
    }

    #[test]
    fn test_engine_is_shareable_across_threads() {
        let engine = Arc::new(Engine::default());
        engine.get_or_create_document(1, "");

        let handles: Vec<_> = (0..8u64)
            .map(|author| {
                let engine = engine.clone();
                std::thread::spawn(move || {
                    engine
                        .apply(&Submission::new(1, author, 0, vec![Operation::insert(0, "z")]))
                        .unwrap();
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let snap = engine.snapshot(1).unwrap();
        assert_eq!(snap.version, 8);
        assert_eq!(snap.content, "zzzzzzzz");
    }
}
