//! Authoritative document state with a bounded revision log.
//!
//! ```text
//!   base_content ──rev(b+1)──► … ──rev(version)──► content
//!   └── version b ──┘                              └── version ──┘
//!                    history (oldest evicted first)
//! ```
//!
//! When the oldest revision is evicted it is folded into `base_content`, so
//! replaying the retained history on top of `base_content` reproduces
//! `content` at every version. With no eviction yet, `base_content` is the
//! seed and `version == history.len()`.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::OtError;
use crate::operation::{apply_operations, normalize, Operation};
use crate::transform::transform;

/// Identifier of an editable resource (e.g. a file id).
pub type ResourceId = u64;

/// Identifier of the user who authored a revision.
pub type AuthorId = u64;

/// Immutable record of one committed batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Revision {
    /// Version produced by this revision.
    pub version: u64,
    pub author: AuthorId,
    /// Operations as actually applied (post-transformation).
    pub operations: Vec<Operation>,
    pub timestamp: DateTime<Utc>,
}

/// A client's proposed edit.
#[derive(Debug, Clone, PartialEq)]
pub struct Submission {
    pub resource_id: ResourceId,
    pub author: AuthorId,
    /// Document version the client last observed.
    pub base_version: u64,
    pub operations: Vec<Operation>,
}

impl Submission {
    pub fn new(resource_id: ResourceId, author: AuthorId, base_version: u64, operations: Vec<Operation>) -> Self {
        Self {
            resource_id,
            author,
            base_version,
            operations,
        }
    }
}

/// Point-in-time view of a document, as sent in `sync_response`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub resource_id: ResourceId,
    pub content: String,
    pub version: u64,
}

/// One logical document.
#[derive(Debug, Clone)]
pub struct Document {
    id: ResourceId,
    content: String,
    version: u64,
    history: VecDeque<Revision>,
    /// Content at version `version - history.len()`.
    base_content: String,
    history_limit: usize,
}

impl Document {
    /// Create a document at version 0 with the given seed content.
    pub fn new(id: ResourceId, seed: impl Into<String>, history_limit: usize) -> Self {
        let seed = seed.into();
        Self {
            id,
            base_content: seed.clone(),
            content: seed,
            version: 0,
            history: VecDeque::new(),
            history_limit: history_limit.max(1),
        }
    }

    pub fn id(&self) -> ResourceId {
        self.id
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    /// Retained revisions, oldest first.
    pub fn history(&self) -> impl Iterator<Item = &Revision> {
        self.history.iter()
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    /// Oldest base version a submission may still be transformed from.
    pub fn oldest_base(&self) -> u64 {
        self.version - self.history.len() as u64
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            resource_id: self.id,
            content: self.content.clone(),
            version: self.version,
        }
    }

    /// Rebuild the content by replaying the retained history.
    pub fn replay(&self) -> String {
        self.history
            .iter()
            .fold(self.base_content.clone(), |content, rev| apply_operations(&content, &rev.operations))
    }

    /// Revisions committed after `base`, in commit order.
    fn revisions_since(&self, base: u64) -> Result<impl Iterator<Item = &Revision>, OtError> {
        if base > self.version {
            return Err(OtError::FutureBaseVersion {
                base,
                current: self.version,
            });
        }
        let oldest = self.oldest_base();
        if base < oldest {
            return Err(OtError::HistoryEvicted { base, oldest });
        }
        let skip = (base - oldest) as usize;
        Ok(self.history.iter().skip(skip))
    }

    /// Transform `submission` against everything it did not see, apply it,
    /// and append the revision. Returns the operations actually applied.
    ///
    /// Nothing is mutated unless the whole step succeeds.
    pub fn apply(&mut self, submission: &Submission) -> Result<Vec<Operation>, OtError> {
        let mut ops = normalize(submission.operations.clone());
        for rev in self.revisions_since(submission.base_version)? {
            ops = transform(&ops, &rev.operations);
        }

        let content = apply_operations(&self.content, &ops);

        self.version += 1;
        self.content = content;
        self.history.push_back(Revision {
            version: self.version,
            author: submission.author,
            operations: ops.clone(),
            timestamp: Utc::now(),
        });
        self.evict();

        Ok(ops)
    }

    fn evict(&mut self) {
        while self.history.len() > self.history_limit {
            if let Some(oldest) = self.history.pop_front() {
                self.base_content = apply_operations(&self.base_content, &oldest.operations);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn submit(base: u64, ops: Vec<Operation>) -> Submission {
        Submission::new(1, 7, base, ops)
    }

    #[test]
    fn test_new_document_is_version_zero() {
        let doc = Document::new(1, "seed", 10);
        assert_eq!(doc.version(), 0);
        assert_eq!(doc.content(), "seed");
        assert_eq!(doc.history_len(), 0);
    }

    #[test]
    fn test_apply_at_current_version() {
        let mut doc = Document::new(1, "abc", 10);
        let applied = doc.apply(&submit(0, vec![Operation::insert(1, "X")])).unwrap();
        assert_eq!(applied, vec![Operation::insert(1, "X")]);
        assert_eq!(doc.content(), "aXbc");
        assert_eq!(doc.version(), 1);
        assert_eq!(doc.history().next().unwrap().version, 1);
        assert_eq!(doc.history().next().unwrap().author, 7);
    }

    #[test]
    fn test_stale_submission_is_transformed() {
        let mut doc = Document::new(1, "abc", 10);
        doc.apply(&submit(0, vec![Operation::insert(1, "X")])).unwrap();
        let applied = doc.apply(&submit(0, vec![Operation::delete(0, 1)])).unwrap();
        assert_eq!(applied, vec![Operation::delete(0, 1)]);
        assert_eq!(doc.content(), "Xbc");
        assert_eq!(doc.version(), 2);
    }

    #[test]
    fn test_stale_insert_shifts_past_committed_inserts() {
        let mut doc = Document::new(1, "", 10);
        doc.apply(&submit(0, vec![Operation::insert(0, "ab")])).unwrap();
        doc.apply(&submit(1, vec![Operation::insert(2, "cd")])).unwrap();
        let applied = doc.apply(&submit(0, vec![Operation::insert(0, "Z")])).unwrap();
        assert_eq!(applied, vec![Operation::insert(4, "Z")]);
        assert_eq!(doc.content(), "abcdZ");
    }

    #[test]
    fn test_empty_batch_still_bumps_version() {
        let mut doc = Document::new(1, "abc", 10);
        let applied = doc.apply(&submit(0, Vec::new())).unwrap();
        assert!(applied.is_empty());
        assert_eq!(doc.version(), 1);
        assert_eq!(doc.content(), "abc");
    }

    #[test]
    fn test_future_base_version_rejected_without_mutation() {
        let mut doc = Document::new(1, "abc", 10);
        let err = doc.apply(&submit(3, vec![Operation::insert(0, "X")])).unwrap_err();
        assert_eq!(err, OtError::FutureBaseVersion { base: 3, current: 0 });
        assert_eq!(doc.version(), 0);
        assert_eq!(doc.content(), "abc");
        assert_eq!(doc.history_len(), 0);
    }

    #[test]
    fn test_history_bounded_and_replay_holds() {
        let mut doc = Document::new(1, "", 3);
        for i in 0..10u64 {
            doc.apply(&submit(i, vec![Operation::insert(i as usize, "x")])).unwrap();
        }
        assert_eq!(doc.version(), 10);
        assert_eq!(doc.history_len(), 3);
        assert_eq!(doc.oldest_base(), 7);
        assert_eq!(doc.content(), "xxxxxxxxxx");
        assert_eq!(doc.replay(), doc.content());
    }

    #[test]
    fn test_evicted_base_rejected_without_mutation() {
        let mut doc = Document::new(1, "", 2);
        for i in 0..5u64 {
            doc.apply(&submit(i, vec![Operation::insert(0, "a")])).unwrap();
        }
        let before = doc.snapshot();
        let err = doc.apply(&submit(1, vec![Operation::insert(0, "b")])).unwrap_err();
        assert_eq!(err, OtError::HistoryEvicted { base: 1, oldest: 3 });
        assert_eq!(doc.snapshot(), before);
    }

    #[test]
    fn test_stale_edits_with_huge_ranges_are_clamped() {
        let mut doc = Document::new(1, "abcdef", 10);
        doc.apply(&submit(0, vec![Operation::delete(0, 1)])).unwrap();
        let applied = doc.apply(&submit(0, vec![Operation::delete(1, usize::MAX)])).unwrap();
        assert_eq!(applied, vec![Operation::delete(0, usize::MAX)]);
        assert_eq!(doc.content(), "");

        doc.apply(&submit(2, vec![Operation::insert(0, "xy")])).unwrap();
        doc.apply(&submit(2, vec![Operation::insert(usize::MAX, "z")])).unwrap();
        assert_eq!(doc.content(), "xyz");
        assert_eq!(doc.version(), 4);
        assert_eq!(doc.replay(), doc.content());
    }

    #[test]
    fn test_snapshot_wire_shape() {
        let doc = Document::new(42, "hi", 4);
        let json = serde_json::to_value(doc.snapshot()).unwrap();
        assert_eq!(json["resourceId"], 42);
        assert_eq!(json["content"], "hi");
        assert_eq!(json["version"], 0);
    }
}
