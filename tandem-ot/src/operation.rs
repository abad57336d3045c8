//! Edit primitives over plain text.
//!
//! An operation batch is applied sequentially: every operation's `position`
//! is a code-point offset into the content as left by the previous operation
//! of the same batch.
//!
//! ```text
//! "abc"  ──Insert(1,"X")──►  "aXbc"  ──Delete(0,1)──►  "Xbc"
//! ```
//!
//! Application never fails. Insert positions clamp to `[0, len]`; a delete
//! whose start is already past the end is skipped, and one whose end runs
//! past the end is clamped.

use serde::{Deserialize, Serialize};

/// A single edit primitive.
///
/// Wire shape: `{"type": "insert"|"delete"|"retain", "position"?, "text"?, "count"?}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Operation {
    /// Insert `text` before the code point at `position`.
    Insert {
        #[serde(default)]
        position: usize,
        text: String,
    },
    /// Remove `count` code points starting at `position`.
    Delete {
        #[serde(default)]
        position: usize,
        #[serde(default)]
        count: usize,
    },
    /// Cursor movement with no effect on content.
    Retain {
        #[serde(default)]
        count: usize,
    },
}

impl Operation {
    pub fn insert(position: usize, text: impl Into<String>) -> Self {
        Self::Insert {
            position,
            text: text.into(),
        }
    }

    pub fn delete(position: usize, count: usize) -> Self {
        Self::Delete { position, count }
    }

    pub fn retain(count: usize) -> Self {
        Self::Retain { count }
    }

    /// True when applying this operation cannot change any content.
    pub fn is_noop(&self) -> bool {
        match self {
            Self::Insert { text, .. } => text.is_empty(),
            Self::Delete { count, .. } => *count == 0,
            Self::Retain { .. } => true,
        }
    }

    /// Net change in content length (code points) if applied in range.
    pub fn len_delta(&self) -> isize {
        match self {
            Self::Insert { text, .. } => isize::try_from(char_len(text)).unwrap_or(isize::MAX),
            Self::Delete { count, .. } => 0isize.saturating_sub_unsigned(*count),
            Self::Retain { .. } => 0,
        }
    }
}

/// Length of `text` in code points.
#[inline]
pub fn char_len(text: &str) -> usize {
    text.chars().count()
}

/// Apply a batch to `content`, returning the new content.
pub fn apply_operations(content: &str, ops: &[Operation]) -> String {
    let mut chars: Vec<char> = content.chars().collect();

    for op in ops {
        match op {
            Operation::Insert { position, text } => {
                let at = (*position).min(chars.len());
                chars.splice(at..at, text.chars());
            }
            Operation::Delete { position, count } => {
                // Already removed by a concurrent delete.
                if *position >= chars.len() {
                    continue;
                }
                let end = position.saturating_add(*count).min(chars.len());
                chars.drain(*position..end);
            }
            Operation::Retain { .. } => {}
        }
    }

    chars.into_iter().collect()
}

/// Drop no-ops and merge adjacent operations of the same kind.
///
/// Merging keeps sequential semantics:
/// - `Insert(p, t)` followed by `Insert(p + |t|, u)` becomes `Insert(p, t + u)`
/// - `Delete(p, c)` followed by `Delete(p, d)` becomes `Delete(p, c + d)`
/// - consecutive retains sum their counts
///
/// Retains are dropped only when they are empty; a lone retain batch
/// stays a retain batch.
pub fn normalize(ops: Vec<Operation>) -> Vec<Operation> {
    let mut out: Vec<Operation> = Vec::with_capacity(ops.len());

    for op in ops {
        let empty = match &op {
            Operation::Retain { count } => *count == 0,
            other => other.is_noop(),
        };
        if empty {
            continue;
        }

        if let Some(last) = out.last_mut() {
            if merge_into(last, &op) {
                continue;
            }
        }

        out.push(op);
    }

    out
}

fn merge_into(last: &mut Operation, next: &Operation) -> bool {
    match (last, next) {
        (Operation::Insert { position, text }, Operation::Insert { position: at, text: more }) => {
            if position.saturating_add(char_len(text)) != *at {
                return false;
            }
            text.push_str(more);
            true
        }
        (Operation::Delete { position, count }, Operation::Delete { position: at, count: more }) => {
            if *position != *at {
                return false;
            }
            *count = count.saturating_add(*more);
            true
        }
        (Operation::Retain { count }, Operation::Retain { count: more }) => {
            *count = count.saturating_add(*more);
            true
        }
        _ => false,
    }
}

/// Compose two sequential batches into one.
///
/// `second` is expressed against the content produced by `first`, so
/// composition is concatenation followed by normalisation.
pub fn compose(first: &[Operation], second: &[Operation]) -> Vec<Operation> {
    let mut ops = Vec::with_capacity(first.len() + second.len());
    ops.extend_from_slice(first);
    ops.extend_from_slice(second);
    normalize(ops)
}
