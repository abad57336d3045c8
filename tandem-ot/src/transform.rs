//! Operational transformation of concurrent batches.
//!
//! `transform(a, b)` rewrites `a` so that it can be applied after `b`,
//! where `b` has already been committed. Every operation of `a` is folded
//! left to right through every operation of `b`; a pairwise step may
//! produce zero, one or two operations.
//!
//! ```text
//!            a  (client, base v)
//!   v ──────────────────────────► ?
//!   │                             ▲
//!   │ b (committed as v+1)        │ transform(a, b)
//!   ▼                             │
//!  v+1 ───────────────────────────┘
//! ```
//!
//! The committed side always wins ties: an insert at the same position as
//! an already-applied insert shifts right, never the other way round.

use crate::operation::{char_len, normalize, Operation};

/// Transform batch `ops` against the already-applied batch `applied`.
pub fn transform(ops: &[Operation], applied: &[Operation]) -> Vec<Operation> {
    let mut out = Vec::with_capacity(ops.len());

    for op in ops {
        let mut current = vec![op.clone()];
        for other in applied {
            current = current
                .iter()
                .flat_map(|o| transform_pair(o, other))
                .collect();
        }
        out.extend(current);
    }

    normalize(out)
}

/// Transform a single operation against a single applied operation.
pub fn transform_pair(op: &Operation, applied: &Operation) -> Vec<Operation> {
    match (op, applied) {
        (Operation::Insert { position, text }, Operation::Insert { position: other, text: other_text }) => {
            if *other <= *position {
                vec![Operation::insert(position.saturating_add(char_len(other_text)), text.clone())]
            } else {
                vec![op.clone()]
            }
        }

        (Operation::Insert { position, text }, Operation::Delete { position: other, count }) => {
            if *other < *position {
                // Clamp to the delete start when the insert point was inside the removed range.
                let shifted = position.saturating_sub(*count).max(*other);
                vec![Operation::insert(shifted, text.clone())]
            } else {
                vec![op.clone()]
            }
        }

        (Operation::Delete { position, count }, Operation::Insert { position: other, text }) => {
            let inserted = char_len(text);
            if *other <= *position {
                vec![Operation::delete(position.saturating_add(inserted), *count)]
            } else if *other < position.saturating_add(*count) {
                // Split around the inserted text so it survives.
                let head = other - position;
                vec![
                    Operation::delete(*position, head),
                    Operation::delete(position.saturating_add(inserted), count - head),
                ]
            } else {
                vec![op.clone()]
            }
        }

        (Operation::Delete { position, count }, Operation::Delete { position: other, count: other_count }) => {
            transform_delete_delete(*position, *count, *other, *other_count)
        }

        (Operation::Retain { .. }, _) | (_, Operation::Retain { .. }) => vec![op.clone()],
    }
}

fn transform_delete_delete(start: usize, count: usize, other_start: usize, other_count: usize) -> Vec<Operation> {
    // Ranges come from the wire; a saturated end reads as "to the end of the text".
    let end = start.saturating_add(count);
    let other_end = other_start.saturating_add(other_count);

    if other_start >= end {
        return vec![Operation::delete(start, count)];
    }
    if start >= other_end {
        return vec![Operation::delete(start.saturating_sub(other_count), count)];
    }

    // Overlap: keep only the part the applied delete did not already remove.
    let remaining = if start < other_start {
        if end <= other_end {
            Operation::delete(start, other_start - start)
        } else {
            Operation::delete(start, count.saturating_sub(other_count))
        }
    } else if end <= other_end {
        return Vec::new();
    } else {
        Operation::delete(other_start, end - other_end)
    };

    vec![remaining]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation::apply_operations;

    fn ins(p: usize, t: &str) -> Operation {
        Operation::insert(p, t)
    }

    fn del(p: usize, c: usize) -> Operation {
        Operation::delete(p, c)
    }

    #[test]
    fn test_insert_after_applied_insert_shifts() {
        assert_eq!(transform_pair(&ins(5, "b"), &ins(2, "xyz")), vec![ins(8, "b")]);
    }

    #[test]
    fn test_insert_tie_applied_wins() {
        assert_eq!(transform_pair(&ins(2, "b"), &ins(2, "a")), vec![ins(3, "b")]);
    }

    #[test]
    fn test_insert_before_applied_insert_unchanged() {
        assert_eq!(transform_pair(&ins(1, "b"), &ins(4, "a")), vec![ins(1, "b")]);
    }

    #[test]
    fn test_insert_shift_uses_code_points() {
        assert_eq!(transform_pair(&ins(1, "b"), &ins(0, "😀é")), vec![ins(3, "b")]);
    }

    #[test]
    fn test_insert_after_delete_shifts_left() {
        assert_eq!(transform_pair(&ins(6, "x"), &del(1, 3)), vec![ins(3, "x")]);
    }

    #[test]
    fn test_insert_inside_deleted_range_clamps_to_start() {
        assert_eq!(transform_pair(&ins(3, "x"), &del(1, 5)), vec![ins(1, "x")]);
    }

    #[test]
    fn test_insert_before_delete_unchanged() {
        assert_eq!(transform_pair(&ins(1, "x"), &del(1, 5)), vec![ins(1, "x")]);
    }

    #[test]
    fn test_delete_after_insert_shifts_right() {
        assert_eq!(transform_pair(&del(3, 2), &ins(1, "ab")), vec![del(5, 2)]);
    }

    #[test]
    fn test_delete_split_by_insert() {
        // Delete "bcde" from "abcdef", concurrently "X" inserted at 3.
        let ops = transform_pair(&del(1, 4), &ins(3, "X"));
        assert_eq!(ops, vec![del(1, 2), del(2, 2)]);
        assert_eq!(apply_operations("abcXdef", &ops), "aXf");
    }

    #[test]
    fn test_delete_before_insert_unchanged() {
        assert_eq!(transform_pair(&del(0, 2), &ins(2, "Z")), vec![del(0, 2)]);
    }

    #[test]
    fn test_delete_delete_disjoint() {
        assert_eq!(transform_pair(&del(0, 2), &del(5, 2)), vec![del(0, 2)]);
        assert_eq!(transform_pair(&del(6, 2), &del(1, 3)), vec![del(3, 2)]);
    }

    #[test]
    fn test_delete_delete_overlap_tail() {
        // ours [1,5), theirs [3,7) → keep [1,3)
        assert_eq!(transform_pair(&del(1, 4), &del(3, 4)), vec![del(1, 2)]);
    }

    #[test]
    fn test_delete_delete_overlap_head() {
        // ours [3,7), theirs [1,5) → keep [5,7) which now starts at 1
        assert_eq!(transform_pair(&del(3, 4), &del(1, 4)), vec![del(1, 2)]);
    }

    #[test]
    fn test_delete_delete_contains_other() {
        // ours [1,8), theirs [3,5) → 5 left at 1
        assert_eq!(transform_pair(&del(1, 7), &del(3, 2)), vec![del(1, 5)]);
    }

    #[test]
    fn test_delete_delete_fully_covered_is_dropped() {
        assert!(transform_pair(&del(2, 2), &del(1, 5)).is_empty());
        assert!(transform_pair(&del(2, 2), &del(2, 2)).is_empty());
    }

    #[test]
    fn test_retain_passes_through() {
        assert_eq!(transform_pair(&Operation::retain(4), &ins(0, "abc")), vec![Operation::retain(4)]);
        assert_eq!(transform_pair(&ins(2, "q"), &Operation::retain(9)), vec![ins(2, "q")]);
    }

    #[test]
    fn test_transform_folds_through_every_applied_op() {
        let applied = vec![ins(0, "aa"), ins(10, "b")];
        assert_eq!(transform(&[ins(4, "z")], &applied), vec![ins(6, "z")]);
    }

    #[test]
    fn test_transform_merges_result() {
        // Split deletes that become adjacent are not merged (different positions),
        // but a dropped fragment leaves no empty operation behind.
        let out = transform(&[del(2, 2), ins(0, "k")], &[del(1, 5)]);
        assert_eq!(out, vec![ins(0, "k")]);
    }

    #[test]
    fn test_huge_positions_and_counts_saturate() {
        let max = usize::MAX;
        assert_eq!(transform_pair(&ins(max, "y"), &ins(0, "x")), vec![ins(max, "y")]);
        assert_eq!(transform_pair(&del(max, 1), &ins(0, "ab")), vec![del(max, 1)]);
        assert_eq!(transform_pair(&del(1, max), &ins(3, "X")), vec![del(1, 2), del(2, max - 2)]);
        assert_eq!(transform_pair(&del(1, max), &del(0, 1)), vec![del(0, max)]);
        assert_eq!(transform_pair(&del(0, max), &del(2, max)), vec![del(0, 2)]);
        assert!(transform_pair(&del(3, max), &del(0, max)).is_empty());
        assert_eq!(transform_pair(&ins(4, "q"), &del(1, max)), vec![ins(1, "q")]);
    }

    #[test]
    fn test_concurrent_inserts_converge() {
        let base = "hello";
        let a = vec![ins(1, "A")];
        let b = vec![ins(4, "B")];

        let ab = apply_operations(&apply_operations(base, &a), &transform(&b, &a));
        let ba = apply_operations(&apply_operations(base, &b), &transform(&a, &b));
        assert_eq!(ab, ba);
        assert_eq!(ab, "hAellBo");
    }

    #[test]
    fn test_concurrent_insert_and_delete_converge() {
        let base = "abc";
        let a = vec![ins(1, "X")];
        let b = vec![del(0, 1)];

        let ab = apply_operations(&apply_operations(base, &a), &transform(&b, &a));
        let ba = apply_operations(&apply_operations(base, &b), &transform(&a, &b));
        assert_eq!(ab, "Xbc");
        assert_eq!(ba, "Xbc");
    }

    #[test]
    fn test_concurrent_overlapping_deletes_converge() {
        let base = "abcdefgh";
        let a = vec![del(1, 4)];
        let b = vec![del(3, 4)];

        let ab = apply_operations(&apply_operations(base, &a), &transform(&b, &a));
        let ba = apply_operations(&apply_operations(base, &b), &transform(&a, &b));
        assert_eq!(ab, ba);
        assert_eq!(ab, "ah");
    }
}
