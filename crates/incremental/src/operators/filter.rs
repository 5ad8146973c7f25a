//! Incremental filter operator.

use crate::delta::DeltaBatch;
use rivulet_core::Value;

/// Drops deltas whose row does not satisfy the predicate.
///
/// Filtering is stateless in the delta model: an update to a row that
/// leaves the predicate arrives as a retraction (old row, matching) plus
/// an insertion (new row, not matching), so the insertion is simply
/// dropped and downstream sees a net delete.
pub fn filter_deltas<F>(batch: DeltaBatch, pred: F) -> DeltaBatch
where
    F: Fn(&Value) -> bool,
{
    batch.into_iter().filter(|d| pred(&d.row)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delta::RowDelta;
    use alloc::vec;
    use rivulet_core::Key;

    fn row(age: i64) -> Value {
        Value::object([("age", Value::Int(age))])
    }

    #[test]
    fn test_filter_drops_nonmatching() {
        let batch = vec![
            RowDelta::insert(Key::Int(1), row(30)),
            RowDelta::insert(Key::Int(2), row(20)),
        ];
        let out = filter_deltas(batch, |r| {
            r.field("age").and_then(Value::as_int).unwrap_or(0) > 25
        });
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].key, Key::Int(1));
    }

    #[test]
    fn test_filter_straddling_update() {
        // age 30 -> 20 leaves the predicate: retraction passes, insert drops
        let batch = vec![
            RowDelta::delete(Key::Int(1), row(30)),
            RowDelta::insert(Key::Int(1), row(20)),
        ];
        let out = filter_deltas(batch, |r| {
            r.field("age").and_then(Value::as_int).unwrap_or(0) > 25
        });
        assert_eq!(out.len(), 1);
        assert!(out[0].is_delete());
    }
}
