//! Keyed multiset deltas.
//!
//! Every change flowing through a pipeline is a `RowDelta`: a keyed row
//! with a diff indicating insertion (+1) or deletion (-1). Updates travel
//! as a retraction plus an insertion for the same key.

use alloc::vec::Vec;
use rivulet_core::{Key, Value};

/// A differential change to a keyed row.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RowDelta {
    /// Row key (scalar for base rows, composite for join/group outputs)
    pub key: Key,
    /// The row value
    pub row: Value,
    /// The differential: +1 for insert, -1 for delete
    pub diff: i32,
}

impl RowDelta {
    /// Creates a delta with the given diff.
    #[inline]
    pub fn new(key: Key, row: Value, diff: i32) -> Self {
        Self { key, row, diff }
    }

    /// Creates an insertion delta (+1).
    #[inline]
    pub fn insert(key: Key, row: Value) -> Self {
        Self::new(key, row, 1)
    }

    /// Creates a deletion delta (-1).
    #[inline]
    pub fn delete(key: Key, row: Value) -> Self {
        Self::new(key, row, -1)
    }

    /// Returns true if this is an insertion (diff > 0).
    #[inline]
    pub fn is_insert(&self) -> bool {
        self.diff > 0
    }

    /// Returns true if this is a deletion (diff < 0).
    #[inline]
    pub fn is_delete(&self) -> bool {
        self.diff < 0
    }

    /// Returns true if this delta has no effect (diff == 0).
    #[inline]
    pub fn is_noop(&self) -> bool {
        self.diff == 0
    }

    /// Replaces the row, keeping key and diff.
    #[inline]
    pub fn map_row<F>(self, f: F) -> RowDelta
    where
        F: FnOnce(Value) -> Value,
    {
        RowDelta {
            key: self.key,
            row: f(self.row),
            diff: self.diff,
        }
    }

    /// Returns a negated copy (insert becomes delete and vice versa).
    #[inline]
    pub fn negated(&self) -> Self {
        Self {
            key: self.key.clone(),
            row: self.row.clone(),
            diff: -self.diff,
        }
    }
}

/// A batch of deltas, processed as one unit.
pub type DeltaBatch = Vec<RowDelta>;

/// Extension trait for delta batches.
pub trait DeltaBatchExt {
    /// Filters out no-op deltas (diff == 0).
    fn compact(self) -> Self;

    /// Returns the net effect count (sum of all diffs).
    fn net_count(&self) -> i64;
}

impl DeltaBatchExt for DeltaBatch {
    fn compact(self) -> Self {
        self.into_iter().filter(|d| d.diff != 0).collect()
    }

    fn net_count(&self) -> i64 {
        self.iter().map(|d| d.diff as i64).sum()
    }
}
