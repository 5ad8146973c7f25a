//! Incremental distinct operator.
//!
//! Counts multiplicities of the post-select row value. A row value enters
//! the output when its count rises above zero and leaves when it returns
//! to zero; the output key is the first key that introduced the value.

use crate::delta::{DeltaBatch, RowDelta};
use hashbrown::HashMap;
use rivulet_core::{Key, Value};

/// Incremental distinct state.
#[derive(Default)]
pub struct DistinctState {
    counts: HashMap<Value, (i64, Key)>,
}

impl DistinctState {
    /// Creates empty distinct state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of distinct live values.
    pub fn distinct_count(&self) -> usize {
        self.counts.len()
    }

    /// Processes a batch, emitting only first-appearance inserts and
    /// last-disappearance deletes.
    pub fn push(&mut self, batch: DeltaBatch) -> DeltaBatch {
        let mut out = DeltaBatch::new();
        for delta in batch {
            if delta.is_noop() {
                continue;
            }
            let entry = self
                .counts
                .entry(delta.row.clone())
                .or_insert((0, delta.key.clone()));
            let before = entry.0;
            entry.0 += delta.diff as i64;
            let after = entry.0;
            let canonical = entry.1.clone();

            if before <= 0 && after > 0 {
                out.push(RowDelta::insert(canonical, delta.row.clone()));
            } else if before > 0 && after <= 0 {
                out.push(RowDelta::delete(canonical, delta.row.clone()));
            }
            if after == 0 {
                self.counts.remove(&delta.row);
            }
        }
        out
    }
}
