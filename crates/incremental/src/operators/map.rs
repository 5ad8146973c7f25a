//! Incremental map (projection) operator.

use crate::delta::DeltaBatch;
use rivulet_core::Value;

/// Applies a row projection to every delta, keeping keys and diffs.
pub fn map_deltas<F>(batch: DeltaBatch, f: F) -> DeltaBatch
where
    F: Fn(&Value) -> Value,
{
    batch
        .into_iter()
        .map(|d| {
            let row = f(&d.row);
            d.map_row(|_| row)
        })
        .collect()
}
