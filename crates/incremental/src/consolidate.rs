//! Delta consolidation.
//!
//! Coalesces `+1`/`-1` pairs for the same `(key, row)` so that downstream
//! subscribers never see a change that nets out to nothing within one
//! batch.

use crate::delta::{DeltaBatch, RowDelta};
use alloc::vec::Vec;
use hashbrown::HashMap;
use rivulet_core::{Key, Value};

/// Consolidates a batch: one delta per `(key, row)` with the net diff,
/// zero-diff entries dropped. First-occurrence order is preserved so the
/// pipeline stays deterministic.
pub fn consolidate(batch: DeltaBatch) -> DeltaBatch {
    let mut order: Vec<(Key, Value)> = Vec::new();
    let mut net: HashMap<(Key, Value), i32> = HashMap::new();

    for delta in batch {
        let slot = (delta.key, delta.row);
        match net.get_mut(&slot) {
            Some(diff) => *diff += delta.diff,
            None => {
                net.insert(slot.clone(), delta.diff);
                order.push(slot);
            }
        }
    }

    order
        .into_iter()
        .filter_map(|slot| {
            let diff = net[&slot];
            if diff == 0 {
                None
            } else {
                Some(RowDelta::new(slot.0, slot.1, diff))
            }
        })
        .collect()
}

/// Collapses a batch into per-key net changes: for each key the last
/// surviving row with its net sign. Used when a batch may carry several
/// rewrites of the same key (e.g. retraction plus insertion forming an
/// update).
pub fn per_key_net(batch: &DeltaBatch) -> Vec<(Key, Option<Value>, Option<Value>)> {
    // key -> (first removed row, last added row)
    let mut order: Vec<Key> = Vec::new();
    let mut state: HashMap<Key, (Option<Value>, Option<Value>)> = HashMap::new();

    for delta in batch {
        let entry = match state.entry(delta.key.clone()) {
            hashbrown::hash_map::Entry::Occupied(e) => e.into_mut(),
            hashbrown::hash_map::Entry::Vacant(v) => {
                order.push(delta.key.clone());
                v.insert((None, None))
            }
        };
        if delta.is_delete() {
            if entry.1.as_ref() == Some(&delta.row) {
                // Retraction of a row added earlier in the same batch
                entry.1 = None;
            } else if entry.0.is_none() {
                entry.0 = Some(delta.row.clone());
            }
        } else if delta.is_insert() {
            entry.1 = Some(delta.row.clone());
        }
    }

    order
        .into_iter()
        .filter_map(|key| {
            let (removed, added) = state.remove(&key)?;
            if removed.is_none() && added.is_none() {
                None
            } else {
                Some((key, removed, added))
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;

    fn d(key: i64, row: i64, diff: i32) -> RowDelta {
        RowDelta::new(Key::Int(key), Value::Int(row), diff)
    }

    #[test]
    fn test_consolidate_cancels_pairs() {
        let out = consolidate(vec![d(1, 10, 1), d(1, 10, -1), d(2, 20, 1)]);
        assert_eq!(out, vec![d(2, 20, 1)]);
    }

    #[test]
    fn test_consolidate_sums_diffs() {
        let out = consolidate(vec![d(1, 10, 1), d(1, 10, 1), d(1, 10, -1)]);
        assert_eq!(out, vec![d(1, 10, 1)]);
    }

    #[test]
    fn test_consolidate_keeps_first_seen_order() {
        let out = consolidate(vec![d(2, 20, 1), d(1, 10, 1), d(2, 20, 1)]);
        assert_eq!(out[0].key, Key::Int(2));
        assert_eq!(out[0].diff, 2);
        assert_eq!(out[1].key, Key::Int(1));
    }

    #[test]
    fn test_consolidate_distinguishes_rows() {
        // Same key, different rows: an update travels as two deltas
        let out = consolidate(vec![d(1, 10, -1), d(1, 11, 1)]);
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn test_per_key_net_update() {
        let net = per_key_net(&vec![d(1, 10, -1), d(1, 11, 1)]);
        assert_eq!(
            net,
            vec![(Key::Int(1), Some(Value::Int(10)), Some(Value::Int(11)))]
        );
    }

    #[test]
    fn test_per_key_net_insert_then_retract() {
        let net = per_key_net(&vec![d(1, 10, 1), d(1, 10, -1)]);
        assert!(net.is_empty());
    }

    #[test]
    fn test_per_key_net_plain_ops() {
        let net = per_key_net(&vec![d(1, 10, 1), d(2, 20, -1)]);
        assert_eq!(net[0], (Key::Int(1), None, Some(Value::Int(10))));
        assert_eq!(net[1], (Key::Int(2), Some(Value::Int(20)), None));
    }
}
