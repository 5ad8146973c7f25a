//! Index trait definitions.

use alloc::vec::Vec;
use rivulet_core::{Key, KeySet, PropPath, Value};

/// Identifier of an index within a registry.
pub type IndexId = u32;

/// Operations an index can answer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum IndexOp {
    Eq,
    Gt,
    Gte,
    Lt,
    Lte,
    In,
}

/// Kind of index to build.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum IndexKind {
    /// Hash index answering equality and membership probes.
    Equality,
    /// Sorted index additionally answering range probes.
    #[default]
    Ordered,
}

/// A single-field index over a collection's synced state.
///
/// The indexed expression is a row-relative field path; rows whose path is
/// missing or `Null` are not indexed, matching the comparison semantics
/// where `Null` never satisfies a predicate.
pub trait RowIndex {
    /// Returns the index id.
    fn id(&self) -> IndexId;

    /// Returns the indexed field path.
    fn path(&self) -> &PropPath;

    /// Returns the operations this index can answer.
    fn supported_ops(&self) -> &[IndexOp];

    /// Returns true if the index answers `op`.
    fn supports(&self, op: IndexOp) -> bool {
        self.supported_ops().contains(&op)
    }

    /// Builds the index from a full snapshot of entries.
    fn build(&mut self, entries: &mut dyn Iterator<Item = (Key, Value)>);

    /// Indexes a newly synced row.
    fn insert(&mut self, key: &Key, row: &Value);

    /// Removes a synced row from the index.
    fn remove(&mut self, key: &Key, row: &Value);

    /// Re-indexes a row after an update.
    fn update(&mut self, key: &Key, old: &Value, new: &Value) {
        self.remove(key, old);
        self.insert(key, new);
    }

    /// Looks up the keys matching `op value`.
    fn lookup(&self, op: IndexOp, value: &Value) -> KeySet;

    /// Looks up the keys matching any of `values` (the `in` probe).
    fn lookup_in(&self, values: &[Value]) -> KeySet {
        let mut out = KeySet::new();
        for v in values {
            out.extend(self.lookup(IndexOp::Eq, v));
        }
        out
    }

    /// Returns the number of indexed (key, value) pairs.
    fn entry_count(&self) -> usize;
}

/// Extracts the indexed value from a row, skipping null/missing.
pub(crate) fn indexed_value<'a>(path: &PropPath, row: &'a Value) -> Option<&'a Value> {
    let v = row.get_path(path.segments())?;
    if v.is_null() {
        None
    } else {
        Some(v)
    }
}

/// Helper for registries: all ops, in the order reported by ordered
/// indexes.
pub(crate) const ORDERED_OPS: &[IndexOp] = &[
    IndexOp::Eq,
    IndexOp::Gt,
    IndexOp::Gte,
    IndexOp::Lt,
    IndexOp::Lte,
    IndexOp::In,
];

/// Ops answered by equality indexes.
pub(crate) const EQUALITY_OPS: &[IndexOp] = &[IndexOp::Eq, IndexOp::In];

/// Collects keys into a `KeySet`.
pub(crate) fn key_set(keys: impl IntoIterator<Item = Key>) -> KeySet {
    keys.into_iter().collect()
}

/// Convenience for tests: a `Vec` of keys in set order.
pub fn sorted_keys(set: &KeySet) -> Vec<Key> {
    set.iter().cloned().collect()
}
