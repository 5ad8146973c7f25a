//! Per-collection index registry.
//!
//! Holds every index built for a collection and keeps them consistent with
//! the synced state: the collection feeds `(change, key, old, new)` into
//! `apply_change` on every committed sync write.

use crate::hash::EqualityIndex;
use crate::ordered::OrderedIndex;
use crate::traits::{IndexId, IndexKind, IndexOp, RowIndex};
use alloc::boxed::Box;
use alloc::vec::Vec;
use rivulet_core::{ChangeType, Key, KeySet, PropPath, Value};

/// Registry of single-field indexes for one collection.
pub struct IndexRegistry {
    indexes: Vec<Box<dyn RowIndex>>,
    next_id: IndexId,
    /// Probes answered since creation. Test hook for verifying that a
    /// query used an index rather than a full scan.
    probe_count: u64,
}

impl Default for IndexRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl IndexRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            indexes: Vec::new(),
            next_id: 1,
            probe_count: 0,
        }
    }

    /// Creates an index over `path`, building it from the given snapshot.
    /// Returns the existing id when an index of the same kind already
    /// covers the path.
    pub fn create_index(
        &mut self,
        path: PropPath,
        kind: IndexKind,
        snapshot: &mut dyn Iterator<Item = (Key, Value)>,
    ) -> IndexId {
        if let Some(existing) = self.find(&path, match kind {
            IndexKind::Equality => IndexOp::Eq,
            IndexKind::Ordered => IndexOp::Gt,
        }) {
            return existing.id();
        }
        let id = self.next_id;
        self.next_id += 1;
        let mut index: Box<dyn RowIndex> = match kind {
            IndexKind::Equality => Box::new(EqualityIndex::new(id, path)),
            IndexKind::Ordered => Box::new(OrderedIndex::new(id, path)),
        };
        index.build(snapshot);
        self.indexes.push(index);
        id
    }

    /// Returns the number of registered indexes.
    pub fn len(&self) -> usize {
        self.indexes.len()
    }

    /// Returns true if no indexes are registered.
    pub fn is_empty(&self) -> bool {
        self.indexes.is_empty()
    }

    /// Returns the index registered under `id`.
    pub fn get(&self, id: IndexId) -> Option<&dyn RowIndex> {
        self.indexes.iter().find(|i| i.id() == id).map(Box::as_ref)
    }

    /// Finds an index on exactly `path` that answers `op`.
    pub fn find(&self, path: &PropPath, op: IndexOp) -> Option<&dyn RowIndex> {
        self.indexes
            .iter()
            .find(|i| i.path() == path && i.supports(op))
            .map(Box::as_ref)
    }

    /// Returns true if some index on `path` answers `op`.
    pub fn covers(&self, path: &PropPath, op: IndexOp) -> bool {
        self.find(path, op).is_some()
    }

    /// Answers a probe against the index on `path`, counting it.
    pub fn probe(&mut self, path: &PropPath, op: IndexOp, value: &Value) -> Option<KeySet> {
        let result = self.find(path, op)?.lookup(op, value);
        self.probe_count += 1;
        Some(result)
    }

    /// Answers a probe by index id, counting it.
    pub fn probe_by_id(&mut self, id: IndexId, op: IndexOp, value: &Value) -> Option<KeySet> {
        let result = self.get(id)?.lookup(op, value);
        self.probe_count += 1;
        Some(result)
    }

    /// Returns the number of probes answered so far.
    pub fn probe_count(&self) -> u64 {
        self.probe_count
    }

    /// Maintains every index after a committed sync change.
    pub fn apply_change(
        &mut self,
        change: ChangeType,
        key: &Key,
        old: Option<&Value>,
        new: Option<&Value>,
    ) {
        for index in &mut self.indexes {
            match change {
                ChangeType::Insert => {
                    if let Some(row) = new {
                        index.insert(key, row);
                    }
                }
                ChangeType::Update => {
                    if let (Some(o), Some(n)) = (old, new) {
                        index.update(key, o, n);
                    }
                }
                ChangeType::Delete => {
                    if let Some(row) = old {
                        index.remove(key, row);
                    }
                }
            }
        }
    }

    /// Drops every index (sync truncate).
    pub fn clear_entries(&mut self) {
        for index in &mut self.indexes {
            index.build(&mut core::iter::empty());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;

    fn row(age: i64) -> Value {
        Value::object([("age", Value::Int(age))])
    }

    fn seeded() -> IndexRegistry {
        let mut reg = IndexRegistry::new();
        let rows = vec![
            (Key::Int(1), row(30)),
            (Key::Int(2), row(20)),
            (Key::Int(3), row(35)),
        ];
        reg.create_index(
            PropPath::new(["age"]),
            IndexKind::Ordered,
            &mut rows.into_iter(),
        );
        reg
    }

    #[test]
    fn test_create_index_builds_snapshot() {
        let mut reg = seeded();
        let keys = reg
            .probe(&PropPath::new(["age"]), IndexOp::Gt, &Value::Int(25))
            .unwrap();
        assert_eq!(keys.len(), 2);
        assert_eq!(reg.probe_count(), 1);
    }

    #[test]
    fn test_create_index_dedupes() {
        let mut reg = seeded();
        let id = reg.create_index(
            PropPath::new(["age"]),
            IndexKind::Ordered,
            &mut core::iter::empty(),
        );
        assert_eq!(id, 1);
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn test_apply_change_maintains_indexes() {
        let mut reg = seeded();

        reg.apply_change(ChangeType::Insert, &Key::Int(4), None, Some(&row(40)));
        reg.apply_change(ChangeType::Update, &Key::Int(2), Some(&row(20)), Some(&row(50)));
        reg.apply_change(ChangeType::Delete, &Key::Int(1), Some(&row(30)), None);

        let keys = reg
            .probe(&PropPath::new(["age"]), IndexOp::Gte, &Value::Int(40))
            .unwrap();
        assert_eq!(keys.len(), 2); // keys 4 and 2
        let lt = reg
            .probe(&PropPath::new(["age"]), IndexOp::Lt, &Value::Int(40))
            .unwrap();
        assert_eq!(lt.len(), 1); // key 3
    }

    #[test]
    fn test_find_respects_ops() {
        let mut reg = IndexRegistry::new();
        reg.create_index(
            PropPath::new(["status"]),
            IndexKind::Equality,
            &mut core::iter::empty(),
        );
        assert!(reg.covers(&PropPath::new(["status"]), IndexOp::Eq));
        assert!(!reg.covers(&PropPath::new(["status"]), IndexOp::Gt));
        assert!(!reg.covers(&PropPath::new(["other"]), IndexOp::Eq));
    }

    #[test]
    fn test_missing_probe_is_none() {
        let mut reg = IndexRegistry::new();
        assert!(reg
            .probe(&PropPath::new(["age"]), IndexOp::Eq, &Value::Int(1))
            .is_none());
        assert_eq!(reg.probe_count(), 0);
    }

    #[test]
    fn test_clear_entries() {
        let mut reg = seeded();
        reg.clear_entries();
        let keys = reg
            .probe(&PropPath::new(["age"]), IndexOp::Gt, &Value::Int(0))
            .unwrap();
        assert!(keys.is_empty());
    }
}
