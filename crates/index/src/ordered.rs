//! Ordered (sorted) index.

use crate::sorted::{KeyRange, NaturalOrder, SortedMap};
use crate::traits::{indexed_value, IndexId, IndexOp, RowIndex, ORDERED_OPS};
use rivulet_core::{Key, KeySet, PropPath, Value};

/// Sorted index mapping field values to row-key sets, answering both
/// point and range probes.
pub struct OrderedIndex {
    id: IndexId,
    path: PropPath,
    entries: SortedMap<Value, KeySet, NaturalOrder>,
    len: usize,
}

impl OrderedIndex {
    /// Creates an empty ordered index over `path`.
    pub fn new(id: IndexId, path: PropPath) -> Self {
        Self {
            id,
            path,
            entries: SortedMap::new(),
            len: 0,
        }
    }

    fn collect_range(&self, range: &KeyRange<Value>) -> KeySet {
        let mut out = KeySet::new();
        for (_, keys) in self.entries.range(range) {
            out.extend(keys.iter().cloned());
        }
        out
    }
}

impl RowIndex for OrderedIndex {
    fn id(&self) -> IndexId {
        self.id
    }

    fn path(&self) -> &PropPath {
        &self.path
    }

    fn supported_ops(&self) -> &[IndexOp] {
        ORDERED_OPS
    }

    fn build(&mut self, entries: &mut dyn Iterator<Item = (Key, Value)>) {
        self.entries = SortedMap::new();
        self.len = 0;
        for (key, row) in entries {
            self.insert(&key, &row);
        }
    }

    fn insert(&mut self, key: &Key, row: &Value) {
        if let Some(value) = indexed_value(&self.path, row) {
            match self.entries.get_mut(value) {
                Some(keys) => {
                    if keys.insert(key.clone()) {
                        self.len += 1;
                    }
                }
                None => {
                    let mut keys = KeySet::new();
                    keys.insert(key.clone());
                    self.entries.insert(value.clone(), keys);
                    self.len += 1;
                }
            }
        }
    }

    fn remove(&mut self, key: &Key, row: &Value) {
        if let Some(value) = indexed_value(&self.path, row) {
            let mut now_empty = false;
            if let Some(keys) = self.entries.get_mut(value) {
                if keys.remove(key) {
                    self.len -= 1;
                }
                now_empty = keys.is_empty();
            }
            if now_empty {
                self.entries.remove(value);
            }
        }
    }

    fn lookup(&self, op: IndexOp, value: &Value) -> KeySet {
        let range = match op {
            IndexOp::Eq => KeyRange::only(value.clone()),
            IndexOp::Gt => KeyRange::lower_bound(value.clone(), true),
            IndexOp::Gte => KeyRange::lower_bound(value.clone(), false),
            IndexOp::Lt => KeyRange::upper_bound(value.clone(), true),
            IndexOp::Lte => KeyRange::upper_bound(value.clone(), false),
            IndexOp::In => {
                return match value.as_array() {
                    Some(values) => self.lookup_in(values),
                    None => self.lookup(IndexOp::Eq, value),
                }
            }
        };
        self.collect_range(&range)
    }

    fn entry_count(&self) -> usize {
        self.len
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::sorted_keys;
    use alloc::vec;

    fn row(age: i64) -> Value {
        Value::object([("age", Value::Int(age))])
    }

    fn index() -> OrderedIndex {
        let mut idx = OrderedIndex::new(1, PropPath::new(["age"]));
        idx.insert(&Key::Int(1), &row(30));
        idx.insert(&Key::Int(2), &row(20));
        idx.insert(&Key::Int(3), &row(35));
        idx.insert(&Key::Int(4), &row(20));
        idx
    }

    #[test]
    fn test_point_lookup() {
        let idx = index();
        let keys = idx.lookup(IndexOp::Eq, &Value::Int(20));
        assert_eq!(sorted_keys(&keys), vec![Key::Int(2), Key::Int(4)]);
    }

    #[test]
    fn test_range_lookups() {
        let idx = index();
        let gt = idx.lookup(IndexOp::Gt, &Value::Int(20));
        assert_eq!(sorted_keys(&gt), vec![Key::Int(1), Key::Int(3)]);

        let gte = idx.lookup(IndexOp::Gte, &Value::Int(20));
        assert_eq!(gte.len(), 4);

        let lt = idx.lookup(IndexOp::Lt, &Value::Int(30));
        assert_eq!(sorted_keys(&lt), vec![Key::Int(2), Key::Int(4)]);

        let lte = idx.lookup(IndexOp::Lte, &Value::Int(30));
        assert_eq!(lte.len(), 3);
    }

    #[test]
    fn test_in_lookup() {
        let idx = index();
        let keys = idx.lookup(
            IndexOp::In,
            &Value::array([Value::Int(30), Value::Int(35)]),
        );
        assert_eq!(sorted_keys(&keys), vec![Key::Int(1), Key::Int(3)]);
    }

    #[test]
    fn test_update_moves_key() {
        let mut idx = index();
        idx.update(&Key::Int(2), &row(20), &row(40));
        let keys = idx.lookup(IndexOp::Gt, &Value::Int(35));
        assert_eq!(sorted_keys(&keys), vec![Key::Int(2)]);
        assert_eq!(idx.entry_count(), 4);
    }

    #[test]
    fn test_build_from_snapshot() {
        let mut idx = OrderedIndex::new(1, PropPath::new(["age"]));
        let rows = vec![(Key::Int(1), row(10)), (Key::Int(2), row(5))];
        idx.build(&mut rows.into_iter());
        assert_eq!(idx.entry_count(), 2);
        let keys = idx.lookup(IndexOp::Lt, &Value::Int(10));
        assert_eq!(sorted_keys(&keys), vec![Key::Int(2)]);
    }

    #[test]
    fn test_cross_numeric_probe() {
        let idx = index();
        // Float probes hit integer entries
        let keys = idx.lookup(IndexOp::Eq, &Value::Float(20.0));
        assert_eq!(keys.len(), 2);
        let gt = idx.lookup(IndexOp::Gt, &Value::Float(29.5));
        assert_eq!(sorted_keys(&gt), vec![Key::Int(1), Key::Int(3)]);
    }
}
