//! Equality (hash) index.

use crate::traits::{indexed_value, key_set, IndexId, IndexOp, RowIndex, EQUALITY_OPS};
use hashbrown::HashMap;
use rivulet_core::{Key, KeySet, PropPath, Value};

/// Hash index mapping a field value to the set of row keys carrying it.
pub struct EqualityIndex {
    id: IndexId,
    path: PropPath,
    entries: HashMap<Value, KeySet>,
    len: usize,
}

impl EqualityIndex {
    /// Creates an empty equality index over `path`.
    pub fn new(id: IndexId, path: PropPath) -> Self {
        Self {
            id,
            path,
            entries: HashMap::new(),
            len: 0,
        }
    }
}

impl RowIndex for EqualityIndex {
    fn id(&self) -> IndexId {
        self.id
    }

    fn path(&self) -> &PropPath {
        &self.path
    }

    fn supported_ops(&self) -> &[IndexOp] {
        EQUALITY_OPS
    }

    fn build(&mut self, entries: &mut dyn Iterator<Item = (Key, Value)>) {
        self.entries.clear();
        self.len = 0;
        for (key, row) in entries {
            self.insert(&key, &row);
        }
    }

    fn insert(&mut self, key: &Key, row: &Value) {
        if let Some(value) = indexed_value(&self.path, row) {
            if self.entries.entry(value.clone()).or_default().insert(key.clone()) {
                self.len += 1;
            }
        }
    }

    fn remove(&mut self, key: &Key, row: &Value) {
        if let Some(value) = indexed_value(&self.path, row) {
            if let Some(keys) = self.entries.get_mut(value) {
                if keys.remove(key) {
                    self.len -= 1;
                }
                if keys.is_empty() {
                    self.entries.remove(value);
                }
            }
        }
    }

    fn lookup(&self, op: IndexOp, value: &Value) -> KeySet {
        match op {
            IndexOp::Eq => self.entries.get(value).cloned().unwrap_or_default(),
            IndexOp::In => match value.as_array() {
                Some(values) => self.lookup_in(values),
                None => self.lookup(IndexOp::Eq, value),
            },
            // Range ops are not answered by a hash index
            _ => key_set([]),
        }
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

    fn row(status: &str) -> Value {
        Value::object([("status", Value::from(status))])
    }

    fn index() -> EqualityIndex {
        let mut idx = EqualityIndex::new(1, PropPath::new(["status"]));
        idx.insert(&Key::Int(1), &row("active"));
        idx.insert(&Key::Int(2), &row("inactive"));
        idx.insert(&Key::Int(3), &row("active"));
        idx
    }

    #[test]
    fn test_eq_lookup() {
        let idx = index();
        let keys = idx.lookup(IndexOp::Eq, &Value::from("active"));
        assert_eq!(sorted_keys(&keys), vec![Key::Int(1), Key::Int(3)]);
        assert!(idx.lookup(IndexOp::Eq, &Value::from("archived")).is_empty());
        assert_eq!(idx.entry_count(), 3);
    }

    #[test]
    fn test_in_lookup() {
        let idx = index();
        let keys = idx.lookup_in(&[Value::from("active"), Value::from("inactive")]);
        assert_eq!(keys.len(), 3);
    }

    #[test]
    fn test_remove_and_update() {
        let mut idx = index();
        idx.remove(&Key::Int(1), &row("active"));
        let keys = idx.lookup(IndexOp::Eq, &Value::from("active"));
        assert_eq!(sorted_keys(&keys), vec![Key::Int(3)]);

        idx.update(&Key::Int(3), &row("active"), &row("inactive"));
        assert!(idx.lookup(IndexOp::Eq, &Value::from("active")).is_empty());
        assert_eq!(
            idx.lookup(IndexOp::Eq, &Value::from("inactive")).len(),
            2
        );
    }

    #[test]
    fn test_null_and_missing_not_indexed() {
        let mut idx = EqualityIndex::new(1, PropPath::new(["status"]));
        idx.insert(&Key::Int(1), &Value::object([("status", Value::Null)]));
        idx.insert(&Key::Int(2), &Value::object([("other", Value::Int(1))]));
        assert_eq!(idx.entry_count(), 0);
        assert!(idx.lookup(IndexOp::Eq, &Value::Null).is_empty());
    }

    #[test]
    fn test_range_ops_unanswered() {
        let idx = index();
        assert!(idx.lookup(IndexOp::Gt, &Value::from("a")).is_empty());
        assert!(!idx.supports(IndexOp::Gt));
        assert!(idx.supports(IndexOp::Eq));
    }
}
