//! Change events delivered to subscribers.

use crate::key::Key;
use crate::value::Value;
use alloc::vec::Vec;

/// The kind of a row state transition.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChangeType {
    Insert,
    Update,
    Delete,
}

/// A single row state transition.
///
/// `previous` is populated for updates and deletes so that subscribers can
/// reconcile without a second lookup.
#[derive(Clone, Debug, PartialEq)]
pub struct RowChange {
    pub change_type: ChangeType,
    pub key: Key,
    pub value: Value,
    pub previous: Option<Value>,
}

impl RowChange {
    /// Creates an insert change.
    pub fn insert(key: Key, value: Value) -> Self {
        Self {
            change_type: ChangeType::Insert,
            key,
            value,
            previous: None,
        }
    }

    /// Creates an update change.
    pub fn update(key: Key, value: Value, previous: Value) -> Self {
        Self {
            change_type: ChangeType::Update,
            key,
            value,
            previous: Some(previous),
        }
    }

    /// Creates a delete change. `value` is the last visible row value.
    pub fn delete(key: Key, value: Value) -> Self {
        Self {
            change_type: ChangeType::Delete,
            key,
            value: value.clone(),
            previous: Some(value),
        }
    }
}

/// A batch of row changes delivered to a subscriber in one call.
pub type ChangeBatch = Vec<RowChange>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_change_constructors() {
        let ins = RowChange::insert(Key::Int(1), Value::Int(10));
        assert_eq!(ins.change_type, ChangeType::Insert);
        assert!(ins.previous.is_none());

        let upd = RowChange::update(Key::Int(1), Value::Int(20), Value::Int(10));
        assert_eq!(upd.change_type, ChangeType::Update);
        assert_eq!(upd.previous, Some(Value::Int(10)));

        let del = RowChange::delete(Key::Int(1), Value::Int(20));
        assert_eq!(del.change_type, ChangeType::Delete);
        assert_eq!(del.previous, Some(Value::Int(20)));
        assert_eq!(del.value, Value::Int(20));
    }
}
