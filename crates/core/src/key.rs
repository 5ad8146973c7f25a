//! Row key type.
//!
//! Collection rows are keyed by a string or integer extracted by the
//! collection's key function. Derived pipelines produce composite keys
//! (join pairs, group-by keys); `Key::Null` is the sentinel used for the
//! synthesized side of an outer join.

use crate::error::{Error, Result};
use crate::value::Value;
use alloc::boxed::Box;
use alloc::string::String;
use alloc::vec::Vec;

/// A row key.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Key {
    /// Sentinel for the absent side of an outer join
    Null,
    /// Integer key
    Int(i64),
    /// String key
    Str(String),
    /// Composite key (join pair, group key)
    Composite(Vec<Key>),
}

impl Key {
    /// Builds a composite key from parts.
    pub fn composite(parts: impl IntoIterator<Item = Key>) -> Self {
        Key::Composite(parts.into_iter().collect())
    }

    /// Builds the key pair emitted by join operators.
    pub fn pair(left: Key, right: Key) -> Self {
        Key::Composite(alloc::vec![left, right])
    }

    /// Extracts a row key from a value produced by a key function.
    ///
    /// Only strings and integers are valid row keys; everything else is an
    /// `UndefinedKey` error.
    pub fn from_row_value(value: &Value) -> Result<Self> {
        match value {
            Value::Int(i) => Ok(Key::Int(*i)),
            Value::Str(s) => Ok(Key::Str(s.clone())),
            _ => Err(Error::undefined_key()),
        }
    }

    /// Derives a grouping key from a list of evaluated expressions.
    ///
    /// Unlike row keys, group keys may be built from any value; non-key
    /// values are folded through their canonical display form.
    pub fn from_group_values(values: &[Value]) -> Self {
        let parts = values
            .iter()
            .map(|v| match v {
                Value::Null => Key::Null,
                Value::Int(i) => Key::Int(*i),
                Value::Str(s) => Key::Str(s.clone()),
                other => Key::Str(other.to_display_string()),
            })
            .collect();
        Key::Composite(parts)
    }

    /// Returns this key as a value (for exposing keys in result rows).
    pub fn to_value(&self) -> Value {
        match self {
            Key::Null => Value::Null,
            Key::Int(i) => Value::Int(*i),
            Key::Str(s) => Value::Str(s.clone()),
            Key::Composite(parts) => Value::Array(parts.iter().map(Key::to_value).collect()),
        }
    }
}

impl From<i64> for Key {
    fn from(v: i64) -> Self {
        Key::Int(v)
    }
}

impl From<&str> for Key {
    fn from(v: &str) -> Self {
        Key::Str(v.into())
    }
}

impl From<String> for Key {
    fn from(v: String) -> Self {
        Key::Str(v)
    }
}

/// A set of row keys, as returned by index lookups.
///
/// Ordered so that probe results are deterministic.
pub type KeySet = alloc::collections::BTreeSet<Key>;

/// Boxed key-extraction function used by collections.
pub type KeyFn = Box<dyn Fn(&Value) -> Result<Key>>;

/// Builds a key function that reads a single top-level field.
pub fn key_from_field(field: &str) -> KeyFn {
    let field = String::from(field);
    Box::new(move |row: &Value| {
        let v = row.field(&field).ok_or_else(Error::undefined_key)?;
        Key::from_row_value(v)
    })
}
