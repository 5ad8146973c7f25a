//! Rivulet Core - Core types for the Rivulet reactive store.
//!
//! This crate provides the foundational types shared by the whole
//! workspace:
//!
//! - `Value`: dynamic row values (scalars, nested objects and arrays)
//! - `Key`: row, join and group keys
//! - `PropPath`: field paths used by query refs and indexes
//! - `RowChange` / `ChangeType`: change events delivered to subscribers
//! - `Error`: the error taxonomy for all Rivulet operations
//! - `pattern_match`: SQL LIKE matching used by the scalar evaluator
//!
//! # Example
//!
//! ```rust
//! use rivulet_core::{Key, Value};
//!
//! let row = Value::object([
//!     ("id", Value::Int(1)),
//!     ("name", Value::from("Alice")),
//! ]);
//!
//! let key = Key::from_row_value(row.field("id").unwrap()).unwrap();
//! assert_eq!(key, Key::Int(1));
//! assert_eq!(row.field("name").unwrap().as_str(), Some("Alice"));
//! ```

#![no_std]

extern crate alloc;

mod change;
mod error;
mod key;
mod path;
pub mod pattern_match;
mod value;

pub use change::{ChangeBatch, ChangeType, RowChange};
pub use error::{Error, Result, ValidationIssue};
pub use key::{key_from_field, Key, KeyFn, KeySet};
pub use path::PropPath;
pub use value::Value;
