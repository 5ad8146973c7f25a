//! Rivulet Draft - Change-tracking drafts for optimistic mutations.
//!
//! A `Draft` wraps a row value in a deep clone that records which top-level
//! fields have been touched. User code edits the draft imperatively
//! (including nested objects and arrays via cursors); `changes()` then
//! yields the minimal diff: an object holding only the top-level fields
//! whose value actually differs from the original.
//!
//! Writes that revert a field to its original value drop it from the diff
//! again, so a sequence of edits that nets out to the starting state
//! produces an empty diff.
//!
//! # Example
//!
//! ```rust
//! use rivulet_core::Value;
//! use rivulet_draft::Draft;
//!
//! let row = Value::object([("id", Value::Int(1)), ("name", Value::from("A"))]);
//! let draft = Draft::new(row);
//!
//! draft.set("name", Value::from("B"));
//! let changes = draft.changes();
//! assert_eq!(changes.field("name"), Some(&Value::from("B")));
//! assert_eq!(changes.field("id"), None);
//!
//! draft.set("name", Value::from("A"));
//! assert!(draft.changes().as_object().unwrap().is_empty());
//! ```

#![no_std]

extern crate alloc;

mod cursor;
mod draft;

pub use cursor::{ArrayCursor, ObjectCursor};
pub use draft::Draft;
