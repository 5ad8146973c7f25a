//! Rivulet Index - Ordered structures and field indexes.
//!
//! This crate provides the container and index implementations used by
//! collections and the query engine:
//!
//! - `OrdMap`: insertion-ordered keyed map (collection state)
//! - `SortedMap`: comparator-ordered map with range scans (order-by
//!   windows, ordered indexes)
//! - `EqualityIndex`: O(1) point probes via hash map
//! - `OrderedIndex`: point and range probes via a sorted structure
//! - `IndexRegistry`: per-collection index set with incremental
//!   maintenance on committed sync changes
//!
//! # Example
//!
//! ```rust
//! use rivulet_core::{Key, PropPath, Value};
//! use rivulet_index::{IndexKind, IndexOp, IndexRegistry};
//!
//! let mut registry = IndexRegistry::new();
//! let rows = vec![
//!     (Key::Int(1), Value::object([("age", Value::Int(30))])),
//!     (Key::Int(2), Value::object([("age", Value::Int(20))])),
//! ];
//! registry.create_index(PropPath::new(["age"]), IndexKind::Ordered, &mut rows.into_iter());
//!
//! let keys = registry
//!     .probe(&PropPath::new(["age"]), IndexOp::Gt, &Value::Int(25))
//!     .unwrap();
//! assert_eq!(keys.len(), 1);
//! ```

#![no_std]

extern crate alloc;

pub mod hash;
pub mod ordered;
pub mod ordmap;
pub mod registry;
pub mod sorted;
pub mod traits;

pub use hash::EqualityIndex;
pub use ordered::OrderedIndex;
pub use ordmap::OrdMap;
pub use registry::IndexRegistry;
pub use sorted::{Comparator, FnComparator, KeyRange, NaturalOrder, SortedMap};
pub use traits::{sorted_keys, IndexId, IndexKind, IndexOp, RowIndex};
