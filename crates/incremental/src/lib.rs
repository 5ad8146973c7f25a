//! Rivulet Incremental - Incremental dataflow over keyed multiset deltas.
//!
//! Query pipelines are built from the operators in this crate. Every
//! upstream change becomes a `RowDelta` (`+1` insert / `-1` delete);
//! operators fold batches of deltas into their private state and emit the
//! minimal downstream deltas.
//!
//! # Operators
//!
//! - `map_deltas` / `filter_deltas`: stateless per-row stages
//! - `JoinState`: inner / left / right / full / cross equi-joins with
//!   null-padding for the outer kinds
//! - `GroupState`: group-by with incremental count/sum/avg/min/max
//! - `TopKState`: comparator-ordered window backing order-by with
//!   limit/offset
//! - `DistinctState`: multiplicity-counted deduplication
//! - `consolidate`: coalesces +1/-1 pairs before delivery
//!
//! # Example
//!
//! ```rust
//! use rivulet_core::{Key, Value};
//! use rivulet_incremental::{filter_deltas, RowDelta};
//!
//! let batch = vec![
//!     RowDelta::insert(Key::Int(1), Value::object([("age", Value::Int(30))])),
//!     RowDelta::insert(Key::Int(2), Value::object([("age", Value::Int(20))])),
//! ];
//! let adults = filter_deltas(batch, |row| {
//!     row.field("age").and_then(Value::as_int).unwrap_or(0) > 25
//! });
//! assert_eq!(adults.len(), 1);
//! ```

#![no_std]

extern crate alloc;

pub mod consolidate;
pub mod delta;
pub mod operators;

pub use consolidate::{consolidate, per_key_net};
pub use delta::{DeltaBatch, DeltaBatchExt, RowDelta};
pub use operators::{
    filter_deltas, map_deltas, AggFunc, DistinctState, GroupInput, GroupRowFn, GroupState,
    JoinInput, JoinKind, JoinSide, JoinState, MergeFn, RowComparator, TopKState,
};
