//! Incremental operators.

pub mod distinct;
pub mod filter;
pub mod group;
pub mod join;
pub mod map;
pub mod topk;

pub use distinct::DistinctState;
pub use filter::filter_deltas;
pub use group::{AggFunc, GroupInput, GroupRowFn, GroupState};
pub use join::{JoinInput, JoinKind, JoinSide, JoinState, MergeFn};
pub use map::map_deltas;
pub use topk::{RowComparator, TopKState};
