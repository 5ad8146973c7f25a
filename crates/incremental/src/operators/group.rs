//! Incremental group-by / aggregate operator.
//!
//! One running state per group key. `count`, `sum` and `avg` fold diffs
//! directly; `min`/`max` keep a value multiset so retractions stay
//! incremental without rescans.

use crate::delta::{DeltaBatch, RowDelta};
use alloc::boxed::Box;
use alloc::collections::BTreeMap;
use alloc::vec::Vec;
use hashbrown::HashMap;
use rivulet_core::{Key, Value};

/// Aggregate functions supported by the group operator.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AggFunc {
    Count,
    Sum,
    Avg,
    Min,
    Max,
}

impl AggFunc {
    /// Parses an aggregate name.
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "count" => Some(AggFunc::Count),
            "sum" => Some(AggFunc::Sum),
            "avg" => Some(AggFunc::Avg),
            "min" => Some(AggFunc::Min),
            "max" => Some(AggFunc::Max),
            _ => None,
        }
    }
}

/// One grouped input row: the derived group key, the evaluated group-key
/// values, one input value per aggregate, and the diff.
#[derive(Clone, Debug)]
pub struct GroupInput {
    pub group_key: Key,
    pub key_values: Vec<Value>,
    pub agg_inputs: Vec<Value>,
    pub diff: i32,
}

/// Builds the output row from (group key values, aggregate outputs).
pub type GroupRowFn = Box<dyn Fn(&[Value], &[Value]) -> Value>;

enum AggAccum {
    Count {
        non_null: i64,
    },
    Sum {
        total: f64,
        saw_float: bool,
        non_null: i64,
    },
    Avg {
        total: f64,
        non_null: i64,
    },
    Min {
        values: BTreeMap<Value, usize>,
    },
    Max {
        values: BTreeMap<Value, usize>,
    },
}

impl AggAccum {
    fn new(func: AggFunc) -> Self {
        match func {
            AggFunc::Count => AggAccum::Count { non_null: 0 },
            AggFunc::Sum => AggAccum::Sum {
                total: 0.0,
                saw_float: false,
                non_null: 0,
            },
            AggFunc::Avg => AggAccum::Avg {
                total: 0.0,
                non_null: 0,
            },
            AggFunc::Min => AggAccum::Min {
                values: BTreeMap::new(),
            },
            AggFunc::Max => AggAccum::Max {
                values: BTreeMap::new(),
            },
        }
    }

    fn apply(&mut self, input: &Value, diff: i32) {
        if input.is_null() {
            return;
        }
        match self {
            AggAccum::Count { non_null } => *non_null += diff as i64,
            AggAccum::Sum {
                total,
                saw_float,
                non_null,
            } => {
                if let Some(n) = input.as_number() {
                    *total += n * diff as f64;
                    *saw_float |= matches!(input, Value::Float(_));
                    *non_null += diff as i64;
                }
            }
            AggAccum::Avg { total, non_null } => {
                if let Some(n) = input.as_number() {
                    *total += n * diff as f64;
                    *non_null += diff as i64;
                }
            }
            AggAccum::Min { values } | AggAccum::Max { values } => {
                if diff > 0 {
                    *values.entry(input.clone()).or_insert(0) += diff as usize;
                } else {
                    let remove = match values.get_mut(input) {
                        Some(count) => {
                            *count = count.saturating_sub(diff.unsigned_abs() as usize);
                            *count == 0
                        }
                        None => false,
                    };
                    if remove {
                        values.remove(input);
                    }
                }
            }
        }
    }

    fn output(&self) -> Value {
        match self {
            AggAccum::Count { non_null } => Value::Int(*non_null),
            AggAccum::Sum {
                total,
                saw_float,
                non_null,
            } => {
                if *non_null == 0 {
                    Value::Null
                } else if *saw_float {
                    Value::Float(*total)
                } else {
                    Value::Int(*total as i64)
                }
            }
            AggAccum::Avg { total, non_null } => {
                if *non_null == 0 {
                    Value::Null
                } else {
                    Value::Float(*total / *non_null as f64)
                }
            }
            AggAccum::Min { values } => values
                .keys()
                .next()
                .cloned()
                .unwrap_or(Value::Null),
            AggAccum::Max { values } => values
                .keys()
                .next_back()
                .cloned()
                .unwrap_or(Value::Null),
        }
    }
}

struct GroupEntry {
    key_values: Vec<Value>,
    rows: i64,
    accums: Vec<AggAccum>,
    current: Option<Value>,
}

/// Incremental group-by state.
pub struct GroupState {
    funcs: Vec<AggFunc>,
    build_row: GroupRowFn,
    groups: HashMap<Key, GroupEntry>,
}

impl GroupState {
    /// Creates group state for the given aggregate list.
    pub fn new(funcs: Vec<AggFunc>, build_row: GroupRowFn) -> Self {
        Self {
            funcs,
            build_row,
            groups: HashMap::new(),
        }
    }

    /// Returns the number of live groups.
    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    /// Processes a batch of grouped inputs, emitting one retraction plus
    /// one insertion per group whose output row changed.
    pub fn push(&mut self, batch: Vec<GroupInput>) -> DeltaBatch {
        let mut affected: Vec<Key> = Vec::new();

        for input in batch {
            let funcs = &self.funcs;
            let entry = self
                .groups
                .entry(input.group_key.clone())
                .or_insert_with(|| GroupEntry {
                    key_values: input.key_values.clone(),
                    rows: 0,
                    accums: funcs.iter().map(|f| AggAccum::new(*f)).collect(),
                    current: None,
                });
            entry.rows += input.diff as i64;
            for (accum, value) in entry.accums.iter_mut().zip(input.agg_inputs.iter()) {
                accum.apply(value, input.diff);
            }
            if !affected.contains(&input.group_key) {
                affected.push(input.group_key.clone());
            }
        }

        let mut out = DeltaBatch::new();
        for key in affected {
            let Some(entry) = self.groups.get_mut(&key) else {
                continue;
            };
            if entry.rows <= 0 {
                if let Some(old) = entry.current.take() {
                    out.push(RowDelta::delete(key.clone(), old));
                }
                self.groups.remove(&key);
                continue;
            }
            let outputs: Vec<Value> = entry.accums.iter().map(AggAccum::output).collect();
            let new_row = (self.build_row)(&entry.key_values, &outputs);
            if entry.current.as_ref() != Some(&new_row) {
                if let Some(old) = entry.current.take() {
                    out.push(RowDelta::delete(key.clone(), old));
                }
                out.push(RowDelta::insert(key.clone(), new_row.clone()));
                entry.current = Some(new_row);
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;

    fn build_row() -> GroupRowFn {
        Box::new(|keys, aggs| {
            Value::object([
                ("team", keys[0].clone()),
                ("count", aggs[0].clone()),
            ])
        })
    }

    fn input(team: &str, diff: i32) -> GroupInput {
        GroupInput {
            group_key: Key::from_group_values(&[Value::from(team)]),
            key_values: vec![Value::from(team)],
            agg_inputs: vec![Value::Int(1)],
            diff,
        }
    }

    #[test]
    fn test_count_per_group() {
        let mut state = GroupState::new(vec![AggFunc::Count], build_row());
        let out = state.push(vec![input("A", 1), input("A", 1), input("B", 1)]);

        // Two groups appear, each with a single insertion
        assert_eq!(out.len(), 2);
        let a = out.iter().find(|d| {
            d.row.field("team") == Some(&Value::from("A"))
        }).unwrap();
        assert_eq!(a.row.field("count"), Some(&Value::Int(2)));
        assert_eq!(state.group_count(), 2);
    }

    #[test]
    fn test_group_update_is_retract_plus_insert() {
        let mut state = GroupState::new(vec![AggFunc::Count], build_row());
        state.push(vec![input("A", 1), input("A", 1), input("B", 1)]);

        let out = state.push(vec![input("B", 1)]);
        assert_eq!(out.len(), 2);
        assert!(out[0].is_delete());
        assert_eq!(out[0].row.field("count"), Some(&Value::Int(1)));
        assert!(out[1].is_insert());
        assert_eq!(out[1].row.field("count"), Some(&Value::Int(2)));
    }

    #[test]
    fn test_empty_group_is_removed() {
        let mut state = GroupState::new(vec![AggFunc::Count], build_row());
        state.push(vec![input("A", 1)]);
        let out = state.push(vec![input("A", -1)]);
        assert_eq!(out.len(), 1);
        assert!(out[0].is_delete());
        assert_eq!(state.group_count(), 0);
    }

    #[test]
    fn test_no_change_no_output() {
        let mut state = GroupState::new(vec![AggFunc::Count], build_row());
        state.push(vec![input("A", 1)]);
        // A delete and insert that keep the count identical
        let out = state.push(vec![input("A", -1), input("A", 1)]);
        assert!(out.is_empty());
    }

    fn sum_input(team: &str, value: Value, diff: i32) -> GroupInput {
        GroupInput {
            group_key: Key::from_group_values(&[Value::from(team)]),
            key_values: vec![Value::from(team)],
            agg_inputs: vec![value],
            diff,
        }
    }

    #[test]
    fn test_sum_and_avg() {
        let build = Box::new(|keys: &[Value], aggs: &[Value]| {
            Value::object([
                ("team", keys[0].clone()),
                ("sum", aggs[0].clone()),
                ("avg", aggs[1].clone()),
            ])
        });
        let mut state = GroupState::new(vec![AggFunc::Sum, AggFunc::Avg], build);

        let mk = |v: i64, diff: i32| GroupInput {
            group_key: Key::from_group_values(&[Value::from("A")]),
            key_values: vec![Value::from("A")],
            agg_inputs: vec![Value::Int(v), Value::Int(v)],
            diff,
        };

        let out = state.push(vec![mk(10, 1), mk(20, 1)]);
        let row = &out[0].row;
        assert_eq!(row.field("sum"), Some(&Value::Int(30)));
        assert_eq!(row.field("avg"), Some(&Value::Float(15.0)));

        let out = state.push(vec![mk(10, -1)]);
        let row = &out[1].row;
        assert_eq!(row.field("sum"), Some(&Value::Int(20)));
        assert_eq!(row.field("avg"), Some(&Value::Float(20.0)));
    }

    #[test]
    fn test_min_max_with_retraction() {
        let build = Box::new(|keys: &[Value], aggs: &[Value]| {
            Value::object([
                ("team", keys[0].clone()),
                ("min", aggs[0].clone()),
                ("max", aggs[1].clone()),
            ])
        });
        let mut state = GroupState::new(vec![AggFunc::Min, AggFunc::Max], build);

        let mk = |v: i64, diff: i32| GroupInput {
            group_key: Key::from_group_values(&[Value::from("A")]),
            key_values: vec![Value::from("A")],
            agg_inputs: vec![Value::Int(v), Value::Int(v)],
            diff,
        };

        state.push(vec![mk(10, 1), mk(30, 1), mk(20, 1)]);

        // Deleting the current minimum falls back to the next value
        let out = state.push(vec![mk(10, -1)]);
        let row = &out[1].row;
        assert_eq!(row.field("min"), Some(&Value::Int(20)));
        assert_eq!(row.field("max"), Some(&Value::Int(30)));
    }

    #[test]
    fn test_nulls_skip_aggregates() {
        let mut state = GroupState::new(vec![AggFunc::Count], build_row());
        let out = state.push(vec![
            GroupInput {
                group_key: Key::from_group_values(&[Value::from("A")]),
                key_values: vec![Value::from("A")],
                agg_inputs: vec![Value::Null],
                diff: 1,
            },
            input("A", 1),
        ]);
        // count skips the null input
        assert_eq!(out[0].row.field("count"), Some(&Value::Int(1)));
    }
}
