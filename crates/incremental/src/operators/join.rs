//! Incremental equi-join operator.
//!
//! Maintains hash indexes of both sides keyed by the join value. Insertions
//! probe the opposite side; outer kinds additionally synthesize null-padded
//! rows for unmatched inputs and retract them when a match arrives.
//!
//! Output keys are the composite pair `[left_key, right_key]`, with
//! `Key::Null` standing in for the synthesized side.

use crate::delta::{DeltaBatch, RowDelta};
use alloc::boxed::Box;
use alloc::vec::Vec;
use hashbrown::HashMap;
use rivulet_core::{Key, Value};

/// Join type.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JoinKind {
    Inner,
    Left,
    Right,
    Full,
    Cross,
}

/// Builds an output row from the two sides; either side may be absent for
/// outer joins.
pub type MergeFn = Box<dyn Fn(Option<&Value>, Option<&Value>) -> Value>;

/// A join input: the extracted join value plus the keyed row delta.
#[derive(Clone, Debug)]
pub struct JoinInput {
    pub join_value: Value,
    pub delta: RowDelta,
}

impl JoinInput {
    pub fn new(join_value: Value, delta: RowDelta) -> Self {
        Self { join_value, delta }
    }
}

/// Which side of the join a batch belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JoinSide {
    Left,
    Right,
}

/// Incremental join state.
pub struct JoinState {
    kind: JoinKind,
    merge: MergeFn,
    left: HashMap<Value, Vec<(Key, Value)>>,
    right: HashMap<Value, Vec<(Key, Value)>>,
}

impl JoinState {
    /// Creates an empty join state.
    pub fn new(kind: JoinKind, merge: MergeFn) -> Self {
        Self {
            kind,
            merge,
            left: HashMap::new(),
            right: HashMap::new(),
        }
    }

    /// Returns the number of rows indexed on the left side.
    pub fn left_count(&self) -> usize {
        self.left.values().map(Vec::len).sum()
    }

    /// Returns the number of rows indexed on the right side.
    pub fn right_count(&self) -> usize {
        self.right.values().map(Vec::len).sum()
    }

    /// True when this kind pads unmatched rows on the given side.
    fn pads(&self, side: JoinSide) -> bool {
        matches!(
            (self.kind, side),
            (JoinKind::Left, JoinSide::Left)
                | (JoinKind::Right, JoinSide::Right)
                | (JoinKind::Full, _)
        )
    }

    /// Join values never match through `Null` (except for cross joins,
    /// which use a constant internal join value).
    fn matchable(&self, join_value: &Value) -> bool {
        self.kind == JoinKind::Cross || !join_value.is_null()
    }

    /// Processes a batch for one side, returning the output deltas.
    pub fn push(&mut self, side: JoinSide, batch: Vec<JoinInput>) -> DeltaBatch {
        let mut out = DeltaBatch::new();
        for input in batch {
            let units = input.delta.diff.unsigned_abs();
            let insert = input.delta.diff > 0;
            for _ in 0..units {
                if insert {
                    self.apply_insert(side, &input.join_value, &input.delta.key, &input.delta.row, &mut out);
                } else {
                    self.apply_delete(side, &input.join_value, &input.delta.key, &input.delta.row, &mut out);
                }
            }
        }
        out
    }

    fn apply_insert(&mut self, side: JoinSide, jv: &Value, key: &Key, row: &Value, out: &mut DeltaBatch) {
        let matches = self.matches_for(side, jv);

        if matches.is_empty() {
            if self.pads(side) {
                out.push(self.padded(side, key, row, 1));
            }
        } else {
            // The first match for this join value retracts any padded rows
            // the other side emitted while unmatched.
            if self.side_rows(side, jv).is_empty() {
                let other = opposite(side);
                if self.pads(other) {
                    for (ok, orow) in &matches {
                        out.push(self.padded(other, ok, orow, -1));
                    }
                }
            }
            for (ok, orow) in &matches {
                out.push(self.pair(side, key, row, ok, orow, 1));
            }
        }

        self.side_rows_mut(side, jv).push((key.clone(), row.clone()));
    }

    fn apply_delete(&mut self, side: JoinSide, jv: &Value, key: &Key, row: &Value, out: &mut DeltaBatch) {
        // Drop from our own index first so "last row" checks see the
        // post-delete state.
        let rows = self.side_rows_mut(side, jv);
        if let Some(pos) = rows.iter().position(|(k, r)| k == key && r == row) {
            rows.remove(pos);
        }
        let now_empty = self.side_rows(side, jv).is_empty();

        let matches = self.matches_for(side, jv);
        if matches.is_empty() {
            if self.pads(side) {
                out.push(self.padded(side, key, row, -1));
            }
        } else {
            for (ok, orow) in &matches {
                out.push(self.pair(side, key, row, ok, orow, -1));
            }
            // The last row leaving re-pads the other side.
            if now_empty {
                let other = opposite(side);
                if self.pads(other) {
                    for (ok, orow) in &matches {
                        out.push(self.padded(other, ok, orow, 1));
                    }
                }
            }
        }
    }

    fn matches_for(&self, side: JoinSide, jv: &Value) -> Vec<(Key, Value)> {
        if !self.matchable(jv) {
            return Vec::new();
        }
        let other = match side {
            JoinSide::Left => &self.right,
            JoinSide::Right => &self.left,
        };
        other.get(jv).cloned().unwrap_or_default()
    }

    fn side_rows(&self, side: JoinSide, jv: &Value) -> &[(Key, Value)] {
        let index = match side {
            JoinSide::Left => &self.left,
            JoinSide::Right => &self.right,
        };
        index.get(jv).map(Vec::as_slice).unwrap_or(&[])
    }

    fn side_rows_mut(&mut self, side: JoinSide, jv: &Value) -> &mut Vec<(Key, Value)> {
        let index = match side {
            JoinSide::Left => &mut self.left,
            JoinSide::Right => &mut self.right,
        };
        index.entry(jv.clone()).or_default()
    }

    fn pair(
        &self,
        side: JoinSide,
        key: &Key,
        row: &Value,
        other_key: &Key,
        other_row: &Value,
        diff: i32,
    ) -> RowDelta {
        let (lk, lrow, rk, rrow) = match side {
            JoinSide::Left => (key, row, other_key, other_row),
            JoinSide::Right => (other_key, other_row, key, row),
        };
        RowDelta::new(
            Key::pair(lk.clone(), rk.clone()),
            (self.merge)(Some(lrow), Some(rrow)),
            diff,
        )
    }

    fn padded(&self, side: JoinSide, key: &Key, row: &Value, diff: i32) -> RowDelta {
        match side {
            JoinSide::Left => RowDelta::new(
                Key::pair(key.clone(), Key::Null),
                (self.merge)(Some(row), None),
                diff,
            ),
            JoinSide::Right => RowDelta::new(
                Key::pair(Key::Null, key.clone()),
                (self.merge)(None, Some(row)),
                diff,
            ),
        }
    }
}

fn opposite(side: JoinSide) -> JoinSide {
    match side {
        JoinSide::Left => JoinSide::Right,
        JoinSide::Right => JoinSide::Left,
    }
}
