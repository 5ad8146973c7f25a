//! Incremental order-by window operator.
//!
//! Maintains every live row in comparator order and exposes the window
//! `[offset, offset + limit)`. Each input batch emits only the membership
//! changes that keep the window correct.
//!
//! Upstream rows are keyed, so at most one live row exists per key; ties
//! in the comparator are broken by key to keep the order total.

use crate::delta::{DeltaBatch, RowDelta};
use alloc::rc::Rc;
use alloc::vec::Vec;
use core::cmp::Ordering;
use rivulet_index::{FnComparator, SortedMap};
use rivulet_core::{Key, Value};

/// Row comparator derived from the order-by clauses.
pub type RowComparator = Rc<dyn Fn(&Value, &Value) -> Ordering>;

type Entry = (Key, Value);
type EntryComparator = FnComparator<alloc::boxed::Box<dyn Fn(&Entry, &Entry) -> Ordering>>;

/// Incremental top-k state.
pub struct TopKState {
    sorted: SortedMap<Entry, (), EntryComparator>,
    offset: usize,
    limit: Option<usize>,
    window: Vec<Entry>,
}

impl TopKState {
    /// Creates top-k state over a row comparator.
    pub fn new(cmp: RowComparator, offset: usize, limit: Option<usize>) -> Self {
        let entry_cmp: alloc::boxed::Box<dyn Fn(&Entry, &Entry) -> Ordering> =
            alloc::boxed::Box::new(move |a: &Entry, b: &Entry| {
                cmp(&a.1, &b.1).then_with(|| a.0.cmp(&b.0))
            });
        Self {
            sorted: SortedMap::with_comparator(FnComparator(entry_cmp)),
            offset,
            limit,
            window: Vec::new(),
        }
    }

    /// Returns the rows currently inside the window, in sort order.
    pub fn window_rows(&self) -> &[Entry] {
        &self.window
    }

    /// Returns the total number of live rows (inside and outside the
    /// window).
    pub fn total_rows(&self) -> usize {
        self.sorted.len()
    }

    /// Processes a batch, returning the deltas that adjust the window.
    pub fn push(&mut self, batch: DeltaBatch) -> DeltaBatch {
        for delta in &batch {
            let entry = (delta.key.clone(), delta.row.clone());
            if delta.is_insert() {
                self.sorted.insert(entry, ());
            } else if delta.is_delete() {
                self.sorted.remove(&entry);
            }
        }

        let new_window: Vec<Entry> = match self.limit {
            Some(limit) => self
                .sorted
                .iter()
                .skip(self.offset)
                .take(limit)
                .map(|(e, _)| e.clone())
                .collect(),
            None => self
                .sorted
                .iter()
                .skip(self.offset)
                .map(|(e, _)| e.clone())
                .collect(),
        };

        let mut out = DeltaBatch::new();
        for (key, row) in &self.window {
            if !new_window.iter().any(|(k, r)| k == key && r == row) {
                out.push(RowDelta::delete(key.clone(), row.clone()));
            }
        }
        for (key, row) in &new_window {
            if !self.window.iter().any(|(k, r)| k == key && r == row) {
                out.push(RowDelta::insert(key.clone(), row.clone()));
            }
        }
        self.window = new_window;
        out
    }
}
