//! Predicate-filtered change delivery.
//!
//! A filtered subscriber sees the collection as if only matching rows
//! existed. Updates that move a row across the predicate boundary are
//! rewritten: entering rows surface as inserts, leaving rows as deletes.

use alloc::rc::Rc;
use alloc::vec::Vec;
use rivulet_core::{ChangeType, Key, RowChange, Value};
use rivulet_query::eval::eval_predicate;
use rivulet_query::ir::Expr;

/// Row filter applied to a subscription: an IR expression (row-relative
/// ref paths), an opaque predicate, or both.
#[derive(Clone, Default)]
pub struct ChangeFilter {
    pub where_expr: Option<Expr>,
    pub where_fn: Option<Rc<dyn Fn(&Value) -> bool>>,
    /// Restrict delivery to these keys (per-key subscriptions).
    pub keys: Option<Vec<Key>>,
}

impl ChangeFilter {
    /// A filter that matches everything.
    pub fn all() -> Self {
        Self::default()
    }

    /// Filter by an IR expression over the row.
    pub fn with_expr(expr: Expr) -> Self {
        Self {
            where_expr: Some(expr),
            ..Self::default()
        }
    }

    /// Filter by an opaque predicate.
    pub fn with_fn(f: impl Fn(&Value) -> bool + 'static) -> Self {
        Self {
            where_fn: Some(Rc::new(f)),
            ..Self::default()
        }
    }

    /// Filter by key membership.
    pub fn with_keys(keys: impl IntoIterator<Item = Key>) -> Self {
        Self {
            keys: Some(keys.into_iter().collect()),
            ..Self::default()
        }
    }

    /// Returns true when no predicate or key restriction is installed.
    pub fn is_pass_through(&self) -> bool {
        self.where_expr.is_none() && self.where_fn.is_none() && self.keys.is_none()
    }

    /// Evaluates the row predicate (ignoring key restrictions).
    pub fn matches_row(&self, row: &Value) -> bool {
        if let Some(expr) = &self.where_expr {
            if !eval_predicate(expr, row) {
                return false;
            }
        }
        if let Some(f) = &self.where_fn {
            if !f(row) {
                return false;
            }
        }
        true
    }

    /// Evaluates the key restriction.
    pub fn matches_key(&self, key: &Key) -> bool {
        match &self.keys {
            Some(keys) => keys.contains(key),
            None => true,
        }
    }
}

/// Rewrites a change batch for a filtered subscriber.
///
/// - inserts surface only when the new row matches;
/// - deletes surface only when the old row matched;
/// - updates straddling the predicate become inserts (entering) or
///   deletes (leaving); updates inside the predicate stay updates.
pub fn filter_changes(filter: &ChangeFilter, changes: &[RowChange]) -> Vec<RowChange> {
    if filter.is_pass_through() {
        return changes.to_vec();
    }

    let mut out = Vec::new();
    for change in changes {
        if !filter.matches_key(&change.key) {
            continue;
        }
        match change.change_type {
            ChangeType::Insert => {
                if filter.matches_row(&change.value) {
                    out.push(change.clone());
                }
            }
            ChangeType::Delete => {
                let previous = change.previous.as_ref().unwrap_or(&change.value);
                if filter.matches_row(previous) {
                    out.push(change.clone());
                }
            }
            ChangeType::Update => {
                let was = change
                    .previous
                    .as_ref()
                    .map(|p| filter.matches_row(p))
                    .unwrap_or(false);
                let is = filter.matches_row(&change.value);
                match (was, is) {
                    (true, true) => out.push(change.clone()),
                    (false, true) => {
                        out.push(RowChange::insert(change.key.clone(), change.value.clone()))
                    }
                    (true, false) => {
                        let previous = change.previous.clone().unwrap_or(Value::Null);
                        out.push(RowChange::delete(change.key.clone(), previous));
                    }
                    (false, false) => {}
                }
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use rivulet_query::ir::{col, gt, lit};

    fn row(age: i64) -> Value {
        Value::object([("age", Value::Int(age))])
    }

    fn adult_filter() -> ChangeFilter {
        ChangeFilter::with_expr(gt(col(["age"]), lit(25)))
    }

    #[test]
    fn test_insert_filtering() {
        let f = adult_filter();
        let out = filter_changes(
            &f,
            &[
                RowChange::insert(Key::Int(1), row(30)),
                RowChange::insert(Key::Int(2), row(20)),
            ],
        );
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].key, Key::Int(1));
    }

    #[test]
    fn test_update_entering_becomes_insert() {
        let f = adult_filter();
        let out = filter_changes(
            &f,
            &[RowChange::update(Key::Int(2), row(40), row(20))],
        );
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].change_type, ChangeType::Insert);
        assert_eq!(out[0].value, row(40));
    }

    #[test]
    fn test_update_leaving_becomes_delete() {
        let f = adult_filter();
        let out = filter_changes(
            &f,
            &[RowChange::update(Key::Int(1), row(10), row(30))],
        );
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].change_type, ChangeType::Delete);
        assert_eq!(out[0].value, row(30));
    }

    #[test]
    fn test_update_inside_stays_update() {
        let f = adult_filter();
        let out = filter_changes(
            &f,
            &[RowChange::update(Key::Int(1), row(31), row(30))],
        );
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].change_type, ChangeType::Update);
    }

    #[test]
    fn test_update_outside_dropped() {
        let f = adult_filter();
        let out = filter_changes(
            &f,
            &[RowChange::update(Key::Int(1), row(12), row(10))],
        );
        assert!(out.is_empty());
    }

    #[test]
    fn test_delete_uses_previous() {
        let f = adult_filter();
        let out = filter_changes(&f, &[RowChange::delete(Key::Int(1), row(30))]);
        assert_eq!(out.len(), 1);
        let out = filter_changes(&f, &[RowChange::delete(Key::Int(2), row(20))]);
        assert!(out.is_empty());
    }

    #[test]
    fn test_key_filter() {
        let f = ChangeFilter::with_keys([Key::Int(1)]);
        let out = filter_changes(
            &f,
            &[
                RowChange::insert(Key::Int(1), row(30)),
                RowChange::insert(Key::Int(2), row(40)),
            ],
        );
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].key, Key::Int(1));
    }

    #[test]
    fn test_fn_filter() {
        let f = ChangeFilter::with_fn(|r| {
            r.field("age").and_then(Value::as_int).unwrap_or(0) > 25
        });
        let out = filter_changes(&f, &[RowChange::insert(Key::Int(1), row(20))]);
        assert!(out.is_empty());
    }

    #[test]
    fn test_pass_through() {
        let f = ChangeFilter::all();
        let changes = [RowChange::insert(Key::Int(1), row(1))];
        assert_eq!(filter_changes(&f, &changes).len(), 1);
    }
}
