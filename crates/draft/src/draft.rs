//! Draft root: deep clone, touch marks and diff extraction.

use crate::cursor::{ArrayCursor, ObjectCursor, PathSeg};
use alloc::collections::BTreeSet;
use alloc::rc::Rc;
use alloc::string::String;
use alloc::vec::Vec;
use core::cell::RefCell;
use rivulet_core::Value;

pub(crate) struct DraftInner {
    original: Value,
    copy: Value,
    /// Top-level fields that have seen at least one write (at any depth).
    touched: BTreeSet<String>,
}

impl DraftInner {
    /// Navigates to the value at `path` inside the working copy, creating
    /// nothing; returns None when any segment is missing.
    pub(crate) fn value_at(&self, path: &[PathSeg]) -> Option<&Value> {
        let mut current = &self.copy;
        for seg in path {
            current = match seg {
                PathSeg::Field(name) => current.field(name)?,
                PathSeg::Index(i) => current.as_array()?.get(*i)?,
            };
        }
        Some(current)
    }

    fn value_at_mut(&mut self, path: &[PathSeg]) -> Option<&mut Value> {
        let mut current = &mut self.copy;
        for seg in path {
            current = match seg {
                PathSeg::Field(name) => current.field_mut(name)?,
                PathSeg::Index(i) => match current {
                    Value::Array(items) => items.get_mut(*i)?,
                    _ => return None,
                },
            };
        }
        Some(current)
    }

    /// Marks the top-level field owning `path` as touched.
    pub(crate) fn mark(&mut self, path: &[PathSeg]) {
        if let Some(PathSeg::Field(name)) = path.first() {
            self.touched.insert(name.clone());
        }
    }

    /// Runs `f` against the value at `path` and records the touch.
    pub(crate) fn mutate_at<R>(
        &mut self,
        path: &[PathSeg],
        f: impl FnOnce(&mut Value) -> R,
    ) -> Option<R> {
        self.mark(path);
        self.value_at_mut(path).map(f)
    }
}

/// A change-tracking draft over a row value.
///
/// The wrapped row is cloned up front; the input value is never mutated.
/// Cursors obtained from `object`/`array` share the draft's state, so
/// nested writes surface in the root diff.
pub struct Draft {
    inner: Rc<RefCell<DraftInner>>,
}

impl Draft {
    /// Creates a draft over a row. Rows are object values; a non-object
    /// input yields a draft whose edits are all no-ops.
    pub fn new(row: Value) -> Self {
        let copy = row.clone();
        Self {
            inner: Rc::new(RefCell::new(DraftInner {
                original: row,
                copy,
                touched: BTreeSet::new(),
            })),
        }
    }

    /// Reads a top-level field from the working copy.
    pub fn get(&self, field: &str) -> Option<Value> {
        self.inner.borrow().copy.field(field).cloned()
    }

    /// Writes a top-level field.
    pub fn set(&self, field: impl Into<String>, value: impl Into<Value>) {
        let field = field.into();
        let mut inner = self.inner.borrow_mut();
        inner.touched.insert(field.clone());
        inner.copy.set_field(field, value.into());
    }

    /// Removes a top-level field. Removed fields surface as `Null` in the
    /// diff.
    pub fn remove(&self, field: &str) {
        let mut inner = self.inner.borrow_mut();
        inner.touched.insert(field.into());
        inner.copy.remove_field(field);
    }

    /// Returns a cursor into a nested object field, or None when the field
    /// is missing or not an object.
    pub fn object(&self, field: &str) -> Option<ObjectCursor> {
        let path = alloc::vec![PathSeg::Field(field.into())];
        match self.inner.borrow().value_at(&path) {
            Some(Value::Object(_)) => {}
            _ => return None,
        }
        Some(ObjectCursor::new(self.inner.clone(), path))
    }

    /// Returns a cursor into a nested array field, or None when the field
    /// is missing or not an array.
    pub fn array(&self, field: &str) -> Option<ArrayCursor> {
        let path = alloc::vec![PathSeg::Field(field.into())];
        match self.inner.borrow().value_at(&path) {
            Some(Value::Array(_)) => {}
            _ => return None,
        }
        Some(ArrayCursor::new(self.inner.clone(), path))
    }

    /// Returns the minimal diff: an object holding every touched top-level
    /// field whose working value deep-differs from the original. Fields
    /// reverted to their original value are excluded; an untouched draft
    /// yields an empty object.
    pub fn changes(&self) -> Value {
        let inner = self.inner.borrow();
        let mut fields: Vec<(String, Value)> = Vec::new();
        for name in &inner.touched {
            let before = inner.original.field(name);
            let after = inner.copy.field(name);
            match (before, after) {
                (Some(b), Some(a)) if b == a => {}
                (None, None) => {}
                (_, Some(a)) => fields.push((name.clone(), a.clone())),
                (Some(_), None) => fields.push((name.clone(), Value::Null)),
            }
        }
        Value::Object(fields)
    }

    /// Returns true if `changes()` would be empty.
    pub fn is_unchanged(&self) -> bool {
        matches!(self.changes(), Value::Object(fields) if fields.is_empty())
    }

    /// Returns a clone of the original row.
    pub fn original(&self) -> Value {
        self.inner.borrow().original.clone()
    }

    /// Consumes the draft and returns the working copy (original with all
    /// edits applied).
    pub fn into_value(self) -> Value {
        match Rc::try_unwrap(self.inner) {
            Ok(cell) => cell.into_inner().copy,
            Err(rc) => rc.borrow().copy.clone(),
        }
    }
}
