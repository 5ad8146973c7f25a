//! Cursors for editing nested objects and arrays inside a draft.
//!
//! A cursor addresses one nested container by path. All writes route
//! through the shared draft state, so the owning top-level field picks up
//! the touch mark regardless of depth.

use crate::draft::DraftInner;
use alloc::rc::Rc;
use alloc::string::String;
use alloc::vec::Vec;
use core::cell::RefCell;
use core::cmp::Ordering;
use rivulet_core::Value;

/// One step of a cursor path.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum PathSeg {
    Field(String),
    Index(usize),
}

/// Cursor into a nested object.
pub struct ObjectCursor {
    inner: Rc<RefCell<DraftInner>>,
    path: Vec<PathSeg>,
}

impl ObjectCursor {
    pub(crate) fn new(inner: Rc<RefCell<DraftInner>>, path: Vec<PathSeg>) -> Self {
        Self { inner, path }
    }

    /// Reads a field of this object.
    pub fn get(&self, field: &str) -> Option<Value> {
        let inner = self.inner.borrow();
        inner.value_at(&self.path)?.field(field).cloned()
    }

    /// Writes a field of this object.
    pub fn set(&self, field: impl Into<String>, value: impl Into<Value>) {
        let field = field.into();
        let value = value.into();
        self.inner.borrow_mut().mutate_at(&self.path, |target| {
            target.set_field(field, value);
        });
    }

    /// Removes a field of this object.
    pub fn remove(&self, field: &str) {
        self.inner.borrow_mut().mutate_at(&self.path, |target| {
            target.remove_field(field);
        });
    }

    /// Removes every field.
    pub fn clear(&self) {
        self.inner.borrow_mut().mutate_at(&self.path, |target| {
            if let Value::Object(fields) = target {
                fields.clear();
            }
        });
    }

    /// Returns the field names in insertion order.
    pub fn keys(&self) -> Vec<String> {
        let inner = self.inner.borrow();
        inner
            .value_at(&self.path)
            .and_then(Value::as_object)
            .map(|fields| fields.iter().map(|(k, _)| k.clone()).collect())
            .unwrap_or_default()
    }

    /// Descends into a nested object field.
    pub fn object(&self, field: &str) -> Option<ObjectCursor> {
        self.child(field, |v| matches!(v, Value::Object(_)))
            .map(|path| ObjectCursor::new(self.inner.clone(), path))
    }

    /// Descends into a nested array field.
    pub fn array(&self, field: &str) -> Option<ArrayCursor> {
        self.child(field, |v| matches!(v, Value::Array(_)))
            .map(|path| ArrayCursor::new(self.inner.clone(), path))
    }

    fn child(&self, field: &str, check: impl Fn(&Value) -> bool) -> Option<Vec<PathSeg>> {
        let mut path = self.path.clone();
        path.push(PathSeg::Field(field.into()));
        let inner = self.inner.borrow();
        if inner.value_at(&path).map(&check).unwrap_or(false) {
            Some(path)
        } else {
            None
        }
    }
}

/// Cursor into a nested array.
pub struct ArrayCursor {
    inner: Rc<RefCell<DraftInner>>,
    path: Vec<PathSeg>,
}

impl ArrayCursor {
    pub(crate) fn new(inner: Rc<RefCell<DraftInner>>, path: Vec<PathSeg>) -> Self {
        Self { inner, path }
    }

    /// Returns the array length.
    pub fn len(&self) -> usize {
        let inner = self.inner.borrow();
        inner
            .value_at(&self.path)
            .and_then(Value::as_array)
            .map(<[Value]>::len)
            .unwrap_or(0)
    }

    /// Returns true if the array is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Reads an element.
    pub fn get(&self, index: usize) -> Option<Value> {
        let inner = self.inner.borrow();
        inner.value_at(&self.path)?.as_array()?.get(index).cloned()
    }

    /// Writes an element. Out-of-bounds writes extend the array with
    /// `Null` up to the index (host array semantics).
    pub fn set(&self, index: usize, value: impl Into<Value>) {
        let value = value.into();
        self.with_items(move |items| {
            if index >= items.len() {
                items.resize(index + 1, Value::Null);
            }
            items[index] = value;
        });
    }

    /// Appends an element.
    pub fn push(&self, value: impl Into<Value>) {
        let value = value.into();
        self.with_items(move |items| items.push(value));
    }

    /// Removes and returns the last element.
    pub fn pop(&self) -> Option<Value> {
        self.with_items(Vec::pop).flatten()
    }

    /// Removes and returns the first element.
    pub fn shift(&self) -> Option<Value> {
        self.with_items(|items| {
            if items.is_empty() {
                None
            } else {
                Some(items.remove(0))
            }
        })
        .flatten()
    }

    /// Prepends an element.
    pub fn unshift(&self, value: impl Into<Value>) {
        let value = value.into();
        self.with_items(move |items| items.insert(0, value));
    }

    /// Inserts an element at `index` (clamped to the length).
    pub fn insert(&self, index: usize, value: impl Into<Value>) {
        let value = value.into();
        self.with_items(move |items| {
            let at = index.min(items.len());
            items.insert(at, value);
        });
    }

    /// Removes the element at `index`, if present.
    pub fn remove(&self, index: usize) -> Option<Value> {
        self.with_items(move |items| {
            if index < items.len() {
                Some(items.remove(index))
            } else {
                None
            }
        })
        .flatten()
    }

    /// Removes `delete_count` elements starting at `start` and inserts
    /// `replacements` in their place; returns the removed elements.
    pub fn splice(
        &self,
        start: usize,
        delete_count: usize,
        replacements: impl IntoIterator<Item = Value>,
    ) -> Vec<Value> {
        let replacements: Vec<Value> = replacements.into_iter().collect();
        self.with_items(move |items| {
            let start = start.min(items.len());
            let end = (start + delete_count).min(items.len());
            items.splice(start..end, replacements).collect()
        })
        .unwrap_or_default()
    }

    /// Sorts the array with a comparator.
    pub fn sort_by(&self, compare: impl FnMut(&Value, &Value) -> Ordering) {
        let mut compare = compare;
        self.with_items(move |items| items.sort_by(&mut compare));
    }

    /// Sorts the array by the natural value order.
    pub fn sort(&self) {
        self.sort_by(Value::cmp);
    }

    /// Reverses the array in place.
    pub fn reverse(&self) {
        self.with_items(|items| items.reverse());
    }

    /// Fills the whole array with a value.
    pub fn fill(&self, value: impl Into<Value>) {
        let value = value.into();
        self.with_items(move |items| {
            for slot in items.iter_mut() {
                *slot = value.clone();
            }
        });
    }

    /// Descends into a nested object element.
    pub fn object(&self, index: usize) -> Option<ObjectCursor> {
        self.child(index, |v| matches!(v, Value::Object(_)))
            .map(|path| ObjectCursor::new(self.inner.clone(), path))
    }

    /// Descends into a nested array element.
    pub fn array(&self, index: usize) -> Option<ArrayCursor> {
        self.child(index, |v| matches!(v, Value::Array(_)))
            .map(|path| ArrayCursor::new(self.inner.clone(), path))
    }

    fn child(&self, index: usize, check: impl Fn(&Value) -> bool) -> Option<Vec<PathSeg>> {
        let mut path = self.path.clone();
        path.push(PathSeg::Index(index));
        let inner = self.inner.borrow();
        if inner.value_at(&path).map(&check).unwrap_or(false) {
            Some(path)
        } else {
            None
        }
    }

    fn with_items<R>(&self, f: impl FnOnce(&mut Vec<Value>) -> R) -> Option<R> {
        self.inner
            .borrow_mut()
            .mutate_at(&self.path, |target| match target {
                Value::Array(items) => Some(f(items)),
                _ => None,
            })
            .flatten()
    }
}
