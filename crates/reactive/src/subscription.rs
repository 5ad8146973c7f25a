//! Subscription management for change batches.

use alloc::rc::Rc;
use alloc::vec::Vec;
use hashbrown::HashMap;
use rivulet_core::RowChange;

/// Unique identifier for a subscription.
pub type SubscriptionId = u64;

/// Callback type for change notifications.
///
/// Callbacks are reference-counted so that callers can snapshot the
/// subscriber list and deliver batches without holding any interior
/// borrow while user code runs.
pub type ChangeCallback = Rc<dyn Fn(&[RowChange])>;

/// A single subscription.
pub struct Subscription {
    id: SubscriptionId,
    callback: ChangeCallback,
    active: bool,
}

impl Subscription {
    /// Creates a new subscription.
    pub fn new<F>(id: SubscriptionId, callback: F) -> Self
    where
        F: Fn(&[RowChange]) + 'static,
    {
        Self {
            id,
            callback: Rc::new(callback),
            active: true,
        }
    }

    /// Returns the subscription ID.
    #[inline]
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Returns whether this subscription is active.
    #[inline]
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Deactivates this subscription.
    #[inline]
    pub fn deactivate(&mut self) {
        self.active = false;
    }

    /// Notifies this subscription of a change batch.
    pub fn notify(&self, changes: &[RowChange]) {
        if self.active && !changes.is_empty() {
            (self.callback)(changes);
        }
    }
}

/// Manages the subscriptions of one collection.
pub struct SubscriptionManager {
    subscriptions: HashMap<SubscriptionId, Subscription>,
    order: Vec<SubscriptionId>,
    next_id: SubscriptionId,
}

impl Default for SubscriptionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl SubscriptionManager {
    /// Creates an empty manager.
    pub fn new() -> Self {
        Self {
            subscriptions: HashMap::new(),
            order: Vec::new(),
            next_id: 1,
        }
    }

    /// Registers a callback, returning its subscription id.
    pub fn subscribe<F>(&mut self, callback: F) -> SubscriptionId
    where
        F: Fn(&[RowChange]) + 'static,
    {
        let id = self.next_id;
        self.next_id += 1;
        self.subscriptions.insert(id, Subscription::new(id, callback));
        self.order.push(id);
        id
    }

    /// Removes a subscription. Returns true if it existed.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let removed = self.subscriptions.remove(&id).is_some();
        if removed {
            self.order.retain(|s| *s != id);
        }
        removed
    }

    /// Returns the number of active subscriptions.
    pub fn len(&self) -> usize {
        self.subscriptions.len()
    }

    /// Returns true if no subscriptions are registered.
    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }

    /// Delivers a batch to every subscription in registration order.
    pub fn notify_all(&self, changes: &[RowChange]) {
        if changes.is_empty() {
            return;
        }
        for id in &self.order {
            if let Some(sub) = self.subscriptions.get(id) {
                sub.notify(changes);
            }
        }
    }

    /// Delivers a batch to a single subscription.
    pub fn notify_one(&self, id: SubscriptionId, changes: &[RowChange]) {
        if let Some(sub) = self.subscriptions.get(&id) {
            sub.notify(changes);
        }
    }

    /// Returns the active callbacks in registration order.
    ///
    /// Deliver through this snapshot when user callbacks may re-enter the
    /// structure that owns the manager.
    pub fn snapshot(&self) -> Vec<ChangeCallback> {
        self.order
            .iter()
            .filter_map(|id| self.subscriptions.get(id))
            .filter(|s| s.is_active())
            .map(|s| s.callback.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::rc::Rc;
    use alloc::vec;
    use core::cell::RefCell;
    use rivulet_core::{Key, Value};

    fn change(key: i64) -> RowChange {
        RowChange::insert(Key::Int(key), Value::Int(key))
    }

    #[test]
    fn test_subscribe_and_notify() {
        let mut mgr = SubscriptionManager::new();
        let seen = Rc::new(RefCell::new(0usize));

        let seen1 = seen.clone();
        mgr.subscribe(move |batch| *seen1.borrow_mut() += batch.len());
        let seen2 = seen.clone();
        mgr.subscribe(move |batch| *seen2.borrow_mut() += batch.len());

        mgr.notify_all(&[change(1), change(2)]);
        assert_eq!(*seen.borrow(), 4);
    }

    #[test]
    fn test_unsubscribe() {
        let mut mgr = SubscriptionManager::new();
        let seen = Rc::new(RefCell::new(0usize));
        let seen1 = seen.clone();
        let id = mgr.subscribe(move |_| *seen1.borrow_mut() += 1);

        assert!(mgr.unsubscribe(id));
        assert!(!mgr.unsubscribe(id));
        mgr.notify_all(&[change(1)]);
        assert_eq!(*seen.borrow(), 0);
        assert!(mgr.is_empty());
    }

    #[test]
    fn test_empty_batch_not_delivered() {
        let mut mgr = SubscriptionManager::new();
        let seen = Rc::new(RefCell::new(0usize));
        let seen1 = seen.clone();
        mgr.subscribe(move |_| *seen1.borrow_mut() += 1);

        mgr.notify_all(&vec![]);
        assert_eq!(*seen.borrow(), 0);
    }

    #[test]
    fn test_delivery_in_registration_order() {
        let mut mgr = SubscriptionManager::new();
        let log = Rc::new(RefCell::new(vec![]));

        for tag in ["a", "b", "c"] {
            let log = log.clone();
            mgr.subscribe(move |_| log.borrow_mut().push(tag));
        }
        mgr.notify_all(&[change(1)]);
        assert_eq!(*log.borrow(), vec!["a", "b", "c"]);
    }
}
