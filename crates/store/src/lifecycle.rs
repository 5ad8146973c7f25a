//! Collection lifecycle and idle garbage collection.

use rivulet_core::Result;
use std::cell::RefCell;
use std::rc::Rc;

/// Collection lifecycle state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CollectionStatus {
    /// Created, sync not started
    Idle,
    /// Sync running, first ready not yet reached
    Loading,
    /// Synced and serving
    Ready,
    /// The sync adapter reported an error
    Error,
    /// Torn down; restarts on the next data access
    CleanedUp,
}

impl CollectionStatus {
    /// Returns the lowercase status name used in errors and logs.
    pub fn name(&self) -> &'static str {
        match self {
            CollectionStatus::Idle => "idle",
            CollectionStatus::Loading => "loading",
            CollectionStatus::Ready => "ready",
            CollectionStatus::Error => "error",
            CollectionStatus::CleanedUp => "cleaned-up",
        }
    }

    /// Validates a lifecycle transition.
    pub fn validate_transition(self, to: CollectionStatus) -> Result<()> {
        use CollectionStatus::*;
        let ok = match (self, to) {
            // cleanup is allowed from anywhere
            (_, CleanedUp) => true,
            (Idle, Loading) => true,
            (Loading, Ready) | (Loading, Error) => true,
            (Ready, Ready) => true, // markReady is idempotent
            (Ready, Error) => true,
            (Error, Loading) | (Error, Ready) => true,
            (CleanedUp, Loading) => true,
            _ => false,
        };
        if ok {
            Ok(())
        } else {
            Err(rivulet_core::Error::invalid_transition(self.name(), to.name()))
        }
    }
}

/// One-shot timer hook used for idle garbage collection.
///
/// The engine never spins a background thread; the host supplies whatever
/// timer primitive it has (an event-loop timeout, a runtime timer). Timer
/// ids are host-scoped.
pub trait GcScheduler {
    /// Schedules `callback` to run once after `delay_ms`.
    fn schedule(&self, delay_ms: u64, callback: Box<dyn FnOnce()>) -> u64;

    /// Cancels a previously scheduled timer.
    fn cancel(&self, timer_id: u64);
}

/// Scheduler that never fires; the default when the host installs none.
#[derive(Default)]
pub struct NoopScheduler;

impl GcScheduler for NoopScheduler {
    fn schedule(&self, _delay_ms: u64, _callback: Box<dyn FnOnce()>) -> u64 {
        0
    }

    fn cancel(&self, _timer_id: u64) {}
}

/// Manually driven scheduler for tests: timers fire when the test says so.
#[derive(Default)]
pub struct ManualScheduler {
    inner: RefCell<ManualInner>,
}

#[derive(Default)]
struct ManualInner {
    next_id: u64,
    pending: Vec<(u64, u64, Option<Box<dyn FnOnce()>>)>,
}

impl ManualScheduler {
    pub fn new() -> Rc<Self> {
        Rc::new(Self::default())
    }

    /// Number of armed timers.
    pub fn pending(&self) -> usize {
        self.inner.borrow().pending.len()
    }

    /// Fires every timer whose delay is within `elapsed_ms`.
    pub fn advance(&self, elapsed_ms: u64) {
        let due: Vec<Box<dyn FnOnce()>> = {
            let mut inner = self.inner.borrow_mut();
            let mut due = Vec::new();
            inner.pending.retain_mut(|(_, delay, cb)| {
                if *delay <= elapsed_ms {
                    if let Some(cb) = cb.take() {
                        due.push(cb);
                    }
                    false
                } else {
                    *delay -= elapsed_ms;
                    true
                }
            });
            due
        };
        for cb in due {
            cb();
        }
    }

    /// Fires every armed timer regardless of delay.
    pub fn fire_all(&self) {
        self.advance(u64::MAX);
    }
}

impl GcScheduler for ManualScheduler {
    fn schedule(&self, delay_ms: u64, callback: Box<dyn FnOnce()>) -> u64 {
        let mut inner = self.inner.borrow_mut();
        inner.next_id += 1;
        let id = inner.next_id;
        inner.pending.push((id, delay_ms, Some(callback)));
        id
    }

    fn cancel(&self, timer_id: u64) {
        self.inner
            .borrow_mut()
            .pending
            .retain(|(id, _, _)| *id != timer_id);
    }
}
