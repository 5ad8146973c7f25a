//! Rivulet Reactive - Subscription fan-out and filtered change delivery.
//!
//! Collections and live query collections share this crate for their
//! subscriber bookkeeping:
//!
//! - `SubscriptionManager`: id-keyed callback registry with ordered
//!   delivery
//! - `ChangeFilter` / `filter_changes`: predicate- and key-filtered views
//!   of a change batch, converting predicate-straddling updates into
//!   inserts and deletes

#![no_std]

extern crate alloc;

pub mod filtered;
pub mod subscription;

pub use filtered::{filter_changes, ChangeFilter};
pub use subscription::{ChangeCallback, Subscription, SubscriptionId, SubscriptionManager};
