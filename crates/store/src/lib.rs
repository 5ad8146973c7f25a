//! Rivulet Store - Collections, optimistic transactions and the sync
//! boundary.
//!
//! This crate holds the stateful heart of Rivulet:
//!
//! - `Collection`: dual-state row store (synced state plus optimistic
//!   overlays), change fan-out, lifecycle with idle GC, index registry
//! - `Transaction`: optimistic mutation lifecycle over a process-wide
//!   FIFO commit queue
//! - `SyncAdapter` / `SyncContext`: the boundary to the external source
//!   of truth
//! - `SchemaValidator`: the synchronous validate hook run before every
//!   optimistic mutation
//!
//! # Example
//!
//! ```rust
//! use futures::FutureExt;
//! use rivulet_core::{key_from_field, Key, Value};
//! use rivulet_store::{Collection, CollectionConfig, ManualSync, SyncWrite};
//! use std::rc::Rc;
//!
//! let sync = ManualSync::new();
//! let users = Collection::new(
//!     CollectionConfig::new("users", key_from_field("id"))
//!         .with_sync(Rc::new(sync.clone()))
//!         .with_start_sync(true)
//!         .with_on_insert(Rc::new(|_tx| async { Ok(Value::Null) }.boxed_local())),
//! )
//! .unwrap();
//!
//! sync.push([SyncWrite::Insert(Value::object([
//!     ("id", Value::Int(1)),
//!     ("name", Value::from("Ada")),
//! ]))])
//! .unwrap();
//! sync.ready().unwrap();
//!
//! assert_eq!(users.get(&Key::Int(1)).unwrap().field("name"), Some(&Value::from("Ada")));
//! ```

pub mod collection;
pub mod lifecycle;
pub mod schema;
pub mod sync;
pub mod transactions;

pub use collection::{
    AutoIndex, ChangesHandle, Collection, CollectionConfig, PreloadFuture, StatusHandle,
    SubscribeOptions, DEFAULT_GC_TIME_MS,
};
pub use lifecycle::{CollectionStatus, GcScheduler, ManualScheduler, NoopScheduler};
pub use schema::SchemaValidator;
pub use sync::{ManualSync, SyncAdapter, SyncCleanup, SyncContext, SyncWrite};
pub use transactions::{
    ambient_transaction, optimistic_action, Mutation, MutationFn, PersistedFuture, Transaction,
    TxCollection, TxConfig, TxId, TxState,
};

// Shared filter types re-exported for subscription options.
pub use rivulet_reactive::ChangeFilter;
