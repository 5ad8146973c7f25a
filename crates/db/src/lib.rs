//! Rivulet - a reactive client-side store with live incremental queries.
//!
//! This crate is the public surface of the workspace: collections with
//! optimistic mutations and sync adapters, the query builder, and live
//! query collections that stay incrementally up to date as their inputs
//! change.
//!
//! # Example
//!
//! ```rust
//! use rivulet_db::ir::{col, gt, lit};
//! use rivulet_db::{
//!     create_live_query_collection, key_from_field, query, Collection, CollectionConfig,
//!     LiveQueryConfig, ManualSync, SyncWrite, Value,
//! };
//! use std::rc::Rc;
//!
//! let sync = ManualSync::new();
//! let users = Collection::new(
//!     CollectionConfig::new("users", key_from_field("id"))
//!         .with_sync(Rc::new(sync.clone()))
//!         .with_start_sync(true),
//! )
//! .unwrap();
//! sync.push([
//!     SyncWrite::Insert(Value::object([("id", Value::Int(1)), ("age", Value::Int(30))])),
//!     SyncWrite::Insert(Value::object([("id", Value::Int(2)), ("age", Value::Int(20))])),
//! ])
//! .unwrap();
//! sync.ready().unwrap();
//!
//! let adults = create_live_query_collection(LiveQueryConfig::new(
//!     query()
//!         .from("u", users.as_source())
//!         .unwrap()
//!         .where_(gt(col(["u", "age"]), lit(25)))
//!         .build(),
//! ))
//! .unwrap();
//!
//! assert_eq!(adults.len(), 1);
//! ```

mod live;

pub use live::{create_live_query_collection, LiveQueryConfig};

// Core types
pub use rivulet_core::{
    key_from_field, ChangeBatch, ChangeType, Error, Key, KeyFn, KeySet, PropPath, Result,
    RowChange, ValidationIssue, Value,
};

// Drafts
pub use rivulet_draft::{ArrayCursor, Draft, ObjectCursor};

// Indexes
pub use rivulet_index::{IndexId, IndexKind, IndexOp};

// Query surface
pub use rivulet_query::builder::{query, QueryBuilder};
pub use rivulet_query::ir;
pub use rivulet_query::ir::{CollectionRef, Expr, Query};
pub use rivulet_query::{compile, eval, eval_predicate, optimize_where, Pipeline};

// Incremental building blocks
pub use rivulet_incremental::{consolidate, DeltaBatch, JoinKind, RowDelta};

// Reactive
pub use rivulet_reactive::{filter_changes, ChangeFilter};

// Store surface
pub use rivulet_store::{
    ambient_transaction, optimistic_action, AutoIndex, ChangesHandle, Collection,
    CollectionConfig, CollectionStatus, GcScheduler, ManualScheduler, ManualSync, Mutation,
    MutationFn, NoopScheduler, PersistedFuture, SchemaValidator, StatusHandle, SubscribeOptions,
    SyncAdapter, SyncCleanup, SyncContext, SyncWrite, Transaction, TxConfig, TxId, TxState,
    DEFAULT_GC_TIME_MS,
};
