//! The sync adapter boundary.
//!
//! An adapter is handed a `SyncContext` when the collection starts
//! loading. It stages row changes inside sync transactions
//! (`begin` / `write` / `commit`) and flips the collection to ready with
//! `mark_ready`. Readiness is honored on error paths too, so recoverable
//! fetch failures do not block it.

use crate::collection::Collection;
use rivulet_core::{Key, Result, Value};
use std::cell::RefCell;
use std::rc::Rc;

/// One staged row change in a sync transaction.
///
/// The plain variants derive the row key through the collection's key
/// function. The keyed variants carry the key explicitly; pipelines
/// backing live query collections use them, since a derived output key
/// (join pair, group key) is not recoverable from the row alone.
#[derive(Clone, Debug)]
pub enum SyncWrite {
    /// A row now present in the source of truth.
    Insert(Value),
    /// A row whose authoritative value changed (upserts when unseen).
    Update(Value),
    /// A row removed from the source of truth.
    Delete(Value),
    /// Clears the synced state before subsequent writes.
    Truncate,
    /// Insert under an explicit key.
    InsertKeyed(Key, Value),
    /// Upsert under an explicit key.
    UpdateKeyed(Key, Value),
    /// Delete by explicit key.
    DeleteKeyed(Key),
}

/// Staged writes of the open sync transaction.
pub(crate) struct SyncBatch {
    pub(crate) writes: Vec<SyncWrite>,
    pub(crate) committed: bool,
}

impl SyncBatch {
    pub(crate) fn new() -> Self {
        Self {
            writes: Vec::new(),
            committed: false,
        }
    }
}

/// Teardown returned by `SyncAdapter::sync`.
pub type SyncCleanup = Box<dyn FnOnce()>;

/// An external source of truth feeding a collection.
pub trait SyncAdapter {
    /// Starts syncing. The returned cleanup runs once on collection
    /// teardown.
    fn sync(&self, ctx: SyncContext) -> SyncCleanup;

    /// Adapter-specific state surfaced through the collection.
    fn get_sync_metadata(&self) -> Option<Value> {
        None
    }
}

/// The channel an adapter writes through.
#[derive(Clone)]
pub struct SyncContext {
    collection: Collection,
}

impl SyncContext {
    pub(crate) fn new(collection: Collection) -> Self {
        Self { collection }
    }

    /// The collection being synced.
    pub fn collection(&self) -> &Collection {
        &self.collection
    }

    /// Opens a sync transaction, discarding any uncommitted one.
    pub fn begin(&self) {
        self.collection.sync_begin();
    }

    /// Stages a row change. Requires an open, uncommitted transaction.
    pub fn write(&self, write: SyncWrite) -> Result<()> {
        self.collection.sync_write(write)
    }

    /// Applies the staged writes atomically: synced state, indexes, one
    /// subscriber batch, and retirement of subsumed optimistic mutations.
    pub fn commit(&self) -> Result<()> {
        self.collection.sync_commit()
    }

    /// Transitions the collection to ready. Idempotent.
    pub fn mark_ready(&self) -> Result<()> {
        self.collection.mark_ready()
    }

    /// Reports a sync failure; the collection enters the error state but
    /// stays restartable.
    pub fn mark_error(&self, message: &str) {
        self.collection.mark_error(message)
    }
}

/// A hand-driven sync adapter: the creator keeps a handle to the context
/// and feeds writes explicitly. The building block for tests and for
/// adapters that bridge push-based sources.
#[derive(Clone, Default)]
pub struct ManualSync {
    state: Rc<RefCell<ManualSyncState>>,
}

#[derive(Default)]
struct ManualSyncState {
    ctx: Option<SyncContext>,
    started: u32,
    cleaned: u32,
    metadata: Option<Value>,
}

impl ManualSync {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the metadata reported through the collection.
    pub fn set_metadata(&self, metadata: Value) {
        self.state.borrow_mut().metadata = Some(metadata);
    }

    /// The context of the running sync session, if any.
    pub fn ctx(&self) -> Option<SyncContext> {
        self.state.borrow().ctx.clone()
    }

    /// How many times `sync` was invoked (restarts included).
    pub fn started(&self) -> u32 {
        self.state.borrow().started
    }

    /// How many times the cleanup ran.
    pub fn cleaned(&self) -> u32 {
        self.state.borrow().cleaned
    }

    fn active_ctx(&self) -> Result<SyncContext> {
        self.ctx()
            .ok_or_else(|| rivulet_core::Error::missing_config("sync session not started"))
    }

    /// Convenience: one committed batch of writes.
    pub fn push(&self, writes: impl IntoIterator<Item = SyncWrite>) -> Result<()> {
        let ctx = self.active_ctx()?;
        ctx.begin();
        for w in writes {
            ctx.write(w)?;
        }
        ctx.commit()
    }

    /// Convenience: mark the collection ready.
    pub fn ready(&self) -> Result<()> {
        let ctx = self.active_ctx()?;
        ctx.mark_ready()
    }
}

impl SyncAdapter for ManualSync {
    fn sync(&self, ctx: SyncContext) -> SyncCleanup {
        {
            let mut state = self.state.borrow_mut();
            state.ctx = Some(ctx);
            state.started += 1;
        }
        let state = self.state.clone();
        Box::new(move || {
            let mut state = state.borrow_mut();
            state.ctx = None;
            state.cleaned += 1;
        })
    }

    fn get_sync_metadata(&self) -> Option<Value> {
        self.state.borrow().metadata.clone()
    }
}
