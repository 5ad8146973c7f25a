//! Collections: keyed row stores with synced state and optimistic
//! overlays.
//!
//! A collection holds the authoritative synced state (written only by the
//! sync adapter) plus the overlays of active transactions. Readers always
//! see the visible state: synced values with each active transaction's
//! last mutation per key applied in attach order.

use crate::lifecycle::{CollectionStatus, GcScheduler, NoopScheduler};
use crate::schema::{validate_row, SchemaValidator};
use crate::sync::{SyncAdapter, SyncBatch, SyncContext, SyncWrite};
use crate::transactions::{
    ambient_transaction, Mutation, MutationFn, Transaction, TxCollection, TxId,
};
use futures::channel::oneshot;
use hashbrown::HashSet;
use rivulet_core::{ChangeType, Error, Key, KeyFn, PropPath, Result, RowChange, Value};
use rivulet_draft::Draft;
use rivulet_index::{IndexId, IndexKind, IndexRegistry, OrdMap};
use rivulet_query::ir::CollectionRef;
use rivulet_query::optimizer::{auto_index_paths, optimize_where};
use rivulet_reactive::{filter_changes, ChangeFilter, SubscriptionId, SubscriptionManager};
use std::cell::RefCell;
use std::future::Future;
use std::pin::Pin;
use std::rc::{Rc, Weak};
use std::task::{Context, Poll};

thread_local! {
    static NEXT_COLLECTION_ID: RefCell<u64> = const { RefCell::new(1) };
    static REGISTRY: RefCell<Vec<(u64, Weak<RefCell<CollectionInner>>)>> =
        const { RefCell::new(Vec::new()) };
}

fn next_collection_id() -> u64 {
    NEXT_COLLECTION_ID.with(|n| {
        let mut n = n.borrow_mut();
        let id = *n;
        *n += 1;
        id
    })
}

fn register_collection(id: u64, inner: &Rc<RefCell<CollectionInner>>) {
    REGISTRY.with(|r| {
        let mut r = r.borrow_mut();
        r.retain(|(_, weak)| weak.strong_count() > 0);
        r.push((id, Rc::downgrade(inner)));
    });
}

/// Auto-indexing policy for subscription predicates.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum AutoIndex {
    Off,
    #[default]
    Eager,
}

/// Collection configuration.
pub struct CollectionConfig {
    name: String,
    get_key: KeyFn,
    sync: Option<Rc<dyn SyncAdapter>>,
    schema: Option<Rc<dyn SchemaValidator>>,
    on_insert: Option<MutationFn>,
    on_update: Option<MutationFn>,
    on_delete: Option<MutationFn>,
    start_sync: bool,
    gc_time_ms: u64,
    auto_index: AutoIndex,
    gc_scheduler: Rc<dyn GcScheduler>,
}

/// Default idle time before an unobserved collection is garbage
/// collected.
pub const DEFAULT_GC_TIME_MS: u64 = 5_000;

impl CollectionConfig {
    /// Starts a configuration with the required pieces: a name and a key
    /// function.
    pub fn new(name: impl Into<String>, get_key: KeyFn) -> Self {
        Self {
            name: name.into(),
            get_key,
            sync: None,
            schema: None,
            on_insert: None,
            on_update: None,
            on_delete: None,
            start_sync: false,
            gc_time_ms: DEFAULT_GC_TIME_MS,
            auto_index: AutoIndex::default(),
            gc_scheduler: Rc::new(NoopScheduler),
        }
    }

    /// Sets the sync adapter (required).
    pub fn with_sync(mut self, sync: Rc<dyn SyncAdapter>) -> Self {
        self.sync = Some(sync);
        self
    }

    /// Sets the schema validator.
    pub fn with_schema(mut self, schema: Rc<dyn SchemaValidator>) -> Self {
        self.schema = Some(schema);
        self
    }

    /// Sets the insert handler used by implicit transactions.
    pub fn with_on_insert(mut self, handler: MutationFn) -> Self {
        self.on_insert = Some(handler);
        self
    }

    /// Sets the update handler used by implicit transactions.
    pub fn with_on_update(mut self, handler: MutationFn) -> Self {
        self.on_update = Some(handler);
        self
    }

    /// Sets the delete handler used by implicit transactions.
    pub fn with_on_delete(mut self, handler: MutationFn) -> Self {
        self.on_delete = Some(handler);
        self
    }

    /// Starts the sync adapter at construction instead of on first use.
    pub fn with_start_sync(mut self, start: bool) -> Self {
        self.start_sync = start;
        self
    }

    /// Overrides the idle GC time.
    pub fn with_gc_time_ms(mut self, ms: u64) -> Self {
        self.gc_time_ms = ms;
        self
    }

    /// Overrides the auto-index policy.
    pub fn with_auto_index(mut self, policy: AutoIndex) -> Self {
        self.auto_index = policy;
        self
    }

    /// Installs the host timer used for idle GC.
    pub fn with_gc_scheduler(mut self, scheduler: Rc<dyn GcScheduler>) -> Self {
        self.gc_scheduler = scheduler;
        self
    }
}

/// A mutation layered over the synced state by an active transaction.
#[derive(Clone, Debug)]
struct OverlayMutation {
    mutation_type: ChangeType,
    key: Key,
    original: Option<Value>,
    modified: Option<Value>,
}

struct OverlayTx {
    tx_id: TxId,
    mutations: Vec<OverlayMutation>,
}

type StatusCallback = Rc<dyn Fn(CollectionStatus)>;

pub(crate) struct CollectionInner {
    id: u64,
    name: String,
    get_key: KeyFn,
    sync: Rc<dyn SyncAdapter>,
    schema: Option<Rc<dyn SchemaValidator>>,
    on_insert: Option<MutationFn>,
    on_update: Option<MutationFn>,
    on_delete: Option<MutationFn>,
    gc_time_ms: u64,
    auto_index: AutoIndex,
    gc_scheduler: Rc<dyn GcScheduler>,

    status: CollectionStatus,
    synced: OrdMap<Key, Value>,
    overlays: Vec<OverlayTx>,
    indexes: IndexRegistry,
    subscribers: SubscriptionManager,
    status_subs: Vec<(u64, StatusCallback)>,
    next_status_sub: u64,
    pending_sync: Option<SyncBatch>,
    sync_cleanup: Option<Box<dyn FnOnce()>>,
    ready_waiters: Vec<oneshot::Sender<()>>,
    gc_timer: Option<u64>,
}

/// A keyed, observable row store (cheaply cloneable handle).
#[derive(Clone)]
pub struct Collection {
    inner: Rc<RefCell<CollectionInner>>,
}

impl core::fmt::Debug for Collection {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("Collection")
            .field("id", &inner.id)
            .field("name", &inner.name)
            .field("status", &inner.status)
            .finish()
    }
}

/// Options for `subscribe_changes`.
#[derive(Clone, Default)]
pub struct SubscribeOptions {
    /// Deliver the current visible state as a synthetic insert burst.
    pub include_initial_state: bool,
    /// Row / key filter applied to delivered batches.
    pub filter: ChangeFilter,
}

impl Collection {
    /// Creates a collection. A sync adapter is required.
    pub fn new(config: CollectionConfig) -> Result<Self> {
        if config.name.is_empty() {
            return Err(Error::missing_config("name"));
        }
        let sync = config.sync.ok_or(Error::MissingSync)?;

        let collection = Self {
            inner: Rc::new(RefCell::new(CollectionInner {
                id: next_collection_id(),
                name: config.name,
                get_key: config.get_key,
                sync,
                schema: config.schema,
                on_insert: config.on_insert,
                on_update: config.on_update,
                on_delete: config.on_delete,
                gc_time_ms: config.gc_time_ms,
                auto_index: config.auto_index,
                gc_scheduler: config.gc_scheduler,
                status: CollectionStatus::Idle,
                synced: OrdMap::new(),
                overlays: Vec::new(),
                indexes: IndexRegistry::new(),
                subscribers: SubscriptionManager::new(),
                status_subs: Vec::new(),
                next_status_sub: 1,
                pending_sync: None,
                sync_cleanup: None,
                ready_waiters: Vec::new(),
                gc_timer: None,
            })),
        };

        register_collection(collection.id(), &collection.inner);
        if config.start_sync {
            collection.start_sync()?;
        }
        Ok(collection)
    }

    /// Looks up a live collection handle by id, as carried in a query
    /// `CollectionRef`.
    pub fn by_id(id: u64) -> Option<Collection> {
        REGISTRY.with(|r| {
            r.borrow()
                .iter()
                .find(|(cid, _)| *cid == id)
                .and_then(|(_, weak)| weak.upgrade())
                .map(|inner| Collection { inner })
        })
    }

    /// Returns the unique collection id.
    pub fn id(&self) -> u64 {
        self.inner.borrow().id
    }

    /// Returns the collection name.
    pub fn name(&self) -> String {
        self.inner.borrow().name.clone()
    }

    /// Returns the lifecycle status.
    pub fn status(&self) -> CollectionStatus {
        self.inner.borrow().status
    }

    /// Returns a query source reference for this collection.
    pub fn as_source(&self) -> CollectionRef {
        let inner = self.inner.borrow();
        CollectionRef::new(inner.id, inner.name.clone())
    }

    // ----- reads ---------------------------------------------------------

    /// Returns the visible value for a key.
    pub fn get(&self, key: &Key) -> Option<Value> {
        self.restart_if_cleaned();
        visible_get(&self.inner.borrow(), key)
    }

    /// Returns true if the key exists in the visible state.
    pub fn has(&self, key: &Key) -> bool {
        self.get(key).is_some()
    }

    /// Number of visible rows.
    pub fn len(&self) -> usize {
        self.restart_if_cleaned();
        let inner = self.inner.borrow();
        visible_keys(&inner).len()
    }

    /// True when no rows are visible.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Visible keys, insertion order by first appearance.
    pub fn keys(&self) -> Vec<Key> {
        self.restart_if_cleaned();
        visible_keys(&self.inner.borrow())
    }

    /// Visible values, matching `keys()` order.
    pub fn values(&self) -> Vec<Value> {
        self.entries().into_iter().map(|(_, v)| v).collect()
    }

    /// Visible entries, matching `keys()` order.
    pub fn entries(&self) -> Vec<(Key, Value)> {
        self.restart_if_cleaned();
        let inner = self.inner.borrow();
        visible_keys(&inner)
            .into_iter()
            .filter_map(|k| visible_get(&inner, &k).map(|v| (k, v)))
            .collect()
    }

    /// Snapshot of the visible state (alias for `entries`).
    pub fn snapshot(&self) -> Vec<(Key, Value)> {
        self.entries()
    }

    // ----- mutations ------------------------------------------------------

    /// Inserts a row. Outside `Transaction::mutate`, an implicit
    /// auto-commit transaction runs the collection's `on_insert` handler.
    pub fn insert(&self, value: Value) -> Result<Transaction> {
        self.insert_many(vec![value])
    }

    /// Inserts several rows as one transaction and one change batch.
    pub fn insert_many(&self, values: Vec<Value>) -> Result<Transaction> {
        self.restart_if_cleaned();
        if values.is_empty() {
            return Err(Error::NoKeysPassed);
        }

        // Validate everything before recording anything.
        let mut staged: Vec<OverlayMutation> = Vec::new();
        {
            let inner = self.inner.borrow();
            let mut batch_keys: Vec<Key> = Vec::new();
            for value in &values {
                validate_row(inner.schema.as_ref(), value, ChangeType::Insert)?;
                let key = (inner.get_key)(value)?;
                if visible_get(&inner, &key).is_some() || batch_keys.contains(&key) {
                    return Err(Error::duplicate_key(key));
                }
                batch_keys.push(key.clone());
                staged.push(OverlayMutation {
                    mutation_type: ChangeType::Insert,
                    key,
                    original: None,
                    modified: Some(value.clone()),
                });
            }
        }

        let tx = self.transaction_for(ChangeType::Insert)?;
        self.apply_mutations(&tx, staged);
        self.finish_implicit(tx)
    }

    /// Updates a row through a change-tracking draft.
    pub fn update(&self, key: &Key, mutator: impl FnOnce(&mut Draft)) -> Result<Transaction> {
        let mut mutator = Some(mutator);
        self.update_many(std::slice::from_ref(key), move |draft| {
            if let Some(m) = mutator.take() {
                m(draft)
            }
        })
    }

    /// Updates several rows with the same mutator, as one transaction.
    pub fn update_many(
        &self,
        keys: &[Key],
        mut mutator: impl FnMut(&mut Draft),
    ) -> Result<Transaction> {
        self.restart_if_cleaned();
        if keys.is_empty() {
            return Err(Error::NoKeysPassed);
        }

        // Snapshot the targets first so the mutator runs without any
        // collection borrow held.
        let originals: Vec<(Key, Value)> = {
            let inner = self.inner.borrow();
            keys.iter()
                .map(|key| {
                    visible_get(&inner, key)
                        .map(|v| (key.clone(), v))
                        .ok_or_else(|| Error::update_key_not_found(key.clone()))
                })
                .collect::<Result<_>>()?
        };

        let mut edited: Vec<(Key, Value, Value, Value)> = Vec::new();
        for (key, original) in originals {
            let mut draft = Draft::new(original.clone());
            mutator(&mut draft);
            if draft.is_unchanged() {
                continue;
            }
            let changes = draft.changes();
            let modified = draft.into_value();
            edited.push((key, original, modified, changes));
        }

        let mut staged: Vec<OverlayMutation> = Vec::new();
        let mut diffs: Vec<Value> = Vec::new();
        {
            let inner = self.inner.borrow();
            for (key, original, modified, changes) in edited {
                validate_row(inner.schema.as_ref(), &modified, ChangeType::Update)?;
                let new_key = (inner.get_key)(&modified)?;
                if new_key != key {
                    return Err(Error::key_change_not_allowed(key, new_key));
                }
                staged.push(OverlayMutation {
                    mutation_type: ChangeType::Update,
                    key,
                    original: Some(original),
                    modified: Some(modified),
                });
                diffs.push(changes);
            }
        }

        if staged.is_empty() {
            // Every draft reverted to its original value.
            return Ok(ambient_transaction().unwrap_or_else(Transaction::completed_empty));
        }

        let tx = self.transaction_for(ChangeType::Update)?;
        self.apply_mutations_with_changes(&tx, staged, Some(diffs));
        self.finish_implicit(tx)
    }

    /// Deletes a row.
    pub fn delete(&self, key: &Key) -> Result<Transaction> {
        self.delete_many(std::slice::from_ref(key))
    }

    /// Deletes several rows as one transaction.
    pub fn delete_many(&self, keys: &[Key]) -> Result<Transaction> {
        self.restart_if_cleaned();
        if keys.is_empty() {
            return Err(Error::NoKeysPassed);
        }

        let mut staged: Vec<OverlayMutation> = Vec::new();
        {
            let inner = self.inner.borrow();
            for key in keys {
                let original = visible_get(&inner, key)
                    .ok_or_else(|| Error::delete_key_not_found(key.clone()))?;
                staged.push(OverlayMutation {
                    mutation_type: ChangeType::Delete,
                    key: key.clone(),
                    original: Some(original),
                    modified: None,
                });
            }
        }

        let tx = self.transaction_for(ChangeType::Delete)?;
        self.apply_mutations(&tx, staged);
        self.finish_implicit(tx)
    }

    /// Picks the ambient transaction or builds an implicit one from the
    /// configured handler for the operation.
    fn transaction_for(&self, op: ChangeType) -> Result<Transaction> {
        if let Some(ambient) = ambient_transaction() {
            return Ok(ambient);
        }
        let inner = self.inner.borrow();
        let handler = match op {
            ChangeType::Insert => inner.on_insert.clone().ok_or(Error::MissingInsertHandler)?,
            ChangeType::Update => inner.on_update.clone().ok_or(Error::MissingUpdateHandler)?,
            ChangeType::Delete => inner.on_delete.clone().ok_or(Error::MissingDeleteHandler)?,
        };
        Ok(Transaction::with_handler(handler, true, None))
    }

    fn apply_mutations(&self, tx: &Transaction, staged: Vec<OverlayMutation>) {
        self.apply_mutations_with_changes(tx, staged, None)
    }

    /// Records the mutations in the transaction, layers them as this
    /// collection's overlay, and emits one optimistic change batch.
    fn apply_mutations_with_changes(
        &self,
        tx: &Transaction,
        staged: Vec<OverlayMutation>,
        diffs: Option<Vec<Value>>,
    ) {
        let host: Rc<dyn TxCollection> = Rc::new(self.clone());
        let mut batch: Vec<RowChange> = Vec::new();
        {
            let mut inner = self.inner.borrow_mut();
            let pos = match inner.overlays.iter().position(|o| o.tx_id == tx.id()) {
                Some(pos) => pos,
                None => {
                    inner.overlays.push(OverlayTx {
                        tx_id: tx.id(),
                        mutations: Vec::new(),
                    });
                    inner.overlays.len() - 1
                }
            };
            let overlay = &mut inner.overlays[pos];
            for m in &staged {
                overlay.mutations.push(m.clone());
                batch.push(match m.mutation_type {
                    ChangeType::Insert => RowChange::insert(
                        m.key.clone(),
                        m.modified.clone().unwrap_or(Value::Null),
                    ),
                    ChangeType::Update => RowChange::update(
                        m.key.clone(),
                        m.modified.clone().unwrap_or(Value::Null),
                        m.original.clone().unwrap_or(Value::Null),
                    ),
                    ChangeType::Delete => RowChange::delete(
                        m.key.clone(),
                        m.original.clone().unwrap_or(Value::Null),
                    ),
                });
            }
        }
        let collection_id = self.id();
        for (i, m) in staged.into_iter().enumerate() {
            tx.add_mutation(
                host.clone(),
                Mutation {
                    collection_id,
                    mutation_type: m.mutation_type,
                    key: m.key,
                    original: m.original,
                    modified: m.modified,
                    changes: diffs.as_ref().and_then(|d| d.get(i).cloned()),
                },
            );
        }
        self.emit(batch);
    }

    /// Commits an implicit transaction; explicit (ambient) transactions
    /// are returned untouched.
    fn finish_implicit(&self, tx: Transaction) -> Result<Transaction> {
        if ambient_transaction().map(|a| a.id()) == Some(tx.id()) {
            return Ok(tx);
        }
        tx.commit()?;
        Ok(tx)
    }

    // ----- subscriptions --------------------------------------------------

    /// Subscribes to change batches. Returns a handle that unsubscribes
    /// when dropped.
    pub fn subscribe_changes(
        &self,
        cb: impl Fn(&[RowChange]) + 'static,
        opts: SubscribeOptions,
    ) -> Result<ChangesHandle> {
        self.restart_if_cleaned();
        self.ensure_indexes_for(&opts.filter);

        let user_cb: Rc<dyn Fn(&[RowChange])> = Rc::new(cb);
        let id = {
            let mut inner = self.inner.borrow_mut();
            let filter = opts.filter.clone();
            let delivery = user_cb.clone();
            let id = inner.subscribers.subscribe(move |batch| {
                let filtered = filter_changes(&filter, batch);
                if !filtered.is_empty() {
                    delivery(&filtered);
                }
            });
            if let Some(timer) = inner.gc_timer.take() {
                inner.gc_scheduler.cancel(timer);
            }
            id
        };

        if opts.include_initial_state {
            let initial = self.state_as_changes(&opts.filter);
            if !initial.is_empty() {
                user_cb(&initial);
            }
        }

        Ok(ChangesHandle {
            inner: Rc::downgrade(&self.inner),
            id,
        })
    }

    /// Subscribes to changes for specific keys only.
    pub fn subscribe_changes_keys(
        &self,
        keys: impl IntoIterator<Item = Key>,
        cb: impl Fn(&[RowChange]) + 'static,
        opts: SubscribeOptions,
    ) -> Result<ChangesHandle> {
        let mut opts = opts;
        opts.filter.keys = Some(keys.into_iter().collect());
        self.subscribe_changes(cb, opts)
    }

    /// Subscribes to lifecycle transitions.
    pub fn subscribe_status(&self, cb: impl Fn(CollectionStatus) + 'static) -> StatusHandle {
        let mut inner = self.inner.borrow_mut();
        let id = inner.next_status_sub;
        inner.next_status_sub += 1;
        inner.status_subs.push((id, Rc::new(cb)));
        StatusHandle {
            inner: Rc::downgrade(&self.inner),
            id,
        }
    }

    /// Applies the eager auto-index policy to a predicate: ensures an
    /// ordered index per eligible single-field comparison. Subscriptions
    /// run this implicitly; live query pipelines call it for their
    /// pushed-down scan filters.
    pub fn ensure_indexes_for(&self, filter: &ChangeFilter) {
        let expr = {
            let inner = self.inner.borrow();
            if inner.auto_index != AutoIndex::Eager {
                return;
            }
            match &filter.where_expr {
                Some(e) => e.clone(),
                None => return,
            }
        };
        for path in auto_index_paths(&[expr], None) {
            self.create_index(path, IndexKind::Ordered);
        }
    }

    /// Snapshot of the visible state as insert changes, probing indexes
    /// where the filter allows.
    pub fn current_state_as_changes(&self, filter: &ChangeFilter) -> Vec<RowChange> {
        self.restart_if_cleaned();
        self.state_as_changes(filter)
    }

    fn state_as_changes(&self, filter: &ChangeFilter) -> Vec<RowChange> {
        let mut inner = self.inner.borrow_mut();
        let inner = &mut *inner;

        if let Some(expr) = &filter.where_expr {
            let wheres = [expr.clone()];
            let probe = optimize_where(&wheres, None, &mut inner.indexes);
            if probe.can_optimize {
                // Probe keys cover the synced state; overlay-touched keys
                // are layered on top and re-checked row-wise.
                let mut candidates: Vec<Key> = probe.matching_keys.iter().cloned().collect();
                for overlay in &inner.overlays {
                    for m in &overlay.mutations {
                        if !candidates.contains(&m.key) {
                            candidates.push(m.key.clone());
                        }
                    }
                }
                return candidates
                    .into_iter()
                    .filter(|k| filter.matches_key(k))
                    .filter_map(|k| visible_get(inner, &k).map(|v| (k, v)))
                    .filter(|(_, v)| filter.matches_row(v))
                    .map(|(k, v)| RowChange::insert(k, v))
                    .collect();
            }
        }

        visible_keys(inner)
            .into_iter()
            .filter(|k| filter.matches_key(k))
            .filter_map(|k| visible_get(inner, &k).map(|v| (k, v)))
            .filter(|(_, v)| filter.matches_row(v))
            .map(|(k, v)| RowChange::insert(k, v))
            .collect()
    }

    // ----- indexes --------------------------------------------------------

    /// Creates (or reuses) an index over a row-relative field path.
    pub fn create_index(&self, path: PropPath, kind: IndexKind) -> IndexId {
        let mut inner = self.inner.borrow_mut();
        let inner = &mut *inner;
        let snapshot: Vec<(Key, Value)> = inner
            .synced
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        inner
            .indexes
            .create_index(path, kind, &mut snapshot.into_iter())
    }

    /// Number of registered indexes.
    pub fn index_count(&self) -> usize {
        self.inner.borrow().indexes.len()
    }

    /// Number of index probes answered so far (test hook).
    pub fn index_probe_count(&self) -> u64 {
        self.inner.borrow().indexes.probe_count()
    }

    // ----- lifecycle ------------------------------------------------------

    /// Starts the sync adapter. Idempotent while loading or ready.
    pub fn start_sync(&self) -> Result<()> {
        {
            let inner = self.inner.borrow();
            if matches!(
                inner.status,
                CollectionStatus::Loading | CollectionStatus::Ready
            ) {
                return Ok(());
            }
            inner.status.validate_transition(CollectionStatus::Loading)?;
        }
        self.set_status(CollectionStatus::Loading);
        log::debug!("collection {} starting sync", self.name());

        let adapter = self.inner.borrow().sync.clone();
        let cleanup = adapter.sync(SyncContext::new(self.clone()));
        self.inner.borrow_mut().sync_cleanup = Some(cleanup);
        Ok(())
    }

    /// Resolves once the collection first reaches `Ready`. Starts sync if
    /// it has not started yet.
    pub fn preload(&self) -> PreloadFuture {
        if matches!(
            self.status(),
            CollectionStatus::Idle | CollectionStatus::CleanedUp
        ) {
            if let Err(e) = self.start_sync() {
                log::warn!("preload could not start sync: {}", e);
            }
        }
        let (tx, rx) = oneshot::channel();
        if self.status() == CollectionStatus::Ready {
            let _ = tx.send(());
        } else {
            self.inner.borrow_mut().ready_waiters.push(tx);
        }
        PreloadFuture { rx }
    }

    /// Tears the collection down: runs the adapter cleanup, clears data
    /// and transitions to `CleanedUp`.
    pub fn cleanup(&self) -> Result<()> {
        let (cleanup_fn, timer) = {
            let mut inner = self.inner.borrow_mut();
            inner
                .status
                .validate_transition(CollectionStatus::CleanedUp)?;
            inner.synced.clear();
            inner.overlays.clear();
            inner.indexes.clear_entries();
            inner.pending_sync = None;
            inner.ready_waiters.clear();
            (inner.sync_cleanup.take(), inner.gc_timer.take())
        };
        if let Some(timer) = timer {
            self.inner.borrow().gc_scheduler.cancel(timer);
        }
        if let Some(cleanup) = cleanup_fn {
            cleanup();
        }
        self.set_status(CollectionStatus::CleanedUp);
        log::debug!("collection {} cleaned up", self.name());
        Ok(())
    }

    /// Restarts a cleaned-up collection when data is accessed again.
    fn restart_if_cleaned(&self) {
        if self.status() == CollectionStatus::CleanedUp {
            if let Err(e) = self.start_sync() {
                log::warn!("restart after cleanup failed: {}", e);
            }
        }
    }

    fn set_status(&self, status: CollectionStatus) {
        let (subs, changed) = {
            let mut inner = self.inner.borrow_mut();
            let changed = inner.status != status;
            inner.status = status;
            (inner.status_subs.clone(), changed)
        };
        if changed {
            for (_, cb) in subs {
                cb(status);
            }
        }
    }

    /// Adapter-reported metadata.
    pub fn sync_metadata(&self) -> Option<Value> {
        let adapter = self.inner.borrow().sync.clone();
        adapter.get_sync_metadata()
    }

    // ----- sync channel (called via SyncContext) -------------------------

    pub(crate) fn sync_begin(&self) {
        let mut inner = self.inner.borrow_mut();
        inner.pending_sync = Some(SyncBatch::new());
    }

    pub(crate) fn sync_write(&self, write: SyncWrite) -> Result<()> {
        let mut inner = self.inner.borrow_mut();
        match &mut inner.pending_sync {
            None => Err(Error::NoPendingSyncTransaction),
            Some(batch) if batch.committed => Err(Error::SyncTransactionAlreadyCommitted),
            Some(batch) => {
                batch.writes.push(write);
                Ok(())
            }
        }
    }

    pub(crate) fn sync_commit(&self) -> Result<()> {
        let batch = {
            let mut inner = self.inner.borrow_mut();
            match &mut inner.pending_sync {
                None => return Err(Error::NoPendingSyncTransaction),
                Some(batch) if batch.committed => {
                    return Err(Error::SyncTransactionAlreadyCommitted)
                }
                Some(batch) => {
                    batch.committed = true;
                    std::mem::take(&mut batch.writes)
                }
            }
        };
        self.apply_sync_writes(batch)
    }

    pub(crate) fn mark_ready(&self) -> Result<()> {
        {
            let inner = self.inner.borrow();
            inner.status.validate_transition(CollectionStatus::Ready)?;
        }
        self.set_status(CollectionStatus::Ready);
        let waiters = std::mem::take(&mut self.inner.borrow_mut().ready_waiters);
        for waiter in waiters {
            let _ = waiter.send(());
        }
        log::debug!("collection {} ready", self.name());
        Ok(())
    }

    pub(crate) fn mark_error(&self, message: &str) {
        log::warn!("collection {} sync error: {}", self.name(), message);
        let allowed = {
            let inner = self.inner.borrow();
            inner
                .status
                .validate_transition(CollectionStatus::Error)
                .is_ok()
        };
        if allowed {
            self.set_status(CollectionStatus::Error);
        }
    }

    /// Applies a committed sync batch: synced state, index maintenance,
    /// overlay subsumption and one subscriber batch.
    fn apply_sync_writes(&self, writes: Vec<SyncWrite>) -> Result<()> {
        if writes.is_empty() {
            return Ok(());
        }
        let mut batch: Vec<RowChange> = Vec::new();
        {
            let mut inner = self.inner.borrow_mut();
            let inner = &mut *inner;

            // Resolve write keys and validate inserts up front so the
            // batch applies atomically.
            enum Op {
                Upsert { insert: bool },
                Delete,
                Truncate,
            }
            let mut resolved: Vec<(Op, Option<Key>, Option<Value>)> = Vec::new();
            let mut present: HashSet<Key> = inner.synced.keys().cloned().collect();
            for write in writes {
                let (op, key, value) = match write {
                    SyncWrite::Truncate => (Op::Truncate, None, None),
                    SyncWrite::Insert(value) => {
                        let key = (inner.get_key)(&value)?;
                        (Op::Upsert { insert: true }, Some(key), Some(value))
                    }
                    SyncWrite::InsertKeyed(key, value) => {
                        (Op::Upsert { insert: true }, Some(key), Some(value))
                    }
                    SyncWrite::Update(value) => {
                        let key = (inner.get_key)(&value)?;
                        (Op::Upsert { insert: false }, Some(key), Some(value))
                    }
                    SyncWrite::UpdateKeyed(key, value) => {
                        (Op::Upsert { insert: false }, Some(key), Some(value))
                    }
                    SyncWrite::Delete(value) => {
                        let key = (inner.get_key)(&value)?;
                        (Op::Delete, Some(key), None)
                    }
                    SyncWrite::DeleteKeyed(key) => (Op::Delete, Some(key), None),
                };
                match (&op, &key) {
                    (Op::Truncate, _) => present.clear(),
                    (Op::Upsert { insert: true }, Some(key)) => {
                        if present.contains(key) {
                            let same = inner.synced.get(key) == value.as_ref();
                            if !same {
                                return Err(Error::SyncedDuplicateKey { key: key.clone() });
                            }
                        } else {
                            present.insert(key.clone());
                        }
                    }
                    (Op::Upsert { insert: false }, Some(key)) => {
                        present.insert(key.clone());
                    }
                    (Op::Delete, Some(key)) => {
                        present.remove(key);
                    }
                    _ => {}
                }
                resolved.push((op, key, value));
            }

            // Affected keys: write targets, plus everything visible when a
            // truncate wipes the synced state.
            let mut affected: Vec<Key> = Vec::new();
            let mut seen: HashSet<Key> = HashSet::new();
            if resolved.iter().any(|(op, _, _)| matches!(op, Op::Truncate)) {
                affected = visible_keys(inner);
                seen.extend(affected.iter().cloned());
            }
            for (_, key, _) in &resolved {
                if let Some(key) = key {
                    if seen.insert(key.clone()) {
                        affected.push(key.clone());
                    }
                }
            }

            let before: Vec<(Key, Option<Value>)> = affected
                .iter()
                .map(|k| (k.clone(), visible_get(inner, k)))
                .collect();

            for (op, key, value) in resolved {
                match (op, key, value) {
                    (Op::Truncate, _, _) => {
                        inner.synced.clear();
                        inner.indexes.clear_entries();
                    }
                    (Op::Upsert { .. }, Some(key), Some(value)) => {
                        let old = inner.synced.get(&key).cloned();
                        if old.as_ref() == Some(&value) {
                            continue;
                        }
                        match &old {
                            Some(o) => inner.indexes.apply_change(
                                ChangeType::Update,
                                &key,
                                Some(o),
                                Some(&value),
                            ),
                            None => inner.indexes.apply_change(
                                ChangeType::Insert,
                                &key,
                                None,
                                Some(&value),
                            ),
                        }
                        inner.synced.insert(key, value);
                    }
                    (Op::Delete, Some(key), _) => {
                        if let Some(old) = inner.synced.remove(&key) {
                            inner.indexes.apply_change(
                                ChangeType::Delete,
                                &key,
                                Some(&old),
                                None,
                            );
                        }
                    }
                    _ => {}
                }
            }

            // Retire optimistic mutations now subsumed by the synced state.
            for overlay in &mut inner.overlays {
                overlay.mutations.retain(|m| {
                    let synced = inner.synced.get(&m.key);
                    let subsumed = match m.mutation_type {
                        ChangeType::Insert | ChangeType::Update => {
                            synced.is_some() && synced == m.modified.as_ref()
                        }
                        ChangeType::Delete => synced.is_none(),
                    };
                    !subsumed
                });
            }

            for (key, old) in before {
                let new = visible_get(inner, &key);
                push_diff(&mut batch, key, old, new);
            }
        }
        self.emit(batch);
        Ok(())
    }

    // ----- internals ------------------------------------------------------

    /// Delivers a batch to subscribers without holding any borrow.
    fn emit(&self, batch: Vec<RowChange>) {
        if batch.is_empty() {
            return;
        }
        let callbacks = self.inner.borrow().subscribers.snapshot();
        for cb in callbacks {
            cb(&batch);
        }
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        let arm = {
            let mut inner = self.inner.borrow_mut();
            inner.subscribers.unsubscribe(id);
            inner.subscribers.is_empty() && inner.status == CollectionStatus::Ready
        };
        if arm {
            self.arm_gc_timer();
        }
    }

    fn arm_gc_timer(&self) {
        let weak = Rc::downgrade(&self.inner);
        let (scheduler, delay) = {
            let inner = self.inner.borrow();
            (inner.gc_scheduler.clone(), inner.gc_time_ms)
        };
        let timer = scheduler.schedule(
            delay,
            Box::new(move || {
                if let Some(inner) = weak.upgrade() {
                    let collection = Collection { inner };
                    let idle = {
                        let inner = collection.inner.borrow();
                        inner.subscribers.is_empty()
                            && inner.status == CollectionStatus::Ready
                    };
                    if idle {
                        log::debug!("collection {} idle, collecting", collection.name());
                        let _ = collection.cleanup();
                    }
                }
            }),
        );
        self.inner.borrow_mut().gc_timer = Some(timer);
    }
}

impl TxCollection for Collection {
    fn collection_id(&self) -> u64 {
        self.id()
    }

    fn retire_transaction(&self, tx_id: TxId, promote: bool) {
        let mut batch: Vec<RowChange> = Vec::new();
        {
            let mut inner = self.inner.borrow_mut();
            let inner = &mut *inner;
            let Some(pos) = inner.overlays.iter().position(|o| o.tx_id == tx_id) else {
                return;
            };

            let mut keys: Vec<Key> = Vec::new();
            for m in &inner.overlays[pos].mutations {
                if !keys.contains(&m.key) {
                    keys.push(m.key.clone());
                }
            }
            let before: Vec<(Key, Option<Value>)> = keys
                .iter()
                .map(|k| (k.clone(), visible_get(inner, k)))
                .collect();

            let overlay = inner.overlays.remove(pos);
            if promote {
                // Fold the net mutation per key into the synced state so a
                // completed transaction does not flicker back while the
                // authoritative echo is in flight.
                for key in &keys {
                    let last = overlay.mutations.iter().rev().find(|m| &m.key == key);
                    let Some(last) = last else { continue };
                    let old = inner.synced.get(key).cloned();
                    match last.mutation_type {
                        ChangeType::Insert | ChangeType::Update => {
                            if let Some(modified) = &last.modified {
                                if old.as_ref() != Some(modified) {
                                    match &old {
                                        Some(o) => inner.indexes.apply_change(
                                            ChangeType::Update,
                                            key,
                                            Some(o),
                                            Some(modified),
                                        ),
                                        None => inner.indexes.apply_change(
                                            ChangeType::Insert,
                                            key,
                                            None,
                                            Some(modified),
                                        ),
                                    }
                                    inner.synced.insert(key.clone(), modified.clone());
                                }
                            }
                        }
                        ChangeType::Delete => {
                            if let Some(old) = inner.synced.remove(key) {
                                inner.indexes.apply_change(
                                    ChangeType::Delete,
                                    key,
                                    Some(&old),
                                    None,
                                );
                            }
                        }
                    }
                }
            }

            for (key, old) in before {
                let new = visible_get(inner, &key);
                push_diff(&mut batch, key, old, new);
            }
        }
        self.emit(batch);
    }

    fn status(&self) -> CollectionStatus {
        Collection::status(self)
    }
}

/// Appends the reconciliation change for one key, if any.
fn push_diff(batch: &mut Vec<RowChange>, key: Key, old: Option<Value>, new: Option<Value>) {
    match (old, new) {
        (None, Some(new)) => batch.push(RowChange::insert(key, new)),
        (Some(old), None) => batch.push(RowChange::delete(key, old)),
        (Some(old), Some(new)) => {
            if old != new {
                batch.push(RowChange::update(key, new, old));
            }
        }
        (None, None) => {}
    }
}

fn visible_get(inner: &CollectionInner, key: &Key) -> Option<Value> {
    let mut current = inner.synced.get(key).cloned();
    for overlay in &inner.overlays {
        if let Some(m) = overlay.mutations.iter().rev().find(|m| &m.key == key) {
            current = match m.mutation_type {
                ChangeType::Insert | ChangeType::Update => m.modified.clone(),
                ChangeType::Delete => None,
            };
        }
    }
    current
}

fn visible_keys(inner: &CollectionInner) -> Vec<Key> {
    let mut keys: Vec<Key> = Vec::new();
    for key in inner.synced.keys() {
        if visible_get(inner, key).is_some() {
            keys.push(key.clone());
        }
    }
    for overlay in &inner.overlays {
        for m in &overlay.mutations {
            if !keys.contains(&m.key) && visible_get(inner, &m.key).is_some() {
                keys.push(m.key.clone());
            }
        }
    }
    keys
}

/// RAII subscription handle; unsubscribes on drop.
pub struct ChangesHandle {
    inner: Weak<RefCell<CollectionInner>>,
    id: SubscriptionId,
}

impl ChangesHandle {
    /// Unsubscribes explicitly.
    pub fn unsubscribe(self) {}
}

impl Drop for ChangesHandle {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.upgrade() {
            let collection = Collection { inner };
            collection.unsubscribe(self.id);
        }
    }
}

/// RAII status-subscription handle.
pub struct StatusHandle {
    inner: Weak<RefCell<CollectionInner>>,
    id: u64,
}

impl Drop for StatusHandle {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.upgrade() {
            inner.borrow_mut().status_subs.retain(|(id, _)| *id != self.id);
        }
    }
}

/// Future returned by `preload`, resolving at the first `Ready`.
pub struct PreloadFuture {
    rx: oneshot::Receiver<()>,
}

impl Future for PreloadFuture {
    type Output = Result<()>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(())) => Poll::Ready(Ok(())),
            Poll::Ready(Err(_)) => Poll::Ready(Err(Error::InErrorState)),
            Poll::Pending => Poll::Pending,
        }
    }
}
