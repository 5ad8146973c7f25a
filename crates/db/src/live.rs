//! Live query collections.
//!
//! A live query is a `Collection` whose sync adapter is a compiled
//! pipeline over upstream collections: the initial burst comes from each
//! upstream's current visible state (optimistic overlays included), then
//! every upstream change batch flows through the pipeline and lands on
//! the live collection as one sync transaction. Live query collections
//! register like any other collection, so they compose as query sources.

use rivulet_core::{Error, KeyFn, Result, RowChange, Value};
use rivulet_incremental::{DeltaBatch, RowDelta};
use rivulet_query::compile::compile;
use rivulet_query::ir::{Expr, Query, Source};
use rivulet_query::optimizer::{flatten_conjunction, strip_alias_expr};
use rivulet_reactive::ChangeFilter;
use rivulet_store::{
    ChangesHandle, Collection, CollectionConfig, CollectionStatus, GcScheduler, StatusHandle,
    SubscribeOptions, SyncAdapter, SyncCleanup, SyncContext, SyncWrite,
};
use std::cell::RefCell;
use std::rc::Rc;

/// Configuration for a live query collection.
pub struct LiveQueryConfig {
    query: Query,
    name: Option<String>,
    start_sync: bool,
    gc_time_ms: Option<u64>,
    get_key: Option<KeyFn>,
    gc_scheduler: Option<Rc<dyn GcScheduler>>,
}

impl LiveQueryConfig {
    /// Configures a live query over a built query.
    pub fn new(query: Query) -> Self {
        Self {
            query,
            name: None,
            start_sync: true,
            gc_time_ms: None,
            get_key: None,
            gc_scheduler: None,
        }
    }

    /// Names the live collection (diagnostics and composition).
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Defers pipeline start until first use.
    pub fn with_start_sync(mut self, start: bool) -> Self {
        self.start_sync = start;
        self
    }

    /// Overrides the idle GC time.
    pub fn with_gc_time_ms(mut self, ms: u64) -> Self {
        self.gc_time_ms = Some(ms);
        self
    }

    /// Keys result rows through a row-derived key instead of the
    /// pipeline's natural output key.
    pub fn with_get_key(mut self, get_key: KeyFn) -> Self {
        self.get_key = Some(get_key);
        self
    }

    /// Installs the host GC timer.
    pub fn with_gc_scheduler(mut self, scheduler: Rc<dyn GcScheduler>) -> Self {
        self.gc_scheduler = Some(scheduler);
        self
    }
}

/// Creates a collection maintained by a compiled query pipeline.
///
/// Invalid IR surfaces here, before any pipeline runs.
pub fn create_live_query_collection(config: LiveQueryConfig) -> Result<Collection> {
    // Compile once up front to surface IR errors at creation time.
    compile(&config.query)?;

    let use_row_keys = config.get_key.is_some();
    let adapter = Rc::new(LiveQueryAdapter {
        query: config.query,
        use_row_keys,
        session: Rc::new(RefCell::new(None)),
    });

    let get_key = config
        .get_key
        .unwrap_or_else(|| Box::new(|_row: &Value| Err(Error::undefined_key())));

    let mut collection_config = CollectionConfig::new(
        config.name.unwrap_or_else(|| "live-query".into()),
        get_key,
    )
    .with_sync(adapter)
    .with_start_sync(config.start_sync);
    if let Some(ms) = config.gc_time_ms {
        collection_config = collection_config.with_gc_time_ms(ms);
    }
    if let Some(scheduler) = config.gc_scheduler {
        collection_config = collection_config.with_gc_scheduler(scheduler);
    }

    Collection::new(collection_config)
}

struct LiveSession {
    _change_subs: Vec<ChangesHandle>,
    _status_subs: Vec<StatusHandle>,
}

struct LiveQueryAdapter {
    query: Query,
    use_row_keys: bool,
    session: Rc<RefCell<Option<LiveSession>>>,
}

impl SyncAdapter for LiveQueryAdapter {
    fn sync(&self, ctx: SyncContext) -> SyncCleanup {
        let noop: SyncCleanup = Box::new(|| {});

        let pipeline = match compile(&self.query) {
            Ok(p) => Rc::new(RefCell::new(p)),
            Err(e) => {
                ctx.mark_error(&e.to_string());
                return noop;
            }
        };

        // Resolve every external input to its collection handle.
        let inputs = pipeline.borrow().inputs().to_vec();
        let mut upstreams: Vec<(usize, String, Collection)> = Vec::new();
        for input in &inputs {
            match Collection::by_id(input.source.id) {
                Some(c) => upstreams.push((input.input_id, input.alias.clone(), c)),
                None => {
                    ctx.mark_error(&format!(
                        "unknown source collection: {}",
                        input.source.name
                    ));
                    return noop;
                }
            }
        }

        for (_, _, up) in &upstreams {
            if let Err(e) = up.start_sync() {
                ctx.mark_error(&e.to_string());
                return noop;
            }
        }

        // Initial burst: visible state per upstream, filtered through the
        // scan filter pushed down from the where conjunction when the
        // optimizer can answer it with an index probe.
        let pushdown = scan_filters(&self.query);
        ctx.begin();
        let mut initial = DeltaBatch::new();
        for (input_id, alias, up) in &upstreams {
            let filter = pushdown
                .iter()
                .find(|(a, id, _)| a == alias && *id == up.id())
                .map(|(_, _, f)| f.clone())
                .unwrap_or_else(ChangeFilter::all);
            up.ensure_indexes_for(&filter);
            let snapshot = up.current_state_as_changes(&filter);
            let deltas: DeltaBatch = snapshot
                .into_iter()
                .map(|c| RowDelta::insert(c.key, c.value))
                .collect();
            match pipeline.borrow_mut().push(*input_id, deltas) {
                Ok(out) => initial.extend(out),
                Err(e) => {
                    ctx.mark_error(&e.to_string());
                    return noop;
                }
            }
        }
        write_outputs(&ctx, initial, self.use_row_keys);
        if let Err(e) = ctx.commit() {
            ctx.mark_error(&e.to_string());
            return noop;
        }

        // Live updates: each upstream batch flows through the pipeline
        // and lands as one sync transaction.
        let mut change_subs = Vec::new();
        for (input_id, _, up) in &upstreams {
            let pipeline = pipeline.clone();
            let ctx2 = ctx.clone();
            let input_id = *input_id;
            let use_row_keys = self.use_row_keys;
            let sub = up.subscribe_changes(
                move |batch| {
                    let deltas = changes_to_deltas(batch);
                    let pushed = pipeline.borrow_mut().push(input_id, deltas);
                    match pushed {
                        Ok(out) if !out.is_empty() => {
                            ctx2.begin();
                            write_outputs(&ctx2, out, use_row_keys);
                            if let Err(e) = ctx2.commit() {
                                ctx2.mark_error(&e.to_string());
                            }
                        }
                        Ok(_) => {}
                        Err(e) => ctx2.mark_error(&e.to_string()),
                    }
                },
                SubscribeOptions::default(),
            );
            match sub {
                Ok(sub) => change_subs.push(sub),
                Err(e) => {
                    ctx.mark_error(&e.to_string());
                    return noop;
                }
            }
        }

        // Ready once every upstream is ready.
        let mut status_subs = Vec::new();
        let all: Vec<Collection> = upstreams.iter().map(|(_, _, u)| u.clone()).collect();
        if all.iter().all(|u| u.status() == CollectionStatus::Ready) {
            let _ = ctx.mark_ready();
        } else {
            for (_, _, up) in &upstreams {
                let ctx3 = ctx.clone();
                let all = all.clone();
                status_subs.push(up.subscribe_status(move |_| {
                    if all.iter().all(|u| u.status() == CollectionStatus::Ready) {
                        let _ = ctx3.mark_ready();
                    }
                }));
            }
        }

        *self.session.borrow_mut() = Some(LiveSession {
            _change_subs: change_subs,
            _status_subs: status_subs,
        });

        // Teardown drops the upstream subscriptions exactly once.
        let slot = self.session.clone();
        Box::new(move || {
            slot.borrow_mut().take();
        })
    }
}

/// Converts a subscriber change batch into pipeline deltas; updates
/// travel as a retraction plus an insertion.
fn changes_to_deltas(batch: &[RowChange]) -> DeltaBatch {
    let mut deltas = DeltaBatch::new();
    for change in batch {
        match change.change_type {
            rivulet_core::ChangeType::Insert => {
                deltas.push(RowDelta::insert(change.key.clone(), change.value.clone()));
            }
            rivulet_core::ChangeType::Update => {
                if let Some(previous) = &change.previous {
                    deltas.push(RowDelta::delete(change.key.clone(), previous.clone()));
                }
                deltas.push(RowDelta::insert(change.key.clone(), change.value.clone()));
            }
            rivulet_core::ChangeType::Delete => {
                deltas.push(RowDelta::delete(change.key.clone(), change.value.clone()));
            }
        }
    }
    deltas
}

/// Applies pipeline output deltas to the live collection as keyed sync
/// writes (or row-keyed writes when the caller keys rows itself).
fn write_outputs(ctx: &SyncContext, out: DeltaBatch, use_row_keys: bool) {
    for (key, removed, added) in rivulet_incremental::per_key_net(&out) {
        let write = match (removed, added, use_row_keys) {
            (_, Some(row), false) => SyncWrite::UpdateKeyed(key, row),
            (_, Some(row), true) => SyncWrite::Update(row),
            (Some(row), None, true) => SyncWrite::Delete(row),
            (Some(_), None, false) => SyncWrite::DeleteKeyed(key),
            (None, None, _) => continue,
        };
        if let Err(e) = ctx.write(write) {
            log::warn!("live query write failed: {}", e);
        }
    }
}

/// Computes per-source scan filters: where clauses whose refs all root at
/// one top-level collection source, rewritten row-relative. The pipeline
/// still applies the full conjunction, so pushing a subset down is purely
/// an index-probe optimization.
fn scan_filters(query: &Query) -> Vec<(String, u64, ChangeFilter)> {
    let mut sources: Vec<(String, u64)> = Vec::new();
    if let Some((alias, Source::Collection(r))) = &query.from {
        sources.push((alias.clone(), r.id));
    }
    for join in &query.joins {
        if let Source::Collection(r) = &join.source {
            sources.push((join.alias.clone(), r.id));
        }
    }

    let clauses = flatten_conjunction(&query.wheres);
    let mut out = Vec::new();
    for (alias, id) in sources {
        let mut stripped: Option<Expr> = None;
        for clause in &clauses {
            if let Some(e) = strip_alias_expr(clause, &alias) {
                stripped = Some(match stripped {
                    None => e,
                    Some(acc) => rivulet_query::ir::and(acc, e),
                });
            }
        }
        if let Some(expr) = stripped {
            out.push((alias, id, ChangeFilter::with_expr(expr)));
        }
    }
    out
}
