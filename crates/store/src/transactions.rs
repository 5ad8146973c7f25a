//! Optimistic transactions and the global commit queue.
//!
//! Transactions collect mutations while `Pending`, enter the process-wide
//! FIFO commit queue on `commit()`, and run their mutation handler when
//! they reach the head. At most one handler runs at a time; every task
//! awaiting any transaction's persistence cooperatively drives the queue
//! head, so ordering holds without a background executor.

use crate::lifecycle::CollectionStatus;
use futures::future::LocalBoxFuture;
use rivulet_core::{ChangeType, Error, Key, Result, Value};
use std::cell::RefCell;
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll, Waker};

/// Transaction id.
pub type TxId = u64;

/// Async mutation handler: persists the transaction's mutations and
/// resolves with an adapter-defined value that is forwarded unchanged.
pub type MutationFn = Rc<dyn Fn(Transaction) -> LocalBoxFuture<'static, Result<Value>>>;

/// Transaction lifecycle state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TxState {
    Pending,
    Persisting,
    Completed,
    Failed,
}

impl TxState {
    pub fn name(&self) -> &'static str {
        match self {
            TxState::Pending => "pending",
            TxState::Persisting => "persisting",
            TxState::Completed => "completed",
            TxState::Failed => "failed",
        }
    }
}

/// One recorded mutation.
#[derive(Clone, Debug)]
pub struct Mutation {
    pub collection_id: u64,
    pub mutation_type: ChangeType,
    pub key: Key,
    /// Visible value at the moment of mutation (updates and deletes).
    pub original: Option<Value>,
    /// Resulting value (inserts and updates).
    pub modified: Option<Value>,
    /// Minimal diff produced by the draft (updates).
    pub changes: Option<Value>,
}

/// The collection surface the transaction engine needs: overlay
/// retirement on settle. Implemented by `Collection`.
pub trait TxCollection {
    fn collection_id(&self) -> u64;

    /// Removes this transaction's overlay. With `promote` the overlay's
    /// net mutations are folded into the synced state first, so the
    /// visible state does not flicker while the authoritative echo is in
    /// flight.
    fn retire_transaction(&self, tx_id: TxId, promote: bool);

    /// Lifecycle state, used for logging.
    fn status(&self) -> CollectionStatus;
}

/// Configuration for an explicit transaction.
pub struct TxConfig {
    pub mutation_fn: Option<MutationFn>,
    pub auto_commit: bool,
    pub metadata: Option<Value>,
}

impl Default for TxConfig {
    fn default() -> Self {
        Self {
            mutation_fn: None,
            auto_commit: true,
            metadata: None,
        }
    }
}

struct TxInner {
    id: TxId,
    state: TxState,
    mutation_fn: Option<MutationFn>,
    auto_commit: bool,
    metadata: Option<Value>,
    mutations: Vec<Mutation>,
    touched: Vec<(u64, Rc<dyn TxCollection>)>,
    settled: Option<Result<Value>>,
    error: Option<String>,
}

/// An optimistic transaction handle (cheaply cloneable).
#[derive(Clone)]
pub struct Transaction {
    inner: Rc<RefCell<TxInner>>,
}

impl core::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("Transaction")
            .field("id", &inner.id)
            .field("state", &inner.state)
            .finish()
    }
}

thread_local! {
    static NEXT_TX_ID: RefCell<TxId> = const { RefCell::new(1) };
    static AMBIENT: RefCell<Vec<Transaction>> = const { RefCell::new(Vec::new()) };
    static COMMIT_QUEUE: RefCell<CommitQueue> = RefCell::new(CommitQueue::new());
}

fn next_tx_id() -> TxId {
    NEXT_TX_ID.with(|n| {
        let mut n = n.borrow_mut();
        let id = *n;
        *n += 1;
        id
    })
}

/// Returns the innermost transaction opened by `Transaction::mutate`, if
/// any. Collection operations attach to it instead of creating an
/// implicit transaction.
pub fn ambient_transaction() -> Option<Transaction> {
    AMBIENT.with(|stack| stack.borrow().last().cloned())
}

impl Transaction {
    /// Creates a transaction. A mutation function is required.
    pub fn new(config: TxConfig) -> Result<Self> {
        let mutation_fn = config.mutation_fn.ok_or(Error::MissingMutationFn)?;
        Ok(Self::with_handler(
            mutation_fn,
            config.auto_commit,
            config.metadata,
        ))
    }

    pub(crate) fn with_handler(
        mutation_fn: MutationFn,
        auto_commit: bool,
        metadata: Option<Value>,
    ) -> Self {
        Self {
            inner: Rc::new(RefCell::new(TxInner {
                id: next_tx_id(),
                state: TxState::Pending,
                mutation_fn: Some(mutation_fn),
                auto_commit,
                metadata,
                mutations: Vec::new(),
                touched: Vec::new(),
                settled: None,
                error: None,
            })),
        }
    }

    /// An already-settled empty transaction, returned by operations that
    /// turn out to be no-ops (e.g. an update whose draft diff is empty).
    pub(crate) fn completed_empty() -> Self {
        Self {
            inner: Rc::new(RefCell::new(TxInner {
                id: next_tx_id(),
                state: TxState::Completed,
                mutation_fn: None,
                auto_commit: true,
                metadata: None,
                mutations: Vec::new(),
                touched: Vec::new(),
                settled: Some(Ok(Value::Null)),
                error: None,
            })),
        }
    }

    /// Returns the transaction id.
    pub fn id(&self) -> TxId {
        self.inner.borrow().id
    }

    /// Returns the current state.
    pub fn state(&self) -> TxState {
        self.inner.borrow().state
    }

    /// Returns true if the transaction auto-commits.
    pub fn is_auto_commit(&self) -> bool {
        self.inner.borrow().auto_commit
    }

    /// Returns the configured metadata.
    pub fn metadata(&self) -> Option<Value> {
        self.inner.borrow().metadata.clone()
    }

    /// Returns the recorded mutations.
    pub fn mutations(&self) -> Vec<Mutation> {
        self.inner.borrow().mutations.clone()
    }

    /// Returns the handler failure message, if the transaction failed.
    pub fn error(&self) -> Option<String> {
        self.inner.borrow().error.clone()
    }

    /// Runs `f` with this transaction ambient: collection mutations
    /// performed inside attach here. Only while `Pending`.
    pub fn mutate<R>(&self, f: impl FnOnce() -> R) -> Result<R> {
        {
            let inner = self.inner.borrow();
            if inner.state != TxState::Pending {
                return Err(Error::TxNotPendingMutate {
                    state: inner.state.name().into(),
                });
            }
        }
        AMBIENT.with(|stack| stack.borrow_mut().push(self.clone()));
        let result = f();
        AMBIENT.with(|stack| {
            stack.borrow_mut().pop();
        });
        Ok(result)
    }

    /// Records a mutation, registering the owning collection for
    /// retirement.
    pub(crate) fn add_mutation(&self, collection: Rc<dyn TxCollection>, mutation: Mutation) {
        let mut inner = self.inner.borrow_mut();
        let id = collection.collection_id();
        if !inner.touched.iter().any(|(cid, _)| *cid == id) {
            inner.touched.push((id, collection));
        }
        inner.mutations.push(mutation);
    }

    /// Transitions `Pending -> Persisting` and takes a commit-queue slot.
    /// The mutation handler runs when the transaction reaches the head;
    /// await `is_persisted` for the outcome.
    pub fn commit(&self) -> Result<()> {
        {
            let mut inner = self.inner.borrow_mut();
            if inner.state != TxState::Pending {
                return Err(Error::TxNotPendingCommit {
                    state: inner.state.name().into(),
                });
            }
            inner.state = TxState::Persisting;
        }
        log::debug!("tx {} committed, queueing", self.id());
        COMMIT_QUEUE.with(|q| q.borrow_mut().queue.push_back(self.clone()));
        Ok(())
    }

    /// Rolls the transaction back: overlays are retired with reverse
    /// deltas. Allowed while `Pending`, or while `Persisting` before the
    /// handler has started.
    pub fn rollback(&self) -> Result<()> {
        let state = self.state();
        match state {
            TxState::Pending => {}
            TxState::Persisting => {
                // The handler may already be running: either parked in the
                // active slot, or taken out of it mid-poll (driving).
                let started = COMMIT_QUEUE.with(|q| {
                    let q = q.borrow();
                    matches!(&q.active, Some((id, _)) if *id == self.id())
                        || (q.driving && q.queue.front().map(|t| t.id()) == Some(self.id()))
                });
                if started {
                    return Err(Error::RollbackAlreadyCompleted {
                        state: state.name().into(),
                    });
                }
                COMMIT_QUEUE.with(|q| {
                    q.borrow_mut().queue.retain(|t| t.id() != self.id());
                });
            }
            TxState::Completed | TxState::Failed => {
                return Err(Error::RollbackAlreadyCompleted {
                    state: state.name().into(),
                });
            }
        }
        log::warn!("tx {} rolled back", self.id());
        settle(self, Err(Error::mutation_failed("transaction rolled back")));
        Ok(())
    }

    /// Resolves when the transaction settles: `Ok` with the handler's
    /// return value on completion, `Err` on failure or rollback.
    ///
    /// Awaiting this future also drives the commit queue, so handlers of
    /// earlier transactions run first, in FIFO order.
    pub fn is_persisted(&self) -> PersistedFuture {
        PersistedFuture { tx: self.clone() }
    }

    fn settled_result(&self) -> Option<Result<Value>> {
        self.inner.borrow().settled.clone()
    }

    fn make_handler_future(&self) -> LocalBoxFuture<'static, Result<Value>> {
        let handler = self.inner.borrow().mutation_fn.clone();
        match handler {
            Some(handler) => handler(self.clone()),
            // Unreachable for queued transactions; constructors require a
            // handler. Settle with the typed error instead of panicking.
            None => Box::pin(async { Err(Error::MissingMutationFn) }),
        }
    }
}

/// Settles a transaction: state change, overlay retirement, waker flush.
fn settle(tx: &Transaction, result: Result<Value>) {
    let touched: Vec<(u64, Rc<dyn TxCollection>)> = {
        let mut inner = tx.inner.borrow_mut();
        if inner.settled.is_some() {
            return;
        }
        match &result {
            Ok(_) => inner.state = TxState::Completed,
            Err(e) => {
                inner.state = TxState::Failed;
                inner.error = Some(e.to_string());
            }
        }
        inner.settled = Some(result.clone());
        inner.touched.clone()
    };

    let promote = result.is_ok();
    for (_, collection) in touched {
        collection.retire_transaction(tx.id(), promote);
    }

    let wakers = COMMIT_QUEUE.with(|q| std::mem::take(&mut q.borrow_mut().wakers));
    for waker in wakers {
        waker.wake();
    }
}

// ---------------------------------------------------------------------
// Commit queue
// ---------------------------------------------------------------------

struct CommitQueue {
    queue: VecDeque<Transaction>,
    /// The head transaction's running handler.
    active: Option<(TxId, LocalBoxFuture<'static, Result<Value>>)>,
    /// Guards against re-entrant driving from inside a handler.
    driving: bool,
    wakers: Vec<Waker>,
}

impl CommitQueue {
    fn new() -> Self {
        Self {
            queue: VecDeque::new(),
            active: None,
            driving: false,
            wakers: Vec::new(),
        }
    }
}

/// Future resolving with a transaction's persistence outcome. Cooperative:
/// polling it advances the commit queue head.
pub struct PersistedFuture {
    tx: Transaction,
}

impl Future for PersistedFuture {
    type Output = Result<Value>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        enum Step {
            Wait,
            Drive(TxId, LocalBoxFuture<'static, Result<Value>>),
            Materialize(Transaction),
        }

        loop {
            if let Some(result) = self.tx.settled_result() {
                return Poll::Ready(result);
            }

            let step = COMMIT_QUEUE.with(|q| {
                let mut q = q.borrow_mut();
                if q.driving {
                    q.wakers.push(cx.waker().clone());
                    return Step::Wait;
                }
                if let Some((id, fut)) = q.active.take() {
                    q.driving = true;
                    return Step::Drive(id, fut);
                }
                match q.queue.front().cloned() {
                    Some(head) => Step::Materialize(head),
                    None => {
                        // Nothing queued: the transaction has not been
                        // committed yet. Wait for a settle.
                        q.wakers.push(cx.waker().clone());
                        Step::Wait
                    }
                }
            });

            let (head_id, mut fut) = match step {
                Step::Wait => return Poll::Pending,
                Step::Drive(id, fut) => (id, fut),
                Step::Materialize(head) => {
                    // The handler closure runs user code: call it with the
                    // queue unborrowed.
                    let fut = head.make_handler_future();
                    COMMIT_QUEUE.with(|q| q.borrow_mut().driving = true);
                    (head.id(), fut)
                }
            };

            let polled = fut.as_mut().poll(cx);

            match polled {
                Poll::Pending => {
                    COMMIT_QUEUE.with(|q| {
                        let mut q = q.borrow_mut();
                        q.driving = false;
                        q.active = Some((head_id, fut));
                    });
                    return Poll::Pending;
                }
                Poll::Ready(result) => {
                    let head = COMMIT_QUEUE.with(|q| {
                        let mut q = q.borrow_mut();
                        q.driving = false;
                        q.queue.pop_front()
                    });
                    if let Some(head) = head {
                        log::debug!(
                            "tx {} handler finished ({})",
                            head.id(),
                            if result.is_ok() { "ok" } else { "failed" }
                        );
                        settle(&head, result);
                    }
                    // Loop: either our transaction just settled, or the
                    // next head needs driving.
                }
            }
        }
    }
}

/// Builds an optimistic action: a callable that creates a transaction,
/// applies the local mutations synchronously, enqueues the handler and
/// returns the transaction.
pub fn optimistic_action<M, F>(on_mutate: M, mutation_fn: F) -> impl Fn(Value) -> Result<Transaction>
where
    M: Fn(&Value) + 'static,
    F: Fn(Value, Transaction) -> LocalBoxFuture<'static, Result<Value>> + Clone + 'static,
{
    let on_mutate = Rc::new(on_mutate);
    move |vars: Value| {
        let mutation_fn = mutation_fn.clone();
        let handler_vars = vars.clone();
        let handler: MutationFn =
            Rc::new(move |tx: Transaction| mutation_fn(handler_vars.clone(), tx));
        let tx = Transaction::with_handler(handler, true, None);
        let on_mutate = on_mutate.clone();
        tx.mutate(move || on_mutate(&vars))?;
        tx.commit()?;
        Ok(tx)
    }
}
