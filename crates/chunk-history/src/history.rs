#![forbid(unsafe_code)]

//! The history handle: stack, chunk store, rules and push queue behind one
//! shared cell.
//!
//! [`History`] is a cheap `Rc` handle. Clones share the same instance, which
//! is how a [`PushFuture`] reaches back into the history to commit its
//! window.
//!
//! # Timer model
//!
//! Opening a window spawns a local timer task (`tokio::task::spawn_local`)
//! holding a weak reference to the history. It sleeps until the deadline,
//! follows the deadline whenever a push restarts the window, and commits the
//! window when the silence ends, whether or not any [`PushFuture`] is alive.
//!
//! `get`, `undo`, `redo`, `reset` and `push_sync` first commit a window whose
//! deadline has passed but whose timer has not run yet, so they always act on
//! the committed state. `push` and the read-only queries never commit.
//!
//! # Notifications
//!
//! `on_change` runs after the interior borrow is released and is detached
//! while it runs: a callback may call back into the history, but nested
//! operations will not invoke it again.

use std::cell::RefCell;
use std::fmt;
use std::future::Future;
use std::pin::{Pin, pin};
use std::rc::{Rc, Weak};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::task::AbortHandle;
use tokio::time::Instant;
use tracing::{debug, debug_span, trace, warn};

use crate::chunk_store::{ChunkStore, ChunkStoreStats};
use crate::codec;
use crate::config::HistoryConfig;
use crate::error::{HistoryError, HistoryResult};
use crate::pending::{PushQueue, Waiter, resolve_all};
use crate::record::{self, Decomposer, Record};
use crate::rules::{RuleSet, TransformRule};
use crate::stack::HistoryStack;

type ChangeCallback<T> = Box<dyn FnMut(Option<&T>)>;

/// What a slot holds.
#[derive(Debug)]
enum Entry<T> {
    Chunked(Arc<Record>),
    Raw(Arc<T>),
}

/// Point-in-time counters for a history.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HistoryStats {
    /// Slots in the current branch, tombstones included.
    pub slots: usize,
    /// Slots whose entry was evicted.
    pub tombstones: usize,
    pub cursor: Option<usize>,
    pub chunks: ChunkStoreStats,
    /// Entries written since construction or the last reset.
    pub commits: u64,
    /// Pushes absorbed into an already-open window.
    pub coalesced_pushes: u64,
    pub evictions: u64,
}

struct HistoryInner<T> {
    rules: RuleSet,
    store: ChunkStore,
    stack: HistoryStack<Entry<T>>,
    queue: PushQueue<T>,
    config: HistoryConfig,
    on_change: Option<ChangeCallback<T>>,
    timer: Option<AbortHandle>,
    commits: u64,
}

impl<T> HistoryInner<T>
where
    T: Serialize + DeserializeOwned + Clone,
{
    fn new(rules: RuleSet, config: HistoryConfig) -> Self {
        Self {
            rules,
            store: ChunkStore::new(),
            stack: HistoryStack::new(config.max_length),
            queue: PushQueue::new(config.delay()),
            config,
            on_change: None,
            timer: None,
            commits: 0,
        }
    }

    fn disarm(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }

    /// Write `state` after the cursor. On error nothing is changed.
    fn commit(&mut self, state: &T, pick: Option<usize>) -> HistoryResult<()> {
        let _span = debug_span!("history.commit", ?pick).entered();

        let entry = if self.config.use_chunks {
            let value = codec::to_value(state)?;
            let prev = match self.stack.current() {
                Some(Entry::Chunked(record)) => Some(&**record),
                _ => None,
            };
            let record =
                Decomposer::new(&self.rules, &mut self.store).decompose(&value, prev, pick)?;
            Entry::Chunked(Arc::new(record))
        } else {
            Entry::Raw(Arc::new(state.clone()))
        };

        self.stack.push(entry);
        self.commits += 1;
        debug!(
            cursor = ?self.stack.cursor(),
            len = self.stack.len(),
            chunks = self.store.len(),
            "history commit"
        );
        Ok(())
    }

    fn read(&self) -> HistoryResult<Option<T>> {
        match self.stack.current() {
            None => Ok(None),
            Some(Entry::Raw(state)) => Ok(Some(T::clone(state))),
            Some(Entry::Chunked(record)) => {
                let _span = debug_span!("history.recompose", nodes = record.node_count()).entered();
                let value = record::recompose(record, &self.rules, &self.store)?;
                Ok(Some(codec::from_value(value)?))
            }
        }
    }
}

/// Undo/redo history of `T` snapshots.
///
/// ```
/// use chunk_history::History;
/// use serde_json::json;
///
/// let history = History::new();
/// history.push_sync(json!({"children": [{"x": 1}]})).unwrap();
/// history.push_sync(json!({"children": [{"x": 2}]})).unwrap();
/// history.undo();
/// assert_eq!(history.get().unwrap(), Some(json!({"children": [{"x": 1}]})));
/// assert!(history.has_redo());
/// ```
pub struct History<T = Value> {
    inner: Rc<RefCell<HistoryInner<T>>>,
}

impl<T> Clone for History<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T> fmt::Debug for History<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.inner.try_borrow() {
            Ok(inner) => f
                .debug_struct("History")
                .field("cursor", &inner.stack.cursor())
                .field("slots", &inner.stack.total_slots())
                .field("chunks", &inner.store.len())
                .field("pending", &inner.queue.is_pending())
                .field("rules", &inner.rules)
                .field("config", &inner.config)
                .finish(),
            Err(_) => f.debug_struct("History").finish_non_exhaustive(),
        }
    }
}

impl<T> Default for History<T>
where
    T: Serialize + DeserializeOwned + Clone + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T> History<T>
where
    T: Serialize + DeserializeOwned + Clone + 'static,
{
    /// Empty history with the default configuration and no custom rules.
    #[must_use]
    pub fn new() -> Self {
        Self::from_inner(HistoryInner::new(RuleSet::new(), HistoryConfig::default()))
    }

    #[must_use]
    pub fn builder() -> HistoryBuilder<T> {
        HistoryBuilder::new()
    }

    pub fn with_config(config: HistoryConfig) -> HistoryResult<Self> {
        Self::builder().config(config).build()
    }

    fn from_inner(inner: HistoryInner<T>) -> Self {
        Self {
            inner: Rc::new(RefCell::new(inner)),
        }
    }

    // ========================================================================
    // Writes
    // ========================================================================

    /// Commit `state` immediately.
    ///
    /// Any pending coalesced push is superseded: its payload is dropped and
    /// its waiters resolve successfully.
    pub fn push_sync(&self, state: T) -> HistoryResult<&Self> {
        self.commit_now(state, None)
    }

    /// Like [`push_sync`](Self::push_sync), but only child `index` of the
    /// root is decomposed afresh; the other children are shared with the
    /// entry at the cursor.
    pub fn push_sync_with_pick(&self, state: T, index: usize) -> HistoryResult<&Self> {
        self.commit_now(state, Some(index))
    }

    fn commit_now(&self, state: T, pick: Option<usize>) -> HistoryResult<&Self> {
        self.fire_due();
        let superseded = {
            let mut inner = self.inner.borrow_mut();
            inner.commit(&state, pick)?;
            inner.disarm();
            inner.queue.take()
        };
        if let Some(pending) = superseded {
            debug!(
                waiters = pending.waiters.len(),
                "pending push superseded by synchronous push"
            );
            resolve_all(pending.waiters, &Ok(()));
        }
        self.notify(Some(&state));
        Ok(self)
    }

    /// Buffer `state` behind the silence window.
    ///
    /// Pushes arriving within `delay` of each other coalesce: only the last
    /// state is committed, once, after `delay` of silence. Every returned
    /// future resolves with that commit's outcome.
    ///
    /// A push arriving after the window's silence has elapsed, but before
    /// its timer has committed it, is rejected with
    /// [`HistoryError::InvalidPushOperation`] and leaves the window as is.
    ///
    /// Dropping the future does not cancel the push.
    ///
    /// # Panics
    ///
    /// Opening a window spawns its timer with `tokio::task::spawn_local`, so
    /// this panics outside a `tokio::task::LocalSet` (or a local runtime)
    /// whose runtime has the time driver enabled.
    pub fn push(&self, state: T) -> PushFuture<T> {
        self.enqueue(state, None)
    }

    /// Debounced counterpart of [`push_sync_with_pick`](Self::push_sync_with_pick).
    pub fn push_with_pick(&self, state: T, index: usize) -> PushFuture<T> {
        self.enqueue(state, Some(index))
    }

    fn enqueue(&self, state: T, pick: Option<usize>) -> PushFuture<T> {
        let now = Instant::now();
        let mut inner = self.inner.borrow_mut();

        // A push landing exactly on the deadline still joins the window, so
        // same-instant pushes coalesce even with a zero delay.
        if inner.queue.deadline().is_some_and(|deadline| deadline < now) {
            drop(inner);
            debug!("push arrived after its window closed");
            let waiter = Waiter::new();
            waiter.resolve(Err(HistoryError::InvalidPushOperation));
            return PushFuture {
                history: self.clone(),
                waiter,
            };
        }

        let waiter = inner.queue.enqueue(state, pick, now);
        if inner.timer.as_ref().is_none_or(AbortHandle::is_finished) {
            let deadline = now + inner.config.delay();
            let task = tokio::task::spawn_local(run_timer(Rc::downgrade(&self.inner), deadline));
            inner.timer = Some(task.abort_handle());
        }
        drop(inner);

        PushFuture {
            history: self.clone(),
            waiter,
        }
    }

    // ========================================================================
    // Navigation
    // ========================================================================

    /// State at the cursor, or `None` for an empty history.
    ///
    /// Notifies `on_change` with the result, `None` included.
    pub fn get(&self) -> HistoryResult<Option<T>> {
        self.fire_due();
        let state = self.inner.borrow().read()?;
        self.notify(state.as_ref());
        Ok(state)
    }

    /// Step back one entry. A no-op when there is nothing to undo.
    pub fn undo(&self) -> &Self {
        self.fire_due();
        let moved = self.inner.borrow_mut().stack.undo();
        trace!(moved, "undo");
        self
    }

    /// Step forward one entry. A no-op when there is nothing to redo.
    pub fn redo(&self) -> &Self {
        self.fire_due();
        let moved = self.inner.borrow_mut().stack.redo();
        trace!(moved, "redo");
        self
    }

    /// Drop every entry and chunk, and cancel the pending push.
    ///
    /// Waiters of the cancelled window fail with
    /// [`HistoryError::InvalidPushOperation`].
    pub fn reset(&self) -> &Self {
        self.fire_due();
        let cancelled = {
            let mut inner = self.inner.borrow_mut();
            inner.stack.clear();
            inner.store.clear();
            inner.commits = 0;
            inner.queue.reset_counters();
            inner.disarm();
            inner.queue.take()
        };
        debug!(cancelled = cancelled.is_some(), "history reset");
        if let Some(pending) = cancelled {
            resolve_all(pending.waiters, &Err(HistoryError::InvalidPushOperation));
        }
        self
    }

    // ========================================================================
    // Queries
    // ========================================================================

    #[must_use]
    pub fn has_undo(&self) -> bool {
        self.inner.borrow().stack.has_undo()
    }

    #[must_use]
    pub fn has_redo(&self) -> bool {
        self.inner.borrow().stack.has_redo()
    }

    /// Entries reachable in the current branch, capped at `max_length`.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.borrow().stack.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn cursor(&self) -> Option<usize> {
        self.inner.borrow().stack.cursor()
    }

    /// Record at the cursor. `None` when empty, tombstoned or not chunked.
    #[must_use]
    pub fn current_record(&self) -> Option<Arc<Record>> {
        match self.inner.borrow().stack.current() {
            Some(Entry::Chunked(record)) => Some(Arc::clone(record)),
            _ => None,
        }
    }

    #[must_use]
    pub fn stats(&self) -> HistoryStats {
        let inner = self.inner.borrow();
        HistoryStats {
            slots: inner.stack.total_slots(),
            tombstones: inner.stack.tombstones(),
            cursor: inner.stack.cursor(),
            chunks: inner.store.stats(),
            commits: inner.commits,
            coalesced_pushes: inner.queue.coalesced(),
            evictions: inner.stack.evictions(),
        }
    }

    /// Whether a debounced push is waiting for its window to commit.
    #[must_use]
    pub fn has_pending(&self) -> bool {
        self.inner.borrow().queue.is_pending()
    }

    /// When the open window will commit, if there is one.
    #[must_use]
    pub fn pending_deadline(&self) -> Option<Instant> {
        self.inner.borrow().queue.deadline()
    }

    #[must_use]
    pub fn config(&self) -> HistoryConfig {
        self.inner.borrow().config.clone()
    }

    // ========================================================================
    // Internals
    // ========================================================================

    fn fire_due(&self) -> bool {
        self.fire_due_at(Instant::now())
    }

    /// Commit the open window if its deadline is at or before `now`.
    fn fire_due_at(&self, now: Instant) -> bool {
        let (pending, outcome) = {
            let mut inner = self.inner.borrow_mut();
            let Some(pending) = inner.queue.take_due(now) else {
                return false;
            };
            debug!(waiters = pending.waiters.len(), "push window fired");
            let outcome = inner.commit(&pending.state, pending.pick);
            (pending, outcome)
        };

        match &outcome {
            Ok(()) => self.notify(Some(&pending.state)),
            Err(err) if !pending.waiters.iter().any(Waiter::is_observed) => {
                warn!(error = %err, "coalesced push failed with nobody waiting");
            }
            Err(_) => {}
        }
        resolve_all(pending.waiters, &outcome);
        true
    }

    fn notify(&self, state: Option<&T>) {
        let callback = self.inner.borrow_mut().on_change.take();
        if let Some(mut callback) = callback {
            callback(state);
            let mut inner = self.inner.borrow_mut();
            if inner.on_change.is_none() {
                inner.on_change = Some(callback);
            }
        }
    }
}

// ============================================================================
// Builder
// ============================================================================

/// Configures and constructs a [`History`].
pub struct HistoryBuilder<T = Value> {
    rules: RuleSet,
    initial_state: Option<T>,
    config: HistoryConfig,
    on_change: Option<ChangeCallback<T>>,
}

impl<T> fmt::Debug for HistoryBuilder<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HistoryBuilder")
            .field("rules", &self.rules)
            .field("initial_state", &self.initial_state.is_some())
            .field("config", &self.config)
            .field("on_change", &self.on_change.is_some())
            .finish()
    }
}

impl<T> Default for HistoryBuilder<T> {
    fn default() -> Self {
        Self {
            rules: RuleSet::new(),
            initial_state: None,
            config: HistoryConfig::default(),
            on_change: None,
        }
    }
}

impl<T> HistoryBuilder<T>
where
    T: Serialize + DeserializeOwned + Clone + 'static,
{
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the custom rules. Earlier rules win when several match.
    #[must_use]
    pub fn rules(mut self, rules: RuleSet) -> Self {
        self.rules = rules;
        self
    }

    /// Append one custom rule.
    #[must_use]
    pub fn rule(mut self, rule: impl TransformRule + 'static) -> Self {
        self.rules.push(rule);
        self
    }

    /// First entry, committed without notifying `on_change`.
    #[must_use]
    pub fn initial_state(mut self, state: T) -> Self {
        self.initial_state = Some(state);
        self
    }

    #[must_use]
    pub fn config(mut self, config: HistoryConfig) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn delay(mut self, delay: Duration) -> Self {
        self.config = self.config.with_delay(delay);
        self
    }

    #[must_use]
    pub fn max_length(mut self, max_length: usize) -> Self {
        self.config = self.config.with_max_length(max_length);
        self
    }

    #[must_use]
    pub fn use_chunks(mut self, use_chunks: bool) -> Self {
        self.config = self.config.with_chunks(use_chunks);
        self
    }

    #[must_use]
    pub fn on_change(mut self, callback: impl FnMut(Option<&T>) + 'static) -> Self {
        self.on_change = Some(Box::new(callback));
        self
    }

    pub fn build(self) -> HistoryResult<History<T>> {
        let errors = self.config.validate();
        if !errors.is_empty() {
            return Err(HistoryError::InvalidConfig(errors));
        }

        let mut inner = HistoryInner::new(self.rules, self.config);
        if let Some(state) = &self.initial_state {
            inner.commit(state, None)?;
        }
        inner.on_change = self.on_change;
        Ok(History::from_inner(inner))
    }
}

// ============================================================================
// Window timer
// ============================================================================

/// Sleep until the window's deadline, following it while pushes restart the
/// window, then commit. Ends early when the history is gone or the window
/// was taken by another path.
async fn run_timer<T>(weak: Weak<RefCell<HistoryInner<T>>>, deadline: Instant)
where
    T: Serialize + DeserializeOwned + Clone + 'static,
{
    let mut sleep = pin!(tokio::time::sleep_until(deadline));
    loop {
        sleep.as_mut().await;
        let Some(inner) = weak.upgrade() else {
            return;
        };
        let history = History { inner };
        let due = sleep.deadline();

        match history.pending_deadline() {
            Some(next) if next > due => sleep.as_mut().reset(next),
            Some(_) => {
                // Cleared before committing so a push from `on_change` arms
                // a fresh timer.
                history.inner.borrow_mut().timer = None;
                history.fire_due_at(due);
                return;
            }
            None => return,
        }
    }
}

// ============================================================================
// Push future
// ============================================================================

/// Completion of a debounced [`History::push`].
///
/// Resolves to a handle of the same history once the window containing the
/// push has committed, or with the error that prevented the commit.
pub struct PushFuture<T> {
    history: History<T>,
    waiter: Waiter,
}

impl<T> fmt::Debug for PushFuture<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PushFuture").finish_non_exhaustive()
    }
}

impl<T> Future for PushFuture<T> {
    type Output = HistoryResult<History<T>>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        if let Some(outcome) = this.waiter.take_outcome() {
            return Poll::Ready(outcome.map(|()| this.history.clone()));
        }
        if !this.history.inner.borrow().queue.is_pending() {
            // Every path that removes a window resolves its waiters.
            return Poll::Ready(Err(HistoryError::InvalidPushOperation));
        }
        this.waiter.register(cx.waker());
        Poll::Pending
    }
}
