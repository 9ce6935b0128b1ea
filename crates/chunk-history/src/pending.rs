#![forbid(unsafe_code)]

//! Silence-window coalescing for asynchronous pushes.
//!
//! Rapid successive pushes (a drag gesture emitting one state per frame)
//! should produce one history entry, not hundreds. [`PushQueue`] keeps at most
//! one pending window:
//!
//! ```text
//!  push(a)   push(b)      push(c)                 fire
//!    │─────────│────────────│──────── delay ────────│
//!    open      restart      restart                 commit(c), resolve a,b,c
//! ```
//!
//! Each call inside the window overwrites the buffered payload and restarts
//! the clock, so only a push followed by `delay` of silence commits, and only
//! the latest payload is ever written. Every caller's [`Waiter`] resolves when
//! that single commit happens, in registration order.
//!
//! The queue itself never sleeps; it only knows deadlines. The owning history
//! decides when a deadline has passed.

use std::cell::RefCell;
use std::rc::Rc;
use std::task::Waker;
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

use crate::error::HistoryError;

#[derive(Debug, Default)]
struct WaiterSlot {
    outcome: Option<Result<(), HistoryError>>,
    waker: Option<Waker>,
}

/// Completion cell shared between the queue and one push future.
#[derive(Debug, Clone, Default)]
pub(crate) struct Waiter {
    slot: Rc<RefCell<WaiterSlot>>,
}

impl Waiter {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Store the outcome and wake the task polling for it.
    pub(crate) fn resolve(&self, outcome: Result<(), HistoryError>) {
        let waker = {
            let mut slot = self.slot.borrow_mut();
            slot.outcome = Some(outcome);
            slot.waker.take()
        };
        if let Some(waker) = waker {
            waker.wake();
        }
    }

    pub(crate) fn take_outcome(&self) -> Option<Result<(), HistoryError>> {
        self.slot.borrow_mut().outcome.take()
    }

    pub(crate) fn register(&self, waker: &Waker) {
        let mut slot = self.slot.borrow_mut();
        match &slot.waker {
            Some(existing) if existing.will_wake(waker) => {}
            _ => slot.waker = Some(waker.clone()),
        }
    }

    /// Whether anything besides the queue still holds this waiter.
    pub(crate) fn is_observed(&self) -> bool {
        Rc::strong_count(&self.slot) > 1
    }
}

/// The single open window.
#[derive(Debug)]
pub(crate) struct PendingPush<T> {
    pub(crate) state: T,
    pub(crate) pick: Option<usize>,
    pub(crate) opened_at: Instant,
    pub(crate) waiters: Vec<Waiter>,
}

/// Resolve every waiter with `outcome`, oldest first.
pub(crate) fn resolve_all(waiters: Vec<Waiter>, outcome: &Result<(), HistoryError>) {
    for waiter in waiters {
        waiter.resolve(outcome.clone());
    }
}

#[derive(Debug)]
pub(crate) struct PushQueue<T> {
    pending: Option<PendingPush<T>>,
    delay: Duration,
    coalesced: u64,
}

impl<T> PushQueue<T> {
    pub(crate) fn new(delay: Duration) -> Self {
        Self {
            pending: None,
            delay,
            coalesced: 0,
        }
    }

    /// Buffer `state`, opening a window or restarting the current one.
    ///
    /// Callers must not enqueue once the deadline has passed; such a window
    /// is committed by its timer, never restarted.
    pub(crate) fn enqueue(&mut self, state: T, pick: Option<usize>, now: Instant) -> Waiter {
        let waiter = Waiter::new();
        match &mut self.pending {
            Some(pending) => {
                pending.state = state;
                pending.pick = pick;
                pending.opened_at = now;
                pending.waiters.push(waiter.clone());
                self.coalesced += 1;
                debug!(waiters = pending.waiters.len(), "push window restarted");
            }
            None => {
                self.pending = Some(PendingPush {
                    state,
                    pick,
                    opened_at: now,
                    waiters: vec![waiter.clone()],
                });
                debug!(delay_ms = self.delay.as_millis() as u64, "push window opened");
            }
        }
        waiter
    }

    pub(crate) fn deadline(&self) -> Option<Instant> {
        self.pending
            .as_ref()
            .map(|pending| pending.opened_at + self.delay)
    }

    /// Take the window if its deadline is at or before `now`.
    pub(crate) fn take_due(&mut self, now: Instant) -> Option<PendingPush<T>> {
        match self.deadline() {
            Some(deadline) if deadline <= now => self.pending.take(),
            _ => None,
        }
    }

    /// Take the window regardless of its deadline.
    pub(crate) fn take(&mut self) -> Option<PendingPush<T>> {
        self.pending.take()
    }

    pub(crate) fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Pushes absorbed into an already-open window.
    pub(crate) fn coalesced(&self) -> u64 {
        self.coalesced
    }

    pub(crate) fn reset_counters(&mut self) {
        self.coalesced = 0;
    }
}
