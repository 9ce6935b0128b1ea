#![forbid(unsafe_code)]

//! Bounded undo/redo slot sequence with a cursor.
//!
//! Entries live in one `Vec` indexed by absolute position rather than in
//! separate undo and redo stacks. Eviction replaces
//! the oldest retained entry with a tombstone instead of shifting the vector,
//! so positions stay stable for the lifetime of a branch.
//!
//! ```text
//! max_length = 3, after 5 pushes:
//!
//!   index:   0     1     2     3     4
//!   slots: [ ✝ ] [ ✝ ] [ e2 ] [ e3 ] [ e4 ]
//!                                      ^ cursor
//!   has_undo: cursor(4) > 5 - 3 = 2   -> true
//!   len:      min(5, 3)               -> 3
//! ```
//!
//! # Invariants
//!
//! 1. `cursor` is `None` iff `slots` is empty.
//! 2. A push drops every slot after the cursor before appending.
//! 3. At most `max_length` slots hold entries right after a push.
//! 4. `undo`/`redo` outside their range are no-ops.

use tracing::debug;

#[derive(Debug, Clone)]
pub(crate) struct HistoryStack<E> {
    slots: Vec<Option<E>>,
    cursor: Option<usize>,
    max_length: usize,
    evictions: u64,
}

impl<E> HistoryStack<E> {
    /// `max_length` must be at least 1; [`HistoryConfig::validate`] enforces it.
    ///
    /// [`HistoryConfig::validate`]: crate::HistoryConfig::validate
    pub(crate) fn new(max_length: usize) -> Self {
        Self {
            slots: Vec::new(),
            cursor: None,
            max_length: max_length.max(1),
            evictions: 0,
        }
    }

    /// Entry at the cursor; `None` when empty or tombstoned.
    pub(crate) fn current(&self) -> Option<&E> {
        self.cursor.and_then(|c| self.slots[c].as_ref())
    }

    /// Append `entry` after the cursor, discarding redo slots.
    pub(crate) fn push(&mut self, entry: E) {
        let next = self.cursor.map_or(0, |c| c + 1);
        let dropped = self.slots.len().saturating_sub(next);
        if dropped > 0 {
            debug!(dropped, "redo entries discarded");
        }
        self.slots.truncate(next);
        self.slots.push(Some(entry));
        self.cursor = Some(next);

        if next >= self.max_length {
            let evicted = next - self.max_length;
            if self.slots[evicted].take().is_some() {
                self.evictions += 1;
                debug!(slot = evicted, "history entry evicted");
            }
        }
    }

    /// Oldest position `undo` may reach.
    fn lower_bound(&self) -> usize {
        self.slots.len().saturating_sub(self.max_length)
    }

    /// `cursor > max(0, slots - max_length)`, and the slot before the cursor
    /// still holds an entry.
    pub(crate) fn has_undo(&self) -> bool {
        let Some(cursor) = self.cursor else {
            return false;
        };
        if cursor <= self.lower_bound() {
            return false;
        }
        // After an undo followed by a push, the truncated branch can leave a
        // tombstone inside the window.
        self.slots[cursor - 1].is_some()
    }

    pub(crate) fn has_redo(&self) -> bool {
        let start = self.cursor.map_or(0, |c| c + 1);
        self.slots
            .get(start..)
            .is_some_and(|rest| rest.iter().any(Option::is_some))
    }

    /// Step back one slot. Returns whether the cursor moved.
    pub(crate) fn undo(&mut self) -> bool {
        if !self.has_undo() {
            return false;
        }
        self.cursor = self.cursor.map(|c| c - 1);
        true
    }

    /// Step forward one slot. Returns whether the cursor moved.
    pub(crate) fn redo(&mut self) -> bool {
        if !self.has_redo() {
            return false;
        }
        self.cursor = Some(self.cursor.map_or(0, |c| c + 1));
        true
    }

    /// Visible history size.
    pub(crate) fn len(&self) -> usize {
        self.slots.len().min(self.max_length)
    }

    pub(crate) fn total_slots(&self) -> usize {
        self.slots.len()
    }

    pub(crate) fn tombstones(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_none()).count()
    }

    pub(crate) fn cursor(&self) -> Option<usize> {
        self.cursor
    }

    pub(crate) fn evictions(&self) -> u64 {
        self.evictions
    }

    pub(crate) fn clear(&mut self) {
        self.slots.clear();
        self.cursor = None;
        self.evictions = 0;
    }
}
