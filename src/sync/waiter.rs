//! Per-waiter parking slots and the ordered wait lists that hold them.
//!
//! A shared `Condvar::notify_one` wakes an arbitrary waiter, which cannot
//! express first-in-first-woken fairness. Instead, every suspended call owns
//! a [`WaitSlot`] (its resumption token) registered at the tail of a
//! [`WaitList`]; wakeup pops the head of the list and resumes exactly that
//! slot.
//!
//! # Locking protocol
//!
//! A `WaitList` is only ever touched under its owning queue's lock. A parked
//! thread blocks on its own slot with the queue lock released, so waking a
//! slot while holding the queue lock cannot deadlock (queue lock outer, slot
//! lock inner, never the reverse).

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};

use minstant::Instant;

/// State of one parked call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlotState {
    /// Registered in a wait list; the owner is blocked or about to block.
    Parked,
    /// Popped from its list and resumed; the owner may proceed to re-check
    /// its wait condition.
    Woken,
}

/// Resumption token for a single suspended call.
///
/// A slot is woken at most once. While parked it is reachable only through
/// its wait list and the blocked caller's own handle, so wakeup and
/// cancellation are serialized by the queue lock that guards the list.
pub(crate) struct WaitSlot {
    state: Mutex<SlotState>,
    resumed: Condvar,
}

impl WaitSlot {
    fn new() -> Self {
        Self {
            state: Mutex::new(SlotState::Parked),
            resumed: Condvar::new(),
        }
    }

    /// Locks the slot state, recovering from poisoning. A producer or
    /// consumer panicking elsewhere must not wedge the waiters it raced.
    fn lock_state(&self) -> MutexGuard<'_, SlotState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Marks the slot woken and unparks its owner.
    ///
    /// Called with the owning queue's lock held, after the slot has been
    /// popped from its wait list.
    pub(crate) fn wake(&self) {
        let mut state = self.lock_state();
        *state = SlotState::Woken;
        drop(state);
        self.resumed.notify_one();
    }

    /// Blocks the calling thread until [`wake`](Self::wake) is observed.
    ///
    /// Returns immediately if the wakeup already happened.
    pub(crate) fn block(&self) {
        let mut state = self.lock_state();
        while *state == SlotState::Parked {
            state = match self.resumed.wait(state) {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
        }
    }

    /// Blocks until woken or until `deadline` passes, whichever is first.
    ///
    /// Returns `true` if the slot was woken. `false` only means no wakeup was
    /// observed before the deadline; a wakeup may still be in flight, and the
    /// caller must settle that race under the queue lock via
    /// [`WaitList::cancel`].
    pub(crate) fn block_until(&self, deadline: Instant) -> bool {
        let mut state = self.lock_state();
        loop {
            if *state == SlotState::Woken {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            state = match self.resumed.wait_timeout(state, deadline - now) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
    }
}

/// Ordered list of parked calls, oldest first.
///
/// The list itself is unbounded: each entry corresponds to one live blocked
/// thread, so its length is limited by the caller's thread count rather than
/// by anything the queue enforces.
pub(crate) struct WaitList {
    slots: VecDeque<Arc<WaitSlot>>,
}

impl WaitList {
    pub(crate) fn new() -> Self {
        Self {
            slots: VecDeque::new(),
        }
    }

    /// Registers a new parked slot at the tail and returns the caller's
    /// handle to block on.
    pub(crate) fn register(&mut self) -> Arc<WaitSlot> {
        let slot = Arc::new(WaitSlot::new());
        self.slots.push_back(Arc::clone(&slot));
        slot
    }

    /// Pops the oldest slot and wakes it.
    ///
    /// Returns `false` if nobody was parked. At most one waiter is resumed
    /// per call; the rest stay parked in their original order.
    pub(crate) fn wake_one(&mut self) -> bool {
        match self.slots.pop_front() {
            Some(slot) => {
                slot.wake();
                true
            }
            None => false,
        }
    }

    /// Removes `slot` without waking it, preserving the relative order of
    /// the remaining waiters.
    ///
    /// Returns `false` if the slot is no longer listed, which means a wakeup
    /// was already dispatched to it. The caller decides whether to use that
    /// wakeup or forward it to the new head of the list.
    pub(crate) fn cancel(&mut self, slot: &Arc<WaitSlot>) -> bool {
        match self.slots.iter().position(|s| Arc::ptr_eq(s, slot)) {
            Some(index) => {
                self.slots.remove(index);
                true
            }
            None => false,
        }
    }
}
