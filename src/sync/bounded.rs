//! Bounded blocking MPMC queue for in-process (inter-thread) communication.
//!
//! A fixed-capacity FIFO shared by any number of producer and consumer
//! threads. Producers park when the buffer is full, consumers park when it is
//! empty, and every wakeup targets exactly one waiter, oldest first.
//!
//! # Overview
//!
//! - [`BoundedQueue::enqueue`] / [`BoundedQueue::dequeue`] - blocking, never
//!   fail under normal operation; full and empty are wait conditions, not
//!   errors
//! - [`BoundedQueue::try_enqueue`] / [`BoundedQueue::try_dequeue`] -
//!   non-suspending probes
//! - [`BoundedQueue::enqueue_timeout`] / [`BoundedQueue::dequeue_timeout`] -
//!   blocking with a deadline; a timed-out wait is a distinct outcome and
//!   removes the waiter without disturbing the order of the rest
//!
//! Blocking `enqueue` is the backpressure mechanism: a slow consumer
//! naturally throttles producers through the fixed capacity, with no separate
//! flow-control layer.
//!
//! # Ordering guarantees
//!
//! Items leave in the order their enqueues appended them (global FIFO across
//! all producers). Waiters of the same kind are resumed in the order they
//! began waiting. A single enqueue wakes at most one consumer and a single
//! dequeue wakes at most one producer, so a herd of parked threads is never
//! released to race for one slot.
//!
//! # Example
//!
//! ```
//! use waitring::sync::bounded::BoundedQueue;
//!
//! let queue = BoundedQueue::new(3).unwrap();
//!
//! queue.enqueue("a");
//! queue.enqueue("b");
//! assert_eq!(queue.dequeue(), "a");
//! assert_eq!(queue.dequeue(), "b");
//! ```

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use minstant::Instant;
use thiserror::Error;

use crate::sync::waiter::WaitList;
use crate::trace::{debug, trace};

/// Error returned by [`BoundedQueue::new`] when the requested capacity is
/// zero.
///
/// A zero-capacity queue could never complete an enqueue: every producer
/// would park unconditionally with no dequeue able to run first. The bound is
/// rejected at construction instead of surfacing later as a deadlock.
/// Negative capacities are unrepresentable in `usize`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("bounded queue capacity must be at least 1")]
pub struct InvalidCapacity;

/// Timeout specification for blocking operations.
#[derive(Debug, Clone, Copy)]
pub enum Timeout {
    /// Wait indefinitely.
    Infinite,
    /// Wait for at most the specified duration.
    Duration(Duration),
}

impl From<Duration> for Timeout {
    fn from(d: Duration) -> Self {
        Self::Duration(d)
    }
}

/// Mutable queue state. Every field is guarded by the single mutex in
/// [`Shared`]; no call observes it mid-mutation.
struct Inner<T> {
    /// Buffered items in arrival order. Never exceeds the capacity: a
    /// producer cannot append without first observing a free slot under the
    /// lock, so the bound is structural rather than asserted.
    buffer: VecDeque<T>,
    /// Producers parked because the buffer was full, oldest first.
    /// Non-empty only while the buffer is at capacity.
    producer_waiters: WaitList,
    /// Consumers parked because the buffer was empty, oldest first.
    /// Non-empty only while the buffer is empty.
    consumer_waiters: WaitList,
}

struct Shared<T> {
    /// Upper bound on buffered items, fixed at construction.
    capacity: usize,
    inner: Mutex<Inner<T>>,
}

impl<T> Shared<T> {
    /// Locks the queue state, recovering from poisoning so a panic in one
    /// caller cannot wedge every other thread. Invariants are restored
    /// before any guard drops, so recovered state is consistent.
    fn lock(&self) -> MutexGuard<'_, Inner<T>> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// Bounded blocking MPMC FIFO queue.
///
/// Cloning yields another handle to the same queue; any handle may enqueue
/// or dequeue from any thread.
///
/// # Example
///
/// ```
/// use std::thread;
///
/// use waitring::sync::bounded::BoundedQueue;
///
/// let queue = BoundedQueue::new(1).unwrap();
///
/// let producer = {
///     let queue = queue.clone();
///     thread::spawn(move || {
///         for i in 0..4 {
///             queue.enqueue(i); // parks whenever the single slot is taken
///         }
///     })
/// };
///
/// for i in 0..4 {
///     assert_eq!(queue.dequeue(), i);
/// }
/// producer.join().unwrap();
/// ```
pub struct BoundedQueue<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for BoundedQueue<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> fmt::Debug for BoundedQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.shared.lock();
        f.debug_struct("BoundedQueue")
            .field("capacity", &self.shared.capacity)
            .field("len", &inner.buffer.len())
            .finish()
    }
}

impl<T> BoundedQueue<T> {
    /// Creates a queue holding at most `capacity` items.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidCapacity`] if `capacity` is zero.
    pub fn new(capacity: usize) -> Result<Self, InvalidCapacity> {
        if capacity == 0 {
            return Err(InvalidCapacity);
        }
        debug!(capacity, "bounded queue created");
        Ok(Self {
            shared: Arc::new(Shared {
                capacity,
                inner: Mutex::new(Inner {
                    buffer: VecDeque::with_capacity(capacity),
                    producer_waiters: WaitList::new(),
                    consumer_waiters: WaitList::new(),
                }),
            }),
        })
    }

    /// Returns the maximum number of buffered items.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    /// Returns the number of currently buffered items.
    ///
    /// The value is a snapshot: under concurrent use it may be stale by the
    /// time the caller inspects it. It is still always within
    /// `0..=capacity`.
    #[must_use]
    pub fn len(&self) -> usize {
        self.shared.lock().buffer.len()
    }

    /// Returns `true` when the snapshot item count is zero.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns `true` when the snapshot item count equals the capacity.
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.len() == self.shared.capacity
    }

    /// Appends `item`, parking the calling thread until a slot is free.
    ///
    /// Never fails and never overflows: the call blocks instead. If a
    /// consumer is parked when the item lands, exactly that consumer (the
    /// oldest) is resumed.
    pub fn enqueue(&self, item: T) {
        let mut inner = self.shared.lock();
        while inner.buffer.len() == self.shared.capacity {
            // Register-then-park under the same lock that publishes wakeups,
            // so a dequeue cannot signal before we are listed (the classic
            // lost-wakeup window). The re-check after resume is mandatory:
            // the wakeup is a hint, not a reservation.
            let slot = inner.producer_waiters.register();
            drop(inner);
            trace!("queue full, producer parked");
            slot.block();
            inner = self.shared.lock();
        }
        inner.buffer.push_back(item);
        inner.consumer_waiters.wake_one();
    }

    /// Removes and returns the oldest item, parking the calling thread until
    /// one is available.
    ///
    /// If a producer is parked when the slot frees up, exactly that producer
    /// (the oldest) is resumed.
    pub fn dequeue(&self) -> T {
        let mut inner = self.shared.lock();
        loop {
            if let Some(item) = inner.buffer.pop_front() {
                inner.producer_waiters.wake_one();
                return item;
            }
            let slot = inner.consumer_waiters.register();
            drop(inner);
            trace!("queue empty, consumer parked");
            slot.block();
            inner = self.shared.lock();
        }
    }

    /// Attempts to append `item` without blocking.
    ///
    /// # Errors
    ///
    /// Returns `Err(item)` if the queue is full, allowing retry.
    pub fn try_enqueue(&self, item: T) -> Result<(), T> {
        let mut inner = self.shared.lock();
        if inner.buffer.len() == self.shared.capacity {
            return Err(item);
        }
        inner.buffer.push_back(item);
        inner.consumer_waiters.wake_one();
        Ok(())
    }

    /// Attempts to remove the oldest item without blocking.
    ///
    /// Returns `None` if the queue is empty.
    #[must_use]
    pub fn try_dequeue(&self) -> Option<T> {
        let mut inner = self.shared.lock();
        let item = inner.buffer.pop_front();
        if item.is_some() {
            inner.producer_waiters.wake_one();
        }
        item
    }

    /// Appends `item`, parking for at most `timeout`.
    ///
    /// A timed-out waiter is removed from the wait list without disturbing
    /// the order of the remaining waiters. If the deadline races an
    /// already-dispatched wakeup, the wakeup is either used (a slot opened
    /// up) or forwarded to the next parked producer; it is never lost.
    ///
    /// # Errors
    ///
    /// Returns `Err(item)` if no slot became available in time.
    pub fn enqueue_timeout(&self, item: T, timeout: Timeout) -> Result<(), T> {
        let deadline = match timeout {
            Timeout::Infinite => {
                self.enqueue(item);
                return Ok(());
            }
            Timeout::Duration(d) => Instant::now() + d,
        };

        let mut inner = self.shared.lock();
        loop {
            if inner.buffer.len() < self.shared.capacity {
                inner.buffer.push_back(item);
                inner.consumer_waiters.wake_one();
                return Ok(());
            }
            let slot = inner.producer_waiters.register();
            drop(inner);
            let woken = slot.block_until(deadline);
            inner = self.shared.lock();
            if !woken {
                if inner.producer_waiters.cancel(&slot) {
                    trace!("producer wait timed out");
                    return Err(item);
                }
                // A wakeup was dispatched to this slot before the cancel.
                // Keep it only if a slot is actually free; otherwise hand it
                // to the next parked producer before giving up.
                if inner.buffer.len() == self.shared.capacity {
                    inner.producer_waiters.wake_one();
                    trace!("producer wait timed out, wakeup forwarded");
                    return Err(item);
                }
            }
        }
    }

    /// Removes the oldest item, parking for at most `timeout`.
    ///
    /// Timeout handling mirrors [`enqueue_timeout`](Self::enqueue_timeout):
    /// order-preserving cancellation, and a raced wakeup is consumed or
    /// forwarded, never lost.
    ///
    /// Returns `None` if no item arrived in time.
    #[must_use]
    pub fn dequeue_timeout(&self, timeout: Timeout) -> Option<T> {
        let deadline = match timeout {
            Timeout::Infinite => return Some(self.dequeue()),
            Timeout::Duration(d) => Instant::now() + d,
        };

        let mut inner = self.shared.lock();
        loop {
            if let Some(item) = inner.buffer.pop_front() {
                inner.producer_waiters.wake_one();
                return Some(item);
            }
            let slot = inner.consumer_waiters.register();
            drop(inner);
            let woken = slot.block_until(deadline);
            inner = self.shared.lock();
            if !woken {
                if inner.consumer_waiters.cancel(&slot) {
                    trace!("consumer wait timed out");
                    return None;
                }
                if inner.buffer.is_empty() {
                    inner.consumer_waiters.wake_one();
                    trace!("consumer wait timed out, wakeup forwarded");
                    return None;
                }
                // The raced wakeup came with an item; the next iteration
                // takes it.
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;

    use super::*;

    #[test]
    fn zero_capacity_rejected() {
        assert_eq!(BoundedQueue::<u64>::new(0).unwrap_err(), InvalidCapacity);
        assert!(BoundedQueue::<u64>::new(1).is_ok());
    }

    #[test]
    fn invalid_capacity_display() {
        let err = InvalidCapacity;
        assert_eq!(format!("{err}"), "bounded queue capacity must be at least 1");
    }

    #[test]
    fn fifo_within_capacity() {
        let queue = BoundedQueue::new(3).unwrap();

        queue.enqueue("a");
        queue.enqueue("b");
        queue.enqueue("c");

        assert_eq!(queue.dequeue(), "a");
        assert_eq!(queue.dequeue(), "b");
        assert_eq!(queue.dequeue(), "c");
    }

    #[test]
    fn try_enqueue_full_returns_item() {
        let queue = BoundedQueue::new(2).unwrap();

        assert!(queue.try_enqueue(1).is_ok());
        assert!(queue.try_enqueue(2).is_ok());
        assert_eq!(queue.try_enqueue(3), Err(3));

        assert_eq!(queue.try_dequeue(), Some(1));
        assert!(queue.try_enqueue(3).is_ok());
        assert_eq!(queue.try_enqueue(4), Err(4));
    }

    #[test]
    fn try_dequeue_empty_returns_none() {
        let queue = BoundedQueue::<u64>::new(4).unwrap();

        assert_eq!(queue.try_dequeue(), None);
        queue.enqueue(7);
        assert_eq!(queue.try_dequeue(), Some(7));
        assert_eq!(queue.try_dequeue(), None);
    }

    #[test]
    fn snapshot_introspection() {
        let queue = BoundedQueue::new(2).unwrap();

        assert_eq!(queue.capacity(), 2);
        assert_eq!(queue.len(), 0);
        assert!(queue.is_empty());
        assert!(!queue.is_full());

        queue.enqueue(10);
        assert_eq!(queue.len(), 1);
        assert!(!queue.is_empty());
        assert!(!queue.is_full());

        queue.enqueue(20);
        assert!(queue.is_full());

        assert_eq!(queue.dequeue(), 10);
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn clone_shares_the_same_queue() {
        let queue = BoundedQueue::new(2).unwrap();
        let other = queue.clone();

        queue.enqueue("x");
        assert_eq!(other.dequeue(), "x");
        assert!(other.is_empty());
    }

    /// Capacity 1: enqueue completes immediately, a dequeue issued before any
    /// further enqueue returns that item, and a second dequeue parks until
    /// another enqueue occurs.
    #[test]
    fn capacity_one_handoff() {
        let queue = BoundedQueue::new(1).unwrap();

        queue.enqueue("x");
        assert_eq!(queue.dequeue(), "x");

        let done = Arc::new(AtomicBool::new(false));
        let consumer = {
            let queue = queue.clone();
            let done = Arc::clone(&done);
            thread::spawn(move || {
                let item = queue.dequeue();
                done.store(true, Ordering::SeqCst);
                item
            })
        };

        thread::sleep(Duration::from_millis(50));
        assert!(!done.load(Ordering::SeqCst), "dequeue returned with no item");

        queue.enqueue("y");
        assert_eq!(consumer.join().unwrap(), "y");
    }

    /// Capacity 3: three enqueues complete without blocking, a fourth parks,
    /// and the first dequeue returns the oldest item while unblocking the
    /// parked producer. The buffer then holds the remaining three in order.
    #[test]
    fn capacity_three_fourth_enqueue_parks() {
        let queue = BoundedQueue::new(3).unwrap();

        queue.enqueue("a");
        queue.enqueue("b");
        queue.enqueue("c");

        let parked = Arc::new(AtomicBool::new(true));
        let producer = {
            let queue = queue.clone();
            let parked = Arc::clone(&parked);
            thread::spawn(move || {
                queue.enqueue("d");
                parked.store(false, Ordering::SeqCst);
            })
        };

        thread::sleep(Duration::from_millis(50));
        assert!(parked.load(Ordering::SeqCst), "fourth enqueue did not park");

        assert_eq!(queue.dequeue(), "a");
        producer.join().unwrap();

        assert_eq!(queue.dequeue(), "b");
        assert_eq!(queue.dequeue(), "c");
        assert_eq!(queue.dequeue(), "d");
        assert!(queue.is_empty());
    }

    #[test]
    fn enqueue_timeout_expires_on_full_queue() {
        let queue = BoundedQueue::new(1).unwrap();
        queue.enqueue(1);

        let start = Instant::now();
        let rejected = queue.enqueue_timeout(2, Duration::from_millis(20).into());
        assert_eq!(rejected, Err(2));
        assert!(Instant::now() - start >= Duration::from_millis(20));

        // The failed wait left no stale waiter behind.
        assert_eq!(queue.dequeue(), 1);
        assert!(queue.try_enqueue(3).is_ok());
    }

    #[test]
    fn dequeue_timeout_expires_on_empty_queue() {
        let queue = BoundedQueue::<u64>::new(1).unwrap();

        let start = Instant::now();
        assert_eq!(queue.dequeue_timeout(Duration::from_millis(20).into()), None);
        assert!(Instant::now() - start >= Duration::from_millis(20));

        queue.enqueue(5);
        assert_eq!(queue.dequeue_timeout(Duration::from_millis(20).into()), Some(5));
    }

    #[test]
    fn infinite_timeout_behaves_as_blocking() {
        let queue = BoundedQueue::new(1).unwrap();
        queue.enqueue(1);

        let producer = {
            let queue = queue.clone();
            thread::spawn(move || queue.enqueue_timeout(2, Timeout::Infinite))
        };

        thread::sleep(Duration::from_millis(20));
        assert_eq!(queue.dequeue(), 1);
        assert_eq!(producer.join().unwrap(), Ok(()));
        assert_eq!(queue.dequeue(), 2);
    }

    /// A producer whose wait times out must not steal the wakeup owed to the
    /// producer parked behind it.
    #[test]
    fn timed_out_producer_does_not_displace_later_waiter() {
        let queue = BoundedQueue::new(1).unwrap();
        queue.enqueue("held");

        // Parks first, gives up after 40ms.
        let impatient = {
            let queue = queue.clone();
            thread::spawn(move || queue.enqueue_timeout("impatient", Duration::from_millis(40).into()))
        };
        thread::sleep(Duration::from_millis(10));

        // Parks second, waits forever.
        let patient = {
            let queue = queue.clone();
            thread::spawn(move || queue.enqueue("patient"))
        };

        // Let the impatient producer expire before freeing the slot.
        assert_eq!(impatient.join().unwrap(), Err("impatient"));
        assert_eq!(queue.dequeue(), "held");
        patient.join().unwrap();
        assert_eq!(queue.dequeue(), "patient");
    }

    #[test]
    fn backpressure_bounds_the_buffer() {
        let queue = BoundedQueue::new(2).unwrap();

        let producer = {
            let queue = queue.clone();
            thread::spawn(move || {
                for i in 0..20u64 {
                    queue.enqueue(i);
                }
            })
        };

        let mut received = Vec::new();
        for _ in 0..20 {
            assert!(queue.len() <= queue.capacity());
            received.push(queue.dequeue());
            thread::sleep(Duration::from_millis(1));
        }
        producer.join().unwrap();

        let expected: Vec<u64> = (0..20).collect();
        assert_eq!(received, expected);
    }
}
