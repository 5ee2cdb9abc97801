//! In-process bounded blocking queue with FIFO-fair wakeup.
//!
//! The crate provides one primitive: [`sync::bounded::BoundedQueue`], a
//! fixed-capacity MPMC FIFO where producers park when the buffer is full and
//! consumers park when it is empty. Parking uses per-waiter slots held in
//! ordered wait lists, so each wakeup targets exactly the oldest waiter.
//! There is no busy-polling and no lost-wakeup window.
//!
//! # Example
//!
//! ```
//! use std::thread;
//!
//! use waitring::sync::bounded::BoundedQueue;
//!
//! let queue = BoundedQueue::new(2).unwrap();
//!
//! let consumer = {
//!     let queue = queue.clone();
//!     thread::spawn(move || queue.dequeue())
//! };
//!
//! queue.enqueue("job");
//! assert_eq!(consumer.join().unwrap(), "job");
//! ```

pub mod sync;

mod trace;

pub use trace::init_tracing;
