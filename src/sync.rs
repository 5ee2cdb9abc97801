//! Synchronization primitives for in-process communication.
//!
//! This module provides thread-safe queues and other primitives for
//! communication between threads within the same process.

pub mod bounded;

pub(crate) mod waiter;
