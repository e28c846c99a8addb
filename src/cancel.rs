//! # Cancellation Tokens
//!
//! Rust threads cannot be interrupted from the outside, so every blocking
//! wait in this crate takes a [`CancelToken`] instead.
//!
//! ## Plain English
//!
//! A token is a little flag that several threads can share. A waiting thread
//! checks it every time it wakes up; whoever wants the wait to end raises
//! the flag and then nudges the thing being waited on (the pool or the
//! lifecycle state) so the waiter wakes up and notices.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A shared, one-way cancellation flag.
///
/// Cloning a token gives another handle to the same flag.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    /// Creates a token that is not cancelled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Raises the flag. Waiters only notice once they are woken, so callers
    /// normally go through `FrameBufferPool::interrupt` or
    /// `ResourceState::interrupt` instead of calling this directly.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Returns whether the flag has been raised.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}
