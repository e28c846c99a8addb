//! # Frame Buffer Pool Module
//!
//! This module provides the fixed pool of reusable frame buffers.
//!
//! ## Plain English Explanation
//!
//! Imagine a cafeteria with exactly N trays. The kitchen takes a tray from
//! the stack, puts a meal on it and hands it out. Customers bring trays back
//! when they are done:
//! 1. If the stack is empty, the kitchen waits for a tray to come back
//! 2. A returned tray wakes up exactly one waiting cook
//! 3. Nobody ever buys new trays or throws old ones away
//!
//! That keeps memory use flat no matter how long capture runs.

mod frame_buffer;

pub use frame_buffer::{FrameBuffer, FrameMeta};

use std::collections::VecDeque;

use parking_lot::{Condvar, Mutex};

use crate::cancel::CancelToken;
use crate::error::{CaptureError, CaptureResult};

// ============================================
// BUFFER TICKET
// ============================================

/// Identifies one checkout of one buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferTicket {
    /// Which buffer
    pub index: usize,
    /// Which checkout of it
    pub generation: u64,
}

#[derive(Debug)]
struct Available {
    /// Indices of recycled buffers, oldest first
    free: VecDeque<usize>,
    /// While set, every acquirer fails with `Interrupted`
    suspended: bool,
}

// ============================================
// FRAME BUFFER POOL
// ============================================

/// A fixed set of frame buffers with a blocking checkout queue.
///
/// The union of checked-out and available buffers is always exactly the
/// set created by [`FrameBufferPool::new`].
#[derive(Debug)]
pub struct FrameBufferPool {
    buffers: Vec<FrameBuffer>,
    available: Mutex<Available>,
    /// Signalled when a buffer is recycled, or waiters must re-check their
    /// cancellation
    returned: Condvar,
    buffer_size: usize,
}

impl FrameBufferPool {
    /// Allocates `count` buffers of `buffer_size` bytes each, all available.
    pub fn new(count: usize, buffer_size: usize) -> CaptureResult<Self> {
        if count == 0 {
            return Err(CaptureError::Allocation(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "frame buffer pool needs at least one buffer",
            )));
        }

        let buffers = (0..count)
            .map(|index| FrameBuffer::new(index, buffer_size))
            .collect::<CaptureResult<Vec<_>>>()?;

        log::info!(
            "Creating frame buffer pool: {} buffers x {} bytes",
            count,
            buffer_size
        );

        Ok(Self {
            buffers,
            available: Mutex::new(Available {
                free: (0..count).collect(),
                suspended: false,
            }),
            returned: Condvar::new(),
            buffer_size,
        })
    }

    /// Takes the oldest available buffer, blocking while none is available.
    ///
    /// Fails with `Interrupted` if `cancel` is cancelled or the pool is
    /// suspended; the available set is left untouched in that case.
    pub fn acquire(&self, cancel: &CancelToken) -> CaptureResult<BufferTicket> {
        let mut available = self.available.lock();
        let index = loop {
            if cancel.is_cancelled() || available.suspended {
                // We may have swallowed a notify_one meant for a buffer;
                // pass it on.
                if !available.free.is_empty() {
                    self.returned.notify_one();
                }
                return Err(CaptureError::Interrupted);
            }
            if let Some(index) = available.free.pop_front() {
                break index;
            }
            self.returned.wait(&mut available);
        };
        drop(available);

        let generation = self.buffers[index].checkout();
        log::trace!("Buffer {} checked out (generation {})", index, generation);

        Ok(BufferTicket { index, generation })
    }

    /// Returns the checkout described by `ticket` to the pool and wakes one
    /// waiting acquirer.
    ///
    /// A no-op returning false if that checkout already ended, so concurrent
    /// cleanup paths may both call it.
    pub fn recycle(&self, ticket: BufferTicket) -> bool {
        self.release(ticket.index, Some(ticket.generation))
    }

    /// Returns buffer `index` to the pool whatever checkout it is in.
    pub fn force_recycle(&self, index: usize) -> bool {
        self.release(index, None)
    }

    /// Force-recycles every buffer still checked out. Returns how many there
    /// were.
    pub fn recycle_all(&self) -> usize {
        (0..self.buffers.len())
            .filter(|&index| self.force_recycle(index))
            .count()
    }

    fn release(&self, index: usize, generation: Option<u64>) -> bool {
        let Some(buffer) = self.buffers.get(index) else {
            return false;
        };
        if !buffer.mark_recycled(generation) {
            return false;
        }

        let mut available = self.available.lock();
        available.free.push_back(index);
        self.returned.notify_one();
        log::trace!("Buffer {} recycled", index);
        true
    }

    /// Cancels `token` and wakes every waiting acquirer so its holder bails out.
    pub fn interrupt(&self, token: &CancelToken) {
        token.cancel();
        let _available = self.available.lock();
        self.returned.notify_all();
    }

    /// Makes every current and future `acquire` fail with `Interrupted`
    /// until [`resume`](Self::resume).
    pub fn suspend(&self) {
        let mut available = self.available.lock();
        available.suspended = true;
        self.returned.notify_all();
    }

    /// Lifts a [`suspend`](Self::suspend).
    pub fn resume(&self) {
        self.available.lock().suspended = false;
    }

    /// The buffer at `index`.
    pub fn buffer(&self, index: usize) -> Option<&FrameBuffer> {
        self.buffers.get(index)
    }

    /// All buffers, checked out or not.
    pub fn buffers(&self) -> impl Iterator<Item = &FrameBuffer> {
        self.buffers.iter()
    }

    /// Total number of buffers.
    pub fn size(&self) -> usize {
        self.buffers.len()
    }

    /// Number of buffers waiting to be acquired. Diagnostics only.
    pub fn available_count(&self) -> usize {
        self.available.lock().free.len()
    }

    /// Size of each buffer in bytes.
    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }
}

// ============================================
// TESTS
// ============================================
