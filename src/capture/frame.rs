//! # Filled Frame
//!
//! The handle a consumer gets for one captured frame.
//!
//! ## Plain English
//!
//! A `FilledFrame` is a loan, not a copy. The bytes stay in the pool's
//! buffer; the handle just says "buffer 2, checkout number 17 is yours".
//! When you are done, recycle it (or just drop it) and the buffer goes back
//! to the pool for the next capture.
//!
//! If the session is stopped while you still hold a frame, the buffer is
//! taken back anyway. Your handle then answers every question with
//! `CaptureError::Recycled` instead of showing you somebody else's picture.

use std::fmt;
use std::sync::Arc;

use crate::buffer::{BufferTicket, FrameBuffer, FrameBufferPool, FrameMeta};
use crate::error::{CaptureError, CaptureResult};

/// A captured frame, leased from the session's buffer pool.
pub struct FilledFrame {
    pool: Arc<FrameBufferPool>,
    ticket: BufferTicket,
}

impl FilledFrame {
    pub(crate) fn new(pool: Arc<FrameBufferPool>, ticket: BufferTicket) -> Self {
        Self { pool, ticket }
    }

    fn buffer(&self) -> CaptureResult<&FrameBuffer> {
        self.pool
            .buffer(self.ticket.index)
            .ok_or(CaptureError::Recycled)
    }

    /// Everything the backend reported about this frame.
    pub fn meta(&self) -> CaptureResult<FrameMeta> {
        self.buffer()?.meta(self.ticket.generation)
    }

    /// Capture sequence number.
    pub fn sequence(&self) -> CaptureResult<u64> {
        Ok(self.meta()?.sequence)
    }

    /// Capture timestamp in microseconds.
    pub fn timestamp_us(&self) -> CaptureResult<u64> {
        Ok(self.meta()?.timestamp_us)
    }

    /// Number of valid bytes.
    pub fn len(&self) -> CaptureResult<usize> {
        Ok(self.meta()?.valid_length)
    }

    /// Index of the pool buffer holding the frame.
    pub fn buffer_index(&self) -> usize {
        self.ticket.index
    }

    /// Which checkout of that buffer this frame is.
    pub fn generation(&self) -> u64 {
        self.ticket.generation
    }

    /// True once this frame's checkout has ended.
    pub fn is_recycled(&self) -> bool {
        self.meta().is_err()
    }

    /// Runs `read` over the frame bytes without copying them.
    ///
    /// The buffer cannot be recycled or refilled while `read` runs.
    pub fn with_bytes<R>(&self, read: impl FnOnce(&[u8]) -> R) -> CaptureResult<R> {
        self.buffer()?.read(self.ticket.generation, read)
    }

    /// Copies the frame bytes out.
    pub fn to_vec(&self) -> CaptureResult<Vec<u8>> {
        self.with_bytes(<[u8]>::to_vec)
    }

    /// Gives the buffer back to the pool.
    ///
    /// Safe to call more than once, and a no-op if the session already took
    /// the buffer back. Returns true if this call did the recycling.
    pub fn recycle(&self) -> bool {
        self.pool.recycle(self.ticket)
    }
}

impl Drop for FilledFrame {
    fn drop(&mut self) {
        self.pool.recycle(self.ticket);
    }
}

impl fmt::Debug for FilledFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilledFrame")
            .field("buffer_index", &self.ticket.index)
            .field("generation", &self.ticket.generation)
            .field("meta", &self.meta().ok())
            .finish()
    }
}

// ============================================
// TESTS
// ============================================
