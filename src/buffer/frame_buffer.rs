//! # Frame Buffer
//!
//! One reusable capture slot.
//!
//! ## Plain English
//!
//! Picture a numbered tray in a cafeteria. The kitchen (the backend) puts
//! food on it, a customer carries it away, and eventually the tray comes
//! back to the stack. The tray itself is never thrown away or replaced;
//! only what is on it changes.

use std::io;

use memmap2::MmapMut;
use parking_lot::Mutex;

use crate::backend::FrameInfo;
use crate::error::{CaptureError, CaptureResult};

/// Metadata of the most recent capture into a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameMeta {
    /// Bytes actually filled by the capture
    pub valid_length: usize,
    /// Capture sequence number reported by the backend
    pub sequence: u64,
    /// Capture timestamp in microseconds, as reported by the backend
    pub timestamp_us: u64,
}

#[derive(Debug)]
struct Slot {
    storage: MmapMut,
    meta: FrameMeta,
    recycled: bool,
    generation: u64,
}

/// A single reusable capture slot with fixed-size storage.
///
/// ## Properties
/// - Storage is sized once and never resized
/// - `recycled == true` means the pool owns it
/// - Every checkout bumps the generation, so a handle from an earlier
///   checkout can tell it no longer owns the buffer
#[derive(Debug)]
pub struct FrameBuffer {
    index: usize,
    capacity: usize,
    slot: Mutex<Slot>,
}

impl FrameBuffer {
    /// Allocates a buffer of `capacity` bytes.
    pub(crate) fn new(index: usize, capacity: usize) -> CaptureResult<Self> {
        if capacity == 0 {
            return Err(CaptureError::Allocation(io::Error::new(
                io::ErrorKind::InvalidInput,
                "frame buffer size must be non-zero",
            )));
        }
        let storage = MmapMut::map_anon(capacity).map_err(CaptureError::Allocation)?;

        Ok(Self {
            index,
            capacity,
            slot: Mutex::new(Slot {
                storage,
                meta: FrameMeta::default(),
                recycled: true,
                generation: 0,
            }),
        })
    }

    /// Position of this buffer in its pool.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Size of the storage in bytes.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Whether the pool currently owns this buffer.
    pub fn is_recycled(&self) -> bool {
        self.slot.lock().recycled
    }

    /// How many times this buffer has been checked out.
    pub fn generation(&self) -> u64 {
        self.slot.lock().generation
    }

    /// Metadata of the last capture, regardless of ownership. Diagnostics only.
    pub fn last_meta(&self) -> FrameMeta {
        self.slot.lock().meta
    }

    /// Marks the buffer as owned by a consumer and returns the new generation.
    pub(crate) fn checkout(&self) -> u64 {
        let mut slot = self.slot.lock();
        slot.recycled = false;
        slot.generation += 1;
        slot.meta = FrameMeta::default();
        slot.generation
    }

    /// Gives `fill` the whole storage. The slot stays locked for the
    /// duration, so readers of a stale handle wait rather than see a torn
    /// frame.
    pub(crate) fn fill_with<R>(&self, fill: impl FnOnce(&mut [u8]) -> R) -> R {
        let mut slot = self.slot.lock();
        fill(&mut slot.storage[..])
    }

    /// Records what the backend just captured.
    pub(crate) fn stamp(&self, info: FrameInfo) -> FrameMeta {
        let mut slot = self.slot.lock();
        if info.length > self.capacity {
            log::warn!(
                "Backend reported {} bytes for a {} byte buffer, truncating",
                info.length,
                self.capacity
            );
        }
        slot.meta = FrameMeta {
            valid_length: info.length.min(self.capacity),
            sequence: info.sequence,
            timestamp_us: info.timestamp_us,
        };
        slot.meta
    }

    /// Hands the buffer back to the pool's side.
    ///
    /// With `generation == None` any checkout is ended; otherwise only the
    /// given one. Returns false if there was nothing to do.
    pub(crate) fn mark_recycled(&self, generation: Option<u64>) -> bool {
        let mut slot = self.slot.lock();
        if slot.recycled {
            return false;
        }
        if let Some(expected) = generation {
            if expected != slot.generation {
                return false;
            }
        }
        slot.recycled = true;
        true
    }

    /// Runs `read` over the valid bytes of checkout `generation`.
    pub(crate) fn read<R>(&self, generation: u64, read: impl FnOnce(&[u8]) -> R) -> CaptureResult<R> {
        let slot = self.slot.lock();
        if slot.recycled || slot.generation != generation {
            return Err(CaptureError::Recycled);
        }
        Ok(read(&slot.storage[..slot.meta.valid_length]))
    }

    /// Metadata of checkout `generation`.
    pub(crate) fn meta(&self, generation: u64) -> CaptureResult<FrameMeta> {
        let slot = self.slot.lock();
        if slot.recycled || slot.generation != generation {
            return Err(CaptureError::Recycled);
        }
        Ok(slot.meta)
    }
}

// ============================================
// TESTS
// ============================================
