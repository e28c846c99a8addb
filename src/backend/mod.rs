//! # Capture Backend Interface
//!
//! Defines what the session needs from a native capture backend.
//!
//! ## Plain English
//!
//! The session never touches hardware itself. Opening the device, programming
//! formats, mapping DMA buffers: all of that lives behind this trait. The
//! session only asks the backend to:
//!
//! - set itself up and say how many buffers it has (`init`)
//! - arm and disarm capture (`start` / `stop`)
//! - copy the next frame into a buffer we own (`fill`)
//! - free everything (`release`)
//!
//! Backends do not need to be re-entrant: the session never issues two
//! native calls for the same session at the same time.

mod simulated;
#[cfg(test)]
pub(crate) mod testing;

pub use simulated::SimulatedBackend;

use crate::error::{BackendError, BackendOp};

// ============================================
// DATA CARRIERS
// ============================================

/// What the session asks the backend to set up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureParams {
    pub width: u32,
    pub height: u32,
    pub input: u32,
    pub standard: u32,
    pub pixel_format: u32,
    pub requested_buffers: usize,
}

/// What the backend actually set up.
///
/// The pool is sized from `count` and `buffer_size`; `width`/`height` may
/// differ from what was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferGeometry {
    pub count: usize,
    pub buffer_size: usize,
    pub width: u32,
    pub height: u32,
}

/// What `fill` wrote.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameInfo {
    /// Bytes written into the storage
    pub length: usize,
    /// Monotonic capture sequence number
    pub sequence: u64,
    /// Capture timestamp in microseconds
    pub timestamp_us: u64,
}

// ============================================
// COMMON INTERFACE
// ============================================

/// A native capture backend.
///
/// Implementations use interior mutability; every call goes through `&self`
/// so the session can share one backend between the caller and its push
/// worker.
pub trait CaptureBackend: Send + Sync {
    /// Allocates device buffers and applies the capture parameters.
    fn init(&self, params: &CaptureParams) -> Result<BufferGeometry, BackendError>;

    /// Arms capture.
    fn start(&self) -> Result<(), BackendError>;

    /// Waits for the next frame and copies it into `storage`.
    fn fill(&self, storage: &mut [u8]) -> Result<FrameInfo, BackendError>;

    /// Disarms capture.
    fn stop(&self) -> Result<(), BackendError>;

    /// Frees every device-side resource.
    fn release(&self) -> Result<(), BackendError>;

    /// Requests a frame interval of `numerator / denominator` seconds.
    fn set_frame_interval(&self, _numerator: u32, _denominator: u32) -> Result<(), BackendError> {
        Err(BackendError::msg(
            BackendOp::FrameInterval,
            "frame interval control is not supported",
        ))
    }

    /// The current frame interval as `(numerator, denominator)` seconds.
    fn frame_interval(&self) -> Result<(u32, u32), BackendError> {
        Err(BackendError::msg(
            BackendOp::FrameInterval,
            "frame interval control is not supported",
        ))
    }

    /// Returns the name of this backend (for logging).
    fn name(&self) -> &str {
        "native"
    }
}
