//! # framegrab
//!
//! Capture-session lifecycle and frame buffer pooling for video capture
//! devices.
//!
//! ## Architecture Overview
//!
//! The crate is structured into independent modules:
//!
//! - `state`: Two-phase lifecycle state machine with an "active users" count
//! - `buffer`: Fixed pool of reusable frame buffers
//! - `capture`: Capture sessions, frame handles and the push worker
//! - `backend`: Interface to the native capture driver, plus a simulated one
//! - `device`: One-session-per-device bookkeeping
//! - `cancel`: Cancellation tokens for blocking waits
//! - `config`: Session configuration
//! - `error`: Error types
//!
//! ## Plain English
//!
//! ```text
//!   backend ──fill──▶ pool buffer ──▶ FilledFrame ──▶ your code
//!                         ▲                              │
//!                         └─────────── recycle ──────────┘
//! ```
//!
//! The session never allocates per frame: the same handful of buffers go
//! round and round, and every lifecycle call is checked against the state
//! machine before a buffer is touched.

// ============================================
// MODULE DECLARATIONS
// ============================================

pub mod backend;
pub mod buffer;
pub mod cancel;
pub mod capture;
pub mod config;
pub mod device;
pub mod error;
pub mod state;

// ============================================
// RE-EXPORTS
// ============================================

pub use backend::{CaptureBackend, SimulatedBackend};
pub use buffer::FrameBufferPool;
pub use cancel::CancelToken;
pub use capture::{CaptureSession, FilledFrame, FnCallback, FrameCallback, SessionStats, WorkerStatus};
pub use config::CaptureConfig;
pub use device::VideoDevice;
pub use error::{BackendError, CaptureError, CaptureResult};
pub use state::LifecycleState;

// ============================================
// LOGGING
// ============================================

/// Initialize logging for the platform.
///
/// Safe to call more than once. On desktop the level defaults to `info` and
/// can be changed through `RUST_LOG`.
pub fn init_logging() {
    #[cfg(target_os = "android")]
    {
        android_logger::init_once(
            android_logger::Config::default()
                .with_max_level(log::LevelFilter::Info)
                .with_tag("framegrab"),
        );
    }

    #[cfg(not(target_os = "android"))]
    {
        let _ = env_logger::builder()
            .filter_level(log::LevelFilter::Info)
            .parse_default_env()
            .try_init();
    }
}

// ============================================
// TESTS
// ============================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_simulated_pull_session() {
        init_logging();
        let backend = Arc::new(SimulatedBackend::new(200));
        let session = CaptureSession::open(backend, CaptureConfig::low_latency()).unwrap();

        session.start().unwrap();
        let first = session.next_frame().unwrap();
        let second = session.next_frame().unwrap();
        assert_eq!(second.sequence().unwrap(), first.sequence().unwrap() + 1);
        assert_eq!(first.len().unwrap(), session.buffer_size());
        drop((first, second));

        session.release().unwrap();
        assert_eq!(session.state(), LifecycleState::Released);
    }

    #[test]
    fn test_device_round_trip() {
        init_logging();
        let device = VideoDevice::new("sim0", Arc::new(SimulatedBackend::new(200)));

        let session = device.open_session(CaptureConfig::default()).unwrap();
        session.start().unwrap();
        assert!(session.next_frame().is_ok());

        device.release_session().unwrap();
        device.release(false).unwrap();
        assert!(session.start().unwrap_err().is_released());
    }
}
