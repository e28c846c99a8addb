//! # Error Types Module
//!
//! This module defines all the error types used throughout framegrab.
//!
//! ## Plain English Explanation
//!
//! A capture session can go wrong in two very different ways:
//!
//! - The caller asked for something the lifecycle does not allow
//!   ("stop a session that was never started", "use a released session")
//! - The native backend failed while doing real work
//!   ("the driver refused to start streaming")
//!
//! The first kind never changes any state. The second kind happens *inside*
//! a transition, so the session rolls back to where it was before the error
//! reaches you.

use std::error::Error as StdError;
use std::fmt;
use std::io;

use thiserror::Error;

use crate::config::ConfigError;
use crate::state::LifecycleState;

// ============================================
// MAIN ERROR
// ============================================

/// The main error type for framegrab.
#[derive(Debug, Error)]
pub enum CaptureError {
    /// The requested lifecycle call is not legal from the current state,
    /// or another transition is already in flight.
    #[error("invalid transition from {from:?} to {to:?}")]
    InvalidTransition {
        from: LifecycleState,
        to: LifecycleState,
    },

    /// The session exists but is not in a state where frames can be fetched.
    #[error("session is not usable in state {0:?}")]
    NotUsable(LifecycleState),

    /// The session (or device) was released and must not be used anymore.
    #[error("resource has been released")]
    Released,

    /// A blocking wait was cancelled.
    #[error("interrupted while waiting")]
    Interrupted,

    /// A synchronous call was made while in push mode, or vice versa.
    #[error("wrong delivery mode: {0}")]
    WrongMode(&'static str),

    /// A native backend call failed.
    #[error(transparent)]
    Backend(#[from] BackendError),

    /// The operation is only allowed while capture is not started.
    #[error("operation not allowed while capture is started")]
    AlreadyStarted,

    /// The push worker is already running.
    #[error("push worker is already running")]
    AlreadyRunning,

    /// The push worker is already stopped.
    #[error("push worker is already stopped")]
    AlreadyStopped,

    /// A frame was filled, but a stop was requested before it could be
    /// handed out, so it was recycled instead.
    #[error("capture was stopped while the frame was being delivered")]
    StoppedDuringDelivery,

    /// The frame's buffer went back to the pool and its contents are gone.
    #[error("frame has been recycled")]
    Recycled,

    /// The device still has an open session or other users.
    #[error("device is still in use")]
    InUse,

    /// The capture configuration was rejected.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The push worker thread could not be spawned.
    #[error("failed to spawn push worker: {0}")]
    Spawn(#[source] io::Error),

    /// Frame buffer storage could not be allocated.
    #[error("failed to allocate frame buffer: {0}")]
    Allocation(#[source] io::Error),
}

impl CaptureError {
    /// Returns true for the "used after release" failure.
    pub fn is_released(&self) -> bool {
        matches!(self, Self::Released)
    }

    /// Returns true if a blocking wait was cancelled.
    pub fn is_interrupted(&self) -> bool {
        matches!(self, Self::Interrupted)
    }

    /// Returns true for lifecycle misuse (as opposed to backend or
    /// allocation failures).
    ///
    /// These are the errors the push worker expects to see while a session
    /// is being stopped.
    pub fn is_state_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidTransition { .. }
                | Self::NotUsable(_)
                | Self::Released
                | Self::Interrupted
                | Self::StoppedDuringDelivery
        )
    }
}

// ============================================
// BACKEND ERRORS
// ============================================

/// Which native primitive failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendOp {
    Init,
    Start,
    Fill,
    Stop,
    Release,
    FrameInterval,
}

impl fmt::Display for BackendOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Init => "init",
            Self::Start => "start",
            Self::Fill => "fill",
            Self::Stop => "stop",
            Self::Release => "release",
            Self::FrameInterval => "frame interval",
        };
        f.write_str(name)
    }
}

/// A failure reported by a native capture backend.
///
/// The payload is whatever the backend wants to carry; the core never
/// inspects it.
#[derive(Debug, Error)]
#[error("backend {op} failed: {source}")]
pub struct BackendError {
    op: BackendOp,
    #[source]
    source: Box<dyn StdError + Send + Sync>,
}

impl BackendError {
    /// Wraps a backend-specific error.
    pub fn new<E>(op: BackendOp, source: E) -> Self
    where
        E: Into<Box<dyn StdError + Send + Sync>>,
    {
        Self {
            op,
            source: source.into(),
        }
    }

    /// Builds a backend error from a plain message.
    pub fn msg(op: BackendOp, message: impl Into<String>) -> Self {
        Self::new(op, message.into())
    }

    /// The native primitive that failed.
    pub fn op(&self) -> BackendOp {
        self.op
    }
}

// ============================================
// RESULT TYPE ALIAS
// ============================================

/// A Result type that uses CaptureError
pub type CaptureResult<T> = Result<T, CaptureError>;

// ============================================
// TESTS
// ============================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CaptureError::InvalidTransition {
            from: LifecycleState::Initialized,
            to: LifecycleState::Stopped,
        };
        let message = err.to_string();
        assert!(message.contains("Initialized"));
        assert!(message.contains("Stopped"));
    }

    #[test]
    fn test_backend_error_conversion() {
        let io_err = io::Error::new(io::ErrorKind::Other, "VIDIOC_STREAMON failed");
        let err: CaptureError = BackendError::new(BackendOp::Start, io_err).into();

        match &err {
            CaptureError::Backend(inner) => assert_eq!(inner.op(), BackendOp::Start),
            _ => panic!("Expected Backend error variant"),
        }
        assert!(err.to_string().contains("STREAMON"));
        assert!(!err.is_state_error());
    }

    #[test]
    fn test_state_error_classification() {
        assert!(CaptureError::Interrupted.is_state_error());
        assert!(CaptureError::Interrupted.is_interrupted());
        assert!(CaptureError::Released.is_released());
        assert!(CaptureError::StoppedDuringDelivery.is_state_error());
        assert!(!CaptureError::WrongMode("push").is_state_error());
        assert!(!CaptureError::AlreadyRunning.is_state_error());
    }
}
