//! # Configuration Module
//!
//! This module handles all configurable settings for a capture session.
//!
//! ## Plain English Explanation
//!
//! Before the hardware can hand us any frames, we have to tell it what we
//! want: how big the picture is, which input to read from, and how many
//! buffers it should juggle. This module defines those settings, their
//! defaults, and what counts as a sane value.
//!
//! The backend is allowed to adjust the resolution to the nearest thing the
//! hardware supports; the session reports what it actually got.

use thiserror::Error;

use crate::backend::CaptureParams;

// ============================================
// LIMITS
// ============================================

/// Largest width or height we accept, in pixels.
pub const MAX_DIMENSION: u32 = 8192;

/// Most device buffers we ask a backend for.
pub const MAX_BUFFERS: usize = 32;

// ============================================
// MAIN CONFIGURATION
// ============================================

/// All configuration options for a capture session.
#[derive(Clone, Debug, PartialEq)]
pub struct CaptureConfig {
    // ----------------------------------------
    // FORMAT SETTINGS
    // "What the picture looks like"
    // ----------------------------------------

    /// Requested frame width in pixels
    pub width: u32,

    /// Requested frame height in pixels
    pub height: u32,

    /// Opaque pixel format code (FourCC style), passed through to the backend
    pub pixel_format: u32,

    // ----------------------------------------
    // SOURCE SETTINGS
    // "Where the picture comes from"
    // ----------------------------------------

    /// Input (channel) index on the device
    pub input: u32,

    /// Video standard identifier; `0` means none (webcams)
    pub standard: u32,

    /// Frame interval as `(numerator, denominator)` seconds, if the device
    /// should be asked for a specific rate
    pub frame_interval: Option<(u32, u32)>,

    // ----------------------------------------
    // BUFFER SETTINGS
    // "How many frames can be in flight"
    // ----------------------------------------

    /// How many device buffers to request. The backend has the final word;
    /// the pool is sized from what it reports.
    ///
    /// ## Plain English
    /// More buffers means consumers can hold on to frames longer before
    /// the capture path has to wait for one to come back.
    pub requested_buffers: usize,

    // ----------------------------------------
    // PUSH MODE SETTINGS
    // ----------------------------------------

    /// Name given to the push worker thread
    pub push_thread_name: String,
}

impl CaptureConfig {
    /// Creates a configuration with all default values
    pub fn default() -> Self {
        Self {
            // Format: VGA, YUYV
            width: 640,
            height: 480,
            pixel_format: fourcc(b"YUYV"),

            // Source: first input, no standard
            input: 0,
            standard: 0,
            frame_interval: None,

            // Buffers: enough for a consumer to hold a couple of frames
            requested_buffers: 4,

            push_thread_name: "frame-pusher".to_string(),
        }
    }

    /// Creates a configuration that keeps as few frames in flight as possible.
    ///
    /// ## When to Use
    /// When the consumer handles every frame immediately and stale frames
    /// are worse than dropped ones.
    pub fn low_latency() -> Self {
        Self {
            requested_buffers: 2,
            ..Self::default()
        }
    }

    /// Creates a configuration for consumers that hold frames for a while
    /// (encoders, network senders).
    pub fn high_throughput() -> Self {
        Self {
            requested_buffers: 8,
            ..Self::default()
        }
    }

    /// Sets the requested resolution.
    pub fn with_resolution(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    /// Validates the configuration and returns errors if invalid
    ///
    /// ## Plain English
    /// Makes sure all settings are within reasonable bounds.
    /// Returns a list of problems, or empty if all is well.
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();

        if self.width == 0 || self.width > MAX_DIMENSION {
            errors.push(ConfigError::InvalidWidth(self.width));
        }
        if self.height == 0 || self.height > MAX_DIMENSION {
            errors.push(ConfigError::InvalidHeight(self.height));
        }

        if self.requested_buffers == 0 || self.requested_buffers > MAX_BUFFERS {
            errors.push(ConfigError::InvalidBufferCount(self.requested_buffers));
        }

        if let Some((num, denom)) = self.frame_interval {
            if num == 0 || denom == 0 {
                errors.push(ConfigError::InvalidFrameInterval(num, denom));
            }
        }

        if self.push_thread_name.trim().is_empty() {
            errors.push(ConfigError::EmptyThreadName);
        }

        errors
    }

    /// The parameters handed to `CaptureBackend::init`.
    pub fn params(&self) -> CaptureParams {
        CaptureParams {
            width: self.width,
            height: self.height,
            input: self.input,
            standard: self.standard,
            pixel_format: self.pixel_format,
            requested_buffers: self.requested_buffers,
        }
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self::default()
    }
}

/// Packs four ASCII bytes into a little-endian FourCC code.
pub const fn fourcc(code: &[u8; 4]) -> u32 {
    (code[0] as u32) | (code[1] as u32) << 8 | (code[2] as u32) << 16 | (code[3] as u32) << 24
}

// ============================================
// CONFIGURATION ERRORS
// ============================================

/// Errors that can occur with configuration values
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("width {0} is outside the valid range (1-8192)")]
    InvalidWidth(u32),

    #[error("height {0} is outside the valid range (1-8192)")]
    InvalidHeight(u32),

    #[error("buffer count {0} is outside the valid range (1-32)")]
    InvalidBufferCount(usize),

    #[error("frame interval {0}/{1} has a zero term")]
    InvalidFrameInterval(u32, u32),

    #[error("push thread name must not be empty")]
    EmptyThreadName,
}

// ============================================
// TESTS
// ============================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = CaptureConfig::default();

        assert_eq!(config.width, 640);
        assert_eq!(config.height, 480);
        assert_eq!(config.requested_buffers, 4);
        assert!(config.validate().is_empty());
    }

    #[test]
    fn test_presets_are_valid() {
        assert!(CaptureConfig::low_latency().validate().is_empty());
        assert!(CaptureConfig::high_throughput().validate().is_empty());
        assert!(
            CaptureConfig::low_latency().requested_buffers
                < CaptureConfig::high_throughput().requested_buffers
        );
    }

    #[test]
    fn test_validation_errors() {
        let mut config = CaptureConfig::default();

        config.requested_buffers = 0;
        assert_eq!(config.validate(), vec![ConfigError::InvalidBufferCount(0)]);

        config.requested_buffers = 4;
        config.frame_interval = Some((1, 0));
        assert_eq!(config.validate(), vec![ConfigError::InvalidFrameInterval(1, 0)]);

        config.frame_interval = Some((1, 30));
        assert!(config.validate().is_empty());

        let config = CaptureConfig::default().with_resolution(0, 9000);
        assert_eq!(config.validate().len(), 2);
    }

    #[test]
    fn test_params_follow_config() {
        let config = CaptureConfig::high_throughput().with_resolution(1280, 720);
        let params = config.params();

        assert_eq!(params.width, 1280);
        assert_eq!(params.height, 720);
        assert_eq!(params.requested_buffers, 8);
        assert_eq!(params.pixel_format, fourcc(b"YUYV"));
    }
}
