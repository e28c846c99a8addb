//! # Simulated Capture Backend
//!
//! Generates test pattern frames without any hardware.
//! Used by the demo and by tests.

use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use super::{BufferGeometry, CaptureBackend, CaptureParams, FrameInfo};
use crate::error::{BackendError, BackendOp};

/// Bytes per pixel of the packed YUYV frames we pretend to capture.
const BYTES_PER_PIXEL: usize = 2;

#[derive(Debug)]
struct SimState {
    geometry: Option<BufferGeometry>,
    armed: bool,
    interval: (u32, u32),
    sequence: u64,
    epoch: Instant,
    next_due: Instant,
}

impl SimState {
    fn frame_duration(&self) -> Duration {
        let (num, denom) = self.interval;
        Duration::from_micros(1_000_000 * num as u64 / denom.max(1) as u64)
    }
}

/// Simulated backend that produces a moving gradient at a fixed rate.
#[derive(Debug)]
pub struct SimulatedBackend {
    state: Mutex<SimState>,
    /// Signalled on stop and release so a blocked `fill` gives up
    disarmed: Condvar,
}

impl SimulatedBackend {
    /// Creates a simulated source producing `fps` frames per second.
    pub fn new(fps: u32) -> Self {
        let now = Instant::now();
        Self {
            state: Mutex::new(SimState {
                geometry: None,
                armed: false,
                interval: (1, fps.max(1)),
                sequence: 0,
                epoch: now,
                next_due: now,
            }),
            disarmed: Condvar::new(),
        }
    }

    /// Whether capture is currently armed.
    pub fn is_armed(&self) -> bool {
        self.state.lock().armed
    }

    /// Frames produced so far.
    pub fn frames_produced(&self) -> u64 {
        self.state.lock().sequence
    }
}

impl Default for SimulatedBackend {
    fn default() -> Self {
        Self::new(30)
    }
}

impl CaptureBackend for SimulatedBackend {
    fn init(&self, params: &CaptureParams) -> Result<BufferGeometry, BackendError> {
        let mut state = self.state.lock();
        if state.armed {
            return Err(BackendError::msg(BackendOp::Init, "capture is still armed"));
        }

        // Like many drivers, round the width down to an even number of pixels.
        let width = (params.width & !1).max(2);
        let height = params.height.max(1);
        let geometry = BufferGeometry {
            count: params.requested_buffers.max(1),
            buffer_size: width as usize * height as usize * BYTES_PER_PIXEL,
            width,
            height,
        };

        log::info!(
            "Simulated capture initialised: {}x{}, {} buffers",
            width,
            height,
            geometry.count
        );
        state.geometry = Some(geometry);
        Ok(geometry)
    }

    fn start(&self) -> Result<(), BackendError> {
        let mut state = self.state.lock();
        if state.geometry.is_none() {
            return Err(BackendError::msg(BackendOp::Start, "backend is not initialised"));
        }
        state.armed = true;
        state.next_due = Instant::now() + state.frame_duration();
        log::info!("Simulated capture started");
        Ok(())
    }

    fn fill(&self, storage: &mut [u8]) -> Result<FrameInfo, BackendError> {
        let mut state = self.state.lock();

        // Maintain frame rate
        loop {
            if !state.armed {
                return Err(BackendError::msg(BackendOp::Fill, "capture is not armed"));
            }
            let due = state.next_due;
            if Instant::now() >= due {
                break;
            }
            self.disarmed.wait_until(&mut state, due);
        }

        let Some(geometry) = state.geometry else {
            return Err(BackendError::msg(BackendOp::Fill, "backend is not initialised"));
        };

        let sequence = state.sequence;
        state.sequence += 1;
        let step = state.frame_duration();
        state.next_due += step;
        let timestamp_us = state.epoch.elapsed().as_micros() as u64;
        drop(state);

        let length = geometry.buffer_size.min(storage.len());
        let row = geometry.width as usize * BYTES_PER_PIXEL;
        for (i, byte) in storage[..length].iter_mut().enumerate() {
            let x = i % row;
            let y = i / row;
            *byte = (x + y + sequence as usize * 4) as u8;
        }

        if sequence % 300 == 0 {
            log::debug!("Simulated: {} frames captured", sequence);
        }

        Ok(FrameInfo {
            length,
            sequence,
            timestamp_us,
        })
    }

    fn stop(&self) -> Result<(), BackendError> {
        let mut state = self.state.lock();
        state.armed = false;
        self.disarmed.notify_all();
        log::info!("Simulated capture stopped after {} frames", state.sequence);
        Ok(())
    }

    fn release(&self) -> Result<(), BackendError> {
        let mut state = self.state.lock();
        state.armed = false;
        state.geometry = None;
        self.disarmed.notify_all();
        Ok(())
    }

    fn set_frame_interval(&self, numerator: u32, denominator: u32) -> Result<(), BackendError> {
        if numerator == 0 || denominator == 0 {
            return Err(BackendError::msg(
                BackendOp::FrameInterval,
                format!("invalid frame interval {}/{}", numerator, denominator),
            ));
        }
        self.state.lock().interval = (numerator, denominator);
        Ok(())
    }

    fn frame_interval(&self) -> Result<(u32, u32), BackendError> {
        Ok(self.state.lock().interval)
    }

    fn name(&self) -> &str {
        "simulated"
    }
}

// ============================================
// TESTS
// ============================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CaptureConfig;

    #[test]
    fn test_geometry_follows_params() {
        let backend = SimulatedBackend::new(30);
        let params = CaptureConfig::default().with_resolution(321, 240).params();

        let geometry = backend.init(&params).unwrap();
        assert_eq!(geometry.width, 320);
        assert_eq!(geometry.height, 240);
        assert_eq!(geometry.count, 4);
        assert_eq!(geometry.buffer_size, 320 * 240 * 2);
    }

    #[test]
    fn test_fill_requires_armed_capture() {
        let backend = SimulatedBackend::new(1000);
        let geometry = backend.init(&CaptureConfig::default().params()).unwrap();
        let mut storage = vec![0u8; geometry.buffer_size];

        assert!(backend.fill(&mut storage).is_err());

        backend.start().unwrap();
        let first = backend.fill(&mut storage).unwrap();
        let second = backend.fill(&mut storage).unwrap();
        assert_eq!(first.length, geometry.buffer_size);
        assert_eq!(second.sequence, first.sequence + 1);
        assert!(second.timestamp_us >= first.timestamp_us);

        backend.stop().unwrap();
        assert!(backend.fill(&mut storage).is_err());
    }

    #[test]
    fn test_frame_interval() {
        let backend = SimulatedBackend::new(30);
        assert_eq!(backend.frame_interval().unwrap(), (1, 30));

        backend.set_frame_interval(1, 60).unwrap();
        assert_eq!(backend.frame_interval().unwrap(), (1, 60));
        assert!(backend.set_frame_interval(0, 60).is_err());
    }

    #[test]
    fn test_release_allows_reinit() {
        let backend = SimulatedBackend::new(30);
        let params = CaptureConfig::default().params();

        backend.init(&params).unwrap();
        backend.release().unwrap();
        assert!(backend.start().is_err());
        assert!(backend.init(&params).is_ok());
    }
}
