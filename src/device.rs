//! # Video Device
//!
//! A handle on one capture device that hands out at most one session at a
//! time.
//!
//! ## Plain English
//!
//! A camera can only stream to one place. The device keeps track of who is
//! using it, refuses a second session while the first is open, and on
//! release waits (or refuses) until nobody is using it anymore.

use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use crate::backend::CaptureBackend;
use crate::capture::CaptureSession;
use crate::config::CaptureConfig;
use crate::error::{CaptureError, CaptureResult};
use crate::state::LifecycleState;

#[derive(Debug, Default)]
struct DeviceState {
    users: usize,
    /// Release reserved, no new users accepted
    releasing: bool,
    released: bool,
}

/// One capture device and its (optional) open session.
pub struct VideoDevice {
    name: String,
    backend: Arc<dyn CaptureBackend>,
    state: Mutex<DeviceState>,
    /// Signalled when the last user leaves
    idle: Condvar,
    session: Mutex<Option<Arc<CaptureSession>>>,
}

impl VideoDevice {
    pub fn new(name: impl Into<String>, backend: Arc<dyn CaptureBackend>) -> Self {
        let name = name.into();
        log::debug!("Video device '{}' using backend '{}'", name, backend.name());
        Self {
            name,
            backend,
            state: Mutex::new(DeviceState::default()),
            idle: Condvar::new(),
            session: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Opens the capture session of this device.
    ///
    /// Fails with `InUse` while another session is open. A session that was
    /// released on its own no longer counts as open.
    pub fn open_session(&self, config: CaptureConfig) -> CaptureResult<Arc<CaptureSession>> {
        let mut slot = self.session.lock();
        self.forget_released(&mut slot);
        if slot.is_some() {
            self.check_released()?;
            return Err(CaptureError::InUse);
        }

        self.enter_use()?;
        match CaptureSession::open(Arc::clone(&self.backend), config) {
            Ok(session) => {
                *slot = Some(Arc::clone(&session));
                log::info!("Device '{}': session opened", self.name);
                Ok(session)
            }
            Err(err) => {
                self.exit_use();
                Err(err)
            }
        }
    }

    /// The open session, if any.
    pub fn session(&self) -> Option<Arc<CaptureSession>> {
        let mut slot = self.session.lock();
        self.forget_released(&mut slot);
        slot.clone()
    }

    /// Drops a session that was released without going through
    /// `release_session`, and gives back its device user.
    fn forget_released(&self, slot: &mut Option<Arc<CaptureSession>>) {
        let released = slot
            .as_ref()
            .is_some_and(|session| session.state() == LifecycleState::Released);
        if released {
            *slot = None;
            self.exit_use();
            log::debug!("Device '{}': forgot a session released directly", self.name);
        }
    }

    /// Releases and forgets the open session. A no-op without one.
    ///
    /// The session is forgotten even if its release fails.
    pub fn release_session(&self) -> CaptureResult<()> {
        let Some(session) = self.session.lock().take() else {
            return Ok(());
        };

        let result = session.release();
        drop(session);
        self.exit_use();

        if let Err(err) = &result {
            log::warn!("Device '{}': session release failed: {}", self.name, err);
        } else {
            log::info!("Device '{}': session released", self.name);
        }
        result
    }

    /// Releases the device.
    ///
    /// With `wait`, blocks until every session is gone. Without it, fails
    /// with `InUse` and leaves the device usable. Every later call fails
    /// with `Released`.
    pub fn release(&self, wait: bool) -> CaptureResult<()> {
        self.forget_released(&mut self.session.lock());

        let mut state = self.state.lock();
        if state.released || state.releasing {
            return Err(CaptureError::Released);
        }
        if state.users > 0 && !wait {
            return Err(CaptureError::InUse);
        }

        state.releasing = true;
        while state.users > 0 {
            log::debug!("Device '{}': waiting for {} users", self.name, state.users);
            self.idle.wait(&mut state);
        }
        state.released = true;

        log::info!("Device '{}' released", self.name);
        Ok(())
    }

    /// Sessions currently open on this device.
    pub fn active_users(&self) -> usize {
        self.state.lock().users
    }

    pub fn is_released(&self) -> bool {
        self.state.lock().released
    }

    fn check_released(&self) -> CaptureResult<()> {
        let state = self.state.lock();
        if state.released || state.releasing {
            return Err(CaptureError::Released);
        }
        Ok(())
    }

    fn enter_use(&self) -> CaptureResult<()> {
        let mut state = self.state.lock();
        if state.released || state.releasing {
            return Err(CaptureError::Released);
        }
        state.users += 1;
        Ok(())
    }

    fn exit_use(&self) {
        let mut state = self.state.lock();
        state.users = state.users.saturating_sub(1);
        if state.users == 0 {
            self.idle.notify_all();
        }
    }
}

impl std::fmt::Debug for VideoDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VideoDevice")
            .field("name", &self.name)
            .field("backend", &self.backend.name())
            .field("state", &*self.state.lock())
            .finish()
    }
}

// ============================================
// TESTS
// ============================================
