//! # Capture Session Module
//!
//! Ties the lifecycle state machine, the buffer pool and a native backend
//! together into one capture stream.
//!
//! ## Plain English
//!
//! A session is the thing you actually talk to:
//!
//! ```text
//!   open ──▶ start ──▶ next_frame, next_frame, ... ──▶ stop ──▶ release
//!                 ▲                                      │
//!                 └──────────────── start ───────────────┘
//! ```
//!
//! Every lifecycle call first reserves its move with the state machine, then
//! does the slow native work, then confirms (or undoes) the move. Frame
//! delivery counts itself as a "user" of the session, so `stop` can wait for
//! everybody who is halfway through handing out a frame.
//!
//! In push mode a worker thread does the `next_frame` calls for you and
//! feeds a [`FrameCallback`].

mod frame;
mod push;

pub use frame::FilledFrame;
pub use push::{FnCallback, FrameCallback, PushWorker, WorkerStatus};

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::backend::{BufferGeometry, CaptureBackend};
use crate::buffer::FrameBufferPool;
use crate::cancel::CancelToken;
use crate::config::CaptureConfig;
use crate::error::{CaptureError, CaptureResult};
use crate::state::{LifecycleState, ResourceState};

use crate::state::LifecycleState::{Initialized, Released, Started, Stopped, Uninitialized};

/// Who is asking for a frame.
///
/// Pull and push delivery are mutually exclusive per session; only the push
/// worker ever passes `Push`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DeliveryMode {
    Pull,
    Push,
}

// ============================================
// STATISTICS
// ============================================

/// Delivery counters for a session. Diagnostics only.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SessionStats {
    /// Frames handed to a caller or callback
    pub frames_delivered: u64,
    /// Backend `fill` calls that failed
    pub fill_failures: u64,
    /// Frames captured but recycled because a stop raced their delivery
    pub frames_discarded: u64,
}

#[derive(Debug, Default)]
struct Counters {
    delivered: AtomicU64,
    fill_failures: AtomicU64,
    discarded: AtomicU64,
}

// ============================================
// CAPTURE SESSION
// ============================================

/// One open capture stream.
///
/// Always handled through an `Arc`; the push worker keeps a weak reference
/// back to it.
pub struct CaptureSession {
    backend: Arc<dyn CaptureBackend>,
    config: CaptureConfig,
    geometry: BufferGeometry,
    state: ResourceState,
    pool: Arc<FrameBufferPool>,

    /// Push worker, if push mode is on. Also serialises the calls that are
    /// only legal while not started against `start`.
    control: Mutex<Option<Arc<PushWorker>>>,
    push_mode: AtomicBool,

    /// Held around every `fill`; backends are not re-entrant
    native: Mutex<()>,

    counters: Counters,
    me: Weak<CaptureSession>,
}

impl CaptureSession {
    /// Initialises `backend` with `config` and builds the buffer pool.
    ///
    /// ## Plain English
    /// Asks the driver for its buffers, then creates one pool buffer for
    /// each of them. If anything fails, the driver is told to let go of
    /// what it already set up.
    pub fn open(backend: Arc<dyn CaptureBackend>, config: CaptureConfig) -> CaptureResult<Arc<Self>> {
        if let Some(first) = config.validate().into_iter().next() {
            return Err(CaptureError::Config(first));
        }

        let state = ResourceState::new();
        let transition = state.begin(&[Uninitialized], Initialized)?;

        log::info!(
            "Opening capture session on '{}': {}x{}, {} buffers requested",
            backend.name(),
            config.width,
            config.height,
            config.requested_buffers
        );

        let geometry = backend.init(&config.params())?;

        let setup = Self::finish_setup(backend.as_ref(), &config, geometry);
        let pool = match setup {
            Ok(pool) => pool,
            Err(err) => {
                if let Err(release_err) = backend.release() {
                    log::warn!("Backend release after failed open also failed: {}", release_err);
                }
                return Err(err);
            }
        };

        transition.commit();
        log::info!(
            "Capture session ready: {}x{}, {} buffers of {} bytes",
            geometry.width,
            geometry.height,
            geometry.count,
            geometry.buffer_size
        );

        Ok(Arc::new_cyclic(|me| Self {
            backend,
            config,
            geometry,
            state,
            pool: Arc::new(pool),
            control: Mutex::new(None),
            push_mode: AtomicBool::new(false),
            native: Mutex::new(()),
            counters: Counters::default(),
            me: me.clone(),
        }))
    }

    fn finish_setup(
        backend: &dyn CaptureBackend,
        config: &CaptureConfig,
        geometry: BufferGeometry,
    ) -> CaptureResult<FrameBufferPool> {
        if let Some((numerator, denominator)) = config.frame_interval {
            backend.set_frame_interval(numerator, denominator)?;
        }
        FrameBufferPool::new(geometry.count, geometry.buffer_size)
    }

    // ----------------------------------------
    // LIFECYCLE
    // ----------------------------------------

    /// Starts capture.
    ///
    /// In push mode the worker is started first, and the backend is only
    /// armed once the worker is waiting for frames. If the backend fails to
    /// start, the worker is stopped again and the session stays where it
    /// was.
    pub fn start(&self) -> CaptureResult<()> {
        let (transition, worker) = {
            let control = self.control.lock();
            let transition = self.state.begin(&[Initialized, Stopped], Started)?;
            (transition, control.clone())
        };

        self.pool.resume();

        let mut worker_started = false;
        if let Some(worker) = &worker {
            let ready = match worker.start(self.me.clone()) {
                Ok(ready) => ready,
                Err(err) => {
                    self.pool.suspend();
                    return Err(err);
                }
            };
            worker_started = true;

            if ready.recv().is_err() {
                log::warn!("Push worker exited before it was ready");
                let _ = worker.stop(self);
                self.pool.suspend();
                return Err(CaptureError::Interrupted);
            }
            log::debug!("Push worker ready, arming backend");
        }

        match self.backend.start() {
            Ok(()) => {
                transition.commit();
                log::info!("Capture started");
                Ok(())
            }
            Err(err) => {
                log::warn!("Backend start failed: {}", err);
                if worker_started {
                    if let Some(worker) = &worker {
                        let _ = worker.stop(self);
                    }
                }
                self.pool.suspend();
                transition.rollback();
                Err(err.into())
            }
        }
    }

    /// Stops capture.
    ///
    /// Returns once the push worker has exited, no thread is delivering a
    /// frame anymore, every buffer is back in the pool and the backend has
    /// been disarmed. Frames still held by consumers are invalidated.
    ///
    /// A failing backend stop is reported after the session has moved to
    /// `Stopped`; the session is stopped either way.
    pub fn stop(&self) -> CaptureResult<()> {
        let transition = self.state.begin(&[Started], Stopped)?;

        // Callers parked on an empty pool give up now.
        self.pool.suspend();

        let worker = self.control.lock().clone();
        if let Some(worker) = worker {
            let _ = worker.stop(self);
        }

        self.state.quiesce(&CancelToken::new())?;

        let reclaimed = self.pool.recycle_all();
        if reclaimed > 0 {
            log::debug!("Reclaimed {} buffers still held by consumers", reclaimed);
        }

        let disarmed = self.backend.stop();
        transition.commit();

        if let Err(err) = disarmed {
            log::warn!("Backend stop failed, capture is stopped anyway: {}", err);
            return Err(err.into());
        }
        log::info!("Capture stopped");
        Ok(())
    }

    /// Releases the session. Stops it first if needed.
    ///
    /// Every later call fails with `Released`.
    pub fn release(&self) -> CaptureResult<()> {
        match self.stop() {
            Ok(()) => {}
            Err(err) if err.is_state_error() => {
                log::trace!("Release: nothing to stop ({})", err);
            }
            // The stop committed; only the driver complained.
            Err(CaptureError::Backend(err)) => {
                log::warn!("Release: continuing after backend stop failure: {}", err);
            }
            Err(err) => return Err(err),
        }

        let mut control = self.control.lock();
        let transition = self.state.begin(&[Initialized, Stopped], Released)?;
        self.backend.release()?;
        transition.commit();

        control.take();
        self.push_mode.store(false, Ordering::Release);
        log::info!("Capture session released");
        Ok(())
    }

    // ----------------------------------------
    // FRAME DELIVERY
    // ----------------------------------------

    /// Blocks until the next frame is captured.
    ///
    /// Fails with `NotUsable` unless the session is started, and with
    /// `WrongMode` in push mode.
    pub fn next_frame(&self) -> CaptureResult<FilledFrame> {
        self.fetch_frame(DeliveryMode::Pull, &CancelToken::new(), None)
    }

    /// Like [`next_frame`](Self::next_frame), but gives up with
    /// `Interrupted` once `cancel` is passed to [`interrupt`](Self::interrupt).
    pub fn next_frame_cancellable(&self, cancel: &CancelToken) -> CaptureResult<FilledFrame> {
        self.fetch_frame(DeliveryMode::Pull, cancel, None)
    }

    /// Cancels `token` and wakes whoever is blocked with it in this session.
    pub fn interrupt(&self, token: &CancelToken) {
        self.pool.interrupt(token);
        self.state.interrupt(token);
    }

    pub(crate) fn fetch_frame(
        &self,
        mode: DeliveryMode,
        cancel: &CancelToken,
        ready: Option<crossbeam::channel::Sender<()>>,
    ) -> CaptureResult<FilledFrame> {
        let guard = self.state.enter_use()?;

        let push = self.push_mode.load(Ordering::Acquire);
        match (mode, push) {
            (DeliveryMode::Pull, true) => {
                return Err(CaptureError::WrongMode("next_frame is unavailable in push mode"))
            }
            (DeliveryMode::Push, false) => {
                return Err(CaptureError::WrongMode("push delivery needs push mode"))
            }
            _ => {}
        }

        if let Some(ready) = ready {
            let _ = ready.send(());
        }

        let delivered = self.deliver(cancel);
        let exited = guard.exit();

        match (delivered, exited) {
            (Ok(frame), Ok(())) => {
                self.counters.delivered.fetch_add(1, Ordering::Relaxed);
                Ok(frame)
            }
            (Ok(frame), Err(err)) => {
                frame.recycle();
                self.counters.discarded.fetch_add(1, Ordering::Relaxed);
                log::debug!("Frame discarded: {}", err);
                Err(err)
            }
            (Err(CaptureError::Interrupted), Err(err)) => Err(err),
            (Err(err), _) => {
                if matches!(err, CaptureError::Backend(_)) {
                    self.counters.fill_failures.fetch_add(1, Ordering::Relaxed);
                }
                Err(err)
            }
        }
    }

    /// Acquire, wait until armed, fill (one caller at a time), stamp. The
    /// lease recycles itself on every early return.
    fn deliver(&self, cancel: &CancelToken) -> CaptureResult<FilledFrame> {
        let ticket = self.pool.acquire(cancel)?;
        let frame = FilledFrame::new(Arc::clone(&self.pool), ticket);

        self.state.await_started(cancel)?;

        let Some(buffer) = self.pool.buffer(ticket.index) else {
            return Err(CaptureError::Recycled);
        };
        let info = {
            let _native = self.native.lock();
            // A stop may have begun while we queued for the backend.
            if !self.state.is_started() {
                return Err(CaptureError::StoppedDuringDelivery);
            }
            buffer.fill_with(|storage| self.backend.fill(storage))?
        };
        let meta = buffer.stamp(info);
        log::trace!(
            "Frame {} filled into buffer {} ({} bytes)",
            meta.sequence,
            ticket.index,
            meta.valid_length
        );

        Ok(frame)
    }

    // ----------------------------------------
    // SETTINGS
    // ----------------------------------------

    /// Turns push mode on (`Some`) or off (`None`).
    ///
    /// Only allowed while not started.
    pub fn set_push_mode(&self, callback: Option<Arc<dyn FrameCallback>>) -> CaptureResult<()> {
        let mut control = self.control.lock();
        self.ensure_not_started()?;

        let worker = callback.map(|callback| {
            Arc::new(PushWorker::new(callback, self.config.push_thread_name.clone()))
        });
        self.push_mode.store(worker.is_some(), Ordering::Release);
        log::info!("Push mode {}", if worker.is_some() { "enabled" } else { "disabled" });
        *control = worker;
        Ok(())
    }

    /// Asks the backend for a frame interval of `numerator / denominator`
    /// seconds. Only allowed while not started.
    pub fn set_frame_interval(&self, numerator: u32, denominator: u32) -> CaptureResult<()> {
        let _control = self.control.lock();
        self.ensure_not_started()?;
        self.backend.set_frame_interval(numerator, denominator)?;
        Ok(())
    }

    /// The backend's frame interval. Only available while not started.
    pub fn frame_interval(&self) -> CaptureResult<(u32, u32)> {
        let _control = self.control.lock();
        self.ensure_not_started()?;
        Ok(self.backend.frame_interval()?)
    }

    fn ensure_not_started(&self) -> CaptureResult<()> {
        self.state.check_released()?;
        if self.state.involves(Started) {
            return Err(CaptureError::AlreadyStarted);
        }
        Ok(())
    }

    // ----------------------------------------
    // INTROSPECTION
    // ----------------------------------------

    /// The committed lifecycle state.
    pub fn state(&self) -> LifecycleState {
        self.state.committed()
    }

    /// Started and not being stopped.
    pub fn is_started(&self) -> bool {
        self.state.is_started()
    }

    pub fn is_push_mode(&self) -> bool {
        self.push_mode.load(Ordering::Acquire)
    }

    /// Status of the push worker, `None` outside push mode.
    pub fn push_worker_status(&self) -> Option<WorkerStatus> {
        self.control.lock().as_ref().map(|worker| worker.status())
    }

    /// Threads currently delivering a frame.
    pub fn active_users(&self) -> usize {
        self.state.active_users()
    }

    pub fn buffer_count(&self) -> usize {
        self.pool.size()
    }

    /// Buffers not held by anybody. Diagnostics only.
    pub fn available_buffers(&self) -> usize {
        self.pool.available_count()
    }

    pub fn buffer_size(&self) -> usize {
        self.geometry.buffer_size
    }

    /// Frame width the backend settled on.
    pub fn width(&self) -> u32 {
        self.geometry.width
    }

    /// Frame height the backend settled on.
    pub fn height(&self) -> u32 {
        self.geometry.height
    }

    pub fn config(&self) -> &CaptureConfig {
        &self.config
    }

    pub fn stats(&self) -> SessionStats {
        SessionStats {
            frames_delivered: self.counters.delivered.load(Ordering::Relaxed),
            fill_failures: self.counters.fill_failures.load(Ordering::Relaxed),
            frames_discarded: self.counters.discarded.load(Ordering::Relaxed),
        }
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        if self.state.committed() == Released {
            return;
        }
        if let Err(err) = self.release() {
            log::warn!("Failed to release capture session on drop: {}", err);
        }
    }
}

impl std::fmt::Debug for CaptureSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptureSession")
            .field("backend", &self.backend.name())
            .field("state", &self.state.committed())
            .field("geometry", &self.geometry)
            .field("push_mode", &self.is_push_mode())
            .finish()
    }
}

// ============================================
// TESTS
// ============================================
