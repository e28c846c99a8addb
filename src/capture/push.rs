//! # Push Worker
//!
//! A dedicated thread that pulls frames from a session and hands them to a
//! callback.
//!
//! ## Plain English
//!
//! Instead of your code asking "got a frame?" in a loop, the session starts
//! a thread that asks for you and calls `on_frame` every time one arrives.
//!
//! ```text
//!   Stopped ──start──▶ Running ──stop──▶ AboutToStop ──thread exits──▶ Stopped
//!                         │                                                 ▲
//!                         └──────────── capture error (after on_error) ─────┘
//! ```
//!
//! The worker is started before the camera is armed. It tells the session
//! "I'm in position" through a one-shot channel, so the very first frame
//! the hardware produces already has somebody waiting for it.

use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};

use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::Mutex;

use super::{CaptureSession, DeliveryMode, FilledFrame};
use crate::cancel::CancelToken;
use crate::error::{CaptureError, CaptureResult};

// ============================================
// CALLBACK
// ============================================

/// Receives frames in push mode.
///
/// Both methods run on the push worker thread. Frames that are dropped
/// without being recycled explicitly go back to the pool on drop.
pub trait FrameCallback: Send + Sync {
    /// A new frame is ready.
    fn on_frame(&self, frame: FilledFrame);

    /// Capture failed while the session was still started.
    ///
    /// Called at most once per run: the worker exits right after and stays
    /// `Stopped` until the session is started again.
    fn on_error(&self, error: CaptureError);
}

/// Adapts a pair of closures to [`FrameCallback`].
pub struct FnCallback<F, E> {
    on_frame: F,
    on_error: E,
}

impl<F, E> FnCallback<F, E>
where
    F: Fn(FilledFrame) + Send + Sync,
    E: Fn(CaptureError) + Send + Sync,
{
    pub fn new(on_frame: F, on_error: E) -> Self {
        Self { on_frame, on_error }
    }
}

impl<F, E> FrameCallback for FnCallback<F, E>
where
    F: Fn(FilledFrame) + Send + Sync,
    E: Fn(CaptureError) + Send + Sync,
{
    fn on_frame(&self, frame: FilledFrame) {
        (self.on_frame)(frame)
    }

    fn on_error(&self, error: CaptureError) {
        (self.on_error)(error)
    }
}

// ============================================
// WORKER
// ============================================

/// Lifecycle of the worker thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerStatus {
    Stopped,
    Running,
    AboutToStop,
}

struct WorkerInner {
    status: WorkerStatus,
    handle: Option<JoinHandle<()>>,
    cancel: CancelToken,
    /// Bumped on every start, so a thread from an earlier run never
    /// overwrites the status of a later one
    run: u64,
}

/// The push-mode delivery thread of one session.
pub struct PushWorker {
    callback: Arc<dyn FrameCallback>,
    thread_name: String,
    inner: Arc<Mutex<WorkerInner>>,
}

impl PushWorker {
    pub(crate) fn new(callback: Arc<dyn FrameCallback>, thread_name: String) -> Self {
        Self {
            callback,
            thread_name,
            inner: Arc::new(Mutex::new(WorkerInner {
                status: WorkerStatus::Stopped,
                handle: None,
                cancel: CancelToken::new(),
                run: 0,
            })),
        }
    }

    /// Current status.
    pub fn status(&self) -> WorkerStatus {
        self.inner.lock().status
    }

    /// Spawns the worker thread.
    ///
    /// The returned receiver gets one message once the thread is inside the
    /// session's capture path. It disconnects without a message if the
    /// thread gives up before getting there.
    pub(crate) fn start(&self, session: Weak<CaptureSession>) -> CaptureResult<Receiver<()>> {
        let mut inner = self.inner.lock();
        if inner.status != WorkerStatus::Stopped {
            return Err(CaptureError::AlreadyRunning);
        }

        // Only a thread that already marked itself stopped leaves a handle
        // behind, so this join does not wait on our lock.
        if let Some(stale) = inner.handle.take() {
            let _ = stale.join();
        }

        let cancel = CancelToken::new();
        let (ready_tx, ready_rx) = channel::bounded(1);
        inner.run += 1;
        let run = inner.run;

        let shared = Arc::clone(&self.inner);
        let callback = Arc::clone(&self.callback);
        let token = cancel.clone();
        let handle = thread::Builder::new()
            .name(self.thread_name.clone())
            .spawn(move || {
                deliver_loop(&session, callback.as_ref(), &token, ready_tx);

                let mut inner = shared.lock();
                if inner.run == run && inner.status == WorkerStatus::Running {
                    inner.status = WorkerStatus::Stopped;
                }
            })
            .map_err(CaptureError::Spawn)?;

        inner.status = WorkerStatus::Running;
        inner.handle = Some(handle);
        inner.cancel = cancel;
        log::info!("Push worker '{}' started", self.thread_name);

        Ok(ready_rx)
    }

    /// Cancels the worker and waits for its thread to finish.
    ///
    /// Fails with `AlreadyStopped`, without doing anything, if the worker is
    /// not running or another stop is already underway. When called from
    /// the worker thread itself (a callback stopping its own session) the
    /// thread is not joined.
    pub(crate) fn stop(&self, session: &CaptureSession) -> CaptureResult<()> {
        let (handle, cancel) = {
            let mut inner = self.inner.lock();
            if inner.status != WorkerStatus::Running {
                return Err(CaptureError::AlreadyStopped);
            }
            inner.status = WorkerStatus::AboutToStop;
            (inner.handle.take(), inner.cancel.clone())
        };

        session.interrupt(&cancel);

        if let Some(handle) = handle {
            if handle.thread().id() == thread::current().id() {
                log::debug!("Push worker stopped from its own thread");
            } else if handle.join().is_err() {
                log::error!("Push worker '{}' panicked", self.thread_name);
            }
        }

        self.inner.lock().status = WorkerStatus::Stopped;
        log::info!("Push worker '{}' stopped", self.thread_name);
        Ok(())
    }
}

impl std::fmt::Debug for PushWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PushWorker")
            .field("thread_name", &self.thread_name)
            .field("status", &self.status())
            .finish()
    }
}

fn deliver_loop(
    session: &Weak<CaptureSession>,
    callback: &dyn FrameCallback,
    cancel: &CancelToken,
    ready: Sender<()>,
) {
    let mut ready = Some(ready);

    while !cancel.is_cancelled() {
        // Hold the session only for one delivery at a time.
        let Some(strong) = session.upgrade() else {
            break;
        };

        match strong.fetch_frame(DeliveryMode::Push, cancel, ready.take()) {
            Ok(frame) => callback.on_frame(frame),
            Err(err) => {
                if cancel.is_cancelled() || !strong.is_started() {
                    log::debug!("Push worker exiting: {}", err);
                    break;
                }
                log::warn!("Push delivery failed, worker exiting: {}", err);
                callback.on_error(err);
                break;
            }
        }
    }
}

// ============================================
// TESTS
// ============================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_fn_callback_forwards() {
        let errors = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&errors);
        let callback = FnCallback::new(
            |_frame: FilledFrame| {},
            move |_err: CaptureError| {
                seen.fetch_add(1, Ordering::SeqCst);
            },
        );

        callback.on_error(CaptureError::Interrupted);
        assert_eq!(errors.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_new_worker_is_stopped() {
        let callback: Arc<dyn FrameCallback> = Arc::new(FnCallback::new(|_: FilledFrame| {}, |_: CaptureError| {}));
        let worker = PushWorker::new(callback, "test-pusher".to_string());
        assert_eq!(worker.status(), WorkerStatus::Stopped);
    }
}
