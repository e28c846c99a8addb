//! Scripted backend for unit tests.
//!
//! Records the order of native calls and lets a test make `start`, `fill`
//! or `stop` fail, count overlapping fills, or observe the session from
//! inside `start`/`stop`.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;

use super::{BufferGeometry, CaptureBackend, CaptureParams, FrameInfo};
use crate::error::{BackendError, BackendOp};

type Hook = Box<dyn Fn() + Send + Sync>;

pub(crate) struct ScriptedBackend {
    buffers: usize,
    buffer_size: usize,
    fill_delay: Duration,
    calls: Mutex<Vec<&'static str>>,
    armed: AtomicBool,
    sequence: AtomicU64,
    fills: AtomicUsize,
    fills_while_disarmed: AtomicUsize,
    fills_in_flight: AtomicUsize,
    max_fills_in_flight: AtomicUsize,
    in_flight_at_stop: AtomicUsize,
    fail_next_start: AtomicBool,
    fail_next_fill: AtomicBool,
    fail_every_fill: AtomicBool,
    fail_next_stop: AtomicBool,
    start_hook: Mutex<Option<Hook>>,
    stop_hook: Mutex<Option<Hook>>,
}

impl ScriptedBackend {
    pub(crate) fn new(buffers: usize) -> Self {
        Self {
            buffers,
            buffer_size: 64,
            fill_delay: Duration::from_millis(1),
            calls: Mutex::new(Vec::new()),
            armed: AtomicBool::new(false),
            sequence: AtomicU64::new(0),
            fills: AtomicUsize::new(0),
            fills_while_disarmed: AtomicUsize::new(0),
            fills_in_flight: AtomicUsize::new(0),
            max_fills_in_flight: AtomicUsize::new(0),
            in_flight_at_stop: AtomicUsize::new(usize::MAX),
            fail_next_start: AtomicBool::new(false),
            fail_next_fill: AtomicBool::new(false),
            fail_every_fill: AtomicBool::new(false),
            fail_next_stop: AtomicBool::new(false),
            start_hook: Mutex::new(None),
            stop_hook: Mutex::new(None),
        }
    }

    pub(crate) fn with_fill_delay(mut self, delay: Duration) -> Self {
        self.fill_delay = delay;
        self
    }

    /// Native calls so far, in order. Fills are not recorded.
    pub(crate) fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().clone()
    }

    pub(crate) fn fills(&self) -> usize {
        self.fills.load(Ordering::SeqCst)
    }

    pub(crate) fn fills_while_disarmed(&self) -> usize {
        self.fills_while_disarmed.load(Ordering::SeqCst)
    }

    /// Most fills ever running at the same time.
    pub(crate) fn max_fills_in_flight(&self) -> usize {
        self.max_fills_in_flight.load(Ordering::SeqCst)
    }

    /// Fills that were running when the last `stop` arrived, `usize::MAX`
    /// if there was no stop yet.
    pub(crate) fn in_flight_at_stop(&self) -> usize {
        self.in_flight_at_stop.load(Ordering::SeqCst)
    }

    pub(crate) fn fail_next_start(&self) {
        self.fail_next_start.store(true, Ordering::SeqCst);
    }

    pub(crate) fn fail_next_fill(&self) {
        self.fail_next_fill.store(true, Ordering::SeqCst);
    }

    pub(crate) fn fail_every_fill(&self) {
        self.fail_every_fill.store(true, Ordering::SeqCst);
    }

    pub(crate) fn fail_next_stop(&self) {
        self.fail_next_stop.store(true, Ordering::SeqCst);
    }

    /// Runs `hook` at the top of every `start`.
    pub(crate) fn set_start_hook(&self, hook: impl Fn() + Send + Sync + 'static) {
        *self.start_hook.lock() = Some(Box::new(hook));
    }

    /// Runs `hook` at the top of every `stop`.
    pub(crate) fn set_stop_hook(&self, hook: impl Fn() + Send + Sync + 'static) {
        *self.stop_hook.lock() = Some(Box::new(hook));
    }

    fn record(&self, call: &'static str) {
        self.calls.lock().push(call);
    }
}

impl CaptureBackend for ScriptedBackend {
    fn init(&self, params: &CaptureParams) -> Result<BufferGeometry, BackendError> {
        self.record("init");
        Ok(BufferGeometry {
            count: self.buffers,
            buffer_size: self.buffer_size,
            width: params.width,
            height: params.height,
        })
    }

    fn start(&self) -> Result<(), BackendError> {
        if let Some(hook) = self.start_hook.lock().as_ref() {
            hook();
        }
        self.record("start");
        if self.fail_next_start.swap(false, Ordering::SeqCst) {
            return Err(BackendError::msg(BackendOp::Start, "scripted start failure"));
        }
        self.armed.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn fill(&self, storage: &mut [u8]) -> Result<FrameInfo, BackendError> {
        let in_flight = self.fills_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_fills_in_flight.fetch_max(in_flight, Ordering::SeqCst);
        self.fills.fetch_add(1, Ordering::SeqCst);
        if !self.armed.load(Ordering::SeqCst) {
            self.fills_while_disarmed.fetch_add(1, Ordering::SeqCst);
        }

        thread::sleep(self.fill_delay);

        let failing = self.fail_next_fill.swap(false, Ordering::SeqCst)
            || self.fail_every_fill.load(Ordering::SeqCst);
        let result = if failing {
            Err(BackendError::msg(BackendOp::Fill, "scripted fill failure"))
        } else {
            let sequence = self.sequence.fetch_add(1, Ordering::SeqCst);
            let length = storage.len().min(self.buffer_size);
            storage[..length].fill(sequence as u8);
            Ok(FrameInfo {
                length,
                sequence,
                timestamp_us: sequence * 1_000,
            })
        };

        self.fills_in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    fn stop(&self) -> Result<(), BackendError> {
        if let Some(hook) = self.stop_hook.lock().as_ref() {
            hook();
        }
        self.in_flight_at_stop
            .store(self.fills_in_flight.load(Ordering::SeqCst), Ordering::SeqCst);
        self.armed.store(false, Ordering::SeqCst);
        self.record("stop");
        if self.fail_next_stop.swap(false, Ordering::SeqCst) {
            return Err(BackendError::msg(BackendOp::Stop, "scripted stop failure"));
        }
        Ok(())
    }

    fn release(&self) -> Result<(), BackendError> {
        self.armed.store(false, Ordering::SeqCst);
        self.record("release");
        Ok(())
    }

    fn name(&self) -> &str {
        "scripted"
    }
}
