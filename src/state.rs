//! # Lifecycle State Module
//!
//! The two-phase (tentative / commit / rollback) state machine that decides
//! which lifecycle calls are legal for a capture session.
//!
//! ## Plain English Explanation
//!
//! Think of a railway switch operator. Before moving a train to a new track,
//! the operator *reserves* the route (nobody else may use it), then the
//! train moves (the slow part: a native call), and finally the operator
//! either *confirms* the new position or *puts the switch back* if the train
//! could not move.
//!
//! ```text
//!  Uninitialized ──init──▶ Initialized ──start──▶ Started
//!                              │    ▲                │
//!                              │    └─────start──────┤
//!                           release            stop  │
//!                              │                ▼    │
//!                              ▼            Stopped ◀┘
//!                           Released ◀──release──┘
//! ```
//!
//! `committed` is where we are. `pending` is where we are going; the two
//! only differ between [`ResourceState::begin`] and the matching
//! [`Transition::commit`] / [`Transition::rollback`]. Because the
//! reservation happens under the lock but the native work does not, a
//! conflicting call fails fast instead of queueing behind a slow driver.
//!
//! The same monitor counts *users*: threads in the middle of delivering a
//! frame. A stop reserves its route immediately (so no new user gets in)
//! and then waits for the existing users to leave.

use std::marker::PhantomData;

use parking_lot::{Condvar, Mutex};

use crate::cancel::CancelToken;
use crate::error::{CaptureError, CaptureResult};

// ============================================
// LIFECYCLE STATES
// ============================================

/// The lifecycle of a capture session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleState {
    Uninitialized,
    Initialized,
    Started,
    Stopped,
    /// Terminal.
    Released,
}

#[derive(Debug)]
struct StateInner {
    committed: LifecycleState,
    pending: LifecycleState,
    users: usize,
}

impl StateInner {
    fn is_released(&self) -> bool {
        self.committed == LifecycleState::Released || self.pending == LifecycleState::Released
    }
}

// ============================================
// RESOURCE STATE
// ============================================

/// Monitor-protected lifecycle state plus an "active users" counter.
#[derive(Debug)]
pub struct ResourceState {
    inner: Mutex<StateInner>,
    /// Signalled when `users` drops to zero.
    idle: Condvar,
    /// Signalled on every commit or rollback.
    settled: Condvar,
}

impl ResourceState {
    /// Creates a state machine in `Uninitialized`.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(StateInner {
                committed: LifecycleState::Uninitialized,
                pending: LifecycleState::Uninitialized,
                users: 0,
            }),
            idle: Condvar::new(),
            settled: Condvar::new(),
        }
    }

    /// The last committed state.
    pub fn committed(&self) -> LifecycleState {
        self.inner.lock().committed
    }

    /// The state the in-flight transition is heading to, or the committed
    /// state when nothing is in flight.
    pub fn pending(&self) -> LifecycleState {
        self.inner.lock().pending
    }

    /// Number of threads currently inside a use bracket.
    pub fn active_users(&self) -> usize {
        self.inner.lock().users
    }

    /// Started, and not about to stop.
    ///
    /// Only a snapshot: the answer can be stale by the time the caller
    /// acts on it.
    pub fn is_started(&self) -> bool {
        let inner = self.inner.lock();
        inner.committed == LifecycleState::Started && inner.pending == LifecycleState::Started
    }

    /// True if `state` is the committed state or the one being moved to.
    pub fn involves(&self, state: LifecycleState) -> bool {
        let inner = self.inner.lock();
        inner.committed == state || inner.pending == state
    }

    /// Fails with `Released` once a release has committed or is in flight.
    pub fn check_released(&self) -> CaptureResult<()> {
        if self.inner.lock().is_released() {
            Err(CaptureError::Released)
        } else {
            Ok(())
        }
    }

    /// Reserves the transition to `next`.
    ///
    /// Fails without side effects unless the committed state is one of
    /// `expected` and no other transition is in flight.
    pub fn begin(
        &self,
        expected: &[LifecycleState],
        next: LifecycleState,
    ) -> CaptureResult<Transition<'_>> {
        let mut inner = self.inner.lock();

        if inner.is_released() {
            return Err(CaptureError::Released);
        }
        if inner.pending != inner.committed || !expected.contains(&inner.committed) {
            return Err(CaptureError::InvalidTransition {
                from: inner.committed,
                to: next,
            });
        }

        log::trace!("Transition {:?} -> {:?} begun", inner.committed, next);
        inner.pending = next;

        Ok(Transition {
            state: self,
            from: inner.committed,
            to: next,
            finished: false,
            _not_send: PhantomData,
        })
    }

    /// Enters the "in use" bracket.
    ///
    /// Only allowed while the session is started or being started; a stop
    /// in flight already counts as not usable.
    pub fn enter_use(&self) -> CaptureResult<UseGuard<'_>> {
        let mut inner = self.inner.lock();

        if inner.is_released() {
            return Err(CaptureError::Released);
        }
        if inner.pending != LifecycleState::Started {
            return Err(CaptureError::NotUsable(inner.committed));
        }

        inner.users += 1;
        Ok(UseGuard {
            state: self,
            exited: false,
        })
    }

    /// Blocks until no thread is inside a use bracket.
    pub fn quiesce(&self, cancel: &CancelToken) -> CaptureResult<()> {
        let mut inner = self.inner.lock();
        while inner.users != 0 {
            if cancel.is_cancelled() {
                return Err(CaptureError::Interrupted);
            }
            self.idle.wait(&mut inner);
        }
        Ok(())
    }

    /// Blocks while a start is in flight, until it either commits or is
    /// rolled back.
    ///
    /// Returns `Ok` once the session is started. Used by the capture path
    /// so that nothing is pulled from the backend before it has been armed.
    pub fn await_started(&self, cancel: &CancelToken) -> CaptureResult<()> {
        let mut inner = self.inner.lock();
        loop {
            if inner.is_released() {
                return Err(CaptureError::Released);
            }
            if inner.pending != LifecycleState::Started {
                return Err(CaptureError::NotUsable(inner.committed));
            }
            if inner.committed == LifecycleState::Started {
                return Ok(());
            }
            if cancel.is_cancelled() {
                return Err(CaptureError::Interrupted);
            }
            self.settled.wait(&mut inner);
        }
    }

    /// Cancels `token` and wakes every thread waiting on this state so the
    /// holder of the token notices.
    pub fn interrupt(&self, token: &CancelToken) {
        token.cancel();
        let _inner = self.inner.lock();
        self.idle.notify_all();
        self.settled.notify_all();
    }

    fn finish(&self, commit: bool) -> LifecycleState {
        let mut inner = self.inner.lock();
        if commit {
            inner.committed = inner.pending;
        } else {
            inner.pending = inner.committed;
        }
        self.settled.notify_all();
        inner.committed
    }

    fn exit_use(&self) -> CaptureResult<()> {
        let mut inner = self.inner.lock();
        inner.users -= 1;
        if inner.users == 0 {
            self.idle.notify_all();
        }

        // A stop (or a rolled-back start) is underway: whatever this user
        // was about to hand out must not escape.
        if inner.pending != LifecycleState::Started {
            return Err(CaptureError::StoppedDuringDelivery);
        }
        Ok(())
    }
}

impl Default for ResourceState {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================
// TRANSITION GUARD
// ============================================

/// A reserved transition.
///
/// Must be finished on the thread that began it. Dropping it without
/// committing rolls it back, so an early `?` return can never leave the
/// state machine half way.
#[must_use = "a transition rolls back when dropped"]
pub struct Transition<'a> {
    state: &'a ResourceState,
    from: LifecycleState,
    to: LifecycleState,
    finished: bool,
    _not_send: PhantomData<*const ()>,
}

impl<'a> Transition<'a> {
    /// State the transition started from.
    pub fn from(&self) -> LifecycleState {
        self.from
    }

    /// State the transition is heading to.
    pub fn to(&self) -> LifecycleState {
        self.to
    }

    /// Makes the pending state the committed state.
    pub fn commit(mut self) -> LifecycleState {
        self.finished = true;
        let now = self.state.finish(true);
        log::debug!("Transition {:?} -> {:?} committed", self.from, self.to);
        now
    }

    /// Abandons the transition; the committed state is unchanged.
    pub fn rollback(mut self) {
        self.finished = true;
        self.state.finish(false);
        log::debug!("Transition {:?} -> {:?} rolled back", self.from, self.to);
    }
}

impl Drop for Transition<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.state.finish(false);
            log::debug!(
                "Transition {:?} -> {:?} dropped, rolled back",
                self.from,
                self.to
            );
        }
    }
}

// ============================================
// USE GUARD
// ============================================

/// Proof that the holder is inside the "in use" bracket.
///
/// Leaving the bracket wakes a stop waiting in `quiesce`. Dropping the
/// guard leaves it too, which keeps the count right on every exit path.
#[must_use = "dropping the guard leaves the use bracket immediately"]
pub struct UseGuard<'a> {
    state: &'a ResourceState,
    exited: bool,
}

impl UseGuard<'_> {
    /// Leaves the bracket. Fails with `StoppedDuringDelivery` if a stop
    /// began while this user was inside.
    pub fn exit(mut self) -> CaptureResult<()> {
        self.exited = true;
        self.state.exit_use()
    }
}

impl Drop for UseGuard<'_> {
    fn drop(&mut self) {
        if !self.exited {
            let _ = self.state.exit_use();
        }
    }
}

// ============================================
// TESTS
// ============================================
