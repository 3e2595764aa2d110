//! Run-in-progress guard: `Idle -> Running -> Idle`.

use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

use haul_config::OverlapPolicy;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Running,
}

/// Keeps scheduled runs from overlapping.
///
/// [`RunGuard::enter`] hands out a [`RunToken`]. The token is cloned into
/// every worker of the run, and the guard goes back to `Idle` only when the
/// last clone is dropped, i.e. when the last worker finishes.
#[derive(Clone)]
pub struct RunGuard {
    inner: Arc<GuardInner>,
}

struct GuardInner {
    state: Mutex<RunState>,
    idle: Condvar,
}

impl GuardInner {
    fn lock(&self) -> MutexGuard<'_, RunState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for RunGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl RunGuard {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(GuardInner {
                state: Mutex::new(RunState::Idle),
                idle: Condvar::new(),
            }),
        }
    }

    pub fn state(&self) -> RunState {
        *self.inner.lock()
    }

    /// Move to `Running`.
    ///
    /// If a run is already active, `Skip` returns `None` at once and
    /// `Queue` blocks until it is over.
    pub fn enter(&self, policy: OverlapPolicy) -> Option<RunToken> {
        let mut state = self.inner.lock();
        while *state == RunState::Running {
            match policy {
                OverlapPolicy::Skip => return None,
                OverlapPolicy::Queue => {
                    state = self
                        .inner
                        .idle
                        .wait(state)
                        .unwrap_or_else(PoisonError::into_inner);
                }
            }
        }
        *state = RunState::Running;
        Some(RunToken {
            active: Arc::new(ActiveRun {
                inner: Arc::clone(&self.inner),
            }),
        })
    }

    /// Block until no run is active.
    pub fn wait_idle(&self) {
        let mut state = self.inner.lock();
        while *state == RunState::Running {
            state = self
                .inner
                .idle
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }
}

/// Proof of an active run. Cheap to clone.
#[derive(Clone)]
pub struct RunToken {
    active: Arc<ActiveRun>,
}

impl RunToken {
    /// Number of live clones, the dispatcher's included
    pub fn holders(&self) -> usize {
        Arc::strong_count(&self.active)
    }
}

struct ActiveRun {
    inner: Arc<GuardInner>,
}

impl Drop for ActiveRun {
    fn drop(&mut self) {
        *self.inner.lock() = RunState::Idle;
        self.inner.idle.notify_all();
    }
}
