//! Task scheduling capability required from the host.
//!
//! The real-time engines only need to run a callback after a delay or
//! immediately, with best-effort cancellation. Two implementations are
//! provided:
//!
//! - [`ThreadedScheduler`]: callbacks on a tokio multi-thread runtime,
//!   driven by the system clock.
//! - [`ManualScheduler`]: a virtual wall clock advanced explicitly, for
//!   deterministic tests.

pub mod manual;
pub mod threaded;

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::error::SchedulingFailure;
use crate::time::TimeUnit;

pub use manual::ManualScheduler;
pub use threaded::ThreadedScheduler;

/// A callback handed to a scheduler.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

const PENDING: u8 = 0;
const RUNNING: u8 = 1;
const DONE: u8 = 2;
const CANCELLED: u8 = 3;

/// Hook run by [`TaskHandle::cancel`] when cancellation wins, so that the
/// scheduler can release the task's slot right away.
pub(crate) type CancelHook = Box<dyn Fn() + Send + Sync>;

struct HandleState {
    state: AtomicU8,
    on_cancel: Option<CancelHook>,
}

/// Handle on a scheduled task.
///
/// Cancellation is advisory: it only prevents the task from starting. A
/// task that already started runs to completion, which is why engines also
/// check a generation token inside their callbacks.
#[derive(Clone)]
pub struct TaskHandle {
    inner: Arc<HandleState>,
}

impl TaskHandle {
    pub(crate) fn new() -> Self {
        Self::build(None)
    }

    pub(crate) fn with_cancel_hook(hook: CancelHook) -> Self {
        Self::build(Some(hook))
    }

    fn build(on_cancel: Option<CancelHook>) -> Self {
        Self {
            inner: Arc::new(HandleState {
                state: AtomicU8::new(PENDING),
                on_cancel,
            }),
        }
    }

    fn load(&self) -> u8 {
        self.inner.state.load(Ordering::Acquire)
    }

    /// Prevents the task from starting. Returns `false` when it already
    /// started, finished or was cancelled.
    pub fn cancel(&self) -> bool {
        let won = self
            .inner
            .state
            .compare_exchange(PENDING, CANCELLED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if won {
            if let Some(hook) = &self.inner.on_cancel {
                hook();
            }
        }
        won
    }

    pub fn is_pending(&self) -> bool {
        self.load() == PENDING
    }

    pub fn is_cancelled(&self) -> bool {
        self.load() == CANCELLED
    }

    /// Finished or cancelled.
    pub fn is_done(&self) -> bool {
        matches!(self.load(), DONE | CANCELLED)
    }

    /// Runs `task` unless it was cancelled. Returns whether it ran.
    pub(crate) fn run(&self, task: Task) -> bool {
        if self
            .inner
            .state
            .compare_exchange(PENDING, RUNNING, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        task();
        self.inner.state.store(DONE, Ordering::Release);
        true
    }

    /// Runs `task` even when cancelled, as if cancellation had lost the race.
    pub(crate) fn run_ignoring_cancellation(&self, task: Task) {
        self.inner.state.store(RUNNING, Ordering::Release);
        task();
        self.inner.state.store(DONE, Ordering::Release);
    }
}

impl fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self.load() {
            PENDING => "pending",
            RUNNING => "running",
            DONE => "done",
            _ => "cancelled",
        };
        f.debug_struct("TaskHandle").field("state", &state).finish()
    }
}

/// The scheduling capability used by real-time engines.
pub trait Scheduler: Send + Sync {
    /// Current wall-clock time, as a duration since the scheduler's epoch.
    fn now(&self) -> Duration;

    /// Granularity of the scheduler's timers; wall-clock targets are
    /// rounded to it.
    fn resolution(&self) -> TimeUnit {
        TimeUnit::Nanoseconds
    }

    /// Runs `task` once `delay` has elapsed.
    fn schedule(&self, task: Task, delay: Duration) -> Result<TaskHandle, SchedulingFailure>;

    /// Runs `task` as soon as possible.
    fn schedule_immediate(&self, task: Task) -> Result<TaskHandle, SchedulingFailure> {
        self.schedule(task, Duration::ZERO)
    }

    /// No new task is accepted.
    fn is_shutdown(&self) -> bool;

    /// Shut down and every accepted task finished or was dropped.
    fn is_terminated(&self) -> bool;

    /// Stops accepting tasks; already accepted tasks still run.
    fn shutdown(&self);

    /// Stops accepting tasks and drops the ones that have not started.
    fn shutdown_now(&self);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_cancel_before_run() {
        let handle = TaskHandle::new();
        assert!(handle.is_pending());
        assert!(handle.cancel());
        assert!(!handle.cancel());
        let ran = Arc::new(AtomicUsize::new(0));
        let r = ran.clone();
        assert!(!handle.run(Box::new(move || {
            r.fetch_add(1, Ordering::SeqCst);
        })));
        assert_eq!(ran.load(Ordering::SeqCst), 0);
        assert!(handle.is_done());
    }

    #[test]
    fn test_cancel_after_run_fails() {
        let handle = TaskHandle::new();
        assert!(handle.run(Box::new(|| {})));
        assert!(!handle.cancel());
        assert!(handle.is_done());
        assert!(!handle.is_cancelled());
    }

    #[test]
    fn test_cancel_hook_runs_once_when_cancellation_wins() {
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        let handle = TaskHandle::with_cancel_hook(Box::new(move || {
            h.fetch_add(1, Ordering::SeqCst);
        }));
        assert!(handle.cancel());
        assert!(!handle.clone().cancel());
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        let handle = TaskHandle::with_cancel_hook(Box::new(move || {
            h.fetch_add(1, Ordering::SeqCst);
        }));
        assert!(handle.run(Box::new(|| {})));
        assert!(!handle.cancel());
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }
}
