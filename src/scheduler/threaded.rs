//! Scheduler backed by a tokio multi-thread runtime.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::runtime::{Builder, Handle, Runtime};
use tokio::sync::Notify;
use tracing::debug;

use crate::error::{ConfigurationError, SchedulingFailure, SimResult};
use crate::scheduler::{Scheduler, Task, TaskHandle};
use crate::time::TimeUnit;

/// Default bound on tasks accepted and not yet finished or cancelled.
pub const DEFAULT_CAPACITY: usize = 65_536;

struct Shared {
    pending: AtomicUsize,
    shutdown: AtomicBool,
    aborted: AtomicBool,
    wake: Notify,
}

/// Runs callbacks on tokio worker threads after a wall-clock delay.
///
/// Either owns its runtime ([`ThreadedScheduler::new`]) or spawns onto an
/// existing one ([`ThreadedScheduler::from_handle`]). Callbacks are short
/// and synchronous; they run directly on the worker threads.
pub struct ThreadedScheduler {
    runtime: Option<Runtime>,
    handle: Handle,
    epoch: Instant,
    capacity: usize,
    shared: Arc<Shared>,
}

impl ThreadedScheduler {
    /// Starts a dedicated runtime with `worker_threads` workers.
    pub fn new(worker_threads: usize) -> SimResult<Self> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(worker_threads.max(1))
            .thread_name("cyphy-sched")
            .enable_time()
            .build()
            .map_err(ConfigurationError::Io)?;
        let handle = runtime.handle().clone();
        Ok(Self::build(Some(runtime), handle))
    }

    /// Spawns onto an existing runtime. The runtime must have its time
    /// driver enabled.
    pub fn from_handle(handle: Handle) -> Self {
        Self::build(None, handle)
    }

    fn build(runtime: Option<Runtime>, handle: Handle) -> Self {
        Self {
            runtime,
            handle,
            epoch: Instant::now(),
            capacity: DEFAULT_CAPACITY,
            shared: Arc::new(Shared {
                pending: AtomicUsize::new(0),
                shutdown: AtomicBool::new(false),
                aborted: AtomicBool::new(false),
                wake: Notify::new(),
            }),
        }
    }

    /// Bounds the number of tasks accepted and not yet finished or cancelled.
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn pending_count(&self) -> usize {
        self.shared.pending.load(Ordering::Acquire)
    }
}

impl Scheduler for ThreadedScheduler {
    fn now(&self) -> Duration {
        self.epoch.elapsed()
    }

    fn resolution(&self) -> TimeUnit {
        TimeUnit::Milliseconds
    }

    fn schedule(&self, task: Task, delay: Duration) -> Result<TaskHandle, SchedulingFailure> {
        if self.shared.shutdown.load(Ordering::Acquire) {
            return Err(SchedulingFailure::Shutdown);
        }
        let pending = self.shared.pending.fetch_add(1, Ordering::AcqRel);
        if pending >= self.capacity {
            self.shared.pending.fetch_sub(1, Ordering::AcqRel);
            return Err(SchedulingFailure::Saturated {
                pending,
                capacity: self.capacity,
            });
        }

        // Cancellation releases the slot at once and wakes the sleeper; the
        // task itself only releases it when it ran.
        let cancelled = Arc::new(Notify::new());
        let handle = {
            let shared = Arc::clone(&self.shared);
            let cancelled = Arc::clone(&cancelled);
            TaskHandle::with_cancel_hook(Box::new(move || {
                shared.pending.fetch_sub(1, Ordering::AcqRel);
                cancelled.notify_one();
            }))
        };
        let task_handle = handle.clone();
        let shared = Arc::clone(&self.shared);
        self.handle.spawn(async move {
            let aborted = shared.wake.notified();
            tokio::pin!(aborted);
            aborted.as_mut().enable();
            let ran = if shared.aborted.load(Ordering::Acquire) {
                task_handle.cancel();
                false
            } else if delay.is_zero() {
                task_handle.run(task)
            } else {
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {
                        if shared.aborted.load(Ordering::Acquire) {
                            task_handle.cancel();
                            false
                        } else {
                            task_handle.run(task)
                        }
                    }
                    _ = cancelled.notified() => false,
                    _ = &mut aborted => {
                        task_handle.cancel();
                        false
                    }
                }
            };
            if ran {
                shared.pending.fetch_sub(1, Ordering::AcqRel);
            }
        });
        Ok(handle)
    }

    fn is_shutdown(&self) -> bool {
        self.shared.shutdown.load(Ordering::Acquire)
    }

    fn is_terminated(&self) -> bool {
        self.is_shutdown() && self.shared.pending.load(Ordering::Acquire) == 0
    }

    fn shutdown(&self) {
        self.shared.shutdown.store(true, Ordering::Release);
    }

    fn shutdown_now(&self) {
        self.shared.shutdown.store(true, Ordering::Release);
        self.shared.aborted.store(true, Ordering::Release);
        self.shared.wake.notify_waiters();
        debug!(pending = self.pending_count(), "scheduler aborted");
    }
}

impl Drop for ThreadedScheduler {
    fn drop(&mut self) {
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}
