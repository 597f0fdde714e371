//! Virtual-clock scheduler for deterministic tests.
//!
//! Time only moves when [`ManualScheduler::advance_to`] or
//! [`ManualScheduler::advance_by`] is called; due tasks then run on the
//! caller's thread, in order of due time and then submission order. Tasks
//! submitted while advancing (for instance a callback rescheduling itself)
//! run in the same call if they fall due before the target.

use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use crate::error::SchedulingFailure;
use crate::scheduler::{Scheduler, Task, TaskHandle};
use crate::time::TimeUnit;

struct Entry {
    handle: TaskHandle,
    task: Task,
}

#[derive(Default)]
struct ManualState {
    now: Duration,
    queue: BTreeMap<(Duration, u64), Entry>,
    next_seq: u64,
    shutdown: bool,
}

/// Scheduler with a virtual wall clock.
///
/// Cancelled tasks leave the queue immediately, unless cancellation is
/// being ignored, in which case they stay queued and run at their due time.
pub struct ManualScheduler {
    state: Arc<Mutex<ManualState>>,
    resolution: TimeUnit,
    capacity: Option<usize>,
    ignore_cancellation: Arc<AtomicBool>,
}

impl ManualScheduler {
    /// Clock starting at zero with nanosecond resolution.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(ManualState::default())),
            resolution: TimeUnit::Nanoseconds,
            capacity: None,
            ignore_cancellation: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_resolution(mut self, resolution: TimeUnit) -> Self {
        self.resolution = resolution;
        self
    }

    /// Rejects tasks once `capacity` tasks are queued.
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = Some(capacity);
        self
    }

    /// Makes tasks cancelled from now on run anyway, reproducing the race in
    /// which a callback has already started when it is cancelled.
    pub fn set_ignore_cancellation(&self, ignore: bool) {
        self.ignore_cancellation.store(ignore, Ordering::SeqCst);
    }

    /// Tasks accepted and not yet run or cancelled.
    ///
    /// Only differs from the queue length while cancellation is ignored.
    pub fn pending_count(&self) -> usize {
        self.state
            .lock()
            .queue
            .values()
            .filter(|e| e.handle.is_pending())
            .count()
    }

    /// Due time of the earliest task still pending.
    pub fn next_due(&self) -> Option<Duration> {
        self.state
            .lock()
            .queue
            .iter()
            .find(|(_, e)| e.handle.is_pending())
            .map(|((due, _), _)| *due)
    }

    /// Moves the clock to `target`, running every task due at or before it.
    /// Returns the number of tasks run.
    pub fn advance_to(&self, target: Duration) -> usize {
        let mut ran = 0;
        loop {
            let next = {
                let mut state = self.state.lock();
                let due = state.queue.keys().next().copied();
                match due {
                    Some(key) if key.0 <= target => {
                        if key.0 > state.now {
                            state.now = key.0;
                        }
                        state.queue.remove(&key)
                    }
                    _ => {
                        if target > state.now {
                            state.now = target;
                        }
                        None
                    }
                }
            };
            let Some(entry) = next else {
                return ran;
            };
            if self.ignore_cancellation.load(Ordering::SeqCst) {
                entry.handle.run_ignoring_cancellation(entry.task);
                ran += 1;
            } else if entry.handle.run(entry.task) {
                ran += 1;
            }
        }
    }

    pub fn advance_by(&self, delta: Duration) -> usize {
        let target = self.now() + delta;
        self.advance_to(target)
    }

    /// Runs every task due at the current time.
    pub fn run_due(&self) -> usize {
        self.advance_to(self.now())
    }

    fn dequeue_on_cancel(&self, key: (Duration, u64)) -> TaskHandle {
        let state: Weak<Mutex<ManualState>> = Arc::downgrade(&self.state);
        let ignore = Arc::clone(&self.ignore_cancellation);
        TaskHandle::with_cancel_hook(Box::new(move || {
            if ignore.load(Ordering::SeqCst) {
                return;
            }
            if let Some(state) = state.upgrade() {
                state.lock().queue.remove(&key);
            }
        }))
    }
}

impl Default for ManualScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler for ManualScheduler {
    fn now(&self) -> Duration {
        self.state.lock().now
    }

    fn resolution(&self) -> TimeUnit {
        self.resolution
    }

    fn schedule(&self, task: Task, delay: Duration) -> Result<TaskHandle, SchedulingFailure> {
        let mut state = self.state.lock();
        if state.shutdown {
            return Err(SchedulingFailure::Shutdown);
        }
        if let Some(capacity) = self.capacity {
            let pending = state.queue.len();
            if pending >= capacity {
                return Err(SchedulingFailure::Saturated { pending, capacity });
            }
        }
        let due = state.now + delay;
        let seq = state.next_seq;
        state.next_seq += 1;
        let handle = self.dequeue_on_cancel((due, seq));
        state.queue.insert(
            (due, seq),
            Entry {
                handle: handle.clone(),
                task,
            },
        );
        Ok(handle)
    }

    fn is_shutdown(&self) -> bool {
        self.state.lock().shutdown
    }

    fn is_terminated(&self) -> bool {
        let state = self.state.lock();
        state.shutdown && state.queue.values().all(|e| !e.handle.is_pending())
    }

    fn shutdown(&self) {
        self.state.lock().shutdown = true;
    }

    fn shutdown_now(&self) {
        let dropped = {
            let mut state = self.state.lock();
            state.shutdown = true;
            std::mem::take(&mut state.queue)
        };
        // Cancel hooks take the state lock.
        for entry in dropped.values() {
            entry.handle.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex as PlMutex;
    use std::sync::Arc;

    fn recorder() -> (Arc<PlMutex<Vec<&'static str>>>, impl Fn(&'static str) -> Task) {
        let log = Arc::new(PlMutex::new(Vec::new()));
        let l = log.clone();
        let make = move |name: &'static str| -> Task {
            let l = l.clone();
            Box::new(move || l.lock().push(name))
        };
        (log, make)
    }

    #[test]
    fn test_runs_in_due_order() {
        let sched = ManualScheduler::new();
        let (log, task) = recorder();
        sched.schedule(task("late"), Duration::from_secs(3)).unwrap();
        sched.schedule(task("early"), Duration::from_secs(1)).unwrap();
        sched.schedule(task("early2"), Duration::from_secs(1)).unwrap();

        assert_eq!(sched.advance_to(Duration::from_secs(2)), 2);
        assert_eq!(*log.lock(), vec!["early", "early2"]);
        assert_eq!(sched.now(), Duration::from_secs(2));
        assert_eq!(sched.pending_count(), 1);

        sched.advance_by(Duration::from_secs(5));
        assert_eq!(log.lock().len(), 3);
        assert_eq!(sched.now(), Duration::from_secs(7));
    }

    #[test]
    fn test_cancelled_task_skipped() {
        let sched = ManualScheduler::new();
        let (log, task) = recorder();
        let handle = sched.schedule(task("a"), Duration::from_secs(1)).unwrap();
        assert!(handle.cancel());
        assert_eq!(sched.pending_count(), 0);
        assert_eq!(sched.advance_to(Duration::from_secs(2)), 0);
        assert!(log.lock().is_empty());
    }

    #[test]
    fn test_cancelled_task_leaves_queue() {
        let sched = ManualScheduler::new().with_capacity(2);
        for _ in 0..1000 {
            let handle = sched.schedule(Box::new(|| {}), Duration::from_secs(60)).unwrap();
            assert!(handle.cancel());
        }
        assert_eq!(sched.state.lock().queue.len(), 0);
        assert_eq!(sched.next_due(), None);

        sched.schedule(Box::new(|| {}), Duration::from_secs(1)).unwrap();
        sched.schedule(Box::new(|| {}), Duration::from_secs(2)).unwrap();
        assert_eq!(sched.state.lock().queue.len(), 2);
    }

    #[test]
    fn test_ignore_cancellation_runs_anyway() {
        let sched = ManualScheduler::new();
        let (log, task) = recorder();
        sched.set_ignore_cancellation(true);
        let handle = sched.schedule(task("a"), Duration::from_secs(1)).unwrap();
        handle.cancel();
        assert_eq!(sched.pending_count(), 0);
        assert_eq!(sched.advance_to(Duration::from_secs(1)), 1);
        assert_eq!(*log.lock(), vec!["a"]);
    }

    #[test]
    fn test_nested_scheduling_runs_in_same_advance() {
        let sched = Arc::new(ManualScheduler::new());
        let count = Arc::new(PlMutex::new(0));
        let s = sched.clone();
        let c = count.clone();
        sched
            .schedule(
                Box::new(move || {
                    *c.lock() += 1;
                    let c2 = c.clone();
                    let _ = s.schedule(Box::new(move || *c2.lock() += 1), Duration::from_secs(1));
                }),
                Duration::from_secs(1),
            )
            .unwrap();
        sched.advance_to(Duration::from_secs(2));
        assert_eq!(*count.lock(), 2);
    }

    #[test]
    fn test_shutdown_and_capacity() {
        let sched = ManualScheduler::new().with_capacity(1);
        sched.schedule(Box::new(|| {}), Duration::from_secs(1)).unwrap();
        let err = sched.schedule(Box::new(|| {}), Duration::from_secs(1)).unwrap_err();
        assert_eq!(err, SchedulingFailure::Saturated { pending: 1, capacity: 1 });

        sched.shutdown();
        assert!(sched.is_shutdown());
        assert!(!sched.is_terminated());
        assert_eq!(
            sched.schedule(Box::new(|| {}), Duration::ZERO).unwrap_err(),
            SchedulingFailure::Shutdown
        );
        sched.advance_by(Duration::from_secs(1));
        assert!(sched.is_terminated());
    }
}
