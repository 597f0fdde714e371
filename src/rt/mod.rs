//! Real-time execution.
//!
//! In a real-time run every atomic model is driven by its own
//! [`RtAtomicEngine`]: internal transitions are timers on the host
//! [`Scheduler`](crate::scheduler::Scheduler), external events are delivered
//! directly by the emitting engine, and an independent end-of-run timer
//! terminates the engine. [`RtSimulation`] builds the engines of a
//! structural composition and runs them together.

pub mod clock;
pub mod engine;
pub mod simulation;

use parking_lot::{Condvar, Mutex};
use std::time::Duration;

use crate::error::{ConfigurationError, SimResult};
use crate::time::TimeUnit;

pub use clock::{Deadline, RtClock};
pub use engine::RtAtomicEngine;
pub use simulation::{RtSimulation, RtSimulationBuilder};

/// Timing settings of a real-time run.
#[derive(Clone, Debug, PartialEq)]
pub struct RtConfig {
    /// Simulated seconds per wall-clock second
    pub acceleration_factor: f64,
    /// Delay between the call to start and the wall-clock start of the run
    pub start_delay: Duration,
    /// Extra wall-clock time after the end of the run before termination.
    /// At least one scheduler tick, so that an internal transition due at
    /// the end time always runs before the end-of-run callback.
    pub end_of_run_margin: Duration,
}

impl Default for RtConfig {
    fn default() -> Self {
        Self {
            acceleration_factor: 1.0,
            start_delay: Duration::from_millis(100),
            end_of_run_margin: Duration::from_millis(10),
        }
    }
}

impl RtConfig {
    pub fn with_acceleration(mut self, factor: f64) -> Self {
        self.acceleration_factor = factor;
        self
    }

    pub fn with_start_delay(mut self, delay: Duration) -> Self {
        self.start_delay = delay;
        self
    }

    pub fn with_end_of_run_margin(mut self, margin: Duration) -> Self {
        self.end_of_run_margin = margin;
        self
    }

    pub fn validate(&self) -> SimResult<()> {
        if !(self.acceleration_factor > 0.0) || !self.acceleration_factor.is_finite() {
            return Err(ConfigurationError::NonPositiveAcceleration(self.acceleration_factor).into());
        }
        if self.start_delay.is_zero() {
            return Err(ConfigurationError::Validation(
                "start delay must be positive so that the start lies in the future".to_string(),
            )
            .into());
        }
        if self.end_of_run_margin.is_zero() {
            return Err(ConfigurationError::Validation(
                "end-of-run margin must be positive".to_string(),
            )
            .into());
        }
        Ok(())
    }

    /// [`RtConfig::validate`] against a scheduler of the given resolution.
    pub fn validate_for(&self, resolution: TimeUnit) -> SimResult<()> {
        self.validate()?;
        let tick = Duration::from_nanos(resolution.nanos() as u64);
        if self.end_of_run_margin < tick {
            return Err(ConfigurationError::Validation(format!(
                "end-of-run margin {:?} is shorter than one scheduler tick ({})",
                self.end_of_run_margin,
                resolution.symbol()
            ))
            .into());
        }
        Ok(())
    }
}

/// Counts engines down to termination.
#[derive(Debug)]
pub struct TerminationLatch {
    remaining: Mutex<usize>,
    released: Condvar,
}

impl TerminationLatch {
    pub fn new(count: usize) -> Self {
        Self {
            remaining: Mutex::new(count),
            released: Condvar::new(),
        }
    }

    pub fn count_down(&self) {
        let mut remaining = self.remaining.lock();
        if *remaining > 0 {
            *remaining -= 1;
            if *remaining == 0 {
                self.released.notify_all();
            }
        }
    }

    pub fn remaining(&self) -> usize {
        *self.remaining.lock()
    }

    pub fn is_released(&self) -> bool {
        self.remaining() == 0
    }

    /// Waits until released or `timeout` elapses. Returns whether released.
    pub fn wait(&self, timeout: Duration) -> bool {
        let mut remaining = self.remaining.lock();
        if *remaining == 0 {
            return true;
        }
        let _ = self.released.wait_while_for(&mut remaining, |r| *r > 0, timeout);
        *remaining == 0
    }
}
