//! Root coordinator (simulated-time engine).
//!
//! The `RootCoordinator` is the top-level driver of a model tree in
//! simulated time. It repeatedly jumps to the next event time of the tree,
//! asks imminent models for output, delivers host-injected events that are
//! due, and applies the transitions. It runs as fast as possible and never
//! looks at the wall clock.

use tracing::{debug, info};

use crate::error::{ConfigurationError, SimError, SimResult};
use crate::event::{Event, EventQueue};
use crate::model::{ModelReport, VariableInit};
use crate::params::RunParameters;
use crate::simulator::Simulator;
use crate::time::{SimDuration, SimTime};

/// Statistics collected by the coordinator.
#[derive(Clone, Debug, Default)]
pub struct CoordinatorStats {
    /// Total number of rounds executed
    pub rounds: u64,
    /// Events injected by the host
    pub events_injected: u64,
    /// Events output by the root model
    pub events_emitted: u64,
    /// Rounds of the variable initialisation fixpoint
    pub variable_rounds: u64,
}

/// Runs the variable initialisation fixpoint.
///
/// Calls `round` until no variable remains; a round that initialises nothing
/// while variables remain means some import can never be satisfied. Returns
/// the number of rounds.
pub fn initialise_variables_fixpoint<F>(mut round: F) -> SimResult<u64>
where
    F: FnMut() -> SimResult<VariableInit>,
{
    let mut rounds = 0;
    loop {
        let progress = round()?;
        rounds += 1;
        if progress.is_complete() {
            return Ok(rounds);
        }
        if progress.initialised == 0 {
            return Err(ConfigurationError::VariableInitialisation {
                remaining: progress.remaining,
            }
            .into());
        }
    }
}

/// Drives a model tree in simulated time.
pub struct RootCoordinator {
    root: Box<dyn Simulator>,
    external: EventQueue,
    emitted: Vec<Event>,
    current_time: SimTime,
    initialised: bool,
    terminated: Option<ModelReport>,
    stats: CoordinatorStats,
}

impl RootCoordinator {
    pub fn new(root: Box<dyn Simulator>) -> Self {
        let unit = root.time_of_next_event().unit();
        Self {
            root,
            external: EventQueue::new(),
            emitted: Vec::new(),
            current_time: SimTime::zero(unit),
            initialised: false,
            terminated: None,
            stats: CoordinatorStats::default(),
        }
    }

    pub fn root(&self) -> &dyn Simulator {
        self.root.as_ref()
    }

    pub fn current_time(&self) -> SimTime {
        self.current_time
    }

    pub fn stats(&self) -> &CoordinatorStats {
        &self.stats
    }

    pub fn set_run_parameters(&mut self, params: &RunParameters) -> SimResult<()> {
        self.root.set_run_parameters(params)
    }

    /// Initializes the tree at `start`, including continuous variables.
    ///
    /// This must be called before `step()` or `run_until()`.
    pub fn initialise(&mut self, start: SimTime) -> SimResult<()> {
        self.root.initialise(start)?;
        let root = &mut self.root;
        self.stats.variable_rounds = initialise_variables_fixpoint(|| root.initialise_variables(start))?;
        self.current_time = start;
        self.external.clear();
        self.emitted.clear();
        self.terminated = None;
        self.initialised = true;
        debug!(root = %self.root.uri(), start = %start, "coordinator initialised");
        Ok(())
    }

    /// Injects an event from the host. It is delivered to the root model at
    /// its time of occurrence, which must not be in the past.
    pub fn inject(&mut self, event: Event) -> SimResult<()> {
        if event.time() < self.current_time {
            return Err(SimError::protocol(
                self.root.uri(),
                format!("injected event at {} is before {}", event.time(), self.current_time),
            ));
        }
        if !self.root.declaration().imports_event(event.event_type()) {
            return Err(SimError::protocol(
                self.root.uri(),
                format!("root does not import {}", event.event_type()),
            ));
        }
        self.external.push(event);
        self.stats.events_injected += 1;
        Ok(())
    }

    /// Time of the next round: the root's next event or the next injected
    /// event, whichever comes first.
    pub fn next_event_time(&self) -> SimTime {
        let next = self.root.time_of_next_event();
        match self.external.earliest_time() {
            Some(t) => next.min(t),
            None => next,
        }
    }

    /// Executes one round. Returns its time, or `None` when nothing is left
    /// to do.
    pub fn step(&mut self) -> SimResult<Option<SimTime>> {
        if !self.initialised || self.terminated.is_some() {
            return Err(SimError::protocol(self.root.uri(), "step outside a run"));
        }
        let t = self.next_event_time();
        if t.is_infinite() {
            return Ok(None);
        }
        if self.root.time_of_next_event() == t {
            let out = self.root.produce_output(t)?;
            self.stats.events_emitted += out.len() as u64;
            self.emitted.extend(out);
        }
        let due = self.external.drain_until(t);
        if !due.is_empty() {
            self.root.store_input(due)?;
        }
        self.root.transition(t)?;
        self.current_time = t;
        self.stats.rounds += 1;
        Ok(Some(t))
    }

    /// Runs every round whose time is at or before `end`.
    pub fn run_until(&mut self, end: SimTime) -> SimResult<()> {
        while self.next_event_time() <= end {
            if self.step()?.is_none() {
                break;
            }
        }
        Ok(())
    }

    /// Ends the run at `end`. Idempotent.
    pub fn terminate(&mut self, end: SimTime) -> SimResult<ModelReport> {
        if let Some(report) = &self.terminated {
            return Ok(report.clone());
        }
        let end = end.max(self.current_time);
        let report = self.root.terminate(end)?;
        self.current_time = end;
        self.terminated = Some(report.clone());
        info!(root = %self.root.uri(), end = %end, rounds = self.stats.rounds, "simulation finished");
        Ok(report)
    }

    /// Initialises at `start`, runs for `duration` and terminates.
    pub fn run(&mut self, start: SimTime, duration: SimDuration) -> SimResult<ModelReport> {
        let end = start + duration;
        info!(root = %self.root.uri(), start = %start, end = %end, "simulation started");
        self.initialise(start)?;
        self.run_until(end)?;
        self.terminate(end)
    }

    /// Events output by the root model so far.
    pub fn emitted_events(&self) -> &[Event] {
        &self.emitted
    }

    pub fn take_emitted_events(&mut self) -> Vec<Event> {
        std::mem::take(&mut self.emitted)
    }

    /// Exports statistics from the coordinator and the whole tree.
    pub fn export_stats(&self) -> serde_json::Value {
        serde_json::json!({
            "coordinator": {
                "current_time": self.current_time.value(),
                "rounds": self.stats.rounds,
                "events_injected": self.stats.events_injected,
                "events_emitted": self.stats.events_emitted,
                "variable_rounds": self.stats.variable_rounds,
            },
            "root": self.root.export_stats(),
        })
    }
}
