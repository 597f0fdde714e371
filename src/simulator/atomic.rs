//! Atomic simulation protocol.
//!
//! [`AtomicSimulator`] wraps one [`AtomicModel`] and enforces the DEVS
//! protocol around it:
//!
//! - `produce_output(t)` only at `t == time_of_next_event`, exactly once
//!   before the internal or confluent transition at that instant;
//! - external transitions strictly before `time_of_next_event`, confluent
//!   transitions exactly at it;
//! - time never goes backwards;
//! - a negative or NaN time advance is fatal.
//!
//! Violations are reported as [`SimError::Protocol`].

use tracing::{debug, trace};

use crate::error::{SimError, SimResult};
use crate::event::{Event, EventQueue};
use crate::hioa::SharedValue;
use crate::model::{AtomicModel, ConfluentPolicy, ModelDeclaration, ModelReport, VariableInit};
use crate::params::RunParameters;
use crate::stats::TransitionStats;
use crate::time::{SimDuration, SimTime, TimeUnit};
use crate::types::ModelUri;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Phase {
    Created,
    Running,
    Terminated,
}

/// Kind of the last transition, recorded for diagnostics.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransitionKind {
    Internal,
    External,
    Confluent,
    Causal,
}

/// Protocol engine around one atomic model.
pub struct AtomicSimulator {
    model: Box<dyn AtomicModel>,
    uri: ModelUri,
    declaration: ModelDeclaration,
    time_unit: TimeUnit,
    phase: Phase,
    current_state_time: SimTime,
    time_of_last_event: SimTime,
    time_of_next_event: SimTime,
    pending: EventQueue,
    output_produced_at: Option<SimTime>,
    in_transition: bool,
    last_transition: Option<TransitionKind>,
    stats: TransitionStats,
    report: Option<ModelReport>,
}

impl AtomicSimulator {
    pub fn new(model: Box<dyn AtomicModel>, time_unit: TimeUnit) -> Self {
        let uri = model.uri().to_string();
        let declaration = model.declaration();
        Self {
            model,
            uri,
            declaration,
            time_unit,
            phase: Phase::Created,
            current_state_time: SimTime::zero(time_unit),
            time_of_last_event: SimTime::zero(time_unit),
            time_of_next_event: SimTime::infinity(time_unit),
            pending: EventQueue::new(),
            output_produced_at: None,
            in_transition: false,
            last_transition: None,
            stats: TransitionStats::default(),
            report: None,
        }
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn declaration(&self) -> &ModelDeclaration {
        &self.declaration
    }

    pub fn time_unit(&self) -> TimeUnit {
        self.time_unit
    }

    pub fn current_state_time(&self) -> SimTime {
        self.current_state_time
    }

    pub fn time_of_last_event(&self) -> SimTime {
        self.time_of_last_event
    }

    pub fn time_of_next_event(&self) -> SimTime {
        self.time_of_next_event
    }

    pub fn is_initialised(&self) -> bool {
        self.phase != Phase::Created
    }

    pub fn is_terminated(&self) -> bool {
        self.phase == Phase::Terminated
    }

    pub fn has_pending_input(&self) -> bool {
        !self.pending.is_empty()
    }

    pub fn last_transition(&self) -> Option<TransitionKind> {
        self.last_transition
    }

    pub fn stats(&self) -> TransitionStats {
        self.stats
    }

    pub fn set_run_parameters(&mut self, params: &RunParameters) -> SimResult<()> {
        self.model.set_run_parameters(params)
    }

    /// Resets the model at `start`.
    pub fn initialise(&mut self, start: SimTime) -> SimResult<()> {
        if self.phase == Phase::Terminated {
            return Err(self.violation("initialise after termination"));
        }
        self.model.initialise_state(start);
        self.pending.clear();
        self.output_produced_at = None;
        self.in_transition = false;
        self.current_state_time = start;
        self.time_of_last_event = start;
        self.time_of_next_event = self.next_event_after(start)?;
        self.phase = Phase::Running;
        debug!(model = %self.uri, start = %start, next = %self.time_of_next_event, "initialised");
        Ok(())
    }

    /// One round of variable initialisation.
    pub fn initialise_variables(&mut self, start: SimTime) -> SimResult<VariableInit> {
        self.require_running("initialise variables")?;
        Ok(self.model.initialise_variables(start))
    }

    /// Calls the output function at `now`, which must be the time of next
    /// event. The events must be of declared exported types.
    pub fn produce_output(&mut self, now: SimTime) -> SimResult<Vec<Event>> {
        self.require_running("produce output")?;
        if now != self.time_of_next_event {
            return Err(self.violation(format!(
                "output requested at {now} but next event is at {}",
                self.time_of_next_event
            )));
        }
        if self.output_produced_at == Some(now) {
            return Err(self.violation(format!("output already produced at {now}")));
        }
        let events = self.model.output(now);
        if let Some(e) = events
            .iter()
            .find(|e| !self.declaration.exports_event(e.event_type()))
        {
            return Err(self.violation(format!("emitted undeclared event {}", e.event_type())));
        }
        self.stats.events_emitted += events.len() as u64;
        self.output_produced_at = Some(now);
        trace!(model = %self.uri, time = %now, count = events.len(), "output");
        Ok(events)
    }

    /// Stores external events until the next external or confluent
    /// transition. Their types must be declared as imported.
    pub fn store_input(&mut self, events: Vec<Event>) -> SimResult<()> {
        self.require_running("store input")?;
        for event in events {
            if !self.declaration.imports_event(event.event_type()) {
                return Err(self.violation(format!(
                    "received undeclared event {}",
                    event.event_type()
                )));
            }
            self.stats.events_received += 1;
            self.pending.push(event);
        }
        Ok(())
    }

    pub fn internal_transition(&mut self, now: SimTime) -> SimResult<()> {
        self.enter(now)?;
        if now != self.time_of_next_event {
            return Err(self.abort(format!(
                "internal transition at {now} but next event is at {}",
                self.time_of_next_event
            )));
        }
        if self.output_produced_at != Some(now) {
            return Err(self.abort(format!("internal transition at {now} without output")));
        }
        self.model.internal_transition(now);
        self.stats.internal += 1;
        self.finish(now, TransitionKind::Internal)
    }

    pub fn external_transition(&mut self, now: SimTime) -> SimResult<()> {
        self.enter(now)?;
        if now < self.time_of_last_event || now >= self.time_of_next_event {
            return Err(self.abort(format!(
                "external transition at {now} outside [{}, {})",
                self.time_of_last_event, self.time_of_next_event
            )));
        }
        if self.pending.is_empty() {
            return Err(self.abort("external transition without stored events"));
        }
        let elapsed = now - self.time_of_last_event;
        let events = self.pending.drain_ordered();
        self.model.external_transition(now, elapsed, events);
        self.stats.external += 1;
        self.finish(now, TransitionKind::External)
    }

    pub fn confluent_transition(&mut self, now: SimTime) -> SimResult<()> {
        self.enter(now)?;
        if now != self.time_of_next_event {
            return Err(self.abort(format!(
                "confluent transition at {now} but next event is at {}",
                self.time_of_next_event
            )));
        }
        if self.output_produced_at != Some(now) {
            return Err(self.abort(format!("confluent transition at {now} without output")));
        }
        if self.pending.is_empty() {
            return Err(self.abort("confluent transition without stored events"));
        }
        let events = self.pending.drain_ordered();
        match self.model.confluent_policy() {
            ConfluentPolicy::ExternalThenInternal => {
                let elapsed = now - self.time_of_last_event;
                self.model.external_transition(now, elapsed, events);
                self.model.internal_transition(now);
            }
            ConfluentPolicy::InternalThenExternal => {
                self.model.internal_transition(now);
                self.model
                    .external_transition(now, SimDuration::zero(self.time_unit), events);
            }
            ConfluentPolicy::Custom => {
                if let Err(e) = self.model.confluent_transition(now, events) {
                    self.in_transition = false;
                    return Err(e);
                }
            }
        }
        self.stats.confluent += 1;
        self.finish(now, TransitionKind::Confluent)
    }

    /// Brings the model to `now` without events. `now` must lie in
    /// `(time_of_last_event, time_of_next_event)`.
    pub fn causal_transition(&mut self, now: SimTime) -> SimResult<()> {
        self.enter(now)?;
        if now <= self.time_of_last_event || now >= self.time_of_next_event {
            return Err(self.abort(format!(
                "causal transition at {now} outside ({}, {})",
                self.time_of_last_event, self.time_of_next_event
            )));
        }
        let elapsed = now - self.time_of_last_event;
        self.model.causal_transition(now, elapsed);
        self.stats.causal += 1;
        self.finish(now, TransitionKind::Causal)
    }

    /// Applies whichever transition is due at `now`: confluent when imminent
    /// with input, internal when imminent, external with input only, nothing
    /// otherwise. Output must already have been produced when imminent.
    pub fn transition(&mut self, now: SimTime) -> SimResult<()> {
        let imminent = now == self.time_of_next_event;
        match (imminent, self.has_pending_input()) {
            (true, true) => self.confluent_transition(now),
            (true, false) => self.internal_transition(now),
            (false, true) => self.external_transition(now),
            (false, false) => Ok(()),
        }
    }

    /// Ends the run at `end` and returns the final report. Idempotent.
    pub fn terminate(&mut self, end: SimTime) -> SimResult<ModelReport> {
        if let Some(report) = &self.report {
            return Ok(report.clone());
        }
        if self.in_transition {
            return Err(self.violation("terminate during a transition"));
        }
        let end = end.max(self.current_state_time);
        if self.phase == Phase::Running {
            self.model.end_simulation(end);
        }
        self.current_state_time = end;
        self.phase = Phase::Terminated;
        let report = ModelReport::atomic(self.uri.clone(), self.stats, self.model.final_report());
        self.report = Some(report.clone());
        debug!(model = %self.uri, end = %end, "terminated");
        Ok(report)
    }

    pub fn exported_value(&self, name: &str) -> Option<SharedValue> {
        self.model.exported_value(name)
    }

    pub fn bind_imported_value(&mut self, name: &str, value: SharedValue) -> SimResult<()> {
        self.model.bind_imported_value(name, value)
    }

    /// Exports engine state and counters as JSON.
    pub fn export_stats(&self) -> serde_json::Value {
        serde_json::json!({
            "model": self.uri,
            "time_of_last_event": self.time_of_last_event.value(),
            "time_of_next_event": if self.time_of_next_event.is_infinite() {
                serde_json::Value::Null
            } else {
                serde_json::json!(self.time_of_next_event.value())
            },
            "pending_events": self.pending.len(),
            "terminated": self.is_terminated(),
            "stats": self.stats,
        })
    }

    fn next_event_after(&self, now: SimTime) -> SimResult<SimTime> {
        let ta = self.model.time_advance();
        if !ta.is_valid_advance() {
            return Err(self.violation(format!("invalid time advance {ta}")));
        }
        Ok((now + ta).to_unit(self.time_unit))
    }

    fn require_running(&self, what: &str) -> SimResult<()> {
        match self.phase {
            Phase::Running => Ok(()),
            Phase::Created => Err(self.violation(format!("{what} before initialisation"))),
            Phase::Terminated => Err(self.violation(format!("{what} after termination"))),
        }
    }

    fn enter(&mut self, now: SimTime) -> SimResult<()> {
        self.require_running("transition")?;
        // Set while a model transition runs; still set afterwards only if the
        // model panicked half-way through.
        if self.in_transition {
            return Err(self.violation("re-entrant or interrupted transition"));
        }
        if now < self.current_state_time {
            return Err(self.violation(format!(
                "time going backwards: {now} < {}",
                self.current_state_time
            )));
        }
        self.in_transition = true;
        Ok(())
    }

    fn finish(&mut self, now: SimTime, kind: TransitionKind) -> SimResult<()> {
        self.in_transition = false;
        self.output_produced_at = None;
        self.current_state_time = now;
        self.time_of_last_event = now;
        self.time_of_next_event = self.next_event_after(now)?;
        self.last_transition = Some(kind);
        trace!(model = %self.uri, time = %now, ?kind, next = %self.time_of_next_event, "transition");
        Ok(())
    }

    fn abort(&mut self, reason: impl Into<String>) -> SimError {
        self.in_transition = false;
        self.violation(reason)
    }

    fn violation(&self, reason: impl Into<String>) -> SimError {
        SimError::protocol(self.uri.clone(), reason)
    }
}

impl std::fmt::Debug for AtomicSimulator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AtomicSimulator")
            .field("uri", &self.uri)
            .field("phase", &self.phase)
            .field("time_of_last_event", &self.time_of_last_event)
            .field("time_of_next_event", &self.time_of_next_event)
            .field("pending", &self.pending.len())
            .finish()
    }
}
