//! Reference models for tests, benches and demos.
//!
//! These models have simple, predictable behaviors that exercise every part
//! of the atomic protocol: periodic internal transitions, external inputs,
//! confluent policies, exported and imported continuous variables, and
//! causal refresh.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;

use crate::error::SimResult;
use crate::event::{Event, EventType};
use crate::hioa::{SharedValue, ValueReader, ValueWriter};
use crate::model::{AtomicModel, ConfluentPolicy, ModelDeclaration, VariableInit};
use crate::params::RunParameters;
use crate::simulator::TransitionKind;
use crate::time::{SimDuration, SimTime, TimeUnit};
use crate::types::{ModelUri, VarType};

/// One transition seen by a model.
#[derive(Clone, Debug, PartialEq)]
pub struct TransitionRecord {
    pub model: ModelUri,
    pub kind: TransitionKind,
    pub time: SimTime,
}

/// Shared record of transitions across models, in execution order.
pub type TransitionLog = Arc<Mutex<Vec<TransitionRecord>>>;

pub fn transition_log() -> TransitionLog {
    Arc::new(Mutex::new(Vec::new()))
}

fn record(log: &Option<TransitionLog>, model: &str, kind: TransitionKind, time: SimTime) {
    if let Some(log) = log {
        log.lock().push(TransitionRecord {
            model: model.to_string(),
            kind,
            time,
        });
    }
}

fn default_tick() -> String {
    "Tick".to_string()
}

fn default_policy() -> ConfluentPolicy {
    ConfluentPolicy::ExternalThenInternal
}

fn default_level() -> String {
    "level".to_string()
}

fn default_history() -> usize {
    16
}

fn default_gain() -> f64 {
    1.0
}

/// Attributes of a [`PeriodicModel`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PeriodicSettings {
    /// Seconds between two outputs
    pub period: f64,
    #[serde(default = "default_tick")]
    pub output: String,
    /// Imported event type restarting the period
    #[serde(default)]
    pub reset: Option<String>,
    /// Stops after this many outputs
    #[serde(default)]
    pub max_ticks: Option<u64>,
    #[serde(default = "default_policy")]
    pub confluent: ConfluentPolicy,
}

impl PeriodicSettings {
    pub fn new(period: f64) -> Self {
        Self {
            period,
            output: default_tick(),
            reset: None,
            max_ticks: None,
            confluent: default_policy(),
        }
    }

    pub fn with_output(mut self, output: impl Into<String>) -> Self {
        self.output = output.into();
        self
    }

    pub fn with_reset(mut self, reset: impl Into<String>) -> Self {
        self.reset = Some(reset.into());
        self
    }

    pub fn with_max_ticks(mut self, max: u64) -> Self {
        self.max_ticks = Some(max);
        self
    }

    pub fn with_confluent(mut self, policy: ConfluentPolicy) -> Self {
        self.confluent = policy;
        self
    }
}

/// Emits an event every period. A reset input restarts the period.
///
/// The period can be overridden by the run parameter `{uri}:period`.
#[derive(Debug)]
pub struct PeriodicModel {
    uri: ModelUri,
    settings: PeriodicSettings,
    period: SimDuration,
    next_in: SimDuration,
    ticks: u64,
    resets: u64,
    log: Option<TransitionLog>,
}

impl PeriodicModel {
    pub fn new(uri: impl Into<ModelUri>, settings: PeriodicSettings) -> Self {
        let period = SimDuration::seconds(settings.period);
        Self {
            uri: uri.into(),
            settings,
            period,
            next_in: period,
            ticks: 0,
            resets: 0,
            log: None,
        }
    }

    pub fn with_log(mut self, log: TransitionLog) -> Self {
        self.log = Some(log);
        self
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    fn exhausted(&self) -> bool {
        self.settings.max_ticks.is_some_and(|max| self.ticks >= max)
    }

    fn apply_inputs(&mut self, elapsed: SimDuration, events: &[Event]) {
        let reset = self
            .settings
            .reset
            .as_deref()
            .is_some_and(|r| events.iter().any(|e| e.event_type().name() == r));
        if reset {
            self.resets += 1;
            self.next_in = self.period;
        } else {
            self.next_in = self.next_in - elapsed;
        }
    }
}

impl AtomicModel for PeriodicModel {
    fn uri(&self) -> &str {
        &self.uri
    }

    fn declaration(&self) -> ModelDeclaration {
        let decl = ModelDeclaration::new().with_exported_event(EventType::named(self.settings.output.clone()));
        match &self.settings.reset {
            Some(reset) => decl.with_imported_event(EventType::named(reset.clone())),
            None => decl,
        }
    }

    fn set_run_parameters(&mut self, params: &RunParameters) -> SimResult<()> {
        if let Some(period) = params.optional::<f64>(&self.uri, "period")? {
            self.period = SimDuration::seconds(period);
        }
        Ok(())
    }

    fn initialise_state(&mut self, _start: SimTime) {
        self.ticks = 0;
        self.resets = 0;
        self.next_in = self.period;
    }

    fn time_advance(&self) -> SimDuration {
        if self.exhausted() {
            SimDuration::infinity(TimeUnit::Seconds)
        } else {
            self.next_in
        }
    }

    fn output(&mut self, now: SimTime) -> Vec<Event> {
        vec![Event::new(
            EventType::named(self.settings.output.clone()),
            now,
            serde_json::json!({ "seq": self.ticks + 1 }),
        )]
    }

    fn internal_transition(&mut self, now: SimTime) {
        self.ticks += 1;
        self.next_in = self.period;
        record(&self.log, &self.uri, TransitionKind::Internal, now);
    }

    fn external_transition(&mut self, now: SimTime, elapsed: SimDuration, events: Vec<Event>) {
        self.apply_inputs(elapsed, &events);
        record(&self.log, &self.uri, TransitionKind::External, now);
    }

    fn confluent_policy(&self) -> ConfluentPolicy {
        self.settings.confluent
    }

    fn confluent_transition(&mut self, now: SimTime, events: Vec<Event>) -> SimResult<()> {
        // Custom order: the tick is counted and the reset wins.
        self.ticks += 1;
        self.next_in = self.period;
        self.apply_inputs(SimDuration::zero(TimeUnit::Seconds), &events);
        record(&self.log, &self.uri, TransitionKind::Confluent, now);
        Ok(())
    }

    fn causal_transition(&mut self, now: SimTime, elapsed: SimDuration) {
        self.next_in = self.next_in - elapsed;
        record(&self.log, &self.uri, TransitionKind::Causal, now);
    }

    fn final_report(&self) -> serde_json::Value {
        serde_json::json!({ "ticks": self.ticks, "resets": self.resets })
    }
}

/// Attributes of a [`CounterModel`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CounterSettings {
    pub input: String,
}

/// Passive sink counting received events and remembering when they arrived.
#[derive(Debug)]
pub struct CounterModel {
    uri: ModelUri,
    input: EventType,
    arrivals: Vec<SimTime>,
    payloads: Vec<serde_json::Value>,
    log: Option<TransitionLog>,
}

impl CounterModel {
    pub fn new(uri: impl Into<ModelUri>, settings: CounterSettings) -> Self {
        Self {
            uri: uri.into(),
            input: EventType::named(settings.input),
            arrivals: Vec::new(),
            payloads: Vec::new(),
            log: None,
        }
    }

    pub fn with_log(mut self, log: TransitionLog) -> Self {
        self.log = Some(log);
        self
    }
}

impl AtomicModel for CounterModel {
    fn uri(&self) -> &str {
        &self.uri
    }

    fn declaration(&self) -> ModelDeclaration {
        ModelDeclaration::new().with_imported_event(self.input.clone())
    }

    fn initialise_state(&mut self, _start: SimTime) {
        self.arrivals.clear();
        self.payloads.clear();
    }

    fn time_advance(&self) -> SimDuration {
        SimDuration::infinity(TimeUnit::Seconds)
    }

    fn internal_transition(&mut self, _now: SimTime) {}

    fn external_transition(&mut self, now: SimTime, _elapsed: SimDuration, events: Vec<Event>) {
        for event in events {
            self.arrivals.push(now);
            self.payloads.push(event.payload().clone());
        }
        record(&self.log, &self.uri, TransitionKind::External, now);
    }

    fn confluent_policy(&self) -> ConfluentPolicy {
        ConfluentPolicy::ExternalThenInternal
    }

    fn final_report(&self) -> serde_json::Value {
        serde_json::json!({
            "received": self.arrivals.len(),
            "times": self.arrivals.iter().map(|t| t.as_secs_f64()).collect::<Vec<_>>(),
            "payloads": self.payloads,
        })
    }
}

/// Attributes of a [`RampModel`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RampSettings {
    pub initial: f64,
    /// Units per second
    pub slope: f64,
    /// Seconds between two quantized updates of the exported value
    pub step: f64,
    #[serde(default = "default_level")]
    pub variable: String,
    #[serde(default = "default_history")]
    pub history: usize,
    /// Imported event type whose payload sets a new slope
    #[serde(default)]
    pub set_slope: Option<String>,
}

impl RampSettings {
    pub fn new(initial: f64, slope: f64, step: f64) -> Self {
        Self {
            initial,
            slope,
            step,
            variable: default_level(),
            history: default_history(),
            set_slope: None,
        }
    }

    pub fn with_variable(mut self, name: impl Into<String>) -> Self {
        self.variable = name.into();
        self
    }

    pub fn with_set_slope(mut self, event_type: impl Into<String>) -> Self {
        self.set_slope = Some(event_type.into());
        self
    }
}

/// Exports a linearly evolving value, updated every step and whenever a
/// causal reader refreshes it.
#[derive(Debug)]
pub struct RampModel {
    uri: ModelUri,
    settings: RampSettings,
    level: ValueWriter<f64>,
    value: f64,
    slope: f64,
    since_update: SimDuration,
    updates: u64,
    log: Option<TransitionLog>,
}

impl RampModel {
    pub fn new(uri: impl Into<ModelUri>, settings: RampSettings) -> Self {
        let uri = uri.into();
        let level = ValueWriter::with_history(uri.clone(), settings.variable.clone(), settings.history);
        Self {
            value: settings.initial,
            slope: settings.slope,
            uri,
            settings,
            level,
            since_update: SimDuration::zero(TimeUnit::Seconds),
            updates: 0,
            log: None,
        }
    }

    pub fn with_log(mut self, log: TransitionLog) -> Self {
        self.log = Some(log);
        self
    }

    fn step(&self) -> SimDuration {
        SimDuration::seconds(self.settings.step)
    }

    /// Advances the value by `elapsed` and publishes it at `now`.
    fn advance(&mut self, now: SimTime, elapsed: SimDuration) {
        self.value += self.slope * elapsed.as_secs_f64();
        self.level.set(self.value, now);
        self.updates += 1;
    }
}

impl AtomicModel for RampModel {
    fn uri(&self) -> &str {
        &self.uri
    }

    fn declaration(&self) -> ModelDeclaration {
        let decl = ModelDeclaration::new().with_exported_variable(self.settings.variable.clone(), VarType::of::<f64>());
        match &self.settings.set_slope {
            Some(et) => decl.with_imported_event(EventType::named(et.clone())),
            None => decl,
        }
    }

    fn initialise_state(&mut self, _start: SimTime) {
        self.value = self.settings.initial;
        self.slope = self.settings.slope;
        self.since_update = SimDuration::zero(TimeUnit::Seconds);
        self.updates = 0;
    }

    fn initialise_variables(&mut self, start: SimTime) -> VariableInit {
        if self.level.time() == Some(start) {
            return VariableInit::done();
        }
        self.level.initialise(self.value, start);
        VariableInit::new(1, 0)
    }

    fn time_advance(&self) -> SimDuration {
        self.step() - self.since_update
    }

    fn internal_transition(&mut self, now: SimTime) {
        let elapsed = self.step() - self.since_update;
        self.advance(now, elapsed);
        self.since_update = SimDuration::zero(TimeUnit::Seconds);
        record(&self.log, &self.uri, TransitionKind::Internal, now);
    }

    fn external_transition(&mut self, now: SimTime, elapsed: SimDuration, events: Vec<Event>) {
        self.advance(now, elapsed);
        self.since_update = SimDuration::zero(TimeUnit::Seconds);
        for event in &events {
            if let Some(slope) = event.payload().as_f64() {
                self.slope = slope;
            }
        }
        record(&self.log, &self.uri, TransitionKind::External, now);
    }

    fn confluent_policy(&self) -> ConfluentPolicy {
        ConfluentPolicy::InternalThenExternal
    }

    fn causal_transition(&mut self, now: SimTime, elapsed: SimDuration) {
        self.advance(now, elapsed);
        self.since_update = self.since_update + elapsed;
        record(&self.log, &self.uri, TransitionKind::Causal, now);
    }

    fn final_report(&self) -> serde_json::Value {
        serde_json::json!({ "value": self.value, "slope": self.slope, "updates": self.updates })
    }

    fn exported_value(&self, name: &str) -> Option<SharedValue> {
        (name == self.settings.variable).then(|| self.level.share())
    }
}

/// Attributes of a [`SamplerModel`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SamplerSettings {
    /// Seconds between two samples
    pub period: f64,
    #[serde(default = "default_level")]
    pub input: String,
    /// Exported variable holding `gain * input`, initialised from the input
    #[serde(default)]
    pub scaled: Option<String>,
    #[serde(default = "default_gain")]
    pub gain: f64,
}

impl SamplerSettings {
    pub fn new(period: f64) -> Self {
        Self {
            period,
            input: default_level(),
            scaled: None,
            gain: default_gain(),
        }
    }

    pub fn with_input(mut self, name: impl Into<String>) -> Self {
        self.input = name.into();
        self
    }

    pub fn with_scaled(mut self, name: impl Into<String>, gain: f64) -> Self {
        self.scaled = Some(name.into());
        self.gain = gain;
        self
    }
}

/// Reads an imported value every period and records the samples.
#[derive(Debug)]
pub struct SamplerModel {
    uri: ModelUri,
    settings: SamplerSettings,
    input: Option<ValueReader<f64>>,
    scaled: Option<ValueWriter<f64>>,
    samples: Vec<(SimTime, f64)>,
    read_errors: u64,
    log: Option<TransitionLog>,
}

impl SamplerModel {
    pub fn new(uri: impl Into<ModelUri>, settings: SamplerSettings) -> Self {
        let uri = uri.into();
        let scaled = settings
            .scaled
            .as_ref()
            .map(|name| ValueWriter::new(uri.clone(), name.clone()));
        Self {
            uri,
            settings,
            input: None,
            scaled,
            samples: Vec::new(),
            read_errors: 0,
            log: None,
        }
    }

    pub fn with_log(mut self, log: TransitionLog) -> Self {
        self.log = Some(log);
        self
    }

    fn sample(&mut self, now: SimTime) {
        let Some(input) = &self.input else {
            return;
        };
        match input.get_at(now) {
            Ok(Some(v)) => {
                self.samples.push((now, v));
                if let Some(scaled) = &self.scaled {
                    scaled.set(v * self.settings.gain, now);
                }
            }
            Ok(None) => {}
            Err(e) => {
                self.read_errors += 1;
                warn!(model = %self.uri, error = %e, "causal refresh failed");
            }
        }
    }
}

impl AtomicModel for SamplerModel {
    fn uri(&self) -> &str {
        &self.uri
    }

    fn declaration(&self) -> ModelDeclaration {
        let decl = ModelDeclaration::new().with_imported_variable(self.settings.input.clone(), VarType::of::<f64>());
        match &self.settings.scaled {
            Some(name) => decl.with_exported_variable(name.clone(), VarType::of::<f64>()),
            None => decl,
        }
    }

    fn initialise_state(&mut self, _start: SimTime) {
        self.samples.clear();
        self.read_errors = 0;
    }

    /// The scaled output needs the input's initial value first.
    fn initialise_variables(&mut self, start: SimTime) -> VariableInit {
        let Some(scaled) = &self.scaled else {
            return VariableInit::done();
        };
        if scaled.time() == Some(start) {
            return VariableInit::done();
        }
        match self.input.as_ref().and_then(ValueReader::get) {
            Some(v) => {
                scaled.initialise(v * self.settings.gain, start);
                VariableInit::new(1, 0)
            }
            None => VariableInit::new(0, 1),
        }
    }

    fn time_advance(&self) -> SimDuration {
        SimDuration::seconds(self.settings.period)
    }

    fn internal_transition(&mut self, now: SimTime) {
        self.sample(now);
        record(&self.log, &self.uri, TransitionKind::Internal, now);
    }

    fn confluent_policy(&self) -> ConfluentPolicy {
        ConfluentPolicy::ExternalThenInternal
    }

    fn final_report(&self) -> serde_json::Value {
        serde_json::json!({
            "samples": self.samples.iter().map(|(t, v)| [t.as_secs_f64(), *v]).collect::<Vec<_>>(),
            "read_errors": self.read_errors,
        })
    }

    fn exported_value(&self, name: &str) -> Option<SharedValue> {
        self.scaled
            .as_ref()
            .filter(|w| w.name() == name)
            .map(ValueWriter::share)
    }

    fn bind_imported_value(&mut self, name: &str, value: SharedValue) -> SimResult<()> {
        if name != self.settings.input {
            return Err(crate::error::ConfigurationError::Binding {
                model: self.uri.clone(),
                variable: name.to_string(),
                reason: "not an imported variable".to_string(),
            }
            .into());
        }
        self.input = Some(value.reader::<f64>(&self.uri, name)?);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulator::AtomicSimulator;

    #[test]
    fn test_periodic_counts_ticks() {
        let model = PeriodicModel::new("p", PeriodicSettings::new(2.0).with_max_ticks(2));
        let mut sim = AtomicSimulator::new(Box::new(model), TimeUnit::Seconds);
        sim.initialise(SimTime::seconds(0.0)).unwrap();
        for t in [2.0, 4.0] {
            assert_eq!(sim.time_of_next_event(), SimTime::seconds(t));
            let out = sim.produce_output(SimTime::seconds(t)).unwrap();
            assert_eq!(out.len(), 1);
            sim.internal_transition(SimTime::seconds(t)).unwrap();
        }
        assert!(sim.time_of_next_event().is_infinite());
        let report = sim.terminate(SimTime::seconds(10.0)).unwrap();
        assert_eq!(report.body["ticks"], 2);
    }

    #[test]
    fn test_periodic_reset_restarts_period() {
        let model = PeriodicModel::new("p", PeriodicSettings::new(5.0).with_reset("Reset"));
        let mut sim = AtomicSimulator::new(Box::new(model), TimeUnit::Seconds);
        sim.initialise(SimTime::seconds(0.0)).unwrap();
        sim.store_input(vec![Event::signal(EventType::new("Reset"), SimTime::seconds(3.0))])
            .unwrap();
        sim.external_transition(SimTime::seconds(3.0)).unwrap();
        assert_eq!(sim.time_of_next_event(), SimTime::seconds(8.0));
    }

    #[test]
    fn test_ramp_exports_history() {
        let ramp = RampModel::new("r", RampSettings::new(10.0, 2.0, 1.0));
        let shared = ramp.exported_value("level").unwrap();
        let reader = shared.reader::<f64>("test", "level").unwrap();
        let mut sim = AtomicSimulator::new(Box::new(ramp), TimeUnit::Seconds);
        sim.initialise(SimTime::seconds(0.0)).unwrap();
        assert_eq!(sim.initialise_variables(SimTime::seconds(0.0)).unwrap(), VariableInit::new(1, 0));
        assert_eq!(reader.get(), Some(10.0));

        sim.produce_output(SimTime::seconds(1.0)).unwrap();
        sim.internal_transition(SimTime::seconds(1.0)).unwrap();
        assert_eq!(reader.get(), Some(12.0));
        assert_eq!(reader.history_len(), 2);
        assert_eq!(reader.derivative(), Some(2.0));
    }

    #[test]
    fn test_ramp_causal_transition_keeps_step_grid() {
        let ramp = RampModel::new("r", RampSettings::new(0.0, 1.0, 4.0));
        let reader = ramp.exported_value("level").unwrap().reader::<f64>("t", "level").unwrap();
        let mut sim = AtomicSimulator::new(Box::new(ramp), TimeUnit::Seconds);
        sim.initialise(SimTime::seconds(0.0)).unwrap();
        sim.causal_transition(SimTime::seconds(1.0)).unwrap();
        assert_eq!(reader.get(), Some(1.0));
        assert_eq!(sim.time_of_next_event(), SimTime::seconds(4.0));
    }

    #[test]
    fn test_sampler_rejects_unknown_variable() {
        let ramp = RampModel::new("r", RampSettings::new(0.0, 1.0, 1.0));
        let mut sampler = SamplerModel::new("s", SamplerSettings::new(1.0));
        let err = sampler
            .bind_imported_value("pressure", ramp.exported_value("level").unwrap())
            .unwrap_err();
        assert!(err.is_configuration());
    }
}
