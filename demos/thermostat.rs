//! Thermostat example: a hybrid model run in simulated time, then in real time.
//!
//! A room exports its temperature as a continuous variable. A thermostat
//! reads it through a causal binding every second and switches the heater
//! with HeaterOn/HeaterOff events. The architecture is read from YAML, with
//! both models registered under their own type names.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use cyphy::config::RunConfig;
use cyphy::registry::ModelRegistry;
use cyphy::{
    AtomicModel, ConfluentPolicy, Event, EventType, ModelDeclaration, RtSimulation, SharedValue, SimDuration,
    SimResult, SimTime, StatsCollector, ThreadedScheduler, ValueReader, ValueWriter, VarType, VariableInit,
};

const HEATER_ON: EventType = EventType::new("HeaterOn");
const HEATER_OFF: EventType = EventType::new("HeaterOff");

const HOUSE: &str = r#"
simulation:
  time_unit: seconds
  duration: 60.0
  acceleration_factor: 20.0
  start_delay_ms: 50
  log_level: info

parameters:
  "thermostat:low": 18.5

architecture:
  root: house
  atomic:
    - uri: room
      type: Room
      attrs:
        initial: 17.0
        heating_rate: 0.5
        cooling_rate: 0.2
        step: 4.3
    - uri: thermostat
      type: Thermostat
      attrs:
        low: 19.0
        high: 21.0
        period: 1.0
  coupled:
    - uri: house
      submodels: [room, thermostat]
      connections:
        - from: { model: thermostat, event: HeaterOn }
          to: { model: room, event: HeaterOn }
        - from: { model: thermostat, event: HeaterOff }
          to: { model: room, event: HeaterOff }
      reexported_events:
        - event: HeaterOn
          from: { model: thermostat, event: HeaterOn }
        - event: HeaterOff
          from: { model: thermostat, event: HeaterOff }
      bindings:
        - type: f64
          from: { model: room, name: temperature }
          to:
            - { model: thermostat, name: temperature, causal: true }
"#;

// -----------------------------------------------------------------------------
// Room: continuous temperature, heater driven by events
// -----------------------------------------------------------------------------

#[derive(Clone, Debug, Serialize, Deserialize)]
struct RoomSettings {
    initial: f64,
    /// Degrees per second while heating
    heating_rate: f64,
    /// Degrees per second while not heating
    cooling_rate: f64,
    /// Seconds between two published temperatures when nobody reads
    step: f64,
}

struct Room {
    uri: String,
    settings: RoomSettings,
    temperature: ValueWriter<f64>,
    value: f64,
    heating: bool,
    since_update: f64,
    switches: u64,
}

impl Room {
    fn new(uri: &str, settings: RoomSettings) -> Self {
        Self {
            uri: uri.to_string(),
            temperature: ValueWriter::with_history(uri, "temperature", 64),
            value: settings.initial,
            settings,
            heating: false,
            since_update: 0.0,
            switches: 0,
        }
    }

    fn rate(&self) -> f64 {
        if self.heating {
            self.settings.heating_rate
        } else {
            -self.settings.cooling_rate
        }
    }

    fn advance(&mut self, now: SimTime, elapsed: SimDuration) {
        self.value += self.rate() * elapsed.as_secs_f64();
        self.temperature.set(self.value, now);
    }
}

impl AtomicModel for Room {
    fn uri(&self) -> &str {
        &self.uri
    }

    fn declaration(&self) -> ModelDeclaration {
        ModelDeclaration::new()
            .with_imported_event(HEATER_ON)
            .with_imported_event(HEATER_OFF)
            .with_exported_variable("temperature", VarType::of::<f64>())
    }

    fn initialise_state(&mut self, _start: SimTime) {
        self.value = self.settings.initial;
        self.heating = false;
        self.since_update = 0.0;
        self.switches = 0;
    }

    fn initialise_variables(&mut self, start: SimTime) -> VariableInit {
        if self.temperature.time() == Some(start) {
            return VariableInit::done();
        }
        self.temperature.initialise(self.value, start);
        VariableInit::new(1, 0)
    }

    fn time_advance(&self) -> SimDuration {
        SimDuration::seconds(self.settings.step - self.since_update)
    }

    fn internal_transition(&mut self, now: SimTime) {
        let elapsed = SimDuration::seconds(self.settings.step - self.since_update);
        self.advance(now, elapsed);
        self.since_update = 0.0;
    }

    fn external_transition(&mut self, now: SimTime, elapsed: SimDuration, events: Vec<Event>) {
        self.advance(now, elapsed);
        self.since_update = 0.0;
        for event in events {
            let heating = event.event_type() == &HEATER_ON;
            if heating != self.heating {
                self.heating = heating;
                self.switches += 1;
            }
        }
    }

    fn confluent_policy(&self) -> ConfluentPolicy {
        ConfluentPolicy::InternalThenExternal
    }

    fn causal_transition(&mut self, now: SimTime, elapsed: SimDuration) {
        self.advance(now, elapsed);
        self.since_update += elapsed.as_secs_f64();
    }

    fn final_report(&self) -> serde_json::Value {
        serde_json::json!({
            "temperature": self.value,
            "heating": self.heating,
            "switches": self.switches,
        })
    }

    fn exported_value(&self, name: &str) -> Option<SharedValue> {
        (name == "temperature").then(|| self.temperature.share())
    }
}

// -----------------------------------------------------------------------------
// Thermostat: samples the temperature, emits heater commands
// -----------------------------------------------------------------------------

#[derive(Clone, Debug, Serialize, Deserialize)]
struct ThermostatSettings {
    low: f64,
    high: f64,
    period: f64,
}

struct Thermostat {
    uri: String,
    settings: ThermostatSettings,
    temperature: Option<ValueReader<f64>>,
    heater_on: bool,
    /// Decision taken by the last output, applied by the next internal transition
    pending: Option<bool>,
    commands: Vec<(f64, &'static str)>,
}

impl Thermostat {
    fn new(uri: &str, settings: ThermostatSettings) -> Self {
        Self {
            uri: uri.to_string(),
            settings,
            temperature: None,
            heater_on: false,
            pending: None,
            commands: Vec::new(),
        }
    }

    fn command_at(&self, now: SimTime) -> Option<bool> {
        let reading = self.temperature.as_ref()?.get_at(now).ok()??;
        if !self.heater_on && reading < self.settings.low {
            Some(true)
        } else if self.heater_on && reading > self.settings.high {
            Some(false)
        } else {
            None
        }
    }
}

impl AtomicModel for Thermostat {
    fn uri(&self) -> &str {
        &self.uri
    }

    fn declaration(&self) -> ModelDeclaration {
        ModelDeclaration::new()
            .with_exported_event(HEATER_ON)
            .with_exported_event(HEATER_OFF)
            .with_imported_variable("temperature", VarType::of::<f64>())
    }

    fn set_run_parameters(&mut self, params: &cyphy::RunParameters) -> SimResult<()> {
        if let Some(low) = params.optional::<f64>(&self.uri, "low")? {
            self.settings.low = low;
        }
        if let Some(high) = params.optional::<f64>(&self.uri, "high")? {
            self.settings.high = high;
        }
        Ok(())
    }

    fn initialise_state(&mut self, _start: SimTime) {
        self.heater_on = false;
        self.pending = None;
        self.commands.clear();
    }

    fn time_advance(&self) -> SimDuration {
        SimDuration::seconds(self.settings.period)
    }

    fn output(&mut self, now: SimTime) -> Vec<Event> {
        self.pending = self.command_at(now);
        match self.pending {
            Some(true) => vec![Event::signal(HEATER_ON, now)],
            Some(false) => vec![Event::signal(HEATER_OFF, now)],
            None => Vec::new(),
        }
    }

    fn internal_transition(&mut self, now: SimTime) {
        if let Some(on) = self.pending.take() {
            self.heater_on = on;
            self.commands.push((now.as_secs_f64(), if on { "on" } else { "off" }));
        }
    }

    fn confluent_policy(&self) -> ConfluentPolicy {
        ConfluentPolicy::ExternalThenInternal
    }

    fn final_report(&self) -> serde_json::Value {
        serde_json::json!({ "commands": self.commands })
    }

    fn bind_imported_value(&mut self, name: &str, value: SharedValue) -> SimResult<()> {
        self.temperature = Some(value.reader::<f64>(&self.uri, name)?);
        Ok(())
    }
}

fn registry() -> ModelRegistry {
    let mut registry = ModelRegistry::new();
    registry.register_with::<RoomSettings, _>("Room", |uri, s| Box::new(Room::new(uri, s.clone())));
    registry.register_with::<ThermostatSettings, _>("Thermostat", |uri, s| {
        Box::new(Thermostat::new(uri, s.clone()))
    });
    registry
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = RunConfig::from_yaml(HOUSE)?;
    cyphy::init_logging(&config.simulation.log_level);

    println!("==== Thermostat example ====");
    let arch = config.build_architecture(&registry())?;
    let params = config.to_run_parameters();

    // Simulated time: as fast as possible.
    let mut coordinator = arch.coordinator()?;
    coordinator.set_run_parameters(&params)?;
    let mut collector = StatsCollector::new();
    collector.set_name("house");
    collector.start();
    let report = coordinator.run(config.start_time(), config.duration())?;
    collector.stop(&report, config.duration().as_secs_f64());
    println!("\n-- simulated time --");
    println!("{}", report.to_json()?);
    print!("{}", collector.summary().summary());
    println!("heater commands seen by the host: {}", coordinator.emitted_events().len());

    // Real time: the same architecture against the wall clock.
    let scheduler = Arc::new(ThreadedScheduler::new(2)?);
    let sim = RtSimulation::builder(arch.structural()?)
        .scheduler(scheduler)
        .config(config.to_rt_config())
        .build()?;
    sim.set_run_parameters(&params)?;
    let wall = config.duration().as_secs_f64() / config.simulation.acceleration_factor;
    println!("\n-- real time ({wall:.1}s of wall-clock time) --");
    let report = sim.run(config.start_time(), config.duration(), Duration::from_secs_f64(wall + 5.0))?;
    for event in sim.host_outputs() {
        println!("  {} at {}", event.event_type(), event.time());
    }
    println!("{}", report.to_json()?);
    println!("{}", serde_json::to_string_pretty(&sim.rt_stats())?);
    Ok(())
}
