//! Configuration system for real-time runs.
//!
//! This module provides YAML/JSON configuration file support for describing
//! a run and the architecture it simulates.
//!
//! # Configuration File Structure
//!
//! ```yaml
//! simulation:
//!   time_unit: seconds
//!   start_time: 0.0
//!   duration: 10.0
//!   acceleration_factor: 2.0
//!   start_delay_ms: 100
//!   log_level: info
//!
//! parameters:
//!   "clock:period": 3.0
//!
//! architecture:
//!   root: plant
//!   atomic:
//!     - uri: clock
//!       type: Periodic
//!       attrs:
//!         period: 1.0
//!     - uri: counter
//!       type: Counter
//!       attrs:
//!         input: Tick
//!   coupled:
//!     - uri: plant
//!       submodels: [clock, counter]
//!       connections:
//!         - from: { model: clock, event: Tick }
//!           to: { model: counter, event: Tick }
//! ```

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::time::Duration;

use crate::coupled::architecture::Architecture;
use crate::coupled::descriptor::{
    CoupledModelDescriptor, EventSink, EventSource, ReexportedEvent, VariableSink, VariableSource,
};
use crate::error::{ConfigResult, ConfigurationError, SimResult};
use crate::event::EventType;
use crate::params::RunParameters;
use crate::registry::{ModelAttributes, ModelRegistry};
use crate::rt::RtConfig;
use crate::time::{SimDuration, SimTime, TimeUnit};
use crate::types::{ModelUri, VarType};

/// Global run parameters.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SimulationParams {
    /// Unit of `start_time` and `duration`
    #[serde(default)]
    pub time_unit: TimeUnit,

    #[serde(default)]
    pub start_time: f64,

    /// Simulated length of the run
    #[serde(default = "default_duration")]
    pub duration: f64,

    /// Simulated seconds per wall-clock second
    #[serde(default = "default_acceleration")]
    pub acceleration_factor: f64,

    /// Delay between the call to start and the wall-clock start
    #[serde(default = "default_start_delay_ms")]
    pub start_delay_ms: u64,

    /// Slack added after the wall-clock end before terminating
    #[serde(default = "default_end_of_run_margin_ms")]
    pub end_of_run_margin_ms: u64,

    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_duration() -> f64 {
    10.0
}

fn default_acceleration() -> f64 {
    1.0
}

fn default_start_delay_ms() -> u64 {
    100
}

fn default_end_of_run_margin_ms() -> u64 {
    10
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for SimulationParams {
    fn default() -> Self {
        Self {
            time_unit: TimeUnit::default(),
            start_time: 0.0,
            duration: default_duration(),
            acceleration_factor: default_acceleration(),
            start_delay_ms: default_start_delay_ms(),
            end_of_run_margin_ms: default_end_of_run_margin_ms(),
            log_level: default_log_level(),
        }
    }
}

impl SimulationParams {
    pub fn validate(&self) -> ConfigResult<()> {
        if !self.start_time.is_finite() {
            return Err(ConfigurationError::Validation(format!(
                "start_time must be finite, got {}",
                self.start_time
            )));
        }
        if !self.duration.is_finite() || self.duration < 0.0 {
            return Err(ConfigurationError::Validation(format!(
                "duration must be finite and non-negative, got {}",
                self.duration
            )));
        }
        if !(self.acceleration_factor > 0.0) {
            return Err(ConfigurationError::NonPositiveAcceleration(self.acceleration_factor));
        }
        if self.start_delay_ms == 0 {
            return Err(ConfigurationError::Validation(
                "start_delay_ms must be positive".to_string(),
            ));
        }
        if self.end_of_run_margin_ms == 0 {
            return Err(ConfigurationError::Validation(
                "end_of_run_margin_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// One event end of a connection.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EventEndpoint {
    pub model: ModelUri,
    pub event: String,
}

impl EventEndpoint {
    pub fn new(model: impl Into<ModelUri>, event: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            event: event.into(),
        }
    }

    fn source(&self) -> EventSource {
        EventSource::new(self.model.clone(), EventType::named(self.event.clone()))
    }

    fn sink(&self) -> EventSink {
        EventSink::new(self.model.clone(), EventType::named(self.event.clone()))
    }
}

/// An internal event connection between two submodels.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConnectionConfig {
    pub from: EventEndpoint,
    pub to: EventEndpoint,
}

/// An event received by the coupled model and its submodel sinks.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ImportedEventConfig {
    pub event: String,
    pub to: Vec<EventEndpoint>,
}

/// A submodel event exposed by the coupled model.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReexportedEventConfig {
    pub event: String,
    pub from: EventEndpoint,
}

/// One variable end of a binding.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VariableEndpoint {
    pub model: ModelUri,
    pub name: String,
    /// Refresh the exporter before each read (sinks only)
    #[serde(default)]
    pub causal: bool,
}

impl VariableEndpoint {
    pub fn new(model: impl Into<ModelUri>, name: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            name: name.into(),
            causal: false,
        }
    }

    pub fn causal(mut self) -> Self {
        self.causal = true;
        self
    }

    fn sink(&self, var_type: &VarType) -> VariableSink {
        let sink = VariableSink::new(self.model.clone(), self.name.clone(), var_type.clone());
        if self.causal {
            sink.causal()
        } else {
            sink
        }
    }
}

/// A variable binding between two submodels.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BindingConfig {
    #[serde(rename = "type")]
    pub var_type: String,
    pub from: VariableEndpoint,
    pub to: Vec<VariableEndpoint>,
}

/// A variable imported by the coupled model and its submodel sinks.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ImportedVariableConfig {
    pub name: String,
    #[serde(rename = "type")]
    pub var_type: String,
    pub to: Vec<VariableEndpoint>,
}

/// A submodel variable exposed by the coupled model.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReexportedVariableConfig {
    pub name: String,
    #[serde(rename = "type")]
    pub var_type: String,
    pub from: VariableEndpoint,
}

/// Configuration for an atomic model.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AtomicConfig {
    pub uri: ModelUri,

    /// Registered model type name
    #[serde(rename = "type")]
    pub model_type: String,

    /// Model settings, interpreted by the registered factory
    #[serde(default)]
    pub attrs: ModelAttributes,
}

/// Configuration for a coupled model.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct CoupledConfig {
    pub uri: ModelUri,
    pub submodels: Vec<ModelUri>,
    #[serde(default)]
    pub connections: Vec<ConnectionConfig>,
    #[serde(default)]
    pub imported_events: Vec<ImportedEventConfig>,
    #[serde(default)]
    pub reexported_events: Vec<ReexportedEventConfig>,
    #[serde(default)]
    pub bindings: Vec<BindingConfig>,
    #[serde(default)]
    pub imported_vars: Vec<ImportedVariableConfig>,
    #[serde(default)]
    pub reexported_vars: Vec<ReexportedVariableConfig>,
}

impl CoupledConfig {
    pub fn new<I, S>(uri: impl Into<ModelUri>, submodels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<ModelUri>,
    {
        Self {
            uri: uri.into(),
            submodels: submodels.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    pub fn connect(mut self, from: EventEndpoint, to: EventEndpoint) -> Self {
        self.connections.push(ConnectionConfig { from, to });
        self
    }

    pub fn bind(mut self, var_type: impl Into<String>, from: VariableEndpoint, to: VariableEndpoint) -> Self {
        self.bindings.push(BindingConfig {
            var_type: var_type.into(),
            from,
            to: vec![to],
        });
        self
    }

    /// Builds the coupled model descriptor.
    pub fn descriptor(&self) -> SimResult<CoupledModelDescriptor> {
        let mut builder = CoupledModelDescriptor::builder(self.uri.clone()).submodels(self.submodels.iter().cloned());
        for c in &self.connections {
            builder = builder.connect(c.from.source(), c.to.sink());
        }
        for imported in &self.imported_events {
            for to in &imported.to {
                builder = builder.import_event(EventType::named(imported.event.clone()), to.sink());
            }
        }
        for re in &self.reexported_events {
            builder = builder.reexport_event(EventType::named(re.event.clone()), ReexportedEvent::new(re.from.source()));
        }
        for b in &self.bindings {
            let var_type = VarType::named(b.var_type.clone());
            let source = VariableSource::new(b.from.model.clone(), b.from.name.clone(), var_type.clone());
            for to in &b.to {
                builder = builder.bind(source.clone(), to.sink(&var_type));
            }
        }
        for imported in &self.imported_vars {
            let var_type = VarType::named(imported.var_type.clone());
            for to in &imported.to {
                builder = builder.import_variable(imported.name.clone(), var_type.clone(), to.sink(&var_type));
            }
        }
        for re in &self.reexported_vars {
            let var_type = VarType::named(re.var_type.clone());
            builder = builder.reexport_variable(
                re.name.clone(),
                VariableSource::new(re.from.model.clone(), re.from.name.clone(), var_type),
            );
        }
        builder.build()
    }
}

/// A whole model tree.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ArchitectureConfig {
    pub root: ModelUri,

    #[serde(default)]
    pub time_unit: TimeUnit,

    #[serde(default)]
    pub atomic: Vec<AtomicConfig>,

    #[serde(default)]
    pub coupled: Vec<CoupledConfig>,
}

impl ArchitectureConfig {
    pub fn new(root: impl Into<ModelUri>) -> Self {
        Self {
            root: root.into(),
            ..Self::default()
        }
    }

    pub fn from_yaml(yaml: &str) -> ConfigResult<Self> {
        let config: ArchitectureConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json(json: &str) -> ConfigResult<Self> {
        let config: ArchitectureConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads an architecture from a file, auto-detecting format.
    pub fn from_file<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        match extension(path).as_str() {
            "yaml" | "yml" => Self::from_yaml(&content),
            "json" => Self::from_json(&content),
            other => Err(ConfigurationError::UnknownFormat(other.to_string())),
        }
    }

    pub fn with_atomic(mut self, uri: impl Into<ModelUri>, model_type: impl Into<String>, attrs: ModelAttributes) -> Self {
        self.atomic.push(AtomicConfig {
            uri: uri.into(),
            model_type: model_type.into(),
            attrs,
        });
        self
    }

    pub fn with_coupled(mut self, coupled: CoupledConfig) -> Self {
        self.coupled.push(coupled);
        self
    }

    /// Checks what can be checked without the registry: unique URIs and
    /// a declared root. Wiring is checked when the architecture is built.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.root.is_empty() {
            return Err(ConfigurationError::Validation("architecture has no root".to_string()));
        }
        let mut uris = HashSet::new();
        let all = self
            .atomic
            .iter()
            .map(|a| &a.uri)
            .chain(self.coupled.iter().map(|c| &c.uri));
        for uri in all {
            if !uris.insert(uri.as_str()) {
                return Err(ConfigurationError::Validation(format!("Duplicate model URI: {uri}")));
            }
        }
        if !uris.contains(self.root.as_str()) {
            return Err(ConfigurationError::Validation(format!(
                "root {} is not declared",
                self.root
            )));
        }
        for coupled in &self.coupled {
            if coupled.submodels.is_empty() {
                return Err(ConfigurationError::Validation(format!(
                    "coupled model {} has no submodels",
                    coupled.uri
                )));
            }
        }
        Ok(())
    }

    /// Creates the descriptors through `registry` and checks the tree.
    pub fn build(&self, registry: &ModelRegistry) -> SimResult<Architecture> {
        self.validate()?;
        let atomics = self
            .atomic
            .iter()
            .map(|a| registry.descriptor(&a.model_type, &a.uri, &a.attrs))
            .collect::<SimResult<Vec<_>>>()?;
        let coupleds = self
            .coupled
            .iter()
            .map(CoupledConfig::descriptor)
            .collect::<SimResult<Vec<_>>>()?;
        Architecture::new(self.root.clone(), atomics, coupleds, self.time_unit)
    }

    pub fn model_count(&self) -> usize {
        self.atomic.len() + self.coupled.len()
    }
}

fn extension(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase()
}

/// Complete run configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RunConfig {
    #[serde(default)]
    pub simulation: SimulationParams,

    /// Run parameters keyed by `"{uri}:{name}"`
    #[serde(default)]
    pub parameters: BTreeMap<String, serde_json::Value>,

    #[serde(default)]
    pub architecture: Option<ArchitectureConfig>,
}

impl RunConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn builder() -> RunConfigBuilder {
        RunConfigBuilder::default()
    }

    /// Loads configuration from a YAML file.
    pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Loads configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> ConfigResult<Self> {
        let config: RunConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads configuration from a JSON file.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    /// Loads configuration from a JSON string.
    pub fn from_json(json: &str) -> ConfigResult<Self> {
        let config: RunConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads configuration from a file, auto-detecting format.
    pub fn from_file<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let path = path.as_ref();
        match extension(path).as_str() {
            "yaml" | "yml" => Self::from_yaml_file(path),
            "json" => Self::from_json_file(path),
            other => Err(ConfigurationError::UnknownFormat(other.to_string())),
        }
    }

    /// Validates the entire configuration.
    pub fn validate(&self) -> ConfigResult<()> {
        self.simulation.validate()?;
        for key in self.parameters.keys() {
            if !key.contains(':') {
                return Err(ConfigurationError::Validation(format!(
                    "run parameter key {key} is not of the form uri:name"
                )));
            }
        }
        if let Some(architecture) = &self.architecture {
            architecture.validate()?;
        }
        Ok(())
    }

    pub fn to_yaml(&self) -> ConfigResult<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    pub fn to_json(&self) -> ConfigResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn to_yaml_file<P: AsRef<Path>>(&self, path: P) -> ConfigResult<()> {
        std::fs::write(path, self.to_yaml()?)?;
        Ok(())
    }

    pub fn start_time(&self) -> SimTime {
        SimTime::new(self.simulation.start_time, self.simulation.time_unit)
    }

    pub fn duration(&self) -> SimDuration {
        SimDuration::new(self.simulation.duration, self.simulation.time_unit)
    }

    pub fn to_rt_config(&self) -> RtConfig {
        RtConfig::default()
            .with_acceleration(self.simulation.acceleration_factor)
            .with_start_delay(Duration::from_millis(self.simulation.start_delay_ms))
            .with_end_of_run_margin(Duration::from_millis(self.simulation.end_of_run_margin_ms))
    }

    pub fn to_run_parameters(&self) -> RunParameters {
        let mut params = RunParameters::new();
        for (key, value) in &self.parameters {
            params.insert_raw(key.clone(), value.clone());
        }
        params
    }

    /// Builds the configured architecture.
    pub fn build_architecture(&self, registry: &ModelRegistry) -> SimResult<Architecture> {
        let architecture = self
            .architecture
            .as_ref()
            .ok_or_else(|| ConfigurationError::Validation("no architecture section".to_string()))?;
        architecture.build(registry)
    }
}

/// Builder for creating a [`RunConfig`] programmatically.
#[derive(Default)]
pub struct RunConfigBuilder {
    config: RunConfig,
}

impl RunConfigBuilder {
    pub fn time_unit(mut self, unit: TimeUnit) -> Self {
        self.config.simulation.time_unit = unit;
        self
    }

    pub fn start_time(mut self, start: f64) -> Self {
        self.config.simulation.start_time = start;
        self
    }

    pub fn duration(mut self, duration: f64) -> Self {
        self.config.simulation.duration = duration;
        self
    }

    pub fn acceleration(mut self, factor: f64) -> Self {
        self.config.simulation.acceleration_factor = factor;
        self
    }

    pub fn start_delay_ms(mut self, delay: u64) -> Self {
        self.config.simulation.start_delay_ms = delay;
        self
    }

    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.config.simulation.log_level = level.into();
        self
    }

    pub fn parameter(mut self, uri: &str, name: &str, value: impl Into<serde_json::Value>) -> Self {
        self.config
            .parameters
            .insert(RunParameters::key(uri, name), value.into());
        self
    }

    pub fn architecture(mut self, architecture: ArchitectureConfig) -> Self {
        self.config.architecture = Some(architecture);
        self
    }

    /// Builds and validates the configuration.
    pub fn build(self) -> ConfigResult<RunConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
