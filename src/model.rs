//! Model declarations and the `AtomicModel` trait.
//!
//! An atomic model is a local state machine with a time advance function and
//! output, internal, external, confluent and causal transitions. It declares
//! statically which events it imports and exports and which continuous
//! variables it shares. The protocol itself (who calls what, when) is
//! enforced by [`AtomicSimulator`](crate::simulator::AtomicSimulator); models
//! only implement the behaviour.

use serde::{Deserialize, Serialize};

use crate::error::{SimError, SimResult};
use crate::event::{Event, EventType};
use crate::hioa::SharedValue;
use crate::params::RunParameters;
use crate::stats::TransitionStats;
use crate::time::{SimDuration, SimTime};
use crate::types::{ModelUri, VarType, VariableDescriptor, Visibility};

/// Static interface of a model: imported/exported events and variables.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelDeclaration {
    /// Event types the model accepts
    #[serde(default)]
    pub imported_events: Vec<EventType>,
    /// Event types the model may output
    #[serde(default)]
    pub exported_events: Vec<EventType>,
    /// Continuous variables
    #[serde(default)]
    pub variables: Vec<VariableDescriptor>,
}

impl ModelDeclaration {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_imported_event(mut self, event_type: EventType) -> Self {
        if !self.imported_events.contains(&event_type) {
            self.imported_events.push(event_type);
        }
        self
    }

    pub fn with_exported_event(mut self, event_type: EventType) -> Self {
        if !self.exported_events.contains(&event_type) {
            self.exported_events.push(event_type);
        }
        self
    }

    pub fn with_exported_variable(self, name: impl Into<String>, var_type: VarType) -> Self {
        self.with_variable(VariableDescriptor::new(name, var_type, Visibility::Exported))
    }

    pub fn with_imported_variable(self, name: impl Into<String>, var_type: VarType) -> Self {
        self.with_variable(VariableDescriptor::new(name, var_type, Visibility::Imported))
    }

    pub fn with_internal_variable(self, name: impl Into<String>, var_type: VarType) -> Self {
        self.with_variable(VariableDescriptor::new(name, var_type, Visibility::Internal))
    }

    pub fn with_variable(mut self, descriptor: VariableDescriptor) -> Self {
        self.variables.push(descriptor);
        self
    }

    pub fn imports_event(&self, event_type: &EventType) -> bool {
        self.imported_events.contains(event_type)
    }

    pub fn exports_event(&self, event_type: &EventType) -> bool {
        self.exported_events.contains(event_type)
    }

    fn variable(&self, name: &str, visibility: Visibility) -> Option<&VariableDescriptor> {
        self.variables
            .iter()
            .find(|v| v.name == name && v.visibility == visibility)
    }

    pub fn exported_variable(&self, name: &str) -> Option<&VariableDescriptor> {
        self.variable(name, Visibility::Exported)
    }

    pub fn imported_variable(&self, name: &str) -> Option<&VariableDescriptor> {
        self.variable(name, Visibility::Imported)
    }

    pub fn exported_variables(&self) -> impl Iterator<Item = &VariableDescriptor> {
        self.variables
            .iter()
            .filter(|v| v.visibility == Visibility::Exported)
    }

    pub fn imported_variables(&self) -> impl Iterator<Item = &VariableDescriptor> {
        self.variables
            .iter()
            .filter(|v| v.visibility == Visibility::Imported)
    }
}

/// Order of the two halves of a confluent transition.
///
/// Every model states its policy explicitly; there is no implicit default.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfluentPolicy {
    /// External transition with the full elapsed time, then internal
    ExternalThenInternal,
    /// Internal transition, then external with zero elapsed time
    InternalThenExternal,
    /// The model overrides [`AtomicModel::confluent_transition`]
    Custom,
}

/// Progress of one round of variable initialisation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct VariableInit {
    /// Variables initialised during this round
    pub initialised: usize,
    /// Variables still waiting on imported values
    pub remaining: usize,
}

impl VariableInit {
    pub fn new(initialised: usize, remaining: usize) -> Self {
        Self {
            initialised,
            remaining,
        }
    }

    /// Nothing left to initialise.
    pub fn done() -> Self {
        Self::default()
    }

    pub fn is_complete(&self) -> bool {
        self.remaining == 0
    }

    pub fn merge(&mut self, other: VariableInit) {
        self.initialised += other.initialised;
        self.remaining += other.remaining;
    }
}

/// Final report of a model. Atomic reports carry the model's own body;
/// composite reports nest their children.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ModelReport {
    pub model_uri: ModelUri,
    /// Transition counters, summed over children for composites
    pub stats: TransitionStats,
    /// Model-specific content
    pub body: serde_json::Value,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<ModelReport>,
}

impl ModelReport {
    pub fn atomic(uri: impl Into<ModelUri>, stats: TransitionStats, body: serde_json::Value) -> Self {
        Self {
            model_uri: uri.into(),
            stats,
            body,
            children: Vec::new(),
        }
    }

    pub fn composite(uri: impl Into<ModelUri>, children: Vec<ModelReport>) -> Self {
        let mut stats = TransitionStats::default();
        for child in &children {
            stats.merge(&child.stats);
        }
        Self {
            model_uri: uri.into(),
            stats,
            body: serde_json::Value::Null,
            children,
        }
    }

    /// Finds the report of `uri` in this subtree.
    pub fn find(&self, uri: &str) -> Option<&ModelReport> {
        if self.model_uri == uri {
            return Some(self);
        }
        self.children.iter().find_map(|c| c.find(uri))
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

/// The core trait that all atomic models must implement.
///
/// Transitions are called by the engine under its serialization lock, one at
/// a time and at non-decreasing times. Models never see wall-clock time.
pub trait AtomicModel: Send {
    /// Unique URI of this model instance.
    fn uri(&self) -> &str;

    /// Static interface.
    fn declaration(&self) -> ModelDeclaration;

    /// Reads run parameters before the run. Missing required parameters are
    /// reported as configuration errors.
    fn set_run_parameters(&mut self, _params: &RunParameters) -> SimResult<()> {
        Ok(())
    }

    /// Resets the discrete state at the start time.
    fn initialise_state(&mut self, start: SimTime);

    /// Initialises owned variables; may depend on imported values that other
    /// models initialise first. Called repeatedly until nothing remains.
    fn initialise_variables(&mut self, _start: SimTime) -> VariableInit {
        VariableInit::done()
    }

    /// Time until the next internal transition; `SimDuration::infinity` when
    /// idle. Must be non-negative.
    fn time_advance(&self) -> SimDuration;

    /// Output function, called once right before each internal or confluent
    /// transition.
    fn output(&mut self, _now: SimTime) -> Vec<Event> {
        Vec::new()
    }

    fn internal_transition(&mut self, now: SimTime);

    /// Reaction to stored external events, given in tie-break order.
    fn external_transition(&mut self, _now: SimTime, _elapsed: SimDuration, _events: Vec<Event>) {}

    /// Which half of a confluent transition runs first.
    fn confluent_policy(&self) -> ConfluentPolicy;

    /// Called instead of the two halves when the policy is
    /// [`ConfluentPolicy::Custom`].
    fn confluent_transition(&mut self, _now: SimTime, _events: Vec<Event>) -> SimResult<()> {
        Err(SimError::protocol(
            self.uri(),
            "custom confluent policy without a confluent transition",
        ))
    }

    /// Brings continuous state to `now` without any event.
    fn causal_transition(&mut self, _now: SimTime, _elapsed: SimDuration) {}

    /// Brings the state to the end time.
    fn end_simulation(&mut self, _end: SimTime) {}

    /// Model-specific part of the final report.
    fn final_report(&self) -> serde_json::Value {
        serde_json::Value::Null
    }

    /// Placeholder of exported variable `name`.
    fn exported_value(&self, _name: &str) -> Option<SharedValue> {
        None
    }

    /// Receives the placeholder of imported variable `name`.
    fn bind_imported_value(&mut self, name: &str, _value: SharedValue) -> SimResult<()> {
        Err(SimError::Configuration(
            crate::error::ConfigurationError::Binding {
                model: self.uri().to_string(),
                variable: name.to_string(),
                reason: "model does not import variables".to_string(),
            },
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SWITCH_ON: EventType = EventType::new("SwitchOn");
    const HEAT: EventType = EventType::new("Heat");

    #[test]
    fn test_declaration_builder() {
        let decl = ModelDeclaration::new()
            .with_imported_event(SWITCH_ON)
            .with_imported_event(SWITCH_ON)
            .with_exported_event(HEAT)
            .with_exported_variable("temperature", VarType::of::<f64>())
            .with_imported_variable("outside", VarType::of::<f64>());

        assert_eq!(decl.imported_events.len(), 1);
        assert!(decl.imports_event(&SWITCH_ON));
        assert!(decl.exports_event(&HEAT));
        assert!(!decl.exports_event(&SWITCH_ON));
        assert!(decl.exported_variable("temperature").is_some());
        assert!(decl.imported_variable("temperature").is_none());
        assert_eq!(decl.imported_variables().count(), 1);
    }

    #[test]
    fn test_variable_init_merge() {
        let mut total = VariableInit::done();
        total.merge(VariableInit::new(2, 1));
        total.merge(VariableInit::new(0, 3));
        assert_eq!(total, VariableInit::new(2, 4));
        assert!(!total.is_complete());
    }

    #[test]
    fn test_report_find() {
        let report = ModelReport::composite(
            "root",
            vec![
                ModelReport::atomic("a", TransitionStats::default(), serde_json::json!(1)),
                ModelReport::composite(
                    "inner",
                    vec![ModelReport::atomic(
                        "b",
                        TransitionStats {
                            internal: 2,
                            ..TransitionStats::default()
                        },
                        serde_json::Value::Null,
                    )],
                ),
            ],
        );
        assert_eq!(report.stats.internal, 2);
        assert_eq!(report.find("b").map(|r| r.stats.internal), Some(2));
        assert_eq!(report.find("a").map(|r| r.body.clone()), Some(serde_json::json!(1)));
        assert!(report.find("missing").is_none());
    }

    #[test]
    fn test_confluent_policy_serde() {
        let p: ConfluentPolicy = serde_yaml::from_str("internal_then_external").unwrap();
        assert_eq!(p, ConfluentPolicy::InternalThenExternal);
    }
}
