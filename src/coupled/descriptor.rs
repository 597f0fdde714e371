//! Static descriptors of atomic and coupled models.
//!
//! Descriptors carry everything needed to check an architecture before any
//! model object is created: atomic descriptors pair a static declaration
//! with a factory, coupled descriptors hold the wiring tables.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use crate::coupled::routing::{EventConverter, Hop};
use crate::error::{SimError, SimResult};
use crate::event::{Event, EventType};
use crate::model::{AtomicModel, ModelDeclaration};
use crate::types::{ModelUri, VarType};

/// A submodel emitting an event type.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EventSource {
    pub model_uri: ModelUri,
    pub event_type: EventType,
}

impl EventSource {
    pub fn new(model_uri: impl Into<ModelUri>, event_type: EventType) -> Self {
        Self {
            model_uri: model_uri.into(),
            event_type,
        }
    }
}

/// A submodel receiving an event type, with an optional conversion.
#[derive(Clone)]
pub struct EventSink {
    pub model_uri: ModelUri,
    pub event_type: EventType,
    pub converter: Option<EventConverter>,
}

impl EventSink {
    pub fn new(model_uri: impl Into<ModelUri>, event_type: EventType) -> Self {
        Self {
            model_uri: model_uri.into(),
            event_type,
            converter: None,
        }
    }

    pub fn with_converter<F>(mut self, convert: F) -> Self
    where
        F: Fn(&Event) -> Event + Send + Sync + 'static,
    {
        self.converter = Some(Arc::new(convert));
        self
    }

    pub(crate) fn hop(&self) -> Hop {
        Hop::new(self.event_type.clone(), self.converter.clone())
    }
}

impl fmt::Debug for EventSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventSink")
            .field("model_uri", &self.model_uri)
            .field("event_type", &self.event_type)
            .field("converter", &self.converter.is_some())
            .finish()
    }
}

/// A submodel event exposed by the coupled model under its own type.
#[derive(Clone)]
pub struct ReexportedEvent {
    pub source: EventSource,
    pub converter: Option<EventConverter>,
}

impl ReexportedEvent {
    pub fn new(source: EventSource) -> Self {
        Self {
            source,
            converter: None,
        }
    }

    pub fn with_converter<F>(mut self, convert: F) -> Self
    where
        F: Fn(&Event) -> Event + Send + Sync + 'static,
    {
        self.converter = Some(Arc::new(convert));
        self
    }
}

impl fmt::Debug for ReexportedEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReexportedEvent")
            .field("source", &self.source)
            .field("converter", &self.converter.is_some())
            .finish()
    }
}

/// A submodel exporting a continuous variable.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VariableSource {
    pub model_uri: ModelUri,
    pub name: String,
    pub var_type: VarType,
}

impl VariableSource {
    pub fn new(model_uri: impl Into<ModelUri>, name: impl Into<String>, var_type: VarType) -> Self {
        Self {
            model_uri: model_uri.into(),
            name: name.into(),
            var_type,
        }
    }
}

/// A submodel importing a continuous variable.
///
/// The sink name may differ from the source name (aliasing). A causal sink
/// refreshes the exporter before each read.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VariableSink {
    pub model_uri: ModelUri,
    pub name: String,
    pub var_type: VarType,
    #[serde(default)]
    pub causal: bool,
}

impl VariableSink {
    pub fn new(model_uri: impl Into<ModelUri>, name: impl Into<String>, var_type: VarType) -> Self {
        Self {
            model_uri: model_uri.into(),
            name: name.into(),
            var_type,
            causal: false,
        }
    }

    /// Marks the sink as causal.
    pub fn causal(mut self) -> Self {
        self.causal = true;
        self
    }
}

/// A variable imported by the coupled model and dispatched to submodels.
#[derive(Clone, Debug)]
pub struct ImportedVariable {
    pub var_type: VarType,
    pub sinks: Vec<VariableSink>,
}

/// A submodel variable exposed by the coupled model.
#[derive(Clone, Debug)]
pub struct ReexportedVariable {
    pub var_type: VarType,
    pub source: VariableSource,
}

/// Creates atomic model instances.
pub type ModelFactory = Arc<dyn Fn(&str) -> Box<dyn AtomicModel> + Send + Sync>;

/// Static description of an atomic model: its declaration and a factory.
#[derive(Clone)]
pub struct AtomicModelDescriptor {
    pub uri: ModelUri,
    pub declaration: ModelDeclaration,
    factory: ModelFactory,
}

impl AtomicModelDescriptor {
    pub fn new<F>(uri: impl Into<ModelUri>, declaration: ModelDeclaration, factory: F) -> Self
    where
        F: Fn(&str) -> Box<dyn AtomicModel> + Send + Sync + 'static,
    {
        Self {
            uri: uri.into(),
            declaration,
            factory: Arc::new(factory),
        }
    }

    pub fn with_factory(uri: impl Into<ModelUri>, declaration: ModelDeclaration, factory: ModelFactory) -> Self {
        Self {
            uri: uri.into(),
            declaration,
            factory,
        }
    }

    /// Creates the model and checks it matches this descriptor.
    pub fn instantiate(&self) -> SimResult<Box<dyn AtomicModel>> {
        let model = (self.factory)(&self.uri);
        if model.uri() != self.uri {
            return Err(SimError::wiring(
                self.uri.clone(),
                format!("factory produced a model with URI {}", model.uri()),
            ));
        }
        if model.declaration() != self.declaration {
            return Err(SimError::wiring(
                self.uri.clone(),
                "factory produced a model whose declaration differs from the descriptor",
            ));
        }
        Ok(model)
    }
}

impl fmt::Debug for AtomicModelDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AtomicModelDescriptor")
            .field("uri", &self.uri)
            .field("declaration", &self.declaration)
            .finish()
    }
}

/// Static description of a coupled model: submodels and wiring.
///
/// Internal consistency (every reference names a declared submodel, types
/// agree on both ends of variable couplings, no name both imported and
/// reexported) is checked at construction.
#[derive(Clone, Debug)]
pub struct CoupledModelDescriptor {
    uri: ModelUri,
    submodels: BTreeSet<ModelUri>,
    imported_events: BTreeMap<EventType, Vec<EventSink>>,
    reexported_events: BTreeMap<EventType, ReexportedEvent>,
    event_connections: BTreeMap<EventSource, Vec<EventSink>>,
    imported_vars: BTreeMap<String, ImportedVariable>,
    reexported_vars: BTreeMap<String, ReexportedVariable>,
    bindings: BTreeMap<VariableSource, Vec<VariableSink>>,
}

impl CoupledModelDescriptor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        uri: impl Into<ModelUri>,
        submodels: BTreeSet<ModelUri>,
        imported_events: BTreeMap<EventType, Vec<EventSink>>,
        reexported_events: BTreeMap<EventType, ReexportedEvent>,
        event_connections: BTreeMap<EventSource, Vec<EventSink>>,
        imported_vars: BTreeMap<String, ImportedVariable>,
        reexported_vars: BTreeMap<String, ReexportedVariable>,
        bindings: BTreeMap<VariableSource, Vec<VariableSink>>,
    ) -> SimResult<Self> {
        let descriptor = Self {
            uri: uri.into(),
            submodels,
            imported_events,
            reexported_events,
            event_connections,
            imported_vars,
            reexported_vars,
            bindings,
        };
        descriptor.check_internal_consistency()?;
        Ok(descriptor)
    }

    pub fn builder(uri: impl Into<ModelUri>) -> CoupledModelBuilder {
        CoupledModelBuilder {
            uri: uri.into(),
            submodels: BTreeSet::new(),
            imported_events: BTreeMap::new(),
            reexported_events: BTreeMap::new(),
            event_connections: BTreeMap::new(),
            imported_vars: BTreeMap::new(),
            reexported_vars: BTreeMap::new(),
            bindings: BTreeMap::new(),
        }
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn submodels(&self) -> &BTreeSet<ModelUri> {
        &self.submodels
    }

    pub fn imported_events(&self) -> &BTreeMap<EventType, Vec<EventSink>> {
        &self.imported_events
    }

    pub fn reexported_events(&self) -> &BTreeMap<EventType, ReexportedEvent> {
        &self.reexported_events
    }

    pub fn event_connections(&self) -> &BTreeMap<EventSource, Vec<EventSink>> {
        &self.event_connections
    }

    pub fn imported_vars(&self) -> &BTreeMap<String, ImportedVariable> {
        &self.imported_vars
    }

    pub fn reexported_vars(&self) -> &BTreeMap<String, ReexportedVariable> {
        &self.reexported_vars
    }

    pub fn bindings(&self) -> &BTreeMap<VariableSource, Vec<VariableSink>> {
        &self.bindings
    }

    /// Interface of the coupled model as seen by its parent.
    pub fn declaration(&self) -> ModelDeclaration {
        let mut decl = ModelDeclaration::new();
        for et in self.imported_events.keys() {
            decl = decl.with_imported_event(et.clone());
        }
        for et in self.reexported_events.keys() {
            decl = decl.with_exported_event(et.clone());
        }
        for (name, imported) in &self.imported_vars {
            decl = decl.with_imported_variable(name.clone(), imported.var_type.clone());
        }
        for (name, reexported) in &self.reexported_vars {
            decl = decl.with_exported_variable(name.clone(), reexported.var_type.clone());
        }
        decl
    }

    fn error(&self, reason: impl Into<String>) -> SimError {
        SimError::wiring(self.uri.clone(), reason)
    }

    fn require_submodel(&self, uri: &str, context: &str) -> SimResult<()> {
        if self.submodels.contains(uri) {
            Ok(())
        } else {
            Err(self.error(format!("{context} references unknown submodel {uri}")))
        }
    }

    fn check_internal_consistency(&self) -> SimResult<()> {
        if self.submodels.is_empty() {
            return Err(self.error("no submodels"));
        }
        if self.submodels.contains(&self.uri) {
            return Err(self.error("a coupled model cannot contain itself"));
        }

        for (et, sinks) in &self.imported_events {
            if self.reexported_events.contains_key(et) {
                return Err(self.error(format!("event {et} is both imported and reexported")));
            }
            for sink in sinks {
                self.require_submodel(&sink.model_uri, &format!("imported event {et}"))?;
            }
        }

        for (et, re) in &self.reexported_events {
            self.require_submodel(&re.source.model_uri, &format!("reexported event {et}"))?;
        }

        for (source, sinks) in &self.event_connections {
            let context = format!("connection from {}:{}", source.model_uri, source.event_type);
            self.require_submodel(&source.model_uri, &context)?;
            for sink in sinks {
                self.require_submodel(&sink.model_uri, &context)?;
                if sink.model_uri == source.model_uri {
                    return Err(self.error(format!("{context} loops back to its source")));
                }
            }
        }

        for (name, imported) in &self.imported_vars {
            if self.reexported_vars.contains_key(name) {
                return Err(self.error(format!("variable {name} is both imported and reexported")));
            }
            for sink in &imported.sinks {
                self.require_submodel(&sink.model_uri, &format!("imported variable {name}"))?;
                if sink.var_type != imported.var_type {
                    return Err(self.error(format!(
                        "imported variable {name} of type {} dispatched to {}:{} of type {}",
                        imported.var_type, sink.model_uri, sink.name, sink.var_type
                    )));
                }
            }
        }

        for (name, re) in &self.reexported_vars {
            self.require_submodel(&re.source.model_uri, &format!("reexported variable {name}"))?;
            if re.source.var_type != re.var_type {
                return Err(self.error(format!(
                    "reexported variable {name} of type {} taken from {}:{} of type {}",
                    re.var_type, re.source.model_uri, re.source.name, re.source.var_type
                )));
            }
        }

        for (source, sinks) in &self.bindings {
            let context = format!("binding from {}:{}", source.model_uri, source.name);
            self.require_submodel(&source.model_uri, &context)?;
            for sink in sinks {
                self.require_submodel(&sink.model_uri, &context)?;
                if sink.var_type != source.var_type {
                    return Err(self.error(format!(
                        "{context} of type {} bound to {}:{} of type {}",
                        source.var_type, sink.model_uri, sink.name, sink.var_type
                    )));
                }
            }
        }

        Ok(())
    }
}

/// Builder for [`CoupledModelDescriptor`].
#[derive(Debug)]
pub struct CoupledModelBuilder {
    uri: ModelUri,
    submodels: BTreeSet<ModelUri>,
    imported_events: BTreeMap<EventType, Vec<EventSink>>,
    reexported_events: BTreeMap<EventType, ReexportedEvent>,
    event_connections: BTreeMap<EventSource, Vec<EventSink>>,
    imported_vars: BTreeMap<String, ImportedVariable>,
    reexported_vars: BTreeMap<String, ReexportedVariable>,
    bindings: BTreeMap<VariableSource, Vec<VariableSink>>,
}

impl CoupledModelBuilder {
    pub fn submodel(mut self, uri: impl Into<ModelUri>) -> Self {
        self.submodels.insert(uri.into());
        self
    }

    pub fn submodels<I, S>(mut self, uris: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<ModelUri>,
    {
        self.submodels.extend(uris.into_iter().map(Into::into));
        self
    }

    /// Connects a submodel output to a submodel input.
    pub fn connect(mut self, source: EventSource, sink: EventSink) -> Self {
        self.event_connections.entry(source).or_default().push(sink);
        self
    }

    /// Dispatches an event received by the coupled model to a submodel.
    pub fn import_event(mut self, event_type: EventType, sink: EventSink) -> Self {
        self.imported_events.entry(event_type).or_default().push(sink);
        self
    }

    /// Exposes a submodel output as an output of the coupled model.
    pub fn reexport_event(mut self, event_type: EventType, reexported: ReexportedEvent) -> Self {
        self.reexported_events.insert(event_type, reexported);
        self
    }

    pub fn bind(mut self, source: VariableSource, sink: VariableSink) -> Self {
        self.bindings.entry(source).or_default().push(sink);
        self
    }

    /// Dispatches a variable imported by the coupled model to a submodel.
    pub fn import_variable(mut self, name: impl Into<String>, var_type: VarType, sink: VariableSink) -> Self {
        self.imported_vars
            .entry(name.into())
            .or_insert_with(|| ImportedVariable {
                var_type,
                sinks: Vec::new(),
            })
            .sinks
            .push(sink);
        self
    }

    /// Exposes a submodel variable as a variable of the coupled model.
    pub fn reexport_variable(mut self, name: impl Into<String>, source: VariableSource) -> Self {
        self.reexported_vars.insert(
            name.into(),
            ReexportedVariable {
                var_type: source.var_type.clone(),
                source,
            },
        );
        self
    }

    /// Checks internal consistency and builds the descriptor.
    pub fn build(self) -> SimResult<CoupledModelDescriptor> {
        CoupledModelDescriptor::new(
            self.uri,
            self.submodels,
            self.imported_events,
            self.reexported_events,
            self.event_connections,
            self.imported_vars,
            self.reexported_vars,
            self.bindings,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TICK: EventType = EventType::new("Tick");
    const SAMPLE: EventType = EventType::new("Sample");

    fn f64_type() -> VarType {
        VarType::of::<f64>()
    }

    #[test]
    fn test_valid_descriptor() {
        let desc = CoupledModelDescriptor::builder("plant")
            .submodels(["heater", "sensor"])
            .connect(EventSource::new("heater", TICK), EventSink::new("sensor", SAMPLE))
            .bind(
                VariableSource::new("heater", "temperature", f64_type()),
                VariableSink::new("sensor", "input", f64_type()).causal(),
            )
            .reexport_event(TICK, ReexportedEvent::new(EventSource::new("heater", TICK)))
            .reexport_variable("temperature", VariableSource::new("heater", "temperature", f64_type()))
            .build()
            .unwrap();

        let decl = desc.declaration();
        assert!(decl.exports_event(&TICK));
        assert!(decl.exported_variable("temperature").is_some());
        assert_eq!(desc.submodels().len(), 2);
    }

    #[test]
    fn test_binding_to_unknown_submodel_rejected() {
        let err = CoupledModelDescriptor::builder("plant")
            .submodels(["heater", "sensor"])
            .bind(
                VariableSource::new("heater", "temperature", f64_type()),
                VariableSink::new("thermometer", "input", f64_type()),
            )
            .build()
            .unwrap_err();
        assert!(err.is_configuration());
        assert!(err.to_string().contains("thermometer"));
    }

    #[test]
    fn test_import_and_reexport_clash() {
        let err = CoupledModelDescriptor::builder("plant")
            .submodels(["heater", "sensor"])
            .import_event(TICK, EventSink::new("sensor", TICK))
            .reexport_event(TICK, ReexportedEvent::new(EventSource::new("heater", TICK)))
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("both imported and reexported"));
    }

    #[test]
    fn test_binding_type_mismatch() {
        let err = CoupledModelDescriptor::builder("plant")
            .submodels(["heater", "sensor"])
            .bind(
                VariableSource::new("heater", "temperature", f64_type()),
                VariableSink::new("sensor", "input", VarType::of::<bool>()),
            )
            .build()
            .unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_empty_coupled_rejected() {
        assert!(CoupledModelDescriptor::builder("empty").build().is_err());
    }

    #[test]
    fn test_self_connection_rejected() {
        let err = CoupledModelDescriptor::builder("plant")
            .submodels(["heater"])
            .connect(EventSource::new("heater", TICK), EventSink::new("heater", SAMPLE))
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("loops back"));
    }
}
