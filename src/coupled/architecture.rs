//! Whole-architecture checks and composition.
//!
//! An [`Architecture`] gathers the descriptors of every model of a tree,
//! checks the wiring against the declarations of the submodels, resolves
//! variable bindings down to atomic models and rejects causal cycles. Only
//! then are model objects created; any failure aborts the composition.

use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info};

use crate::coupled::descriptor::{AtomicModelDescriptor, CoupledModelDescriptor, EventSource};
use crate::coupled::routing::{Hop, Route};
use crate::error::{ConfigurationError, SimError, SimResult};
use crate::event::EventType;
use crate::hioa::{check_causal_acyclic, CausalDependency, ResolvedBinding};
use crate::model::{ModelDeclaration, ModelReport};
use crate::simulator::{AtomicSimulator, CoupledSimulator, RootCoordinator, SharedAtomic, Simulator};
use crate::stats::TransitionStats;
use crate::time::TimeUnit;
use crate::types::{ModelUri, VarType};

/// What [`Architecture::compose`] builds.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompositionMode {
    /// Atomic engines plus flattened routing tables; each atomic engine is
    /// driven on its own (real-time runs).
    Structural,
    /// A coupled simulator usable as a black-box submodel.
    Atomic,
    /// A root coordinator running the tree in simulated time.
    Coordinator,
}

/// Result of a composition.
pub enum Composite {
    Structural(StructuralModel),
    Atomic(Box<dyn Simulator>),
    Coordinator(RootCoordinator),
}

/// Shape of the model tree, used to nest the final reports.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ModelTree {
    Atomic(ModelUri),
    Coupled { uri: ModelUri, children: Vec<ModelTree> },
}

impl ModelTree {
    pub fn uri(&self) -> &str {
        match self {
            ModelTree::Atomic(uri) => uri,
            ModelTree::Coupled { uri, .. } => uri,
        }
    }

    /// Nests atomic reports following the tree. Atomic models without a
    /// report get an empty one.
    pub fn assemble(&self, reports: &BTreeMap<ModelUri, ModelReport>) -> ModelReport {
        match self {
            ModelTree::Atomic(uri) => reports.get(uri).cloned().unwrap_or_else(|| {
                ModelReport::atomic(uri.clone(), TransitionStats::default(), serde_json::Value::Null)
            }),
            ModelTree::Coupled { uri, children } => {
                ModelReport::composite(uri.clone(), children.iter().map(|c| c.assemble(reports)).collect())
            }
        }
    }
}

/// Flattened architecture: atomic engines and the routes between them.
///
/// Every route goes from an atomic emitter straight to an atomic receiver;
/// the hops record the couplings crossed on the way, with their converters.
pub struct StructuralModel {
    root: ModelUri,
    time_unit: TimeUnit,
    atomics: Vec<SharedAtomic>,
    routes: BTreeMap<EventSource, Vec<Route>>,
    host_routes: BTreeMap<EventSource, Vec<Route>>,
    external_routes: BTreeMap<EventType, Vec<Route>>,
    tree: ModelTree,
    bindings: Vec<ResolvedBinding>,
}

impl StructuralModel {
    pub fn root_uri(&self) -> &str {
        &self.root
    }

    pub fn time_unit(&self) -> TimeUnit {
        self.time_unit
    }

    pub fn atomics(&self) -> &[SharedAtomic] {
        &self.atomics
    }

    pub fn atomic(&self, uri: &str) -> Option<&SharedAtomic> {
        self.atomics.iter().find(|a| a.uri() == uri)
    }

    /// Routes between atomic models.
    pub fn routes(&self) -> &BTreeMap<EventSource, Vec<Route>> {
        &self.routes
    }

    pub fn routes_from(&self, source: &EventSource) -> &[Route] {
        self.routes.get(source).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Atomic outputs that leave the root model. The route's sink is the
    /// root URI and the last hop gives the type seen by the host.
    pub fn host_routes(&self) -> &BTreeMap<EventSource, Vec<Route>> {
        &self.host_routes
    }

    /// Routes of an event injected into the root model.
    pub fn external_routes(&self, event_type: &EventType) -> &[Route] {
        self.external_routes.get(event_type).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn tree(&self) -> &ModelTree {
        &self.tree
    }

    pub fn bindings(&self) -> &[ResolvedBinding] {
        &self.bindings
    }

    pub fn assemble_report(&self, reports: &BTreeMap<ModelUri, ModelReport>) -> ModelReport {
        self.tree.assemble(reports)
    }
}

/// A checked model tree, ready to be composed any number of times.
#[derive(Debug)]
pub struct Architecture {
    root: ModelUri,
    time_unit: TimeUnit,
    atomics: BTreeMap<ModelUri, AtomicModelDescriptor>,
    coupleds: BTreeMap<ModelUri, CoupledModelDescriptor>,
    parents: BTreeMap<ModelUri, ModelUri>,
    bindings: Vec<ResolvedBinding>,
}

impl Architecture {
    /// Checks the whole tree rooted at `root`.
    pub fn new(
        root: impl Into<ModelUri>,
        atomics: Vec<AtomicModelDescriptor>,
        coupleds: Vec<CoupledModelDescriptor>,
        time_unit: TimeUnit,
    ) -> SimResult<Self> {
        let root = root.into();
        let mut atomic_map = BTreeMap::new();
        for desc in atomics {
            let uri = desc.uri.clone();
            if atomic_map.insert(uri.clone(), desc).is_some() {
                return Err(SimError::wiring(uri, "declared more than once"));
            }
        }
        let mut coupled_map = BTreeMap::new();
        for desc in coupleds {
            let uri = desc.uri().to_string();
            if atomic_map.contains_key(&uri) || coupled_map.insert(uri.clone(), desc).is_some() {
                return Err(SimError::wiring(uri, "declared more than once"));
            }
        }
        if !atomic_map.contains_key(&root) && !coupled_map.contains_key(&root) {
            return Err(ConfigurationError::UnknownModel(root).into());
        }

        let mut arch = Self {
            root,
            time_unit,
            atomics: atomic_map,
            coupleds: coupled_map,
            parents: BTreeMap::new(),
            bindings: Vec::new(),
        };
        arch.check_tree()?;
        arch.check_wiring()?;
        arch.bindings = arch.resolve_bindings()?;
        let dependencies: Vec<CausalDependency> = arch
            .bindings
            .iter()
            .filter(|b| b.causal)
            .map(|b| CausalDependency::new(b.importer.clone(), b.exporter.clone()))
            .collect();
        check_causal_acyclic(&dependencies)?;

        debug!(
            root = %arch.root,
            atomics = arch.atomics.len(),
            coupleds = arch.coupleds.len(),
            bindings = arch.bindings.len(),
            "architecture checked"
        );
        Ok(arch)
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    pub fn time_unit(&self) -> TimeUnit {
        self.time_unit
    }

    pub fn atomic_descriptor(&self, uri: &str) -> Option<&AtomicModelDescriptor> {
        self.atomics.get(uri)
    }

    pub fn coupled_descriptor(&self, uri: &str) -> Option<&CoupledModelDescriptor> {
        self.coupleds.get(uri)
    }

    pub fn atomic_uris(&self) -> impl Iterator<Item = &str> {
        self.atomics.keys().map(String::as_str)
    }

    pub fn parent_of(&self, uri: &str) -> Option<&str> {
        self.parents.get(uri).map(String::as_str)
    }

    /// Variable bindings resolved to atomic exporters and importers.
    pub fn bindings(&self) -> &[ResolvedBinding] {
        &self.bindings
    }

    /// Interface of `uri`: static for atomic models, derived for coupled ones.
    pub fn declaration_of(&self, uri: &str) -> Option<ModelDeclaration> {
        if let Some(atomic) = self.atomics.get(uri) {
            return Some(atomic.declaration.clone());
        }
        self.coupleds.get(uri).map(CoupledModelDescriptor::declaration)
    }

    fn check_tree(&mut self) -> SimResult<()> {
        for (parent, desc) in &self.coupleds {
            for child in desc.submodels() {
                if !self.atomics.contains_key(child) && !self.coupleds.contains_key(child) {
                    return Err(ConfigurationError::UnknownModel(child.clone()).into());
                }
                if let Some(previous) = self.parents.insert(child.clone(), parent.clone()) {
                    return Err(SimError::wiring(
                        child.clone(),
                        format!("submodel of both {previous} and {parent}"),
                    ));
                }
            }
        }
        if let Some(parent) = self.parents.get(&self.root) {
            return Err(SimError::wiring(
                self.root.clone(),
                format!("the root is a submodel of {parent}"),
            ));
        }

        let mut reached = BTreeSet::new();
        let mut stack = vec![self.root.clone()];
        while let Some(uri) = stack.pop() {
            if !reached.insert(uri.clone()) {
                continue;
            }
            if let Some(desc) = self.coupleds.get(&uri) {
                stack.extend(desc.submodels().iter().cloned());
            }
        }
        let unreached = self
            .atomics
            .keys()
            .chain(self.coupleds.keys())
            .find(|uri| !reached.contains(*uri));
        match unreached {
            Some(uri) => Err(SimError::wiring(uri.clone(), "not reachable from the root")),
            None => Ok(()),
        }
    }

    fn declaration_or_err(&self, uri: &str) -> SimResult<ModelDeclaration> {
        self.declaration_of(uri)
            .ok_or_else(|| ConfigurationError::UnknownModel(uri.to_string()).into())
    }

    /// Checks every coupling against the interfaces of the models it joins.
    fn check_wiring(&self) -> SimResult<()> {
        for (uri, desc) in &self.coupleds {
            let fail = |reason: String| SimError::wiring(uri.clone(), reason);

            for (source, sinks) in desc.event_connections() {
                let from = self.declaration_or_err(&source.model_uri)?;
                if !from.exports_event(&source.event_type) {
                    return Err(fail(format!(
                        "{} does not export {}",
                        source.model_uri, source.event_type
                    )));
                }
                for sink in sinks {
                    if !self.declaration_or_err(&sink.model_uri)?.imports_event(&sink.event_type) {
                        return Err(fail(format!("{} does not import {}", sink.model_uri, sink.event_type)));
                    }
                }
            }

            for (et, sinks) in desc.imported_events() {
                for sink in sinks {
                    if !self.declaration_or_err(&sink.model_uri)?.imports_event(&sink.event_type) {
                        return Err(fail(format!(
                            "imported event {et} dispatched to {} which does not import {}",
                            sink.model_uri, sink.event_type
                        )));
                    }
                }
            }

            for (et, re) in desc.reexported_events() {
                if !self
                    .declaration_or_err(&re.source.model_uri)?
                    .exports_event(&re.source.event_type)
                {
                    return Err(fail(format!(
                        "reexported event {et} taken from {} which does not export {}",
                        re.source.model_uri, re.source.event_type
                    )));
                }
            }

            for (source, sinks) in desc.bindings() {
                self.check_exported_var(uri, &source.model_uri, &source.name, &source.var_type)?;
                for sink in sinks {
                    self.check_imported_var(uri, &sink.model_uri, &sink.name, &sink.var_type)?;
                }
            }

            for imported in desc.imported_vars().values() {
                for sink in &imported.sinks {
                    self.check_imported_var(uri, &sink.model_uri, &sink.name, &sink.var_type)?;
                }
            }

            for re in desc.reexported_vars().values() {
                self.check_exported_var(uri, &re.source.model_uri, &re.source.name, &re.source.var_type)?;
            }
        }

        let root_decl = self.declaration_or_err(&self.root)?;
        if let Some(var) = root_decl.imported_variables().next() {
            return Err(SimError::wiring(
                self.root.clone(),
                format!("the root imports variable {}, which nothing can export", var.name),
            ));
        }
        Ok(())
    }

    fn check_exported_var(&self, coupled: &str, model: &str, name: &str, var_type: &VarType) -> SimResult<()> {
        match self.declaration_or_err(model)?.exported_variable(name) {
            None => Err(SimError::wiring(coupled, format!("{model} does not export variable {name}"))),
            Some(var) if &var.var_type != var_type => Err(SimError::wiring(
                coupled,
                format!("{model} exports {name} as {}, wired as {var_type}", var.var_type),
            )),
            Some(_) => Ok(()),
        }
    }

    fn check_imported_var(&self, coupled: &str, model: &str, name: &str, var_type: &VarType) -> SimResult<()> {
        match self.declaration_or_err(model)?.imported_variable(name) {
            None => Err(SimError::wiring(coupled, format!("{model} does not import variable {name}"))),
            Some(var) if &var.var_type != var_type => Err(SimError::wiring(
                coupled,
                format!("{model} imports {name} as {}, wired as {var_type}", var.var_type),
            )),
            Some(_) => Ok(()),
        }
    }

    /// Follows reexports down to the atomic model owning `name`.
    fn resolve_exporter(&self, model: &str, name: &str) -> SimResult<(ModelUri, String)> {
        if self.atomics.contains_key(model) {
            return Ok((model.to_string(), name.to_string()));
        }
        let desc = self
            .coupleds
            .get(model)
            .ok_or_else(|| ConfigurationError::UnknownModel(model.to_string()))?;
        let re = desc
            .reexported_vars()
            .get(name)
            .ok_or_else(|| SimError::wiring(model, format!("does not reexport variable {name}")))?;
        self.resolve_exporter(&re.source.model_uri, &re.source.name)
    }

    /// Follows imports down to the atomic models reading `name`.
    fn resolve_importers(&self, model: &str, name: &str, causal: bool, out: &mut Vec<(ModelUri, String, bool)>) -> SimResult<()> {
        if self.atomics.contains_key(model) {
            out.push((model.to_string(), name.to_string(), causal));
            return Ok(());
        }
        let desc = self
            .coupleds
            .get(model)
            .ok_or_else(|| ConfigurationError::UnknownModel(model.to_string()))?;
        let imported = desc
            .imported_vars()
            .get(name)
            .ok_or_else(|| SimError::wiring(model, format!("does not import variable {name}")))?;
        for sink in &imported.sinks {
            self.resolve_importers(&sink.model_uri, &sink.name, causal || sink.causal, out)?;
        }
        Ok(())
    }

    /// Resolves every binding to atomic endpoints and checks each atomic
    /// import is bound exactly once.
    fn resolve_bindings(&self) -> SimResult<Vec<ResolvedBinding>> {
        let mut resolved = Vec::new();
        for desc in self.coupleds.values() {
            for (source, sinks) in desc.bindings() {
                let (exporter, exported_name) = self.resolve_exporter(&source.model_uri, &source.name)?;
                let mut importers = Vec::new();
                for sink in sinks {
                    self.resolve_importers(&sink.model_uri, &sink.name, sink.causal, &mut importers)?;
                }
                for (importer, imported_name, causal) in importers {
                    resolved.push(ResolvedBinding {
                        exporter: exporter.clone(),
                        exported_name: exported_name.clone(),
                        importer,
                        imported_name,
                        causal,
                    });
                }
            }
        }
        resolved.sort();

        let mut seen: BTreeMap<(&str, &str), usize> = BTreeMap::new();
        for b in &resolved {
            *seen.entry((b.importer.as_str(), b.imported_name.as_str())).or_default() += 1;
        }
        for (uri, desc) in &self.atomics {
            for var in desc.declaration.imported_variables() {
                let reason = match seen.get(&(uri.as_str(), var.name.as_str())) {
                    None => "not bound to any exporter",
                    Some(1) => continue,
                    Some(_) => "bound to more than one exporter",
                };
                return Err(ConfigurationError::Binding {
                    model: uri.clone(),
                    variable: var.name.clone(),
                    reason: reason.to_string(),
                }
                .into());
            }
        }
        Ok(resolved)
    }

    fn tree_of(&self, uri: &str) -> ModelTree {
        match self.coupleds.get(uri) {
            Some(desc) => ModelTree::Coupled {
                uri: uri.to_string(),
                children: desc.submodels().iter().map(|c| self.tree_of(c)).collect(),
            },
            None => ModelTree::Atomic(uri.to_string()),
        }
    }

    /// Atomic receivers of `event_type` entering `model`.
    fn resolve_event_sinks(&self, model: &str, event_type: &EventType, hops: Vec<Hop>, out: &mut Vec<Route>) {
        let Some(desc) = self.coupleds.get(model) else {
            out.push(Route::new(model, hops));
            return;
        };
        if let Some(sinks) = desc.imported_events().get(event_type) {
            for sink in sinks {
                let mut next = hops.clone();
                next.push(sink.hop());
                self.resolve_event_sinks(&sink.model_uri, &sink.event_type, next, out);
            }
        }
    }

    /// Flattened routes of an atomic output: to atomic receivers, and to the
    /// host when the event leaves the root.
    fn flatten_output(&self, atomic: &str, event_type: &EventType) -> (Vec<Route>, Vec<Route>) {
        let mut routes = Vec::new();
        let mut host = Vec::new();
        let mut frontier = vec![(atomic.to_string(), event_type.clone(), Vec::<Hop>::new())];
        while let Some((uri, et, hops)) = frontier.pop() {
            let Some(parent) = self.parents.get(&uri) else {
                host.push(Route::new(uri, hops));
                continue;
            };
            let Some(desc) = self.coupleds.get(parent) else {
                continue;
            };
            if let Some(sinks) = desc.event_connections().get(&EventSource::new(uri.clone(), et.clone())) {
                for sink in sinks {
                    let mut next = hops.clone();
                    next.push(sink.hop());
                    self.resolve_event_sinks(&sink.model_uri, &sink.event_type, next, &mut routes);
                }
            }
            for (parent_type, re) in desc.reexported_events() {
                if re.source.model_uri == uri && re.source.event_type == et {
                    let mut next = hops.clone();
                    next.push(Hop::new(parent_type.clone(), re.converter.clone()));
                    frontier.push((parent.clone(), parent_type.clone(), next));
                }
            }
        }
        (routes, host)
    }

    fn instantiate_atomics(&self) -> SimResult<BTreeMap<ModelUri, SharedAtomic>> {
        let mut engines = BTreeMap::new();
        for (uri, desc) in &self.atomics {
            let model = desc.instantiate()?;
            engines.insert(uri.clone(), SharedAtomic::new(AtomicSimulator::new(model, self.time_unit)));
        }
        Ok(engines)
    }

    /// Hands each importer the exporter's placeholder, wrapped with the
    /// exporter's refresh handle for causal bindings.
    fn bind_variables(&self, engines: &BTreeMap<ModelUri, SharedAtomic>) -> SimResult<()> {
        let engine = |uri: &str| {
            engines
                .get(uri)
                .ok_or_else(|| SimError::from(ConfigurationError::UnknownModel(uri.to_string())))
        };
        for b in &self.bindings {
            let exporter = engine(&b.exporter)?;
            let importer = engine(&b.importer)?;
            let binding_error = |reason: String| {
                SimError::from(ConfigurationError::Binding {
                    model: b.importer.clone(),
                    variable: b.imported_name.clone(),
                    reason,
                })
            };

            let shared = exporter.lock().exported_value(&b.exported_name).ok_or_else(|| {
                binding_error(format!("{} provides no value for {}", b.exporter, b.exported_name))
            })?;
            if let Some(declared) = exporter.declaration().exported_variable(&b.exported_name) {
                if shared.var_type() != &declared.var_type {
                    return Err(binding_error(format!(
                        "{} declares {} as {} but provides {}",
                        b.exporter,
                        b.exported_name,
                        declared.var_type,
                        shared.var_type()
                    )));
                }
            }
            let shared = if b.causal {
                shared.with_refresher(exporter.causal_target())
            } else {
                shared
            };
            importer.lock().bind_imported_value(&b.imported_name, shared)?;
        }
        Ok(())
    }

    fn materialise(&self) -> SimResult<BTreeMap<ModelUri, SharedAtomic>> {
        let engines = self.instantiate_atomics()?;
        self.bind_variables(&engines)?;
        Ok(engines)
    }

    fn build_simulator(&self, uri: &str, engines: &BTreeMap<ModelUri, SharedAtomic>) -> SimResult<Box<dyn Simulator>> {
        if let Some(engine) = engines.get(uri) {
            return Ok(Box::new(engine.clone()));
        }
        let desc = self
            .coupleds
            .get(uri)
            .ok_or_else(|| ConfigurationError::UnknownModel(uri.to_string()))?;
        let children = desc
            .submodels()
            .iter()
            .map(|child| self.build_simulator(child, engines))
            .collect::<SimResult<Vec<_>>>()?;
        Ok(Box::new(CoupledSimulator::new(desc, children, self.time_unit)?))
    }

    /// Creates fresh model instances and wires them in `mode`.
    pub fn compose(&self, mode: CompositionMode) -> SimResult<Composite> {
        let composite = match mode {
            CompositionMode::Structural => Composite::Structural(self.structural()?),
            CompositionMode::Atomic => Composite::Atomic(self.simulator()?),
            CompositionMode::Coordinator => Composite::Coordinator(self.coordinator()?),
        };
        info!(root = %self.root, mode = ?mode, "architecture composed");
        Ok(composite)
    }

    pub fn structural(&self) -> SimResult<StructuralModel> {
        let engines = self.materialise()?;

        let mut routes = BTreeMap::new();
        let mut host_routes = BTreeMap::new();
        for (uri, desc) in &self.atomics {
            for et in &desc.declaration.exported_events {
                let (to_models, to_host) = self.flatten_output(uri, et);
                let source = EventSource::new(uri.clone(), et.clone());
                if !to_models.is_empty() {
                    routes.insert(source.clone(), to_models);
                }
                if !to_host.is_empty() {
                    host_routes.insert(source, to_host);
                }
            }
        }

        let mut external_routes = BTreeMap::new();
        for et in &self.declaration_or_err(&self.root)?.imported_events {
            let mut out = Vec::new();
            self.resolve_event_sinks(&self.root, et, Vec::new(), &mut out);
            external_routes.insert(et.clone(), out);
        }

        Ok(StructuralModel {
            root: self.root.clone(),
            time_unit: self.time_unit,
            atomics: engines.into_values().collect(),
            routes,
            host_routes,
            external_routes,
            tree: self.tree_of(&self.root),
            bindings: self.bindings.clone(),
        })
    }

    /// The root as one simulator, hierarchical like the descriptors.
    pub fn simulator(&self) -> SimResult<Box<dyn Simulator>> {
        let engines = self.materialise()?;
        self.build_simulator(&self.root, &engines)
    }

    pub fn coordinator(&self) -> SimResult<RootCoordinator> {
        Ok(RootCoordinator::new(self.simulator()?))
    }
}
