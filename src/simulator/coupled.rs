//! Coupled simulator: a coupled model driven as one black-box submodel.
//!
//! The coupled simulator keeps its children's engines and routes events
//! between them with static influencee tables built from the descriptor.
//! Its own time of next event is the minimum over its children.
//!
//! With the `parallel` feature, children that transition at the same instant
//! are transitioned concurrently with rayon.

use std::collections::HashMap;
use tracing::trace;

#[cfg(feature = "parallel")]
use rayon::prelude::*;

use crate::coupled::descriptor::CoupledModelDescriptor;
use crate::coupled::routing::Hop;
use crate::error::{SimError, SimResult};
use crate::event::{Event, EventType};
use crate::model::{ModelDeclaration, ModelReport, VariableInit};
use crate::params::RunParameters;
use crate::simulator::Simulator;
use crate::time::{SimTime, TimeUnit};
use crate::types::ModelUri;

/// Statistics collected by the coupled simulator.
#[derive(Clone, Debug, Default)]
pub struct CoupledStats {
    /// Rounds (output + transition) executed
    pub rounds: u64,
    /// Events routed between children
    pub internal_events: u64,
    /// Events received from the parent
    pub imported_events: u64,
    /// Events passed up to the parent
    pub exported_events: u64,
}

/// Engine of one coupled model.
pub struct CoupledSimulator {
    uri: ModelUri,
    declaration: ModelDeclaration,
    children: Vec<Box<dyn Simulator>>,
    /// (child, output type) -> children receiving it
    internal: HashMap<(usize, EventType), Vec<(usize, Hop)>>,
    /// (child, output type) -> types under which the parent sees it
    reexports: HashMap<(usize, EventType), Vec<Hop>>,
    /// Imported type -> children receiving it
    imports: HashMap<EventType, Vec<(usize, Hop)>>,
    time_of_last_event: SimTime,
    time_of_next_event: SimTime,
    stats: CoupledStats,
}

impl CoupledSimulator {
    /// Builds the simulator from a descriptor and the engines of its
    /// submodels, in any order.
    pub fn new(
        descriptor: &CoupledModelDescriptor,
        children: Vec<Box<dyn Simulator>>,
        time_unit: TimeUnit,
    ) -> SimResult<Self> {
        let index: HashMap<ModelUri, usize> = children
            .iter()
            .enumerate()
            .map(|(i, c)| (c.uri().to_string(), i))
            .collect();
        let lookup = |uri: &str| -> SimResult<usize> {
            index.get(uri).copied().ok_or_else(|| {
                SimError::wiring(descriptor.uri(), format!("no engine for submodel {uri}"))
            })
        };
        for uri in descriptor.submodels() {
            lookup(uri)?;
        }

        let mut internal: HashMap<(usize, EventType), Vec<(usize, Hop)>> = HashMap::new();
        for (source, sinks) in descriptor.event_connections() {
            let from = lookup(&source.model_uri)?;
            let entry = internal.entry((from, source.event_type.clone())).or_default();
            for sink in sinks {
                entry.push((lookup(&sink.model_uri)?, sink.hop()));
            }
        }

        let mut reexports: HashMap<(usize, EventType), Vec<Hop>> = HashMap::new();
        for (parent_type, re) in descriptor.reexported_events() {
            let from = lookup(&re.source.model_uri)?;
            reexports
                .entry((from, re.source.event_type.clone()))
                .or_default()
                .push(Hop::new(parent_type.clone(), re.converter.clone()));
        }

        let mut imports: HashMap<EventType, Vec<(usize, Hop)>> = HashMap::new();
        for (et, sinks) in descriptor.imported_events() {
            let entry = imports.entry(et.clone()).or_default();
            for sink in sinks {
                entry.push((lookup(&sink.model_uri)?, sink.hop()));
            }
        }

        Ok(Self {
            uri: descriptor.uri().to_string(),
            declaration: descriptor.declaration(),
            children,
            internal,
            reexports,
            imports,
            time_of_last_event: SimTime::zero(time_unit),
            time_of_next_event: SimTime::infinity(time_unit),
            stats: CoupledStats::default(),
        })
    }

    pub fn stats(&self) -> &CoupledStats {
        &self.stats
    }

    pub fn child_count(&self) -> usize {
        self.children.len()
    }

    fn recompute_next(&mut self) {
        self.time_of_next_event = self
            .children
            .iter()
            .map(|c| c.time_of_next_event())
            .fold(SimTime::infinity(self.time_of_next_event.unit()), SimTime::min);
    }

    fn deliver(&mut self, deliveries: Vec<(usize, Event)>) -> SimResult<()> {
        let mut by_child: HashMap<usize, Vec<Event>> = HashMap::new();
        for (child, event) in deliveries {
            by_child.entry(child).or_default().push(event);
        }
        let mut targets: Vec<_> = by_child.into_iter().collect();
        targets.sort_by_key(|(child, _)| *child);
        for (child, events) in targets {
            self.children[child].store_input(events)?;
        }
        Ok(())
    }

    #[cfg(not(feature = "parallel"))]
    fn transition_children(&mut self, active: &[usize], now: SimTime) -> SimResult<()> {
        for &i in active {
            self.children[i].transition(now)?;
        }
        Ok(())
    }

    #[cfg(feature = "parallel")]
    fn transition_children(&mut self, active: &[usize], now: SimTime) -> SimResult<()> {
        self.children
            .par_iter_mut()
            .enumerate()
            .filter(|(i, _)| active.binary_search(i).is_ok())
            .map(|(_, child)| child.transition(now))
            .collect::<SimResult<Vec<()>>>()
            .map(|_| ())
    }
}

impl Simulator for CoupledSimulator {
    fn uri(&self) -> &str {
        &self.uri
    }

    fn declaration(&self) -> &ModelDeclaration {
        &self.declaration
    }

    fn set_run_parameters(&mut self, params: &RunParameters) -> SimResult<()> {
        for child in &mut self.children {
            child.set_run_parameters(params)?;
        }
        Ok(())
    }

    fn initialise(&mut self, start: SimTime) -> SimResult<()> {
        for child in &mut self.children {
            child.initialise(start)?;
        }
        self.time_of_last_event = start;
        self.recompute_next();
        Ok(())
    }

    fn initialise_variables(&mut self, start: SimTime) -> SimResult<VariableInit> {
        let mut total = VariableInit::done();
        for child in &mut self.children {
            total.merge(child.initialise_variables(start)?);
        }
        Ok(total)
    }

    fn time_of_last_event(&self) -> SimTime {
        self.time_of_last_event
    }

    fn time_of_next_event(&self) -> SimTime {
        self.time_of_next_event
    }

    fn produce_output(&mut self, now: SimTime) -> SimResult<Vec<Event>> {
        if now != self.time_of_next_event {
            return Err(SimError::protocol(
                self.uri.clone(),
                format!("output requested at {now} but next event is at {}", self.time_of_next_event),
            ));
        }
        let mut deliveries = Vec::new();
        let mut exported = Vec::new();
        for i in 0..self.children.len() {
            if self.children[i].time_of_next_event() != now {
                continue;
            }
            for event in self.children[i].produce_output(now)? {
                let key = (i, event.event_type().clone());
                if let Some(sinks) = self.internal.get(&key) {
                    for (child, hop) in sinks {
                        deliveries.push((*child, hop.apply(&event)));
                    }
                }
                if let Some(hops) = self.reexports.get(&key) {
                    for hop in hops {
                        exported.push(hop.apply(&event));
                    }
                }
            }
        }
        self.stats.internal_events += deliveries.len() as u64;
        self.stats.exported_events += exported.len() as u64;
        self.deliver(deliveries)?;
        Ok(exported)
    }

    fn store_input(&mut self, events: Vec<Event>) -> SimResult<()> {
        let mut deliveries = Vec::new();
        for event in events {
            let sinks = self.imports.get(event.event_type()).ok_or_else(|| {
                SimError::protocol(
                    self.uri.clone(),
                    format!("received undeclared event {}", event.event_type()),
                )
            })?;
            for (child, hop) in sinks {
                deliveries.push((*child, hop.apply(&event)));
            }
        }
        self.stats.imported_events += deliveries.len() as u64;
        self.deliver(deliveries)
    }

    fn has_pending_input(&self) -> bool {
        self.children.iter().any(|c| c.has_pending_input())
    }

    fn transition(&mut self, now: SimTime) -> SimResult<()> {
        if now < self.time_of_last_event || now > self.time_of_next_event {
            return Err(SimError::protocol(
                self.uri.clone(),
                format!(
                    "transition at {now} outside [{}, {}]",
                    self.time_of_last_event, self.time_of_next_event
                ),
            ));
        }
        let active: Vec<usize> = self
            .children
            .iter()
            .enumerate()
            .filter(|(_, c)| c.time_of_next_event() == now || c.has_pending_input())
            .map(|(i, _)| i)
            .collect();
        if active.is_empty() {
            return Ok(());
        }
        trace!(model = %self.uri, time = %now, active = active.len(), "coupled transition");
        self.transition_children(&active, now)?;
        self.time_of_last_event = now;
        self.recompute_next();
        self.stats.rounds += 1;
        Ok(())
    }

    fn terminate(&mut self, end: SimTime) -> SimResult<ModelReport> {
        let mut reports = Vec::with_capacity(self.children.len());
        for child in &mut self.children {
            reports.push(child.terminate(end)?);
        }
        Ok(ModelReport::composite(self.uri.clone(), reports))
    }

    fn export_stats(&self) -> serde_json::Value {
        let children: Vec<_> = self.children.iter().map(|c| c.export_stats()).collect();
        serde_json::json!({
            "model": self.uri,
            "rounds": self.stats.rounds,
            "internal_events": self.stats.internal_events,
            "imported_events": self.stats.imported_events,
            "exported_events": self.stats.exported_events,
            "children": children,
        })
    }
}
