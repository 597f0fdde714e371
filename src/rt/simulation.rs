//! A real-time run of a whole architecture.

use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::coupled::architecture::StructuralModel;
use crate::error::{ConfigurationError, SimError, SimResult};
use crate::event::{Event, EventType};
use crate::model::{ModelReport, VariableInit};
use crate::params::RunParameters;
use crate::rt::clock::RtClock;
use crate::rt::engine::RtAtomicEngine;
use crate::rt::{RtConfig, TerminationLatch};
use crate::scheduler::Scheduler;
use crate::simulator::coordinator::initialise_variables_fixpoint;
use crate::stats::RtStats;
use crate::time::{SimDuration, SimTime};
use crate::types::ModelUri;

/// Builder for [`RtSimulation`].
pub struct RtSimulationBuilder {
    structure: StructuralModel,
    scheduler: Option<Arc<dyn Scheduler>>,
    config: RtConfig,
}

impl RtSimulationBuilder {
    pub fn scheduler(mut self, scheduler: Arc<dyn Scheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    pub fn config(mut self, config: RtConfig) -> Self {
        self.config = config;
        self
    }

    pub fn acceleration(mut self, factor: f64) -> Self {
        self.config.acceleration_factor = factor;
        self
    }

    /// Creates one engine per atomic model and wires the routes.
    pub fn build(self) -> SimResult<RtSimulation> {
        let scheduler = self.scheduler.ok_or(ConfigurationError::MissingScheduler)?;
        self.config.validate_for(scheduler.resolution())?;
        let structure = self.structure;
        let latch = Arc::new(TerminationLatch::new(structure.atomics().len()));

        let engines: BTreeMap<ModelUri, Arc<RtAtomicEngine>> = structure
            .atomics()
            .iter()
            .map(|atomic| {
                let engine = RtAtomicEngine::with_latch(atomic.clone(), Arc::clone(&scheduler), Arc::clone(&latch));
                (atomic.uri().to_string(), engine)
            })
            .collect();
        let engine = |uri: &str| {
            engines
                .get(uri)
                .ok_or_else(|| SimError::from(ConfigurationError::UnknownModel(uri.to_string())))
        };

        for (source, routes) in structure.routes() {
            let from = engine(&source.model_uri)?;
            for route in routes {
                from.add_influencee(source.event_type.clone(), engine(&route.sink)?, route.hops.clone());
            }
        }
        let host_outputs = Arc::new(Mutex::new(Vec::new()));
        for (source, routes) in structure.host_routes() {
            let from = engine(&source.model_uri)?;
            for route in routes {
                from.add_host_output(source.event_type.clone(), Arc::clone(&host_outputs), route.hops.clone());
            }
        }

        Ok(RtSimulation {
            structure,
            engines,
            scheduler,
            config: self.config,
            latch,
            host_outputs,
            clock: Mutex::new(None),
        })
    }
}

/// Real-time run of a structural composition.
///
/// Every atomic model gets its own [`RtAtomicEngine`]; the run starts them
/// against a common wall-clock origin and collects their reports once every
/// engine has terminated.
pub struct RtSimulation {
    structure: StructuralModel,
    engines: BTreeMap<ModelUri, Arc<RtAtomicEngine>>,
    scheduler: Arc<dyn Scheduler>,
    config: RtConfig,
    latch: Arc<TerminationLatch>,
    host_outputs: Arc<Mutex<Vec<Event>>>,
    clock: Mutex<Option<RtClock>>,
}

impl std::fmt::Debug for RtSimulation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RtSimulation")
            .field("root", &self.structure.root_uri())
            .field("engines", &self.engines.len())
            .finish_non_exhaustive()
    }
}

impl RtSimulation {
    pub fn builder(structure: StructuralModel) -> RtSimulationBuilder {
        RtSimulationBuilder {
            structure,
            scheduler: None,
            config: RtConfig::default(),
        }
    }

    pub fn structure(&self) -> &StructuralModel {
        &self.structure
    }

    pub fn config(&self) -> &RtConfig {
        &self.config
    }

    pub fn scheduler(&self) -> &Arc<dyn Scheduler> {
        &self.scheduler
    }

    pub fn engine(&self, uri: &str) -> Option<&Arc<RtAtomicEngine>> {
        self.engines.get(uri)
    }

    pub fn engines(&self) -> impl Iterator<Item = &Arc<RtAtomicEngine>> {
        self.engines.values()
    }

    /// Hands run parameters to every model. Must precede the start.
    pub fn set_run_parameters(&self, params: &RunParameters) -> SimResult<()> {
        for engine in self.engines.values() {
            engine.atomic().lock().set_run_parameters(params)?;
        }
        Ok(())
    }

    /// Starts the run `start_delay` from now on the scheduler's clock.
    /// Returns the wall-clock start.
    pub fn start(&self, start_sim: SimTime, duration: SimDuration) -> SimResult<Duration> {
        let start_wall = self.scheduler.now() + self.config.start_delay;
        self.start_at(start_wall, start_sim, duration)?;
        Ok(start_wall)
    }

    /// Initialises every model at `start_sim`, runs the variable fixpoint
    /// and starts every engine at wall-clock instant `start_wall`.
    pub fn start_at(&self, start_wall: Duration, start_sim: SimTime, duration: SimDuration) -> SimResult<()> {
        let clock = RtClock::new(
            start_wall,
            start_sim,
            duration,
            self.config.acceleration_factor,
            self.scheduler.resolution(),
        )?;
        // Held for the whole start: the run only counts as started once
        // every engine is.
        let mut current = self.clock.lock();
        if current.is_some() {
            return Err(SimError::protocol(self.structure.root_uri(), "run already started"));
        }
        let now = self.scheduler.now();
        if start_wall <= now {
            return Err(ConfigurationError::StartNotInFuture { start: start_wall, now }.into());
        }

        for engine in self.engines.values() {
            engine.atomic().lock().initialise(start_sim)?;
        }
        let rounds = initialise_variables_fixpoint(|| {
            let mut progress = VariableInit::new(0, 0);
            for engine in self.engines.values() {
                progress.merge(engine.atomic().lock().initialise_variables(start_sim)?);
            }
            Ok(progress)
        })?;
        let mut started: Vec<&Arc<RtAtomicEngine>> = Vec::with_capacity(self.engines.len());
        for engine in self.engines.values() {
            if let Err(e) = engine.start_real_time(start_wall, start_sim, duration, &self.config) {
                warn!(root = %self.structure.root_uri(), model = %engine.uri(), error = %e, "start failed, rolling back");
                for engine in started {
                    engine.abandon_start();
                }
                return Err(e);
            }
            started.push(engine);
        }
        *current = Some(clock);
        drop(current);
        info!(
            root = %self.structure.root_uri(),
            engines = self.engines.len(),
            start = %start_sim,
            end = %clock.end_sim(),
            acceleration = self.config.acceleration_factor,
            variable_rounds = rounds,
            "real-time simulation started"
        );
        Ok(())
    }

    pub fn clock(&self) -> Option<RtClock> {
        *self.clock.lock()
    }

    /// Simulated time matching the scheduler's clock.
    pub fn current_sim_time(&self) -> Option<SimTime> {
        let clock = (*self.clock.lock())?;
        Some(clock.sim_time_at(self.scheduler.now()).min(clock.end_sim()))
    }

    /// Injects an event into the root model now. Returns the number of
    /// atomic models it reached.
    pub fn inject(&self, event_type: EventType, payload: serde_json::Value) -> SimResult<usize> {
        let now = self
            .current_sim_time()
            .ok_or_else(|| SimError::protocol(self.structure.root_uri(), "injection before the start"))?;
        self.inject_event(Event::new(event_type, now, payload))
    }

    /// Injects an event into the root model at its own time of occurrence.
    pub fn inject_event(&self, event: Event) -> SimResult<usize> {
        let routes = self.structure.external_routes(event.event_type());
        if routes.is_empty() {
            return Err(SimError::protocol(
                self.structure.root_uri(),
                format!("root does not import {}", event.event_type()),
            ));
        }
        for route in routes {
            let engine = self
                .engines
                .get(&route.sink)
                .ok_or_else(|| ConfigurationError::UnknownModel(route.sink.clone()))?;
            engine.deliver(route.apply(&event))?;
        }
        Ok(routes.len())
    }

    /// Outputs of the root model collected so far.
    pub fn host_outputs(&self) -> Vec<Event> {
        self.host_outputs.lock().clone()
    }

    pub fn take_host_outputs(&self) -> Vec<Event> {
        std::mem::take(&mut *self.host_outputs.lock())
    }

    pub fn is_terminated(&self) -> bool {
        self.latch.is_released()
    }

    /// Blocks until every engine terminated or `timeout` elapsed.
    pub fn wait_for_termination(&self, timeout: Duration) -> bool {
        self.latch.wait(timeout)
    }

    /// Terminates every engine now, ahead of the end of the run.
    pub fn terminate_now(&self) -> SimResult<()> {
        let mut first = None;
        for engine in self.engines.values() {
            if let Err(e) = engine.terminate() {
                first.get_or_insert(e);
            }
        }
        match first {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Reports of a terminated run, nested like the model tree. Fails with
    /// the first failure recorded by an engine.
    pub fn finish(&self) -> SimResult<ModelReport> {
        if !self.is_terminated() {
            return Err(SimError::protocol(self.structure.root_uri(), "run not terminated"));
        }
        for engine in self.engines.values() {
            if let Some(failure) = engine.take_failure() {
                return Err(failure);
            }
        }
        let reports: BTreeMap<ModelUri, ModelReport> = self
            .engines
            .iter()
            .filter_map(|(uri, engine)| engine.report().map(|r| (uri.clone(), r)))
            .collect();
        Ok(self.structure.assemble_report(&reports))
    }

    /// Starts, waits at most `timeout` for the end of the run, then
    /// terminates whatever is still running and returns the report.
    pub fn run(&self, start_sim: SimTime, duration: SimDuration, timeout: Duration) -> SimResult<ModelReport> {
        self.start(start_sim, duration)?;
        if !self.wait_for_termination(timeout) {
            warn!(root = %self.structure.root_uri(), "run did not end in time, terminating");
            self.terminate_now()?;
        }
        self.finish()
    }

    pub fn rt_stats(&self) -> RtStats {
        let mut total = RtStats::default();
        for engine in self.engines.values() {
            total.merge(&engine.rt_stats());
        }
        total
    }

    pub fn export_stats(&self) -> serde_json::Value {
        let engines: serde_json::Map<String, serde_json::Value> = self
            .engines
            .iter()
            .map(|(uri, e)| (uri.clone(), e.export_stats()))
            .collect();
        serde_json::json!({
            "root": self.structure.root_uri(),
            "rt": self.rt_stats(),
            "host_outputs": self.host_outputs.lock().len(),
            "engines": engines,
        })
    }
}
