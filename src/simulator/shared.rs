//! Atomic engines shared between a driver and causal readers.
//!
//! Every atomic model of a composed architecture lives in a [`SharedAtomic`]:
//! its [`AtomicSimulator`] behind a mutex, which is the model's
//! serialization lock. Readers of causally bound variables refresh the
//! exporter through its [`CausalTarget`], which drives the simulator directly
//! in simulated time and is redirected to the real-time engine once one is
//! attached.

use parking_lot::{Mutex, MutexGuard, RwLock};
use std::sync::{Arc, Weak};
use tracing::trace;

use crate::error::SimResult;
use crate::event::Event;
use crate::hioa::CausalRefresh;
use crate::model::{ModelDeclaration, ModelReport, VariableInit};
use crate::params::RunParameters;
use crate::simulator::atomic::AtomicSimulator;
use crate::simulator::Simulator;
use crate::time::SimTime;
use crate::types::ModelUri;

/// Refresh handle on one atomic model.
pub struct CausalTarget {
    uri: ModelUri,
    cell: Weak<Mutex<AtomicSimulator>>,
    driver: RwLock<Option<Weak<dyn CausalRefresh>>>,
}

impl CausalTarget {
    /// Routes subsequent refreshes through `driver`.
    pub fn attach(&self, driver: Weak<dyn CausalRefresh>) {
        *self.driver.write() = Some(driver);
    }

    pub fn detach(&self) {
        *self.driver.write() = None;
    }

    /// Simulated-time refresh: a causal transition when `now` lies strictly
    /// between the last and next events, nothing otherwise. At the next
    /// event time the exporter's own internal transition updates its values.
    fn refresh_simulated(&self, now: SimTime) -> SimResult<()> {
        let Some(cell) = self.cell.upgrade() else {
            return Ok(());
        };
        let mut sim = cell.lock();
        if !sim.is_initialised() || sim.is_terminated() {
            return Ok(());
        }
        if now > sim.time_of_last_event() && now < sim.time_of_next_event() {
            trace!(model = %self.uri, time = %now, "causal refresh");
            sim.causal_transition(now)?;
        }
        Ok(())
    }
}

impl CausalRefresh for CausalTarget {
    fn model_uri(&self) -> &str {
        &self.uri
    }

    fn refresh(&self, now: SimTime) -> SimResult<()> {
        let driver = self.driver.read().as_ref().and_then(Weak::upgrade);
        match driver {
            Some(driver) => driver.refresh(now),
            None => self.refresh_simulated(now),
        }
    }
}

/// An atomic simulator behind its serialization lock.
#[derive(Clone)]
pub struct SharedAtomic {
    uri: ModelUri,
    declaration: ModelDeclaration,
    cell: Arc<Mutex<AtomicSimulator>>,
    causal: Arc<CausalTarget>,
}

impl SharedAtomic {
    pub fn new(simulator: AtomicSimulator) -> Self {
        let uri = simulator.uri().to_string();
        let declaration = simulator.declaration().clone();
        let cell = Arc::new(Mutex::new(simulator));
        let causal = Arc::new(CausalTarget {
            uri: uri.clone(),
            cell: Arc::downgrade(&cell),
            driver: RwLock::new(None),
        });
        Self {
            uri,
            declaration,
            cell,
            causal,
        }
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn declaration(&self) -> &ModelDeclaration {
        &self.declaration
    }

    /// Takes the serialization lock.
    pub fn lock(&self) -> MutexGuard<'_, AtomicSimulator> {
        self.cell.lock()
    }

    pub fn causal_target(&self) -> Arc<CausalTarget> {
        Arc::clone(&self.causal)
    }
}

impl std::fmt::Debug for SharedAtomic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedAtomic").field("uri", &self.uri).finish()
    }
}

impl Simulator for SharedAtomic {
    fn uri(&self) -> &str {
        &self.uri
    }

    fn declaration(&self) -> &ModelDeclaration {
        &self.declaration
    }

    fn set_run_parameters(&mut self, params: &RunParameters) -> SimResult<()> {
        self.lock().set_run_parameters(params)
    }

    fn initialise(&mut self, start: SimTime) -> SimResult<()> {
        self.lock().initialise(start)
    }

    fn initialise_variables(&mut self, start: SimTime) -> SimResult<VariableInit> {
        self.lock().initialise_variables(start)
    }

    fn time_of_last_event(&self) -> SimTime {
        self.lock().time_of_last_event()
    }

    fn time_of_next_event(&self) -> SimTime {
        self.lock().time_of_next_event()
    }

    fn produce_output(&mut self, now: SimTime) -> SimResult<Vec<Event>> {
        self.lock().produce_output(now)
    }

    fn store_input(&mut self, events: Vec<Event>) -> SimResult<()> {
        self.lock().store_input(events)
    }

    fn has_pending_input(&self) -> bool {
        self.lock().has_pending_input()
    }

    fn transition(&mut self, now: SimTime) -> SimResult<()> {
        self.lock().transition(now)
    }

    fn terminate(&mut self, end: SimTime) -> SimResult<ModelReport> {
        self.lock().terminate(end)
    }

    fn export_stats(&self) -> serde_json::Value {
        self.lock().export_stats()
    }
}
