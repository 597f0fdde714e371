//! Simulators: protocol engines for atomic and coupled models.
//!
//! A `Simulator` is the engine-side view of a model, whether atomic or
//! coupled, as seen by its parent coordinator.
//!
//! - [`AtomicSimulator`] enforces the atomic protocol around one model.
//! - [`SharedAtomic`] puts it behind its serialization lock.
//! - [`CoupledSimulator`] drives a coupled model as a black-box submodel.
//! - [`RootCoordinator`] drives a whole tree in simulated time, as fast as
//!   possible.

pub mod atomic;
pub mod coordinator;
pub mod coupled;
pub mod shared;

use crate::error::SimResult;
use crate::event::Event;
use crate::model::{ModelDeclaration, ModelReport, VariableInit};
use crate::params::RunParameters;
use crate::time::SimTime;

pub use atomic::{AtomicSimulator, TransitionKind};
pub use coordinator::{CoordinatorStats, RootCoordinator};
pub use coupled::CoupledSimulator;
pub use shared::{CausalTarget, SharedAtomic};

/// The abstract simulator contract shared by atomic and coupled engines.
///
/// A parent drives its children in rounds: at the minimum time of next
/// event `t`, imminent children produce output, outputs are routed to
/// influencees with [`Simulator::store_input`], then every child that is
/// imminent or has input performs [`Simulator::transition`] at `t`.
pub trait Simulator: Send {
    /// Returns the URI of the simulated model.
    fn uri(&self) -> &str;

    /// Static (or derived) interface of the simulated model.
    fn declaration(&self) -> &ModelDeclaration;

    fn set_run_parameters(&mut self, params: &RunParameters) -> SimResult<()>;

    /// Initialise the simulated model at `start`.
    ///
    /// Called once before simulation starts.
    fn initialise(&mut self, start: SimTime) -> SimResult<()>;

    /// One round of the variable initialisation fixpoint.
    fn initialise_variables(&mut self, start: SimTime) -> SimResult<VariableInit>;

    fn time_of_last_event(&self) -> SimTime;

    fn time_of_next_event(&self) -> SimTime;

    /// Output at `now`, which must equal the time of next event.
    fn produce_output(&mut self, now: SimTime) -> SimResult<Vec<Event>>;

    /// Stores events received from outside.
    fn store_input(&mut self, events: Vec<Event>) -> SimResult<()>;

    fn has_pending_input(&self) -> bool;

    /// Performs whatever transition is due at `now`.
    fn transition(&mut self, now: SimTime) -> SimResult<()>;

    /// Ends the run and returns the final report.
    fn terminate(&mut self, end: SimTime) -> SimResult<ModelReport>;

    /// Export statistics collected during simulation.
    fn export_stats(&self) -> serde_json::Value;
}
