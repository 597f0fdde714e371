//! # cyphy
//!
//! A real-time hybrid discrete-event simulation core for cyber-physical
//! systems: a DEVS protocol extended with continuous state variables (HIOA),
//! driven against wall-clock time, with hierarchical composition of models.
//!
//! ## Design Principles
//!
//! - **Atomic protocol**: each atomic model is driven through initialise,
//!   time advance, output, internal/external/confluent transitions and
//!   termination by an [`AtomicSimulator`] that rejects out-of-order calls.
//! - **Real time**: in a real-time run every atomic model gets its own
//!   [`RtAtomicEngine`], which schedules its next internal event on a host
//!   [`Scheduler`] at `start_wall + (t - start_sim) / acceleration`.
//! - **Continuous variables**: exported values are shared placeholders with a
//!   single writer; importers read them directly, optionally refreshing the
//!   exporter first (causal refresh).
//! - **Composition**: coupled models are checked as a whole
//!   [`Architecture`] before any model is created, then run hierarchically
//!   in simulated time or flattened for real time.
//!
//! ## Features
//!
//! - `parallel` - Transition the children of a coupled simulator in parallel
//!   using rayon
//!
//! ## Quick Start
//!
//! ```rust
//! use cyphy::coupled::{Architecture, AtomicModelDescriptor, CoupledModelDescriptor, EventSink, EventSource};
//! use cyphy::models::{CounterModel, CounterSettings, PeriodicModel, PeriodicSettings};
//! use cyphy::{AtomicModel, EventType, SimDuration, SimTime, TimeUnit};
//!
//! const TICK: EventType = EventType::new("Tick");
//!
//! let clock = AtomicModelDescriptor::new(
//!     "clock",
//!     PeriodicModel::new("clock", PeriodicSettings::new(3.0)).declaration(),
//!     |uri| Box::new(PeriodicModel::new(uri, PeriodicSettings::new(3.0))),
//! );
//! let counter_settings = CounterSettings { input: "Tick".to_string() };
//! let counter = AtomicModelDescriptor::new(
//!     "counter",
//!     CounterModel::new("counter", counter_settings.clone()).declaration(),
//!     move |uri| Box::new(CounterModel::new(uri, counter_settings.clone())),
//! );
//! let plant = CoupledModelDescriptor::builder("plant")
//!     .submodels(["clock", "counter"])
//!     .connect(EventSource::new("clock", TICK), EventSink::new("counter", TICK))
//!     .build()
//!     .unwrap();
//!
//! let arch = Architecture::new("plant", vec![clock, counter], vec![plant], TimeUnit::Seconds).unwrap();
//! let mut coordinator = arch.coordinator().unwrap();
//! let report = coordinator.run(SimTime::seconds(0.0), SimDuration::seconds(10.0)).unwrap();
//! assert_eq!(report.find("counter").unwrap().body["received"], 3);
//! ```
//!
//! ## Real-Time Runs
//!
//! ```rust,ignore
//! use cyphy::rt::RtSimulation;
//! use cyphy::scheduler::ThreadedScheduler;
//!
//! let scheduler = Arc::new(ThreadedScheduler::new(4)?);
//! let sim = RtSimulation::builder(arch.structural()?)
//!     .scheduler(scheduler)
//!     .acceleration(10.0)
//!     .build()?;
//! let report = sim.run(SimTime::seconds(0.0), SimDuration::seconds(60.0), Duration::from_secs(10))?;
//! ```
//!
//! ## Configuration-Driven Setup
//!
//! ```rust,ignore
//! use cyphy::config::RunConfig;
//! use cyphy::registry::create_default_registry;
//!
//! let config = RunConfig::from_file("plant.yaml")?;
//! let arch = config.build_architecture(&create_default_registry())?;
//! ```

pub mod time;
pub mod types;
pub mod event;
pub mod error;
pub mod hioa;
pub mod model;
pub mod params;
pub mod simulator;
pub mod scheduler;
pub mod rt;
pub mod coupled;
pub mod config;
pub mod registry;
pub mod stats;
pub mod models;

// Re-export commonly used types
pub use time::{SimDuration, SimTime, TimeUnit};
pub use types::{ModelUri, VarType, VariableDescriptor, Visibility};
pub use event::{Event, EventQueue, EventType};
pub use error::{ConfigurationError, SchedulingFailure, SimError, SimResult};
pub use hioa::{SharedValue, ValueHistory, ValueReader, ValueWriter};
pub use model::{AtomicModel, ConfluentPolicy, ModelDeclaration, ModelReport, VariableInit};
pub use params::RunParameters;
pub use simulator::{AtomicSimulator, CoupledSimulator, RootCoordinator, SharedAtomic, Simulator};
pub use scheduler::{ManualScheduler, Scheduler, TaskHandle, ThreadedScheduler};
pub use rt::{RtAtomicEngine, RtConfig, RtSimulation};
pub use coupled::{Architecture, AtomicModelDescriptor, CompositionMode, CoupledModelDescriptor};
pub use config::{ArchitectureConfig, RunConfig, RunConfigBuilder};
pub use registry::{create_default_registry, ModelRegistry};
pub use stats::{RunSummary, StatsCollector, Timer, TransitionStats};

/// Initialize the tracing subscriber for logging.
///
/// Call this at the start of your program to enable logging. `RUST_LOG`
/// takes precedence over `level` when set.
///
/// # Example
///
/// ```rust,ignore
/// cyphy::init_logging("info");
/// ```
pub fn init_logging(level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(false)
        .with_line_number(false)
        .init();
}
