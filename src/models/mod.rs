//! Built-in atomic models.
//!
//! [`mock`] holds small reference models with predictable behavior, used by
//! the tests, the benches, the demo and the default registry.

pub mod mock;

pub use mock::{
    transition_log, CounterModel, CounterSettings, PeriodicModel, PeriodicSettings, RampModel, RampSettings,
    SamplerModel, SamplerSettings, TransitionLog, TransitionRecord,
};
