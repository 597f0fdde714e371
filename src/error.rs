//! Error types.
//!
//! Three families of failures are distinguished:
//!
//! - [`ConfigurationError`]: detected while building or starting a
//!   simulation; fatal.
//! - protocol violations ([`SimError::Protocol`]): a model or engine broke the
//!   simulation protocol at run time; fatal.
//! - [`SchedulingFailure`]: the host scheduler refused a task; reported to
//!   the caller or recorded on the engine when it happens inside a callback.
//!
//! Clock drift (a wall-clock deadline already in the past) is not an error:
//! it is clamped and logged.

use std::time::Duration;
use thiserror::Error;

use crate::types::ModelUri;

/// Errors detected while configuring, composing or starting a simulation.
#[derive(Error, Debug)]
pub enum ConfigurationError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Unknown file format: {0}")]
    UnknownFormat(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("inconsistent wiring in {model}: {reason}")]
    Wiring { model: ModelUri, reason: String },

    #[error("cannot bind variable {variable} of {model}: {reason}")]
    Binding {
        model: ModelUri,
        variable: String,
        reason: String,
    },

    #[error("unknown model {0}")]
    UnknownModel(ModelUri),

    #[error("unknown model type {0}")]
    UnknownModelType(String),

    #[error("missing run parameter {0}")]
    MissingParameter(String),

    #[error("invalid run parameter {key}: {reason}")]
    InvalidParameter { key: String, reason: String },

    #[error("acceleration factor must be strictly positive, got {0}")]
    NonPositiveAcceleration(f64),

    #[error("no scheduler provided for a real-time run")]
    MissingScheduler,

    #[error("real-time start {start:?} is not in the future (scheduler clock at {now:?})")]
    StartNotInFuture { start: Duration, now: Duration },

    #[error("wall-clock overflow: {0}")]
    WallClockOverflow(String),

    #[error("variable initialisation stalled with {remaining} variable(s) left")]
    VariableInitialisation { remaining: usize },

    #[error("causal refresh cycle among models {0:?}")]
    CausalCycle(Vec<ModelUri>),
}

/// The host scheduler refused a task.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchedulingFailure {
    #[error("scheduler is shut down")]
    Shutdown,

    #[error("scheduler saturated: {pending} pending task(s), capacity {capacity}")]
    Saturated { pending: usize, capacity: usize },

    #[error("scheduler rejected the task: {0}")]
    Rejected(String),
}

/// Top-level error type of the crate.
#[derive(Error, Debug)]
pub enum SimError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error("protocol violation in {model}: {reason}")]
    Protocol { model: ModelUri, reason: String },

    #[error(transparent)]
    Scheduling(#[from] SchedulingFailure),
}

impl SimError {
    /// Builds a protocol violation for `model`.
    pub fn protocol(model: impl Into<ModelUri>, reason: impl Into<String>) -> Self {
        SimError::Protocol {
            model: model.into(),
            reason: reason.into(),
        }
    }

    /// Builds a wiring configuration error for `model`.
    pub fn wiring(model: impl Into<ModelUri>, reason: impl Into<String>) -> Self {
        SimError::Configuration(ConfigurationError::Wiring {
            model: model.into(),
            reason: reason.into(),
        })
    }

    pub fn is_configuration(&self) -> bool {
        matches!(self, SimError::Configuration(_))
    }

    pub fn is_protocol(&self) -> bool {
        matches!(self, SimError::Protocol { .. })
    }

    pub fn is_scheduling(&self) -> bool {
        matches!(self, SimError::Scheduling(_))
    }
}

/// Result type for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigurationError>;

/// Result type used throughout the crate.
pub type SimResult<T> = Result<T, SimError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_families() {
        let err = SimError::protocol("heater", "time advance is NaN");
        assert!(err.is_protocol());
        assert_eq!(err.to_string(), "protocol violation in heater: time advance is NaN");

        let err: SimError = ConfigurationError::MissingScheduler.into();
        assert!(err.is_configuration());

        let err: SimError = SchedulingFailure::Shutdown.into();
        assert!(err.is_scheduling());
        assert_eq!(err.to_string(), "scheduler is shut down");
    }

    #[test]
    fn test_wiring_message() {
        let err = SimError::wiring("plant", "unknown submodel sensor");
        assert_eq!(
            err.to_string(),
            "inconsistent wiring in plant: unknown submodel sensor"
        );
    }
}
