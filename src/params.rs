//! Run parameters injected into models before a simulation starts.
//!
//! Parameters are keyed by `"{model_uri}:{name}"` and hold JSON values, so
//! they can be loaded straight from a configuration file. Each model reads
//! the ones it needs in [`AtomicModel::set_run_parameters`].
//!
//! [`AtomicModel::set_run_parameters`]: crate::model::AtomicModel::set_run_parameters

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{ConfigurationError, SimResult};

/// Named parameters for a run.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunParameters {
    values: BTreeMap<String, serde_json::Value>,
}

impl RunParameters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the key of parameter `name` for model `uri`.
    pub fn key(uri: &str, name: &str) -> String {
        format!("{uri}:{name}")
    }

    pub fn set(&mut self, uri: &str, name: &str, value: impl Into<serde_json::Value>) {
        self.values.insert(Self::key(uri, name), value.into());
    }

    /// Builder-style [`RunParameters::set`].
    pub fn with(mut self, uri: &str, name: &str, value: impl Into<serde_json::Value>) -> Self {
        self.set(uri, name, value);
        self
    }

    /// Inserts a value under a full `"{uri}:{name}"` key.
    pub fn insert_raw(&mut self, key: impl Into<String>, value: serde_json::Value) {
        self.values.insert(key.into(), value);
    }

    pub fn get_raw(&self, uri: &str, name: &str) -> Option<&serde_json::Value> {
        self.values.get(&Self::key(uri, name))
    }

    pub fn contains(&self, uri: &str, name: &str) -> bool {
        self.values.contains_key(&Self::key(uri, name))
    }

    /// Reads a required parameter. A missing key or a value of the wrong
    /// shape is a configuration error.
    pub fn require<T: DeserializeOwned>(&self, uri: &str, name: &str) -> SimResult<T> {
        self.optional(uri, name)?
            .ok_or_else(|| ConfigurationError::MissingParameter(Self::key(uri, name)).into())
    }

    /// Reads an optional parameter.
    pub fn optional<T: DeserializeOwned>(&self, uri: &str, name: &str) -> SimResult<Option<T>> {
        let key = Self::key(uri, name);
        match self.values.get(&key) {
            None => Ok(None),
            Some(value) => T::deserialize(value).map(Some).map_err(|e| {
                ConfigurationError::InvalidParameter {
                    key,
                    reason: e.to_string(),
                }
                .into()
            }),
        }
    }

    /// Reads a parameter, falling back to `default` when absent.
    pub fn get_or<T: DeserializeOwned>(&self, uri: &str, name: &str, default: T) -> SimResult<T> {
        Ok(self.optional(uri, name)?.unwrap_or(default))
    }

    /// Parameters of model `uri`, by short name.
    pub fn for_model<'a>(&'a self, uri: &'a str) -> impl Iterator<Item = (&'a str, &'a serde_json::Value)> + 'a {
        self.values.iter().filter_map(move |(k, v)| {
            k.strip_prefix(uri)
                .and_then(|rest| rest.strip_prefix(':'))
                .map(|name| (name, v))
        })
    }

    /// Copies every entry of `other` into `self`, overwriting duplicates.
    pub fn merge(&mut self, other: &RunParameters) {
        for (k, v) in &other.values {
            self.values.insert(k.clone(), v.clone());
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_require_and_optional() {
        let params = RunParameters::new()
            .with("heater", "power", 1500.0)
            .with("heater", "enabled", true);

        let power: f64 = params.require("heater", "power").unwrap();
        assert_eq!(power, 1500.0);
        let enabled: Option<bool> = params.optional("heater", "enabled").unwrap();
        assert_eq!(enabled, Some(true));
        let gain: f64 = params.get_or("heater", "gain", 2.0).unwrap();
        assert_eq!(gain, 2.0);
    }

    #[test]
    fn test_missing_parameter_is_configuration_error() {
        let params = RunParameters::new();
        let err = params.require::<f64>("heater", "power").unwrap_err();
        assert!(err.is_configuration());
        assert!(err.to_string().contains("heater:power"));
    }

    #[test]
    fn test_wrong_shape_is_invalid() {
        let params = RunParameters::new().with("heater", "power", "a lot");
        let err = params.require::<f64>("heater", "power").unwrap_err();
        assert!(matches!(
            err,
            crate::error::SimError::Configuration(ConfigurationError::InvalidParameter { .. })
        ));
    }

    #[test]
    fn test_for_model_filters_by_uri() {
        let params = RunParameters::new()
            .with("heater", "power", 1.0)
            .with("heater2", "power", 2.0)
            .with("thermostat", "target", 20.0);
        let names: Vec<_> = params.for_model("heater").map(|(n, _)| n).collect();
        assert_eq!(names, vec!["power"]);
    }

    #[test]
    fn test_yaml_round_trip() {
        let yaml = "\"heater:power\": 1500.0\n\"thermostat:target\": 19.5\n";
        let params: RunParameters = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(params.len(), 2);
        let target: f64 = params.require("thermostat", "target").unwrap();
        assert_eq!(target, 19.5);
    }
}
