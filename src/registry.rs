//! Model factory registry for configuration-driven architectures.
//!
//! The registry maps a model type name to a function turning a URI and a
//! set of attributes into an [`AtomicModelDescriptor`]. Attributes are
//! validated once, when the descriptor is built; the descriptor's factory
//! then creates instances without failing.
//!
//! # Example
//!
//! ```
//! use cyphy::registry::{ModelAttributes, ModelRegistry};
//! use cyphy::models::{PeriodicModel, PeriodicSettings};
//!
//! let mut registry = ModelRegistry::new();
//! registry.register_with::<PeriodicSettings, _>("Periodic", |uri, settings| {
//!     Box::new(PeriodicModel::new(uri, settings.clone()))
//! });
//!
//! let mut attrs = ModelAttributes::new();
//! attrs.insert("period".to_string(), serde_json::json!(2.0));
//! let descriptor = registry.descriptor("Periodic", "clock", &attrs).unwrap();
//! assert_eq!(descriptor.uri, "clock");
//! ```

use serde::de::DeserializeOwned;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::coupled::descriptor::AtomicModelDescriptor;
use crate::error::{ConfigurationError, SimResult};
use crate::model::AtomicModel;

/// Attributes of one model entry in an architecture file.
pub type ModelAttributes = BTreeMap<String, serde_json::Value>;

/// Builds the descriptor of a model from its URI and attributes.
pub type DescriptorFactory =
    Arc<dyn Fn(&str, &ModelAttributes) -> SimResult<AtomicModelDescriptor> + Send + Sync>;

/// Deserializes attributes into a model's settings type.
pub fn parse_attributes<T: DeserializeOwned>(type_name: &str, uri: &str, attrs: &ModelAttributes) -> SimResult<T> {
    let object: serde_json::Map<String, serde_json::Value> =
        attrs.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
    serde_json::from_value(serde_json::Value::Object(object)).map_err(|e| {
        ConfigurationError::Validation(format!("invalid attributes for {type_name} model {uri}: {e}")).into()
    })
}

/// A registry of atomic model types.
#[derive(Default)]
pub struct ModelRegistry {
    factories: HashMap<String, DescriptorFactory>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a descriptor factory under `name`.
    pub fn register<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn(&str, &ModelAttributes) -> SimResult<AtomicModelDescriptor> + Send + Sync + 'static,
    {
        self.factories.insert(name.into(), Arc::new(factory));
    }

    /// Registers a model type whose attributes deserialize into `S`.
    ///
    /// The declaration is taken from a sample instance built with the same
    /// settings.
    pub fn register_with<S, F>(&mut self, name: impl Into<String>, create: F)
    where
        S: DeserializeOwned + Send + Sync + 'static,
        F: Fn(&str, &S) -> Box<dyn AtomicModel> + Send + Sync + 'static,
    {
        let name = name.into();
        let type_name = name.clone();
        let create = Arc::new(create);
        self.register(name, move |uri, attrs| {
            let settings: Arc<S> = Arc::new(parse_attributes(&type_name, uri, attrs)?);
            let declaration = create(uri, &settings).declaration();
            let create = Arc::clone(&create);
            Ok(AtomicModelDescriptor::new(uri, declaration, move |u| create(u, &settings)))
        });
    }

    /// Builds the descriptor of model `uri` of type `type_name`.
    pub fn descriptor(&self, type_name: &str, uri: &str, attrs: &ModelAttributes) -> SimResult<AtomicModelDescriptor> {
        let factory = self
            .factories
            .get(type_name)
            .ok_or_else(|| ConfigurationError::UnknownModelType(type_name.to_string()))?;
        factory(uri, attrs)
    }

    pub fn contains(&self, type_name: &str) -> bool {
        self.factories.contains_key(type_name)
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }

    pub fn type_names(&self) -> impl Iterator<Item = &String> {
        self.factories.keys()
    }

    pub fn unregister(&mut self, type_name: &str) -> bool {
        self.factories.remove(type_name).is_some()
    }
}

impl std::fmt::Debug for ModelRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelRegistry")
            .field("registered_types", &self.factories.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Creates a registry with the built-in reference models.
///
/// Includes:
/// - `Periodic` - PeriodicModel
/// - `Counter` - CounterModel
/// - `Ramp` - RampModel
/// - `Sampler` - SamplerModel
pub fn create_default_registry() -> ModelRegistry {
    use crate::models::mock::{
        CounterModel, CounterSettings, PeriodicModel, PeriodicSettings, RampModel, RampSettings, SamplerModel,
        SamplerSettings,
    };

    let mut registry = ModelRegistry::new();
    registry.register_with::<PeriodicSettings, _>("Periodic", |uri, s| Box::new(PeriodicModel::new(uri, s.clone())));
    registry.register_with::<CounterSettings, _>("Counter", |uri, s| Box::new(CounterModel::new(uri, s.clone())));
    registry.register_with::<RampSettings, _>("Ramp", |uri, s| Box::new(RampModel::new(uri, s.clone())));
    registry.register_with::<SamplerSettings, _>("Sampler", |uri, s| Box::new(SamplerModel::new(uri, s.clone())));
    registry
}
