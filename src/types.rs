//! Core type definitions for the simulation framework.
//!
//! This module defines the identifiers and type descriptors shared by models,
//! composition descriptors and engines.

use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;

/// Unique identifier of a model in an architecture.
///
/// URIs are unique across the whole model tree, atomic and coupled alike.
pub type ModelUri = String;

/// Name of the Rust type carried by a continuous variable.
///
/// Compatibility between an exported and an imported variable is name
/// equality; the concrete type is checked again by downcast when the shared
/// placeholder is handed to the importer.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VarType(Cow<'static, str>);

impl VarType {
    /// Type descriptor of `T`.
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self(Cow::Borrowed(std::any::type_name::<T>()))
    }

    /// Type descriptor built from a name, as read from configuration files.
    ///
    /// The short names `f64`, `f32`, `i64`, `u64`, `bool` and `String` are
    /// normalised to the names produced by [`VarType::of`].
    pub fn named(name: impl Into<String>) -> Self {
        let name = name.into();
        match name.as_str() {
            "f64" => Self::of::<f64>(),
            "f32" => Self::of::<f32>(),
            "i64" => Self::of::<i64>(),
            "u64" => Self::of::<u64>(),
            "bool" => Self::of::<bool>(),
            "String" | "string" => Self::of::<String>(),
            _ => Self(Cow::Owned(name)),
        }
    }

    pub fn name(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VarType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Visibility of a continuous variable in a model's declaration.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    /// Owned by the model and readable by importers
    Exported,
    /// Provided by another model's exported variable
    Imported,
    /// Owned by the model and never shared
    Internal,
}

/// Static description of a continuous variable.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariableDescriptor {
    /// Variable name, unique within the declaring model
    pub name: String,
    /// Type of the variable's value
    pub var_type: VarType,
    /// Exported, imported or internal
    pub visibility: Visibility,
}

impl VariableDescriptor {
    pub fn new(name: impl Into<String>, var_type: VarType, visibility: Visibility) -> Self {
        Self {
            name: name.into(),
            var_type,
            visibility,
        }
    }
}
