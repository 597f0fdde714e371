//! Hybrid input/output automata support: continuous variables shared between
//! models.
//!
//! - [`value`]: the shared placeholder and its writer/reader handles.
//! - [`history`]: bounded newest-first value history.
//! - [`binding`]: causal refresh contract and binding graph checks.

pub mod binding;
pub mod history;
pub mod value;

pub use binding::{check_causal_acyclic, CausalDependency, CausalRefresh, ResolvedBinding};
pub use history::ValueHistory;
pub use value::{SharedValue, ValueReader, ValueWriter};
