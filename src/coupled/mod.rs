//! Hierarchical composition of models.
//!
//! - [`descriptor`]: static descriptors and their internal consistency.
//! - [`routing`]: event hops and flattened routes.
//! - [`architecture`]: whole-tree checks, binding resolution and the three
//!   composition modes.

pub mod architecture;
pub mod descriptor;
pub mod routing;

pub use architecture::{Architecture, Composite, CompositionMode, ModelTree, StructuralModel};
pub use descriptor::{
    AtomicModelDescriptor, CoupledModelBuilder, CoupledModelDescriptor, EventSink, EventSource,
    ImportedVariable, ModelFactory, ReexportedEvent, ReexportedVariable, VariableSink, VariableSource,
};
pub use routing::{apply_hops, EventConverter, Hop, Route};
