//! Graph resolution and instance lifecycle engine for Trellis DI.

pub mod binding;
pub mod component;
pub mod container;
pub mod error;
pub mod graph;
pub mod key;
pub mod lazy;
pub mod module;
pub mod multibinding;
pub mod registry;
pub mod scope;
pub mod settings;

pub use container::prelude;
pub use container::{
    BoundInstances, ComponentInstance, SubcomponentFactory, build_graph, create_child,
    create_instance, get,
};
pub use error::{Diagnostic, DiagnosticBatch, Result, TrellisError};
pub use key::Key;
pub use scope::ScopeTag;
