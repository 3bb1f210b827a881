//! Modules: named, immutable bundles of bindings.
//!
//! Components never hold bindings directly; they install modules. A module
//! may include other modules (composition by reference) and may link
//! subcomponents, which makes a [`SubcomponentFactory`] for each linked
//! child available to the installing component.
//!
//! # Examples
//! ```
//! use trellis_container::binding::Binding;
//! use trellis_container::key::Key;
//! use trellis_container::module::{Module, ModuleBuilder, ModuleDefinition};
//!
//! struct Database;
//!
//! struct StorageModule;
//!
//! impl ModuleDefinition for StorageModule {
//!     fn name(&self) -> &str {
//!         "storage"
//!     }
//!
//!     fn configure(&self, module: ModuleBuilder) -> ModuleBuilder {
//!         module.bind(Binding::constructor(Key::of::<Database>(), vec![], |_| Ok(Database)))
//!     }
//! }
//!
//! let storage = Module::from_definition(&StorageModule);
//! let app = Module::builder("app").include(storage).build();
//! assert_eq!(app.flatten().len(), 2);
//! ```
//!
//! [`SubcomponentFactory`]: crate::container::SubcomponentFactory

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::binding::{Binding, BindingId};

/// Code-first module declaration.
///
/// Implement this to group related bindings by domain, then turn the
/// definition into a [`Module`] with [`Module::from_definition`].
pub trait ModuleDefinition: Send + Sync {
    /// Adds this module's bindings, includes and subcomponent links.
    fn configure(&self, module: ModuleBuilder) -> ModuleBuilder;

    /// Module name, used for identity and in diagnostics.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

/// A named, immutable set of bindings.
///
/// Identity is the name: two installations of modules with the same name
/// are installations of the same module.
pub struct Module {
    name: Arc<str>,
    bindings: Vec<(BindingId, Binding)>,
    includes: Vec<Arc<Module>>,
    subcomponents: Vec<Arc<str>>,
}

impl Module {
    pub fn builder(name: impl Into<Arc<str>>) -> ModuleBuilder {
        ModuleBuilder {
            name: name.into(),
            bindings: Vec::new(),
            includes: Vec::new(),
            subcomponents: Vec::new(),
        }
    }

    pub fn from_definition(definition: &dyn ModuleDefinition) -> Arc<Module> {
        definition.configure(Module::builder(definition.name())).build()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn shared_name(&self) -> Arc<str> {
        Arc::clone(&self.name)
    }

    /// Own bindings in declaration order, each with its stable id.
    pub fn bindings(&self) -> impl Iterator<Item = (&BindingId, &Binding)> {
        self.bindings.iter().map(|(id, binding)| (id, binding))
    }

    pub fn includes(&self) -> &[Arc<Module>] {
        &self.includes
    }

    /// Names of the subcomponents this module links.
    pub fn subcomponents(&self) -> &[Arc<str>] {
        &self.subcomponents
    }

    /// This module followed by everything it includes, depth-first in
    /// declaration order. The same module reached twice is listed once;
    /// distinct modules sharing a name are all listed.
    pub fn flatten(self: &Arc<Self>) -> Vec<Arc<Module>> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        Self::flatten_into(self, &mut seen, &mut out);
        out
    }

    fn flatten_into(module: &Arc<Module>, seen: &mut HashSet<*const Module>, out: &mut Vec<Arc<Module>>) {
        if !seen.insert(Arc::as_ptr(module)) {
            return;
        }
        out.push(Arc::clone(module));
        for included in &module.includes {
            Self::flatten_into(included, seen, out);
        }
    }
}

impl fmt::Debug for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Module")
            .field("name", &self.name)
            .field("bindings", &self.bindings.len())
            .field("includes", &self.includes.iter().map(|m| m.name()).collect::<Vec<_>>())
            .field("subcomponents", &self.subcomponents)
            .finish()
    }
}

/// Collects the contents of a [`Module`].
pub struct ModuleBuilder {
    name: Arc<str>,
    bindings: Vec<Binding>,
    includes: Vec<Arc<Module>>,
    subcomponents: Vec<Arc<str>>,
}

impl ModuleBuilder {
    pub fn bind(mut self, binding: Binding) -> Self {
        self.bindings.push(binding);
        self
    }

    pub fn include(mut self, module: Arc<Module>) -> Self {
        self.includes.push(module);
        self
    }

    /// Links the subcomponent named `name` to every component installing
    /// this module.
    pub fn subcomponent(mut self, name: impl Into<Arc<str>>) -> Self {
        self.subcomponents.push(name.into());
        self
    }

    pub fn build(self) -> Arc<Module> {
        debug!(
            module = %self.name,
            bindings = self.bindings.len(),
            includes = self.includes.len(),
            "Declared module"
        );

        let bindings = self
            .bindings
            .into_iter()
            .enumerate()
            .map(|(index, binding)| {
                (BindingId { module: Arc::clone(&self.name), index }, binding)
            })
            .collect();

        Arc::new(Module {
            name: self.name,
            bindings,
            includes: self.includes,
            subcomponents: self.subcomponents,
        })
    }
}
