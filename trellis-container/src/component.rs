//! Component specifications: static declarations of scope boundaries.
//!
//! A [`ComponentSpec`] names its installed modules, its parent (if it is a
//! subcomponent), the keys it exposes as entry points, the keys whose
//! values are supplied when an instance is created, and its own scope tag.
//! Specs are immutable once built and shared through `Arc`.
//!
//! ```
//! use trellis_container::component::ComponentSpec;
//! use trellis_container::key::Key;
//! use trellis_container::scope::ScopeTag;
//!
//! struct Account;
//!
//! let bank = ComponentSpec::root("Bank").scope(ScopeTag::new("Root")).build();
//! let session = ComponentSpec::child("Session", &bank)
//!     .scope(ScopeTag::new("Session"))
//!     .bound_instance(Key::of::<Account>())
//!     .build();
//!
//! assert_eq!(session.depth(), 1);
//! let chain = session.ancestry();
//! let names: Vec<&str> = chain.iter().map(|s| s.name()).collect();
//! assert_eq!(names, ["Bank", "Session"]);
//! ```

use std::fmt;
use std::sync::Arc;

use crate::key::Key;
use crate::module::Module;
use crate::scope::ScopeTag;

/// Static declaration of one component.
pub struct ComponentSpec {
    name: Arc<str>,
    scope: Option<ScopeTag>,
    modules: Vec<Arc<Module>>,
    parent: Option<Arc<ComponentSpec>>,
    entry_points: Vec<Key>,
    bound_keys: Vec<Key>,
}

impl ComponentSpec {
    /// Starts a top-level component.
    pub fn root(name: impl Into<Arc<str>>) -> ComponentSpecBuilder {
        ComponentSpecBuilder::new(name.into(), None)
    }

    /// Starts a subcomponent of `parent`.
    pub fn child(name: impl Into<Arc<str>>, parent: &Arc<ComponentSpec>) -> ComponentSpecBuilder {
        ComponentSpecBuilder::new(name.into(), Some(Arc::clone(parent)))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn scope(&self) -> Option<&ScopeTag> {
        self.scope.as_ref()
    }

    /// Directly installed modules, not flattened.
    pub fn modules(&self) -> &[Arc<Module>] {
        &self.modules
    }

    pub fn parent(&self) -> Option<&Arc<ComponentSpec>> {
        self.parent.as_ref()
    }

    pub fn entry_points(&self) -> &[Key] {
        &self.entry_points
    }

    pub fn bound_keys(&self) -> &[Key] {
        &self.bound_keys
    }

    /// Number of ancestors; a root has depth 0.
    pub fn depth(&self) -> usize {
        let mut depth = 0;
        let mut current = self.parent.as_ref();
        while let Some(spec) = current {
            depth += 1;
            current = spec.parent.as_ref();
        }
        depth
    }

    /// The chain from the root down to `self`, both included.
    ///
    /// Index `i` of the result is the component at hierarchy level `i`.
    pub fn ancestry(self: &Arc<Self>) -> Vec<Arc<ComponentSpec>> {
        let mut chain = vec![Arc::clone(self)];
        let mut current = self.parent.clone();
        while let Some(spec) = current {
            current = spec.parent.clone();
            chain.push(spec);
        }
        chain.reverse();
        chain
    }

    /// Installed modules with their includes, in installation order.
    pub fn installed_modules(&self) -> Vec<Arc<Module>> {
        let mut seen = std::collections::HashSet::new();
        self.modules
            .iter()
            .flat_map(|module| module.flatten())
            .filter(|module| seen.insert(Arc::as_ptr(module)))
            .collect()
    }
}

impl fmt::Debug for ComponentSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentSpec")
            .field("name", &self.name)
            .field("scope", &self.scope)
            .field("modules", &self.modules.iter().map(|m| m.name()).collect::<Vec<_>>())
            .field("parent", &self.parent.as_ref().map(|p| p.name()))
            .field("entry_points", &self.entry_points)
            .field("bound_keys", &self.bound_keys)
            .finish()
    }
}

/// Builds a [`ComponentSpec`].
pub struct ComponentSpecBuilder {
    name: Arc<str>,
    scope: Option<ScopeTag>,
    modules: Vec<Arc<Module>>,
    parent: Option<Arc<ComponentSpec>>,
    entry_points: Vec<Key>,
    bound_keys: Vec<Key>,
}

impl ComponentSpecBuilder {
    fn new(name: Arc<str>, parent: Option<Arc<ComponentSpec>>) -> Self {
        Self {
            name,
            scope: None,
            modules: Vec::new(),
            parent,
            entry_points: Vec::new(),
            bound_keys: Vec::new(),
        }
    }

    pub fn scope(mut self, scope: ScopeTag) -> Self {
        self.scope = Some(scope);
        self
    }

    pub fn install(mut self, module: Arc<Module>) -> Self {
        self.modules.push(module);
        self
    }

    /// Declares a key the component must be able to answer.
    pub fn entry_point(mut self, key: Key) -> Self {
        self.entry_points.push(key);
        self
    }

    /// Declares a key whose value is supplied at instance creation.
    pub fn bound_instance(mut self, key: Key) -> Self {
        self.bound_keys.push(key);
        self
    }

    pub fn build(self) -> Arc<ComponentSpec> {
        Arc::new(ComponentSpec {
            name: self.name,
            scope: self.scope,
            modules: self.modules,
            parent: self.parent,
            entry_points: self.entry_points,
            bound_keys: self.bound_keys,
        })
    }
}
