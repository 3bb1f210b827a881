//! Binding registry: the store of every declared module.
//!
//! The registry is populated before any graph is built and only read
//! afterwards. It answers one question: which bindings can a component
//! see? The answer covers the component's own modules, the modules of
//! every ancestor, the component chain's bound-instance keys and the
//! factories of linked subcomponents.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;

use tracing::{debug, trace, warn};

use crate::binding::{Binding, BindingId};
use crate::component::ComponentSpec;
use crate::container::SubcomponentFactory;
use crate::error::{ConflictingModuleError, Diagnostic, DiagnosticBatch, DuplicateModuleError};
use crate::key::Key;
use crate::module::Module;
use crate::scope::ScopeTag;

/// One component of a chain, as seen by the graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComponentLevel {
    pub name: Arc<str>,
    pub scope: Option<ScopeTag>,
}

/// A module binding placed at a hierarchy level.
#[derive(Debug, Clone)]
pub struct DeclaredBinding {
    pub id: BindingId,
    pub binding: Binding,
    /// Level of the component installing the declaring module.
    pub level: usize,
}

/// Anything that can answer a unique (non-multibinding) key.
#[derive(Debug, Clone)]
pub enum Declaration {
    Binding(DeclaredBinding),
    /// Value supplied when the component at `level` is created.
    BoundInstance { level: usize },
    /// Factory for a subcomponent linked by `module` at `level`.
    Subcomponent { level: usize, name: Arc<str>, module: Arc<str> },
}

impl Declaration {
    pub fn level(&self) -> usize {
        match self {
            Declaration::Binding(declared) => declared.level,
            Declaration::BoundInstance { level } | Declaration::Subcomponent { level, .. } => *level,
        }
    }

    /// Human-readable origin, used in duplicate-binding diagnostics.
    pub fn describe(&self, chain: &[ComponentLevel]) -> String {
        let component = |level: usize| {
            chain.get(level).map(|c| c.name.to_string()).unwrap_or_default()
        };
        match self {
            Declaration::Binding(declared) => format!(
                "{} in module `{}` (component `{}`)",
                declared.binding.kind().label(),
                declared.id.module,
                component(declared.level),
            ),
            Declaration::BoundInstance { level } => {
                format!("bound instance of component `{}`", component(*level))
            }
            Declaration::Subcomponent { level, name, module } => format!(
                "factory of subcomponent `{name}` linked by module `{module}` (component `{}`)",
                component(*level),
            ),
        }
    }
}

/// Everything one component can see, across its whole ancestor chain.
#[derive(Debug, Clone)]
pub struct VisibleBindings {
    chain: Vec<ComponentLevel>,
    unique: HashMap<Key, Vec<Declaration>>,
    multibindings: HashMap<Key, Vec<DeclaredBinding>>,
    order: Vec<Key>,
}

impl VisibleBindings {
    fn new(chain: Vec<ComponentLevel>) -> Self {
        Self {
            chain,
            unique: HashMap::new(),
            multibindings: HashMap::new(),
            order: Vec::new(),
        }
    }

    fn note_key(&mut self, key: &Key) {
        if !self.unique.contains_key(key) && !self.multibindings.contains_key(key) {
            self.order.push(key.clone());
        }
    }

    fn add_declaration(&mut self, key: Key, declaration: Declaration) {
        self.note_key(&key);
        self.unique.entry(key).or_default().push(declaration);
    }

    fn add_binding(&mut self, declared: DeclaredBinding) {
        let key = declared.binding.key().clone();
        self.note_key(&key);
        if declared.binding.multibinding_kind().is_some() {
            self.multibindings.entry(key).or_default().push(declared);
        } else {
            self.unique.entry(key).or_default().push(Declaration::Binding(declared));
        }
    }

    /// The component chain, root first.
    pub fn chain(&self) -> &[ComponentLevel] {
        &self.chain
    }

    /// Level of the component these bindings were collected for.
    pub fn own_level(&self) -> usize {
        self.chain.len().saturating_sub(1)
    }

    pub fn component_name(&self) -> &str {
        self.chain.last().map(|c| &*c.name).unwrap_or_default()
    }

    /// Unique declarations answering `key`.
    pub fn declarations(&self, key: &Key) -> &[Declaration] {
        self.unique.get(key).map(Vec::as_slice).unwrap_or_default()
    }

    /// Multibinding contributions and declarations for `key`, ancestors
    /// first, each level in module-registration order.
    pub fn multibinding_declarations(&self, key: &Key) -> &[DeclaredBinding] {
        self.multibindings.get(key).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn is_multibinding(&self, key: &Key) -> bool {
        self.multibindings.contains_key(key)
    }

    /// Returns `true` if anything visible can answer `key`.
    pub fn contains(&self, key: &Key) -> bool {
        self.unique.contains_key(key) || self.multibindings.contains_key(key)
    }

    /// Every visible key, in first-declaration order.
    pub fn keys(&self) -> &[Key] {
        &self.order
    }
}

/// Store of all declared modules.
///
/// Registration order matters: it fixes the order of set multibinding
/// elements contributed at the same level.
#[derive(Debug, Default)]
pub struct BindingRegistry {
    modules: Vec<Arc<Module>>,
    ordinals: HashMap<Arc<str>, usize>,
}

impl BindingRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `module` and everything it includes. Modules already
    /// registered under the same name keep their position.
    ///
    /// Returns the number of newly registered modules.
    pub fn register(&mut self, module: &Arc<Module>) -> usize {
        let mut added = 0;
        for module in module.flatten() {
            match self.ordinals.entry(module.shared_name()) {
                Entry::Occupied(slot) => {
                    if Arc::ptr_eq(&self.modules[*slot.get()], &module) {
                        trace!(module = %module.name(), "Module already registered");
                    } else {
                        warn!(module = %module.name(), "Another module is registered under this name");
                    }
                }
                Entry::Vacant(slot) => {
                    debug!(
                        module = %module.name(),
                        ordinal = self.modules.len(),
                        "Registered module"
                    );
                    slot.insert(self.modules.len());
                    self.modules.push(module);
                    added += 1;
                }
            }
        }
        added
    }

    /// Registers every module installed along `spec`'s chain, root first.
    pub fn register_component(&mut self, spec: &Arc<ComponentSpec>) -> usize {
        spec.ancestry()
            .iter()
            .flat_map(|level| level.modules().to_vec())
            .map(|module| self.register(&module))
            .sum()
    }

    pub fn module(&self, name: &str) -> Option<&Arc<Module>> {
        self.ordinals.get(name).map(|&i| &self.modules[i])
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    /// Collects what `spec` can see.
    ///
    /// # Errors
    /// A batch of [`Diagnostic::DuplicateModuleInstallation`] if a module
    /// is installed at more than one level of the chain, and of
    /// [`Diagnostic::ConflictingModuleName`] if distinct modules share a
    /// name.
    pub fn visible_bindings(&self, spec: &Arc<ComponentSpec>) -> Result<VisibleBindings, DiagnosticBatch> {
        let mut diagnostics = Vec::new();
        let visible = self.collect_visible(spec, &mut diagnostics);
        if diagnostics.is_empty() {
            Ok(visible)
        } else {
            Err(DiagnosticBatch { component: spec.name().to_string(), diagnostics })
        }
    }

    /// Like [`visible_bindings`](Self::visible_bindings) but appends
    /// problems to `diagnostics` and always returns what it could collect.
    ///
    /// A module installed at several levels is kept at the outermost one.
    /// Of distinct modules sharing a name, only the first reached is kept.
    pub(crate) fn collect_visible(
        &self,
        spec: &Arc<ComponentSpec>,
        diagnostics: &mut Vec<Diagnostic>,
    ) -> VisibleBindings {
        let ancestry = spec.ancestry();
        let chain: Vec<ComponentLevel> = ancestry
            .iter()
            .map(|c| ComponentLevel { name: Arc::from(c.name()), scope: c.scope().cloned() })
            .collect();
        let mut visible = VisibleBindings::new(chain);

        // module name -> first module with that name, levels installing it
        let mut installed_at: HashMap<Arc<str>, (Arc<Module>, Vec<usize>)> = HashMap::new();
        let mut per_level: Vec<Vec<Arc<Module>>> = Vec::with_capacity(ancestry.len());
        for (level, component) in ancestry.iter().enumerate() {
            let mut modules = Vec::new();
            for module in component.installed_modules() {
                match installed_at.entry(module.shared_name()) {
                    Entry::Vacant(slot) => {
                        slot.insert((Arc::clone(&module), vec![level]));
                        modules.push(module);
                    }
                    Entry::Occupied(mut slot) => {
                        let (first, levels) = slot.get_mut();
                        if Arc::ptr_eq(first, &module) {
                            levels.push(level);
                            continue;
                        }
                        let kept_by = ancestry[levels[0]].name().to_string();
                        warn!(module = %module.name(), kept_by = %kept_by, "Conflicting module name");
                        diagnostics.push(Diagnostic::ConflictingModuleName(ConflictingModuleError {
                            module: module.name().to_string(),
                            kept_by,
                            ignored_in: component.name().to_string(),
                        }));
                    }
                }
            }
            modules.sort_by_key(|m| self.ordinals.get(m.name()).copied().unwrap_or(usize::MAX));
            per_level.push(modules);
        }

        let mut duplicated: Vec<(&Arc<str>, &Vec<usize>)> = installed_at
            .iter()
            .map(|(name, (_, levels))| (name, levels))
            .filter(|(_, levels)| levels.len() > 1)
            .collect();
        duplicated.sort_by(|a, b| a.1.cmp(b.1).then_with(|| a.0.cmp(b.0)));
        for (module, levels) in duplicated {
            warn!(module = %module, ?levels, "Module installed at several levels");
            diagnostics.push(Diagnostic::DuplicateModuleInstallation(DuplicateModuleError {
                module: module.to_string(),
                components: levels.iter().map(|&l| ancestry[l].name().to_string()).collect(),
            }));
        }

        for (level, component) in ancestry.iter().enumerate() {
            for key in component.bound_keys() {
                visible.add_declaration(key.clone(), Declaration::BoundInstance { level });
            }
            for module in &per_level[level] {
                for (id, binding) in module.bindings() {
                    visible.add_binding(DeclaredBinding {
                        id: id.clone(),
                        binding: binding.clone(),
                        level,
                    });
                }
                for name in module.subcomponents() {
                    visible.add_declaration(
                        SubcomponentFactory::key(name),
                        Declaration::Subcomponent {
                            level,
                            name: Arc::clone(name),
                            module: module.shared_name(),
                        },
                    );
                }
            }
        }

        debug!(
            component = %spec.name(),
            levels = ancestry.len(),
            keys = visible.keys().len(),
            "Collected visible bindings"
        );
        visible
    }
}
