//! # Component instances: the runtime half of Trellis
//!
//! A [`ComponentInstance`] realizes one [`ComponentSpec`] against its
//! [`ResolvedGraph`]. It holds the bound instances supplied at creation, a
//! [`ScopeManager`] for the keys owned at its level, and a strong reference
//! to its parent. Parents never track their children.
//!
//! # Architecture
//! ```text
//! ComponentSpec ──build_graph()──> ResolvedGraph
//!                                       │
//!                                create_instance()
//!                                       │
//!                                       ▼
//!                               ComponentInstance ──create_child()──> ComponentInstance
//! ```
//!
//! # Examples
//! ```rust
//! use std::sync::Arc;
//! use trellis_container::prelude::*;
//!
//! struct Database { url: String }
//! struct Ledger { db: Arc<Database> }
//!
//! let module = Module::builder("bank")
//!     .bind(
//!         Binding::constructor(Key::of::<Database>(), vec![], |_| {
//!             Ok(Database { url: "postgres://localhost".into() })
//!         })
//!         .in_scope(ScopeTag::new("Root")),
//!     )
//!     .bind(Binding::constructor(
//!         Key::of::<Ledger>(),
//!         vec![Key::of::<Database>().into()],
//!         |args| Ok(Ledger { db: args.instance::<Database>(0)? }),
//!     ))
//!     .build();
//!
//! let spec = ComponentSpec::root("Bank")
//!     .scope(ScopeTag::new("Root"))
//!     .install(module)
//!     .entry_point(Key::of::<Ledger>())
//!     .build();
//!
//! let graph = build_graph(&spec).expect("valid graph");
//! let bank = create_instance(&spec, graph, None, BoundInstances::new()).expect("instance");
//!
//! let a = bank.resolve::<Ledger>().expect("ledger");
//! let b = bank.resolve::<Ledger>().expect("ledger");
//! assert!(!Arc::ptr_eq(&a, &b));
//! assert!(Arc::ptr_eq(&a.db, &b.db));
//! assert_eq!(a.db.url, "postgres://localhost");
//! ```

use std::any::Any;
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};

use tracing::{debug, info, instrument, trace, warn};

use crate::binding::{
    Arg, Args, Dependency, Instance, MultibindingKind, OptionalValue, RequestKind, downcast,
};
use crate::component::ComponentSpec;
use crate::error::{
    BoundInstanceMismatchError, DiagnosticBatch, NotInGraphError, ParentMismatchError,
    ReentrantConstructionError, Result, TrellisError,
};
use crate::graph::{GraphResolver, PlanKind, ResolutionPlan, ResolvedGraph};
use crate::key::Key;
use crate::lazy::{LazyProxy, ProviderHandle};
use crate::multibinding::{ContributionPlan, MapValues, SetValues};
use crate::registry::BindingRegistry;
use crate::scope::{ScopeManager, Slot};

// ============================================================
// BoundInstances
// ============================================================

/// Values supplied to a component when it is created.
///
/// Must cover exactly the component spec's bound-instance keys.
#[derive(Clone, Default)]
pub struct BoundInstances {
    entries: Vec<(Key, Instance)>,
}

impl BoundInstances {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `value` under the unqualified key of `T`.
    pub fn with<T: Any + Send + Sync>(self, value: T) -> Self {
        self.with_key(Key::of::<T>(), value)
    }

    /// Binds `value` under `key`.
    pub fn with_key<T: Any + Send + Sync>(mut self, key: Key, value: T) -> Self {
        self.insert(key, Arc::new(value));
        self
    }

    /// Inserts a type-erased value, replacing any earlier one for `key`.
    pub fn insert(&mut self, key: Key, value: Instance) {
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some((_, slot)) => *slot = value,
            None => self.entries.push((key, value)),
        }
    }

    pub fn keys(&self) -> impl Iterator<Item = &Key> {
        self.entries.iter().map(|(key, _)| key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Debug for BoundInstances {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.keys()).finish()
    }
}

// ═══════════════════════════════════════════
// ComponentInstance
// ═══════════════════════════════════════════

struct Inner {
    graph: Arc<ResolvedGraph>,
    parent: Option<ComponentInstance>,
    bound: HashMap<Key, Instance>,
    scope: ScopeManager,
}

/// Live realization of a component.
///
/// Cheap to clone; clones share the same caches. Dropped once the last
/// clone (including those held by descendants) goes away.
#[derive(Clone)]
pub struct ComponentInstance {
    inner: Arc<Inner>,
}

/// Non-owning reference held by deferred handles.
#[derive(Clone)]
pub struct WeakInstance(Weak<Inner>);

impl WeakInstance {
    pub fn upgrade(&self) -> Option<ComponentInstance> {
        self.0.upgrade().map(|inner| ComponentInstance { inner })
    }
}

impl ComponentInstance {
    /// Creates an instance of `spec`.
    ///
    /// `parent` must realize the component spec's declared parent (or be `None` for a
    /// root), and `bound` must supply exactly the declared bound keys.
    ///
    /// # Errors
    /// [`TrellisError::GraphMismatch`], [`TrellisError::ParentMismatch`] or
    /// [`TrellisError::BoundInstanceMismatch`].
    #[instrument(skip_all, fields(component = %spec.name()), name = "component_create")]
    pub fn create(
        spec: &Arc<ComponentSpec>,
        graph: Arc<ResolvedGraph>,
        parent: Option<&ComponentInstance>,
        bound: BoundInstances,
    ) -> Result<Self> {
        if !Arc::ptr_eq(graph.spec(), spec) {
            return Err(TrellisError::GraphMismatch {
                component: spec.name().to_string(),
                graph: graph.component_name().to_string(),
            });
        }

        let parent_matches = match (spec.parent(), parent) {
            (None, None) => true,
            (Some(expected), Some(actual)) => Arc::ptr_eq(expected, actual.spec()),
            _ => false,
        };
        if !parent_matches {
            return Err(TrellisError::ParentMismatch(ParentMismatchError {
                component: spec.name().to_string(),
                expected: spec.parent().map(|p| p.name().to_string()),
                actual: parent.map(|p| p.name().to_string()),
            }));
        }

        let declared = spec.bound_keys();
        let missing: Vec<Key> = declared
            .iter()
            .filter(|key| !bound.keys().any(|k| k == *key))
            .cloned()
            .collect();
        let unexpected: Vec<Key> = bound.keys().filter(|k| !declared.contains(k)).cloned().collect();
        if !missing.is_empty() || !unexpected.is_empty() {
            return Err(TrellisError::BoundInstanceMismatch(BoundInstanceMismatchError {
                component: spec.name().to_string(),
                missing,
                unexpected,
            }));
        }

        info!(level = graph.level(), bound = bound.len(), "Creating component instance");
        Ok(Self {
            inner: Arc::new(Inner {
                scope: ScopeManager::new(spec.name()),
                bound: bound.entries.into_iter().collect(),
                parent: parent.cloned(),
                graph,
            }),
        })
    }

    pub fn spec(&self) -> &Arc<ComponentSpec> {
        self.inner.graph.spec()
    }

    pub fn graph(&self) -> &Arc<ResolvedGraph> {
        &self.inner.graph
    }

    pub fn name(&self) -> &str {
        self.inner.graph.component_name()
    }

    /// Hierarchy level; the root is level 0.
    pub fn level(&self) -> usize {
        self.inner.graph.level()
    }

    pub fn parent(&self) -> Option<&ComponentInstance> {
        self.inner.parent.as_ref()
    }

    /// Scope cache of this level.
    pub fn scope(&self) -> &ScopeManager {
        &self.inner.scope
    }

    pub fn downgrade(&self) -> WeakInstance {
        WeakInstance(Arc::downgrade(&self.inner))
    }

    /// Returns `true` if both handles refer to the same instance.
    pub fn ptr_eq(&self, other: &ComponentInstance) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Resolves `key` per this instance's graph.
    ///
    /// Bound instances are returned as supplied. Scoped keys are cached in
    /// the owning level's [`ScopeManager`] and built against that level, so
    /// deferred handles inside them stay valid for the owner's lifetime.
    /// Everything else is built fresh, dependencies first.
    ///
    /// # Errors
    /// [`TrellisError::NotInGraph`] for keys without a plan,
    /// [`TrellisError::ReentrantConstruction`] when a value requests itself
    /// while being built; failures of user factories are returned unchanged.
    pub fn get(&self, key: &Key) -> Result<Instance> {
        self.resolver().get(key)
    }

    /// Typed form of [`get`](Self::get).
    pub fn get_as<T: Any + Send + Sync>(&self, key: &Key) -> Result<Arc<T>> {
        downcast::<T>(key, self.get(key)?)
    }

    /// Resolves the unqualified key of `T`.
    pub fn resolve<T: Any + Send + Sync>(&self) -> Result<Arc<T>> {
        self.get_as::<T>(&Key::of::<T>())
    }

    /// Resolves an optional key and unwraps its target.
    pub fn get_optional<T: Any + Send + Sync>(&self, key: &Key) -> Result<Option<Arc<T>>> {
        let value = self.get_as::<OptionalValue>(key)?;
        OptionalValue::downcast::<T>(&value, key)
    }

    pub fn get_map(&self, key: &Key) -> Result<Arc<MapValues>> {
        self.get_as::<MapValues>(key)
    }

    pub fn get_set(&self, key: &Key) -> Result<Arc<SetValues>> {
        self.get_as::<SetValues>(key)
    }

    /// Memoizing deferred handle for `key`.
    pub fn lazy(&self, key: &Key) -> Result<Arc<LazyProxy>> {
        let resolver = self.resolver();
        resolver.plan(key)?;
        Ok(Arc::new(LazyProxy::new(resolver.anchor(), key.clone())))
    }

    /// Handle that resolves `key` again on every call.
    pub fn provider(&self, key: &Key) -> Result<ProviderHandle> {
        let resolver = self.resolver();
        resolver.plan(key)?;
        Ok(ProviderHandle::new(resolver.anchor(), key.clone()))
    }

    /// Creates a subcomponent whose parent is `self`.
    pub fn create_child(
        &self,
        child_spec: &Arc<ComponentSpec>,
        child_graph: Arc<ResolvedGraph>,
        bound: BoundInstances,
    ) -> Result<ComponentInstance> {
        debug!(parent = %self.name(), child = %child_spec.name(), "Creating child component");
        ComponentInstance::create(child_spec, child_graph, Some(self), bound)
    }

    fn resolver(&self) -> Resolver<'_> {
        Resolver { graph: &self.inner.graph, base: self }
    }

    fn id(&self) -> usize {
        Arc::as_ptr(&self.inner) as usize
    }
}

// ═══════════════════════════════════════════
// Resolution
// ═══════════════════════════════════════════

/// Target of a deferred handle: the instance whose caches it uses and the
/// graph whose plans it follows.
///
/// The graph may belong to a descendant of `base` when the handle was made
/// for a value cached at `base`'s level.
#[derive(Clone)]
pub(crate) struct Anchor {
    base: WeakInstance,
    graph: Arc<ResolvedGraph>,
}

impl Anchor {
    pub(crate) fn get(&self, key: &Key) -> Result<Instance> {
        let base = self
            .base
            .upgrade()
            .ok_or_else(|| TrellisError::ComponentReleased { key: key.clone() })?;
        Resolver { graph: &self.graph, base: &base }.get(key)
    }
}

thread_local! {
    /// Unscoped keys being built on this thread, with their base instance.
    static UNDER_CONSTRUCTION: RefCell<Vec<(usize, Key)>> = const { RefCell::new(Vec::new()) };
}

/// Marks an unscoped key as under construction until dropped.
struct ConstructionGuard;

impl ConstructionGuard {
    fn enter(base: &ComponentInstance, key: &Key) -> Result<Self> {
        let entry = (base.id(), key.clone());
        UNDER_CONSTRUCTION.with(|stack| {
            let mut stack = stack.borrow_mut();
            if stack.contains(&entry) {
                warn!(component = %base.name(), key = %key, "Reentrant construction rejected");
                return Err(TrellisError::ReentrantConstruction(ReentrantConstructionError {
                    slot: Slot::Binding(key.clone()),
                    component: base.name().to_string(),
                }));
            }
            stack.push(entry);
            Ok(ConstructionGuard)
        })
    }
}

impl Drop for ConstructionGuard {
    fn drop(&mut self) {
        UNDER_CONSTRUCTION.with(|stack| {
            stack.borrow_mut().pop();
        });
    }
}

/// Plans come from `graph`, state from `base` and its ancestors.
#[derive(Clone, Copy)]
struct Resolver<'a> {
    graph: &'a Arc<ResolvedGraph>,
    base: &'a ComponentInstance,
}

impl<'a> Resolver<'a> {
    fn get(&self, key: &Key) -> Result<Instance> {
        let plan = self.plan(key)?;
        trace!(
            component = %self.graph.component_name(),
            base = %self.base.name(),
            key = %key,
            "Resolving"
        );

        if let PlanKind::BoundInstance { level } = plan.kind() {
            return self.bound_value(key, *level);
        }

        match plan.owner() {
            Some(owner) => {
                let slot = Slot::Binding(key.clone());
                let at_owner = self.rebase(self.ancestor(owner)?);
                at_owner.base.scope().get_or_create(&slot, || at_owner.produce(plan))
            }
            None => {
                let _guard = ConstructionGuard::enter(self.base, key)?;
                self.produce(plan)
            }
        }
    }

    fn rebase(&self, base: &'a ComponentInstance) -> Resolver<'a> {
        Resolver { graph: self.graph, base }
    }

    fn anchor(&self) -> Anchor {
        Anchor { base: self.base.downgrade(), graph: Arc::clone(self.graph) }
    }

    fn plan(&self, key: &Key) -> Result<&'a ResolutionPlan> {
        self.graph.plan(key).ok_or_else(|| {
            TrellisError::NotInGraph(NotInGraphError {
                key: key.clone(),
                component: self.graph.component_name().to_string(),
                suggestions: self.graph.suggestions(key),
            })
        })
    }

    /// The instance at hierarchy `level`, walking up from the base.
    fn ancestor(&self, level: usize) -> Result<&'a ComponentInstance> {
        let mut current = self.base;
        while current.level() > level {
            current = current.parent().ok_or_else(|| {
                TrellisError::ParentMismatch(ParentMismatchError {
                    component: current.name().to_string(),
                    expected: Some(format!("an ancestor at level {level}")),
                    actual: None,
                })
            })?;
        }
        if current.level() < level {
            return Err(TrellisError::ParentMismatch(ParentMismatchError {
                component: current.name().to_string(),
                expected: Some(format!("a descendant at level {level}")),
                actual: Some(current.name().to_string()),
            }));
        }
        Ok(current)
    }

    fn bound_value(&self, key: &Key, level: usize) -> Result<Instance> {
        let owner = self.ancestor(level)?;
        owner.inner.bound.get(key).cloned().ok_or_else(|| {
            TrellisError::NotInGraph(NotInGraphError {
                key: key.clone(),
                component: owner.name().to_string(),
                suggestions: Vec::new(),
            })
        })
    }

    fn produce(&self, plan: &ResolutionPlan) -> Result<Instance> {
        match plan.kind() {
            PlanKind::Produce { producer, .. } => {
                let args = self.arguments(producer.dependencies())?;
                producer.produce(&args)
            }
            PlanKind::Alias { target } => self.get(target),
            PlanKind::Optional { target, present } => {
                let value = if *present { Some(self.get(target)?) } else { None };
                Ok(Arc::new(OptionalValue(value)))
            }
            PlanKind::Multibinding { aggregate, owners } => {
                let elements = aggregate
                    .contributions
                    .iter()
                    .zip(owners)
                    .map(|(contribution, owner)| self.element(contribution, *owner));

                match aggregate.kind {
                    MultibindingKind::Map => {
                        let mut entries = Vec::with_capacity(aggregate.contributions.len());
                        for (contribution, value) in aggregate.contributions.iter().zip(elements) {
                            let discriminator = contribution.discriminator.clone().unwrap_or_default();
                            entries.push((discriminator, value?));
                        }
                        Ok(Arc::new(MapValues::new(entries)))
                    }
                    MultibindingKind::Set => {
                        let values = elements.collect::<Result<Vec<_>>>()?;
                        Ok(Arc::new(SetValues::new(values)))
                    }
                }
            }
            PlanKind::Subcomponent { name } => {
                let installer = self.ancestor(plan.declared_at())?;
                Ok(Arc::new(SubcomponentFactory {
                    parent: installer.downgrade(),
                    name: Arc::clone(name),
                }))
            }
            PlanKind::BoundInstance { level } => self.bound_value(plan.key(), *level),
        }
    }

    fn element(&self, contribution: &ContributionPlan, owner: Option<usize>) -> Result<Instance> {
        let build = |at: Resolver<'a>| {
            let args = at.arguments(contribution.producer.dependencies())?;
            contribution.producer.produce(&args)
        };
        match owner {
            Some(owner) => {
                let slot = Slot::Contribution(contribution.id.clone());
                let at_owner = self.rebase(self.ancestor(owner)?);
                at_owner.base.scope().get_or_create(&slot, || build(at_owner))
            }
            None => build(*self),
        }
    }

    fn arguments(&self, dependencies: &[Dependency]) -> Result<Args> {
        let mut args = Args::with_capacity(dependencies.len());
        for dependency in dependencies {
            let key = dependency.key.clone();
            let arg = match dependency.kind {
                RequestKind::Instance => Arg::Instance(self.get(&key)?),
                RequestKind::Lazy => Arg::Lazy(Arc::new(LazyProxy::new(self.anchor(), key.clone()))),
                RequestKind::Provider => Arg::Provider(ProviderHandle::new(self.anchor(), key.clone())),
            };
            args.push(key, arg);
        }
        Ok(args)
    }
}

impl fmt::Debug for ComponentInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentInstance")
            .field("component", &self.name())
            .field("level", &self.level())
            .field("bound", &self.inner.bound.len())
            .field("cached", &self.inner.scope.len())
            .finish()
    }
}

// ═══════════════════════════════════════════
// SubcomponentFactory
// ═══════════════════════════════════════════

/// Creates instances of a subcomponent linked from a module.
///
/// Resolved under [`SubcomponentFactory::key`]; children get the
/// installing component's instance as parent.
#[derive(Clone)]
pub struct SubcomponentFactory {
    parent: WeakInstance,
    name: Arc<str>,
}

impl SubcomponentFactory {
    /// Key under which the factory for subcomponent `name` is bound.
    pub fn key(name: &str) -> Key {
        Key::named::<SubcomponentFactory>(name.to_string())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Creates a child from `graph`, which must be built for this
    /// subcomponent.
    ///
    /// # Errors
    /// [`TrellisError::ComponentReleased`] if the parent is gone,
    /// [`TrellisError::GraphMismatch`] for a graph of another component,
    /// plus the errors of [`ComponentInstance::create`].
    pub fn create(
        &self,
        graph: &Arc<ResolvedGraph>,
        bound: BoundInstances,
    ) -> Result<ComponentInstance> {
        let parent = self
            .parent
            .upgrade()
            .ok_or_else(|| TrellisError::ComponentReleased { key: Self::key(&self.name) })?;

        if graph.component_name() != &*self.name {
            return Err(TrellisError::GraphMismatch {
                component: self.name.to_string(),
                graph: graph.component_name().to_string(),
            });
        }

        parent.create_child(graph.spec(), Arc::clone(graph), bound)
    }
}

impl fmt::Debug for SubcomponentFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubcomponentFactory").field("name", &self.name).finish()
    }
}

// ═══════════════════════════════════════════
// Free functions
// ═══════════════════════════════════════════

/// Validates `spec` with default settings.
///
/// # Errors
/// Every diagnostic found, as one batch.
pub fn build_graph(spec: &Arc<ComponentSpec>) -> std::result::Result<Arc<ResolvedGraph>, DiagnosticBatch> {
    let mut registry = BindingRegistry::new();
    registry.register_component(spec);
    GraphResolver::new(&registry).resolve(spec).map(Arc::new)
}

/// See [`ComponentInstance::create`].
pub fn create_instance(
    spec: &Arc<ComponentSpec>,
    graph: Arc<ResolvedGraph>,
    parent: Option<&ComponentInstance>,
    bound: BoundInstances,
) -> Result<ComponentInstance> {
    ComponentInstance::create(spec, graph, parent, bound)
}

/// See [`ComponentInstance::get`].
pub fn get(instance: &ComponentInstance, key: &Key) -> Result<Instance> {
    instance.get(key)
}

/// See [`ComponentInstance::create_child`].
pub fn create_child(
    instance: &ComponentInstance,
    child_spec: &Arc<ComponentSpec>,
    child_graph: Arc<ResolvedGraph>,
    bound: BoundInstances,
) -> Result<ComponentInstance> {
    instance.create_child(child_spec, child_graph, bound)
}

// ═══════════════════════════════════════════
// Prelude
// ═══════════════════════════════════════════

pub mod prelude {
    pub use super::{
        BoundInstances, ComponentInstance, SubcomponentFactory, build_graph, create_child,
        create_instance, get,
    };
    pub use crate::binding::{Args, Binding, Dependency, Instance, MultibindingKind, OptionalValue};
    pub use crate::component::ComponentSpec;
    pub use crate::error::{Diagnostic, DiagnosticBatch, Result, TrellisError};
    pub use crate::graph::{GraphResolver, ResolvedGraph};
    pub use crate::key::Key;
    pub use crate::lazy::{LazyProxy, ProviderHandle};
    pub use crate::module::{Module, ModuleBuilder, ModuleDefinition};
    pub use crate::multibinding::{MapValues, SetValues};
    pub use crate::registry::BindingRegistry;
    pub use crate::scope::ScopeTag;
    pub use crate::settings::GraphSettings;
}

// ═══════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════
