//! Binding declarations: the typed data every front end produces.
//!
//! A [`Binding`] tells the graph how to answer one [`Key`]. Bindings never
//! live on their own: they are declared inside a
//! [`Module`](crate::module::Module), which components install.
//!
//! # Examples
//! ```
//! use std::sync::Arc;
//! use trellis_container::binding::{Binding, Dependency};
//! use trellis_container::key::Key;
//! use trellis_container::scope::ScopeTag;
//!
//! struct Database;
//! struct Ledger { db: Arc<Database> }
//!
//! let db = Binding::constructor(Key::of::<Database>(), vec![], |_| Ok(Database))
//!     .in_scope(ScopeTag::new("Root"));
//! let ledger = Binding::provider(
//!     Key::of::<Ledger>(),
//!     vec![Dependency::instance(Key::of::<Database>())],
//!     |args| Ok(Ledger { db: args.instance::<Database>(0)? }),
//! );
//! assert!(db.scope().is_some());
//! assert_eq!(ledger.dependencies().len(), 1);
//! ```

use std::any::{Any, type_name};
use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;

use crate::error::{Result, TrellisError};
use crate::key::Key;
use crate::lazy::{LazyProxy, ProviderHandle};
use crate::scope::ScopeTag;

/// A materialized, type-erased value.
///
/// Scoped values are shared by cloning the `Arc`, so identity can be
/// checked with [`Arc::ptr_eq`].
pub type Instance = Arc<dyn Any + Send + Sync>;

/// Discriminator of a map multibinding entry.
pub type MapKey = Cow<'static, str>;

/// User construction logic. Receives the resolved dependencies in
/// declaration order.
pub type FactoryFn = Arc<dyn Fn(&Args) -> Result<Instance> + Send + Sync>;

/// Stable identity of a binding: declaring module plus position.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BindingId {
    pub module: Arc<str>,
    pub index: usize,
}

impl fmt::Display for BindingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.module, self.index)
    }
}

/// How a dependency is requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestKind {
    /// The value itself, built before the dependent.
    Instance,
    /// A memoizing [`LazyProxy`]; nothing is built until first access.
    Lazy,
    /// A [`ProviderHandle`] that performs a fresh request per call.
    Provider,
}

impl RequestKind {
    /// Deferred requests do not take part in cycle detection.
    #[inline]
    pub fn is_deferred(&self) -> bool {
        !matches!(self, RequestKind::Instance)
    }
}

/// One dependency edge of a binding.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Dependency {
    pub key: Key,
    pub kind: RequestKind,
}

impl Dependency {
    pub fn instance(key: Key) -> Self {
        Self { key, kind: RequestKind::Instance }
    }

    pub fn lazy(key: Key) -> Self {
        Self { key, kind: RequestKind::Lazy }
    }

    pub fn provider(key: Key) -> Self {
        Self { key, kind: RequestKind::Provider }
    }
}

impl From<Key> for Dependency {
    fn from(key: Key) -> Self {
        Self::instance(key)
    }
}

/// Dependencies plus the logic that turns them into a value.
#[derive(Clone)]
pub struct Producer {
    dependencies: Vec<Dependency>,
    factory: FactoryFn,
}

impl Producer {
    /// Wraps a typed factory; its result is stored behind an `Arc`.
    pub fn new<T, F>(dependencies: Vec<Dependency>, factory: F) -> Self
    where
        T: Send + Sync + 'static,
        F: Fn(&Args) -> Result<T> + Send + Sync + 'static,
    {
        Self {
            dependencies,
            factory: Arc::new(move |args: &Args| Ok(Arc::new(factory(args)?) as Instance)),
        }
    }

    /// Uses an already type-erased factory.
    pub fn from_fn(dependencies: Vec<Dependency>, factory: FactoryFn) -> Self {
        Self { dependencies, factory }
    }

    pub fn dependencies(&self) -> &[Dependency] {
        &self.dependencies
    }

    /// Runs the factory. Its error is returned as-is.
    pub(crate) fn produce(&self, args: &Args) -> Result<Instance> {
        (self.factory)(args)
    }
}

impl fmt::Debug for Producer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Producer")
            .field("dependencies", &self.dependencies)
            .finish_non_exhaustive()
    }
}

/// Which aggregate a multibinding key produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MultibindingKind {
    Map,
    Set,
}

impl fmt::Display for MultibindingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MultibindingKind::Map => write!(f, "map"),
            MultibindingKind::Set => write!(f, "set"),
        }
    }
}

/// The rule a binding follows.
#[derive(Debug, Clone)]
pub enum BindingKind {
    /// Injectable constructor of the key's type.
    Constructor(Producer),
    /// Module-declared provider function.
    Provider(Producer),
    /// Answers with whatever `target` resolves to.
    Alias { target: Key },
    /// Answers with an [`OptionalValue`] of `target`.
    Optional { target: Key },
    MapContribution { discriminator: MapKey, element: Producer },
    SetContribution { element: Producer },
    /// Declares a possibly empty multibinding without contributing.
    Multibinds(MultibindingKind),
}

impl BindingKind {
    pub fn label(&self) -> &'static str {
        match self {
            BindingKind::Constructor(_) => "constructor",
            BindingKind::Provider(_) => "provider",
            BindingKind::Alias { .. } => "alias",
            BindingKind::Optional { .. } => "optional",
            BindingKind::MapContribution { .. } => "map contribution",
            BindingKind::SetContribution { .. } => "set contribution",
            BindingKind::Multibinds(_) => "multibinding declaration",
        }
    }
}

/// How to produce the value for one key.
#[derive(Debug, Clone)]
pub struct Binding {
    key: Key,
    kind: BindingKind,
    scope: Option<ScopeTag>,
}

impl Binding {
    pub fn new(key: Key, kind: BindingKind) -> Self {
        Self { key, kind, scope: None }
    }

    pub fn constructor<T, F>(key: Key, dependencies: Vec<Dependency>, factory: F) -> Self
    where
        T: Send + Sync + 'static,
        F: Fn(&Args) -> Result<T> + Send + Sync + 'static,
    {
        Self::new(key, BindingKind::Constructor(Producer::new(dependencies, factory)))
    }

    pub fn provider<T, F>(key: Key, dependencies: Vec<Dependency>, factory: F) -> Self
    where
        T: Send + Sync + 'static,
        F: Fn(&Args) -> Result<T> + Send + Sync + 'static,
    {
        Self::new(key, BindingKind::Provider(Producer::new(dependencies, factory)))
    }

    pub fn alias(key: Key, target: Key) -> Self {
        Self::new(key, BindingKind::Alias { target })
    }

    pub fn optional(key: Key, target: Key) -> Self {
        Self::new(key, BindingKind::Optional { target })
    }

    /// Optional binding keyed by `Option<T>` for the unqualified `T`.
    pub fn optional_of<T: ?Sized + 'static>() -> Self {
        Self::optional(Key::of::<Option<Arc<T>>>(), Key::of::<T>())
    }

    pub fn map_entry<T, F>(
        key: Key,
        discriminator: impl Into<MapKey>,
        dependencies: Vec<Dependency>,
        factory: F,
    ) -> Self
    where
        T: Send + Sync + 'static,
        F: Fn(&Args) -> Result<T> + Send + Sync + 'static,
    {
        Self::new(
            key,
            BindingKind::MapContribution {
                discriminator: discriminator.into(),
                element: Producer::new(dependencies, factory),
            },
        )
    }

    pub fn set_element<T, F>(key: Key, dependencies: Vec<Dependency>, factory: F) -> Self
    where
        T: Send + Sync + 'static,
        F: Fn(&Args) -> Result<T> + Send + Sync + 'static,
    {
        Self::new(
            key,
            BindingKind::SetContribution { element: Producer::new(dependencies, factory) },
        )
    }

    /// Declares `key` a multibinding without contributing to it.
    pub fn multibinds(key: Key, kind: MultibindingKind) -> Self {
        Self::new(key, BindingKind::Multibinds(kind))
    }

    pub fn multibinds_map(key: Key) -> Self {
        Self::multibinds(key, MultibindingKind::Map)
    }

    pub fn multibinds_set(key: Key) -> Self {
        Self::multibinds(key, MultibindingKind::Set)
    }

    /// Attaches a scope tag.
    pub fn in_scope(mut self, scope: ScopeTag) -> Self {
        self.scope = Some(scope);
        self
    }

    pub fn key(&self) -> &Key {
        &self.key
    }

    pub fn kind(&self) -> &BindingKind {
        &self.kind
    }

    pub fn scope(&self) -> Option<&ScopeTag> {
        self.scope.as_ref()
    }

    /// Multibinding aggregate this binding feeds, if any.
    pub fn multibinding_kind(&self) -> Option<MultibindingKind> {
        match &self.kind {
            BindingKind::MapContribution { .. } => Some(MultibindingKind::Map),
            BindingKind::SetContribution { .. } => Some(MultibindingKind::Set),
            BindingKind::Multibinds(kind) => Some(*kind),
            _ => None,
        }
    }

    /// Dependency edges of the binding, in declaration order.
    pub fn dependencies(&self) -> Vec<Dependency> {
        match &self.kind {
            BindingKind::Constructor(p) | BindingKind::Provider(p) => p.dependencies().to_vec(),
            BindingKind::MapContribution { element, .. } | BindingKind::SetContribution { element } => {
                element.dependencies().to_vec()
            }
            BindingKind::Alias { target } => vec![Dependency::instance(target.clone())],
            BindingKind::Optional { .. } | BindingKind::Multibinds(_) => Vec::new(),
        }
    }
}

/// One resolved dependency handed to a factory.
#[derive(Debug, Clone)]
pub enum Arg {
    Instance(Instance),
    Lazy(Arc<LazyProxy>),
    Provider(ProviderHandle),
}

/// Resolved dependencies of a binding, in the binding's declaration order.
#[derive(Debug, Default)]
pub struct Args {
    entries: Vec<(Key, Arg)>,
}

impl Args {
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        Self { entries: Vec::with_capacity(capacity) }
    }

    pub(crate) fn push(&mut self, key: Key, arg: Arg) {
        self.entries.push((key, arg));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Raw access to argument `index`.
    pub fn get(&self, index: usize) -> Result<(&Key, &Arg)> {
        self.entries
            .get(index)
            .map(|(key, arg)| (key, arg))
            .ok_or(TrellisError::ArgumentMismatch { index, expected: "an argument" })
    }

    /// Argument `index`, requested as a plain instance of `T`.
    pub fn instance<T: Any + Send + Sync>(&self, index: usize) -> Result<Arc<T>> {
        match self.get(index)? {
            (key, Arg::Instance(value)) => downcast::<T>(key, Arc::clone(value)),
            _ => Err(TrellisError::ArgumentMismatch { index, expected: "an instance" }),
        }
    }

    /// Argument `index`, requested through [`Dependency::lazy`].
    pub fn lazy(&self, index: usize) -> Result<Arc<LazyProxy>> {
        match self.get(index)? {
            (_, Arg::Lazy(proxy)) => Ok(Arc::clone(proxy)),
            _ => Err(TrellisError::ArgumentMismatch { index, expected: "a lazy handle" }),
        }
    }

    /// Argument `index`, requested through [`Dependency::provider`].
    pub fn provider(&self, index: usize) -> Result<ProviderHandle> {
        match self.get(index)? {
            (_, Arg::Provider(handle)) => Ok(handle.clone()),
            _ => Err(TrellisError::ArgumentMismatch { index, expected: "a provider handle" }),
        }
    }
}

/// Result shape of an [`BindingKind::Optional`] key.
#[derive(Debug, Clone)]
pub struct OptionalValue(pub Option<Instance>);

impl OptionalValue {
    pub fn is_present(&self) -> bool {
        self.0.is_some()
    }

    /// Typed view of the wrapped value.
    pub fn downcast<T: Any + Send + Sync>(&self, key: &Key) -> Result<Option<Arc<T>>> {
        self.0
            .as_ref()
            .map(|value| downcast::<T>(key, Arc::clone(value)))
            .transpose()
    }
}

/// Converts a type-erased value into `Arc<T>`.
pub(crate) fn downcast<T: Any + Send + Sync>(key: &Key, value: Instance) -> Result<Arc<T>> {
    value.downcast::<T>().map_err(|_| TrellisError::TypeMismatch {
        key: key.clone(),
        expected: type_name::<T>(),
    })
}
