//! Map and set multibindings.
//!
//! A multibinding key collects every contribution visible to a component.
//! Visibility is cumulative down the chain: a subcomponent sees its
//! ancestors' contributions plus its own, and can never hide or replace an
//! ancestor's entry.
//!
//! # Ordering
//! Contributions are ordered by level (root first), then by module
//! registration order, then by declaration order inside the module. Map
//! results keep the same order for iteration.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use tracing::{trace, warn};

use crate::binding::{BindingId, BindingKind, Instance, MapKey, MultibindingKind, Producer};
use crate::error::{Diagnostic, DuplicateBindingError, DuplicateMapKeyError};
use crate::key::Key;
use crate::registry::VisibleBindings;
use crate::scope::ScopeTag;

/// One contribution as it will be produced at runtime.
#[derive(Debug, Clone)]
pub struct ContributionPlan {
    pub id: BindingId,
    /// Map entries only.
    pub discriminator: Option<MapKey>,
    pub producer: Producer,
    pub scope: Option<ScopeTag>,
    /// Level of the component that declared the contribution.
    pub level: usize,
}

/// Ordered contributions for one multibinding key.
#[derive(Debug, Clone)]
pub struct Aggregate {
    pub key: Key,
    pub kind: MultibindingKind,
    pub contributions: Vec<ContributionPlan>,
}

/// Merges the contributions a component can see.
pub struct MultibindingAggregator<'v> {
    visible: &'v VisibleBindings,
}

impl<'v> MultibindingAggregator<'v> {
    pub fn new(visible: &'v VisibleBindings) -> Self {
        Self { visible }
    }

    /// Aggregates `key`, or returns `None` if it is not a multibinding.
    ///
    /// # Errors
    /// Every problem found for the key: [`Diagnostic::DuplicateBinding`]
    /// when map and set contributions are mixed,
    /// [`Diagnostic::DuplicateMapKey`] once per colliding discriminator.
    pub fn aggregate(&self, key: &Key) -> Option<Result<Aggregate, Vec<Diagnostic>>> {
        let declarations = self.visible.multibinding_declarations(key);
        let first = declarations.first()?;
        let kind = first.binding.multibinding_kind()?;
        let mut diagnostics = Vec::new();

        if declarations
            .iter()
            .any(|d| d.binding.multibinding_kind() != Some(kind))
        {
            let chain = self.visible.chain();
            warn!(key = %key, "Map and set contributions mixed on one key");
            diagnostics.push(Diagnostic::DuplicateBinding(DuplicateBindingError {
                key: key.clone(),
                component: self.visible.component_name().to_string(),
                declarations: declarations
                    .iter()
                    .map(|d| {
                        format!(
                            "{} in module `{}` (component `{}`)",
                            d.binding.kind().label(),
                            d.id.module,
                            chain.get(d.level).map(|c| &*c.name).unwrap_or_default(),
                        )
                    })
                    .collect(),
            }));
        }

        let mut contributions = Vec::new();
        let mut by_discriminator: HashMap<&str, Vec<&str>> = HashMap::new();
        let mut discriminator_order = Vec::new();

        for declared in declarations {
            let (discriminator, producer) = match declared.binding.kind() {
                BindingKind::MapContribution { discriminator, element } => {
                    let modules = by_discriminator.entry(&**discriminator).or_default();
                    if modules.is_empty() {
                        discriminator_order.push(&**discriminator);
                    }
                    modules.push(&declared.id.module);
                    (Some(discriminator.clone()), element.clone())
                }
                BindingKind::SetContribution { element } => (None, element.clone()),
                _ => continue,
            };

            contributions.push(ContributionPlan {
                id: declared.id.clone(),
                discriminator,
                producer,
                scope: declared.binding.scope().cloned(),
                level: declared.level,
            });
        }

        for discriminator in discriminator_order {
            let modules = &by_discriminator[discriminator];
            if modules.len() > 1 {
                warn!(key = %key, discriminator, "Duplicate map key");
                diagnostics.push(Diagnostic::DuplicateMapKey(DuplicateMapKeyError {
                    key: key.clone(),
                    discriminator: discriminator.to_string(),
                    modules: modules.iter().map(|m| m.to_string()).collect(),
                }));
            }
        }

        if !diagnostics.is_empty() {
            return Some(Err(diagnostics));
        }

        trace!(key = %key, %kind, contributions = contributions.len(), "Aggregated multibinding");
        Some(Ok(Aggregate { key: key.clone(), kind, contributions }))
    }
}

/// Runtime value of a map multibinding.
#[derive(Debug, Clone, Default)]
pub struct MapValues {
    entries: Vec<(MapKey, Instance)>,
}

impl MapValues {
    pub(crate) fn new(entries: Vec<(MapKey, Instance)>) -> Self {
        Self { entries }
    }

    pub fn get(&self, discriminator: &str) -> Option<&Instance> {
        self.entries
            .iter()
            .find(|(d, _)| d == discriminator)
            .map(|(_, value)| value)
    }

    /// Typed entry; `None` if absent or of another type.
    pub fn get_as<T: Any + Send + Sync>(&self, discriminator: &str) -> Option<Arc<T>> {
        self.get(discriminator)
            .and_then(|value| Arc::clone(value).downcast::<T>().ok())
    }

    pub fn contains_key(&self, discriminator: &str) -> bool {
        self.get(discriminator).is_some()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(d, _)| d.as_ref())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Instance)> {
        self.entries.iter().map(|(d, value)| (d.as_ref(), value))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Runtime value of a set multibinding.
#[derive(Debug, Clone, Default)]
pub struct SetValues {
    elements: Vec<Instance>,
}

impl SetValues {
    pub(crate) fn new(elements: Vec<Instance>) -> Self {
        Self { elements }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Instance> {
        self.elements.iter()
    }

    /// Elements of type `T`, in contribution order.
    pub fn of_type<T: Any + Send + Sync>(&self) -> Vec<Arc<T>> {
        self.elements
            .iter()
            .filter_map(|value| Arc::clone(value).downcast::<T>().ok())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }
}
