//! Deferred access to a component's bindings.
//!
//! [`LazyProxy`] memoizes the first successful request in the proxy object
//! itself, independent of the key's scope. [`ProviderHandle`] memoizes
//! nothing: every call is a fresh request, which for an unscoped key means a
//! fresh value.
//!
//! Both hold a weak reference to a component. A scoped value that stores a
//! handle therefore never keeps its own component alive. Handles made while
//! building a scoped value refer to the component caching it, not to the
//! descendant that happened to request it first.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use once_cell::sync::OnceCell;
use tracing::trace;

use crate::binding::{Instance, downcast};
use crate::container::Anchor;
use crate::error::Result;
use crate::key::Key;

/// Memoizing, deferred request for one key.
pub struct LazyProxy {
    anchor: Anchor,
    key: Key,
    value: OnceCell<Instance>,
}

impl LazyProxy {
    pub(crate) fn new(anchor: Anchor, key: Key) -> Self {
        Self { anchor, key, value: OnceCell::new() }
    }

    pub fn key(&self) -> &Key {
        &self.key
    }

    /// Returns `true` once the value has been acquired.
    pub fn is_resolved(&self) -> bool {
        self.value.get().is_some()
    }

    /// Resolves the key on first call and returns the same value afterwards.
    ///
    /// A failed attempt is not memoized.
    ///
    /// # Errors
    /// [`ComponentReleased`](crate::error::TrellisError::ComponentReleased)
    /// if the component is gone, or whatever the underlying request fails
    /// with.
    pub fn get(&self) -> Result<Instance> {
        let value = self.value.get_or_try_init(|| {
            trace!(key = %self.key, "Lazy first access");
            self.anchor.get(&self.key)
        })?;
        Ok(Arc::clone(value))
    }

    /// Typed form of [`get`](Self::get).
    pub fn get_as<T: Any + Send + Sync>(&self) -> Result<Arc<T>> {
        downcast::<T>(&self.key, self.get()?)
    }
}

impl fmt::Debug for LazyProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LazyProxy")
            .field("key", &self.key)
            .field("resolved", &self.is_resolved())
            .finish()
    }
}

/// Deferred request that re-resolves on every call.
#[derive(Clone)]
pub struct ProviderHandle {
    anchor: Anchor,
    key: Key,
}

impl ProviderHandle {
    pub(crate) fn new(anchor: Anchor, key: Key) -> Self {
        Self { anchor, key }
    }

    pub fn key(&self) -> &Key {
        &self.key
    }

    /// # Errors
    /// [`ComponentReleased`](crate::error::TrellisError::ComponentReleased)
    /// if the component is gone, or whatever the underlying request fails
    /// with.
    pub fn get(&self) -> Result<Instance> {
        self.anchor.get(&self.key)
    }

    pub fn get_as<T: Any + Send + Sync>(&self) -> Result<Arc<T>> {
        downcast::<T>(&self.key, self.get()?)
    }
}

impl fmt::Debug for ProviderHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderHandle").field("key", &self.key).finish()
    }
}
