//! Scope tags and per-instance scope caches.
//!
//! A [`ScopeTag`] marks a binding whose value is shared for the lifetime of
//! one component instance carrying the same tag. Bindings without a tag are
//! unscoped and built fresh on every request.
//!
//! # Ownership
//! A scoped binding is owned by the nearest component in the ancestor chain
//! (self included) whose own tag equals the binding's tag. The owning
//! instance's [`ScopeManager`] caches the value.
//!
//! # Concurrency
//! The cache is a [`DashMap`] of per-slot cells. The map's shard lock is
//! held only while the slot cell is looked up or inserted; the first
//! construction of a slot is serialized by that slot's own [`OnceCell`], so
//! unrelated keys never wait on each other.

use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;
use std::thread::{self, ThreadId};

use dashmap::DashMap;
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use crate::binding::{BindingId, Instance};
use crate::error::{ReentrantConstructionError, Result, TrellisError};
use crate::key::Key;

/// Names a lifetime boundary, e.g. `Root` or `Session`.
///
/// ```
/// use trellis_container::scope::ScopeTag;
///
/// assert_eq!(ScopeTag::new("Session"), ScopeTag::new(String::from("Session")));
/// assert_ne!(ScopeTag::new("Session"), ScopeTag::new("Root"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ScopeTag(Cow<'static, str>);

impl ScopeTag {
    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ScopeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{}", self.0)
    }
}

/// A cacheable position in a component: either a unique key or one
/// scoped multibinding contribution.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Slot {
    Binding(Key),
    Contribution(BindingId),
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Slot::Binding(key) => write!(f, "{key}"),
            Slot::Contribution(id) => write!(f, "contribution {id}"),
        }
    }
}

#[derive(Default)]
struct CacheSlot {
    value: OnceCell<Instance>,
    /// Thread currently running this slot's producer.
    builder: Mutex<Option<ThreadId>>,
}

/// Resets the builder marker even if the producer fails.
struct BuilderGuard<'a> {
    builder: &'a Mutex<Option<ThreadId>>,
}

impl<'a> BuilderGuard<'a> {
    fn enter(builder: &'a Mutex<Option<ThreadId>>, thread: ThreadId) -> Self {
        *builder.lock() = Some(thread);
        Self { builder }
    }
}

impl Drop for BuilderGuard<'_> {
    fn drop(&mut self) {
        *self.builder.lock() = None;
    }
}

/// Scope cache of one component instance.
///
/// Holds the materialized values of every slot owned at that instance's
/// level. Created empty together with the instance and dropped with it.
pub struct ScopeManager {
    component: Arc<str>,
    slots: DashMap<Slot, Arc<CacheSlot>>,
}

impl ScopeManager {
    pub fn new(component: impl Into<Arc<str>>) -> Self {
        Self {
            component: component.into(),
            slots: DashMap::new(),
        }
    }

    /// Returns the cached value for `slot`, running `producer` to create it
    /// on first request.
    ///
    /// `producer` runs at most once per slot even when several threads
    /// race on the first request; the losers block until the winner
    /// finishes and then share its value. If the producer fails, nothing is
    /// cached and the error is returned unchanged.
    ///
    /// # Errors
    /// [`TrellisError::ReentrantConstruction`] if `producer` (directly or
    /// through a deferred handle) requests the slot it is building.
    pub fn get_or_create<F>(&self, slot: &Slot, producer: F) -> Result<Instance>
    where
        F: FnOnce() -> Result<Instance>,
    {
        let cell = Arc::clone(self.slots.entry(slot.clone()).or_default().value());

        if let Some(value) = cell.value.get() {
            trace!(component = %self.component, slot = %slot, "Scope cache hit");
            return Ok(Arc::clone(value));
        }

        let current = thread::current().id();
        if *cell.builder.lock() == Some(current) {
            warn!(component = %self.component, slot = %slot, "Reentrant construction rejected");
            return Err(TrellisError::ReentrantConstruction(
                ReentrantConstructionError {
                    slot: slot.clone(),
                    component: self.component.to_string(),
                },
            ));
        }

        let value = cell.value.get_or_try_init(|| {
            let _guard = BuilderGuard::enter(&cell.builder, current);
            debug!(component = %self.component, slot = %slot, "Constructing scoped value");
            producer()
        })?;

        Ok(Arc::clone(value))
    }

    /// Returns `true` if `slot` already holds a value.
    pub fn contains(&self, slot: &Slot) -> bool {
        self.slots
            .get(slot)
            .is_some_and(|cell| cell.value.get().is_some())
    }

    /// Number of materialized values.
    pub fn len(&self) -> usize {
        self.slots
            .iter()
            .filter(|entry| entry.value().value.get().is_some())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for ScopeManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScopeManager")
            .field("component", &self.component)
            .field("cached", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Barrier;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Database;

    fn slot() -> Slot {
        Slot::Binding(Key::of::<Database>())
    }

    #[test]
    fn tag_display() {
        assert_eq!(ScopeTag::new("Root").to_string(), "@Root");
        assert_eq!(ScopeTag::new("Root").as_str(), "Root");
    }

    #[test]
    fn producer_runs_once() {
        let scope = ScopeManager::new("Bank");
        let calls = AtomicUsize::new(0);
        let make = || {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(7u32) as Instance)
        };

        let a = scope.get_or_create(&slot(), make).unwrap();
        let b = scope
            .get_or_create(&slot(), || panic!("must not run twice"))
            .unwrap();

        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(scope.contains(&slot()));
        assert_eq!(scope.len(), 1);
    }

    #[test]
    fn failed_producer_caches_nothing() {
        let scope = ScopeManager::new("Bank");
        let err = scope
            .get_or_create(&slot(), || Err(TrellisError::provision("disk offline")))
            .unwrap_err();
        assert_eq!(err.to_string(), "disk offline");
        assert!(scope.is_empty());

        let value = scope.get_or_create(&slot(), || Ok(Arc::new(1u8) as Instance));
        assert!(value.is_ok());
    }

    #[test]
    fn reentrant_request_is_rejected() {
        let scope = ScopeManager::new("Session");
        let result = scope.get_or_create(&slot(), || {
            scope.get_or_create(&slot(), || Ok(Arc::new(0u8) as Instance))
        });

        match result.unwrap_err() {
            TrellisError::ReentrantConstruction(err) => {
                assert_eq!(err.slot, slot());
                assert_eq!(err.component, "Session");
            }
            other => panic!("Expected ReentrantConstruction, got: {other:?}"),
        }
        assert!(scope.is_empty());
    }

    #[test]
    fn distinct_slots_are_independent() {
        let scope = ScopeManager::new("Bank");
        let a = scope
            .get_or_create(&Slot::Binding(Key::named::<u8>("a")), || Ok(Arc::new(1u8) as Instance))
            .unwrap();
        let b = scope
            .get_or_create(&Slot::Binding(Key::named::<u8>("b")), || Ok(Arc::new(1u8) as Instance))
            .unwrap();
        assert!(!Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn nested_construction_of_other_slot_is_allowed() {
        let scope = ScopeManager::new("Bank");
        let outer = scope.get_or_create(&Slot::Binding(Key::named::<u8>("outer")), || {
            scope.get_or_create(&Slot::Binding(Key::named::<u8>("inner")), || {
                Ok(Arc::new(2u8) as Instance)
            })
        });
        assert!(outer.is_ok());
        assert_eq!(scope.len(), 2);
    }

    #[test]
    fn concurrent_first_requests_share_one_construction() {
        const THREADS: usize = 8;
        let scope = ScopeManager::new("Bank");
        let calls = AtomicUsize::new(0);
        let barrier = Barrier::new(THREADS);

        let values: Vec<Instance> = thread::scope(|s| {
            let handles: Vec<_> = (0..THREADS)
                .map(|_| {
                    s.spawn(|| {
                        barrier.wait();
                        scope
                            .get_or_create(&slot(), || {
                                calls.fetch_add(1, Ordering::SeqCst);
                                thread::sleep(std::time::Duration::from_millis(10));
                                Ok(Arc::new(Database) as Instance)
                            })
                            .unwrap()
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(values.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
    }
}
