//! Binding identification keys.
//!
//! A [`Key`] uniquely identifies a requestable slot in a component graph.
//! It combines a [`TypeId`] with an optional qualifier so several bindings
//! of the same type can coexist.

use std::any::{TypeId, type_name};
use std::borrow::Cow;
use std::fmt;
use std::hash::{Hash, Hasher};

use trellis_support::rendering::shorten_type_name;

/// Qualifier text distinguishing keys of the same type.
pub type Qualifier = Cow<'static, str>;

/// Uniquely identifies a requestable slot.
///
/// Two keys are equal iff both the [`TypeId`] and the qualifier match.
/// The type name is carried for diagnostics only.
///
/// # Examples
/// ```
/// use trellis_container::key::Key;
///
/// let key = Key::of::<String>();
/// assert_eq!(key.type_name(), "alloc::string::String");
/// assert_eq!(key.qualifier(), None);
///
/// let key = Key::named::<String>("database_url");
/// assert_eq!(key.qualifier(), Some("database_url"));
/// ```
#[derive(Clone)]
pub struct Key {
    type_id: TypeId,
    type_name: &'static str,
    qualifier: Option<Qualifier>,
}

impl Key {
    /// Creates a key for type `T`.
    #[inline]
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self {
            type_id: TypeId::of::<T>(),
            type_name: type_name::<T>(),
            qualifier: None,
        }
    }

    /// Creates a qualified key for type `T`.
    ///
    /// ```
    /// use trellis_container::key::Key;
    ///
    /// let primary = Key::named::<String>("primary_db");
    /// let replica = Key::named::<String>("replica_db");
    /// assert_ne!(primary, replica);
    /// ```
    #[inline]
    pub fn named<T: ?Sized + 'static>(qualifier: impl Into<Qualifier>) -> Self {
        Self::of::<T>().with_qualifier(qualifier)
    }

    /// Returns the same type with `qualifier` replacing any previous one.
    #[inline]
    pub fn with_qualifier(mut self, qualifier: impl Into<Qualifier>) -> Self {
        self.qualifier = Some(qualifier.into());
        self
    }

    /// Creates a key from a raw [`TypeId`] and type name.
    ///
    /// Prefer [`Key::of`]. This is for front ends that carry type
    /// identity as data.
    #[inline]
    pub fn from_raw(type_id: TypeId, type_name: &'static str) -> Self {
        Self { type_id, type_name, qualifier: None }
    }

    #[inline]
    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    /// Returns the fully qualified type name.
    #[inline]
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    #[inline]
    pub fn qualifier(&self) -> Option<&str> {
        self.qualifier.as_deref()
    }

    /// Short human-readable form used in cycle paths: `Database`,
    /// `Limit@daily`.
    pub fn short_name(&self) -> String {
        let short = shorten_type_name(self.type_name);
        match self.qualifier() {
            Some(q) => format!("{short}@{q}"),
            None => short,
        }
    }
}

impl PartialEq for Key {
    fn eq(&self, other: &Self) -> bool {
        self.type_id == other.type_id && self.qualifier == other.qualifier
    }
}

impl Eq for Key {}

impl Hash for Key {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.type_id.hash(state);
        self.qualifier.hash(state);
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.qualifier() {
            Some(q) => write!(f, "Key({}, qualifier={:?})", self.type_name, q),
            None => write!(f, "Key({})", self.type_name),
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.qualifier() {
            Some(q) => write!(f, "{} (qualifier={:?})", self.type_name, q),
            None => write!(f, "{}", self.type_name),
        }
    }
}
