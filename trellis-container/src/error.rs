//! Error types for graph building and instance resolution.
//!
//! Build-time problems are [`Diagnostic`]s. A graph build never stops at
//! the first one: every diagnostic found is returned together in a
//! [`DiagnosticBatch`]. Runtime problems are [`TrellisError`]s.
//!
//! Errors raised by user factories travel as [`TrellisError::Provision`]
//! and are never re-wrapped on their way back to the caller of `get`.

use std::fmt;

use trellis_support::rendering::{render_bullets, render_cycle};

use crate::key::Key;
use crate::scope::{ScopeTag, Slot};

/// Boxed error raised by user construction logic.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// One build-time problem found while resolving a component graph.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Diagnostic {
    /// A reachable key has no binding anywhere in the visible set.
    #[error("{}", .0)]
    MissingBinding(MissingBindingError),

    /// More than one unique binding answers the same key.
    #[error("{}", .0)]
    DuplicateBinding(DuplicateBindingError),

    /// Two map contributions share a discriminator.
    #[error("{}", .0)]
    DuplicateMapKey(DuplicateMapKeyError),

    /// A cycle made only of non-deferred edges.
    #[error("{}", .0)]
    CyclicDependency(CyclicDependencyError),

    /// A scoped binding has no valid owning component.
    #[error("{}", .0)]
    IncompatibleScope(IncompatibleScopeError),

    /// A module is installed at two levels of one component chain.
    #[error("{}", .0)]
    DuplicateModuleInstallation(DuplicateModuleError),

    /// Two distinct modules share a name within one component chain.
    #[error("{}", .0)]
    ConflictingModuleName(ConflictingModuleError),
}

impl Diagnostic {
    /// Short category name, stable for matching in logs.
    pub fn category(&self) -> &'static str {
        match self {
            Diagnostic::MissingBinding(_) => "MissingBinding",
            Diagnostic::DuplicateBinding(_) => "DuplicateBinding",
            Diagnostic::DuplicateMapKey(_) => "DuplicateMapKey",
            Diagnostic::CyclicDependency(_) => "CyclicDependency",
            Diagnostic::IncompatibleScope(_) => "IncompatibleScope",
            Diagnostic::DuplicateModuleInstallation(_) => "DuplicateModuleInstallation",
            Diagnostic::ConflictingModuleName(_) => "ConflictingModuleName",
        }
    }
}

#[derive(Debug, Clone)]
pub struct MissingBindingError {
    pub key: Key,
    /// The first key found depending on it, if any.
    pub required_by: Option<Key>,
    pub component: String,
    /// Visible keys with a similar name.
    pub suggestions: Vec<Key>,
}

impl fmt::Display for MissingBindingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Missing binding for {} in component `{}`", self.key, self.component)?;

        if let Some(ref parent) = self.required_by {
            write!(f, "\n  Required by: {parent}")?;
        }

        if !self.suggestions.is_empty() {
            let names: Vec<String> = self.suggestions.iter().map(Key::to_string).collect();
            write!(f, "\n  Did you mean one of:{}", render_bullets(&names, 4))?;
        }

        write!(
            f,
            "\n  Hint: declare a binding for {} in a module installed by `{}` or one of its ancestors",
            self.key.short_name(),
            self.component,
        )
    }
}

#[derive(Debug, Clone)]
pub struct DuplicateBindingError {
    pub key: Key,
    pub component: String,
    /// Where each competing binding comes from.
    pub declarations: Vec<String>,
}

impl fmt::Display for DuplicateBindingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} is bound {} times in component `{}`:{}",
            self.key,
            self.declarations.len(),
            self.component,
            render_bullets(&self.declarations, 4),
        )?;
        write!(f, "\n  Hint: a key may have exactly one binding across a component and its ancestors")
    }
}

#[derive(Debug, Clone)]
pub struct DuplicateMapKeyError {
    pub key: Key,
    pub discriminator: String,
    /// Modules contributing the colliding entries.
    pub modules: Vec<String>,
}

impl fmt::Display for DuplicateMapKeyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Map multibinding {} has more than one entry for {:?}:{}",
            self.key,
            self.discriminator,
            render_bullets(&self.modules, 4),
        )
    }
}

#[derive(Debug, Clone)]
pub struct CyclicDependencyError {
    /// Keys on the cycle, starting anywhere; the last depends on the first.
    pub path: Vec<Key>,
}

impl fmt::Display for CyclicDependencyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<String> = self.path.iter().map(Key::short_name).collect();
        write!(f, "Dependency cycle detected:\n  {}", render_cycle(&names))?;
        write!(f, "\n  Hint: request one of these dependencies as Lazy or Provider to break the cycle")
    }
}

/// Why a scoped binding cannot be placed.
#[derive(Debug, Clone)]
pub enum ScopeViolation {
    /// No component in the chain carries the binding's scope tag.
    NoMatchingComponent { chain: Vec<String> },
    /// The owner is an ancestor, but the value would capture something
    /// that only a descendant supplies.
    CapturesDescendant { owner: String, dependency: Key, supplied_by: String },
}

#[derive(Debug, Clone)]
pub struct IncompatibleScopeError {
    pub key: Key,
    pub scope: ScopeTag,
    pub component: String,
    pub violation: ScopeViolation,
}

impl fmt::Display for IncompatibleScopeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Incompatible scope for {} ({}) in component `{}`", self.key, self.scope, self.component)?;
        match &self.violation {
            ScopeViolation::NoMatchingComponent { chain } => write!(
                f,
                "\n  No component in [{}] is tagged {}",
                chain.join(" → "),
                self.scope,
            ),
            ScopeViolation::CapturesDescendant { owner, dependency, supplied_by } => write!(
                f,
                "\n  Cached by `{owner}`, but depends on {dependency}, supplied only by `{supplied_by}`",
            ),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DuplicateModuleError {
    pub module: String,
    /// Components installing it, outermost first.
    pub components: Vec<String>,
}

impl fmt::Display for DuplicateModuleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Module `{}` is installed by more than one component of the same chain: {}",
            self.module,
            self.components.join(", "),
        )?;
        write!(f, "\n  Hint: install it once, in the outermost component that needs it")
    }
}

#[derive(Debug, Clone)]
pub struct ConflictingModuleError {
    pub module: String,
    /// Component installing the module that was kept.
    pub kept_by: String,
    /// Component installing the module that was ignored.
    pub ignored_in: String,
}

impl fmt::Display for ConflictingModuleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Two different modules are named `{}`; the one installed by `{}` is ignored, `{}` keeps the first",
            self.module, self.ignored_in, self.kept_by,
        )?;
        write!(f, "\n  Hint: module names identify modules, give each one its own")
    }
}

/// Every diagnostic produced by one graph build.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{}", render_batch(.component, .diagnostics))]
pub struct DiagnosticBatch {
    pub component: String,
    pub diagnostics: Vec<Diagnostic>,
}

impl DiagnosticBatch {
    pub fn len(&self) -> usize {
        self.diagnostics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.diagnostics.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics.iter()
    }
}

fn render_batch(component: &str, diagnostics: &[Diagnostic]) -> String {
    let mut out = format!(
        "Component `{component}` has {} binding graph error(s)",
        diagnostics.len()
    );
    for (i, diagnostic) in diagnostics.iter().enumerate() {
        out.push_str(&format!("\n\n[{}] {diagnostic}", i + 1));
    }
    out
}

/// Runtime errors of component instances.
#[derive(Debug, thiserror::Error)]
pub enum TrellisError {
    /// The key has no plan in the instance's resolved graph.
    #[error("{}", .0)]
    NotInGraph(NotInGraphError),

    /// Supplied bound instances do not match the declared bound keys.
    #[error("{}", .0)]
    BoundInstanceMismatch(BoundInstanceMismatchError),

    /// A producer synchronously requested the value it is building.
    #[error("{}", .0)]
    ReentrantConstruction(ReentrantConstructionError),

    /// The parent instance does not realize the component spec's declared parent.
    #[error("{}", .0)]
    ParentMismatch(ParentMismatchError),

    /// The resolved graph was built for another component.
    #[error("Graph built for component `{graph}` cannot realize component `{component}`")]
    GraphMismatch { component: String, graph: String },

    /// A typed accessor asked for the wrong type.
    #[error("{key} holds a value that is not a {expected}")]
    TypeMismatch { key: Key, expected: &'static str },

    /// A factory read an argument that does not exist or has another kind.
    #[error("Argument {index} is not {expected}")]
    ArgumentMismatch { index: usize, expected: &'static str },

    /// A deferred handle was used after its component was dropped.
    #[error("Component answering {key} was dropped before the deferred request ran")]
    ComponentReleased { key: Key },

    /// Failure raised by user construction logic, passed through unchanged.
    #[error(transparent)]
    Provision(BoxError),
}

impl TrellisError {
    /// Wraps an application error raised inside a factory.
    pub fn provision(err: impl Into<BoxError>) -> Self {
        TrellisError::Provision(err.into())
    }
}

#[derive(Debug)]
pub struct NotInGraphError {
    pub key: Key,
    pub component: String,
    pub suggestions: Vec<Key>,
}

impl fmt::Display for NotInGraphError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} is not part of the resolved graph of `{}`", self.key, self.component)?;

        if !self.suggestions.is_empty() {
            let names: Vec<String> = self.suggestions.iter().map(Key::to_string).collect();
            write!(f, "\n  Did you mean one of:{}", render_bullets(&names, 4))?;
        }

        write!(
            f,
            "\n  Hint: declare {} as an entry point, or build with validate_full_graph",
            self.key.short_name(),
        )
    }
}

#[derive(Debug)]
pub struct BoundInstanceMismatchError {
    pub component: String,
    pub missing: Vec<Key>,
    pub unexpected: Vec<Key>,
}

impl fmt::Display for BoundInstanceMismatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Bound instances for component `{}` do not match its declaration", self.component)?;
        if !self.missing.is_empty() {
            let names: Vec<String> = self.missing.iter().map(Key::to_string).collect();
            write!(f, "\n  Missing:{}", render_bullets(&names, 4))?;
        }
        if !self.unexpected.is_empty() {
            let names: Vec<String> = self.unexpected.iter().map(Key::to_string).collect();
            write!(f, "\n  Not declared:{}", render_bullets(&names, 4))?;
        }
        Ok(())
    }
}

#[derive(Debug)]
pub struct ReentrantConstructionError {
    pub slot: Slot,
    pub component: String,
}

impl fmt::Display for ReentrantConstructionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Reentrant construction of {} in component `{}`",
            self.slot, self.component,
        )?;
        write!(f, "\n  Hint: a deferred handle was used while its own target was being built")
    }
}

#[derive(Debug)]
pub struct ParentMismatchError {
    pub component: String,
    pub expected: Option<String>,
    pub actual: Option<String>,
}

impl fmt::Display for ParentMismatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let show = |name: &Option<String>| match name {
            Some(name) => format!("`{name}`"),
            None => "no parent".to_string(),
        };
        write!(
            f,
            "Component `{}` expects {} but was given {}",
            self.component,
            show(&self.expected),
            show(&self.actual),
        )
    }
}

/// Convenient Result type for runtime operations.
pub type Result<T> = std::result::Result<T, TrellisError>;

#[cfg(test)]
mod tests {
    use super::*;

    struct Teller;
    struct Ledger;

    #[test]
    fn missing_binding_display() {
        let err = Diagnostic::MissingBinding(MissingBindingError {
            key: Key::of::<Ledger>(),
            required_by: Some(Key::of::<Teller>()),
            component: "Bank".into(),
            suggestions: vec![],
        });

        let msg = err.to_string();
        assert!(msg.contains("Missing binding"));
        assert!(msg.contains("Ledger"));
        assert!(msg.contains("Required by"));
        assert_eq!(err.category(), "MissingBinding");
    }

    #[test]
    fn cycle_display_closes_the_loop() {
        let err = Diagnostic::CyclicDependency(CyclicDependencyError {
            path: vec![Key::of::<Teller>(), Key::of::<Ledger>()],
        });

        let msg = err.to_string();
        assert!(msg.contains("Teller → Ledger → Teller"));
    }

    #[test]
    fn scope_display_names_the_chain() {
        let err = IncompatibleScopeError {
            key: Key::of::<Ledger>(),
            scope: ScopeTag::new("Request"),
            component: "Session".into(),
            violation: ScopeViolation::NoMatchingComponent {
                chain: vec!["Bank".into(), "Session".into()],
            },
        };

        let msg = err.to_string();
        assert!(msg.contains("@Request"));
        assert!(msg.contains("Bank → Session"));
    }

    #[test]
    fn batch_lists_every_diagnostic() {
        let batch = DiagnosticBatch {
            component: "Bank".into(),
            diagnostics: vec![
                Diagnostic::DuplicateModuleInstallation(DuplicateModuleError {
                    module: "storage".into(),
                    components: vec!["Bank".into(), "Session".into()],
                }),
                Diagnostic::DuplicateMapKey(DuplicateMapKeyError {
                    key: Key::of::<Teller>(),
                    discriminator: "login".into(),
                    modules: vec!["a".into(), "b".into()],
                }),
            ],
        };

        let msg = batch.to_string();
        assert!(msg.contains("2 binding graph error(s)"));
        assert!(msg.contains("[1] Module `storage`"));
        assert!(msg.contains("[2] Map multibinding"));
        assert_eq!(batch.len(), 2);
    }

    #[test]
    fn provision_is_transparent() {
        #[derive(Debug, thiserror::Error)]
        #[error("insufficient funds")]
        struct Overdraft;

        let err = TrellisError::provision(Overdraft);
        assert_eq!(err.to_string(), "insufficient funds");
        match err {
            TrellisError::Provision(source) => assert!(source.downcast_ref::<Overdraft>().is_some()),
            other => panic!("Expected Provision, got: {other:?}"),
        }
    }

    #[test]
    fn bound_mismatch_display() {
        let err = BoundInstanceMismatchError {
            component: "Session".into(),
            missing: vec![Key::of::<Teller>()],
            unexpected: vec![],
        };
        let msg = err.to_string();
        assert!(msg.contains("Missing:"));
        assert!(!msg.contains("Not declared"));
    }
}
