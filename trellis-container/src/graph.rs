//! Binding graph resolution.
//!
//! [`GraphResolver`] compiles a [`ComponentSpec`] and its ancestor chain
//! into a [`ResolvedGraph`]: one [`ResolutionPlan`] per key reachable from
//! the component's entry points. Resolution runs once per spec, before any
//! instance exists, and checks:
//! - **Completeness**: every reachable key has a binding
//! - **Uniqueness**: no key has two unique bindings, no map key repeats
//! - **Acyclicity**: no cycle made only of non-deferred edges
//! - **Scope ownership**: every scoped binding has a matching component,
//!   and a value cached by an ancestor never captures a descendant's state
//!
//! Diagnostics are collected across the whole traversal and returned
//! together, never one at a time.
//!
//! # Algorithm
//! A breadth-first walk from the entry points plans each key it meets.
//! Scope owners are then assigned by walking up the chain. Cycles are
//! found by a depth-first search that keeps the current path and skips
//! `Lazy`/`Provider` edges.

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::sync::Arc;

use tracing::{debug, info, instrument, trace, warn};
use trellis_support::rendering::suggest_similar;

use crate::binding::{BindingKind, Dependency, Producer};
use crate::component::ComponentSpec;
use crate::error::{
    CyclicDependencyError, Diagnostic, DiagnosticBatch, DuplicateBindingError,
    IncompatibleScopeError, MissingBindingError, ScopeViolation,
};
use crate::key::Key;
use crate::multibinding::{Aggregate, MultibindingAggregator};
use crate::registry::{BindingRegistry, ComponentLevel, Declaration, VisibleBindings};
use crate::scope::ScopeTag;
use crate::settings::GraphSettings;

/// Which kind of declaration produces a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProduceStyle {
    Constructor,
    Provider,
}

/// How a planned key is answered at runtime.
#[derive(Debug, Clone)]
pub enum PlanKind {
    /// Value supplied to the component at `level` when it was created.
    BoundInstance { level: usize },
    Produce { style: ProduceStyle, producer: Producer },
    Alias { target: Key },
    /// `present` is fixed per graph: a descendant may see a target its
    /// ancestors cannot.
    Optional { target: Key, present: bool },
    /// Contributions with the level owning each scoped one.
    Multibinding { aggregate: Aggregate, owners: Vec<Option<usize>> },
    Subcomponent { name: Arc<str> },
}

/// Validated recipe for one key.
#[derive(Debug, Clone)]
pub struct ResolutionPlan {
    key: Key,
    kind: PlanKind,
    dependencies: Vec<Dependency>,
    scope: Option<ScopeTag>,
    owner: Option<usize>,
    declared_at: usize,
}

impl ResolutionPlan {
    pub fn key(&self) -> &Key {
        &self.key
    }

    pub fn kind(&self) -> &PlanKind {
        &self.kind
    }

    /// Dependency keys, in the order they are resolved.
    pub fn dependencies(&self) -> &[Dependency] {
        &self.dependencies
    }

    pub fn scope(&self) -> Option<&ScopeTag> {
        self.scope.as_ref()
    }

    /// Level whose scope cache holds the value; `None` when unscoped.
    pub fn owner(&self) -> Option<usize> {
        self.owner
    }

    /// Level of the component whose module declared the binding.
    pub fn declared_at(&self) -> usize {
        self.declared_at
    }
}

/// Immutable resolution result for one component spec.
pub struct ResolvedGraph {
    spec: Arc<ComponentSpec>,
    chain: Vec<ComponentLevel>,
    plans: HashMap<Key, ResolutionPlan>,
    order: Vec<Key>,
    max_suggestions: usize,
}

impl ResolvedGraph {
    pub fn spec(&self) -> &Arc<ComponentSpec> {
        &self.spec
    }

    pub fn component_name(&self) -> &str {
        self.spec.name()
    }

    /// Level of the component itself; the root is level 0.
    pub fn level(&self) -> usize {
        self.chain.len().saturating_sub(1)
    }

    pub fn chain(&self) -> &[ComponentLevel] {
        &self.chain
    }

    pub fn plan(&self, key: &Key) -> Option<&ResolutionPlan> {
        self.plans.get(key)
    }

    pub fn contains(&self, key: &Key) -> bool {
        self.plans.contains_key(key)
    }

    /// Plans in the order they were discovered.
    pub fn plans(&self) -> impl Iterator<Item = &ResolutionPlan> {
        self.order.iter().filter_map(|key| self.plans.get(key))
    }

    pub fn len(&self) -> usize {
        self.plans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plans.is_empty()
    }

    /// Planned keys whose names resemble `key`.
    pub fn suggestions(&self, key: &Key) -> Vec<Key> {
        similar_keys(key, &self.order, self.max_suggestions)
    }
}

impl fmt::Debug for ResolvedGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolvedGraph")
            .field("component", &self.spec.name())
            .field("level", &self.level())
            .field("plans", &self.plans.len())
            .finish()
    }
}

/// Compiles component specs into resolved graphs.
pub struct GraphResolver<'r> {
    registry: &'r BindingRegistry,
    settings: GraphSettings,
}

impl<'r> GraphResolver<'r> {
    pub fn new(registry: &'r BindingRegistry) -> Self {
        Self::with_settings(registry, GraphSettings::default())
    }

    pub fn with_settings(registry: &'r BindingRegistry, settings: GraphSettings) -> Self {
        Self { registry, settings }
    }

    /// Resolves `spec` against everything its chain can see.
    ///
    /// # Errors
    /// A [`DiagnosticBatch`] holding every problem found.
    #[instrument(skip(self, spec), fields(component = %spec.name()), name = "graph_resolution")]
    pub fn resolve(&self, spec: &Arc<ComponentSpec>) -> Result<ResolvedGraph, DiagnosticBatch> {
        info!(
            entry_points = spec.entry_points().len(),
            depth = spec.depth(),
            "Resolving component graph"
        );

        let mut diagnostics = Vec::new();
        let visible = self.registry.collect_visible(spec, &mut diagnostics);

        let mut pass = ResolutionPass::new(&visible, &self.settings, &mut diagnostics);
        pass.plan_reachable(self.seeds(spec, &visible));
        pass.assign_owners();
        pass.check_captures();
        pass.detect_cycles();
        let (plans, order) = pass.finish();

        if !diagnostics.is_empty() {
            warn!(errors = diagnostics.len(), "Component graph is invalid");
            return Err(DiagnosticBatch { component: spec.name().to_string(), diagnostics });
        }

        info!(plans = plans.len(), "Component graph resolved ✓");
        Ok(ResolvedGraph {
            spec: Arc::clone(spec),
            chain: visible.chain().to_vec(),
            plans,
            order,
            max_suggestions: self.settings.max_suggestions,
        })
    }

    /// Keys planned regardless of reachability, then entry points.
    fn seeds(&self, spec: &ComponentSpec, visible: &VisibleBindings) -> Vec<Key> {
        let mut seeds: Vec<Key> = spec.entry_points().to_vec();
        seeds.extend(spec.bound_keys().iter().cloned());
        seeds.extend(visible.keys().iter().filter(|key| {
            visible
                .declarations(key)
                .iter()
                .any(|d| matches!(d, Declaration::Subcomponent { .. }))
        }).cloned());
        if self.settings.validate_full_graph {
            seeds.extend(visible.keys().iter().cloned());
        }
        seeds
    }
}

/// Mutable state of one `resolve` call.
struct ResolutionPass<'a> {
    visible: &'a VisibleBindings,
    aggregator: MultibindingAggregator<'a>,
    settings: &'a GraphSettings,
    diagnostics: &'a mut Vec<Diagnostic>,
    plans: HashMap<Key, ResolutionPlan>,
    order: Vec<Key>,
}

impl<'a> ResolutionPass<'a> {
    fn new(
        visible: &'a VisibleBindings,
        settings: &'a GraphSettings,
        diagnostics: &'a mut Vec<Diagnostic>,
    ) -> Self {
        Self {
            visible,
            aggregator: MultibindingAggregator::new(visible),
            settings,
            diagnostics,
            plans: HashMap::new(),
            order: Vec::new(),
        }
    }

    fn component(&self) -> String {
        self.visible.component_name().to_string()
    }

    fn plan_reachable(&mut self, seeds: Vec<Key>) {
        let mut queue: VecDeque<(Key, Option<Key>)> =
            seeds.into_iter().map(|key| (key, None)).collect();
        let mut seen = HashSet::new();

        while let Some((key, required_by)) = queue.pop_front() {
            if !seen.insert(key.clone()) {
                continue;
            }
            let Some(plan) = self.plan_key(&key, required_by) else {
                continue;
            };
            for dependency in &plan.dependencies {
                queue.push_back((dependency.key.clone(), Some(key.clone())));
            }
            trace!(key = %key, dependencies = plan.dependencies.len(), "Planned");
            self.order.push(key.clone());
            self.plans.insert(key, plan);
        }
    }

    fn plan_key(&mut self, key: &Key, required_by: Option<Key>) -> Option<ResolutionPlan> {
        let visible = self.visible;
        let declarations = visible.declarations(key);

        if visible.is_multibinding(key) {
            if !declarations.is_empty() {
                self.report_duplicate(key);
                return None;
            }
            return match self.aggregator.aggregate(key)? {
                Ok(aggregate) => Some(multibinding_plan(aggregate)),
                Err(found) => {
                    self.diagnostics.extend(found);
                    None
                }
            };
        }

        match declarations {
            [] => {
                let suggestions =
                    similar_keys(key, visible.keys(), self.settings.max_suggestions);
                warn!(key = %key, required_by = ?required_by, "Missing binding");
                self.diagnostics.push(Diagnostic::MissingBinding(MissingBindingError {
                    key: key.clone(),
                    required_by,
                    component: self.component(),
                    suggestions,
                }));
                None
            }
            [declaration] => self.plan_declaration(key, declaration),
            _ => {
                self.report_duplicate(key);
                None
            }
        }
    }

    /// Plan for a key's only unique declaration.
    fn plan_declaration(&self, key: &Key, declaration: &Declaration) -> Option<ResolutionPlan> {
        let plan = |kind, dependencies, scope| ResolutionPlan {
            key: key.clone(),
            kind,
            dependencies,
            scope,
            owner: None,
            declared_at: declaration.level(),
        };

        let declared = match declaration {
            Declaration::BoundInstance { level } => {
                return Some(plan(PlanKind::BoundInstance { level: *level }, Vec::new(), None));
            }
            Declaration::Subcomponent { name, .. } => {
                return Some(plan(
                    PlanKind::Subcomponent { name: Arc::clone(name) },
                    Vec::new(),
                    None,
                ));
            }
            Declaration::Binding(declared) => declared,
        };

        let binding = &declared.binding;
        let scope = binding.scope().cloned();
        let ignore_scope = || -> Option<ScopeTag> {
            if let Some(tag) = &scope {
                warn!(key = %key, scope = %tag, kind = binding.kind().label(), "Scope tag ignored");
            }
            None
        };

        let planned = match binding.kind() {
            BindingKind::Constructor(producer) => plan(
                PlanKind::Produce { style: ProduceStyle::Constructor, producer: producer.clone() },
                producer.dependencies().to_vec(),
                scope.clone(),
            ),
            BindingKind::Provider(producer) => plan(
                PlanKind::Produce { style: ProduceStyle::Provider, producer: producer.clone() },
                producer.dependencies().to_vec(),
                scope.clone(),
            ),
            BindingKind::Alias { target } => plan(
                PlanKind::Alias { target: target.clone() },
                vec![Dependency::instance(target.clone())],
                ignore_scope(),
            ),
            BindingKind::Optional { target } => {
                let present = self.visible.contains(target);
                debug!(key = %key, target = %target, present, "Optional binding");
                let dependencies = if present {
                    vec![Dependency::instance(target.clone())]
                } else {
                    Vec::new()
                };
                plan(
                    PlanKind::Optional { target: target.clone(), present },
                    dependencies,
                    ignore_scope(),
                )
            }
            // contributions are planned by the aggregator
            BindingKind::MapContribution { .. }
            | BindingKind::SetContribution { .. }
            | BindingKind::Multibinds(_) => return None,
        };
        Some(planned)
    }

    fn report_duplicate(&mut self, key: &Key) {
        let chain = self.visible.chain();
        let mut declarations: Vec<String> = self
            .visible
            .declarations(key)
            .iter()
            .map(|d| d.describe(chain))
            .collect();
        declarations.extend(self.visible.multibinding_declarations(key).iter().map(|d| {
            format!(
                "{} in module `{}` (component `{}`)",
                d.binding.kind().label(),
                d.id.module,
                chain.get(d.level).map(|c| &*c.name).unwrap_or_default(),
            )
        }));

        warn!(key = %key, count = declarations.len(), "Duplicate binding");
        self.diagnostics.push(Diagnostic::DuplicateBinding(DuplicateBindingError {
            key: key.clone(),
            component: self.component(),
            declarations,
        }));
    }

    /// Nearest level, walking up from the component, tagged `scope`.
    fn owning_level(&self, scope: &ScopeTag) -> Option<usize> {
        self.visible
            .chain()
            .iter()
            .rposition(|level| level.scope.as_ref() == Some(scope))
    }

    fn incompatible(&mut self, key: &Key, scope: &ScopeTag, violation: ScopeViolation) {
        warn!(key = %key, scope = %scope, ?violation, "Incompatible scope");
        self.diagnostics.push(Diagnostic::IncompatibleScope(IncompatibleScopeError {
            key: key.clone(),
            scope: scope.clone(),
            component: self.component(),
            violation,
        }));
    }

    fn assign_owners(&mut self) {
        let chain_names: Vec<String> =
            self.visible.chain().iter().map(|c| c.name.to_string()).collect();

        for key in self.order.clone() {
            let Some(plan) = self.plans.get(&key) else { continue };

            let mut unplaced = Vec::new();
            let owner = plan.scope.as_ref().and_then(|scope| {
                let owner = self.owning_level(scope);
                if owner.is_none() {
                    unplaced.push(scope.clone());
                }
                owner
            });

            let mut element_owners = Vec::new();
            if let PlanKind::Multibinding { aggregate, .. } = &plan.kind {
                for contribution in &aggregate.contributions {
                    let owner = contribution.scope.as_ref().and_then(|scope| {
                        let owner = self.owning_level(scope);
                        if owner.is_none() {
                            unplaced.push(scope.clone());
                        }
                        owner
                    });
                    element_owners.push(owner);
                }
            }

            for scope in unplaced {
                self.incompatible(
                    &key,
                    &scope,
                    ScopeViolation::NoMatchingComponent { chain: chain_names.clone() },
                );
            }

            if let Some(plan) = self.plans.get_mut(&key) {
                plan.owner = owner;
                if let PlanKind::Multibinding { owners, .. } = &mut plan.kind {
                    *owners = element_owners;
                }
                if let Some(level) = owner {
                    debug!(key = %key, owner = %self.visible.chain()[level].name, "Assigned scope owner");
                }
            }
        }
    }

    /// Deepest level whose state each planned key's value may capture.
    fn capture_levels(&self) -> HashMap<Key, usize> {
        let mut levels: HashMap<Key, usize> = self.order.iter().map(|k| (k.clone(), 0)).collect();
        let deepest = |levels: &HashMap<Key, usize>, deps: &[Dependency]| {
            deps.iter()
                .filter_map(|d| levels.get(&d.key).copied())
                .max()
                .unwrap_or(0)
        };

        loop {
            let mut changed = false;
            for key in &self.order {
                let plan = &self.plans[key];
                let level = match (&plan.kind, plan.owner) {
                    (PlanKind::BoundInstance { level }, _) => *level,
                    (PlanKind::Subcomponent { .. }, _) => plan.declared_at,
                    (PlanKind::Multibinding { aggregate, owners }, _) => aggregate
                        .contributions
                        .iter()
                        .zip(owners)
                        .map(|(c, owner)| {
                            owner.unwrap_or_else(|| deepest(&levels, c.producer.dependencies()))
                        })
                        .max()
                        .unwrap_or(0),
                    (_, Some(owner)) => owner,
                    (_, None) => deepest(&levels, &plan.dependencies),
                };
                if levels.get(key).copied().unwrap_or(0) < level {
                    levels.insert(key.clone(), level);
                    changed = true;
                }
            }
            if !changed {
                return levels;
            }
        }
    }

    /// A value cached at level `o` must not depend on anything supplied
    /// below `o`; siblings would otherwise share one child's state.
    fn check_captures(&mut self) {
        let levels = self.capture_levels();
        let mut violations = Vec::new();

        for key in &self.order {
            let plan = &self.plans[key];
            let mut scoped: Vec<(usize, &ScopeTag, &[Dependency])> = Vec::new();
            if let (Some(owner), Some(scope)) = (plan.owner, plan.scope.as_ref()) {
                scoped.push((owner, scope, plan.dependencies.as_slice()));
            }
            if let PlanKind::Multibinding { aggregate, owners } = &plan.kind {
                for (contribution, owner) in aggregate.contributions.iter().zip(owners) {
                    if let (Some(owner), Some(scope)) = (owner, contribution.scope.as_ref()) {
                        scoped.push((*owner, scope, contribution.producer.dependencies()));
                    }
                }
            }

            for (owner, scope, dependencies) in scoped {
                for dependency in dependencies {
                    let supplied = levels.get(&dependency.key).copied().unwrap_or(0);
                    if supplied > owner {
                        violations.push((
                            key.clone(),
                            scope.clone(),
                            ScopeViolation::CapturesDescendant {
                                owner: self.visible.chain()[owner].name.to_string(),
                                dependency: dependency.key.clone(),
                                supplied_by: self.visible.chain()[supplied].name.to_string(),
                            },
                        ));
                    }
                }
            }
        }

        for (key, scope, violation) in violations {
            self.incompatible(&key, &scope, violation);
        }
    }

    /// Depth-first search over non-deferred edges; one diagnostic per
    /// distinct cycle.
    fn detect_cycles(&mut self) {
        let position: HashMap<&Key, usize> =
            self.order.iter().enumerate().map(|(i, k)| (k, i)).collect();
        let mut finder = CycleFinder {
            plans: &self.plans,
            state: HashMap::new(),
            path: Vec::new(),
            found: Vec::new(),
        };

        for key in &self.order {
            finder.visit(key);
        }

        let mut seen = HashSet::new();
        let mut cycles = Vec::new();
        for mut cycle in finder.found {
            // rotate so the earliest planned key comes first
            if let Some(start) = (0..cycle.len()).min_by_key(|&i| position.get(&cycle[i]).copied())
            {
                cycle.rotate_left(start);
            }
            if seen.insert(cycle.clone()) {
                cycles.push(cycle);
            }
        }

        for path in cycles {
            warn!(cycle = ?path, "Dependency cycle detected");
            self.diagnostics
                .push(Diagnostic::CyclicDependency(CyclicDependencyError { path }));
        }
    }

    fn finish(self) -> (HashMap<Key, ResolutionPlan>, Vec<Key>) {
        (self.plans, self.order)
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum VisitState {
    InProgress,
    Done,
}

struct CycleFinder<'p> {
    plans: &'p HashMap<Key, ResolutionPlan>,
    state: HashMap<Key, VisitState>,
    path: Vec<Key>,
    found: Vec<Vec<Key>>,
}

impl CycleFinder<'_> {
    fn visit(&mut self, key: &Key) {
        match self.state.get(key) {
            Some(VisitState::Done) => return,
            Some(VisitState::InProgress) => {
                let start = self.path.iter().position(|k| k == key).unwrap_or(0);
                self.found.push(self.path[start..].to_vec());
                return;
            }
            None => {}
        }

        let Some(plan) = self.plans.get(key) else { return };
        self.state.insert(key.clone(), VisitState::InProgress);
        self.path.push(key.clone());

        for dependency in plan.dependencies.iter().filter(|d| !d.kind.is_deferred()) {
            self.visit(&dependency.key);
        }

        self.path.pop();
        self.state.insert(key.clone(), VisitState::Done);
    }
}

fn multibinding_plan(aggregate: Aggregate) -> ResolutionPlan {
    let mut dependencies: Vec<Dependency> = Vec::new();
    for contribution in &aggregate.contributions {
        for dependency in contribution.producer.dependencies() {
            if !dependencies.contains(dependency) {
                dependencies.push(dependency.clone());
            }
        }
    }
    let declared_at = aggregate.contributions.iter().map(|c| c.level).max().unwrap_or(0);
    let owners = vec![None; aggregate.contributions.len()];

    ResolutionPlan {
        key: aggregate.key.clone(),
        kind: PlanKind::Multibinding { aggregate, owners },
        dependencies,
        scope: None,
        owner: None,
        declared_at,
    }
}

/// Keys from `pool` whose short names resemble `key`'s.
fn similar_keys(key: &Key, pool: &[Key], max: usize) -> Vec<Key> {
    let candidates: Vec<(String, &Key)> = pool
        .iter()
        .filter(|k| *k != key)
        .map(|k| (k.short_name(), k))
        .collect();
    let names: Vec<&str> = candidates.iter().map(|(name, _)| name.as_str()).collect();

    suggest_similar(&key.short_name(), &names, max)
        .into_iter()
        .filter_map(|name| {
            candidates
                .iter()
                .find(|(candidate, _)| *candidate == name)
                .map(|(_, k)| (*k).clone())
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binding::Binding;
    use crate::module::Module;

    struct Database;
    struct Ledger;
    struct Teller;
    struct Account;
    struct Limiter;
    struct Commands;

    fn root_tag() -> ScopeTag {
        ScopeTag::new("Root")
    }

    fn session_tag() -> ScopeTag {
        ScopeTag::new("Session")
    }

    fn unit<T: Send + Sync + 'static>(key: Key, deps: Vec<Dependency>, value: fn() -> T) -> Binding {
        Binding::constructor(key, deps, move |_| Ok(value()))
    }

    fn resolve(spec: &Arc<ComponentSpec>) -> Result<ResolvedGraph, DiagnosticBatch> {
        let mut registry = BindingRegistry::new();
        registry.register_component(spec);
        GraphResolver::new(&registry).resolve(spec)
    }

    fn categories(batch: &DiagnosticBatch) -> Vec<&'static str> {
        batch.iter().map(Diagnostic::category).collect()
    }

    #[test]
    fn plans_reachable_keys_only() {
        let module = Module::builder("bank")
            .bind(unit(Key::of::<Database>(), vec![], || Database))
            .bind(unit(Key::of::<Ledger>(), vec![Key::of::<Database>().into()], || Ledger))
            .bind(unit(Key::of::<Teller>(), vec![], || Teller))
            .build();
        let root = ComponentSpec::root("Bank")
            .install(module)
            .entry_point(Key::of::<Ledger>())
            .build();

        let graph = resolve(&root).unwrap();
        assert!(graph.contains(&Key::of::<Ledger>()));
        assert!(graph.contains(&Key::of::<Database>()));
        assert!(!graph.contains(&Key::of::<Teller>()));

        let order: Vec<&Key> = graph.plans().map(|p| p.key()).collect();
        assert_eq!(order, vec![&Key::of::<Ledger>(), &Key::of::<Database>()]);
    }

    #[test]
    fn full_validation_plans_everything() {
        let module = Module::builder("bank")
            .bind(unit(Key::of::<Teller>(), vec![Key::of::<Ledger>().into()], || Teller))
            .build();
        let root = ComponentSpec::root("Bank").install(module).build();

        let mut registry = BindingRegistry::new();
        registry.register_component(&root);
        assert!(GraphResolver::new(&registry).resolve(&root).is_ok());

        let settings = GraphSettings::default().validate_full_graph(true);
        let batch = GraphResolver::with_settings(&registry, settings)
            .resolve(&root)
            .unwrap_err();
        assert_eq!(categories(&batch), vec!["MissingBinding"]);
    }

    #[test]
    fn missing_binding_names_requirer_and_suggestions() {
        struct LedgerStore;
        let module = Module::builder("bank")
            .bind(unit(Key::of::<Teller>(), vec![Key::of::<Ledger>().into()], || Teller))
            .bind(unit(Key::of::<LedgerStore>(), vec![], || LedgerStore))
            .build();
        let root = ComponentSpec::root("Bank")
            .install(module)
            .entry_point(Key::of::<Teller>())
            .build();

        let batch = resolve(&root).unwrap_err();
        match &batch.diagnostics[0] {
            Diagnostic::MissingBinding(err) => {
                assert_eq!(err.key, Key::of::<Ledger>());
                assert_eq!(err.required_by, Some(Key::of::<Teller>()));
                assert_eq!(err.suggestions, vec![Key::of::<LedgerStore>()]);
            }
            other => panic!("Expected MissingBinding, got: {other:?}"),
        }
    }

    #[test]
    fn duplicate_binding_across_levels() {
        let root_module = Module::builder("root")
            .bind(unit(Key::of::<Database>(), vec![], || Database))
            .build();
        let child_module = Module::builder("child")
            .bind(unit(Key::of::<Database>(), vec![], || Database))
            .build();
        let root = ComponentSpec::root("Bank").install(root_module).build();
        let session = ComponentSpec::child("Session", &root)
            .install(child_module)
            .entry_point(Key::of::<Database>())
            .build();

        let batch = resolve(&session).unwrap_err();
        match &batch.diagnostics[0] {
            Diagnostic::DuplicateBinding(err) => {
                assert_eq!(err.declarations.len(), 2);
                assert!(err.declarations[0].contains("`root`"));
                assert!(err.declarations[1].contains("`child`"));
            }
            other => panic!("Expected DuplicateBinding, got: {other:?}"),
        }
    }

    #[test]
    fn bound_instance_conflicting_with_binding() {
        let module = Module::builder("accounts")
            .bind(unit(Key::of::<Account>(), vec![], || Account))
            .build();
        let root = ComponentSpec::root("Bank")
            .install(module)
            .bound_instance(Key::of::<Account>())
            .build();

        let batch = resolve(&root).unwrap_err();
        assert_eq!(categories(&batch), vec!["DuplicateBinding"]);
    }

    #[test]
    fn non_deferred_cycle_is_reported_with_path() {
        let module = Module::builder("cycle")
            .bind(unit(Key::of::<Teller>(), vec![Key::of::<Ledger>().into()], || Teller))
            .bind(unit(Key::of::<Ledger>(), vec![Key::of::<Teller>().into()], || Ledger))
            .build();
        let root = ComponentSpec::root("Bank")
            .install(module)
            .entry_point(Key::of::<Teller>())
            .build();

        let batch = resolve(&root).unwrap_err();
        assert_eq!(batch.len(), 1);
        match &batch.diagnostics[0] {
            Diagnostic::CyclicDependency(err) => {
                assert_eq!(err.path, vec![Key::of::<Teller>(), Key::of::<Ledger>()]);
            }
            other => panic!("Expected CyclicDependency, got: {other:?}"),
        }
    }

    #[test]
    fn deferred_edge_breaks_cycle() {
        for deferred in [Dependency::lazy(Key::of::<Teller>()), Dependency::provider(Key::of::<Teller>())] {
            let module = Module::builder("cycle")
                .bind(unit(Key::of::<Teller>(), vec![Key::of::<Ledger>().into()], || Teller))
                .bind(unit(Key::of::<Ledger>(), vec![deferred], || Ledger))
                .build();
            let root = ComponentSpec::root("Bank")
                .install(module)
                .entry_point(Key::of::<Teller>())
                .build();

            assert!(resolve(&root).is_ok());
        }
    }

    #[test]
    fn self_dependency_is_a_cycle() {
        let module = Module::builder("selfish")
            .bind(unit(Key::of::<Teller>(), vec![Key::of::<Teller>().into()], || Teller))
            .build();
        let root = ComponentSpec::root("Bank")
            .install(module)
            .entry_point(Key::of::<Teller>())
            .build();

        let batch = resolve(&root).unwrap_err();
        match &batch.diagnostics[0] {
            Diagnostic::CyclicDependency(err) => assert_eq!(err.path, vec![Key::of::<Teller>()]),
            other => panic!("Expected CyclicDependency, got: {other:?}"),
        }
    }

    #[test]
    fn diamond_is_not_a_cycle() {
        struct A;
        struct B;
        struct C;
        struct D;
        let module = Module::builder("diamond")
            .bind(unit(Key::of::<D>(), vec![], || D))
            .bind(unit(Key::of::<B>(), vec![Key::of::<D>().into()], || B))
            .bind(unit(Key::of::<C>(), vec![Key::of::<D>().into()], || C))
            .bind(unit(Key::of::<A>(), vec![Key::of::<B>().into(), Key::of::<C>().into()], || A))
            .build();
        let root = ComponentSpec::root("Bank").install(module).entry_point(Key::of::<A>()).build();

        assert_eq!(resolve(&root).unwrap().len(), 4);
    }

    #[test]
    fn scoped_binding_owned_by_nearest_matching_ancestor() {
        let root_module = Module::builder("root")
            .bind(unit(Key::of::<Database>(), vec![], || Database).in_scope(root_tag()))
            .build();
        let root = ComponentSpec::root("Bank").scope(root_tag()).install(root_module).build();
        let session = ComponentSpec::child("Session", &root)
            .scope(session_tag())
            .entry_point(Key::of::<Database>())
            .build();

        let graph = resolve(&session).unwrap();
        assert_eq!(graph.level(), 1);
        assert_eq!(graph.plan(&Key::of::<Database>()).unwrap().owner(), Some(0));
    }

    #[test]
    fn scope_without_matching_component_fails() {
        let module = Module::builder("root")
            .bind(unit(Key::of::<Limiter>(), vec![], || Limiter).in_scope(session_tag()))
            .build();
        let root = ComponentSpec::root("Bank")
            .scope(root_tag())
            .install(module)
            .entry_point(Key::of::<Limiter>())
            .build();

        let batch = resolve(&root).unwrap_err();
        match &batch.diagnostics[0] {
            Diagnostic::IncompatibleScope(err) => {
                assert_eq!(err.scope, session_tag());
                assert!(matches!(err.violation, ScopeViolation::NoMatchingComponent { .. }));
            }
            other => panic!("Expected IncompatibleScope, got: {other:?}"),
        }
    }

    #[test]
    fn ancestor_scoped_value_cannot_capture_child_state() {
        let child_module = Module::builder("session")
            .bind(unit(Key::of::<Ledger>(), vec![Key::of::<Account>().into()], || Ledger).in_scope(root_tag()))
            .build();
        let root = ComponentSpec::root("Bank").scope(root_tag()).build();
        let session = ComponentSpec::child("Session", &root)
            .scope(session_tag())
            .install(child_module)
            .bound_instance(Key::of::<Account>())
            .entry_point(Key::of::<Ledger>())
            .build();

        let batch = resolve(&session).unwrap_err();
        match &batch.diagnostics[0] {
            Diagnostic::IncompatibleScope(err) => match &err.violation {
                ScopeViolation::CapturesDescendant { owner, dependency, supplied_by } => {
                    assert_eq!(owner, "Bank");
                    assert_eq!(dependency, &Key::of::<Account>());
                    assert_eq!(supplied_by, "Session");
                }
                other => panic!("Expected CapturesDescendant, got: {other:?}"),
            },
            other => panic!("Expected IncompatibleScope, got: {other:?}"),
        }
    }

    #[test]
    fn optional_presence_depends_on_level() {
        let key = Key::of::<Option<Arc<Account>>>();
        let module = Module::builder("optional")
            .bind(Binding::optional_of::<Account>())
            .build();
        let root = ComponentSpec::root("Bank").install(module).entry_point(key.clone()).build();
        let session = ComponentSpec::child("Session", &root)
            .bound_instance(Key::of::<Account>())
            .entry_point(key.clone())
            .build();

        let at_root = resolve(&root).unwrap();
        let at_session = resolve(&session).unwrap();

        assert!(matches!(
            at_root.plan(&key).unwrap().kind(),
            PlanKind::Optional { present: false, .. }
        ));
        assert!(matches!(
            at_session.plan(&key).unwrap().kind(),
            PlanKind::Optional { present: true, .. }
        ));
        assert!(at_session.contains(&Key::of::<Account>()));
    }

    #[test]
    fn alias_pulls_in_its_target() {
        trait Store {}
        let module = Module::builder("bank")
            .bind(unit(Key::of::<Database>(), vec![], || Database))
            .bind(Binding::alias(Key::of::<dyn Store>(), Key::of::<Database>()))
            .build();
        let root = ComponentSpec::root("Bank").install(module).entry_point(Key::of::<dyn Store>()).build();

        let graph = resolve(&root).unwrap();
        assert!(graph.contains(&Key::of::<Database>()));
    }

    #[test]
    fn multibinding_plan_unions_dependencies() {
        let module = Module::builder("commands")
            .bind(unit(Key::of::<Database>(), vec![], || Database))
            .bind(Binding::map_entry(Key::of::<Commands>(), "login", vec![Key::of::<Database>().into()], |_| Ok(1u8)))
            .bind(Binding::map_entry(Key::of::<Commands>(), "logout", vec![Key::of::<Database>().into()], |_| Ok(2u8)))
            .build();
        let root = ComponentSpec::root("Bank").install(module).entry_point(Key::of::<Commands>()).build();

        let graph = resolve(&root).unwrap();
        let plan = graph.plan(&Key::of::<Commands>()).unwrap();
        assert_eq!(plan.dependencies().len(), 1);
        assert!(matches!(plan.kind(), PlanKind::Multibinding { .. }));
    }

    #[test]
    fn unique_binding_and_contribution_conflict() {
        let module = Module::builder("commands")
            .bind(unit(Key::of::<Commands>(), vec![], || Commands))
            .bind(Binding::multibinds_set(Key::of::<Commands>()))
            .build();
        let root = ComponentSpec::root("Bank").install(module).entry_point(Key::of::<Commands>()).build();

        let batch = resolve(&root).unwrap_err();
        assert_eq!(categories(&batch), vec!["DuplicateBinding"]);
    }

    #[test]
    fn diagnostics_are_batched() {
        let module = Module::builder("broken")
            .bind(unit(Key::of::<Teller>(), vec![Key::of::<Ledger>().into()], || Teller))
            .bind(unit(Key::of::<Limiter>(), vec![], || Limiter).in_scope(session_tag()))
            .bind(unit(Key::of::<Database>(), vec![Key::of::<Database>().into()], || Database))
            .build();
        let root = ComponentSpec::root("Bank")
            .install(module)
            .entry_point(Key::of::<Teller>())
            .entry_point(Key::of::<Limiter>())
            .entry_point(Key::of::<Database>())
            .build();

        let batch = resolve(&root).unwrap_err();
        let mut found = categories(&batch);
        found.sort();
        assert_eq!(found, vec!["CyclicDependency", "IncompatibleScope", "MissingBinding"]);
    }

    #[test]
    fn module_name_clash_explains_the_missing_binding() {
        let tellers = Module::builder("bank").bind(unit(Key::of::<Teller>(), vec![], || Teller)).build();
        let limiters = Module::builder("bank").bind(unit(Key::of::<Limiter>(), vec![], || Limiter)).build();
        let root = ComponentSpec::root("Bank")
            .install(tellers)
            .install(limiters)
            .entry_point(Key::of::<Teller>())
            .entry_point(Key::of::<Limiter>())
            .build();

        let batch = resolve(&root).unwrap_err();
        assert_eq!(categories(&batch), vec!["ConflictingModuleName", "MissingBinding"]);
    }

    #[test]
    fn suggestions_come_from_planned_keys() {
        struct Ledgers;
        let module = Module::builder("bank")
            .bind(unit(Key::of::<Ledgers>(), vec![], || Ledgers))
            .build();
        let root = ComponentSpec::root("Bank").install(module).entry_point(Key::of::<Ledgers>()).build();

        let graph = resolve(&root).unwrap();
        assert_eq!(graph.suggestions(&Key::of::<Ledger>()), vec![Key::of::<Ledgers>()]);
    }
}
