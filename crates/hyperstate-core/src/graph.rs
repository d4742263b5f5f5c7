//! # Resource Graph
//!
//! The immutable-after-build description of resource states and the typed,
//! conditional transitions between them.
//!
//! ## Lazy references
//!
//! A transition may name its target before that state is registered
//! (`StateRef::Lazy`). Transitions keep the handle as declared; `build()`
//! computes the resolution table exactly once and fails if any lazy name is
//! unknown. Afterwards [`ResourceGraph::resolve`] is a pure lookup, so every
//! holder of a reference observes the same concrete state.
//!
//! All maps are `BTreeMap` so enumeration order is deterministic.

use crate::expression::Expression;
use crate::primitives::{COLLECTION_RELATION, ITEM_RELATION};
use crate::template;
use crate::{
    HyperstateError, Method, Parameters, StateId, StateKey, TransitionFlags, TransitionKey,
};
use std::collections::{BTreeMap, BTreeSet};

// =============================================================================
// ACTIONS
// =============================================================================

/// When an action runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ActionKind {
    /// Runs when the state is read (GET/HEAD).
    View,
    /// Runs when the state is entered by an unsafe method.
    Entry,
}

/// A named command binding with static configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Action {
    /// Command name, looked up in the command registry.
    pub name: String,
    /// View or entry.
    pub kind: ActionKind,
    /// Restricts an entry action to one method; `None` matches any unsafe method.
    pub method: Option<Method>,
    /// Static configuration handed to the command.
    pub properties: BTreeMap<String, String>,
}

impl Action {
    /// A view action.
    #[must_use]
    pub fn view(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: ActionKind::View,
            method: None,
            properties: BTreeMap::new(),
        }
    }

    /// An entry action, optionally restricted to one method.
    #[must_use]
    pub fn entry(name: impl Into<String>, method: Option<Method>) -> Self {
        Self {
            name: name.into(),
            kind: ActionKind::Entry,
            method,
            properties: BTreeMap::new(),
        }
    }

    /// Builder-style property.
    #[must_use]
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// True if this action runs for a request using `method`.
    #[must_use]
    pub fn applies_to(&self, method: Method) -> bool {
        match self.kind {
            ActionKind::View => matches!(method, Method::Get | Method::Head),
            ActionKind::Entry => {
                !method.is_safe() && self.method.is_none_or(|m| m == method)
            }
        }
    }
}

// =============================================================================
// STATES
// =============================================================================

/// Whether a state represents one entity or a collection of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum StateKind {
    #[default]
    Item,
    Collection,
}

/// Reference to a transition target.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum StateRef {
    /// A registered state.
    Concrete(StateKey),
    /// A state referenced by name, resolved once at build time.
    Lazy(String),
}

impl StateRef {
    /// A lazy reference by state name.
    #[must_use]
    pub fn lazy(name: impl Into<String>) -> Self {
        Self::Lazy(name.into())
    }
}

impl From<StateKey> for StateRef {
    fn from(key: StateKey) -> Self {
        Self::Concrete(key)
    }
}

/// A node of the interaction graph.
///
/// Equality is by `(entity, name)` only.
#[derive(Debug, Clone)]
pub struct ResourceState {
    id: StateId,
    kind: StateKind,
    path: String,
    actions: Vec<Action>,
    transitions: Vec<Transition>,
    path_id_parameter: Option<String>,
    relations: Vec<String>,
    initial: bool,
    exception: bool,
    consumes: Vec<String>,
    produces: Vec<String>,
}

impl PartialEq for ResourceState {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ResourceState {}

impl ResourceState {
    fn new(kind: StateKind, entity: &str, name: &str, path: &str) -> Self {
        Self {
            id: StateId::new(entity, name),
            kind,
            path: path.to_string(),
            actions: Vec::new(),
            transitions: Vec::new(),
            path_id_parameter: None,
            relations: Vec::new(),
            initial: false,
            exception: false,
            consumes: Vec::new(),
            produces: Vec::new(),
        }
    }

    /// A state representing a single entity.
    #[must_use]
    pub fn item(entity: &str, name: &str, path: &str) -> Self {
        Self::new(StateKind::Item, entity, name, path)
    }

    /// A state representing a collection of entities.
    #[must_use]
    pub fn collection(entity: &str, name: &str, path: &str) -> Self {
        Self::new(StateKind::Collection, entity, name, path)
    }

    /// Builder-style action.
    #[must_use]
    pub fn with_action(mut self, action: Action) -> Self {
        self.actions.push(action);
        self
    }

    /// Builder-style id parameter name.
    #[must_use]
    pub fn with_id_parameter(mut self, name: impl Into<String>) -> Self {
        self.path_id_parameter = Some(name.into());
        self
    }

    /// Builder-style link relation.
    #[must_use]
    pub fn with_relation(mut self, relation: impl Into<String>) -> Self {
        self.relations.push(relation.into());
        self
    }

    /// Mark as the graph's entry point.
    #[must_use]
    pub fn initial(mut self) -> Self {
        self.initial = true;
        self
    }

    /// Mark as the state rendered for failures.
    #[must_use]
    pub fn exception(mut self) -> Self {
        self.exception = true;
        self
    }

    /// Builder-style accepted media type.
    #[must_use]
    pub fn with_consumes(mut self, media_type: impl Into<String>) -> Self {
        self.consumes.push(media_type.into());
        self
    }

    /// Builder-style produced media type.
    #[must_use]
    pub fn with_produces(mut self, media_type: impl Into<String>) -> Self {
        self.produces.push(media_type.into());
        self
    }

    /// Identity.
    #[must_use]
    pub fn id(&self) -> &StateId {
        &self.id
    }

    /// State name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.id.name
    }

    /// Entity name.
    #[must_use]
    pub fn entity_name(&self) -> &str {
        &self.id.entity
    }

    /// Item or collection.
    #[must_use]
    pub fn kind(&self) -> StateKind {
        self.kind
    }

    /// True for collection states.
    #[must_use]
    pub fn is_collection(&self) -> bool {
        self.kind == StateKind::Collection
    }

    /// URI path template.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Declared actions in order.
    #[must_use]
    pub fn actions(&self) -> &[Action] {
        &self.actions
    }

    /// Actions that run for a request using `method`.
    pub fn actions_for(&self, method: Method) -> impl Iterator<Item = &Action> + '_ {
        self.actions.iter().filter(move |a| a.applies_to(method))
    }

    /// Outbound transitions in declaration order.
    #[must_use]
    pub fn transitions(&self) -> &[Transition] {
        &self.transitions
    }

    /// Name of the path parameter holding the id, if declared.
    #[must_use]
    pub fn path_id_parameter(&self) -> Option<&str> {
        self.path_id_parameter.as_deref()
    }

    /// Declared relations.
    #[must_use]
    pub fn relations(&self) -> &[String] {
        &self.relations
    }

    /// Relation string rendered on links to this state.
    #[must_use]
    pub fn rel(&self) -> String {
        if self.relations.is_empty() {
            match self.kind {
                StateKind::Item => ITEM_RELATION.to_string(),
                StateKind::Collection => COLLECTION_RELATION.to_string(),
            }
        } else {
            self.relations.join(" ")
        }
    }

    /// True if this is the entry point.
    #[must_use]
    pub fn is_initial(&self) -> bool {
        self.initial
    }

    /// True if this state renders failures.
    #[must_use]
    pub fn is_exception(&self) -> bool {
        self.exception
    }

    /// Accepted media types.
    #[must_use]
    pub fn consumes(&self) -> &[String] {
        &self.consumes
    }

    /// Produced media types.
    #[must_use]
    pub fn produces(&self) -> &[String] {
        &self.produces
    }
}

// =============================================================================
// TRANSITIONS
// =============================================================================

/// A directed, optionally guarded edge between two states.
#[derive(Debug, Clone)]
pub struct Transition {
    /// Source state.
    pub source: StateKey,
    /// Target state as declared.
    pub target: StateRef,
    /// Method the transition is bound to.
    pub method: Method,
    /// Combined flags.
    pub flags: TransitionFlags,
    /// Target path variable -> source expression (`{property}` templates or literals).
    pub uri_parameters: BTreeMap<String, String>,
    /// Guard; the transition is excluded when it evaluates false.
    pub condition: Option<Expression>,
    /// Display label.
    pub label: Option<String>,
    /// Stable link identifier.
    pub link_id: Option<String>,
    /// Field of the source entity this transition belongs to.
    pub source_field: Option<String>,
}

impl Transition {
    /// True if `flag` is set.
    #[must_use]
    pub fn has(&self, flag: TransitionFlags) -> bool {
        self.flags.contains(flag)
    }
}

/// Declaration of a transition, before it is attached to its source.
#[derive(Debug, Clone)]
pub struct TransitionDef {
    method: Method,
    target: StateRef,
    flags: TransitionFlags,
    uri_parameters: BTreeMap<String, String>,
    condition: Option<Expression>,
    label: Option<String>,
    link_id: Option<String>,
    source_field: Option<String>,
}

impl TransitionDef {
    /// A plain transition to `target` bound to `method`.
    #[must_use]
    pub fn new(method: Method, target: impl Into<StateRef>) -> Self {
        Self {
            method,
            target: target.into(),
            flags: TransitionFlags::NONE,
            uri_parameters: BTreeMap::new(),
            condition: None,
            label: None,
            link_id: None,
            source_field: None,
        }
    }

    /// Add flags.
    #[must_use]
    pub fn flags(mut self, flags: TransitionFlags) -> Self {
        self.flags |= flags;
        self
    }

    /// Bind target path variable `name` to `expression`.
    #[must_use]
    pub fn uri_parameter(mut self, name: impl Into<String>, expression: impl Into<String>) -> Self {
        self.uri_parameters.insert(name.into(), expression.into());
        self
    }

    /// Guard the transition; sets the EXPRESSION flag.
    #[must_use]
    pub fn condition(mut self, expression: Expression) -> Self {
        self.condition = Some(expression);
        self.flags |= TransitionFlags::EXPRESSION;
        self
    }

    /// Display label.
    #[must_use]
    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Stable link identifier.
    #[must_use]
    pub fn link_id(mut self, link_id: impl Into<String>) -> Self {
        self.link_id = Some(link_id.into());
        self
    }

    /// Source entity field the link belongs to.
    #[must_use]
    pub fn source_field(mut self, field: impl Into<String>) -> Self {
        self.source_field = Some(field.into());
        self
    }

    fn attach(self, source: StateKey) -> Transition {
        Transition {
            source,
            target: self.target,
            method: self.method,
            flags: self.flags,
            uri_parameters: self.uri_parameters,
            condition: self.condition,
            label: self.label,
            link_id: self.link_id,
            source_field: self.source_field,
        }
    }
}

// =============================================================================
// BUILDER
// =============================================================================

/// Name -> handle table used for lazy references.
///
/// Every state answers to its qualified `Entity.name`. A bare name answers
/// only while a single entity uses it.
#[derive(Debug, Clone, Default)]
struct NameTable {
    /// `None` marks a bare name shared by several entities.
    names: BTreeMap<String, Option<StateKey>>,
}

impl NameTable {
    fn insert(&mut self, id: &StateId, key: StateKey) {
        self.names.insert(id.to_string(), Some(key));
        self.names
            .entry(id.name.clone())
            .and_modify(|slot| {
                if *slot != Some(key) {
                    *slot = None;
                }
            })
            .or_insert(Some(key));
    }

    fn get(&self, name: &str) -> Option<StateKey> {
        self.names.get(name).copied().flatten()
    }

    fn require(&self, name: &str) -> Result<StateKey, HyperstateError> {
        match self.names.get(name) {
            Some(Some(key)) => Ok(*key),
            Some(None) => Err(HyperstateError::Configuration(format!(
                "state name '{}' is used by several entities; qualify it as Entity.{}",
                name, name
            ))),
            None => Err(HyperstateError::UnresolvedState(name.to_string())),
        }
    }

    fn len(&self) -> usize {
        self.names.len()
    }
}

/// Append-only builder for a [`ResourceGraph`].
#[derive(Debug, Default)]
pub struct ResourceGraphBuilder {
    states: Vec<ResourceState>,
    ids: BTreeSet<StateId>,
    names: NameTable,
}

impl ResourceGraphBuilder {
    /// Create an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a state. The (entity, name) identity must be unique.
    pub fn add_state(&mut self, state: ResourceState) -> Result<StateKey, HyperstateError> {
        if !self.ids.insert(state.id.clone()) {
            return Err(HyperstateError::DuplicateState(state.id.clone()));
        }
        let key = StateKey(self.states.len());
        self.names.insert(&state.id, key);
        self.states.push(state);
        Ok(key)
    }

    /// Handle of a registered state, by bare or `Entity.name` qualified name.
    #[must_use]
    pub fn key(&self, name: &str) -> Option<StateKey> {
        self.names.get(name)
    }

    /// Append a transition to `source`.
    pub fn add_transition(
        &mut self,
        source: StateKey,
        def: TransitionDef,
    ) -> Result<TransitionKey, HyperstateError> {
        let state = self
            .states
            .get_mut(source.0)
            .ok_or_else(|| HyperstateError::StateNotFound(format!("{:?}", source)))?;
        let index = state.transitions.len();
        state.transitions.push(def.attach(source));
        Ok(TransitionKey::new(source, index))
    }

    /// Append a transition from its parts.
    pub fn add_simple_transition(
        &mut self,
        source: StateKey,
        method: Method,
        target: impl Into<StateRef>,
        flags: TransitionFlags,
        uri_parameters: BTreeMap<String, String>,
        condition: Option<Expression>,
    ) -> Result<TransitionKey, HyperstateError> {
        let mut def = TransitionDef::new(method, target).flags(flags);
        def.uri_parameters = uri_parameters;
        if let Some(expression) = condition {
            def = def.condition(expression);
        }
        self.add_transition(source, def)
    }

    /// Freeze the graph, resolving every lazy reference once.
    pub fn build(self) -> Result<ResourceGraph, HyperstateError> {
        let Self { states, names, .. } = self;

        let check = |reference: &StateRef| -> Result<(), HyperstateError> {
            match reference {
                StateRef::Concrete(key) if key.0 < states.len() => Ok(()),
                StateRef::Concrete(key) => {
                    Err(HyperstateError::StateNotFound(format!("{:?}", key)))
                }
                StateRef::Lazy(name) => names.require(name).map(|_| ()),
            }
        };

        for state in &states {
            for transition in &state.transitions {
                check(&transition.target)?;
                if let Some(condition) = &transition.condition {
                    for reference in condition.state_refs() {
                        check(reference)?;
                    }
                }
            }
        }

        let mut methods: Vec<BTreeSet<Method>> = states
            .iter()
            .map(|state| {
                let mut set = BTreeSet::new();
                for action in &state.actions {
                    match (action.kind, action.method) {
                        (ActionKind::View, _) => {
                            set.insert(Method::Get);
                            set.insert(Method::Head);
                        }
                        (ActionKind::Entry, Some(m)) => {
                            set.insert(m);
                        }
                        (ActionKind::Entry, None) => {}
                    }
                }
                set
            })
            .collect();

        for state in &states {
            for transition in &state.transitions {
                let target = match &transition.target {
                    StateRef::Concrete(key) => *key,
                    StateRef::Lazy(name) => match names.get(name) {
                        Some(key) => key,
                        None => continue,
                    },
                };
                if let Some(set) = methods.get_mut(target.0) {
                    set.insert(transition.method);
                }
            }
        }

        let initial = states
            .iter()
            .position(ResourceState::is_initial)
            .map(StateKey);

        tracing::debug!(
            states = states.len(),
            lazy_names = names.len(),
            "resource graph built"
        );

        Ok(ResourceGraph {
            states,
            resolution: names,
            methods,
            initial,
        })
    }
}

// =============================================================================
// GRAPH
// =============================================================================

/// A frozen resource graph, shareable across request threads.
#[derive(Debug, Clone)]
pub struct ResourceGraph {
    states: Vec<ResourceState>,
    resolution: NameTable,
    methods: Vec<BTreeSet<Method>>,
    initial: Option<StateKey>,
}

impl ResourceGraph {
    /// Start building a graph.
    #[must_use]
    pub fn builder() -> ResourceGraphBuilder {
        ResourceGraphBuilder::new()
    }

    /// Resolve a reference to its concrete state handle.
    ///
    /// Idempotent: the same reference always yields the same key.
    pub fn resolve(&self, reference: &StateRef) -> Result<StateKey, HyperstateError> {
        match reference {
            StateRef::Concrete(key) if key.0 < self.states.len() => Ok(*key),
            StateRef::Concrete(key) => Err(HyperstateError::StateNotFound(format!("{:?}", key))),
            StateRef::Lazy(name) => self.resolution.require(name),
        }
    }

    /// Resolve a reference straight to the state.
    pub fn resolve_state(&self, reference: &StateRef) -> Result<&ResourceState, HyperstateError> {
        let key = self.resolve(reference)?;
        self.require_state(key)
    }

    /// The state behind a handle.
    #[must_use]
    pub fn state(&self, key: StateKey) -> Option<&ResourceState> {
        self.states.get(key.0)
    }

    /// The state behind a handle, failing if unknown.
    pub fn require_state(&self, key: StateKey) -> Result<&ResourceState, HyperstateError> {
        self.state(key)
            .ok_or_else(|| HyperstateError::StateNotFound(format!("{:?}", key)))
    }

    /// A transition by key.
    #[must_use]
    pub fn transition(&self, key: TransitionKey) -> Option<&Transition> {
        self.state(key.source)?.transitions.get(key.index)
    }

    /// All states with their handles, in registration order.
    pub fn states(&self) -> impl Iterator<Item = (StateKey, &ResourceState)> + '_ {
        self.states
            .iter()
            .enumerate()
            .map(|(i, state)| (StateKey(i), state))
    }

    /// Number of states.
    #[must_use]
    pub fn state_count(&self) -> usize {
        self.states.len()
    }

    /// Number of transitions across all states.
    #[must_use]
    pub fn transition_count(&self) -> usize {
        self.states.iter().map(|s| s.transitions.len()).sum()
    }

    /// The entry point, if one was marked.
    #[must_use]
    pub fn initial_state(&self) -> Option<StateKey> {
        self.initial
    }

    /// The first state marked as exception state.
    #[must_use]
    pub fn exception_state(&self) -> Option<StateKey> {
        self.states
            .iter()
            .position(ResourceState::is_exception)
            .map(StateKey)
    }
}

// =============================================================================
// RESOURCE STATE PROVIDER
// =============================================================================

/// Lookup surface used to route requests onto the graph.
pub trait ResourceStateProvider {
    /// Handle of the state named `name`.
    fn state_by_name(&self, name: &str) -> Option<StateKey>;

    /// States whose path template matches `path`, with extracted parameters.
    fn states_for_path(&self, path: &str) -> Vec<(StateKey, Parameters)>;

    /// Methods a state accepts.
    fn allowed_methods(&self, key: StateKey) -> BTreeSet<Method>;

    /// The state serving `method` on `path`.
    ///
    /// The first matching state in registration order wins.
    fn state_for_request(&self, method: Method, path: &str) -> Option<(StateKey, Parameters)> {
        self.states_for_path(path)
            .into_iter()
            .find(|(key, _)| self.allowed_methods(*key).contains(&method))
    }
}

impl ResourceStateProvider for ResourceGraph {
    fn state_by_name(&self, name: &str) -> Option<StateKey> {
        self.resolution.get(name)
    }

    fn states_for_path(&self, path: &str) -> Vec<(StateKey, Parameters)> {
        self.states()
            .filter_map(|(key, state)| template::match_path(state.path(), path).map(|p| (key, p)))
            .collect()
    }

    fn allowed_methods(&self, key: StateKey) -> BTreeSet<Method> {
        self.methods.get(key.0).cloned().unwrap_or_default()
    }
}

// =============================================================================
// TESTS
// =============================================================================
