//! # Graph Definitions
//!
//! Loads a declarative resource-state graph from TOML and bootstraps the
//! engine from it.
//!
//! ```toml
//! [engine]
//! max_embed_depth = 3
//!
//! [[entities]]
//! name = "Customer"
//! id_fields = ["id"]
//! fields = { name = "string" }
//!
//! [[states]]
//! name = "customers"
//! entity = "Customer"
//! path = "/customers"
//! kind = "collection"
//! initial = true
//! actions = [{ name = "GETEntities" }]
//!
//! [[transitions]]
//! from = "customers"
//! to = "customer"
//! flags = ["FOR_EACH"]
//!
//! [[fixtures]]
//! entity = "Customer"
//! records = [{ id = "1", name = "Alice" }]
//! ```
//!
//! Transition targets are always declared by name, so a transition may name
//! a state declared further down; names are resolved once when the graph is
//! built.

use crate::store::{FixtureStore, register_commands};
use hyperstate_core::{
    Action, CommandRegistry, EngineConfig, EntityMetadata, Expression, FieldType,
    HyperstateError, InteractionEngine, Metadata, Method, ProbeFunction, ResourceGraph,
    ResourceState, StateRef, TransitionDef, TransitionFlags,
};
use serde::Deserialize;
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

/// Maximum size of a graph definition file (16 MB).
const MAX_GRAPH_FILE_SIZE: u64 = 16 * 1024 * 1024;

// =============================================================================
// DOCUMENT MODEL
// =============================================================================

/// A whole graph definition document.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GraphConfig {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub entities: Vec<EntityConfig>,
    #[serde(default)]
    pub states: Vec<StateConfig>,
    #[serde(default)]
    pub transitions: Vec<TransitionConfig>,
    #[serde(default)]
    pub fixtures: Vec<FixtureConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EntityConfig {
    pub name: String,
    #[serde(default = "default_id_fields")]
    pub id_fields: Vec<String>,
    #[serde(default)]
    pub fields: BTreeMap<String, FieldType>,
}

fn default_id_fields() -> Vec<String> {
    vec![hyperstate_core::primitives::DEFAULT_ID_PATH_ELEMENT.to_string()]
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StateKindConfig {
    #[default]
    Item,
    Collection,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StateConfig {
    pub name: String,
    pub entity: String,
    pub path: String,
    #[serde(default)]
    pub kind: StateKindConfig,
    #[serde(default)]
    pub initial: bool,
    #[serde(default)]
    pub exception: bool,
    /// Path variable carrying the entity id when it is not `{id}`.
    #[serde(default)]
    pub id_parameter: Option<String>,
    #[serde(default)]
    pub relations: Vec<String>,
    #[serde(default)]
    pub consumes: Vec<String>,
    #[serde(default)]
    pub produces: Vec<String>,
    #[serde(default)]
    pub actions: Vec<ActionConfig>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionKindConfig {
    #[default]
    View,
    Entry,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ActionConfig {
    pub name: String,
    #[serde(default)]
    pub kind: ActionKindConfig,
    #[serde(default)]
    pub method: Option<Method>,
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TransitionConfig {
    pub from: String,
    pub to: String,
    #[serde(default = "default_method")]
    pub method: Method,
    #[serde(default)]
    pub flags: Vec<String>,
    #[serde(default)]
    pub uri_parameters: BTreeMap<String, String>,
    /// Comparison guard, e.g. `{status} = 'open' | {status} = 'new'`.
    #[serde(default)]
    pub condition: Option<String>,
    #[serde(default)]
    pub probe: Option<ProbeConfig>,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub link_id: Option<String>,
    #[serde(default)]
    pub source_field: Option<String>,
}

fn default_method() -> Method {
    Method::Get
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeFunctionConfig {
    #[default]
    Ok,
    NotFound,
}

impl From<ProbeFunctionConfig> for ProbeFunction {
    fn from(value: ProbeFunctionConfig) -> Self {
        match value {
            ProbeFunctionConfig::Ok => Self::Ok,
            ProbeFunctionConfig::NotFound => Self::NotFound,
        }
    }
}

/// Guard resolving another state.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProbeConfig {
    pub state: String,
    #[serde(default)]
    pub function: ProbeFunctionConfig,
}

/// Seed records for one entity.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FixtureConfig {
    pub entity: String,
    #[serde(default)]
    pub records: Vec<JsonValue>,
}

// =============================================================================
// LOADING
// =============================================================================

impl GraphConfig {
    /// Read and parse a definition file.
    pub fn load(path: &Path) -> Result<Self, HyperstateError> {
        let file_meta = std::fs::metadata(path).map_err(|e| {
            HyperstateError::IoError(format!("Cannot read '{}': {}", path.display(), e))
        })?;
        if file_meta.len() > MAX_GRAPH_FILE_SIZE {
            return Err(HyperstateError::SerializationError(format!(
                "File size {} bytes exceeds maximum allowed {} bytes",
                file_meta.len(),
                MAX_GRAPH_FILE_SIZE
            )));
        }
        let raw = std::fs::read_to_string(path).map_err(|e| {
            HyperstateError::IoError(format!("Cannot read '{}': {}", path.display(), e))
        })?;
        tracing::debug!(path = %path.display(), bytes = raw.len(), "graph definition loaded");
        Self::parse(&raw)
    }

    /// Parse a definition from TOML text.
    pub fn parse(raw: &str) -> Result<Self, HyperstateError> {
        toml::from_str(raw).map_err(|e| HyperstateError::SerializationError(e.to_string()))
    }

    // =========================================================================
    // BOOTSTRAP
    // =========================================================================

    /// Entity metadata registry.
    #[must_use]
    pub fn metadata(&self) -> Metadata {
        let mut metadata = Metadata::new();
        for entity in &self.entities {
            metadata.register(EntityMetadata {
                name: entity.name.clone(),
                id_fields: entity.id_fields.clone(),
                fields: entity.fields.clone(),
            });
        }
        metadata
    }

    /// Build and freeze the resource graph.
    pub fn graph(&self) -> Result<ResourceGraph, HyperstateError> {
        let mut builder = ResourceGraph::builder();
        for state in &self.states {
            builder.add_state(state.to_state())?;
        }
        for transition in &self.transitions {
            let source = builder
                .key(&transition.from)
                .ok_or_else(|| HyperstateError::StateNotFound(transition.from.clone()))?;
            builder.add_transition(source, transition.to_def()?)?;
        }
        builder.build()
    }

    /// A store seeded with the fixtures.
    pub fn store(&self, metadata: Arc<Metadata>) -> Result<FixtureStore, HyperstateError> {
        let store = FixtureStore::new(metadata);
        for fixture in &self.fixtures {
            for record in &fixture.records {
                store.insert_json(&fixture.entity, record.clone())?;
            }
        }
        Ok(store)
    }

    /// Build the engine, its metadata and its fixture store.
    pub fn bootstrap(&self) -> Result<Bootstrap, HyperstateError> {
        let metadata = Arc::new(self.metadata());
        let graph = Arc::new(self.graph()?);
        let store = Arc::new(self.store(Arc::clone(&metadata))?);
        let registry = register_commands(CommandRegistry::with_builtins(), &store);
        let engine = InteractionEngine::new(graph, metadata, registry)?.with_config(self.engine.clone());
        tracing::info!(
            states = engine.graph().state_count(),
            transitions = engine.graph().transition_count(),
            "engine ready"
        );
        Ok(Bootstrap { engine, store })
    }
}

/// A ready engine plus the store its commands read and write.
#[derive(Debug)]
pub struct Bootstrap {
    pub engine: InteractionEngine,
    pub store: Arc<FixtureStore>,
}

impl StateConfig {
    fn to_state(&self) -> ResourceState {
        let mut state = match self.kind {
            StateKindConfig::Item => ResourceState::item(&self.entity, &self.name, &self.path),
            StateKindConfig::Collection => {
                ResourceState::collection(&self.entity, &self.name, &self.path)
            }
        };
        if self.initial {
            state = state.initial();
        }
        if self.exception {
            state = state.exception();
        }
        if let Some(parameter) = &self.id_parameter {
            state = state.with_id_parameter(parameter.clone());
        }
        for relation in &self.relations {
            state = state.with_relation(relation.clone());
        }
        for media_type in &self.consumes {
            state = state.with_consumes(media_type.clone());
        }
        for media_type in &self.produces {
            state = state.with_produces(media_type.clone());
        }
        for action in &self.actions {
            state = state.with_action(action.to_action());
        }
        state
    }
}

impl ActionConfig {
    fn to_action(&self) -> Action {
        let action = match self.kind {
            ActionKindConfig::View => Action::view(self.name.clone()),
            ActionKindConfig::Entry => Action::entry(self.name.clone(), self.method),
        };
        self.properties
            .iter()
            .fold(action, |action, (k, v)| action.with_property(k.clone(), v.clone()))
    }
}

impl TransitionConfig {
    fn to_def(&self) -> Result<TransitionDef, HyperstateError> {
        let mut def = TransitionDef::new(self.method, StateRef::lazy(self.to.clone()))
            .flags(TransitionFlags::from_names(&self.flags)?);
        for (name, expression) in &self.uri_parameters {
            def = def.uri_parameter(name.clone(), expression.clone());
        }

        let comparison = self.condition.as_ref().map(Expression::comparison);
        let probe = self
            .probe
            .as_ref()
            .map(|p| Expression::probe(StateRef::lazy(p.state.clone()), p.function.into()));
        def = match (comparison, probe) {
            (Some(c), Some(p)) => def.condition(Expression::All(vec![c, p])),
            (Some(e), None) | (None, Some(e)) => def.condition(e),
            (None, None) => def,
        };

        if let Some(label) = &self.label {
            def = def.label(label.clone());
        }
        if let Some(link_id) = &self.link_id {
            def = def.link_id(link_id.clone());
        }
        if let Some(field) = &self.source_field {
            def = def.source_field(field.clone());
        }
        Ok(def)
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use hyperstate_core::ResourceStateProvider;

    const DEFINITION: &str = r#"
[engine]
max_embed_depth = 2

[[entities]]
name = "Order"
fields = { status = "string" }

[[states]]
name = "orders"
entity = "Order"
path = "/orders"
kind = "collection"
initial = true
actions = [{ name = "GETEntities" }]

[[transitions]]
from = "orders"
to = "order"
flags = ["FOR_EACH"]
condition = "{status} != 'void'"

[[states]]
name = "order"
entity = "Order"
path = "/orders/{id}"
actions = [{ name = "GETEntity" }, { name = "DeleteEntity", kind = "entry", method = "DELETE" }]

[[fixtures]]
entity = "Order"
records = [{ id = "1", status = "open" }]
"#;

    #[test]
    fn parses_and_builds_forward_references() {
        let config = GraphConfig::parse(DEFINITION).expect("parse");
        assert_eq!(config.engine.max_embed_depth, 2);
        assert!(config.engine.inject_links);

        let graph = config.graph().expect("graph");
        assert_eq!(graph.state_count(), 2);
        assert_eq!(graph.transition_count(), 1);
        let order = graph.state_by_name("order").expect("order");
        assert!(graph.allowed_methods(order).contains(&Method::Delete));
        assert_eq!(graph.initial_state(), graph.state_by_name("orders"));
    }

    #[test]
    fn entity_id_defaults_to_id() {
        let config = GraphConfig::parse(DEFINITION).expect("parse");
        let metadata = config.metadata();
        assert_eq!(metadata.require("Order").expect("meta").single_id_field().expect("id"), "id");
    }

    #[test]
    fn unknown_target_fails_build() {
        let raw = r#"
[[states]]
name = "a"
entity = "A"
path = "/a"

[[transitions]]
from = "a"
to = "missing"
"#;
        let config = GraphConfig::parse(raw).expect("parse");
        assert!(matches!(config.graph(), Err(HyperstateError::UnresolvedState(_))));
    }

    #[test]
    fn unknown_source_and_flag_fail() {
        let raw = r#"
[[states]]
name = "a"
entity = "A"
path = "/a"

[[transitions]]
from = "nowhere"
to = "a"
"#;
        let config = GraphConfig::parse(raw).expect("parse");
        assert!(matches!(config.graph(), Err(HyperstateError::StateNotFound(_))));

        let raw = raw.replace("nowhere", "a").replace("to = \"a\"", "to = \"a\"\nflags = [\"SOMETIMES\"]");
        let config = GraphConfig::parse(&raw).expect("parse");
        assert!(matches!(config.graph(), Err(HyperstateError::Configuration(_))));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let err = GraphConfig::parse("[[states]]\nname = \"a\"\nentity = \"A\"\npath = \"/\"\ncolour = 1\n")
            .expect_err("unknown key");
        assert!(matches!(err, HyperstateError::SerializationError(_)));
    }

    #[test]
    fn bootstrap_rejects_unknown_commands() {
        let raw = DEFINITION.replace("GETEntities", "ListEverything");
        let config = GraphConfig::parse(&raw).expect("parse");
        assert!(matches!(config.bootstrap(), Err(HyperstateError::Configuration(_))));
    }
}
