//! # Fixture Store
//!
//! In-memory records backing the built-in entity commands.
//!
//! Records are grouped by entity name and keyed by their id, both in
//! BTreeMaps so collections list in a stable order. The store is shared by
//! every command through an `Arc`; a `parking_lot::RwLock` serializes writes.

use hyperstate_core::{
    Command, CommandRegistry, Entity, EntityData, ExecutionType, HyperstateError,
    InteractionContext, InteractionException, Metadata, Outcome, Resource, Status,
    primitives::DEFAULT_ID_PATH_ELEMENT, resource::scalar_to_string,
};
use parking_lot::RwLock;
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Command name: load one entity by the request id.
pub const GET_ENTITY: &str = "GETEntity";
/// Command name: list every entity of the state's type.
pub const GET_ENTITIES: &str = "GETEntities";
/// Command name: create an entity from query parameters.
pub const CREATE_ENTITY: &str = "CreateEntity";
/// Command name: delete the entity named by the request id.
pub const DELETE_ENTITY: &str = "DeleteEntity";

const CONFLICT: Status = Status(409);

// =============================================================================
// STORE
// =============================================================================

/// Entity records keyed by entity name, then id.
#[derive(Debug, Default)]
pub struct FixtureStore {
    records: RwLock<BTreeMap<String, BTreeMap<String, Entity>>>,
    metadata: Arc<Metadata>,
}

impl FixtureStore {
    /// Create an empty store. Metadata supplies each entity's id field.
    #[must_use]
    pub fn new(metadata: Arc<Metadata>) -> Self {
        Self {
            records: RwLock::new(BTreeMap::new()),
            metadata,
        }
    }

    /// Name of the id field of `entity` (`id` when no metadata is registered).
    pub fn id_field(&self, entity: &str) -> Result<String, HyperstateError> {
        match self.metadata.entity(entity) {
            Some(meta) => meta.single_id_field().map(str::to_string),
            None => Ok(DEFAULT_ID_PATH_ELEMENT.to_string()),
        }
    }

    /// Insert a record, replacing any record with the same id.
    pub fn insert(&self, entity_name: &str, record: Entity) -> Result<String, HyperstateError> {
        let id_field = self.id_field(entity_name)?;
        let id = record
            .property(&id_field)
            .as_ref()
            .and_then(scalar_to_string)
            .ok_or_else(|| {
                HyperstateError::Configuration(format!(
                    "{} record has no scalar '{}' field",
                    entity_name, id_field
                ))
            })?;
        self.records
            .write()
            .entry(entity_name.to_string())
            .or_default()
            .insert(id.clone(), record);
        Ok(id)
    }

    /// Insert a record from a JSON object.
    pub fn insert_json(&self, entity_name: &str, value: JsonValue) -> Result<String, HyperstateError> {
        let record = Entity::from_json(value).ok_or_else(|| {
            HyperstateError::SerializationError(format!(
                "{} fixture is not an object",
                entity_name
            ))
        })?;
        self.insert(entity_name, record)
    }

    #[must_use]
    pub fn get(&self, entity_name: &str, id: &str) -> Option<Entity> {
        self.records.read().get(entity_name)?.get(id).cloned()
    }

    /// Every record of `entity_name`, ordered by id.
    #[must_use]
    pub fn list(&self, entity_name: &str) -> Vec<Entity> {
        self.records
            .read()
            .get(entity_name)
            .map(|records| records.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn remove(&self, entity_name: &str, id: &str) -> Option<Entity> {
        self.records.write().get_mut(entity_name)?.remove(id)
    }

    #[must_use]
    pub fn len(&self, entity_name: &str) -> usize {
        self.records.read().get(entity_name).map_or(0, BTreeMap::len)
    }

    /// Insert a new record unless its id is taken.
    ///
    /// A record without an id gets the next free one. Id assignment, the
    /// conflict check and the insert happen under one write lock.
    pub fn create(&self, entity_name: &str, mut record: Entity) -> Result<Created, HyperstateError> {
        let id_field = self.id_field(entity_name)?;
        let mut records = self.records.write();
        let table = records.entry(entity_name.to_string()).or_default();

        let id = match record.property(&id_field).as_ref().and_then(scalar_to_string) {
            Some(id) => id,
            None => {
                let id = next_id(table);
                record.set(id_field.as_str(), id.as_str());
                id
            }
        };
        if table.contains_key(&id) {
            return Ok(Created::Conflict(id));
        }
        table.insert(id.clone(), record.clone());
        Ok(Created::Inserted { id, record })
    }
}

/// Outcome of [`FixtureStore::create`].
#[derive(Debug, Clone)]
pub enum Created {
    Inserted { id: String, record: Entity },
    /// A record with this id already exists.
    Conflict(String),
}

/// Smallest positive integer id not yet used in `table`.
fn next_id(table: &BTreeMap<String, Entity>) -> String {
    let mut candidate = table.len().saturating_add(1);
    while table.contains_key(&candidate.to_string()) {
        candidate = candidate.saturating_add(1);
    }
    candidate.to_string()
}

/// Register the entity commands next to the core builtins.
#[must_use]
pub fn register_commands(registry: CommandRegistry, store: &Arc<FixtureStore>) -> CommandRegistry {
    registry
        .with(GET_ENTITY, Arc::new(GetEntity(Arc::clone(store))))
        .with(GET_ENTITIES, Arc::new(GetEntities(Arc::clone(store))))
        .with(CREATE_ENTITY, Arc::new(CreateEntity(Arc::clone(store))))
        .with(DELETE_ENTITY, Arc::new(DeleteEntity(Arc::clone(store))))
}

// =============================================================================
// COMMANDS
// =============================================================================

/// The request id, or the failure outcome to return.
fn require_id(ctx: &mut InteractionContext<'_>) -> Result<String, Outcome> {
    match ctx.id() {
        Ok(Some(id)) => Ok(id),
        Ok(None) => Err(Outcome::invalid("request carries no id")),
        Err(e) => {
            tracing::error!(state = %ctx.current_state().id(), error = %e, "cannot resolve id");
            ctx.set_exception(InteractionException::new(
                Status::INTERNAL_SERVER_ERROR,
                e.to_string(),
            ));
            Err(Outcome::failure(e.to_string()))
        }
    }
}

fn not_found(ctx: &mut InteractionContext<'_>, entity_name: &str, id: &str) -> Outcome {
    let message = format!("{} '{}' not found", entity_name, id);
    ctx.set_exception(InteractionException::not_found(message.clone()));
    Outcome::failure(message)
}

/// Loads the entity named by the request id.
#[derive(Debug)]
pub struct GetEntity(Arc<FixtureStore>);

impl Command for GetEntity {
    fn execute(&self, ctx: &mut InteractionContext<'_>) -> Outcome {
        let entity_name = ctx.current_state().entity_name().to_string();
        let id = match require_id(ctx) {
            Ok(id) => id,
            Err(outcome) => return outcome,
        };
        match self.0.get(&entity_name, &id) {
            Some(record) => {
                ctx.set_resource(Resource::entity(entity_name, record));
                Outcome::Success
            }
            None => not_found(ctx, &entity_name, &id),
        }
    }
}

/// Lists the entities of the state's type.
///
/// Query parameters naming a declared field filter members by equality.
#[derive(Debug)]
pub struct GetEntities(Arc<FixtureStore>);

impl Command for GetEntities {
    fn execute(&self, ctx: &mut InteractionContext<'_>) -> Outcome {
        let entity_name = ctx.current_state().entity_name().to_string();
        let filters: Vec<(String, String)> = match ctx.metadata().entity(&entity_name) {
            Some(meta) => ctx
                .query_parameters()
                .iter_first()
                .filter(|(name, _)| meta.field_type(name).is_some())
                .map(|(name, value)| (name.to_string(), value.to_string()))
                .collect(),
            None => Vec::new(),
        };

        let members = self
            .0
            .list(&entity_name)
            .into_iter()
            .filter(|record| {
                filters.iter().all(|(name, value)| {
                    record
                        .property(name)
                        .as_ref()
                        .and_then(scalar_to_string)
                        .is_some_and(|v| v == *value)
                })
            })
            .map(|record| Resource::entity(entity_name.clone(), record))
            .collect();
        ctx.set_resource(Resource::collection(entity_name, members));
        Outcome::Success
    }
}

/// Creates an entity from the request's query parameters.
///
/// A missing id is generated. Moves the interaction on, so the engine
/// follows AUTO transitions out of the created state.
#[derive(Debug)]
pub struct CreateEntity(Arc<FixtureStore>);

impl Command for CreateEntity {
    fn execute(&self, ctx: &mut InteractionContext<'_>) -> Outcome {
        let entity_name = ctx.current_state().entity_name().to_string();
        if ctx.query_parameters().is_empty() {
            return Outcome::invalid(format!("no properties given for {}", entity_name));
        }

        let mut record = Entity::new();
        for (name, value) in ctx.query_parameters().iter_first() {
            record.set(name, value);
        }
        match self.0.create(&entity_name, record) {
            Ok(Created::Inserted { id, record }) => {
                tracing::debug!(entity = %entity_name, id = %id, "entity created");
                ctx.set_resource(Resource::entity(entity_name, record));
                Outcome::Success
            }
            Ok(Created::Conflict(id)) => {
                let message = format!("{} '{}' already exists", entity_name, id);
                ctx.set_exception(InteractionException::new(CONFLICT, message.clone()));
                Outcome::failure(message)
            }
            Err(e) => Outcome::failure(e.to_string()),
        }
    }

    fn execution_type(&self) -> ExecutionType {
        ExecutionType::Transition
    }
}

/// Deletes the entity named by the request id.
#[derive(Debug)]
pub struct DeleteEntity(Arc<FixtureStore>);

impl Command for DeleteEntity {
    fn execute(&self, ctx: &mut InteractionContext<'_>) -> Outcome {
        let entity_name = ctx.current_state().entity_name().to_string();
        let id = match require_id(ctx) {
            Ok(id) => id,
            Err(outcome) => return outcome,
        };
        match self.0.remove(&entity_name, &id) {
            Some(_) => {
                tracing::debug!(entity = %entity_name, id = %id, "entity deleted");
                ctx.set_resource(Resource::empty(entity_name));
                Outcome::Success
            }
            None => not_found(ctx, &entity_name, &id),
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
