//! # Entity Metadata
//!
//! Read-only registry describing each entity's id fields and field types.
//!
//! The registry is built once at bootstrap and handed to every consumer
//! explicitly (the engine, and through it each `InteractionContext`).

use crate::HyperstateError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Declared type of an entity field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    #[default]
    String,
    Integer,
    Decimal,
    Boolean,
    Date,
    Timestamp,
}

/// Metadata for one entity.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EntityMetadata {
    /// Entity name.
    pub name: String,
    /// Fields forming the entity's identifier.
    #[serde(default)]
    pub id_fields: Vec<String>,
    /// Field name -> declared type.
    #[serde(default)]
    pub fields: BTreeMap<String, FieldType>,
}

impl EntityMetadata {
    /// Create metadata with a single id field.
    #[must_use]
    pub fn new(name: impl Into<String>, id_field: impl Into<String>) -> Self {
        let id_field = id_field.into();
        let mut fields = BTreeMap::new();
        fields.insert(id_field.clone(), FieldType::String);
        Self {
            name: name.into(),
            id_fields: vec![id_field],
            fields,
        }
    }

    /// Builder-style field declaration.
    #[must_use]
    pub fn with_field(mut self, name: impl Into<String>, field_type: FieldType) -> Self {
        self.fields.insert(name.into(), field_type);
        self
    }

    /// Declared type of `field`.
    #[must_use]
    pub fn field_type(&self, field: &str) -> Option<FieldType> {
        self.fields.get(field).copied()
    }

    /// The single id field.
    ///
    /// Composite ids are not supported and fail loudly here.
    pub fn single_id_field(&self) -> Result<&str, HyperstateError> {
        match self.id_fields.as_slice() {
            [field] => Ok(field),
            [] => Err(HyperstateError::MissingIdField(self.name.clone())),
            fields => Err(HyperstateError::MultipleIdFields {
                entity: self.name.clone(),
                count: fields.len(),
            }),
        }
    }
}

/// Registry of entity metadata keyed by entity name.
#[derive(Debug, Clone, Default)]
pub struct Metadata {
    entities: BTreeMap<String, EntityMetadata>,
}

impl Metadata {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style registration.
    #[must_use]
    pub fn with(mut self, entity: EntityMetadata) -> Self {
        self.register(entity);
        self
    }

    /// Register (or replace) an entity's metadata.
    pub fn register(&mut self, entity: EntityMetadata) {
        self.entities.insert(entity.name.clone(), entity);
    }

    /// Metadata for `entity`, if registered.
    #[must_use]
    pub fn entity(&self, entity: &str) -> Option<&EntityMetadata> {
        self.entities.get(entity)
    }

    /// Metadata for `entity`, failing if unknown.
    pub fn require(&self, entity: &str) -> Result<&EntityMetadata, HyperstateError> {
        self.entity(entity)
            .ok_or_else(|| HyperstateError::UnknownEntity(entity.to_string()))
    }

    /// Number of registered entities.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    /// True if no entity is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_id_field_resolves() {
        let meta = EntityMetadata::new("Customer", "customerId");
        assert_eq!(meta.single_id_field().expect("id"), "customerId");
        assert_eq!(meta.field_type("customerId"), Some(FieldType::String));
    }

    #[test]
    fn composite_id_fails_loudly() {
        let meta = EntityMetadata {
            name: "OrderLine".to_string(),
            id_fields: vec!["order".to_string(), "line".to_string()],
            fields: BTreeMap::new(),
        };
        assert!(matches!(
            meta.single_id_field(),
            Err(HyperstateError::MultipleIdFields { count: 2, .. })
        ));
    }

    #[test]
    fn missing_id_field_is_an_error() {
        let meta = EntityMetadata {
            name: "Note".to_string(),
            ..EntityMetadata::default()
        };
        assert!(matches!(
            meta.single_id_field(),
            Err(HyperstateError::MissingIdField(_))
        ));
    }

    #[test]
    fn registry_lookup() {
        let metadata = Metadata::new()
            .with(EntityMetadata::new("Customer", "id").with_field("name", FieldType::String));
        assert_eq!(metadata.len(), 1);
        assert!(metadata.require("Customer").is_ok());
        assert!(matches!(
            metadata.require("Order"),
            Err(HyperstateError::UnknownEntity(_))
        ));
    }
}
