//! # Resource Model
//!
//! The payloads commands produce and the engine decorates with hypermedia.
//!
//! Property access is explicit: a resource's data implements [`EntityData`],
//! either as a dynamic property bag ([`Entity`]) or as a typed value paired
//! with a build-time accessor table ([`Typed`] + [`PropertyAccessors`]).
//! Transition binding reads properties through this trait only.

use crate::TransitionKey;
use crate::types::Method;
use serde_json::{Map, Value as JsonValue};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

// =============================================================================
// ENTITY DATA
// =============================================================================

/// Read access to the fields of a resource's data.
pub trait EntityData: fmt::Debug + Send + Sync {
    /// Look up a property by name. Dotted names address nested objects.
    fn property(&self, name: &str) -> Option<JsonValue>;

    /// Project the whole entity as JSON (used by renderers and tests).
    fn to_json(&self) -> JsonValue;
}

/// Render a scalar JSON value as the string used in hrefs and comparisons.
///
/// Objects, arrays and nulls have no scalar form.
#[must_use]
pub fn scalar_to_string(value: &JsonValue) -> Option<String> {
    match value {
        JsonValue::String(s) => Some(s.clone()),
        JsonValue::Number(n) => Some(n.to_string()),
        JsonValue::Bool(b) => Some(b.to_string()),
        JsonValue::Null | JsonValue::Array(_) | JsonValue::Object(_) => None,
    }
}

/// Dynamic entity: an ordered bag of JSON properties.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Entity {
    properties: Map<String, JsonValue>,
}

impl Entity {
    /// Create an empty entity.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an entity from a JSON object; other JSON values yield `None`.
    #[must_use]
    pub fn from_json(value: JsonValue) -> Option<Self> {
        match value {
            JsonValue::Object(properties) => Some(Self { properties }),
            _ => None,
        }
    }

    /// Builder-style property setter.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        self.set(name, value);
        self
    }

    /// Set a top-level property.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<JsonValue>) {
        self.properties.insert(name.into(), value.into());
    }

    /// Borrow the property map.
    #[must_use]
    pub fn properties(&self) -> &Map<String, JsonValue> {
        &self.properties
    }
}

impl EntityData for Entity {
    fn property(&self, name: &str) -> Option<JsonValue> {
        let mut segments = name.split('.');
        let mut current = self.properties.get(segments.next()?)?;
        for segment in segments {
            current = current.as_object()?.get(segment)?;
        }
        Some(current.clone())
    }

    fn to_json(&self) -> JsonValue {
        JsonValue::Object(self.properties.clone())
    }
}

// =============================================================================
// TYPED ENTITIES
// =============================================================================

/// Accessor function reading one property of `T`.
pub type Accessor<T> = fn(&T) -> Option<JsonValue>;

/// Build-time table of named property accessors for an entity type.
pub struct PropertyAccessors<T> {
    accessors: BTreeMap<&'static str, Accessor<T>>,
}

impl<T> PropertyAccessors<T> {
    /// Create an empty accessor table.
    #[must_use]
    pub fn new() -> Self {
        Self {
            accessors: BTreeMap::new(),
        }
    }

    /// Register an accessor under `name`.
    #[must_use]
    pub fn with(mut self, name: &'static str, accessor: Accessor<T>) -> Self {
        self.accessors.insert(name, accessor);
        self
    }

    /// Read `name` from `value`.
    #[must_use]
    pub fn get(&self, value: &T, name: &str) -> Option<JsonValue> {
        self.accessors.get(name).and_then(|accessor| accessor(value))
    }

    /// Registered property names in order.
    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.accessors.keys().copied()
    }
}

impl<T> Default for PropertyAccessors<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for PropertyAccessors<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PropertyAccessors")
            .field("names", &self.accessors.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// A typed value exposed through its accessor table.
pub struct Typed<T: 'static> {
    value: T,
    accessors: &'static PropertyAccessors<T>,
}

impl<T: 'static> Typed<T> {
    /// Pair a value with its accessor table.
    #[must_use]
    pub fn new(value: T, accessors: &'static PropertyAccessors<T>) -> Self {
        Self { value, accessors }
    }

    /// Borrow the wrapped value.
    #[must_use]
    pub fn value(&self) -> &T {
        &self.value
    }
}

impl<T: Send + Sync + 'static> fmt::Debug for Typed<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Typed").field("json", &self.to_json()).finish()
    }
}

impl<T: Send + Sync + 'static> EntityData for Typed<T> {
    fn property(&self, name: &str) -> Option<JsonValue> {
        self.accessors.get(&self.value, name)
    }

    fn to_json(&self) -> JsonValue {
        let mut map = Map::new();
        for name in self.accessors.names() {
            if let Some(v) = self.accessors.get(&self.value, name) {
                map.insert(name.to_string(), v);
            }
        }
        JsonValue::Object(map)
    }
}

// =============================================================================
// LINKS
// =============================================================================

/// A rendered transition for one specific request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Link {
    /// The transition this link renders; `None` for the self link.
    pub transition: Option<TransitionKey>,
    /// Display title (transition label or target state name).
    pub title: String,
    /// Relation names, space separated.
    pub rel: String,
    /// Fully bound target href.
    pub href: String,
    /// Method to use when following the link.
    pub method: Method,
    /// Media types the target accepts.
    pub consumes: Vec<String>,
    /// Media types the target produces.
    pub produces: Vec<String>,
    /// Optional stable link identifier.
    pub link_id: Option<String>,
    /// Optional field of the source entity the link belongs to.
    pub source_field: Option<String>,
}

// =============================================================================
// RESOURCE
// =============================================================================

/// The data carried by a resource.
#[derive(Debug, Clone, Default)]
pub enum Body {
    /// A single entity.
    Entity(Arc<dyn EntityData>),
    /// A collection of member resources.
    Collection(Vec<Resource>),
    /// No data (e.g. a noop command or a deleted entity).
    #[default]
    Empty,
}

/// A sub-resource embedded under the link that produced it.
#[derive(Debug, Clone)]
pub struct Embedded {
    /// The link whose target was resolved.
    pub link: Link,
    /// The resolved target resource.
    pub resource: Resource,
}

/// A resource payload with its hypermedia.
#[derive(Debug, Clone, Default)]
pub struct Resource {
    /// Entity name of the data.
    pub entity_name: String,
    /// The payload.
    pub body: Body,
    /// Links injected by the engine.
    pub links: Vec<Link>,
    /// Sub-resources embedded by the engine.
    pub embedded: Vec<Embedded>,
}

impl Resource {
    /// An entity resource.
    #[must_use]
    pub fn entity(entity_name: impl Into<String>, data: impl EntityData + 'static) -> Self {
        Self {
            entity_name: entity_name.into(),
            body: Body::Entity(Arc::new(data)),
            links: Vec::new(),
            embedded: Vec::new(),
        }
    }

    /// A collection resource.
    #[must_use]
    pub fn collection(entity_name: impl Into<String>, members: Vec<Resource>) -> Self {
        Self {
            entity_name: entity_name.into(),
            body: Body::Collection(members),
            links: Vec::new(),
            embedded: Vec::new(),
        }
    }

    /// A resource with no data.
    #[must_use]
    pub fn empty(entity_name: impl Into<String>) -> Self {
        Self {
            entity_name: entity_name.into(),
            ..Self::default()
        }
    }

    /// Entity data, if this is an entity resource.
    #[must_use]
    pub fn data(&self) -> Option<&dyn EntityData> {
        match &self.body {
            Body::Entity(data) => Some(data.as_ref()),
            Body::Collection(_) | Body::Empty => None,
        }
    }

    /// Collection members, if this is a collection resource.
    #[must_use]
    pub fn members(&self) -> Option<&[Resource]> {
        match &self.body {
            Body::Collection(members) => Some(members),
            Body::Entity(_) | Body::Empty => None,
        }
    }

    /// Mutable collection members.
    pub fn members_mut(&mut self) -> Option<&mut Vec<Resource>> {
        match &mut self.body {
            Body::Collection(members) => Some(members),
            Body::Entity(_) | Body::Empty => None,
        }
    }

    /// True if this is a collection resource.
    #[must_use]
    pub fn is_collection(&self) -> bool {
        matches!(self.body, Body::Collection(_))
    }

    /// Scalar properties of the entity data, stringified for binding.
    ///
    /// Collections and empty resources have no properties.
    #[must_use]
    pub fn scalar_properties(&self) -> BTreeMap<String, String> {
        let Some(data) = self.data() else {
            return BTreeMap::new();
        };
        match data.to_json() {
            JsonValue::Object(map) => map
                .iter()
                .filter_map(|(k, v)| scalar_to_string(v).map(|s| (k.clone(), s)))
                .collect(),
            _ => BTreeMap::new(),
        }
    }

    /// Find a link by relation.
    #[must_use]
    pub fn link_by_rel(&self, rel: &str) -> Option<&Link> {
        self.links
            .iter()
            .find(|l| l.rel.split(' ').any(|r| r == rel))
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::LazyLock;

    #[derive(Debug)]
    struct Customer {
        id: u64,
        name: String,
    }

    static CUSTOMER_ACCESSORS: LazyLock<PropertyAccessors<Customer>> = LazyLock::new(|| {
        PropertyAccessors::new()
            .with("id", |c: &Customer| Some(json!(c.id)))
            .with("name", |c: &Customer| Some(json!(c.name)))
    });

    #[test]
    fn entity_nested_property_lookup() {
        let entity = Entity::new()
            .with("id", 7)
            .with("address", json!({"city": "Geneva"}));

        assert_eq!(entity.property("id"), Some(json!(7)));
        assert_eq!(entity.property("address.city"), Some(json!("Geneva")));
        assert_eq!(entity.property("address.zip"), None);
        assert_eq!(entity.property("id.deeper"), None);
    }

    #[test]
    fn typed_entity_uses_accessor_table() {
        let typed = Typed::new(
            Customer {
                id: 3,
                name: "Ada".to_string(),
            },
            &CUSTOMER_ACCESSORS,
        );

        assert_eq!(typed.property("name"), Some(json!("Ada")));
        assert_eq!(typed.property("unknown"), None);
        assert_eq!(typed.to_json(), json!({"id": 3, "name": "Ada"}));
        assert_eq!(typed.value().id, 3);
    }

    #[test]
    fn scalar_properties_skip_structures() {
        let resource = Resource::entity(
            "Customer",
            Entity::new()
                .with("id", 1)
                .with("vip", true)
                .with("tags", json!(["a"])),
        );
        let props = resource.scalar_properties();
        assert_eq!(props.get("id").map(String::as_str), Some("1"));
        assert_eq!(props.get("vip").map(String::as_str), Some("true"));
        assert!(!props.contains_key("tags"));
    }

    #[test]
    fn collection_exposes_members() {
        let members = vec![
            Resource::entity("Customer", Entity::new().with("id", 1)),
            Resource::entity("Customer", Entity::new().with("id", 2)),
        ];
        let collection = Resource::collection("Customer", members);
        assert!(collection.is_collection());
        assert_eq!(collection.members().map(<[Resource]>::len), Some(2));
        assert!(collection.data().is_none());
        assert!(Resource::empty("Customer").members().is_none());
    }

    #[test]
    fn entity_from_json_requires_object() {
        assert!(Entity::from_json(json!({"id": 1})).is_some());
        assert!(Entity::from_json(json!([1, 2])).is_none());
    }
}
