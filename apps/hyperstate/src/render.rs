//! # Response Rendering
//!
//! Projects engine responses as HAL-like JSON:
//!
//! ```json
//! {
//!   "status": 200,
//!   "headers": { "Location": "/customers/3" },
//!   "body": {
//!     "id": "3",
//!     "_links": { "self": { "href": "/customers/3", "method": "GET" } },
//!     "_embedded": { "profile": { "bio": "..." } }
//!   }
//! }
//! ```
//!
//! Links are keyed by link id, falling back to the link title. Keys that
//! occur more than once render as arrays. Collection members are listed
//! under `_embedded.items`.

use hyperstate_core::{Body, Link, Resource, Response, primitives::SELF_RELATION};
use serde_json::{Map, Value as JsonValue, json};

/// Key under which collection members are embedded.
pub const ITEMS_KEY: &str = "items";

/// Render a full response.
#[must_use]
pub fn render_response(response: &Response) -> JsonValue {
    let mut out = Map::new();
    out.insert("status".to_string(), json!(response.status.code()));
    if !response.headers.is_empty() {
        out.insert("headers".to_string(), json!(response.headers));
    }
    if let Some(resource) = &response.resource {
        out.insert("body".to_string(), render_resource(resource));
    }
    if let Some(exception) = &response.exception {
        out.insert(
            "error".to_string(),
            json!({ "status": exception.status.code(), "message": exception.message }),
        );
    }
    JsonValue::Object(out)
}

/// Render one resource with its links and embedded resources.
#[must_use]
pub fn render_resource(resource: &Resource) -> JsonValue {
    let mut out = match &resource.body {
        Body::Entity(data) => match data.to_json() {
            JsonValue::Object(map) => map,
            other => {
                let mut map = Map::new();
                map.insert("value".to_string(), other);
                map
            }
        },
        Body::Collection(_) | Body::Empty => Map::new(),
    };

    if !resource.links.is_empty() {
        let links = group(resource.links.iter().map(|l| (link_key(l), render_link(l))));
        out.insert("_links".to_string(), links);
    }

    let mut embedded = Map::new();
    if let Some(members) = resource.members() {
        embedded.insert(
            ITEMS_KEY.to_string(),
            JsonValue::Array(members.iter().map(render_resource).collect()),
        );
    }
    if !resource.embedded.is_empty() {
        let grouped = group(
            resource
                .embedded
                .iter()
                .map(|e| (link_key(&e.link), render_resource(&e.resource))),
        );
        if let JsonValue::Object(grouped) = grouped {
            embedded.extend(grouped);
        }
    }
    if !embedded.is_empty() {
        out.insert("_embedded".to_string(), JsonValue::Object(embedded));
    }
    JsonValue::Object(out)
}

fn link_key(link: &Link) -> String {
    if link.transition.is_none() && link.rel == SELF_RELATION {
        return SELF_RELATION.to_string();
    }
    link.link_id.clone().unwrap_or_else(|| link.title.clone())
}

fn render_link(link: &Link) -> JsonValue {
    let mut out = Map::new();
    out.insert("href".to_string(), json!(link.href));
    out.insert("method".to_string(), json!(link.method.as_str()));
    out.insert("rel".to_string(), json!(link.rel));
    out.insert("title".to_string(), json!(link.title));
    if !link.consumes.is_empty() {
        out.insert("consumes".to_string(), json!(link.consumes));
    }
    if !link.produces.is_empty() {
        out.insert("produces".to_string(), json!(link.produces));
    }
    if let Some(field) = &link.source_field {
        out.insert("field".to_string(), json!(field));
    }
    JsonValue::Object(out)
}

/// Collect `(key, value)` pairs into an object; repeated keys become arrays.
fn group(entries: impl Iterator<Item = (String, JsonValue)>) -> JsonValue {
    let mut out = Map::new();
    for (key, value) in entries {
        match out.get_mut(&key) {
            Some(JsonValue::Array(values)) => values.push(value),
            Some(existing) => {
                let first = existing.take();
                *existing = JsonValue::Array(vec![first, value]);
            }
            None => {
                out.insert(key, value);
            }
        }
    }
    JsonValue::Object(out)
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use hyperstate_core::{Embedded, Entity, Method, StateKey, Status, TransitionKey};
    use std::collections::BTreeMap;

    fn link(title: &str, href: &str, transition: Option<TransitionKey>) -> Link {
        Link {
            transition,
            title: title.to_string(),
            rel: if transition.is_some() { "item" } else { "self" }.to_string(),
            href: href.to_string(),
            method: Method::Get,
            consumes: Vec::new(),
            produces: Vec::new(),
            link_id: None,
            source_field: None,
        }
    }

    #[test]
    fn links_group_by_title() {
        let key = TransitionKey::new(StateKey(0), 0);
        let mut resource = Resource::entity("Customer", Entity::new().with("id", "1"));
        resource.links = vec![
            link("customer", "/customers/1", None),
            link("orders", "/orders?c=1", Some(key)),
            link("orders", "/orders?c=2", Some(key)),
        ];

        let out = render_resource(&resource);
        assert_eq!(out["id"], "1");
        assert_eq!(out["_links"]["self"]["href"], "/customers/1");
        assert_eq!(out["_links"]["orders"].as_array().map(Vec::len), Some(2));
    }

    #[test]
    fn collection_members_and_embedded() {
        let key = TransitionKey::new(StateKey(0), 1);
        let mut resource = Resource::collection(
            "Customer",
            vec![Resource::entity("Customer", Entity::new().with("id", "1"))],
        );
        resource.embedded.push(Embedded {
            link: link("summary", "/summary", Some(key)),
            resource: Resource::entity("Summary", Entity::new().with("count", 1)),
        });

        let out = render_resource(&resource);
        assert_eq!(out["_embedded"]["items"][0]["id"], "1");
        assert_eq!(out["_embedded"]["summary"]["count"], 1);
    }

    #[test]
    fn response_carries_error() {
        let response = Response {
            status: Status::NOT_FOUND,
            resource: None,
            headers: BTreeMap::new(),
            exception: Some(hyperstate_core::InteractionException::not_found("gone")),
        };
        let out = render_response(&response);
        assert_eq!(out["status"], 404);
        assert_eq!(out["error"]["message"], "gone");
        assert!(out.get("body").is_none());
    }
}
