//! # Interaction Context
//!
//! The per-request execution record threaded through commands.
//!
//! Inputs (path/query parameters, request headers, current state, metadata)
//! are fixed at construction. Outputs (resource, target state, exception,
//! attributes, response headers, outbound query parameters) are written by
//! commands and read back by the engine.
//!
//! Sub-resources are never resolved by mutating a context in place: the
//! engine calls [`InteractionContext::derive`] to obtain a fresh context for
//! the target state that carries attributes, resource and exception forward.

use crate::graph::ResourceState;
use crate::metadata::Metadata;
use crate::primitives::DEFAULT_ID_PATH_ELEMENT;
use crate::resource::Resource;
use crate::{ExecutionType, HyperstateError, InteractionException, Parameters, StateKey};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;

/// Request header carrying the language preference list.
pub const ACCEPT_LANGUAGE: &str = "accept-language";

/// Request header carrying the optimistic-concurrency precondition.
pub const IF_MATCH: &str = "if-match";

/// Per-request execution record.
#[derive(Debug, Clone)]
pub struct InteractionContext<'g> {
    current_key: StateKey,
    current_state: &'g ResourceState,
    metadata: &'g Metadata,
    path_parameters: Parameters,
    query_parameters: Parameters,
    request_headers: BTreeMap<String, String>,

    resource: Option<Resource>,
    target_state: Option<StateKey>,
    executed: Option<ExecutionType>,
    exception: Option<InteractionException>,
    attributes: BTreeMap<String, JsonValue>,
    response_headers: BTreeMap<String, String>,
    outbound_query_parameters: BTreeMap<String, String>,
    accept_language: Vec<String>,
    precondition_if_match: Option<String>,
}

impl<'g> InteractionContext<'g> {
    /// Create the context for an inbound request.
    #[must_use]
    pub fn new(
        current_key: StateKey,
        current_state: &'g ResourceState,
        metadata: &'g Metadata,
        path_parameters: Parameters,
        query_parameters: Parameters,
    ) -> Self {
        Self {
            current_key,
            current_state,
            metadata,
            path_parameters,
            query_parameters,
            request_headers: BTreeMap::new(),
            resource: None,
            target_state: None,
            executed: None,
            exception: None,
            attributes: BTreeMap::new(),
            response_headers: BTreeMap::new(),
            outbound_query_parameters: BTreeMap::new(),
            accept_language: Vec::new(),
            precondition_if_match: None,
        }
    }

    /// Attach request headers; Accept-Language and If-Match are parsed here.
    #[must_use]
    pub fn with_headers<K, V, I>(mut self, headers: I) -> Self
    where
        K: AsRef<str>,
        V: Into<String>,
        I: IntoIterator<Item = (K, V)>,
    {
        for (name, value) in headers {
            self.request_headers
                .insert(name.as_ref().to_ascii_lowercase(), value.into());
        }
        if let Some(raw) = self.request_headers.get(ACCEPT_LANGUAGE) {
            self.accept_language = parse_accept_language(raw);
        }
        self.precondition_if_match = self.request_headers.get(IF_MATCH).cloned();
        self
    }

    /// Derive a context for resolving a sub-resource of this request.
    ///
    /// Path and query parameters and the current state are replaced.
    /// Attributes, resource, exception, request headers and language
    /// preferences are carried forward; response-side output starts empty.
    #[must_use]
    pub fn derive(
        &self,
        target_key: StateKey,
        target_state: &'g ResourceState,
        path_parameters: Parameters,
        query_parameters: Parameters,
    ) -> Self {
        Self {
            current_key: target_key,
            current_state: target_state,
            metadata: self.metadata,
            path_parameters,
            query_parameters,
            request_headers: self.request_headers.clone(),
            resource: self.resource.clone(),
            target_state: None,
            executed: None,
            exception: self.exception.clone(),
            attributes: self.attributes.clone(),
            response_headers: BTreeMap::new(),
            outbound_query_parameters: BTreeMap::new(),
            accept_language: self.accept_language.clone(),
            precondition_if_match: self.precondition_if_match.clone(),
        }
    }

    // =========================================================================
    // INPUTS
    // =========================================================================

    /// Handle of the state being interacted with.
    #[must_use]
    pub fn current_key(&self) -> StateKey {
        self.current_key
    }

    /// The state being interacted with.
    #[must_use]
    pub fn current_state(&self) -> &'g ResourceState {
        self.current_state
    }

    /// Entity metadata registry.
    #[must_use]
    pub fn metadata(&self) -> &'g Metadata {
        self.metadata
    }

    /// Path parameters bound for this request.
    #[must_use]
    pub fn path_parameters(&self) -> &Parameters {
        &self.path_parameters
    }

    /// Query parameters of this request.
    #[must_use]
    pub fn query_parameters(&self) -> &Parameters {
        &self.query_parameters
    }

    /// A request header (case-insensitive name).
    #[must_use]
    pub fn request_header(&self, name: &str) -> Option<&str> {
        self.request_headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// Parsed language preferences, most preferred first.
    #[must_use]
    pub fn accept_language(&self) -> &[String] {
        &self.accept_language
    }

    /// The If-Match precondition, if the request carried one.
    #[must_use]
    pub fn precondition_if_match(&self) -> Option<&str> {
        self.precondition_if_match.as_deref()
    }

    /// Resolve the primary identifier of the request.
    ///
    /// 1. the `id` path parameter;
    /// 2. the path parameter named by the state's id parameter;
    /// 3. the single id field declared in the entity metadata.
    ///
    /// Entities declaring several id fields fail with `MultipleIdFields`.
    pub fn id(&self) -> Result<Option<String>, HyperstateError> {
        if let Some(id) = self.path_parameters.first(DEFAULT_ID_PATH_ELEMENT) {
            return Ok(Some(id.to_string()));
        }

        if let Some(name) = self.current_state.path_id_parameter() {
            return Ok(self.path_parameters.first(name).map(str::to_string));
        }

        let entity = &self.current_state.id().entity;
        let Some(entity_metadata) = self.metadata.entity(entity) else {
            tracing::debug!(entity = %entity, "no metadata registered; request has no id");
            return Ok(None);
        };
        let field = entity_metadata.single_id_field()?;
        Ok(self.path_parameters.first(field).map(str::to_string))
    }

    // =========================================================================
    // OUTPUTS
    // =========================================================================

    /// Resource produced so far.
    #[must_use]
    pub fn resource(&self) -> Option<&Resource> {
        self.resource.as_ref()
    }

    /// Mutable access to the resource produced so far.
    pub fn resource_mut(&mut self) -> Option<&mut Resource> {
        self.resource.as_mut()
    }

    /// Set the resource produced by a command.
    pub fn set_resource(&mut self, resource: Resource) {
        self.resource = Some(resource);
    }

    /// Take the resource out of the context.
    pub fn take_resource(&mut self) -> Option<Resource> {
        self.resource.take()
    }

    /// State selected by a transition command.
    #[must_use]
    pub fn target_state(&self) -> Option<StateKey> {
        self.target_state
    }

    /// Select the state the interaction moved to.
    pub fn set_target_state(&mut self, key: StateKey) {
        self.target_state = Some(key);
    }

    /// Execution type of the last command run against this context.
    #[must_use]
    pub fn executed(&self) -> Option<ExecutionType> {
        self.executed
    }

    /// Record the execution type of a command about to run.
    pub fn record_execution(&mut self, execution_type: ExecutionType) {
        self.executed = Some(execution_type);
    }

    /// Structured exception raised by a command.
    #[must_use]
    pub fn exception(&self) -> Option<&InteractionException> {
        self.exception.as_ref()
    }

    /// Raise a structured exception.
    pub fn set_exception(&mut self, exception: InteractionException) {
        self.exception = Some(exception);
    }

    /// Per-request scratch attribute.
    #[must_use]
    pub fn attribute(&self, name: &str) -> Option<&JsonValue> {
        self.attributes.get(name)
    }

    /// Store a per-request scratch attribute.
    pub fn set_attribute(&mut self, name: impl Into<String>, value: impl Into<JsonValue>) {
        self.attributes.insert(name.into(), value.into());
    }

    /// Remove a scratch attribute, returning it.
    pub fn remove_attribute(&mut self, name: &str) -> Option<JsonValue> {
        self.attributes.remove(name)
    }

    /// Response headers set by commands.
    #[must_use]
    pub fn response_headers(&self) -> &BTreeMap<String, String> {
        &self.response_headers
    }

    /// Set a response header.
    pub fn set_response_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.response_headers.insert(name.into(), value.into());
    }

    /// Query parameters to propagate onto generated links.
    #[must_use]
    pub fn outbound_query_parameters(&self) -> &BTreeMap<String, String> {
        &self.outbound_query_parameters
    }

    /// Propagate a query parameter onto every link generated for this response.
    pub fn set_outbound_query_parameter(
        &mut self,
        name: impl Into<String>,
        value: impl Into<String>,
    ) {
        self.outbound_query_parameters
            .insert(name.into(), value.into());
    }
}

// =============================================================================
// ACCEPT-LANGUAGE
// =============================================================================

/// Parse an Accept-Language header into tags ordered by preference.
///
/// Quality values are compared as integer thousandths. Entries with `q=0`,
/// an unparseable quality or an empty tag are dropped; equal qualities keep
/// header order.
#[must_use]
pub fn parse_accept_language(raw: &str) -> Vec<String> {
    let mut weighted: Vec<(u16, String)> = Vec::new();
    for entry in raw.split(',') {
        let mut pieces = entry.split(';');
        let tag = pieces.next().unwrap_or_default().trim();
        if tag.is_empty() {
            continue;
        }
        let mut quality = Some(1000u16);
        for param in pieces {
            if let Some((key, value)) = param.split_once('=') {
                if key.trim().eq_ignore_ascii_case("q") {
                    quality = parse_quality(value);
                }
            }
        }
        match quality {
            Some(q) if q > 0 => weighted.push((q, tag.to_string())),
            _ => {}
        }
    }
    weighted.sort_by(|a, b| b.0.cmp(&a.0));
    weighted.into_iter().map(|(_, tag)| tag).collect()
}

/// Parse a quality value (`0`, `0.8`, `1.000`) into thousandths.
fn parse_quality(raw: &str) -> Option<u16> {
    let raw = raw.trim();
    let (whole, fraction) = raw.split_once('.').unwrap_or((raw, ""));
    if fraction.len() > 3 || !fraction.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    match whole {
        "1" => fraction.bytes().all(|b| b == b'0').then_some(1000),
        "0" => {
            let mut value = 0u16;
            for i in 0..3 {
                let digit = fraction.as_bytes().get(i).map_or(0, |b| u16::from(b - b'0'));
                value = value * 10 + digit;
            }
            Some(value)
        }
        _ => None,
    }
}

// =============================================================================
// TESTS
// =============================================================================
