//! # Core Type Definitions
//!
//! This module contains the small value types shared by every layer of the engine:
//! - State and transition handles (`StateId`, `StateKey`, `TransitionKey`)
//! - Request vocabulary (`Method`, `Parameters`, `Status`)
//! - Transition flags (`TransitionFlags`)
//! - Command results (`Outcome`, `ExecutionType`, `InteractionException`)
//! - Error types (`HyperstateError`)
//!
//! ## Determinism Guarantees
//!
//! All ordered collections in this module are `BTreeMap`-backed, and every
//! identifier implements `Ord` so it can key deterministic maps.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::ops::{BitOr, BitOrAssign};
use std::str::FromStr;
use thiserror::Error;

// =============================================================================
// STATE & TRANSITION IDENTIFIERS
// =============================================================================

/// Logical identity of a resource state: the pair (entity name, state name).
///
/// Two independently constructed descriptors of the same logical state
/// carry equal `StateId`s and therefore compare equal.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StateId {
    /// The entity the state represents (e.g. `Customer`).
    pub entity: String,
    /// The state name, unique per entity (e.g. `customers`).
    pub name: String,
}

impl StateId {
    /// Create a new state identity.
    #[must_use]
    pub fn new(entity: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for StateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.entity, self.name)
    }
}

/// Index of a concrete state inside a built `ResourceGraph`.
///
/// Keys are handed out by the graph builder in registration order and are
/// only meaningful for the graph that issued them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StateKey(pub usize);

/// Position of a transition: its source state plus declaration index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TransitionKey {
    /// The state the transition leaves from.
    pub source: StateKey,
    /// Declaration index among the source's outbound transitions.
    pub index: usize,
}

impl TransitionKey {
    /// Create a new transition key.
    #[must_use]
    pub const fn new(source: StateKey, index: usize) -> Self {
        Self { source, index }
    }
}

// =============================================================================
// HTTP METHOD
// =============================================================================

/// The request methods a transition can be bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    Get,
    Head,
    Post,
    Put,
    Patch,
    Delete,
    Options,
}

impl Method {
    /// Methods that only read state.
    #[must_use]
    pub const fn is_safe(self) -> bool {
        matches!(self, Self::Get | Self::Head | Self::Options)
    }

    /// Upper-case wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Head => "HEAD",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
            Self::Options => "OPTIONS",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = HyperstateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "GET" => Ok(Self::Get),
            "HEAD" => Ok(Self::Head),
            "POST" => Ok(Self::Post),
            "PUT" => Ok(Self::Put),
            "PATCH" => Ok(Self::Patch),
            "DELETE" => Ok(Self::Delete),
            "OPTIONS" => Ok(Self::Options),
            _ => Err(HyperstateError::Configuration(format!(
                "unknown method '{}'",
                s
            ))),
        }
    }
}

// =============================================================================
// TRANSITION FLAGS
// =============================================================================

/// Combinable transition flags.
///
/// Stored as a bit set so flags can be OR-ed together at build time.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct TransitionFlags(u8);

impl TransitionFlags {
    /// A plain transition.
    pub const NONE: Self = Self(0);
    /// One resolved transition per member of the source collection.
    pub const FOR_EACH: Self = Self(1);
    /// Followed immediately after the source, without a new request.
    pub const AUTO: Self = Self(1 << 1);
    /// Gated by a guard expression.
    pub const EXPRESSION: Self = Self(1 << 2);
    /// Target is resolved and embedded, not only linked.
    pub const EMBEDDED: Self = Self(1 << 3);

    /// Raw bit value.
    #[must_use]
    pub const fn bits(self) -> u8 {
        self.0
    }

    /// True when every bit of `other` is set in `self`.
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// True when no flag is set.
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Set every bit of `other`.
    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }

    /// Parse a list of flag names (`FOR_EACH`, `AUTO`, `EXPRESSION`, `EMBEDDED`, `NONE`).
    pub fn from_names<S: AsRef<str>>(names: &[S]) -> Result<Self, HyperstateError> {
        let mut flags = Self::NONE;
        for name in names {
            flags.insert(name.as_ref().parse()?);
        }
        Ok(flags)
    }
}

impl BitOr for TransitionFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for TransitionFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl FromStr for TransitionFlags {
    type Err = HyperstateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().replace('-', "_").as_str() {
            "NONE" => Ok(Self::NONE),
            "FOR_EACH" => Ok(Self::FOR_EACH),
            "AUTO" => Ok(Self::AUTO),
            "EXPRESSION" => Ok(Self::EXPRESSION),
            "EMBEDDED" => Ok(Self::EMBEDDED),
            _ => Err(HyperstateError::Configuration(format!(
                "unknown transition flag '{}'",
                s
            ))),
        }
    }
}

// =============================================================================
// STATUS
// =============================================================================

/// HTTP-like status code attached to resolutions and exceptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Status(pub u16);

impl Status {
    pub const OK: Self = Self(200);
    pub const CREATED: Self = Self(201);
    pub const NO_CONTENT: Self = Self(204);
    pub const BAD_REQUEST: Self = Self(400);
    pub const NOT_FOUND: Self = Self(404);
    pub const METHOD_NOT_ALLOWED: Self = Self(405);
    pub const PRECONDITION_FAILED: Self = Self(412);
    pub const INTERNAL_SERVER_ERROR: Self = Self(500);

    /// Raw numeric code.
    #[must_use]
    pub const fn code(self) -> u16 {
        self.0
    }

    /// True for 2xx codes.
    #[must_use]
    pub const fn is_success(self) -> bool {
        self.0 >= 200 && self.0 < 300
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// COMMAND RESULTS
// =============================================================================

/// Result of executing a command or workflow.
///
/// This is the single internal channel for business outcomes. The reason
/// strings are diagnostic; the transport-facing status comes from the
/// context's `InteractionException` when one was raised.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The command completed.
    Success,
    /// The command failed.
    Failure(String),
    /// The request was rejected as malformed.
    InvalidRequest(String),
}

impl Outcome {
    /// Shorthand for a failure with a reason.
    #[must_use]
    pub fn failure(reason: impl Into<String>) -> Self {
        Self::Failure(reason.into())
    }

    /// Shorthand for an invalid request with a reason.
    #[must_use]
    pub fn invalid(reason: impl Into<String>) -> Self {
        Self::InvalidRequest(reason.into())
    }

    /// True for `Success`.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }

    /// The failure reason, if any.
    #[must_use]
    pub fn reason(&self) -> Option<&str> {
        match self {
            Self::Success => None,
            Self::Failure(r) | Self::InvalidRequest(r) => Some(r),
        }
    }
}

/// What kind of work a command performed.
///
/// `Interaction` commands only compute data for the current state;
/// `Transition` commands moved the application to another state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum ExecutionType {
    #[default]
    Interaction,
    Transition,
}

/// Structured exception raised by a command to communicate a specific
/// HTTP-like outcome (e.g. not found) to the transport layer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{status}: {message}")]
pub struct InteractionException {
    /// Status to report.
    pub status: Status,
    /// Human-readable message.
    pub message: String,
}

impl InteractionException {
    /// Create a new exception.
    #[must_use]
    pub fn new(status: Status, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    /// A 404 exception.
    #[must_use]
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(Status::NOT_FOUND, message)
    }
}

// =============================================================================
// PARAMETERS
// =============================================================================

/// Multi-valued parameter map (path or query parameters).
///
/// Uses BTreeMap so iteration (and therefore generated hrefs) is deterministic.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Parameters(BTreeMap<String, Vec<String>>);

impl Parameters {
    /// Create an empty parameter map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace all values of `name` with a single value.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.insert(name.into(), vec![value.into()]);
    }

    /// Append a value to `name`.
    pub fn add(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.entry(name.into()).or_default().push(value.into());
    }

    /// First value of `name`.
    #[must_use]
    pub fn first(&self, name: &str) -> Option<&str> {
        self.0.get(name)?.first().map(String::as_str)
    }

    /// All values of `name`.
    #[must_use]
    pub fn get_all(&self, name: &str) -> &[String] {
        self.0.get(name).map_or(&[], Vec::as_slice)
    }

    /// True if `name` has at least one value.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.0.get(name).is_some_and(|values| !values.is_empty())
    }

    /// Remove every value of `name`.
    pub fn remove(&mut self, name: &str) {
        self.0.remove(name);
    }

    /// Iterate names with their first value.
    pub fn iter_first(&self) -> impl Iterator<Item = (&str, &str)> + '_ {
        self.0
            .iter()
            .filter_map(|(k, v)| v.first().map(|first| (k.as_str(), first.as_str())))
    }

    /// Number of distinct names.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True if no names are present.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Collapse to a single-valued map (first value wins).
    #[must_use]
    pub fn to_single_map(&self) -> BTreeMap<String, String> {
        self.iter_first()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Parameters {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut params = Self::new();
        for (k, v) in iter {
            params.add(k, v);
        }
        params
    }
}

// =============================================================================
// ERROR TYPES
// =============================================================================

/// Errors that can occur while building or running the engine.
///
/// - Construction problems (unresolved lazy states, duplicates) surface at build time
/// - Business failures never appear here; they travel as `Outcome`
/// - Expression problems are logged and degrade to `false`, never returned to callers
#[derive(Debug, Error)]
pub enum HyperstateError {
    /// A lazy state reference named a state that was never registered.
    #[error("Unresolved lazy state: {0}")]
    UnresolvedState(String),

    /// A state handle or name does not exist in the graph.
    #[error("State not found: {0}")]
    StateNotFound(String),

    /// Two states were registered with the same name.
    #[error("Duplicate state: {0}")]
    DuplicateState(StateId),

    /// Entity metadata declares a composite id, which is not supported.
    #[error("Entity '{entity}' declares {count} id fields; only single-field ids are supported")]
    MultipleIdFields { entity: String, count: usize },

    /// Entity metadata declares no id field.
    #[error("Entity '{0}' declares no id field")]
    MissingIdField(String),

    /// No metadata was registered for an entity.
    #[error("No metadata for entity '{0}'")]
    UnknownEntity(String),

    /// A workflow was executed without any command.
    #[error("Workflow has no commands")]
    EmptyWorkflow,

    /// An expression could not be parsed.
    #[error("Invalid expression '{expression}': {reason}")]
    InvalidExpression { expression: String, reason: String },

    /// The implementation does not support the requested capability.
    #[error("Unsupported operation: {0}")]
    Unsupported(&'static str),

    /// Bootstrap configuration is inconsistent.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A serialization or deserialization error occurred.
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    IoError(String),
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_id_equality_is_by_pair() {
        assert_eq!(StateId::new("Customer", "customer"), StateId::new("Customer", "customer"));
        assert_ne!(StateId::new("Customer", "customer"), StateId::new("Order", "customer"));
    }

    #[test]
    fn flags_combine_and_contain() {
        let flags = TransitionFlags::FOR_EACH | TransitionFlags::EMBEDDED;
        assert!(flags.contains(TransitionFlags::FOR_EACH));
        assert!(flags.contains(TransitionFlags::EMBEDDED));
        assert!(!flags.contains(TransitionFlags::AUTO));
        assert!(TransitionFlags::NONE.is_empty());
    }

    #[test]
    fn flags_parse_from_names() {
        let flags = TransitionFlags::from_names(&["for_each", "AUTO"]).expect("parse");
        assert_eq!(flags, TransitionFlags::FOR_EACH | TransitionFlags::AUTO);
        assert!(TransitionFlags::from_names(&["SOMETIMES"]).is_err());
    }

    #[test]
    fn method_round_trips_through_display() {
        for method in [Method::Get, Method::Post, Method::Delete, Method::Patch] {
            let parsed: Method = method.to_string().parse().expect("parse");
            assert_eq!(parsed, method);
        }
        assert!("FETCH".parse::<Method>().is_err());
        assert!(Method::Get.is_safe());
        assert!(!Method::Post.is_safe());
    }

    #[test]
    fn parameters_keep_first_value() {
        let mut params = Parameters::new();
        params.add("id", "1");
        params.add("id", "2");
        assert_eq!(params.first("id"), Some("1"));
        assert_eq!(params.get_all("id").len(), 2);

        params.insert("id", "9");
        assert_eq!(params.get_all("id"), ["9".to_string()]);
        assert!(params.first("missing").is_none());
    }

    #[test]
    fn outcome_reason() {
        assert!(Outcome::Success.is_success());
        assert_eq!(Outcome::failure("boom").reason(), Some("boom"));
        assert_eq!(Outcome::invalid("bad").reason(), Some("bad"));
    }

    #[test]
    fn status_classification() {
        assert!(Status::OK.is_success());
        assert!(Status::CREATED.is_success());
        assert!(!Status::NOT_FOUND.is_success());
        assert_eq!(InteractionException::not_found("x").status, Status::NOT_FOUND);
    }
}
