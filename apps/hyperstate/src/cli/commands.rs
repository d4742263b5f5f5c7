//! # CLI Command Implementations
//!
//! Each command returns the text to print so it can be tested without
//! capturing stdout.

use crate::config::GraphConfig;
use crate::render::render_response;
use hyperstate_core::{
    HyperstateError, Method, Request, ResourceGraph, ResourceStateProvider, StateKind,
};
use std::path::Path;

/// Options of the `request` command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestOptions {
    pub method: String,
    pub path: String,
    /// `name=value` pairs.
    pub query: Vec<String>,
    /// `name=value` pairs.
    pub headers: Vec<String>,
    pub inject_links: bool,
    pub embed_resources: bool,
}

/// Split a `name=value` argument.
pub fn parse_pair(raw: &str) -> Result<(String, String), HyperstateError> {
    match raw.split_once('=') {
        Some((name, value)) if !name.trim().is_empty() => {
            Ok((name.trim().to_string(), value.to_string()))
        }
        _ => Err(HyperstateError::Configuration(format!(
            "expected name=value, got '{}'",
            raw
        ))),
    }
}

fn pretty(value: &serde_json::Value) -> Result<String, HyperstateError> {
    serde_json::to_string_pretty(value)
        .map_err(|e| HyperstateError::SerializationError(e.to_string()))
}

fn kind_name(kind: StateKind) -> &'static str {
    match kind {
        StateKind::Item => "item",
        StateKind::Collection => "collection",
    }
}

fn methods(graph: &ResourceGraph, key: hyperstate_core::StateKey) -> Vec<&'static str> {
    graph
        .allowed_methods(key)
        .into_iter()
        .map(Method::as_str)
        .collect()
}

// =============================================================================
// VALIDATE COMMAND
// =============================================================================

/// Load and build the graph, reporting its size.
pub fn cmd_validate(path: &Path, json_mode: bool) -> Result<String, HyperstateError> {
    let config = GraphConfig::load(path)?;
    let bootstrap = config.bootstrap()?;
    let graph = bootstrap.engine.graph();
    let initial = graph
        .initial_state()
        .and_then(|k| graph.state(k))
        .map(|s| s.name().to_string());

    if json_mode {
        return pretty(&serde_json::json!({
            "graph": path.to_string_lossy(),
            "valid": true,
            "states": graph.state_count(),
            "transitions": graph.transition_count(),
            "entities": bootstrap.engine.metadata().len(),
            "initial_state": initial,
        }));
    }

    let mut out = String::new();
    out.push_str("Hyperstate Graph\n");
    out.push_str("================\n");
    out.push_str(&format!("Graph:       {}\n", path.display()));
    out.push_str(&format!("States:      {}\n", graph.state_count()));
    out.push_str(&format!("Transitions: {}\n", graph.transition_count()));
    out.push_str(&format!("Entities:    {}\n", bootstrap.engine.metadata().len()));
    out.push_str(&format!(
        "Initial:     {}",
        initial.as_deref().unwrap_or("(none)")
    ));
    Ok(out)
}

// =============================================================================
// STATES COMMAND
// =============================================================================

/// List every state with its path and allowed methods.
pub fn cmd_states(path: &Path, json_mode: bool, verbose: bool) -> Result<String, HyperstateError> {
    let config = GraphConfig::load(path)?;
    let graph = config.graph()?;

    if json_mode {
        let states: Vec<_> = graph
            .states()
            .map(|(key, state)| {
                serde_json::json!({
                    "name": state.name(),
                    "entity": state.entity_name(),
                    "kind": kind_name(state.kind()),
                    "path": state.path(),
                    "methods": methods(&graph, key),
                    "initial": state.is_initial(),
                    "transitions": state.transitions().len(),
                })
            })
            .collect();
        return pretty(&serde_json::Value::Array(states));
    }

    let mut out = String::new();
    for (key, state) in graph.states() {
        out.push_str(&format!(
            "{:<24} {:<10} {:<32} {}\n",
            state.name(),
            kind_name(state.kind()),
            state.path(),
            methods(&graph, key).join(", ")
        ));
        if verbose {
            for transition in state.transitions() {
                let target = graph
                    .resolve_state(&transition.target)
                    .map(|s| s.name().to_string())?;
                out.push_str(&format!(
                    "    {} -> {} [flags={:#06b}]\n",
                    transition.method,
                    target,
                    transition.flags.bits()
                ));
            }
        }
    }
    Ok(out.trim_end().to_string())
}

// =============================================================================
// REQUEST COMMAND
// =============================================================================

/// Resolve one request and render the response as JSON.
pub fn cmd_request(path: &Path, options: &RequestOptions) -> Result<String, HyperstateError> {
    let mut config = GraphConfig::load(path)?;
    config.engine.inject_links &= options.inject_links;
    config.engine.embed_resources &= options.embed_resources;
    let bootstrap = config.bootstrap()?;

    let method: Method = options.method.parse()?;
    let mut request = Request::new(method, &options.path);
    for raw in &options.query {
        let (name, value) = parse_pair(raw)?;
        request = request.with_query(name, value);
    }
    for raw in &options.headers {
        let (name, value) = parse_pair(raw)?;
        request = request.with_header(name, value);
    }

    tracing::info!(method = %request.method, path = %request.path, "resolving request");
    let response = bootstrap.engine.process(&request);
    tracing::info!(status = %response.status, "request resolved");
    pretty(&render_response(&response))
}

// =============================================================================
// TESTS
// =============================================================================
