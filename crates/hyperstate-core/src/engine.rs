//! # Interaction Engine
//!
//! Entry point for one inbound request.
//!
//! ## Flow
//!
//! 1. Route `(method, path)` to a state (404 / 405 otherwise).
//! 2. Run the state's actions as an abort-on-error workflow.
//! 3. Move to the command-selected state for TRANSITION commands.
//! 4. Follow AUTO transitions (first passing guard), bounded by depth.
//! 5. Inject links, embed EMBEDDED transitions, apply the transformer.
//! 6. Cache successful GETs; clear the cache after successful unsafe methods.
//!
//! The engine is also the [`TransitionResolver`] used by probes and by the
//! sequential handler for embedded resources.

use crate::cache::{ResponseCache, TimedCache};
use crate::command::{AbortOnErrorWorkflow, Command, CommandRegistry};
use crate::context::InteractionContext;
use crate::graph::{ResourceGraph, ResourceState, ResourceStateProvider};
use crate::handler::{
    ResolutionChain, ResolutionConfig, SequentialResourceRequestHandler, StateResolution,
    TransitionResolver,
};
use crate::machine::ResourceStateMachine;
use crate::metadata::Metadata;
use crate::primitives::{MAX_EMBED_DEPTH, MAX_EMBED_DEPTH_CEILING};
use crate::resource::{Embedded, Resource};
use crate::template;
use crate::{
    ExecutionType, HyperstateError, InteractionException, Method, Outcome, Parameters, StateKey,
    Status, TransitionFlags,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

/// Response header naming the resource an AUTO transition led to.
pub const LOCATION: &str = "Location";

/// Response header listing allowed methods on a 405.
pub const ALLOW: &str = "Allow";

// =============================================================================
// CONFIGURATION
// =============================================================================

/// Engine settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Prefix for generated hrefs.
    pub base_uri: String,
    /// Maximum embedding / AUTO depth (clamped to `MAX_EMBED_DEPTH_CEILING`).
    pub max_embed_depth: usize,
    /// Render links on responses.
    pub inject_links: bool,
    /// Resolve EMBEDDED transitions.
    pub embed_resources: bool,
    /// Memoize GET responses.
    pub cache_enabled: bool,
    /// Maximum age of cached responses; `None` keeps them until invalidated.
    pub cache_max_age_seconds: Option<u64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            base_uri: String::new(),
            max_embed_depth: MAX_EMBED_DEPTH,
            inject_links: true,
            embed_resources: true,
            cache_enabled: false,
            cache_max_age_seconds: None,
        }
    }
}

impl EngineConfig {
    /// Configured depth, clamped to the hard ceiling.
    #[must_use]
    pub fn effective_embed_depth(&self) -> usize {
        self.max_embed_depth.min(MAX_EMBED_DEPTH_CEILING)
    }

    fn resolution_config(&self) -> ResolutionConfig {
        ResolutionConfig {
            inject_links: self.inject_links,
            embed_resources: self.embed_resources,
            primary: None,
        }
    }
}

// =============================================================================
// REQUEST / RESPONSE
// =============================================================================

/// An inbound request as seen by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub method: Method,
    pub path: String,
    pub query: Parameters,
    pub headers: BTreeMap<String, String>,
}

impl Request {
    /// Create a request. A `?a=b&c=d` suffix on `path` becomes query
    /// parameters, percent-decoded.
    #[must_use]
    pub fn new(method: Method, path: &str) -> Self {
        let (path, raw_query) = path.split_once('?').unwrap_or((path, ""));
        let mut query = Parameters::new();
        for pair in raw_query.split('&').filter(|p| !p.is_empty()) {
            let (name, value) = pair.split_once('=').unwrap_or((pair, ""));
            query.add(template::decode(name), template::decode(value));
        }
        Self {
            method,
            path: path.to_string(),
            query,
            headers: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn get(path: &str) -> Self {
        Self::new(Method::Get, path)
    }

    #[must_use]
    pub fn with_query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.add(name, value);
        self
    }

    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Cache key: `METHOD path?query` with query parameters in name order.
    #[must_use]
    pub fn cache_key(&self) -> String {
        let mut key = format!("{} {}", self.method, self.path);
        let mut separator = '?';
        for (name, value) in self.query.iter_first() {
            key.push(separator);
            key.push_str(&template::encode_query_component(name));
            key.push('=');
            key.push_str(&template::encode_query_component(value));
            separator = '&';
        }
        key
    }
}

/// What the engine hands back to the transport layer.
#[derive(Debug, Clone)]
pub struct Response {
    pub status: Status,
    pub resource: Option<Resource>,
    pub headers: BTreeMap<String, String>,
    pub exception: Option<InteractionException>,
}

impl Response {
    /// A failed response carrying `exception`.
    #[must_use]
    pub fn from_exception(exception: InteractionException) -> Self {
        Self {
            status: exception.status,
            resource: None,
            headers: BTreeMap::new(),
            exception: Some(exception),
        }
    }

    fn with_headers(mut self, headers: BTreeMap<String, String>) -> Self {
        self.headers.extend(headers);
        self
    }
}

/// Post-processing applied to the final resource of a response.
pub trait Transformer: Send + Sync {
    fn transform(&self, state: &ResourceState, resource: Resource) -> Resource;
}

// =============================================================================
// ENGINE
// =============================================================================

/// Resolves requests against a frozen graph.
pub struct InteractionEngine {
    graph: Arc<ResourceGraph>,
    metadata: Arc<Metadata>,
    registry: CommandRegistry,
    config: EngineConfig,
    cache: Option<Arc<dyn ResponseCache<String, Response>>>,
    transformer: Option<Arc<dyn Transformer>>,
}

impl fmt::Debug for InteractionEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InteractionEngine")
            .field("states", &self.graph.state_count())
            .field("registry", &self.registry)
            .field("config", &self.config)
            .field("cache", &self.cache.is_some())
            .field("transformer", &self.transformer.is_some())
            .finish()
    }
}

impl InteractionEngine {
    /// Create an engine. Every action named in the graph must be registered.
    pub fn new(
        graph: Arc<ResourceGraph>,
        metadata: Arc<Metadata>,
        registry: CommandRegistry,
    ) -> Result<Self, HyperstateError> {
        for (_, state) in graph.states() {
            for action in state.actions() {
                if !registry.contains(&action.name) {
                    return Err(HyperstateError::Configuration(format!(
                        "state '{}' binds unknown command '{}'",
                        state.id(),
                        action.name
                    )));
                }
            }
        }
        Ok(Self {
            graph,
            metadata,
            registry,
            config: EngineConfig::default(),
            cache: None,
            transformer: None,
        })
    }

    /// Apply settings. Enabling the cache without an explicit one installs a
    /// [`TimedCache`].
    #[must_use]
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        if config.cache_enabled && self.cache.is_none() {
            self.cache = Some(Arc::new(TimedCache::new()));
        }
        self.config = config;
        self
    }

    #[must_use]
    pub fn with_cache(mut self, cache: Arc<dyn ResponseCache<String, Response>>) -> Self {
        self.cache = Some(cache);
        self
    }

    #[must_use]
    pub fn with_transformer(mut self, transformer: Arc<dyn Transformer>) -> Self {
        self.transformer = Some(transformer);
        self
    }

    #[must_use]
    pub fn graph(&self) -> &ResourceGraph {
        &self.graph
    }

    #[must_use]
    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Resolve one request.
    pub fn process(&self, request: &Request) -> Response {
        let cache_key = request.cache_key();
        if request.method == Method::Get {
            if let Some(hit) = self.cache.as_ref().and_then(|c| c.get(&cache_key)) {
                tracing::debug!(key = %cache_key, "cache hit");
                return hit;
            }
        }

        let response = self.dispatch(request);

        if let Some(cache) = &self.cache {
            if response.status.is_success() {
                if request.method == Method::Get {
                    self.store(cache.as_ref(), cache_key, response.clone());
                } else if !request.method.is_safe() {
                    tracing::debug!(method = %request.method, "cache cleared");
                    cache.remove_all();
                }
            }
        }
        response
    }

    fn store(&self, cache: &dyn ResponseCache<String, Response>, key: String, response: Response) {
        let Some(max_age) = self.config.cache_max_age_seconds else {
            cache.put(key, response);
            return;
        };
        match cache.put_with_max_age(key.clone(), response.clone(), max_age) {
            Ok(()) => {}
            Err(HyperstateError::Unsupported(_)) => {
                tracing::debug!(key = %key, "cache has no expiry; storing without max age");
                cache.put(key, response);
            }
            Err(e) => tracing::warn!(error = %e, "response not cached"),
        }
    }

    fn dispatch(&self, request: &Request) -> Response {
        let graph = self.graph.as_ref();

        let candidates = graph.states_for_path(&request.path);
        if candidates.is_empty() {
            tracing::debug!(path = %request.path, "no state for path");
            return Response::from_exception(InteractionException::not_found(format!(
                "no resource at '{}'",
                request.path
            )));
        }
        let allowed: BTreeSet<Method> = candidates
            .iter()
            .flat_map(|(key, _)| graph.allowed_methods(*key))
            .collect();
        let Some((key, path_parameters)) = candidates
            .into_iter()
            .find(|(key, _)| graph.allowed_methods(*key).contains(&request.method))
        else {
            let allow = allowed.iter().map(|m| m.as_str()).collect::<Vec<_>>().join(", ");
            return Response::from_exception(InteractionException::new(
                Status::METHOD_NOT_ALLOWED,
                format!("{} not allowed on '{}'", request.method, request.path),
            ))
            .with_headers(BTreeMap::from([(ALLOW.to_string(), allow)]));
        };
        let state = match graph.require_state(key) {
            Ok(state) => state,
            Err(e) => return internal_error(&e),
        };

        tracing::debug!(state = %state.id(), method = %request.method, "request routed");

        let mut ctx = InteractionContext::new(
            key,
            state,
            &self.metadata,
            path_parameters,
            request.query.clone(),
        )
        .with_headers(request.headers.iter().map(|(k, v)| (k, v.clone())));

        let execution_type = match self.run_actions(&mut ctx, request.method) {
            Ok(execution_type) => execution_type,
            Err(exception) => {
                return Response::from_exception(exception)
                    .with_headers(ctx.response_headers().clone());
            }
        };

        let mut headers = ctx.response_headers().clone();
        let mut current = key;

        if execution_type == ExecutionType::Transition {
            if let Some(target) = ctx.target_state().filter(|t| *t != key) {
                match graph.require_state(target) {
                    Ok(target_state) => {
                        ctx = advance(&ctx, target, target_state, ctx.query_parameters().clone());
                        current = target;
                    }
                    Err(e) => return internal_error(&e),
                }
            }
        }

        let config = self.config.resolution_config();
        let mut chain = ResolutionChain::new(current, self.config.effective_embed_depth());
        let machine = self.machine(graph);
        let mut followed = false;

        loop {
            let autos = match machine.auto_transitions(current, &ctx, ctx.resource(), Some(self), &chain) {
                Ok(autos) => autos,
                Err(e) => return internal_error(&e),
            };
            let Some(auto) = autos.into_iter().next() else {
                break;
            };
            let Some(next_chain) = chain.enter(auto.target) else {
                tracing::warn!(target = ?auto.target, "AUTO chain stopped at depth or cycle");
                break;
            };
            let target_state = match graph.require_state(auto.target) {
                Ok(state) => state,
                Err(e) => return internal_error(&e),
            };

            let mut next = ctx.derive(auto.target, target_state, auto.path_parameters, Parameters::new());
            for (name, value) in ctx.outbound_query_parameters() {
                next.set_outbound_query_parameter(name.clone(), value.clone());
            }
            if let Err(exception) = self.run_actions(&mut next, Method::Get) {
                return Response::from_exception(exception).with_headers(headers);
            }
            tracing::debug!(target = %target_state.id(), "AUTO transition followed");
            headers.extend(next.response_headers().clone());
            headers.insert(LOCATION.to_string(), auto.link.href);
            ctx = next;
            current = auto.target;
            chain = next_chain;
            followed = true;
        }

        let state = ctx.current_state();
        let mut resource = ctx
            .take_resource()
            .unwrap_or_else(|| Resource::empty(state.entity_name()));
        if config.inject_links {
            self.decorate(graph, &ctx, current, &mut resource, &config, &chain);
        }
        if let Some(transformer) = &self.transformer {
            resource = transformer.transform(state, resource);
        }

        let status = if followed && request.method == Method::Post {
            Status::CREATED
        } else {
            Status::OK
        };
        Response {
            status,
            resource: Some(resource),
            headers,
            exception: None,
        }
    }

    fn machine<'g>(&self, graph: &'g ResourceGraph) -> ResourceStateMachine<'g> {
        ResourceStateMachine::new(graph).with_base_uri(self.config.base_uri.clone())
    }

    /// Run the commands bound to `method` on the context's state.
    fn run_actions(
        &self,
        ctx: &mut InteractionContext<'_>,
        method: Method,
    ) -> Result<ExecutionType, InteractionException> {
        let state = ctx.current_state();
        let mut workflow = AbortOnErrorWorkflow::new();
        for action in state.actions_for(method) {
            let command = self.registry.get(&action.name).map_err(|e| {
                InteractionException::new(Status::INTERNAL_SERVER_ERROR, e.to_string())
            })?;
            workflow.add_command(command);
        }
        if workflow.is_empty() {
            return Err(InteractionException::new(
                Status::METHOD_NOT_ALLOWED,
                format!("no command bound to {} on '{}'", method, state.id()),
            ));
        }

        match workflow.execute(ctx) {
            Outcome::Success => match ctx.exception() {
                Some(exception) => Err(exception.clone()),
                None => Ok(ctx.executed().unwrap_or_default()),
            },
            Outcome::Failure(reason) => {
                tracing::debug!(state = %state.id(), reason = %reason, "workflow failed");
                Err(ctx.exception().cloned().unwrap_or_else(|| {
                    InteractionException::new(Status::INTERNAL_SERVER_ERROR, reason)
                }))
            }
            Outcome::InvalidRequest(reason) => {
                let message = ctx.exception().map_or(reason, |e| e.message.clone());
                Err(InteractionException::new(Status::BAD_REQUEST, message))
            }
        }
    }

    /// Inject links and embedded resources for `state_key` into `resource`.
    fn decorate<'g>(
        &self,
        graph: &'g ResourceGraph,
        ctx: &InteractionContext<'g>,
        state_key: StateKey,
        resource: &mut Resource,
        config: &ResolutionConfig,
        chain: &ResolutionChain,
    ) {
        let Some(state) = graph.state(state_key) else {
            return;
        };
        let machine = self.machine(graph);
        resource.links.push(machine.self_link(state, ctx));

        let resolved = match machine.resolve(state_key, None, ctx, Some(&*resource), Some(self), chain) {
            Ok(resolved) => resolved,
            Err(e) => {
                tracing::warn!(error = %e, state = %state.id(), "links not resolved");
                return;
            }
        };

        let mut to_embed = Vec::new();
        for transition in resolved {
            let Some(definition) = graph.transition(transition.key) else {
                continue;
            };
            if definition.has(TransitionFlags::AUTO) {
                continue;
            }
            if config.embed_resources
                && definition.has(TransitionFlags::EMBEDDED)
                && definition.method == Method::Get
                && transition.member_index.is_none()
            {
                to_embed.push(transition.clone());
            }
            match transition.member_index {
                Some(i) => {
                    if let Some(member) = resource.members_mut().and_then(|m| m.get_mut(i)) {
                        member.links.push(transition.link);
                    }
                }
                None => resource.links.push(transition.link),
            }
        }

        if to_embed.is_empty() {
            return;
        }
        let handler = SequentialResourceRequestHandler::new(self);
        for result in handler.handle(graph, ctx, &to_embed, config, chain) {
            match result.resolution.resource {
                Some(embedded) if result.resolution.status.is_success() => {
                    resource.embedded.push(Embedded {
                        link: result.transition.link,
                        resource: embedded,
                    });
                }
                _ => tracing::debug!(
                    status = %result.resolution.status,
                    href = %result.transition.link.href,
                    "embedded resource omitted"
                ),
            }
        }
    }
}

impl TransitionResolver for InteractionEngine {
    fn resolve<'g>(
        &self,
        graph: &'g ResourceGraph,
        ctx: &mut InteractionContext<'g>,
        config: &ResolutionConfig,
        chain: &ResolutionChain,
    ) -> StateResolution {
        if let Err(exception) = self.run_actions(ctx, Method::Get) {
            return StateResolution::failed(exception.status, Some(exception));
        }
        let key = ctx.current_key();
        let mut resource = ctx
            .take_resource()
            .unwrap_or_else(|| Resource::empty(ctx.current_state().entity_name()));
        if config.inject_links {
            self.decorate(graph, ctx, key, &mut resource, config, chain);
        }
        StateResolution {
            status: Status::OK,
            resource: Some(resource),
            exception: None,
        }
    }
}

/// Move `ctx` to another state, keeping its resource and outbound parameters.
///
/// Path parameters for the new state come from the old ones overlaid with
/// the resource's scalar properties.
fn advance<'g>(
    ctx: &InteractionContext<'g>,
    key: StateKey,
    state: &'g ResourceState,
    query: Parameters,
) -> InteractionContext<'g> {
    let mut values = ctx.path_parameters().to_single_map();
    if let Some(resource) = ctx.resource() {
        values.extend(resource.scalar_properties());
    }
    let path_parameters: Parameters = template::variables(state.path())
        .into_iter()
        .filter_map(|name| values.get(&name).map(|v| (name.clone(), v.clone())))
        .collect();

    let mut next = ctx.derive(key, state, path_parameters, query);
    for (name, value) in ctx.outbound_query_parameters() {
        next.set_outbound_query_parameter(name.clone(), value.clone());
    }
    next
}

fn internal_error(error: &HyperstateError) -> Response {
    tracing::error!(error = %error, "request failed");
    Response::from_exception(InteractionException::new(
        Status::INTERNAL_SERVER_ERROR,
        error.to_string(),
    ))
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{NOOP_GET, NoopGetCommand};
    use crate::graph::{Action, StateRef, TransitionDef};
    use crate::resource::Entity;

    #[derive(Debug)]
    struct Greeting;

    impl Command for Greeting {
        fn execute(&self, ctx: &mut InteractionContext<'_>) -> Outcome {
            let name = ctx.path_parameters().first("name").unwrap_or("world").to_string();
            ctx.set_resource(Resource::entity("Greeting", Entity::new().with("name", name)));
            Outcome::Success
        }
    }

    fn engine() -> InteractionEngine {
        let mut builder = ResourceGraph::builder();
        let home = builder
            .add_state(
                ResourceState::item("Home", "home", "/")
                    .with_action(Action::view(NOOP_GET))
                    .initial(),
            )
            .expect("add");
        builder
            .add_transition(
                home,
                TransitionDef::new(Method::Get, StateRef::lazy("greeting")).uri_parameter("name", "ada"),
            )
            .expect("transition");
        builder
            .add_state(
                ResourceState::item("Greeting", "greeting", "/hello/{name}")
                    .with_action(Action::view("Greeting")),
            )
            .expect("add");
        let registry = CommandRegistry::new()
            .with(NOOP_GET, Arc::new(NoopGetCommand))
            .with("Greeting", Arc::new(Greeting));
        InteractionEngine::new(
            Arc::new(builder.build().expect("build")),
            Arc::new(Metadata::new()),
            registry,
        )
        .expect("engine")
    }

    #[test]
    fn routes_and_links() {
        let response = engine().process(&Request::get("/"));
        assert_eq!(response.status, Status::OK);
        let resource = response.resource.expect("resource");
        let hrefs: Vec<&str> = resource.links.iter().map(|l| l.href.as_str()).collect();
        assert_eq!(hrefs, vec!["/", "/hello/ada"]);
    }

    #[test]
    fn unknown_path_and_method() {
        let engine = engine();
        assert_eq!(engine.process(&Request::get("/nowhere")).status, Status::NOT_FOUND);
        let response = engine.process(&Request::new(Method::Delete, "/hello/bob"));
        assert_eq!(response.status, Status::METHOD_NOT_ALLOWED);
        assert_eq!(response.headers.get(ALLOW).map(String::as_str), Some("GET, HEAD"));
    }

    #[test]
    fn unknown_command_rejected_at_bootstrap() {
        let mut builder = ResourceGraph::builder();
        builder
            .add_state(ResourceState::item("A", "a", "/a").with_action(Action::view("Missing")))
            .expect("add");
        let result = InteractionEngine::new(
            Arc::new(builder.build().expect("build")),
            Arc::new(Metadata::new()),
            CommandRegistry::with_builtins(),
        );
        assert!(matches!(result, Err(HyperstateError::Configuration(_))));
    }

    #[test]
    fn request_parses_query_and_keys_cache() {
        let request = Request::new(Method::Get, "/customers?b=2&a=1");
        assert_eq!(request.path, "/customers");
        assert_eq!(request.query.first("a"), Some("1"));
        assert_eq!(request.cache_key(), "GET /customers?a=1&b=2");

        let encoded = Request::get("/customers?q=x%20y&k%26v=1");
        assert_eq!(encoded.query.first("q"), Some("x y"));
        assert_eq!(encoded.query.first("k&v"), Some("1"));
        assert_eq!(encoded.cache_key(), "GET /customers?k%26v=1&q=x%20y");
    }

    #[test]
    fn config_defaults_and_clamp() {
        let config = EngineConfig::default();
        assert_eq!(config.max_embed_depth, MAX_EMBED_DEPTH);
        assert!(config.inject_links);
        let deep = EngineConfig {
            max_embed_depth: 1_000,
            ..EngineConfig::default()
        };
        assert_eq!(deep.effective_embed_depth(), MAX_EMBED_DEPTH_CEILING);
    }
}
