//! # Resource State Machine
//!
//! Graph queries for one request: which transitions leave a state, what
//! their targets bind to, and which of them survive their guards.
//!
//! ## Resolution
//!
//! For each outbound transition:
//! 1. resolve the target handle,
//! 2. compute the transition properties (path parameters, then the source
//!    entity's scalar properties, then the transition's uri-parameter
//!    bindings),
//! 3. bind the target's path template (an unbindable transition is dropped),
//! 4. evaluate the guard.
//!
//! FOR_EACH transitions on a collection repeat 2-4 per member.

use crate::context::InteractionContext;
use crate::expression::EvaluationScope;
use crate::graph::{ResourceGraph, ResourceState, Transition};
use crate::handler::{ResolutionChain, TransitionResolver};
use crate::primitives::{MAX_FOR_EACH_MEMBERS, SELF_RELATION};
use crate::resource::{EntityData, Link, Resource, scalar_to_string};
use crate::template;
use crate::{HyperstateError, Method, Parameters, StateKey, TransitionFlags, TransitionKey};
use std::collections::BTreeMap;

/// A transition instance bound for one request (and one member, for FOR_EACH).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedTransition {
    /// The graph transition.
    pub key: TransitionKey,
    /// Concrete target state.
    pub target: StateKey,
    /// Target path parameters.
    pub path_parameters: Parameters,
    /// Collection member the binding came from.
    pub member_index: Option<usize>,
    /// Rendered link.
    pub link: Link,
}

/// Read-only query engine over a frozen graph.
#[derive(Debug, Clone)]
pub struct ResourceStateMachine<'g> {
    graph: &'g ResourceGraph,
    base_uri: String,
}

impl<'g> ResourceStateMachine<'g> {
    #[must_use]
    pub fn new(graph: &'g ResourceGraph) -> Self {
        Self {
            graph,
            base_uri: String::new(),
        }
    }

    /// Prefix for generated hrefs.
    #[must_use]
    pub fn with_base_uri(mut self, base_uri: impl Into<String>) -> Self {
        self.base_uri = base_uri.into().trim_end_matches('/').to_string();
        self
    }

    #[must_use]
    pub fn graph(&self) -> &'g ResourceGraph {
        self.graph
    }

    /// Outbound transitions of `state` bound to `method`, in declaration order.
    #[must_use]
    pub fn transitions_for(&self, state: StateKey, method: Method) -> Vec<TransitionKey> {
        self.graph.state(state).map_or_else(Vec::new, |s| {
            s.transitions()
                .iter()
                .enumerate()
                .filter(|(_, t)| t.method == method)
                .map(|(i, _)| TransitionKey::new(state, i))
                .collect()
        })
    }

    /// Compute the transition properties used to bind the target template.
    #[must_use]
    pub fn transition_properties(
        &self,
        transition: &Transition,
        ctx: &InteractionContext<'_>,
        data: Option<&dyn EntityData>,
    ) -> BTreeMap<String, String> {
        let mut properties = ctx.path_parameters().to_single_map();

        if let Some(data) = data {
            if let serde_json::Value::Object(map) = data.to_json() {
                for (name, value) in &map {
                    if let Some(s) = scalar_to_string(value) {
                        properties.insert(name.clone(), s);
                    }
                }
            }
        }

        for (variable, expression) in &transition.uri_parameters {
            let mut values = BTreeMap::new();
            for name in template::variables(expression) {
                let value = data
                    .and_then(|d| d.property(&name))
                    .as_ref()
                    .and_then(scalar_to_string)
                    .or_else(|| properties.get(&name).cloned());
                if let Some(value) = value {
                    values.insert(name, value);
                }
            }
            let bound = template::replace(expression, &values);
            if template::has_variables(&bound) {
                tracing::debug!(variable = %variable, expression = %expression, "uri parameter unresolved");
                properties.remove(variable);
            } else {
                properties.insert(variable.clone(), bound);
            }
        }
        properties
    }

    /// Resolve the outbound transitions of `source`.
    ///
    /// `method` restricts to transitions bound to that method. `resource` is
    /// the source's payload; FOR_EACH transitions fan out over its members.
    pub fn resolve(
        &self,
        source: StateKey,
        method: Option<Method>,
        ctx: &InteractionContext<'g>,
        resource: Option<&Resource>,
        resolver: Option<&dyn TransitionResolver>,
        chain: &ResolutionChain,
    ) -> Result<Vec<ResolvedTransition>, HyperstateError> {
        self.resolve_where(source, ctx, resource, resolver, chain, |t| {
            method.is_none_or(|m| m == t.method)
        })
    }

    /// AUTO transitions out of `source` whose guards pass, in declaration order.
    pub fn auto_transitions(
        &self,
        source: StateKey,
        ctx: &InteractionContext<'g>,
        resource: Option<&Resource>,
        resolver: Option<&dyn TransitionResolver>,
        chain: &ResolutionChain,
    ) -> Result<Vec<ResolvedTransition>, HyperstateError> {
        self.resolve_where(source, ctx, resource, resolver, chain, |t| {
            t.has(TransitionFlags::AUTO)
        })
    }

    fn resolve_where(
        &self,
        source: StateKey,
        ctx: &InteractionContext<'g>,
        resource: Option<&Resource>,
        resolver: Option<&dyn TransitionResolver>,
        chain: &ResolutionChain,
        include: impl Fn(&Transition) -> bool,
    ) -> Result<Vec<ResolvedTransition>, HyperstateError> {
        let state = self.graph.require_state(source)?;
        let mut resolved = Vec::new();

        for (index, transition) in state.transitions().iter().enumerate() {
            if !include(transition) {
                continue;
            }
            let key = TransitionKey::new(source, index);
            let target_key = self.graph.resolve(&transition.target)?;
            let target = self.graph.require_state(target_key)?;

            let members = resource
                .and_then(Resource::members)
                .filter(|_| transition.has(TransitionFlags::FOR_EACH) && state.is_collection());

            match members {
                Some(members) => {
                    if members.len() > MAX_FOR_EACH_MEMBERS {
                        tracing::warn!(
                            transition = %state.id(),
                            members = members.len(),
                            "FOR_EACH fan-out truncated"
                        );
                    }
                    for (i, member) in members.iter().take(MAX_FOR_EACH_MEMBERS).enumerate() {
                        let bound = self.bind(
                            key, transition, target_key, target, ctx, member.data(), Some(i),
                            resolver, chain,
                        );
                        resolved.extend(bound);
                    }
                }
                None => {
                    let data = resource.and_then(Resource::data);
                    let bound = self.bind(
                        key, transition, target_key, target, ctx, data, None, resolver, chain,
                    );
                    resolved.extend(bound);
                }
            }
        }
        Ok(resolved)
    }

    /// The self link of `state`, bound from the context's path parameters.
    #[must_use]
    pub fn self_link(&self, state: &ResourceState, ctx: &InteractionContext<'_>) -> Link {
        let path = template::fill_path(state.path(), &ctx.path_parameters().to_single_map());
        Link {
            transition: None,
            title: state.name().to_string(),
            rel: SELF_RELATION.to_string(),
            href: self.href(&path, ctx),
            method: Method::Get,
            consumes: state.consumes().to_vec(),
            produces: state.produces().to_vec(),
            link_id: None,
            source_field: None,
        }
    }

    /// Base uri + path + outbound query parameters, names and values encoded.
    #[must_use]
    pub fn href(&self, path: &str, ctx: &InteractionContext<'_>) -> String {
        let mut href = format!("{}{}", self.base_uri, path);
        let mut separator = if href.contains('?') { '&' } else { '?' };
        for (name, value) in ctx.outbound_query_parameters() {
            href.push(separator);
            href.push_str(&template::encode_query_component(name));
            href.push('=');
            href.push_str(&template::encode_query_component(value));
            separator = '&';
        }
        href
    }

    fn bind(
        &self,
        key: TransitionKey,
        transition: &Transition,
        target_key: StateKey,
        target: &'g ResourceState,
        ctx: &InteractionContext<'g>,
        data: Option<&dyn EntityData>,
        member_index: Option<usize>,
        resolver: Option<&dyn TransitionResolver>,
        chain: &ResolutionChain,
    ) -> Option<ResolvedTransition> {
        let properties = self.transition_properties(transition, ctx, data);

        let path = match template::bind(target.path(), &properties) {
            Ok(path) => path,
            Err(missing) => {
                tracing::debug!(
                    target = %target.id(),
                    missing = %missing,
                    "transition excluded: target template unbound"
                );
                return None;
            }
        };

        if let Some(condition) = &transition.condition {
            let scope = EvaluationScope {
                graph: self.graph,
                resolver,
                properties: &properties,
                chain,
            };
            if !condition.evaluate(&scope, ctx) {
                tracing::debug!(target = %target.id(), "transition excluded by guard");
                return None;
            }
        }

        let path_parameters: Parameters = template::variables(target.path())
            .into_iter()
            .filter_map(|name| properties.get(&name).map(|v| (name.clone(), v.clone())))
            .collect();

        let link = Link {
            transition: Some(key),
            title: transition
                .label
                .clone()
                .unwrap_or_else(|| target.name().to_string()),
            rel: target.rel(),
            href: self.href(&path, ctx),
            method: transition.method,
            consumes: target.consumes().to_vec(),
            produces: target.produces().to_vec(),
            link_id: transition.link_id.clone(),
            source_field: transition.source_field.clone(),
        };

        Some(ResolvedTransition {
            key,
            target: target_key,
            path_parameters,
            member_index,
            link,
        })
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expression::Expression;
    use crate::graph::{Action, StateRef, TransitionDef};
    use crate::metadata::Metadata;
    use crate::resource::Entity;

    struct Fixture {
        graph: ResourceGraph,
        customers: StateKey,
        customer: StateKey,
    }

    fn fixture() -> Fixture {
        let mut builder = ResourceGraph::builder();
        let customers = builder
            .add_state(
                ResourceState::collection("Customer", "customers", "/customers")
                    .with_action(Action::view("GETEntities")),
            )
            .expect("add");
        builder
            .add_transition(
                customers,
                TransitionDef::new(Method::Get, StateRef::lazy("customer"))
                    .flags(TransitionFlags::FOR_EACH),
            )
            .expect("t0");
        builder
            .add_transition(
                customers,
                TransitionDef::new(Method::Get, StateRef::lazy("vip"))
                    .uri_parameter("id", "{id}")
                    .flags(TransitionFlags::FOR_EACH)
                    .condition(Expression::comparison("{tier} = 'gold'")),
            )
            .expect("t1");
        builder
            .add_transition(customers, TransitionDef::new(Method::Post, customers))
            .expect("t2");
        let customer = builder
            .add_state(
                ResourceState::item("Customer", "customer", "/customers/{id}")
                    .with_action(Action::view("GETEntity")),
            )
            .expect("add");
        builder
            .add_transition(
                customer,
                TransitionDef::new(Method::Get, StateRef::lazy("orders"))
                    .uri_parameter("customerId", "{id}")
                    .label("Orders"),
            )
            .expect("t3");
        builder
            .add_transition(
                customer,
                TransitionDef::new(Method::Get, StateRef::lazy("invoice")),
            )
            .expect("t4");
        builder
            .add_state(ResourceState::item("Customer", "vip", "/vip/{id}"))
            .expect("add");
        builder
            .add_state(ResourceState::collection("Order", "orders", "/customers/{customerId}/orders"))
            .expect("add");
        builder
            .add_state(ResourceState::item("Invoice", "invoice", "/invoices/{invoiceNo}"))
            .expect("add");
        Fixture {
            graph: builder.build().expect("build"),
            customers,
            customer,
        }
    }

    fn members() -> Resource {
        Resource::collection(
            "Customer",
            vec![
                Resource::entity("Customer", Entity::new().with("id", 1).with("tier", "gold")),
                Resource::entity("Customer", Entity::new().with("id", 2).with("tier", "iron")),
                Resource::entity("Customer", Entity::new().with("id", 3).with("tier", "gold")),
            ],
        )
    }

    #[test]
    fn for_each_binds_each_member() {
        let f = fixture();
        let metadata = Metadata::new();
        let state = f.graph.require_state(f.customers).expect("state");
        let ctx = InteractionContext::new(f.customers, state, &metadata, Parameters::new(), Parameters::new());
        let machine = ResourceStateMachine::new(&f.graph).with_base_uri("http://api/");
        let chain = ResolutionChain::new(f.customers, 4);

        let resolved = machine
            .resolve(f.customers, Some(Method::Get), &ctx, Some(&members()), None, &chain)
            .expect("resolve");

        let plain: Vec<&str> = resolved
            .iter()
            .filter(|r| r.key.index == 0)
            .map(|r| r.link.href.as_str())
            .collect();
        assert_eq!(
            plain,
            vec!["http://api/customers/1", "http://api/customers/2", "http://api/customers/3"]
        );

        // Guarded per member: only gold customers link to the vip state.
        let vip: Vec<Option<usize>> = resolved
            .iter()
            .filter(|r| r.key.index == 1)
            .map(|r| r.member_index)
            .collect();
        assert_eq!(vip, vec![Some(0), Some(2)]);
        assert!(resolved.iter().all(|r| r.link.method == Method::Get));
    }

    #[test]
    fn transitions_for_filters_by_method() {
        let f = fixture();
        let machine = ResourceStateMachine::new(&f.graph);
        assert_eq!(machine.transitions_for(f.customers, Method::Get).len(), 2);
        assert_eq!(
            machine.transitions_for(f.customers, Method::Post),
            vec![TransitionKey::new(f.customers, 2)]
        );
        assert!(machine.transitions_for(f.customers, Method::Delete).is_empty());
    }

    #[test]
    fn uri_parameters_bind_from_entity_and_unbindable_is_excluded() {
        let f = fixture();
        let metadata = Metadata::new();
        let state = f.graph.require_state(f.customer).expect("state");
        let ctx = InteractionContext::new(
            f.customer,
            state,
            &metadata,
            [("id", "7")].into_iter().collect(),
            Parameters::new(),
        );
        let resource = Resource::entity("Customer", Entity::new().with("id", 7));
        let chain = ResolutionChain::new(f.customer, 4);

        let resolved = ResourceStateMachine::new(&f.graph)
            .resolve(f.customer, None, &ctx, Some(&resource), None, &chain)
            .expect("resolve");

        // The invoice transition needs {invoiceNo}, which nothing provides.
        assert_eq!(resolved.len(), 1);
        let orders = &resolved[0];
        assert_eq!(orders.link.href, "/customers/7/orders");
        assert_eq!(orders.link.title, "Orders");
        assert_eq!(orders.link.rel, "collection");
        assert_eq!(orders.path_parameters.first("customerId"), Some("7"));
    }

    #[test]
    fn transition_properties_layering() {
        let f = fixture();
        let metadata = Metadata::new();
        let state = f.graph.require_state(f.customer).expect("state");
        let ctx = InteractionContext::new(
            f.customer,
            state,
            &metadata,
            [("id", "path"), ("extra", "p")].into_iter().collect(),
            Parameters::new(),
        );
        let entity = Entity::new().with("id", "entity");
        let transition = &state.transitions()[0];

        let props = ResourceStateMachine::new(&f.graph).transition_properties(
            transition,
            &ctx,
            Some(&entity),
        );
        assert_eq!(props.get("id").map(String::as_str), Some("entity"));
        assert_eq!(props.get("extra").map(String::as_str), Some("p"));
        assert_eq!(props.get("customerId").map(String::as_str), Some("entity"));
    }

    #[test]
    fn self_link_and_outbound_query() {
        let f = fixture();
        let metadata = Metadata::new();
        let state = f.graph.require_state(f.customer).expect("state");
        let mut ctx = InteractionContext::new(
            f.customer,
            state,
            &metadata,
            [("id", "5")].into_iter().collect(),
            Parameters::new(),
        );
        ctx.set_outbound_query_parameter("token", "abc");
        let link = ResourceStateMachine::new(&f.graph).self_link(state, &ctx);
        assert_eq!(link.rel, "self");
        assert_eq!(link.href, "/customers/5?token=abc");
        assert!(link.transition.is_none());
    }

    #[test]
    fn self_link_encodes_values() {
        let f = fixture();
        let metadata = Metadata::new();
        let state = f.graph.require_state(f.customer).expect("state");
        let mut ctx = InteractionContext::new(
            f.customer,
            state,
            &metadata,
            [("id", "a/b")].into_iter().collect(),
            Parameters::new(),
        );
        ctx.set_outbound_query_parameter("k&v", "x y");
        let link = ResourceStateMachine::new(&f.graph).self_link(state, &ctx);
        assert_eq!(link.href, "/customers/a%2Fb?k%26v=x%20y");

        let routed = template::match_path(state.path(), &link.href).expect("match");
        assert_eq!(routed.first("id"), Some("a/b"));
    }
}
