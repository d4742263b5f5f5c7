//! # Property-Based Tests
//!
//! Invariants of transition resolution and guard evaluation, checked with
//! proptest.

use hyperstate_core::template;
use hyperstate_core::{
    ComparisonExpression, Entity, InteractionContext, Metadata, Method, Parameters,
    ResolutionChain, Resource, ResourceGraph, ResourceState, ResourceStateMachine, StateRef,
    TransitionDef, TransitionFlags,
};
use proptest::collection::{btree_set, vec};
use proptest::prelude::*;
use std::collections::BTreeMap;

fn fan_out_graph() -> ResourceGraph {
    let mut b = ResourceGraph::builder();
    let items = b
        .add_state(ResourceState::collection("Item", "items", "/items"))
        .expect("items");
    b.add_transition(
        items,
        TransitionDef::new(Method::Get, StateRef::lazy("item")).flags(TransitionFlags::FOR_EACH),
    )
    .expect("transition");
    b.add_state(ResourceState::item("Item", "item", "/items/{id}"))
        .expect("item");
    b.build().expect("build")
}

// =============================================================================
// PROPERTY TESTS
// =============================================================================

proptest! {
    /// FOR_EACH over N members yields N transitions, each bound to its own member.
    #[test]
    fn for_each_yields_one_transition_per_member(ids in btree_set("[a-z0-9]{1,8}", 0..40)) {
        let graph = fan_out_graph();
        let key = graph.initial_state().unwrap_or(hyperstate_core::StateKey(0));
        let metadata = Metadata::new();
        let ctx = InteractionContext::new(
            key,
            graph.require_state(key).expect("state"),
            &metadata,
            Parameters::new(),
            Parameters::new(),
        );
        let ids: Vec<String> = ids.into_iter().collect();
        let members = ids
            .iter()
            .map(|id| Resource::entity("Item", Entity::new().with("id", id.clone())))
            .collect();
        let collection = Resource::collection("Item", members);
        let chain = ResolutionChain::new(key, 4);

        let resolved = ResourceStateMachine::new(&graph)
            .resolve(key, Some(Method::Get), &ctx, Some(&collection), None, &chain)
            .expect("resolve");

        prop_assert_eq!(resolved.len(), ids.len());
        for (i, (transition, id)) in resolved.iter().zip(&ids).enumerate() {
            prop_assert_eq!(transition.member_index, Some(i));
            prop_assert_eq!(transition.path_parameters.first("id"), Some(id.as_str()));
            prop_assert_eq!(&transition.link.href, &format!("/items/{}", id));
        }
    }

    /// Comparisons agree with `str` ordering, even for numeric-looking text.
    #[test]
    fn comparison_matches_str_ordering(left in "[0-9a-z]{1,6}", right in "[0-9a-z]{1,6}") {
        let state = ResourceState::item("X", "x", "/x");
        let metadata = Metadata::new();
        let ctx = InteractionContext::new(
            hyperstate_core::StateKey(0),
            &state,
            &metadata,
            Parameters::new(),
            Parameters::new(),
        );
        let props = BTreeMap::new();
        let check = |op: &str| {
            ComparisonExpression::new(format!("'{}' {} '{}'", left, op, right))
                .evaluate(&ctx, &props)
                .is_success()
        };

        prop_assert_eq!(check("<"), left < right);
        prop_assert_eq!(check(">"), left > right);
        prop_assert_eq!(check("<="), left <= right);
        prop_assert_eq!(check(">="), left >= right);
        prop_assert_eq!(check("="), left == right);
        prop_assert_eq!(check("!="), left != right);
    }

    /// Resolving the same lazy reference repeatedly always yields the same state.
    #[test]
    fn lazy_resolution_is_stable(names in vec("[a-z]{1,10}", 1..20)) {
        let mut b = ResourceGraph::builder();
        let root = b.add_state(ResourceState::item("Root", "root", "/")).expect("root");
        let mut registered = Vec::new();
        for name in &names {
            if registered.contains(name) || name == "root" {
                continue;
            }
            b.add_transition(root, TransitionDef::new(Method::Get, StateRef::lazy(name.clone())))
                .expect("transition");
            registered.push(name.clone());
        }
        for name in &registered {
            b.add_state(ResourceState::item("Node", name, &format!("/{}", name)))
                .expect("state");
        }
        let graph = b.build().expect("build");

        for transition in graph.require_state(root).expect("root").transitions() {
            let first = graph.resolve(&transition.target).expect("first");
            let second = graph.resolve(&transition.target).expect("second");
            prop_assert_eq!(first, second);
            let StateRef::Lazy(name) = &transition.target else {
                return Err(TestCaseError::fail("expected lazy reference"));
            };
            prop_assert_eq!(graph.require_state(first).expect("state").name(), name.as_str());
        }
    }

    /// Any bound value comes back unchanged when the href is routed.
    #[test]
    fn bound_values_route_back(id in "\\PC{1,16}", page in "\\PC{1,8}") {
        let values: BTreeMap<String, String> =
            [("id".to_string(), id.clone()), ("page".to_string(), page.clone())].into();
        let href = template::bind("/items/{id}/pages/{page}", &values).expect("bind");
        let params = template::match_path("/items/{id}/pages/{page}", &href).expect("match");
        prop_assert_eq!(params.first("id"), Some(id.as_str()));
        prop_assert_eq!(params.first("page"), Some(page.as_str()));
    }
}
