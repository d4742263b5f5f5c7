//! # Resolution Benchmarks
//!
//! Performance benchmarks for hyperstate-core transition resolution.
//!
//! Run with: `cargo bench -p hyperstate-core`

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use hyperstate_core::{
    Entity, Expression, InteractionContext, Metadata, Method, Parameters, ResolutionChain,
    Resource, ResourceGraph, ResourceState, ResourceStateMachine, ResponseCache, ShardedCache,
    StateKey, StateRef, TransitionDef, TransitionFlags,
};
use std::hint::black_box;

/// A collection state with a guarded FOR_EACH transition to its items.
fn create_graph() -> (ResourceGraph, StateKey) {
    let mut b = ResourceGraph::builder();
    let items = b
        .add_state(ResourceState::collection("Item", "items", "/items"))
        .expect("items");
    b.add_transition(
        items,
        TransitionDef::new(Method::Get, StateRef::lazy("item"))
            .flags(TransitionFlags::FOR_EACH)
            .condition(Expression::comparison("{status} != 'archived'")),
    )
    .expect("transition");
    b.add_state(ResourceState::item("Item", "item", "/items/{id}"))
        .expect("item");
    (b.build().expect("build"), items)
}

fn create_collection(size: usize) -> Resource {
    let members = (0..size)
        .map(|i| {
            let status = if i % 10 == 0 { "archived" } else { "open" };
            Resource::entity("Item", Entity::new().with("id", i).with("status", status))
        })
        .collect();
    Resource::collection("Item", members)
}

// =============================================================================
// BENCHMARKS
// =============================================================================

fn bench_for_each_resolution(c: &mut Criterion) {
    let mut group = c.benchmark_group("for_each_resolution");
    let (graph, items) = create_graph();
    let metadata = Metadata::new();

    for size in [10, 100, 1000].iter() {
        let collection = create_collection(*size);
        let state = graph.require_state(items).expect("state");
        let ctx = InteractionContext::new(items, state, &metadata, Parameters::new(), Parameters::new());
        let chain = ResolutionChain::new(items, 4);
        let machine = ResourceStateMachine::new(&graph);

        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, _| {
            b.iter(|| {
                black_box(machine.resolve(items, Some(Method::Get), &ctx, Some(&collection), None, &chain))
            });
        });
    }

    group.finish();
}

fn bench_comparison(c: &mut Criterion) {
    let state = ResourceState::item("Item", "item", "/items/{id}");
    let metadata = Metadata::new();
    let ctx = InteractionContext::new(
        StateKey(0),
        &state,
        &metadata,
        [("id", "42")].into_iter().collect(),
        Parameters::new(),
    );
    let props = Default::default();
    let expression = hyperstate_core::ComparisonExpression::new("{id} = '7' | {id} = '42'");

    c.bench_function("comparison_alternatives", |b| {
        b.iter(|| black_box(expression.evaluate(&ctx, &props)));
    });
}

fn bench_cache(c: &mut Criterion) {
    let mut group = c.benchmark_group("sharded_cache");

    for size in [100, 1000, 10000].iter() {
        let cache: ShardedCache<usize, usize> = ShardedCache::new();
        cache.put_all((0..*size).map(|i| (i, i)).collect());

        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            b.iter(|| black_box(cache.get(&(size / 2))));
        });
    }

    group.finish();
}

criterion_group!(benches, bench_for_each_resolution, bench_comparison, bench_cache);
criterion_main!(benches);
