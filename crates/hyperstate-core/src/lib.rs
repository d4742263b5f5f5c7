//! # hyperstate-core
//!
//! The hypermedia request-resolution engine for Hyperstate - THE LOGIC.
//!
//! Given a declarative graph of resource states connected by conditional
//! transitions, this crate decides which transitions apply to a request,
//! runs the commands bound to the state, and assembles a response that
//! links to (or embeds) further resources reached by walking the same graph.
//!
//! ## Components (leaves first)
//!
//! - `graph`: resource states, actions, transitions, one-time lazy resolution
//! - `expression`: comparison and probe guards
//! - `context`: per-request execution record
//! - `command`: command contract, abort-on-error and naive workflows
//! - `machine`: transition lookup, property binding, FOR_EACH fan-out
//! - `handler`: sequential sub-resource resolution
//! - `cache`: response cache contract and sharded implementations
//! - `engine`: routing, AUTO follow, link injection, embedding
//!
//! ## Architectural Constraints
//!
//! - Synchronous: one request is handled by one thread, no async
//! - Deterministic: BTreeMap for ordered data, declaration-order links
//! - The graph is frozen after build and shared without locking
//! - Wire formats, persistence and HTTP transport live outside this crate

// =============================================================================
// MODULES
// =============================================================================

pub mod cache;
pub mod command;
pub mod context;
pub mod engine;
pub mod expression;
pub mod graph;
pub mod handler;
pub mod machine;
pub mod metadata;
pub mod primitives;
pub mod resource;
pub mod template;
pub mod types;

// =============================================================================
// RE-EXPORTS: Core Types (from types module)
// =============================================================================

pub use types::{
    ExecutionType, HyperstateError, InteractionException, Method, Outcome, Parameters, StateId,
    StateKey, Status, TransitionFlags, TransitionKey,
};

// =============================================================================
// RE-EXPORTS: Graph & Resolution
// =============================================================================

pub use cache::{ResponseCache, ShardedCache, TimedCache};
pub use command::{
    AbortOnErrorWorkflow, Command, CommandRegistry, NaiveWorkflow, NoopGetCommand,
    NoopPostCommand,
};
pub use context::InteractionContext;
pub use engine::{EngineConfig, InteractionEngine, Request, Response, Transformer};
pub use expression::{
    ComparisonExpression, EvaluationScope, Expression, ProbeFunction, ResourceProbe,
};
pub use graph::{
    Action, ActionKind, ResourceGraph, ResourceGraphBuilder, ResourceState,
    ResourceStateProvider, StateKind, StateRef, Transition, TransitionDef,
};
pub use handler::{
    ResolutionChain, ResolutionConfig, SequentialResourceRequestHandler, StateResolution,
    TransitionResolver,
};
pub use machine::{ResolvedTransition, ResourceStateMachine};
pub use metadata::{EntityMetadata, FieldType, Metadata};
pub use resource::{Body, Embedded, Entity, EntityData, Link, PropertyAccessors, Resource, Typed};
