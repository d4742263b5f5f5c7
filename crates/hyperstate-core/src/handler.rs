//! # Sequential Resource Request Handler
//!
//! Resolves a set of transitions one after another against derived
//! contexts. Results come back in input order so rendered links are stable.
//!
//! A failing sibling never aborts the others. Recursion is bounded by a
//! [`ResolutionChain`]: a maximum depth and the set of states already on
//! the current embedding path.

use crate::context::InteractionContext;
use crate::graph::ResourceGraph;
use crate::machine::ResolvedTransition;
use crate::resource::{Link, Resource};
use crate::{InteractionException, Parameters, StateKey, Status, TransitionKey};
use std::collections::BTreeSet;

// =============================================================================
// CONFIGURATION
// =============================================================================

/// Per-call switches for a resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolutionConfig {
    /// Render links on the resolved resource.
    pub inject_links: bool,
    /// Resolve EMBEDDED transitions of the resolved resource.
    pub embed_resources: bool,
    /// The transition being followed; others are only probed.
    pub primary: Option<TransitionKey>,
}

impl Default for ResolutionConfig {
    fn default() -> Self {
        Self {
            inject_links: true,
            embed_resources: true,
            primary: None,
        }
    }
}

impl ResolutionConfig {
    /// Existence check only: no links, no embedding.
    #[must_use]
    pub const fn probe() -> Self {
        Self {
            inject_links: false,
            embed_resources: false,
            primary: None,
        }
    }

    /// Configuration for the sub-resolution of `transition`.
    #[must_use]
    pub fn for_child(&self, transition: TransitionKey) -> Self {
        match self.primary {
            Some(primary) if primary != transition => Self::probe(),
            _ => Self {
                primary: None,
                ..*self
            },
        }
    }
}

/// Bounded path of states currently being resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolutionChain {
    depth: usize,
    max_depth: usize,
    visited: BTreeSet<StateKey>,
}

impl ResolutionChain {
    /// A chain rooted at `root`.
    #[must_use]
    pub fn new(root: StateKey, max_depth: usize) -> Self {
        let mut visited = BTreeSet::new();
        visited.insert(root);
        Self {
            depth: 0,
            max_depth,
            visited,
        }
    }

    /// Current depth (0 at the root).
    #[must_use]
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// True if `key` is already on this chain.
    #[must_use]
    pub fn contains(&self, key: StateKey) -> bool {
        self.visited.contains(&key)
    }

    /// Extend the chain with `key`.
    ///
    /// `None` if `key` is already on the chain or the depth limit is reached.
    #[must_use]
    pub fn enter(&self, key: StateKey) -> Option<Self> {
        if self.contains(key) {
            return None;
        }
        let mut next = self.deeper()?;
        next.visited.insert(key);
        Some(next)
    }

    /// One level deeper without recording a state (used by probes).
    #[must_use]
    pub fn deeper(&self) -> Option<Self> {
        if self.depth >= self.max_depth {
            return None;
        }
        Some(Self {
            depth: self.depth + 1,
            max_depth: self.max_depth,
            visited: self.visited.clone(),
        })
    }
}

// =============================================================================
// RESOLVER CONTRACT
// =============================================================================

/// Outcome of resolving one state.
#[derive(Debug, Clone)]
pub struct StateResolution {
    pub status: Status,
    pub resource: Option<Resource>,
    pub exception: Option<InteractionException>,
}

impl StateResolution {
    /// A failed resolution with no resource.
    #[must_use]
    pub fn failed(status: Status, exception: Option<InteractionException>) -> Self {
        Self {
            status,
            resource: None,
            exception,
        }
    }

    /// Links rendered on the resolved resource.
    #[must_use]
    pub fn links(&self) -> &[Link] {
        self.resource.as_ref().map_or(&[], |r| r.links.as_slice())
    }
}

/// Resolves the state a context currently points at.
///
/// The context has already been derived for the target; implementations
/// run the state's view commands and decorate the result per `config`.
pub trait TransitionResolver {
    fn resolve<'g>(
        &self,
        graph: &'g ResourceGraph,
        ctx: &mut InteractionContext<'g>,
        config: &ResolutionConfig,
        chain: &ResolutionChain,
    ) -> StateResolution;
}

// =============================================================================
// HANDLER
// =============================================================================

/// One entry of a handler run.
#[derive(Debug, Clone)]
pub struct HandlerResult {
    pub transition: ResolvedTransition,
    pub resolution: StateResolution,
}

/// Ordered results of a handler run.
#[derive(Debug, Clone, Default)]
pub struct HandlerResults {
    entries: Vec<HandlerResult>,
}

impl HandlerResults {
    /// Result for a transition (and collection member, for FOR_EACH).
    #[must_use]
    pub fn get(&self, key: TransitionKey, member: Option<usize>) -> Option<&StateResolution> {
        self.entries
            .iter()
            .find(|e| e.transition.key == key && e.transition.member_index == member)
            .map(|e| &e.resolution)
    }

    /// Entries in input order.
    pub fn iter(&self) -> impl Iterator<Item = &HandlerResult> + '_ {
        self.entries.iter()
    }

    /// Number of resolved entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if nothing was resolved.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl IntoIterator for HandlerResults {
    type Item = HandlerResult;
    type IntoIter = std::vec::IntoIter<HandlerResult>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

/// Resolves transitions in input order.
pub struct SequentialResourceRequestHandler<'r> {
    resolver: &'r dyn TransitionResolver,
}

impl<'r> SequentialResourceRequestHandler<'r> {
    #[must_use]
    pub fn new(resolver: &'r dyn TransitionResolver) -> Self {
        Self { resolver }
    }

    /// Resolve each transition against a context derived from `ctx`.
    ///
    /// Transitions whose target is already on `chain`, or that would exceed
    /// its depth, are skipped and absent from the results.
    pub fn handle<'g>(
        &self,
        graph: &'g ResourceGraph,
        ctx: &InteractionContext<'g>,
        transitions: &[ResolvedTransition],
        config: &ResolutionConfig,
        chain: &ResolutionChain,
    ) -> HandlerResults {
        let mut entries = Vec::with_capacity(transitions.len());
        for transition in transitions {
            let Some(next) = chain.enter(transition.target) else {
                tracing::debug!(
                    target = ?transition.target,
                    depth = chain.depth(),
                    "skipping re-entrant or too deep resolution"
                );
                continue;
            };
            let Some(state) = graph.state(transition.target) else {
                tracing::warn!(target = ?transition.target, "resolved transition names unknown state");
                continue;
            };

            let mut child = ctx.derive(
                transition.target,
                state,
                transition.path_parameters.clone(),
                Parameters::new(),
            );
            let resolution = self.resolver.resolve(
                graph,
                &mut child,
                &config.for_child(transition.key),
                &next,
            );
            tracing::debug!(
                state = %state.id(),
                status = %resolution.status,
                "sub-resource resolved"
            );
            entries.push(HandlerResult {
                transition: transition.clone(),
                resolution,
            });
        }
        HandlerResults { entries }
    }
}

// =============================================================================
// TESTS
// =============================================================================
