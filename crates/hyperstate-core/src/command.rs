//! # Commands & Workflows
//!
//! A [`Command`] is one pluggable unit of business logic run against an
//! [`InteractionContext`]. Workflows compose commands and are commands
//! themselves:
//!
//! - [`AbortOnErrorWorkflow`]: stops at the first non-success outcome.
//! - [`NaiveWorkflow`]: runs everything, reports the last outcome.
//!
//! Before each command runs its execution type is recorded on the context,
//! so after a workflow the context holds the type of the last command that
//! actually ran. That tells the engine whether the interaction moved to
//! another state. Workflows keep no per-call state and can be shared.

use crate::context::InteractionContext;
use crate::resource::Resource;
use crate::{ExecutionType, HyperstateError, Outcome};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// A unit of business logic.
pub trait Command: Send + Sync {
    /// Run against the context, writing resource and/or exception.
    fn execute(&self, ctx: &mut InteractionContext<'_>) -> Outcome;

    /// Whether this command moves the interaction to another state.
    fn execution_type(&self) -> ExecutionType {
        ExecutionType::Interaction
    }
}

/// Ordered commands of a workflow.
#[derive(Default)]
struct Steps {
    commands: Vec<Arc<dyn Command>>,
}

impl Steps {
    fn new() -> Self {
        Self::default()
    }

    /// Nested workflows overwrite the recorded type with their own steps.
    fn run(command: &dyn Command, ctx: &mut InteractionContext<'_>) -> Outcome {
        ctx.record_execution(command.execution_type());
        command.execute(ctx)
    }

    /// Declared type: that of the last command.
    fn execution_type(&self) -> ExecutionType {
        self.commands
            .last()
            .map_or(ExecutionType::Interaction, |c| c.execution_type())
    }
}

impl fmt::Debug for Steps {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Steps")
            .field("commands", &self.commands.len())
            .finish()
    }
}

// =============================================================================
// ABORT ON ERROR
// =============================================================================

/// Runs commands in order, stopping at the first non-success outcome.
#[derive(Debug)]
pub struct AbortOnErrorWorkflow {
    steps: Steps,
}

impl Default for AbortOnErrorWorkflow {
    fn default() -> Self {
        Self::new()
    }
}

impl AbortOnErrorWorkflow {
    #[must_use]
    pub fn new() -> Self {
        Self {
            steps: Steps::new(),
        }
    }

    /// Builder-style append.
    #[must_use]
    pub fn with_command(mut self, command: Arc<dyn Command>) -> Self {
        self.add_command(command);
        self
    }

    pub fn add_command(&mut self, command: Arc<dyn Command>) {
        self.steps.commands.push(command);
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.steps.commands.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.steps.commands.len()
    }
}

impl Command for AbortOnErrorWorkflow {
    fn execute(&self, ctx: &mut InteractionContext<'_>) -> Outcome {
        if self.is_empty() {
            tracing::error!(state = %ctx.current_state().id(), "abort-on-error workflow has no commands");
            return Outcome::failure(HyperstateError::EmptyWorkflow.to_string());
        }
        for (index, command) in self.steps.commands.iter().enumerate() {
            let outcome = Steps::run(command.as_ref(), ctx);
            if !outcome.is_success() {
                tracing::debug!(step = index, outcome = ?outcome, "workflow aborted");
                return outcome;
            }
        }
        Outcome::Success
    }

    fn execution_type(&self) -> ExecutionType {
        self.steps.execution_type()
    }
}

// =============================================================================
// NAIVE
// =============================================================================

/// Runs every command regardless of outcome; returns the last outcome.
#[derive(Debug)]
pub struct NaiveWorkflow {
    steps: Steps,
}

impl Default for NaiveWorkflow {
    fn default() -> Self {
        Self::new()
    }
}

impl NaiveWorkflow {
    #[must_use]
    pub fn new() -> Self {
        Self {
            steps: Steps::new(),
        }
    }

    #[must_use]
    pub fn with_command(mut self, command: Arc<dyn Command>) -> Self {
        self.add_command(command);
        self
    }

    pub fn add_command(&mut self, command: Arc<dyn Command>) {
        self.steps.commands.push(command);
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.steps.commands.is_empty()
    }
}

impl Command for NaiveWorkflow {
    fn execute(&self, ctx: &mut InteractionContext<'_>) -> Outcome {
        let mut last = Outcome::Success;
        for command in &self.steps.commands {
            last = Steps::run(command.as_ref(), ctx);
        }
        last
    }

    fn execution_type(&self) -> ExecutionType {
        self.steps.execution_type()
    }
}

// =============================================================================
// BUILT-IN COMMANDS
// =============================================================================

/// Succeeds; leaves an empty resource if none was produced.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopGetCommand;

impl Command for NoopGetCommand {
    fn execute(&self, ctx: &mut InteractionContext<'_>) -> Outcome {
        if ctx.resource().is_none() {
            let entity = ctx.current_state().entity_name().to_string();
            ctx.set_resource(Resource::empty(entity));
        }
        Outcome::Success
    }
}

/// Succeeds as a state transition.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopPostCommand;

impl Command for NoopPostCommand {
    fn execute(&self, _ctx: &mut InteractionContext<'_>) -> Outcome {
        Outcome::Success
    }

    fn execution_type(&self) -> ExecutionType {
        ExecutionType::Transition
    }
}

// =============================================================================
// REGISTRY
// =============================================================================

/// Name of the built-in [`NoopGetCommand`].
pub const NOOP_GET: &str = "NoopGET";
/// Name of the built-in [`NoopPostCommand`].
pub const NOOP_POST: &str = "NoopPOST";

/// Command provider: action name -> implementation.
#[derive(Clone, Default)]
pub struct CommandRegistry {
    commands: BTreeMap<String, Arc<dyn Command>>,
}

impl CommandRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding the built-in noop commands.
    #[must_use]
    pub fn with_builtins() -> Self {
        Self::new()
            .with(NOOP_GET, Arc::new(NoopGetCommand))
            .with(NOOP_POST, Arc::new(NoopPostCommand))
    }

    #[must_use]
    pub fn with(mut self, name: impl Into<String>, command: Arc<dyn Command>) -> Self {
        self.register(name, command);
        self
    }

    /// Register (or replace) a command.
    pub fn register(&mut self, name: impl Into<String>, command: Arc<dyn Command>) {
        self.commands.insert(name.into(), command);
    }

    /// Look up a command.
    pub fn get(&self, name: &str) -> Result<Arc<dyn Command>, HyperstateError> {
        self.commands
            .get(name)
            .cloned()
            .ok_or_else(|| HyperstateError::Configuration(format!("no command named '{}'", name)))
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.commands.contains_key(name)
    }

    /// Registered names in order.
    pub fn names(&self) -> impl Iterator<Item = &str> + '_ {
        self.commands.keys().map(String::as_str)
    }
}

impl fmt::Debug for CommandRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandRegistry")
            .field("names", &self.commands.keys().collect::<Vec<_>>())
            .finish()
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::ResourceState;
    use crate::metadata::Metadata;
    use crate::{Parameters, StateKey};
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug, Default)]
    struct Counting {
        outcome: Option<Outcome>,
        calls: AtomicU32,
        transition: bool,
    }

    impl Counting {
        fn new(outcome: Outcome) -> Arc<Self> {
            Arc::new(Self {
                outcome: Some(outcome),
                ..Self::default()
            })
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::Relaxed)
        }
    }

    impl Command for Counting {
        fn execute(&self, _ctx: &mut InteractionContext<'_>) -> Outcome {
            self.calls.fetch_add(1, Ordering::Relaxed);
            self.outcome.clone().unwrap_or(Outcome::Success)
        }

        fn execution_type(&self) -> ExecutionType {
            if self.transition {
                ExecutionType::Transition
            } else {
                ExecutionType::Interaction
            }
        }
    }

    /// Execute against a fresh context; returns the outcome and the
    /// recorded execution type.
    fn execute(command: &dyn Command) -> (Outcome, Option<ExecutionType>) {
        let state = ResourceState::item("Customer", "customer", "/customers/{id}");
        let metadata = Metadata::new();
        let mut ctx = InteractionContext::new(
            StateKey(0),
            &state,
            &metadata,
            Parameters::new(),
            Parameters::new(),
        );
        let outcome = command.execute(&mut ctx);
        (outcome, ctx.executed())
    }

    fn run(command: &dyn Command) -> Outcome {
        execute(command).0
    }

    #[test]
    fn abort_on_error_stops_at_first_failure() {
        let failing = Counting::new(Outcome::failure("boom"));
        let passing = Counting::new(Outcome::Success);
        let workflow = AbortOnErrorWorkflow::new()
            .with_command(failing.clone())
            .with_command(passing.clone());

        assert!(matches!(run(&workflow), Outcome::Failure(_)));
        assert_eq!(failing.calls(), 1);
        assert_eq!(passing.calls(), 0);
    }

    #[test]
    fn naive_runs_everything_and_returns_last() {
        let failing = Counting::new(Outcome::failure("boom"));
        let passing = Counting::new(Outcome::Success);
        let workflow = NaiveWorkflow::new()
            .with_command(failing.clone())
            .with_command(passing.clone());

        assert_eq!(run(&workflow), Outcome::Success);
        assert_eq!(failing.calls(), 1);
        assert_eq!(passing.calls(), 1);
    }

    #[test]
    fn empty_abort_workflow_fails() {
        let workflow = AbortOnErrorWorkflow::new();
        assert!(workflow.is_empty());
        assert!(matches!(run(&workflow), Outcome::Failure(_)));
        assert_eq!(run(&NaiveWorkflow::new()), Outcome::Success);
    }

    #[test]
    fn execution_type_follows_last_executed_command() {
        let failing_transition = Arc::new(Counting {
            outcome: Some(Outcome::invalid("bad")),
            transition: true,
            ..Counting::default()
        });
        let workflow = AbortOnErrorWorkflow::new()
            .with_command(failing_transition)
            .with_command(Arc::new(NoopGetCommand));

        // Declared type comes from the last command.
        assert_eq!(workflow.execution_type(), ExecutionType::Interaction);
        let (outcome, executed) = execute(&workflow);
        assert!(matches!(outcome, Outcome::InvalidRequest(_)));
        assert_eq!(executed, Some(ExecutionType::Transition));
        assert_eq!(workflow.execution_type(), ExecutionType::Interaction);
    }

    #[test]
    fn shared_workflow_reports_per_call_execution() {
        let gate = Arc::new(Counting {
            outcome: Some(Outcome::invalid("closed")),
            transition: true,
            ..Counting::default()
        });
        let aborting = Arc::new(AbortOnErrorWorkflow::new().with_command(Arc::new(NoopGetCommand)));
        let nested = NaiveWorkflow::new()
            .with_command(aborting.clone())
            .with_command(gate);

        let (_, first) = execute(&nested);
        assert_eq!(first, Some(ExecutionType::Transition));
        // The shared inner workflow carries nothing over from the outer run.
        let (outcome, second) = execute(aborting.as_ref());
        assert_eq!(outcome, Outcome::Success);
        assert_eq!(second, Some(ExecutionType::Interaction));
    }

    #[test]
    fn registry_resolves_builtins() {
        let registry = CommandRegistry::with_builtins();
        assert!(registry.contains(NOOP_GET));
        assert_eq!(
            registry.get(NOOP_POST).expect("noop").execution_type(),
            ExecutionType::Transition
        );
        assert!(matches!(
            registry.get("Missing"),
            Err(HyperstateError::Configuration(_))
        ));
    }

    #[test]
    fn noop_get_leaves_empty_resource() {
        let state = ResourceState::item("Customer", "customer", "/customers/{id}");
        let metadata = Metadata::new();
        let mut ctx = InteractionContext::new(
            StateKey(0),
            &state,
            &metadata,
            Parameters::new(),
            Parameters::new(),
        );
        assert_eq!(NoopGetCommand.execute(&mut ctx), Outcome::Success);
        assert_eq!(ctx.resource().map(|r| r.entity_name.as_str()), Some("Customer"));
    }
}
