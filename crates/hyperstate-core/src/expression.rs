//! # Expression Evaluator
//!
//! Boolean guards attached to transitions.
//!
//! Two families:
//! - **Comparison**: `left OP right` with lexicographic string semantics.
//!   `"10 > 5"` is false because `"1" < "5"`; that is intended.
//! - **Probe**: resolve a target state in a derived context and test the
//!   resulting status.
//!
//! Evaluation never returns an error. Parse problems and missing
//! collaborators are logged and degrade to `false`.

use crate::context::InteractionContext;
use crate::graph::{ResourceGraph, StateRef};
use crate::handler::{ResolutionChain, ResolutionConfig, TransitionResolver};
use crate::primitives::{EXPRESSION_ALTERNATIVE_SEPARATOR, MAX_EXPRESSION_ALTERNATIVES};
use crate::template;
use crate::{HyperstateError, Outcome, Parameters, Status};
use std::collections::BTreeMap;

// =============================================================================
// OPERATORS
// =============================================================================

/// Comparison operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    StartsWith,
    EndsWith,
    Contains,
    LessOrEqual,
    GreaterOrEqual,
    NotEqual,
    Less,
    Greater,
    Equal,
}

impl Operator {
    /// Operators in match priority order; longer tokens precede their prefixes.
    pub const PRIORITY: [Operator; 9] = [
        Operator::StartsWith,
        Operator::EndsWith,
        Operator::Contains,
        Operator::LessOrEqual,
        Operator::GreaterOrEqual,
        Operator::NotEqual,
        Operator::Less,
        Operator::Greater,
        Operator::Equal,
    ];

    /// Source token.
    #[must_use]
    pub const fn token(self) -> &'static str {
        match self {
            Operator::StartsWith => "startsWith",
            Operator::EndsWith => "endsWith",
            Operator::Contains => "contains",
            Operator::LessOrEqual => "<=",
            Operator::GreaterOrEqual => ">=",
            Operator::NotEqual => "!=",
            Operator::Less => "<",
            Operator::Greater => ">",
            Operator::Equal => "=",
        }
    }

    /// Apply to two resolved operands.
    #[must_use]
    pub fn apply(self, left: &str, right: &str) -> bool {
        match self {
            Operator::StartsWith => left.starts_with(right),
            Operator::EndsWith => left.ends_with(right),
            Operator::Contains => left.contains(right),
            Operator::LessOrEqual => left <= right,
            Operator::GreaterOrEqual => left >= right,
            Operator::NotEqual => left != right,
            Operator::Less => left < right,
            Operator::Greater => left > right,
            Operator::Equal => left == right,
        }
    }
}

/// Byte offset of `needle` in `haystack`, ignoring quoted regions and
/// `{placeholder}` spans.
fn find_unquoted(haystack: &str, needle: &str) -> Option<usize> {
    let mut closer: Option<char> = None;
    for (i, c) in haystack.char_indices() {
        match closer {
            Some(end) if c == end => closer = None,
            Some(_) => {}
            None if c == '\'' || c == '"' => closer = Some(c),
            None if c == '{' && haystack[i..].contains('}') => closer = Some('}'),
            None if haystack[i..].starts_with(needle) => return Some(i),
            None => {}
        }
    }
    None
}

// =============================================================================
// COMPARISON EXPRESSIONS
// =============================================================================

/// A parsed `left OP right` clause.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Comparison {
    pub left: String,
    pub operator: Operator,
    pub right: String,
}

impl Comparison {
    /// Parse one clause. The first operator in priority order that occurs
    /// outside quotes splits the clause.
    pub fn parse(source: &str) -> Result<Self, HyperstateError> {
        let invalid = |reason: &str| HyperstateError::InvalidExpression {
            expression: source.to_string(),
            reason: reason.to_string(),
        };

        let (operator, at) = Operator::PRIORITY
            .iter()
            .find_map(|op| find_unquoted(source, op.token()).map(|at| (*op, at)))
            .ok_or_else(|| invalid("no operator"))?;

        let left = source[..at].trim();
        let right = source[at + operator.token().len()..].trim();
        if left.is_empty() || right.is_empty() {
            return Err(invalid("missing operand"));
        }
        Ok(Self {
            left: left.to_string(),
            operator,
            right: right.to_string(),
        })
    }

    /// Resolve both operands and compare.
    #[must_use]
    pub fn test(
        &self,
        ctx: &InteractionContext<'_>,
        properties: &BTreeMap<String, String>,
    ) -> bool {
        let left = resolve_operand(&self.left, ctx, properties);
        let right = resolve_operand(&self.right, ctx, properties);
        self.operator.apply(&left, &right)
    }
}

/// Resolve an operand to its string value.
///
/// - `'literal'` or `"literal"`: unwrapped and trimmed
/// - `{name}`: path parameter, then query parameter, then transition
///   property; the bare name if none is bound
/// - anything else: the trimmed text
fn resolve_operand(
    raw: &str,
    ctx: &InteractionContext<'_>,
    properties: &BTreeMap<String, String>,
) -> String {
    let raw = raw.trim();
    let quoted = raw.len() >= 2
        && ((raw.starts_with('\'') && raw.ends_with('\''))
            || (raw.starts_with('"') && raw.ends_with('"')));
    if quoted {
        return raw[1..raw.len() - 1].trim().to_string();
    }
    if let Some(name) = raw.strip_prefix('{').and_then(|r| r.strip_suffix('}')) {
        return ctx
            .path_parameters()
            .first(name)
            .or_else(|| ctx.query_parameters().first(name))
            .or_else(|| properties.get(name).map(String::as_str))
            .unwrap_or(name)
            .to_string();
    }
    raw.to_string()
}

/// One or more comparison clauses separated by ` | `.
///
/// The raw source is kept; clauses are parsed at evaluation so a malformed
/// guard only ever fails its own transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComparisonExpression {
    source: String,
}

impl ComparisonExpression {
    /// Wrap a raw expression.
    #[must_use]
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
        }
    }

    /// Raw source.
    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Evaluate alternatives in order; the first true one wins.
    pub fn evaluate(
        &self,
        ctx: &InteractionContext<'_>,
        properties: &BTreeMap<String, String>,
    ) -> Outcome {
        let alternatives: Vec<&str> = self.source.split(EXPRESSION_ALTERNATIVE_SEPARATOR).collect();
        if alternatives.len() > MAX_EXPRESSION_ALTERNATIVES {
            tracing::warn!(
                expression = %self.source,
                count = alternatives.len(),
                "too many alternatives"
            );
            return Outcome::failure("too many alternatives");
        }

        for alternative in alternatives {
            match Comparison::parse(alternative) {
                Ok(comparison) if comparison.test(ctx, properties) => return Outcome::Success,
                Ok(_) => {}
                Err(e) => tracing::warn!(error = %e, "expression alternative ignored"),
            }
        }
        Outcome::failure(format!("'{}' evaluated false", self.source))
    }
}

// =============================================================================
// RESOURCE PROBES
// =============================================================================

/// Status test applied to a probe's resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeFunction {
    /// True when the target resolves with 200.
    Ok,
    /// True when the target does not resolve with 200.
    NotFound,
}

/// Guard that resolves another state to test whether it currently exists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceProbe {
    pub target: StateRef,
    pub function: ProbeFunction,
}

impl ResourceProbe {
    #[must_use]
    pub fn new(target: StateRef, function: ProbeFunction) -> Self {
        Self { target, function }
    }

    /// Resolve the target in a derived context and test its status.
    ///
    /// The target template is bound from the transition properties. The
    /// outer context is only read.
    #[must_use]
    pub fn evaluate<'g>(
        &self,
        scope: &EvaluationScope<'_, 'g>,
        ctx: &InteractionContext<'g>,
    ) -> bool {
        let Some(resolver) = scope.resolver else {
            tracing::debug!(target = ?self.target, "probe without resolver evaluates false");
            return false;
        };
        let (key, state) = match scope
            .graph
            .resolve(&self.target)
            .and_then(|key| scope.graph.require_state(key).map(|s| (key, s)))
        {
            Ok(found) => found,
            Err(e) => {
                tracing::warn!(error = %e, "probe target unavailable");
                return false;
            }
        };
        let path = match template::bind(state.path(), scope.properties) {
            Ok(path) => path,
            Err(missing) => {
                tracing::debug!(state = %state.id(), missing = %missing, "probe target unbound");
                return false;
            }
        };
        let Some(chain) = scope.chain.deeper() else {
            tracing::debug!(state = %state.id(), "probe exceeds resolution depth");
            return false;
        };

        let path_parameters = template::match_path(state.path(), &path).unwrap_or_default();
        let mut probe_ctx = ctx.derive(key, state, path_parameters, Parameters::new());
        let resolution = resolver.resolve(
            scope.graph,
            &mut probe_ctx,
            &ResolutionConfig::probe(),
            &chain,
        );

        match self.function {
            ProbeFunction::Ok => resolution.status == Status::OK,
            ProbeFunction::NotFound => resolution.status != Status::OK,
        }
    }
}

// =============================================================================
// EXPRESSIONS
// =============================================================================

/// Collaborators available while evaluating a guard.
#[derive(Clone, Copy)]
pub struct EvaluationScope<'a, 'g> {
    /// The frozen graph.
    pub graph: &'g ResourceGraph,
    /// Resolver used by probes; probes evaluate false without one.
    pub resolver: Option<&'a dyn TransitionResolver>,
    /// Transition properties of the transition being guarded.
    pub properties: &'a BTreeMap<String, String>,
    /// Current embedding chain.
    pub chain: &'a ResolutionChain,
}

/// A transition guard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expression {
    Comparison(ComparisonExpression),
    Probe(ResourceProbe),
    /// Conjunction; true when every member is true.
    All(Vec<Expression>),
}

impl Expression {
    /// A comparison guard from raw source.
    #[must_use]
    pub fn comparison(source: impl Into<String>) -> Self {
        Self::Comparison(ComparisonExpression::new(source))
    }

    /// A probe guard.
    #[must_use]
    pub fn probe(target: StateRef, function: ProbeFunction) -> Self {
        Self::Probe(ResourceProbe::new(target, function))
    }

    /// Evaluate; never fails.
    #[must_use]
    pub fn evaluate<'g>(&self, scope: &EvaluationScope<'_, 'g>, ctx: &InteractionContext<'g>) -> bool {
        match self {
            Expression::Comparison(c) => c.evaluate(ctx, scope.properties).is_success(),
            Expression::Probe(p) => p.evaluate(scope, ctx),
            Expression::All(members) => members.iter().all(|m| m.evaluate(scope, ctx)),
        }
    }

    /// State references named by probes, for build-time validation.
    #[must_use]
    pub fn state_refs(&self) -> Vec<&StateRef> {
        match self {
            Expression::Comparison(_) => Vec::new(),
            Expression::Probe(p) => vec![&p.target],
            Expression::All(members) => members.iter().flat_map(Expression::state_refs).collect(),
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
