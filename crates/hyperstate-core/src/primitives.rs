//! # Engine Primitives
//!
//! Hardcoded limits and well-known names for the Hyperstate engine.
//!
//! These constants are compiled into the binary and are immutable at runtime.
//! Anything a deployment should tune lives in `EngineConfig` instead.

/// Path parameter consulted first when resolving a request's primary id.
pub const DEFAULT_ID_PATH_ELEMENT: &str = "id";

/// Default maximum nesting depth for embedded resources and AUTO chains.
///
/// - Depth 0 is the request state itself.
/// - Every embedded sub-resource or followed AUTO transition adds one level.
pub const MAX_EMBED_DEPTH: usize = 4;

/// Hard ceiling for a configured embed depth.
///
/// Configurations asking for more are clamped to this value.
pub const MAX_EMBED_DEPTH_CEILING: usize = 16;

/// Maximum number of ` | ` separated alternatives in one comparison expression.
pub const MAX_EXPRESSION_ALTERNATIVES: usize = 32;

/// Separator between alternative comparison expressions.
pub const EXPRESSION_ALTERNATIVE_SEPARATOR: &str = " | ";

/// Maximum number of `{variable}` placeholders in a path template.
pub const MAX_TEMPLATE_VARIABLES: usize = 32;

/// Maximum number of members a FOR_EACH transition fans out over.
///
/// Members beyond this bound get no per-member links.
pub const MAX_FOR_EACH_MEMBERS: usize = 10_000;

/// Number of independently locked shards in the response caches.
pub const CACHE_SHARDS: usize = 16;

/// Relation rendered for the link to the state being returned.
pub const SELF_RELATION: &str = "self";

/// Default relation for links to item states.
pub const ITEM_RELATION: &str = "item";

/// Default relation for links to collection states.
pub const COLLECTION_RELATION: &str = "collection";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_depth_within_ceiling() {
        assert_eq!(MAX_EMBED_DEPTH.min(MAX_EMBED_DEPTH_CEILING), MAX_EMBED_DEPTH);
    }

    #[test]
    fn separator_is_padded_pipe() {
        assert_eq!(EXPRESSION_ALTERNATIVE_SEPARATOR, " | ");
    }
}
