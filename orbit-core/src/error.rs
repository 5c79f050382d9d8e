use thiserror::Error;

/// Errors produced by pure value-type operations in `orbit-core`.
///
/// Transport and API-server failures live in `orbit-client::Error` and
/// `orbit-runtime::Error`, which wrap this one.
#[derive(Debug, Error)]
pub enum Error {
    #[error("object is missing required field {0:?}")]
    MissingField(&'static str),

    #[error("resource glob requires a concrete (non-wildcard) field for this operation: {0:?}")]
    NotConcrete(&'static str),

    #[error("subresource {subresource:?} requires a name")]
    SubresourceRequiresName { subresource: String },

    #[error("field path {0:?} does not resolve within the given document")]
    UnresolvablePath(FieldPathDisplay),

    #[error("failed to (de)serialize JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Wrapper so `FieldPath` (defined in `diff`) can appear in this error
/// without creating a dependency cycle between modules.
#[derive(Debug)]
pub struct FieldPathDisplay(pub Vec<String>);

impl std::fmt::Display for FieldPathDisplay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.join("."))
    }
}
