//! Error type for the calorie resolver.

/// Errors raised while resolving a calorie plan.
///
/// Only `InvalidInput` ever reaches a caller of `CalorieResolver::resolve`.
/// `Api` and `Parsing` describe why the generative path was abandoned and
/// are logged before the resolver falls back to the formula.
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("Invalid profile: {}", fields.join(", "))]
    InvalidInput { fields: Vec<String> },

    #[error("Generative endpoint failed: {0}")]
    Api(String),

    #[error("Could not parse generative response: {0}")]
    Parsing(String),
}

impl ResolveError {
    /// Stable machine-readable tag for the error category.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidInput { .. } => "INVALID_INPUT",
            Self::Api(_) => "API_ERROR",
            Self::Parsing(_) => "PARSING_ERROR",
        }
    }
}
