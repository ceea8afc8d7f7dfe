//! Error types for the entity enrichment data model

use thiserror::Error;

/// Errors raised while building, validating, or scoring enrichment data
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// A field key referenced by a question is not present in the registry
    #[error("unknown field key: {0}")]
    UnknownFieldKey(String),

    /// A field key appears more than once in the registry
    #[error("duplicate field key in registry: {0}")]
    DuplicateFieldKey(String),

    /// A question id collided with another question in the same run
    #[error("duplicate question id: {0}")]
    DuplicateQuestionId(String),

    /// Configuration failed to parse or violated its own constraints
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// The scoring weights could not be normalized (handled as a warning upstream,
    /// this variant exists for callers that want to surface it explicitly)
    #[error("all quality weights are zero")]
    AllWeightsZero,
}

/// Result type for the core crate
pub type Result<T> = std::result::Result<T, Error>;
