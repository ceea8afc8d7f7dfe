//! Error types for phase orchestration.

use thiserror::Error;

/// Only genuinely fatal-phase failures are returned as `Err` out of a phase
/// function; everything else (recoverable-item, validation, cache) is folded
/// into the phase's own return value and logged.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error(transparent)]
    Core(#[from] entity_enrich_core::Error),

    #[error(transparent)]
    Client(#[from] entity_enrich_clients::Error),

    #[error("site unreachable: {0}")]
    SiteUnreachable(String),

    #[error("batch submission failed: {0}")]
    BatchSubmission(String),

    #[error("batch polling exhausted without reaching a terminal status: {0}")]
    BatchTimedOut(String),

    #[error("phase cancelled")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, Error>;
