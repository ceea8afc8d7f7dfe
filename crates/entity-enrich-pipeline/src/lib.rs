//! Phase orchestration for the entity enrichment engine: crawl, classify,
//! route, tiered extraction, merge/score, geocode, and gate, wired together
//! behind a single [`engine::run`] entry point.

pub mod collaborators;
pub mod concurrency;
pub mod engine;
pub mod error;
pub mod phases;
pub mod result;

pub use collaborators::Collaborators;
pub use engine::{finalize_batch, run, run_deferred, run_until_score};
pub use error::{Error, Result};
pub use result::{EnrichmentResult, RunMetrics};
