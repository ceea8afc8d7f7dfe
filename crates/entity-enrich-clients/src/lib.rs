//! Trait boundary for every external collaborator the pipeline calls out to,
//! plus a minimal default `Scraper` and in-memory fakes for testing.
//!
//! The pipeline crate depends only on `Arc<dyn Trait>` from [`traits`],
//! never on a concrete HTTP client, so its own test suite never touches the
//! network.

pub mod default_scraper;
pub mod error;
pub mod fakes;
pub mod traits;

pub use error::{Error, Result};
