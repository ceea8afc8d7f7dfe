//! Builds the [`Collaborators`] bundle and supporting config/registry/question
//! set the subcommands share.
//!
//! Only [`Scraper`] has a real, network-backed default implementation in this
//! workspace. Every other collaborator (system-of-record, tracking, LLMs,
//! geocoding, loan records, profile lookups) is wired to an in-memory fake
//! here; a real deployment supplies its own implementations of those traits
//! and assembles its own `Collaborators` the same way.

use std::path::Path;
use std::sync::Arc;

use entity_enrich_clients::default_scraper::ReqwestScraper;
use entity_enrich_clients::fakes::{
    FakeCacheStore, FakeGeocoder, FakeLlmClient, FakeLoanRecordsClient, FakeMsaLookup, FakeProfileClient, FakeSorClient, FakeTrackingClient,
};
use entity_enrich_core::config::Config;
use entity_enrich_core::merge::NaicsReference;
use entity_enrich_core::model::Question;
use entity_enrich_core::registry::FieldRegistry;
use entity_enrich_pipeline::Collaborators;

pub fn load_config(path: Option<&Path>) -> anyhow::Result<Config> {
    Config::load(path).map_err(|e| anyhow::anyhow!("configuration error: {e}"))
}

pub fn build_collaborators() -> Collaborators {
    Collaborators {
        scraper: Arc::new(ReqwestScraper::new()),
        cache: Arc::new(FakeCacheStore::new()),
        haiku: Arc::new(FakeLlmClient::new()),
        sonnet: Arc::new(FakeLlmClient::new()),
        opus: Arc::new(FakeLlmClient::new()),
        sor: Arc::new(FakeSorClient::new()),
        tracking: Arc::new(FakeTrackingClient::new()),
        geocoder: Arc::new(FakeGeocoder::new()),
        msa_lookup: Arc::new(FakeMsaLookup::new()),
        loan_records: Arc::new(FakeLoanRecordsClient::new()),
        profile: Arc::new(FakeProfileClient::new()),
    }
}

pub fn registry() -> anyhow::Result<FieldRegistry> {
    entity_enrich_core::default_registry().map_err(|e| anyhow::anyhow!("configuration error: {e}"))
}

pub fn questions() -> Vec<Question> {
    entity_enrich_core::default_questions()
}

pub fn naics_reference() -> NaicsReference {
    NaicsReference::default()
}
