//! Bundle of every external collaborator the engine depends on, each behind
//! its trait object so a real deployment and a fake-backed test share the
//! same orchestration code.

use std::sync::Arc;

use entity_enrich_clients::traits::{CacheStore, Geocoder, LlmClient, LoanRecordsClient, MsaLookup, ProfileClient, Scraper, SorClient, TrackingClient};

#[derive(Clone)]
pub struct Collaborators {
    pub scraper: Arc<dyn Scraper>,
    pub cache: Arc<dyn CacheStore>,
    pub haiku: Arc<dyn LlmClient>,
    pub sonnet: Arc<dyn LlmClient>,
    pub opus: Arc<dyn LlmClient>,
    pub sor: Arc<dyn SorClient>,
    pub tracking: Arc<dyn TrackingClient>,
    pub geocoder: Arc<dyn Geocoder>,
    pub msa_lookup: Arc<dyn MsaLookup>,
    pub loan_records: Arc<dyn LoanRecordsClient>,
    pub profile: Arc<dyn ProfileClient>,
}
