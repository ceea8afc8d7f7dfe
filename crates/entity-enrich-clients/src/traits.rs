//! Every external collaborator expressed as an `#[async_trait]` trait so the
//! pipeline crate depends only on `Arc<dyn Trait>`, never a concrete HTTP
//! implementation. Mirrors the shared-trait-over-provider-crates pattern
//! (`ChatModel`, `Tool`) used for each collaborator kind in this corpus.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use entity_enrich_core::model::{CrawledPage, MetadataSource};

use crate::error::Result;

/// One page fetched during crawl, tagged with how it was produced.
#[derive(Debug, Clone)]
pub struct ScrapeResult {
    pub page: CrawledPage,
    pub source: MetadataSource,
}

/// Crawl status returned while polling an asynchronous multi-page crawl.
#[derive(Debug, Clone)]
pub enum CrawlStatus {
    Pending,
    Running { pages_so_far: u32 },
    Completed { pages: Vec<CrawledPage> },
    Failed { reason: String },
}

#[derive(Debug, Clone, Copy)]
pub struct CrawlRequest<'a> {
    pub url: &'a str,
    pub max_depth: u32,
    pub limit: u32,
}

#[async_trait]
pub trait Scraper: Send + Sync {
    async fn scrape(&self, url: &str) -> Result<ScrapeResult>;
    async fn crawl(&self, request: CrawlRequest<'_>) -> Result<String>;
    async fn crawl_status(&self, crawl_id: &str) -> Result<CrawlStatus>;
}

/// Token accounting for a single LLM call, used for `RunMetrics` and cost
/// estimation.
#[derive(Debug, Clone, Copy, Default)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_creation_input_tokens: u64,
    pub cache_read_input_tokens: u64,
}

#[derive(Debug, Clone)]
pub struct MessageRequest {
    pub model: String,
    pub system: Option<String>,
    pub user: String,
    pub max_tokens: u32,
    /// Marks the system block as cacheable with the given TTL; `None` means
    /// this request does not participate in prompt caching.
    pub cache_ttl: Option<Duration>,
}

#[derive(Debug, Clone)]
pub struct MessageResponse {
    pub text: String,
    pub usage: Usage,
}

#[derive(Debug, Clone)]
pub struct BatchRequestItem {
    pub custom_id: String,
    pub params: MessageRequest,
}

#[derive(Debug, Clone)]
pub struct BatchHandle {
    pub id: String,
    pub processing_status: BatchProcessingStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchProcessingStatus {
    InProgress,
    Ended,
    Canceling,
}

#[derive(Debug, Clone)]
pub struct BatchResultItem {
    pub custom_id: String,
    pub message: Option<MessageResponse>,
    pub error: Option<String>,
}

#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn create_message(&self, request: MessageRequest) -> Result<MessageResponse>;
    async fn create_batch(&self, items: Vec<BatchRequestItem>) -> Result<BatchHandle>;
    async fn get_batch(&self, batch_id: &str) -> Result<BatchHandle>;
    async fn get_batch_results(&self, batch_id: &str) -> Result<Vec<BatchResultItem>>;
}

/// Bulk operation outcome for one record.
#[derive(Debug, Clone)]
pub struct BulkOutcome {
    pub success: bool,
    pub id: Option<String>,
    pub errors: Vec<String>,
}

#[async_trait]
pub trait SorClient: Send + Sync {
    async fn find_account_by_website(&self, website: &str) -> Result<Option<String>>;
    async fn create_account(&self, fields: serde_json::Map<String, serde_json::Value>) -> Result<String>;
    async fn update_account(&self, id: &str, fields: serde_json::Map<String, serde_json::Value>) -> Result<()>;
    async fn bulk_create_accounts(
        &self,
        records: Vec<serde_json::Map<String, serde_json::Value>>,
    ) -> Result<Vec<BulkOutcome>>;
    async fn bulk_update_accounts(&self, records: Vec<(String, serde_json::Map<String, serde_json::Value>)>) -> Result<Vec<BulkOutcome>>;
    async fn find_contacts_by_account_id(&self, account_id: &str) -> Result<Vec<(String, serde_json::Map<String, serde_json::Value>)>>;
    async fn create_contact(&self, account_id: &str, fields: serde_json::Map<String, serde_json::Value>) -> Result<String>;
    async fn update_contact(&self, contact_id: &str, fields: serde_json::Map<String, serde_json::Value>) -> Result<()>;
}

/// Typed tracking-record property update (status/number/date/rich-text).
#[derive(Debug, Clone)]
pub enum TrackingProperty {
    Status(String),
    Number(f64),
    Date(DateTime<Utc>),
    RichText(String),
}

#[async_trait]
pub trait TrackingClient: Send + Sync {
    async fn update_page(&self, page_id: &str, props: Vec<(String, TrackingProperty)>) -> Result<()>;
}

#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get_cached_crawl(&self, domain: &str) -> Result<Option<Vec<CrawledPage>>>;
    async fn set_cached_crawl(&self, domain: &str, pages: &[CrawledPage], ttl: Duration) -> Result<()>;
    async fn get_cached_linkedin(&self, domain: &str) -> Result<Option<Vec<u8>>>;
    async fn set_cached_linkedin(&self, domain: &str, bytes: &[u8], ttl: Duration) -> Result<()>;
}

#[derive(Debug, Clone, Copy)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

#[async_trait]
pub trait Geocoder: Send + Sync {
    async fn geocode(&self, address: &str) -> Result<Option<GeoPoint>>;
}

#[async_trait]
pub trait MsaLookup: Send + Sync {
    async fn lookup_msa(&self, point: GeoPoint) -> Result<Option<String>>;
}

#[derive(Debug, Clone)]
pub struct LoanRecord {
    pub match_score: f64,
    pub loan_amount: f64,
    pub jobs_reported: i64,
    pub approval_date: DateTime<Utc>,
}

#[async_trait]
pub trait LoanRecordsClient: Send + Sync {
    async fn find_best_match(&self, entity_name: &str, address: Option<&str>) -> Result<Option<LoanRecord>>;
}

#[derive(Debug, Clone)]
pub struct ProfileRecord {
    pub employee_range: Option<String>,
    pub raw: serde_json::Value,
}

#[async_trait]
pub trait ProfileClient: Send + Sync {
    async fn lookup(&self, domain: &str) -> Result<Option<ProfileRecord>>;
}
