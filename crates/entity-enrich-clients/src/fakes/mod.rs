//! In-memory fakes for every collaborator trait, used by pipeline
//! integration tests so the test suite never makes a real network call.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use entity_enrich_core::model::CrawledPage;
use tokio::sync::Mutex;

use crate::error::{Error, Result};
use crate::traits::{
    BatchHandle, BatchProcessingStatus, BatchRequestItem, BatchResultItem, CacheStore, CrawlRequest, CrawlStatus,
    Geocoder, GeoPoint, LlmClient, LoanRecord, LoanRecordsClient, MessageRequest, MessageResponse, MsaLookup,
    ProfileClient, ProfileRecord, ScrapeResult, Scraper, SorClient, TrackingClient, TrackingProperty,
};

/// Pre-programmed, URL-keyed scraper. `scrape` on an unknown URL returns
/// `Error::NotFound` rather than panicking, matching how the real collaborator
/// would surface a failed fetch.
#[derive(Default)]
pub struct FakeScraper {
    pages: HashMap<String, ScrapeResult>,
}

impl FakeScraper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_page(mut self, url: impl Into<String>, result: ScrapeResult) -> Self {
        self.pages.insert(url.into(), result);
        self
    }
}

#[async_trait]
impl Scraper for FakeScraper {
    async fn scrape(&self, url: &str) -> Result<ScrapeResult> {
        self.pages.get(url).cloned().ok_or(Error::NotFound)
    }

    async fn crawl(&self, request: CrawlRequest<'_>) -> Result<String> {
        Ok(format!("fake-crawl:{}", request.url))
    }

    async fn crawl_status(&self, crawl_id: &str) -> Result<CrawlStatus> {
        let pages: Vec<CrawledPage> = self.pages.values().map(|r| r.page.clone()).collect();
        if crawl_id.starts_with("fake-crawl:") {
            Ok(CrawlStatus::Completed { pages })
        } else {
            Ok(CrawlStatus::Failed {
                reason: "unknown crawl id".to_string(),
            })
        }
    }
}

/// Scripted LLM client: answers keyed by `(model, user prompt)`. Records
/// every call so tests can assert on concurrency/escalation behavior.
pub struct FakeLlmClient {
    responses: HashMap<(String, String), MessageResponse>,
    calls: Mutex<Vec<MessageRequest>>,
    batch_items: Mutex<HashMap<String, Vec<BatchRequestItem>>>,
}

impl FakeLlmClient {
    pub fn new() -> Self {
        Self {
            responses: HashMap::new(),
            calls: Mutex::new(Vec::new()),
            batch_items: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_response(mut self, model: impl Into<String>, user_prompt: impl Into<String>, response: MessageResponse) -> Self {
        self.responses.insert((model.into(), user_prompt.into()), response);
        self
    }

    pub async fn call_count(&self) -> usize {
        self.calls.lock().await.len()
    }
}

impl Default for FakeLlmClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LlmClient for FakeLlmClient {
    async fn create_message(&self, request: MessageRequest) -> Result<MessageResponse> {
        let key = (request.model.clone(), request.user.clone());
        self.calls.lock().await.push(request);
        self.responses.get(&key).cloned().ok_or(Error::NotFound)
    }

    async fn create_batch(&self, items: Vec<BatchRequestItem>) -> Result<BatchHandle> {
        let id = format!("fake-batch-{}", self.batch_items.lock().await.len());
        self.batch_items.lock().await.insert(id.clone(), items);
        Ok(BatchHandle {
            id,
            processing_status: BatchProcessingStatus::Ended,
        })
    }

    async fn get_batch(&self, batch_id: &str) -> Result<BatchHandle> {
        if self.batch_items.lock().await.contains_key(batch_id) {
            Ok(BatchHandle {
                id: batch_id.to_string(),
                processing_status: BatchProcessingStatus::Ended,
            })
        } else {
            Err(Error::NotFound)
        }
    }

    async fn get_batch_results(&self, batch_id: &str) -> Result<Vec<BatchResultItem>> {
        let items = self.batch_items.lock().await;
        let Some(requests) = items.get(batch_id) else {
            return Err(Error::NotFound);
        };
        let mut results = Vec::new();
        for item in requests {
            let key = (item.params.model.clone(), item.params.user.clone());
            match self.responses.get(&key) {
                Some(response) => results.push(BatchResultItem {
                    custom_id: item.custom_id.clone(),
                    message: Some(response.clone()),
                    error: None,
                }),
                None => results.push(BatchResultItem {
                    custom_id: item.custom_id.clone(),
                    message: None,
                    error: Some("no scripted response".to_string()),
                }),
            }
        }
        Ok(results)
    }
}

/// In-memory system-of-record: one map for accounts keyed by generated ID,
/// one index from website to account ID, contacts nested under account ID.
#[derive(Default)]
pub struct FakeSorClient {
    inner: Mutex<FakeSorState>,
}

#[derive(Default)]
struct FakeSorState {
    accounts: HashMap<String, serde_json::Map<String, serde_json::Value>>,
    accounts_by_website: HashMap<String, String>,
    contacts: HashMap<String, Vec<(String, serde_json::Map<String, serde_json::Value>)>>,
    next_id: u64,
}

impl FakeSorClient {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_id(state: &mut FakeSorState, prefix: &str) -> String {
        state.next_id += 1;
        format!("{prefix}-{}", state.next_id)
    }
}

#[async_trait]
impl SorClient for FakeSorClient {
    async fn find_account_by_website(&self, website: &str) -> Result<Option<String>> {
        Ok(self.inner.lock().await.accounts_by_website.get(website).cloned())
    }

    async fn create_account(&self, fields: serde_json::Map<String, serde_json::Value>) -> Result<String> {
        let mut state = self.inner.lock().await;
        let id = Self::next_id(&mut state, "acc");
        if let Some(website) = fields.get("Website").and_then(|v| v.as_str()) {
            state.accounts_by_website.insert(website.to_string(), id.clone());
        }
        state.accounts.insert(id.clone(), fields);
        Ok(id)
    }

    async fn update_account(&self, id: &str, fields: serde_json::Map<String, serde_json::Value>) -> Result<()> {
        let mut state = self.inner.lock().await;
        let entry = state.accounts.get_mut(id).ok_or(Error::NotFound)?;
        entry.extend(fields);
        Ok(())
    }

    async fn bulk_create_accounts(
        &self,
        records: Vec<serde_json::Map<String, serde_json::Value>>,
    ) -> Result<Vec<crate::traits::BulkOutcome>> {
        let mut outcomes = Vec::with_capacity(records.len());
        for record in records {
            let id = self.create_account(record).await?;
            outcomes.push(crate::traits::BulkOutcome {
                success: true,
                id: Some(id),
                errors: Vec::new(),
            });
        }
        Ok(outcomes)
    }

    async fn bulk_update_accounts(
        &self,
        records: Vec<(String, serde_json::Map<String, serde_json::Value>)>,
    ) -> Result<Vec<crate::traits::BulkOutcome>> {
        let mut outcomes = Vec::with_capacity(records.len());
        for (id, fields) in records {
            match self.update_account(&id, fields).await {
                Ok(()) => outcomes.push(crate::traits::BulkOutcome {
                    success: true,
                    id: Some(id),
                    errors: Vec::new(),
                }),
                Err(e) => outcomes.push(crate::traits::BulkOutcome {
                    success: false,
                    id: Some(id),
                    errors: vec![e.to_string()],
                }),
            }
        }
        Ok(outcomes)
    }

    async fn find_contacts_by_account_id(&self, account_id: &str) -> Result<Vec<(String, serde_json::Map<String, serde_json::Value>)>> {
        Ok(self.inner.lock().await.contacts.get(account_id).cloned().unwrap_or_default())
    }

    async fn create_contact(&self, account_id: &str, fields: serde_json::Map<String, serde_json::Value>) -> Result<String> {
        let mut state = self.inner.lock().await;
        let id = Self::next_id(&mut state, "con");
        state.contacts.entry(account_id.to_string()).or_default().push((id.clone(), fields));
        Ok(id)
    }

    async fn update_contact(&self, contact_id: &str, fields: serde_json::Map<String, serde_json::Value>) -> Result<()> {
        let mut state = self.inner.lock().await;
        for contacts in state.contacts.values_mut() {
            if let Some((_, existing)) = contacts.iter_mut().find(|(id, _)| id == contact_id) {
                existing.extend(fields);
                return Ok(());
            }
        }
        Err(Error::NotFound)
    }
}

/// Tracking-record store keyed by page ID, recording every property update
/// so tests can assert on retry/inconsistency behavior.
#[derive(Default)]
pub struct FakeTrackingClient {
    pages: Mutex<HashMap<String, Vec<(String, String)>>>,
    fail_next: Mutex<u32>,
}

impl FakeTrackingClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` calls to `update_page` fail, to exercise the
    /// retry-once-then-log-inconsistency path.
    pub async fn fail_next_calls(&self, n: u32) {
        *self.fail_next.lock().await = n;
    }

    pub async fn snapshot(&self, page_id: &str) -> Vec<(String, String)> {
        self.pages.lock().await.get(page_id).cloned().unwrap_or_default()
    }
}

#[async_trait]
impl TrackingClient for FakeTrackingClient {
    async fn update_page(&self, page_id: &str, props: Vec<(String, TrackingProperty)>) -> Result<()> {
        {
            let mut fail_next = self.fail_next.lock().await;
            if *fail_next > 0 {
                *fail_next -= 1;
                return Err(Error::Http("simulated tracking failure".to_string()));
            }
        }
        let rendered: Vec<(String, String)> = props
            .into_iter()
            .map(|(k, v)| {
                let value = match v {
                    TrackingProperty::Status(s) => s,
                    TrackingProperty::Number(n) => n.to_string(),
                    TrackingProperty::Date(d) => d.to_rfc3339(),
                    TrackingProperty::RichText(s) => s,
                };
                (k, value)
            })
            .collect();
        self.pages.lock().await.insert(page_id.to_string(), rendered);
        Ok(())
    }
}

/// In-memory cache keyed by domain, honoring no real TTL expiry (tests
/// control time explicitly rather than sleeping).
#[derive(Default)]
pub struct FakeCacheStore {
    crawls: Mutex<HashMap<String, Vec<CrawledPage>>>,
    linkedin: Mutex<HashMap<String, Vec<u8>>>,
}

impl FakeCacheStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheStore for FakeCacheStore {
    async fn get_cached_crawl(&self, domain: &str) -> Result<Option<Vec<CrawledPage>>> {
        Ok(self.crawls.lock().await.get(domain).cloned())
    }

    async fn set_cached_crawl(&self, domain: &str, pages: &[CrawledPage], _ttl: std::time::Duration) -> Result<()> {
        self.crawls.lock().await.insert(domain.to_string(), pages.to_vec());
        Ok(())
    }

    async fn get_cached_linkedin(&self, domain: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.linkedin.lock().await.get(domain).cloned())
    }

    async fn set_cached_linkedin(&self, domain: &str, bytes: &[u8], _ttl: std::time::Duration) -> Result<()> {
        self.linkedin.lock().await.insert(domain.to_string(), bytes.to_vec());
        Ok(())
    }
}

/// Deterministic geocoder/MSA lookup pair keyed by address/point.
#[derive(Default)]
pub struct FakeGeocoder {
    points: HashMap<String, GeoPoint>,
}

impl FakeGeocoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_point(mut self, address: impl Into<String>, point: GeoPoint) -> Self {
        self.points.insert(address.into(), point);
        self
    }
}

#[async_trait]
impl Geocoder for FakeGeocoder {
    async fn geocode(&self, address: &str) -> Result<Option<GeoPoint>> {
        Ok(self.points.get(address).copied())
    }
}

#[derive(Default)]
pub struct FakeMsaLookup {
    msas: Vec<(GeoPoint, f64, String)>,
}

impl FakeMsaLookup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_msa(mut self, center: GeoPoint, radius_degrees: f64, name: impl Into<String>) -> Self {
        self.msas.push((center, radius_degrees, name.into()));
        self
    }
}

#[async_trait]
impl MsaLookup for FakeMsaLookup {
    async fn lookup_msa(&self, point: GeoPoint) -> Result<Option<String>> {
        for (center, radius, name) in &self.msas {
            let distance = ((point.lat - center.lat).powi(2) + (point.lon - center.lon).powi(2)).sqrt();
            if distance <= *radius {
                return Ok(Some(name.clone()));
            }
        }
        Ok(None)
    }
}

#[derive(Default)]
pub struct FakeLoanRecordsClient {
    records: HashMap<String, LoanRecord>,
}

impl FakeLoanRecordsClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_match(mut self, entity_name: impl Into<String>, record: LoanRecord) -> Self {
        self.records.insert(entity_name.into(), record);
        self
    }
}

#[async_trait]
impl LoanRecordsClient for FakeLoanRecordsClient {
    async fn find_best_match(&self, entity_name: &str, _address: Option<&str>) -> Result<Option<LoanRecord>> {
        Ok(self.records.get(entity_name).cloned())
    }
}

#[derive(Default)]
pub struct FakeProfileClient {
    profiles: HashMap<String, ProfileRecord>,
}

impl FakeProfileClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_profile(mut self, domain: impl Into<String>, profile: ProfileRecord) -> Self {
        self.profiles.insert(domain.into(), profile);
        self
    }
}

#[async_trait]
impl ProfileClient for FakeProfileClient {
    async fn lookup(&self, domain: &str) -> Result<Option<ProfileRecord>> {
        Ok(self.profiles.get(domain).cloned())
    }
}

/// Convenience bundle of every fake, already boxed into `Arc<dyn Trait>`,
/// for tests that need a full collaborator set.
pub struct FakeCollaborators {
    pub scraper: Arc<dyn Scraper>,
    pub llm: Arc<dyn LlmClient>,
    pub sor: Arc<dyn SorClient>,
    pub tracking: Arc<FakeTrackingClient>,
    pub cache: Arc<dyn CacheStore>,
    pub geocoder: Arc<dyn Geocoder>,
    pub msa: Arc<dyn MsaLookup>,
    pub loan_records: Arc<dyn LoanRecordsClient>,
    pub profile: Arc<dyn ProfileClient>,
}

impl Default for FakeCollaborators {
    fn default() -> Self {
        Self {
            scraper: Arc::new(FakeScraper::new()),
            llm: Arc::new(FakeLlmClient::new()),
            sor: Arc::new(FakeSorClient::new()),
            tracking: Arc::new(FakeTrackingClient::new()),
            cache: Arc::new(FakeCacheStore::new()),
            geocoder: Arc::new(FakeGeocoder::new()),
            msa: Arc::new(FakeMsaLookup::new()),
            loan_records: Arc::new(FakeLoanRecordsClient::new()),
            profile: Arc::new(FakeProfileClient::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use entity_enrich_core::model::MetadataSource;

    #[tokio::test]
    async fn fake_scraper_returns_not_found_for_unknown_url() {
        let scraper = FakeScraper::new();
        let result = scraper.scrape("https://unknown.example.com").await;
        assert!(matches!(result, Err(Error::NotFound)));
    }

    #[tokio::test]
    async fn fake_scraper_returns_programmed_page() {
        let page = ScrapeResult {
            page: CrawledPage {
                url: "https://acme.com".into(),
                title: "Acme".into(),
                markdown: "content".into(),
                status_code: 200,
                metadata: None,
            },
            source: MetadataSource::Regex,
        };
        let scraper = FakeScraper::new().with_page("https://acme.com", page);
        let result = scraper.scrape("https://acme.com").await.unwrap();
        assert_eq!(result.page.title, "Acme");
    }

    #[tokio::test]
    async fn fake_tracking_client_retries_then_succeeds() {
        let client = FakeTrackingClient::new();
        client.fail_next_calls(1).await;
        assert!(client.update_page("page-1", vec![]).await.is_err());
        assert!(client.update_page("page-1", vec![]).await.is_ok());
    }

    #[tokio::test]
    async fn fake_sor_client_dedups_by_website() {
        let client = FakeSorClient::new();
        let mut fields = serde_json::Map::new();
        fields.insert("Website".to_string(), serde_json::json!("https://acme.com"));
        let id = client.create_account(fields).await.unwrap();
        let found = client.find_account_by_website("https://acme.com").await.unwrap();
        assert_eq!(found, Some(id));
    }
}
