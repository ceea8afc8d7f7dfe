//! Phase 1A: fetch pages for the entity's primary domain, with durable caching.

use std::sync::Arc;
use std::time::Duration;

use entity_enrich_clients::traits::{CacheStore, CrawlRequest, CrawlStatus, Scraper};
use entity_enrich_core::model::{normalize_domain, CrawledPage};
use tracing::{info, info_span, warn, Instrument};

use crate::error::{Error, Result};

const DEFAULT_MAX_DEPTH: u32 = 2;
const DEFAULT_MAX_PAGES: u32 = 50;
const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(24 * 3600);

#[derive(Debug, Clone, Copy)]
pub struct CrawlOptions {
    pub max_depth: u32,
    pub max_pages: u32,
    pub cache_ttl: Duration,
}

impl Default for CrawlOptions {
    fn default() -> Self {
        Self {
            max_depth: DEFAULT_MAX_DEPTH,
            max_pages: DEFAULT_MAX_PAGES,
            cache_ttl: DEFAULT_CACHE_TTL,
        }
    }
}

pub struct CrawlResult {
    pub pages: Vec<CrawledPage>,
    pub from_cache: bool,
}

/// Cache read -> reachability probe -> crawl submission -> poll -> cache write.
/// Cache read/write failures are logged and treated as non-fatal.
pub async fn crawl(
    scraper: &Arc<dyn Scraper>,
    cache: &Arc<dyn CacheStore>,
    primary_url: &str,
    options: CrawlOptions,
) -> Result<CrawlResult> {
    let span = info_span!("phase.crawl", entity = %primary_url);
    async move {
        let domain = normalize_domain(primary_url);

        match cache.get_cached_crawl(&domain).await {
            Ok(Some(pages)) => {
                info!(pages = pages.len(), "crawl cache hit");
                return Ok(CrawlResult { pages, from_cache: true });
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, "crawl cache read failed, treating as miss"),
        }

        if scraper.scrape(primary_url).await.is_err() {
            return Err(Error::SiteUnreachable(primary_url.to_string()));
        }

        let crawl_id = scraper
            .crawl(CrawlRequest {
                url: primary_url,
                max_depth: options.max_depth,
                limit: options.max_pages,
            })
            .await
            .map_err(|e| Error::SiteUnreachable(format!("{primary_url}: {e}")))?;

        let pages = poll_until_complete(scraper, &crawl_id).await?;

        if let Err(e) = cache.set_cached_crawl(&domain, &pages, options.cache_ttl).await {
            warn!(error = %e, "crawl cache write failed, continuing without cache");
        }

        Ok(CrawlResult { pages, from_cache: false })
    }
    .instrument(span)
    .await
}

async fn poll_until_complete(scraper: &Arc<dyn Scraper>, crawl_id: &str) -> Result<Vec<CrawledPage>> {
    const MAX_POLLS: u32 = 30;
    let mut delay = Duration::from_millis(500);
    for _ in 0..MAX_POLLS {
        match scraper.crawl_status(crawl_id).await {
            Ok(CrawlStatus::Completed { pages }) => return Ok(pages),
            Ok(CrawlStatus::Failed { reason }) => return Err(Error::SiteUnreachable(reason)),
            Ok(CrawlStatus::Pending | CrawlStatus::Running { .. }) => {
                tokio::time::sleep(delay).await;
                delay = (delay * 2).min(Duration::from_secs(10));
            }
            Err(e) => return Err(Error::SiteUnreachable(e.to_string())),
        }
    }
    Err(Error::SiteUnreachable(format!("crawl {crawl_id} never reached a terminal status")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use entity_enrich_clients::fakes::{FakeCacheStore, FakeScraper};
    use entity_enrich_clients::traits::ScrapeResult;
    use entity_enrich_core::model::MetadataSource;

    fn page(url: &str) -> CrawledPage {
        CrawledPage {
            url: url.to_string(),
            title: "Acme".into(),
            markdown: "content".into(),
            status_code: 200,
            metadata: None,
        }
    }

    #[tokio::test]
    async fn returns_cached_pages_on_hit() {
        let cache: Arc<dyn CacheStore> = Arc::new(FakeCacheStore::new());
        cache.set_cached_crawl("acme.com", &[page("https://acme.com")], Duration::from_secs(60)).await.unwrap();
        let scraper: Arc<dyn Scraper> = Arc::new(FakeScraper::new());

        let result = crawl(&scraper, &cache, "https://acme.com", CrawlOptions::default()).await.unwrap();
        assert!(result.from_cache);
        assert_eq!(result.pages.len(), 1);
    }

    #[tokio::test]
    async fn unreachable_site_is_fatal() {
        let cache: Arc<dyn CacheStore> = Arc::new(FakeCacheStore::new());
        let scraper: Arc<dyn Scraper> = Arc::new(FakeScraper::new());
        let result = crawl(&scraper, &cache, "https://unknown.example.com", CrawlOptions::default()).await;
        assert!(matches!(result, Err(Error::SiteUnreachable(_))));
    }

    #[tokio::test]
    async fn fresh_crawl_writes_cache() {
        let cache: Arc<dyn CacheStore> = Arc::new(FakeCacheStore::new());
        let scraper: Arc<dyn Scraper> = Arc::new(FakeScraper::new().with_page(
            "https://acme.com",
            ScrapeResult {
                page: page("https://acme.com"),
                source: MetadataSource::Regex,
            },
        ));
        let result = crawl(&scraper, &cache, "https://acme.com", CrawlOptions::default()).await.unwrap();
        assert!(!result.from_cache);
        assert!(cache.get_cached_crawl("acme.com").await.unwrap().is_some());
    }
}
