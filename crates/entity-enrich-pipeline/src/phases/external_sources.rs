//! Phase 1B: search & scrape accreditation bureau, registry and mapping
//! pages; dedupe by content hash and tag with the external page's title
//! prefix so Phase 2 classification short-circuits on them.

use std::collections::HashSet;
use std::sync::Arc;

use entity_enrich_clients::traits::Scraper;
use entity_enrich_core::model::{ClassifiedPage, CrawledPage, PageType};
use tracing::warn;

/// One external-source lookup: a URL to scrape plus the page type it should
/// be tagged with once fetched.
pub struct ExternalSourceQuery {
    pub url: String,
    pub page_type: PageType,
}

/// Scrape each external-source query, dedupe by markdown content, and return
/// each surviving page pre-classified and title-prefixed as its source type.
pub async fn fetch_external_sources(scraper: &Arc<dyn Scraper>, queries: Vec<ExternalSourceQuery>) -> Vec<ClassifiedPage> {
    let mut seen_content = HashSet::new();
    let mut pages = Vec::new();

    for query in queries {
        let Ok(result) = scraper.scrape(&query.url).await else {
            warn!(url = %query.url, "external source scrape failed, skipping");
            continue;
        };
        let trimmed = result.page.markdown.trim().to_string();
        if !seen_content.insert(trimmed) {
            continue;
        }

        let prefix = query.page_type.title_prefix().unwrap_or_default();
        let mut page: CrawledPage = result.page;
        if !page.title.starts_with(prefix) {
            page.title = format!("{prefix}{}", page.title);
        }

        pages.push(ClassifiedPage {
            page,
            page_type: query.page_type,
            confidence: 1.0,
        });
    }

    pages
}

#[cfg(test)]
mod tests {
    use super::*;
    use entity_enrich_clients::fakes::FakeScraper;
    use entity_enrich_clients::traits::ScrapeResult;
    use entity_enrich_core::model::MetadataSource;

    fn scrape_result(url: &str, markdown: &str) -> ScrapeResult {
        ScrapeResult {
            page: CrawledPage {
                url: url.to_string(),
                title: "BBB Profile".to_string(),
                markdown: markdown.to_string(),
                status_code: 200,
                metadata: None,
            },
            source: MetadataSource::Regex,
        }
    }

    #[tokio::test]
    async fn tags_with_title_prefix() {
        let scraper: Arc<dyn Scraper> = Arc::new(FakeScraper::new().with_page("https://bbb.org/acme", scrape_result("https://bbb.org/acme", "A+ rated")));
        let pages = fetch_external_sources(
            &scraper,
            vec![ExternalSourceQuery { url: "https://bbb.org/acme".to_string(), page_type: PageType::Bbb }],
        )
        .await;
        assert_eq!(pages.len(), 1);
        assert!(pages[0].page.title.starts_with("[bbb] "));
    }

    #[tokio::test]
    async fn dedupes_identical_markdown() {
        let scraper: Arc<dyn Scraper> = Arc::new(
            FakeScraper::new()
                .with_page("https://bbb.org/a", scrape_result("https://bbb.org/a", "same content"))
                .with_page("https://bbb.org/b", scrape_result("https://bbb.org/b", "same content")),
        );
        let pages = fetch_external_sources(
            &scraper,
            vec![
                ExternalSourceQuery { url: "https://bbb.org/a".to_string(), page_type: PageType::Bbb },
                ExternalSourceQuery { url: "https://bbb.org/b".to_string(), page_type: PageType::Bbb },
            ],
        )
        .await;
        assert_eq!(pages.len(), 1);
    }

    #[tokio::test]
    async fn scrape_failure_is_skipped_not_fatal() {
        let scraper: Arc<dyn Scraper> = Arc::new(FakeScraper::new());
        let pages = fetch_external_sources(
            &scraper,
            vec![ExternalSourceQuery { url: "https://unknown.example.com".to_string(), page_type: PageType::Sos }],
        )
        .await;
        assert!(pages.is_empty());
    }
}
