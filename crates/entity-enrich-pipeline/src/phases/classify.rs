//! Phase 2: assign a single PageType to every CrawledPage.
//!
//! Precedence is a short-circuit chain: title prefix, then URL first-path
//! segment, then a tiny-page shortcut, then LLM classification for whatever
//! is left (deduplicated by content hash).

use std::collections::HashMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use entity_enrich_clients::traits::{LlmClient, MessageRequest};
use entity_enrich_core::model::{ClassifiedPage, CrawledPage, PageType};
use tracing::{info_span, warn, Instrument};

use crate::concurrency::{dispatch_llm, should_run_direct, CancellationToken, MAX_DIRECT_CONCURRENCY};
use crate::result::RunMetrics;

const TINY_PAGE_THRESHOLD: usize = 100;

fn url_pattern_type(url: &str) -> Option<PageType> {
    let path = url.split("://").nth(1).unwrap_or(url);
    let first_segment = path.splitn(2, '/').nth(1).unwrap_or("").split(['?', '#']).next().unwrap_or("").trim_matches('/');
    if first_segment.is_empty() {
        return Some(PageType::Homepage);
    }
    let candidate = first_segment.split('/').next().unwrap_or("").to_ascii_lowercase();
    match candidate.as_str() {
        "about" | "about-us" => Some(PageType::About),
        "services" => Some(PageType::Services),
        "products" => Some(PageType::Products),
        "pricing" => Some(PageType::Pricing),
        "careers" | "jobs" => Some(PageType::Careers),
        "contact" | "contact-us" => Some(PageType::Contact),
        "team" | "our-team" => Some(PageType::Team),
        "blog" => Some(PageType::Blog),
        "news" => Some(PageType::News),
        "faq" | "faqs" => Some(PageType::Faq),
        "testimonials" | "reviews" => Some(PageType::Testimonials),
        "case-studies" | "case_studies" => Some(PageType::CaseStudies),
        "partners" => Some(PageType::Partners),
        "legal" | "privacy" | "terms" => Some(PageType::Legal),
        "investors" => Some(PageType::Investors),
        _ => None,
    }
}

fn content_hash(markdown: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    markdown.trim().hash(&mut hasher);
    hasher.finish()
}

fn classify_by_precedence(page: &CrawledPage) -> Option<ClassifiedPage> {
    for page_type in PageType::EXTERNAL {
        if let Some(prefix) = page_type.title_prefix() {
            if page.title.starts_with(prefix) {
                return Some(ClassifiedPage {
                    page: page.clone(),
                    page_type,
                    confidence: 1.0,
                });
            }
        }
    }

    if let Some(page_type) = url_pattern_type(&page.url) {
        return Some(ClassifiedPage {
            page: page.clone(),
            page_type,
            confidence: 0.9,
        });
    }

    if page.markdown.trim().len() < TINY_PAGE_THRESHOLD {
        return Some(ClassifiedPage {
            page: page.clone(),
            page_type: PageType::Other,
            confidence: 1.0,
        });
    }

    None
}

/// Classify every page. The remaining (post-precedence) unique pages are
/// classified either with concurrent direct calls or submitted to the batch
/// API, per [`should_run_direct`] against `threshold`/`no_batch`.
pub async fn classify(
    llm: &Arc<dyn LlmClient>,
    model: &str,
    pages: Vec<CrawledPage>,
    threshold: usize,
    no_batch: bool,
    cancel: CancellationToken,
    metrics: &mut RunMetrics,
) -> Vec<ClassifiedPage> {
    let span = info_span!("phase.classify", pages = pages.len());
    async move {
        let mut classified = Vec::with_capacity(pages.len());
        let mut remaining = Vec::new();

        for page in pages {
            match classify_by_precedence(&page) {
                Some(result) => classified.push(result),
                None => remaining.push(page),
            }
        }

        let mut representatives: HashMap<u64, CrawledPage> = HashMap::new();
        let mut hash_for_page: Vec<(CrawledPage, u64)> = Vec::with_capacity(remaining.len());
        for page in remaining {
            let hash = content_hash(&page.markdown);
            representatives.entry(hash).or_insert_with(|| page.clone());
            hash_for_page.push((page, hash));
        }

        let model = model.to_string();
        let rep_items: Vec<(u64, CrawledPage)> = representatives.into_iter().collect();
        let item_count = rep_items.len();
        if should_run_direct(item_count, threshold, no_batch) {
            metrics.llm_direct_calls += item_count as u64;
        } else {
            metrics.llm_batch_items += item_count as u64;
        }

        let results = dispatch_llm(
            llm,
            rep_items,
            "classify",
            threshold,
            no_batch,
            MAX_DIRECT_CONCURRENCY,
            cancel,
            {
                let model = model.clone();
                move |(_, page): &(u64, CrawledPage)| classify_request(&model, page)
            },
            |(hash, _)| hash.to_string(),
        )
        .await;

        let mut by_hash: HashMap<u64, (PageType, f64)> = results
            .into_iter()
            .map(|((hash, _), result)| {
                let outcome = match result {
                    Ok(response) => parse_classification(&response.text),
                    Err(e) => {
                        warn!(error = %e, "classification call failed");
                        (PageType::Other, 0.0)
                    }
                };
                (hash, outcome)
            })
            .collect();

        for (page, hash) in hash_for_page {
            let (page_type, confidence) = by_hash.remove(&hash).unwrap_or((PageType::Other, 0.0));
            classified.push(ClassifiedPage { page, page_type, confidence });
            // dedupe twins inherit the representative's classification
            by_hash.entry(hash).or_insert((page_type, confidence));
        }

        classified
    }
    .instrument(span)
    .await
}

fn classify_request(model: &str, page: &CrawledPage) -> MessageRequest {
    MessageRequest {
        model: model.to_string(),
        system: Some("Classify the following web page into one of the known page types.".to_string()),
        user: page.markdown.chars().take(2000).collect(),
        max_tokens: 128,
        cache_ttl: None,
    }
}

fn parse_classification(text: &str) -> (PageType, f64) {
    let trimmed = text.trim();
    match PageType::parse(trimmed) {
        Some(page_type) => (page_type, 0.85),
        None => (PageType::Other, 0.0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use entity_enrich_clients::fakes::FakeLlmClient;
    use entity_enrich_clients::traits::{MessageResponse, Usage};
    use crate::concurrency::CancellationHandle;

    fn page(url: &str, title: &str, markdown: &str) -> CrawledPage {
        CrawledPage {
            url: url.to_string(),
            title: title.to_string(),
            markdown: markdown.to_string(),
            status_code: 200,
            metadata: None,
        }
    }

    #[test]
    fn title_prefix_wins_over_url_pattern() {
        let p = page("https://acme.com/about", "[bbb] Acme Corp", &"x".repeat(200));
        let classified = classify_by_precedence(&p).unwrap();
        assert_eq!(classified.page_type, PageType::Bbb);
        assert_eq!(classified.confidence, 1.0);
    }

    #[test]
    fn url_pattern_matches_first_segment() {
        let p = page("https://acme.com/pricing/plans", "Plans", &"x".repeat(200));
        let classified = classify_by_precedence(&p).unwrap();
        assert_eq!(classified.page_type, PageType::Pricing);
    }

    #[test]
    fn tiny_page_shortcuts_to_other() {
        let p = page("https://acme.com/x", "X", "short");
        let classified = classify_by_precedence(&p).unwrap();
        assert_eq!(classified.page_type, PageType::Other);
        assert_eq!(classified.confidence, 1.0);
    }

    #[test]
    fn empty_path_is_homepage() {
        let p = page("https://acme.com", "Acme", &"x".repeat(200));
        let classified = classify_by_precedence(&p).unwrap();
        assert_eq!(classified.page_type, PageType::Homepage);
    }

    #[tokio::test]
    async fn identical_markdown_receives_identical_classification() {
        let llm: Arc<dyn LlmClient> = Arc::new(
            FakeLlmClient::new().with_response(
                "haiku",
                "Unique content that needs llm classification with enough length to avoid the tiny page shortcut.".chars().take(2000).collect::<String>(),
                MessageResponse { text: "careers".to_string(), usage: Usage::default() },
            ),
        );
        let (_handle, token) = CancellationHandle::new();
        let mut metrics = RunMetrics::default();
        let markdown = "Unique content that needs llm classification with enough length to avoid the tiny page shortcut.".to_string();
        let pages = vec![
            page("https://acme.com/careers-a", "Careers A", &markdown),
            page("https://acme.com/careers-b", "Careers B", &markdown),
        ];
        let result = classify(&llm, "haiku", pages, 20, false, token, &mut metrics).await;
        assert_eq!(result.len(), 2);
        assert_eq!(result[0].page_type, result[1].page_type);
        assert_eq!(metrics.llm_direct_calls, 1);
    }
}
