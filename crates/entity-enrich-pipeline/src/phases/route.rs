//! Phase 3: match each question to a candidate page set by type.

use entity_enrich_core::model::{ClassifiedPage, PageIndex, PageType, Question};
use tracing::info;

#[derive(Debug, Clone)]
pub struct RoutedQuestion<'a> {
    pub question: &'a Question,
    pub pages: Vec<&'a ClassifiedPage>,
}

#[derive(Debug, Clone)]
pub struct SkippedQuestion<'a> {
    pub question: &'a Question,
    pub reason: String,
}

#[derive(Debug, Clone, Default)]
pub struct RouteResult<'a> {
    pub routed: Vec<RoutedQuestion<'a>>,
    pub skipped: Vec<SkippedQuestion<'a>>,
}

/// Route every question against the page index. External-source pages
/// (bbb/google_maps/sos/linkedin) are always appended as supplementary
/// context, deduped by URL, even when `page_types` restricts the primary set.
pub fn route<'a>(questions: &'a [Question], pages: &'a PageIndex, external_pages: &'a [ClassifiedPage]) -> RouteResult<'a> {
    let mut result = RouteResult::default();

    for question in questions {
        let mut candidates: Vec<&ClassifiedPage> = if question.page_types.is_empty() {
            pages.values().flatten().collect()
        } else {
            question
                .page_types
                .iter()
                .filter_map(|page_type| pages.get(page_type))
                .flatten()
                .collect()
        };

        let mut seen_urls: std::collections::HashSet<&str> = candidates.iter().map(|p| p.page.url.as_str()).collect();
        for external in external_pages {
            if seen_urls.insert(external.page.url.as_str()) {
                candidates.push(external);
            }
        }

        if candidates.is_empty() {
            info!(question = %question.id, "no matching pages found, skipping");
            result.skipped.push(SkippedQuestion {
                question,
                reason: "no matching pages found".to_string(),
            });
            continue;
        }

        result.routed.push(RoutedQuestion { question, pages: candidates });
    }

    result
}
