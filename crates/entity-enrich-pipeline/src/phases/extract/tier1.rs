//! T1: one cheap-model call per question, against its single best page.

use std::collections::HashMap;
use std::sync::Arc;

use entity_enrich_clients::traits::{LlmClient, LoanRecord, MessageRequest};
use entity_enrich_core::model::{AnswerValue, ClassifiedPage, ExtractionAnswer, TIER_CHEAP};
use tracing::warn;

use super::parse::parse_response;
use super::prompt::{build_user_prompt, max_output_tokens, system_prompt};
use crate::concurrency::{dispatch_llm, should_run_direct, CancellationToken};
use crate::phases::route::RoutedQuestion;
use crate::result::RunMetrics;

fn seed_hint_block(field_keys: &[String], seed_hints: &HashMap<String, AnswerValue>) -> Option<String> {
    let lines: Vec<String> = field_keys
        .iter()
        .filter_map(|key| seed_hints.get(key).map(|value| format!("{key}: {}", value.stringify())))
        .collect();
    if lines.is_empty() {
        None
    } else {
        Some(format!("Known hints:\n{}", lines.join("\n")))
    }
}

/// Snippets from any already-classified external-source pages (BBB, Google
/// Maps, SoS, LinkedIn) routed alongside the primary page, so T1's own
/// reasoning sees them rather than only a post-hoc metadata injection.
fn external_page_snippet_block(pages: &[&ClassifiedPage]) -> Option<String> {
    let lines: Vec<String> = pages
        .iter()
        .filter(|p| p.page_type.is_external())
        .map(|p| format!("{:?} page ({}):\n{}", p.page_type, p.page.url, p.page.markdown.chars().take(500).collect::<String>()))
        .collect();
    if lines.is_empty() {
        None
    } else {
        Some(format!("External source pages:\n{}", lines.join("\n\n")))
    }
}

/// Structured page metadata (rating, review count, phone, BBB rating)
/// attached during crawl/external-source ingestion.
fn page_metadata_block(pages: &[&ClassifiedPage]) -> Option<String> {
    let lines: Vec<String> = pages
        .iter()
        .filter_map(|p| {
            let metadata = p.page.metadata.as_ref()?;
            let mut parts = Vec::new();
            if let Some(rating) = metadata.rating {
                parts.push(format!("rating={rating}"));
            }
            if let Some(count) = metadata.review_count {
                parts.push(format!("review_count={count}"));
            }
            if let Some(phone) = &metadata.phone {
                parts.push(format!("phone={phone}"));
            }
            if let Some(bbb_rating) = &metadata.bbb_rating {
                parts.push(format!("bbb_rating={bbb_rating}"));
            }
            if parts.is_empty() {
                None
            } else {
                Some(format!("{}: {}", p.page.url, parts.join(", ")))
            }
        })
        .collect();
    if lines.is_empty() {
        None
    } else {
        Some(format!("Page metadata:\n{}", lines.join("\n")))
    }
}

fn loan_record_block(loan_match: Option<&LoanRecord>) -> Option<String> {
    let loan = loan_match?;
    Some(format!(
        "Federal loan record match (score {:.2}): loan amount ${:.0}, jobs reported {}, approved {}",
        loan.match_score,
        loan.loan_amount,
        loan.jobs_reported,
        loan.approval_date.date_naive()
    ))
}

fn request_for(model: &str, question: &entity_enrich_core::model::Question, page: &ClassifiedPage, aux_blocks: &[String]) -> MessageRequest {
    MessageRequest {
        model: model.to_string(),
        system: Some(system_prompt().to_string()),
        user: build_user_prompt(question, page, aux_blocks),
        max_tokens: max_output_tokens(question.field_keys().len()),
        cache_ttl: None,
    }
}

/// Run every routed question's T1 call, dispatched direct or via batch per
/// [`should_run_direct`] against `threshold`/`no_batch`.
#[allow(clippy::too_many_arguments)]
pub async fn run_tier1(
    llm: &Arc<dyn LlmClient>,
    model: &str,
    routed: Vec<RoutedQuestion<'_>>,
    seed_hints: &HashMap<String, AnswerValue>,
    loan_match: Option<&LoanRecord>,
    threshold: usize,
    no_batch: bool,
    max_concurrency: usize,
    cancel: CancellationToken,
    metrics: &mut RunMetrics,
) -> Vec<ExtractionAnswer> {
    let mut items = Vec::with_capacity(routed.len());
    for routed_question in &routed {
        let Some(best_page) = routed_question.pages.first() else { continue };
        let mut aux_blocks = Vec::new();
        aux_blocks.extend(seed_hint_block(&routed_question.question.field_keys(), seed_hints));
        aux_blocks.extend(external_page_snippet_block(&routed_question.pages));
        aux_blocks.extend(page_metadata_block(&routed_question.pages));
        aux_blocks.extend(loan_record_block(loan_match));
        items.push((routed_question.question.clone(), (*best_page).clone(), aux_blocks));
    }

    let item_count = items.len();
    if should_run_direct(item_count, threshold, no_batch) {
        metrics.llm_direct_calls += item_count as u64;
    } else {
        metrics.llm_batch_items += item_count as u64;
    }

    let model = model.to_string();
    let results = dispatch_llm(
        llm,
        items,
        "tier1",
        threshold,
        no_batch,
        max_concurrency,
        cancel,
        {
            let model = model.clone();
            move |(question, page, aux_blocks): &(entity_enrich_core::model::Question, ClassifiedPage, Vec<String>)| request_for(&model, question, page, aux_blocks)
        },
        |(question, _, _)| question.id.clone(),
    )
    .await;

    results
        .into_iter()
        .flat_map(|((question, _, _), result)| match result {
            Ok(response) => parse_response(&question, &response.text, TIER_CHEAP),
            Err(e) => {
                warn!(error = %e, question = %question.id, "tier1 call failed");
                question.field_keys().into_iter().map(|key| ExtractionAnswer::tier0(key, AnswerValue::Null, 0.0, "tier1_error")).collect()
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::concurrency::CancellationHandle;
    use entity_enrich_clients::fakes::FakeLlmClient;
    use entity_enrich_clients::traits::{MessageResponse, Usage};
    use entity_enrich_core::model::{ClassifiedPage, CrawledPage, PageType, Question, TIER_CHEAP};

    fn page() -> ClassifiedPage {
        ClassifiedPage {
            page: CrawledPage { url: "https://acme.com/pricing".to_string(), title: "Pricing".to_string(), markdown: "Plans start at $10/mo.".to_string(), status_code: 200, metadata: None },
            page_type: PageType::Pricing,
            confidence: 0.9,
        }
    }

    fn question() -> Question {
        Question {
            id: "q1".to_string(),
            text: "What is the pricing?".to_string(),
            field_key: "pricing_summary".to_string(),
            page_types: vec![PageType::Pricing],
            tier: TIER_CHEAP,
            output_format: "json".to_string(),
            instructions: None,
        }
    }

    #[tokio::test]
    async fn runs_one_call_per_routed_question() {
        let page = page();
        let question = question();
        let user_prompt = build_user_prompt(&question, &page, &[]);
        let llm: Arc<dyn LlmClient> = Arc::new(FakeLlmClient::new().with_response(
            "haiku",
            user_prompt,
            MessageResponse { text: r#"{"value": "$10/mo", "confidence": 0.8}"#.to_string(), usage: Usage::default() },
        ));
        let routed = vec![RoutedQuestion { question: &question, pages: vec![&page] }];
        let (_handle, token) = CancellationHandle::new();
        let mut metrics = RunMetrics::default();
        let answers = run_tier1(&llm, "haiku", routed, &HashMap::new(), None, 20, false, 10, token, &mut metrics).await;
        assert_eq!(answers.len(), 1);
        assert_eq!(answers[0].value.stringify(), "$10/mo");
        assert_eq!(metrics.llm_direct_calls, 1);
    }

    #[tokio::test]
    async fn aux_blocks_carry_external_pages_metadata_and_loan_record() {
        let pricing_page = page();
        let bbb_page = ClassifiedPage {
            page: CrawledPage {
                url: "https://www.bbb.org/search?q=acme".to_string(),
                title: "[bbb] Acme".to_string(),
                markdown: "Accredited since 2010.".to_string(),
                status_code: 200,
                metadata: Some(entity_enrich_core::model::PageMetadata { rating: Some(4.5), review_count: Some(12), phone: None, bbb_rating: Some("A+".to_string()), source: None }),
            },
            page_type: PageType::Bbb,
            confidence: 1.0,
        };
        let question = question();
        let loan = entity_enrich_clients::traits::LoanRecord { match_score: 0.9, loan_amount: 50_000.0, jobs_reported: 4, approval_date: chrono::Utc::now() };

        let seed_block = seed_hint_block(&question.field_keys(), &HashMap::new());
        let external_block = external_page_snippet_block(&[&bbb_page]);
        let metadata_block = page_metadata_block(&[&bbb_page]);
        let loan_block = loan_record_block(Some(&loan));
        let mut expected_aux = Vec::new();
        expected_aux.extend(seed_block);
        expected_aux.extend(external_block.clone());
        expected_aux.extend(metadata_block.clone());
        expected_aux.extend(loan_block.clone());
        let expected_prompt = build_user_prompt(&question, &pricing_page, &expected_aux);

        assert!(external_block.unwrap().contains("Bbb"));
        assert!(metadata_block.unwrap().contains("bbb_rating=A+"));
        assert!(loan_block.unwrap().contains("jobs reported 4"));

        let llm: Arc<dyn LlmClient> = Arc::new(FakeLlmClient::new().with_response(
            "haiku",
            expected_prompt,
            MessageResponse { text: r#"{"value": "$10/mo", "confidence": 0.8}"#.to_string(), usage: Usage::default() },
        ));
        let routed = vec![RoutedQuestion { question: &question, pages: vec![&pricing_page, &bbb_page] }];
        let (_handle, token) = CancellationHandle::new();
        let mut metrics = RunMetrics::default();
        let answers = run_tier1(&llm, "haiku", routed, &HashMap::new(), Some(&loan), 20, false, 10, token, &mut metrics).await;
        assert_eq!(answers[0].value.stringify(), "$10/mo");
    }
}
