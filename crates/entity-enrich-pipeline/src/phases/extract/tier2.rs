//! T2: stronger-model call against multiple candidate pages, seeded with
//! whatever T1 managed to find at low confidence.

use std::sync::Arc;

use entity_enrich_clients::traits::{LlmClient, MessageRequest};
use entity_enrich_core::model::{AnswerValue, ClassifiedPage, ExtractionAnswer, Question, TIER_BALANCED};
use tracing::warn;

use super::parse::parse_response;
use super::prompt::{max_output_tokens, system_prompt};
use super::truncation::relevance_truncate;
use crate::concurrency::{dispatch_llm, should_run_direct, CancellationToken};
use crate::phases::route::RoutedQuestion;
use crate::result::RunMetrics;

const MAX_PAGES_PER_QUESTION: usize = 4;
const PER_PAGE_BUDGET: usize = 3000;
const LOW_CONFIDENCE_THRESHOLD: f64 = 0.4;

fn low_confidence_context(question: &Question, t1_answers: &[ExtractionAnswer]) -> Option<String> {
    let keys = question.field_keys();
    let lines: Vec<String> = t1_answers
        .iter()
        .filter(|a| keys.contains(&a.field_key) && a.confidence < LOW_CONFIDENCE_THRESHOLD)
        .map(|a| format!("{}: {} (tier1 confidence {:.2})", a.field_key, a.value.stringify(), a.confidence))
        .collect();
    if lines.is_empty() {
        None
    } else {
        Some(format!("Tier 1 found (low confidence, verify or correct):\n{}", lines.join("\n")))
    }
}

fn build_multi_page_prompt(question: &Question, pages: &[&ClassifiedPage], low_conf: Option<&str>) -> String {
    let mut body = String::new();
    body.push_str(&format!("Question: {}\n\n", question.text));
    if let Some(instructions) = &question.instructions {
        body.push_str(&format!("Instructions: {instructions}\n\n"));
    }
    if let Some(low_conf) = low_conf {
        body.push_str(low_conf);
        body.push_str("\n\n");
    }
    for page in pages.iter().take(MAX_PAGES_PER_QUESTION) {
        body.push_str(&format!("Page ({}):\n{}\n\n", page.page.url, relevance_truncate(&page.page.markdown, PER_PAGE_BUDGET, &question.text)));
    }
    if question.is_multi_field() {
        let keys = question.field_keys().join("\", \"");
        body.push_str(&format!("Respond with a single JSON object keyed by \"{keys}\" plus \"confidence\", \"reasoning\", and \"source_url\"."));
    } else {
        body.push_str("Respond with a single JSON object: {\"value\", \"confidence\", \"reasoning\", \"source_url\"}.");
    }
    body
}

fn request_for(model: &str, question: &Question, pages: &[ClassifiedPage], low_conf: &Option<String>) -> MessageRequest {
    let page_refs: Vec<&ClassifiedPage> = pages.iter().collect();
    MessageRequest {
        model: model.to_string(),
        system: Some(system_prompt().to_string()),
        user: build_multi_page_prompt(question, &page_refs, low_conf.as_deref()),
        max_tokens: max_output_tokens(question.field_keys().len()),
        cache_ttl: None,
    }
}

#[allow(clippy::too_many_arguments)]
pub async fn run_tier2(
    llm: &Arc<dyn LlmClient>,
    model: &str,
    routed: Vec<RoutedQuestion<'_>>,
    t1_answers: &[ExtractionAnswer],
    threshold: usize,
    no_batch: bool,
    max_concurrency: usize,
    cancel: CancellationToken,
    metrics: &mut RunMetrics,
) -> Vec<ExtractionAnswer> {
    let mut items = Vec::with_capacity(routed.len());
    for routed_question in &routed {
        if routed_question.pages.is_empty() {
            continue;
        }
        let low_conf = low_confidence_context(routed_question.question, t1_answers);
        let pages: Vec<ClassifiedPage> = routed_question.pages.iter().take(MAX_PAGES_PER_QUESTION).map(|p| (*p).clone()).collect();
        items.push((routed_question.question.clone(), pages, low_conf));
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
        "tier2",
        threshold,
        no_batch,
        max_concurrency,
        cancel,
        {
            let model = model.clone();
            move |(question, pages, low_conf): &(Question, Vec<ClassifiedPage>, Option<String>)| request_for(&model, question, pages, low_conf)
        },
        |(question, _, _)| question.id.clone(),
    )
    .await;

    results
        .into_iter()
        .flat_map(|((question, _, _), result)| match result {
            Ok(response) => parse_response(&question, &response.text, TIER_BALANCED),
            Err(e) => {
                warn!(error = %e, question = %question.id, "tier2 call failed");
                question.field_keys().into_iter().map(|key| ExtractionAnswer::tier0(key, AnswerValue::Null, 0.0, "tier2_error")).collect()
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
    use entity_enrich_core::model::{CrawledPage, PageType, TIER_CHEAP};

    fn page(url: &str, markdown: &str) -> ClassifiedPage {
        ClassifiedPage {
            page: CrawledPage { url: url.to_string(), title: "T".to_string(), markdown: markdown.to_string(), status_code: 200, metadata: None },
            page_type: PageType::Homepage,
            confidence: 0.9,
        }
    }

    fn question() -> Question {
        Question {
            id: "q1".to_string(),
            text: "How many employees?".to_string(),
            field_key: "employees".to_string(),
            page_types: vec![],
            tier: TIER_CHEAP,
            output_format: "json".to_string(),
            instructions: None,
        }
    }

    #[tokio::test]
    async fn includes_low_confidence_t1_context() {
        let question = question();
        let p1 = page("https://acme.com", "We have a small team.");
        let t1_answers = vec![ExtractionAnswer::tier0("employees", AnswerValue::Integer(5), 0.2, "tier1")];
        let page_refs = vec![&p1];
        let expected_prompt = build_multi_page_prompt(&question, &page_refs, low_confidence_context(&question, &t1_answers).as_deref());
        let llm: Arc<dyn LlmClient> = Arc::new(FakeLlmClient::new().with_response(
            "sonnet",
            expected_prompt,
            MessageResponse { text: r#"{"value": 12, "confidence": 0.85}"#.to_string(), usage: Usage::default() },
        ));
        let routed = vec![RoutedQuestion { question: &question, pages: vec![&p1] }];
        let (_handle, token) = CancellationHandle::new();
        let mut metrics = RunMetrics::default();
        let answers = run_tier2(&llm, "sonnet", routed, &t1_answers, 20, false, 10, token, &mut metrics).await;
        assert_eq!(answers.len(), 1);
        assert_eq!(answers[0].value.stringify(), "12");
    }
}
