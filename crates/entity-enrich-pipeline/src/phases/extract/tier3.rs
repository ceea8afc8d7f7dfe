//! T3: expert-model call over a cheap-model-summarized context. External
//! source pages are promoted to the front of the chunking order so they
//! always survive into the summary.

use std::sync::Arc;

use entity_enrich_clients::traits::{LlmClient, MessageRequest};
use entity_enrich_core::model::{AnswerValue, ClassifiedPage, ExtractionAnswer, Question, TIER_EXPERT};
use tracing::warn;

use super::parse::parse_response;
use super::prompt::{max_output_tokens, system_prompt};
use crate::concurrency::{dispatch_llm, should_run_direct, CancellationToken};
use crate::phases::route::RoutedQuestion;
use crate::result::RunMetrics;

const CHUNK_SIZE: usize = 15_000;

fn ordered_content(pages: &[&ClassifiedPage]) -> String {
    let mut external: Vec<&&ClassifiedPage> = Vec::new();
    let mut rest: Vec<&&ClassifiedPage> = Vec::new();
    for page in pages {
        if page.page_type.is_external() {
            external.push(page);
        } else {
            rest.push(page);
        }
    }
    external
        .into_iter()
        .chain(rest)
        .map(|p| format!("Page ({}):\n{}\n", p.page.url, p.page.markdown))
        .collect::<Vec<_>>()
        .join("\n")
}

fn chunk_content(content: &str, chunk_size: usize) -> Vec<String> {
    if content.len() <= chunk_size {
        return vec![content.to_string()];
    }
    content
        .chars()
        .collect::<Vec<char>>()
        .chunks(chunk_size)
        .map(|chars| chars.iter().collect())
        .collect()
}

fn summarize_request(model: &str, chunk: &String) -> MessageRequest {
    MessageRequest {
        model: model.to_string(),
        system: Some("Summarize the key facts about this business from the page content. Be concise and factual.".to_string()),
        user: chunk.clone(),
        max_tokens: 1024,
        cache_ttl: None,
    }
}

async fn summarize_chunks(llm: &Arc<dyn LlmClient>, model: &str, chunks: Vec<String>, threshold: usize, no_batch: bool, cancel: CancellationToken, metrics: &mut RunMetrics) -> Vec<String> {
    let chunk_count = chunks.len();
    if should_run_direct(chunk_count, threshold, no_batch) {
        metrics.llm_direct_calls += chunk_count as u64;
    } else {
        metrics.llm_batch_items += chunk_count as u64;
    }
    metrics.llm_primer_calls += chunk_count as u64;

    let model = model.to_string();
    let results = dispatch_llm(
        llm,
        chunks.into_iter().enumerate().collect::<Vec<(usize, String)>>(),
        "tier3-primer",
        threshold,
        no_batch,
        10,
        cancel,
        {
            let model = model.clone();
            move |(_, chunk): &(usize, String)| summarize_request(&model, chunk)
        },
        |(index, _)| index.to_string(),
    )
    .await;

    results
        .into_iter()
        .map(|(_, result)| match result {
            Ok(response) => response.text,
            Err(e) => {
                warn!(error = %e, "tier3 chunk summarization failed");
                String::new()
            }
        })
        .filter(|s| !s.is_empty())
        .collect()
}

fn expert_request(model: &str, question: &Question, context: &str) -> MessageRequest {
    let mut user = format!("Question: {}\n\nSummarized context:\n{context}\n\n", question.text);
    if question.is_multi_field() {
        let keys = question.field_keys().join("\", \"");
        user.push_str(&format!("Respond with a single JSON object keyed by \"{keys}\" plus \"confidence\", \"reasoning\", and \"source_url\"."));
    } else {
        user.push_str("Respond with a single JSON object: {\"value\", \"confidence\", \"reasoning\", \"source_url\"}.");
    }
    MessageRequest {
        model: model.to_string(),
        system: Some(system_prompt().to_string()),
        user,
        max_tokens: max_output_tokens(question.field_keys().len()),
        cache_ttl: None,
    }
}

#[allow(clippy::too_many_arguments)]
pub async fn run_tier3(
    expert_llm: &Arc<dyn LlmClient>,
    expert_model: &str,
    summarizer_llm: &Arc<dyn LlmClient>,
    summarizer_model: &str,
    routed: Vec<RoutedQuestion<'_>>,
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
        let content = ordered_content(&routed_question.pages);
        let chunks = chunk_content(&content, CHUNK_SIZE);
        let summaries = summarize_chunks(summarizer_llm, summarizer_model, chunks, threshold, no_batch, cancel.clone(), metrics).await;
        let context = summaries.join("\n\n");
        items.push((routed_question.question.clone(), context));
        metrics.t3_invocations += 1;
    }

    let item_count = items.len();
    if should_run_direct(item_count, threshold, no_batch) {
        metrics.llm_direct_calls += item_count as u64;
    } else {
        metrics.llm_batch_items += item_count as u64;
    }

    let model = expert_model.to_string();
    let results = dispatch_llm(
        expert_llm,
        items,
        "tier3",
        threshold,
        no_batch,
        max_concurrency,
        cancel,
        {
            let model = model.clone();
            move |(question, context): &(Question, String)| expert_request(&model, question, context)
        },
        |(question, _)| question.id.clone(),
    )
    .await;

    results
        .into_iter()
        .flat_map(|((question, _), result)| match result {
            Ok(response) => parse_response(&question, &response.text, TIER_EXPERT),
            Err(e) => {
                warn!(error = %e, question = %question.id, "tier3 call failed");
                question.field_keys().into_iter().map(|key| ExtractionAnswer::tier0(key, AnswerValue::Null, 0.0, "tier3_error")).collect()
            }
        })
        .collect()
}
