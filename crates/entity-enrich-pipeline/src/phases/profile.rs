//! Phase 1C: professional-network profile lookup, with a scrape-chain
//! primary path and LLM research fallback when no profile record exists.

use std::sync::Arc;

use entity_enrich_clients::traits::{LlmClient, MessageRequest, ProfileClient, ProfileRecord};
use entity_enrich_core::model::{AnswerValue, ExtractionAnswer};
use tracing::warn;

use crate::result::RunMetrics;

/// Look up a profile record for the domain; on a miss, ask a research model
/// for a best-effort employee range and record it as a tier-0 answer instead
/// of a `ProfileRecord` (there's no structured record to cross-validate against).
pub async fn lookup_profile(
    profile_client: &Arc<dyn ProfileClient>,
    llm: &Arc<dyn LlmClient>,
    model: &str,
    domain: &str,
    metrics: &mut RunMetrics,
) -> (Option<ProfileRecord>, Option<ExtractionAnswer>) {
    match profile_client.lookup(domain).await {
        Ok(Some(record)) => (Some(record), None),
        Ok(None) => (None, research_employee_range(llm, model, domain, metrics).await),
        Err(e) => {
            warn!(error = %e, domain, "profile lookup failed, falling back to research");
            (None, research_employee_range(llm, model, domain, metrics).await)
        }
    }
}

async fn research_employee_range(llm: &Arc<dyn LlmClient>, model: &str, domain: &str, metrics: &mut RunMetrics) -> Option<ExtractionAnswer> {
    let request = MessageRequest {
        model: model.to_string(),
        system: Some("Estimate the employee headcount range for the given company domain. Reply with a single range like 11-50, or unknown.".to_string()),
        user: domain.to_string(),
        max_tokens: 32,
        cache_ttl: None,
    };
    metrics.llm_primer_calls += 1;
    match llm.create_message(request).await {
        Ok(response) => {
            let text = response.text.trim();
            if text.eq_ignore_ascii_case("unknown") || text.is_empty() {
                None
            } else {
                Some(ExtractionAnswer::tier0("employees_range_estimate", AnswerValue::String(text.to_string()), 0.4, "profile_research"))
            }
        }
        Err(e) => {
            warn!(error = %e, domain, "profile research call failed");
            None
        }
    }
}
