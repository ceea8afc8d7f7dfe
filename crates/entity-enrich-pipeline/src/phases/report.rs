//! Phase 8: render a human-readable summary of a completed run. Thin by
//! design — no decisions live here, only formatting of what earlier phases
//! already decided.

use entity_enrich_core::score::QualityScore;

use crate::phases::gate::GateDecision;
use crate::result::{EnrichmentResult, RunMetrics};

pub fn render_summary(entity_domain: &str, result: &EnrichmentResult) -> String {
    let mut lines = vec![format!("Enrichment report for {entity_domain}")];

    if let Some(score) = &result.score {
        lines.push(format!("  quality score: {}", format_score(score)));
    }
    if let Some(decision) = &result.gate_decision {
        lines.push(format!("  gate: {}", format_decision(decision)));
    }
    lines.push(format!("  fields populated: {}", result.field_values.len()));
    lines.push(format_metrics(&result.metrics));

    lines.join("\n")
}

fn format_score(score: &QualityScore) -> String {
    format!(
        "{:.2} (confidence {:.2}, completeness {:.2}, diversity {:.2}, freshness {:.2})",
        score.total, score.confidence, score.completeness, score.diversity, score.freshness
    )
}

fn format_decision(decision: &GateDecision) -> String {
    if decision.passed {
        "passed".to_string()
    } else if decision.manual_review {
        format!("manual review (missing required: {})", decision.missing_required.join(", "))
    } else {
        "failed".to_string()
    }
}

fn format_metrics(metrics: &RunMetrics) -> String {
    format!(
        "  llm calls: {} direct, {} batch items, {} primer; cache: {} hits / {} misses; tokens: {} in / {} out",
        metrics.llm_direct_calls,
        metrics.llm_batch_items,
        metrics.llm_primer_calls,
        metrics.cache_hits,
        metrics.cache_misses,
        metrics.total_input_tokens,
        metrics.total_output_tokens,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use entity_enrich_core::model::Entity;
    use std::collections::HashMap;

    fn entity() -> Entity {
        Entity {
            primary_url: "https://acme.com".to_string(),
            display_name: None,
            address_line: None,
            city: None,
            state: None,
            postal_code: None,
            tracking_record_id: "rec-1".to_string(),
            sor_id: None,
            seed_hints: HashMap::new(),
        }
    }

    #[test]
    fn renders_without_score_or_decision() {
        let result = EnrichmentResult::new(entity());
        let summary = render_summary("acme.com", &result);
        assert!(summary.contains("Enrichment report for acme.com"));
        assert!(summary.contains("fields populated: 0"));
    }

    #[test]
    fn renders_score_when_present() {
        let mut result = EnrichmentResult::new(entity());
        result.score = Some(QualityScore { confidence: 0.8, completeness: 0.9, diversity: 0.7, freshness: 1.0, total: 0.82 });
        let summary = render_summary("acme.com", &result);
        assert!(summary.contains("quality score: 0.82"));
    }
}
