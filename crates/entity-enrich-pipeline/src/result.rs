//! The accumulating, phase-to-phase record and its run metrics.
//!
//! `EnrichmentResult` is owned by a single task at a time; phase hand-off is
//! sequential even though work inside a phase fans out concurrently.

use std::collections::HashMap;
use std::time::Duration;

use entity_enrich_clients::traits::{GeoPoint, LoanRecord, ProfileRecord};
use entity_enrich_core::model::{ClassifiedPage, Entity, ExtractionAnswer, FieldValue, PageIndex};
use entity_enrich_core::score::QualityScore;

use crate::phases::gate::GateDecision;

/// Per-run observability counters, accumulated by a single owner across the
/// sequential phase hand-off; never mutated concurrently.
#[derive(Debug, Clone, Default)]
pub struct RunMetrics {
    pub llm_direct_calls: u64,
    pub llm_batch_items: u64,
    pub llm_primer_calls: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub validation_drops: u64,
    pub contradictions_recorded: u64,
    pub escalations_t1_to_t2: u64,
    pub t3_invocations: u64,
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
    pub total_cache_read_tokens: u64,
    pub total_cache_creation_tokens: u64,
    pub elapsed_per_phase: HashMap<String, Duration>,
}

impl RunMetrics {
    pub fn record_phase(&mut self, phase: &str, elapsed: Duration) {
        self.elapsed_per_phase.insert(phase.to_string(), elapsed);
    }
}

/// The accumulating record each phase method consumes and extends.
#[derive(Debug, Clone)]
pub struct EnrichmentResult {
    pub entity: Entity,
    pub pages: PageIndex,
    pub external_pages: Vec<ClassifiedPage>,
    pub profile: Option<ProfileRecord>,
    pub loan_match: Option<LoanRecord>,
    pub geo: Option<GeoPoint>,
    pub msa: Option<String>,
    pub t1_answers: Vec<ExtractionAnswer>,
    pub t2_answers: Vec<ExtractionAnswer>,
    pub t3_answers: Vec<ExtractionAnswer>,
    pub field_values: HashMap<String, FieldValue>,
    pub score: Option<QualityScore>,
    pub gate_decision: Option<GateDecision>,
    pub metrics: RunMetrics,
}

impl EnrichmentResult {
    pub fn new(entity: Entity) -> Self {
        Self {
            entity,
            pages: PageIndex::new(),
            external_pages: Vec::new(),
            profile: None,
            loan_match: None,
            geo: None,
            msa: None,
            t1_answers: Vec::new(),
            t2_answers: Vec::new(),
            t3_answers: Vec::new(),
            field_values: HashMap::new(),
            score: None,
            gate_decision: None,
            metrics: RunMetrics::default(),
        }
    }

    /// All answers currently gathered, across every tier, for passing into
    /// aggregate/score logic that needs the full multiset.
    pub fn all_answers(&self) -> Vec<ExtractionAnswer> {
        self.t1_answers
            .iter()
            .chain(self.t2_answers.iter())
            .chain(self.t3_answers.iter())
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use entity_enrich_core::model::AnswerValue;
    use std::collections::HashMap as StdHashMap;

    fn entity() -> Entity {
        Entity {
            primary_url: "https://acme.com".into(),
            display_name: None,
            address_line: None,
            city: None,
            state: None,
            postal_code: None,
            tracking_record_id: "rec-1".into(),
            sor_id: None,
            seed_hints: StdHashMap::new(),
        }
    }

    #[test]
    fn all_answers_concatenates_tiers() {
        let mut result = EnrichmentResult::new(entity());
        result.t1_answers.push(ExtractionAnswer::tier0("a", AnswerValue::Null, 0.5, "t"));
        result.t2_answers.push(ExtractionAnswer::tier0("b", AnswerValue::Null, 0.5, "t"));
        assert_eq!(result.all_answers().len(), 2);
    }
}
