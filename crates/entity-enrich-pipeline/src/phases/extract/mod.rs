//! Phases 4/5/6: the three-tier extraction state machine.

pub mod parse;
pub mod prompt;
pub mod tier1;
pub mod tier2;
pub mod tier3;
pub mod truncation;

const DEFAULT_CONFIDENCE_THRESHOLD: f64 = 0.4;
const ESCALATION_FAILURE_RATIO: f64 = 0.35;

/// For a question's T1 answers, decide whether T2 should run: escalate only
/// if more than 35% of the values are null or below the confidence threshold.
pub fn should_escalate(answers: &[entity_enrich_core::model::ExtractionAnswer]) -> bool {
    if answers.is_empty() {
        return true;
    }
    let failed = answers
        .iter()
        .filter(|a| a.value.is_null() || a.confidence < DEFAULT_CONFIDENCE_THRESHOLD)
        .count();
    (failed as f64 / answers.len() as f64) > ESCALATION_FAILURE_RATIO
}
