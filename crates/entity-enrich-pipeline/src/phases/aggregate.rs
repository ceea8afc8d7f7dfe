//! Phase 7: fold every tier's answers into one winner per field, run the
//! merge sub-policies, validate/coerce against the registry, and score.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use entity_enrich_core::merge::{
    apply_precision_upgrade, auto_derive_account_name, backfill_owner_from_contacts, consolidate_contacts,
    cross_check_review_count, cross_validate_employees, fill_gaps_from_seed, inject_page_metadata, normalize_business_model,
    validate_naics_code, NaicsReference, WinnerMap,
};
use entity_enrich_core::model::{AnswerValue, ClassifiedPage, ExtractionAnswer};
use entity_enrich_core::registry::{validate_field, FieldRegistry, ValidationSummary};
use entity_enrich_core::score::{score, QualityScore, QualityWeights};

pub struct AggregateInput<'a> {
    pub t1_answers: Vec<ExtractionAnswer>,
    pub t2_answers: Vec<ExtractionAnswer>,
    pub t3_answers: Vec<ExtractionAnswer>,
    pub seed_hints: &'a HashMap<String, AnswerValue>,
    pub pages: &'a [ClassifiedPage],
    pub profile_employee_range: Option<(f64, f64)>,
    pub naics_reference: &'a NaicsReference,
    pub sos_keywords: &'a [String],
}

pub struct AggregateResult {
    pub winners: WinnerMap,
    pub field_values: HashMap<String, entity_enrich_core::model::FieldValue>,
    pub validation: ValidationSummary,
    pub score: QualityScore,
}

/// Run the full merge/validate/score chain. `all_answers` (needed for
/// scoring's source-diversity count) is everything passed in across the
/// three tiers, including the answers that ultimately lost the merge.
#[allow(clippy::too_many_arguments)]
pub fn aggregate(
    input: AggregateInput,
    registry: &FieldRegistry,
    scoreable_keys: &[&str],
    weights: QualityWeights,
    now: DateTime<Utc>,
) -> AggregateResult {
    let all_answers: Vec<ExtractionAnswer> = input
        .t1_answers
        .iter()
        .chain(input.t2_answers.iter())
        .chain(input.t3_answers.iter())
        .cloned()
        .collect();

    let mut winners = entity_enrich_core::merge::merge_answers([input.t1_answers, input.t2_answers, input.t3_answers]);

    auto_derive_account_name(&mut winners);
    fill_gaps_from_seed(&mut winners, input.seed_hints);
    apply_precision_upgrade(&mut winners, input.seed_hints);
    inject_page_metadata(&mut winners, input.pages);

    if let Some(contact) = consolidate_contacts(&all_answers) {
        winners.insert(contact.field_key.clone(), contact);
    }
    backfill_owner_from_contacts(&mut winners, &all_answers);

    cross_validate_employees(&mut winners, input.profile_employee_range);
    if let Some(review_count) = winners.get_mut("google_reviews_count") {
        let preseeded = input.seed_hints.get("google_reviews_count").and_then(AnswerValue::as_f64).map(|f| f as i64);
        cross_check_review_count(review_count, preseeded);
    }
    normalize_business_model(&mut winners);
    validate_naics_code(&mut winners, input.naics_reference, input.sos_keywords);

    let mut validation = ValidationSummary::default();
    let mut field_values = HashMap::new();
    for answer in winners.values() {
        if let Some(field_value) = validate_field(registry, answer, &mut validation) {
            field_values.insert(field_value.field_key.clone(), field_value);
        }
    }

    let quality = score(&winners, &all_answers, scoreable_keys, registry, weights, now);

    AggregateResult {
        winners,
        field_values,
        validation,
        score: quality,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use entity_enrich_core::model::{DataType, FieldMapping, Tier, TIER_CHEAP};

    fn registry() -> FieldRegistry {
        FieldRegistry::new(vec![FieldMapping {
            key: "company_name".to_string(),
            sf_field: "Name".to_string(),
            sf_object: "Account".to_string(),
            data_type: DataType::String,
            required: true,
            max_length: None,
            validation_regex: None,
        }])
        .unwrap()
    }

    fn answer(field_key: &str, value: AnswerValue, confidence: f64, tier: Tier) -> ExtractionAnswer {
        ExtractionAnswer {
            question_id: "q1".to_string(),
            field_key: field_key.to_string(),
            value,
            confidence,
            tier,
            source: "llm".to_string(),
            source_url: Some("https://acme.com".to_string()),
            reasoning: None,
            data_as_of: None,
            contradiction: None,
        }
    }

    #[test]
    fn merges_and_derives_account_name() {
        let input = AggregateInput {
            t1_answers: vec![answer("company_name", AnswerValue::String("Acme Corp".to_string()), 0.9, TIER_CHEAP)],
            t2_answers: vec![],
            t3_answers: vec![],
            seed_hints: &HashMap::new(),
            pages: &[],
            profile_employee_range: None,
            naics_reference: &NaicsReference::default(),
            sos_keywords: &[],
        };
        let registry = registry();
        let result = aggregate(input, &registry, &["company_name"], QualityWeights::default(), Utc::now());
        assert_eq!(result.winners.get("account_name").unwrap().value.stringify(), "Acme Corp");
        assert!(result.field_values.contains_key("company_name"));
        assert!(result.score.total > 0.0);
    }

    #[test]
    fn review_count_disagreeing_with_the_preseeded_value_is_capped() {
        let mut seed_hints = HashMap::new();
        seed_hints.insert("google_reviews_count".to_string(), AnswerValue::Integer(500));
        let input = AggregateInput {
            t1_answers: vec![answer("google_reviews_count", AnswerValue::Integer(5), 0.9, TIER_CHEAP)],
            t2_answers: vec![],
            t3_answers: vec![],
            seed_hints: &seed_hints,
            pages: &[],
            profile_employee_range: None,
            naics_reference: &NaicsReference::default(),
            sos_keywords: &[],
        };
        let registry = registry();
        let result = aggregate(input, &registry, &["google_reviews_count"], QualityWeights::default(), Utc::now());
        assert!(result.winners.get("google_reviews_count").unwrap().confidence <= 0.49);
    }
}
