//! Builders for cross-crate test fixtures. Not gated behind `cfg(test)` so
//! `entity-enrich-pipeline`'s own tests can build the same fixtures without
//! duplicating field lists whenever `model` grows a field.

use std::collections::HashMap;

use crate::model::{AnswerValue, Entity, ExtractionAnswer, PageType, Question, Tier, TIER_CHEAP};

pub fn entity(url: &str) -> Entity {
    Entity {
        primary_url: url.to_string(),
        display_name: None,
        address_line: None,
        city: None,
        state: None,
        postal_code: None,
        tracking_record_id: url.to_string(),
        sor_id: None,
        seed_hints: HashMap::new(),
    }
}

pub fn question(field_key: &str, page_types: Vec<PageType>) -> Question {
    Question {
        id: format!("q_{field_key}"),
        text: format!("What is {field_key}?"),
        field_key: field_key.to_string(),
        page_types,
        tier: TIER_CHEAP,
        output_format: "json".to_string(),
        instructions: None,
    }
}

pub fn extraction_answer(field_key: &str, value: AnswerValue, confidence: f64, tier: Tier) -> ExtractionAnswer {
    let mut answer = ExtractionAnswer::tier0(field_key, value, confidence, "test");
    answer.tier = tier;
    answer
}
