//! Response parsing: fenced-block stripping, brace extraction, and
//! single-field vs multi-field answer construction.

use entity_enrich_core::model::{AnswerValue, ExtractionAnswer, Question, Tier};
use serde_json::Value;

/// Strip Markdown code fences and locate the outermost `{...}` span.
fn extract_json_span(text: &str) -> Option<&str> {
    let without_fences = text.trim().trim_start_matches("```json").trim_start_matches("```").trim_end_matches("```").trim();
    let start = without_fences.find('{')?;
    let end = without_fences.rfind('}')?;
    if end < start {
        return None;
    }
    Some(&without_fences[start..=end])
}

struct GlobalMeta {
    confidence: f64,
    reasoning: Option<String>,
    source_url: Option<String>,
}

fn global_meta(obj: &serde_json::Map<String, Value>) -> GlobalMeta {
    GlobalMeta {
        confidence: obj.get("confidence").and_then(Value::as_f64).unwrap_or(0.5),
        reasoning: obj.get("reasoning").and_then(Value::as_str).map(str::to_string),
        source_url: obj.get("source_url").and_then(Value::as_str).map(str::to_string),
    }
}

fn json_to_answer_value(value: &Value) -> AnswerValue {
    match value {
        Value::Null => AnswerValue::Null,
        Value::Bool(b) => AnswerValue::Bool(*b),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                AnswerValue::Integer(i)
            } else {
                AnswerValue::Float(n.as_f64().unwrap_or(0.0))
            }
        }
        Value::String(s) => AnswerValue::String(s.clone()),
        Value::Array(items) => AnswerValue::StringList(items.iter().map(|v| v.as_str().map(str::to_string).unwrap_or_else(|| v.to_string())).collect()),
        Value::Object(_) => AnswerValue::String(value.to_string()),
    }
}

fn malformed_answer(question: &Question, raw_text: &str) -> Vec<ExtractionAnswer> {
    question
        .field_keys()
        .into_iter()
        .map(|key| ExtractionAnswer {
            question_id: question.id.clone(),
            field_key: key,
            value: AnswerValue::String(raw_text.to_string()),
            confidence: 0.0,
            tier: question.tier,
            source: "llm".to_string(),
            source_url: None,
            reasoning: Some("malformed response".to_string()),
            data_as_of: None,
            contradiction: None,
        })
        .collect()
}

/// Parse one tiered LLM response into per-field answers. Single-field
/// questions accept the legacy `{value, confidence, reasoning, source_url}`
/// shape; multi-field questions emit one answer per target key, filling
/// absent keys with null values at half the global confidence.
pub fn parse_response(question: &Question, text: &str, tier: Tier) -> Vec<ExtractionAnswer> {
    let Some(span) = extract_json_span(text) else {
        return malformed_answer(question, text);
    };
    let Ok(Value::Object(obj)) = serde_json::from_str::<Value>(span) else {
        return malformed_answer(question, text);
    };

    let meta = global_meta(&obj);

    if !question.is_multi_field() {
        let field_key = question.field_key.clone();
        let value = obj.get("value").map(json_to_answer_value).unwrap_or(AnswerValue::Null);
        return vec![ExtractionAnswer {
            question_id: question.id.clone(),
            field_key,
            value,
            confidence: meta.confidence,
            tier,
            source: "llm".to_string(),
            source_url: meta.source_url,
            reasoning: meta.reasoning,
            data_as_of: None,
            contradiction: None,
        }];
    }

    question
        .field_keys()
        .into_iter()
        .map(|key| match obj.get(&key) {
            Some(value) => ExtractionAnswer {
                question_id: question.id.clone(),
                field_key: key,
                value: json_to_answer_value(value),
                confidence: meta.confidence,
                tier,
                source: "llm".to_string(),
                source_url: meta.source_url.clone(),
                reasoning: meta.reasoning.clone(),
                data_as_of: None,
                contradiction: None,
            },
            None => ExtractionAnswer {
                question_id: question.id.clone(),
                field_key: key,
                value: AnswerValue::Null,
                confidence: meta.confidence * 0.5,
                tier,
                source: "llm".to_string(),
                source_url: meta.source_url.clone(),
                reasoning: meta.reasoning.clone(),
                data_as_of: None,
                contradiction: None,
            },
        })
        .collect()
}
