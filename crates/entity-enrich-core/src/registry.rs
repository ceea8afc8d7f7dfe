//! Field registry and validation/coercion.

use std::collections::HashMap;

use regex::Regex;
use tracing::warn;

use crate::error::{Error, Result};
use crate::model::{AnswerValue, DataType, ExtractionAnswer, FieldMapping, FieldValue};

/// Immutable-within-a-run collection of field mappings, keyed by canonical key.
#[derive(Debug, Clone, Default)]
pub struct FieldRegistry {
    mappings: HashMap<String, FieldMapping>,
}

impl FieldRegistry {
    pub fn new(mappings: Vec<FieldMapping>) -> Result<Self> {
        let mut by_key = HashMap::with_capacity(mappings.len());
        for mapping in mappings {
            let key = mapping.key.clone();
            if by_key.insert(key.clone(), mapping).is_some() {
                return Err(Error::DuplicateFieldKey(key));
            }
        }
        Ok(Self { mappings: by_key })
    }

    pub fn get(&self, key: &str) -> Option<&FieldMapping> {
        self.mappings.get(key)
    }

    pub fn required_keys(&self) -> impl Iterator<Item = &str> {
        self.mappings
            .values()
            .filter(|m| m.required)
            .map(|m| m.key.as_str())
    }

    pub fn all_keys(&self) -> impl Iterator<Item = &str> {
        self.mappings.keys().map(|k| k.as_str())
    }

    pub fn len(&self) -> usize {
        self.mappings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mappings.is_empty()
    }
}

/// Running tally of validation drops, logged as a summary at the end of a run.
#[derive(Debug, Clone, Default)]
pub struct ValidationSummary {
    pub dropped: usize,
    pub dropped_reasons: HashMap<String, usize>,
}

impl ValidationSummary {
    fn record_drop(&mut self, field_key: &str) {
        self.dropped += 1;
        *self.dropped_reasons.entry(field_key.to_string()).or_insert(0) += 1;
    }
}

/// Validate and coerce a single winning answer into a `FieldValue` according
/// to its registered `DataType`. Returns `None` (and records a drop) on failure.
pub fn validate_field(
    registry: &FieldRegistry,
    answer: &ExtractionAnswer,
    summary: &mut ValidationSummary,
) -> Option<FieldValue> {
    let mapping = registry.get(&answer.field_key)?;
    let coerced = coerce(mapping.data_type, &answer.value, mapping)?;
    if matches!(mapping.data_type, DataType::String) {
        if let Some(pattern) = mapping.validation_regex.as_deref() {
            let text = coerced.stringify();
            match Regex::new(pattern) {
                Ok(re) if re.is_match(&text) => {}
                _ => {
                    summary.record_drop(&answer.field_key);
                    warn!(field = %answer.field_key, "validation regex mismatch, dropping");
                    return None;
                }
            }
        }
    }
    Some(FieldValue {
        field_key: answer.field_key.clone(),
        sf_field: mapping.sf_field.clone(),
        value: coerced,
        confidence: answer.confidence.clamp(0.0, 1.0),
        source: answer.source.clone(),
        tier: answer.tier,
        data_as_of: answer.data_as_of,
    })
}

fn coerce(data_type: DataType, value: &AnswerValue, mapping: &FieldMapping) -> Option<AnswerValue> {
    match data_type {
        DataType::String => {
            if value.is_null() {
                return None;
            }
            let mut text = value.stringify();
            if let Some(max_len) = mapping.max_length {
                if text.len() > max_len {
                    let mut boundary = max_len;
                    while boundary > 0 && !text.is_char_boundary(boundary) {
                        boundary -= 1;
                    }
                    text.truncate(boundary);
                }
            }
            Some(AnswerValue::String(text))
        }
        DataType::Number => {
            let f = value.as_f64()?;
            if f.fract() == 0.0 && f.abs() < i64::MAX as f64 {
                Some(AnswerValue::Integer(f as i64))
            } else {
                Some(AnswerValue::Float(f))
            }
        }
        DataType::Integer => {
            let f = value.as_f64()?;
            Some(AnswerValue::Integer(f.trunc() as i64))
        }
        DataType::Float | DataType::Currency => {
            let cleaned = match value {
                AnswerValue::String(s) => s.trim().trim_start_matches('$').replace(',', ""),
                other => other.stringify(),
            };
            cleaned.trim().parse::<f64>().ok().map(AnswerValue::Float)
        }
        DataType::Boolean => coerce_bool(value),
        DataType::Url => coerce_url(value),
        DataType::Email => coerce_email(value),
        DataType::Phone => coerce_phone(value),
        DataType::Json => {
            if value.is_null() {
                None
            } else {
                Some(value.clone())
            }
        }
    }
}

fn coerce_bool(value: &AnswerValue) -> Option<AnswerValue> {
    match value {
        AnswerValue::Bool(b) => Some(AnswerValue::Bool(*b)),
        AnswerValue::Integer(i) => Some(AnswerValue::Bool(*i != 0)),
        AnswerValue::Float(f) => Some(AnswerValue::Bool(*f != 0.0)),
        AnswerValue::String(s) => {
            let lower = s.trim().to_ascii_lowercase();
            match lower.as_str() {
                "true" | "yes" | "1" => Some(AnswerValue::Bool(true)),
                "false" | "no" | "0" => Some(AnswerValue::Bool(false)),
                _ => None,
            }
        }
        _ => None,
    }
}

fn coerce_url(value: &AnswerValue) -> Option<AnswerValue> {
    let raw = value.stringify();
    let raw = raw.trim();
    let (scheme, rest) = raw.split_once("://")?;
    if !scheme.eq_ignore_ascii_case("http") && !scheme.eq_ignore_ascii_case("https") {
        return None;
    }
    let host = rest.split(['/', '?', '#']).next().unwrap_or("");
    if host.is_empty() {
        return None;
    }
    Some(AnswerValue::String(raw.to_string()))
}

fn coerce_email(value: &AnswerValue) -> Option<AnswerValue> {
    let raw = value.stringify();
    let raw = raw.trim();
    let (local, domain) = raw.split_once('@')?;
    if local.is_empty() || domain.is_empty() || !domain.contains('.') || domain.contains(' ') {
        return None;
    }
    Some(AnswerValue::String(raw.to_string()))
}

fn coerce_phone(value: &AnswerValue) -> Option<AnswerValue> {
    let raw = value.stringify();
    let filtered: String = raw
        .chars()
        .filter(|c| c.is_ascii_digit() || matches!(c, '+' | ' ' | '-' | '(' | ')'))
        .collect();
    let digit_count = filtered.chars().filter(|c| c.is_ascii_digit()).count();
    if digit_count < 7 {
        return None;
    }
    Some(AnswerValue::String(filtered))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TIER_CHEAP;

    fn mapping(key: &str, data_type: DataType) -> FieldMapping {
        FieldMapping {
            key: key.to_string(),
            sf_field: key.to_string(),
            sf_object: "Account".to_string(),
            data_type,
            required: false,
            max_length: None,
            validation_regex: None,
        }
    }

    fn answer(field_key: &str, value: AnswerValue) -> ExtractionAnswer {
        ExtractionAnswer {
            question_id: "q1".into(),
            field_key: field_key.into(),
            value,
            confidence: 0.9,
            tier: TIER_CHEAP,
            source: "test".into(),
            source_url: None,
            reasoning: None,
            data_as_of: None,
            contradiction: None,
        }
    }

    #[test]
    fn currency_strips_dollar_and_commas() {
        let registry = FieldRegistry::new(vec![mapping("revenue_estimate", DataType::Currency)]).unwrap();
        let mut summary = ValidationSummary::default();
        let a = answer("revenue_estimate", AnswerValue::String("$1,234.50".into()));
        let fv = validate_field(&registry, &a, &mut summary).unwrap();
        assert_eq!(fv.value, AnswerValue::Float(1234.50));
        assert_eq!(summary.dropped, 0);
    }

    #[test]
    fn boolean_coerces_yes_no() {
        let registry = FieldRegistry::new(vec![mapping("is_active", DataType::Boolean)]).unwrap();
        let mut summary = ValidationSummary::default();
        let a = answer("is_active", AnswerValue::String("Yes".into()));
        let fv = validate_field(&registry, &a, &mut summary).unwrap();
        assert_eq!(fv.value, AnswerValue::Bool(true));
    }

    #[test]
    fn phone_requires_min_digits() {
        let registry = FieldRegistry::new(vec![mapping("phone", DataType::Phone)]).unwrap();
        let mut summary = ValidationSummary::default();
        let short = answer("phone", AnswerValue::String("12345".into()));
        assert!(validate_field(&registry, &short, &mut summary).is_none());
        assert_eq!(summary.dropped, 1);

        let mut summary = ValidationSummary::default();
        let full = answer("phone", AnswerValue::String("(555) 123-4567".into()));
        assert!(validate_field(&registry, &full, &mut summary).is_some());
    }

    #[test]
    fn url_requires_http_scheme_and_host() {
        let registry = FieldRegistry::new(vec![mapping("website", DataType::Url)]).unwrap();
        let mut summary = ValidationSummary::default();
        let bad = answer("website", AnswerValue::String("ftp://example.com".into()));
        assert!(validate_field(&registry, &bad, &mut summary).is_none());

        let mut summary = ValidationSummary::default();
        let good = answer("website", AnswerValue::String("https://example.com/path".into()));
        assert!(validate_field(&registry, &good, &mut summary).is_some());
    }

    #[test]
    fn email_requires_at_and_domain_dot() {
        let registry = FieldRegistry::new(vec![mapping("owner_email", DataType::Email)]).unwrap();
        let mut summary = ValidationSummary::default();
        let bad = answer("owner_email", AnswerValue::String("not-an-email".into()));
        assert!(validate_field(&registry, &bad, &mut summary).is_none());

        let mut summary = ValidationSummary::default();
        let good = answer("owner_email", AnswerValue::String("jane@example.com".into()));
        assert!(validate_field(&registry, &good, &mut summary).is_some());
    }

    #[test]
    fn string_max_length_truncates() {
        let mut m = mapping("about", DataType::String);
        m.max_length = Some(5);
        let registry = FieldRegistry::new(vec![m]).unwrap();
        let mut summary = ValidationSummary::default();
        let a = answer("about", AnswerValue::String("abcdefgh".into()));
        let fv = validate_field(&registry, &a, &mut summary).unwrap();
        assert_eq!(fv.value, AnswerValue::String("abcde".into()));
    }

    #[test]
    fn string_max_length_truncates_at_a_char_boundary_not_mid_multibyte_char() {
        let mut m = mapping("about", DataType::String);
        m.max_length = Some(4);
        let registry = FieldRegistry::new(vec![m]).unwrap();
        let mut summary = ValidationSummary::default();
        let a = answer("about", AnswerValue::String("caf\u{e9} menu".into()));
        let fv = validate_field(&registry, &a, &mut summary).unwrap();
        assert_eq!(fv.value, AnswerValue::String("caf".into()));
    }

    #[test]
    fn duplicate_field_key_rejected() {
        let err = FieldRegistry::new(vec![
            mapping("naics_code", DataType::String),
            mapping("naics_code", DataType::String),
        ])
        .unwrap_err();
        assert!(matches!(err, Error::DuplicateFieldKey(_)));
    }
}
