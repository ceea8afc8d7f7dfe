//! Four-dimension quality scoring: confidence, completeness, diversity and
//! freshness, combined by configurable weights into the score the Gate phase
//! compares against its pass threshold.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};

use crate::merge::WinnerMap;
use crate::model::ExtractionAnswer;
use crate::registry::FieldRegistry;

/// Weights applied to each scoring dimension before summing to a single
/// 0.0-1.0 quality score.
#[derive(Debug, Clone, Copy)]
pub struct QualityWeights {
    pub confidence: f64,
    pub completeness: f64,
    pub diversity: f64,
    pub freshness: f64,
}

impl Default for QualityWeights {
    fn default() -> Self {
        Self {
            confidence: 0.4,
            completeness: 0.3,
            diversity: 0.2,
            freshness: 0.1,
        }
    }
}

impl QualityWeights {
    pub fn with_confidence(mut self, weight: f64) -> Self {
        self.confidence = weight;
        self
    }

    pub fn with_completeness(mut self, weight: f64) -> Self {
        self.completeness = weight;
        self
    }

    pub fn with_diversity(mut self, weight: f64) -> Self {
        self.diversity = weight;
        self
    }

    pub fn with_freshness(mut self, weight: f64) -> Self {
        self.freshness = weight;
        self
    }

    fn total(&self) -> f64 {
        self.confidence + self.completeness + self.diversity + self.freshness
    }
}

/// Per-dimension scores plus the weighted total, retained on the run record
/// for observability and for debugging gate decisions.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QualityScore {
    pub confidence: f64,
    pub completeness: f64,
    pub diversity: f64,
    pub freshness: f64,
    pub total: f64,
}

/// Per-field weight: registry-required fields count double.
fn field_weight(registry: &FieldRegistry, field_key: &str) -> f64 {
    match registry.get(field_key) {
        Some(mapping) if mapping.required => 2.0,
        _ => 1.0,
    }
}

fn diversity_for_field(distinct_sources: usize, has_contradiction: bool) -> f64 {
    let base: f64 = match distinct_sources {
        0 => 0.5,
        1 => 0.5,
        2 => 0.75,
        _ => 1.0,
    };
    let penalty = if has_contradiction { 0.2 } else { 0.0 };
    (base - penalty).max(0.0)
}

fn freshness_for_field(data_as_of: Option<DateTime<Utc>>, now: DateTime<Utc>) -> f64 {
    let Some(data_as_of) = data_as_of else { return 1.0 };
    let age_days = (now - data_as_of).num_days().max(0) as f64;
    if age_days <= 90.0 {
        1.0
    } else if age_days <= 365.0 {
        1.0 - (age_days - 90.0) / (365.0 - 90.0) * 0.5
    } else if age_days <= 1095.0 {
        0.5 - (age_days - 365.0) / (1095.0 - 365.0) * 0.3
    } else {
        0.2
    }
}

/// Count distinct source URLs observed for each field key across every
/// answer produced during extraction (winners and losers alike).
fn source_url_counts(all_answers: &[ExtractionAnswer]) -> HashMap<String, usize> {
    let mut by_field: HashMap<String, HashSet<&str>> = HashMap::new();
    for answer in all_answers {
        if let Some(url) = answer.source_url.as_deref() {
            by_field.entry(answer.field_key.clone()).or_default().insert(url);
        }
    }
    by_field.into_iter().map(|(k, v)| (k, v.len())).collect()
}

/// Combine the four dimensions over the scoreable field set: every field key
/// targeted by at least one question, plus `account_name` unconditionally.
pub fn score(
    winners: &WinnerMap,
    all_answers: &[ExtractionAnswer],
    scoreable_keys: &[&str],
    registry: &FieldRegistry,
    weights: QualityWeights,
    now: DateTime<Utc>,
) -> QualityScore {
    let url_counts = source_url_counts(all_answers);

    let mut confidence_num = 0.0;
    let mut completeness_num = 0.0;
    let mut diversity_num = 0.0;
    let mut freshness_num = 0.0;
    let mut weight_sum = 0.0;

    let mut keys: Vec<&str> = scoreable_keys.to_vec();
    if !keys.contains(&"account_name") {
        keys.push("account_name");
    }

    for key in keys {
        let weight = field_weight(registry, key);
        weight_sum += weight;

        match winners.get(key) {
            Some(winner) => {
                confidence_num += weight * winner.confidence;
                completeness_num += weight;
                let distinct = url_counts.get(key).copied().unwrap_or(0);
                diversity_num += weight * diversity_for_field(distinct, winner.contradiction.is_some());
                freshness_num += weight * freshness_for_field(winner.data_as_of, now);
            }
            None => {
                diversity_num += weight * 0.5;
                freshness_num += weight * freshness_for_field(None, now);
            }
        }
    }

    let (confidence, completeness, diversity, freshness) = if weight_sum > 0.0 {
        (
            confidence_num / weight_sum,
            completeness_num / weight_sum,
            diversity_num / weight_sum,
            freshness_num / weight_sum,
        )
    } else {
        (0.0, 0.0, 0.0, 0.0)
    };

    let total_weight = weights.total();
    let total = if total_weight <= 0.0 {
        confidence
    } else {
        (confidence * weights.confidence
            + completeness * weights.completeness
            + diversity * weights.diversity
            + freshness * weights.freshness)
            / total_weight
    };

    QualityScore {
        confidence,
        completeness,
        diversity,
        freshness,
        total,
    }
}
