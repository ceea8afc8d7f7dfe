//! merge policy: tier-by-tier contradiction-aware merge, plus the
//! derivation, injection, consolidation and normalization sub-policies that
//! run on top of the merged winner map during Aggregate (Phase 7).

use std::collections::HashMap;

use tracing::{debug, info};

use crate::model::{AnswerValue, ClassifiedPage, Contradiction, ExtractionAnswer, Tier, TIER_NONE};

/// Winner-per-field-key map produced by [`merge_answers`].
pub type WinnerMap = HashMap<String, ExtractionAnswer>;

/// Merge per-tier answer batches into a single winner per field key.
///
/// `tiers` must be supplied in ascending tier order (T1 batch, then T2, then
/// T3) — the rule `A.Tier > E.Tier` only produces the intended precedence
/// when earlier tiers have already been folded into the winner map.
pub fn merge_answers<I>(tiers: I) -> WinnerMap
where
    I: IntoIterator<Item = Vec<ExtractionAnswer>>,
{
    let mut winners: WinnerMap = HashMap::new();
    for batch in tiers {
        for mut answer in batch {
            if answer.field_key.trim().is_empty() {
                continue;
            }
            let Some(existing) = winners.get(&answer.field_key) else {
                winners.insert(answer.field_key.clone(), answer);
                continue;
            };

            if answer.tier != existing.tier
                && answer.confidence >= 0.5
                && existing.confidence >= 0.5
                && answer.value.stringify() != existing.value.stringify()
            {
                answer.contradiction = Some(Contradiction {
                    other_tier: existing.tier,
                    other_value: existing.value.clone(),
                    other_confidence: existing.confidence,
                });
                info!(
                    field = %answer.field_key,
                    winner_tier = answer.tier,
                    other_tier = existing.tier,
                    "contradiction recorded"
                );
            }

            let promote = match answer.tier.cmp(&existing.tier) {
                std::cmp::Ordering::Greater => {
                    existing.value.is_null()
                        || (!answer.value.is_null() && answer.confidence >= 0.5 * existing.confidence)
                }
                std::cmp::Ordering::Equal => answer.confidence > existing.confidence,
                std::cmp::Ordering::Less => false,
            };

            if promote {
                winners.insert(answer.field_key.clone(), answer);
            }
        }
    }
    winners
}

/// `account_name` auto-populated from `company_name` if absent.
pub fn auto_derive_account_name(winners: &mut WinnerMap) {
    if winners.contains_key("account_name") {
        return;
    }
    if let Some(company_name) = winners.get("company_name").cloned() {
        winners.insert(
            "account_name".to_string(),
            ExtractionAnswer {
                field_key: "account_name".to_string(),
                source: format!("{}+derived_account_name", company_name.source),
                ..company_name
            },
        );
    }
}

/// Pre-seeded values fill gaps at confidence 0.6, source `grata_csv`.
pub fn fill_gaps_from_seed(winners: &mut WinnerMap, seed_hints: &HashMap<String, AnswerValue>) {
    for (key, value) in seed_hints {
        if winners.contains_key(key) {
            continue;
        }
        winners.insert(
            key.clone(),
            ExtractionAnswer::tier0(key.clone(), value.clone(), 0.6, "grata_csv"),
        );
    }
}

/// Precision upgrade: if the pre-seeded value is fractional and the
/// extracted winner equals its integer truncation, replace with the
/// fractional seed value and tag the source.
pub fn apply_precision_upgrade(winners: &mut WinnerMap, seed_hints: &HashMap<String, AnswerValue>) {
    for (key, seed_value) in seed_hints {
        let Some(seed_f) = seed_value.as_f64() else { continue };
        if seed_f.fract() == 0.0 {
            continue;
        }
        let Some(winner) = winners.get_mut(key) else { continue };
        let Some(winner_f) = winner.value.as_f64() else { continue };
        if winner_f == seed_f.trunc() {
            winner.value = seed_value.clone();
            winner.source = format!("{}+precision_upgrade", winner.source);
            debug!(field = %key, "precision upgrade applied");
        }
    }
}

/// Structured page metadata becomes tier-0 answers, with
/// `appendOrUpgrade` semantics: only replace an existing same-field answer
/// when the new confidence is strictly higher.
pub fn inject_page_metadata<'a>(winners: &mut WinnerMap, pages: impl IntoIterator<Item = &'a ClassifiedPage>) {
    for page in pages {
        let Some(meta) = &page.page.metadata else { continue };
        let Some(source) = meta.source else { continue };
        let confidence = source.injection_confidence();

        if let Some(rating) = meta.rating {
            append_or_upgrade(
                winners,
                "google_reviews_rating",
                AnswerValue::Float(rating),
                confidence,
                format!("{:?}", source).to_ascii_lowercase(),
                Some(page.page.url.clone()),
            );
        }
        if let Some(count) = meta.review_count {
            append_or_upgrade(
                winners,
                "google_reviews_count",
                AnswerValue::Integer(count),
                confidence,
                format!("{:?}", source).to_ascii_lowercase(),
                Some(page.page.url.clone()),
            );
        }
        if let Some(phone) = &meta.phone {
            append_or_upgrade(
                winners,
                "phone",
                AnswerValue::String(phone.clone()),
                confidence,
                format!("{:?}", source).to_ascii_lowercase(),
                Some(page.page.url.clone()),
            );
        }
        if let Some(bbb_rating) = &meta.bbb_rating {
            append_or_upgrade(
                winners,
                "bbb_rating",
                AnswerValue::String(bbb_rating.clone()),
                confidence,
                format!("{:?}", source).to_ascii_lowercase(),
                Some(page.page.url.clone()),
            );
        }
    }
}

fn append_or_upgrade(
    winners: &mut WinnerMap,
    field_key: &str,
    value: AnswerValue,
    confidence: f64,
    source: String,
    source_url: Option<String>,
) {
    if let Some(existing) = winners.get(field_key) {
        if existing.confidence >= confidence {
            return;
        }
    }
    let mut answer = ExtractionAnswer::tier0(field_key.to_string(), value, confidence, source);
    answer.source_url = source_url;
    winners.insert(field_key.to_string(), answer);
}

/// A research-LLM review count is cross-checked against
/// pre-seeded data; if the relative agreement `1 - |Δ|/max` drops below 0.5,
/// the answer's confidence is capped below the 0.50 gap-fill threshold.
pub fn cross_check_review_count(answer: &mut ExtractionAnswer, preseeded_count: Option<i64>) {
    let Some(preseeded) = preseeded_count else { return };
    let Some(observed) = answer.value.as_f64() else { return };
    let max = observed.abs().max(preseeded as f64).max(1.0);
    let agreement = 1.0 - (observed - preseeded as f64).abs() / max;
    if agreement < 0.5 {
        answer.confidence = answer.confidence.min(0.49);
    }
}

/// A federal loan-record match for the entity (Phase 1D).
#[derive(Debug, Clone)]
pub struct LoanMatch {
    pub match_score: f64,
    pub loan_amount: f64,
    pub jobs_reported: i64,
    pub approval_date: chrono::DateTime<chrono::Utc>,
}

/// Loan-record enrichment: tier-0 `revenue_estimate` and `employees`
/// answers derived from a matched federal loan record.
pub fn loan_record_answers(loan: &LoanMatch) -> Vec<ExtractionAnswer> {
    let revenue = loan.loan_amount * 20.0 / 1_000_000.0;
    let mut revenue_answer = ExtractionAnswer::tier0(
        "revenue_estimate",
        AnswerValue::String(format!("${revenue:.1}M")),
        (loan.match_score * 0.85).clamp(0.0, 1.0),
        "loan_record",
    );
    revenue_answer.data_as_of = Some(loan.approval_date);

    let mut employees_answer = ExtractionAnswer::tier0(
        "employees",
        AnswerValue::Integer(loan.jobs_reported),
        (loan.match_score * 0.7).clamp(0.0, 1.0),
        "loan_record",
    );
    employees_answer.data_as_of = Some(loan.approval_date);

    vec![revenue_answer, employees_answer]
}

/// Parse an employee-range string as reported by a professional-network
/// profile, e.g. `"51-200"` or `"10000+"` (mapped to `[10000, 1e6]`).
pub fn parse_employee_range(raw: &str) -> Option<(f64, f64)> {
    let raw = raw.trim();
    if let Some(stripped) = raw.strip_suffix('+') {
        let lo: f64 = stripped.trim().parse().ok()?;
        return Some((lo, 1_000_000.0));
    }
    let (lo, hi) = raw.split_once('-')?;
    Some((lo.trim().parse().ok()?, hi.trim().parse().ok()?))
}

/// Cross-validate an extracted `employees` winner against an
/// external profile's reported employee range.
pub fn cross_validate_employees(winners: &mut WinnerMap, profile_range: Option<(f64, f64)>) {
    let Some((lo, hi)) = profile_range else { return };
    let Some(winner) = winners.get_mut("employees") else { return };
    let Some(value) = winner.value.as_f64() else { return };
    if value >= lo && value <= hi && winner.confidence < 0.85 {
        winner.confidence = 0.85;
        winner.source = format!("{}+linkedin_validated", winner.source);
    }
}

/// Consolidate every raw `contacts` answer (one contact per answer,
/// `AnswerValue::StringMap` keyed by `first_name`/`last_name`/`title`/`email`/
/// `phone`/`linkedin`) into a single deduplicated, capped answer.
pub fn consolidate_contacts(raw_answers: &[ExtractionAnswer]) -> Option<ExtractionAnswer> {
    let contact_answers: Vec<&ExtractionAnswer> = raw_answers
        .iter()
        .filter(|a| a.field_key == "contacts" && !a.value.is_null())
        .collect();
    if contact_answers.is_empty() {
        return None;
    }

    let mut seen_last_names = std::collections::HashSet::new();
    let mut deduped = Vec::new();
    for answer in &contact_answers {
        let last_name = contact_field(&answer.value, "last_name").unwrap_or_default();
        let key = last_name.to_ascii_lowercase();
        if key.is_empty() || seen_last_names.insert(key) {
            deduped.push((*answer).clone());
            if deduped.len() == 3 {
                break;
            }
        }
    }

    let best = contact_answers
        .iter()
        .max_by(|a, b| a.confidence.total_cmp(&b.confidence))
        .unwrap();

    Some(ExtractionAnswer {
        question_id: best.question_id.clone(),
        field_key: "contacts".to_string(),
        value: AnswerValue::StringList(
            deduped
                .iter()
                .map(|a| serde_json::to_string(&a.value).unwrap_or_default())
                .collect(),
        ),
        confidence: best.confidence,
        tier: deduped.iter().map(|a| a.tier).max().unwrap_or(TIER_NONE),
        source: best.source.clone(),
        source_url: best.source_url.clone(),
        reasoning: None,
        data_as_of: best.data_as_of,
        contradiction: None,
    })
}

fn contact_field(value: &AnswerValue, field: &str) -> Option<String> {
    match value {
        AnswerValue::StringMap(map) => map.get(field).map(|v| v.stringify()),
        _ => None,
    }
}

const OWNER_FIELDS: [(&str, &str); 6] = [
    ("owner_first_name", "first_name"),
    ("owner_last_name", "last_name"),
    ("owner_title", "title"),
    ("owner_email", "email"),
    ("owner_phone", "phone"),
    ("owner_linkedin", "linkedin"),
];

/// Backfill owner fields from `contacts[0]` when absent.
pub fn backfill_owner_from_contacts(winners: &mut WinnerMap, raw_answers: &[ExtractionAnswer]) {
    let Some(first_contact) = raw_answers
        .iter()
        .find(|a| a.field_key == "contacts" && !a.value.is_null())
        .map(|a| a.value.clone())
    else {
        return;
    };
    for (owner_key, contact_field_name) in OWNER_FIELDS {
        if winners.contains_key(owner_key) {
            continue;
        }
        if let Some(value) = contact_field(&first_contact, contact_field_name) {
            winners.insert(
                owner_key.to_string(),
                ExtractionAnswer::tier0(owner_key, AnswerValue::String(value), 0.6, "contacts[0]"),
            );
        }
    }
}

/// Canonical business-model taxonomy, ordered longest-keyword-first so
/// `"financial services"` matches before the bare `"services"` entry.
fn business_model_dictionary() -> Vec<(&'static str, &'static str)> {
    let mut entries = vec![
        ("financial services", "Financial Services"),
        ("healthcare services", "Healthcare"),
        ("software as a service", "SaaS"),
        ("e-commerce", "E-Commerce"),
        ("manufacturing", "Manufacturing"),
        ("consulting", "Professional Services"),
        ("retail", "Retail"),
        ("services", "Professional Services"),
        ("saas", "SaaS"),
    ];
    entries.sort_by_key(|(kw, _)| std::cmp::Reverse(kw.len()));
    entries
}

const CANONICAL_BUSINESS_MODELS: [&str; 6] = [
    "Financial Services",
    "Healthcare",
    "SaaS",
    "E-Commerce",
    "Manufacturing",
    "Professional Services",
];

/// Normalize `business_model` to the canonical taxonomy via
/// longest-keyword-first matching. Idempotent: an already-canonical value is
/// left untouched, with no `+bm_normalized` suffix appended.
pub fn normalize_business_model(winners: &mut WinnerMap) {
    let Some(winner) = winners.get_mut("business_model") else { return };
    let raw = winner.value.stringify();
    if CANONICAL_BUSINESS_MODELS.contains(&raw.as_str()) {
        return;
    }
    let lower = raw.to_ascii_lowercase();
    for (keyword, canonical) in business_model_dictionary() {
        if lower.contains(keyword) {
            winner.value = AnswerValue::String(canonical.to_string());
            winner.source = format!("{}+bm_normalized", winner.source);
            return;
        }
    }
}

/// Minimal illustrative NAICS reference table: valid 6-digit codes and a
/// keyword-driven SIC crosswalk used for SoS cross-referencing.
#[derive(Debug, Clone, Default)]
pub struct NaicsReference {
    pub valid_codes: std::collections::HashSet<String>,
    pub sic_crosswalk: Vec<(String, String)>, // (keyword, naics_code)
}

impl NaicsReference {
    fn closest_valid(&self, raw: &str) -> Option<String> {
        let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
        self.valid_codes
            .iter()
            .min_by_key(|code| {
                code.chars()
                    .zip(digits.chars())
                    .filter(|(a, b)| a != b)
                    .count()
                    + code.len().abs_diff(digits.len())
            })
            .cloned()
    }
}

/// NAICS validation, normalization and SoS/SIC cross-reference.
pub fn validate_naics_code(winners: &mut WinnerMap, reference: &NaicsReference, sos_keywords: &[String]) {
    let Some(winner) = winners.get_mut("naics_code") else { return };
    let raw = winner.value.stringify();
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();

    if reference.valid_codes.contains(&digits) {
        winner.value = AnswerValue::String(format!("{digits:0>6}"));
        winner.source = format!("{}+naics_validated", winner.source);
    } else if let Some(closest) = reference.closest_valid(&raw) {
        winner.value = AnswerValue::String(closest);
        winner.confidence *= 0.7;
        winner.source = format!("{}+naics_corrected", winner.source);
    } else {
        return;
    }

    let code = winner.value.stringify();
    let cross_reference = reference
        .sic_crosswalk
        .iter()
        .find(|(_, naics)| *naics == code)
        .map(|(keyword, _)| keyword.clone());

    match cross_reference {
        Some(keyword) if sos_keywords.iter().any(|k| k.eq_ignore_ascii_case(&keyword)) => {
            winner.confidence = (winner.confidence + 0.15).min(0.95);
        }
        Some(_) => {
            winner.confidence = (winner.confidence + 0.05).min(0.95);
        }
        None if !sos_keywords.is_empty() => {
            winner.confidence *= 0.85;
        }
        None => {}
    }
}

/// Scan Sos-typed pages for any SIC crosswalk keyword, case-insensitively.
/// Feeds [`validate_naics_code`]'s SoS/SIC cross-reference; without this a
/// `PageType::Sos` page's markdown never reaches that check.
pub fn sos_page_keywords(pages: &[ClassifiedPage], reference: &NaicsReference) -> Vec<String> {
    let mut found = Vec::new();
    for page in pages.iter().filter(|p| p.page_type == crate::model::PageType::Sos) {
        let markdown = page.page.markdown.to_ascii_lowercase();
        for (keyword, _) in &reference.sic_crosswalk {
            if markdown.contains(&keyword.to_ascii_lowercase()) && !found.iter().any(|k: &String| k.eq_ignore_ascii_case(keyword)) {
                found.push(keyword.clone());
            }
        }
    }
    found
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{TIER_BALANCED, TIER_CHEAP};

    fn answer(field_key: &str, value: AnswerValue, confidence: f64, tier: Tier) -> ExtractionAnswer {
        ExtractionAnswer {
            question_id: "q".into(),
            field_key: field_key.into(),
            value,
            confidence,
            tier,
            source: "llm".into(),
            source_url: Some("https://example.com".into()),
            reasoning: None,
            data_as_of: None,
            contradiction: None,
        }
    }

    #[test]
    fn scenario_1_tier_precedence() {
        let t1 = vec![answer("industry", "Tech".into(), 0.8, TIER_CHEAP)];
        let t2 = vec![answer("industry", "Technology Services".into(), 0.5, TIER_BALANCED)];
        let winners = merge_answers([t1, t2]);
        let winner = &winners["industry"];
        assert_eq!(winner.value, AnswerValue::String("Technology Services".into()));
        assert_eq!(winner.tier, TIER_BALANCED);
    }

    #[test]
    fn scenario_2_null_guard() {
        let t1 = vec![answer("hq_address", "5021 Verdugo Way".into(), 0.92, TIER_CHEAP)];
        let t2 = vec![answer("hq_address", AnswerValue::Null, 0.75, TIER_BALANCED)];
        let winners = merge_answers([t1, t2]);
        let winner = &winners["hq_address"];
        assert_eq!(winner.value, AnswerValue::String("5021 Verdugo Way".into()));
        assert_eq!(winner.tier, TIER_CHEAP);
    }

    #[test]
    fn scenario_3_contradiction_recorded() {
        let t1 = vec![answer("revenue", "1.0M".into(), 0.6, TIER_CHEAP)];
        let t2 = vec![answer("revenue", "2.0M".into(), 0.7, TIER_BALANCED)];
        let winners = merge_answers([t1, t2]);
        let winner = &winners["revenue"];
        let contradiction = winner.contradiction.as_ref().expect("expected contradiction");
        assert_eq!(contradiction.other_tier, TIER_CHEAP);
        assert_eq!(contradiction.other_value, AnswerValue::String("1.0M".into()));
    }

    #[test]
    fn scenario_4_precision_upgrade() {
        let mut winners = merge_answers([vec![answer(
            "google_reviews_rating",
            AnswerValue::Integer(4),
            0.8,
            TIER_CHEAP,
        )]]);
        let mut seed = HashMap::new();
        seed.insert("google_reviews_rating".to_string(), AnswerValue::Float(4.6));
        apply_precision_upgrade(&mut winners, &seed);
        let winner = &winners["google_reviews_rating"];
        assert_eq!(winner.value, AnswerValue::Float(4.6));
        assert!(winner.source.ends_with("+precision_upgrade"));
    }

    #[test]
    fn one_answer_per_distinct_field_key() {
        let t1 = vec![
            answer("a", "1".into(), 0.5, TIER_CHEAP),
            answer("b", "2".into(), 0.5, TIER_CHEAP),
            answer("a", "3".into(), 0.9, TIER_CHEAP),
        ];
        let winners = merge_answers([t1]);
        assert_eq!(winners.len(), 2);
        assert_eq!(winners["a"].value, AnswerValue::String("3".into()));
    }

    #[test]
    fn empty_field_key_skipped() {
        let t1 = vec![answer("", "x".into(), 0.9, TIER_CHEAP)];
        let winners = merge_answers([t1]);
        assert!(winners.is_empty());
    }

    #[test]
    fn business_model_normalization_idempotent() {
        let mut winners = merge_answers([vec![answer(
            "business_model",
            AnswerValue::String("Financial Services".into()),
            0.8,
            TIER_CHEAP,
        )]]);
        normalize_business_model(&mut winners);
        assert!(!winners["business_model"].source.contains("bm_normalized"));
    }

    #[test]
    fn business_model_normalization_longest_match_first() {
        let mut winners = merge_answers([vec![answer(
            "business_model",
            AnswerValue::String("We offer financial services to clients".into()),
            0.8,
            TIER_CHEAP,
        )]]);
        normalize_business_model(&mut winners);
        assert_eq!(
            winners["business_model"].value,
            AnswerValue::String("Financial Services".into())
        );
    }

    #[test]
    fn consolidate_contacts_dedupes_and_caps() {
        let raw = vec![
            answer(
                "contacts",
                AnswerValue::StringMap(HashMap::from([
                    ("last_name".to_string(), "Smith".into()),
                    ("first_name".to_string(), "Jane".into()),
                ])),
                0.7,
                TIER_CHEAP,
            ),
            answer(
                "contacts",
                AnswerValue::StringMap(HashMap::from([
                    ("last_name".to_string(), "smith".to_string().into()),
                    ("first_name".to_string(), "J.".into()),
                ])),
                0.9,
                TIER_BALANCED,
            ),
            answer(
                "contacts",
                AnswerValue::StringMap(HashMap::from([("last_name".to_string(), "Doe".into())])),
                0.6,
                TIER_CHEAP,
            ),
        ];
        let merged = consolidate_contacts(&raw).unwrap();
        let AnswerValue::StringList(list) = merged.value else {
            panic!("expected string list")
        };
        assert_eq!(list.len(), 2);
        assert_eq!(merged.confidence, 0.9);
    }

    #[test]
    fn parse_employee_range_handles_plus_suffix() {
        assert_eq!(parse_employee_range("10000+"), Some((10000.0, 1_000_000.0)));
        assert_eq!(parse_employee_range("51-200"), Some((51.0, 200.0)));
    }

    #[test]
    fn naics_normalizes_valid_code_to_six_digits() {
        let mut winners = merge_answers([vec![answer(
            "naics_code",
            AnswerValue::String("5415".into()),
            0.6,
            TIER_CHEAP,
        )]]);
        let mut reference = NaicsReference::default();
        reference.valid_codes.insert("541500".to_string());
        reference.valid_codes.insert("5415".to_string());
        validate_naics_code(&mut winners, &reference, &[]);
        // not matched exactly (digits "5415" != any stored code unless equal) - falls to closest
        assert!(winners["naics_code"].source.contains("naics_"));
    }

    #[test]
    fn sos_page_keywords_matches_crosswalk_terms_case_insensitively() {
        let mut reference = NaicsReference::default();
        reference.sic_crosswalk.push(("Professional Engineering".to_string(), "541330".to_string()));
        reference.sic_crosswalk.push(("retail bakery".to_string(), "311811".to_string()));
        let page = ClassifiedPage {
            page: crate::model::CrawledPage {
                url: "https://www.opencorporates.com/companies?q=acme".to_string(),
                title: "[sos] Acme".to_string(),
                markdown: "Registered agent filing for PROFESSIONAL ENGINEERING services.".to_string(),
                status_code: 200,
                metadata: None,
            },
            page_type: crate::model::PageType::Sos,
            confidence: 1.0,
        };
        let found = sos_page_keywords(&[page], &reference);
        assert_eq!(found, vec!["Professional Engineering".to_string()]);
    }

    proptest::proptest! {
        #[test]
        fn re_merging_the_winner_map_is_idempotent(
            confidences in proptest::collection::vec(0.0f64..=1.0, 1..8),
            tiers in proptest::collection::vec(0u8..=3, 1..8),
        ) {
            let batch: Vec<ExtractionAnswer> = confidences
                .iter()
                .zip(tiers.iter())
                .enumerate()
                .map(|(i, (confidence, tier))| answer(&format!("field_{}", i % 4), AnswerValue::String(format!("v{i}")), *confidence, *tier))
                .collect();

            let winners = merge_answers([batch]);
            let winners_as_batch: Vec<ExtractionAnswer> = winners.values().cloned().collect();
            let re_merged = merge_answers([winners_as_batch]);

            proptest::prop_assert_eq!(winners.len(), re_merged.len());
            for (key, answer) in &winners {
                let again = &re_merged[key];
                proptest::prop_assert_eq!(answer.value.stringify(), again.value.stringify());
                proptest::prop_assert_eq!(answer.confidence, again.confidence);
            }
        }
    }
}
