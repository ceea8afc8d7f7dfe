//! Core data model: entities, pages, questions, answers and field values.
//!
//! Types here are the nouns every phase in `entity-enrich-pipeline` passes
//! between each other. Nothing in this module performs I/O.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Conceptual extraction tier. `0` marks non-LLM answers (pre-seeded, derived,
/// registry/loan-record); `1`/`2`/`3` are the cheap/balanced/expert LLM tiers.
pub type Tier = u8;

pub const TIER_NONE: Tier = 0;
pub const TIER_CHEAP: Tier = 1;
pub const TIER_BALANCED: Tier = 2;
pub const TIER_EXPERT: Tier = 3;

/// A business entity to enrich, identified by its primary web presence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    pub primary_url: String,
    pub display_name: Option<String>,
    pub address_line: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub postal_code: Option<String>,
    /// Identifier in the tracking system (Notion-style page, spreadsheet row, etc).
    pub tracking_record_id: String,
    /// Identifier in the system-of-record, if this entity was previously written.
    pub sor_id: Option<String>,
    /// Pre-seeded vendor hints, e.g. from a CSV load: canonical field key -> value.
    #[serde(default)]
    pub seed_hints: HashMap<String, AnswerValue>,
}

impl Entity {
    /// Best-effort registrable domain derived from the primary URL, used as a
    /// stable cache key and as a fallback display name.
    pub fn normalized_domain(&self) -> String {
        normalize_domain(&self.primary_url)
    }
}

/// Strip scheme, `www.` prefix, path/query/fragment, and trailing dot from a URL,
/// producing a stable, lower-cased cache key.
pub fn normalize_domain(url: &str) -> String {
    let without_scheme = url
        .trim()
        .rsplit("://")
        .next()
        .unwrap_or(url)
        .to_ascii_lowercase();
    let host = without_scheme
        .split(['/', '?', '#'])
        .next()
        .unwrap_or(&without_scheme);
    let host = host.strip_prefix("www.").unwrap_or(host);
    host.trim_end_matches('.').to_string()
}

/// Source of structured page metadata scraped or supplied out-of-band.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetadataSource {
    Perplexity,
    JinaSearch,
    GoogleApi,
    Regex,
}

impl MetadataSource {
    /// Confidence assigned to a tier-0 answer synthesized from this source.
    pub fn injection_confidence(self) -> f64 {
        match self {
            MetadataSource::GoogleApi => 0.98,
            MetadataSource::JinaSearch => 0.85,
            MetadataSource::Perplexity => 0.70,
            MetadataSource::Regex => 0.95,
        }
    }
}

/// Structured supplementary data attached to a crawled page.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PageMetadata {
    pub rating: Option<f64>,
    pub review_count: Option<i64>,
    pub phone: Option<String>,
    pub bbb_rating: Option<String>,
    pub source: Option<MetadataSource>,
}

/// A single fetched page, prior to classification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawledPage {
    pub url: String,
    pub title: String,
    pub markdown: String,
    pub status_code: u16,
    pub metadata: Option<PageMetadata>,
}

/// Closed set of page categories the classifier can assign.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PageType {
    Homepage,
    About,
    Services,
    Products,
    Pricing,
    Careers,
    Contact,
    Team,
    Blog,
    News,
    Faq,
    Testimonials,
    CaseStudies,
    Partners,
    Legal,
    Investors,
    Bbb,
    GoogleMaps,
    Sos,
    Linkedin,
    Other,
}

impl PageType {
    /// The four types that come from external registries rather than the
    /// entity's own site; always injected as supplementary context.
    pub const EXTERNAL: [PageType; 4] = [
        PageType::Bbb,
        PageType::GoogleMaps,
        PageType::Sos,
        PageType::Linkedin,
    ];

    pub fn is_external(self) -> bool {
        Self::EXTERNAL.contains(&self)
    }

    /// Title prefix used by external-source ingestion, e.g. `"[bbb] "`.
    pub fn title_prefix(self) -> Option<&'static str> {
        match self {
            PageType::Bbb => Some("[bbb] "),
            PageType::GoogleMaps => Some("[google_maps] "),
            PageType::Sos => Some("[sos] "),
            PageType::Linkedin => Some("[linkedin] "),
            _ => None,
        }
    }

    /// Parse a page type from an LLM/registry string, defaulting to `None` for
    /// anything outside the closed set (callers coerce to `Other` at confidence 0).
    pub fn parse(raw: &str) -> Option<PageType> {
        Some(match raw.trim().to_ascii_lowercase().as_str() {
            "homepage" => PageType::Homepage,
            "about" => PageType::About,
            "services" => PageType::Services,
            "products" => PageType::Products,
            "pricing" => PageType::Pricing,
            "careers" => PageType::Careers,
            "contact" => PageType::Contact,
            "team" => PageType::Team,
            "blog" => PageType::Blog,
            "news" => PageType::News,
            "faq" => PageType::Faq,
            "testimonials" => PageType::Testimonials,
            "case_studies" => PageType::CaseStudies,
            "partners" => PageType::Partners,
            "legal" => PageType::Legal,
            "investors" => PageType::Investors,
            "bbb" => PageType::Bbb,
            "google_maps" => PageType::GoogleMaps,
            "sos" => PageType::Sos,
            "linkedin" => PageType::Linkedin,
            "other" => PageType::Other,
            _ => return None,
        })
    }
}

/// A crawled page tagged with its classification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifiedPage {
    pub page: CrawledPage,
    pub page_type: PageType,
    pub confidence: f64,
}

/// Mapping from page type to the ordered pages that were classified into it.
pub type PageIndex = indexmap::IndexMap<PageType, Vec<ClassifiedPage>>;

/// A single extraction question posed against one or more candidate pages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Question {
    pub id: String,
    pub text: String,
    /// Canonical field key, or a comma-delimited group for multi-field extraction.
    pub field_key: String,
    /// Restricts candidate pages by type; empty means "any".
    #[serde(default)]
    pub page_types: Vec<PageType>,
    #[serde(default = "default_tier")]
    pub tier: Tier,
    pub output_format: String,
    pub instructions: Option<String>,
}

fn default_tier() -> Tier {
    TIER_CHEAP
}

impl Question {
    /// Split a (possibly comma-delimited) field key group into its member keys.
    pub fn field_keys(&self) -> Vec<String> {
        self.field_key
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    }

    pub fn is_multi_field(&self) -> bool {
        self.field_keys().len() > 1
    }
}

/// Supported coercion target types for registry fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    String,
    Number,
    Integer,
    Float,
    Currency,
    Boolean,
    Url,
    Email,
    Phone,
    Json,
}

impl DataType {
    pub fn parse(raw: &str) -> Option<DataType> {
        Some(match raw.trim().to_ascii_lowercase().as_str() {
            "string" | "text" => DataType::String,
            "number" => DataType::Number,
            "integer" | "int" => DataType::Integer,
            "currency" => DataType::Currency,
            "float" | "double" | "decimal" => DataType::Float,
            "boolean" | "bool" => DataType::Boolean,
            "url" => DataType::Url,
            "email" => DataType::Email,
            "phone" => DataType::Phone,
            "json" => DataType::Json,
            _ => return None,
        })
    }
}

/// A single registry entry describing how a canonical field maps onto the
/// system-of-record and how its value should be validated/coerced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldMapping {
    pub key: String,
    pub sf_field: String,
    pub sf_object: String,
    pub data_type: DataType,
    pub required: bool,
    pub max_length: Option<usize>,
    pub validation_regex: Option<String>,
}

/// Polymorphic answer value: the tagged union called for in the design notes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AnswerValue {
    String(String),
    Integer(i64),
    Float(f64),
    Bool(bool),
    StringList(Vec<String>),
    StringMap(HashMap<String, AnswerValue>),
    Null,
}

impl AnswerValue {
    pub fn is_null(&self) -> bool {
        matches!(self, AnswerValue::Null)
    }

    /// Default stringification used by the `string`/`text` coercion path and
    /// by value-equality checks in the merge policy.
    pub fn stringify(&self) -> String {
        match self {
            AnswerValue::String(s) => s.clone(),
            AnswerValue::Integer(i) => i.to_string(),
            AnswerValue::Float(f) => {
                if f.fract() == 0.0 {
                    format!("{f:.0}")
                } else {
                    f.to_string()
                }
            }
            AnswerValue::Bool(b) => b.to_string(),
            AnswerValue::StringList(v) => v.join(", "),
            AnswerValue::StringMap(_) => {
                serde_json::to_string(self).unwrap_or_default()
            }
            AnswerValue::Null => String::new(),
        }
    }

    /// Best-effort float view, used by precision-upgrade and cross-validation logic.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            AnswerValue::Integer(i) => Some(*i as f64),
            AnswerValue::Float(f) => Some(*f),
            AnswerValue::String(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        }
    }
}

impl From<&str> for AnswerValue {
    fn from(value: &str) -> Self {
        AnswerValue::String(value.to_string())
    }
}

impl From<String> for AnswerValue {
    fn from(value: String) -> Self {
        AnswerValue::String(value)
    }
}

impl From<f64> for AnswerValue {
    fn from(value: f64) -> Self {
        AnswerValue::Float(value)
    }
}

impl From<i64> for AnswerValue {
    fn from(value: i64) -> Self {
        AnswerValue::Integer(value)
    }
}

impl From<bool> for AnswerValue {
    fn from(value: bool) -> Self {
        AnswerValue::Bool(value)
    }
}

/// A lower-tier observation that disagreed with the winning answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contradiction {
    pub other_tier: Tier,
    pub other_value: AnswerValue,
    pub other_confidence: f64,
}

/// A single piece of evidence for a field, produced by some tier of extraction
/// (or synthesized at tier 0 from a non-LLM source).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionAnswer {
    pub question_id: String,
    pub field_key: String,
    pub value: AnswerValue,
    pub confidence: f64,
    pub tier: Tier,
    pub source: String,
    pub source_url: Option<String>,
    pub reasoning: Option<String>,
    pub data_as_of: Option<DateTime<Utc>>,
    pub contradiction: Option<Contradiction>,
}

impl ExtractionAnswer {
    /// Build a tier-0 answer; used by metadata injection, loan-record
    /// enrichment, derived-field and pre-seeded-value paths.
    pub fn tier0(field_key: impl Into<String>, value: AnswerValue, confidence: f64, source: impl Into<String>) -> Self {
        Self {
            question_id: String::new(),
            field_key: field_key.into(),
            value,
            confidence,
            tier: TIER_NONE,
            source: source.into(),
            source_url: None,
            reasoning: None,
            data_as_of: None,
            contradiction: None,
        }
    }
}

/// The validated, coerced winner for a single field key — what ultimately
/// gets written to the system-of-record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldValue {
    pub field_key: String,
    pub sf_field: String,
    pub value: AnswerValue,
    pub confidence: f64,
    pub source: String,
    pub tier: Tier,
    pub data_as_of: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_domain() {
        assert_eq!(normalize_domain("https://www.Example.com/about"), "example.com");
        assert_eq!(normalize_domain("http://example.com"), "example.com");
        assert_eq!(normalize_domain("example.com."), "example.com");
    }

    #[test]
    fn page_type_parse_rejects_unknown() {
        assert_eq!(PageType::parse("bogus"), None);
        assert_eq!(PageType::parse("Homepage"), Some(PageType::Homepage));
    }

    #[test]
    fn question_splits_multi_field_keys() {
        let q = Question {
            id: "q1".into(),
            text: "t".into(),
            field_key: "owner_first_name, owner_last_name".into(),
            page_types: vec![],
            tier: TIER_CHEAP,
            output_format: "json".into(),
            instructions: None,
        };
        assert_eq!(q.field_keys(), vec!["owner_first_name", "owner_last_name"]);
        assert!(q.is_multi_field());
    }

    #[test]
    fn answer_value_stringify_matches_spec_examples() {
        assert_eq!(AnswerValue::Integer(4).stringify(), "4");
        assert_eq!(AnswerValue::Float(4.6).stringify(), "4.6");
        assert_eq!(AnswerValue::Float(4.0).stringify(), "4");
    }
}
