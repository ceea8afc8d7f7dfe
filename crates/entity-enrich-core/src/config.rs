//! Layered configuration: an optional TOML file, overridden by `ENRICH_*`
//! environment variables, overridden by explicit builder calls. Unknown TOML
//! keys are rejected at load time so misconfiguration fails fast.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::score::QualityWeights;

/// Crawl-phase limits.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CrawlConfig {
    #[serde(default = "default_max_pages")]
    pub max_pages: u32,
    #[serde(default = "default_max_depth")]
    pub max_depth: u32,
    #[serde(default = "default_cache_ttl_hours")]
    pub cache_ttl_hours: u32,
}

fn default_max_pages() -> u32 {
    40
}

fn default_max_depth() -> u32 {
    2
}

fn default_cache_ttl_hours() -> u32 {
    24
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            max_pages: default_max_pages(),
            max_depth: default_max_depth(),
            cache_ttl_hours: default_cache_ttl_hours(),
        }
    }
}

/// Outbound webhook used when a result fails the gate and manual review is
/// configured.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ToolJetConfig {
    pub webhook_url: Option<String>,
}

/// Geocoding/MSA lookup tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GeoConfig {
    #[serde(default = "default_top_msas")]
    pub top_msas: u32,
}

fn default_top_msas() -> u32 {
    100
}

impl Default for GeoConfig {
    fn default() -> Self {
        Self {
            top_msas: default_top_msas(),
        }
    }
}

/// Serializable view of [`QualityWeights`] for the config file/env layer.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct QualityWeightsConfig {
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub completeness: f64,
    #[serde(default)]
    pub diversity: f64,
    #[serde(default)]
    pub freshness: f64,
}

impl Default for QualityWeightsConfig {
    fn default() -> Self {
        let w = QualityWeights::default();
        Self {
            confidence: w.confidence,
            completeness: w.completeness,
            diversity: w.diversity,
            freshness: w.freshness,
        }
    }
}

impl From<QualityWeightsConfig> for QualityWeights {
    fn from(c: QualityWeightsConfig) -> Self {
        QualityWeights {
            confidence: c.confidence,
            completeness: c.completeness,
            diversity: c.diversity,
            freshness: c.freshness,
        }
    }
}

/// Top-level pipeline configuration, recognized keys per the external
/// interfaces contract.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default = "default_haiku_model")]
    pub haiku_model: String,
    #[serde(default = "default_sonnet_model")]
    pub sonnet_model: String,
    #[serde(default = "default_opus_model")]
    pub opus_model: String,
    #[serde(default)]
    pub no_batch: bool,
    #[serde(default = "default_small_batch_threshold")]
    pub small_batch_threshold: u32,
    #[serde(default)]
    pub crawl: CrawlConfig,
    #[serde(default)]
    pub quality_weights: QualityWeightsConfig,
    #[serde(default = "default_quality_score_threshold")]
    pub quality_score_threshold: f64,
    pub min_completeness_threshold: Option<f64>,
    #[serde(default)]
    pub tooljet: ToolJetConfig,
    #[serde(default)]
    pub geo: GeoConfig,
}

fn default_haiku_model() -> String {
    "claude-haiku".to_string()
}

fn default_sonnet_model() -> String {
    "claude-sonnet".to_string()
}

fn default_opus_model() -> String {
    "claude-opus".to_string()
}

fn default_small_batch_threshold() -> u32 {
    20
}

fn default_quality_score_threshold() -> f64 {
    0.7
}

impl Default for Config {
    fn default() -> Self {
        Self {
            haiku_model: default_haiku_model(),
            sonnet_model: default_sonnet_model(),
            opus_model: default_opus_model(),
            no_batch: false,
            small_batch_threshold: default_small_batch_threshold(),
            crawl: CrawlConfig::default(),
            quality_weights: QualityWeightsConfig::default(),
            quality_score_threshold: default_quality_score_threshold(),
            min_completeness_threshold: None,
            tooljet: ToolJetConfig::default(),
            geo: GeoConfig::default(),
        }
    }
}

impl Config {
    /// Load from an optional TOML file, then apply `ENRICH_*` environment
    /// overrides. Pass `None` to skip the file and start from defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path)
                    .map_err(|e| Error::InvalidConfiguration(format!("reading {}: {e}", path.display())))?;
                toml::from_str(&raw)
                    .map_err(|e| Error::InvalidConfiguration(format!("parsing {}: {e}", path.display())))?
            }
            None => Config::default(),
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("ENRICH_HAIKU_MODEL") {
            self.haiku_model = v;
        }
        if let Ok(v) = std::env::var("ENRICH_SONNET_MODEL") {
            self.sonnet_model = v;
        }
        if let Ok(v) = std::env::var("ENRICH_OPUS_MODEL") {
            self.opus_model = v;
        }
        if let Ok(v) = std::env::var("ENRICH_NO_BATCH") {
            self.no_batch = matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes");
        }
        if let Ok(v) = std::env::var("ENRICH_SMALL_BATCH_THRESHOLD") {
            if let Ok(parsed) = v.parse() {
                self.small_batch_threshold = parsed;
            }
        }
        if let Ok(v) = std::env::var("ENRICH_QUALITY_SCORE_THRESHOLD") {
            if let Ok(parsed) = v.parse() {
                self.quality_score_threshold = parsed;
            }
        }
        if let Ok(v) = std::env::var("ENRICH_TOOLJET_WEBHOOK_URL") {
            self.tooljet.webhook_url = Some(v);
        }
    }

    fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.quality_score_threshold) {
            return Err(Error::InvalidConfiguration(
                "quality_score_threshold must be between 0.0 and 1.0".to_string(),
            ));
        }
        if let Some(floor) = self.min_completeness_threshold {
            if !(0.0..=1.0).contains(&floor) {
                return Err(Error::InvalidConfiguration(
                    "min_completeness_threshold must be between 0.0 and 1.0".to_string(),
                ));
            }
        }
        Ok(())
    }

    pub fn with_no_batch(mut self, no_batch: bool) -> Self {
        self.no_batch = no_batch;
        self
    }

    pub fn with_quality_score_threshold(mut self, threshold: f64) -> Self {
        self.quality_score_threshold = threshold;
        self
    }

    pub fn quality_weights(&self) -> QualityWeights {
        self.quality_weights.into()
    }
}
