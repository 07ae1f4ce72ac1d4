//! Pipeline configuration.
//!
//! Values come from `PipelineConfig::default()`, a JSON document, or
//! `DOCSCAN_*` environment variables, and are checked by `validate()` before a
//! pipeline is built.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::pipeline::confidence::LOW_CONFIDENCE_THRESHOLD;
use crate::pipeline::types::RegionKind;

/// Application-level constants
pub const APP_NAME: &str = "docscan";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

pub const ENV_LANGUAGE: &str = "DOCSCAN_LANGUAGE";
pub const ENV_LOW_CONFIDENCE_THRESHOLD: &str = "DOCSCAN_LOW_CONFIDENCE_THRESHOLD";
pub const ENV_MAX_PAGE_WORKERS: &str = "DOCSCAN_MAX_PAGE_WORKERS";
pub const ENV_MAX_REGION_WORKERS: &str = "DOCSCAN_MAX_REGION_WORKERS";
pub const ENV_DENOISE: &str = "DOCSCAN_DENOISE";
pub const ENV_ENGINE_POOL_SIZE: &str = "DOCSCAN_ENGINE_POOL_SIZE";

/// Default `tracing` filter when `RUST_LOG` is unset.
pub fn default_log_filter() -> String {
    "docscan_lib=info,docscan=info".to_string()
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {reason}")]
    InvalidValue { key: String, reason: String },

    #[error("Invalid configuration JSON: {0}")]
    Json(#[from] serde_json::Error),
}

impl ConfigError {
    fn invalid(key: &str, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            key: key.to_string(),
            reason: reason.into(),
        }
    }
}

// ═══════════════════════════════════════════════════════════
// Types
// ═══════════════════════════════════════════════════════════

/// Layout-analysis tuning. Gap factors are relative to the median glyph or
/// line height of the page being segmented.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmentationConfig {
    /// Emit one region per line segment or one per block.
    pub granularity: RegionKind,
    /// Components smaller than this many pixels are noise.
    pub min_component_area: u32,
    /// Vertical gap (× median component height) still joining one line.
    pub line_gap_factor: f32,
    /// Horizontal gap (× line height) that splits a line into segments.
    pub segment_gap_factor: f32,
    /// Vertical gap (× median line height) that starts a new block.
    pub block_gap_factor: f32,
    /// Intensity spread below which a page has no foreground.
    pub min_contrast: u8,
}

impl Default for SegmentationConfig {
    fn default() -> Self {
        Self {
            granularity: RegionKind::Line,
            min_component_area: 6,
            line_gap_factor: 0.3,
            segment_gap_factor: 2.5,
            block_gap_factor: 1.2,
            min_contrast: 40,
        }
    }
}

/// Everything a `PipelineOrchestrator` needs to know.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Default OCR language code (Tesseract style, e.g. "eng", "eng+fra").
    pub language: String,
    /// Regions below this confidence are flagged in the output.
    pub low_confidence_threshold: f32,
    /// Pages processed concurrently.
    pub max_page_workers: usize,
    /// Regions recognized concurrently per page.
    pub max_region_workers: usize,
    /// Apply conditional edge-preserving denoising.
    pub denoise_enabled: bool,
    /// Engine instances kept in the pool.
    pub engine_pool_size: usize,
    /// Pages are downscaled so their longest side fits this.
    pub max_page_dimension: u32,
    /// Wrap low-confidence text as `[?text?]` in the page text.
    pub annotate_low_confidence: bool,
    /// Pixels of margin added around a region when cropping it for the engine.
    pub crop_padding: u32,
    pub segmentation: SegmentationConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            language: "eng".to_string(),
            low_confidence_threshold: LOW_CONFIDENCE_THRESHOLD,
            max_page_workers: 2,
            max_region_workers: 4,
            denoise_enabled: true,
            engine_pool_size: 2,
            max_page_dimension: 2000,
            annotate_low_confidence: true,
            crop_padding: 4,
            segmentation: SegmentationConfig::default(),
        }
    }
}

// ═══════════════════════════════════════════════════════════
// Loading and validation
// ═══════════════════════════════════════════════════════════

impl PipelineConfig {
    /// Defaults overridden by `DOCSCAN_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for each variable name.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(language) = lookup(ENV_LANGUAGE) {
            config.language = language.trim().to_string();
        }
        if let Some(raw) = lookup(ENV_LOW_CONFIDENCE_THRESHOLD) {
            config.low_confidence_threshold = parse_value(ENV_LOW_CONFIDENCE_THRESHOLD, &raw)?;
        }
        if let Some(raw) = lookup(ENV_MAX_PAGE_WORKERS) {
            config.max_page_workers = parse_value(ENV_MAX_PAGE_WORKERS, &raw)?;
        }
        if let Some(raw) = lookup(ENV_MAX_REGION_WORKERS) {
            config.max_region_workers = parse_value(ENV_MAX_REGION_WORKERS, &raw)?;
        }
        if let Some(raw) = lookup(ENV_DENOISE) {
            config.denoise_enabled = parse_flag(ENV_DENOISE, &raw)?;
        }
        if let Some(raw) = lookup(ENV_ENGINE_POOL_SIZE) {
            config.engine_pool_size = parse_value(ENV_ENGINE_POOL_SIZE, &raw)?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Parse a (possibly partial) JSON document; missing keys keep defaults.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_language(&self.language)?;

        if !(0.0..=1.0).contains(&self.low_confidence_threshold) {
            return Err(ConfigError::invalid(
                "low_confidence_threshold",
                format!("{} is outside [0, 1]", self.low_confidence_threshold),
            ));
        }
        for (key, value) in [
            ("max_page_workers", self.max_page_workers),
            ("max_region_workers", self.max_region_workers),
            ("engine_pool_size", self.engine_pool_size),
        ] {
            if value == 0 {
                return Err(ConfigError::invalid(key, "must be at least 1"));
            }
        }
        if self.max_page_dimension < 32 {
            return Err(ConfigError::invalid(
                "max_page_dimension",
                "must be at least 32 pixels",
            ));
        }

        let seg = &self.segmentation;
        for (key, value) in [
            ("segmentation.line_gap_factor", seg.line_gap_factor),
            ("segmentation.segment_gap_factor", seg.segment_gap_factor),
            ("segmentation.block_gap_factor", seg.block_gap_factor),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(ConfigError::invalid(key, "must be a non-negative number"));
            }
        }
        Ok(())
    }
}

/// Language codes look like `eng`, `chi_sim` or `eng+fra`.
pub fn validate_language(language: &str) -> Result<(), ConfigError> {
    let well_formed = !language.is_empty()
        && language.split('+').all(|part| {
            !part.is_empty() && part.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        });

    if well_formed {
        Ok(())
    } else {
        Err(ConfigError::invalid(
            "language",
            format!("'{language}' is not a language code"),
        ))
    }
}

fn parse_value<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e| ConfigError::invalid(key, format!("'{raw}': {e}")))
}

fn parse_flag(key: &str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::invalid(key, format!("'{raw}' is not a boolean"))),
    }
}
