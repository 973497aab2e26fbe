//! Curation configuration
//!
//! One serde-backed struct carries every tunable of the pipeline. It is passed
//! explicitly to each stage; nothing is read from process-wide state.
//!
//! ```json
//! {
//!   "jpeg_quality": 95,
//!   "balance": { "target_per_class": 5000, "seed": 42 },
//!   "filter": { "threshold": 0.22, "prompt_template": "a photograph of {}" }
//! }
//! ```
//!
//! Missing fields fall back to their defaults.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::corpus::{
    AugmentationPolicy, DEFAULT_IMAGE_EXTENSIONS, DEFAULT_JPEG_QUALITY,
    DEFAULT_MAX_COLLISION_ATTEMPTS,
};
use crate::semantic::PromptTemplate;
use crate::utils::error::{CurationError, Result};

/// Default minimum image count per class
pub const DEFAULT_TARGET_PER_CLASS: usize = 5000;

/// Default semantic confidence threshold
pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.22;

/// Default prompt template for the semantic filter
pub const DEFAULT_PROMPT_TEMPLATE: &str = "a photograph of {}";

/// Top-level configuration for all curation stages
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CurationConfig {
    /// Extensions treated as image candidates (case-insensitive, no dot)
    pub allowed_extensions: Vec<String>,
    /// JPEG quality for every file the pipeline writes
    pub jpeg_quality: u8,
    /// Bound on the `_N` suffix search when resolving name collisions
    pub max_collision_attempts: usize,
    /// Whether `run` deletes non-image files before repairing
    pub purge_non_images: bool,
    /// Show progress bars during per-file passes
    pub show_progress: bool,
    pub balance: BalanceConfig,
    pub filter: FilterConfig,
}

impl Default for CurationConfig {
    fn default() -> Self {
        Self {
            allowed_extensions: DEFAULT_IMAGE_EXTENSIONS
                .iter()
                .map(|ext| ext.to_string())
                .collect(),
            jpeg_quality: DEFAULT_JPEG_QUALITY,
            max_collision_attempts: DEFAULT_MAX_COLLISION_ATTEMPTS,
            purge_non_images: true,
            show_progress: false,
            balance: BalanceConfig::default(),
            filter: FilterConfig::default(),
        }
    }
}

/// Class balancing parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BalanceConfig {
    /// Minimum number of images each class should hold
    pub target_per_class: usize,
    /// Seed for source sampling and augmentation (entropy when unset)
    pub seed: Option<u64>,
    /// Failed synthesis attempts tolerated per class before reporting a shortfall
    pub max_synthesis_failures: usize,
    pub policy: AugmentationPolicy,
}

impl Default for BalanceConfig {
    fn default() -> Self {
        Self {
            target_per_class: DEFAULT_TARGET_PER_CLASS,
            seed: None,
            max_synthesis_failures: 32,
            policy: AugmentationPolicy::default(),
        }
    }
}

/// Semantic outlier filter parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    /// Files scoring strictly below this are quarantined
    pub threshold: f32,
    pub prompt_template: PromptTemplate,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            prompt_template: PromptTemplate::new(DEFAULT_PROMPT_TEMPLATE),
        }
    }
}

impl CurationConfig {
    /// Load a configuration from a JSON file and validate it
    pub fn from_file(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(CurationError::PathNotFound(path.to_path_buf()));
        }
        let contents = fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Save the configuration as pretty JSON
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.allowed_extensions.is_empty() {
            return Err(CurationError::Config(
                "allowed_extensions must not be empty".to_string(),
            ));
        }
        if !(1..=100).contains(&self.jpeg_quality) {
            return Err(CurationError::Config(format!(
                "jpeg_quality must be in 1..=100, got {}",
                self.jpeg_quality
            )));
        }
        if self.max_collision_attempts == 0 {
            return Err(CurationError::Config(
                "max_collision_attempts must be at least 1".to_string(),
            ));
        }
        if !self.filter.threshold.is_finite() {
            return Err(CurationError::Config(format!(
                "threshold must be finite, got {}",
                self.filter.threshold
            )));
        }
        if !self.filter.prompt_template.has_placeholder() {
            return Err(CurationError::Config(format!(
                "prompt template '{}' has no {{}} placeholder",
                self.filter.prompt_template.as_str()
            )));
        }
        self.balance.policy.validate()
    }
}
