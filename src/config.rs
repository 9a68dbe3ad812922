//! Detector configuration
//!
//! Built once per run from defaults overlaid by an optional flat mapping read
//! from `.github/duplicate-detector-config.yml` (YAML) or a `.toml` file.

use serde::Deserialize;
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const DEFAULT_CONFIG_PATH: &str = ".github/duplicate-detector-config.yml";

pub const DEFAULT_SIMILARITY_THRESHOLD: f64 = 0.75;
pub const DEFAULT_HIGH_SIMILARITY_THRESHOLD: f64 = 0.90;
pub const DEFAULT_MAX_ISSUES_TO_CHECK: usize = 200;
pub const DEFAULT_AUTO_CLOSE_EXACT_MATCH: bool = false;
pub const DEFAULT_LABEL_POSSIBLE_DUPLICATE: &str = "possible-duplicate";
pub const DEFAULT_LABEL_EXACT_DUPLICATE: &str = "duplicate";
pub const DEFAULT_EXCLUDE_LABELS: &[&str] = &["wontfix", "invalid"];
pub const DEFAULT_MIN_TEXT_LENGTH: usize = 20;
pub const DEFAULT_MAX_SIMILAR_TO_SHOW: usize = 5;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("invalid TOML: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("config file must contain a mapping at the top level")]
    NotAMapping,

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Immutable per-run settings.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectorConfig {
    pub similarity_threshold: f64,
    pub high_similarity_threshold: f64,
    pub max_issues_to_check: usize,
    pub auto_close_exact_match: bool,
    pub label_possible_duplicate: String,
    pub label_exact_duplicate: String,
    pub exclude_labels: BTreeSet<String>,
    pub min_text_length: usize,
    pub max_similar_to_show: usize,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: DEFAULT_SIMILARITY_THRESHOLD,
            high_similarity_threshold: DEFAULT_HIGH_SIMILARITY_THRESHOLD,
            max_issues_to_check: DEFAULT_MAX_ISSUES_TO_CHECK,
            auto_close_exact_match: DEFAULT_AUTO_CLOSE_EXACT_MATCH,
            label_possible_duplicate: DEFAULT_LABEL_POSSIBLE_DUPLICATE.to_string(),
            label_exact_duplicate: DEFAULT_LABEL_EXACT_DUPLICATE.to_string(),
            exclude_labels: DEFAULT_EXCLUDE_LABELS.iter().map(|s| s.to_string()).collect(),
            min_text_length: DEFAULT_MIN_TEXT_LENGTH,
            max_similar_to_show: DEFAULT_MAX_SIMILAR_TO_SHOW,
        }
    }
}

/// Partial settings read from a file. Unknown keys are ignored.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ConfigOverlay {
    pub similarity_threshold: Option<f64>,
    pub high_similarity_threshold: Option<f64>,
    pub max_issues_to_check: Option<usize>,
    pub auto_close_exact_match: Option<bool>,
    pub label_possible_duplicate: Option<String>,
    pub label_exact_duplicate: Option<String>,
    pub exclude_labels: Option<Vec<String>>,
    pub min_text_length: Option<usize>,
    pub max_similar_to_show: Option<usize>,
}

impl ConfigOverlay {
    /// Parse YAML. An empty document is an empty overlay.
    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        let value: serde_yaml::Value = serde_yaml::from_str(content)?;
        match value {
            serde_yaml::Value::Null => Ok(Self::default()),
            serde_yaml::Value::Mapping(_) => Ok(serde_yaml::from_value(value)?),
            _ => Err(ConfigError::NotAMapping),
        }
    }

    /// Parse TOML. TOML documents are always tables at the top level.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    fn from_path(path: &Path, content: &str) -> Result<Self, ConfigError> {
        match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => Self::from_toml(content),
            _ => Self::from_yaml(content),
        }
    }
}

impl DetectorConfig {
    /// Merge an overlay over the defaults and validate the result.
    pub fn with_overlay(overlay: ConfigOverlay) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let config = Self {
            similarity_threshold: overlay
                .similarity_threshold
                .unwrap_or(defaults.similarity_threshold),
            high_similarity_threshold: overlay
                .high_similarity_threshold
                .unwrap_or(defaults.high_similarity_threshold),
            max_issues_to_check: overlay
                .max_issues_to_check
                .unwrap_or(defaults.max_issues_to_check),
            auto_close_exact_match: overlay
                .auto_close_exact_match
                .unwrap_or(defaults.auto_close_exact_match),
            label_possible_duplicate: overlay
                .label_possible_duplicate
                .unwrap_or(defaults.label_possible_duplicate),
            label_exact_duplicate: overlay
                .label_exact_duplicate
                .unwrap_or(defaults.label_exact_duplicate),
            exclude_labels: overlay
                .exclude_labels
                .map(|labels| labels.into_iter().collect())
                .unwrap_or(defaults.exclude_labels),
            min_text_length: overlay.min_text_length.unwrap_or(defaults.min_text_length),
            max_similar_to_show: overlay
                .max_similar_to_show
                .unwrap_or(defaults.max_similar_to_show),
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        for (key, value) in [
            ("similarity_threshold", self.similarity_threshold),
            ("high_similarity_threshold", self.high_similarity_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::Invalid(format!(
                    "{} must be between 0 and 1, got {}",
                    key, value
                )));
            }
        }
        if self.high_similarity_threshold < self.similarity_threshold {
            return Err(ConfigError::Invalid(format!(
                "high_similarity_threshold ({}) must not be below similarity_threshold ({})",
                self.high_similarity_threshold, self.similarity_threshold
            )));
        }
        if self.label_possible_duplicate.trim().is_empty()
            || self.label_exact_duplicate.trim().is_empty()
        {
            return Err(ConfigError::Invalid("label names must not be empty".to_string()));
        }
        Ok(())
    }

    /// Read and merge an overlay file.
    ///
    /// A missing file is not an error; it yields the defaults.
    pub fn try_load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::with_overlay(ConfigOverlay::from_path(path, &content)?)
    }

    /// Load config from disk, falling back to defaults on any error.
    pub fn load(path: &Path) -> Self {
        match Self::try_load(path) {
            Ok(config) => config,
            Err(err) => {
                tracing::warn!(
                    path = %path.display(),
                    "Could not load config file ({}). Using defaults.",
                    err
                );
                Self::default()
            }
        }
    }
}
