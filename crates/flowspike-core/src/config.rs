//! Pipeline configuration
//!
//! Every recognized option lives here with a named field. Loaded from TOML;
//! all fields are optional and fall back to the defaults below.
//!
//! ```toml
//! step = 3
//! tick_interval_ms = 1000
//! roster = [0, 1, 2, 3, 4, 5, 6, 7, 8, 9]
//! default_selection = [0, 1, 2, 3]
//!
//! [policy]
//! granularity = "per-step"
//! strictness = "strict"
//! magnitude_threshold = 2.25
//! ratio_threshold = 10.0
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::ConfigError;
use crate::series::EntityId;

pub const DEFAULT_STEP: usize = 3;
pub const DEFAULT_RATIO_THRESHOLD: f64 = 10.0;
pub const LENIENT_MAGNITUDE_THRESHOLD: f64 = 1.5;
pub const STRICT_MAGNITUDE_THRESHOLD: f64 = 2.25;
pub const DEFAULT_TICK_INTERVAL_MS: u64 = 1_000;
const DEFAULT_SELECTION_SIZE: usize = 4;

/// Unit of anomaly tagging
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum Granularity {
    /// One tag per time step
    #[default]
    PerStep,
    /// One tag per fixed-width slice; a slice is flagged if any step in it is
    PerSlice,
}

/// How much evidence a single step needs before it is flagged
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum Strictness {
    /// Magnitude and ratio both exceed their thresholds at this step
    #[default]
    Lenient,
    /// The lenient condition holds at this step and at the previous one.
    /// Never fires on the first step of a series.
    Strict,
    /// The lenient condition holds at this step, or the previous step's
    /// magnitude alone exceeds the threshold. Keeps the step after a spike
    /// coloured so the falling edge is drawn with it.
    Trailing,
}

impl Strictness {
    pub fn default_magnitude_threshold(self) -> f64 {
        match self {
            Self::Lenient => LENIENT_MAGNITUDE_THRESHOLD,
            Self::Strict | Self::Trailing => STRICT_MAGNITUDE_THRESHOLD,
        }
    }
}

/// Threshold policy applied over feature rows
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaggingPolicy {
    pub granularity: Granularity,
    pub strictness: Strictness,
    /// Falls back to the strictness default when unset
    pub magnitude_threshold: Option<f64>,
    pub ratio_threshold: f64,
}

impl Default for TaggingPolicy {
    fn default() -> Self {
        Self {
            granularity: Granularity::PerStep,
            strictness: Strictness::Lenient,
            magnitude_threshold: None,
            ratio_threshold: DEFAULT_RATIO_THRESHOLD,
        }
    }
}

impl TaggingPolicy {
    pub fn lenient() -> Self {
        Self::default()
    }

    pub fn strict() -> Self {
        Self {
            strictness: Strictness::Strict,
            ..Self::default()
        }
    }

    pub fn trailing() -> Self {
        Self {
            strictness: Strictness::Trailing,
            ..Self::default()
        }
    }

    pub fn per_slice(mut self) -> Self {
        self.granularity = Granularity::PerSlice;
        self
    }

    /// Override both thresholds. Rejects values `validate` would reject.
    pub fn with_thresholds(mut self, magnitude: f64, ratio: f64) -> Result<Self, ConfigError> {
        self.magnitude_threshold = Some(magnitude);
        self.ratio_threshold = ratio;
        self.validate()?;
        Ok(self)
    }

    pub fn effective_magnitude_threshold(&self) -> f64 {
        self.magnitude_threshold
            .unwrap_or_else(|| self.strictness.default_magnitude_threshold())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let m = self.effective_magnitude_threshold();
        if !m.is_finite() || m < 0.0 {
            return Err(ConfigError::Invalid(format!(
                "magnitude_threshold must be finite and >= 0, got {}",
                m
            )));
        }
        if !self.ratio_threshold.is_finite() || self.ratio_threshold <= 0.0 {
            return Err(ConfigError::Invalid(format!(
                "ratio_threshold must be finite and > 0, got {}",
                self.ratio_threshold
            )));
        }
        Ok(())
    }
}

/// Top-level pipeline configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Steps revealed per tick, and the slice width
    pub step: usize,
    pub policy: TaggingPolicy,
    /// Period of the playback trigger
    pub tick_interval_ms: u64,
    /// Expected entity ids; each must have records
    pub roster: Option<Vec<EntityId>>,
    /// Entities shown before the user picks any; empty means the first few loaded
    pub default_selection: Vec<EntityId>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            step: DEFAULT_STEP,
            policy: TaggingPolicy::default(),
            tick_interval_ms: DEFAULT_TICK_INTERVAL_MS,
            roster: None,
            default_selection: Vec::new(),
        }
    }
}

impl PipelineConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.step == 0 {
            return Err(ConfigError::Invalid("step must be >= 1".to_string()));
        }
        if self.tick_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "tick_interval_ms must be >= 1".to_string(),
            ));
        }
        self.policy.validate()
    }

    /// Selection to start with, given the loaded entities in ascending order.
    pub fn initial_selection(&self, loaded: &[EntityId]) -> Vec<EntityId> {
        if self.default_selection.is_empty() {
            loaded.iter().take(DEFAULT_SELECTION_SIZE).copied().collect()
        } else {
            self.default_selection.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::default();
        assert_eq!(config.step, 3);
        assert_eq!(config.policy.ratio_threshold, 10.0);
        assert_eq!(config.policy.effective_magnitude_threshold(), 1.5);
        assert_eq!(TaggingPolicy::strict().effective_magnitude_threshold(), 2.25);
        assert_eq!(
            TaggingPolicy::strict()
                .with_thresholds(1.5, 10.0)
                .unwrap()
                .effective_magnitude_threshold(),
            1.5
        );
    }

    #[test]
    fn test_parse_toml() {
        let config = PipelineConfig::from_toml_str(
            r#"
            step = 5
            roster = [0, 1, 2]

            [policy]
            granularity = "per-slice"
            strictness = "strict"
            ratio_threshold = 8.0
            "#,
        )
        .unwrap();

        assert_eq!(config.step, 5);
        assert_eq!(config.roster, Some(vec![0, 1, 2]));
        assert_eq!(config.policy.granularity, Granularity::PerSlice);
        assert_eq!(config.policy.strictness, Strictness::Strict);
        assert_eq!(config.policy.ratio_threshold, 8.0);
        assert_eq!(config.policy.effective_magnitude_threshold(), 2.25);
        assert_eq!(config.tick_interval_ms, DEFAULT_TICK_INTERVAL_MS);
    }

    #[test]
    fn test_zero_step_rejected() {
        let err = PipelineConfig::from_toml_str("step = 0").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_with_thresholds_validates() {
        assert!(TaggingPolicy::lenient().with_thresholds(0.0, 0.5).is_ok());
        assert!(TaggingPolicy::lenient().with_thresholds(-1.0, 0.5).is_err());
        assert!(TaggingPolicy::strict().with_thresholds(1.5, 0.0).is_err());
        assert!(TaggingPolicy::strict().with_thresholds(f64::NAN, 10.0).is_err());
        assert!(TaggingPolicy::trailing().with_thresholds(2.0, f64::INFINITY).is_err());
    }

    #[test]
    fn test_bad_ratio_rejected() {
        let err = PipelineConfig::from_toml_str("[policy]\nratio_threshold = -1.0").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_unknown_strictness_is_parse_error() {
        let err = PipelineConfig::from_toml_str("[policy]\nstrictness = \"paranoid\"").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "tick_interval_ms = 250").unwrap();

        let config = PipelineConfig::from_toml_file(file.path()).unwrap();
        assert_eq!(config.tick_interval_ms, 250);
    }

    #[test]
    fn test_initial_selection() {
        let config = PipelineConfig::default();
        assert_eq!(config.initial_selection(&[0, 1, 2, 3, 4, 5]), vec![0, 1, 2, 3]);

        let config = PipelineConfig {
            default_selection: vec![5],
            ..Default::default()
        };
        assert_eq!(config.initial_selection(&[0, 5]), vec![5]);
    }
}
