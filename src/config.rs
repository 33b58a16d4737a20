//! Configuration module for pipeline runs.
//!
//! Handles YAML pipeline configuration loading with validation. Every field is
//! defaulted, so an empty document is a valid configuration.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur during configuration loading
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read configuration file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse YAML configuration: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("Invalid evaluator: {0}")]
    InvalidEvaluator(String),

    #[error("Invalid configuration value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

/// Evaluator variants that can be registered with the pipeline
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum EvaluatorKind {
    /// Rank-sum Friedman and table-based exact Wilcoxon
    #[serde(rename = "native")]
    Native,
    /// Kendall's W Friedman and recursive exact Wilcoxon
    #[serde(rename = "alternate")]
    Alternate,
    /// Mean-rank Friedman only
    #[serde(rename = "reference")]
    Reference,
    /// Statistics computed by an external script
    #[serde(rename = "external")]
    External,
    /// Hommel correction over the native evaluator
    #[serde(rename = "hommel+native")]
    HommelNative,
    /// Hommel correction over the alternate evaluator
    #[serde(rename = "hommel+alternate")]
    HommelAlternate,
}

impl EvaluatorKind {
    /// Every variant in default registration order
    pub const ALL: [Self; 6] = [
        Self::Native,
        Self::Alternate,
        Self::Reference,
        Self::External,
        Self::HommelNative,
        Self::HommelAlternate,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Native => "native",
            Self::Alternate => "alternate",
            Self::Reference => "reference",
            Self::External => "external",
            Self::HommelNative => "hommel+native",
            Self::HommelAlternate => "hommel+alternate",
        }
    }
}

impl fmt::Display for EvaluatorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EvaluatorKind {
    type Err = ConfigError;

    /// Parse evaluator kind from string
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidEvaluator` if the string doesn't match a known evaluator.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "native" => Ok(Self::Native),
            "alternate" | "alt" => Ok(Self::Alternate),
            "reference" | "ref" => Ok(Self::Reference),
            "external" | "r" | "script" => Ok(Self::External),
            "hommel+native" | "hommel_native" | "hommel-native" => Ok(Self::HommelNative),
            "hommel+alternate" | "hommel_alternate" | "hommel-alternate" => {
                Ok(Self::HommelAlternate)
            }
            _ => Err(ConfigError::InvalidEvaluator(s.to_string())),
        }
    }
}

/// External statistics script invocation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExternalConfig {
    /// Interpreter command line, split shell-style (e.g. `Rscript --vanilla`)
    #[serde(default = "default_program")]
    pub program: String,
    /// Script passed as the last argument
    #[serde(default = "default_script")]
    pub script: PathBuf,
    /// Wall-clock limit for one invocation
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_program() -> String {
    "Rscript".to_string()
}

fn default_script() -> PathBuf {
    PathBuf::from("scripts/paired_tests.R")
}

const fn default_timeout_secs() -> u64 {
    120
}

impl ExternalConfig {
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for ExternalConfig {
    fn default() -> Self {
        Self {
            program: default_program(),
            script: default_script(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// Pipeline configuration loaded from YAML
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PipelineConfig {
    /// Raw per-fold metrics file
    #[serde(default = "default_metrics_path")]
    pub metrics_path: PathBuf,
    /// Pairwise-test result sink
    #[serde(default = "default_pairwise_path")]
    pub pairwise_path: PathBuf,
    /// Effect-size result sink
    #[serde(default = "default_effect_size_path")]
    pub effect_size_path: PathBuf,
    /// Metric-summary result sink
    #[serde(default = "default_summary_path")]
    pub summary_path: PathBuf,
    /// Fold-runs per repetition
    #[serde(default = "default_fold_size")]
    pub fold_size: usize,
    /// Significance threshold for the omnibus test
    #[serde(default = "default_alpha")]
    pub alpha: f64,
    /// Delete existing sinks before the run
    #[serde(default)]
    pub force_recreate: bool,
    /// Evaluators in registration order
    #[serde(default = "default_evaluators")]
    pub evaluators: Vec<EvaluatorKind>,
    /// External script settings
    #[serde(default)]
    pub external: ExternalConfig,
    /// Cohort labels in A, B, C order; derived from the raw rows when absent
    #[serde(default)]
    pub cohort_labels: Option<Vec<String>>,
    /// Maximum absolute p-value difference between implementations
    #[serde(default = "default_agreement_tolerance")]
    pub agreement_tolerance: f64,
}

fn default_metrics_path() -> PathBuf {
    PathBuf::from("results/metrics.csv")
}
fn default_pairwise_path() -> PathBuf {
    PathBuf::from("results/pairwise_tests.csv")
}
fn default_effect_size_path() -> PathBuf {
    PathBuf::from("results/effect_sizes.csv")
}
fn default_summary_path() -> PathBuf {
    PathBuf::from("results/metric_summary.csv")
}
const fn default_fold_size() -> usize {
    5
}
const fn default_alpha() -> f64 {
    0.05
}
fn default_evaluators() -> Vec<EvaluatorKind> {
    EvaluatorKind::ALL.to_vec()
}
const fn default_agreement_tolerance() -> f64 {
    1e-6
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            metrics_path: default_metrics_path(),
            pairwise_path: default_pairwise_path(),
            effect_size_path: default_effect_size_path(),
            summary_path: default_summary_path(),
            fold_size: default_fold_size(),
            alpha: default_alpha(),
            force_recreate: false,
            evaluators: default_evaluators(),
            external: ExternalConfig::default(),
            cohort_labels: None,
            agreement_tolerance: default_agreement_tolerance(),
        }
    }
}

impl PipelineConfig {
    /// Load pipeline configuration from YAML file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Load pipeline configuration from YAML string
    ///
    /// # Errors
    ///
    /// Returns an error if the YAML cannot be parsed or validated.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let config: Self = if yaml.trim().is_empty() {
            Self::default()
        } else {
            serde_yaml::from_str(yaml)?
        };
        config.validate()?;
        Ok(config)
    }

    /// Check value ranges
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` naming the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.fold_size == 0 {
            return Err(invalid("fold_size", "must be positive"));
        }
        if self.alpha.is_nan() || self.alpha <= 0.0 || self.alpha >= 1.0 {
            return Err(invalid("alpha", format!("{} is not in (0, 1)", self.alpha)));
        }
        if self.agreement_tolerance.is_nan() || self.agreement_tolerance <= 0.0 {
            return Err(invalid(
                "agreement_tolerance",
                format!("{} is not positive", self.agreement_tolerance),
            ));
        }
        if self.evaluators.is_empty() {
            return Err(invalid("evaluators", "at least one evaluator is required"));
        }
        if let Some(labels) = &self.cohort_labels {
            if labels.len() != 3 {
                return Err(invalid(
                    "cohort_labels",
                    format!("expected 3 labels, got {}", labels.len()),
                ));
            }
        }
        if self.external.timeout_secs == 0 {
            return Err(invalid("external.timeout_secs", "must be positive"));
        }
        Ok(())
    }

    /// Configured cohort labels as a fixed triple
    #[must_use]
    pub fn labels(&self) -> Option<[String; 3]> {
        match self.cohort_labels.as_deref() {
            Some([a, b, c]) => Some([a.clone(), b.clone(), c.clone()]),
            _ => None,
        }
    }
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::InvalidValue {
        field,
        reason: reason.into(),
    }
}
