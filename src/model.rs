//! Typed records shared by every pipeline stage.
//!
//! Blocks flow from the fold aggregator into the evaluators; evaluation,
//! effect-size and summary results flow from there into the result sinks.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Errors raised while building model values
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ModelError {
    #[error("Unknown metric: {0}")]
    UnknownMetric(String),

    #[error("Cohorts for {metric} have unequal lengths: {a}, {b}, {c}")]
    UnequalCohorts {
        metric: Metric,
        a: usize,
        b: usize,
        c: usize,
    },
}

/// Detection metric measured on every fold-run.
///
/// The declaration order is the raw column order and the order in which
/// blocks, and therefore sink rows, are emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Metric {
    /// Box precision
    #[serde(rename = "PRECISION")]
    Precision,
    /// Box recall
    #[serde(rename = "RECALL")]
    Recall,
    /// Mean average precision at IoU 0.5
    #[serde(rename = "mAP50")]
    Map50,
    /// Mean average precision averaged over IoU 0.5..0.95
    #[serde(rename = "mAP50_95")]
    Map50To95,
}

impl Metric {
    /// All metrics in column order
    pub const ALL: [Self; 4] = [Self::Precision, Self::Recall, Self::Map50, Self::Map50To95];

    /// Name written to the result sinks
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Precision => "PRECISION",
            Self::Recall => "RECALL",
            Self::Map50 => "mAP50",
            Self::Map50To95 => "mAP50_95",
        }
    }

    /// Short label (`P`, `R`, `mAP50`, `mAP50-95`)
    #[must_use]
    pub const fn short(self) -> &'static str {
        match self {
            Self::Precision => "P",
            Self::Recall => "R",
            Self::Map50 => "mAP50",
            Self::Map50To95 => "mAP50-95",
        }
    }

    /// Zero-based position among the metric columns of a raw row
    #[must_use]
    pub const fn column(self) -> usize {
        match self {
            Self::Precision => 0,
            Self::Recall => 1,
            Self::Map50 => 2,
            Self::Map50To95 => 3,
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Metric {
    type Err = ModelError;

    /// Parse a metric from its sink name, short label or raw column header
    ///
    /// # Errors
    ///
    /// Returns `ModelError::UnknownMetric` if nothing matches.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "precision" | "p" => Ok(Self::Precision),
            "recall" | "r" => Ok(Self::Recall),
            "map50" => Ok(Self::Map50),
            "map50_95" | "map50-95" => Ok(Self::Map50To95),
            _ => Err(ModelError::UnknownMetric(s.to_string())),
        }
    }
}

/// One of the three pairwise comparisons between cohorts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Comparison {
    /// Cohort A against cohort B
    AB,
    /// Cohort B against cohort C
    BC,
    /// Cohort A against cohort C
    AC,
}

impl Comparison {
    /// Comparisons in result order
    pub const ALL: [Self; 3] = [Self::AB, Self::BC, Self::AC];

    /// Column suffix used by the sinks and the bridge output
    #[must_use]
    pub const fn suffix(self) -> &'static str {
        match self {
            Self::AB => "1v2",
            Self::BC => "2v3",
            Self::AC => "1v3",
        }
    }

    /// Cohort indices compared
    #[must_use]
    pub const fn indices(self) -> (usize, usize) {
        match self {
            Self::AB => (0, 1),
            Self::BC => (1, 2),
            Self::AC => (0, 2),
        }
    }
}

impl fmt::Display for Comparison {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.suffix())
    }
}

/// Three aligned cohorts of one metric.
///
/// Element `i` of every cohort comes from repetition `i`.
#[derive(Debug, Clone, PartialEq)]
pub struct MeasurementDataBlock {
    metric: Metric,
    labels: [String; 3],
    cohorts: [Vec<f64>; 3],
}

impl MeasurementDataBlock {
    /// Create a block, checking that the cohorts are paired
    ///
    /// # Errors
    ///
    /// Returns `ModelError::UnequalCohorts` if the lengths differ.
    pub fn new(
        metric: Metric,
        labels: [String; 3],
        cohort_a: Vec<f64>,
        cohort_b: Vec<f64>,
        cohort_c: Vec<f64>,
    ) -> Result<Self, ModelError> {
        if cohort_a.len() != cohort_b.len() || cohort_b.len() != cohort_c.len() {
            return Err(ModelError::UnequalCohorts {
                metric,
                a: cohort_a.len(),
                b: cohort_b.len(),
                c: cohort_c.len(),
            });
        }
        Ok(Self {
            metric,
            labels,
            cohorts: [cohort_a, cohort_b, cohort_c],
        })
    }

    /// Create a block with the default `A`, `B`, `C` labels
    ///
    /// # Errors
    ///
    /// Returns `ModelError::UnequalCohorts` if the lengths differ.
    pub fn unlabeled(
        metric: Metric,
        cohort_a: Vec<f64>,
        cohort_b: Vec<f64>,
        cohort_c: Vec<f64>,
    ) -> Result<Self, ModelError> {
        Self::new(metric, default_labels(), cohort_a, cohort_b, cohort_c)
    }

    /// Measured metric
    #[must_use]
    pub const fn metric(&self) -> Metric {
        self.metric
    }

    /// Cohort labels in A, B, C order
    #[must_use]
    pub const fn labels(&self) -> &[String; 3] {
        &self.labels
    }

    #[must_use]
    pub fn cohort_a(&self) -> &[f64] {
        &self.cohorts[0]
    }

    #[must_use]
    pub fn cohort_b(&self) -> &[f64] {
        &self.cohorts[1]
    }

    #[must_use]
    pub fn cohort_c(&self) -> &[f64] {
        &self.cohorts[2]
    }

    /// All cohorts as column slices
    #[must_use]
    pub fn cohorts(&self) -> [&[f64]; 3] {
        [self.cohort_a(), self.cohort_b(), self.cohort_c()]
    }

    /// The two cohorts compared by `comparison`
    #[must_use]
    pub fn pair(&self, comparison: Comparison) -> (&[f64], &[f64]) {
        let (x, y) = comparison.indices();
        (&self.cohorts[x], &self.cohorts[y])
    }

    /// Number of paired repetitions
    #[must_use]
    pub fn repetitions(&self) -> usize {
        self.cohorts[0].len()
    }
}

/// Labels used when nothing better is known
#[must_use]
pub fn default_labels() -> [String; 3] {
    ["A".to_string(), "B".to_string(), "C".to_string()]
}

/// Outcome of one evaluator on one block.
///
/// `None` marks a field the evaluator does not compute. Pairwise arrays are
/// ordered a-vs-b, b-vs-c, a-vs-c.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationResult {
    /// Implementation tag
    pub implementation: String,
    /// Metric the block measured
    pub metric: Metric,
    /// Friedman omnibus p-value
    pub friedman_p: Option<f64>,
    /// Raw Wilcoxon signed-rank p-values
    pub wilcoxon_ps: Option<[f64; 3]>,
    /// Hommel-corrected Wilcoxon p-values
    pub hommel_ps: Option<[f64; 3]>,
}

impl EvaluationResult {
    /// Create a result with no fields computed
    #[must_use]
    pub fn new(implementation: impl Into<String>, metric: Metric) -> Self {
        Self {
            implementation: implementation.into(),
            metric,
            friedman_p: None,
            wilcoxon_ps: None,
            hommel_ps: None,
        }
    }

    #[must_use]
    pub const fn with_friedman(mut self, p: f64) -> Self {
        self.friedman_p = Some(p);
        self
    }

    #[must_use]
    pub const fn with_wilcoxon(mut self, ps: [f64; 3]) -> Self {
        self.wilcoxon_ps = Some(ps);
        self
    }

    #[must_use]
    pub const fn with_hommel(mut self, ps: [f64; 3]) -> Self {
        self.hommel_ps = Some(ps);
        self
    }
}

/// Rank-based effect size of one metric
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EffectSizeResult {
    pub metric: Metric,
    /// Repeated-measures eta-squared on within-repetition ranks
    pub effect_size: f64,
}

/// Mean and standard deviation of one cohort on one metric
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricResult {
    /// Cohort label
    pub experiment: String,
    pub metric: Metric,
    pub mean: f64,
    pub std: f64,
}
