//! Statistical evaluators.
//!
//! Every evaluator turns one [`MeasurementDataBlock`] into an
//! [`EvaluationResult`]. The native, alternate and reference variants compute
//! the same tests through independent formulations; [`Corrected`] layers the
//! Hommel correction over any base evaluator. Results from different
//! implementations of the same metric can be compared with [`cross_check`].

use crate::bridge::{BridgeError, ExternalProcessEvaluator};
use crate::config::{EvaluatorKind, PipelineConfig};
use crate::model::{Comparison, EvaluationResult, MeasurementDataBlock, Metric};
use crate::stats::{
    friedman_kendall_w, friedman_mean_rank, friedman_rank_sum, hommel_adjust, wilcoxon_exact,
    wilcoxon_exact_recursive, StatsError, WilcoxonOutcome,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur while evaluating one block
#[derive(Error, Debug)]
pub enum EvalError {
    #[error("Statistical test failed: {0}")]
    Stats(#[from] StatsError),

    #[error("Wilcoxon test {comparison} failed: {source}")]
    Pair {
        comparison: Comparison,
        #[source]
        source: StatsError,
    },

    #[error("External evaluator failed: {0}")]
    Bridge(#[from] BridgeError),

    #[error("No Wilcoxon p-values to correct in result from {0}")]
    MissingInput(String),
}

/// Strategy interface for one statistical implementation
pub trait Evaluator {
    /// Implementation tag written to the pairwise sink
    fn implementation(&self) -> &str;

    /// Evaluate one block.
    ///
    /// # Errors
    ///
    /// Returns an error when the block is degenerate for this evaluator's
    /// tests or when an external backend fails.
    fn evaluate(&self, block: &MeasurementDataBlock, alpha: f64) -> Result<EvaluationResult, EvalError>;
}

type WilcoxonFn = fn(&[f64], &[f64]) -> Result<WilcoxonOutcome, StatsError>;

/// Run one Wilcoxon variant over the three cohort pairs
fn pairwise(block: &MeasurementDataBlock, test: WilcoxonFn) -> Result<[f64; 3], EvalError> {
    let mut ps = [0.0; 3];
    for (p, comparison) in ps.iter_mut().zip(Comparison::ALL) {
        let (x, y) = block.pair(comparison);
        *p = test(x, y)
            .map_err(|source| EvalError::Pair { comparison, source })?
            .p_value;
    }
    Ok(ps)
}

pub(crate) fn log_omnibus(implementation: &str, metric: Metric, p_value: f64, alpha: f64) {
    if p_value >= alpha {
        tracing::debug!(
            metric = %metric,
            implementation,
            p_value,
            alpha,
            "No significant omnibus difference"
        );
    }
}

/// Rank-sum Friedman with chi-square tail and table-based exact Wilcoxon
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeEvaluator;

impl Evaluator for NativeEvaluator {
    fn implementation(&self) -> &str {
        "native"
    }

    fn evaluate(&self, block: &MeasurementDataBlock, alpha: f64) -> Result<EvaluationResult, EvalError> {
        let friedman = friedman_rank_sum(&block.cohorts())?;
        log_omnibus(self.implementation(), block.metric(), friedman.p_value, alpha);
        let wilcoxon = pairwise(block, wilcoxon_exact)?;

        Ok(EvaluationResult::new(self.implementation(), block.metric())
            .with_friedman(friedman.p_value)
            .with_wilcoxon(wilcoxon))
    }
}

/// Kendall's W Friedman with gamma tail and recursive exact Wilcoxon
#[derive(Debug, Clone, Copy, Default)]
pub struct AlternateEvaluator;

impl Evaluator for AlternateEvaluator {
    fn implementation(&self) -> &str {
        "alternate"
    }

    fn evaluate(&self, block: &MeasurementDataBlock, alpha: f64) -> Result<EvaluationResult, EvalError> {
        let friedman = friedman_kendall_w(&block.cohorts())?;
        log_omnibus(self.implementation(), block.metric(), friedman.p_value, alpha);
        let wilcoxon = pairwise(block, wilcoxon_exact_recursive)?;

        Ok(EvaluationResult::new(self.implementation(), block.metric())
            .with_friedman(friedman.p_value)
            .with_wilcoxon(wilcoxon))
    }
}

/// Friedman only, from mean-rank deviations
#[derive(Debug, Clone, Copy, Default)]
pub struct ReferenceEvaluator;

impl Evaluator for ReferenceEvaluator {
    fn implementation(&self) -> &str {
        "reference"
    }

    fn evaluate(&self, block: &MeasurementDataBlock, alpha: f64) -> Result<EvaluationResult, EvalError> {
        let friedman = friedman_mean_rank(&block.cohorts())?;
        log_omnibus(self.implementation(), block.metric(), friedman.p_value, alpha);
        Ok(EvaluationResult::new(self.implementation(), block.metric()).with_friedman(friedman.p_value))
    }
}

/// Replace a result's Wilcoxon p-values by their Hommel adjustment.
///
/// The returned result keeps implementation and metric and carries only
/// `hommel_ps`.
///
/// # Errors
///
/// Returns `EvalError::MissingInput` if the result has no Wilcoxon p-values.
pub fn hommel_correction(result: EvaluationResult) -> Result<EvaluationResult, EvalError> {
    let Some(raw) = result.wilcoxon_ps else {
        return Err(EvalError::MissingInput(result.implementation));
    };
    let adjusted = hommel_adjust(&raw)?;
    Ok(EvaluationResult::new(result.implementation, result.metric)
        .with_hommel([adjusted[0], adjusted[1], adjusted[2]]))
}

/// Hommel correction over a base evaluator
#[derive(Debug, Clone)]
pub struct Corrected<E> {
    base: E,
    tag: String,
}

impl<E: Evaluator> Corrected<E> {
    /// Wrap `base`; the tag becomes `hommel+<base tag>`
    #[must_use]
    pub fn new(base: E) -> Self {
        let tag = format!("hommel+{}", base.implementation());
        Self { base, tag }
    }

    #[must_use]
    pub const fn base(&self) -> &E {
        &self.base
    }
}

impl<E: Evaluator> Evaluator for Corrected<E> {
    fn implementation(&self) -> &str {
        &self.tag
    }

    fn evaluate(&self, block: &MeasurementDataBlock, alpha: f64) -> Result<EvaluationResult, EvalError> {
        let base = self.base.evaluate(block, alpha)?;
        let mut corrected = hommel_correction(base)?;
        corrected.implementation.clone_from(&self.tag);
        Ok(corrected)
    }
}

/// Instantiate one evaluator
#[must_use]
pub fn build_evaluator(kind: EvaluatorKind, config: &PipelineConfig) -> Box<dyn Evaluator> {
    match kind {
        EvaluatorKind::Native => Box::new(NativeEvaluator),
        EvaluatorKind::Alternate => Box::new(AlternateEvaluator),
        EvaluatorKind::Reference => Box::new(ReferenceEvaluator),
        EvaluatorKind::External => {
            Box::new(ExternalProcessEvaluator::with_config(config.external.clone()))
        }
        EvaluatorKind::HommelNative => Box::new(Corrected::new(NativeEvaluator)),
        EvaluatorKind::HommelAlternate => Box::new(Corrected::new(AlternateEvaluator)),
    }
}

/// Instantiate the configured evaluators in registration order
#[must_use]
pub fn build_registry(config: &PipelineConfig) -> Vec<Box<dyn Evaluator>> {
    config
        .evaluators
        .iter()
        .map(|&kind| build_evaluator(kind, config))
        .collect()
}

/// Two implementations disagreeing on one p-value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Disagreement {
    pub metric: Metric,
    /// Sink column name of the compared field
    pub field: String,
    pub left: String,
    pub right: String,
    pub left_value: f64,
    pub right_value: f64,
}

impl Disagreement {
    #[must_use]
    pub fn difference(&self) -> f64 {
        (self.left_value - self.right_value).abs()
    }
}

/// Named p-values a result carries
fn comparable_fields(result: &EvaluationResult) -> Vec<(String, f64)> {
    let mut fields = Vec::new();
    if let Some(p) = result.friedman_p {
        fields.push(("friedman_p".to_string(), p));
    }
    for (prefix, values) in [("wilcoxon_p", result.wilcoxon_ps), ("hommel_p", result.hommel_ps)] {
        if let Some(values) = values {
            for (comparison, p) in Comparison::ALL.iter().zip(values) {
                fields.push((format!("{prefix}_{}", comparison.suffix()), p));
            }
        }
    }
    fields
}

/// Compare every pair of results on the same metric.
///
/// A field present in both results whose values differ by more than
/// `tolerance` yields one [`Disagreement`] and a warning.
#[must_use]
pub fn cross_check(results: &[EvaluationResult], tolerance: f64) -> Vec<Disagreement> {
    let mut disagreements = Vec::new();
    for (i, left) in results.iter().enumerate() {
        let left_fields = comparable_fields(left);
        for right in results.iter().skip(i + 1).filter(|r| r.metric == left.metric) {
            let right_fields = comparable_fields(right);
            for (field, left_value) in &left_fields {
                let Some((_, right_value)) = right_fields.iter().find(|(f, _)| f == field) else {
                    continue;
                };
                if (left_value - right_value).abs() > tolerance {
                    tracing::warn!(
                        metric = %left.metric,
                        field = %field,
                        left = %left.implementation,
                        right = %right.implementation,
                        left_value,
                        right_value,
                        "Implementations disagree"
                    );
                    disagreements.push(Disagreement {
                        metric: left.metric,
                        field: field.clone(),
                        left: left.implementation.clone(),
                        right: right.implementation.clone(),
                        left_value: *left_value,
                        right_value: *right_value,
                    });
                }
            }
        }
    }
    disagreements
}
