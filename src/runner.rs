//! Pipeline execution engine.
//!
//! Orchestrates one run: aggregate the raw metrics once, fan every block out
//! to the registered evaluators, persist each result as it arrives, and write
//! the buffered effect-size and summary rows at the end. Evaluator failures
//! are recorded and skipped; aggregation and sink failures abort the run.

use crate::aggregate::{AggregateError, FoldAggregator};
use crate::bridge::ExternalProcessEvaluator;
use crate::config::{ConfigError, EvaluatorKind, PipelineConfig};
use crate::effect_size::block_effect_size;
use crate::evaluator::{build_registry, cross_check, Disagreement, Evaluator};
use crate::model::{EffectSizeResult, EvaluationResult, MeasurementDataBlock, Metric, MetricResult};
use crate::sink::{EffectSizeRow, MetricSummaryRow, PairwiseTestRow, ResultSinks, SinkError};
use crate::stats::{mean, population_std};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that abort a pipeline run
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Aggregation failed: {0}")]
    Aggregate(#[from] AggregateError),

    #[error("Result sink failed: {0}")]
    Sink(#[from] SinkError),
}

/// One failed (metric, evaluator) pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvaluatorFailure {
    pub metric: Metric,
    pub implementation: String,
    pub error: String,
}

/// Outcome of a completed run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunSummary {
    /// Blocks processed
    pub blocks: usize,
    /// Rows appended to the pairwise sink
    pub results_written: usize,
    pub effect_sizes: Vec<EffectSizeResult>,
    pub summaries: Vec<MetricResult>,
    pub failures: Vec<EvaluatorFailure>,
    pub disagreements: Vec<Disagreement>,
}

impl RunSummary {
    /// No evaluator failed and all implementations agreed
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty() && self.disagreements.is_empty()
    }
}

/// Mean and population standard deviation of each cohort
#[must_use]
pub fn summarize_block(block: &MeasurementDataBlock) -> [MetricResult; 3] {
    let labels = block.labels();
    let cohorts = block.cohorts();
    std::array::from_fn(|i| MetricResult {
        experiment: labels[i].clone(),
        metric: block.metric(),
        mean: mean(cohorts[i]),
        std: population_std(cohorts[i]),
    })
}

/// Whether the external evaluator is configured but its runtime is not
/// installed
#[must_use]
pub fn external_backend_missing(config: &PipelineConfig) -> bool {
    config.evaluators.contains(&EvaluatorKind::External)
        && !ExternalProcessEvaluator::with_config(config.external.clone()).is_available()
}

/// Statistical evaluation pipeline
pub struct Pipeline {
    config: PipelineConfig,
    evaluators: Vec<Box<dyn Evaluator>>,
    sinks: ResultSinks,
}

impl Pipeline {
    /// Create a pipeline with the evaluators named in `config`
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn new(config: PipelineConfig) -> Result<Self, PipelineError> {
        let evaluators = build_registry(&config);
        let pipeline = Self::with_evaluators(config, evaluators)?;
        if external_backend_missing(&pipeline.config) {
            tracing::warn!(
                program = %pipeline.config.external.program,
                "External backend runtime not found; the external evaluator will fail for every metric"
            );
        }
        Ok(pipeline)
    }

    /// Create a pipeline with an explicit evaluator list
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn with_evaluators(
        config: PipelineConfig,
        evaluators: Vec<Box<dyn Evaluator>>,
    ) -> Result<Self, PipelineError> {
        config.validate()?;
        let sinks = ResultSinks::new(
            config.pairwise_path.clone(),
            config.effect_size_path.clone(),
            config.summary_path.clone(),
        );
        Ok(Self {
            config,
            evaluators,
            sinks,
        })
    }

    #[must_use]
    pub const fn config(&self) -> &PipelineConfig {
        &self.config
    }

    #[must_use]
    pub const fn sinks(&self) -> &ResultSinks {
        &self.sinks
    }

    /// Implementation tags in registration order
    #[must_use]
    pub fn implementations(&self) -> Vec<&str> {
        self.evaluators.iter().map(|e| e.implementation()).collect()
    }

    /// Aggregator configured for this run
    #[must_use]
    pub fn aggregator(&self) -> FoldAggregator {
        let aggregator = FoldAggregator::new(self.config.fold_size);
        match self.config.labels() {
            Some(labels) => aggregator.with_labels(labels),
            None => aggregator,
        }
    }

    /// Run over the configured raw metrics file
    ///
    /// # Errors
    ///
    /// Returns an error if aggregation or a sink write fails.
    pub fn run(&self) -> Result<RunSummary, PipelineError> {
        let blocks = self.aggregator().aggregate_file(&self.config.metrics_path)?;
        self.run_blocks(blocks)
    }

    /// Run over already aggregated blocks
    ///
    /// # Errors
    ///
    /// Returns an error if a sink write fails.
    pub fn run_blocks<I>(&self, blocks: I) -> Result<RunSummary, PipelineError>
    where
        I: IntoIterator<Item = MeasurementDataBlock>,
    {
        if self.config.force_recreate {
            self.sinks.purge_all()?;
        }

        tracing::info!(
            evaluators = ?self.implementations(),
            alpha = self.config.alpha,
            "Starting statistical evaluation"
        );

        let mut summary = RunSummary::default();
        for block in blocks {
            let metric = block.metric();
            tracing::info!(metric = %metric, repetitions = block.repetitions(), "Evaluating metric");

            let results = self.evaluate_block(&block, &mut summary)?;
            summary
                .disagreements
                .extend(cross_check(&results, self.config.agreement_tolerance));

            summary.effect_sizes.push(block_effect_size(&block));
            summary.summaries.extend(summarize_block(&block));
            summary.blocks += 1;
        }

        let effect_rows: Vec<EffectSizeRow> = summary.effect_sizes.iter().map(EffectSizeRow::from).collect();
        self.sinks.effect_size.append(&effect_rows)?;
        let summary_rows: Vec<MetricSummaryRow> =
            summary.summaries.iter().map(MetricSummaryRow::from).collect();
        self.sinks.summary.append(&summary_rows)?;

        tracing::info!(
            blocks = summary.blocks,
            results = summary.results_written,
            failures = summary.failures.len(),
            disagreements = summary.disagreements.len(),
            "Statistical evaluation finished"
        );
        Ok(summary)
    }

    /// Evaluate one block with every evaluator, persisting each success
    fn evaluate_block(
        &self,
        block: &MeasurementDataBlock,
        summary: &mut RunSummary,
    ) -> Result<Vec<EvaluationResult>, PipelineError> {
        let mut results = Vec::with_capacity(self.evaluators.len());
        for evaluator in &self.evaluators {
            match evaluator.evaluate(block, self.config.alpha) {
                Ok(result) => {
                    self.sinks.pairwise.append_one(&PairwiseTestRow::from(&result))?;
                    summary.results_written += 1;
                    results.push(result);
                }
                Err(e) => {
                    tracing::error!(
                        metric = %block.metric(),
                        implementation = evaluator.implementation(),
                        error = %e,
                        "Evaluator failed"
                    );
                    summary.failures.push(EvaluatorFailure {
                        metric: block.metric(),
                        implementation: evaluator.implementation().to_string(),
                        error: e.to_string(),
                    });
                }
            }
        }
        Ok(results)
    }
}
