//! # Cohort Stats
//!
//! Paired-cohort statistical evaluation of cross-validated detection metrics.
//!
//! Three cohorts (for example three sensor modalities) are trained and
//! evaluated on the same folds with the same seeds, so repetition `i` of every
//! cohort is paired. For each metric the pipeline reports a Friedman omnibus
//! test, exact pairwise Wilcoxon signed-rank tests, their Hommel correction
//! and a rank-based effect size.
//!
//! ## Cross-checking
//!
//! Every test is computed by more than one independent implementation
//! (rank-sum and Kendall's W Friedman, table and recursive exact Wilcoxon, an
//! optional external script). Results are written side by side and compared;
//! disagreements beyond a tolerance are reported.
//!
//! ## Architecture
//!
//! ```text
//! Raw per-fold metrics (CSV)
//!        ↓
//! Fold aggregation (average folds, split into cohorts A | B | C)
//!        ↓
//! One block per metric
//!        ↓                       ↓
//! Evaluators (native,        Effect size + cohort summary
//! alternate, reference,          ↓
//! external, hommel+*)        Buffered, written at the end
//!        ↓
//! Pairwise-test sink (appended per result)
//! ```

pub mod aggregate;
pub mod bridge;
pub mod config;
pub mod effect_size;
pub mod evaluator;
pub mod model;
pub mod report;
pub mod runner;
pub mod sink;
pub mod stats;

pub use aggregate::{AggregateError, BlockStream, FoldAggregator, RawRow};
pub use bridge::{parse_output, BridgeError, ExternalProcessEvaluator};
pub use config::{ConfigError, EvaluatorKind, ExternalConfig, PipelineConfig};
pub use effect_size::{block_effect_size, effect_size};
pub use evaluator::{
    build_registry, cross_check, hommel_correction, AlternateEvaluator, Corrected, Disagreement,
    EvalError, Evaluator, NativeEvaluator, ReferenceEvaluator,
};
pub use model::{
    Comparison, EffectSizeResult, EvaluationResult, MeasurementDataBlock, Metric, MetricResult,
    ModelError,
};
pub use report::{PairwiseReport, ReportBuilder, ReportError, ReportFormat};
pub use runner::{EvaluatorFailure, Pipeline, PipelineError, RunSummary};
pub use sink::{CsvSink, ResultSinks, SinkError, SinkRecord};
pub use stats::StatsError;
