//! Integration tests for the cohort-stats CLI and library.
//!
//! These tests verify end-to-end functionality including:
//! - Raw fold rows aggregate into paired per-metric blocks
//! - The pipeline persists results and isolates evaluator failures
//! - Result sinks stay header-idempotent across runs
//! - The external backend contract works through a real subprocess

// Allow less strict lints for test code
#![allow(clippy::unwrap_used)]
#![allow(clippy::float_cmp)]
#![allow(clippy::cast_precision_loss)]

use cohort_stats::stats::{friedman_rank_sum, wilcoxon_exact, StatsError};
use cohort_stats::{
    EvaluatorKind, FoldAggregator, Metric, Pipeline, PipelineConfig, ReportBuilder,
};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::fmt::Write as _;
use std::path::Path;
use std::process::Command;

const RAW_HEADER: &str = "experiment_name,precision,recall,mAP50,mAP50-95,train_time\n";

/// Raw CSV with `per_cohort` repetitions of `fold_size` rows for each cohort
fn raw_csv(per_cohort: usize, fold_size: usize, values: [f64; 3]) -> String {
    let mut csv = RAW_HEADER.to_string();
    for (prefix, value) in ["vz", "ir", "hy"].iter().zip(values) {
        for rep in 0..per_cohort {
            for _ in 0..fold_size {
                writeln!(
                    csv,
                    "{prefix}-{rep},{value},{value},{value},{value},12.5"
                )
                .unwrap();
            }
        }
    }
    csv
}

/// Raw CSV with noisy, cohort-shifted values
fn random_csv(rng: &mut ChaCha8Rng, per_cohort: usize, fold_size: usize) -> String {
    let mut csv = RAW_HEADER.to_string();
    for (prefix, base) in [("vz", 0.80), ("ir", 0.76), ("hy", 0.82)] {
        for rep in 0..per_cohort {
            for _ in 0..fold_size {
                let v: Vec<f64> = (0..4).map(|_| base + rng.gen_range(0.0..0.08)).collect();
                writeln!(csv, "{prefix}-{rep},{},{},{},{},30.0", v[0], v[1], v[2], v[3]).unwrap();
            }
        }
    }
    csv
}

fn config_in(dir: &Path, evaluators: Vec<EvaluatorKind>) -> PipelineConfig {
    PipelineConfig {
        metrics_path: dir.join("metrics.csv"),
        pairwise_path: dir.join("out/pairwise_tests.csv"),
        effect_size_path: dir.join("out/effect_sizes.csv"),
        summary_path: dir.join("out/metric_summary.csv"),
        evaluators,
        ..PipelineConfig::default()
    }
}

fn local_evaluators() -> Vec<EvaluatorKind> {
    vec![
        EvaluatorKind::Native,
        EvaluatorKind::Alternate,
        EvaluatorKind::Reference,
        EvaluatorKind::HommelNative,
        EvaluatorKind::HommelAlternate,
    ]
}

// ============================================================================
// Aggregation
// ============================================================================

#[test]
fn test_block_lengths_follow_row_count() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("metrics.csv");
    for fold_size in [1, 3, 5] {
        for per_cohort in [1, 2, 4] {
            std::fs::write(&path, raw_csv(per_cohort, fold_size, [0.9, 0.8, 0.85])).unwrap();
            let rows = 3 * per_cohort * fold_size;
            let blocks: Vec<_> = FoldAggregator::new(fold_size)
                .aggregate_file(&path)
                .unwrap()
                .collect();
            assert_eq!(blocks.len(), 4);
            for block in &blocks {
                assert_eq!(block.repetitions(), rows / (3 * fold_size));
            }
        }
    }
}

#[test]
fn test_thirty_row_scenario() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(dir.path(), local_evaluators());
    std::fs::write(&config.metrics_path, raw_csv(2, 5, [0.9, 0.8, 0.85])).unwrap();

    let blocks: Vec<_> = FoldAggregator::new(5)
        .aggregate_file(&config.metrics_path)
        .unwrap()
        .collect();
    let precision = &blocks[0];
    assert_eq!(precision.metric(), Metric::Precision);
    assert_eq!(precision.labels(), &["VZ".to_string(), "IR".to_string(), "HY".to_string()]);
    for (cohort, expected) in precision.cohorts().iter().zip([0.9, 0.8, 0.85]) {
        assert_eq!(cohort.len(), 2);
        assert!(cohort.iter().all(|v| (v - expected).abs() < 1e-12));
    }

    // two repetitions cannot carry a Friedman test, and constant
    // differences tie in every Wilcoxon comparison
    assert!(matches!(
        friedman_rank_sum(&precision.cohorts()),
        Err(StatsError::TooFewRepetitions { required: 3, found: 2 })
    ));
    assert!(matches!(
        wilcoxon_exact(precision.cohort_a(), precision.cohort_b()),
        Err(StatsError::TiedDifferences)
    ));

    // every evaluator fails on every metric; the run still completes
    let pipeline = Pipeline::new(config).unwrap();
    let summary = pipeline.run().unwrap();
    assert_eq!(summary.blocks, 4);
    assert_eq!(summary.results_written, 0);
    assert_eq!(summary.failures.len(), 4 * 5);
    assert!(!pipeline.sinks().pairwise.path().exists());

    let effect = pipeline.sinks().effect_size.read_all().unwrap();
    assert_eq!(effect.len(), 4);
    assert!(effect.iter().all(|r| (r.effect_size - 1.0).abs() < 1e-12));

    let summaries = pipeline.sinks().summary.read_all().unwrap();
    assert_eq!(summaries.len(), 12);
    assert_eq!(summaries[0].experiment, "VZ");
    assert!((summaries[1].mean - 0.8).abs() < 1e-12);
    assert!(summaries.iter().all(|s| s.std.abs() < 1e-12));
}

// ============================================================================
// Pipeline and sinks
// ============================================================================

#[test]
fn test_random_runs_agree_and_accumulate() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(dir.path(), local_evaluators());
    let mut rng = ChaCha8Rng::seed_from_u64(2024);
    std::fs::write(&config.metrics_path, random_csv(&mut rng, 6, 5)).unwrap();

    let pipeline = Pipeline::new(config).unwrap();
    let first = pipeline.run().unwrap();
    assert!(first.is_clean(), "{:?}", first.failures);
    assert_eq!(first.results_written, 4 * 5);

    pipeline.run().unwrap();
    let pairwise = std::fs::read_to_string(pipeline.sinks().pairwise.path()).unwrap();
    assert_eq!(pairwise.matches("implementation,measured_metric").count(), 1);
    assert_eq!(pairwise.lines().count(), 1 + 2 * 20);

    let effect = std::fs::read_to_string(pipeline.sinks().effect_size.path()).unwrap();
    assert_eq!(effect.matches("measured_metric,effect_size").count(), 1);
    assert_eq!(effect.lines().count(), 1 + 2 * 4);
}

#[test]
fn test_force_recreate_removes_stale_rows() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config_in(dir.path(), vec![EvaluatorKind::Native]);
    let mut rng = ChaCha8Rng::seed_from_u64(11);
    std::fs::write(&config.metrics_path, random_csv(&mut rng, 4, 3)).unwrap();
    config.fold_size = 3;

    std::fs::create_dir_all(dir.path().join("out")).unwrap();
    std::fs::write(
        &config.pairwise_path,
        "implementation,measured_metric,friedman_p,wilcoxon_p_1v2,wilcoxon_p_2v3,wilcoxon_p_1v3,hommel_p_1v2,hommel_p_2v3,hommel_p_1v3\nstale,RECALL,0.5,,,,,,\n",
    )
    .unwrap();

    config.force_recreate = true;
    let pipeline = Pipeline::new(config).unwrap();
    pipeline.run().unwrap();

    let rows = pipeline.sinks().pairwise.read_all().unwrap();
    assert_eq!(rows.len(), 4);
    assert!(rows.iter().all(|r| r.implementation == "native"));
    let order: Vec<Metric> = rows.iter().map(|r| r.measured_metric).collect();
    assert_eq!(order, Metric::ALL.to_vec());
}

#[test]
fn test_report_from_pipeline_output() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(dir.path(), local_evaluators());
    let mut rng = ChaCha8Rng::seed_from_u64(5);
    std::fs::write(&config.metrics_path, random_csv(&mut rng, 5, 2)).unwrap();
    let config = PipelineConfig {
        fold_size: 2,
        ..config
    };
    let pipeline = Pipeline::new(config).unwrap();
    pipeline.run().unwrap();

    let report = ReportBuilder::from_sink(pipeline.sinks().pairwise.path())
        .unwrap()
        .build();
    assert_eq!(report.results.len(), 20);
    assert_eq!(report.agreement.len(), 4);
    for entry in &report.agreement {
        assert_eq!(entry.implementations, vec!["native", "alternate", "reference"]);
        assert!(entry.spread() < 1e-6);
    }
}

// ============================================================================
// External backend
// ============================================================================

#[cfg(unix)]
#[test]
fn test_external_backend_in_pipeline() {
    let dir = tempfile::tempdir().unwrap();
    let script = dir.path().join("paired_tests.sh");
    std::fs::write(
        &script,
        "cat > /dev/null\n\
         cat <<'EOF'\n\
         implementation,measured_metric,friedman_p,wilcoxon_p_1v2,wilcoxon_p_2v3,wilcoxon_p_1v3,hommel_p_1v2,hommel_p_2v3,hommel_p_1v3\n\
         r,PRECISION,0.01,0.02,0.03,0.04,0.05,0.06,0.07\n\
         r,RECALL,0.11,0.12,0.13,0.14,0.15,0.16,0.17\n\
         r,mAP50,0.21,0.22,0.23,0.24,0.25,0.26,0.27\n\
         r,mAP50_95,0.31,0.32,0.33,0.34,0.35,0.36,0.37\n\
         EOF\n",
    )
    .unwrap();

    let mut config = config_in(dir.path(), vec![EvaluatorKind::External]);
    config.external.program = "sh".to_string();
    config.external.script = script;
    config.external.timeout_secs = 10;
    std::fs::write(&config.metrics_path, raw_csv(3, 1, [0.9, 0.8, 0.85])).unwrap();
    config.fold_size = 1;

    let pipeline = Pipeline::new(config).unwrap();
    let summary = pipeline.run().unwrap();
    assert_eq!(summary.results_written, 4);

    let rows = pipeline.sinks().pairwise.read_all().unwrap();
    let recall = rows
        .into_iter()
        .map(cohort_stats::sink::PairwiseTestRow::into_result)
        .find(|r| r.metric == Metric::Recall)
        .unwrap();
    assert_eq!(recall.implementation, "r");
    assert_eq!(recall.friedman_p, Some(0.11));
    assert_eq!(recall.wilcoxon_ps, Some([0.12, 0.13, 0.14]));
    assert_eq!(recall.hommel_ps, Some([0.15, 0.16, 0.17]));
}

#[cfg(unix)]
#[test]
fn test_not_computed_backend_row_is_a_failure() {
    let dir = tempfile::tempdir().unwrap();
    let script = dir.path().join("paired_tests.sh");
    std::fs::write(
        &script,
        "cat > /dev/null\n\
         cat <<'EOF'\n\
         implementation,measured_metric,friedman_p,wilcoxon_p_1v2,wilcoxon_p_2v3,wilcoxon_p_1v3,hommel_p_1v2,hommel_p_2v3,hommel_p_1v3\n\
         r,PRECISION,NA,NA,NA,NA,NA,NA,NA\n\
         r,RECALL,0.11,0.12,0.13,0.14,0.15,0.16,0.17\n\
         r,mAP50,0.21,0.22,0.23,0.24,0.25,0.26,0.27\n\
         r,mAP50_95,0.31,0.32,0.33,0.34,0.35,0.36,0.37\n\
         EOF\n",
    )
    .unwrap();

    let mut config = config_in(dir.path(), vec![EvaluatorKind::External]);
    config.external.program = "sh".to_string();
    config.external.script = script;
    config.external.timeout_secs = 10;
    config.fold_size = 1;
    std::fs::write(&config.metrics_path, raw_csv(3, 1, [0.9, 0.8, 0.85])).unwrap();

    let pipeline = Pipeline::new(config).unwrap();
    let summary = pipeline.run().unwrap();
    assert_eq!(summary.results_written, 3);
    assert_eq!(summary.failures.len(), 1);
    assert_eq!(summary.failures[0].metric, Metric::Precision);
    assert_eq!(summary.failures[0].implementation, "external");

    let rows = pipeline.sinks().pairwise.read_all().unwrap();
    assert_eq!(rows.len(), 3);
    assert!(rows.iter().all(|row| row.measured_metric != Metric::Precision));
    assert!(rows.iter().all(|row| row.friedman_p.is_some()));
}

#[test]
fn test_missing_backend_fails_only_external() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config_in(dir.path(), vec![EvaluatorKind::External, EvaluatorKind::Reference]);
    config.external.program = "no-such-stats-runtime-installed".to_string();
    let mut rng = ChaCha8Rng::seed_from_u64(3);
    std::fs::write(&config.metrics_path, random_csv(&mut rng, 3, 5)).unwrap();

    let pipeline = Pipeline::new(config).unwrap();
    let summary = pipeline.run().unwrap();
    assert_eq!(summary.results_written, 4);
    assert_eq!(summary.failures.len(), 4);
    assert!(summary.failures.iter().all(|f| f.implementation == "external"));
}

// ============================================================================
// CLI
// ============================================================================

#[test]
fn test_cli_help_command() {
    let output = Command::new(env!("CARGO_BIN_EXE_cohort-stats"))
        .arg("--help")
        .output()
        .expect("Failed to execute CLI");

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(output.status.success());
    assert!(stdout.contains("evaluate"), "Help should list evaluate command");
    assert!(stdout.contains("summary"), "Help should list summary command");
    assert!(stdout.contains("report"), "Help should list report command");
}

#[test]
fn test_cli_summary_command() {
    let dir = tempfile::tempdir().unwrap();
    let metrics = dir.path().join("metrics.csv");
    std::fs::write(&metrics, raw_csv(2, 5, [0.9, 0.8, 0.85])).unwrap();

    let output = Command::new(env!("CARGO_BIN_EXE_cohort-stats"))
        .args(["summary", "--metrics"])
        .arg(&metrics)
        .output()
        .expect("Failed to execute CLI");

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    assert!(stdout.contains("VZ"));
    assert!(stdout.contains("0.900 ± 0.000"));
    assert!(stdout.contains("mAP50-95"));
}

#[test]
fn test_cli_evaluate_and_report() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(dir.path(), vec![EvaluatorKind::Native, EvaluatorKind::Reference]);
    let mut rng = ChaCha8Rng::seed_from_u64(99);
    std::fs::write(&config.metrics_path, random_csv(&mut rng, 4, 5)).unwrap();
    let config_path = dir.path().join("pipeline.yaml");
    std::fs::write(&config_path, serde_yaml::to_string(&config).unwrap()).unwrap();

    let status = Command::new(env!("CARGO_BIN_EXE_cohort-stats"))
        .args(["evaluate", "--force-recreate", "--config"])
        .arg(&config_path)
        .status()
        .expect("Failed to execute CLI");
    assert!(status.success());

    let output = Command::new(env!("CARGO_BIN_EXE_cohort-stats"))
        .args(["report", "--format", "json", "--results"])
        .arg(&config.pairwise_path)
        .output()
        .expect("Failed to execute CLI");
    assert!(output.status.success());
    let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(json["results"].as_array().unwrap().len(), 8);
}
