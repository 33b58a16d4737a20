//! Cohort Stats CLI
//!
//! Paired-cohort statistical evaluation of cross-validated detection metrics

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use cohort_stats::{
    report::{summary_table, ReportBuilder, ReportFormat},
    runner::summarize_block,
    FoldAggregator, Pipeline, PipelineConfig,
};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "cohort-stats")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run every configured evaluator and append results to the sinks
    Evaluate {
        /// Pipeline configuration (YAML); defaults apply when omitted
        #[arg(long)]
        config: Option<PathBuf>,

        /// Raw per-fold metrics file (overrides config)
        #[arg(long)]
        metrics: Option<PathBuf>,

        /// Delete existing result files first
        #[arg(long)]
        force_recreate: bool,

        /// Fold-runs per repetition (overrides config)
        #[arg(long)]
        fold_size: Option<usize>,

        /// Significance threshold (overrides config)
        #[arg(long)]
        alpha: Option<f64>,
    },

    /// Print per-cohort mean and standard deviation of each metric
    Summary {
        /// Raw per-fold metrics file
        #[arg(long, default_value = "results/metrics.csv")]
        metrics: PathBuf,

        /// Fold-runs per repetition
        #[arg(long, default_value = "5")]
        fold_size: usize,
    },

    /// Render the pairwise-test results
    Report {
        /// Pairwise-test results file
        #[arg(long, default_value = "results/pairwise_tests.csv")]
        results: PathBuf,

        /// Output format (markdown, text, json)
        #[arg(long, default_value = "markdown")]
        format: String,

        /// Significance threshold for marking p-values
        #[arg(long, default_value = "0.05")]
        alpha: f64,

        /// Output file (stdout when omitted)
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    // Initialize tracing; stdout carries reports
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    if cli.verbose {
        tracing::info!("Verbose mode enabled");
    }

    match cli.command {
        Commands::Evaluate {
            config,
            metrics,
            force_recreate,
            fold_size,
            alpha,
        } => {
            let mut pipeline_config = match &config {
                Some(path) => PipelineConfig::load(path)
                    .with_context(|| format!("loading {}", path.display()))?,
                None => PipelineConfig::default(),
            };
            if let Some(metrics) = metrics {
                pipeline_config.metrics_path = metrics;
            }
            if let Some(fold_size) = fold_size {
                pipeline_config.fold_size = fold_size;
            }
            if let Some(alpha) = alpha {
                pipeline_config.alpha = alpha;
            }
            pipeline_config.force_recreate |= force_recreate;

            tracing::info!(
                config = ?config,
                metrics = %pipeline_config.metrics_path.display(),
                fold_size = pipeline_config.fold_size,
                force_recreate = pipeline_config.force_recreate,
                "Starting evaluation"
            );

            let pipeline = Pipeline::new(pipeline_config)?;
            let summary = pipeline.run()?;

            println!(
                "Evaluated {} metrics: {} results written, {} evaluator failures, {} disagreements",
                summary.blocks,
                summary.results_written,
                summary.failures.len(),
                summary.disagreements.len()
            );
            for failure in &summary.failures {
                println!(
                    "  FAILED {} / {}: {}",
                    failure.metric, failure.implementation, failure.error
                );
            }
            for d in &summary.disagreements {
                println!(
                    "  DISAGREE {} {}: {} = {:.6}, {} = {:.6}",
                    d.metric, d.field, d.left, d.left_value, d.right, d.right_value
                );
            }
            println!();
            println!("{}", summary_table(&summary.summaries));
        }

        Commands::Summary { metrics, fold_size } => {
            let blocks = FoldAggregator::new(fold_size)
                .aggregate_file(&metrics)
                .with_context(|| format!("aggregating {}", metrics.display()))?;
            let summaries: Vec<_> = blocks.flat_map(|block| summarize_block(&block)).collect();
            println!("{}", summary_table(&summaries));
        }

        Commands::Report {
            results,
            format,
            alpha,
            output,
        } => {
            let format: ReportFormat = format.parse()?;
            let report = ReportBuilder::from_sink(&results)?.with_alpha(alpha).build();
            let rendered = report.render(format)?;

            match output {
                Some(path) => {
                    std::fs::write(&path, rendered)
                        .with_context(|| format!("writing {}", path.display()))?;
                    tracing::info!(output = %path.display(), "Report written");
                }
                None => println!("{rendered}"),
            }
        }
    }

    Ok(())
}
