//! Report generation module for evaluation results.
//!
//! Generates reports from the pairwise-test sink showing:
//! - Friedman, Wilcoxon and Hommel p-values per metric and implementation
//! - Agreement between implementations of the same test
//! - Per-cohort mean and standard deviation tables

use crate::model::{EvaluationResult, Metric, MetricResult};
use crate::sink::{CsvSink, PairwiseTestRow, SinkError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Write as FmtWrite;
use std::path::Path;
use tabled::settings::Style;
use tabled::{Table, Tabled};
use thiserror::Error;

/// Errors that can occur while building or rendering a report
#[derive(Error, Debug)]
pub enum ReportError {
    #[error("Failed to read results: {0}")]
    Sink(#[from] SinkError),

    #[error("Failed to render JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Unknown report format: {0}")]
    UnknownFormat(String),
}

/// Output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReportFormat {
    #[default]
    Markdown,
    Text,
    Json,
}

impl std::str::FromStr for ReportFormat {
    type Err = ReportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "markdown" | "md" => Ok(Self::Markdown),
            "text" | "txt" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            _ => Err(ReportError::UnknownFormat(s.to_string())),
        }
    }
}

/// Pairwise-test report
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PairwiseReport {
    /// Report metadata
    pub metadata: ReportMetadata,
    /// Results in sink order
    pub results: Vec<EvaluationResult>,
    /// Friedman agreement per metric
    pub agreement: Vec<AgreementEntry>,
}

/// Report metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportMetadata {
    /// Report title
    pub title: String,
    /// Results file the report was built from
    pub source: String,
    /// Report generation timestamp
    pub generated_at: DateTime<Utc>,
    /// Framework version
    pub framework_version: String,
    /// Significance threshold used for marking
    pub alpha: f64,
}

/// Spread of Friedman p-values across implementations of one metric
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgreementEntry {
    pub metric: Metric,
    /// Implementations reporting a Friedman p-value
    pub implementations: Vec<String>,
    pub min_p: f64,
    pub max_p: f64,
}

impl AgreementEntry {
    #[must_use]
    pub fn spread(&self) -> f64 {
        self.max_p - self.min_p
    }
}

/// Report builder for constructing pairwise reports
pub struct ReportBuilder {
    source: String,
    alpha: f64,
    results: Vec<EvaluationResult>,
}

impl ReportBuilder {
    /// Create a new report builder
    #[must_use]
    pub fn new(source: &str) -> Self {
        Self {
            source: source.to_string(),
            alpha: 0.05,
            results: Vec::new(),
        }
    }

    /// Set the significance threshold
    #[must_use]
    pub const fn with_alpha(mut self, alpha: f64) -> Self {
        self.alpha = alpha;
        self
    }

    /// Add evaluation results
    pub fn add_results<I: IntoIterator<Item = EvaluationResult>>(&mut self, results: I) {
        self.results.extend(results);
    }

    /// Load every row of a pairwise-test sink
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_sink<P: AsRef<Path>>(path: P) -> Result<Self, ReportError> {
        let path = path.as_ref();
        let rows = CsvSink::<PairwiseTestRow>::new(path).read_all()?;
        let mut builder = Self::new(&path.display().to_string());
        builder.add_results(rows.into_iter().map(PairwiseTestRow::into_result));
        Ok(builder)
    }

    /// Build the report
    #[must_use]
    pub fn build(self) -> PairwiseReport {
        let agreement = build_agreement(&self.results);
        PairwiseReport {
            metadata: ReportMetadata {
                title: "Paired Cohort Statistical Tests".to_string(),
                source: self.source,
                generated_at: Utc::now(),
                framework_version: env!("CARGO_PKG_VERSION").to_string(),
                alpha: self.alpha,
            },
            results: self.results,
            agreement,
        }
    }
}

fn build_agreement(results: &[EvaluationResult]) -> Vec<AgreementEntry> {
    Metric::ALL
        .iter()
        .filter_map(|&metric| {
            let reported: Vec<(&str, f64)> = results
                .iter()
                .filter(|r| r.metric == metric)
                .filter_map(|r| r.friedman_p.map(|p| (r.implementation.as_str(), p)))
                .collect();
            if reported.is_empty() {
                return None;
            }
            let min_p = reported.iter().map(|(_, p)| *p).fold(f64::INFINITY, f64::min);
            let max_p = reported.iter().map(|(_, p)| *p).fold(f64::NEG_INFINITY, f64::max);
            Some(AgreementEntry {
                metric,
                implementations: reported.iter().map(|(tag, _)| (*tag).to_string()).collect(),
                min_p,
                max_p,
            })
        })
        .collect()
}

/// Format a p-value, marking values below `alpha`
#[must_use]
pub fn format_p(p: Option<f64>, alpha: f64) -> String {
    match p {
        None => "-".to_string(),
        Some(p) if p < alpha => format!("{p:.4}*"),
        Some(p) => format!("{p:.4}"),
    }
}

/// Table row for text/markdown output
#[derive(Tabled)]
struct ResultTableRow {
    #[tabled(rename = "Metric")]
    metric: String,
    #[tabled(rename = "Implementation")]
    implementation: String,
    #[tabled(rename = "Friedman")]
    friedman: String,
    #[tabled(rename = "W 1v2")]
    wilcoxon_ab: String,
    #[tabled(rename = "W 2v3")]
    wilcoxon_bc: String,
    #[tabled(rename = "W 1v3")]
    wilcoxon_ac: String,
    #[tabled(rename = "H 1v2")]
    hommel_ab: String,
    #[tabled(rename = "H 2v3")]
    hommel_bc: String,
    #[tabled(rename = "H 1v3")]
    hommel_ac: String,
}

impl ResultTableRow {
    fn new(result: &EvaluationResult, alpha: f64) -> Self {
        let cell = |values: Option<[f64; 3]>, idx: usize| format_p(values.map(|v| v[idx]), alpha);
        Self {
            metric: result.metric.to_string(),
            implementation: result.implementation.clone(),
            friedman: format_p(result.friedman_p, alpha),
            wilcoxon_ab: cell(result.wilcoxon_ps, 0),
            wilcoxon_bc: cell(result.wilcoxon_ps, 1),
            wilcoxon_ac: cell(result.wilcoxon_ps, 2),
            hommel_ab: cell(result.hommel_ps, 0),
            hommel_bc: cell(result.hommel_ps, 1),
            hommel_ac: cell(result.hommel_ps, 2),
        }
    }
}

impl PairwiseReport {
    /// Render report as JSON
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    fn table(&self) -> Table {
        let rows: Vec<ResultTableRow> = self
            .results
            .iter()
            .map(|r| ResultTableRow::new(r, self.metadata.alpha))
            .collect();
        Table::new(rows)
    }

    /// Render report as markdown
    #[must_use]
    pub fn to_markdown(&self) -> String {
        let mut output = String::new();

        writeln!(output, "# {}", self.metadata.title).ok();
        writeln!(output).ok();
        writeln!(
            output,
            "**Generated:** {}",
            self.metadata.generated_at.format("%Y-%m-%d %H:%M:%S UTC")
        )
        .ok();
        writeln!(output, "**Source:** `{}`", self.metadata.source).ok();
        writeln!(
            output,
            "**Framework Version:** {}",
            self.metadata.framework_version
        )
        .ok();
        writeln!(output).ok();

        writeln!(output, "## Pairwise Tests").ok();
        writeln!(output).ok();
        if self.results.is_empty() {
            writeln!(output, "_No results._").ok();
        } else {
            let mut table = self.table();
            table.with(Style::markdown());
            writeln!(output, "{table}").ok();
        }
        writeln!(output).ok();
        writeln!(
            output,
            "`*` marks p < {}. W = Wilcoxon signed-rank (exact), H = Hommel-corrected.",
            self.metadata.alpha
        )
        .ok();
        writeln!(output).ok();

        if !self.agreement.is_empty() {
            writeln!(output, "## Implementation Agreement").ok();
            writeln!(output).ok();
            writeln!(output, "| Metric | Implementations | Min p | Max p | Spread |").ok();
            writeln!(output, "|--------|-----------------|-------|-------|--------|").ok();
            for entry in &self.agreement {
                writeln!(
                    output,
                    "| {} | {} | {:.6} | {:.6} | {:.2e} |",
                    entry.metric,
                    entry.implementations.join(", "),
                    entry.min_p,
                    entry.max_p,
                    entry.spread()
                )
                .ok();
            }
            writeln!(output).ok();
        }

        output
    }

    /// Render report as plain text table
    #[must_use]
    pub fn to_text(&self) -> String {
        let mut output = String::new();

        writeln!(
            output,
            "═══════════════════════════════════════════════════════════════"
        )
        .ok();
        writeln!(output, "  {}", self.metadata.title).ok();
        writeln!(
            output,
            "═══════════════════════════════════════════════════════════════"
        )
        .ok();
        writeln!(output).ok();
        writeln!(output, "  Source: {}", self.metadata.source).ok();
        writeln!(output, "  Alpha:  {}", self.metadata.alpha).ok();
        writeln!(output).ok();

        if self.results.is_empty() {
            writeln!(output, "  No results.").ok();
        } else {
            writeln!(output, "{}", self.table()).ok();
        }
        writeln!(output).ok();

        if !self.agreement.is_empty() {
            writeln!(output, "AGREEMENT (Friedman p)").ok();
            writeln!(
                output,
                "───────────────────────────────────────────────────────────────"
            )
            .ok();
            for entry in &self.agreement {
                writeln!(
                    output,
                    "  {:<10} spread {:.2e} across {}",
                    entry.metric.to_string(),
                    entry.spread(),
                    entry.implementations.join(", ")
                )
                .ok();
            }
        }

        output
    }

    /// Render in the requested format
    ///
    /// # Errors
    ///
    /// Returns an error if JSON serialization fails.
    pub fn render(&self, format: ReportFormat) -> Result<String, ReportError> {
        Ok(match format {
            ReportFormat::Markdown => self.to_markdown(),
            ReportFormat::Text => self.to_text(),
            ReportFormat::Json => self.to_json()?,
        })
    }
}

/// Table row for cohort summaries
#[derive(Tabled)]
struct SummaryTableRow {
    #[tabled(rename = "Metric")]
    metric: String,
    #[tabled(rename = "Cohort")]
    cohort: String,
    #[tabled(rename = "Mean ± Std")]
    value: String,
}

/// Render cohort summaries as a table, one row per (metric, cohort)
#[must_use]
pub fn summary_table(summaries: &[MetricResult]) -> String {
    let rows: Vec<SummaryTableRow> = summaries
        .iter()
        .map(|s| SummaryTableRow {
            metric: s.metric.short().to_string(),
            cohort: s.experiment.clone(),
            value: format!("{:.3} ± {:.3}", s.mean, s.std),
        })
        .collect();
    Table::new(rows).to_string()
}
