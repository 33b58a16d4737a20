//! External statistics backend invoked as a subprocess.
//!
//! The configured program runs with the script path as its only argument. The
//! block is written to the child's stdin as CSV (`cohort_a,cohort_b,cohort_c`,
//! one row per repetition) and the requested metric is exported in
//! `COHORT_STATS_METRIC`. The script answers on stdout with a CSV table of one
//! row per metric, columns addressed by name:
//!
//! ```text
//! implementation,measured_metric,friedman_p,wilcoxon_p_1v2,wilcoxon_p_2v3,
//! wilcoxon_p_1v3,hommel_p_1v2,hommel_p_2v3,hommel_p_1v3
//! ```
//!
//! Every value must be present. A backend that cannot compute a test must
//! exit non-zero with the reason on stderr; a row with `NA`, empty or
//! negative cells is rejected rather than recorded.

use crate::config::ExternalConfig;
use crate::evaluator::{log_omnibus, EvalError, Evaluator};
use crate::model::{EvaluationResult, MeasurementDataBlock, Metric};
use serde::Deserialize;
use std::fmt::Write as _;
use std::io::{Read, Write};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use thiserror::Error;

/// Environment variable carrying the requested metric name
pub const METRIC_ENV: &str = "COHORT_STATS_METRIC";
/// Environment variable carrying the significance threshold
pub const ALPHA_ENV: &str = "COHORT_STATS_ALPHA";

/// Columns the backend output must provide
pub const REQUIRED_COLUMNS: [&str; 9] = [
    "implementation",
    "measured_metric",
    "friedman_p",
    "wilcoxon_p_1v2",
    "wilcoxon_p_2v3",
    "wilcoxon_p_1v3",
    "hommel_p_1v2",
    "hommel_p_2v3",
    "hommel_p_1v3",
];

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Errors that can occur while running the external backend
#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Invalid backend command line: {0:?}")]
    InvalidProgram(String),

    #[error("Failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Backend exited with {status}: {stderr}")]
    Failed { status: String, stderr: String },

    #[error("Backend timeout after {0:?}")]
    Timeout(Duration),

    #[error("Invalid backend output: {0}")]
    Parse(String),

    #[error("Backend output has no row for {0}")]
    MetricNotFound(Metric),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// One row of backend output
#[derive(Debug, Deserialize)]
struct BridgeRow {
    implementation: String,
    measured_metric: String,
    #[serde(deserialize_with = "csv::invalid_option")]
    friedman_p: Option<f64>,
    #[serde(deserialize_with = "csv::invalid_option")]
    wilcoxon_p_1v2: Option<f64>,
    #[serde(deserialize_with = "csv::invalid_option")]
    wilcoxon_p_2v3: Option<f64>,
    #[serde(deserialize_with = "csv::invalid_option")]
    wilcoxon_p_1v3: Option<f64>,
    #[serde(deserialize_with = "csv::invalid_option")]
    hommel_p_1v2: Option<f64>,
    #[serde(deserialize_with = "csv::invalid_option")]
    hommel_p_2v3: Option<f64>,
    #[serde(deserialize_with = "csv::invalid_option")]
    hommel_p_1v3: Option<f64>,
}

/// Negative cells are the legacy "not computed" marker
fn computed(value: Option<f64>) -> Option<f64> {
    value.filter(|v| *v >= 0.0)
}

fn required(name: &str, value: Option<f64>) -> Result<f64, BridgeError> {
    computed(value).ok_or_else(|| BridgeError::Parse(format!("{name} is missing")))
}

fn triple(name: &str, values: [Option<f64>; 3]) -> Result<[f64; 3], BridgeError> {
    match values.map(computed) {
        [Some(a), Some(b), Some(c)] => Ok([a, b, c]),
        incomplete => Err(BridgeError::Parse(format!(
            "{name} p-values are missing: {incomplete:?}"
        ))),
    }
}

impl BridgeRow {
    fn into_result(self, metric: Metric) -> Result<EvaluationResult, BridgeError> {
        let implementation = match self.implementation.trim() {
            "" => "external".to_string(),
            tag => tag.to_string(),
        };
        Ok(EvaluationResult {
            implementation,
            metric,
            friedman_p: Some(required("friedman_p", self.friedman_p)?),
            wilcoxon_ps: Some(triple(
                "wilcoxon",
                [self.wilcoxon_p_1v2, self.wilcoxon_p_2v3, self.wilcoxon_p_1v3],
            )?),
            hommel_ps: Some(triple(
                "hommel",
                [self.hommel_p_1v2, self.hommel_p_2v3, self.hommel_p_1v3],
            )?),
        })
    }
}

/// Map backend stdout to the result for `metric`.
///
/// # Errors
///
/// Returns `BridgeError::Parse` for malformed CSV, missing columns or any
/// missing p-value, and `BridgeError::MetricNotFound` when
/// no row matches.
pub fn parse_output(stdout: &str, metric: Metric) -> Result<EvaluationResult, BridgeError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_reader(stdout.as_bytes());

    let headers = reader
        .headers()
        .map_err(|e| BridgeError::Parse(e.to_string()))?
        .clone();
    if let Some(missing) = REQUIRED_COLUMNS
        .iter()
        .find(|column| !headers.iter().any(|h| h == **column))
    {
        return Err(BridgeError::Parse(format!("missing column {missing}")));
    }

    for row in reader.deserialize::<BridgeRow>() {
        let row = row.map_err(|e| BridgeError::Parse(e.to_string()))?;
        if row.measured_metric.parse::<Metric>().ok() == Some(metric) {
            return row.into_result(metric);
        }
    }
    Err(BridgeError::MetricNotFound(metric))
}

/// Block serialized for the backend's stdin
#[must_use]
pub fn block_to_csv(block: &MeasurementDataBlock) -> String {
    let mut out = String::from("cohort_a,cohort_b,cohort_c\n");
    for i in 0..block.repetitions() {
        writeln!(
            out,
            "{},{},{}",
            block.cohort_a()[i],
            block.cohort_b()[i],
            block.cohort_c()[i]
        )
        .ok();
    }
    out
}

fn drain<R: Read + Send + 'static>(source: Option<R>) -> JoinHandle<String> {
    thread::spawn(move || {
        let mut buffer = Vec::new();
        if let Some(mut source) = source {
            source.read_to_end(&mut buffer).ok();
        }
        String::from_utf8_lossy(&buffer).into_owned()
    })
}

/// Evaluator backed by an external statistics script
#[derive(Debug, Clone)]
pub struct ExternalProcessEvaluator {
    config: ExternalConfig,
}

impl ExternalProcessEvaluator {
    /// Create an evaluator with custom configuration
    #[must_use]
    pub const fn with_config(config: ExternalConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub const fn config(&self) -> &ExternalConfig {
        &self.config
    }

    fn command_line(&self) -> Result<Vec<String>, BridgeError> {
        let words = shell_words::split(&self.config.program)
            .map_err(|_| BridgeError::InvalidProgram(self.config.program.clone()))?;
        if words.is_empty() {
            return Err(BridgeError::InvalidProgram(self.config.program.clone()));
        }
        Ok(words)
    }

    /// Check if the backend interpreter is installed
    #[must_use]
    pub fn is_available(&self) -> bool {
        let Ok(words) = self.command_line() else {
            return false;
        };
        Command::new("which")
            .arg(&words[0])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .is_ok_and(|s| s.success())
    }

    /// Run the backend once and return its stdout.
    ///
    /// # Errors
    ///
    /// Returns an error if the program cannot be started, exits non-zero or
    /// exceeds the configured timeout.
    pub fn run_script(&self, input: &str, metric: Metric, alpha: f64) -> Result<String, BridgeError> {
        let words = self.command_line()?;
        let start = Instant::now();

        let mut child = Command::new(&words[0])
            .args(&words[1..])
            .arg(&self.config.script)
            .env(METRIC_ENV, metric.name())
            .env(ALPHA_ENV, alpha.to_string())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| BridgeError::Spawn {
                program: words[0].clone(),
                source,
            })?;

        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());
        if let Some(mut stdin) = child.stdin.take() {
            let input = input.to_string();
            // a backend that ignores stdin may close it early
            thread::spawn(move || stdin.write_all(input.as_bytes()).ok());
        }

        let status = self.wait_with_timeout(&mut child, start)?;
        let stdout = stdout.join().unwrap_or_default();
        let stderr = stderr.join().unwrap_or_default();

        tracing::debug!(
            program = %self.config.program,
            script = %self.config.script.display(),
            metric = %metric,
            elapsed_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX),
            "External backend finished"
        );

        if !status.success() {
            return Err(BridgeError::Failed {
                status: status.to_string(),
                stderr,
            });
        }
        Ok(stdout)
    }

    fn wait_with_timeout(&self, child: &mut Child, start: Instant) -> Result<ExitStatus, BridgeError> {
        let timeout = self.config.timeout();
        loop {
            if let Some(status) = child.try_wait()? {
                return Ok(status);
            }
            if start.elapsed() > timeout {
                child.kill().ok();
                child.wait().ok();
                return Err(BridgeError::Timeout(timeout));
            }
            thread::sleep(POLL_INTERVAL);
        }
    }
}

impl Default for ExternalProcessEvaluator {
    fn default() -> Self {
        Self::with_config(ExternalConfig::default())
    }
}

impl Evaluator for ExternalProcessEvaluator {
    fn implementation(&self) -> &str {
        "external"
    }

    fn evaluate(&self, block: &MeasurementDataBlock, alpha: f64) -> Result<EvaluationResult, EvalError> {
        let stdout = self.run_script(&block_to_csv(block), block.metric(), alpha)?;
        let result = parse_output(&stdout, block.metric())?;
        if let Some(p) = result.friedman_p {
            log_omnibus(&result.implementation, block.metric(), p, alpha);
        }
        Ok(result)
    }
}
