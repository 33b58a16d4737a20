//! Append-only CSV result sinks.
//!
//! Each sink has a fixed header. The header is written only when the target
//! file is missing or empty, so repeated runs accumulate rows under a single
//! header. Each batch is serialized in memory and appended with one write.

use crate::model::{EffectSizeResult, EvaluationResult, Metric, MetricResult};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors that can occur while writing or reading a sink
#[derive(Error, Debug)]
pub enum SinkError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("{path} has header {found:?}, expected {expected:?}")]
    HeaderMismatch {
        path: String,
        expected: String,
        found: String,
    },
}

/// A row type with a fixed column schema
pub trait SinkRecord: Serialize + DeserializeOwned {
    /// Column names in serialization order
    const HEADER: &'static [&'static str];
}

/// Pairwise-test sink row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PairwiseTestRow {
    pub implementation: String,
    pub measured_metric: Metric,
    pub friedman_p: Option<f64>,
    pub wilcoxon_p_1v2: Option<f64>,
    pub wilcoxon_p_2v3: Option<f64>,
    pub wilcoxon_p_1v3: Option<f64>,
    pub hommel_p_1v2: Option<f64>,
    pub hommel_p_2v3: Option<f64>,
    pub hommel_p_1v3: Option<f64>,
}

impl SinkRecord for PairwiseTestRow {
    const HEADER: &'static [&'static str] = &[
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
}

impl From<&EvaluationResult> for PairwiseTestRow {
    fn from(result: &EvaluationResult) -> Self {
        let [wilcoxon_p_1v2, wilcoxon_p_2v3, wilcoxon_p_1v3] =
            result.wilcoxon_ps.map_or([None; 3], |ps| ps.map(Some));
        let [hommel_p_1v2, hommel_p_2v3, hommel_p_1v3] =
            result.hommel_ps.map_or([None; 3], |ps| ps.map(Some));
        Self {
            implementation: result.implementation.clone(),
            measured_metric: result.metric,
            friedman_p: result.friedman_p,
            wilcoxon_p_1v2,
            wilcoxon_p_2v3,
            wilcoxon_p_1v3,
            hommel_p_1v2,
            hommel_p_2v3,
            hommel_p_1v3,
        }
    }
}

impl PairwiseTestRow {
    /// Convert back to an evaluation result.
    ///
    /// Negative values (files written with the legacy `-1` marker) and
    /// incomplete triples read as absent.
    #[must_use]
    pub fn into_result(self) -> EvaluationResult {
        let present = |v: Option<f64>| v.filter(|p| *p >= 0.0);
        let triple = |values: [Option<f64>; 3]| match values.map(present) {
            [Some(a), Some(b), Some(c)] => Some([a, b, c]),
            _ => None,
        };
        EvaluationResult {
            implementation: self.implementation,
            metric: self.measured_metric,
            friedman_p: present(self.friedman_p),
            wilcoxon_ps: triple([self.wilcoxon_p_1v2, self.wilcoxon_p_2v3, self.wilcoxon_p_1v3]),
            hommel_ps: triple([self.hommel_p_1v2, self.hommel_p_2v3, self.hommel_p_1v3]),
        }
    }
}

/// Effect-size sink row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EffectSizeRow {
    pub measured_metric: Metric,
    pub effect_size: f64,
}

impl SinkRecord for EffectSizeRow {
    const HEADER: &'static [&'static str] = &["measured_metric", "effect_size"];
}

impl From<&EffectSizeResult> for EffectSizeRow {
    fn from(result: &EffectSizeResult) -> Self {
        Self {
            measured_metric: result.metric,
            effect_size: result.effect_size,
        }
    }
}

/// Metric-summary sink row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSummaryRow {
    pub experiment: String,
    pub measured_metric: Metric,
    pub mean: f64,
    pub std: f64,
}

impl SinkRecord for MetricSummaryRow {
    const HEADER: &'static [&'static str] = &["experiment", "measured_metric", "mean", "std"];
}

impl From<&MetricResult> for MetricSummaryRow {
    fn from(result: &MetricResult) -> Self {
        Self {
            experiment: result.experiment.clone(),
            measured_metric: result.metric,
            mean: result.mean,
            std: result.std,
        }
    }
}

/// Header-idempotent append-only CSV file
#[derive(Debug, Clone)]
pub struct CsvSink<R> {
    path: PathBuf,
    record: PhantomData<fn() -> R>,
}

impl<R: SinkRecord> CsvSink<R> {
    #[must_use]
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            path: path.into(),
            record: PhantomData,
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Header line without terminator
    #[must_use]
    pub fn header_line() -> String {
        R::HEADER.join(",")
    }

    /// Whether the next append must start with the header.
    ///
    /// # Errors
    ///
    /// Returns `SinkError::HeaderMismatch` if the file starts with a
    /// different header.
    fn needs_header(&self) -> Result<bool, SinkError> {
        let file = match std::fs::File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(true),
            Err(e) => return Err(e.into()),
        };

        let mut first_line = String::new();
        if BufReader::new(file).read_line(&mut first_line)? == 0 {
            return Ok(true);
        }

        let found = first_line.trim_end_matches(['\r', '\n']);
        let expected = Self::header_line();
        if found != expected {
            return Err(SinkError::HeaderMismatch {
                path: self.path.display().to_string(),
                expected,
                found: found.to_string(),
            });
        }
        Ok(false)
    }

    /// Append a batch of rows, creating the file and parent directories as
    /// needed. Returns the number of rows written.
    ///
    /// # Errors
    ///
    /// Returns an error on I/O failure or header mismatch.
    pub fn append(&self, rows: &[R]) -> Result<usize, SinkError> {
        if rows.is_empty() {
            return Ok(0);
        }

        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(Vec::new());
        if self.needs_header()? {
            writer.write_record(R::HEADER)?;
        }
        for row in rows {
            writer.serialize(row)?;
        }
        let batch = writer
            .into_inner()
            .map_err(|e| SinkError::IoError(e.into_error()))?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(&batch)?;
        file.flush()?;

        tracing::trace!(path = %self.path.display(), rows = rows.len(), "Appended rows");
        Ok(rows.len())
    }

    /// Append a single row
    ///
    /// # Errors
    ///
    /// Returns an error on I/O failure or header mismatch.
    pub fn append_one(&self, row: &R) -> Result<(), SinkError> {
        self.append(std::slice::from_ref(row)).map(|_| ())
    }

    /// Delete the file if present. Returns whether a file was removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be removed.
    pub fn purge(&self) -> Result<bool, SinkError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => {
                tracing::info!(path = %self.path.display(), "Removed existing results");
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Read every row back; a missing file reads as empty.
    ///
    /// # Errors
    ///
    /// Returns an error on I/O failure, header mismatch or malformed rows.
    pub fn read_all(&self) -> Result<Vec<R>, SinkError> {
        if self.needs_header()? {
            return Ok(Vec::new());
        }
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .from_path(&self.path)?;
        reader
            .deserialize()
            .map(|row| row.map_err(SinkError::from))
            .collect()
    }
}

/// The three sinks of one pipeline
#[derive(Debug, Clone)]
pub struct ResultSinks {
    pub pairwise: CsvSink<PairwiseTestRow>,
    pub effect_size: CsvSink<EffectSizeRow>,
    pub summary: CsvSink<MetricSummaryRow>,
}

impl ResultSinks {
    #[must_use]
    pub fn new<P: Into<PathBuf>>(pairwise: P, effect_size: P, summary: P) -> Self {
        Self {
            pairwise: CsvSink::new(pairwise),
            effect_size: CsvSink::new(effect_size),
            summary: CsvSink::new(summary),
        }
    }

    /// Delete all three files
    ///
    /// # Errors
    ///
    /// Returns the first removal failure.
    pub fn purge_all(&self) -> Result<(), SinkError> {
        self.pairwise.purge()?;
        self.effect_size.purge()?;
        self.summary.purge()?;
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::float_cmp)]
mod tests {
    use super::*;

    fn result() -> EvaluationResult {
        EvaluationResult::new("native", Metric::Recall)
            .with_friedman(0.0123)
            .with_wilcoxon([0.0625, 0.125, 0.5])
    }

    // ==========================================================================
    // Row conversion
    // ==========================================================================

    #[test]
    fn test_absent_fields_are_empty_cells() {
        let dir = tempfile::tempdir().unwrap();
        let sink = CsvSink::<PairwiseTestRow>::new(dir.path().join("pairwise.csv"));
        sink.append_one(&PairwiseTestRow::from(&result())).unwrap();

        let content = std::fs::read_to_string(sink.path()).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines[0], CsvSink::<PairwiseTestRow>::header_line());
        assert_eq!(lines[1], "native,RECALL,0.0123,0.0625,0.125,0.5,,,");
    }

    #[test]
    fn test_pairwise_row_reads_back() {
        let dir = tempfile::tempdir().unwrap();
        let sink = CsvSink::<PairwiseTestRow>::new(dir.path().join("pairwise.csv"));
        let hommel = EvaluationResult::new("hommel+native", Metric::Map50To95)
            .with_hommel([0.2, 0.3, 0.4]);
        sink.append(&[PairwiseTestRow::from(&result()), PairwiseTestRow::from(&hommel)])
            .unwrap();

        let rows: Vec<EvaluationResult> = sink
            .read_all()
            .unwrap()
            .into_iter()
            .map(PairwiseTestRow::into_result)
            .collect();
        assert_eq!(rows, vec![result(), hommel]);
    }

    #[test]
    fn test_legacy_negative_marker_reads_as_absent() {
        let row = PairwiseTestRow {
            implementation: "r".to_string(),
            measured_metric: Metric::Precision,
            friedman_p: Some(0.01),
            wilcoxon_p_1v2: Some(0.1),
            wilcoxon_p_2v3: Some(0.2),
            wilcoxon_p_1v3: Some(0.3),
            hommel_p_1v2: Some(-1.0),
            hommel_p_2v3: Some(-1.0),
            hommel_p_1v3: Some(-1.0),
        };
        let result = row.into_result();
        assert_eq!(result.wilcoxon_ps, Some([0.1, 0.2, 0.3]));
        assert!(result.hommel_ps.is_none());
    }

    // ==========================================================================
    // Append contract
    // ==========================================================================

    #[test]
    fn test_header_written_once() {
        let dir = tempfile::tempdir().unwrap();
        let sink = CsvSink::<EffectSizeRow>::new(dir.path().join("effect_sizes.csv"));
        for i in 0..3 {
            sink.append(&[EffectSizeRow {
                measured_metric: Metric::Precision,
                effect_size: f64::from(i) / 10.0,
            }])
            .unwrap();
        }
        let content = std::fs::read_to_string(sink.path()).unwrap();
        assert_eq!(content.matches("measured_metric,effect_size").count(), 1);
        assert_eq!(content.lines().count(), 4);
    }

    #[test]
    fn test_empty_file_gets_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metric_summary.csv");
        std::fs::write(&path, "").unwrap();
        let sink = CsvSink::<MetricSummaryRow>::new(&path);
        sink.append_one(&MetricSummaryRow {
            experiment: "VZ".to_string(),
            measured_metric: Metric::Map50,
            mean: 0.5,
            std: 0.25,
        })
        .unwrap();
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "experiment,measured_metric,mean,std\nVZ,mAP50,0.5,0.25\n"
        );
    }

    #[test]
    fn test_parent_directories_are_created() {
        let dir = tempfile::tempdir().unwrap();
        let sink = CsvSink::<EffectSizeRow>::new(dir.path().join("nested/results/effect.csv"));
        sink.append_one(&EffectSizeRow {
            measured_metric: Metric::Recall,
            effect_size: 0.0,
        })
        .unwrap();
        assert!(sink.path().exists());
    }

    #[test]
    fn test_header_mismatch_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("effect_sizes.csv");
        std::fs::write(&path, "metric,value\nPRECISION,0.1\n").unwrap();
        let sink = CsvSink::<EffectSizeRow>::new(&path);
        let err = sink
            .append_one(&EffectSizeRow {
                measured_metric: Metric::Recall,
                effect_size: 0.2,
            })
            .unwrap_err();
        assert!(matches!(err, SinkError::HeaderMismatch { .. }));
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "metric,value\nPRECISION,0.1\n"
        );
    }

    #[test]
    fn test_empty_batch_does_not_create_file() {
        let dir = tempfile::tempdir().unwrap();
        let sink = CsvSink::<EffectSizeRow>::new(dir.path().join("effect.csv"));
        assert_eq!(sink.append(&[]).unwrap(), 0);
        assert!(!sink.path().exists());
    }

    #[test]
    fn test_purge() {
        let dir = tempfile::tempdir().unwrap();
        let sinks = ResultSinks::new(
            dir.path().join("p.csv"),
            dir.path().join("e.csv"),
            dir.path().join("s.csv"),
        );
        sinks
            .effect_size
            .append_one(&EffectSizeRow {
                measured_metric: Metric::Recall,
                effect_size: 0.3,
            })
            .unwrap();
        assert!(sinks.effect_size.path().exists());
        sinks.purge_all().unwrap();
        assert!(!sinks.effect_size.path().exists());
        assert!(!sinks.pairwise.purge().unwrap());
        assert!(sinks.summary.read_all().unwrap().is_empty());
    }
}
