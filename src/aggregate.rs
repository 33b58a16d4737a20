//! Fold aggregation: raw per-fold rows to paired per-metric blocks.
//!
//! The upstream runner writes one CSV row per fold-run, iterating cohorts in
//! the outer loop and repetitions in the inner loop. Every `fold_size`
//! consecutive rows form one repetition; the averaged repetitions are split
//! into three contiguous thirds (cohorts A, B, C).

use crate::model::{default_labels, MeasurementDataBlock, Metric, ModelError};
use crate::stats::mean;
use std::io::Read;
use std::path::Path;
use thiserror::Error;

/// Default number of folds per repetition
pub const DEFAULT_FOLD_SIZE: usize = 5;

/// Errors that can occur while aggregating raw metrics
#[derive(Error, Debug)]
pub enum AggregateError {
    #[error("Failed to read metrics file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse metrics CSV: {0}")]
    CsvError(#[from] csv::Error),

    #[error("Failed to build block: {0}")]
    Block(#[from] ModelError),

    #[error("Line {line}: missing column {column}")]
    MissingColumn { line: u64, column: usize },

    #[error("Line {line}: column {column} is not a number: {value:?}")]
    InvalidValue {
        line: u64,
        column: usize,
        value: String,
    },

    #[error("Fold size must be positive")]
    ZeroFoldSize,

    #[error("No complete repetition in {rows} rows with fold size {fold_size}")]
    Empty { rows: usize, fold_size: usize },

    #[error("{repetitions} repetitions cannot be split into three equal cohorts")]
    UnevenCohorts { repetitions: usize },
}

/// One fold-run from the raw metrics file
#[derive(Debug, Clone, PartialEq)]
pub struct RawRow {
    /// Experiment identifier (e.g. `vz-3754523883`)
    pub experiment: String,
    /// Metric values in [`Metric::ALL`] order
    pub values: [f64; 4],
}

/// Fold-averaged repetition
#[derive(Debug, Clone, PartialEq)]
pub struct Repetition {
    /// Identifier of the first fold-run of the group
    pub experiment: String,
    /// Mean metric values in [`Metric::ALL`] order
    pub values: [f64; 4],
}

/// Read raw rows from CSV with a header row.
///
/// Column 0 is the experiment identifier, columns 1-4 hold precision, recall,
/// mAP50 and mAP50-95. Further columns are ignored.
///
/// # Errors
///
/// Returns an error on malformed CSV, missing columns or non-numeric values.
pub fn read_raw_rows<R: Read>(reader: R) -> Result<Vec<RawRow>, AggregateError> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let mut rows = Vec::new();
    for record in csv_reader.records() {
        let record = record?;
        let line = record.position().map_or(0, csv::Position::line);
        if record.iter().all(str::is_empty) {
            continue;
        }

        let experiment = record
            .get(0)
            .ok_or(AggregateError::MissingColumn { line, column: 0 })?
            .to_string();

        let mut values = [0.0; 4];
        for (offset, value) in values.iter_mut().enumerate() {
            let column = offset + 1;
            let cell = record
                .get(column)
                .ok_or(AggregateError::MissingColumn { line, column })?;
            *value = cell.parse().map_err(|_| AggregateError::InvalidValue {
                line,
                column,
                value: cell.to_string(),
            })?;
        }

        rows.push(RawRow { experiment, values });
    }
    Ok(rows)
}

/// Read raw rows from a CSV file
///
/// # Errors
///
/// Returns an error if the file cannot be opened or parsed.
pub fn load_raw_rows<P: AsRef<Path>>(path: P) -> Result<Vec<RawRow>, AggregateError> {
    let file = std::fs::File::open(path)?;
    read_raw_rows(std::io::BufReader::new(file))
}

/// Cohort label from an experiment identifier: text before the first `-`,
/// upper-cased
#[must_use]
pub fn cohort_label(experiment: &str) -> String {
    experiment
        .split('-')
        .next()
        .unwrap_or(experiment)
        .trim()
        .to_uppercase()
}

/// Groups fold-runs into repetitions and repetitions into cohorts
#[derive(Debug, Clone)]
pub struct FoldAggregator {
    fold_size: usize,
    labels: Option<[String; 3]>,
}

impl FoldAggregator {
    /// Create an aggregator averaging every `fold_size` rows
    #[must_use]
    pub const fn new(fold_size: usize) -> Self {
        Self {
            fold_size,
            labels: None,
        }
    }

    /// Use fixed cohort labels instead of deriving them from the raw rows
    #[must_use]
    pub fn with_labels(mut self, labels: [String; 3]) -> Self {
        self.labels = Some(labels);
        self
    }

    #[must_use]
    pub const fn fold_size(&self) -> usize {
        self.fold_size
    }

    /// Average consecutive groups of `fold_size` rows.
    ///
    /// A trailing partial group is an incomplete repetition: it is dropped
    /// with a warning.
    ///
    /// # Errors
    ///
    /// Returns an error for a zero fold size.
    pub fn average_folds(&self, rows: &[RawRow]) -> Result<Vec<Repetition>, AggregateError> {
        if self.fold_size == 0 {
            return Err(AggregateError::ZeroFoldSize);
        }

        let remainder = rows.len() % self.fold_size;
        if remainder != 0 {
            tracing::warn!(
                rows = rows.len(),
                fold_size = self.fold_size,
                dropped = remainder,
                "Metrics file does not contain all fold results; dropping incomplete repetition"
            );
        }

        Ok(rows
            .chunks_exact(self.fold_size)
            .map(|group| {
                let mut values = [0.0; 4];
                for (column, value) in values.iter_mut().enumerate() {
                    let column_values: Vec<f64> = group.iter().map(|r| r.values[column]).collect();
                    *value = mean(&column_values);
                }
                Repetition {
                    experiment: group[0].experiment.clone(),
                    values,
                }
            })
            .collect())
    }

    /// Aggregate raw rows into a stream of one block per metric.
    ///
    /// # Errors
    ///
    /// Returns an error when no complete repetition exists or when the
    /// repetitions cannot be split into three equal cohorts.
    pub fn aggregate(&self, rows: &[RawRow]) -> Result<BlockStream, AggregateError> {
        let repetitions = self.average_folds(rows)?;
        if repetitions.is_empty() {
            return Err(AggregateError::Empty {
                rows: rows.len(),
                fold_size: self.fold_size,
            });
        }
        if repetitions.len() % 3 != 0 {
            return Err(AggregateError::UnevenCohorts {
                repetitions: repetitions.len(),
            });
        }

        let per_cohort = repetitions.len() / 3;
        let mut thirds = repetitions.chunks_exact(per_cohort).map(<[Repetition]>::to_vec);
        let cohorts = [
            thirds.next().unwrap_or_default(),
            thirds.next().unwrap_or_default(),
            thirds.next().unwrap_or_default(),
        ];

        let labels = match &self.labels {
            Some(labels) => labels.clone(),
            None => derive_labels(&cohorts),
        };

        tracing::debug!(
            repetitions = per_cohort,
            labels = ?labels,
            "Aggregated fold results into paired cohorts"
        );

        Ok(BlockStream {
            repetitions: per_cohort,
            labels: labels.clone(),
            blocks: build_blocks(&labels, &cohorts)?.into_iter(),
        })
    }

    /// Load a raw metrics file and aggregate it
    ///
    /// # Errors
    ///
    /// Returns an error if loading or aggregation fails.
    pub fn aggregate_file<P: AsRef<Path>>(&self, path: P) -> Result<BlockStream, AggregateError> {
        let rows = load_raw_rows(path)?;
        self.aggregate(&rows)
    }
}

impl Default for FoldAggregator {
    fn default() -> Self {
        Self::new(DEFAULT_FOLD_SIZE)
    }
}

/// Derive labels from the first repetition of each cohort, warning when the
/// contiguous-thirds assumption looks violated
fn derive_labels(cohorts: &[Vec<Repetition>; 3]) -> [String; 3] {
    let fallback = default_labels();
    let labels: Vec<String> = cohorts
        .iter()
        .zip(fallback)
        .map(|(cohort, fallback)| {
            let label = cohort
                .first()
                .map(|r| cohort_label(&r.experiment))
                .filter(|l| !l.is_empty())
                .unwrap_or(fallback);
            if let Some(stray) = cohort
                .iter()
                .find(|r| cohort_label(&r.experiment) != label)
            {
                tracing::warn!(
                    cohort = %label,
                    experiment = %stray.experiment,
                    "Repetition label differs from its cohort; raw rows may not be ordered cohort by cohort"
                );
            }
            label
        })
        .collect();

    if labels[0] == labels[1] || labels[1] == labels[2] || labels[0] == labels[2] {
        tracing::warn!(labels = ?labels, "Cohort labels are not distinct");
    }

    [labels[0].clone(), labels[1].clone(), labels[2].clone()]
}

/// One block per metric in [`Metric::ALL`] order
fn build_blocks(
    labels: &[String; 3],
    cohorts: &[Vec<Repetition>; 3],
) -> Result<Vec<MeasurementDataBlock>, AggregateError> {
    let column = |cohort: &[Repetition], metric: Metric| -> Vec<f64> {
        cohort.iter().map(|r| r.values[metric.column()]).collect()
    };
    Metric::ALL
        .iter()
        .map(|&metric| {
            MeasurementDataBlock::new(
                metric,
                labels.clone(),
                column(&cohorts[0], metric),
                column(&cohorts[1], metric),
                column(&cohorts[2], metric),
            )
            .map_err(AggregateError::from)
        })
        .collect()
}

/// Yields one block per metric in [`Metric::ALL`] order
#[derive(Debug, Clone)]
pub struct BlockStream {
    repetitions: usize,
    labels: [String; 3],
    blocks: std::vec::IntoIter<MeasurementDataBlock>,
}

impl BlockStream {
    /// Cohort labels in A, B, C order
    #[must_use]
    pub const fn labels(&self) -> &[String; 3] {
        &self.labels
    }

    /// Paired repetitions per cohort
    #[must_use]
    pub const fn repetitions(&self) -> usize {
        self.repetitions
    }
}

impl Iterator for BlockStream {
    type Item = MeasurementDataBlock;

    fn next(&mut self) -> Option<Self::Item> {
        self.blocks.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.blocks.size_hint()
    }
}

impl ExactSizeIterator for BlockStream {}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::float_cmp, clippy::cast_precision_loss)]
mod tests {
    use super::*;

    fn rows(prefix: &str, count: usize, value: f64) -> Vec<RawRow> {
        (0..count)
            .map(|i| RawRow {
                experiment: format!("{prefix}-{i}"),
                values: [value, value - 0.1, value - 0.2, value - 0.3],
            })
            .collect()
    }

    fn cohort_rows(per_cohort: usize, fold_size: usize) -> Vec<RawRow> {
        let mut all = rows("vz", per_cohort * fold_size, 0.9);
        all.extend(rows("ir", per_cohort * fold_size, 0.8));
        all.extend(rows("hy", per_cohort * fold_size, 0.85));
        all
    }

    #[test]
    fn test_read_raw_rows_ignores_extra_columns() {
        let csv = "experiment_name,precision,recall,mAP50,mAP50-95,train_time\n\
                   vz-1,0.9,0.8,0.7,0.5,120.5\n\
                   vz-1, 0.91 ,0.81,0.71,0.51,118.0\n";
        let parsed = read_raw_rows(csv.as_bytes()).unwrap();
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0].experiment, "vz-1");
        assert_eq!(parsed[1].values, [0.91, 0.81, 0.71, 0.51]);
    }

    #[test]
    fn test_read_raw_rows_reports_bad_value() {
        let csv = "experiment_name,precision,recall,mAP50,mAP50-95\nvz-1,0.9,abc,0.7,0.5\n";
        let err = read_raw_rows(csv.as_bytes()).unwrap_err();
        assert!(matches!(
            err,
            AggregateError::InvalidValue { line: 2, column: 2, .. }
        ));
    }

    #[test]
    fn test_read_raw_rows_reports_missing_column() {
        let csv = "experiment_name,precision,recall,mAP50,mAP50-95\nvz-1,0.9,0.8\n";
        let err = read_raw_rows(csv.as_bytes()).unwrap_err();
        assert!(matches!(err, AggregateError::MissingColumn { column: 3, .. }));
    }

    #[test]
    fn test_average_folds() {
        let input = vec![
            RawRow {
                experiment: "vz-1".to_string(),
                values: [1.0, 2.0, 3.0, 4.0],
            },
            RawRow {
                experiment: "vz-1".to_string(),
                values: [3.0, 4.0, 5.0, 6.0],
            },
        ];
        let averaged = FoldAggregator::new(2).average_folds(&input).unwrap();
        assert_eq!(averaged.len(), 1);
        assert_eq!(averaged[0].values, [2.0, 3.0, 4.0, 5.0]);
    }

    #[test]
    fn test_partial_group_is_dropped() {
        let mut input = cohort_rows(1, 5);
        input.extend(rows("hy", 3, 0.1));
        let averaged = FoldAggregator::new(5).average_folds(&input).unwrap();
        assert_eq!(averaged.len(), 3);
    }

    #[test]
    fn test_zero_fold_size() {
        assert!(matches!(
            FoldAggregator::new(0).average_folds(&[]),
            Err(AggregateError::ZeroFoldSize)
        ));
    }

    #[test]
    fn test_one_block_per_metric_with_equal_cohorts() {
        for per_cohort in 1..=4 {
            let input = cohort_rows(per_cohort, 5);
            let blocks: Vec<_> = FoldAggregator::new(5).aggregate(&input).unwrap().collect();
            assert_eq!(blocks.len(), 4);
            for (block, metric) in blocks.iter().zip(Metric::ALL) {
                assert_eq!(block.metric(), metric);
                let expected = input.len() / 15;
                assert_eq!(block.cohort_a().len(), expected);
                assert_eq!(block.cohort_b().len(), expected);
                assert_eq!(block.cohort_c().len(), expected);
            }
        }
    }

    #[test]
    fn test_cohorts_are_contiguous_thirds() {
        let input = cohort_rows(2, 5);
        let mut stream = FoldAggregator::new(5).aggregate(&input).unwrap();
        assert_eq!(stream.repetitions(), 2);
        assert_eq!(stream.labels(), &["VZ".to_string(), "IR".to_string(), "HY".to_string()]);

        let precision = stream.next().unwrap();
        for (cohort, expected) in precision.cohorts().iter().zip([0.9, 0.8, 0.85]) {
            assert_eq!(cohort.len(), 2);
            assert!(cohort.iter().all(|v| (v - expected).abs() < 1e-12));
        }

        let recall = stream.next().unwrap();
        assert!((recall.cohort_a()[0] - 0.8).abs() < 1e-12);
    }

    #[test]
    fn test_blocks_are_built_before_iteration() {
        let stream = FoldAggregator::new(1).aggregate(&cohort_rows(3, 1)).unwrap();
        assert_eq!(stream.len(), 4);
        assert_eq!(stream.repetitions(), 3);
    }

    #[test]
    fn test_ragged_cohorts_surface_as_error() {
        let repetition = Repetition {
            experiment: "vz-0".to_string(),
            values: [0.9, 0.8, 0.7, 0.6],
        };
        let cohorts = [
            vec![repetition.clone(), repetition.clone()],
            vec![repetition.clone()],
            vec![repetition],
        ];
        assert!(matches!(
            build_blocks(&default_labels(), &cohorts),
            Err(AggregateError::Block(ModelError::UnequalCohorts { a: 2, b: 1, c: 1, .. }))
        ));
    }

    #[test]
    fn test_uneven_cohorts_are_rejected() {
        let input = rows("vz", 20, 0.5);
        let err = FoldAggregator::new(5).aggregate(&input).unwrap_err();
        assert!(matches!(err, AggregateError::UnevenCohorts { repetitions: 4 }));
    }

    #[test]
    fn test_empty_input_is_rejected() {
        let err = FoldAggregator::new(5).aggregate(&rows("vz", 4, 0.5)).unwrap_err();
        assert!(matches!(err, AggregateError::Empty { rows: 4, fold_size: 5 }));
    }

    #[test]
    fn test_configured_labels_win() {
        let input = cohort_rows(1, 5);
        let labels = ["visible".to_string(), "infrared".to_string(), "hybrid".to_string()];
        let stream = FoldAggregator::new(5)
            .with_labels(labels.clone())
            .aggregate(&input)
            .unwrap();
        assert_eq!(stream.labels(), &labels);
    }

    #[test]
    fn test_cohort_label() {
        assert_eq!(cohort_label("vz-3754523883"), "VZ");
        assert_eq!(cohort_label("hybrid"), "HYBRID");
        assert_eq!(cohort_label(""), "");
    }

    #[test]
    fn test_repetitions_stay_aligned() {
        // cohort values encode the repetition index
        let mut input = Vec::new();
        for (prefix, base) in [("a", 0.0), ("b", 10.0), ("c", 20.0)] {
            for rep in 0..3 {
                for _ in 0..2 {
                    input.push(RawRow {
                        experiment: format!("{prefix}-{rep}"),
                        values: [base + rep as f64; 4],
                    });
                }
            }
        }
        let block = FoldAggregator::new(2).aggregate(&input).unwrap().next().unwrap();
        assert_eq!(block.cohort_a(), &[0.0, 1.0, 2.0]);
        assert_eq!(block.cohort_b(), &[10.0, 11.0, 12.0]);
        assert_eq!(block.cohort_c(), &[20.0, 21.0, 22.0]);
    }
}
