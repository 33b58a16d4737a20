//! Repeated-measures eta-squared.
//!
//! With `rank_transform` the three cohort values of every repetition are
//! replaced by their within-repetition average ranks before the sums of
//! squares are taken, which makes the statistic a non-parametric effect size
//! for paired cohorts.

use crate::model::{EffectSizeResult, MeasurementDataBlock};
use crate::stats::{average_ranks, mean};

/// Proportion of total variance explained by cohort membership.
///
/// Returns exactly `0.0` when there is no variance at all, including empty
/// input. Cohorts are expected to have equal length; extra trailing values in
/// a longer cohort are ignored.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn effect_size(cohort_a: &[f64], cohort_b: &[f64], cohort_c: &[f64], rank_transform: bool) -> f64 {
    let n = cohort_a.len().min(cohort_b.len()).min(cohort_c.len());
    if n == 0 {
        return 0.0;
    }

    let rows: Vec<[f64; 3]> = (0..n)
        .map(|i| {
            let row = [cohort_a[i], cohort_b[i], cohort_c[i]];
            if rank_transform {
                let ranks = average_ranks(&row);
                [ranks[0], ranks[1], ranks[2]]
            } else {
                row
            }
        })
        .collect();

    // centred on the first cell so identical values give exact zeros
    let origin = rows[0][0];
    let rows: Vec<[f64; 3]> = rows.iter().map(|row| row.map(|x| x - origin)).collect();
    let cells: Vec<f64> = rows.iter().flatten().copied().collect();
    if cells.iter().all(|x| *x == 0.0) {
        return 0.0;
    }
    let grand = mean(&cells);

    let ss_effect = n as f64
        * (0..3)
            .map(|j| {
                let column: Vec<f64> = rows.iter().map(|row| row[j]).collect();
                (mean(&column) - grand).powi(2)
            })
            .sum::<f64>();
    let ss_total: f64 = cells.iter().map(|x| (x - grand).powi(2)).sum();

    if ss_total <= f64::EPSILON * f64::EPSILON * cells.len() as f64 {
        return 0.0;
    }
    (ss_effect / ss_total).clamp(0.0, 1.0)
}

/// Rank-transformed effect size of a block
#[must_use]
pub fn block_effect_size(block: &MeasurementDataBlock) -> EffectSizeResult {
    EffectSizeResult {
        metric: block.metric(),
        effect_size: effect_size(block.cohort_a(), block.cohort_b(), block.cohort_c(), true),
    }
}

#[cfg(test)]
#[allow(clippy::float_cmp, clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::model::Metric;
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn test_identical_values_give_exact_zero() {
        let a = [0.7, 0.7, 0.7];
        assert_eq!(effect_size(&a, &a, &a, true), 0.0);
        assert_eq!(effect_size(&a, &a, &a, false), 0.0);
    }

    #[test]
    fn test_identical_raw_values_at_any_length_give_exact_zero() {
        // averaging these leaves rounding noise in the means
        for (value, n) in [(0.7, 3), (0.7, 7), (0.3, 25), (0.9123, 25), (0.1, 10)] {
            let cohort = vec![value; n];
            assert_eq!(
                effect_size(&cohort, &cohort, &cohort, false),
                0.0,
                "value {value}, n {n}"
            );
            assert_eq!(effect_size(&cohort, &cohort, &cohort, true), 0.0);
        }
    }

    #[test]
    fn test_raw_effect_size_stays_in_unit_interval() {
        let mut rng = ChaCha8Rng::seed_from_u64(11);
        for _ in 0..200 {
            let n = rng.gen_range(1..30);
            let mut draw = || -> Vec<f64> { (0..n).map(|_| 0.7 + rng.gen::<f64>() * 1e-9).collect() };
            let (a, b, c) = (draw(), draw(), draw());
            let value = effect_size(&a, &b, &c, false);
            assert!((0.0..=1.0).contains(&value), "{value}");
        }
    }

    #[test]
    fn test_empty_is_zero() {
        assert_eq!(effect_size(&[], &[], &[], true), 0.0);
    }

    #[test]
    fn test_consistent_ordering_gives_full_rank_effect() {
        // ranks 1, 2, 3 in every repetition: all rank variance is between cohorts
        let a = [0.1, 0.2, 0.3];
        let b = [0.4, 0.5, 0.6];
        let c = [0.7, 0.8, 0.9];
        assert!((effect_size(&a, &b, &c, true) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_cancelling_ranks_give_zero() {
        let a = [1.0, 2.0, 3.0];
        let b = [2.0, 3.0, 1.0];
        let c = [3.0, 1.0, 2.0];
        assert!(effect_size(&a, &b, &c, true).abs() < 1e-12);
    }

    #[test]
    fn test_invariant_under_constant_shift() {
        let a = [0.61, 0.72, 0.55, 0.80];
        let b = [0.65, 0.70, 0.58, 0.79];
        let c = [0.60, 0.75, 0.57, 0.83];
        let shift = |v: &[f64]| v.iter().map(|x| x + 12.5).collect::<Vec<_>>();
        let base = effect_size(&a, &b, &c, true);
        let shifted = effect_size(&shift(&a), &shift(&b), &shift(&c), true);
        assert!((base - shifted).abs() < 1e-12);
        assert!((0.0..=1.0).contains(&base));
    }

    #[test]
    fn test_raw_values_without_rank_transform() {
        // no within-cohort variance: everything is explained by the cohort
        let a = [1.0, 1.0];
        let b = [2.0, 2.0];
        let c = [3.0, 3.0];
        assert!((effect_size(&a, &b, &c, false) - 1.0).abs() < 1e-12);

        let a = [0.0, 2.0];
        let b = [2.0, 2.0];
        let c = [2.0, 4.0];
        // grand 2; column means 1, 2, 3 -> SS_effect = 2 * 2 = 4
        // SS_total = 4 + 0 + 0 + 0 + 0 + 4 = 8
        assert!((effect_size(&a, &b, &c, false) - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_block_effect_size() {
        let block = MeasurementDataBlock::unlabeled(
            Metric::Recall,
            vec![0.9, 0.91, 0.92],
            vec![0.8, 0.81, 0.82],
            vec![0.85, 0.86, 0.87],
        )
        .unwrap();
        let result = block_effect_size(&block);
        assert_eq!(result.metric, Metric::Recall);
        assert!((result.effect_size - 1.0).abs() < 1e-12);
    }
}
