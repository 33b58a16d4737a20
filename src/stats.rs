//! Rank statistics shared by the evaluators.
//!
//! Friedman and Wilcoxon each come in independent formulations so that the
//! evaluator variants can cross-check one another:
//! - Friedman: rank-sum formula, Kendall's W, mean-rank deviation
//! - Wilcoxon (exact): iterative probability table, recursive count
//! - Hommel: closed step-up adjustment
//!
//! The Kendall's W and recursive Wilcoxon paths rank by pairwise comparison
//! counts and derive their tie terms from those ranks, sharing no ranking
//! code with the other formulations.

use statrs::distribution::{ChiSquared, ContinuousCDF, Gamma};
use statrs::function::gamma::checked_gamma_ur;
use std::collections::HashMap;
use thiserror::Error;

/// Minimum repetitions for the Friedman test
pub const MIN_FRIEDMAN_REPETITIONS: usize = 3;

/// Errors from the statistical kernels
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StatsError {
    #[error("Need at least {required} repetitions, got {found}")]
    TooFewRepetitions { required: usize, found: usize },

    #[error("Need at least {required} cohorts, got {found}")]
    TooFewCohorts { required: usize, found: usize },

    #[error("Samples have different lengths: {0} vs {1}")]
    LengthMismatch(usize, usize),

    #[error("Degenerate input: {0}")]
    Degenerate(String),

    #[error("Zero difference at repetition {0}; the exact Wilcoxon distribution is undefined")]
    ZeroDifference(usize),

    #[error("Tied absolute differences; the exact Wilcoxon distribution is undefined")]
    TiedDifferences,

    #[error("Invalid p-value: {0}")]
    InvalidPValue(f64),

    #[error("Distribution error: {0}")]
    Distribution(String),
}

/// Result of a Friedman test
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FriedmanOutcome {
    /// Chi-square statistic (tie corrected)
    pub statistic: f64,
    /// Upper-tail p-value with `k - 1` degrees of freedom
    pub p_value: f64,
}

/// Result of an exact Wilcoxon signed-rank test
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WilcoxonOutcome {
    /// Sum of ranks of positive differences
    pub statistic: f64,
    /// Two-sided exact p-value
    pub p_value: f64,
}

/// Average (mid) ranks, 1-based
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn average_ranks(values: &[f64]) -> Vec<f64> {
    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_by(|&a, &b| values[a].total_cmp(&values[b]));

    let mut ranks = vec![0.0; values.len()];
    let mut start = 0;
    while start < order.len() {
        let mut end = start + 1;
        while end < order.len() && values[order[end]] == values[order[start]] {
            end += 1;
        }
        // positions start..end share the mean of ranks start+1..=end
        let rank = (start + end + 1) as f64 / 2.0;
        for &idx in &order[start..end] {
            ranks[idx] = rank;
        }
        start = end;
    }
    ranks
}

/// Sizes of the groups of equal values
fn tie_group_sizes(values: &[f64]) -> Vec<usize> {
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mut sizes = Vec::new();
    let mut start = 0;
    while start < sorted.len() {
        let mut end = start + 1;
        while end < sorted.len() && sorted[end] == sorted[start] {
            end += 1;
        }
        sizes.push(end - start);
        start = end;
    }
    sizes
}

/// Within-repetition ranks, summary of ties and rank sums per cohort
struct RankTable {
    n: usize,
    k: usize,
    rank_sums: Vec<f64>,
    /// Sum over repetitions and tie groups of `t^3 - t`
    ties: f64,
}

/// Repetitions and cohorts of a well-formed Friedman input
fn friedman_shape(cohorts: &[&[f64]]) -> Result<(usize, usize), StatsError> {
    let k = cohorts.len();
    if k < 3 {
        return Err(StatsError::TooFewCohorts { required: 3, found: k });
    }
    let n = cohorts[0].len();
    if let Some(other) = cohorts.iter().find(|c| c.len() != n) {
        return Err(StatsError::LengthMismatch(n, other.len()));
    }
    if n < MIN_FRIEDMAN_REPETITIONS {
        return Err(StatsError::TooFewRepetitions {
            required: MIN_FRIEDMAN_REPETITIONS,
            found: n,
        });
    }
    Ok((n, k))
}

#[allow(clippy::cast_precision_loss)]
fn rank_table(cohorts: &[&[f64]]) -> Result<RankTable, StatsError> {
    let (n, k) = friedman_shape(cohorts)?;

    let mut rank_sums = vec![0.0; k];
    let mut ties = 0.0;
    for i in 0..n {
        let row: Vec<f64> = cohorts.iter().map(|c| c[i]).collect();
        for (sum, rank) in rank_sums.iter_mut().zip(average_ranks(&row)) {
            *sum += rank;
        }
        ties += tie_group_sizes(&row)
            .into_iter()
            .map(|t| {
                let t = t as f64;
                t.powi(3) - t
            })
            .sum::<f64>();
    }

    Ok(RankTable {
        n,
        k,
        rank_sums,
        ties,
    })
}

fn degenerate_friedman() -> StatsError {
    StatsError::Degenerate("every repetition is tied across all cohorts".to_string())
}

/// Friedman test via the classic rank-sum formula; p from `ChiSquared`.
///
/// # Errors
///
/// Fails on fewer than three cohorts or repetitions, ragged input, or when
/// every repetition is fully tied.
#[allow(clippy::cast_precision_loss)]
pub fn friedman_rank_sum(cohorts: &[&[f64]]) -> Result<FriedmanOutcome, StatsError> {
    let table = rank_table(cohorts)?;
    let n = table.n as f64;
    let k = table.k as f64;

    let correction = 1.0 - table.ties / (n * k * (k * k - 1.0));
    if correction <= f64::EPSILON {
        return Err(degenerate_friedman());
    }

    let ssbn: f64 = table.rank_sums.iter().map(|r| r * r).sum();
    let statistic =
        ((12.0 / (n * k * (k + 1.0))).mul_add(ssbn, -3.0 * n * (k + 1.0)) / correction).max(0.0);

    let dist =
        ChiSquared::new(k - 1.0).map_err(|e| StatsError::Distribution(e.to_string()))?;
    Ok(FriedmanOutcome {
        statistic,
        p_value: dist.sf(statistic),
    })
}

/// Rank of every value as `1 + #smaller + #equal / 2` over the other values
#[allow(clippy::cast_precision_loss)]
fn comparison_ranks(row: &[f64]) -> Vec<f64> {
    row.iter()
        .enumerate()
        .map(|(j, x)| {
            let (smaller, equal) = row
                .iter()
                .enumerate()
                .filter(|(l, _)| *l != j)
                .fold((0usize, 0usize), |(smaller, equal), (_, y)| {
                    if y < x {
                        (smaller + 1, equal)
                    } else if y == x {
                        (smaller, equal + 1)
                    } else {
                        (smaller, equal)
                    }
                });
            1.0 + smaller as f64 + equal as f64 / 2.0
        })
        .collect()
}

/// Friedman test via Kendall's coefficient of concordance, `Q = n (k - 1) W`;
/// p from the equivalent `Gamma(df / 2, 1 / 2)` distribution.
///
/// # Errors
///
/// Same conditions as [`friedman_rank_sum`].
#[allow(clippy::cast_precision_loss)]
pub fn friedman_kendall_w(cohorts: &[&[f64]]) -> Result<FriedmanOutcome, StatsError> {
    let (rows, columns) = friedman_shape(cohorts)?;
    let n = rows as f64;
    let k = columns as f64;

    let mut rank_sums = vec![0.0; columns];
    let mut squared_ranks = 0.0;
    for i in 0..rows {
        let row: Vec<f64> = cohorts.iter().map(|c| c[i]).collect();
        for (sum, rank) in rank_sums.iter_mut().zip(comparison_ranks(&row)) {
            *sum += rank;
            squared_ranks += rank * rank;
        }
    }

    // a tie group of size t lowers the sum of squared ranks by (t^3 - t) / 12
    let untied = n * k * (k + 1.0) * (2.0 * k + 1.0) / 6.0;
    let ties = 12.0 * (untied - squared_ranks);

    let scale = n * n * k * (k * k - 1.0);
    let denominator = scale - n * ties;
    if denominator <= f64::EPSILON * scale {
        return Err(degenerate_friedman());
    }

    let expected = n * (k + 1.0) / 2.0;
    let deviation: f64 = rank_sums.iter().map(|r| (r - expected).powi(2)).sum();
    let w = 12.0 * deviation / denominator;
    let statistic = (n * (k - 1.0) * w).max(0.0);

    let dist = Gamma::new((k - 1.0) / 2.0, 0.5)
        .map_err(|e| StatsError::Distribution(e.to_string()))?;
    Ok(FriedmanOutcome {
        statistic,
        p_value: dist.sf(statistic),
    })
}

/// Friedman test via squared deviations of mean ranks from `(k + 1) / 2`;
/// p from the regularized upper incomplete gamma function.
///
/// # Errors
///
/// Same conditions as [`friedman_rank_sum`].
#[allow(clippy::cast_precision_loss)]
pub fn friedman_mean_rank(cohorts: &[&[f64]]) -> Result<FriedmanOutcome, StatsError> {
    let table = rank_table(cohorts)?;
    let n = table.n as f64;
    let k = table.k as f64;

    let correction = 1.0 - table.ties / (n * k * (k * k - 1.0));
    if correction <= f64::EPSILON {
        return Err(degenerate_friedman());
    }

    let centre = (k + 1.0) / 2.0;
    let spread: f64 = table
        .rank_sums
        .iter()
        .map(|r| (r / n - centre).powi(2))
        .sum();
    let statistic = (12.0 * n / (k * (k + 1.0)) * spread / correction).max(0.0);

    let p_value = if statistic > 0.0 {
        checked_gamma_ur((k - 1.0) / 2.0, statistic / 2.0)
            .map_err(|e| StatsError::Distribution(e.to_string()))?
    } else {
        1.0
    };
    Ok(FriedmanOutcome { statistic, p_value })
}

/// Signed ranks of paired differences, rejecting inputs the exact
/// distribution cannot handle
fn signed_ranks(x: &[f64], y: &[f64]) -> Result<(Vec<f64>, Vec<bool>), StatsError> {
    if x.len() != y.len() {
        return Err(StatsError::LengthMismatch(x.len(), y.len()));
    }
    if x.is_empty() {
        return Err(StatsError::TooFewRepetitions {
            required: 1,
            found: 0,
        });
    }

    let diffs: Vec<f64> = x.iter().zip(y).map(|(a, b)| a - b).collect();
    if let Some(idx) = diffs.iter().position(|d| *d == 0.0) {
        return Err(StatsError::ZeroDifference(idx));
    }

    let magnitudes: Vec<f64> = diffs.iter().map(|d| d.abs()).collect();
    if tie_group_sizes(&magnitudes).iter().any(|&t| t > 1) {
        return Err(StatsError::TiedDifferences);
    }

    let positive = diffs.iter().map(|d| *d > 0.0).collect();
    Ok((average_ranks(&magnitudes), positive))
}

/// Exact two-sided Wilcoxon signed-rank test built from an iterative
/// probability table of the positive-rank sum.
///
/// # Errors
///
/// Fails on unequal or empty samples, zero differences and tied magnitudes.
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
pub fn wilcoxon_exact(x: &[f64], y: &[f64]) -> Result<WilcoxonOutcome, StatsError> {
    let (ranks, positive) = signed_ranks(x, y)?;
    let n = ranks.len();
    let t_plus: f64 = ranks
        .iter()
        .zip(&positive)
        .filter_map(|(r, &pos)| pos.then_some(*r))
        .sum();

    // P(T = t) after adding ranks 1..=i
    let max_sum = n * (n + 1) / 2;
    let mut pmf = vec![0.0; max_sum + 1];
    pmf[0] = 1.0;
    for i in 1..=n {
        for t in (0..=max_sum).rev() {
            let with = if t >= i { pmf[t - i] } else { 0.0 };
            pmf[t] = 0.5 * (pmf[t] + with);
        }
    }

    // without ties every rank is an integer
    let t = t_plus.round() as usize;
    let lower: f64 = pmf[..=t].iter().sum();
    let upper: f64 = pmf[t..].iter().sum();

    Ok(WilcoxonOutcome {
        statistic: t_plus,
        p_value: (2.0 * lower.min(upper)).min(1.0),
    })
}

/// Exact two-sided Wilcoxon signed-rank test from the smaller rank sum and a
/// recursive count of rank subsets, `c(n, t) = c(n - 1, t) + c(n - 1, t - n)`.
///
/// # Errors
///
/// Same conditions as [`wilcoxon_exact`].
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_possible_wrap
)]
pub fn wilcoxon_exact_recursive(x: &[f64], y: &[f64]) -> Result<WilcoxonOutcome, StatsError> {
    fn count(n: usize, t: usize, memo: &mut HashMap<(usize, usize), f64>) -> f64 {
        let max = n * (n + 1) / 2;
        if t > max {
            return 0.0;
        }
        if n == 0 {
            return 1.0;
        }
        if let Some(&c) = memo.get(&(n, t)) {
            return c;
        }
        let without = count(n - 1, t, memo);
        let with = if t >= n { count(n - 1, t - n, memo) } else { 0.0 };
        memo.insert((n, t), without + with);
        without + with
    }

    let (ranks, positive) = comparison_signed_ranks(x, y)?;
    let n = ranks.len();
    let total = n * (n + 1) / 2;
    let t_plus: usize = ranks
        .iter()
        .zip(&positive)
        .filter_map(|(r, &pos)| pos.then_some(*r))
        .sum();
    let t_min = t_plus.min(total - t_plus);

    let mut memo = HashMap::new();
    let below: f64 = (0..=t_min).map(|t| count(n, t, &mut memo)).sum();
    let p_value = (2.0 * below / 2f64.powi(n as i32)).min(1.0);

    Ok(WilcoxonOutcome {
        statistic: t_plus as f64,
        p_value,
    })
}

/// Integer ranks of `|x - y|` by counting smaller magnitudes, with the sign
/// of each difference
fn comparison_signed_ranks(x: &[f64], y: &[f64]) -> Result<(Vec<usize>, Vec<bool>), StatsError> {
    if x.len() != y.len() {
        return Err(StatsError::LengthMismatch(x.len(), y.len()));
    }
    if x.is_empty() {
        return Err(StatsError::TooFewRepetitions {
            required: 1,
            found: 0,
        });
    }

    let mut magnitudes = Vec::with_capacity(x.len());
    let mut positive = Vec::with_capacity(x.len());
    for (idx, (a, b)) in x.iter().zip(y).enumerate() {
        if a == b {
            return Err(StatsError::ZeroDifference(idx));
        }
        magnitudes.push((a - b).abs());
        positive.push(a > b);
    }

    let mut ranks = Vec::with_capacity(magnitudes.len());
    for (i, m) in magnitudes.iter().enumerate() {
        let mut smaller = 0;
        for (j, other) in magnitudes.iter().enumerate() {
            if j != i && other == m {
                return Err(StatsError::TiedDifferences);
            }
            if other < m {
                smaller += 1;
            }
        }
        ranks.push(smaller + 1);
    }
    Ok((ranks, positive))
}

/// Hommel adjustment of a family of p-values.
///
/// Closed step-up procedure; matches R's `p.adjust(method = "hommel")`.
/// Output order follows input order. Each adjusted value is at least its raw
/// value and at most 1.
///
/// # Errors
///
/// Returns `StatsError::InvalidPValue` for values outside `[0, 1]` or NaN.
#[allow(clippy::cast_precision_loss)]
pub fn hommel_adjust(p_values: &[f64]) -> Result<Vec<f64>, StatsError> {
    if let Some(&bad) = p_values
        .iter()
        .find(|p| p.is_nan() || !(0.0..=1.0).contains(*p))
    {
        return Err(StatsError::InvalidPValue(bad));
    }

    let n = p_values.len();
    if n <= 1 {
        return Ok(p_values.to_vec());
    }

    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| p_values[a].total_cmp(&p_values[b]));
    let sorted: Vec<f64> = order.iter().map(|&i| p_values[i]).collect();

    let n_f = n as f64;
    let start = sorted
        .iter()
        .enumerate()
        .map(|(i, p)| n_f * p / (i + 1) as f64)
        .fold(f64::INFINITY, f64::min);
    let mut q = vec![start; n];
    let mut adjusted = vec![start; n];

    for m in (2..n).rev() {
        let m_f = m as f64;
        // first n - m + 1 sorted values form the lower block
        let split = n - m + 1;
        let q1 = (split..n)
            .map(|j| m_f * sorted[j] / (j - split + 2) as f64)
            .fold(f64::INFINITY, f64::min);
        for j in 0..split {
            q[j] = (m_f * sorted[j]).min(q1);
        }
        let fill = q[split - 1];
        for value in &mut q[split..] {
            *value = fill;
        }
        for (a, v) in adjusted.iter_mut().zip(&q) {
            *a = a.max(*v);
        }
    }

    let mut result = vec![0.0; n];
    for (j, &idx) in order.iter().enumerate() {
        result[idx] = adjusted[j].max(sorted[j]).min(1.0);
    }
    Ok(result)
}

/// Arithmetic mean; `0.0` for an empty slice
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn mean(samples: &[f64]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    samples.iter().sum::<f64>() / samples.len() as f64
}

/// Population standard deviation (divisor `n`); `0.0` for an empty slice
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn population_std(samples: &[f64]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    let mean = mean(samples);
    let variance = samples.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / samples.len() as f64;
    variance.sqrt()
}

#[cfg(test)]
#[allow(
    clippy::float_cmp,
    clippy::unwrap_used,
    clippy::cast_precision_loss,
    clippy::cast_lossless
)]
mod tests {
    use super::*;
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;

    fn random_cohorts(seed: u64, n: usize) -> [Vec<f64>; 3] {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let mut draw = |shift: f64| -> Vec<f64> {
            (0..n).map(|_| shift + rng.gen::<f64>() * 0.1).collect()
        };
        [draw(0.70), draw(0.72), draw(0.75)]
    }

    // =========================================================================
    // Ranking
    // =========================================================================

    #[test]
    fn test_average_ranks_without_ties() {
        assert_eq!(average_ranks(&[0.3, 0.1, 0.2]), vec![3.0, 1.0, 2.0]);
    }

    #[test]
    fn test_average_ranks_with_ties() {
        assert_eq!(average_ranks(&[0.5, 0.5, 0.1]), vec![2.5, 2.5, 1.0]);
        assert_eq!(average_ranks(&[1.0, 1.0, 1.0]), vec![2.0, 2.0, 2.0]);
    }

    #[test]
    fn test_comparison_ranks_match_average_ranks() {
        assert_eq!(comparison_ranks(&[0.5, 0.5, 0.1]), vec![2.5, 2.5, 1.0]);
        assert_eq!(comparison_ranks(&[1.0, 1.0, 1.0]), vec![2.0, 2.0, 2.0]);
        let mut rng = ChaCha8Rng::seed_from_u64(5);
        for _ in 0..200 {
            // coarse values so ties are frequent
            let row: Vec<f64> = (0..4).map(|_| f64::from(rng.gen_range(0..3u8))).collect();
            assert_eq!(comparison_ranks(&row), average_ranks(&row), "{row:?}");
        }
    }

    #[test]
    fn test_comparison_signed_ranks() {
        let (ranks, positive) = comparison_signed_ranks(&[1.0, 0.0, 3.0], &[0.0, 2.0, 0.0]).unwrap();
        assert_eq!(ranks, vec![1, 2, 3]);
        assert_eq!(positive, vec![true, false, true]);
        assert_eq!(
            comparison_signed_ranks(&[0.9, 0.8], &[0.9, 0.7]).unwrap_err(),
            StatsError::ZeroDifference(0)
        );
        assert_eq!(
            comparison_signed_ranks(&[0.9, 0.9], &[0.8, 0.8]).unwrap_err(),
            StatsError::TiedDifferences
        );
    }

    // =========================================================================
    // Friedman
    // =========================================================================

    /// Rounding times, 22 runners x 3 methods, with tied rows; R's
    /// `friedman.test(RoundingTimes)` reports chi-squared = 11.143 (78 / 7),
    /// df = 2, p-value = 0.003805
    const ROUNDING_TIMES: [[f64; 3]; 22] = [
        [5.40, 5.50, 5.55],
        [5.85, 5.70, 5.75],
        [5.20, 5.60, 5.50],
        [5.55, 5.50, 5.40],
        [5.90, 5.85, 5.70],
        [5.45, 5.55, 5.60],
        [5.40, 5.40, 5.35],
        [5.45, 5.50, 5.35],
        [5.25, 5.15, 5.00],
        [5.85, 5.80, 5.70],
        [5.25, 5.20, 5.10],
        [5.65, 5.55, 5.45],
        [5.60, 5.35, 5.45],
        [5.05, 5.00, 4.95],
        [5.50, 5.50, 5.40],
        [5.45, 5.55, 5.50],
        [5.55, 5.55, 5.35],
        [5.45, 5.50, 5.55],
        [5.50, 5.45, 5.25],
        [5.65, 5.60, 5.40],
        [5.70, 5.65, 5.55],
        [6.30, 6.30, 6.25],
    ];

    #[test]
    fn test_friedman_matches_r_reference_with_ties() {
        let columns: Vec<Vec<f64>> = (0..3)
            .map(|j| ROUNDING_TIMES.iter().map(|row| row[j]).collect())
            .collect();
        let cohorts: [&[f64]; 3] = [&columns[0], &columns[1], &columns[2]];
        let statistic: f64 = 78.0 / 7.0;
        // chi-square with 2 df: sf(x) = exp(-x / 2)
        let p_value = (-statistic / 2.0).exp();
        assert!((p_value - 0.003_805).abs() < 5e-7);

        for f in [friedman_rank_sum, friedman_kendall_w, friedman_mean_rank] {
            let outcome = f(&cohorts).unwrap();
            assert!((outcome.statistic - statistic).abs() < 1e-9, "{outcome:?}");
            assert!((outcome.p_value - p_value).abs() < 1e-9, "{outcome:?}");
        }
    }

    #[test]
    fn test_friedman_small_block_with_ties_matches_r_formula() {
        // four of five repetitions contain a tie; R's formula gives 0.5
        let a = [0.5, 0.2, 0.3, 0.9, 0.4];
        let b = [0.5, 0.1, 0.6, 0.8, 0.4];
        let c = [0.7, 0.2, 0.1, 0.9, 0.3];
        for f in [friedman_rank_sum, friedman_kendall_w, friedman_mean_rank] {
            let outcome = f(&[&a, &b, &c]).unwrap();
            assert!((outcome.statistic - 0.5).abs() < 1e-9, "{outcome:?}");
            assert!((outcome.p_value - (-0.25f64).exp()).abs() < 1e-9, "{outcome:?}");
        }
    }

    #[test]
    fn test_friedman_known_value() {
        // every repetition ranks A < B < C: rank sums 4, 8, 12 -> chi2 = 8
        let a = [0.1, 0.2, 0.3, 0.4];
        let b = [0.5, 0.6, 0.7, 0.8];
        let c = [0.9, 1.0, 1.1, 1.2];
        let outcome = friedman_rank_sum(&[&a, &b, &c]).unwrap();
        assert!((outcome.statistic - 8.0).abs() < 1e-12);
        // chi-square with 2 df: sf(x) = exp(-x / 2)
        assert!((outcome.p_value - (-4.0f64).exp()).abs() < 1e-12);
    }

    #[test]
    fn test_friedman_variants_agree_on_random_blocks() {
        for seed in 0..20 {
            let [a, b, c] = random_cohorts(seed, 25);
            let cohorts: [&[f64]; 3] = [&a, &b, &c];
            let sum = friedman_rank_sum(&cohorts).unwrap();
            let kendall = friedman_kendall_w(&cohorts).unwrap();
            let mean_rank = friedman_mean_rank(&cohorts).unwrap();
            assert!((sum.p_value - kendall.p_value).abs() < 1e-6, "seed {seed}");
            assert!((sum.p_value - mean_rank.p_value).abs() < 1e-6, "seed {seed}");
            assert!((sum.statistic - kendall.statistic).abs() < 1e-9);
        }
    }

    #[test]
    fn test_friedman_variants_agree_with_partial_ties() {
        let a = [0.5, 0.2, 0.3, 0.9, 0.4];
        let b = [0.5, 0.1, 0.6, 0.8, 0.4];
        let c = [0.7, 0.2, 0.1, 0.9, 0.3];
        let cohorts: [&[f64]; 3] = [&a, &b, &c];
        let sum = friedman_rank_sum(&cohorts).unwrap();
        let kendall = friedman_kendall_w(&cohorts).unwrap();
        let mean_rank = friedman_mean_rank(&cohorts).unwrap();
        assert!((sum.p_value - kendall.p_value).abs() < 1e-9);
        assert!((sum.p_value - mean_rank.p_value).abs() < 1e-9);
    }

    #[test]
    fn test_friedman_all_identical_is_degenerate() {
        let a = [0.5, 0.5, 0.5];
        for f in [friedman_rank_sum, friedman_kendall_w, friedman_mean_rank] {
            assert!(matches!(f(&[&a, &a, &a]), Err(StatsError::Degenerate(_))));
        }
    }

    #[test]
    fn test_friedman_needs_three_repetitions() {
        let a = [0.9, 0.9];
        let b = [0.8, 0.8];
        let c = [0.85, 0.85];
        assert_eq!(
            friedman_rank_sum(&[&a, &b, &c]).unwrap_err(),
            StatsError::TooFewRepetitions {
                required: 3,
                found: 2
            }
        );
    }

    #[test]
    fn test_friedman_needs_three_cohorts() {
        let a = [0.1, 0.2, 0.3];
        assert!(matches!(
            friedman_rank_sum(&[&a, &a]),
            Err(StatsError::TooFewCohorts { .. })
        ));
    }

    #[test]
    fn test_friedman_no_difference_has_high_p() {
        // rank patterns cancel out: every cohort has the same rank sum
        let a = [1.0, 2.0, 3.0];
        let b = [2.0, 3.0, 1.0];
        let c = [3.0, 1.0, 2.0];
        let outcome = friedman_rank_sum(&[&a, &b, &c]).unwrap();
        assert!(outcome.statistic.abs() < 1e-12);
        assert!((outcome.p_value - 1.0).abs() < 1e-12);
        assert!((friedman_mean_rank(&[&a, &b, &c]).unwrap().p_value - 1.0).abs() < 1e-12);
    }

    // =========================================================================
    // Wilcoxon
    // =========================================================================

    #[test]
    fn test_wilcoxon_all_positive_differences() {
        // n = 5, T+ = 15: P(T >= 15) = 1/32, two-sided p = 1/16
        let x = [1.1, 2.2, 3.3, 4.4, 5.5];
        let y = [1.0, 2.0, 3.0, 4.0, 5.0];
        let outcome = wilcoxon_exact(&x, &y).unwrap();
        assert_eq!(outcome.statistic, 15.0);
        assert!((outcome.p_value - 0.0625).abs() < 1e-12);
    }

    #[test]
    fn test_wilcoxon_known_mixed_value() {
        // differences 1, -2, 3, 4, -5, 6: T+ = 1 + 3 + 4 + 6 = 14, n = 6
        let x = [1.0, 0.0, 3.0, 4.0, 0.0, 6.0];
        let y = [0.0, 2.0, 0.0, 0.0, 5.0, 0.0];
        let outcome = wilcoxon_exact(&x, &y).unwrap();
        assert_eq!(outcome.statistic, 14.0);
        // P(T >= 14) = P(T <= 7) = 18/64 for n = 6, two-sided 36/64
        assert!((outcome.p_value - 36.0 / 64.0).abs() < 1e-12);
    }

    #[test]
    fn test_wilcoxon_matches_r_reference() {
        // R: wilcox.test(x, y, paired = TRUE, alternative = "greater") on the
        // Hamilton depression scores gives V = 40, p-value = 0.01953 (10 / 512)
        let x = [1.83, 0.50, 1.62, 2.48, 1.68, 1.88, 1.55, 3.06, 1.30];
        let y = [0.878, 0.647, 0.598, 2.05, 1.06, 1.29, 1.06, 3.14, 1.29];
        for f in [wilcoxon_exact, wilcoxon_exact_recursive] {
            let outcome = f(&x, &y).unwrap();
            assert_eq!(outcome.statistic, 40.0);
            assert!((outcome.p_value - 20.0 / 512.0).abs() < 1e-12, "{outcome:?}");
        }
    }

    #[test]
    fn test_wilcoxon_variants_agree() {
        for seed in 0..20 {
            let [a, b, _] = random_cohorts(seed, 12);
            let iterative = wilcoxon_exact(&a, &b).unwrap();
            let recursive = wilcoxon_exact_recursive(&a, &b).unwrap();
            assert!((iterative.p_value - recursive.p_value).abs() < 1e-12, "seed {seed}");
            assert_eq!(iterative.statistic, recursive.statistic);
        }
    }

    #[test]
    fn test_wilcoxon_zero_difference_is_error() {
        let x = [0.9, 0.8, 0.7];
        let y = [0.9, 0.7, 0.6];
        assert_eq!(wilcoxon_exact(&x, &y).unwrap_err(), StatsError::ZeroDifference(0));
        assert_eq!(
            wilcoxon_exact_recursive(&x, &y).unwrap_err(),
            StatsError::ZeroDifference(0)
        );
    }

    #[test]
    fn test_wilcoxon_tied_magnitudes_is_error() {
        let x = [0.9, 0.9];
        let y = [0.8, 0.8];
        assert_eq!(wilcoxon_exact(&x, &y).unwrap_err(), StatsError::TiedDifferences);
    }

    #[test]
    fn test_wilcoxon_length_mismatch() {
        assert_eq!(
            wilcoxon_exact(&[1.0, 2.0], &[1.0]).unwrap_err(),
            StatsError::LengthMismatch(2, 1)
        );
    }

    #[test]
    fn test_wilcoxon_single_pair() {
        let outcome = wilcoxon_exact(&[1.0], &[0.5]).unwrap();
        assert!((outcome.p_value - 1.0).abs() < 1e-12);
    }

    // =========================================================================
    // Hommel
    // =========================================================================

    #[test]
    fn test_hommel_matches_r_reference() {
        // values produced by R p.adjust(method = "hommel")
        let raw = [0.858_954_922_737_482_4, 0.124_042_793_090_094_8, 0.162_673_315_071_946_7];
        let expected = [
            0.858_954_922_737_482_4,
            0.248_085_586_180_189_6,
            0.325_346_630_143_893_4,
        ];
        let adjusted = hommel_adjust(&raw).unwrap();
        for (a, e) in adjusted.iter().zip(expected) {
            assert!((a - e).abs() < 1e-9, "{a} vs {e}");
        }

        let raw = [1.0, 0.073_593_923_811_440_4, 0.097_989_302_707_917_4];
        let expected = [1.0, 0.147_187_847_622_880_9, 0.195_978_605_415_834_8];
        let adjusted = hommel_adjust(&raw).unwrap();
        for (a, e) in adjusted.iter().zip(expected) {
            assert!((a - e).abs() < 1e-9, "{a} vs {e}");
        }
    }

    #[test]
    fn test_hommel_three_small_values() {
        // R: p.adjust(c(0.01, 0.02, 0.03), "hommel") = 0.03 0.03 0.03
        let adjusted = hommel_adjust(&[0.01, 0.02, 0.03]).unwrap();
        for a in adjusted {
            assert!((a - 0.03).abs() < 1e-12);
        }
        // R: p.adjust(c(0.01, 0.04, 0.03), "hommel") = 0.03 0.04 0.04
        let adjusted = hommel_adjust(&[0.01, 0.04, 0.03]).unwrap();
        assert!((adjusted[0] - 0.03).abs() < 1e-12);
        assert!((adjusted[1] - 0.04).abs() < 1e-12);
        assert!((adjusted[2] - 0.04).abs() < 1e-12);
    }

    #[test]
    fn test_hommel_two_values_is_hochberg() {
        let adjusted = hommel_adjust(&[0.04, 0.01]).unwrap();
        assert!((adjusted[0] - 0.04).abs() < 1e-12);
        assert!((adjusted[1] - 0.02).abs() < 1e-12);
    }

    #[test]
    fn test_hommel_bounds_on_random_inputs() {
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        for _ in 0..500 {
            let raw: Vec<f64> = (0..3).map(|_| rng.gen::<f64>()).collect();
            let adjusted = hommel_adjust(&raw).unwrap();
            assert_eq!(adjusted.len(), 3);
            for (a, r) in adjusted.iter().zip(&raw) {
                assert!(a >= r, "{a} < {r}");
                assert!(*a <= 1.0);
            }
        }
    }

    #[test]
    fn test_hommel_rejects_invalid() {
        assert_eq!(
            hommel_adjust(&[0.1, -1.0, 0.2]).unwrap_err(),
            StatsError::InvalidPValue(-1.0)
        );
        assert!(hommel_adjust(&[0.1, f64::NAN, 0.2]).is_err());
    }

    #[test]
    fn test_hommel_trivial_families() {
        assert!(hommel_adjust(&[]).unwrap().is_empty());
        assert_eq!(hommel_adjust(&[0.2]).unwrap(), vec![0.2]);
    }

    // =========================================================================
    // Summary statistics
    // =========================================================================

    #[test]
    fn test_mean_and_population_std() {
        let samples = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        assert!((mean(&samples) - 5.0).abs() < f64::EPSILON);
        assert!((population_std(&samples) - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_mean_and_std_empty() {
        assert_eq!(mean(&[]), 0.0);
        assert_eq!(population_std(&[]), 0.0);
        assert_eq!(population_std(&[0.9]), 0.0);
    }
}
