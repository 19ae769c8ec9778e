//! Shared descriptive-statistics helpers over `statrs`, so `priors.rs`,
//! `eval.rs`, `features.rs` and `metrics.rs` share one implementation of
//! mean/median/population-stdev/percentile instead of each hand-rolling it.

use statrs::statistics::{Data, Distribution, OrderStatistics, Statistics};

/// Arithmetic mean, 0.0 for an empty slice.
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.to_vec().mean()
    }
}

/// Median via `statrs`'s order statistics (sorts a copy internally).
pub fn median(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    Data::new(values.to_vec()).median()
}

/// Population standard deviation (divides by `n`, not `n - 1`), 0.0 below
/// two observations.
pub fn population_std_dev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    values.to_vec().population_std_dev()
}

/// Linear-interpolated percentile, `q` in `[0.0, 1.0]`.
pub fn percentile(sorted: &[f64], q: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    if sorted.len() == 1 {
        return sorted[0];
    }
    Data::new(sorted.to_vec()).quantile(q.clamp(0.0, 1.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mean_and_median_of_odd_length() {
        let values = [1.0, 2.0, 3.0, 4.0, 100.0];
        assert!((mean(&values) - 22.0).abs() < 1e-9);
        assert_eq!(median(&values), 3.0);
    }

    #[test]
    fn population_std_dev_of_constant_series_is_zero() {
        let values = [5.0, 5.0, 5.0];
        assert_eq!(population_std_dev(&values), 0.0);
    }

    #[test]
    fn percentile_matches_endpoints() {
        let sorted = [1.0, 2.0, 3.0, 4.0];
        assert_eq!(percentile(&sorted, 0.0), 1.0);
        assert_eq!(percentile(&sorted, 1.0), 4.0);
    }

    #[test]
    fn empty_slice_yields_zero() {
        assert_eq!(mean(&[]), 0.0);
        assert_eq!(median(&[]), 0.0);
        assert_eq!(population_std_dev(&[]), 0.0);
        assert_eq!(percentile(&[], 0.5), 0.0);
    }
}
