//! Summary statistics over the valid cells of the soil-loss grid.

use erosion_map_rusle_models::{ErosionClass, ErosionStats, Factor, FactorSet};
use ndarray::Array2;

/// Floor applied to factor values before taking logarithms.
const LOG_FLOOR: f64 = 1e-6;

/// Unit of soil-loss rates.
pub const SOIL_LOSS_UNIT: &str = "t ha⁻¹ yr⁻¹";

/// Mean, population standard deviation, min, and max of `values`.
///
/// Returns `None` for an empty slice.
#[must_use]
pub fn describe(values: &[f64]) -> Option<(f64, f64, f64, f64)> {
    if values.is_empty() {
        return None;
    }
    #[allow(clippy::cast_precision_loss)]
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    Some((mean, variance.sqrt(), min, max))
}

/// Percentile `q` in `[0, 100]` by linear interpolation between order
/// statistics. `sorted` must be ascending and non-empty.
#[must_use]
pub fn percentile(sorted: &[f64], q: f64) -> f64 {
    match sorted.len() {
        0 => f64::NAN,
        1 => sorted[0],
        n => {
            #[allow(clippy::cast_precision_loss)]
            let rank = (q / 100.0).clamp(0.0, 1.0) * (n - 1) as f64;
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            let lower = rank.floor() as usize;
            let upper = (lower + 1).min(n - 1);
            #[allow(clippy::cast_precision_loss)]
            let fraction = rank - lower as f64;
            (sorted[upper] - sorted[lower]).mul_add(fraction, sorted[lower])
        }
    }
}

/// Soil-loss statistics.
///
/// `valid` holds the indices of valid cells, `cell_area_ha` the area of
/// each row's cells, and `inside` the number of cells inside the polygon.
#[must_use]
pub fn erosion_stats(
    loss: &Array2<f64>,
    valid: &[(usize, usize)],
    cell_area_ha: &[f64],
    inside: usize,
) -> Option<ErosionStats> {
    let values: Vec<f64> = valid.iter().map(|&index| loss[index]).collect();
    let (mean, stddev, min, max) = describe(&values)?;

    let mut sorted = values;
    sorted.sort_by(f64::total_cmp);

    let total_soil_loss_tonnes = valid
        .iter()
        .map(|&(row, col)| loss[[row, col]] * cell_area_ha[row])
        .sum();

    #[allow(clippy::cast_precision_loss)]
    let coverage = if inside == 0 {
        0.0
    } else {
        valid.len() as f64 / inside as f64
    };

    Some(ErosionStats {
        mean,
        max,
        min,
        stddev,
        p50: percentile(&sorted, 50.0),
        p95: percentile(&sorted, 95.0),
        total_soil_loss_tonnes,
        coverage,
        unit: SOIL_LOSS_UNIT.to_string(),
        interpretation: ErosionClass::from_rate(mean),
    })
}

/// Values of one factor at the valid cells.
#[must_use]
pub fn factor_values(grid: &Array2<f64>, valid: &[(usize, usize)]) -> Vec<f64> {
    valid.iter().map(|&index| grid[index]).collect()
}

/// Share of soil-loss variability attributed to each factor (%).
///
/// Since `ln A = Σ ln F_i`, each factor's share is the variance of its
/// logarithm over the summed variances. When every factor is spatially
/// constant the shares fall back to normalised `|ln mean|`, and to an
/// even split if that is zero too. Shares always sum to 100.
#[must_use]
pub fn contributions(values: &FactorSet<Vec<f64>>) -> FactorSet<f64> {
    let log_variance = values.map(|_, v| {
        let logs: Vec<f64> = v.iter().map(|x| x.max(LOG_FLOOR).ln()).collect();
        describe(&logs).map_or(0.0, |(_, sd, _, _)| sd * sd)
    });

    if let Some(shares) = normalise(&log_variance) {
        return shares;
    }

    let log_magnitude = values.map(|_, v| {
        describe(v).map_or(0.0, |(mean, _, _, _)| mean.max(LOG_FLOOR).ln().abs())
    });

    normalise(&log_magnitude).unwrap_or_else(|| FactorSet::from_fn(|_| 100.0 / 5.0))
}

fn normalise(weights: &FactorSet<f64>) -> Option<FactorSet<f64>> {
    let total: f64 = weights.iter().map(|(_, w)| *w).sum();
    (total > 1e-12 && total.is_finite()).then(|| weights.map(|_, w| w / total * 100.0))
}

/// Factor with the largest contribution.
#[must_use]
pub fn largest(contributions: &FactorSet<f64>) -> Factor {
    contributions
        .iter()
        .fold((Factor::R, f64::NEG_INFINITY), |best, (factor, &value)| {
            if value > best.1 { (factor, value) } else { best }
        })
        .0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn describe_population_stats() {
        let (mean, sd, min, max) = describe(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]).unwrap();
        assert!((mean - 5.0).abs() < 1e-12);
        assert!((sd - 2.0).abs() < 1e-12);
        assert!((min - 2.0).abs() < 1e-12);
        assert!((max - 9.0).abs() < 1e-12);
        assert!(describe(&[]).is_none());
    }

    #[test]
    fn percentile_interpolates() {
        let sorted = [1.0, 2.0, 3.0, 4.0, 5.0];
        assert!((percentile(&sorted, 50.0) - 3.0).abs() < 1e-12);
        assert!((percentile(&sorted, 95.0) - 4.8).abs() < 1e-12);
        assert!((percentile(&[7.0], 95.0) - 7.0).abs() < 1e-12);
    }

    #[test]
    fn erosion_stats_totals_and_coverage() {
        let loss = Array2::from_shape_vec((2, 2), vec![10.0, 20.0, f64::NAN, 30.0]).unwrap();
        let valid = vec![(0, 0), (0, 1), (1, 1)];
        let stats = erosion_stats(&loss, &valid, &[1.0, 2.0], 4).unwrap();
        assert!((stats.mean - 20.0).abs() < 1e-12);
        assert!((stats.total_soil_loss_tonnes - 90.0).abs() < 1e-12);
        assert!((stats.coverage - 0.75).abs() < 1e-12);
        assert_eq!(stats.interpretation, ErosionClass::High);
        assert!(erosion_stats(&loss, &[], &[1.0, 2.0], 4).is_none());
    }

    fn constant(value: f64) -> Vec<f64> {
        vec![value; 4]
    }

    #[test]
    fn contributions_follow_log_variance() {
        let values = FactorSet {
            r: constant(500.0),
            k: constant(0.03),
            ls: vec![0.5, 1.0, 2.0, 4.0],
            c: constant(0.1),
            p: constant(1.0),
        };
        let shares = contributions(&values);
        assert!((shares.ls - 100.0).abs() < 1e-9);
        assert!(shares.r.abs() < 1e-9);
        assert_eq!(largest(&shares), Factor::Ls);
    }

    #[test]
    fn contributions_sum_to_hundred() {
        let values = FactorSet {
            r: vec![400.0, 600.0, 500.0, 450.0],
            k: vec![0.02, 0.03, 0.025, 0.04],
            ls: vec![0.5, 1.0, 2.0, 4.0],
            c: vec![0.01, 0.2, 0.05, 0.1],
            p: constant(1.0),
        };
        let shares = contributions(&values);
        let total: f64 = shares.iter().map(|(_, v)| *v).sum();
        assert!((total - 100.0).abs() < 1e-9);
    }

    #[test]
    fn constant_factors_fall_back_to_magnitude() {
        let values = FactorSet {
            r: constant(500.0),
            k: constant(0.03),
            ls: constant(1.0),
            c: constant(0.1),
            p: constant(1.0),
        };
        let shares = contributions(&values);
        let total: f64 = shares.iter().map(|(_, v)| *v).sum();
        assert!((total - 100.0).abs() < 1e-9);
        assert!(shares.ls.abs() < 1e-9);
        assert!(shares.r > shares.c);

        let ones = FactorSet::from_fn(|_| constant(1.0));
        let even = contributions(&ones);
        assert!((even.k - 20.0).abs() < 1e-12);
    }
}
