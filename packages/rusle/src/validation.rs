//! Qualitative sanity checks on a finished soil-loss grid.
//!
//! Each check compares the mean loss of a subset of cells with the grid
//! mean. Checks only annotate; they never fail the computation.

use erosion_map_rusle_models::{FactorSet, Hotspot, ValidationMetrics};
use ndarray::Array2;

/// C at or below which a cell counts as densely vegetated.
pub const HIGH_VEGETATION_C: f64 = 0.05;

/// LS at or below which a cell counts as flat.
pub const FLAT_LS: f64 = 0.5;

/// C at or above which a cell counts as bare soil.
pub const BARE_SOIL_C: f64 = 0.3;

/// Expected minimum loss reduction for vegetated cells (%).
pub const MIN_VEGETATION_REDUCTION_PCT: f64 = 50.0;

/// Expected minimum loss reduction for flat cells (%).
pub const MIN_FLAT_REDUCTION_PCT: f64 = 80.0;

/// Expected minimum loss increase for bare cells (%).
pub const MIN_BARE_INCREASE_PCT: f64 = 100.0;

/// Grid mean below which relative checks are meaningless.
pub const NEGLIGIBLE_MEAN: f64 = 0.5;

/// Share of hotspots expected to sit in the top of the distribution (%).
pub const MIN_HOTSPOT_AGREEMENT_PCT: f64 = 70.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Reduction,
    Increase,
}

struct Check<'a> {
    label: &'a str,
    direction: Direction,
    expected_pct: f64,
}

/// Runs every check.
///
/// `valid` lists the cells with a defined soil loss and `p95` is the 95th
/// percentile of those cells.
#[must_use]
pub fn validate(
    loss: &Array2<f64>,
    factors: &FactorSet<Array2<f64>>,
    valid: &[(usize, usize)],
    hotspots: &[Hotspot],
    p95: f64,
) -> ValidationMetrics {
    let mut notes = Vec::new();
    let grid_mean = mean(valid.iter().map(|&index| loss[index]));

    let Some(grid_mean) = grid_mean else {
        return ValidationMetrics {
            high_veg_reduction_pct: None,
            flat_terrain_reduction_pct: None,
            bare_soil_increase_pct: None,
            hotspot_agreement_pct: None,
            model_valid: true,
            notes: "No valid cells to check".to_string(),
        };
    };

    let mut model_valid = true;
    let mut run = |check: &Check<'_>, selector: &dyn Fn((usize, usize)) -> bool| {
        let (pct, passed) = run_check(check, loss, valid, selector, grid_mean, &mut notes);
        model_valid &= passed;
        pct
    };

    let high_veg_reduction_pct = run(
        &Check {
            label: "High vegetation",
            direction: Direction::Reduction,
            expected_pct: MIN_VEGETATION_REDUCTION_PCT,
        },
        &|index: (usize, usize)| factors.c[index] <= HIGH_VEGETATION_C,
    );
    let flat_terrain_reduction_pct = run(
        &Check {
            label: "Flat terrain",
            direction: Direction::Reduction,
            expected_pct: MIN_FLAT_REDUCTION_PCT,
        },
        &|index: (usize, usize)| factors.ls[index] <= FLAT_LS,
    );
    let bare_soil_increase_pct = run(
        &Check {
            label: "Bare soil",
            direction: Direction::Increase,
            expected_pct: MIN_BARE_INCREASE_PCT,
        },
        &|index: (usize, usize)| factors.c[index] >= BARE_SOIL_C,
    );

    let hotspot_agreement_pct = hotspot_agreement(hotspots, p95);
    if let Some(pct) = hotspot_agreement_pct.filter(|pct| *pct < MIN_HOTSPOT_AGREEMENT_PCT) {
        notes.push(format!(
            "Hotspot agreement {pct:.0}% below {MIN_HOTSPOT_AGREEMENT_PCT:.0}% \
             (hotspot means under 0.8 x p95)"
        ));
    }

    if notes.is_empty() {
        notes.push("All applicable checks passed".to_string());
    }

    ValidationMetrics {
        high_veg_reduction_pct,
        flat_terrain_reduction_pct,
        bare_soil_increase_pct,
        hotspot_agreement_pct,
        model_valid,
        notes: notes.join("; "),
    }
}

fn run_check(
    check: &Check<'_>,
    loss: &Array2<f64>,
    valid: &[(usize, usize)],
    selector: &dyn Fn((usize, usize)) -> bool,
    grid_mean: f64,
    notes: &mut Vec<String>,
) -> (Option<f64>, bool) {
    let subset: Vec<f64> = valid
        .iter()
        .copied()
        .filter(|&index| selector(index))
        .map(|index| loss[index])
        .collect();

    if subset.is_empty() || subset.len() == valid.len() {
        notes.push(format!("{} check not applicable", check.label));
        return (None, true);
    }

    let Some(subset_mean) = mean(subset.iter().copied()) else {
        return (None, true);
    };

    if grid_mean < NEGLIGIBLE_MEAN {
        let pct = (grid_mean > 0.0).then(|| change_pct(check.direction, subset_mean, grid_mean));
        return (pct, true);
    }

    let pct = change_pct(check.direction, subset_mean, grid_mean);
    let passed = pct >= check.expected_pct;
    if !passed {
        let verb = match check.direction {
            Direction::Reduction => "reduction",
            Direction::Increase => "increase",
        };
        log::debug!("{} check failed: {pct:.1}%", check.label);
        notes.push(format!(
            "{} {verb} {pct:.1}% below expected {:.0}%",
            check.label, check.expected_pct
        ));
    }
    (Some(pct), passed)
}

fn change_pct(direction: Direction, subset_mean: f64, grid_mean: f64) -> f64 {
    match direction {
        Direction::Reduction => (1.0 - subset_mean / grid_mean) * 100.0,
        Direction::Increase => (subset_mean / grid_mean - 1.0) * 100.0,
    }
}

fn hotspot_agreement(hotspots: &[Hotspot], p95: f64) -> Option<f64> {
    if hotspots.is_empty() || !p95.is_finite() {
        return None;
    }
    let agreeing = hotspots
        .iter()
        .filter(|h| h.properties.mean_erosion >= 0.8 * p95)
        .count();
    #[allow(clippy::cast_precision_loss)]
    Some(agreeing as f64 / hotspots.len() as f64 * 100.0)
}

fn mean(values: impl Iterator<Item = f64>) -> Option<f64> {
    let (sum, n) = values.fold((0.0, 0_usize), |(sum, n), v| (sum + v, n + 1));
    #[allow(clippy::cast_precision_loss)]
    (n > 0).then(|| sum / n as f64)
}
