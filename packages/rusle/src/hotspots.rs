//! Hotspot detection: connected regions of cells above a soil-loss
//! threshold.
//!
//! Regions are grown with a 4-connected flood fill, seeded in row-major
//! order, so the same grid and threshold always yield the same hotspots
//! in the same order.

use std::collections::BTreeMap;

use erosion_map_rusle_models::{
    Factor, FactorSet, Hotspot, HotspotProperties, HotspotSummary, Severity, SeverityDistribution,
};
use erosion_map_source::GridSpec;
use ndarray::Array2;

/// Local LS above which a hotspot is called steep.
const STEEP_LS: f64 = 10.0;

/// Local C above which a hotspot is called sparsely vegetated.
const LOW_COVER_C: f64 = 0.15;

/// Finds 4-connected regions of valid cells whose loss exceeds
/// `threshold`, in row-major discovery order.
#[must_use]
pub fn connected_regions(loss: &Array2<f64>, threshold: f64) -> Vec<Vec<(usize, usize)>> {
    let (rows, cols) = loss.dim();
    let above = |r: usize, c: usize| loss[[r, c]].is_finite() && loss[[r, c]] > threshold;
    let mut visited = Array2::from_elem((rows, cols), false);
    let mut regions = Vec::new();

    for row in 0..rows {
        for col in 0..cols {
            if visited[[row, col]] || !above(row, col) {
                continue;
            }

            let mut region = Vec::new();
            let mut stack = vec![(row, col)];
            visited[[row, col]] = true;

            while let Some((r, c)) = stack.pop() {
                region.push((r, c));
                let neighbours = [
                    r.checked_sub(1).map(|r| (r, c)),
                    (r + 1 < rows).then_some((r + 1, c)),
                    c.checked_sub(1).map(|c| (r, c)),
                    (c + 1 < cols).then_some((r, c + 1)),
                ];
                for (nr, nc) in neighbours.into_iter().flatten() {
                    if !visited[[nr, nc]] && above(nr, nc) {
                        visited[[nr, nc]] = true;
                        stack.push((nr, nc));
                    }
                }
            }

            region.sort_unstable();
            regions.push(region);
        }
    }

    regions
}

/// Detects hotspots and describes each one.
///
/// `factor_means` are the polygon-wide factor means; the dominant factor
/// of a hotspot is the one whose local mean is highest relative to its
/// polygon-wide mean.
#[must_use]
pub fn detect(
    grid: &GridSpec,
    loss: &Array2<f64>,
    factors: &FactorSet<Array2<f64>>,
    factor_means: &FactorSet<f64>,
    threshold: f64,
) -> Vec<Hotspot> {
    connected_regions(loss, threshold)
        .into_iter()
        .enumerate()
        .map(|(i, cells)| build_hotspot(i + 1, grid, loss, factors, factor_means, threshold, &cells))
        .collect()
}

fn build_hotspot(
    number: usize,
    grid: &GridSpec,
    loss: &Array2<f64>,
    factors: &FactorSet<Array2<f64>>,
    factor_means: &FactorSet<f64>,
    threshold: f64,
    cells: &[(usize, usize)],
) -> Hotspot {
    #[allow(clippy::cast_precision_loss)]
    let n = cells.len() as f64;
    let values: Vec<f64> = cells.iter().map(|&index| loss[index]).collect();
    let mean_erosion = values.iter().sum::<f64>() / n;
    let max_erosion = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let area_ha = cells.iter().map(|&(row, _)| grid.cell_area_ha(row)).sum();

    let local_means = factors.map(|_, values| cells.iter().map(|&index| values[index]).sum::<f64>() / n);
    let dominant_factor = dominant(&local_means, factor_means);
    let severity = Severity::grade(mean_erosion, threshold);

    let polygons: Vec<geojson::PolygonType> = cells
        .iter()
        .map(|&(row, col)| {
            vec![
                grid.cell_ring(row, col)
                    .into_iter()
                    .map(|(lon, lat)| vec![lon, lat])
                    .collect(),
            ]
        })
        .collect();

    Hotspot {
        id: format!("hotspot_{number}"),
        geometry: geojson::Geometry::new(geojson::Value::MultiPolygon(polygons)),
        properties: HotspotProperties {
            area_ha,
            mean_erosion,
            max_erosion,
            dominant_factor,
            cell_count: cells.len(),
        },
        reason: reason(dominant_factor, &local_means, mean_erosion, threshold),
        severity,
    }
}

/// Factor with the highest local-to-global mean ratio. Ties go to the
/// earlier factor in equation order.
fn dominant(local: &FactorSet<f64>, global: &FactorSet<f64>) -> Factor {
    Factor::ALL
        .into_iter()
        .map(|factor| {
            let g = *global.get(factor);
            let l = *local.get(factor);
            let ratio = if g > 0.0 { l / g } else { 1.0 };
            (factor, ratio)
        })
        .fold((Factor::R, f64::NEG_INFINITY), |best, (factor, ratio)| {
            if ratio > best.1 { (factor, ratio) } else { best }
        })
        .0
}

fn reason(dominant: Factor, local: &FactorSet<f64>, mean_erosion: f64, threshold: f64) -> String {
    let mut parts = vec![format!(
        "{} ({dominant})",
        dominant.driver_description()
    )];

    if local.ls > STEEP_LS {
        parts.push(format!("Steep slope (LS = {:.1} > {STEEP_LS})", local.ls));
    }
    if local.c > LOW_COVER_C {
        parts.push(format!("Low vegetation cover (C = {:.2} > {LOW_COVER_C})", local.c));
    }

    parts.push(format!(
        "Mean {mean_erosion:.1} t/ha/yr is {:.1}x the {threshold} t/ha/yr threshold",
        mean_erosion / threshold
    ));

    parts.join(" + ")
}

/// Rolls hotspots up into counts, area, severity distribution, and
/// dominant factors ordered by frequency.
#[must_use]
pub fn summarize(hotspots: &[Hotspot]) -> HotspotSummary {
    let mut severity_distribution = SeverityDistribution::default();
    let mut factor_counts: BTreeMap<Factor, usize> = BTreeMap::new();

    for hotspot in hotspots {
        match hotspot.severity {
            Severity::Low => severity_distribution.low += 1,
            Severity::Moderate => severity_distribution.moderate += 1,
            Severity::High => severity_distribution.high += 1,
            Severity::Critical => severity_distribution.critical += 1,
        }
        *factor_counts
            .entry(hotspot.properties.dominant_factor)
            .or_default() += 1;
    }

    let mut dominant_factors: Vec<(Factor, usize)> = factor_counts.into_iter().collect();
    dominant_factors.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));

    HotspotSummary {
        total_hotspots: hotspots.len(),
        total_high_risk_area_ha: hotspots.iter().map(|h| h.properties.area_ha).sum(),
        severity_distribution,
        dominant_factors: dominant_factors.into_iter().map(|(f, _)| f).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use erosion_map_rusle_models::BoundingBox;

    fn grid(rows: usize, cols: usize) -> GridSpec {
        #[allow(clippy::cast_precision_loss)]
        let bbox = BoundingBox::new(0.0, 0.0, cols as f64 * 0.001, rows as f64 * 0.001);
        GridSpec::for_bbox(bbox, 0.001, 64)
    }

    fn loss() -> Array2<f64> {
        Array2::from_shape_vec(
            (3, 4),
            vec![
                25.0, 30.0, 1.0, 90.0, //
                1.0, 22.0, 1.0, 50.0, //
                f64::NAN, 1.0, 1.0, 1.0,
            ],
        )
        .unwrap()
    }

    #[test]
    fn regions_are_four_connected_in_row_major_order() {
        let regions = connected_regions(&loss(), 20.0);
        assert_eq!(regions.len(), 2);
        assert_eq!(regions[0], vec![(0, 0), (0, 1), (1, 1)]);
        assert_eq!(regions[1], vec![(0, 3), (1, 3)]);
    }

    #[test]
    fn diagonal_cells_are_separate_regions() {
        let loss = Array2::from_shape_vec((2, 2), vec![30.0, 1.0, 1.0, 30.0]).unwrap();
        assert_eq!(connected_regions(&loss, 20.0).len(), 2);
    }

    fn factors(shape: (usize, usize)) -> FactorSet<Array2<f64>> {
        let mut set = FactorSet::from_fn(|_| Array2::from_elem(shape, 1.0));
        set.ls[[0, 3]] = 12.0;
        set.ls[[1, 3]] = 12.0;
        set
    }

    #[test]
    fn detection_is_idempotent_and_describes_regions() {
        let grid = grid(3, 4);
        let factors = factors(grid.shape());
        let means = FactorSet::from_fn(|_| 1.0);
        let first = detect(&grid, &loss(), &factors, &means, 20.0);
        let second = detect(&grid, &loss(), &factors, &means, 20.0);
        assert_eq!(first, second);

        assert_eq!(first[0].id, "hotspot_1");
        assert_eq!(first[0].properties.cell_count, 3);
        assert!((first[0].properties.mean_erosion - 25.666_666).abs() < 1e-3);
        assert_eq!(first[0].severity, Severity::Moderate);

        let steep = &first[1];
        assert_eq!(steep.properties.dominant_factor, Factor::Ls);
        assert!((steep.properties.max_erosion - 90.0).abs() < f64::EPSILON);
        assert_eq!(steep.severity, Severity::High);
        assert!(steep.reason.contains("Steep slope"));
        assert!(matches!(
            &steep.geometry.value,
            geojson::Value::MultiPolygon(polygons) if polygons.len() == 2
        ));
    }

    #[test]
    fn summary_counts() {
        let grid = grid(3, 4);
        let factors = factors(grid.shape());
        let means = FactorSet::from_fn(|_| 1.0);
        let hotspots = detect(&grid, &loss(), &factors, &means, 20.0);
        let summary = summarize(&hotspots);
        assert_eq!(summary.total_hotspots, 2);
        assert_eq!(summary.severity_distribution.moderate, 1);
        assert_eq!(summary.severity_distribution.high, 1);
        assert_eq!(summary.dominant_factors, vec![Factor::R, Factor::Ls]);
        assert!(summary.total_high_risk_area_ha > 0.0);
    }
}
