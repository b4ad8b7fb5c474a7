#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! RUSLE soil-loss computation.
//!
//! Evaluates `A = R × K × LS × C × P` cell by cell over a grid laid out on
//! the analysis polygon, then reduces the soil-loss grid to statistics,
//! factor contributions, hotspots, and sanity checks.
//!
//! [`run`] is the entry point for a full analysis: it lays out the grid,
//! fetches covariates through a [`CovariateFetcher`], and hands them to
//! [`compute`]. [`compute`] is pure and is what the tests drive directly.

pub mod factors;
pub mod hotspots;
pub mod stats;
pub mod terrain;
pub mod validation;

use erosion_map_geometry::NormalizedPolygon;
use erosion_map_rusle_models::{
    DateRange, Factor, FactorStats, GridSummary, RusleOptions, RusleResult,
};
use erosion_map_source::{CovariateFetcher, Covariates, GridSpec};
use ndarray::Array2;

use crate::terrain::Terrain;

/// Largest grid dimension in cells. Finer resolutions are coarsened.
pub const DEFAULT_MAX_GRID_DIM: usize = 64;

/// Largest accepted hotspot threshold in t·ha⁻¹·yr⁻¹.
pub const MAX_THRESHOLD_T_HA_YR: f64 = 100.0;

/// Errors from the RUSLE pipeline.
#[derive(Debug, thiserror::Error)]
pub enum RusleError {
    /// The computation produced no usable result.
    #[error("RUSLE computation failed: {message}")]
    ComputationFailed {
        /// Description of the failure.
        message: String,
    },

    /// Covariate grids do not match the analysis grid.
    #[error("Grid error: {message}")]
    Grid {
        /// Description of the mismatch.
        message: String,
    },

    /// The request options are out of range.
    #[error("Invalid options: {message}")]
    InvalidOptions {
        /// Description of the rejected option.
        message: String,
    },
}

/// Checks request options and parses the imagery window.
///
/// # Errors
///
/// * If the date range is malformed, reversed, or longer than two years
/// * If the threshold is not in `(0, 100]`
/// * If the resolution is not a positive number
pub fn validate_options(options: &RusleOptions) -> Result<DateRange, RusleError> {
    let threshold = options.threshold_t_ha_yr;
    if !(threshold > 0.0 && threshold <= MAX_THRESHOLD_T_HA_YR) {
        return Err(RusleError::InvalidOptions {
            message: format!(
                "threshold_t_ha_yr must be in (0, {MAX_THRESHOLD_T_HA_YR}], got {threshold}"
            ),
        });
    }

    if !(options.resolution_deg.is_finite() && options.resolution_deg > 0.0) {
        return Err(RusleError::InvalidOptions {
            message: format!(
                "resolution_deg must be positive, got {}",
                options.resolution_deg
            ),
        });
    }

    options
        .date_range
        .parse::<DateRange>()
        .map_err(|e| RusleError::InvalidOptions {
            message: e.to_string(),
        })
}

/// Runs a full analysis over `polygon`.
///
/// NDVI cells the fetcher left without imagery take the default NDVI and
/// mark C degraded.
///
/// # Errors
///
/// * If the options are invalid
/// * If no cell inside the polygon has every factor defined
pub async fn run(
    fetcher: &dyn CovariateFetcher,
    polygon: &NormalizedPolygon,
    options: &RusleOptions,
) -> Result<RusleResult, RusleError> {
    let date_range = validate_options(options)?;
    let grid = GridSpec::for_polygon(polygon, options.resolution_deg, DEFAULT_MAX_GRID_DIM);

    log::info!(
        "Fetching covariates for {}x{} grid ({} cells inside, {:.2} km²)",
        grid.rows,
        grid.cols,
        grid.cells_inside(),
        polygon.area_km2
    );

    let mut covariates = fetcher.fetch(&grid, &date_range).await;
    covariates.fill_ndvi_gaps(&grid);
    compute(&grid, &covariates, options)
}

/// Computes factors, soil loss, statistics, hotspots, and validation for
/// already-fetched covariates.
///
/// # Errors
///
/// * If a covariate grid's shape differs from `grid`
/// * If no cell inside the polygon has every factor defined
pub fn compute(
    grid: &GridSpec,
    covariates: &Covariates,
    options: &RusleOptions,
) -> Result<RusleResult, RusleError> {
    check_shapes(grid, covariates)?;

    let terrain = Terrain::from_dem(
        &covariates.elevation.values,
        grid.cell_width_m(),
        grid.cell_height_m(),
    );
    let factor_grids = factors::evaluate(grid, covariates, &terrain, options.p_toggle);
    let loss = factors::soil_loss(&factor_grids);

    if loss.iter().any(|v| v.is_infinite()) {
        return Err(RusleError::ComputationFailed {
            message: "soil loss overflowed".to_string(),
        });
    }

    let valid = valid_cells(&loss);
    let cell_area_ha: Vec<f64> = (0..grid.rows).map(|row| grid.cell_area_ha(row)).collect();
    let erosion = stats::erosion_stats(&loss, &valid, &cell_area_ha, grid.cells_inside())
        .ok_or_else(|| RusleError::ComputationFailed {
            message: "no cell inside the polygon has all five factors defined".to_string(),
        })?;

    log::info!(
        "Soil loss over {} cells: mean {:.2}, p95 {:.2} {}",
        valid.len(),
        erosion.mean,
        erosion.p95,
        erosion.unit
    );

    let values = factor_grids.map(|_, values| stats::factor_values(values, &valid));
    let contributions = options
        .compute_sensitivities
        .then(|| stats::contributions(&values));

    let factor_stats = values.map(|factor, values| {
        let (mean, stddev, min, max) =
            stats::describe(values).unwrap_or((f64::NAN, f64::NAN, f64::NAN, f64::NAN));
        FactorStats {
            mean,
            stddev,
            min,
            max,
            unit: factor.unit().to_string(),
            source: factor_source(factor, covariates, &terrain, options.p_toggle),
            degraded: factor_degraded(factor, covariates, &terrain, options.p_toggle),
            contribution_pct: contributions.as_ref().map(|c| *c.get(factor)),
        }
    });

    if let Some(contributions) = &contributions {
        log::debug!(
            "Largest contribution: {}",
            stats::largest(contributions)
        );
    }

    let factor_means = factor_stats.map(|_, s| s.mean);
    let hotspots = hotspots::detect(
        grid,
        &loss,
        &factor_grids,
        &factor_means,
        options.threshold_t_ha_yr,
    );
    let hotspot_summary = hotspots::summarize(&hotspots);

    let validation = options.compute_sensitivities.then(|| {
        validation::validate(&loss, &factor_grids, &valid, &hotspots, erosion.p95)
    });

    let mut substitutions = covariates.substitutions.clone();
    if options.p_toggle && terrain.slope_rad.is_none() {
        substitutions.push(format!(
            "P: slope unavailable; assumed P = {}",
            factors::DEFAULT_TOGGLED_P
        ));
    }

    Ok(RusleResult {
        erosion,
        factors: factor_stats,
        hotspots,
        hotspot_summary,
        validation,
        grid: GridSummary {
            rows: grid.rows,
            cols: grid.cols,
            cell_size_deg: grid.cell_size_deg,
            cells_inside: grid.cells_inside(),
            cells_valid: valid.len(),
        },
        substitutions,
    })
}

fn check_shapes(grid: &GridSpec, covariates: &Covariates) -> Result<(), RusleError> {
    let expected = grid.shape();
    let shapes = [
        ("rainfall", covariates.rainfall.values.dim()),
        ("soil", covariates.soil.values.dim()),
        ("elevation", covariates.elevation.values.dim()),
        ("ndvi", covariates.ndvi.values.dim()),
    ];

    for (name, shape) in shapes {
        if shape != expected {
            return Err(RusleError::Grid {
                message: format!("{name} grid is {shape:?}, expected {expected:?}"),
            });
        }
    }

    Ok(())
}

fn valid_cells(loss: &Array2<f64>) -> Vec<(usize, usize)> {
    loss.indexed_iter()
        .filter(|(_, v)| v.is_finite())
        .map(|(index, _)| index)
        .collect()
}

fn factor_source(factor: Factor, covariates: &Covariates, terrain: &Terrain, p_toggle: bool) -> String {
    match factor {
        Factor::R => format!("{} (Renard & Freimund 1994)", covariates.rainfall.source),
        Factor::K => covariates.soil.source.clone(),
        Factor::Ls if terrain.slope_rad.is_none() => "Constant (no DEM)".to_string(),
        Factor::Ls => format!("{} (Moore & Burch 1986)", covariates.elevation.source),
        Factor::C => format!("{} (Van der Knijff 1999)", covariates.ndvi.source),
        Factor::P if !p_toggle => "Assumed 1.0 (no conservation practice)".to_string(),
        Factor::P if terrain.slope_rad.is_some() => "Contour farming by slope class".to_string(),
        Factor::P => format!(
            "Assumed {} (conservation practice, no slope data)",
            factors::DEFAULT_TOGGLED_P
        ),
    }
}

fn factor_degraded(factor: Factor, covariates: &Covariates, terrain: &Terrain, p_toggle: bool) -> bool {
    match factor {
        Factor::R => covariates.rainfall.degraded,
        Factor::K => covariates.soil.degraded,
        Factor::Ls => covariates.elevation.degraded || terrain.slope_rad.is_none(),
        Factor::C => covariates.ndvi.degraded,
        Factor::P => p_toggle && terrain.slope_rad.is_none(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use erosion_map_rusle_models::{Coordinate, Severity};
    use erosion_map_source::CovariateGrid;
    use erosion_map_source::soil_grids::SoilCell;

    struct FakeFetcher {
        ndvi: f64,
        imagery_timed_out: bool,
    }

    #[async_trait]
    impl CovariateFetcher for FakeFetcher {
        async fn fetch(&self, grid: &GridSpec, _date_range: &DateRange) -> Covariates {
            let mut substitutions = vec![
                "LS: elevation unavailable (test); assumed LS = 1.0".to_string(),
            ];
            let ndvi = if self.imagery_timed_out {
                substitutions.push(
                    "C: satellite imagery unavailable (Data source sentinel_hub timed out); \
                     assumed NDVI 0.55"
                        .to_string(),
                );
                CovariateGrid::filled(grid, 0.55, "Default NDVI (imagery unavailable)", true)
            } else {
                CovariateGrid::filled(grid, self.ndvi, "Sentinel-2 L2A NDVI (test)", false)
            };

            Covariates {
                rainfall: CovariateGrid::filled(grid, 700.0, "Open-Meteo (test)", false),
                soil: CovariateGrid::filled(grid, SoilCell::RegionalK(0.03), "Regional defaults", true),
                elevation: CovariateGrid::filled(grid, f64::NAN, "Constant (no DEM)", true),
                ndvi,
                substitutions,
            }
        }
    }

    fn square() -> NormalizedPolygon {
        let coordinates = [
            Coordinate::new(10.0, 50.0),
            Coordinate::new(10.01, 50.0),
            Coordinate::new(10.01, 50.01),
            Coordinate::new(10.0, 50.01),
        ];
        erosion_map_geometry::normalize(&coordinates).unwrap()
    }

    #[tokio::test]
    async fn flat_vegetated_polygon_has_negligible_loss() {
        let fetcher = FakeFetcher {
            ndvi: 0.95,
            imagery_timed_out: false,
        };
        let result = run(&fetcher, &square(), &RusleOptions::default())
            .await
            .unwrap();

        assert!(result.erosion.mean < 0.01, "{}", result.erosion.mean);
        assert!(result.hotspots.is_empty());
        assert!((result.factors.ls.mean - 1.0).abs() < f64::EPSILON);
        assert_eq!(result.factors.ls.source, "Constant (no DEM)");
        let validation = result.validation.unwrap();
        assert!(validation.model_valid, "{}", validation.notes);
    }

    #[tokio::test]
    async fn bare_polygon_is_one_hotspot() {
        let fetcher = FakeFetcher {
            ndvi: 0.0,
            imagery_timed_out: false,
        };
        let result = run(&fetcher, &square(), &RusleOptions::default())
            .await
            .unwrap();

        assert!(result.erosion.mean > 20.0);
        assert_eq!(result.hotspots.len(), 1);
        assert_eq!(result.hotspots[0].properties.cell_count, result.grid.cells_valid);
        assert_eq!(result.hotspots[0].severity, Severity::High);
        assert_eq!(result.hotspot_summary.total_hotspots, 1);

        let total: f64 = result
            .factors
            .iter()
            .filter_map(|(_, s)| s.contribution_pct)
            .sum();
        assert!((total - 100.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn imagery_timeout_still_completes() {
        let fetcher = FakeFetcher {
            ndvi: 0.0,
            imagery_timed_out: true,
        };
        let result = run(&fetcher, &square(), &RusleOptions::default())
            .await
            .unwrap();

        assert!(result.factors.c.degraded);
        assert!(result.factors.c.source.starts_with("Default NDVI"));
        assert!(result.substitutions.iter().any(|s| s.starts_with("C:")));
        assert!(result.erosion.mean.is_finite());
        assert!((result.erosion.coverage - 1.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn sensitivities_can_be_skipped() {
        let polygon = square();
        let grid = GridSpec::for_polygon(&polygon, 0.001, DEFAULT_MAX_GRID_DIM);
        let fetcher = FakeFetcher {
            ndvi: 0.5,
            imagery_timed_out: false,
        };
        let date_range: DateRange = "2025-01-01/2025-12-31".parse().unwrap();
        let covariates = fetcher.fetch(&grid, &date_range).await;
        let options = RusleOptions {
            compute_sensitivities: false,
            ..RusleOptions::default()
        };

        let result = compute(&grid, &covariates, &options).unwrap();
        assert!(result.validation.is_none());
        assert!(result.factors.r.contribution_pct.is_none());
    }

    #[test]
    fn toggled_p_without_slope_is_substituted() {
        let polygon = square();
        let grid = GridSpec::for_polygon(&polygon, 0.001, DEFAULT_MAX_GRID_DIM);
        let covariates = Covariates {
            rainfall: CovariateGrid::filled(&grid, 700.0, "test", false),
            soil: CovariateGrid::filled(&grid, SoilCell::RegionalK(0.03), "test", false),
            elevation: CovariateGrid::filled(&grid, f64::NAN, "Constant (no DEM)", true),
            ndvi: CovariateGrid::filled(&grid, 0.3, "test", false),
            substitutions: Vec::new(),
        };
        let options = RusleOptions {
            p_toggle: true,
            ..RusleOptions::default()
        };

        let result = compute(&grid, &covariates, &options).unwrap();
        assert!((result.factors.p.mean - factors::DEFAULT_TOGGLED_P).abs() < f64::EPSILON);
        assert!(result.factors.p.degraded);
        assert!(result.substitutions.iter().any(|s| s.starts_with("P:")));
    }

    #[test]
    fn mismatched_covariates_are_rejected() {
        let polygon = square();
        let grid = GridSpec::for_polygon(&polygon, 0.001, DEFAULT_MAX_GRID_DIM);
        let other = GridSpec::for_polygon(&polygon, 0.002, DEFAULT_MAX_GRID_DIM);
        let covariates = Covariates {
            rainfall: CovariateGrid::filled(&other, 700.0, "test", false),
            soil: CovariateGrid::filled(&grid, SoilCell::RegionalK(0.03), "test", false),
            elevation: CovariateGrid::filled(&grid, f64::NAN, "test", true),
            ndvi: CovariateGrid::filled(&grid, 0.3, "test", false),
            substitutions: Vec::new(),
        };

        assert!(matches!(
            compute(&grid, &covariates, &RusleOptions::default()),
            Err(RusleError::Grid { .. })
        ));
    }

    #[tokio::test]
    async fn cloud_covered_imagery_falls_back_to_default_ndvi() {
        let fetcher = FakeFetcher {
            ndvi: f64::NAN,
            imagery_timed_out: false,
        };
        let result = run(&fetcher, &square(), &RusleOptions::default())
            .await
            .unwrap();

        assert!(result.factors.c.degraded);
        assert!(result.substitutions.iter().any(|s| s.starts_with("C:")));
        assert!(result.erosion.mean.is_finite());
        assert_eq!(result.grid.cells_valid, result.grid.cells_inside);
    }

    #[test]
    fn undefined_rainfall_everywhere_fails() {
        let polygon = square();
        let grid = GridSpec::for_polygon(&polygon, 0.001, DEFAULT_MAX_GRID_DIM);
        let covariates = Covariates {
            rainfall: CovariateGrid::filled(&grid, f64::NAN, "test", false),
            soil: CovariateGrid::filled(&grid, SoilCell::RegionalK(0.03), "test", false),
            elevation: CovariateGrid::filled(&grid, f64::NAN, "test", true),
            ndvi: CovariateGrid::filled(&grid, 0.3, "test", false),
            substitutions: Vec::new(),
        };

        assert!(matches!(
            compute(&grid, &covariates, &RusleOptions::default()),
            Err(RusleError::ComputationFailed { .. })
        ));
    }

    #[test]
    fn options_are_checked() {
        let bad_threshold = RusleOptions {
            threshold_t_ha_yr: 0.0,
            ..RusleOptions::default()
        };
        assert!(matches!(
            validate_options(&bad_threshold),
            Err(RusleError::InvalidOptions { .. })
        ));

        let bad_range = RusleOptions {
            date_range: "2025-06-01/2025-01-01".to_string(),
            ..RusleOptions::default()
        };
        assert!(matches!(
            validate_options(&bad_range),
            Err(RusleError::InvalidOptions { .. })
        ));

        assert!(validate_options(&RusleOptions::default()).is_ok());
    }
}
