//! Per-cell RUSLE factor formulas and factor-grid evaluation.

use erosion_map_rusle_models::{Factor, FactorSet};
use erosion_map_source::soil_grids::{SoilCell, SoilTexture};
use erosion_map_source::{Covariates, GridSpec};
use ndarray::Array2;

use crate::terrain::Terrain;

/// P assumed when conservation practice is requested but slope is unknown.
pub const DEFAULT_TOGGLED_P: f64 = 0.5;

/// Rainfall erosivity from mean annual precipitation (Renard & Freimund
/// 1994).
#[must_use]
pub fn r_factor(annual_precipitation_mm: f64) -> f64 {
    if annual_precipitation_mm.is_nan() {
        return f64::NAN;
    }
    let p = annual_precipitation_mm.max(0.0);
    if p <= 850.0 {
        0.0483 * p.powf(1.61)
    } else {
        (0.004_105 * p).mul_add(p, 1.219f64.mul_add(-p, 587.8))
    }
}

/// Soil erodibility from topsoil texture (Williams 1995 EPIC equation),
/// clipped to `[0, 1]`.
#[must_use]
pub fn k_williams(texture: &SoilTexture) -> f64 {
    const EPS: f64 = 1e-8;
    let SoilTexture {
        sand_pct: sand,
        silt_pct: silt,
        clay_pct: clay,
        organic_carbon_pct: oc,
    } = *texture;

    let silt_vfs = sand.mul_add(0.1, silt);
    let sand_frac = 1.0 - sand / 100.0;

    let fcsand = 0.3f64.mul_add((-0.256 * sand * (1.0 - silt / 100.0)).exp(), 0.2);
    let fcl_si = (silt_vfs / (clay + silt_vfs + EPS)).powf(0.3);
    let forgc = 1.0 - 0.25 * oc / (oc + 2.95f64.mul_add(-oc, 3.72).exp() + EPS);
    let fhisand =
        1.0 - 0.7 * sand_frac / (sand_frac + 22.9f64.mul_add(sand_frac, -5.51).exp() + EPS);

    (0.1317 * fcsand * fcl_si * forgc * fhisand).clamp(0.0, 1.0)
}

/// K for one soil cell.
#[must_use]
pub fn k_factor(cell: &SoilCell) -> f64 {
    match cell {
        SoilCell::Texture(texture) => k_williams(texture),
        SoilCell::RegionalK(k) => k.clamp(0.0, 1.0),
    }
}

/// Cover management from NDVI (Van der Knijff et al. 1999), clamped to
/// `[0, 1]`.
#[must_use]
pub fn c_factor(ndvi: f64) -> f64 {
    if ndvi.is_nan() {
        return f64::NAN;
    }
    if ndvi >= 1.0 {
        return 0.0;
    }
    (-2.0 * ndvi / (1.0 - ndvi)).exp().clamp(0.0, 1.0)
}

/// Contour-farming support practice factor by slope percent.
#[must_use]
pub fn p_contour(slope_pct: f64) -> f64 {
    if slope_pct.is_nan() {
        return f64::NAN;
    }
    match slope_pct {
        s if s <= 2.0 => 0.6,
        s if s <= 8.0 => 0.5,
        s if s <= 12.0 => 0.6,
        s if s <= 16.0 => 0.7,
        s if s <= 20.0 => 0.8,
        s if s <= 25.0 => 0.9,
        _ => 1.0,
    }
}

/// Evaluates the five factor grids. Cells outside the polygon are `NaN`.
#[must_use]
pub fn evaluate(
    grid: &GridSpec,
    covariates: &Covariates,
    terrain: &Terrain,
    p_toggle: bool,
) -> FactorSet<Array2<f64>> {
    let p = match (&terrain.slope_rad, p_toggle) {
        (_, false) => Array2::from_elem(grid.shape(), 1.0),
        (Some(slope), true) => slope.mapv(|s| p_contour(s.tan() * 100.0)),
        (None, true) => Array2::from_elem(grid.shape(), DEFAULT_TOGGLED_P),
    };

    let mut factors = FactorSet {
        r: covariates.rainfall.values.mapv(r_factor),
        k: covariates.soil.values.map(k_factor),
        ls: terrain.ls.clone(),
        c: covariates.ndvi.values.mapv(c_factor),
        p,
    };

    for factor in Factor::ALL {
        let values = factor_mut(&mut factors, factor);
        ndarray::Zip::from(values)
            .and(&grid.mask)
            .for_each(|value, &inside| {
                if !inside {
                    *value = f64::NAN;
                }
            });
    }

    factors
}

fn factor_mut(set: &mut FactorSet<Array2<f64>>, factor: Factor) -> &mut Array2<f64> {
    match factor {
        Factor::R => &mut set.r,
        Factor::K => &mut set.k,
        Factor::Ls => &mut set.ls,
        Factor::C => &mut set.c,
        Factor::P => &mut set.p,
    }
}

/// Cell-wise soil loss `A = R × K × LS × C × P` (t·ha⁻¹·yr⁻¹).
///
/// A `NaN` in any factor yields a `NaN` cell.
#[must_use]
pub fn soil_loss(factors: &FactorSet<Array2<f64>>) -> Array2<f64> {
    ndarray::Zip::from(&factors.r)
        .and(&factors.k)
        .and(&factors.ls)
        .and(&factors.c)
        .and(&factors.p)
        .map_collect(|&r, &k, &ls, &c, &p| r * k * ls * c * p)
}

#[cfg(test)]
mod tests {
    use super::*;
    use erosion_map_rusle_models::BoundingBox;
    use erosion_map_source::CovariateGrid;

    #[test]
    fn r_factor_branches() {
        assert!((r_factor(700.0) - 0.0483 * 700.0_f64.powf(1.61)).abs() < 1e-9);
        let wet = r_factor(1000.0);
        assert!((wet - (587.8 - 1219.0 + 4105.0)).abs() < 1e-9);
        assert!(r_factor(0.0).abs() < f64::EPSILON);
        assert!(r_factor(f64::NAN).is_nan());
    }

    #[test]
    fn k_williams_for_loam() {
        let loam = SoilTexture {
            sand_pct: 40.0,
            silt_pct: 40.0,
            clay_pct: 20.0,
            organic_carbon_pct: 2.0,
        };
        let k = k_williams(&loam);
        assert!(k > 0.01 && k < 0.05, "{k}");
    }

    #[test]
    fn k_williams_sand_less_erodible_than_silt() {
        let sand = SoilTexture {
            sand_pct: 90.0,
            silt_pct: 5.0,
            clay_pct: 5.0,
            organic_carbon_pct: 1.0,
        };
        let silt = SoilTexture {
            sand_pct: 10.0,
            silt_pct: 75.0,
            clay_pct: 15.0,
            organic_carbon_pct: 1.0,
        };
        assert!(k_williams(&sand) < k_williams(&silt));
    }

    #[test]
    fn c_factor_decreases_with_vegetation() {
        assert!((c_factor(0.0) - 1.0).abs() < f64::EPSILON);
        assert!(c_factor(0.8) < c_factor(0.3));
        assert!(c_factor(0.8) < 0.001);
        assert!(c_factor(1.0).abs() < f64::EPSILON);
        assert!((c_factor(-0.5) - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn p_contour_table() {
        assert!((p_contour(1.0) - 0.6).abs() < f64::EPSILON);
        assert!((p_contour(5.0) - 0.5).abs() < f64::EPSILON);
        assert!((p_contour(14.0) - 0.7).abs() < f64::EPSILON);
        assert!((p_contour(30.0) - 1.0).abs() < f64::EPSILON);
    }

    fn covariates(grid: &GridSpec, ndvi: f64) -> Covariates {
        Covariates {
            rainfall: CovariateGrid::filled(grid, 700.0, "test", false),
            soil: CovariateGrid::filled(grid, SoilCell::RegionalK(0.03), "test", false),
            elevation: CovariateGrid::filled(grid, f64::NAN, "test", true),
            ndvi: CovariateGrid::filled(grid, ndvi, "test", false),
            substitutions: Vec::new(),
        }
    }

    #[test]
    fn masked_cells_are_missing() {
        let mut grid = GridSpec::for_bbox(BoundingBox::new(0.0, 0.0, 0.003, 0.003), 0.001, 64);
        grid.mask[[0, 0]] = false;
        let terrain = Terrain::flat(grid.shape());
        let factors = evaluate(&grid, &covariates(&grid, 0.5), &terrain, false);
        let loss = soil_loss(&factors);
        assert!(loss[[0, 0]].is_nan());
        assert!(loss[[1, 1]].is_finite());
        assert!((factors.p[[1, 1]] - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn toggled_p_without_slope_is_default() {
        let grid = GridSpec::for_bbox(BoundingBox::new(0.0, 0.0, 0.002, 0.002), 0.001, 64);
        let terrain = Terrain::flat(grid.shape());
        let factors = evaluate(&grid, &covariates(&grid, 0.5), &terrain, true);
        assert!((factors.p[[0, 0]] - DEFAULT_TOGGLED_P).abs() < f64::EPSILON);
    }

    #[test]
    fn soil_loss_is_monotonic_in_each_factor() {
        let grid = GridSpec::for_bbox(BoundingBox::new(0.0, 0.0, 0.001, 0.001), 0.001, 64);
        let terrain = Terrain::flat(grid.shape());
        let base = evaluate(&grid, &covariates(&grid, 0.5), &terrain, false);
        let base_loss = soil_loss(&base)[[0, 0]];

        for factor in Factor::ALL {
            let mut bumped = base.clone();
            factor_mut(&mut bumped, factor).mapv_inplace(|v| v * 1.5);
            let loss = soil_loss(&bumped)[[0, 0]];
            assert!(loss >= base_loss, "{factor} decreased soil loss");
        }
    }
}
