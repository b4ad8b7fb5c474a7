//! Slope, D8 flow accumulation, and the LS factor.
//!
//! Slope uses Horn's (1981) 3x3 finite differences. Neighbours outside
//! the grid or without elevation take the centre value, so edge cells
//! still get a slope from their available neighbours.
//!
//! LS follows Moore & Burch (1986):
//! `LS = (m+1) × (A_s / 22.13)^m × (sin β / 0.0896)^n`
//! with `A_s = (flow_acc + 1) × cell_size`, m = 0.4, n = 1.3.

use ndarray::Array2;

/// Slope-length exponent.
pub const LS_M: f64 = 0.4;

/// Slope-steepness exponent.
pub const LS_N: f64 = 1.3;

/// D8 neighbour offsets `(row, col)`, starting east and turning
/// counter-clockwise.
const D8_OFFSETS: [(isize, isize); 8] = [
    (0, 1),
    (-1, 1),
    (-1, 0),
    (-1, -1),
    (0, -1),
    (1, -1),
    (1, 0),
    (1, 1),
];

/// Terrain derivatives over the analysis grid.
#[derive(Debug, Clone)]
pub struct Terrain {
    /// Slope in radians, `None` when no elevation data was available.
    pub slope_rad: Option<Array2<f64>>,
    /// Upstream contributing cells per cell.
    pub flow_accumulation: Option<Array2<f64>>,
    /// Slope length and steepness factor.
    pub ls: Array2<f64>,
}

impl Terrain {
    /// Derives slope, flow accumulation, and LS from a DEM.
    ///
    /// When the DEM has no finite values LS is 1.0 everywhere.
    #[must_use]
    pub fn from_dem(dem: &Array2<f64>, cell_width_m: f64, cell_height_m: f64) -> Self {
        if !dem.iter().any(|z| z.is_finite()) {
            return Self::flat(dem.dim());
        }

        let slope_rad = horn_slope(dem, cell_width_m, cell_height_m);
        let directions = d8_flow_direction(dem, cell_width_m, cell_height_m);
        let flow_accumulation = flow_accumulation(&directions);
        let cell_size = (cell_width_m * cell_height_m).sqrt();

        let ls = ndarray::Zip::from(&flow_accumulation)
            .and(&slope_rad)
            .map_collect(|&acc, &slope| ls_factor(acc, slope, cell_size));

        Self {
            slope_rad: Some(slope_rad),
            flow_accumulation: Some(flow_accumulation),
            ls,
        }
    }

    /// Terrain with no elevation data: LS = 1.0 and no slope.
    #[must_use]
    pub fn flat(shape: (usize, usize)) -> Self {
        Self {
            slope_rad: None,
            flow_accumulation: None,
            ls: Array2::from_elem(shape, 1.0),
        }
    }
}

/// Moore & Burch LS for one cell.
#[must_use]
pub fn ls_factor(flow_acc: f64, slope_rad: f64, cell_size_m: f64) -> f64 {
    if flow_acc.is_nan() || slope_rad.is_nan() {
        return f64::NAN;
    }
    let a_s = (flow_acc + 1.0) * cell_size_m;
    let length_factor = (a_s / 22.13).powf(LS_M);
    let slope_factor = (slope_rad.sin() / 0.0896).powf(LS_N);
    (LS_M + 1.0) * length_factor * slope_factor
}

/// Horn slope in radians. Cells without elevation are `NaN`.
#[must_use]
pub fn horn_slope(dem: &Array2<f64>, cell_width_m: f64, cell_height_m: f64) -> Array2<f64> {
    let (rows, cols) = dem.dim();

    Array2::from_shape_fn((rows, cols), |(row, col)| {
        let e = dem[[row, col]];
        if e.is_nan() {
            return f64::NAN;
        }

        let z = |dr: isize, dc: isize| -> f64 {
            neighbour(row, col, dr, dc, rows, cols)
                .map(|(r, c)| dem[[r, c]])
                .filter(|v| v.is_finite())
                .unwrap_or(e)
        };

        let (a, b, c) = (z(-1, -1), z(-1, 0), z(-1, 1));
        let (d, f) = (z(0, -1), z(0, 1));
        let (g, h, i) = (z(1, -1), z(1, 0), z(1, 1));

        let dz_dx = (2.0f64.mul_add(f, c) + i - (2.0f64.mul_add(d, a) + g)) / (8.0 * cell_width_m);
        let dz_dy = (2.0f64.mul_add(h, g) + i - (2.0f64.mul_add(b, a) + c)) / (8.0 * cell_height_m);

        dz_dx.hypot(dz_dy).atan()
    })
}

/// D8 flow direction: index into [`D8_OFFSETS`] plus one, or 0 for pits,
/// flats, and cells without elevation.
#[must_use]
pub fn d8_flow_direction(dem: &Array2<f64>, cell_width_m: f64, cell_height_m: f64) -> Array2<u8> {
    let (rows, cols) = dem.dim();
    let diagonal = cell_width_m.hypot(cell_height_m);

    Array2::from_shape_fn((rows, cols), |(row, col)| {
        let centre = dem[[row, col]];
        if centre.is_nan() {
            return 0;
        }

        let mut max_drop = 0.0_f64;
        let mut best_dir = 0_u8;

        for (idx, &(dr, dc)) in D8_OFFSETS.iter().enumerate() {
            let Some((r, c)) = neighbour(row, col, dr, dc, rows, cols) else {
                continue;
            };
            let z = dem[[r, c]];
            if z.is_nan() {
                continue;
            }

            let distance = match (dr, dc) {
                (0, _) => cell_width_m,
                (_, 0) => cell_height_m,
                _ => diagonal,
            };
            let drop = (centre - z) / distance;

            if drop > max_drop {
                max_drop = drop;
                best_dir = u8::try_from(idx + 1).unwrap_or(0);
            }
        }

        best_dir
    })
}

/// Number of upstream cells draining through each cell.
#[must_use]
pub fn flow_accumulation(directions: &Array2<u8>) -> Array2<f64> {
    let (rows, cols) = directions.dim();

    let downstream = |row: usize, col: usize| -> Option<(usize, usize)> {
        let dir = directions[[row, col]];
        if dir == 0 {
            return None;
        }
        let (dr, dc) = D8_OFFSETS.get(usize::from(dir - 1))?;
        neighbour(row, col, *dr, *dc, rows, cols)
    };

    let mut in_degree = Array2::<u32>::zeros((rows, cols));
    for row in 0..rows {
        for col in 0..cols {
            if let Some(next) = downstream(row, col) {
                in_degree[next] += 1;
            }
        }
    }

    let mut queue: Vec<(usize, usize)> = in_degree
        .indexed_iter()
        .filter(|(_, degree)| **degree == 0)
        .map(|(index, _)| index)
        .collect();
    let mut accumulation = Array2::<f64>::zeros((rows, cols));

    while let Some((row, col)) = queue.pop() {
        let Some(next) = downstream(row, col) else {
            continue;
        };
        accumulation[next] += accumulation[[row, col]] + 1.0;
        in_degree[next] = in_degree[next].saturating_sub(1);
        if in_degree[next] == 0 {
            queue.push(next);
        }
    }

    accumulation
}

fn neighbour(
    row: usize,
    col: usize,
    dr: isize,
    dc: isize,
    rows: usize,
    cols: usize,
) -> Option<(usize, usize)> {
    let r = row.checked_add_signed(dr)?;
    let c = col.checked_add_signed(dc)?;
    (r < rows && c < cols).then_some((r, c))
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Plane rising 1 m per 10 m eastwards.
    fn east_ramp(rows: usize, cols: usize) -> Array2<f64> {
        #[allow(clippy::cast_precision_loss)]
        Array2::from_shape_fn((rows, cols), |(_, col)| col as f64)
    }

    #[test]
    fn flat_dem_has_zero_slope() {
        let dem = Array2::from_elem((4, 4), 100.0);
        let slope = horn_slope(&dem, 10.0, 10.0);
        assert!(slope.iter().all(|s| s.abs() < 1e-12));
    }

    #[test]
    fn ramp_slope_matches_gradient() {
        let slope = horn_slope(&east_ramp(5, 5), 10.0, 10.0);
        let expected = 0.1_f64.atan();
        assert!((slope[[2, 2]] - expected).abs() < 1e-12);
        // Edge cells use replicated neighbours and see half the gradient.
        assert!(slope[[2, 0]] > 0.0 && slope[[2, 0]] < expected);
    }

    #[test]
    fn nan_elevation_propagates() {
        let mut dem = east_ramp(3, 3);
        dem[[1, 1]] = f64::NAN;
        let slope = horn_slope(&dem, 10.0, 10.0);
        assert!(slope[[1, 1]].is_nan());
        assert!(slope[[0, 0]].is_finite());
    }

    #[test]
    fn flow_runs_downhill_west() {
        let directions = d8_flow_direction(&east_ramp(3, 4), 10.0, 10.0);
        // Steepest descent from an interior cell is due west (code 5).
        assert_eq!(directions[[1, 2]], 5);
        assert_eq!(directions[[1, 0]], 0);
    }

    #[test]
    fn accumulation_counts_upstream_cells() {
        let directions = d8_flow_direction(&east_ramp(1, 4), 10.0, 10.0);
        let acc = flow_accumulation(&directions);
        assert_eq!(acc.as_slice().unwrap(), &[3.0, 2.0, 1.0, 0.0]);
    }

    #[test]
    fn ls_increases_with_slope_and_length() {
        let gentle = ls_factor(0.0, 0.05, 30.0);
        let steep = ls_factor(0.0, 0.2, 30.0);
        let long = ls_factor(20.0, 0.05, 30.0);
        assert!(steep > gentle);
        assert!(long > gentle);
        assert!(ls_factor(0.0, 0.0, 30.0).abs() < 1e-12);
        assert!(ls_factor(f64::NAN, 0.1, 30.0).is_nan());
    }

    #[test]
    fn missing_dem_defaults_to_unit_ls() {
        let dem = Array2::from_elem((3, 3), f64::NAN);
        let terrain = Terrain::from_dem(&dem, 10.0, 10.0);
        assert!(terrain.slope_rad.is_none());
        assert!(terrain.ls.iter().all(|v| (*v - 1.0).abs() < f64::EPSILON));
    }
}
