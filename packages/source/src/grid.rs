//! Analysis grid layout and covariate rasters.
//!
//! The grid is row-major with row 0 along the northern edge of the
//! bounding box. Every covariate and factor raster shares its shape.

use erosion_map_geometry::{EARTH_RADIUS_M, NormalizedPolygon};
use erosion_map_rusle_models::BoundingBox;
use geo::Contains as _;
use ndarray::Array2;

/// Metres per degree of latitude on the mean sphere.
const METRES_PER_DEGREE: f64 = EARTH_RADIUS_M * std::f64::consts::PI / 180.0;

/// Regular lon/lat grid covering a polygon's bounding box.
#[derive(Debug, Clone, PartialEq)]
pub struct GridSpec {
    /// Bounding box the grid was laid out over.
    pub bbox: BoundingBox,
    /// Number of rows.
    pub rows: usize,
    /// Number of columns.
    pub cols: usize,
    /// Cell edge length in degrees.
    pub cell_size_deg: f64,
    /// `true` where the cell centre lies inside the polygon.
    pub mask: Array2<bool>,
}

impl GridSpec {
    /// Lays out a grid over `bbox` with every cell marked inside.
    ///
    /// The resolution is coarsened so that neither dimension exceeds
    /// `max_dim`.
    #[must_use]
    pub fn for_bbox(bbox: BoundingBox, resolution_deg: f64, max_dim: usize) -> Self {
        let max_dim = max_dim.max(1);
        let extent = bbox.width().max(bbox.height());
        #[allow(clippy::cast_precision_loss)]
        let min_resolution = extent / max_dim as f64;
        let cell_size_deg = if resolution_deg.is_finite() && resolution_deg > 0.0 {
            resolution_deg.max(min_resolution)
        } else {
            min_resolution
        };

        let cells_along = |span: f64| -> usize {
            if cell_size_deg <= 0.0 {
                return 1;
            }
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            let n = (span / cell_size_deg - 1e-9).ceil() as usize;
            n.clamp(1, max_dim)
        };

        let rows = cells_along(bbox.height());
        let cols = cells_along(bbox.width());

        Self {
            bbox,
            rows,
            cols,
            cell_size_deg,
            mask: Array2::from_elem((rows, cols), true),
        }
    }

    /// Lays out a grid over a polygon and masks cells whose centre falls
    /// outside it.
    ///
    /// A polygon smaller than one cell still gets the cell holding its
    /// centroid.
    #[must_use]
    pub fn for_polygon(polygon: &NormalizedPolygon, resolution_deg: f64, max_dim: usize) -> Self {
        let mut grid = Self::for_bbox(polygon.bbox, resolution_deg, max_dim);
        let shape = polygon.to_geo();

        for ((row, col), inside) in grid.mask.indexed_iter_mut() {
            let (lon, lat) = cell_centre(&grid.bbox, grid.cell_size_deg, row, col);
            *inside = shape.contains(&geo::Point::new(lon, lat));
        }

        if grid.cells_inside() == 0 {
            let (row, col) = grid.cell_at(polygon.centroid.0, polygon.centroid.1);
            grid.mask[[row, col]] = true;
        }

        log::debug!(
            "Grid {}x{} at {:.5}° ({} cells inside polygon)",
            grid.rows,
            grid.cols,
            grid.cell_size_deg,
            grid.cells_inside()
        );

        grid
    }

    /// Shape as `(rows, cols)`.
    #[must_use]
    pub const fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    /// Number of cells inside the polygon.
    #[must_use]
    pub fn cells_inside(&self) -> usize {
        self.mask.iter().filter(|inside| **inside).count()
    }

    /// Centre of a cell as `(lon, lat)`.
    #[must_use]
    pub fn centre(&self, row: usize, col: usize) -> (f64, f64) {
        cell_centre(&self.bbox, self.cell_size_deg, row, col)
    }

    /// Centres of all cells in row-major order.
    #[must_use]
    pub fn centres(&self) -> Vec<(f64, f64)> {
        (0..self.rows)
            .flat_map(|row| (0..self.cols).map(move |col| (row, col)))
            .map(|(row, col)| self.centre(row, col))
            .collect()
    }

    /// The cell containing `(lon, lat)`, clamped to the grid.
    #[must_use]
    pub fn cell_at(&self, lon: f64, lat: f64) -> (usize, usize) {
        let index = |offset: f64, n: usize| -> usize {
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            let i = (offset / self.cell_size_deg).floor().max(0.0) as usize;
            i.min(n - 1)
        };
        (
            index(self.bbox.north - lat, self.rows),
            index(lon - self.bbox.west, self.cols),
        )
    }

    /// Outline of a cell as a closed `(lon, lat)` ring.
    #[must_use]
    pub fn cell_ring(&self, row: usize, col: usize) -> Vec<(f64, f64)> {
        #[allow(clippy::cast_precision_loss)]
        let west = (col as f64).mul_add(self.cell_size_deg, self.bbox.west);
        #[allow(clippy::cast_precision_loss)]
        let north = (row as f64).mul_add(-self.cell_size_deg, self.bbox.north);
        let east = west + self.cell_size_deg;
        let south = north - self.cell_size_deg;
        vec![
            (west, south),
            (east, south),
            (east, north),
            (west, north),
            (west, south),
        ]
    }

    /// East-west cell extent in metres at the grid's centre latitude.
    #[must_use]
    pub fn cell_width_m(&self) -> f64 {
        let (_, lat) = self.bbox.center();
        self.cell_size_deg * METRES_PER_DEGREE * lat.to_radians().cos()
    }

    /// North-south cell extent in metres.
    #[must_use]
    pub fn cell_height_m(&self) -> f64 {
        self.cell_size_deg * METRES_PER_DEGREE
    }

    /// Representative cell edge length in metres.
    #[must_use]
    pub fn cell_size_m(&self) -> f64 {
        (self.cell_width_m() * self.cell_height_m()).sqrt()
    }

    /// Area of a cell in row `row` in hectares, corrected for latitude.
    #[must_use]
    pub fn cell_area_ha(&self, row: usize) -> f64 {
        let (_, lat) = self.centre(row, 0);
        let width = self.cell_size_deg * METRES_PER_DEGREE * lat.to_radians().cos();
        width * self.cell_height_m() / 10_000.0
    }
}

fn cell_centre(bbox: &BoundingBox, cell_size_deg: f64, row: usize, col: usize) -> (f64, f64) {
    #[allow(clippy::cast_precision_loss)]
    let lon = (col as f64 + 0.5).mul_add(cell_size_deg, bbox.west);
    #[allow(clippy::cast_precision_loss)]
    let lat = (row as f64 + 0.5).mul_add(-cell_size_deg, bbox.north);
    (lon, lat)
}

/// `n × n` sample points spanning `bbox` edge to edge.
///
/// A single-point lattice is the bounding-box centre.
#[must_use]
pub fn sample_lattice(bbox: &BoundingBox, n: usize) -> Vec<(f64, f64)> {
    if n <= 1 {
        return vec![bbox.center()];
    }
    #[allow(clippy::cast_precision_loss)]
    let step = |span: f64, i: usize| span * i as f64 / (n - 1) as f64;

    (0..n)
        .flat_map(|i| {
            (0..n).map(move |j| {
                (
                    bbox.west + step(bbox.width(), i),
                    bbox.south + step(bbox.height(), j),
                )
            })
        })
        .collect()
}

/// Index of the sample nearest to `point` (planar degrees).
fn nearest_sample(samples: &[(f64, f64)], point: (f64, f64)) -> Option<usize> {
    samples
        .iter()
        .enumerate()
        .map(|(i, s)| (i, (s.0 - point.0).powi(2) + (s.1 - point.1).powi(2)))
        .min_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(i, _)| i)
}

/// One physical quantity sampled onto the analysis grid.
#[derive(Debug, Clone, PartialEq)]
pub struct CovariateGrid<T> {
    /// Cell values; `f64::NAN` marks missing numeric data.
    pub values: Array2<T>,
    /// Where the values came from.
    pub source: String,
    /// Whether a default was substituted for failed source data.
    pub degraded: bool,
}

impl<T: Clone> CovariateGrid<T> {
    /// A grid holding the same value everywhere.
    #[must_use]
    pub fn filled(grid: &GridSpec, value: T, source: impl Into<String>, degraded: bool) -> Self {
        Self {
            values: Array2::from_elem(grid.shape(), value),
            source: source.into(),
            degraded,
        }
    }

    /// Assigns every cell the value of its nearest sample point.
    ///
    /// Returns `None` if there are no samples.
    #[must_use]
    pub fn from_samples(
        grid: &GridSpec,
        samples: &[((f64, f64), T)],
        source: impl Into<String>,
        degraded: bool,
    ) -> Option<Self> {
        let points: Vec<(f64, f64)> = samples.iter().map(|(p, _)| *p).collect();
        let mut values = Vec::with_capacity(grid.rows * grid.cols);
        for centre in grid.centres() {
            let index = nearest_sample(&points, centre)?;
            values.push(samples[index].1.clone());
        }

        Some(Self {
            values: Array2::from_shape_vec(grid.shape(), values).ok()?,
            source: source.into(),
            degraded,
        })
    }
}
