#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! Polygon normalization for erosion analysis requests.
//!
//! Turns a client-drawn vertex list into a closed ring with area,
//! perimeter, centroid, and bounding box. Request policy (vertex count,
//! area band, aspect ratio) is checked separately by [`check_limits`] so
//! that normalization itself only rejects polygons that are geometrically
//! meaningless.

use erosion_map_rusle_models::{BoundingBox, Coordinate, PolygonMetadata};
use serde::{Deserialize, Serialize};

/// Mean Earth radius in metres.
pub const EARTH_RADIUS_M: f64 = 6_371_008.8;

/// Errors from polygon normalization and limit checks.
#[derive(Debug, thiserror::Error)]
pub enum GeometryError {
    /// The polygon is not a usable ring.
    #[error("Invalid geometry: {message}")]
    InvalidGeometry {
        /// Description of the problem.
        message: String,
    },

    /// The polygon is valid but exceeds a request limit.
    #[error("Polygon exceeds limits: {message}")]
    LimitExceeded {
        /// Description of the exceeded limit.
        message: String,
    },
}

impl GeometryError {
    fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidGeometry {
            message: message.into(),
        }
    }
}

/// A closed, validated polygon ring with derived metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedPolygon {
    /// Closed ring of `(lon, lat)` pairs; first equals last.
    pub ring: Vec<(f64, f64)>,
    /// Bounding box of the ring.
    pub bbox: BoundingBox,
    /// Vertex-average centroid `(lon, lat)`.
    pub centroid: (f64, f64),
    /// Area in square kilometres.
    pub area_km2: f64,
    /// Perimeter in kilometres.
    pub perimeter_km: f64,
}

impl NormalizedPolygon {
    /// Area in hectares.
    #[must_use]
    pub fn area_hectares(&self) -> f64 {
        self.area_km2 * 100.0
    }

    /// Number of distinct vertices (closing vertex excluded).
    #[must_use]
    pub fn distinct_vertices(&self) -> usize {
        self.ring.len().saturating_sub(1)
    }

    /// Summary metadata for API responses.
    #[must_use]
    pub fn metadata(&self) -> PolygonMetadata {
        PolygonMetadata {
            area_km2: self.area_km2,
            area_hectares: self.area_hectares(),
            perimeter_km: self.perimeter_km,
            centroid: [self.centroid.0, self.centroid.1],
            bbox: self.bbox.to_array(),
            num_vertices: self.ring.len(),
        }
    }

    /// Converts the ring into a [`geo::Polygon`].
    #[must_use]
    pub fn to_geo(&self) -> geo::Polygon<f64> {
        geo::Polygon::new(geo::LineString::from(self.ring.clone()), vec![])
    }

    /// Builds a `GeoJSON` Feature carrying the polygon metadata as properties.
    #[must_use]
    pub fn to_feature(&self) -> geojson::Feature {
        let metadata = self.metadata();
        let mut properties = geojson::JsonObject::new();
        properties.insert("area_km2".to_string(), serde_json::json!(metadata.area_km2));
        properties.insert(
            "area_hectares".to_string(),
            serde_json::json!(metadata.area_hectares),
        );
        properties.insert(
            "perimeter_km".to_string(),
            serde_json::json!(metadata.perimeter_km),
        );
        properties.insert("centroid".to_string(), serde_json::json!(metadata.centroid));
        properties.insert("bbox".to_string(), serde_json::json!(metadata.bbox));
        properties.insert(
            "num_vertices".to_string(),
            serde_json::json!(metadata.num_vertices),
        );
        properties.insert("crs".to_string(), serde_json::json!("EPSG:4326"));

        geojson::Feature {
            bbox: Some(metadata.bbox.to_vec()),
            geometry: Some(geojson::Geometry::new(geojson::Value::from(&self.to_geo()))),
            id: None,
            properties: Some(properties),
            foreign_members: None,
        }
    }
}

/// Validates, closes, and measures a polygon.
///
/// Consecutive duplicate vertices are collapsed (and logged), the ring is
/// closed if the client did not repeat the first vertex, and the area is
/// computed with the shoelace formula on a local equirectangular
/// projection centred on the polygon.
///
/// # Errors
///
/// Returns [`GeometryError::InvalidGeometry`] if a coordinate is outside
/// the valid longitude/latitude range, if fewer than 3 distinct vertices
/// remain, or if the vertices are collinear.
pub fn normalize(coordinates: &[Coordinate]) -> Result<NormalizedPolygon, GeometryError> {
    for (i, coord) in coordinates.iter().enumerate() {
        if !coord.longitude.is_finite() || !(-180.0..=180.0).contains(&coord.longitude) {
            return Err(GeometryError::invalid(format!(
                "Point {}: longitude {} is out of valid range [-180, 180]",
                i + 1,
                coord.longitude
            )));
        }
        if !coord.latitude.is_finite() || !(-90.0..=90.0).contains(&coord.latitude) {
            return Err(GeometryError::invalid(format!(
                "Point {}: latitude {} is out of valid range [-90, 90]",
                i + 1,
                coord.latitude
            )));
        }
    }

    let mut vertices: Vec<(f64, f64)> = Vec::with_capacity(coordinates.len() + 1);
    for coord in coordinates {
        let point = (coord.longitude, coord.latitude);
        if vertices.last() == Some(&point) {
            log::warn!(
                "Consecutive duplicate vertex at ({}, {}) removed",
                point.0,
                point.1
            );
            continue;
        }
        vertices.push(point);
    }

    if vertices.len() > 1 && vertices.first() == vertices.last() {
        vertices.pop();
    }

    if vertices.len() < 3 {
        return Err(GeometryError::invalid(format!(
            "Polygon needs at least 3 distinct vertices, got {}",
            vertices.len()
        )));
    }

    #[allow(clippy::cast_precision_loss)]
    let n = vertices.len() as f64;
    let centroid = (
        vertices.iter().map(|v| v.0).sum::<f64>() / n,
        vertices.iter().map(|v| v.1).sum::<f64>() / n,
    );

    let mut ring = vertices;
    ring.push(ring[0]);

    let area_km2 = projected_area_m2(&ring, centroid.1) / 1_000_000.0;
    if area_km2 <= 0.0 {
        return Err(GeometryError::invalid(
            "Polygon has zero area (vertices are collinear)",
        ));
    }

    let perimeter_km = ring.windows(2).map(|w| haversine_km(w[0], w[1])).sum();

    let bbox = ring.iter().fold(
        BoundingBox::new(f64::INFINITY, f64::INFINITY, f64::NEG_INFINITY, f64::NEG_INFINITY),
        |b, &(lon, lat)| {
            BoundingBox::new(
                b.west.min(lon),
                b.south.min(lat),
                b.east.max(lon),
                b.north.max(lat),
            )
        },
    );

    log::debug!(
        "Normalized polygon: {} vertices, {area_km2:.4} km², centroid ({:.5}, {:.5})",
        ring.len(),
        centroid.0,
        centroid.1
    );

    Ok(NormalizedPolygon {
        ring,
        bbox,
        centroid,
        area_km2,
        perimeter_km,
    })
}

/// Absolute shoelace area (m²) of a closed ring projected onto a local
/// equirectangular plane at `ref_lat`.
fn projected_area_m2(ring: &[(f64, f64)], ref_lat: f64) -> f64 {
    let cos_ref = ref_lat.to_radians().cos();
    let project = |(lon, lat): (f64, f64)| {
        (
            EARTH_RADIUS_M * lon.to_radians() * cos_ref,
            EARTH_RADIUS_M * lat.to_radians(),
        )
    };

    let twice_area: f64 = ring
        .windows(2)
        .map(|w| {
            let (x1, y1) = project(w[0]);
            let (x2, y2) = project(w[1]);
            x1.mul_add(y2, -(x2 * y1))
        })
        .sum();

    twice_area.abs() / 2.0
}

/// Great-circle distance in kilometres between two `(lon, lat)` points.
#[must_use]
pub fn haversine_km(a: (f64, f64), b: (f64, f64)) -> f64 {
    let (lon1, lat1) = (a.0.to_radians(), a.1.to_radians());
    let (lon2, lat2) = (b.0.to_radians(), b.1.to_radians());
    let dlat = lat2 - lat1;
    let dlon = lon2 - lon1;

    let h = (lat1.cos() * lat2.cos()).mul_add((dlon / 2.0).sin().powi(2), (dlat / 2.0).sin().powi(2));

    2.0 * EARTH_RADIUS_M / 1000.0 * h.sqrt().asin()
}

/// Request-level polygon limits.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeometryLimits {
    /// Maximum vertices in the closed ring.
    pub max_vertices: usize,
    /// Minimum area in square kilometres.
    pub min_area_km2: f64,
    /// Maximum area in square kilometres.
    pub max_area_km2: f64,
    /// Maximum bounding-box aspect ratio.
    pub max_aspect_ratio: f64,
}

impl Default for GeometryLimits {
    fn default() -> Self {
        Self {
            max_vertices: 1000,
            min_area_km2: 0.01,
            max_area_km2: 30_000.0,
            max_aspect_ratio: 100.0,
        }
    }
}

/// Checks a normalized polygon against request limits.
///
/// # Errors
///
/// Returns [`GeometryError::LimitExceeded`] if the polygon has too many
/// vertices, is too small or too large, or is a thin sliver.
pub fn check_limits(
    polygon: &NormalizedPolygon,
    limits: &GeometryLimits,
) -> Result<(), GeometryError> {
    let exceeded = |message: String| GeometryError::LimitExceeded { message };

    if polygon.ring.len() > limits.max_vertices {
        return Err(exceeded(format!(
            "Polygon has {} vertices, maximum is {}",
            polygon.ring.len(),
            limits.max_vertices
        )));
    }

    if polygon.area_km2 < limits.min_area_km2 {
        return Err(exceeded(format!(
            "Polygon area {:.4} km² is below the minimum of {} km²",
            polygon.area_km2, limits.min_area_km2
        )));
    }

    if polygon.area_km2 > limits.max_area_km2 {
        return Err(exceeded(format!(
            "Polygon area {:.1} km² exceeds the maximum of {} km²",
            polygon.area_km2, limits.max_area_km2
        )));
    }

    let width = polygon.bbox.width();
    let height = polygon.bbox.height();
    if width <= 0.0 || height <= 0.0 {
        return Err(exceeded(
            "Polygon has zero width or height".to_string(),
        ));
    }
    let aspect_ratio = (width / height).max(height / width);
    if aspect_ratio > limits.max_aspect_ratio {
        return Err(exceeded(format!(
            "Polygon aspect ratio {aspect_ratio:.1}:1 exceeds the limit of {}:1",
            limits.max_aspect_ratio
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square(size: f64) -> Vec<Coordinate> {
        vec![
            Coordinate::new(10.0, 50.0),
            Coordinate::new(10.0 + size, 50.0),
            Coordinate::new(10.0 + size, 50.0 + size),
            Coordinate::new(10.0, 50.0 + size),
        ]
    }

    #[test]
    fn closes_open_ring() {
        let polygon = normalize(&square(0.01)).unwrap();
        assert_eq!(polygon.ring.len(), 5);
        assert_eq!(polygon.ring.first(), polygon.ring.last());
        assert!(polygon.area_km2 > 0.0);
    }

    #[test]
    fn keeps_already_closed_ring() {
        let mut coords = square(0.01);
        coords.push(coords[0]);
        let polygon = normalize(&coords).unwrap();
        assert_eq!(polygon.ring.len(), 5);
        assert_eq!(polygon.distinct_vertices(), 4);
    }

    #[test]
    fn area_of_small_square_matches_projection() {
        let polygon = normalize(&square(0.01)).unwrap();
        // 0.01° ≈ 1.112 km north-south and 0.715 km east-west at 50°N.
        assert!((polygon.area_km2 - 0.795).abs() < 0.01, "{}", polygon.area_km2);
        assert!((polygon.area_hectares() - polygon.area_km2 * 100.0).abs() < 1e-9);
    }

    #[test]
    fn centroid_is_vertex_mean() {
        let polygon = normalize(&square(0.02)).unwrap();
        assert!((polygon.centroid.0 - 10.01).abs() < 1e-12);
        assert!((polygon.centroid.1 - 50.01).abs() < 1e-12);
    }

    #[test]
    fn bbox_covers_ring() {
        let polygon = normalize(&square(0.02)).unwrap();
        assert_eq!(polygon.bbox, BoundingBox::new(10.0, 50.0, 10.02, 50.02));
    }

    #[test]
    fn rejects_two_vertices() {
        let coords = vec![Coordinate::new(0.0, 0.0), Coordinate::new(1.0, 1.0)];
        assert!(matches!(
            normalize(&coords),
            Err(GeometryError::InvalidGeometry { .. })
        ));
    }

    #[test]
    fn rejects_triangle_with_duplicate_closing_vertex_only() {
        let coords = vec![
            Coordinate::new(0.0, 0.0),
            Coordinate::new(1.0, 1.0),
            Coordinate::new(0.0, 0.0),
        ];
        assert!(normalize(&coords).is_err());
    }

    #[test]
    fn rejects_out_of_range_coordinates() {
        let coords = vec![
            Coordinate::new(0.0, 0.0),
            Coordinate::new(181.0, 0.0),
            Coordinate::new(0.0, 1.0),
        ];
        let err = normalize(&coords).unwrap_err();
        assert!(err.to_string().contains("longitude"));
    }

    #[test]
    fn rejects_collinear_vertices() {
        let coords = vec![
            Coordinate::new(0.0, 0.0),
            Coordinate::new(1.0, 1.0),
            Coordinate::new(2.0, 2.0),
        ];
        assert!(normalize(&coords).is_err());
    }

    #[test]
    fn collapses_consecutive_duplicates() {
        let mut coords = square(0.01);
        coords.insert(1, coords[0]);
        let polygon = normalize(&coords).unwrap();
        assert_eq!(polygon.distinct_vertices(), 4);
    }

    #[test]
    fn haversine_one_degree_latitude() {
        let d = haversine_km((0.0, 0.0), (0.0, 1.0));
        assert!((d - 111.195).abs() < 0.01, "{d}");
    }

    #[test]
    fn limits_reject_tiny_and_huge() {
        let limits = GeometryLimits::default();
        let tiny = normalize(&square(0.0001)).unwrap();
        assert!(matches!(
            check_limits(&tiny, &limits),
            Err(GeometryError::LimitExceeded { .. })
        ));
        let huge = normalize(&square(5.0)).unwrap();
        assert!(check_limits(&huge, &limits).is_err());
        let ok = normalize(&square(0.05)).unwrap();
        assert!(check_limits(&ok, &limits).is_ok());
    }

    #[test]
    fn limits_reject_slivers() {
        let coords = vec![
            Coordinate::new(0.0, 0.0),
            Coordinate::new(1.0, 0.0),
            Coordinate::new(1.0, 0.005),
            Coordinate::new(0.0, 0.005),
        ];
        let polygon = normalize(&coords).unwrap();
        let err = check_limits(&polygon, &GeometryLimits::default()).unwrap_err();
        assert!(err.to_string().contains("aspect ratio"));
    }

    #[test]
    fn feature_carries_metadata() {
        let polygon = normalize(&square(0.01)).unwrap();
        let feature = polygon.to_feature();
        let properties = feature.properties.unwrap();
        assert_eq!(properties["num_vertices"], 5);
        assert_eq!(properties["crs"], "EPSG:4326");
        assert!(feature.geometry.is_some());
    }
}
