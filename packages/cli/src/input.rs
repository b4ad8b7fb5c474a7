//! Reading analysis polygons from files.
//!
//! Accepted shapes:
//!
//! * `GeoJSON` `Polygon`/`MultiPolygon` geometry, `Feature`, or
//!   `FeatureCollection` (first polygonal feature, outer ring only)
//! * An API request body `{ "coordinates": [{ "longitude", "latitude" }, ...] }`
//! * A bare array of `{ "longitude", "latitude" }` objects or `[lon, lat]`
//!   pairs

use std::path::Path;

use erosion_map_rusle_models::Coordinate;
use thiserror::Error;

/// Errors from reading a polygon file.
#[derive(Debug, Error)]
pub enum InputError {
    /// File I/O failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The file is not JSON.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The JSON has no usable polygon.
    #[error("No polygon found: {message}")]
    NoPolygon {
        /// What was wrong with the input.
        message: String,
    },
}

fn no_polygon(message: impl Into<String>) -> InputError {
    InputError::NoPolygon {
        message: message.into(),
    }
}

/// Reads polygon vertices from a file.
///
/// # Errors
///
/// * If the file cannot be read or is not JSON
/// * If no polygon can be extracted
pub fn read_polygon(path: &Path) -> Result<Vec<Coordinate>, InputError> {
    let text = std::fs::read_to_string(path)?;
    parse_polygon(&text)
}

/// Extracts polygon vertices from JSON text.
///
/// # Errors
///
/// * If the text is not JSON
/// * If no polygon can be extracted
pub fn parse_polygon(text: &str) -> Result<Vec<Coordinate>, InputError> {
    let value: serde_json::Value = serde_json::from_str(text)?;

    if value.get("type").is_some() {
        let geojson = geojson::GeoJson::from_json_value(value)
            .map_err(|e| no_polygon(format!("invalid GeoJSON: {e}")))?;
        return from_geojson(geojson);
    }

    let list = match value.get("coordinates") {
        Some(coordinates) => coordinates.clone(),
        None => value,
    };
    from_coordinate_list(list)
}

fn from_geojson(geojson: geojson::GeoJson) -> Result<Vec<Coordinate>, InputError> {
    let geometry = match geojson {
        geojson::GeoJson::Geometry(geometry) => Some(geometry),
        geojson::GeoJson::Feature(feature) => feature.geometry,
        geojson::GeoJson::FeatureCollection(collection) => collection
            .features
            .into_iter()
            .filter_map(|f| f.geometry)
            .find(|g| {
                matches!(
                    g.value,
                    geojson::Value::Polygon(_) | geojson::Value::MultiPolygon(_)
                )
            }),
    };

    let outer_ring = match geometry.map(|g| g.value) {
        Some(geojson::Value::Polygon(rings)) => rings.into_iter().next(),
        Some(geojson::Value::MultiPolygon(polygons)) => polygons
            .into_iter()
            .next()
            .and_then(|rings| rings.into_iter().next()),
        _ => None,
    }
    .ok_or_else(|| no_polygon("GeoJSON has no Polygon or MultiPolygon geometry"))?;

    outer_ring
        .iter()
        .map(|position| match position.as_slice() {
            [lon, lat, ..] => Ok(Coordinate::new(*lon, *lat)),
            _ => Err(no_polygon("GeoJSON position has fewer than 2 values")),
        })
        .collect()
}

fn from_coordinate_list(list: serde_json::Value) -> Result<Vec<Coordinate>, InputError> {
    if let Ok(coordinates) = serde_json::from_value::<Vec<Coordinate>>(list.clone()) {
        return Ok(coordinates);
    }

    let pairs: Vec<[f64; 2]> = serde_json::from_value(list).map_err(|_| {
        no_polygon("expected an array of {longitude, latitude} objects or [lon, lat] pairs")
    })?;
    Ok(pairs
        .into_iter()
        .map(|[lon, lat]| Coordinate::new(lon, lat))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_geojson_feature() {
        let text = r#"{
            "type": "Feature",
            "properties": {},
            "geometry": {
                "type": "Polygon",
                "coordinates": [[[-1.26, 51.74], [-1.25, 51.74], [-1.25, 51.75], [-1.26, 51.74]]]
            }
        }"#;
        let coordinates = parse_polygon(text).unwrap();
        assert_eq!(coordinates.len(), 4);
        assert_eq!(coordinates[1], Coordinate::new(-1.25, 51.74));
    }

    #[test]
    fn reads_first_polygon_of_collection() {
        let text = r#"{
            "type": "FeatureCollection",
            "features": [
                { "type": "Feature", "properties": {},
                  "geometry": { "type": "Point", "coordinates": [0.0, 0.0] } },
                { "type": "Feature", "properties": {},
                  "geometry": { "type": "Polygon",
                                "coordinates": [[[1.0, 1.0], [2.0, 1.0], [2.0, 2.0], [1.0, 1.0]]] } }
            ]
        }"#;
        let coordinates = parse_polygon(text).unwrap();
        assert_eq!(coordinates[0], Coordinate::new(1.0, 1.0));
    }

    #[test]
    fn reads_request_body_and_pairs() {
        let body = r#"{ "coordinates": [
            { "longitude": 1.0, "latitude": 2.0, "height": 5.0 },
            { "longitude": 1.1, "latitude": 2.0 },
            { "longitude": 1.1, "latitude": 2.1 }
        ] }"#;
        assert_eq!(parse_polygon(body).unwrap().len(), 3);

        let pairs = "[[1.0, 2.0], [1.1, 2.0], [1.1, 2.1]]";
        assert_eq!(parse_polygon(pairs).unwrap()[2], Coordinate::new(1.1, 2.1));
    }

    #[test]
    fn point_geometry_is_not_a_polygon() {
        let text = r#"{ "type": "Point", "coordinates": [0.0, 0.0] }"#;
        assert!(matches!(
            parse_polygon(text),
            Err(InputError::NoPolygon { .. })
        ));
    }
}
