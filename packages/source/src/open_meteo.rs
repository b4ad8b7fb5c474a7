//! Open-Meteo archive and elevation clients.
//!
//! The archive endpoint accepts comma-separated coordinate lists and
//! answers with one object per location (a bare object for a single
//! location). The elevation endpoint accepts at most
//! `max_coordinates` points per call.
//!
//! See <https://open-meteo.com/en/docs/historical-weather-api> and
//! <https://open-meteo.com/en/docs/elevation-api>

use chrono::{Datelike as _, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::SourceError;

/// Long-term climate averages at one location.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClimateNormals {
    /// Mean daily temperature over the window (°C).
    pub mean_temperature_c: f64,
    /// Mean annual precipitation over the window (mm).
    pub annual_precipitation_mm: f64,
}

/// Inclusive archive window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArchiveWindow {
    /// First day.
    pub start: NaiveDate,
    /// Last day.
    pub end: NaiveDate,
}

impl ArchiveWindow {
    /// Parses `YYYY-MM-DD` bounds.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::Unavailable`] if either date is malformed.
    pub fn parse(start: &str, end: &str) -> Result<Self, SourceError> {
        let parse = |s: &str| {
            NaiveDate::parse_from_str(s, "%Y-%m-%d").map_err(|e| SourceError::Unavailable {
                message: format!("bad archive date {s:?}: {e}"),
            })
        };
        Ok(Self {
            start: parse(start)?,
            end: parse(end)?,
        })
    }

    /// Number of calendar years covered (at least 1).
    #[must_use]
    pub fn years(&self) -> f64 {
        f64::from((self.end.year() - self.start.year() + 1).max(1))
    }
}

/// Fetches climate normals for each `(lon, lat)` point in one request.
///
/// # Errors
///
/// Returns [`SourceError`] if the request fails, the service rejects it,
/// or the response has no daily data for some location.
pub async fn fetch_climate_normals(
    client: &reqwest::Client,
    base_url: &str,
    window: &ArchiveWindow,
    points: &[(f64, f64)],
) -> Result<Vec<ClimateNormals>, SourceError> {
    let latitudes = join_coords(points.iter().map(|p| p.1));
    let longitudes = join_coords(points.iter().map(|p| p.0));
    let start = window.start.to_string();
    let end = window.end.to_string();

    let resp = client
        .get(base_url)
        .query(&[
            ("latitude", latitudes.as_str()),
            ("longitude", longitudes.as_str()),
            ("start_date", start.as_str()),
            ("end_date", end.as_str()),
            ("daily", "temperature_2m_mean,precipitation_sum"),
            ("timezone", "auto"),
        ])
        .send()
        .await?;

    if !resp.status().is_success() {
        return Err(SourceError::Unavailable {
            message: format!("Open-Meteo archive returned HTTP {}", resp.status()),
        });
    }

    let body: serde_json::Value = resp.json().await?;
    parse_archive_response(&body, window.years())
}

/// Parses an archive response into one [`ClimateNormals`] per location.
fn parse_archive_response(
    body: &serde_json::Value,
    years: f64,
) -> Result<Vec<ClimateNormals>, SourceError> {
    let locations: Vec<&serde_json::Value> = match body {
        serde_json::Value::Array(items) => items.iter().collect(),
        other => vec![other],
    };

    locations
        .into_iter()
        .map(|location| {
            let daily = location.get("daily").ok_or_else(|| SourceError::Unavailable {
                message: "Open-Meteo response has no daily data".to_string(),
            })?;

            let temperatures: Vec<f64> = numeric_series(&daily["temperature_2m_mean"]);
            let precipitation: Vec<f64> = numeric_series(&daily["precipitation_sum"]);

            if temperatures.is_empty() || precipitation.is_empty() {
                return Err(SourceError::Unavailable {
                    message: "Open-Meteo daily series have no values".to_string(),
                });
            }

            #[allow(clippy::cast_precision_loss)]
            let mean_temperature_c = temperatures.iter().sum::<f64>() / temperatures.len() as f64;
            let annual_precipitation_mm = precipitation.iter().sum::<f64>() / years;

            Ok(ClimateNormals {
                mean_temperature_c,
                annual_precipitation_mm,
            })
        })
        .collect()
}

/// Fetches elevations (metres) for every `(lon, lat)` point, batching
/// `max_coordinates` points per request.
///
/// # Errors
///
/// Returns [`SourceError`] if any batch fails or returns the wrong number
/// of values.
pub async fn fetch_elevations(
    client: &reqwest::Client,
    base_url: &str,
    max_coordinates: usize,
    concurrent_requests: usize,
    points: &[(f64, f64)],
) -> Result<Vec<f64>, SourceError> {
    use futures::stream::{self, StreamExt as _};

    let requests: Vec<_> = points
        .chunks(max_coordinates.max(1))
        .map(|chunk| fetch_elevation_batch(client, base_url, chunk))
        .collect();
    let batches: Vec<Result<Vec<f64>, SourceError>> = stream::iter(requests)
        .buffered(concurrent_requests.max(1))
        .collect()
        .await;

    let mut elevations = Vec::with_capacity(points.len());
    for batch in batches {
        elevations.extend(batch?);
    }
    Ok(elevations)
}

async fn fetch_elevation_batch(
    client: &reqwest::Client,
    base_url: &str,
    chunk: &[(f64, f64)],
) -> Result<Vec<f64>, SourceError> {
    let latitudes = join_coords(chunk.iter().map(|p| p.1));
    let longitudes = join_coords(chunk.iter().map(|p| p.0));

    let resp = client
        .get(base_url)
        .query(&[
            ("latitude", latitudes.as_str()),
            ("longitude", longitudes.as_str()),
        ])
        .send()
        .await?;

    if !resp.status().is_success() {
        return Err(SourceError::Unavailable {
            message: format!("Open-Meteo elevation returned HTTP {}", resp.status()),
        });
    }

    let body: serde_json::Value = resp.json().await?;
    parse_elevation_response(&body, chunk.len())
}

fn parse_elevation_response(
    body: &serde_json::Value,
    expected: usize,
) -> Result<Vec<f64>, SourceError> {
    let values = body["elevation"]
        .as_array()
        .ok_or_else(|| SourceError::Unavailable {
            message: "Open-Meteo elevation response has no elevation array".to_string(),
        })?;

    if values.len() != expected {
        return Err(SourceError::Unavailable {
            message: format!(
                "Open-Meteo returned {} elevations for {expected} points",
                values.len()
            ),
        });
    }

    Ok(values
        .iter()
        .map(|v| v.as_f64().unwrap_or(f64::NAN))
        .collect())
}

fn numeric_series(value: &serde_json::Value) -> Vec<f64> {
    value
        .as_array()
        .map(|items| items.iter().filter_map(serde_json::Value::as_f64).collect())
        .unwrap_or_default()
}

fn join_coords(values: impl Iterator<Item = f64>) -> String {
    values
        .map(|v| format!("{v:.5}"))
        .collect::<Vec<_>>()
        .join(",")
}
