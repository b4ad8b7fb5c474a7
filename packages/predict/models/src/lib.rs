#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! Types shared by the point predictors and their callers.

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

/// Crop assumed when a crop-yield request names none.
pub const DEFAULT_CROP: &str = "Soft wheat";

/// A location and date to run point predictors for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointQuery {
    /// Latitude in decimal degrees.
    pub latitude: f64,
    /// Longitude in decimal degrees.
    pub longitude: f64,
    /// Reference date; crop yield uses its ISO week.
    pub date: NaiveDate,
    /// Crop name for yield prediction.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crop: Option<String>,
}

impl PointQuery {
    /// Builds a query for `(lat, lon)` on `date`.
    #[must_use]
    pub const fn new(latitude: f64, longitude: f64, date: NaiveDate) -> Self {
        Self {
            latitude,
            longitude,
            date,
            crop: None,
        }
    }

    /// ISO week of the query date.
    #[must_use]
    pub fn week(&self) -> u32 {
        self.date.iso_week().week()
    }

    /// Requested crop, or [`DEFAULT_CROP`].
    #[must_use]
    pub fn crop_or_default(&self) -> &str {
        self.crop.as_deref().unwrap_or(DEFAULT_CROP)
    }
}

/// Whether an input was measured or substituted.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum InputOrigin {
    /// Retrieved from the external service.
    Measured,
    /// The service failed; a fallback value was used.
    Fallback,
}

/// Climate inputs to the carbon model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClimateInputs {
    /// Annual mean temperature (°C).
    pub mean_annual_temperature_c: f64,
    /// Mean annual precipitation (mm).
    pub mean_annual_precipitation_mm: f64,
    /// Averaging period, e.g. `2014-2023`.
    pub period: String,
    /// Whether these came from the archive or the latitude fallback.
    pub origin: InputOrigin,
}

/// Soil inputs to the carbon model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SoilInputs {
    /// WRB reference soil group, e.g. `Luvisols`.
    pub classification: String,
    /// Whether this came from SoilGrids or the fallback.
    pub origin: InputOrigin,
}

/// Predicted carbon accumulation for natural forest regrowth at a point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CarbonPrediction {
    /// Latitude of the prediction.
    pub latitude: f64,
    /// Longitude of the prediction.
    pub longitude: f64,
    /// Accumulation rate in Mg C ha⁻¹ yr⁻¹.
    pub accumulation_rate: f64,
    /// Unit of `accumulation_rate`.
    pub unit: String,
    /// Climate inputs used.
    pub climate: ClimateInputs,
    /// Soil inputs used.
    pub soil: SoilInputs,
}

/// Predicted crop yield at a point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CropYieldPrediction {
    /// Latitude of the prediction.
    pub latitude: f64,
    /// Longitude of the prediction.
    pub longitude: f64,
    /// Crop name as requested.
    pub crop: String,
    /// Week of year used as a feature.
    pub week: u32,
    /// Yield in t/ha.
    pub yield_t_ha: f64,
    /// Unit of `yield_t_ha`.
    pub unit: String,
    /// Number of dataset rows averaged for band features.
    pub neighbours: usize,
    /// Distance to the farthest averaged row (km).
    pub max_neighbour_distance_km: f64,
    /// Whether the crop name was unknown to the model and encoded as 0.
    pub crop_unrecognised: bool,
}

/// One predictor's outcome inside a combined response.
///
/// Exactly one of `result` and `error` is set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
pub struct PredictionSection<T> {
    /// The prediction, when it succeeded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<T>,
    /// Why the prediction failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> PredictionSection<T> {
    /// A successful section.
    pub const fn ok(result: T) -> Self {
        Self {
            result: Some(result),
            error: None,
        }
    }

    /// A failed section.
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            result: None,
            error: Some(error.into()),
        }
    }

    /// Whether the prediction succeeded.
    #[must_use]
    pub const fn is_ok(&self) -> bool {
        self.result.is_some()
    }
}

impl<T, E: std::fmt::Display> From<Result<T, E>> for PredictionSection<T> {
    fn from(result: Result<T, E>) -> Self {
        match result {
            Ok(value) => Self::ok(value),
            Err(e) => Self::failed(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_week_and_crop() {
        let date = NaiveDate::from_ymd_opt(2025, 5, 20).unwrap();
        let query = PointQuery::new(51.519, -0.125, date);
        assert_eq!(query.week(), 21);
        assert_eq!(query.crop_or_default(), DEFAULT_CROP);
        assert!((query.latitude - 51.519).abs() < f64::EPSILON);
    }

    #[test]
    fn query_serializes_plain_degrees() {
        let date = NaiveDate::from_ymd_opt(2025, 5, 20).unwrap();
        let json = serde_json::to_value(PointQuery::new(51.5, -0.125, date)).unwrap();
        assert_eq!(json["latitude"], 51.5);
        assert_eq!(json["longitude"], -0.125);
        assert!(json.get("crop").is_none());
    }

    #[test]
    fn section_from_result() {
        let ok: PredictionSection<f64> = Ok::<_, String>(1.5).into();
        assert!(ok.is_ok());
        let failed: PredictionSection<f64> = Err::<f64, _>("model missing").into();
        assert_eq!(failed.error.as_deref(), Some("model missing"));
        let json = serde_json::to_value(&failed).unwrap();
        assert!(json.get("result").is_none());
    }
}
