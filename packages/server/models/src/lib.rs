#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! API request and response types for the erosion map server.
//!
//! These types are serialized to JSON for the REST API. They wrap the
//! pipeline and predictor types so that the API contract can evolve
//! independently of the computation.

use chrono::{DateTime, NaiveDate, Utc};
use erosion_map_geocoder::Location;
use erosion_map_predict_models::{CarbonPrediction, CropYieldPrediction, PredictionSection};
use erosion_map_rusle_models::{
    Coordinate, ErosionStats, Factor, FactorSet, FactorStats, GridSummary, Hotspot,
    HotspotSummary, PolygonMetadata, RusleOptions, ValidationMetrics,
};
use serde::{Deserialize, Serialize};

/// Body of `POST /api/rusle`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RusleRequest {
    /// Polygon vertices in drawing order.
    pub coordinates: Vec<Coordinate>,
    /// Computation options.
    #[serde(default)]
    pub options: RusleOptions,
    /// Crop for the yield prediction.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crop: Option<String>,
    /// Reference date for the point predictions (defaults to today).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<NaiveDate>,
}

/// How much of the polygon the analysis actually covers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoverageInfo {
    /// Fraction of in-polygon cells with every factor defined.
    pub valid_fraction: f64,
    /// Analysis grid shape.
    pub grid: GridSummary,
    /// Factors computed from substituted default data.
    pub degraded_factors: Vec<Factor>,
}

/// Results of the point predictors run at the polygon centroid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Predictions {
    /// Crop yield section.
    pub crop_yield: PredictionSection<CropYieldPrediction>,
    /// Carbon accumulation section.
    pub carbon_sequestration: PredictionSection<CarbonPrediction>,
}

/// Full response of `POST /api/rusle`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    /// Always `true`; failures use [`ErrorResponse`].
    pub success: bool,
    /// Wall-clock time spent on the request.
    pub computation_time_sec: f64,
    /// When the response was produced.
    pub timestamp: DateTime<Utc>,
    /// Normalized input polygon as a `GeoJSON` Feature.
    pub polygon: geojson::Feature,
    /// Polygon measurements.
    pub polygon_metadata: PolygonMetadata,
    /// Place name of the centroid, if reverse geocoding succeeded.
    pub location: Option<Location>,
    /// Soil-loss statistics.
    pub erosion: ErosionStats,
    /// Per-factor statistics.
    pub factors: FactorSet<FactorStats>,
    /// Hotspots in discovery order.
    pub highlights: Vec<Hotspot>,
    /// Number of hotspots.
    pub num_hotspots: usize,
    /// Hotspot roll-up.
    pub hotspot_summary: HotspotSummary,
    /// Sanity checks, present when sensitivities were requested.
    pub validation: Option<ValidationMetrics>,
    /// Coverage and degradation summary.
    pub coverage: CoverageInfo,
    /// Data sources that failed and were replaced by defaults.
    pub substitutions: Vec<String>,
    /// Point predictions at the centroid.
    pub predictions: Predictions,
}

/// Error body returned with every non-2xx response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Always `false`.
    pub success: bool,
    /// Error kind, e.g. `InvalidGeometry`.
    pub error: String,
    /// Human-readable explanation.
    pub detail: String,
    /// When the error was produced.
    pub timestamp: DateTime<Utc>,
}

impl ErrorResponse {
    /// Builds an error body stamped with the current time.
    #[must_use]
    pub fn new(error: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            success: false,
            error: error.into(),
            detail: detail.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Body of `POST /api/predict/carbon`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PredictCarbonRequest {
    /// Latitude in decimal degrees.
    pub latitude: f64,
    /// Longitude in decimal degrees.
    pub longitude: f64,
}

/// Body of `POST /api/predict/crop-yield`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictCropYieldRequest {
    /// Latitude in decimal degrees.
    pub latitude: f64,
    /// Longitude in decimal degrees.
    pub longitude: f64,
    /// ISO week of the current year; overrides `date`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub week: Option<u32>,
    /// Reference date (defaults to today).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<NaiveDate>,
    /// Crop name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crop: Option<String>,
}

/// Response of `GET /api/health`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiHealth {
    /// Whether the server is healthy.
    pub healthy: bool,
    /// Server version.
    pub version: String,
    /// Whether the carbon model is loaded.
    pub carbon_model_loaded: bool,
    /// Whether the crop yield model and dataset are loaded.
    pub crop_model_loaded: bool,
}

/// Description of one factor for `GET /api/factors`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FactorInfo {
    /// Human-readable name.
    pub name: String,
    /// Physical unit.
    pub unit: String,
    /// Data source and method.
    pub source: String,
}

/// Response of `GET /api/factors`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FactorsInfo {
    /// One entry per factor.
    pub factors: FactorSet<FactorInfo>,
    /// The soil-loss equation.
    pub equation: String,
    /// Unit of the computed soil loss.
    pub output_unit: String,
}

/// Response of `GET /api/limits`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LimitsInfo {
    /// Maximum vertices in the closed ring.
    pub max_vertices: usize,
    /// Minimum polygon area (km²).
    pub min_polygon_area_km2: f64,
    /// Maximum polygon area (km²).
    pub max_polygon_area_km2: f64,
    /// Maximum bounding-box aspect ratio.
    pub max_aspect_ratio: f64,
    /// Longest imagery window in days.
    pub max_date_range_days: i64,
    /// Highest accepted hotspot threshold.
    pub max_threshold_t_ha_yr: f64,
    /// Largest grid edge in cells.
    pub max_grid_dim: usize,
    /// Time budget of the soil-loss pipeline.
    pub computation_timeout_sec: u64,
    /// Time budget of each point predictor.
    pub predictor_timeout_sec: u64,
}
