//! Orchestration of one analysis request.
//!
//! [`AnalysisService`] is built once at startup and shared by every
//! request. A request validates its polygon and options up front, then
//! runs the soil-loss pipeline, both point predictors, and reverse
//! geocoding concurrently. Only a soil-loss failure fails the request.

use std::sync::Arc;
use std::time::{Duration, Instant};

use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use chrono::Utc;
use erosion_map_geocoder::{Location, nominatim};
use erosion_map_geometry::{GeometryError, GeometryLimits, NormalizedPolygon};
use erosion_map_predict::{PredictError, Predictor};
use erosion_map_predict_models::{
    CarbonPrediction, CropYieldPrediction, PointQuery, PredictionSection,
};
use erosion_map_rusle::RusleError;
use erosion_map_rusle_models::{RusleOptions, RusleResult};
use erosion_map_server_models::{
    AnalysisResult, CoverageInfo, ErrorResponse, Predictions, RusleRequest,
};
use erosion_map_source::CovariateFetcher;
use thiserror::Error;

/// Default time budget of the soil-loss pipeline.
pub const DEFAULT_RUSLE_TIMEOUT: Duration = Duration::from_secs(120);

/// Default time budget of each point predictor and of reverse geocoding.
pub const DEFAULT_PREDICTOR_TIMEOUT: Duration = Duration::from_secs(30);

/// Errors that fail a whole analysis request.
#[derive(Debug, Error)]
pub enum AnalysisError {
    /// The polygon is unusable or outside request limits.
    #[error(transparent)]
    InvalidGeometry(#[from] GeometryError),

    /// An option is out of range.
    #[error("Invalid options: {message}")]
    InvalidOptions {
        /// Description of the rejected option.
        message: String,
    },

    /// The soil-loss pipeline failed or ran out of time.
    #[error("RUSLE computation failed: {message}")]
    ComputationFailed {
        /// Description of the failure.
        message: String,
    },
}

impl From<RusleError> for AnalysisError {
    fn from(e: RusleError) -> Self {
        match e {
            RusleError::InvalidOptions { message } => Self::InvalidOptions { message },
            RusleError::ComputationFailed { message } | RusleError::Grid { message } => {
                Self::ComputationFailed { message }
            }
        }
    }
}

impl AnalysisError {
    /// Error kind reported in [`ErrorResponse::error`].
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::InvalidGeometry(_) => "InvalidGeometry",
            Self::InvalidOptions { .. } => "InvalidOptions",
            Self::ComputationFailed { .. } => "ComputationFailed",
        }
    }
}

impl ResponseError for AnalysisError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidGeometry(_) | Self::InvalidOptions { .. } => StatusCode::BAD_REQUEST,
            Self::ComputationFailed { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let detail = match self {
            Self::InvalidGeometry(_) | Self::InvalidOptions { .. } => self.to_string(),
            Self::ComputationFailed { .. } => {
                "Soil-loss computation failed. Please try again later.".to_string()
            }
        };
        HttpResponse::build(self.status_code()).json(ErrorResponse::new(self.kind(), detail))
    }
}

/// Shared state behind every API request.
pub struct AnalysisService {
    client: reqwest::Client,
    fetcher: Arc<dyn CovariateFetcher>,
    crop_yield: Arc<dyn Predictor<Output = CropYieldPrediction>>,
    carbon: Arc<dyn Predictor<Output = CarbonPrediction>>,
    reverse_geocode_url: Option<String>,
    limits: GeometryLimits,
    rusle_timeout: Duration,
    predictor_timeout: Duration,
}

impl std::fmt::Debug for AnalysisService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnalysisService")
            .field("reverse_geocode_url", &self.reverse_geocode_url)
            .field("limits", &self.limits)
            .field("rusle_timeout", &self.rusle_timeout)
            .field("predictor_timeout", &self.predictor_timeout)
            .finish_non_exhaustive()
    }
}

impl AnalysisService {
    /// Creates a service with default limits and timeouts and reverse
    /// geocoding disabled.
    #[must_use]
    pub fn new(
        client: reqwest::Client,
        fetcher: Arc<dyn CovariateFetcher>,
        crop_yield: Arc<dyn Predictor<Output = CropYieldPrediction>>,
        carbon: Arc<dyn Predictor<Output = CarbonPrediction>>,
    ) -> Self {
        Self {
            client,
            fetcher,
            crop_yield,
            carbon,
            reverse_geocode_url: None,
            limits: GeometryLimits::default(),
            rusle_timeout: DEFAULT_RUSLE_TIMEOUT,
            predictor_timeout: DEFAULT_PREDICTOR_TIMEOUT,
        }
    }

    /// Enables reverse geocoding of polygon centroids against `url`.
    #[must_use]
    pub fn with_reverse_geocode_url(mut self, url: impl Into<String>) -> Self {
        self.reverse_geocode_url = Some(url.into());
        self
    }

    /// Sets the soil-loss and per-predictor time budgets.
    #[must_use]
    pub const fn with_timeouts(mut self, rusle: Duration, predictor: Duration) -> Self {
        self.rusle_timeout = rusle;
        self.predictor_timeout = predictor;
        self
    }

    /// Replaces the polygon limits.
    #[must_use]
    pub const fn with_limits(mut self, limits: GeometryLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Polygon limits in force.
    #[must_use]
    pub const fn limits(&self) -> &GeometryLimits {
        &self.limits
    }

    /// Soil-loss time budget.
    #[must_use]
    pub const fn rusle_timeout(&self) -> Duration {
        self.rusle_timeout
    }

    /// Per-predictor time budget.
    #[must_use]
    pub const fn predictor_timeout(&self) -> Duration {
        self.predictor_timeout
    }

    /// Whether the carbon predictor can answer.
    #[must_use]
    pub fn carbon_available(&self) -> bool {
        self.carbon.is_available()
    }

    /// Whether the crop yield predictor can answer.
    #[must_use]
    pub fn crop_yield_available(&self) -> bool {
        self.crop_yield.is_available()
    }

    /// Runs a full analysis.
    ///
    /// # Errors
    ///
    /// * [`AnalysisError::InvalidGeometry`] if the polygon is degenerate
    ///   or outside the limits
    /// * [`AnalysisError::InvalidOptions`] if an option is out of range
    /// * [`AnalysisError::ComputationFailed`] if the soil-loss pipeline
    ///   fails or times out
    pub async fn analyze(&self, request: RusleRequest) -> Result<AnalysisResult, AnalysisError> {
        let started = Instant::now();

        let polygon = erosion_map_geometry::normalize(&request.coordinates)?;
        erosion_map_geometry::check_limits(&polygon, &self.limits)?;
        erosion_map_rusle::validate_options(&request.options)?;

        let (lon, lat) = polygon.centroid;
        let query = PointQuery {
            latitude: lat,
            longitude: lon,
            date: request.date.unwrap_or_else(|| Utc::now().date_naive()),
            crop: request.crop,
        };

        log::info!(
            "Analyzing {:.3} km² polygon centred on ({lat:.5}, {lon:.5})",
            polygon.area_km2
        );

        let (rusle, crop_yield, carbon, location) = tokio::join!(
            self.run_rusle(&polygon, &request.options),
            self.predict_section(self.crop_yield.as_ref(), &query),
            self.predict_section(self.carbon.as_ref(), &query),
            self.locate(lat, lon),
        );
        let rusle = rusle?;

        let degraded_factors = rusle
            .factors
            .iter()
            .filter(|(_, stats)| stats.degraded)
            .map(|(factor, _)| factor)
            .collect();
        let coverage = CoverageInfo {
            valid_fraction: rusle.erosion.coverage,
            grid: rusle.grid,
            degraded_factors,
        };
        let num_hotspots = rusle.hotspots.len();

        let computation_time_sec = started.elapsed().as_secs_f64();
        log::info!(
            "Analysis finished in {computation_time_sec:.2}s: mean {:.2} t/ha/yr, {num_hotspots} hotspots",
            rusle.erosion.mean
        );

        Ok(AnalysisResult {
            success: true,
            computation_time_sec,
            timestamp: Utc::now(),
            polygon: polygon.to_feature(),
            polygon_metadata: polygon.metadata(),
            location,
            erosion: rusle.erosion,
            factors: rusle.factors,
            highlights: rusle.hotspots,
            num_hotspots,
            hotspot_summary: rusle.hotspot_summary,
            validation: rusle.validation,
            coverage,
            substitutions: rusle.substitutions,
            predictions: Predictions {
                crop_yield,
                carbon_sequestration: carbon,
            },
        })
    }

    /// Predicts the carbon accumulation rate at a point.
    ///
    /// # Errors
    ///
    /// * If the predictor fails or exceeds its time budget
    pub async fn predict_carbon(&self, query: &PointQuery) -> Result<CarbonPrediction, PredictError> {
        self.predict_within(self.carbon.as_ref(), query).await
    }

    /// Predicts crop yield at a point.
    ///
    /// # Errors
    ///
    /// * If the predictor fails or exceeds its time budget
    pub async fn predict_crop_yield(
        &self,
        query: &PointQuery,
    ) -> Result<CropYieldPrediction, PredictError> {
        self.predict_within(self.crop_yield.as_ref(), query).await
    }

    async fn run_rusle(
        &self,
        polygon: &NormalizedPolygon,
        options: &RusleOptions,
    ) -> Result<RusleResult, AnalysisError> {
        let result = tokio::time::timeout(
            self.rusle_timeout,
            erosion_map_rusle::run(self.fetcher.as_ref(), polygon, options),
        )
        .await
        .map_err(|_| AnalysisError::ComputationFailed {
            message: format!("timed out after {}s", self.rusle_timeout.as_secs()),
        })?;

        result.map_err(|e| {
            log::error!("Soil-loss pipeline failed: {e}");
            AnalysisError::from(e)
        })
    }

    async fn predict_within<T: Send>(
        &self,
        predictor: &dyn Predictor<Output = T>,
        query: &PointQuery,
    ) -> Result<T, PredictError> {
        tokio::time::timeout(self.predictor_timeout, predictor.predict(query))
            .await
            .map_err(|_| PredictError::Timeout {
                what: format!("{} prediction", predictor.section()),
            })?
    }

    async fn predict_section<T: Send>(
        &self,
        predictor: &dyn Predictor<Output = T>,
        query: &PointQuery,
    ) -> PredictionSection<T> {
        let result = self.predict_within(predictor, query).await;
        if let Err(e) = &result {
            log::warn!("{} prediction failed: {e}", predictor.section());
        }
        result.into()
    }

    async fn locate(&self, lat: f64, lon: f64) -> Option<Location> {
        let url = self.reverse_geocode_url.as_deref()?;

        match tokio::time::timeout(
            self.predictor_timeout,
            nominatim::reverse_geocode(&self.client, url, lat, lon),
        )
        .await
        {
            Ok(Ok(location)) => location,
            Ok(Err(e)) => {
                log::warn!("Reverse geocoding ({lat}, {lon}) failed: {e}");
                None
            }
            Err(_) => {
                log::warn!("Reverse geocoding ({lat}, {lon}) timed out");
                None
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use async_trait::async_trait;
    use erosion_map_predict_models::{ClimateInputs, InputOrigin, SoilInputs};
    use erosion_map_rusle_models::{Coordinate, DateRange, Factor};
    use erosion_map_source::soil_grids::SoilCell;
    use erosion_map_source::{CovariateGrid, Covariates, GridSpec};

    pub struct FakeFetcher {
        pub ndvi: f64,
        pub imagery_timed_out: bool,
    }

    #[async_trait]
    impl CovariateFetcher for FakeFetcher {
        async fn fetch(&self, grid: &GridSpec, _date_range: &DateRange) -> Covariates {
            let mut substitutions = Vec::new();
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
                rainfall: CovariateGrid::filled(grid, 900.0, "Open-Meteo (test)", false),
                soil: CovariateGrid::filled(grid, SoilCell::RegionalK(0.03), "Regional defaults", true),
                elevation: CovariateGrid::filled(grid, f64::NAN, "Constant (no DEM)", true),
                ndvi,
                substitutions,
            }
        }
    }

    pub struct FakeCarbon {
        pub fail: bool,
    }

    #[async_trait]
    impl Predictor for FakeCarbon {
        type Output = CarbonPrediction;

        fn section(&self) -> &'static str {
            "carbon_sequestration"
        }

        fn is_available(&self) -> bool {
            !self.fail
        }

        async fn predict(&self, query: &PointQuery) -> Result<CarbonPrediction, PredictError> {
            if self.fail {
                return Err(PredictError::ModelUnavailable {
                    message: "carbon model not loaded".to_string(),
                });
            }
            Ok(CarbonPrediction {
                latitude: query.latitude,
                longitude: query.longitude,
                accumulation_rate: 1.5514,
                unit: "Mg C ha⁻¹ yr⁻¹".to_string(),
                climate: ClimateInputs {
                    mean_annual_temperature_c: 10.9,
                    mean_annual_precipitation_mm: 741.0,
                    period: "2014-2023".to_string(),
                    origin: InputOrigin::Measured,
                },
                soil: SoilInputs {
                    classification: "Luvisols".to_string(),
                    origin: InputOrigin::Measured,
                },
            })
        }
    }

    /// Never answers, so only the time budget ends it.
    pub struct StalledCropYield;

    #[async_trait]
    impl Predictor for StalledCropYield {
        type Output = CropYieldPrediction;

        fn section(&self) -> &'static str {
            "crop_yield"
        }

        fn is_available(&self) -> bool {
            true
        }

        async fn predict(&self, _query: &PointQuery) -> Result<CropYieldPrediction, PredictError> {
            std::future::pending().await
        }
    }

    pub fn service(ndvi: f64, imagery_timed_out: bool, carbon_fails: bool) -> AnalysisService {
        AnalysisService::new(
            reqwest::Client::new(),
            Arc::new(FakeFetcher {
                ndvi,
                imagery_timed_out,
            }),
            Arc::new(StalledCropYield),
            Arc::new(FakeCarbon { fail: carbon_fails }),
        )
        .with_timeouts(Duration::from_secs(30), Duration::from_millis(50))
    }

    pub fn square() -> Vec<Coordinate> {
        vec![
            Coordinate::new(-1.26, 51.74),
            Coordinate::new(-1.25, 51.74),
            Coordinate::new(-1.25, 51.75),
            Coordinate::new(-1.26, 51.75),
        ]
    }

    fn request(coordinates: Vec<Coordinate>) -> RusleRequest {
        RusleRequest {
            coordinates,
            options: RusleOptions::default(),
            crop: None,
            date: None,
        }
    }

    #[tokio::test]
    async fn merges_pipeline_and_predictions() {
        let result = service(0.0, false, false)
            .analyze(request(square()))
            .await
            .unwrap();

        assert!(result.success);
        assert!(result.erosion.mean > 20.0);
        assert_eq!(result.num_hotspots, result.highlights.len());
        assert!(result.location.is_none());
        assert_eq!(result.polygon_metadata.num_vertices, 5);

        let carbon = result.predictions.carbon_sequestration.result.unwrap();
        assert!((carbon.accumulation_rate - 1.5514).abs() < 1e-12);
        assert!((carbon.latitude - 51.745).abs() < 1e-9);

        let crop = &result.predictions.crop_yield;
        assert!(crop.result.is_none());
        assert!(crop.error.as_deref().unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn predictor_failure_is_recorded_per_section() {
        let result = service(0.6, false, true)
            .analyze(request(square()))
            .await
            .unwrap();

        let carbon = &result.predictions.carbon_sequestration;
        assert!(!carbon.is_ok());
        assert!(carbon.error.as_deref().unwrap().contains("carbon model not loaded"));
    }

    #[tokio::test]
    async fn imagery_timeout_degrades_cover() {
        let result = service(0.0, true, false)
            .analyze(request(square()))
            .await
            .unwrap();

        assert!(result.factors.c.degraded);
        assert!(result.coverage.degraded_factors.contains(&Factor::C));
        assert!(result.substitutions.iter().any(|s| s.starts_with("C:")));
        assert!((result.coverage.valid_fraction - 1.0).abs() < 1e-12);
    }

    #[tokio::test]
    async fn degenerate_polygon_is_invalid_geometry() {
        let err = service(0.5, false, false)
            .analyze(request(vec![
                Coordinate::new(-1.26, 51.74),
                Coordinate::new(-1.25, 51.75),
            ]))
            .await
            .unwrap_err();

        assert!(matches!(err, AnalysisError::InvalidGeometry(_)));
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(err.kind(), "InvalidGeometry");
    }

    #[tokio::test]
    async fn out_of_range_threshold_is_invalid_options() {
        let mut request = request(square());
        request.options.threshold_t_ha_yr = 0.0;
        let err = service(0.5, false, false).analyze(request).await.unwrap_err();

        assert!(matches!(err, AnalysisError::InvalidOptions { .. }));
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn computation_failure_hides_detail() {
        let err = AnalysisError::from(RusleError::Grid {
            message: "ndvi is 3x3, expected 4x4".to_string(),
        });
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.kind(), "ComputationFailed");
    }
}
