#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Actix-Web API server for the erosion map application.
//!
//! Serves the soil-loss analysis endpoint, which fans out to the RUSLE
//! pipeline, the point predictors, and reverse geocoding, plus direct
//! point prediction endpoints and static factor/limit descriptions.

mod handlers;
pub mod service;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use actix_cors::Cors;
use actix_web::{App, HttpServer, middleware, web};
use erosion_map_predict::carbon::CarbonPredictor;
use erosion_map_predict::crop::CropYieldPredictor;
use erosion_map_predict::site::HttpSiteDataProvider;
use erosion_map_source::HttpCovariateFetcher;

pub use service::{AnalysisError, AnalysisService};

/// User agent sent to every upstream service; Nominatim requires one.
pub const USER_AGENT: &str = concat!("erosion-map/", env!("CARGO_PKG_VERSION"));

/// Process settings read from the environment.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Interface to bind.
    pub bind_addr: String,
    /// Port to listen on.
    pub port: u16,
    /// Carbon model JSON.
    pub carbon_model_path: Option<PathBuf>,
    /// Crop yield model JSON.
    pub crop_model_path: Option<PathBuf>,
    /// Sentinel-2 band dataset CSV for crop yield.
    pub crop_data_path: Option<PathBuf>,
    /// Time budget of each point predictor.
    pub predictor_timeout: Duration,
    /// Time budget of the soil-loss pipeline.
    pub rusle_timeout: Duration,
    /// Nominatim reverse endpoint; empty disables reverse geocoding.
    pub reverse_geocode_url: String,
}

impl ServerConfig {
    /// Reads `BIND_ADDR`, `PORT`, `CARBON_MODEL_PATH`, `CROP_MODEL_PATH`,
    /// `CROP_DATA_PATH`, `PREDICTOR_TIMEOUT_SECS`, `RUSLE_TIMEOUT_SECS`,
    /// and `NOMINATIM_REVERSE_URL`.
    #[must_use]
    pub fn from_env() -> Self {
        let secs = |name: &str, default: Duration| {
            std::env::var(name)
                .ok()
                .and_then(|v| v.parse().ok())
                .map_or(default, Duration::from_secs)
        };
        let path = |name: &str| std::env::var_os(name).map(PathBuf::from);

        Self {
            bind_addr: std::env::var("BIND_ADDR").unwrap_or_else(|_| "127.0.0.1".to_string()),
            port: std::env::var("PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(8080),
            carbon_model_path: path("CARBON_MODEL_PATH"),
            crop_model_path: path("CROP_MODEL_PATH"),
            crop_data_path: path("CROP_DATA_PATH"),
            predictor_timeout: secs("PREDICTOR_TIMEOUT_SECS", service::DEFAULT_PREDICTOR_TIMEOUT),
            rusle_timeout: secs("RUSLE_TIMEOUT_SECS", service::DEFAULT_RUSLE_TIMEOUT),
            reverse_geocode_url: std::env::var("NOMINATIM_REVERSE_URL")
                .unwrap_or_else(|_| erosion_map_geocoder::DEFAULT_REVERSE_URL.to_string()),
        }
    }
}

/// Builds the production service: HTTP covariate fetcher, predictors
/// loaded from the configured paths, and reverse geocoding.
///
/// Missing model files leave the matching predictor unavailable; the
/// service still starts.
///
/// # Errors
///
/// * If the HTTP client cannot be built
/// * If the site data services are missing from the registry
pub fn build_service(config: &ServerConfig) -> std::io::Result<AnalysisService> {
    let client = reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .connect_timeout(Duration::from_secs(10))
        .build()
        .map_err(std::io::Error::other)?;

    let site = HttpSiteDataProvider::from_registry(client.clone()).map_err(std::io::Error::other)?;
    let carbon = CarbonPredictor::from_path(config.carbon_model_path.as_deref(), Arc::new(site));
    let crop_yield = CropYieldPredictor::from_paths(
        config.crop_model_path.as_deref(),
        config.crop_data_path.as_deref(),
    );

    log::info!(
        "Predictors: carbon {}, crop yield {}",
        if carbon.is_available() { "loaded" } else { "unavailable" },
        if crop_yield.is_available() { "loaded" } else { "unavailable" },
    );

    let fetcher = HttpCovariateFetcher::from_env(client.clone());

    let service = AnalysisService::new(client, Arc::new(fetcher), Arc::new(crop_yield), Arc::new(carbon))
        .with_timeouts(config.rusle_timeout, config.predictor_timeout);

    Ok(if config.reverse_geocode_url.is_empty() {
        service
    } else {
        service.with_reverse_geocode_url(config.reverse_geocode_url.clone())
    })
}

/// Routes under `/api`.
#[must_use]
pub fn api_scope() -> actix_web::Scope {
    web::scope("/api")
        .route("/health", web::get().to(handlers::health))
        .route("/factors", web::get().to(handlers::factors))
        .route("/limits", web::get().to(handlers::limits))
        .route("/rusle", web::post().to(handlers::rusle))
        .route("/predict/carbon", web::post().to(handlers::predict_carbon))
        .route("/predict/crop-yield", web::post().to(handlers::predict_crop_yield))
}

/// Starts the erosion map API server.
///
/// Reads [`ServerConfig`] from the environment, builds the
/// [`AnalysisService`], and starts the Actix-Web HTTP server. The caller
/// provides the async runtime (e.g. via `#[actix_web::main]`) and
/// initializes logging.
///
/// # Errors
///
/// * If the service cannot be built
/// * If the HTTP server fails to bind or encounters a runtime error
#[allow(clippy::future_not_send)]
pub async fn run_server() -> std::io::Result<()> {
    let config = ServerConfig::from_env();
    let state = web::Data::new(build_service(&config)?);

    log::info!("Starting server on {}:{}", config.bind_addr, config.port);

    HttpServer::new(move || {
        let cors = Cors::permissive();

        App::new()
            .wrap(cors)
            .wrap(middleware::Logger::default())
            .app_data(state.clone())
            .app_data(web::JsonConfig::default().limit(1 << 20))
            .service(api_scope())
    })
    .bind((config.bind_addr, config.port))?
    .run()
    .await
}
