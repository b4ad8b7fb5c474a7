//! Command implementations shared by the subcommands and interactive mode.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{Datelike as _, Utc};
use erosion_map_predict::carbon::CarbonPredictor;
use erosion_map_predict::crop::CropYieldPredictor;
use erosion_map_predict::site::HttpSiteDataProvider;
use erosion_map_predict_models::DEFAULT_CROP;
use erosion_map_rusle_models::RusleOptions;
use erosion_map_server::{ServerConfig, USER_AGENT};
use erosion_map_server_models::RusleRequest;

use crate::{input, report};

type BoxError = Box<dyn std::error::Error>;

/// Runs an analysis on the polygon in `path` and prints the result JSON.
///
/// # Errors
///
/// * If the polygon file cannot be read
/// * If the analysis is rejected or fails
pub async fn analyze(path: &Path, options: RusleOptions) -> Result<(), BoxError> {
    let coordinates = input::read_polygon(path)?;
    log::info!("Read {} vertices from {}", coordinates.len(), path.display());

    let service = erosion_map_server::build_service(&ServerConfig::from_env())?;
    let result = service
        .analyze(RusleRequest {
            coordinates,
            options,
            crop: None,
            date: None,
        })
        .await?;

    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

/// Predicts and prints the carbon accumulation rate at a point.
///
/// # Errors
///
/// * If the model cannot be loaded
/// * If the prediction fails
pub async fn predict_carbon(lat: f64, lon: f64, model: Option<PathBuf>) -> Result<(), BoxError> {
    let model = model.or_else(|| ServerConfig::from_env().carbon_model_path);

    let client = reqwest::Client::builder().user_agent(USER_AGENT).build()?;
    let site = HttpSiteDataProvider::from_registry(client)?;
    let predictor = CarbonPredictor::from_path(model.as_deref(), Arc::new(site));

    println!("Analyzing carbon potential for: Lat {lat}, Lon {lon}...");
    let prediction = predictor.predict_at(lat, lon).await?;

    print!("{}", report::carbon_report(&prediction));
    Ok(())
}

/// Predicts and prints crop yield at a point.
///
/// `week` defaults to the current ISO week and `crop` to the default crop.
///
/// # Errors
///
/// * If the model or dataset cannot be loaded
/// * If the prediction fails
pub fn crop_yield(
    lat: f64,
    lon: f64,
    week: Option<u32>,
    crop: Option<String>,
) -> Result<(), BoxError> {
    let config = ServerConfig::from_env();
    let predictor = CropYieldPredictor::from_paths(
        config.crop_model_path.as_deref(),
        config.crop_data_path.as_deref(),
    );

    let week = week.unwrap_or_else(|| Utc::now().iso_week().week());
    let crop = crop.unwrap_or_else(|| DEFAULT_CROP.to_string());
    let prediction = predictor.predict_at(lat, lon, week, &crop)?;

    print!("{}", report::crop_report(&prediction));
    Ok(())
}

/// Starts the API server on its own actix system.
///
/// # Errors
///
/// * If the server fails to start or stops with an error
pub async fn serve() -> Result<(), BoxError> {
    // actix-web brings its own runtime; run it off the tokio worker.
    tokio::task::spawn_blocking(|| {
        actix_web::rt::System::new().block_on(erosion_map_server::run_server())
    })
    .await??;
    Ok(())
}
