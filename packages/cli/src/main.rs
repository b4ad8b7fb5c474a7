#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Command-line interface for erosion analysis and point predictions.
//!
//! ```text
//! erosion_map analyze <polygon.geojson> [--threshold 20] [--p-toggle] [--no-sensitivities]
//! erosion_map predict-carbon <lat> <lon> [--model carbon_model.json]
//! erosion_map crop-yield <lat> <lon> [--week 21] [--crop "Soft wheat"]
//! erosion_map serve
//! ```
//!
//! Running `erosion_map` with no subcommand enters interactive mode.

mod commands;
mod input;
mod interactive;
mod report;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use erosion_map_rusle_models::{DEFAULT_THRESHOLD_T_HA_YR, RusleOptions};

#[derive(Parser)]
#[command(
    name = "erosion_map",
    about = "Soil erosion analysis and point predictions"
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a soil-loss analysis on a polygon and print the JSON result
    Analyze {
        /// GeoJSON file or JSON coordinate list
        file: PathBuf,
        /// Hotspot threshold in t/ha/yr
        #[arg(long, default_value_t = DEFAULT_THRESHOLD_T_HA_YR)]
        threshold: f64,
        /// Compute the support practice factor from slope
        #[arg(long)]
        p_toggle: bool,
        /// Skip factor contributions and validation checks
        #[arg(long)]
        no_sensitivities: bool,
        /// Imagery window as YYYY-MM-DD/YYYY-MM-DD
        #[arg(long)]
        date_range: Option<String>,
    },
    /// Predict the carbon accumulation rate of forest regrowth at a point
    PredictCarbon {
        /// Latitude in decimal degrees
        #[arg(allow_negative_numbers = true)]
        lat: f64,
        /// Longitude in decimal degrees
        #[arg(allow_negative_numbers = true)]
        lon: f64,
        /// Model file (defaults to `CARBON_MODEL_PATH`)
        #[arg(long)]
        model: Option<PathBuf>,
    },
    /// Predict crop yield at a point
    CropYield {
        /// Latitude in decimal degrees
        #[arg(allow_negative_numbers = true)]
        lat: f64,
        /// Longitude in decimal degrees
        #[arg(allow_negative_numbers = true)]
        lon: f64,
        /// ISO week of the year (defaults to the current week)
        #[arg(long)]
        week: Option<u32>,
        /// Crop name
        #[arg(long)]
        crop: Option<String>,
    },
    /// Start the API server
    Serve,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    pretty_env_logger::init();
    let cli = Cli::parse();

    let Some(command) = cli.command else {
        return interactive::run().await;
    };

    match command {
        Commands::Analyze {
            file,
            threshold,
            p_toggle,
            no_sensitivities,
            date_range,
        } => {
            let defaults = RusleOptions::default();
            let options = RusleOptions {
                p_toggle,
                threshold_t_ha_yr: threshold,
                compute_sensitivities: !no_sensitivities,
                date_range: date_range.unwrap_or(defaults.date_range),
                resolution_deg: defaults.resolution_deg,
            };
            commands::analyze(&file, options).await?;
        }
        Commands::PredictCarbon { lat, lon, model } => {
            commands::predict_carbon(lat, lon, model).await?;
        }
        Commands::CropYield {
            lat,
            lon,
            week,
            crop,
        } => commands::crop_yield(lat, lon, week, crop)?,
        Commands::Serve => commands::serve().await?,
    }

    Ok(())
}
