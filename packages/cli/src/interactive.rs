//! Menu-driven mode used when no subcommand is given.

use std::path::PathBuf;

use dialoguer::{Confirm, Input, Select};
use erosion_map_predict_models::DEFAULT_CROP;
use erosion_map_rusle_models::{DEFAULT_THRESHOLD_T_HA_YR, RusleOptions};

use crate::commands;

/// Top-level actions.
enum Action {
    Analyze,
    PredictCarbon,
    CropYield,
    Serve,
}

impl Action {
    const ALL: &[Self] = &[Self::Analyze, Self::PredictCarbon, Self::CropYield, Self::Serve];

    #[must_use]
    const fn label(&self) -> &'static str {
        match self {
            Self::Analyze => "Analyze a polygon file",
            Self::PredictCarbon => "Predict carbon accumulation at a point",
            Self::CropYield => "Predict crop yield at a point",
            Self::Serve => "Start server",
        }
    }
}

fn prompt_coordinate(prompt: &str, range: std::ops::RangeInclusive<f64>) -> dialoguer::Result<f64> {
    Input::<f64>::new()
        .with_prompt(prompt)
        .validate_with(|value: &f64| {
            if range.contains(value) {
                Ok(())
            } else {
                Err(format!("must be between {} and {}", range.start(), range.end()))
            }
        })
        .interact_text()
}

/// Prompts for an action and its parameters, then runs it.
///
/// # Errors
///
/// * If a prompt fails
/// * If the chosen command fails
pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    println!("Erosion Map");
    println!();

    let labels: Vec<&str> = Action::ALL.iter().map(Action::label).collect();
    let idx = Select::new()
        .with_prompt("What would you like to do?")
        .items(&labels)
        .default(0)
        .interact()?;

    match Action::ALL[idx] {
        Action::Analyze => {
            let path: String = Input::new()
                .with_prompt("Polygon file (GeoJSON or coordinate list)")
                .interact_text()?;
            let threshold_t_ha_yr: f64 = Input::new()
                .with_prompt("Hotspot threshold (t/ha/yr)")
                .default(DEFAULT_THRESHOLD_T_HA_YR)
                .interact_text()?;
            let p_toggle = Confirm::new()
                .with_prompt("Compute support practice factor from slope?")
                .default(false)
                .interact()?;
            let compute_sensitivities = Confirm::new()
                .with_prompt("Compute factor contributions and validation?")
                .default(true)
                .interact()?;

            let options = RusleOptions {
                p_toggle,
                threshold_t_ha_yr,
                compute_sensitivities,
                ..RusleOptions::default()
            };
            commands::analyze(&PathBuf::from(path), options).await?;
        }
        Action::PredictCarbon => {
            let lat = prompt_coordinate("Latitude", -90.0..=90.0)?;
            let lon = prompt_coordinate("Longitude", -180.0..=180.0)?;
            commands::predict_carbon(lat, lon, None).await?;
        }
        Action::CropYield => {
            let lat = prompt_coordinate("Latitude", -90.0..=90.0)?;
            let lon = prompt_coordinate("Longitude", -180.0..=180.0)?;
            let crop: String = Input::new()
                .with_prompt("Crop")
                .default(DEFAULT_CROP.to_string())
                .interact_text()?;
            let week_str: String = Input::new()
                .with_prompt("ISO week (blank for current week)")
                .allow_empty(true)
                .interact_text()?;
            let week = week_str.trim().parse().ok();
            commands::crop_yield(lat, lon, week, Some(crop))?;
        }
        Action::Serve => commands::serve().await?,
    }

    Ok(())
}
