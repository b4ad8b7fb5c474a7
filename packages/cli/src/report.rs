//! Plain-text reports for point predictions.

use std::fmt::Write as _;

use erosion_map_predict_models::{CarbonPrediction, CropYieldPrediction, InputOrigin};

const WIDTH: usize = 40;

fn origin_note(origin: InputOrigin) -> &'static str {
    match origin {
        InputOrigin::Measured => "",
        InputOrigin::Fallback => " (fallback)",
    }
}

/// Location report for a carbon prediction.
#[must_use]
pub fn carbon_report(prediction: &CarbonPrediction) -> String {
    let rule = "=".repeat(WIDTH);
    let climate = &prediction.climate;
    let mut out = String::new();

    let _ = writeln!(out, "{rule}");
    let _ = writeln!(
        out,
        "LOCATION REPORT: {}, {}",
        prediction.latitude, prediction.longitude
    );
    let _ = writeln!(out, "{rule}");
    let _ = writeln!(
        out,
        "Climate Data ({} Average){}:",
        climate.period,
        origin_note(climate.origin)
    );
    let _ = writeln!(
        out,
        "  - Annual Mean Temp:   {:.1} °C",
        climate.mean_annual_temperature_c
    );
    let _ = writeln!(
        out,
        "  - Annual Mean Precip: {:.0} mm",
        climate.mean_annual_precipitation_mm
    );
    let _ = writeln!(out, "Soil Context{}:", origin_note(prediction.soil.origin));
    let _ = writeln!(out, "  - Classification:     {}", prediction.soil.classification);
    let _ = writeln!(out, "{}", "-".repeat(WIDTH));
    let _ = writeln!(out, "PREDICTED CARBON ACCUMULATION RATE:");
    let _ = writeln!(out, "  {:.4} {}", prediction.accumulation_rate, prediction.unit);
    let _ = writeln!(out, "{rule}");

    out
}

/// Report for a crop yield prediction.
#[must_use]
pub fn crop_report(prediction: &CropYieldPrediction) -> String {
    let rule = "=".repeat(WIDTH);
    let mut out = String::new();

    let _ = writeln!(out, "{rule}");
    let _ = writeln!(
        out,
        "CROP YIELD: {}, {}",
        prediction.latitude, prediction.longitude
    );
    let _ = writeln!(out, "{rule}");
    let _ = writeln!(out, "Crop: {}", prediction.crop);
    if prediction.crop_unrecognised {
        let _ = writeln!(out, "  (not in the training data, encoded as the first crop)");
    }
    let _ = writeln!(out, "Week: {}", prediction.week);
    let _ = writeln!(
        out,
        "Band data: {} nearest rows, farthest {:.1} km",
        prediction.neighbours, prediction.max_neighbour_distance_km
    );
    let _ = writeln!(out, "{}", "-".repeat(WIDTH));
    let _ = writeln!(out, "PREDICTED YIELD:");
    let _ = writeln!(out, "  {:.2} {}", prediction.yield_t_ha, prediction.unit);
    let _ = writeln!(out, "{rule}");

    out
}
