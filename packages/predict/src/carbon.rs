//! Carbon accumulation rate of natural forest regrowth at a point.
//!
//! The model takes location, 10-year climate normals, and the WRB soil
//! group. Climate and soil come from a [`SiteDataProvider`]; when either
//! lookup fails a fallback is used and flagged in the result.

use std::path::Path;
use std::sync::Arc;

use erosion_map_predict_models::{
    CarbonPrediction, ClimateInputs, InputOrigin, SoilInputs,
};

use crate::PredictError;
use crate::model::{Features, TreeEnsemble};
use crate::site::SiteDataProvider;

/// Unit of the predicted rate.
pub const CARBON_UNIT: &str = "Mg C ha⁻¹ yr⁻¹";

/// Soil group assumed when classification fails.
pub const FALLBACK_SOIL: &str = "Inceptisols";

/// Annual precipitation assumed when the climate archive fails (mm).
pub const FALLBACK_PRECIPITATION_MM: f64 = 1000.0;

/// Rough annual mean temperature from latitude alone (°C).
#[must_use]
pub fn fallback_temperature_c(lat: f64) -> f64 {
    0.5f64.mul_add(-lat.abs(), 25.0)
}

/// Predicts carbon accumulation rates.
pub struct CarbonPredictor {
    model: Option<TreeEnsemble>,
    site: Arc<dyn SiteDataProvider>,
}

impl std::fmt::Debug for CarbonPredictor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CarbonPredictor")
            .field("model_loaded", &self.model.is_some())
            .finish_non_exhaustive()
    }
}

impl CarbonPredictor {
    /// Creates a predictor. Without a model every prediction fails with
    /// [`PredictError::ModelUnavailable`].
    #[must_use]
    pub fn new(model: Option<TreeEnsemble>, site: Arc<dyn SiteDataProvider>) -> Self {
        Self { model, site }
    }

    /// Creates a predictor from a model file, logging and continuing
    /// without a model if it cannot be loaded.
    #[must_use]
    pub fn from_path(path: Option<&Path>, site: Arc<dyn SiteDataProvider>) -> Self {
        let model = path.and_then(|path| {
            TreeEnsemble::load(path)
                .inspect_err(|e| log::warn!("Carbon model unavailable: {e}"))
                .ok()
        });
        Self::new(model, site)
    }

    /// Whether a model is loaded.
    #[must_use]
    pub const fn is_available(&self) -> bool {
        self.model.is_some()
    }

    /// Predicts the accumulation rate at `(lat, lon)`.
    ///
    /// # Errors
    ///
    /// * If no model is loaded
    /// * If the model cannot evaluate the sample
    pub async fn predict_at(&self, lat: f64, lon: f64) -> Result<CarbonPrediction, PredictError> {
        let model = self.model.as_ref().ok_or_else(|| PredictError::ModelUnavailable {
            message: "carbon model not loaded".to_string(),
        })?;

        let (climate, soil) = tokio::join!(self.site.climate(lat, lon), self.site.soil_class(lat, lon));

        let climate = match climate {
            Ok(normals) => ClimateInputs {
                mean_annual_temperature_c: normals.mean_temperature_c,
                mean_annual_precipitation_mm: normals.annual_precipitation_mm,
                period: self.site.climate_period(),
                origin: InputOrigin::Measured,
            },
            Err(e) => {
                log::warn!("Climate lookup failed at ({lat}, {lon}), using latitude fallback: {e}");
                ClimateInputs {
                    mean_annual_temperature_c: fallback_temperature_c(lat),
                    mean_annual_precipitation_mm: FALLBACK_PRECIPITATION_MM,
                    period: "latitude estimate".to_string(),
                    origin: InputOrigin::Fallback,
                }
            }
        };

        let soil = match soil {
            Ok(Some(classification)) => SoilInputs {
                classification,
                origin: InputOrigin::Measured,
            },
            Ok(None) => {
                log::warn!("No soil classification at ({lat}, {lon}), using {FALLBACK_SOIL}");
                fallback_soil()
            }
            Err(e) => {
                log::warn!("Soil lookup failed at ({lat}, {lon}), using {FALLBACK_SOIL}: {e}");
                fallback_soil()
            }
        };

        let features = Features::new()
            .numeric("lat_dec", lat)
            .numeric("long_dec", lon)
            .numeric("AMT", climate.mean_annual_temperature_c)
            .numeric("AMP", climate.mean_annual_precipitation_mm)
            .categorical("soil.classification", &soil.classification);

        let accumulation_rate = model.predict(&features)?;
        log::debug!("Carbon rate at ({lat}, {lon}): {accumulation_rate:.4} {CARBON_UNIT}");

        Ok(CarbonPrediction {
            latitude: lat,
            longitude: lon,
            accumulation_rate,
            unit: CARBON_UNIT.to_string(),
            climate,
            soil,
        })
    }
}

fn fallback_soil() -> SoilInputs {
    SoilInputs {
        classification: FALLBACK_SOIL.to_string(),
        origin: InputOrigin::Fallback,
    }
}
