#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! Point predictors that run alongside a soil-loss analysis.
//!
//! Each predictor wraps a pretrained [`model::TreeEnsemble`] and the data
//! it needs at prediction time:
//!
//! * [`carbon::CarbonPredictor`] fetches climate normals and soil class
//!   for the point through a [`site::SiteDataProvider`].
//! * [`crop::CropYieldPredictor`] averages band values of the nearest rows
//!   of a local Sentinel-2 dataset.
//!
//! Both implement [`Predictor`] so an orchestrator can fan out to them and
//! record each failure in its own section.

pub mod carbon;
pub mod crop;
pub mod model;
pub mod site;

use async_trait::async_trait;
use erosion_map_predict_models::{CarbonPrediction, CropYieldPrediction, PointQuery};
use erosion_map_source::SourceError;
use thiserror::Error;

/// Errors from point prediction.
#[derive(Debug, Error)]
pub enum PredictError {
    /// The model or its data is not loaded.
    #[error("Model unavailable: {message}")]
    ModelUnavailable {
        /// What is missing.
        message: String,
    },

    /// Model or dataset content is unusable.
    #[error("Data error: {message}")]
    Data {
        /// Description of the problem.
        message: String,
    },

    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON parsing failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// CSV parsing failed.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// File I/O failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// An external lookup did not answer in time.
    #[error("{what} timed out")]
    Timeout {
        /// What timed out.
        what: String,
    },

    /// A site data source failed.
    #[error(transparent)]
    Source(#[from] SourceError),
}

/// A predictor the orchestrator can run for a point.
#[async_trait]
pub trait Predictor: Send + Sync {
    /// Prediction payload.
    type Output: Send;

    /// Response section this predictor fills.
    fn section(&self) -> &'static str;

    /// Whether the predictor has what it needs to answer.
    fn is_available(&self) -> bool;

    /// Predicts for `query`.
    async fn predict(&self, query: &PointQuery) -> Result<Self::Output, PredictError>;
}

#[async_trait]
impl Predictor for carbon::CarbonPredictor {
    type Output = CarbonPrediction;

    fn section(&self) -> &'static str {
        "carbon_sequestration"
    }

    fn is_available(&self) -> bool {
        Self::is_available(self)
    }

    async fn predict(&self, query: &PointQuery) -> Result<CarbonPrediction, PredictError> {
        self.predict_at(query.latitude, query.longitude).await
    }
}

#[async_trait]
impl Predictor for crop::CropYieldPredictor {
    type Output = CropYieldPrediction;

    fn section(&self) -> &'static str {
        "crop_yield"
    }

    fn is_available(&self) -> bool {
        Self::is_available(self)
    }

    async fn predict(&self, query: &PointQuery) -> Result<CropYieldPrediction, PredictError> {
        self.predict_at(
            query.latitude,
            query.longitude,
            query.week(),
            query.crop_or_default(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[tokio::test]
    async fn crop_predictor_uses_query_week_and_default_crop() {
        let predictor = crop::CropYieldPredictor::new(
            Some(model::TreeEnsemble::from_json(include_str!("../testdata/crop_model.json")).unwrap()),
            crop::BandDataset::from_reader(include_str!("../testdata/crop_bands.csv").as_bytes())
                .unwrap(),
        );
        let date = NaiveDate::from_ymd_opt(2025, 5, 20).unwrap();
        let query = PointQuery::new(51.519, -0.125, date);

        let prediction = Predictor::predict(&predictor, &query).await.unwrap();
        assert_eq!(predictor.section(), "crop_yield");
        assert_eq!(prediction.week, 21);
        assert_eq!(prediction.crop, "Soft wheat");
    }
}
