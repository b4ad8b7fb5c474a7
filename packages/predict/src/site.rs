//! Climate and soil context for a single point.

use async_trait::async_trait;
use erosion_map_source::open_meteo::{self, ArchiveWindow, ClimateNormals};
use erosion_map_source::registry::{self, ProviderConfig};
use erosion_map_source::soil_grids;

use crate::PredictError;

/// Supplies the site covariates the carbon model needs.
#[async_trait]
pub trait SiteDataProvider: Send + Sync {
    /// Multi-year climate normals at `(lat, lon)`.
    async fn climate(&self, lat: f64, lon: f64) -> Result<ClimateNormals, PredictError>;

    /// Most probable WRB soil group at `(lat, lon)`, `None` when SoilGrids
    /// has no classification there.
    async fn soil_class(&self, lat: f64, lon: f64) -> Result<Option<String>, PredictError>;

    /// Human-readable averaging period of [`Self::climate`].
    fn climate_period(&self) -> String;
}

/// Site data from the Open-Meteo archive and SoilGrids classification
/// services in the registry.
#[derive(Debug, Clone)]
pub struct HttpSiteDataProvider {
    client: reqwest::Client,
    archive_url: String,
    window: ArchiveWindow,
    classification_url: String,
    timeout: std::time::Duration,
}

impl HttpSiteDataProvider {
    /// Builds a provider from the registry's archive and SoilGrids entries.
    ///
    /// # Errors
    ///
    /// * If either service is missing from the registry
    /// * If the archive window is malformed
    pub fn from_registry(client: reqwest::Client) -> Result<Self, PredictError> {
        let archive = registry::service_by_id("open_meteo_archive").ok_or_else(|| {
            PredictError::ModelUnavailable {
                message: "open_meteo_archive service is not registered".to_string(),
            }
        })?;
        let soil = registry::service_by_id("soil_grids").ok_or_else(|| {
            PredictError::ModelUnavailable {
                message: "soil_grids service is not registered".to_string(),
            }
        })?;

        let ProviderConfig::OpenMeteoArchive {
            base_url,
            start_date,
            end_date,
            ..
        } = &archive.provider
        else {
            return Err(PredictError::Data {
                message: "open_meteo_archive has an unexpected provider type".to_string(),
            });
        };
        let ProviderConfig::SoilGrids {
            classification_url, ..
        } = &soil.provider
        else {
            return Err(PredictError::Data {
                message: "soil_grids has an unexpected provider type".to_string(),
            });
        };

        let window = ArchiveWindow::parse(start_date, end_date)?;

        Ok(Self {
            client,
            archive_url: base_url.clone(),
            window,
            classification_url: classification_url.clone(),
            timeout: archive.timeout().max(soil.timeout()),
        })
    }
}

#[async_trait]
impl SiteDataProvider for HttpSiteDataProvider {
    async fn climate(&self, lat: f64, lon: f64) -> Result<ClimateNormals, PredictError> {
        let normals = tokio::time::timeout(
            self.timeout,
            open_meteo::fetch_climate_normals(
                &self.client,
                &self.archive_url,
                &self.window,
                &[(lon, lat)],
            ),
        )
        .await
        .map_err(|_| PredictError::Timeout {
            what: "climate archive".to_string(),
        })??;

        normals.into_iter().next().ok_or_else(|| PredictError::Data {
            message: "climate archive returned no location".to_string(),
        })
    }

    async fn soil_class(&self, lat: f64, lon: f64) -> Result<Option<String>, PredictError> {
        tokio::time::timeout(
            self.timeout,
            soil_grids::fetch_classification(&self.client, &self.classification_url, lon, lat),
        )
        .await
        .map_err(|_| PredictError::Timeout {
            what: "soil classification".to_string(),
        })?
        .map_err(PredictError::from)
    }

    fn climate_period(&self) -> String {
        format!("{}-{}", self.window.start.format("%Y"), self.window.end.format("%Y"))
    }
}
