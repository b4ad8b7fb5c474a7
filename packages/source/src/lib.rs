#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! Covariate data sources for RUSLE analysis.
//!
//! Each external provider implements one covariate (rainfall climatology,
//! soil texture, elevation, vegetation index). Providers are declared in
//! the [`registry`] and fetched concurrently by a [`CovariateFetcher`].
//! A failing provider never fails the analysis: its covariate is filled
//! with a typical default and the substitution is recorded in
//! [`Covariates::substitutions`].

pub mod grid;
pub mod open_meteo;
pub mod registry;
pub mod sentinel_hub;
pub mod soil_grids;

use std::time::Duration;

use async_trait::async_trait;
use erosion_map_rusle_models::DateRange;

pub use grid::{CovariateGrid, GridSpec, sample_lattice};
use registry::{DataService, ProviderConfig};
use sentinel_hub::SentinelCredentials;
use soil_grids::SoilCell;

/// Annual precipitation assumed when the climate archive is unavailable (mm).
pub const DEFAULT_ANNUAL_PRECIPITATION_MM: f64 = 700.0;

/// NDVI assumed when satellite imagery is unavailable.
pub const DEFAULT_NDVI: f64 = 0.55;

/// Errors that can occur while fetching covariate data.
///
/// All of these are recoverable: the fetcher substitutes a default and
/// continues.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    /// HTTP request failed.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON parsing failed.
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    /// Image decoding failed.
    #[error("Image decode error: {0}")]
    Image(#[from] image::ImageError),

    /// The source did not answer within its timeout.
    #[error("Data source {source_id} timed out")]
    Timeout {
        /// Service identifier.
        source_id: String,
    },

    /// The source is disabled, unconfigured, or returned unusable data.
    #[error("Data source unavailable: {message}")]
    Unavailable {
        /// Description of what went wrong.
        message: String,
    },
}

/// All covariates needed to evaluate the RUSLE factors over one grid.
#[derive(Debug, Clone)]
pub struct Covariates {
    /// Mean annual precipitation (mm).
    pub rainfall: CovariateGrid<f64>,
    /// Soil texture or regional K per cell.
    pub soil: CovariateGrid<SoilCell>,
    /// Elevation (m); `NaN` everywhere when unavailable.
    pub elevation: CovariateGrid<f64>,
    /// Sentinel-2 NDVI; `NaN` where imagery has no valid pixel until
    /// [`Covariates::fill_ndvi_gaps`] runs.
    pub ndvi: CovariateGrid<f64>,
    /// Human-readable notes for every substituted source.
    pub substitutions: Vec<String>,
}

impl Covariates {
    /// Replaces NDVI cells without clear imagery by [`DEFAULT_NDVI`].
    ///
    /// When any cell inside the polygon is filled the NDVI grid is marked
    /// degraded and a substitution is recorded. Returns the number of
    /// filled cells inside the polygon. Grids of the wrong shape are left
    /// alone.
    pub fn fill_ndvi_gaps(&mut self, grid: &GridSpec) -> usize {
        if self.ndvi.values.dim() != grid.shape() {
            return 0;
        }

        let mut gaps = 0;
        ndarray::Zip::from(&mut self.ndvi.values)
            .and(&grid.mask)
            .for_each(|value, &inside| {
                if value.is_nan() {
                    *value = DEFAULT_NDVI;
                    if inside {
                        gaps += 1;
                    }
                }
            });

        if gaps > 0 {
            log::warn!("{gaps} cells have no clear imagery, using NDVI {DEFAULT_NDVI}");
            self.ndvi.degraded = true;
            self.substitutions.push(format!(
                "C: {gaps} of {} cells had no clear imagery; assumed NDVI {DEFAULT_NDVI}",
                grid.cells_inside()
            ));
        }

        gaps
    }
}

/// Supplies covariate grids for an analysis.
#[async_trait]
pub trait CovariateFetcher: Send + Sync {
    /// Fetches every covariate over `grid`.
    ///
    /// Never fails: unavailable sources are replaced by defaults and
    /// recorded in [`Covariates::substitutions`].
    async fn fetch(&self, grid: &GridSpec, date_range: &DateRange) -> Covariates;
}

/// Fetches covariates from the public HTTP services in the [`registry`].
#[derive(Debug, Clone)]
pub struct HttpCovariateFetcher {
    client: reqwest::Client,
    services: Vec<DataService>,
    credentials: Option<SentinelCredentials>,
}

impl HttpCovariateFetcher {
    /// Creates a fetcher over the enabled registry services.
    #[must_use]
    pub fn new(client: reqwest::Client, credentials: Option<SentinelCredentials>) -> Self {
        Self {
            client,
            services: registry::enabled_services(),
            credentials,
        }
    }

    /// Creates a fetcher with Sentinel Hub credentials read from the
    /// environment.
    #[must_use]
    pub fn from_env(client: reqwest::Client) -> Self {
        let credentials = sentinel_hub::credentials_from_env();
        if credentials.is_none() {
            log::warn!("CDSE_CLIENT_ID/CDSE_CLIENT_SECRET not set; NDVI will use defaults");
        }
        Self::new(client, credentials)
    }

    fn service(&self, id: &str) -> Result<&DataService, SourceError> {
        self.services
            .iter()
            .find(|s| s.id == id)
            .ok_or_else(|| SourceError::Unavailable {
                message: format!("service {id} is not enabled"),
            })
    }

    async fn fetch_rainfall(&self, grid: &GridSpec) -> Result<CovariateGrid<f64>, SourceError> {
        let service = self.service("open_meteo_archive")?;
        let ProviderConfig::OpenMeteoArchive {
            base_url,
            start_date,
            end_date,
            lattice_size,
        } = &service.provider
        else {
            return Err(misconfigured(service));
        };

        let window = open_meteo::ArchiveWindow::parse(start_date, end_date)?;
        let points = sample_lattice(&grid.bbox, *lattice_size);
        let normals = with_timeout(
            service,
            open_meteo::fetch_climate_normals(&self.client, base_url, &window, &points),
        )
        .await?;

        let samples: Vec<_> = points
            .into_iter()
            .zip(normals)
            .map(|(point, n)| (point, n.annual_precipitation_mm))
            .collect();

        CovariateGrid::from_samples(grid, &samples, "Open-Meteo ERA5 archive (2014-2023)", false)
            .ok_or_else(|| SourceError::Unavailable {
                message: "Open-Meteo returned no locations".to_string(),
            })
    }

    async fn fetch_soil(&self, grid: &GridSpec) -> CovariateGrid<SoilCell> {
        let (properties_url, lattice_size, concurrent_requests, budget) =
            match self.service("soil_grids").map(|s| (&s.provider, s.timeout())) {
                Ok((
                    ProviderConfig::SoilGrids {
                        properties_url,
                        lattice_size,
                        concurrent_requests,
                        ..
                    },
                    budget,
                )) => (
                    Some(properties_url.as_str()),
                    *lattice_size,
                    *concurrent_requests,
                    budget,
                ),
                _ => (None, 5, 1, Duration::ZERO),
            };

        let points = sample_lattice(&grid.bbox, lattice_size);
        let mut cells: Vec<Option<SoilCell>> = vec![None; points.len()];
        if let Some(url) = properties_url {
            self.resolve_textures(url, &points, concurrent_requests, budget, &mut cells)
                .await;
        }

        let total = cells.len();
        let resolved_count = cells.iter().filter(|c| c.is_some()).count();
        let samples: Vec<((f64, f64), SoilCell)> = points
            .into_iter()
            .zip(cells)
            .map(|(point, cell)| {
                (
                    point,
                    cell.unwrap_or_else(|| SoilCell::RegionalK(soil_grids::regional_k(point.0, point.1))),
                )
            })
            .collect();

        let source = soil_grids::describe_sources(resolved_count, total);
        let degraded = resolved_count < total;

        CovariateGrid::from_samples(grid, &samples, source.clone(), degraded).unwrap_or_else(|| {
            let (lon, lat) = grid.bbox.center();
            CovariateGrid::filled(
                grid,
                SoilCell::RegionalK(soil_grids::regional_k(lon, lat)),
                source,
                true,
            )
        })
    }

    /// Queries texture at every lattice point until all answer or `budget`
    /// runs out. Points still pending at the deadline stay `None`.
    async fn resolve_textures(
        &self,
        url: &str,
        points: &[(f64, f64)],
        concurrent_requests: usize,
        budget: Duration,
        cells: &mut [Option<SoilCell>],
    ) {
        use futures::stream::{self, StreamExt as _};

        let requests: Vec<_> = points
            .iter()
            .enumerate()
            .map(|(index, &(lon, lat))| texture_at(&self.client, url, index, lon, lat))
            .collect();
        let mut responses = stream::iter(requests).buffer_unordered(concurrent_requests.max(1));
        let deadline = tokio::time::Instant::now() + budget;

        loop {
            match tokio::time::timeout_at(deadline, responses.next()).await {
                Ok(Some((index, cell))) => cells[index] = cell,
                Ok(None) => break,
                Err(_) => {
                    log::warn!(
                        "SoilGrids did not finish within {budget:?}; {} of {} points resolved",
                        cells.iter().filter(|c| c.is_some()).count(),
                        cells.len()
                    );
                    break;
                }
            }
        }
    }

    async fn fetch_elevation(&self, grid: &GridSpec) -> Result<CovariateGrid<f64>, SourceError> {
        let service = self.service("open_meteo_elevation")?;
        let ProviderConfig::OpenMeteoElevation {
            base_url,
            max_coordinates,
            concurrent_requests,
        } = &service.provider
        else {
            return Err(misconfigured(service));
        };

        let centres = grid.centres();
        let elevations = with_timeout(
            service,
            open_meteo::fetch_elevations(
                &self.client,
                base_url,
                *max_coordinates,
                *concurrent_requests,
                &centres,
            ),
        )
        .await?;

        let values = ndarray::Array2::from_shape_vec(grid.shape(), elevations).map_err(|e| {
            SourceError::Unavailable {
                message: format!("elevation grid shape mismatch: {e}"),
            }
        })?;

        Ok(CovariateGrid {
            values,
            source: "Copernicus GLO-90 DEM via Open-Meteo".to_string(),
            degraded: false,
        })
    }

    async fn fetch_ndvi(
        &self,
        grid: &GridSpec,
        date_range: &DateRange,
    ) -> Result<CovariateGrid<f64>, SourceError> {
        let service = self.service("sentinel_hub")?;
        let ProviderConfig::SentinelHub {
            token_url,
            process_url,
            max_cloud_coverage,
        } = &service.provider
        else {
            return Err(misconfigured(service));
        };
        let credentials = self
            .credentials
            .as_ref()
            .ok_or_else(|| SourceError::Unavailable {
                message: "Sentinel Hub credentials not configured".to_string(),
            })?;

        let values = with_timeout(
            service,
            sentinel_hub::fetch_ndvi(
                &self.client,
                token_url,
                process_url,
                credentials,
                &grid.bbox,
                date_range,
                grid.shape(),
                *max_cloud_coverage,
            ),
        )
        .await?;

        Ok(CovariateGrid {
            values,
            source: format!(
                "Sentinel-2 L2A NDVI ({} to {})",
                date_range.start, date_range.end
            ),
            degraded: false,
        })
    }
}

#[async_trait]
impl CovariateFetcher for HttpCovariateFetcher {
    async fn fetch(&self, grid: &GridSpec, date_range: &DateRange) -> Covariates {
        let (rainfall, soil, elevation, ndvi) = tokio::join!(
            self.fetch_rainfall(grid),
            self.fetch_soil(grid),
            self.fetch_elevation(grid),
            self.fetch_ndvi(grid, date_range),
        );

        let mut substitutions = Vec::new();

        let rainfall = rainfall.unwrap_or_else(|e| {
            log::warn!("Rainfall unavailable, using {DEFAULT_ANNUAL_PRECIPITATION_MM} mm: {e}");
            substitutions.push(format!(
                "R: rainfall climatology unavailable ({e}); assumed {DEFAULT_ANNUAL_PRECIPITATION_MM} mm/yr"
            ));
            CovariateGrid::filled(
                grid,
                DEFAULT_ANNUAL_PRECIPITATION_MM,
                "Default precipitation (archive unavailable)",
                true,
            )
        });

        if soil.degraded {
            log::warn!("Soil texture partially unavailable: {}", soil.source);
            substitutions.push(format!(
                "K: regional soil erodibility used where SoilGrids had no data ({})",
                soil.source
            ));
        }

        let elevation = elevation.unwrap_or_else(|e| {
            log::warn!("Elevation unavailable, LS defaults to 1.0: {e}");
            substitutions.push(format!(
                "LS: elevation unavailable ({e}); assumed LS = 1.0"
            ));
            CovariateGrid::filled(grid, f64::NAN, "Constant (no DEM)", true)
        });

        let ndvi = ndvi.unwrap_or_else(|e| {
            log::warn!("NDVI unavailable, using {DEFAULT_NDVI}: {e}");
            substitutions.push(format!(
                "C: satellite imagery unavailable ({e}); assumed NDVI {DEFAULT_NDVI}"
            ));
            CovariateGrid::filled(
                grid,
                DEFAULT_NDVI,
                "Default NDVI (imagery unavailable)",
                true,
            )
        });

        let mut covariates = Covariates {
            rainfall,
            soil,
            elevation,
            ndvi,
            substitutions,
        };
        covariates.fill_ndvi_gaps(grid);
        covariates
    }
}

/// Runs `future` under the service's timeout.
async fn with_timeout<T>(
    service: &DataService,
    future: impl Future<Output = Result<T, SourceError>>,
) -> Result<T, SourceError> {
    tokio::time::timeout(service.timeout(), future)
        .await
        .map_err(|_| SourceError::Timeout {
            source_id: service.id.clone(),
        })?
}

async fn texture_at(
    client: &reqwest::Client,
    url: &str,
    index: usize,
    lon: f64,
    lat: f64,
) -> (usize, Option<SoilCell>) {
    match soil_grids::fetch_texture(client, url, lon, lat).await {
        Ok(texture) => (index, texture.map(SoilCell::Texture)),
        Err(e) => {
            log::debug!("SoilGrids failed at ({lon:.4}, {lat:.4}): {e}");
            (index, None)
        }
    }
}

fn misconfigured(service: &DataService) -> SourceError {
    SourceError::Unavailable {
        message: format!("service {} has an unexpected provider type", service.id),
    }
}
