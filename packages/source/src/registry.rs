//! Compile-time registry of external data service configurations.
//!
//! Each data provider is defined in a TOML file under `services/`. The
//! registry embeds these at compile time and exposes them via
//! [`all_services`], [`enabled_services`], and [`service_by_id`].

use serde::Deserialize;

/// An external data service configuration loaded from TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct DataService {
    /// Unique identifier (e.g., `"soil_grids"`).
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// Whether this service is queried at all.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Time budget in seconds for one covariate fetch from this service.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Provider-specific configuration.
    pub provider: ProviderConfig,
}

/// Provider-specific configuration, tagged by `type` in TOML.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProviderConfig {
    /// Open-Meteo historical weather archive (daily temperature and
    /// precipitation).
    OpenMeteoArchive {
        /// API endpoint.
        base_url: String,
        /// First day of the climatology window.
        start_date: String,
        /// Last day of the climatology window.
        end_date: String,
        /// Samples per side of the rainfall lattice.
        lattice_size: usize,
    },
    /// Open-Meteo elevation lookup.
    OpenMeteoElevation {
        /// API endpoint.
        base_url: String,
        /// Maximum coordinates per request.
        max_coordinates: usize,
        /// Number of concurrent requests.
        #[serde(default = "default_concurrent")]
        concurrent_requests: usize,
    },
    /// ISRIC `SoilGrids` REST API.
    SoilGrids {
        /// Soil property point query endpoint.
        properties_url: String,
        /// WRB classification point query endpoint.
        classification_url: String,
        /// Samples per side of the soil lattice.
        lattice_size: usize,
        /// Number of concurrent requests.
        #[serde(default = "default_concurrent")]
        concurrent_requests: usize,
    },
    /// Copernicus Data Space Sentinel Hub Process API.
    SentinelHub {
        /// OAuth token endpoint.
        token_url: String,
        /// Process API endpoint.
        process_url: String,
        /// Maximum scene cloud cover percentage.
        max_cloud_coverage: u8,
    },
}

const fn default_true() -> bool {
    true
}

const fn default_timeout_secs() -> u64 {
    30
}

const fn default_concurrent() -> usize {
    4
}

impl DataService {
    /// Returns the provider's primary endpoint regardless of variant.
    #[must_use]
    pub fn base_url(&self) -> &str {
        match &self.provider {
            ProviderConfig::OpenMeteoArchive { base_url, .. }
            | ProviderConfig::OpenMeteoElevation { base_url, .. } => base_url,
            ProviderConfig::SoilGrids { properties_url, .. } => properties_url,
            ProviderConfig::SentinelHub { process_url, .. } => process_url,
        }
    }

    /// Time budget for one covariate fetch.
    #[must_use]
    pub const fn timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.timeout_secs)
    }
}

// ── Compile-time embedded TOML files ────────────────────────────────

const SERVICE_TOMLS: &[(&str, &str)] = &[
    (
        "open_meteo_archive",
        include_str!("../services/open_meteo_archive.toml"),
    ),
    (
        "open_meteo_elevation",
        include_str!("../services/open_meteo_elevation.toml"),
    ),
    ("soil_grids", include_str!("../services/soil_grids.toml")),
    ("sentinel_hub", include_str!("../services/sentinel_hub.toml")),
];

#[cfg(test)]
const EXPECTED_SERVICE_COUNT: usize = 4;

/// Returns all data service configurations (enabled and disabled).
///
/// # Panics
///
/// Panics if any TOML config is malformed (this is a compile-time guarantee
/// since the configs are embedded).
#[must_use]
pub fn all_services() -> Vec<DataService> {
    SERVICE_TOMLS
        .iter()
        .map(|(name, toml_str)| {
            toml::de::from_str(toml_str)
                .unwrap_or_else(|e| panic!("Failed to parse data service '{name}': {e}"))
        })
        .collect()
}

/// Returns only enabled services.
#[must_use]
pub fn enabled_services() -> Vec<DataService> {
    all_services().into_iter().filter(|s| s.enabled).collect()
}

/// Looks up an enabled service by its ID.
#[must_use]
pub fn service_by_id(id: &str) -> Option<DataService> {
    enabled_services().into_iter().find(|s| s.id == id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    #[test]
    fn loads_all_services() {
        let services = all_services();
        assert_eq!(services.len(), EXPECTED_SERVICE_COUNT);
    }

    #[test]
    fn service_ids_are_unique() {
        let services = all_services();
        let mut seen = BTreeSet::new();
        for svc in &services {
            assert!(seen.insert(&svc.id), "Duplicate service ID: {}", svc.id);
        }
    }

    #[test]
    fn all_services_have_required_fields() {
        for svc in &all_services() {
            assert!(!svc.id.is_empty(), "Service has empty id");
            assert!(!svc.name.is_empty(), "Service {} has empty name", svc.id);
            assert!(
                svc.base_url().starts_with("https://"),
                "Service {} has bad base_url",
                svc.id
            );
            assert!(svc.timeout_secs > 0, "Service {} has zero timeout", svc.id);
        }
    }

    #[test]
    fn service_id_matches_provider_type() {
        let soil = service_by_id("soil_grids").unwrap();
        assert!(matches!(
            soil.provider,
            ProviderConfig::SoilGrids {
                lattice_size: 5,
                concurrent_requests: 4,
                ..
            }
        ));
        let archive = service_by_id("open_meteo_archive").unwrap();
        assert!(matches!(
            archive.provider,
            ProviderConfig::OpenMeteoArchive { lattice_size: 3, .. }
        ));
    }
}
