#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Reverse geocoding for analysis polygons.
//!
//! Resolves a polygon centroid to a human-readable place using the
//! Nominatim / OpenStreetMap reverse endpoint. A failed lookup never fails
//! an analysis; callers report the location as unknown instead.

pub mod nominatim;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Public Nominatim reverse-geocoding endpoint.
pub const DEFAULT_REVERSE_URL: &str = "https://nominatim.openstreetmap.org/reverse";

/// A place resolved from coordinates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    /// Full formatted name (e.g., "Oxford, Oxfordshire, England, United Kingdom").
    pub display_name: String,
    /// Nearest city, town, village, or hamlet.
    pub locality: Option<String>,
    /// County or district.
    pub county: Option<String>,
    /// State, province, or region.
    pub region: Option<String>,
    /// Country name.
    pub country: Option<String>,
    /// ISO 3166-1 alpha-2 country code, lowercase.
    pub country_code: Option<String>,
}

/// Errors from geocoding operations.
#[derive(Debug, Error)]
pub enum GeocodeError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Response parsing failed.
    #[error("Parse error: {message}")]
    Parse {
        /// Description of the parsing failure.
        message: String,
    },

    /// Rate limit exceeded.
    #[error("Rate limit exceeded")]
    RateLimited,
}
