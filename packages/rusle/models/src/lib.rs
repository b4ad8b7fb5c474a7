#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! RUSLE factor, statistics, and hotspot types.
//!
//! These types describe one soil-loss analysis from input polygon to the
//! reduced statistics. Every analysis builds its own values; nothing here
//! is shared or mutated across requests.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

/// A single polygon vertex in WGS84 decimal degrees.
///
/// `height` is accepted from map-drawing clients but ignored by the 2D
/// computation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    /// Longitude in decimal degrees.
    pub longitude: f64,
    /// Latitude in decimal degrees.
    pub latitude: f64,
    /// Height above the ellipsoid, ignored.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<f64>,
}

impl Coordinate {
    /// Creates a coordinate without height.
    #[must_use]
    pub const fn new(longitude: f64, latitude: f64) -> Self {
        Self {
            longitude,
            latitude,
            height: None,
        }
    }
}

/// A geographic bounding box in WGS84 coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    /// Western longitude boundary.
    pub west: f64,
    /// Southern latitude boundary.
    pub south: f64,
    /// Eastern longitude boundary.
    pub east: f64,
    /// Northern latitude boundary.
    pub north: f64,
}

impl BoundingBox {
    /// Creates a new bounding box from the given coordinates.
    #[must_use]
    pub const fn new(west: f64, south: f64, east: f64, north: f64) -> Self {
        Self {
            west,
            south,
            east,
            north,
        }
    }

    /// East-west extent in degrees.
    #[must_use]
    pub fn width(&self) -> f64 {
        self.east - self.west
    }

    /// North-south extent in degrees.
    #[must_use]
    pub fn height(&self) -> f64 {
        self.north - self.south
    }

    /// Centre point as `(longitude, latitude)`.
    #[must_use]
    pub fn center(&self) -> (f64, f64) {
        (
            f64::midpoint(self.west, self.east),
            f64::midpoint(self.south, self.north),
        )
    }

    /// Returns `[west, south, east, north]`, the GeoJSON `bbox` order.
    #[must_use]
    pub const fn to_array(&self) -> [f64; 4] {
        [self.west, self.south, self.east, self.north]
    }
}

/// Metadata about the normalized input polygon.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolygonMetadata {
    /// Area in square kilometres.
    pub area_km2: f64,
    /// Area in hectares.
    pub area_hectares: f64,
    /// Ring perimeter in kilometres.
    pub perimeter_km: f64,
    /// Vertex-average centroid `[lon, lat]`.
    pub centroid: [f64; 2],
    /// Bounding box `[west, south, east, north]`.
    pub bbox: [f64; 4],
    /// Number of vertices in the closed ring (closing vertex included).
    pub num_vertices: usize,
}

/// One of the five multiplicative RUSLE factors.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
pub enum Factor {
    /// Rainfall erosivity.
    R,
    /// Soil erodibility.
    K,
    /// Slope length and steepness.
    #[serde(rename = "LS")]
    #[strum(serialize = "LS")]
    Ls,
    /// Cover management.
    C,
    /// Support practice.
    P,
}

impl Factor {
    /// All factors in equation order.
    pub const ALL: [Self; 5] = [Self::R, Self::K, Self::Ls, Self::C, Self::P];

    /// Human-readable factor name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::R => "Rainfall Erosivity",
            Self::K => "Soil Erodibility",
            Self::Ls => "Slope Length & Steepness",
            Self::C => "Cover Management",
            Self::P => "Support Practices",
        }
    }

    /// Physical unit of the factor.
    #[must_use]
    pub const fn unit(self) -> &'static str {
        match self {
            Self::R => "MJ mm ha⁻¹ h⁻¹ yr⁻¹",
            Self::K => "t ha h ha⁻¹ MJ⁻¹ mm⁻¹",
            Self::Ls | Self::C | Self::P => "dimensionless",
        }
    }

    /// Short explanation of what a high value of this factor means.
    #[must_use]
    pub const fn driver_description(self) -> &'static str {
        match self {
            Self::R => "High rainfall intensity",
            Self::K => "Erodible soil type",
            Self::Ls => "Steep or long slope",
            Self::C => "Low vegetation cover",
            Self::P => "No conservation practices",
        }
    }
}

/// A fixed record holding one value per RUSLE factor.
///
/// Having one field per factor means the soil-loss product can only be
/// formed once all five are present.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FactorSet<T> {
    /// Rainfall erosivity.
    #[serde(rename = "R")]
    pub r: T,
    /// Soil erodibility.
    #[serde(rename = "K")]
    pub k: T,
    /// Slope length and steepness.
    #[serde(rename = "LS")]
    pub ls: T,
    /// Cover management.
    #[serde(rename = "C")]
    pub c: T,
    /// Support practice.
    #[serde(rename = "P")]
    pub p: T,
}

impl<T> FactorSet<T> {
    /// Builds a set by evaluating `f` for every factor.
    pub fn from_fn(mut f: impl FnMut(Factor) -> T) -> Self {
        Self {
            r: f(Factor::R),
            k: f(Factor::K),
            ls: f(Factor::Ls),
            c: f(Factor::C),
            p: f(Factor::P),
        }
    }

    /// Borrows the value for `factor`.
    #[must_use]
    pub const fn get(&self, factor: Factor) -> &T {
        match factor {
            Factor::R => &self.r,
            Factor::K => &self.k,
            Factor::Ls => &self.ls,
            Factor::C => &self.c,
            Factor::P => &self.p,
        }
    }

    /// Maps every value, keeping the factor association.
    pub fn map<U>(&self, mut f: impl FnMut(Factor, &T) -> U) -> FactorSet<U> {
        FactorSet::from_fn(|factor| f(factor, self.get(factor)))
    }

    /// Iterates `(factor, value)` pairs in equation order.
    pub fn iter(&self) -> impl Iterator<Item = (Factor, &T)> {
        Factor::ALL.into_iter().map(move |factor| (factor, self.get(factor)))
    }
}

/// Summary statistics for one factor over the valid cells.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactorStats {
    /// Mean value.
    pub mean: f64,
    /// Population standard deviation.
    pub stddev: f64,
    /// Minimum value.
    pub min: f64,
    /// Maximum value.
    pub max: f64,
    /// Unit of the factor.
    pub unit: String,
    /// Where the underlying covariate came from, including substitutions.
    pub source: String,
    /// Whether a default value was substituted for failed source data.
    pub degraded: bool,
    /// Share of soil-loss variability attributed to this factor (%).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contribution_pct: Option<f64>,
}

/// Soil-loss statistics over the valid cells, in t·ha⁻¹·yr⁻¹.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErosionStats {
    /// Mean soil-loss rate.
    pub mean: f64,
    /// Maximum soil-loss rate.
    pub max: f64,
    /// Minimum soil-loss rate.
    pub min: f64,
    /// Population standard deviation.
    pub stddev: f64,
    /// Median.
    pub p50: f64,
    /// 95th percentile.
    pub p95: f64,
    /// Total soil loss over the polygon in tonnes per year.
    pub total_soil_loss_tonnes: f64,
    /// Fraction of in-polygon cells with every factor defined.
    pub coverage: f64,
    /// Unit of the rate values.
    pub unit: String,
    /// Qualitative class of the mean rate.
    pub interpretation: ErosionClass,
}

/// Qualitative soil-loss class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, AsRefStr)]
pub enum ErosionClass {
    /// Below 5 t·ha⁻¹·yr⁻¹.
    #[serde(rename = "Very low")]
    #[strum(serialize = "Very low")]
    VeryLow,
    /// 5 to 10 t·ha⁻¹·yr⁻¹.
    Low,
    /// 10 to 20 t·ha⁻¹·yr⁻¹.
    Moderate,
    /// 20 to 50 t·ha⁻¹·yr⁻¹.
    High,
    /// 50 t·ha⁻¹·yr⁻¹ and above.
    Severe,
}

impl ErosionClass {
    /// Classifies a soil-loss rate.
    #[must_use]
    pub fn from_rate(rate: f64) -> Self {
        if rate < 5.0 {
            Self::VeryLow
        } else if rate < 10.0 {
            Self::Low
        } else if rate < 20.0 {
            Self::Moderate
        } else if rate < 50.0 {
            Self::High
        } else {
            Self::Severe
        }
    }
}

/// Risk severity of a hotspot.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Severity {
    /// Below the threshold (not emitted for hotspots).
    Low,
    /// Above the threshold.
    Moderate,
    /// At least twice the threshold.
    High,
    /// At least four times the threshold.
    Critical,
}

impl Severity {
    /// Grades a hotspot's mean rate against the detection threshold.
    #[must_use]
    pub fn grade(mean_erosion: f64, threshold: f64) -> Self {
        if mean_erosion >= threshold * 4.0 {
            Self::Critical
        } else if mean_erosion >= threshold * 2.0 {
            Self::High
        } else if mean_erosion > threshold {
            Self::Moderate
        } else {
            Self::Low
        }
    }
}

/// Properties of a hotspot region.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HotspotProperties {
    /// Region area in hectares.
    pub area_ha: f64,
    /// Mean soil-loss rate over the region.
    pub mean_erosion: f64,
    /// Maximum soil-loss rate in the region.
    pub max_erosion: f64,
    /// Factor driving the high rates.
    pub dominant_factor: Factor,
    /// Number of grid cells in the region.
    pub cell_count: usize,
}

/// A contiguous region of cells above the hotspot threshold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hotspot {
    /// Identifier, `hotspot_<n>` in discovery order.
    pub id: String,
    /// Region outline as a GeoJSON geometry.
    pub geometry: geojson::Geometry,
    /// Region statistics.
    pub properties: HotspotProperties,
    /// Human-readable explanation for the flag.
    pub reason: String,
    /// Severity class.
    pub severity: Severity,
}

/// Hotspot counts by severity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeverityDistribution {
    /// Low severity count.
    pub low: usize,
    /// Moderate severity count.
    pub moderate: usize,
    /// High severity count.
    pub high: usize,
    /// Critical severity count.
    pub critical: usize,
}

/// Roll-up of all detected hotspots.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HotspotSummary {
    /// Number of hotspots.
    pub total_hotspots: usize,
    /// Combined hotspot area in hectares.
    pub total_high_risk_area_ha: f64,
    /// Counts per severity class.
    pub severity_distribution: SeverityDistribution,
    /// Dominant factors, most frequent first.
    pub dominant_factors: Vec<Factor>,
}

/// Result of the qualitative sanity checks.
///
/// Percentages are `None` when a check had no applicable cells.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationMetrics {
    /// Loss reduction of densely vegetated cells vs. the grid mean (%).
    pub high_veg_reduction_pct: Option<f64>,
    /// Loss reduction of flat cells vs. the grid mean (%).
    pub flat_terrain_reduction_pct: Option<f64>,
    /// Loss increase of bare-soil cells vs. the grid mean (%).
    pub bare_soil_increase_pct: Option<f64>,
    /// Share of hotspots whose mean reaches 80% of the grid p95 (%).
    pub hotspot_agreement_pct: Option<f64>,
    /// Whether every applicable check met its expected bound.
    pub model_valid: bool,
    /// Summary of anomalies and skipped checks.
    pub notes: String,
}

/// User-configurable computation parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RusleOptions {
    /// Compute the support-practice factor instead of assuming 1.0.
    #[serde(default)]
    pub p_toggle: bool,
    /// Imagery window as `YYYY-MM-DD/YYYY-MM-DD`.
    #[serde(default = "default_date_range")]
    pub date_range: String,
    /// Hotspot threshold in t·ha⁻¹·yr⁻¹.
    #[serde(default = "default_threshold")]
    pub threshold_t_ha_yr: f64,
    /// Run factor contribution and validation checks.
    #[serde(default = "default_true")]
    pub compute_sensitivities: bool,
    /// Target grid resolution in degrees.
    #[serde(default = "default_resolution")]
    pub resolution_deg: f64,
}

/// Default hotspot threshold in t·ha⁻¹·yr⁻¹.
pub const DEFAULT_THRESHOLD_T_HA_YR: f64 = 20.0;

/// Default grid resolution in degrees (~100 m).
pub const DEFAULT_RESOLUTION_DEG: f64 = 0.001;

fn default_date_range() -> String {
    "2025-01-01/2025-12-31".to_string()
}

const fn default_threshold() -> f64 {
    DEFAULT_THRESHOLD_T_HA_YR
}

const fn default_true() -> bool {
    true
}

const fn default_resolution() -> f64 {
    DEFAULT_RESOLUTION_DEG
}

impl Default for RusleOptions {
    fn default() -> Self {
        Self {
            p_toggle: false,
            date_range: default_date_range(),
            threshold_t_ha_yr: DEFAULT_THRESHOLD_T_HA_YR,
            compute_sensitivities: true,
            resolution_deg: DEFAULT_RESOLUTION_DEG,
        }
    }
}

/// Maximum imagery window length in days.
pub const MAX_DATE_RANGE_DAYS: i64 = 730;

/// A parsed `YYYY-MM-DD/YYYY-MM-DD` window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    /// First day (inclusive).
    pub start: NaiveDate,
    /// Last day (inclusive).
    pub end: NaiveDate,
}

impl std::str::FromStr for DateRange {
    type Err = InvalidDateRangeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| InvalidDateRangeError {
            value: s.to_string(),
            reason: reason.to_string(),
        };

        let (start, end) = s
            .split_once('/')
            .ok_or_else(|| invalid("expected YYYY-MM-DD/YYYY-MM-DD"))?;
        let start = NaiveDate::parse_from_str(start.trim(), "%Y-%m-%d")
            .map_err(|e| invalid(&format!("bad start date: {e}")))?;
        let end = NaiveDate::parse_from_str(end.trim(), "%Y-%m-%d")
            .map_err(|e| invalid(&format!("bad end date: {e}")))?;

        if end <= start {
            return Err(invalid("end date must be after start date"));
        }
        if (end - start).num_days() > MAX_DATE_RANGE_DAYS {
            return Err(invalid("date range too long (max 2 years)"));
        }

        Ok(Self { start, end })
    }
}

/// Error returned when a date range string cannot be parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidDateRangeError {
    /// The rejected input.
    pub value: String,
    /// Why it was rejected.
    pub reason: String,
}

impl std::fmt::Display for InvalidDateRangeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid date range {:?}: {}", self.value, self.reason)
    }
}

impl std::error::Error for InvalidDateRangeError {}

/// Shape of the analysis grid.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GridSummary {
    /// Number of rows.
    pub rows: usize,
    /// Number of columns.
    pub cols: usize,
    /// Cell edge length in degrees.
    pub cell_size_deg: f64,
    /// Cells whose centre lies inside the polygon.
    pub cells_inside: usize,
    /// Inside cells with every factor defined.
    pub cells_valid: usize,
}

/// Output of one RUSLE pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RusleResult {
    /// Soil-loss statistics.
    pub erosion: ErosionStats,
    /// Per-factor statistics.
    pub factors: FactorSet<FactorStats>,
    /// Detected hotspots.
    pub hotspots: Vec<Hotspot>,
    /// Hotspot roll-up.
    pub hotspot_summary: HotspotSummary,
    /// Sanity checks, present when sensitivities were requested.
    pub validation: Option<ValidationMetrics>,
    /// Grid shape.
    pub grid: GridSummary,
    /// Data sources that failed and were replaced by defaults.
    pub substitutions: Vec<String>,
}
