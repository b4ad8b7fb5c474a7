//! ISRIC `SoilGrids` v2.0 point queries.
//!
//! Texture fractions are served in g/kg and soil organic carbon in dg/kg;
//! both are converted to percent here. When a point cannot be resolved
//! the caller falls back to [`regional_k`].
//!
//! See <https://rest.isric.org/soilgrids/v2.0/docs>

use serde::{Deserialize, Serialize};

use crate::SourceError;

/// Topsoil (0-5 cm) texture and organic carbon in percent.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SoilTexture {
    /// Sand content (%).
    pub sand_pct: f64,
    /// Silt content (%).
    pub silt_pct: f64,
    /// Clay content (%).
    pub clay_pct: f64,
    /// Organic carbon content (%).
    pub organic_carbon_pct: f64,
}

/// Soil information for one grid cell.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum SoilCell {
    /// Measured texture, from which K is derived.
    Texture(SoilTexture),
    /// A regional typical K value used when texture is unavailable.
    RegionalK(f64),
}

/// Typical K (t·ha·h·ha⁻¹·MJ⁻¹·mm⁻¹) for a location when no texture data
/// is available.
#[must_use]
pub fn regional_k(lon: f64, lat: f64) -> f64 {
    if (35.0..=72.0).contains(&lat) && (-25.0..=45.0).contains(&lon) {
        if (50.0..=60.0).contains(&lat) {
            0.030
        } else if (40.0..50.0).contains(&lat) {
            0.028
        } else {
            0.025
        }
    } else if (25.0..=50.0).contains(&lat) && (-130.0..=-65.0).contains(&lon) {
        0.032
    } else if (-40.0..=40.0).contains(&lat) {
        0.020
    } else {
        0.028
    }
}

/// Describes where a soil lattice's values came from.
#[must_use]
pub fn describe_sources(resolved: usize, total: usize) -> String {
    let regional = total.saturating_sub(resolved);
    #[allow(clippy::cast_precision_loss)]
    let mostly_resolved = total > 0 && resolved as f64 >= total as f64 * 0.7;
    if mostly_resolved {
        "SoilGrids API + Williams 1995".to_string()
    } else if resolved == 0 {
        "Regional defaults".to_string()
    } else {
        format!("Mixed (SG:{resolved}, Reg:{regional})")
    }
}

/// Queries topsoil texture at a point.
///
/// Returns `Ok(None)` when the service has no data for the location
/// (e.g. open water).
///
/// # Errors
///
/// Returns [`SourceError`] if the HTTP request or response parsing fails.
pub async fn fetch_texture(
    client: &reqwest::Client,
    properties_url: &str,
    lon: f64,
    lat: f64,
) -> Result<Option<SoilTexture>, SourceError> {
    let lon = lon.to_string();
    let lat = lat.to_string();
    let resp = client
        .get(properties_url)
        .query(&[
            ("lon", lon.as_str()),
            ("lat", lat.as_str()),
            ("property", "sand"),
            ("property", "silt"),
            ("property", "clay"),
            ("property", "soc"),
            ("depth", "0-5cm"),
            ("value", "mean"),
        ])
        .send()
        .await?;

    if !resp.status().is_success() {
        return Err(SourceError::Unavailable {
            message: format!("SoilGrids returned HTTP {}", resp.status()),
        });
    }

    let body: serde_json::Value = resp.json().await?;
    Ok(parse_texture_response(&body))
}

/// Extracts texture from a `properties/query` response.
fn parse_texture_response(body: &serde_json::Value) -> Option<SoilTexture> {
    let layers = body["properties"]["layers"].as_array()?;

    let mean_of = |name: &str| -> Option<f64> {
        let layer = layers.iter().find(|l| l["name"].as_str() == Some(name))?;
        layer["depths"]
            .as_array()?
            .iter()
            .find(|d| d["label"].as_str() == Some("0-5cm"))?["values"]["mean"]
            .as_f64()
    };

    Some(SoilTexture {
        sand_pct: mean_of("sand")? / 10.0,
        silt_pct: mean_of("silt")? / 10.0,
        clay_pct: mean_of("clay")? / 10.0,
        organic_carbon_pct: mean_of("soc")? / 100.0,
    })
}

/// Queries the most probable WRB reference soil group at a point.
///
/// # Errors
///
/// Returns [`SourceError`] if the HTTP request or response parsing fails.
pub async fn fetch_classification(
    client: &reqwest::Client,
    classification_url: &str,
    lon: f64,
    lat: f64,
) -> Result<Option<String>, SourceError> {
    let lon = lon.to_string();
    let lat = lat.to_string();
    let resp = client
        .get(classification_url)
        .query(&[
            ("lon", lon.as_str()),
            ("lat", lat.as_str()),
            ("number_classes", "1"),
        ])
        .send()
        .await?;

    if !resp.status().is_success() {
        return Err(SourceError::Unavailable {
            message: format!("SoilGrids classification returned HTTP {}", resp.status()),
        });
    }

    let body: serde_json::Value = resp.json().await?;
    Ok(parse_classification_response(&body))
}

fn parse_classification_response(body: &serde_json::Value) -> Option<String> {
    body["wrb_class_name"]
        .as_str()
        .filter(|s| !s.is_empty())
        .map(String::from)
}
