//! Nominatim / OpenStreetMap reverse geocoder client.
//!
//! The public instance allows **1 request per second** and requires an
//! identifying `User-Agent`, which the caller sets on the client.
//!
//! See <https://nominatim.org/release-docs/develop/api/Reverse/>

use crate::{GeocodeError, Location};

/// Detail level requested from Nominatim; 10 resolves to city level.
const ZOOM: &str = "10";

/// Resolves `(lat, lon)` to a place.
///
/// Returns `Ok(None)` when Nominatim has no place at the coordinates
/// (open ocean, for example).
///
/// # Errors
///
/// Returns [`GeocodeError`] if the HTTP request or response parsing fails.
pub async fn reverse_geocode(
    client: &reqwest::Client,
    base_url: &str,
    lat: f64,
    lon: f64,
) -> Result<Option<Location>, GeocodeError> {
    let lat = lat.to_string();
    let lon = lon.to_string();

    let resp = client
        .get(base_url)
        .query(&[
            ("lat", lat.as_str()),
            ("lon", lon.as_str()),
            ("format", "jsonv2"),
            ("zoom", ZOOM),
            ("addressdetails", "1"),
        ])
        .send()
        .await?;

    if resp.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
        return Err(GeocodeError::RateLimited);
    }

    let body: serde_json::Value = resp.error_for_status()?.json().await?;
    parse_response(&body)
}

/// Parses a Nominatim reverse response.
fn parse_response(body: &serde_json::Value) -> Result<Option<Location>, GeocodeError> {
    if let Some(error) = body["error"].as_str() {
        log::debug!("Nominatim reverse returned no place: {error}");
        return Ok(None);
    }

    let display_name = body["display_name"]
        .as_str()
        .ok_or_else(|| GeocodeError::Parse {
            message: "Missing display_name in Nominatim response".to_string(),
        })?
        .to_string();

    let address = &body["address"];
    let field = |keys: &[&str]| {
        keys.iter()
            .find_map(|key| address[*key].as_str())
            .map(String::from)
    };

    Ok(Some(Location {
        display_name,
        locality: field(&["city", "town", "village", "hamlet", "municipality"]),
        county: field(&["county", "state_district"]),
        region: field(&["state", "region", "province"]),
        country: field(&["country"]),
        country_code: field(&["country_code"]),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_reverse_result() {
        let body = serde_json::json!({
            "lat": "51.7520",
            "lon": "-1.2577",
            "display_name": "Oxford, Oxfordshire, England, United Kingdom",
            "address": {
                "city": "Oxford",
                "county": "Oxfordshire",
                "state": "England",
                "country": "United Kingdom",
                "country_code": "gb"
            }
        });
        let location = parse_response(&body).unwrap().unwrap();
        assert_eq!(location.locality.as_deref(), Some("Oxford"));
        assert_eq!(location.region.as_deref(), Some("England"));
        assert_eq!(location.country_code.as_deref(), Some("gb"));
    }

    #[test]
    fn falls_back_to_town_and_village() {
        let body = serde_json::json!({
            "display_name": "Somewhere",
            "address": { "village": "Little Snoring", "country": "United Kingdom" }
        });
        let location = parse_response(&body).unwrap().unwrap();
        assert_eq!(location.locality.as_deref(), Some("Little Snoring"));
        assert!(location.county.is_none());
    }

    #[test]
    fn unable_to_geocode_is_none() {
        let body = serde_json::json!({ "error": "Unable to geocode" });
        assert!(parse_response(&body).unwrap().is_none());
    }

    #[test]
    fn missing_display_name_is_an_error() {
        let body = serde_json::json!({ "address": {} });
        assert!(matches!(
            parse_response(&body),
            Err(GeocodeError::Parse { .. })
        ));
    }
}
