//! Sentinel-2 NDVI from the Copernicus Data Space Sentinel Hub.
//!
//! Requests a least-cloudy L2A mosaic over the analysis window, rendered
//! by an evalscript as a single-band 8-bit PNG with one pixel per grid
//! cell. Pixel value 0 marks no data; other values map linearly onto
//! NDVI in [-1, 1].
//!
//! Requires OAuth client credentials from `CDSE_CLIENT_ID` and
//! `CDSE_CLIENT_SECRET`.

use erosion_map_rusle_models::{BoundingBox, DateRange};
use ndarray::Array2;

use crate::SourceError;

const NDVI_EVALSCRIPT: &str = r#"//VERSION=3
function setup() {
  return {
    input: ["B04", "B08", "dataMask"],
    output: { bands: 1, sampleType: "UINT8" }
  };
}
function evaluatePixel(s) {
  if (s.dataMask === 0 || s.B08 + s.B04 === 0) { return [0]; }
  let ndvi = (s.B08 - s.B04) / (s.B08 + s.B04);
  return [Math.max(1, Math.round((ndvi + 1) / 2 * 255))];
}"#;

/// OAuth client credentials for the Copernicus Data Space.
#[derive(Debug, Clone)]
pub struct SentinelCredentials {
    /// OAuth client ID.
    pub client_id: String,
    /// OAuth client secret.
    pub client_secret: String,
}

/// Reads credentials from environment variables.
///
/// Returns `Some` only when **both** `CDSE_CLIENT_ID` and
/// `CDSE_CLIENT_SECRET` are set and non-empty.
#[must_use]
pub fn credentials_from_env() -> Option<SentinelCredentials> {
    let client_id = std::env::var("CDSE_CLIENT_ID").ok()?;
    let client_secret = std::env::var("CDSE_CLIENT_SECRET").ok()?;
    if client_id.is_empty() || client_secret.is_empty() {
        return None;
    }
    Some(SentinelCredentials {
        client_id,
        client_secret,
    })
}

/// Exchanges client credentials for a bearer token.
///
/// # Errors
///
/// Returns [`SourceError`] if the token request fails or the response has
/// no `access_token`.
pub async fn fetch_token(
    client: &reqwest::Client,
    token_url: &str,
    credentials: &SentinelCredentials,
) -> Result<String, SourceError> {
    let resp = client
        .post(token_url)
        .form(&[
            ("grant_type", "client_credentials"),
            ("client_id", credentials.client_id.as_str()),
            ("client_secret", credentials.client_secret.as_str()),
        ])
        .send()
        .await?;

    if !resp.status().is_success() {
        return Err(SourceError::Unavailable {
            message: format!("CDSE token endpoint returned HTTP {}", resp.status()),
        });
    }

    let body: serde_json::Value = resp.json().await?;
    body["access_token"]
        .as_str()
        .map(String::from)
        .ok_or_else(|| SourceError::Unavailable {
            message: "CDSE token response has no access_token".to_string(),
        })
}

/// Builds the Process API request body.
fn process_payload(
    bbox: &BoundingBox,
    date_range: &DateRange,
    width: usize,
    height: usize,
    max_cloud_coverage: u8,
) -> serde_json::Value {
    serde_json::json!({
        "input": {
            "bounds": {
                "bbox": bbox.to_array(),
                "properties": {"crs": "http://www.opengis.net/def/crs/EPSG/0/4326"}
            },
            "data": [{
                "type": "sentinel-2-l2a",
                "dataFilter": {
                    "timeRange": {
                        "from": format!("{}T00:00:00Z", date_range.start),
                        "to": format!("{}T23:59:59Z", date_range.end)
                    },
                    "maxCloudCoverage": max_cloud_coverage,
                    "mosaickingOrder": "leastCC"
                }
            }]
        },
        "output": {
            "width": width,
            "height": height,
            "responses": [{"identifier": "default", "format": {"type": "image/png"}}]
        },
        "evalscript": NDVI_EVALSCRIPT
    })
}

/// Fetches an NDVI raster of `rows × cols` cells over `bbox`.
///
/// Cells without valid imagery are `NaN`.
///
/// # Errors
///
/// Returns [`SourceError`] if authentication, the Process API request,
/// or PNG decoding fails, or if no cell has valid imagery.
#[allow(clippy::too_many_arguments)]
pub async fn fetch_ndvi(
    client: &reqwest::Client,
    token_url: &str,
    process_url: &str,
    credentials: &SentinelCredentials,
    bbox: &BoundingBox,
    date_range: &DateRange,
    shape: (usize, usize),
    max_cloud_coverage: u8,
) -> Result<Array2<f64>, SourceError> {
    let token = fetch_token(client, token_url, credentials).await?;
    let (rows, cols) = shape;
    let payload = process_payload(bbox, date_range, cols, rows, max_cloud_coverage);

    log::debug!("Requesting {cols}x{rows} NDVI raster for {date_range:?}");

    let resp = client
        .post(process_url)
        .bearer_auth(token)
        .header("Accept", "image/png")
        .json(&payload)
        .send()
        .await?;

    if !resp.status().is_success() {
        return Err(SourceError::Unavailable {
            message: format!("Sentinel Hub Process API returned HTTP {}", resp.status()),
        });
    }

    let bytes = resp.bytes().await?;
    decode_ndvi_png(&bytes, shape)
}

/// Decodes an 8-bit NDVI PNG onto a `(rows, cols)` grid.
///
/// If the image size differs from the grid the nearest pixel is used. A
/// raster without a single clear pixel (every scene over the cloud limit)
/// is [`SourceError::Unavailable`].
fn decode_ndvi_png(bytes: &[u8], shape: (usize, usize)) -> Result<Array2<f64>, SourceError> {
    let image = image::load_from_memory_with_format(bytes, image::ImageFormat::Png)?.to_luma8();
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return Err(SourceError::Unavailable {
            message: "Sentinel Hub returned an empty image".to_string(),
        });
    }

    let (rows, cols) = shape;
    let ndvi = Array2::from_shape_fn((rows, cols), |(row, col)| {
        #[allow(clippy::cast_possible_truncation)]
        let x = ((col * width as usize) / cols.max(1)) as u32;
        #[allow(clippy::cast_possible_truncation)]
        let y = ((row * height as usize) / rows.max(1)) as u32;
        let value = image.get_pixel(x.min(width - 1), y.min(height - 1)).0[0];
        pixel_to_ndvi(value)
    });

    if !ndvi.iter().any(|v| v.is_finite()) {
        return Err(SourceError::Unavailable {
            message: "Sentinel Hub returned no clear pixels for the window".to_string(),
        });
    }

    Ok(ndvi)
}

/// Maps an encoded pixel to NDVI; 0 is no data.
fn pixel_to_ndvi(value: u8) -> f64 {
    if value == 0 {
        f64::NAN
    } else {
        (f64::from(value) / 255.0).mul_add(2.0, -1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode_png(width: u32, height: u32, pixels: Vec<u8>) -> Vec<u8> {
        let image = image::GrayImage::from_raw(width, height, pixels).unwrap();
        let mut bytes = std::io::Cursor::new(Vec::new());
        image.write_to(&mut bytes, image::ImageFormat::Png).unwrap();
        bytes.into_inner()
    }

    #[test]
    fn decodes_pixels_to_ndvi() {
        let png = encode_png(2, 1, vec![255, 0]);
        let ndvi = decode_ndvi_png(&png, (1, 2)).unwrap();
        assert!((ndvi[[0, 0]] - 1.0).abs() < 1e-12);
        assert!(ndvi[[0, 1]].is_nan());
    }

    #[test]
    fn resamples_to_grid_shape() {
        let png = encode_png(2, 2, vec![1, 128, 200, 255]);
        let ndvi = decode_ndvi_png(&png, (4, 4)).unwrap();
        assert_eq!(ndvi.dim(), (4, 4));
        assert!((ndvi[[3, 3]] - 1.0).abs() < 1e-12);
        assert!((ndvi[[0, 0]] - ndvi[[1, 1]]).abs() < 1e-12);
    }

    #[test]
    fn raster_without_clear_pixels_is_unavailable() {
        let png = encode_png(4, 4, vec![0; 16]);
        assert!(matches!(
            decode_ndvi_png(&png, (4, 4)),
            Err(SourceError::Unavailable { .. })
        ));
    }

    #[test]
    fn pixel_mapping_midpoint() {
        assert!(pixel_to_ndvi(128).abs() < 0.01);
        assert!((pixel_to_ndvi(1) + 1.0).abs() < 0.01);
    }

    #[test]
    fn payload_shape() {
        let range: DateRange = "2025-07-01/2025-12-31".parse().unwrap();
        let payload = process_payload(&BoundingBox::new(1.0, 2.0, 3.0, 4.0), &range, 10, 5, 20);
        assert_eq!(payload["output"]["width"], 10);
        assert_eq!(payload["output"]["height"], 5);
        assert_eq!(
            payload["input"]["data"][0]["dataFilter"]["timeRange"]["from"],
            "2025-07-01T00:00:00Z"
        );
        assert_eq!(payload["input"]["data"][0]["dataFilter"]["maxCloudCoverage"], 20);
        assert_eq!(payload["input"]["bounds"]["bbox"][2], 3.0);
    }
}
