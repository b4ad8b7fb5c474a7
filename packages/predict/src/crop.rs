//! Crop yield from historical Sentinel-2 band values near a point.
//!
//! The band features for a location are the means over the nearest
//! dataset rows. The dataset only covers Europe, so predictions elsewhere
//! are extrapolations from the closest European rows.

use std::io::Read;
use std::path::Path;

use erosion_map_geometry::haversine_km;
use erosion_map_predict_models::CropYieldPrediction;

use crate::PredictError;
use crate::model::{Features, TreeEnsemble};

/// Sentinel-2 band columns used as features.
pub const BAND_COLUMNS: [&str; 12] = [
    "B01", "B02", "B03", "B04", "B05", "B06", "B07", "B08", "B8A", "B09", "B11", "B12",
];

/// Dataset rows averaged per prediction.
pub const NEAREST_ROWS: usize = 5;

/// Unit of the predicted yield.
pub const YIELD_UNIT: &str = "t/ha";

/// Label encoder column for crop names.
const CROP_ENCODER: &str = "CROP_NAME";

/// One dataset row: location plus band reflectances (`NaN` when absent).
#[derive(Debug, Clone, PartialEq)]
pub struct BandRecord {
    /// Latitude.
    pub lat: f64,
    /// Longitude.
    pub lon: f64,
    /// Values in [`BAND_COLUMNS`] order.
    pub bands: [f64; BAND_COLUMNS.len()],
}

/// Historical band observations keyed by location.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BandDataset {
    records: Vec<BandRecord>,
}

impl BandDataset {
    /// Reads a CSV with `TH_LAT`, `TH_LONG`, and band columns.
    ///
    /// Missing band columns read as `NaN`. Rows without usable
    /// coordinates are skipped.
    ///
    /// # Errors
    ///
    /// * If the CSV is malformed
    /// * If the coordinate columns are missing
    pub fn from_reader(reader: impl Read) -> Result<Self, PredictError> {
        let mut reader = csv::ReaderBuilder::new().flexible(true).from_reader(reader);

        let headers: Vec<String> = reader.headers()?.iter().map(|h| h.trim().to_owned()).collect();
        let column = |name: &str| headers.iter().position(|h| h == name);

        let (Some(lat_col), Some(lon_col)) = (column("TH_LAT"), column("TH_LONG")) else {
            return Err(PredictError::Data {
                message: "crop dataset needs TH_LAT and TH_LONG columns".to_string(),
            });
        };
        let band_cols = BAND_COLUMNS.map(column);

        let mut records = Vec::new();
        let mut skipped = 0_usize;

        for result in reader.records() {
            let record = result?;
            let number = |index: Option<usize>| {
                index
                    .and_then(|i| record.get(i))
                    .and_then(|v| v.trim().parse::<f64>().ok())
            };

            let (Some(lat), Some(lon)) = (number(Some(lat_col)), number(Some(lon_col))) else {
                skipped += 1;
                continue;
            };

            records.push(BandRecord {
                lat,
                lon,
                bands: band_cols.map(|col| number(col).unwrap_or(f64::NAN)),
            });
        }

        if skipped > 0 {
            log::debug!("Skipped {skipped} crop dataset rows without coordinates");
        }

        Ok(Self { records })
    }

    /// Loads a dataset file.
    ///
    /// # Errors
    ///
    /// * If the file cannot be opened or parsed
    pub fn load(path: &Path) -> Result<Self, PredictError> {
        let file = std::fs::File::open(path)?;
        let dataset = Self::from_reader(std::io::BufReader::new(file))?;
        log::info!(
            "Loaded crop dataset {} ({} rows)",
            path.display(),
            dataset.len()
        );
        Ok(dataset)
    }

    /// Number of rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the dataset has no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// The `n` rows closest to `(lat, lon)` with their distances in km,
    /// nearest first.
    #[must_use]
    pub fn nearest(&self, lat: f64, lon: f64, n: usize) -> Vec<(&BandRecord, f64)> {
        let mut by_distance: Vec<(&BandRecord, f64)> = self
            .records
            .iter()
            .map(|r| (r, haversine_km((r.lon, r.lat), (lon, lat))))
            .collect();
        by_distance.sort_by(|a, b| a.1.total_cmp(&b.1));
        by_distance.truncate(n);
        by_distance
    }
}

/// Mean of each band over `rows`, ignoring missing values. A band with no
/// values at all is 0.
#[must_use]
pub fn mean_bands(rows: &[(&BandRecord, f64)]) -> [f64; BAND_COLUMNS.len()] {
    std::array::from_fn(|band| {
        let (sum, n) = rows
            .iter()
            .map(|(r, _)| r.bands[band])
            .filter(|v| v.is_finite())
            .fold((0.0, 0_u32), |(sum, n), v| (sum + v, n + 1));
        if n == 0 { 0.0 } else { sum / f64::from(n) }
    })
}

/// Predicts crop yields.
#[derive(Debug, Clone)]
pub struct CropYieldPredictor {
    model: Option<TreeEnsemble>,
    dataset: BandDataset,
}

impl CropYieldPredictor {
    /// Creates a predictor. Without a model or rows every prediction fails.
    #[must_use]
    pub const fn new(model: Option<TreeEnsemble>, dataset: BandDataset) -> Self {
        Self { model, dataset }
    }

    /// Loads the model and dataset, logging and continuing without them
    /// if either cannot be loaded.
    #[must_use]
    pub fn from_paths(model_path: Option<&Path>, data_path: Option<&Path>) -> Self {
        let model = model_path.and_then(|path| {
            TreeEnsemble::load(path)
                .inspect_err(|e| log::warn!("Crop yield model unavailable: {e}"))
                .ok()
        });
        let dataset = data_path
            .and_then(|path| {
                BandDataset::load(path)
                    .inspect_err(|e| log::warn!("Crop dataset unavailable: {e}"))
                    .ok()
            })
            .unwrap_or_default();
        Self::new(model, dataset)
    }

    /// Whether both model and dataset are loaded.
    #[must_use]
    pub fn is_available(&self) -> bool {
        self.model.is_some() && !self.dataset.is_empty()
    }

    /// Predicts yield for `crop` at `(lat, lon)` in `week` of the year.
    ///
    /// Unknown crop names encode as 0 and are flagged in the result.
    ///
    /// # Errors
    ///
    /// * If the model or dataset is not loaded
    /// * If the model cannot evaluate the sample
    pub fn predict_at(
        &self,
        lat: f64,
        lon: f64,
        week: u32,
        crop: &str,
    ) -> Result<CropYieldPrediction, PredictError> {
        let model = self.model.as_ref().ok_or_else(|| PredictError::ModelUnavailable {
            message: "crop yield model not loaded".to_string(),
        })?;
        if self.dataset.is_empty() {
            return Err(PredictError::ModelUnavailable {
                message: "crop band dataset not loaded".to_string(),
            });
        }

        let nearest = self.dataset.nearest(lat, lon, NEAREST_ROWS);
        let bands = mean_bands(&nearest);
        let max_neighbour_distance_km = nearest.iter().map(|(_, d)| *d).fold(0.0, f64::max);

        let encoded = model.encode_label(CROP_ENCODER, crop);
        if encoded.is_none() {
            log::warn!("Unknown crop {crop:?}, encoding as 0");
        }

        #[allow(clippy::cast_precision_loss)]
        let features = BAND_COLUMNS
            .iter()
            .zip(bands)
            .fold(Features::new(), |features, (name, value)| {
                features.numeric(*name, value)
            })
            .numeric("WEEK", f64::from(week))
            .numeric("CROP_NAME_ENCODED", encoded.unwrap_or(0) as f64);

        let yield_t_ha = model.predict(&features)?;

        Ok(CropYieldPrediction {
            latitude: lat,
            longitude: lon,
            crop: crop.to_string(),
            week,
            yield_t_ha,
            unit: YIELD_UNIT.to_string(),
            neighbours: nearest.len(),
            max_neighbour_distance_km,
            crop_unrecognised: encoded.is_none(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CROP_MODEL: &str = include_str!("../testdata/crop_model.json");
    const CROP_BANDS: &str = include_str!("../testdata/crop_bands.csv");

    fn predictor() -> CropYieldPredictor {
        CropYieldPredictor::new(
            Some(TreeEnsemble::from_json(CROP_MODEL).unwrap()),
            BandDataset::from_reader(CROP_BANDS.as_bytes()).unwrap(),
        )
    }

    #[test]
    fn reads_band_dataset() {
        let dataset = BandDataset::from_reader(CROP_BANDS.as_bytes()).unwrap();
        assert_eq!(dataset.len(), 6);
        let nearest = dataset.nearest(51.519, -0.125, 5);
        assert_eq!(nearest.len(), 5);
        assert!(nearest.iter().all(|(r, _)| r.lat > 51.0));
        assert!(nearest.windows(2).all(|w| w[0].1 <= w[1].1));
    }

    #[test]
    fn missing_band_columns_are_zero_features() {
        let csv = "TH_LAT,TH_LONG,B08\n51.5,-0.1,0.4\n,,0.1\n";
        let dataset = BandDataset::from_reader(csv.as_bytes()).unwrap();
        assert_eq!(dataset.len(), 1);
        let bands = mean_bands(&dataset.nearest(51.5, -0.1, 5));
        assert!((bands[7] - 0.4).abs() < 1e-12);
        assert!(bands[0].abs() < f64::EPSILON);
    }

    #[test]
    fn predicts_soft_wheat_near_london() {
        let prediction = predictor().predict_at(51.519, -0.125, 21, "Soft wheat").unwrap();
        assert!((prediction.yield_t_ha - 7.25).abs() < 1e-9);
        assert_eq!(prediction.neighbours, 5);
        assert!(!prediction.crop_unrecognised);
        assert!(prediction.max_neighbour_distance_km < 20.0);
    }

    #[test]
    fn unknown_crop_encodes_as_zero() {
        let prediction = predictor().predict_at(51.519, -0.125, 21, "Barley").unwrap();
        assert!(prediction.crop_unrecognised);
        assert!((prediction.yield_t_ha - 6.75).abs() < 1e-9);
    }

    #[test]
    fn needs_model_and_data() {
        let empty = CropYieldPredictor::new(None, BandDataset::default());
        assert!(!empty.is_available());
        assert!(matches!(
            empty.predict_at(51.5, 0.0, 21, "Soft wheat"),
            Err(PredictError::ModelUnavailable { .. })
        ));
    }
}
