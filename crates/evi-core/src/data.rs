//! Measurement data files.
//!
//! A data file collects the results of one run or of repeated `save` calls:
//!
//! ```json
//! {
//!   "serialnumber": "1234",
//!   "firmwareVersion": "1.2.0",
//!   "measurements": [
//!     {
//!       "air":    {"dark": 10.0, "value": 30.0, "ledPower": 120},
//!       "sample": {"dark": 11.0, "value": 2010.0, "ledPower": 120},
//!       "date_time": "2024-05-01T09:30:00+02:00",
//!       "logging": [],
//!       "comment": "STD High #1 10.0 ng/ul",
//!       "errors": [{"problem_id": 6, "description": "WRONG_LEVEL"}],
//!       "results": {"concentration": 10.0}
//!     }
//!   ]
//! }
//! ```
//!
//! Records saved in raw mode carry a `values` array instead of `air`/`sample`.
//!
//! ## Functionality
//!
//! - **`read_json`** / **`write_json`**: pretty-printed JSON persistence for
//!   any serde type, mapping failures onto [`EviError`].
//! - **`DataFile::load`** / **`DataFile::save`**: the data file itself.

use std::fs;
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{EviError, EviResult};
use crate::measurement::{MeasurementPair, SingleMeasurement};
use crate::verification::Verification;

/// Read and deserialize a JSON document.
///
/// A missing file is reported as [`EviError::FileNotFound`].
pub fn read_json<T: DeserializeOwned>(path: &Path) -> EviResult<T> {
    if !path.exists() {
        return Err(EviError::FileNotFound(path.to_path_buf()));
    }
    let json = fs::read_to_string(path).map_err(|e| EviError::file_io(path, e))?;
    serde_json::from_str(&json).map_err(|e| EviError::file_io(path, e))
}

/// Serialize `value` as pretty-printed JSON and replace `path` with it.
pub fn write_json<T: Serialize>(path: &Path, value: &T) -> EviResult<()> {
    let json = serde_json::to_string_pretty(value).map_err(|e| EviError::file_io(path, e))?;
    fs::write(path, json).map_err(|e| EviError::file_io(path, e))
}

/// Values calculated from a record.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Results {
    /// Concentration in the unit of the standards. Non-finite results are
    /// written as `null` and read back as `None`.
    pub concentration: Option<f64>,
}

/// One stored measurement.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MeasurementRecord {
    /// Air reference reading.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub air: Option<SingleMeasurement>,
    /// Sample reading.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sample: Option<SingleMeasurement>,
    /// Raw readings, newest last, written by raw-mode saves.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub values: Option<Vec<SingleMeasurement>>,
    /// ISO-8601 time the record was written.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_time: Option<String>,
    /// Device logging lines collected with the record.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logging: Option<Vec<String>>,
    /// Free-form comment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    /// Problems found by verification.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub errors: Option<Verification>,
    /// Calculated values.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub results: Option<Results>,
}

impl MeasurementRecord {
    /// Record holding an air/sample pair.
    pub fn from_pair(pair: MeasurementPair) -> Self {
        Self {
            air: Some(pair.air),
            sample: Some(pair.sample),
            ..Self::default()
        }
    }

    /// The air/sample pair, if both are present.
    pub fn pair(&self) -> Option<MeasurementPair> {
        Some(MeasurementPair::new(self.air?, self.sample?))
    }

    /// Stored concentration, if one was calculated and is finite.
    pub fn concentration(&self) -> Option<f64> {
        self.results.and_then(|r| r.concentration)
    }
}

/// Contents of a data file.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DataFile {
    /// Serial number of the instrument.
    #[serde(rename = "serialnumber", default, skip_serializing_if = "Option::is_none")]
    pub serial_number: Option<String>,
    /// Firmware version of the instrument.
    #[serde(rename = "firmwareVersion", default, skip_serializing_if = "Option::is_none")]
    pub firmware_version: Option<String>,
    /// Stored records in acquisition order.
    #[serde(default)]
    pub measurements: Vec<MeasurementRecord>,
}

impl DataFile {
    /// Empty data file for the given instrument.
    pub fn new(serial_number: Option<String>, firmware_version: Option<String>) -> Self {
        Self {
            serial_number,
            firmware_version,
            measurements: Vec::new(),
        }
    }

    /// Load a data file.
    pub fn load(path: &Path) -> EviResult<Self> {
        read_json(path)
    }

    /// Write the data file, replacing any previous content.
    pub fn save(&self, path: &Path) -> EviResult<()> {
        write_json(path, self)
    }
}
