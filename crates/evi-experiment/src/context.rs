//! Persisted state of a run.
//!
//! The context is a JSON document rewritten after every `run` invocation:
//!
//! ```json
//! {
//!   "nrOfStdHigh": 2,
//!   "nrOfStdLow": 2,
//!   "concentrationStdHigh": 10.0,
//!   "concentrationStdLow": 0.0,
//!   "state": 2,
//!   "dataFile": "evifluor-SN1000-2024_05_01_09_30_00.json",
//!   "count": 1,
//!   "log": [{"time": "2024-05-01T09:30:00+02:00", "text": "Created"}],
//!   "data": {"firstAir": {"min": {...}, "max": {...}}, "air": {...}},
//!   "verification": []
//! }
//! ```
//!
//! Unknown fields are ignored and missing fields take their defaults, so a
//! context written by an older tool still loads.

use std::path::Path;

use chrono::{Local, SecondsFormat};
use evi_core::calibration::CalibrationParams;
use evi_core::data::{read_json, write_json};
use evi_core::measurement::{FirstAirMeasurement, SingleMeasurement};
use evi_core::verification::Verification;
use evi_core::{EviError, EviResult};
use serde::{Deserialize, Serialize};

/// Current local time as RFC 3339 with second precision.
pub fn timestamp() -> String {
    Local::now().to_rfc3339_opts(SecondsFormat::Secs, false)
}

/// Step the next `measure` call performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum RunState {
    /// Air at minimum and maximum LED power.
    #[default]
    FirstAir = 0,
    /// Autogain plus the first standard.
    FirstSample = 1,
    /// Air reference for the next sample.
    Air = 2,
    /// Sample paired with the stored air reference.
    Sample = 3,
}

impl From<RunState> for u8 {
    fn from(state: RunState) -> Self {
        state as u8
    }
}

impl TryFrom<u8> for RunState {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(RunState::FirstAir),
            1 => Ok(RunState::FirstSample),
            2 => Ok(RunState::Air),
            3 => Ok(RunState::Sample),
            other => Err(format!("invalid run state {}", other)),
        }
    }
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            RunState::FirstAir => "first air",
            RunState::FirstSample => "first sample",
            RunState::Air => "air",
            RunState::Sample => "sample",
        };
        f.write_str(name)
    }
}

/// One line of the run log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    /// RFC 3339 time the entry was written.
    pub time: String,
    /// Log text.
    pub text: String,
}

/// Readings carried between steps.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextData {
    /// Air reference at both LED limits, taken once per run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_air: Option<FirstAirMeasurement>,
    /// Air reading waiting for its sample.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub air: Option<SingleMeasurement>,
}

/// State document of one run.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RunContext {
    /// Number of high-standard measurements.
    #[serde(rename = "nrOfStdHigh")]
    pub nr_std_high: u32,
    /// Number of low-standard measurements.
    #[serde(rename = "nrOfStdLow")]
    pub nr_std_low: u32,
    /// Concentration of the high standard.
    pub concentration_std_high: f64,
    /// Concentration of the low standard.
    pub concentration_std_low: f64,
    /// Next step.
    pub state: RunState,
    /// Data file the run appends to.
    pub data_file: String,
    /// Number of records written so far.
    pub count: u32,
    /// Run log.
    pub log: Vec<LogEntry>,
    /// Readings carried between steps.
    pub data: ContextData,
    /// Problems found since the last air reference.
    pub verification: Verification,
}

impl RunContext {
    /// Fresh context at the first-air step.
    pub fn new(nr_std_high: u32, nr_std_low: u32, concentration_std_high: f64, data_file: impl Into<String>) -> Self {
        Self {
            nr_std_high,
            nr_std_low,
            concentration_std_high,
            concentration_std_low: 0.0,
            data_file: data_file.into(),
            ..Self::default()
        }
    }

    /// Load the context at `path`. A missing file yields an empty context.
    pub fn load(path: &Path) -> EviResult<Self> {
        match read_json(path) {
            Err(EviError::FileNotFound(_)) => Ok(Self::default()),
            other => other,
        }
    }

    /// Replace the file at `path` with this context.
    pub fn save(&self, path: &Path) -> EviResult<()> {
        write_json(path, self)
    }

    /// Append a timestamped entry to the run log.
    pub fn add_log(&mut self, text: impl Into<String>) {
        self.log.push(LogEntry {
            time: timestamp(),
            text: text.into(),
        });
    }

    /// Where the standards sit in the data file.
    pub fn calibration_params(&self) -> CalibrationParams {
        CalibrationParams {
            nr_std_high: self.nr_std_high as usize,
            nr_std_low: self.nr_std_low as usize,
            concentration_high: self.concentration_std_high,
            concentration_low: self.concentration_std_low,
        }
    }

    /// Comment for the record about to be written at the current count.
    pub fn auto_comment(&self) -> String {
        let count = self.count;
        let high = self.nr_std_high;
        let low = self.nr_std_low;
        let standards = high.saturating_add(low);
        if count < high {
            format!("STD High #{} {:.1} ng/ul", count.saturating_add(1), self.concentration_std_high)
        } else if count < standards {
            format!("STD Low #{} {:.1} ng/ul", count - high + 1, self.concentration_std_low)
        } else {
            format!("Sample #{}", (count - standards).saturating_add(1))
        }
    }
}
