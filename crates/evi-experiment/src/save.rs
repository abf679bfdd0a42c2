//! Data file operations outside a run: saving the device's last readings,
//! recomputing concentrations and listing results.

use std::path::Path;

use evi_core::calibration::{recalculate, CalibrationParams};
use evi_core::data::{DataFile, MeasurementRecord};
use evi_core::measurement::MeasurementPair;
use evi_core::verification::VerificationConfig;
use evi_core::{EviError, EviResult};
use evi_hardware::EviFluor;
use tracing::{info, warn};

use crate::context::timestamp;

/// How [`save_last_measurements`] writes its record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SaveOptions {
    /// Start a new data file instead of appending.
    pub create: bool,
    /// Store every reading as `values`, even when they form a pair.
    pub raw: bool,
    /// Comment attached to the record.
    pub comment: Option<String>,
}

/// Load the data file at `path` for appending, or start a new one stamped
/// with the instrument's serial number and firmware version.
///
/// A missing file starts a new one. A file that exists but cannot be parsed
/// is an error so it is never overwritten.
pub fn open_data_file(evi: &EviFluor, path: &Path, append: bool) -> EviResult<DataFile> {
    if append {
        match DataFile::load(path) {
            Ok(data) => return Ok(data),
            Err(EviError::FileNotFound(_)) => {}
            Err(e) => return Err(e),
        }
    }

    let serial_number = evi
        .serial_number()
        .map_err(|e| warn!(error = %e, "Serial number unavailable"))
        .ok();
    let firmware_version = evi
        .firmware_version()
        .map_err(|e| warn!(error = %e, "Firmware version unavailable"))
        .ok();
    Ok(DataFile::new(serial_number, firmware_version))
}

/// Append the readings the device kept from its last measurement sequence.
///
/// Two readings are stored as air (older) and sample (newer) unless raw mode
/// is requested. Any other count is stored as a `values` array, oldest first.
pub fn save_last_measurements(evi: &EviFluor, path: &Path, options: &SaveOptions) -> EviResult<MeasurementRecord> {
    let mut data = open_data_file(evi, path, !options.create)?;
    let count = evi.last_measurement_count()?;

    let mut record = if count == 2 && !options.raw {
        MeasurementRecord::from_pair(MeasurementPair::new(
            evi.last_measurement(1)?,
            evi.last_measurement(0)?,
        ))
    } else {
        let values = (0..count)
            .rev()
            .map(|n| evi.last_measurement(n))
            .collect::<EviResult<Vec<_>>>()?;
        MeasurementRecord {
            values: Some(values),
            ..MeasurementRecord::default()
        }
    };
    record.date_time = Some(timestamp());
    record.comment = options.comment.clone();

    data.measurements.push(record.clone());
    data.save(path)?;
    info!(file = %path.display(), readings = count, "Saved last measurements");
    Ok(record)
}

/// Recompute concentrations in the data file at `path` and write it back.
///
/// Returns whether concentrations could be calculated.
pub fn calculate_file(path: &Path, params: &CalibrationParams, config: &VerificationConfig) -> EviResult<bool> {
    let mut data = DataFile::load(path)?;
    let calculated = recalculate(&mut data.measurements, params, config)?;
    data.save(path)?;
    Ok(calculated)
}

/// `"<concentration> <comment>"` for every record that has results.
pub fn concentration_report(data: &DataFile) -> Vec<String> {
    data.measurements
        .iter()
        .filter(|record| record.results.is_some())
        .map(|record| {
            let mut line = String::new();
            if let Some(concentration) = record.concentration() {
                line.push_str(&format!("{:.6} ", concentration));
            }
            if let Some(comment) = &record.comment {
                line.push_str(comment);
            }
            line.trim_end().to_string()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use evi_core::data::Results;
    use evi_core::measurement::SingleMeasurement;
    use evi_hardware::{Dispatcher, SimulatedConnector, Simulator, SIMULATION};
    use std::fs;
    use tempfile::tempdir;

    fn device() -> (EviFluor, SimulatedConnector) {
        let connector = SimulatedConnector::new(Simulator::new());
        let evi = EviFluor::new(Dispatcher::new(connector.clone()).with_port(SIMULATION));
        (evi, connector)
    }

    #[test]
    fn test_save_pair_creates_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data.json");
        let (evi, _) = device();
        evi.set(15, "40").unwrap();
        evi.measure().unwrap();
        evi.set(15, "80").unwrap();
        evi.measure().unwrap();

        let options = SaveOptions {
            comment: Some("manual".into()),
            ..SaveOptions::default()
        };
        save_last_measurements(&evi, &path, &options).unwrap();
        save_last_measurements(&evi, &path, &options).unwrap();

        let data = DataFile::load(&path).unwrap();
        assert_eq!(data.serial_number.as_deref(), Some("1000"));
        assert_eq!(data.firmware_version.as_deref(), Some("1.4.2"));
        assert_eq!(data.measurements.len(), 2);
        let pair = data.measurements[0].pair().unwrap();
        assert_eq!(pair.air.led_power(), 40);
        assert_eq!(pair.sample.led_power(), 80);
        assert_eq!(data.measurements[0].comment.as_deref(), Some("manual"));
    }

    #[test]
    fn test_save_raw_and_create() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data.json");
        let (evi, _) = device();
        evi.measure().unwrap();
        evi.measure().unwrap();

        save_last_measurements(&evi, &path, &SaveOptions::default()).unwrap();
        let options = SaveOptions {
            create: true,
            raw: true,
            comment: None,
        };
        let record = save_last_measurements(&evi, &path, &options).unwrap();
        assert_eq!(record.values.map(|v| v.len()), Some(2));

        let data = DataFile::load(&path).unwrap();
        assert_eq!(data.measurements.len(), 1);
        assert!(data.measurements[0].pair().is_none());
    }

    #[test]
    fn test_save_single_reading_as_values() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data.json");
        let (evi, _) = device();
        evi.measure().unwrap();

        let record = save_last_measurements(&evi, &path, &SaveOptions::default()).unwrap();
        assert!(record.air.is_none());
        assert_eq!(record.values.map(|v| v.len()), Some(1));
    }

    #[test]
    fn test_corrupt_data_file_is_kept() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data.json");
        fs::write(&path, "not json").unwrap();
        let (evi, _) = device();
        evi.measure().unwrap();

        assert!(save_last_measurements(&evi, &path, &SaveOptions::default()).is_err());
        assert_eq!(fs::read_to_string(&path).unwrap(), "not json");
    }

    #[test]
    fn test_calculate_file_and_report() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data.json");
        let mut data = DataFile::new(None, None);
        for (value, comment) in [(1024.0, "high"), (0.0, "low"), (512.0, "sample")] {
            let mut record = MeasurementRecord::from_pair(MeasurementPair::new(
                SingleMeasurement::new(0.0, 0.0, 100),
                SingleMeasurement::new(0.0, value, 100),
            ));
            record.comment = Some(comment.into());
            data.measurements.push(record);
        }
        data.save(&path).unwrap();

        let params = CalibrationParams {
            nr_std_high: 1,
            nr_std_low: 1,
            concentration_high: 8.0,
            concentration_low: 0.0,
        };
        assert!(calculate_file(&path, &params, &VerificationConfig::default()).unwrap());

        let data = DataFile::load(&path).unwrap();
        assert_eq!(
            concentration_report(&data),
            vec!["8.000000 high", "0.000000 low", "4.000000 sample"]
        );
    }

    #[test]
    fn test_report_skips_records_without_results() {
        let mut data = DataFile::new(None, None);
        data.measurements.push(MeasurementRecord::default());
        data.measurements.push(MeasurementRecord {
            results: Some(Results { concentration: None }),
            comment: Some("degenerate".into()),
            ..MeasurementRecord::default()
        });
        assert_eq!(concentration_report(&data), vec!["degenerate"]);
    }

    #[test]
    fn test_calculate_missing_file() {
        let dir = tempdir().unwrap();
        let params = CalibrationParams {
            nr_std_high: 1,
            nr_std_low: 1,
            concentration_high: 1.0,
            concentration_low: 0.0,
        };
        assert!(matches!(
            calculate_file(&dir.path().join("x.json"), &params, &VerificationConfig::default()),
            Err(EviError::FileNotFound(_))
        ));
    }
}
