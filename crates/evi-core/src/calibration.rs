//! Two-point linear calibration.
//!
//! Concentrations are derived from the air-corrected signal of a pair
//! (`delta(sample) - delta(air)`) using a straight line through two standards
//! of known concentration. The standards are the first records of a data
//! file: `nr_std_high` high-standard records, followed by `nr_std_low`
//! low-standard records, followed by the samples.
//!
//! Equal standard values make the line degenerate. The resulting
//! concentrations are non-finite; they are returned as such rather than
//! reported as errors.

use tracing::debug;

use crate::data::{MeasurementRecord, Results};
use crate::error::{EviError, EviResult};
use crate::measurement::{MeasurementPair, SingleMeasurement};
use crate::verification::{ProblemId, VerificationConfig};

/// Averaged pair value at a known concentration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CalibrationPoint {
    /// Known concentration of the standard.
    pub concentration: f64,
    /// Averaged pair value measured for the standard.
    pub value: f64,
}

/// The two standards spanning the calibration line.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CalibrationFactors {
    /// Low standard.
    pub std_low: CalibrationPoint,
    /// High standard.
    pub std_high: CalibrationPoint,
}

/// Maps a measured value onto a concentration given two standards.
pub trait Kit {
    /// Concentration for `value`.
    fn fit(&self, std_low: &CalibrationPoint, std_high: &CalibrationPoint, value: f64) -> f64;
}

/// Straight line through both standards.
#[derive(Debug, Clone, Copy, Default)]
pub struct LinearKit;

impl Kit for LinearKit {
    fn fit(&self, std_low: &CalibrationPoint, std_high: &CalibrationPoint, value: f64) -> f64 {
        let slope = (std_high.concentration - std_low.concentration) / (std_high.value - std_low.value);
        let intercept = std_high.concentration - slope * std_high.value;
        slope * value + intercept
    }
}

/// Average pair value of `count` records starting at `start`.
pub fn calculate_point(
    records: &[MeasurementRecord],
    concentration: f64,
    start: usize,
    count: usize,
) -> EviResult<CalibrationPoint> {
    if count == 0 {
        return Err(EviError::InvalidParameter(
            "calibration point needs at least one record".into(),
        ));
    }
    let end = start
        .checked_add(count)
        .filter(|end| *end <= records.len())
        .ok_or_else(|| {
            EviError::InvalidParameter(format!(
                "records {}..{} requested but only {} stored",
                start,
                start.saturating_add(count),
                records.len()
            ))
        })?;

    let mut sum = 0.0;
    for (index, record) in records[start..end].iter().enumerate() {
        let pair = record.pair().ok_or_else(|| {
            EviError::InvalidParameter(format!("record {} has no air/sample pair", start + index))
        })?;
        sum += pair.value();
    }

    Ok(CalibrationPoint {
        concentration,
        value: sum / count as f64,
    })
}

/// Combine two standards into calibration factors.
pub fn calculate_factors(
    concentration_low: f64,
    concentration_high: f64,
    std_low: CalibrationPoint,
    std_high: CalibrationPoint,
) -> CalibrationFactors {
    CalibrationFactors {
        std_low: CalibrationPoint {
            concentration: concentration_low,
            value: std_low.value,
        },
        std_high: CalibrationPoint {
            concentration: concentration_high,
            value: std_high.value,
        },
    }
}

/// Concentration of `pair` on the linear calibration line.
pub fn concentration(pair: &MeasurementPair, factors: &CalibrationFactors) -> f64 {
    concentration_with(&LinearKit, pair, factors)
}

/// Concentration of `pair` using `kit`.
pub fn concentration_with(kit: &dyn Kit, pair: &MeasurementPair, factors: &CalibrationFactors) -> f64 {
    kit.fit(&factors.std_low, &factors.std_high, pair.value())
}

/// Synthesize a reading at `led_power` by interpolating dark and value
/// between two readings taken at different LED powers.
pub fn adjust_to_led_power(min: &SingleMeasurement, max: &SingleMeasurement, led_power: u8) -> SingleMeasurement {
    let span = f64::from(max.led_power()) - f64::from(min.led_power());
    let offset = f64::from(led_power) - f64::from(min.led_power());
    let lo = min.channel470;
    let hi = max.channel470;

    SingleMeasurement::new(
        lo.dark + (hi.dark - lo.dark) / span * offset,
        lo.value + (hi.value - lo.value) / span * offset,
        led_power,
    )
}

/// Parameters describing where the standards are stored.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CalibrationParams {
    /// Number of high-standard records at the start of the data.
    pub nr_std_high: usize,
    /// Number of low-standard records following the high standards.
    pub nr_std_low: usize,
    /// Concentration of the high standard.
    pub concentration_high: f64,
    /// Concentration of the low standard.
    pub concentration_low: f64,
}

/// Recompute `results` and the negative-concentration check of every record.
///
/// Returns `Ok(false)` without touching the records when there are not yet
/// enough records to cover both standards. Records without an air/sample
/// pair are left unchanged.
pub fn recalculate(
    records: &mut [MeasurementRecord],
    params: &CalibrationParams,
    config: &VerificationConfig,
) -> EviResult<bool> {
    let standards = params.nr_std_high + params.nr_std_low;
    if params.nr_std_high == 0 || params.nr_std_low == 0 || records.len() < standards {
        debug!(
            records = records.len(),
            standards, "Not enough records to calculate concentrations"
        );
        return Ok(false);
    }

    let std_high = calculate_point(records, params.concentration_high, 0, params.nr_std_high)?;
    let std_low = calculate_point(
        records,
        params.concentration_low,
        params.nr_std_high,
        params.nr_std_low,
    )?;
    let factors = calculate_factors(params.concentration_low, params.concentration_high, std_low, std_high);

    for record in records.iter_mut() {
        let Some(pair) = record.pair() else {
            continue;
        };
        let value = concentration(&pair, &factors);
        record.results = Some(Results {
            concentration: Some(value),
        });

        let mut verification = record
            .errors
            .as_ref()
            .map(|v| v.without(ProblemId::NegativeConcentration))
            .unwrap_or_default();
        verification.check_concentration(config, value);
        record.errors = verification.failed().then_some(verification);
    }

    Ok(true)
}
