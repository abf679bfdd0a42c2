//! Plausibility checks on measurement results.
//!
//! A [`Verification`] collects [`ProblemId`]s while a measurement is checked.
//! Problems are recorded at most once each, in the order they were first
//! found, and the list never holds more than [`MAX_ENTRIES`] codes. Failed
//! checks are diagnostics attached to the stored data; they never prevent a
//! measurement from being saved.
//!
//! All thresholds live in [`VerificationConfig`], which every check takes by
//! reference.
//!
//! # Example
//!
//! ```
//! use evi_core::measurement::SingleMeasurement;
//! use evi_core::verification::{Hints, ProblemId, Verification, VerificationConfig};
//!
//! let config = VerificationConfig::default();
//! let mut verification = Verification::new();
//! let saturated = SingleMeasurement::new(0.0, 2600.0, 100);
//!
//! assert!(!verification.check_single(&config, &saturated, Hints::empty()));
//! assert!(verification.has_problem(ProblemId::Saturation));
//! ```

use bitflags::bitflags;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use tracing::warn;

use crate::measurement::{Autogain, FirstAirMeasurement, FirstSampleMeasurement, MeasurementPair, SingleMeasurement};

/// Maximum number of problems kept by one verification.
pub const MAX_ENTRIES: usize = 10;

/// Thresholds used by the checks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VerificationConfig {
    /// Expected air RFU at `min_led`.
    pub min_rfu: f64,
    /// Expected air RFU at `max_led`.
    pub max_rfu: f64,
    /// LED power at which `min_rfu` is expected.
    pub min_led: f64,
    /// LED power at which `max_rfu` is expected.
    pub max_led: f64,
    /// Factor above the expected RFU a cuvette must exceed.
    pub threshold_multiplier: f64,
    /// Raw values at or above this are saturated.
    pub max_signal: f64,
    /// Target value of the high standard.
    pub std_high_target: f64,
    /// Accepted deviation from `std_high_target`.
    pub std_high_delta: f64,
    /// Concentrations below this are flagged negative.
    pub threshold_negative_concentration: f64,
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self {
            min_rfu: 4.5,
            max_rfu: 35.0,
            min_led: 32.0,
            max_led: 222.0,
            threshold_multiplier: 2.0,
            max_signal: 2499.0,
            std_high_target: 2000.0,
            std_high_delta: 300.0,
            threshold_negative_concentration: -0.1,
        }
    }
}

impl VerificationConfig {
    /// Check that the thresholds describe a usable interpolation.
    pub fn validate(&self) -> Result<(), String> {
        if self.min_led == self.max_led {
            return Err("verification.min_led and verification.max_led must differ".into());
        }
        if self.min_rfu > self.max_rfu {
            return Err(format!(
                "verification.min_rfu ({}) is greater than max_rfu ({})",
                self.min_rfu, self.max_rfu
            ));
        }
        if self.threshold_multiplier <= 0.0 {
            return Err(format!(
                "verification.threshold_multiplier must be positive, got {}",
                self.threshold_multiplier
            ));
        }
        Ok(())
    }

    /// RFU expected from an empty light path at `led_power`.
    pub fn expected_value(&self, led_power: u8) -> f64 {
        let slope = (self.max_rfu - self.min_rfu) / (self.max_led - self.min_led);
        self.min_rfu + slope * (f64::from(led_power) - self.min_led)
    }

    /// True if the reading is bright enough to indicate a cuvette.
    pub fn has_cuvette(&self, measurement: &SingleMeasurement) -> bool {
        measurement.delta() > self.expected_value(measurement.led_power()) * self.threshold_multiplier
    }
}

/// Problems a check can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProblemId {
    /// Signal at or above the saturation limit.
    Saturation = 1,
    /// A cuvette was expected but the signal is too low.
    CuvetteMissing = 2,
    /// LED power below the usable range. Reserved: no check reports it, but
    /// data files written by other tools may carry it.
    MinLedPower = 3,
    /// LED power above the usable range. Reserved like `MinLedPower`.
    MaxLedPower = 4,
    /// Autogain did not find a LED power.
    AutoGainResult = 5,
    /// High standard outside the target window.
    WrongLevel = 6,
    /// Concentration below the negative threshold.
    NegativeConcentration = 7,
}

impl ProblemId {
    /// Numeric id as stored in data files.
    pub fn id(self) -> u32 {
        self as u32
    }

    /// Upper-case name as stored in data files.
    pub fn name(self) -> &'static str {
        match self {
            ProblemId::Saturation => "SATURATION",
            ProblemId::CuvetteMissing => "CUVETTE_MISSING",
            ProblemId::MinLedPower => "MIN_LED_POWER",
            ProblemId::MaxLedPower => "MAX_LED_POWER",
            ProblemId::AutoGainResult => "AUTO_GAIN_RESULT",
            ProblemId::WrongLevel => "WRONG_LEVEL",
            ProblemId::NegativeConcentration => "NEGATIVE_CONCENTRATION",
        }
    }

    /// Look up a problem by its numeric id.
    pub fn from_id(id: u32) -> Option<Self> {
        Some(match id {
            1 => ProblemId::Saturation,
            2 => ProblemId::CuvetteMissing,
            3 => ProblemId::MinLedPower,
            4 => ProblemId::MaxLedPower,
            5 => ProblemId::AutoGainResult,
            6 => ProblemId::WrongLevel,
            7 => ProblemId::NegativeConcentration,
            _ => return None,
        })
    }
}

impl std::fmt::Display for ProblemId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}({})", self.name(), self.id())
    }
}

bitflags! {
    /// Context flags that enable additional checks.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Hints: u8 {
        /// A cuvette must be present.
        const MUST_HAVE_CUVETTE = 1;
        /// The reading is the high standard.
        const STD_HIGH = 1 << 1;
    }
}

/// Ordered, deduplicated set of problems found by a series of checks.
///
/// When read from JSON, entries with an unknown `problem_id` are skipped
/// with a warning so that a newer data file still loads.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Verification {
    entries: Vec<ProblemId>,
}

impl Verification {
    /// Empty verification.
    pub fn new() -> Self {
        Self::default()
    }

    /// True if at least one problem was recorded.
    pub fn failed(&self) -> bool {
        !self.entries.is_empty()
    }

    /// True if `problem` was recorded.
    pub fn has_problem(&self, problem: ProblemId) -> bool {
        self.entries.contains(&problem)
    }

    /// Recorded problems in insertion order.
    pub fn entries(&self) -> &[ProblemId] {
        &self.entries
    }

    /// Copy of this verification without `problem`.
    pub fn without(&self, problem: ProblemId) -> Self {
        Self {
            entries: self.entries.iter().copied().filter(|p| *p != problem).collect(),
        }
    }

    fn add(&mut self, problem: ProblemId) {
        if !self.has_problem(problem) && self.entries.len() < MAX_ENTRIES {
            self.entries.push(problem);
        }
    }

    /// Check the autogain outcome.
    pub fn check_autogain(&mut self, autogain: &Autogain) -> bool {
        if !autogain.found {
            self.add(ProblemId::AutoGainResult);
            return false;
        }
        true
    }

    /// Check one reading: saturation always, cuvette and level when hinted.
    pub fn check_single(
        &mut self,
        config: &VerificationConfig,
        measurement: &SingleMeasurement,
        hints: Hints,
    ) -> bool {
        let mut ok = true;
        let value = measurement.value();

        if value >= config.max_signal {
            self.add(ProblemId::Saturation);
            ok = false;
        }

        if hints.contains(Hints::MUST_HAVE_CUVETTE) && !config.has_cuvette(measurement) {
            self.add(ProblemId::CuvetteMissing);
            ok = false;
        }

        if hints.contains(Hints::STD_HIGH) {
            let low = config.std_high_target - config.std_high_delta;
            let high = config.std_high_target + config.std_high_delta;
            if !(low..=high).contains(&value) {
                self.add(ProblemId::WrongLevel);
                ok = false;
            }
        }

        ok
    }

    /// Check an air/sample pair. The air reading must show a cuvette and
    /// the sample is checked with `hints` plus the cuvette requirement.
    pub fn check_pair(&mut self, config: &VerificationConfig, pair: &MeasurementPair, hints: Hints) -> bool {
        let air = self.check_single(config, &pair.air, Hints::MUST_HAVE_CUVETTE);
        let sample = self.check_single(config, &pair.sample, hints | Hints::MUST_HAVE_CUVETTE);
        air && sample
    }

    /// Check both first-air readings for a cuvette.
    pub fn check_first_air(&mut self, config: &VerificationConfig, first_air: &FirstAirMeasurement) -> bool {
        let min = self.check_single(config, &first_air.min, Hints::MUST_HAVE_CUVETTE);
        let max = self.check_single(config, &first_air.max, Hints::MUST_HAVE_CUVETTE);
        min && max
    }

    /// Check autogain and the high-standard reading of the first sample.
    pub fn check_first_sample(
        &mut self,
        config: &VerificationConfig,
        first_sample: &FirstSampleMeasurement,
    ) -> bool {
        let autogain = self.check_autogain(&first_sample.autogain);
        let reading = self.check_single(
            config,
            &first_sample.measurement,
            Hints::MUST_HAVE_CUVETTE | Hints::STD_HIGH,
        );
        autogain && reading
    }

    /// Check a computed concentration.
    pub fn check_concentration(&mut self, config: &VerificationConfig, concentration: f64) -> bool {
        if concentration < config.threshold_negative_concentration {
            self.add(ProblemId::NegativeConcentration);
            return false;
        }
        true
    }
}

impl std::fmt::Display for Verification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<String> = self.entries.iter().map(ToString::to_string).collect();
        write!(f, "[{}]", names.join(", "))
    }
}

#[derive(Serialize, Deserialize)]
struct EntryRepr {
    problem_id: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    description: Option<String>,
}

impl Serialize for Verification {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let entries: Vec<EntryRepr> = self
            .entries
            .iter()
            .map(|p| EntryRepr {
                problem_id: p.id(),
                description: Some(p.name().to_string()),
            })
            .collect();
        entries.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Verification {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = Vec::<EntryRepr>::deserialize(deserializer)?;
        let mut verification = Verification::new();
        for entry in raw {
            match ProblemId::from_id(entry.problem_id) {
                Some(problem) => verification.add(problem),
                None => warn!(
                    problem_id = entry.problem_id,
                    description = entry.description.as_deref().unwrap_or(""),
                    "Skipping unknown verification entry"
                ),
            }
        }
        Ok(verification)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> VerificationConfig {
        VerificationConfig::default()
    }

    #[test]
    fn test_saturation_is_recorded_once() {
        let mut v = Verification::new();
        let m = SingleMeasurement::new(0.0, 2499.0, 50);
        assert!(!v.check_single(&config(), &m, Hints::empty()));
        assert!(!v.check_single(&config(), &m, Hints::empty()));
        assert_eq!(v.entries(), &[ProblemId::Saturation]);
    }

    #[test]
    fn test_below_saturation_passes() {
        let mut v = Verification::new();
        let m = SingleMeasurement::new(0.0, 2498.9, 50);
        assert!(v.check_single(&config(), &m, Hints::empty()));
        assert!(!v.failed());
    }

    #[test]
    fn test_expected_value_interpolates() {
        let c = config();
        assert!((c.expected_value(32) - 4.5).abs() < 1e-12);
        assert!((c.expected_value(222) - 35.0).abs() < 1e-12);
        assert!((c.expected_value(127) - 19.75).abs() < 1e-12);
    }

    #[test]
    fn test_cuvette_missing_only_when_hinted() {
        // expected at 32 is 4.5, threshold 9.0
        let dim = SingleMeasurement::new(1.0, 10.0, 32);
        let mut v = Verification::new();
        assert!(v.check_single(&config(), &dim, Hints::empty()));
        assert!(!v.check_single(&config(), &dim, Hints::MUST_HAVE_CUVETTE));
        assert!(v.has_problem(ProblemId::CuvetteMissing));

        let bright = SingleMeasurement::new(1.0, 10.1, 32);
        let mut v = Verification::new();
        assert!(v.check_single(&config(), &bright, Hints::MUST_HAVE_CUVETTE));
    }

    #[test]
    fn test_wrong_level_window_is_inclusive() {
        let mut v = Verification::new();
        let edge_low = SingleMeasurement::new(0.0, 1700.0, 100);
        let edge_high = SingleMeasurement::new(0.0, 2300.0, 100);
        assert!(v.check_single(&config(), &edge_low, Hints::STD_HIGH));
        assert!(v.check_single(&config(), &edge_high, Hints::STD_HIGH));

        let outside = SingleMeasurement::new(0.0, 1699.0, 100);
        assert!(!v.check_single(&config(), &outside, Hints::STD_HIGH));
        assert_eq!(v.entries(), &[ProblemId::WrongLevel]);
    }

    #[test]
    fn test_autogain_not_found() {
        let mut v = Verification::new();
        assert!(!v.check_autogain(&Autogain { found: false, led_power: 255 }));
        assert!(v.has_problem(ProblemId::AutoGainResult));
    }

    #[test]
    fn test_first_sample_collects_all_problems_in_order() {
        let mut v = Verification::new();
        let fs = FirstSampleMeasurement {
            autogain: Autogain { found: false, led_power: 222 },
            measurement: SingleMeasurement::new(0.0, 5.0, 222),
        };
        assert!(!v.check_first_sample(&config(), &fs));
        assert_eq!(
            v.entries(),
            &[ProblemId::AutoGainResult, ProblemId::CuvetteMissing, ProblemId::WrongLevel]
        );
    }

    #[test]
    fn test_negative_concentration_threshold() {
        let mut v = Verification::new();
        assert!(v.check_concentration(&config(), -0.1));
        assert!(!v.check_concentration(&config(), -0.11));
        assert!(v.has_problem(ProblemId::NegativeConcentration));
        assert!(v.check_concentration(&config(), f64::NAN));
    }

    #[test]
    fn test_custom_thresholds_are_honoured() {
        let strict = VerificationConfig {
            max_signal: 100.0,
            ..VerificationConfig::default()
        };
        let mut v = Verification::new();
        let m = SingleMeasurement::new(0.0, 150.0, 50);
        assert!(v.check_single(&config(), &m, Hints::empty()));
        assert!(!v.check_single(&strict, &m, Hints::empty()));
    }

    #[test]
    fn test_without_removes_only_that_problem() {
        let mut v = Verification::new();
        v.check_single(&config(), &SingleMeasurement::new(0.0, 3000.0, 50), Hints::empty());
        v.check_concentration(&config(), -5.0);
        let stripped = v.without(ProblemId::NegativeConcentration);
        assert_eq!(stripped.entries(), &[ProblemId::Saturation]);
    }

    #[test]
    fn test_json_representation() {
        let mut v = Verification::new();
        v.check_autogain(&Autogain { found: false, led_power: 0 });
        let json = serde_json::to_value(&v).unwrap();
        assert_eq!(
            json,
            serde_json::json!([{"problem_id": 5, "description": "AUTO_GAIN_RESULT"}])
        );
        let back: Verification = serde_json::from_value(json).unwrap();
        assert_eq!(back, v);
    }

    #[test]
    fn test_unknown_problem_id_is_skipped() {
        let json = serde_json::json!([
            {"problem_id": 1, "description": "SATURATION"},
            {"problem_id": 42, "description": "FROM_A_NEWER_FIRMWARE"},
            {"problem_id": 7}
        ]);
        let v: Verification = serde_json::from_value(json).unwrap();
        assert_eq!(v.entries(), &[ProblemId::Saturation, ProblemId::NegativeConcentration]);
    }

    #[test]
    fn test_reserved_led_power_ids_are_read_back() {
        let json = serde_json::json!([{"problem_id": 3}, {"problem_id": 4}]);
        let v: Verification = serde_json::from_value(json).unwrap();
        assert_eq!(v.entries(), &[ProblemId::MinLedPower, ProblemId::MaxLedPower]);
        assert_eq!(ProblemId::MaxLedPower.to_string(), "MAX_LED_POWER(4)");
    }

    #[test]
    fn test_hints_combination() {
        let h = Hints::MUST_HAVE_CUVETTE | Hints::STD_HIGH;
        assert!(h.contains(Hints::MUST_HAVE_CUVETTE));
        assert!(h.contains(Hints::STD_HIGH));
        assert!(!Hints::empty().contains(Hints::STD_HIGH));
    }

    #[test]
    fn test_validate_rejects_degenerate_led_range() {
        let c = VerificationConfig {
            min_led: 100.0,
            max_led: 100.0,
            ..VerificationConfig::default()
        };
        assert!(c.validate().is_err());
        assert!(config().validate().is_ok());
    }
}
