//! Measurement value types.
//!
//! The instrument exposes a single optical channel at 470 nm. A reading of
//! that channel is a dark (LED off) and an illuminated value taken at a given
//! LED drive level. The JSON layout matches the files written by earlier
//! versions of the host tool: `{"dark": .., "value": .., "ledPower": ..}`.

use serde::{Deserialize, Serialize};

/// One channel reading.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Channel {
    /// Background signal with the LED off.
    pub dark: f64,
    /// Signal with the LED on.
    pub value: f64,
    /// LED drive level used for `value`.
    pub led_power: u8,
}

impl Channel {
    /// Create a reading.
    pub fn new(dark: f64, value: f64, led_power: u8) -> Self {
        Self {
            dark,
            value,
            led_power,
        }
    }

    /// Usable signal, `value - dark`.
    pub fn delta(&self) -> f64 {
        self.value - self.dark
    }
}

/// Reading of every channel for one measurement.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SingleMeasurement {
    /// The 470 nm channel.
    pub channel470: Channel,
}

impl SingleMeasurement {
    /// Create a measurement from its 470 nm reading.
    pub fn new(dark: f64, value: f64, led_power: u8) -> Self {
        Self {
            channel470: Channel::new(dark, value, led_power),
        }
    }

    /// Usable signal of the 470 nm channel.
    pub fn delta(&self) -> f64 {
        self.channel470.delta()
    }

    /// Illuminated value of the 470 nm channel.
    pub fn value(&self) -> f64 {
        self.channel470.value
    }

    /// LED drive level of the 470 nm channel.
    pub fn led_power(&self) -> u8 {
        self.channel470.led_power
    }
}

impl std::fmt::Display for SingleMeasurement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:.3} {:.3} {}",
            self.channel470.dark, self.channel470.value, self.channel470.led_power
        )
    }
}

/// Air reference and sample reading that together form one result.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MeasurementPair {
    /// Reference reading with an empty (air) cuvette.
    pub air: SingleMeasurement,
    /// Reading with the sample in place.
    pub sample: SingleMeasurement,
}

impl MeasurementPair {
    /// Pair an air reference with a sample.
    pub fn new(air: SingleMeasurement, sample: SingleMeasurement) -> Self {
        Self { air, sample }
    }

    /// Sample signal corrected by the air signal.
    pub fn value(&self) -> f64 {
        self.sample.delta() - self.air.delta()
    }
}

/// Outcome of the on-device autogain search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Autogain {
    /// Whether a LED power reaching the target level was found.
    pub found: bool,
    /// LED power selected by the search.
    pub led_power: u8,
}

/// Air readings at the minimum and maximum LED power.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FirstAirMeasurement {
    /// Reading at the minimum LED power.
    pub min: SingleMeasurement,
    /// Reading at the maximum LED power.
    pub max: SingleMeasurement,
}

/// Autogain result plus the reading taken at the chosen LED power.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FirstSampleMeasurement {
    /// Result of the autogain search.
    pub autogain: Autogain,
    /// Reading at the LED power chosen by autogain.
    pub measurement: SingleMeasurement,
}
