//! Typed device API.
//!
//! [`EviFluor`] wraps a [`Dispatcher`] and exposes one method per device
//! command, each checking the reply's argument count and parsing its fields.
//! Composite operations used by the run workflow ([`EviFluor::measure_first_air`],
//! [`EviFluor::measure_first_sample`], [`EviFluor::drain_logging`]) are built
//! from those primitives.

use evi_core::measurement::{Autogain, FirstAirMeasurement, FirstSampleMeasurement, SingleMeasurement};
use evi_core::EviResult;
use tracing::{debug, info};

use crate::dispatcher::{expect_args, expect_min_args, reply_field, Dispatcher};
use crate::index;

/// Default autogain target level.
pub const DEFAULT_AUTOGAIN_LEVEL: u32 = 2000;

fn parse_measurement(argv: &[String]) -> EviResult<SingleMeasurement> {
    expect_args(argv, 7)?;
    Ok(SingleMeasurement::new(
        reply_field(argv, 1)?,
        reply_field(argv, 2)?,
        reply_field(argv, 3)?,
    ))
}

/// Handle to one EviFluor instrument.
pub struct EviFluor {
    dispatcher: Dispatcher,
}

impl EviFluor {
    /// Device API on top of `dispatcher`.
    pub fn new(dispatcher: Dispatcher) -> Self {
        Self { dispatcher }
    }

    /// Underlying dispatcher.
    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Read value `index` as a string.
    pub fn get(&self, index: u32) -> EviResult<String> {
        self.dispatcher.execute(&format!("V {}", index), |argv| {
            expect_args(argv, 2)?;
            Ok(argv[1].clone())
        })
    }

    /// Write value `index`.
    pub fn set(&self, index: u32, value: &str) -> EviResult<()> {
        self.dispatcher
            .execute(&format!("V {} {}", index, value), |argv| expect_args(argv, 1))
    }

    /// Read value `index` as an LED power.
    fn get_led_power(&self, index: u32) -> EviResult<u8> {
        self.dispatcher
            .execute(&format!("V {}", index), |argv| {
                expect_args(argv, 2)?;
                reply_field(argv, 1)
            })
    }

    /// Take one reading at the current LED power.
    pub fn measure(&self) -> EviResult<SingleMeasurement> {
        self.dispatcher.execute("M", parse_measurement)
    }

    /// Stored reading `n`, where 0 is the newest.
    pub fn last_measurement(&self, n: u32) -> EviResult<SingleMeasurement> {
        self.dispatcher.execute(&format!("M {}", n), parse_measurement)
    }

    /// Number of stored readings available through [`Self::last_measurement`].
    pub fn last_measurement_count(&self) -> EviResult<u32> {
        self.dispatcher
            .execute(&format!("V {}", index::LASTMEASUREMENTCOUNT), |argv| {
                expect_args(argv, 2)?;
                reply_field(argv, 1)
            })
    }

    /// Search the LED power that brings the signal to `level`.
    pub fn autogain(&self, level: u32) -> EviResult<Autogain> {
        self.dispatcher.execute(&format!("C {}", level), |argv| {
            expect_args(argv, 3)?;
            let found: i64 = reply_field(argv, 1)?;
            Ok(Autogain {
                found: found != 0,
                led_power: reply_field(argv, 2)?,
            })
        })
    }

    /// Record a new baseline.
    pub fn baseline(&self) -> EviResult<()> {
        self.dispatcher.execute("G", |argv| expect_args(argv, 1))
    }

    /// Whether the cuvette holder is empty.
    pub fn is_cuvette_holder_empty(&self) -> EviResult<bool> {
        self.dispatcher.execute("X", |argv| {
            expect_min_args(argv, 2)?;
            let empty: i64 = reply_field(argv, 1)?;
            Ok(empty != 0)
        })
    }

    /// Run the self test and return its result bits.
    pub fn selftest(&self) -> EviResult<u32> {
        self.dispatcher.execute("Y", |argv| {
            expect_args(argv, 2)?;
            reply_field(argv, 1)
        })
    }

    /// Pop one line from the device logging buffer.
    ///
    /// An empty buffer is reported by the device as error code 11.
    pub fn logging_line(&self) -> EviResult<String> {
        self.dispatcher.execute("Q", |argv| {
            expect_args(argv, 2)?;
            Ok(argv[1].clone())
        })
    }

    /// Pop logging lines until the device reports an error.
    pub fn drain_logging(&self) -> Vec<String> {
        let mut lines = Vec::new();
        loop {
            match self.logging_line() {
                Ok(line) => lines.push(line),
                Err(e) => {
                    debug!(lines = lines.len(), reason = %e, "Logging drained");
                    return lines;
                }
            }
        }
    }

    /// Discard everything in the device logging buffer.
    pub fn clear_logging(&self) {
        let dropped = self.drain_logging().len();
        debug!(dropped, "Cleared device logging");
    }

    /// Instrument serial number.
    pub fn serial_number(&self) -> EviResult<String> {
        self.get(index::SERIALNUMBER)
    }

    /// Firmware version string.
    pub fn firmware_version(&self) -> EviResult<String> {
        self.get(index::VERSION)
    }

    /// Send `command` verbatim and return every reply token.
    pub fn command(&self, command: &str) -> EviResult<Vec<String>> {
        self.dispatcher.execute(command, |argv| Ok(argv.to_vec()))
    }

    /// Air readings at the lowest and highest usable LED power.
    pub fn measure_first_air(&self) -> EviResult<FirstAirMeasurement> {
        let min_led = self.get_led_power(index::LED470_MIN_POWER)?;
        let max_led = self.get_led_power(index::LED470_MAX_POWER)?;

        self.set(index::CURRENT_LED470_POWER, &min_led.to_string())?;
        let min = self.measure()?;
        self.set(index::CURRENT_LED470_POWER, &max_led.to_string())?;
        let max = self.measure()?;

        info!(min_led, max_led, "Measured first air");
        Ok(FirstAirMeasurement { min, max })
    }

    /// Autogain to `level`, then one reading at the chosen LED power.
    pub fn measure_first_sample(&self, level: u32) -> EviResult<FirstSampleMeasurement> {
        let autogain = self.autogain(level)?;
        let measurement = self.measure()?;
        info!(found = autogain.found, led_power = autogain.led_power, "Measured first sample");
        Ok(FirstSampleMeasurement {
            autogain,
            measurement,
        })
    }
}
