//! Value indices for the `V` command.

/// Firmware version string.
pub const VERSION: u32 = 0;
/// Instrument serial number.
pub const SERIALNUMBER: u32 = 1;
/// Hardware type identifier.
pub const HARDWARETYPE: u32 = 2;
/// Number of readings retrievable with `M <n>`.
pub const LASTMEASUREMENTCOUNT: u32 = 10;
/// LED power used by the next measurement.
pub const CURRENT_LED470_POWER: u32 = 15;
/// Lowest usable LED power.
pub const LED470_MIN_POWER: u32 = 16;
/// Highest usable LED power.
pub const LED470_MAX_POWER: u32 = 17;
