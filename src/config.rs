//! Configuration using Figment
//!
//! Settings are merged from, later sources winning:
//! 1. built-in defaults
//! 2. `config/evifluor.toml` (or the file given with `--config`)
//! 3. environment variables prefixed with `EVIFLUOR_`, `__` separating
//!    nested keys
//!
//! Command line flags are applied on top by the binary.
//!
//! # Example
//! ```no_run
//! use evifluor::config::EviConfig;
//!
//! let config = EviConfig::load_from("config/evifluor.toml")?;
//! config.validate()?;
//! println!("port: {:?}", config.device.port);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! Environment example: `EVIFLUOR_DEVICE__USE_CHECKSUM=true`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use evi_core::verification::VerificationConfig;
use evi_hardware::device::DEFAULT_AUTOGAIN_LEVEL;
use evi_hardware::firmware::DEFAULT_SETTLE_TIME;
use evi_hardware::transport::{DEFAULT_BAUD_RATE, DEFAULT_READ_TIMEOUT, DEFAULT_SIMULATION_ADDRESS};
use evi_hardware::TransportSettings;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::logging::OutputFormat;

/// Default location of the configuration file.
pub const DEFAULT_CONFIG_PATH: &str = "config/evifluor.toml";

/// Prefix of configuration environment variables.
pub const ENV_PREFIX: &str = "EVIFLUOR_";

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EviConfig {
    /// Instrument connection
    pub device: DeviceConfig,
    /// Thresholds of the measurement checks
    pub verification: VerificationConfig,
    /// Run workflow settings
    pub run: RunConfig,
    /// Log output
    pub logging: LoggingConfig,
}

/// Instrument connection settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Serial device path or `SIMULATION`. Located over USB when unset.
    pub port: Option<String>,
    /// Send checksummed frames.
    pub use_checksum: bool,
    /// Serial baud rate
    pub baud_rate: u32,
    /// Timeout of one read in milliseconds
    pub read_timeout_ms: u64,
    /// TCP address behind the `SIMULATION` port
    pub simulation_address: String,
    /// Wait after a firmware update before the device is used again
    pub firmware_settle_secs: u64,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            port: None,
            use_checksum: false,
            baud_rate: DEFAULT_BAUD_RATE,
            read_timeout_ms: DEFAULT_READ_TIMEOUT.as_millis() as u64,
            simulation_address: DEFAULT_SIMULATION_ADDRESS.to_string(),
            firmware_settle_secs: DEFAULT_SETTLE_TIME.as_secs(),
        }
    }
}

impl DeviceConfig {
    /// Settings for the default connector.
    pub fn transport_settings(&self) -> TransportSettings {
        TransportSettings {
            baud_rate: self.baud_rate,
            read_timeout: Duration::from_millis(self.read_timeout_ms),
            simulation_address: self.simulation_address.clone(),
        }
    }

    /// Firmware settle delay.
    pub fn firmware_settle(&self) -> Duration {
        Duration::from_secs(self.firmware_settle_secs)
    }
}

/// Run workflow settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Target level of the first-sample autogain
    pub autogain_level: u32,
    /// Directory holding state and data files
    pub working_dir: Option<PathBuf>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            autogain_level: DEFAULT_AUTOGAIN_LEVEL,
            working_dir: None,
        }
    }
}

/// Log output settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Logging level (trace, debug, info, warn, error)
    pub level: String,
    /// Output format
    pub format: OutputFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: OutputFormat::Pretty,
        }
    }
}

impl EviConfig {
    /// Load configuration from the default file and environment variables
    pub fn load() -> Result<Self, figment::Error> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load configuration from a specific file path
    ///
    /// A missing file is not an error; defaults and environment still apply.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, figment::Error> {
        Self::figment(path).extract()
    }

    /// The merged providers, before extraction.
    pub fn figment<P: AsRef<Path>>(path: P) -> Figment {
        Figment::from(Serialized::defaults(EviConfig::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> Result<(), String> {
        crate::logging::parse_log_level(&self.logging.level)?;

        if self.device.baud_rate == 0 {
            return Err("device.baud_rate must be positive".to_string());
        }
        if self.device.read_timeout_ms == 0 {
            return Err("device.read_timeout_ms must be positive".to_string());
        }

        self.verification.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_defaults() {
        let config = EviConfig::default();
        assert_eq!(config.device.port, None);
        assert!(!config.device.use_checksum);
        assert_eq!(config.device.baud_rate, 115_200);
        assert_eq!(config.device.read_timeout_ms, 100);
        assert_eq!(config.device.simulation_address, "127.0.0.1:5000");
        assert_eq!(config.device.firmware_settle_secs, 30);
        assert_eq!(config.run.autogain_level, 2000);
        assert_eq!(config.logging.level, "info");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempdir().unwrap();
        let config = EviConfig::figment(dir.path().join("none.toml"))
            .extract::<EviConfig>()
            .unwrap();
        assert_eq!(config.device, DeviceConfig::default());
        assert_eq!(config.verification, VerificationConfig::default());
    }

    #[test]
    fn test_file_overrides_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("evifluor.toml");
        fs::write(
            &path,
            r#"
[device]
port = "SIMULATION"
use_checksum = true
read_timeout_ms = 250

[verification]
max_signal = 3000.0

[run]
working_dir = "runs"

[logging]
format = "json"
"#,
        )
        .unwrap();

        let config = EviConfig::figment(&path).extract::<EviConfig>().unwrap();
        assert_eq!(config.device.port.as_deref(), Some("SIMULATION"));
        assert!(config.device.use_checksum);
        assert_eq!(config.device.transport_settings().read_timeout, Duration::from_millis(250));
        assert_eq!(config.device.baud_rate, 115_200);
        assert_eq!(config.verification.max_signal, 3000.0);
        assert_eq!(config.verification.min_led, 32.0);
        assert_eq!(config.run.working_dir, Some(PathBuf::from("runs")));
        assert_eq!(config.logging.format, OutputFormat::Json);
    }

    #[test]
    fn test_invalid_log_level() {
        let mut config = EviConfig::default();
        config.logging.level = "loud".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_device_settings() {
        let mut config = EviConfig::default();
        config.device.baud_rate = 0;
        assert!(config.validate().is_err());

        let mut config = EviConfig::default();
        config.device.read_timeout_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_verification_settings() {
        let mut config = EviConfig::default();
        config.verification.max_led = config.verification.min_led;
        assert!(config.validate().is_err());

        let mut config = EviConfig::default();
        config.verification.threshold_multiplier = 0.0;
        assert!(config.validate().is_err());
    }
}
