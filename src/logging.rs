//! Tracing setup for the `evifluor` binary.
//!
//! Events go to stderr so that command output on stdout stays parseable.
//! `RUST_LOG` takes precedence over the configured level.
//!
//! # Example
//! ```no_run
//! use evifluor::logging::{self, OutputFormat, TracingConfig};
//! use tracing::Level;
//!
//! logging::init(TracingConfig::new(Level::DEBUG).with_format(OutputFormat::Compact))?;
//! tracing::info!(port = "SIMULATION", "Connected");
//! # Ok::<(), String>(())
//! ```

use serde::{Deserialize, Serialize};
use tracing::Level;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::config::EviConfig;

/// Output format for tracing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Pretty-printed format with colors
    #[default]
    Pretty,
    /// One line per event, no colors
    Compact,
    /// JSON, one object per event
    Json,
}

/// Tracing configuration options
#[derive(Debug, Clone)]
pub struct TracingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: Level,
    /// Output format
    pub format: OutputFormat,
    /// Whether to include file and line numbers
    pub with_file_and_line: bool,
    /// Whether to enable ANSI colors (only for Pretty format)
    pub with_ansi: bool,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            format: OutputFormat::Pretty,
            with_file_and_line: false,
            with_ansi: true,
        }
    }
}

impl TracingConfig {
    /// Create tracing config from the logging section
    pub fn from_config(config: &EviConfig) -> Result<Self, String> {
        let level = parse_log_level(&config.logging.level)?;

        Ok(Self {
            level,
            format: config.logging.format,
            ..Default::default()
        })
    }

    /// Create tracing config with custom settings
    pub fn new(level: Level) -> Self {
        Self {
            level,
            ..Default::default()
        }
    }

    /// Set output format
    pub fn with_format(mut self, format: OutputFormat) -> Self {
        self.format = format;
        self
    }

    /// Raise the level to at least `DEBUG`.
    pub fn verbose(mut self) -> Self {
        if self.level < Level::DEBUG {
            self.level = Level::DEBUG;
        }
        self
    }

    /// Enable or disable ANSI colors
    pub fn with_ansi(mut self, enabled: bool) -> Self {
        self.with_ansi = enabled;
        self
    }
}

/// Initialize tracing from the loaded configuration
pub fn init_from_config(config: &EviConfig, verbose: bool) -> Result<(), String> {
    let mut tracing_config = TracingConfig::from_config(config)?;
    if verbose {
        tracing_config = tracing_config.verbose();
    }
    init(tracing_config)
}

/// Initialize tracing with custom configuration
///
/// Calling this again after a subscriber has been installed returns `Ok(())`.
pub fn init(config: TracingConfig) -> Result<(), String> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.as_str().to_lowercase()));

    let layer = match config.format {
        OutputFormat::Pretty => fmt::layer()
            .pretty()
            .with_writer(std::io::stderr)
            .with_file(config.with_file_and_line)
            .with_line_number(config.with_file_and_line)
            .with_ansi(config.with_ansi)
            .boxed(),
        OutputFormat::Compact => fmt::layer()
            .compact()
            .with_writer(std::io::stderr)
            .with_file(config.with_file_and_line)
            .with_line_number(config.with_file_and_line)
            .with_ansi(false)
            .boxed(),
        OutputFormat::Json => fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_file(config.with_file_and_line)
            .with_line_number(config.with_file_and_line)
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(layer.with_filter(env_filter))
        .try_init()
        .or_else(|e| {
            // Tests and embedding applications may have installed one already
            if e.to_string().contains("a global default trace dispatcher has already been set") {
                Ok(())
            } else {
                Err(format!("Failed to initialize tracing: {}", e))
            }
        })
}

/// Parse log level string into tracing Level
pub fn parse_log_level(level: &str) -> Result<Level, String> {
    match level.to_lowercase().as_str() {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        _ => Err(format!(
            "Invalid log level '{}'. Must be one of: trace, debug, info, warn, error",
            level
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_log_level() {
        assert_eq!(parse_log_level("trace"), Ok(Level::TRACE));
        assert_eq!(parse_log_level("debug"), Ok(Level::DEBUG));
        assert_eq!(parse_log_level("info"), Ok(Level::INFO));
        assert_eq!(parse_log_level("warn"), Ok(Level::WARN));
        assert_eq!(parse_log_level("error"), Ok(Level::ERROR));

        // Case insensitive
        assert_eq!(parse_log_level("INFO"), Ok(Level::INFO));
        assert_eq!(parse_log_level("Debug"), Ok(Level::DEBUG));

        assert!(parse_log_level("invalid").is_err());
    }

    #[test]
    fn test_tracing_config_from_config() {
        let mut config = EviConfig::default();
        config.logging.level = "warn".to_string();
        config.logging.format = OutputFormat::Json;

        let tracing_config = TracingConfig::from_config(&config).unwrap();
        assert_eq!(tracing_config.level, Level::WARN);
        assert_eq!(tracing_config.format, OutputFormat::Json);
    }

    #[test]
    fn test_verbose_raises_level_only() {
        assert_eq!(TracingConfig::new(Level::WARN).verbose().level, Level::DEBUG);
        assert_eq!(TracingConfig::new(Level::TRACE).verbose().level, Level::TRACE);
    }

    #[test]
    fn test_init_twice() {
        let config = TracingConfig::new(Level::ERROR).with_format(OutputFormat::Compact);
        assert!(init(config.clone()).is_ok());
        assert!(init(config).is_ok());
    }
}
