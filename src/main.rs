//! CLI entry point for evifluor
//!
//! Talks to an EviFluor instrument over its USB serial port, or to the
//! simulator with `--port SIMULATION`. The exit status is the numeric code
//! of the error that ended the command, 0 on success.
//!
//! # Usage
//!
//! ```bash
//! evifluor get 0
//! evifluor --use-checksum measure
//! evifluor simulate &
//! evifluor --port SIMULATION run init 1 1 10.0
//! ```

use std::io::Write;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use evifluor::cli::{self, Cli};
use evifluor::config::EviConfig;
use evifluor::logging;
use tracing::debug;

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let code = cli::parse_exit_code(&e);
            if let Err(io) = e.print() {
                // Help or usage could not be written; still exit with the parse status
                eprintln!("Error {}: {}", code, io);
            }
            return exit_status(code);
        }
    };

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            let code = cli::exit_code(&e);
            // Printed directly: tracing may not be initialized yet
            eprintln!("Error {}: {:#}", code, e);
            exit_status(code)
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let config = EviConfig::load_from(&cli.config)
        .with_context(|| format!("loading configuration from {}", cli.config.display()))?;
    config.validate().map_err(anyhow::Error::msg)?;
    logging::init_from_config(&config, cli.verbose).map_err(anyhow::Error::msg)?;
    debug!(config = %cli.config.display(), port = ?cli.port, "Starting");

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    cli::execute(cli, &config, &mut out)?;
    out.flush()?;
    Ok(())
}

fn exit_status(code: i32) -> ExitCode {
    ExitCode::from(u8::try_from(code).unwrap_or(u8::MAX))
}
