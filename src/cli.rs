//! Command line interface of the `evifluor` binary.
//!
//! Parsing is done with clap derive. [`execute`] runs a parsed command
//! against the instrument, writing command output to the given writer;
//! diagnostics go through `tracing`.
//!
//! # Usage
//!
//! ```bash
//! evifluor --port SIMULATION measure
//! evifluor run init 1 1 10.0
//! evifluor run measure
//! evifluor export --delimiter semicolon data.json data.csv
//! ```

use std::io::Write;
use std::net::TcpListener;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::error::ErrorKind;
use clap::{Args, Parser, Subcommand, ValueEnum};
use evi_core::calibration::CalibrationParams;
use evi_core::data::DataFile;
use evi_core::error::codes;
use evi_core::EviError;
use evi_experiment::export::{export_csv, Delimiter, ExportMode, ExportOptions};
use evi_experiment::save::{calculate_file, concentration_report, save_last_measurements, SaveOptions};
use evi_experiment::workflow::default_state_file;
use evi_experiment::RunWorkflow;
use evi_hardware::simulator::serve;
use evi_hardware::{Connector, DefaultConnector, Dispatcher, EviFluor, Simulator};
use parking_lot::Mutex;
use tracing::info;

use crate::config::{EviConfig, DEFAULT_CONFIG_PATH};

/// Parsed command line.
#[derive(Parser, Debug)]
#[command(name = "evifluor", version)]
#[command(about = "Host tool for the EviFluor fluorescence instrument", long_about = None)]
pub struct Cli {
    /// Serial device path, or SIMULATION. Searched over USB when omitted.
    #[arg(long, global = true)]
    pub port: Option<String>,

    /// Use the checksummed protocol
    #[arg(long, global = true)]
    pub use_checksum: bool,

    /// Configuration file
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    /// Print debug output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to run
    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level subcommands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Get a value from the device
    Get {
        /// 0 firmware version, 1 serial number, 10 stored measurements, 15 LED power
        index: u32,
    },

    /// Set a value in the device
    Set {
        /// Value index
        index: u32,
        /// New value
        value: String,
    },

    /// Measure and print dark, value and LED power
    Measure {
        /// Print stored measurement N (0 is the latest) instead of measuring
        #[arg(long, value_name = "N", conflicts_with_all = ["first_air", "first_sample"])]
        last: Option<u32>,

        /// Measure air at the minimum and maximum LED power
        #[arg(long, conflicts_with = "first_sample")]
        first_air: bool,

        /// Run autogain, then measure
        #[arg(long)]
        first_sample: bool,
    },

    /// Start a new series of measurements
    Baseline,

    /// Run the internal selftest
    Selftest,

    /// Check whether the cuvette holder is empty
    Empty,

    /// Search the LED power reaching a target level
    Autogain {
        /// Target level, defaults to run.autogain_level
        #[arg(long)]
        level: Option<u32>,
    },

    /// Print and clear the device logging buffer
    Logging,

    /// Send a raw command, e.g. `evifluor command V 0`
    Command {
        /// Command and arguments
        #[arg(required = true, num_args = 1.., allow_hyphen_values = true)]
        text: Vec<String>,
    },

    /// Load a new firmware
    Fwupdate {
        /// S-record file
        file: PathBuf,
    },

    /// Save the last measurement(s) into a data file
    Save {
        /// Start a new file instead of appending
        #[arg(long)]
        create: bool,

        /// Store the readings as a plain list
        #[arg(long)]
        mode_raw: bool,

        /// Data file
        file: PathBuf,

        /// Comment attached to the record
        comment: Option<String>,
    },

    /// Export a data file as CSV
    Export {
        /// Field separator
        #[arg(long, value_enum, default_value_t = DelimiterArg::Comma)]
        delimiter: DelimiterArg,

        /// Export the plain reading lists
        #[arg(long)]
        mode_raw: bool,

        /// Data file
        json: PathBuf,

        /// CSV file to write
        csv: PathBuf,
    },

    /// Work on a data file
    #[command(subcommand)]
    Data(DataCommands),

    /// Guided measurement run
    Run(RunArgs),

    /// Serve the simulated instrument over TCP for `--port SIMULATION`
    Simulate {
        /// Listen address, defaults to device.simulation_address
        #[arg(long)]
        address: Option<String>,
    },
}

/// CSV field separator
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DelimiterArg {
    /// `,`
    Comma,
    /// `;`
    Semicolon,
    /// Tab
    Tab,
}

impl From<DelimiterArg> for Delimiter {
    fn from(arg: DelimiterArg) -> Self {
        match arg {
            DelimiterArg::Comma => Delimiter::Comma,
            DelimiterArg::Semicolon => Delimiter::Semicolon,
            DelimiterArg::Tab => Delimiter::Tab,
        }
    }
}

/// `data` subcommands.
#[derive(Subcommand, Debug)]
pub enum DataCommands {
    /// Recompute concentrations
    Calculate {
        /// Concentration of the low standard
        #[arg(allow_negative_numbers = true)]
        conc_low: f64,
        /// Concentration of the high standard
        #[arg(allow_negative_numbers = true)]
        conc_high: f64,
        /// Number of low standards
        nr_low: usize,
        /// Number of high standards
        nr_high: usize,
        /// Data file
        file: PathBuf,
    },

    /// Print concentration and comment of every calculated record
    Print {
        /// Data file
        file: PathBuf,
    },
}

/// Options of `run`.
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Directory of state and data files
    #[arg(long)]
    pub working_dir: Option<PathBuf>,

    /// Data file used by `init`
    #[arg(long)]
    pub file: Option<String>,

    /// State file, defaults to evifluor-SN<serial>-state.json
    #[arg(long)]
    pub state_file: Option<PathBuf>,

    /// Step to perform
    #[command(subcommand)]
    pub action: RunCommands,
}

/// `run` steps.
#[derive(Subcommand, Debug)]
pub enum RunCommands {
    /// Start a new run
    Init {
        /// Number of high standards
        nr_high: u32,
        /// Number of low standards
        nr_low: u32,
        /// Concentration of the high standard
        conc_high: f64,
    },

    /// Perform the next step of the run
    Measure {
        /// Comment for the stored record
        comment: Option<String>,
    },

    /// Check that the cuvette holder is empty
    Checkempty,

    /// Export the run's data file as CSV
    Export,
}

/// Exit status for an error returned by [`execute`].
///
/// Errors that do not originate from the driver, such as an invalid
/// configuration, report `INVALID_PARAMETER`.
pub fn exit_code(err: &anyhow::Error) -> i32 {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<EviError>())
        .map_or(codes::INVALID_PARAMETER, EviError::code)
}

/// Exit status for a command line that clap rejected.
///
/// `--help` and `--version` surface as errors too and exit with `OK`.
pub fn parse_exit_code(err: &clap::Error) -> i32 {
    match err.kind() {
        ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => codes::OK,
        _ => codes::UNKNOWN_COMMAND_LINE_ARGUMENT,
    }
}

/// Run `cli` against the instrument selected by flags and configuration.
pub fn execute(cli: Cli, config: &EviConfig, out: &mut dyn Write) -> Result<()> {
    let connector = DefaultConnector::new(config.device.transport_settings());
    execute_with(cli, config, connector, out)
}

/// Like [`execute`], opening transports through `connector`.
pub fn execute_with(
    cli: Cli,
    config: &EviConfig,
    connector: impl Connector + 'static,
    out: &mut dyn Write,
) -> Result<()> {
    let dispatcher = Dispatcher::new(connector)
        .with_optional_port(cli.port.or_else(|| config.device.port.clone()))
        .with_checksum(cli.use_checksum || config.device.use_checksum);
    let evi = EviFluor::new(dispatcher);

    match cli.command {
        Commands::Get { index } => {
            writeln!(out, "{}", evi.get(index)?)?;
        }
        Commands::Set { index, value } => evi.set(index, &value)?,
        Commands::Measure {
            last,
            first_air,
            first_sample,
        } => {
            if let Some(n) = last {
                writeln!(out, "{}", evi.last_measurement(n)?)?;
            } else if first_air {
                let first_air = evi.measure_first_air()?;
                writeln!(out, "{} {}", first_air.min, first_air.max)?;
            } else if first_sample {
                let first_sample = evi.measure_first_sample(config.run.autogain_level)?;
                writeln!(
                    out,
                    "{} {} {}",
                    first_sample.measurement,
                    u8::from(first_sample.autogain.found),
                    first_sample.autogain.led_power
                )?;
            } else {
                writeln!(out, "{}", evi.measure()?)?;
            }
        }
        Commands::Baseline => evi.baseline()?,
        Commands::Selftest => {
            let result = evi.selftest()?;
            if result == 0 {
                writeln!(out, "Selftest passed.")?;
            } else {
                writeln!(out, "Selftest failed: 0x{:08X}", result)?;
            }
        }
        Commands::Empty => {
            let text = if evi.is_cuvette_holder_empty()? {
                "Empty"
            } else {
                "Not empty"
            };
            writeln!(out, "{}", text)?;
        }
        Commands::Autogain { level } => {
            let autogain = evi.autogain(level.unwrap_or(config.run.autogain_level))?;
            writeln!(out, "{} {}", u8::from(autogain.found), autogain.led_power)?;
        }
        Commands::Logging => {
            for line in evi.drain_logging() {
                writeln!(out, "{}", line)?;
            }
        }
        Commands::Command { text } => {
            writeln!(out, "{}", evi.command(&text.join(" "))?.join(" "))?;
        }
        Commands::Fwupdate { file } => {
            let records = evi.update_firmware(&file, config.device.firmware_settle())?;
            info!(file = %file.display(), records, "Firmware update finished");
        }
        Commands::Save {
            create,
            mode_raw,
            file,
            comment,
        } => {
            let options = SaveOptions {
                create,
                raw: mode_raw,
                comment,
            };
            save_last_measurements(&evi, &file, &options)?;
        }
        Commands::Export {
            delimiter,
            mode_raw,
            json,
            csv,
        } => {
            let options = ExportOptions {
                delimiter: delimiter.into(),
                mode: if mode_raw {
                    ExportMode::Raw
                } else {
                    ExportMode::Measurement
                },
            };
            export_csv(&json, &csv, options)?;
        }
        Commands::Data(DataCommands::Calculate {
            conc_low,
            conc_high,
            nr_low,
            nr_high,
            file,
        }) => {
            let params = CalibrationParams {
                nr_std_high: nr_high,
                nr_std_low: nr_low,
                concentration_high: conc_high,
                concentration_low: conc_low,
            };
            if !calculate_file(&file, &params, &config.verification)? {
                info!(file = %file.display(), "Not enough standards to calculate concentrations");
            }
        }
        Commands::Data(DataCommands::Print { file }) => {
            for line in concentration_report(&DataFile::load(&file)?) {
                writeln!(out, "{}", line)?;
            }
        }
        Commands::Run(args) => run(&evi, args, config, out)?,
        Commands::Simulate { address } => {
            let address = address.unwrap_or_else(|| config.device.simulation_address.clone());
            simulate(&address)?;
        }
    }
    Ok(())
}

fn run(evi: &EviFluor, args: RunArgs, config: &EviConfig, out: &mut dyn Write) -> Result<()> {
    let working_dir = args
        .working_dir
        .or_else(|| config.run.working_dir.clone())
        .unwrap_or_else(|| PathBuf::from("."));
    let state_file = args
        .state_file
        .unwrap_or_else(|| PathBuf::from(default_state_file(evi)));

    let workflow = RunWorkflow::new(evi, state_file)
        .with_verification(config.verification.clone())
        .with_autogain_level(config.run.autogain_level)
        .with_working_dir(working_dir);

    match args.action {
        RunCommands::Init {
            nr_high,
            nr_low,
            conc_high,
        } => {
            let context = workflow.init(nr_high, nr_low, conc_high, args.file)?;
            writeln!(out, "{}", workflow.data_path(&context).display())?;
        }
        RunCommands::Measure { comment } => {
            let report = workflow.measure(comment.as_deref())?;
            writeln!(out, "{}", report.outcome?)?;
        }
        RunCommands::Checkempty => workflow.check_empty()?,
        RunCommands::Export => {
            let csv = workflow.export()?;
            writeln!(out, "{}", csv.display())?;
        }
    }
    Ok(())
}

fn simulate(address: &str) -> Result<()> {
    let listener = TcpListener::bind(address).with_context(|| format!("binding simulator to {}", address))?;
    let device = Mutex::new(Simulator::new());
    serve(&listener, &device).context("simulator stopped")?;
    Ok(())
}
