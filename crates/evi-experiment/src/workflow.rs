//! Guided measurement run.
//!
//! A run is driven by repeated `evifluor run measure` invocations. Each call
//! loads the [`RunContext`], performs the step selected by its state, writes
//! the data file, recomputes concentrations and saves the context again:
//!
//! ```text
//! FirstAir -> FirstSample -> Air -> Sample -> Air -> Sample -> ...
//! ```
//!
//! The first sample is always the first high standard. Its air reference is
//! interpolated from the first-air readings at the LED power autogain chose.
//! Later samples pair with the air reading taken in the preceding step.
//!
//! Device failures do not stop the sequence. They are written to the run log
//! with their numeric code and the state advances anyway, so the operator can
//! continue with the next cuvette.
//!
//! The state file is not locked; concurrent invocations on the same file race.

use std::path::{Path, PathBuf};

use chrono::Local;
use evi_core::calibration::{adjust_to_led_power, recalculate};
use evi_core::data::{DataFile, MeasurementRecord};
use evi_core::measurement::{FirstAirMeasurement, FirstSampleMeasurement, MeasurementPair, SingleMeasurement};
use evi_core::verification::{Hints, Verification, VerificationConfig};
use evi_core::{EviError, EviResult};
use evi_hardware::device::DEFAULT_AUTOGAIN_LEVEL;
use evi_hardware::EviFluor;
use tracing::{debug, info, warn};

use crate::context::{timestamp, RunContext, RunState};
use crate::export::{export_csv, Delimiter, ExportMode, ExportOptions};
use crate::save::open_data_file;

/// State file name for the instrument, `state.json` if its serial number
/// cannot be read.
pub fn default_state_file(evi: &EviFluor) -> String {
    match evi.serial_number() {
        Ok(sn) => format!("evifluor-SN{}-state.json", sn),
        Err(e) => {
            warn!(error = %e, "Serial number unavailable, using state.json");
            "state.json".to_string()
        }
    }
}

/// Time-stamped data file name for the instrument.
pub fn default_data_file(evi: &EviFluor) -> String {
    let sn = evi.serial_number().unwrap_or_else(|_| "0".to_string());
    format!("evifluor-SN{}-{}.json", sn, Local::now().format("%Y_%m_%d_%H_%M_%S"))
}

/// Readings produced by one step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StepOutcome {
    /// Air at both LED limits.
    FirstAir(FirstAirMeasurement),
    /// Autogain and first standard.
    FirstSample(FirstSampleMeasurement),
    /// Air reference.
    Air(SingleMeasurement),
    /// Sample.
    Sample(SingleMeasurement),
}

impl std::fmt::Display for StepOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StepOutcome::FirstAir(first_air) => {
                write!(f, "First air: {} {}", first_air.min, first_air.max)
            }
            StepOutcome::FirstSample(first_sample) => write!(
                f,
                "First sample: {} {} {}",
                first_sample.measurement,
                u8::from(first_sample.autogain.found),
                first_sample.autogain.led_power
            ),
            StepOutcome::Air(air) => write!(f, "Air: {}", air),
            StepOutcome::Sample(sample) => write!(f, "Sample: {}", sample),
        }
    }
}

/// Result of one `measure` call.
#[derive(Debug)]
pub struct StepReport {
    /// Step that was performed.
    pub step: RunState,
    /// Readings, or the failure of the step.
    pub outcome: EviResult<StepOutcome>,
    /// State after the step.
    pub state: RunState,
    /// Record count after the step.
    pub count: u32,
}

/// Run workflow bound to one instrument and one state file.
pub struct RunWorkflow<'a> {
    evi: &'a EviFluor,
    config: VerificationConfig,
    autogain_level: u32,
    working_dir: PathBuf,
    state_file: PathBuf,
}

impl<'a> RunWorkflow<'a> {
    /// Workflow keeping its context in `state_file`.
    pub fn new(evi: &'a EviFluor, state_file: impl Into<PathBuf>) -> Self {
        Self {
            evi,
            config: VerificationConfig::default(),
            autogain_level: DEFAULT_AUTOGAIN_LEVEL,
            working_dir: PathBuf::from("."),
            state_file: state_file.into(),
        }
    }

    /// Thresholds used by the checks.
    pub fn with_verification(mut self, config: VerificationConfig) -> Self {
        self.config = config;
        self
    }

    /// Target level of the first-sample autogain.
    pub fn with_autogain_level(mut self, level: u32) -> Self {
        self.autogain_level = level;
        self
    }

    /// Directory relative state and data file names are resolved against.
    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = dir.into();
        self
    }

    /// Resolved path of the state file.
    pub fn state_path(&self) -> PathBuf {
        self.resolve(&self.state_file)
    }

    /// Resolved path of the context's data file.
    pub fn data_path(&self, context: &RunContext) -> PathBuf {
        self.resolve(Path::new(&context.data_file))
    }

    fn resolve(&self, file: &Path) -> PathBuf {
        if file.is_absolute() {
            file.to_path_buf()
        } else {
            self.working_dir.join(file)
        }
    }

    /// Load the current context.
    pub fn context(&self) -> EviResult<RunContext> {
        RunContext::load(&self.state_path())
    }

    /// Start a new run, replacing any previous context.
    pub fn init(
        &self,
        nr_std_high: u32,
        nr_std_low: u32,
        concentration_std_high: f64,
        data_file: Option<String>,
    ) -> EviResult<RunContext> {
        let data_file = data_file.unwrap_or_else(|| default_data_file(self.evi));
        let mut context = RunContext::new(nr_std_high, nr_std_low, concentration_std_high, data_file);
        context.add_log("Created");
        self.evi.clear_logging();
        context.save(&self.state_path())?;

        info!(
            nr_std_high,
            nr_std_low,
            concentration_std_high,
            state_file = %self.state_path().display(),
            data_file = %context.data_file,
            "Run initialized"
        );
        Ok(context)
    }

    /// Perform the next step.
    ///
    /// Only a context that cannot be loaded or saved fails the call; the
    /// step's own failure is reported in [`StepReport::outcome`].
    pub fn measure(&self, comment: Option<&str>) -> EviResult<StepReport> {
        let state_path = self.state_path();
        let mut context = RunContext::load(&state_path)?;
        let report = self.step(&mut context, comment);
        self.recalculate(&context);
        context.save(&state_path)?;
        Ok(report)
    }

    /// Check that the cuvette holder is empty.
    pub fn check_empty(&self) -> EviResult<()> {
        let state_path = self.state_path();
        let mut context = RunContext::load(&state_path)?;
        let result = self.evi.is_cuvette_holder_empty();
        let (code, empty) = match &result {
            Ok(empty) => (0, *empty),
            Err(e) => (e.code(), false),
        };
        context.add_log(format!("check empty ret:{} empty:{}", code, u8::from(empty)));
        context.save(&state_path)?;

        if result? {
            Ok(())
        } else {
            Err(EviError::CuvetteHolderNotEmpty)
        }
    }

    /// Export the run's data file next to it as `;`-separated CSV.
    pub fn export(&self) -> EviResult<PathBuf> {
        let state_path = self.state_path();
        let context = RunContext::load(&state_path)?;
        let json = self.data_path(&context);
        let csv = json.with_extension("csv");
        let options = ExportOptions {
            delimiter: Delimiter::Semicolon,
            mode: ExportMode::Measurement,
        };
        let result = export_csv(&json, &csv, options);
        context.save(&state_path)?;
        result.map(|_| csv)
    }

    fn step(&self, context: &mut RunContext, comment: Option<&str>) -> StepReport {
        let step = context.state;
        let outcome = match step {
            RunState::FirstAir => {
                let outcome = self.first_air(context);
                context.add_log(format!("measure() first air ret:{}", result_code(&outcome)));
                context.state = RunState::FirstSample;
                outcome
            }
            RunState::FirstSample => {
                let outcome = self.first_sample(context, comment);
                context.add_log(format!("measure() first sample ret:{}", result_code(&outcome)));
                context.state = RunState::Air;
                context.count += 1;
                outcome
            }
            RunState::Air => {
                let outcome = self.air(context);
                context.add_log(format!("measure() air ret:{}", result_code(&outcome)));
                context.state = RunState::Sample;
                outcome
            }
            RunState::Sample => {
                let outcome = self.sample(context, comment);
                context.add_log(format!("measure() sample ret:{}", result_code(&outcome)));
                context.state = RunState::Air;
                context.count += 1;
                outcome
            }
        };

        match &outcome {
            Ok(readings) => info!(step = %step, next = %context.state, count = context.count, "{}", readings),
            Err(e) => warn!(step = %step, next = %context.state, code = e.code(), error = %e, "Run step failed"),
        }

        StepReport {
            step,
            outcome,
            state: context.state,
            count: context.count,
        }
    }

    fn first_air(&self, context: &mut RunContext) -> EviResult<StepOutcome> {
        let first_air = self.evi.measure_first_air()?;
        let mut verification = Verification::new();
        verification.check_first_air(&self.config, &first_air);
        context.verification = verification;
        context.data.first_air = Some(first_air);
        Ok(StepOutcome::FirstAir(first_air))
    }

    fn first_sample(&self, context: &mut RunContext, comment: Option<&str>) -> EviResult<StepOutcome> {
        let first_sample = self.evi.measure_first_sample(self.autogain_level)?;
        context.verification.check_first_sample(&self.config, &first_sample);

        let first_air = context
            .data
            .first_air
            .ok_or_else(|| EviError::InvalidParameter("run has no first air reference".into()))?;
        let air = adjust_to_led_power(&first_air.min, &first_air.max, first_sample.measurement.led_power());
        self.append_record(context, MeasurementPair::new(air, first_sample.measurement), comment, false)?;
        Ok(StepOutcome::FirstSample(first_sample))
    }

    fn air(&self, context: &mut RunContext) -> EviResult<StepOutcome> {
        let air = self.evi.measure()?;
        let mut verification = Verification::new();
        verification.check_single(&self.config, &air, Hints::MUST_HAVE_CUVETTE);
        context.verification = verification;
        context.data.air = Some(air);
        Ok(StepOutcome::Air(air))
    }

    fn sample(&self, context: &mut RunContext, comment: Option<&str>) -> EviResult<StepOutcome> {
        let sample = self.evi.measure()?;
        context
            .verification
            .check_single(&self.config, &sample, Hints::MUST_HAVE_CUVETTE);

        let air = context
            .data
            .air
            .ok_or_else(|| EviError::InvalidParameter("run has no air reference".into()))?;
        self.append_record(context, MeasurementPair::new(air, sample), comment, true)?;
        Ok(StepOutcome::Sample(sample))
    }

    fn append_record(
        &self,
        context: &RunContext,
        pair: MeasurementPair,
        comment: Option<&str>,
        append: bool,
    ) -> EviResult<()> {
        let path = self.data_path(context);
        let mut data = open_data_file(self.evi, &path, append)?;

        let mut record = MeasurementRecord::from_pair(pair);
        record.date_time = Some(timestamp());
        record.logging = Some(self.evi.drain_logging());
        record.comment = Some(comment.map_or_else(|| context.auto_comment(), str::to_string));
        record.errors = context
            .verification
            .failed()
            .then(|| context.verification.clone());

        data.measurements.push(record);
        data.save(&path)?;
        debug!(file = %path.display(), records = data.measurements.len(), "Record appended");
        Ok(())
    }

    fn recalculate(&self, context: &RunContext) {
        if context.data_file.is_empty() {
            return;
        }
        let path = self.data_path(context);
        if !path.exists() {
            return;
        }

        let params = context.calibration_params();
        let result = DataFile::load(&path).and_then(|mut data| {
            let calculated = recalculate(&mut data.measurements, &params, &self.config)?;
            if calculated {
                data.save(&path)?;
            }
            Ok(calculated)
        });
        match result {
            Ok(calculated) => debug!(calculated, "Concentrations recomputed"),
            Err(e) => warn!(file = %path.display(), error = %e, "Recomputing concentrations failed"),
        }
    }
}

fn result_code<T>(result: &EviResult<T>) -> i32 {
    match result {
        Ok(_) => 0,
        Err(e) => e.code(),
    }
}
