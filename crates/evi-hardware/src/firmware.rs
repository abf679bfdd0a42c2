//! Firmware image transfer.
//!
//! The image is an S-record text file. The transfer runs on one held session:
//! `F` enters the bootloader, every non-empty line goes out as `S <line>`, and
//! `R` restarts the instrument. The device needs a while to come back after
//! the restart, so the call blocks for the configured settle time.

use std::fs::File;
use std::io::{BufRead, BufReader, ErrorKind};
use std::path::Path;
use std::time::Duration;

use evi_core::{EviError, EviResult};
use tracing::{debug, info};

use crate::device::EviFluor;

/// Default wait after the restart command.
pub const DEFAULT_SETTLE_TIME: Duration = Duration::from_secs(30);

fn accept_any(_argv: &[String]) -> EviResult<()> {
    Ok(())
}

impl EviFluor {
    /// Transfer the firmware image at `path` and wait `settle` for the
    /// restart. Returns the number of records sent.
    pub fn update_firmware(&self, path: &Path, settle: Duration) -> EviResult<usize> {
        let file = File::open(path).map_err(|e| match e.kind() {
            ErrorKind::NotFound => EviError::FileNotFound(path.to_path_buf()),
            _ => EviError::file_io(path, e),
        })?;
        let reader = BufReader::new(file);

        let mut session = self.dispatcher().open_session()?;
        session.execute("F", accept_any)?;
        info!(image = %path.display(), "Firmware transfer started");

        let mut sent = 0usize;
        for line in reader.lines() {
            let line = line.map_err(|e| EviError::file_io(path, e))?;
            let record = line.trim_end_matches(['\r', '\n']);
            if record.is_empty() {
                continue;
            }
            session.execute(&format!("S {}", record), accept_any)?;
            sent += 1;
            if sent % 100 == 0 {
                debug!(sent, "Firmware records sent");
            }
        }

        session.execute("R", accept_any)?;
        drop(session);

        info!(records = sent, settle_secs = settle.as_secs(), "Firmware transfer done, waiting for restart");
        std::thread::sleep(settle);
        Ok(sent)
    }
}
