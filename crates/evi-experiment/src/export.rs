//! CSV export of data files.
//!
//! Measurement mode writes one row per air/sample record; raw mode writes
//! one row per entry of a record's `values`, repeating the comment.

use std::path::Path;

use evi_core::data::DataFile;
use evi_core::measurement::SingleMeasurement;
use evi_core::{EviError, EviResult};
use tracing::info;

/// Field separator of the CSV output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Delimiter {
    /// `,`
    #[default]
    Comma,
    /// `;`
    Semicolon,
    /// Tab
    Tab,
}

impl Delimiter {
    /// Separator byte.
    pub fn as_byte(self) -> u8 {
        match self {
            Delimiter::Comma => b',',
            Delimiter::Semicolon => b';',
            Delimiter::Tab => b'\t',
        }
    }
}

/// Which part of each record is exported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExportMode {
    /// Air/sample pairs.
    #[default]
    Measurement,
    /// Raw `values` arrays.
    Raw,
}

/// Export settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExportOptions {
    /// Field separator.
    pub delimiter: Delimiter,
    /// Exported record part.
    pub mode: ExportMode,
}

const MEASUREMENT_HEADER: [&str; 7] = [
    "comment",
    "air dark",
    "air value",
    "air ledPower",
    "sample dark",
    "sample value",
    "sample ledPower",
];

const RAW_HEADER: [&str; 4] = ["comment", "dark", "value", "ledPower"];

fn reading_fields(reading: &SingleMeasurement) -> [String; 3] {
    [
        format!("{:.6}", reading.channel470.dark),
        format!("{:.6}", reading.channel470.value),
        reading.led_power().to_string(),
    ]
}

/// Rows of `data` as exported in `mode`, header excluded.
pub fn rows(data: &DataFile, mode: ExportMode) -> Vec<Vec<String>> {
    let mut rows = Vec::new();
    for record in &data.measurements {
        let comment = record.comment.clone().unwrap_or_default();
        match mode {
            ExportMode::Measurement => {
                if let Some(pair) = record.pair() {
                    let mut row = vec![comment];
                    row.extend(reading_fields(&pair.air));
                    row.extend(reading_fields(&pair.sample));
                    rows.push(row);
                }
            }
            ExportMode::Raw => {
                for reading in record.values.iter().flatten() {
                    let mut row = vec![comment.clone()];
                    row.extend(reading_fields(reading));
                    rows.push(row);
                }
            }
        }
    }
    rows
}

/// Export the data file at `json` to `csv`. Returns the number of rows written.
pub fn export_csv(json: &Path, csv_path: &Path, options: ExportOptions) -> EviResult<usize> {
    let data = DataFile::load(json)?;
    let rows = rows(&data, options.mode);

    let mut writer = csv::WriterBuilder::new()
        .delimiter(options.delimiter.as_byte())
        .from_path(csv_path)
        .map_err(|e| EviError::file_io(csv_path, e))?;

    let header: &[&str] = match options.mode {
        ExportMode::Measurement => &MEASUREMENT_HEADER,
        ExportMode::Raw => &RAW_HEADER,
    };
    writer
        .write_record(header)
        .map_err(|e| EviError::file_io(csv_path, e))?;
    for row in &rows {
        writer
            .write_record(row)
            .map_err(|e| EviError::file_io(csv_path, e))?;
    }
    writer.flush().map_err(|e| EviError::file_io(csv_path, e))?;

    info!(source = %json.display(), target = %csv_path.display(), rows = rows.len(), "Exported CSV");
    Ok(rows.len())
}
