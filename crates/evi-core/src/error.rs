//! Error type shared by every EviFluor crate.
//!
//! `EviError` covers the whole taxonomy the command line tool reports, from
//! transport and framing failures up to persistence of run state.
//!
//! ## Error Hierarchy
//!
//! - **Transport**: `Timeout`, `InstrumentNotFound`, `Io`.
//! - **Protocol**: `Protocol` (wrong argument count or unparsable field),
//!   `Response` (reply neither echoes the command nor is `E <code>`),
//!   `ChecksumMismatch`.
//! - **Device**: `Device { code }` for an `E <code>` reply.
//! - **Persistence**: `FileNotFound`, `FileIo`.
//! - **Usage**: `InvalidParameter`, `InvalidNumber`,
//!   `UnknownCommandLineArgument`, `CuvetteHolderNotEmpty`.
//!
//! Every variant maps to a stable numeric code via [`EviError::code`] so the
//! binary can use it as exit status.

use std::path::PathBuf;

use evi_proto::FrameError;
use thiserror::Error;

/// Numeric codes shared with the firmware and the command line tool.
pub mod codes {
    /// Success.
    pub const OK: i32 = 0;
    /// Device did not recognise the command.
    pub const UNKNOWN_COMMAND: i32 = 1;
    /// Device rejected a parameter.
    pub const INVALID_PARAMETER: i32 = 2;
    /// Operation timed out.
    pub const TIMEOUT: i32 = 3;
    /// Firmware image could not be written to flash.
    pub const SREC_FLASH_WRITE: i32 = 4;
    /// Unsupported S-record type.
    pub const SREC_UNSUPPORTED_TYPE: i32 = 5;
    /// S-record CRC invalid.
    pub const SREC_INVALID_CRC: i32 = 6;
    /// S-record line malformed.
    pub const SREC_INVALID_STRING: i32 = 7;
    /// File does not exist.
    pub const FILE_NOT_FOUND: i32 = 8;
    /// Programming failed.
    pub const PROGRAMMING_FAILED: i32 = 9;
    /// No instrument attached.
    pub const INSTRUMENT_NOT_FOUND: i32 = 10;
    /// Device logging buffer is empty.
    pub const NO_MORE_LOGGING: i32 = 11;
    /// Unknown command line option.
    pub const UNKNOWN_COMMAND_LINE_OPTION: i32 = 50;
    /// Reply did not match the command.
    pub const RESPONSE_ERROR: i32 = 51;
    /// Reply was malformed.
    pub const PROTOCOL_ERROR: i32 = 52;
    /// Unknown command line argument.
    pub const UNKNOWN_COMMAND_LINE_ARGUMENT: i32 = 53;
    /// A number could not be parsed.
    pub const INVALID_NUMBER: i32 = 55;
    /// File could not be read or written.
    pub const FILE_IO_ERROR: i32 = 56;
    /// First code available to host-side errors.
    pub const USER: i32 = 100;
    /// Cuvette holder is occupied when it should be empty.
    pub const CUVETTE_HOLDER_NOT_EMPTY: i32 = USER + 1;
}

/// Human readable text for a device-reported code.
pub fn describe_device_code(code: i32) -> &'static str {
    match code {
        codes::OK => "OK",
        codes::UNKNOWN_COMMAND => "Unknown command",
        codes::INVALID_PARAMETER => "Invalid parameter",
        codes::TIMEOUT => "Timeout",
        codes::SREC_FLASH_WRITE => "SREC flash write error",
        codes::SREC_UNSUPPORTED_TYPE => "SREC unsupported type",
        codes::SREC_INVALID_CRC => "SREC invalid CRC",
        codes::SREC_INVALID_STRING => "SREC invalid string",
        codes::FILE_NOT_FOUND => "File not found",
        codes::PROGRAMMING_FAILED => "Programming failed",
        codes::INSTRUMENT_NOT_FOUND => "Instrument not found",
        codes::NO_MORE_LOGGING => "No more logging",
        _ => "Unknown error",
    }
}

fn device_code_text(code: &i32) -> &'static str {
    describe_device_code(*code)
}

/// Result alias used across the workspace.
pub type EviResult<T> = std::result::Result<T, EviError>;

/// Errors reported by the driver, calibration and run workflow.
#[derive(Debug, Error)]
pub enum EviError {
    /// Transport timed out.
    #[error("Timeout")]
    Timeout,

    /// No instrument matching the USB ids is attached.
    #[error("Instrument not found")]
    InstrumentNotFound,

    /// Reply had an unexpected shape.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Reply neither echoed the command nor reported an error.
    #[error("Response error: {0}")]
    Response(String),

    /// Frame checksum did not validate.
    #[error("Checksum mismatch: received {received}, calculated {calculated}")]
    ChecksumMismatch {
        /// Value parsed from the frame.
        received: u32,
        /// CRC computed over the payload.
        calculated: u16,
    },

    /// Device answered `E <code>`.
    #[error("Device error {code}: {}", device_code_text(.code))]
    Device {
        /// Code reported by the firmware.
        code: i32,
    },

    /// A required file does not exist.
    #[error("File not found: {}", .0.display())]
    FileNotFound(PathBuf),

    /// Reading, writing or parsing a file failed.
    #[error("File I/O error on {}: {message}", .path.display())]
    FileIo {
        /// File involved.
        path: PathBuf,
        /// What went wrong.
        message: String,
    },

    /// Argument outside its valid domain.
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// Text could not be parsed as a number.
    #[error("Invalid number: '{0}'")]
    InvalidNumber(String),

    /// Command line argument not understood.
    #[error("Unknown command line argument: {0}")]
    UnknownCommandLineArgument(String),

    /// Cuvette holder reported occupied.
    #[error("Cuvette holder is not empty")]
    CuvetteHolderNotEmpty,

    /// Transport I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl EviError {
    /// Numeric code for this error, used as process exit status.
    pub fn code(&self) -> i32 {
        match self {
            EviError::Timeout => codes::TIMEOUT,
            EviError::InstrumentNotFound => codes::INSTRUMENT_NOT_FOUND,
            EviError::Protocol(_) | EviError::ChecksumMismatch { .. } => codes::PROTOCOL_ERROR,
            EviError::Response(_) => codes::RESPONSE_ERROR,
            EviError::Device { code } => *code,
            EviError::FileNotFound(_) => codes::FILE_NOT_FOUND,
            EviError::FileIo { .. } | EviError::Io(_) => codes::FILE_IO_ERROR,
            EviError::InvalidParameter(_) => codes::INVALID_PARAMETER,
            EviError::InvalidNumber(_) => codes::INVALID_NUMBER,
            EviError::UnknownCommandLineArgument(_) => codes::UNKNOWN_COMMAND_LINE_ARGUMENT,
            EviError::CuvetteHolderNotEmpty => codes::CUVETTE_HOLDER_NOT_EMPTY,
        }
    }

    /// Build a [`EviError::FileIo`] from any displayable cause.
    pub fn file_io(path: impl Into<PathBuf>, cause: impl std::fmt::Display) -> Self {
        EviError::FileIo {
            path: path.into(),
            message: cause.to_string(),
        }
    }

    /// True if the device reported `code`.
    pub fn is_device_code(&self, code: i32) -> bool {
        matches!(self, EviError::Device { code: c } if *c == code)
    }
}

impl From<FrameError> for EviError {
    fn from(err: FrameError) -> Self {
        match err {
            FrameError::ChecksumMismatch {
                received,
                calculated,
            } => EviError::ChecksumMismatch {
                received,
                calculated,
            },
            FrameError::Io(e) if e.kind() == std::io::ErrorKind::TimedOut => EviError::Timeout,
            FrameError::Io(e) => EviError::Io(e),
            other => EviError::Protocol(other.to_string()),
        }
    }
}

/// Parse a numeric field, mapping failure to [`EviError::InvalidNumber`].
pub fn parse_number<T: std::str::FromStr>(text: &str) -> EviResult<T> {
    text.trim()
        .parse()
        .map_err(|_| EviError::InvalidNumber(text.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_match_firmware_table() {
        assert_eq!(EviError::Timeout.code(), 3);
        assert_eq!(EviError::InstrumentNotFound.code(), 10);
        assert_eq!(EviError::Response("x".into()).code(), 51);
        assert_eq!(EviError::Protocol("x".into()).code(), 52);
        assert_eq!(EviError::InvalidNumber("x".into()).code(), 55);
        assert_eq!(EviError::file_io("a.json", "denied").code(), 56);
        assert_eq!(EviError::FileNotFound("a.json".into()).code(), 8);
        assert_eq!(EviError::CuvetteHolderNotEmpty.code(), 101);
    }

    #[test]
    fn test_device_code_passthrough() {
        let err = EviError::Device { code: 11 };
        assert_eq!(err.code(), codes::NO_MORE_LOGGING);
        assert!(err.is_device_code(codes::NO_MORE_LOGGING));
        assert!(err.to_string().contains("No more logging"));
    }

    #[test]
    fn test_checksum_mismatch_from_frame_error() {
        let err: EviError = FrameError::ChecksumMismatch {
            received: 1,
            calculated: 2,
        }
        .into();
        assert!(matches!(err, EviError::ChecksumMismatch { .. }));
        assert_eq!(err.code(), codes::PROTOCOL_ERROR);
    }

    #[test]
    fn test_frame_too_long_is_protocol_error() {
        let err: EviError = FrameError::TooLong.into();
        assert!(matches!(err, EviError::Protocol(_)));
    }

    #[test]
    fn test_parse_number() {
        assert_eq!(parse_number::<u8>(" 42 ").unwrap(), 42);
        assert!(matches!(
            parse_number::<u8>("300"),
            Err(EviError::InvalidNumber(_))
        ));
    }
}
