//! Frame encoding and decoding.
//!
//! ```text
//! START payload [ '@' decimal-crc ] STOP
//!
//! START: ':' plain, ';' checksummed
//! STOP:  '\n' or '\r'
//! ```
//!
//! The decoder accepts either start marker regardless of whether the local
//! side sends checksums; the marker it sees decides whether the frame is
//! validated. A checksum mismatch is reported as an error and never retried.

use std::io::{ErrorKind, Read};

use thiserror::Error;
use tracing::debug;

use crate::checksum::crc16_ccitt;

/// Start marker of a frame without checksum.
pub const START_PLAIN: u8 = b':';
/// Start marker of a frame carrying a checksum suffix.
pub const START_CHECKSUM: u8 = b';';
/// Separates the payload from its decimal checksum.
pub const CHECKSUM_SEPARATOR: u8 = b'@';
/// Terminator written after every encoded frame.
pub const STOP: u8 = b'\n';
/// Longest payload accepted by the decoder.
pub const MAX_LINE_LENGTH: usize = 255;

/// Errors produced while decoding a frame.
#[derive(Debug, Error)]
pub enum FrameError {
    /// The received checksum does not match the payload.
    #[error("Checksum mismatch: received {received}, calculated {calculated}")]
    ChecksumMismatch {
        /// Value parsed from the frame.
        received: u32,
        /// CRC computed over the payload.
        calculated: u16,
    },

    /// A checksummed frame arrived without the separator.
    #[error("Checksummed frame has no '@' separator: {0}")]
    MissingChecksum(String),

    /// The checksum field is not a decimal number.
    #[error("Invalid checksum field '{0}'")]
    InvalidChecksum(String),

    /// The payload exceeded [`MAX_LINE_LENGTH`].
    #[error("Frame exceeds {MAX_LINE_LENGTH} bytes")]
    TooLong,

    /// The transport failed or was closed.
    #[error("Transport I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Wrap `command` into wire bytes.
pub fn encode(command: &str, use_checksum: bool) -> Vec<u8> {
    let mut frame = Vec::with_capacity(command.len() + 8);
    if use_checksum {
        frame.push(START_CHECKSUM);
        frame.extend_from_slice(command.as_bytes());
        frame.push(CHECKSUM_SEPARATOR);
        frame.extend_from_slice(crc16_ccitt(command.as_bytes()).to_string().as_bytes());
    } else {
        frame.push(START_PLAIN);
        frame.extend_from_slice(command.as_bytes());
    }
    frame.push(STOP);
    frame
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
enum DecoderState {
    #[default]
    Searching,
    Collecting {
        checksummed: bool,
    },
}

/// Incremental frame decoder fed one byte at a time.
///
/// Bytes before a start marker are ignored. Once a frame completes the
/// decoder resets and can be fed the next frame.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    state: DecoderState,
    payload: Vec<u8>,
    separator: Option<usize>,
    last_checksummed: bool,
}

impl FrameDecoder {
    /// Create a decoder waiting for a start marker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one byte. Returns the decoded payload when a stop marker
    /// completes a frame.
    pub fn push(&mut self, byte: u8) -> Option<Result<String, FrameError>> {
        match self.state {
            DecoderState::Searching => {
                if byte == START_PLAIN || byte == START_CHECKSUM {
                    self.last_checksummed = byte == START_CHECKSUM;
                    self.state = DecoderState::Collecting {
                        checksummed: self.last_checksummed,
                    };
                }
                None
            }
            DecoderState::Collecting { checksummed } => {
                if byte == b'\n' || byte == b'\r' {
                    let result = self.finish(checksummed);
                    self.reset();
                    return Some(result);
                }
                if self.payload.len() >= MAX_LINE_LENGTH {
                    self.reset();
                    return Some(Err(FrameError::TooLong));
                }
                if byte == CHECKSUM_SEPARATOR {
                    self.separator = Some(self.payload.len());
                }
                self.payload.push(byte);
                None
            }
        }
    }

    /// Whether the most recently started frame used the checksummed marker.
    pub fn last_frame_checksummed(&self) -> bool {
        self.last_checksummed
    }

    fn finish(&self, checksummed: bool) -> Result<String, FrameError> {
        if !checksummed {
            return Ok(String::from_utf8_lossy(&self.payload).into_owned());
        }

        let separator = self.separator.ok_or_else(|| {
            FrameError::MissingChecksum(String::from_utf8_lossy(&self.payload).into_owned())
        })?;
        let (body, suffix) = self.payload.split_at(separator);
        let suffix = String::from_utf8_lossy(&suffix[1..]).into_owned();
        let received: u32 = suffix
            .trim()
            .parse()
            .map_err(|_| FrameError::InvalidChecksum(suffix.clone()))?;
        let calculated = crc16_ccitt(body);
        if received != u32::from(calculated) {
            return Err(FrameError::ChecksumMismatch {
                received,
                calculated,
            });
        }
        Ok(String::from_utf8_lossy(body).into_owned())
    }

    fn reset(&mut self) {
        self.state = DecoderState::Searching;
        self.payload.clear();
        self.separator = None;
    }
}

/// Read from `reader` until one complete frame has been decoded.
///
/// Per-read timeouts are not errors here; the loop keeps waiting for the
/// device. End of stream is reported as [`ErrorKind::UnexpectedEof`].
/// Bytes following the stop marker in the same chunk are discarded.
pub fn read_frame<R: Read + ?Sized>(reader: &mut R) -> Result<String, FrameError> {
    let mut decoder = FrameDecoder::new();
    let mut chunk = [0u8; 64];

    loop {
        let n = match reader.read(&mut chunk) {
            Ok(0) => {
                return Err(FrameError::Io(std::io::Error::new(
                    ErrorKind::UnexpectedEof,
                    "transport closed before frame was complete",
                )))
            }
            Ok(n) => n,
            Err(e)
                if matches!(
                    e.kind(),
                    ErrorKind::TimedOut | ErrorKind::WouldBlock | ErrorKind::Interrupted
                ) =>
            {
                continue
            }
            Err(e) => return Err(FrameError::Io(e)),
        };

        for &byte in &chunk[..n] {
            if let Some(result) = decoder.push(byte) {
                if let Ok(payload) = &result {
                    debug!(payload = %payload, "Decoded frame");
                }
                return result;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::io::{self, Cursor};

    fn decode_all(bytes: &[u8]) -> Result<String, FrameError> {
        read_frame(&mut Cursor::new(bytes.to_vec()))
    }

    /// Yields scripted chunks, with timeouts in between.
    struct Chunked(VecDeque<io::Result<Vec<u8>>>);

    impl Read for Chunked {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.0.pop_front() {
                Some(Ok(bytes)) => {
                    buf[..bytes.len()].copy_from_slice(&bytes);
                    Ok(bytes.len())
                }
                Some(Err(e)) => Err(e),
                None => Ok(0),
            }
        }
    }

    #[test]
    fn test_encode_plain() {
        assert_eq!(encode("V 0", false), b":V 0\n".to_vec());
    }

    #[test]
    fn test_encode_checksummed() {
        let crc = crc16_ccitt(b"V 0");
        let expected = format!(";V 0@{}\n", crc);
        assert_eq!(encode("V 0", true), expected.into_bytes());
    }

    #[test]
    fn test_checksummed_round_trip() {
        for command in ["M", "V 1", "S S00600004844521B", "C 2000"] {
            let decoded = decode_all(&encode(command, true)).unwrap();
            assert_eq!(decoded, command);
        }
    }

    #[test]
    fn test_plain_frame_keeps_at_sign() {
        assert_eq!(decode_all(b":Q mail@host\n").unwrap(), "Q mail@host");
    }

    #[test]
    fn test_corrupted_payload_fails() {
        let mut frame = encode("V 12345", true);
        frame[3] = b'9';
        assert!(matches!(
            decode_all(&frame),
            Err(FrameError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn test_corrupted_checksum_fails() {
        let crc = crc16_ccitt(b"M 1 2 3") as u32 + 1;
        let frame = format!(";M 1 2 3@{}\n", crc);
        assert!(matches!(
            decode_all(frame.as_bytes()),
            Err(FrameError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn test_missing_separator() {
        assert!(matches!(
            decode_all(b";V 0\n"),
            Err(FrameError::MissingChecksum(_))
        ));
    }

    #[test]
    fn test_non_numeric_checksum() {
        assert!(matches!(
            decode_all(b";V 0@abc\n"),
            Err(FrameError::InvalidChecksum(_))
        ));
    }

    #[test]
    fn test_leading_noise_is_skipped() {
        assert_eq!(decode_all(b"\r\n garbage :G\r\n").unwrap(), "G");
    }

    #[test]
    fn test_carriage_return_terminates() {
        assert_eq!(decode_all(b":Y 0\r").unwrap(), "Y 0");
    }

    #[test]
    fn test_plain_reply_accepted_with_either_marker() {
        assert_eq!(decode_all(b":V 3\n").unwrap(), "V 3");
        assert_eq!(decode_all(&encode("V 3", true)).unwrap(), "V 3");
    }

    #[test]
    fn test_too_long_payload() {
        let mut frame = vec![b':'];
        frame.extend(std::iter::repeat(b'x').take(MAX_LINE_LENGTH + 1));
        frame.push(b'\n');
        assert!(matches!(decode_all(&frame), Err(FrameError::TooLong)));
    }

    #[test]
    fn test_timeouts_between_chunks_are_tolerated() {
        let mut reader = Chunked(VecDeque::from(vec![
            Err(io::Error::from(ErrorKind::TimedOut)),
            Ok(b":M 1.0 ".to_vec()),
            Err(io::Error::from(ErrorKind::WouldBlock)),
            Ok(b"2.0 40\n".to_vec()),
        ]));
        assert_eq!(read_frame(&mut reader).unwrap(), "M 1.0 2.0 40");
    }

    #[test]
    fn test_end_of_stream_is_an_error() {
        match decode_all(b":V 1") {
            Err(FrameError::Io(e)) => assert_eq!(e.kind(), ErrorKind::UnexpectedEof),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_hard_io_error_propagates() {
        let mut reader = Chunked(VecDeque::from(vec![Err(io::Error::from(
            ErrorKind::BrokenPipe,
        ))]));
        assert!(matches!(read_frame(&mut reader), Err(FrameError::Io(_))));
    }

    #[test]
    fn test_decoder_resets_between_frames() {
        let mut decoder = FrameDecoder::new();
        let mut results = Vec::new();
        for &b in b":A\n:B\n" {
            if let Some(r) = decoder.push(b) {
                results.push(r.unwrap());
            }
        }
        assert_eq!(results, vec!["A".to_string(), "B".to_string()]);
    }

    #[test]
    fn test_decoder_reports_marker_kind() {
        let mut decoder = FrameDecoder::new();
        for &b in &encode("G", true) {
            decoder.push(b);
        }
        assert!(decoder.last_frame_checksummed());
        for &b in b":G\n" {
            decoder.push(b);
        }
        assert!(!decoder.last_frame_checksummed());
    }
}
