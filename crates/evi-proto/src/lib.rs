//! `evi-proto`
//!
//! Line-oriented text protocol spoken by the EviFluor instrument.
//!
//! A request is a single command string wrapped in a frame:
//!
//! ```text
//! :V 1\n            plain frame
//! ;V 1@<crc>\n      frame with CRC-16-CCITT of "V 1" as decimal suffix
//! ```
//!
//! Replies use the same framing. The first reply token echoes the first
//! character of the command, or the reply is `E <code>` on failure.
//!
//! ## Modules
//!
//! - [`checksum`]: CRC-16-CCITT used by both directions
//! - [`frame`]: encoder and byte-wise decoder
//! - [`tokenizer`]: splits a decoded payload into owned arguments

pub mod checksum;
pub mod frame;
pub mod tokenizer;

pub use checksum::crc16_ccitt;
pub use frame::{encode, read_frame, FrameDecoder, FrameError};
pub use tokenizer::tokenize;
