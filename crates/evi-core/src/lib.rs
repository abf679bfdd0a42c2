//! `evi-core`
//!
//! Core types shared by the EviFluor driver and run workflow.
//!
//! ## Key Types
//!
//! - [`SingleMeasurement`](measurement::SingleMeasurement): one reading of the 470 nm channel
//! - [`MeasurementPair`](measurement::MeasurementPair): air reference plus sample
//! - [`Verification`](verification::Verification): deduplicated list of detected problems
//! - [`DataFile`](data::DataFile): persisted measurement records
//! - [`EviError`]: error taxonomy with stable numeric codes
//!
//! Calibration math lives in [`calibration`] and is deliberately free of I/O so
//! it can be rerun over stored data at any time.

pub mod calibration;
pub mod data;
pub mod error;
pub mod measurement;
pub mod verification;

pub use error::{EviError, EviResult};
