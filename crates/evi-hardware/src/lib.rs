//! `evi-hardware`
//!
//! Everything that talks to the instrument.
//!
//! ## Layers
//!
//! - [`transport`]: byte channels (serial, TCP loopback) and the [`Connector`](transport::Connector) seam
//! - [`locator`]: USB discovery of the attached instrument
//! - [`dispatcher`]: one request frame, one reply frame, reply routing
//! - [`device`]: typed command API ([`EviFluor`](device::EviFluor))
//! - [`firmware`]: S-record transfer on a held session
//! - [`simulator`]: device-side responder for tests and `evifluor simulate`
//!
//! ## Example
//!
//! ```rust,ignore
//! use evi_hardware::device::EviFluor;
//! use evi_hardware::dispatcher::Dispatcher;
//! use evi_hardware::transport::DefaultConnector;
//!
//! let evi = EviFluor::new(Dispatcher::new(DefaultConnector::default()));
//! let reading = evi.measure()?;
//! println!("{}", reading);
//! ```

pub mod device;
pub mod dispatcher;
pub mod firmware;
pub mod index;
pub mod locator;
pub mod simulator;
pub mod transport;

pub use device::EviFluor;
pub use dispatcher::{Dispatcher, Session};
pub use simulator::{SimulatedConnector, Simulator};
pub use transport::{Connector, DefaultConnector, Transport, TransportSettings, SIMULATION};
