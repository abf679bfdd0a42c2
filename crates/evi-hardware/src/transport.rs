//! Byte transports to the instrument.
//!
//! A [`Transport`] is an open, bidirectional byte channel. Dropping it closes
//! the underlying handle, so every exit path of a command releases the port.
//! A [`Connector`] opens transports for an endpoint name and is chosen when
//! the dispatcher is built.
//!
//! Two connectors ship with the crate:
//!
//! - [`SerialTransport`]: 115200 baud, 8N1, 100 ms per-read timeout
//! - [`LoopbackTransport`]: TCP connection to a simulator, used when the
//!   endpoint is [`SIMULATION`]
//!
//! The in-memory simulator connector lives in [`crate::simulator`].

use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::time::Duration;

use evi_core::{EviError, EviResult};
use serialport::{DataBits, FlowControl, Parity, SerialPort, StopBits};
use tracing::debug;

/// Endpoint name that selects the loopback simulator instead of a serial port.
pub const SIMULATION: &str = "SIMULATION";

/// Default serial baud rate.
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// Default timeout of a single underlying read.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_millis(100);

/// Default address of the TCP simulator.
pub const DEFAULT_SIMULATION_ADDRESS: &str = "127.0.0.1:5000";

/// An open byte channel to the instrument.
pub trait Transport: Read + Write + Send {
    /// Endpoint this transport is connected to.
    fn endpoint(&self) -> &str;
}

/// Opens transports for endpoint names.
pub trait Connector: Send + Sync {
    /// Open a transport to `endpoint`.
    fn connect(&self, endpoint: &str) -> EviResult<Box<dyn Transport>>;
}

/// Settings used by [`DefaultConnector`].
#[derive(Debug, Clone)]
pub struct TransportSettings {
    /// Serial baud rate.
    pub baud_rate: u32,
    /// Timeout of one read call.
    pub read_timeout: Duration,
    /// Address used for the [`SIMULATION`] endpoint.
    pub simulation_address: String,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            baud_rate: DEFAULT_BAUD_RATE,
            read_timeout: DEFAULT_READ_TIMEOUT,
            simulation_address: DEFAULT_SIMULATION_ADDRESS.to_string(),
        }
    }
}

// =============================================================================
// Serial
// =============================================================================

/// Serial port transport.
pub struct SerialTransport {
    endpoint: String,
    port: Box<dyn SerialPort>,
}

impl SerialTransport {
    /// Open `path` as 8N1 without flow control.
    pub fn open(path: &str, baud_rate: u32, read_timeout: Duration) -> EviResult<Self> {
        let port = serialport::new(path, baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(read_timeout)
            .open()
            .map_err(|e| match e.kind() {
                serialport::ErrorKind::NoDevice => EviError::InstrumentNotFound,
                _ => EviError::Io(io::Error::from(e)),
            })?;

        debug!(port = path, baud_rate, "Opened serial port");
        Ok(Self {
            endpoint: path.to_string(),
            port,
        })
    }
}

impl Read for SerialTransport {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.port.read(buf)
    }
}

impl Write for SerialTransport {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.port.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.port.flush()
    }
}

impl Transport for SerialTransport {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl Drop for SerialTransport {
    fn drop(&mut self) {
        debug!(port = %self.endpoint, "Closed serial port");
    }
}

// =============================================================================
// Loopback
// =============================================================================

/// TCP transport to a device simulator.
pub struct LoopbackTransport {
    endpoint: String,
    stream: TcpStream,
}

impl LoopbackTransport {
    /// Connect to `address` with the given per-read timeout.
    pub fn connect(address: &str, read_timeout: Duration) -> EviResult<Self> {
        let addr: SocketAddr = address
            .parse()
            .map_err(|_| EviError::InvalidParameter(format!("invalid simulation address '{}'", address)))?;
        let stream = TcpStream::connect(addr)?;
        stream.set_read_timeout(Some(read_timeout))?;
        stream.set_nodelay(true)?;

        debug!(%addr, "Connected to simulator");
        Ok(Self {
            endpoint: address.to_string(),
            stream,
        })
    }
}

impl Read for LoopbackTransport {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream.read(buf)
    }
}

impl Write for LoopbackTransport {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.stream.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.stream.flush()
    }
}

impl Transport for LoopbackTransport {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

// =============================================================================
// Connector
// =============================================================================

/// Opens serial ports, or the TCP simulator for the [`SIMULATION`] endpoint.
#[derive(Debug, Clone, Default)]
pub struct DefaultConnector {
    settings: TransportSettings,
}

impl DefaultConnector {
    /// Connector using `settings`.
    pub fn new(settings: TransportSettings) -> Self {
        Self { settings }
    }

    /// Settings in use.
    pub fn settings(&self) -> &TransportSettings {
        &self.settings
    }
}

impl Connector for DefaultConnector {
    fn connect(&self, endpoint: &str) -> EviResult<Box<dyn Transport>> {
        if endpoint == SIMULATION {
            let transport =
                LoopbackTransport::connect(&self.settings.simulation_address, self.settings.read_timeout)?;
            Ok(Box::new(transport))
        } else {
            let transport = SerialTransport::open(endpoint, self.settings.baud_rate, self.settings.read_timeout)?;
            Ok(Box::new(transport))
        }
    }
}
