//! # EviFluor simulator
//!
//! Device-side responder that keeps the state of a simulated instrument and
//! answers request frames the way the firmware does. It backs the in-memory
//! [`SimulatedConnector`] used by tests and the TCP server behind
//! `evifluor simulate`.
//!
//! The optical model is linear: a reading at LED power `p` returns
//! `dark + response * p`, capped at the ADC full scale. Tests change
//! `response` between steps to emulate air, standards and samples.

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;

use evi_core::error::codes;
use evi_core::measurement::SingleMeasurement;
use evi_core::EviResult;
use evi_proto::{encode, tokenize, FrameDecoder};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::index;
use crate::transport::{Connector, Transport};

/// Number of readings kept for `M <n>`.
pub const HISTORY_DEPTH: usize = 2;

/// Largest value the simulated ADC reports.
pub const FULL_SCALE: f64 = 4095.0;

fn error_reply(code: i32) -> String {
    format!("E {}", code)
}

/// State of one simulated instrument.
#[derive(Debug, Clone)]
pub struct Simulator {
    version: String,
    serial_number: String,
    hardware_type: String,
    led_power: u8,
    led_min: u8,
    led_max: u8,
    dark: f64,
    response: f64,
    cuvette_holder_empty: bool,
    selftest_result: u32,
    logging: VecDeque<String>,
    history: VecDeque<SingleMeasurement>,
    injected_error: Option<i32>,
    firmware_mode: bool,
    firmware_records: usize,
    connections: usize,
    open_transports: usize,
}

impl Default for Simulator {
    fn default() -> Self {
        Self {
            version: "1.4.2".into(),
            serial_number: "1000".into(),
            hardware_type: "1".into(),
            led_power: 100,
            led_min: 32,
            led_max: 222,
            dark: 12.0,
            response: 0.5,
            cuvette_holder_empty: true,
            selftest_result: 0,
            logging: VecDeque::new(),
            history: VecDeque::new(),
            injected_error: None,
            firmware_mode: false,
            firmware_records: 0,
            connections: 0,
            open_transports: 0,
        }
    }
}

impl Simulator {
    /// Simulator with factory defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Use `serial_number` for index 1.
    pub fn with_serial_number(mut self, serial_number: impl Into<String>) -> Self {
        self.serial_number = serial_number.into();
        self
    }

    /// Signal counts per unit of LED power above dark.
    pub fn set_response(&mut self, response: f64) {
        self.response = response;
    }

    /// Dark level added to every reading.
    pub fn set_dark(&mut self, dark: f64) {
        self.dark = dark;
    }

    /// Occupy or clear the cuvette holder.
    pub fn set_cuvette_holder_empty(&mut self, empty: bool) {
        self.cuvette_holder_empty = empty;
    }

    /// Result bits reported by the self test.
    pub fn set_selftest_result(&mut self, result: u32) {
        self.selftest_result = result;
    }

    /// Answer the next command with `E <code>`.
    pub fn inject_error(&mut self, code: i32) {
        self.injected_error = Some(code);
    }

    /// Queue a line in the device logging buffer.
    pub fn push_logging(&mut self, line: impl Into<String>) {
        self.logging.push_back(line.into());
    }

    /// Lines still queued in the logging buffer.
    pub fn pending_logging(&self) -> usize {
        self.logging.len()
    }

    /// Current LED power.
    pub fn led_power(&self) -> u8 {
        self.led_power
    }

    /// S-records received by the last firmware transfer.
    pub fn firmware_records(&self) -> usize {
        self.firmware_records
    }

    /// Whether a firmware transfer is in progress.
    pub fn in_firmware_mode(&self) -> bool {
        self.firmware_mode
    }

    /// Connections accepted so far.
    pub fn connections(&self) -> usize {
        self.connections
    }

    /// In-memory transports currently open.
    pub fn open_transports(&self) -> usize {
        self.open_transports
    }

    /// Answer one request payload with a reply payload.
    pub fn handle(&mut self, payload: &str) -> String {
        if let Some(code) = self.injected_error.take() {
            return error_reply(code);
        }

        let argv = tokenize(payload);
        let args: Vec<&str> = argv.iter().map(String::as_str).collect();
        match args.as_slice() {
            ["V", idx] => self.get_value(idx),
            ["V", idx, value] => self.set_value(idx, value),
            ["M"] => {
                let reading = self.measure();
                format!("M {} 0 0 0", reading)
            }
            ["M", n] => match n.parse::<usize>().ok().and_then(|n| self.history.get(n)) {
                Some(reading) => format!("M {} 0 0 0", reading),
                None => error_reply(codes::INVALID_PARAMETER),
            },
            ["C", level] => match level.parse::<f64>() {
                Ok(level) => self.autogain(level),
                Err(_) => error_reply(codes::INVALID_PARAMETER),
            },
            ["X"] => format!("X {}", u8::from(self.cuvette_holder_empty)),
            ["G"] => {
                self.logging.push_back(format!("baseline dark {:.3}", self.dark));
                "G".to_string()
            }
            ["Y"] => format!("Y {}", self.selftest_result),
            ["Q"] => match self.logging.pop_front() {
                Some(line) => format!("Q \"{}\"", line.replace('"', "'")),
                None => error_reply(codes::NO_MORE_LOGGING),
            },
            ["F"] => {
                self.firmware_mode = true;
                self.firmware_records = 0;
                "F".to_string()
            }
            ["S", ..] if !self.firmware_mode => error_reply(codes::UNKNOWN_COMMAND),
            ["S", _record] => {
                self.firmware_records += 1;
                "S".to_string()
            }
            ["R"] if self.firmware_mode => {
                self.firmware_mode = false;
                self.logging
                    .push_back(format!("firmware updated, {} records", self.firmware_records));
                "R".to_string()
            }
            ["V" | "M" | "C" | "S", ..] => error_reply(codes::INVALID_PARAMETER),
            _ => error_reply(codes::UNKNOWN_COMMAND),
        }
    }

    fn get_value(&self, idx: &str) -> String {
        let value = match idx.parse::<u32>() {
            Ok(index::VERSION) => self.version.clone(),
            Ok(index::SERIALNUMBER) => self.serial_number.clone(),
            Ok(index::HARDWARETYPE) => self.hardware_type.clone(),
            Ok(index::LASTMEASUREMENTCOUNT) => self.history.len().to_string(),
            Ok(index::CURRENT_LED470_POWER) => self.led_power.to_string(),
            Ok(index::LED470_MIN_POWER) => self.led_min.to_string(),
            Ok(index::LED470_MAX_POWER) => self.led_max.to_string(),
            _ => return error_reply(codes::INVALID_PARAMETER),
        };
        format!("V {}", value)
    }

    fn set_value(&mut self, idx: &str, value: &str) -> String {
        let Ok(power) = value.parse::<u8>() else {
            return error_reply(codes::INVALID_PARAMETER);
        };
        match idx.parse::<u32>() {
            Ok(index::CURRENT_LED470_POWER) => self.led_power = power,
            Ok(index::LED470_MIN_POWER) => self.led_min = power,
            Ok(index::LED470_MAX_POWER) => self.led_max = power,
            _ => return error_reply(codes::INVALID_PARAMETER),
        }
        "V".to_string()
    }

    fn reading_at(&self, led_power: u8) -> SingleMeasurement {
        let value = (self.dark + self.response * f64::from(led_power)).min(FULL_SCALE);
        SingleMeasurement::new(self.dark, value, led_power)
    }

    fn measure(&mut self) -> SingleMeasurement {
        let reading = self.reading_at(self.led_power);
        self.history.push_front(reading);
        self.history.truncate(HISTORY_DEPTH);
        self.logging
            .push_back(format!("measure led {} value {:.3}", reading.led_power(), reading.value()));
        reading
    }

    fn autogain(&mut self, level: f64) -> String {
        let wanted = if self.response > 0.0 {
            (level / self.response).round()
        } else {
            f64::INFINITY
        };
        let found = wanted >= f64::from(self.led_min) && wanted <= f64::from(self.led_max);
        self.led_power = if found {
            // In range, so the cast cannot truncate.
            wanted as u8
        } else if wanted < f64::from(self.led_min) {
            self.led_min
        } else {
            self.led_max
        };
        self.logging
            .push_back(format!("autogain level {} led {}", level, self.led_power));
        format!("C {} {}", u8::from(found), self.led_power)
    }
}

/// Frame-level adapter between a byte stream and a [`Simulator`].
///
/// Replies use the same framing as the request they answer.
#[derive(Debug, Default)]
pub struct SimulatorLink {
    decoder: FrameDecoder,
    outbox: VecDeque<u8>,
}

impl SimulatorLink {
    /// Feed request bytes, queueing a reply for every completed frame.
    pub fn feed(&mut self, device: &mut Simulator, bytes: &[u8]) {
        for &byte in bytes {
            let Some(result) = self.decoder.push(byte) else {
                continue;
            };
            let checksummed = self.decoder.last_frame_checksummed();
            let reply = match result {
                Ok(payload) => {
                    let reply = device.handle(&payload);
                    debug!(request = %payload, reply = %reply, "Simulator");
                    reply
                }
                Err(e) => {
                    debug!(error = %e, "Simulator rejected frame");
                    error_reply(codes::INVALID_PARAMETER)
                }
            };
            self.outbox.extend(encode(&reply, checksummed));
        }
    }

    /// Move queued reply bytes into `buf`.
    pub fn read_reply(&mut self, buf: &mut [u8]) -> usize {
        let n = buf.len().min(self.outbox.len());
        for (slot, byte) in buf.iter_mut().zip(self.outbox.drain(..n)) {
            *slot = byte;
        }
        n
    }

    /// Take all queued reply bytes.
    pub fn take_output(&mut self) -> Vec<u8> {
        self.outbox.drain(..).collect()
    }
}

// =============================================================================
// In-memory connector
// =============================================================================

/// Connector whose transports talk to a shared in-memory [`Simulator`].
///
/// ```rust,ignore
/// let connector = SimulatedConnector::new(Simulator::new());
/// let device = connector.device();
/// let evi = EviFluor::new(Dispatcher::new(connector).with_port(SIMULATION));
/// device.lock().set_response(9.0);
/// ```
#[derive(Debug, Clone, Default)]
pub struct SimulatedConnector {
    device: Arc<Mutex<Simulator>>,
}

impl SimulatedConnector {
    /// Connector backed by `simulator`.
    pub fn new(simulator: Simulator) -> Self {
        Self {
            device: Arc::new(Mutex::new(simulator)),
        }
    }

    /// Shared handle to the simulated device.
    pub fn device(&self) -> Arc<Mutex<Simulator>> {
        Arc::clone(&self.device)
    }
}

impl Connector for SimulatedConnector {
    fn connect(&self, endpoint: &str) -> EviResult<Box<dyn Transport>> {
        {
            let mut device = self.device.lock();
            device.connections += 1;
            device.open_transports += 1;
        }
        Ok(Box::new(SimulatedTransport {
            endpoint: endpoint.to_string(),
            device: Arc::clone(&self.device),
            link: SimulatorLink::default(),
        }))
    }
}

struct SimulatedTransport {
    endpoint: String,
    device: Arc<Mutex<Simulator>>,
    link: SimulatorLink,
}

impl Read for SimulatedTransport {
    /// Returns end of stream once no reply is queued.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Ok(self.link.read_reply(buf))
    }
}

impl Write for SimulatedTransport {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.link.feed(&mut self.device.lock(), buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Transport for SimulatedTransport {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl Drop for SimulatedTransport {
    fn drop(&mut self) {
        let mut device = self.device.lock();
        device.open_transports = device.open_transports.saturating_sub(1);
    }
}

// =============================================================================
// TCP server
// =============================================================================

/// Serve `device` on `listener`, one connection at a time, until accept fails.
pub fn serve(listener: &TcpListener, device: &Mutex<Simulator>) -> io::Result<()> {
    info!(address = %listener.local_addr()?, "Simulator listening");
    for stream in listener.incoming() {
        match stream {
            Ok(stream) => {
                if let Err(e) = serve_connection(stream, device) {
                    warn!(error = %e, "Simulator connection ended with error");
                }
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

/// Answer requests on one connection until the peer closes it.
pub fn serve_connection(mut stream: TcpStream, device: &Mutex<Simulator>) -> io::Result<()> {
    let peer = stream.peer_addr()?;
    device.lock().connections += 1;
    debug!(%peer, "Simulator connection opened");

    let mut link = SimulatorLink::default();
    let mut buf = [0u8; 256];
    loop {
        let n = stream.read(&mut buf)?;
        if n == 0 {
            break;
        }
        link.feed(&mut device.lock(), &buf[..n]);
        let reply = link.take_output();
        if !reply.is_empty() {
            stream.write_all(&reply)?;
        }
    }

    debug!(%peer, "Simulator connection closed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_values() {
        let mut sim = Simulator::new().with_serial_number("77");
        assert_eq!(sim.handle("V 1"), "V 77");
        assert_eq!(sim.handle("V 16"), "V 32");
        assert_eq!(sim.handle("V 15 40"), "V");
        assert_eq!(sim.handle("V 15"), "V 40");
        assert_eq!(sim.handle("V 99"), "E 2");
        assert_eq!(sim.handle("V 15 300"), "E 2");
        assert_eq!(sim.handle("V 0 x"), "E 2");
    }

    #[test]
    fn test_measure_uses_linear_model() {
        let mut sim = Simulator::new();
        sim.handle("V 15 100");
        assert_eq!(sim.handle("M"), "M 12.000 62.000 100 0 0 0");

        sim.set_response(100.0);
        assert_eq!(sim.handle("M"), "M 12.000 4095.000 100 0 0 0");
    }

    #[test]
    fn test_history_newest_first() {
        let mut sim = Simulator::new();
        sim.handle("V 15 40");
        sim.handle("M");
        sim.handle("V 15 80");
        sim.handle("M");
        sim.handle("V 15 120");
        sim.handle("M");
        assert_eq!(sim.handle("V 10"), "V 2");
        assert_eq!(sim.handle("M 0"), "M 12.000 72.000 120 0 0 0");
        assert_eq!(sim.handle("M 1"), "M 12.000 52.000 80 0 0 0");
        assert_eq!(sim.handle("M 2"), "E 2");
    }

    #[test]
    fn test_autogain() {
        let mut sim = Simulator::new();
        sim.set_response(10.0);
        assert_eq!(sim.handle("C 2000"), "C 1 200");
        assert_eq!(sim.led_power(), 200);

        sim.set_response(1.0);
        assert_eq!(sim.handle("C 2000"), "C 0 222");
        assert_eq!(sim.handle("C abc"), "E 2");
    }

    #[test]
    fn test_logging_queue() {
        let mut sim = Simulator::new();
        sim.push_logging("hello world");
        assert_eq!(tokenize(&sim.handle("Q")), vec!["Q", "hello world"]);
        assert_eq!(sim.handle("Q"), "E 11");
    }

    #[test]
    fn test_firmware_mode() {
        let mut sim = Simulator::new();
        assert_eq!(sim.handle("S S0030000FC"), "E 1");
        assert_eq!(sim.handle("F"), "F");
        assert_eq!(sim.handle("S S0030000FC"), "S");
        assert_eq!(sim.handle("S"), "E 2");
        assert_eq!(sim.handle("R"), "R");
        assert_eq!(sim.firmware_records(), 1);
        assert!(!sim.in_firmware_mode());
        assert_eq!(sim.handle("R"), "E 1");
    }

    #[test]
    fn test_unknown_and_injected() {
        let mut sim = Simulator::new();
        assert_eq!(sim.handle("Z"), "E 1");
        sim.inject_error(3);
        assert_eq!(sim.handle("G"), "E 3");
        assert_eq!(sim.handle("G"), "G");
    }

    #[test]
    fn test_link_mirrors_checksum_usage() {
        let mut sim = Simulator::new();
        let mut link = SimulatorLink::default();

        link.feed(&mut sim, &encode("X", true));
        assert_eq!(link.take_output(), encode("X 1", true));

        link.feed(&mut sim, &encode("X", false));
        assert_eq!(link.take_output(), encode("X 1", false));
    }

    #[test]
    fn test_link_rejects_bad_checksum() {
        let mut sim = Simulator::new();
        let mut link = SimulatorLink::default();
        link.feed(&mut sim, b";G@1\n");
        assert_eq!(link.take_output(), encode("E 2", true));
    }
}
