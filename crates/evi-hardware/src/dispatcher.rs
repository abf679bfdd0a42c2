//! Command/response dispatch.
//!
//! Every device operation is one request frame followed by one reply frame.
//! [`Dispatcher::execute`] opens a transport, exchanges the frames, routes the
//! reply and releases the transport again, whatever the outcome. Multi-step
//! transfers such as a firmware update hold a [`Session`] for their duration
//! instead.
//!
//! Reply routing compares the first character of the reply's first token with
//! the first character of the command:
//!
//! | Reply            | Outcome                          |
//! |------------------|----------------------------------|
//! | echoes command   | handler runs on the tokens       |
//! | `E <code>`       | [`EviError::Device`] with `code` |
//! | anything else    | [`EviError::Response`]           |

use std::io::Write;

use evi_core::{EviError, EviResult};
use evi_proto::{encode, read_frame, tokenize};
use tracing::{debug, instrument};

use crate::locator::{DeviceLocator, UsbLocator};
use crate::transport::{Connector, DefaultConnector, Transport};

/// Route a tokenized reply to `handler`, or to the matching error.
pub fn route_reply<T>(
    command: &str,
    argv: &[String],
    handler: impl FnOnce(&[String]) -> EviResult<T>,
) -> EviResult<T> {
    let expected = command.chars().next();
    let echoed = argv.first().and_then(|token| token.chars().next());

    if expected.is_some() && echoed == expected {
        return handler(argv);
    }
    if argv.len() == 2 && argv[0] == "E" {
        let code = argv[1]
            .parse()
            .map_err(|_| EviError::Response(format!("malformed error reply '{}'", argv.join(" "))))?;
        return Err(EviError::Device { code });
    }
    Err(EviError::Response(format!(
        "'{}' answered with '{}'",
        command,
        argv.join(" ")
    )))
}

/// Fail with [`EviError::Protocol`] unless the reply has exactly `count` tokens.
pub fn expect_args(argv: &[String], count: usize) -> EviResult<()> {
    if argv.len() == count {
        Ok(())
    } else {
        Err(EviError::Protocol(format!(
            "expected {} reply tokens, got {}: '{}'",
            count,
            argv.len(),
            argv.join(" ")
        )))
    }
}

/// Fail with [`EviError::Protocol`] if the reply has fewer than `count` tokens.
pub fn expect_min_args(argv: &[String], count: usize) -> EviResult<()> {
    if argv.len() >= count {
        Ok(())
    } else {
        Err(EviError::Protocol(format!(
            "expected at least {} reply tokens, got {}",
            count,
            argv.len()
        )))
    }
}

/// Parse reply token `index`, mapping failure to [`EviError::Protocol`].
pub fn reply_field<T: std::str::FromStr>(argv: &[String], index: usize) -> EviResult<T> {
    let token = argv
        .get(index)
        .ok_or_else(|| EviError::Protocol(format!("reply has no field {}", index)))?;
    token
        .parse()
        .map_err(|_| EviError::Protocol(format!("reply field {} '{}' is not a number", index, token)))
}

/// An open transport plus the framing mode used on it.
///
/// Dropping the session closes the transport.
pub struct Session {
    transport: Box<dyn Transport>,
    use_checksum: bool,
}

impl Session {
    /// Wrap an already open transport.
    pub fn new(transport: Box<dyn Transport>, use_checksum: bool) -> Self {
        Self {
            transport,
            use_checksum,
        }
    }

    /// Send `command`, wait for one reply and route it.
    pub fn execute<T>(
        &mut self,
        command: &str,
        handler: impl FnOnce(&[String]) -> EviResult<T>,
    ) -> EviResult<T> {
        let frame = encode(command, self.use_checksum);
        self.transport.write_all(&frame)?;
        self.transport.flush()?;
        debug!(endpoint = %self.transport.endpoint(), command, "Sent");

        let payload = read_frame(&mut *self.transport)?;
        let argv = tokenize(&payload);
        debug!(reply = %payload, "Received");

        route_reply(command, &argv, handler)
    }
}

/// Entry point for all device communication.
///
/// ```rust,ignore
/// let dispatcher = Dispatcher::new(DefaultConnector::default())
///     .with_port("/dev/ttyACM0")
///     .with_checksum(true);
/// let version = dispatcher.execute("V 0", |argv| Ok(argv[1].clone()))?;
/// ```
pub struct Dispatcher {
    port: Option<String>,
    use_checksum: bool,
    connector: Box<dyn Connector>,
    locator: Box<dyn DeviceLocator>,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new(DefaultConnector::default())
    }
}

impl Dispatcher {
    /// Dispatcher opening transports through `connector`, locating the port by
    /// USB id unless one is set.
    pub fn new(connector: impl Connector + 'static) -> Self {
        Self {
            port: None,
            use_checksum: false,
            connector: Box::new(connector),
            locator: Box::new(UsbLocator::default()),
        }
    }

    /// Use a fixed port (or [`crate::transport::SIMULATION`]).
    pub fn with_port(mut self, port: impl Into<String>) -> Self {
        self.port = Some(port.into());
        self
    }

    /// Use `port` when given, otherwise keep locating.
    pub fn with_optional_port(mut self, port: Option<String>) -> Self {
        self.port = port;
        self
    }

    /// Enable or disable checksummed request frames.
    pub fn with_checksum(mut self, use_checksum: bool) -> Self {
        self.use_checksum = use_checksum;
        self
    }

    /// Replace the locator used when no port is configured.
    pub fn with_locator(mut self, locator: impl DeviceLocator + 'static) -> Self {
        self.locator = Box::new(locator);
        self
    }

    /// Whether request frames carry a checksum.
    pub fn use_checksum(&self) -> bool {
        self.use_checksum
    }

    /// Configured port, if any.
    pub fn port(&self) -> Option<&str> {
        self.port.as_deref()
    }

    /// Resolve the endpoint and open a session on it.
    pub fn open_session(&self) -> EviResult<Session> {
        let endpoint = match &self.port {
            Some(port) => port.clone(),
            None => self.locator.locate()?,
        };
        let transport = self.connector.connect(&endpoint)?;
        Ok(Session::new(transport, self.use_checksum))
    }

    /// Run one command on a freshly opened transport.
    #[instrument(skip(self, handler), err(level = "debug"))]
    pub fn execute<T>(
        &self,
        command: &str,
        handler: impl FnOnce(&[String]) -> EviResult<T>,
    ) -> EviResult<T> {
        let mut session = self.open_session()?;
        session.execute(command, handler)
    }
}
