//! Instrument discovery by USB identifiers.
//!
//! The instrument enumerates as a USB CDC serial device. When no port is
//! configured the dispatcher asks a [`DeviceLocator`] for one.
//!
//! # Usage
//!
//! ```rust,ignore
//! use evi_hardware::locator::{DeviceLocator, UsbLocator};
//!
//! // First serial port with the EviFluor vendor/product pair
//! let port = UsbLocator::default().locate()?;
//!
//! // Any closure works as a locator
//! let fixed = || -> EviResult<String> { Ok("/dev/ttyACM3".to_string()) };
//! let port = fixed.locate()?;
//! ```

use evi_core::{EviError, EviResult};
use serialport::{SerialPortInfo, SerialPortType};
use tracing::{debug, warn};

/// USB vendor id of the instrument.
pub const EVIFLUOR_VID: u16 = 0x1cbe;

/// USB product id of the instrument.
pub const EVIFLUOR_PID: u16 = 0x0003;

/// Finds the port name of an attached instrument.
pub trait DeviceLocator: Send + Sync {
    /// Port name of the first instrument found.
    fn locate(&self) -> EviResult<String>;
}

impl<F> DeviceLocator for F
where
    F: Fn() -> EviResult<String> + Send + Sync,
{
    fn locate(&self) -> EviResult<String> {
        self()
    }
}

/// Locates serial ports by USB vendor and product id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UsbLocator {
    vid: u16,
    pid: u16,
}

impl Default for UsbLocator {
    fn default() -> Self {
        Self::new(EVIFLUOR_VID, EVIFLUOR_PID)
    }
}

impl UsbLocator {
    /// Locator for an explicit vendor/product pair.
    pub fn new(vid: u16, pid: u16) -> Self {
        Self { vid, pid }
    }

    /// Names of the ports in `ports` that match, in enumeration order.
    pub fn matching(&self, ports: &[SerialPortInfo]) -> Vec<String> {
        ports
            .iter()
            .filter(|port| {
                matches!(&port.port_type,
                    SerialPortType::UsbPort(usb) if usb.vid == self.vid && usb.pid == self.pid)
            })
            .map(|port| port.port_name.clone())
            .collect()
    }
}

impl DeviceLocator for UsbLocator {
    fn locate(&self) -> EviResult<String> {
        let ports = serialport::available_ports().map_err(|e| {
            warn!(error = %e, "Serial port enumeration failed");
            EviError::InstrumentNotFound
        })?;

        let mut found = self.matching(&ports);
        if found.len() > 1 {
            warn!(ports = ?found, "Several instruments attached, using the first");
        }
        if found.is_empty() {
            return Err(EviError::InstrumentNotFound);
        }
        let port = found.swap_remove(0);
        debug!(port = %port, vid = self.vid, pid = self.pid, "Located instrument");
        Ok(port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serialport::UsbPortInfo;

    fn usb(name: &str, vid: u16, pid: u16) -> SerialPortInfo {
        SerialPortInfo {
            port_name: name.to_string(),
            port_type: SerialPortType::UsbPort(UsbPortInfo {
                vid,
                pid,
                serial_number: None,
                manufacturer: None,
                product: None,
            }),
        }
    }

    #[test]
    fn test_matching_filters_by_ids() {
        let ports = vec![
            usb("/dev/ttyUSB0", 0x0403, 0x6001),
            usb("/dev/ttyACM0", EVIFLUOR_VID, EVIFLUOR_PID),
            SerialPortInfo {
                port_name: "/dev/ttyS0".into(),
                port_type: SerialPortType::Unknown,
            },
            usb("/dev/ttyACM1", EVIFLUOR_VID, EVIFLUOR_PID),
        ];
        assert_eq!(
            UsbLocator::default().matching(&ports),
            vec!["/dev/ttyACM0".to_string(), "/dev/ttyACM1".to_string()]
        );
    }

    #[test]
    fn test_matching_requires_both_ids() {
        let ports = vec![usb("/dev/ttyACM0", EVIFLUOR_VID, 0x0004)];
        assert!(UsbLocator::default().matching(&ports).is_empty());
    }

    #[test]
    fn test_closure_locator() {
        let locator = || -> EviResult<String> { Ok("/dev/ttyACM7".to_string()) };
        assert_eq!(locator.locate().unwrap(), "/dev/ttyACM7");

        let missing = || -> EviResult<String> { Err(EviError::InstrumentNotFound) };
        assert!(matches!(missing.locate(), Err(EviError::InstrumentNotFound)));
    }
}
