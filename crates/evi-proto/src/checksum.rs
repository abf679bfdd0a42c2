//! CRC-16-CCITT as computed by the instrument firmware.
//!
//! Polynomial 0x1021, initial value 0xFFFF, no reflection, no final XOR
//! (the "CCITT-FALSE" flavour, catalogued as CRC-16/IBM-3740).

use crc::{Crc, CRC_16_IBM_3740};

const CCITT: Crc<u16> = Crc::<u16>::new(&CRC_16_IBM_3740);

/// Checksum over `data`.
pub fn crc16_ccitt(data: &[u8]) -> u16 {
    CCITT.checksum(data)
}
