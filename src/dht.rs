//! DHT22 frame decoding
//!
//! A frame is 40 bits: humidity and temperature as big-endian tenths, then a
//! checksum byte. The temperature's top bit is a sign flag, not two's
//! complement.

use crate::error::{Error, Result};

/// Frame length in bytes
pub const FRAME_LEN: usize = 5;

/// Decode a raw frame into `(temperature_c, humidity_pct)`.
pub fn decode_frame(data: &[u8; FRAME_LEN]) -> Result<(f32, f32)> {
    let checksum = data[..4].iter().fold(0u8, |acc, b| acc.wrapping_add(*b));
    if checksum != data[4] {
        return Err(Error::Validation("DHT22 checksum mismatch"));
    }

    let humidity = f32::from(u16::from_be_bytes([data[0], data[1]])) / 10.0;
    let magnitude = f32::from(u16::from_be_bytes([data[2] & 0x7f, data[3]])) / 10.0;
    let temperature = if data[2] & 0x80 != 0 {
        -magnitude
    } else {
        magnitude
    };
    Ok((temperature, humidity))
}
