//! Byte-level conversions for the launch monitor wire format.
//!
//! Everything on the wire is little-endian unless a caller explicitly asks
//! otherwise. The air-pressure and temperature encodings reproduce the
//! device's calibration math and must stay bit-for-bit compatible with the
//! firmware.

pub mod shot;

pub use shot::{parse_shot_frame, BallData, ClubData, ShotDataOptions, ShotRecord};

/// Encode a signed 16-bit value as two little-endian bytes.
pub fn short_to_bytes(value: i16) -> [u8; 2] {
    value.to_le_bytes()
}

/// Decode two little-endian bytes into a signed 16-bit value.
///
/// Returns `0` (logged) if the slice is not exactly 2 bytes.
pub fn bytes_to_short(bytes: &[u8]) -> i16 {
    match bytes.try_into() {
        Ok(arr) => i16::from_le_bytes(arr),
        Err(_) => {
            tracing::debug!(len = bytes.len(), "bytes_to_short needs exactly 2 bytes");
            0
        }
    }
}

/// Encode a 32-bit integer as 4 bytes.
pub fn int32_to_bytes(value: i32, little_endian: bool) -> [u8; 4] {
    if little_endian {
        value.to_le_bytes()
    } else {
        value.to_be_bytes()
    }
}

/// Decode 4 bytes into a 32-bit integer.
///
/// Returns the sentinel `0` (logged) if the slice is not exactly 4 bytes;
/// malformed frames must never tear down the session.
pub fn bytes_to_int32(bytes: &[u8], little_endian: bool) -> i32 {
    let arr: [u8; 4] = match bytes.try_into() {
        Ok(arr) => arr,
        Err(_) => {
            tracing::debug!(len = bytes.len(), "bytes_to_int32 needs exactly 4 bytes");
            return 0;
        }
    };

    if little_endian {
        i32::from_le_bytes(arr)
    } else {
        i32::from_be_bytes(arr)
    }
}

/// Encode a 64-bit value as 8 little-endian bytes (session token encoding).
pub fn u64_to_bytes(value: u64) -> [u8; 8] {
    value.to_le_bytes()
}

/// Parse a hex string (case-insensitive) into bytes.
///
/// Returns `None` for odd-length input or any non-hex digit.
pub fn hex_to_bytes(hex: &str) -> Option<Vec<u8>> {
    if hex.len() % 2 != 0 {
        tracing::debug!(len = hex.len(), "hex string must have an even number of characters");
        return None;
    }

    let mut bytes = Vec::with_capacity(hex.len() / 2);
    for i in (0..hex.len()).step_by(2) {
        match u8::from_str_radix(hex.get(i..i + 2)?, 16) {
            Ok(byte) => bytes.push(byte),
            Err(e) => {
                tracing::debug!(error = %e, "invalid hex digit");
                return None;
            }
        }
    }

    Some(bytes)
}

/// Render bytes as an uppercase hex string.
pub fn bytes_to_hex(bytes: &[u8]) -> String {
    use std::fmt::Write;

    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        // write! to a String cannot fail
        let _ = write!(out, "{byte:02X}");
    }
    out
}

/// Encode an air-pressure delta (hPa) using the device's barometric
/// calibration formula.
///
/// The constants come from the firmware and the result wraps to a signed
/// 16-bit value exactly as the device expects.
pub fn air_pressure_bytes(pressure_hpa_delta: f64) -> [u8; 2] {
    let d2 = pressure_hpa_delta * 0.0065;
    let value =
        ((1.0 - d2 / (15.0 + d2 + 273.15)).powf(5.257) * 1013.25 * 0.1 - 50.0) * 1000.0;
    short_to_bytes(wrap_to_short(value))
}

/// Encode a temperature in Celsius as hundredths of a degree, LE.
pub fn temperature_bytes(celsius: f64) -> [u8; 2] {
    short_to_bytes(wrap_to_short(celsius * 100.0))
}

/// Round to the nearest integer and wrap into i16 range.
///
/// Wrapping (not saturating) matches the device's 16-bit register
/// arithmetic; air_pressure_bytes(0.0) relies on it.
fn wrap_to_short(value: f64) -> i16 {
    value.round() as i64 as i16
}
