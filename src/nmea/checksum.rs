//! # NMEA Checksum
//!
//! The checksum is the XOR of every byte between `$` and `*`, written as two
//! hexadecimal digits after the `*`.

use super::protocol::NMEA_CHECKSUM_DELIMITER;
use crate::error::{DashcamError, Result};

/// Calculate the NMEA checksum of a sentence body
///
/// # Arguments
///
/// * `body` - Bytes between the `$` and the `*` delimiters
///
/// # Examples
///
/// ```
/// use dashcam::nmea::checksum::nmea_checksum;
///
/// let body = b"GPGGA,123519,4807.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,";
/// assert_eq!(nmea_checksum(body), 0x47);
/// ```
pub fn nmea_checksum(body: &[u8]) -> u8 {
    body.iter().fold(0u8, |acc, &byte| acc ^ byte)
}

/// Strip and verify the `*hh` suffix of a sentence body
///
/// Sentences without a checksum are accepted as-is; some receivers omit it
/// on proprietary or debug output.
///
/// # Errors
///
/// Returns error if the suffix is not two hex digits or does not match
pub fn verify_checksum(body: &str) -> Result<&str> {
    let Some((data, suffix)) = body.split_once(NMEA_CHECKSUM_DELIMITER) else {
        return Ok(body);
    };

    if suffix.len() != 2 {
        return Err(DashcamError::Nmea(format!("Invalid checksum field: {:?}", suffix)));
    }

    let received = u8::from_str_radix(suffix, 16)
        .map_err(|_| DashcamError::Nmea(format!("Invalid checksum field: {:?}", suffix)))?;
    let calculated = nmea_checksum(data.as_bytes());

    if calculated != received {
        return Err(DashcamError::Nmea(format!(
            "Checksum mismatch: expected 0x{:02X}, got 0x{:02X}",
            calculated, received
        )));
    }

    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checksum_known_gga() {
        let body = b"GPGGA,123519,4807.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,";
        assert_eq!(nmea_checksum(body), 0x47);
    }

    #[test]
    fn test_checksum_known_rmc() {
        let body = b"GPRMC,123519,A,4807.038,N,01131.000,E,022.4,084.4,230394,003.1,W";
        assert_eq!(nmea_checksum(body), 0x6A);
    }

    #[test]
    fn test_checksum_empty() {
        assert_eq!(nmea_checksum(&[]), 0);
    }

    #[test]
    fn test_verify_strips_suffix() {
        let body = "GPRMC,123519,A,4807.038,N,01131.000,E,022.4,084.4,230394,003.1,W*6A";
        let data = verify_checksum(body).unwrap();
        assert!(data.ends_with(",W"));
    }

    #[test]
    fn test_verify_accepts_lowercase_hex() {
        let body = "GPRMC,123519,A,4807.038,N,01131.000,E,022.4,084.4,230394,003.1,W*6a";
        assert!(verify_checksum(body).is_ok());
    }

    #[test]
    fn test_verify_without_checksum() {
        assert_eq!(verify_checksum("GPGGA,1,2,3").unwrap(), "GPGGA,1,2,3");
    }

    #[test]
    fn test_verify_mismatch() {
        let body = "GPRMC,123519,A,4807.038,N,01131.000,E,022.4,084.4,230394,003.1,W*6B";
        assert!(verify_checksum(body).is_err());
    }

    #[test]
    fn test_verify_truncated_suffix() {
        assert!(verify_checksum("GPGGA,1,2,3*4").is_err());
        assert!(verify_checksum("GPGGA,1,2,3*ZZ").is_err());
    }
}
