//! # NMEA Protocol Constants and Types
//!
//! Core definitions for the subset of NMEA 0183 used for position fixes.

use chrono::{NaiveDate, NaiveTime};

/// Every sentence starts with this delimiter
pub const NMEA_START_DELIMITER: char = '$';

/// Separates the sentence body from its checksum
pub const NMEA_CHECKSUM_DELIMITER: char = '*';

/// Field separator
pub const NMEA_FIELD_DELIMITER: char = ',';

/// Longest line accepted before it is treated as noise
///
/// The standard caps sentences at 82 characters, but several u-blox and
/// MediaTek receivers exceed it.
pub const NMEA_MAX_LINE_LEN: usize = 164;

/// Address field length: talker id (2) + sentence type (3)
pub const NMEA_ADDRESS_LEN: usize = 5;

/// Global Positioning System Fix Data
pub const NMEA_SENTENCE_GGA: &str = "GGA";

/// Recommended Minimum Specific GNSS Data
pub const NMEA_SENTENCE_RMC: &str = "RMC";

/// Minimum number of data fields (after the address) in a GGA sentence
pub const NMEA_GGA_MIN_FIELDS: usize = 9;

/// Minimum number of data fields (after the address) in an RMC sentence
pub const NMEA_RMC_MIN_FIELDS: usize = 9;

/// GGA fix data
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GgaData {
    /// UTC time of the fix
    pub utc_time: Option<NaiveTime>,

    /// Latitude in decimal degrees (south negative)
    pub latitude: Option<f64>,

    /// Longitude in decimal degrees (west negative)
    pub longitude: Option<f64>,

    /// Fix quality (0 = invalid, 1 = GPS, 2 = DGPS, ...)
    pub fix_quality: u8,

    /// Satellites in use
    pub satellites: u8,

    /// Altitude above mean sea level in meters
    pub altitude: Option<f64>,
}

/// RMC recommended minimum data
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RmcData {
    /// UTC time of the fix
    pub utc_time: Option<NaiveTime>,

    /// UTC date of the fix
    pub date: Option<NaiveDate>,

    /// Status flag (`A` = active, `V` = void)
    pub active: bool,

    /// Latitude in decimal degrees (south negative)
    pub latitude: Option<f64>,

    /// Longitude in decimal degrees (west negative)
    pub longitude: Option<f64>,

    /// Speed over ground in knots
    pub speed_knots: Option<f64>,
}

/// A decoded sentence
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum NmeaSentence {
    Gga(GgaData),
    Rmc(RmcData),
}

impl NmeaSentence {
    /// Position carried by the sentence, if both coordinates are present
    pub fn position(&self) -> Option<(f64, f64)> {
        let (lat, lon) = match self {
            NmeaSentence::Gga(gga) => (gga.latitude, gga.longitude),
            NmeaSentence::Rmc(rmc) => (rmc.latitude, rmc.longitude),
        };
        Some((lat?, lon?))
    }

    /// Whether the receiver reports a usable fix
    pub fn is_valid_fix(&self) -> bool {
        let flagged = match self {
            NmeaSentence::Gga(gga) => gga.fix_quality > 0,
            NmeaSentence::Rmc(rmc) => rmc.active,
        };
        flagged && self.position().is_some()
    }

    /// Altitude in meters (GGA only)
    pub fn altitude(&self) -> Option<f64> {
        match self {
            NmeaSentence::Gga(gga) => gga.altitude,
            NmeaSentence::Rmc(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gga(fix_quality: u8, latitude: Option<f64>) -> NmeaSentence {
        NmeaSentence::Gga(GgaData {
            utc_time: None,
            latitude,
            longitude: Some(11.5),
            fix_quality,
            satellites: 8,
            altitude: Some(545.4),
        })
    }

    #[test]
    fn test_delimiters() {
        assert_eq!(NMEA_START_DELIMITER, '$');
        assert_eq!(NMEA_CHECKSUM_DELIMITER, '*');
        assert_eq!(NMEA_FIELD_DELIMITER, ',');
        assert_eq!(NMEA_ADDRESS_LEN, 5);
    }

    #[test]
    fn test_gga_validity() {
        assert!(gga(1, Some(48.1)).is_valid_fix());
        assert!(!gga(0, Some(48.1)).is_valid_fix());
        assert!(!gga(1, None).is_valid_fix());
    }

    #[test]
    fn test_rmc_validity_and_altitude() {
        let rmc = NmeaSentence::Rmc(RmcData {
            utc_time: None,
            date: None,
            active: true,
            latitude: Some(48.1),
            longitude: Some(11.5),
            speed_knots: None,
        });
        assert!(rmc.is_valid_fix());
        assert_eq!(rmc.altitude(), None);
        assert_eq!(rmc.position(), Some((48.1, 11.5)));
    }
}
