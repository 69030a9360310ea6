//! # NMEA Sentence Decoder
//!
//! Decodes GGA and RMC sentences from any talker (GP, GN, GL, GA, ...).

use chrono::{NaiveDate, NaiveTime};

use super::checksum::verify_checksum;
use super::protocol::*;
use crate::error::{DashcamError, Result};

/// Decode one line of receiver output
///
/// # Arguments
///
/// * `line` - Raw line, with or without the trailing `\r\n`
///
/// # Errors
///
/// Returns error if:
/// - The line is too long or does not start with `$`
/// - The checksum does not match
/// - The sentence type is not GGA or RMC
/// - A required field is missing or malformed
///
/// # Examples
///
/// ```
/// use dashcam::nmea::decoder::decode_sentence;
///
/// let line = "$GPGGA,123519,4807.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,*47";
/// let sentence = decode_sentence(line).unwrap();
/// assert!(sentence.is_valid_fix());
/// ```
pub fn decode_sentence(line: &str) -> Result<NmeaSentence> {
    let line = line.trim();

    if line.len() > NMEA_MAX_LINE_LEN {
        return Err(DashcamError::Nmea(format!("Line too long: {} bytes", line.len())));
    }

    let body = line
        .strip_prefix(NMEA_START_DELIMITER)
        .ok_or_else(|| DashcamError::Nmea("Missing start delimiter".to_string()))?;
    let body = verify_checksum(body)?;

    let mut fields = body.split(NMEA_FIELD_DELIMITER);
    let address = fields.next().unwrap_or_default();

    if address.len() != NMEA_ADDRESS_LEN || !address.is_ascii() {
        return Err(DashcamError::Nmea(format!("Invalid address field: {:?}", address)));
    }

    let sentence_type = &address[2..];
    let fields: Vec<&str> = fields.collect();

    match sentence_type {
        NMEA_SENTENCE_GGA => decode_gga(&fields).map(NmeaSentence::Gga),
        NMEA_SENTENCE_RMC => decode_rmc(&fields).map(NmeaSentence::Rmc),
        other => Err(DashcamError::Nmea(format!("Unsupported sentence type: {}", other))),
    }
}

/// Decode the data fields of a GGA sentence
pub fn decode_gga(fields: &[&str]) -> Result<GgaData> {
    if fields.len() < NMEA_GGA_MIN_FIELDS {
        return Err(DashcamError::Nmea(format!("GGA sentence too short: {} fields", fields.len())));
    }

    Ok(GgaData {
        utc_time: parse_time(fields[0])?,
        latitude: parse_coordinate(fields[1], fields[2], 90.0)?,
        longitude: parse_coordinate(fields[3], fields[4], 180.0)?,
        fix_quality: parse_or_zero(fields[5], "fix quality")?,
        satellites: parse_or_zero(fields[6], "satellite count")?,
        altitude: parse_optional_f64(fields[8], "altitude")?,
    })
}

/// Decode the data fields of an RMC sentence
pub fn decode_rmc(fields: &[&str]) -> Result<RmcData> {
    if fields.len() < NMEA_RMC_MIN_FIELDS {
        return Err(DashcamError::Nmea(format!("RMC sentence too short: {} fields", fields.len())));
    }

    let active = match fields[1] {
        "A" => true,
        "V" | "" => false,
        other => return Err(DashcamError::Nmea(format!("Invalid RMC status: {:?}", other))),
    };

    Ok(RmcData {
        utc_time: parse_time(fields[0])?,
        date: parse_date(fields[8])?,
        active,
        latitude: parse_coordinate(fields[2], fields[3], 90.0)?,
        longitude: parse_coordinate(fields[4], fields[5], 180.0)?,
        speed_knots: parse_optional_f64(fields[6], "speed")?,
    })
}

/// Convert an NMEA `(d)ddmm.mmmm` coordinate to signed decimal degrees
///
/// Empty fields (no fix yet) decode to `None`.
///
/// # Examples
///
/// ```
/// use dashcam::nmea::decoder::parse_coordinate;
///
/// let lat = parse_coordinate("4807.038", "N", 90.0).unwrap().unwrap();
/// assert!((lat - 48.1173).abs() < 1e-4);
///
/// let lon = parse_coordinate("01131.000", "W", 180.0).unwrap().unwrap();
/// assert!((lon + 11.516_666).abs() < 1e-4);
/// ```
pub fn parse_coordinate(value: &str, hemisphere: &str, limit: f64) -> Result<Option<f64>> {
    if value.is_empty() {
        return Ok(None);
    }

    let dot = value.find('.').unwrap_or(value.len());
    if dot < 3 || !value.is_ascii() {
        return Err(DashcamError::Nmea(format!("Invalid coordinate: {:?}", value)));
    }

    let (degrees, minutes) = value.split_at(dot - 2);
    let degrees: f64 = degrees
        .parse()
        .map_err(|_| DashcamError::Nmea(format!("Invalid coordinate degrees: {:?}", value)))?;
    let minutes: f64 = minutes
        .parse()
        .map_err(|_| DashcamError::Nmea(format!("Invalid coordinate minutes: {:?}", value)))?;

    if !(0.0..60.0).contains(&minutes) {
        return Err(DashcamError::Nmea(format!("Coordinate minutes out of range: {:?}", value)));
    }

    let magnitude = degrees + minutes / 60.0;
    if magnitude > limit {
        return Err(DashcamError::Nmea(format!("Coordinate out of range: {:?}", value)));
    }

    match hemisphere {
        "N" | "E" => Ok(Some(magnitude)),
        "S" | "W" => Ok(Some(-magnitude)),
        other => Err(DashcamError::Nmea(format!("Invalid hemisphere: {:?}", other))),
    }
}

/// Parse an `hhmmss(.sss)` UTC time field
pub fn parse_time(value: &str) -> Result<Option<NaiveTime>> {
    if value.is_empty() {
        return Ok(None);
    }

    if value.len() < 6 || !value.is_ascii() {
        return Err(DashcamError::Nmea(format!("Invalid time: {:?}", value)));
    }

    let hour = parse_two_digits(&value[0..2])?;
    let minute = parse_two_digits(&value[2..4])?;
    let second = parse_two_digits(&value[4..6])?;

    NaiveTime::from_hms_opt(hour, minute, second)
        .map(Some)
        .ok_or_else(|| DashcamError::Nmea(format!("Invalid time: {:?}", value)))
}

/// Parse a `ddmmyy` date field (years are taken as 20yy)
pub fn parse_date(value: &str) -> Result<Option<NaiveDate>> {
    if value.is_empty() {
        return Ok(None);
    }

    if value.len() != 6 || !value.is_ascii() {
        return Err(DashcamError::Nmea(format!("Invalid date: {:?}", value)));
    }

    let day = parse_two_digits(&value[0..2])?;
    let month = parse_two_digits(&value[2..4])?;
    let year = 2000 + parse_two_digits(&value[4..6])? as i32;

    NaiveDate::from_ymd_opt(year, month, day)
        .map(Some)
        .ok_or_else(|| DashcamError::Nmea(format!("Invalid date: {:?}", value)))
}

fn parse_two_digits(value: &str) -> Result<u32> {
    if !value.bytes().all(|b| b.is_ascii_digit()) {
        return Err(DashcamError::Nmea(format!("Expected digits, got {:?}", value)));
    }
    value
        .parse()
        .map_err(|_| DashcamError::Nmea(format!("Expected digits, got {:?}", value)))
}

fn parse_or_zero(value: &str, name: &str) -> Result<u8> {
    if value.is_empty() {
        return Ok(0);
    }
    value
        .parse()
        .map_err(|_| DashcamError::Nmea(format!("Invalid {}: {:?}", name, value)))
}

fn parse_optional_f64(value: &str, name: &str) -> Result<Option<f64>> {
    if value.is_empty() {
        return Ok(None);
    }
    value
        .parse()
        .map(Some)
        .map_err(|_| DashcamError::Nmea(format!("Invalid {}: {:?}", name, value)))
}
