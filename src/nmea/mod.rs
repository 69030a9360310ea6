//! # NMEA 0183 Module
//!
//! Decoding of the text sentences emitted by serial GPS receivers.
//!
//! This module handles:
//! - Sentence framing (`$` start delimiter, `*hh` checksum suffix)
//! - XOR checksum verification
//! - GGA (fix data) and RMC (recommended minimum) sentence decoding
//! - Coordinate conversion from `ddmm.mmmm` to signed decimal degrees

pub mod protocol;
pub mod decoder;
pub mod checksum;
