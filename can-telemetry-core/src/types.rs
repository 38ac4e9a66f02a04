//! Core types for the telemetry core
//!
//! This module defines the fundamental types shared by the decoder, the stores and the
//! ingestion pipeline: frame identifiers, raw frames parsed from the dump relay,
//! decoded field values and the error type.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Result type for telemetry operations
pub type Result<T> = std::result::Result<T, TelemetryError>;

/// Errors that can occur while decoding, dispatching or relaying frames
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    #[error("Incorrect data length for ID 0x{frame_id}: expected {expected} bytes, received {actual}")]
    WrongLength {
        frame_id: FrameId,
        expected: usize,
        actual: usize,
    },

    #[error("{field} out of range for ID 0x{frame_id}: decoded {value} from raw 0x{raw_hex}")]
    OutOfRange {
        frame_id: FrameId,
        field: String,
        raw_hex: String,
        value: f64,
    },

    #[error("Frame id not recognized: {0}")]
    UnknownFrameId(FrameId),

    #[error("Transport failure: {0}")]
    TransportFailure(String),

    #[error("Invalid dump line: {0}")]
    InvalidLine(String),

    #[error("Invalid command: {0}")]
    InvalidCommand(String),

    #[error("Registration error: {0}")]
    Registration(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

impl TelemetryError {
    /// Frame the error was raised for, when it is tied to one
    pub fn frame_id(&self) -> Option<FrameId> {
        match self {
            TelemetryError::WrongLength { frame_id, .. }
            | TelemetryError::OutOfRange { frame_id, .. }
            | TelemetryError::UnknownFrameId(frame_id) => Some(*frame_id),
            _ => None,
        }
    }
}

/// A 3-hex-digit CAN frame identifier (standard 11-bit id)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FrameId(u16);

impl FrameId {
    /// Largest id representable with 3 hex digits
    pub const MAX: u16 = 0xFFF;

    /// Create a frame id, rejecting values that do not fit in 3 hex digits
    pub fn new(id: u16) -> Result<Self> {
        if id > Self::MAX {
            return Err(TelemetryError::InvalidLine(format!(
                "frame id 0x{:X} does not fit in 3 hex digits",
                id
            )));
        }
        Ok(Self(id))
    }

    /// Create a frame id from a constant known to be in range
    pub const fn from_const(id: u16) -> Self {
        Self(id & Self::MAX)
    }

    /// Numeric value of the id
    pub fn value(&self) -> u16 {
        self.0
    }
}

impl fmt::Display for FrameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:03x}", self.0)
    }
}

impl FromStr for FrameId {
    type Err = TelemetryError;

    /// Parse a frame id token, case-folded (`"0A4"` and `"0a4"` are the same id)
    fn from_str(s: &str) -> Result<Self> {
        let token = s.trim().to_ascii_lowercase();
        let token = token.strip_prefix("0x").unwrap_or(&token);
        if token.is_empty() || token.len() > 3 {
            return Err(TelemetryError::InvalidLine(format!("bad frame id token '{}'", s)));
        }
        let id = u16::from_str_radix(token, 16)
            .map_err(|_| TelemetryError::InvalidLine(format!("bad frame id token '{}'", s)))?;
        Self::new(id)
    }
}

impl Serialize for FrameId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for FrameId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Raw CAN frame as relayed by the dump line protocol, before decoding
#[derive(Debug, Clone, PartialEq)]
pub struct RawFrame {
    /// Bus name (e.g. "can0")
    pub bus: String,
    /// Frame identifier, lower-cased for dispatch
    pub frame_id: FrameId,
    /// Payload bytes taken from the text after `]`
    pub data: Vec<u8>,
}

impl RawFrame {
    /// Number of payload bytes
    pub fn dlc(&self) -> usize {
        self.data.len()
    }
}

/// One decoded field of a frame
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedField {
    /// Field name (channel or entity attribute name)
    pub name: &'static str,
    /// Physical value, `None` when the raw value was the not-available sentinel
    pub value: Option<f64>,
    /// Raw little-endian integer before scaling (useful for debugging)
    pub raw_value: u64,
}

/// All fields decoded from one frame, in descriptor order
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedFrame {
    pub frame_id: FrameId,
    pub fields: Vec<DecodedField>,
}

impl DecodedFrame {
    /// Look up a field's value by name; `None` if absent or not available
    pub fn get(&self, name: &str) -> Option<f64> {
        self.fields
            .iter()
            .find(|f| f.name == name)
            .and_then(|f| f.value)
    }

    /// True if the frame carries a field with this name (even a null one)
    pub fn contains(&self, name: &str) -> bool {
        self.fields.iter().any(|f| f.name == name)
    }
}

/// Format bytes as an upper-case hex string without separators
pub fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02X}", b)).collect()
}

/// Parse a hex string (no separators) into bytes
pub fn from_hex(hex: &str) -> Result<Vec<u8>> {
    if hex.len() % 2 != 0 {
        return Err(TelemetryError::InvalidLine(format!("odd-length hex string '{}'", hex)));
    }
    (0..hex.len())
        .step_by(2)
        .map(|i| {
            hex.get(i..i + 2)
                .and_then(|pair| u8::from_str_radix(pair, 16).ok())
                .ok_or_else(|| TelemetryError::InvalidLine(format!("invalid hex '{}'", hex)))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_id_parse_case_folds() {
        let upper: FrameId = "0A4".parse().unwrap();
        let lower: FrameId = "0a4".parse().unwrap();
        assert_eq!(upper, lower);
        assert_eq!(upper.to_string(), "0a4");
        assert_eq!(upper.value(), 0x0A4);
    }

    #[test]
    fn test_frame_id_rejects_bad_tokens() {
        assert!("".parse::<FrameId>().is_err());
        assert!("1234".parse::<FrameId>().is_err());
        assert!("xyz".parse::<FrameId>().is_err());
    }

    #[test]
    fn test_hex_helpers() {
        assert_eq!(to_hex(&[0x0A, 0xFF, 0x00]), "0AFF00");
        assert_eq!(from_hex("0aff00").unwrap(), vec![0x0A, 0xFF, 0x00]);
        assert_eq!(from_hex("").unwrap(), Vec::<u8>::new());
        assert!(from_hex("123").is_err());
        assert!(from_hex("zz").is_err());
    }

    #[test]
    fn test_decoded_frame_lookup() {
        let frame = DecodedFrame {
            frame_id: FrameId::from_const(0x110),
            fields: vec![
                DecodedField { name: "pH", value: Some(7.0), raw_value: 7000 },
                DecodedField { name: "sog", value: None, raw_value: 1023 },
            ],
        };
        assert_eq!(frame.get("pH"), Some(7.0));
        assert_eq!(frame.get("sog"), None);
        assert!(frame.contains("sog"));
        assert!(!frame.contains("missing"));
    }
}
