//! Frame layout definitions
//!
//! A frame layout is fixed: every field is a little-endian unsigned integer occupying a
//! byte sub-range of the payload, converted to a physical value with `raw / divisor -
//! offset`.

use crate::types::FrameId;

/// Rounding applied to a field at decode time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rounding {
    /// Leave the computed value as is (the channel rounds at read time)
    None,
    /// Magnitude-dependent rounding for sensors with a wide dynamic range
    Progressive,
}

/// Inclusive physical range a decoded value must lie in
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FieldRange {
    pub min: Option<f64>,
    pub max: Option<f64>,
}

impl FieldRange {
    /// Both bounds checked
    pub const fn between(min: f64, max: f64) -> Self {
        Self {
            min: Some(min),
            max: Some(max),
        }
    }

    /// Only the lower bound checked
    pub const fn at_least(min: f64) -> Self {
        Self { min: Some(min), max: None }
    }

    /// True if `value` satisfies the range.
    ///
    /// A value of exactly zero below the minimum is accepted: zero is what the
    /// sensors report when they have no reading yet.
    pub fn accepts(&self, value: f64) -> bool {
        if let Some(max) = self.max {
            if value > max {
                return false;
            }
        }
        if let Some(min) = self.min {
            if value < min && value != 0.0 {
                return false;
            }
        }
        true
    }
}

/// One field of a frame layout
#[derive(Debug, Clone, PartialEq)]
pub struct FieldSpec {
    /// Field name (channel or entity attribute)
    pub name: &'static str,
    /// First byte of the field
    pub start: usize,
    /// One past the last byte of the field
    pub end: usize,
    /// Raw value is divided by this
    pub divisor: f64,
    /// Subtracted after division
    pub offset: f64,
    /// Raw value meaning "not available"
    pub sentinel: Option<u64>,
    /// Physical range check
    pub range: Option<FieldRange>,
    /// Decode-time rounding policy
    pub rounding: Rounding,
}

impl FieldSpec {
    /// Plain unsigned field `raw / divisor`
    pub fn new(name: &'static str, start: usize, end: usize, divisor: f64) -> Self {
        Self {
            name,
            start,
            end,
            divisor,
            offset: 0.0,
            sentinel: None,
            range: None,
            rounding: Rounding::None,
        }
    }

    pub fn with_offset(mut self, offset: f64) -> Self {
        self.offset = offset;
        self
    }

    pub fn with_sentinel(mut self, raw: u64) -> Self {
        self.sentinel = Some(raw);
        self
    }

    pub fn with_range(mut self, range: FieldRange) -> Self {
        self.range = Some(range);
        self
    }

    pub fn with_progressive_rounding(mut self) -> Self {
        self.rounding = Rounding::Progressive;
        self
    }

    /// Width of the field in bytes
    pub fn width(&self) -> usize {
        self.end - self.start
    }
}

/// What the consumer does with a decoded frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    /// Every field feeds the channel of the same name
    Channels,
    /// The frame describes one tracked entity (AIS)
    Entity,
}

/// Static description of one frame identifier
#[derive(Debug, Clone, PartialEq)]
pub struct FrameDescriptor {
    pub id: FrameId,
    /// Human-readable name used in logs
    pub name: &'static str,
    /// Expected payload length in bytes
    pub length: usize,
    pub kind: FrameKind,
    /// Fields in payload order
    pub fields: Vec<FieldSpec>,
}

impl FrameDescriptor {
    /// Check that every field lies within the payload and has a usable divisor
    pub fn validate(&self) -> std::result::Result<(), String> {
        for field in &self.fields {
            if field.start >= field.end || field.end > self.length {
                return Err(format!(
                    "field '{}' of 0x{} spans bytes {}..{} outside a {}-byte payload",
                    field.name, self.id, field.start, field.end, self.length
                ));
            }
            if field.width() > 8 {
                return Err(format!("field '{}' of 0x{} is wider than 8 bytes", field.name, self.id));
            }
            if field.divisor == 0.0 {
                return Err(format!("field '{}' of 0x{} has a zero divisor", field.name, self.id));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_range_zero_exception() {
        let range = FieldRange::between(1.0, 14.0);
        assert!(range.accepts(0.0));
        assert!(range.accepts(1.0));
        assert!(range.accepts(14.0));
        assert!(!range.accepts(0.5));
        assert!(!range.accepts(14.001));
    }

    #[test]
    fn test_lower_bound_only() {
        let range = FieldRange::at_least(0.0);
        assert!(range.accepts(1e9));
        assert!(!range.accepts(-0.1));
    }

    #[test]
    fn test_validate_rejects_field_outside_payload() {
        let descriptor = FrameDescriptor {
            id: FrameId::from_const(0x123),
            name: "broken",
            length: 2,
            kind: FrameKind::Channels,
            fields: vec![FieldSpec::new("x", 1, 3, 1.0)],
        };
        assert!(descriptor.validate().is_err());
    }
}
