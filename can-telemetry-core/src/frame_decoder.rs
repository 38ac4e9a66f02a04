//! Frame Decoding Engine
//!
//! Converts a raw payload into named physical values using the frame's fixed
//! descriptor. Handles little-endian field extraction, scaling, re-centering offsets,
//! not-available sentinels, range validation and decode-time rounding.

use crate::frames::{FieldSpec, FrameDescriptor, Rounding};
use crate::rounding::round_progressive;
use crate::types::{to_hex, DecodedField, DecodedFrame, Result, TelemetryError};
use byteorder::{ByteOrder, LittleEndian};

/// Frame decoder - pure mapping from payload bytes to physical values
pub struct FrameDecoder;

impl FrameDecoder {
    /// Decode a payload against its descriptor
    ///
    /// # Returns
    /// * `Ok(DecodedFrame)` with one entry per field, in descriptor order
    /// * `Err(WrongLength)` if the payload size does not match the descriptor
    /// * `Err(OutOfRange)` if any non-null value violates its field's range
    pub fn decode(descriptor: &FrameDescriptor, data: &[u8]) -> Result<DecodedFrame> {
        if data.len() != descriptor.length {
            return Err(TelemetryError::WrongLength {
                frame_id: descriptor.id,
                expected: descriptor.length,
                actual: data.len(),
            });
        }

        let mut fields = Vec::with_capacity(descriptor.fields.len());
        for spec in &descriptor.fields {
            fields.push(Self::decode_field(descriptor, spec, data)?);
        }

        Ok(DecodedFrame {
            frame_id: descriptor.id,
            fields,
        })
    }

    fn decode_field(descriptor: &FrameDescriptor, spec: &FieldSpec, data: &[u8]) -> Result<DecodedField> {
        let bytes = &data[spec.start..spec.end];
        let raw_value = Self::extract_little_endian(bytes);

        if spec.sentinel == Some(raw_value) {
            return Ok(DecodedField {
                name: spec.name,
                value: None,
                raw_value,
            });
        }

        let mut value = raw_value as f64 / spec.divisor - spec.offset;

        if let Some(range) = spec.range {
            if !range.accepts(value) {
                log::warn!(
                    "{} parsed as {} from 0x{} (raw {})",
                    spec.name,
                    value,
                    to_hex(bytes),
                    raw_value
                );
                return Err(TelemetryError::OutOfRange {
                    frame_id: descriptor.id,
                    field: spec.name.to_string(),
                    raw_hex: to_hex(bytes),
                    value,
                });
            }
        }

        if spec.rounding == Rounding::Progressive {
            value = round_progressive(value);
        }

        Ok(DecodedField {
            name: spec.name,
            value: Some(value),
            raw_value,
        })
    }

    /// Read a 1-8 byte little-endian unsigned integer
    fn extract_little_endian(bytes: &[u8]) -> u64 {
        if bytes.is_empty() {
            return 0;
        }
        LittleEndian::read_uint(bytes, bytes.len())
    }

    /// Encode physical values into a payload for `descriptor`.
    ///
    /// The inverse of [`FrameDecoder::decode`]: `raw = round((value + offset) *
    /// divisor)`; a `None` value writes the field's sentinel. Fields missing from
    /// `values` are left zero. Used by replay generators and tests.
    pub fn encode(descriptor: &FrameDescriptor, values: &[(&str, Option<f64>)]) -> Result<Vec<u8>> {
        let mut data = vec![0u8; descriptor.length];
        for (name, value) in values {
            let spec = descriptor
                .fields
                .iter()
                .find(|f| f.name == *name)
                .ok_or_else(|| {
                    TelemetryError::InvalidCommand(format!("frame 0x{} has no field '{}'", descriptor.id, name))
                })?;

            let raw = match value {
                Some(v) => {
                    let scaled = ((v + spec.offset) * spec.divisor).round();
                    let limit = if spec.width() >= 8 {
                        u64::MAX as f64
                    } else {
                        ((1u64 << (spec.width() * 8)) - 1) as f64
                    };
                    if scaled < 0.0 || scaled > limit {
                        return Err(TelemetryError::InvalidCommand(format!(
                            "{} = {} does not fit in {} bytes",
                            spec.name,
                            v,
                            spec.width()
                        )));
                    }
                    scaled as u64
                }
                None => spec.sentinel.ok_or_else(|| {
                    TelemetryError::InvalidCommand(format!("{} has no not-available value", spec.name))
                })?,
            };

            LittleEndian::write_uint(&mut data[spec.start..spec.end], raw, spec.width());
        }
        Ok(data)
    }
}
