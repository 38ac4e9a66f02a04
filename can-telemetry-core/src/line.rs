//! Dump relay line protocol
//!
//! Lines look like `can0  206  [24]  E8 03 ...`: bus name, frame id, byte count in
//! brackets, then space-separated hex byte pairs.

use crate::types::{FrameId, RawFrame, Result, TelemetryError};

/// Parse one dump line.
///
/// Returns `Ok(None)` for lines from another bus (or relay chatter that does not
/// start with the bus name), which are logged but never decoded.
pub fn parse_dump_line(line: &str, bus: &str) -> Result<Option<RawFrame>> {
    let mut tokens = line.split_whitespace();
    match tokens.next() {
        Some(first) if first == bus => {}
        _ => return Ok(None),
    }

    let frame_id: FrameId = tokens
        .next()
        .ok_or_else(|| TelemetryError::InvalidLine(format!("missing frame id in '{}'", line)))?
        .parse()?;

    let payload = match line.split_once(']') {
        Some((_, rest)) => rest,
        None => {
            return Err(TelemetryError::InvalidLine(format!(
                "missing byte count in '{}'",
                line
            )))
        }
    };

    let data = payload
        .split_whitespace()
        .map(|pair| {
            u8::from_str_radix(pair, 16)
                .map_err(|_| TelemetryError::InvalidLine(format!("bad byte '{}' in '{}'", pair, line)))
        })
        .collect::<Result<Vec<u8>>>()?;

    Ok(Some(RawFrame {
        bus: bus.to_string(),
        frame_id,
        data,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_line() {
        let frame = parse_dump_line("can0  110   [2]  D3 1B", "can0").unwrap().unwrap();
        assert_eq!(frame.bus, "can0");
        assert_eq!(frame.frame_id, FrameId::from_const(0x110));
        assert_eq!(frame.data, vec![0xD3, 0x1B]);
        assert_eq!(frame.dlc(), 2);
    }

    #[test]
    fn test_frame_id_case_folded() {
        let frame = parse_dump_line("can0 0A4 [1] ff", "can0").unwrap().unwrap();
        assert_eq!(frame.frame_id.to_string(), "0a4");
        assert_eq!(frame.data, vec![0xFF]);
    }

    #[test]
    fn test_empty_payload() {
        let frame = parse_dump_line("can0  130  [00]  ", "can0").unwrap().unwrap();
        assert!(frame.data.is_empty());
    }

    #[test]
    fn test_other_bus_and_chatter_ignored() {
        assert_eq!(parse_dump_line("can1  110  [2]  D3 1B", "can0").unwrap(), None);
        assert_eq!(parse_dump_line("[ERROR] connection reset", "can0").unwrap(), None);
        assert_eq!(parse_dump_line("", "can0").unwrap(), None);
    }

    #[test]
    fn test_malformed_lines() {
        assert!(parse_dump_line("can0", "can0").is_err());
        assert!(parse_dump_line("can0 110 D3 1B", "can0").is_err());
        assert!(parse_dump_line("can0 110 [2] D3 ZZ", "can0").is_err());
        assert!(parse_dump_line("can0 nope [2] D3 1B", "can0").is_err());
    }
}
