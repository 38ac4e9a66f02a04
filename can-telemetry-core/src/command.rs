//! Outbound command construction
//!
//! The presentation layer never formats relay commands itself: it builds an
//! `OutboundCommand` and the `CommandEncoder` turns it into one or more
//! `<verb> <bus> <id>##<flag><hex payload>` strings. `ActuatorState` keeps the
//! last rudder and trim tab angles so they can be nudged in fixed steps.

use crate::config::TelemetryConfig;
use crate::types::{from_hex, to_hex, FrameId, Result, TelemetryError};
use std::str::FromStr;

/// Channel that records the last rudder angle sent
pub const SET_RUDDER_CHANNEL: &str = "Set_rdr_deg";
/// Channel that records the last desired heading sent
pub const DESIRED_HEADING_CHANNEL: &str = "Desired_heading";

const RUDDER_FRAME: FrameId = FrameId::from_const(0x001);
const TRIM_TAB_FRAME: FrameId = FrameId::from_const(0x002);
const POWER_RESTART_FRAME: FrameId = FrameId::from_const(0x003);
const PID_FRAME: FrameId = FrameId::from_const(0x200);
const POWER_FRAME: FrameId = FrameId::from_const(0x202);

const RUDDER_STATUS: u8 = 0x80;
const HEADING_STATUS: u8 = 0x00;

/// An actuator or configuration command for the vehicle
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundCommand {
    /// Rudder set point in degrees, -90 and up
    Rudder { angle: f64 },
    /// Trim tab angle in degrees, -90 and up
    TrimTab { angle: f64 },
    /// Desired heading in degrees
    DesiredHeading { heading: f64 },
    /// Controller gains
    Pid { p: f64, i: f64, d: f64 },
    PowerOff,
    RestartPower,
    /// Arbitrary payload for a frame id
    Raw { frame_id: FrameId, payload: Vec<u8> },
}

impl OutboundCommand {
    /// `(channel, value)` pairs the command path records as set points
    pub fn set_points(&self) -> Vec<(&'static str, f64)> {
        match self {
            OutboundCommand::Rudder { angle } => vec![(SET_RUDDER_CHANNEL, *angle)],
            OutboundCommand::DesiredHeading { heading } => vec![(DESIRED_HEADING_CHANNEL, *heading)],
            _ => Vec::new(),
        }
    }

    /// Short tag shown next to the command in the output display
    pub fn label(&self) -> &'static str {
        match self {
            OutboundCommand::Rudder { .. } => "RUDDER SENT",
            OutboundCommand::TrimTab { .. } => "TRIMTAB SENT",
            OutboundCommand::DesiredHeading { .. } => "HEADING SENT",
            OutboundCommand::Pid { .. } => "SEND PID",
            OutboundCommand::PowerOff => "POWER OFF",
            OutboundCommand::RestartPower => "RESTART POWER",
            OutboundCommand::Raw { .. } => "RAW SENT",
        }
    }
}

impl FromStr for OutboundCommand {
    type Err = TelemetryError;

    /// Parse `name[:args]`, e.g. `rudder:10`, `pid:1.5,0.2,0`, `raw:206:0A0B`
    fn from_str(s: &str) -> Result<Self> {
        let (name, args) = s.split_once(':').unwrap_or((s, ""));
        let number = |text: &str| {
            text.trim()
                .parse::<f64>()
                .map_err(|_| TelemetryError::InvalidCommand(format!("'{}' is not a number in '{}'", text, s)))
        };

        match name.trim().to_ascii_lowercase().as_str() {
            "rudder" => Ok(OutboundCommand::Rudder { angle: number(args)? }),
            "trimtab" | "trim" => Ok(OutboundCommand::TrimTab { angle: number(args)? }),
            "heading" => Ok(OutboundCommand::DesiredHeading { heading: number(args)? }),
            "pid" => {
                let gains = args.split(',').map(number).collect::<Result<Vec<f64>>>()?;
                match gains.as_slice() {
                    [p, i, d] => Ok(OutboundCommand::Pid { p: *p, i: *i, d: *d }),
                    _ => Err(TelemetryError::InvalidCommand(format!("pid needs p,i,d in '{}'", s))),
                }
            }
            "power-off" => Ok(OutboundCommand::PowerOff),
            "restart-power" => Ok(OutboundCommand::RestartPower),
            "raw" => {
                let (id, payload) = args
                    .split_once(':')
                    .ok_or_else(|| TelemetryError::InvalidCommand(format!("raw needs id:payload in '{}'", s)))?;
                Ok(OutboundCommand::Raw {
                    frame_id: id.parse()?,
                    payload: from_hex(payload.trim())?,
                })
            }
            other => Err(TelemetryError::InvalidCommand(format!("unknown command '{}'", other))),
        }
    }
}

/// Degrees per actuator nudge
pub const ACTUATOR_STEP: f64 = 3.0;
/// Nudged angles stay within ±this many degrees
pub const ACTUATOR_LIMIT: f64 = 45.0;

/// One fixed-size actuator adjustment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActuatorStep {
    RudderLeft,
    RudderRight,
    RudderCenter,
    TrimLeft,
    TrimRight,
    TrimCenter,
}

impl FromStr for ActuatorStep {
    type Err = TelemetryError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "rudder-left" => Ok(ActuatorStep::RudderLeft),
            "rudder-right" => Ok(ActuatorStep::RudderRight),
            "rudder-center" => Ok(ActuatorStep::RudderCenter),
            "trim-left" => Ok(ActuatorStep::TrimLeft),
            "trim-right" => Ok(ActuatorStep::TrimRight),
            "trim-center" => Ok(ActuatorStep::TrimCenter),
            other => Err(TelemetryError::InvalidCommand(format!("unknown actuator step '{}'", other))),
        }
    }
}

/// Last commanded rudder and trim tab angles
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ActuatorState {
    pub rudder: f64,
    pub trim_tab: f64,
}

impl ActuatorState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Move the rudder by `steps` nudges, clamped to the actuator limit
    pub fn step_rudder(&mut self, steps: i32) -> OutboundCommand {
        self.rudder = nudge(self.rudder, steps);
        OutboundCommand::Rudder { angle: self.rudder }
    }

    /// Move the trim tab by `steps` nudges, clamped to the actuator limit
    pub fn step_trim(&mut self, steps: i32) -> OutboundCommand {
        self.trim_tab = nudge(self.trim_tab, steps);
        OutboundCommand::TrimTab { angle: self.trim_tab }
    }

    pub fn center_rudder(&mut self) -> OutboundCommand {
        self.rudder = 0.0;
        OutboundCommand::Rudder { angle: 0.0 }
    }

    pub fn center_trim(&mut self) -> OutboundCommand {
        self.trim_tab = 0.0;
        OutboundCommand::TrimTab { angle: 0.0 }
    }

    /// Apply `step` and return the command that sends the new angle
    pub fn apply(&mut self, step: ActuatorStep) -> OutboundCommand {
        match step {
            ActuatorStep::RudderLeft => self.step_rudder(-1),
            ActuatorStep::RudderRight => self.step_rudder(1),
            ActuatorStep::RudderCenter => self.center_rudder(),
            ActuatorStep::TrimLeft => self.step_trim(-1),
            ActuatorStep::TrimRight => self.step_trim(1),
            ActuatorStep::TrimCenter => self.center_trim(),
        }
    }

    /// Adopt the angle of a typed rudder or trim tab command, so later nudges start
    /// from it. Typed angles are not clamped.
    pub fn observe(&mut self, command: &OutboundCommand) {
        match command {
            OutboundCommand::Rudder { angle } => self.rudder = *angle,
            OutboundCommand::TrimTab { angle } => self.trim_tab = *angle,
            _ => {}
        }
    }
}

fn nudge(angle: f64, steps: i32) -> f64 {
    (angle + ACTUATOR_STEP * f64::from(steps)).clamp(-ACTUATOR_LIMIT, ACTUATOR_LIMIT)
}

/// Formats outbound commands for the relay
#[derive(Debug, Clone)]
pub struct CommandEncoder {
    verb: String,
    bus: String,
    flag_digit: char,
}

impl CommandEncoder {
    pub fn new(verb: impl Into<String>, bus: impl Into<String>, flag_digit: char) -> Self {
        Self {
            verb: verb.into(),
            bus: bus.into(),
            flag_digit,
        }
    }

    pub fn from_config(config: &TelemetryConfig) -> Self {
        Self::new(config.send_verb.clone(), config.bus.clone(), config.flag_digit)
    }

    /// The relay command strings for `command`, in sending order
    pub fn encode(&self, command: &OutboundCommand) -> Result<Vec<String>> {
        let frames: Vec<(FrameId, Vec<u8>)> = match command {
            OutboundCommand::Rudder { angle } => {
                let mut payload = encode_angle("rudder", *angle)?;
                payload.push(RUDDER_STATUS);
                vec![(RUDDER_FRAME, payload)]
            }
            OutboundCommand::TrimTab { angle } => vec![(TRIM_TAB_FRAME, encode_angle("trim tab", *angle)?)],
            OutboundCommand::DesiredHeading { heading } => {
                let mut payload = encode_u32("heading", heading * 1000.0)?;
                payload.push(HEADING_STATUS);
                vec![(RUDDER_FRAME, payload)]
            }
            OutboundCommand::Pid { p, i, d } => {
                let mut payload = encode_u32("p", p * 1_000_000.0)?;
                payload.extend(encode_u32("i", i * 1_000_000.0)?);
                payload.extend(encode_u32("d", d * 1_000_000.0)?);
                vec![(PID_FRAME, payload)]
            }
            OutboundCommand::PowerOff => vec![(POWER_FRAME, vec![0x0A])],
            OutboundCommand::RestartPower => vec![(POWER_FRAME, vec![0x14]), (POWER_RESTART_FRAME, vec![0x0F])],
            OutboundCommand::Raw { frame_id, payload } => vec![(*frame_id, payload.clone())],
        };

        Ok(frames
            .iter()
            .map(|(id, payload)| self.format(*id, payload))
            .collect())
    }

    /// `<verb> <bus> <id>##<flag><HEX>`
    pub fn format(&self, frame_id: FrameId, payload: &[u8]) -> String {
        format!(
            "{} {} {}##{}{}",
            self.verb,
            self.bus,
            frame_id,
            self.flag_digit,
            to_hex(payload)
        )
    }
}

/// Rewrite a send command in the dump relay's layout so that sent and received
/// frames read alike in the raw log: `<bus>  <id>  [NN]  AA BB ...`
pub fn canonicalize(command: &str) -> Result<String> {
    let invalid = || TelemetryError::InvalidCommand(format!("cannot canonicalize '{}'", command));

    let mut tokens = command.split_whitespace();
    let _verb = tokens.next().ok_or_else(invalid)?;
    let bus = tokens.next().ok_or_else(invalid)?;
    let frame = tokens.next().ok_or_else(invalid)?;

    let (id, rest) = frame.split_once("##").ok_or_else(invalid)?;
    let frame_id: FrameId = id.parse()?;
    // skip the flag digit
    let mut chars = rest.chars();
    chars.next().ok_or_else(invalid)?;
    let payload = from_hex(chars.as_str())?;

    let bytes: Vec<String> = payload.iter().map(|b| format!("{:02X}", b)).collect();
    Ok(format!("{}  {}  [{:02}]  {}", bus, frame_id, payload.len(), bytes.join(" "))
        .trim_end()
        .to_string())
}

/// `(angle + 90) * 1000` as a little-endian u32; angles below -90 are rejected
fn encode_angle(what: &str, angle: f64) -> Result<Vec<u8>> {
    if angle < -90.0 {
        return Err(TelemetryError::InvalidCommand(format!(
            "invalid {} angle {} (must be at least -90)",
            what, angle
        )));
    }
    encode_u32(what, (angle + 90.0) * 1000.0)
}

fn encode_u32(what: &str, scaled: f64) -> Result<Vec<u8>> {
    let rounded = scaled.round();
    if !rounded.is_finite() || rounded < 0.0 || rounded > u32::MAX as f64 {
        return Err(TelemetryError::InvalidCommand(format!(
            "{} value {} cannot be encoded as an unsigned 32-bit field",
            what, scaled
        )));
    }
    Ok((rounded as u32).to_le_bytes().to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encoder() -> CommandEncoder {
        CommandEncoder::new("cansend", "can0", '0')
    }

    #[test]
    fn test_rudder_command() {
        let commands = encoder().encode(&OutboundCommand::Rudder { angle: 0.0 }).unwrap();
        // 90_000 = 0x00015F90
        assert_eq!(commands, vec!["cansend can0 001##0905F010080".to_string()]);
    }

    #[test]
    fn test_angles_below_minus_90_rejected() {
        assert!(encoder().encode(&OutboundCommand::Rudder { angle: -91.0 }).is_err());
        assert!(encoder().encode(&OutboundCommand::TrimTab { angle: -90.5 }).is_err());
        assert!(encoder().encode(&OutboundCommand::TrimTab { angle: -90.0 }).is_ok());
    }

    #[test]
    fn test_restart_power_sends_two_frames() {
        let commands = encoder().encode(&OutboundCommand::RestartPower).unwrap();
        assert_eq!(
            commands,
            vec!["cansend can0 202##014".to_string(), "cansend can0 003##00F".to_string()]
        );
    }

    #[test]
    fn test_pid_payload() {
        let commands = encoder()
            .encode(&OutboundCommand::Pid { p: 1.0, i: 0.5, d: 0.0 })
            .unwrap();
        assert_eq!(commands, vec!["cansend can0 200##040420F0020A1070000000000".to_string()]);
    }

    #[test]
    fn test_canonicalize() {
        let pretty = canonicalize("cansend can0 002##0905F0100").unwrap();
        assert_eq!(pretty, "can0  002  [04]  90 5F 01 00");

        let empty = canonicalize("cansend can0 130##1").unwrap();
        assert_eq!(empty, "can0  130  [00]");
        assert!(canonicalize("cansend can0").is_err());
    }

    #[test]
    fn test_canonical_form_parses_as_dump_line() {
        let pretty = canonicalize("cansend can0 204##00102").unwrap();
        let frame = crate::line::parse_dump_line(&pretty, "can0").unwrap().unwrap();
        assert_eq!(frame.frame_id, FrameId::from_const(0x204));
        assert_eq!(frame.data, vec![0x01, 0x02]);
    }

    #[test]
    fn test_parse_commands() {
        assert_eq!("rudder:10".parse::<OutboundCommand>().unwrap(), OutboundCommand::Rudder { angle: 10.0 });
        assert_eq!(
            "pid:1,0.5,0".parse::<OutboundCommand>().unwrap(),
            OutboundCommand::Pid { p: 1.0, i: 0.5, d: 0.0 }
        );
        assert_eq!("power-off".parse::<OutboundCommand>().unwrap(), OutboundCommand::PowerOff);
        assert_eq!(
            "raw:206:0A0B".parse::<OutboundCommand>().unwrap(),
            OutboundCommand::Raw {
                frame_id: FrameId::from_const(0x206),
                payload: vec![0x0A, 0x0B]
            }
        );
        assert!("rudder:left".parse::<OutboundCommand>().is_err());
        assert!("pid:1,2".parse::<OutboundCommand>().is_err());
        assert!("launch".parse::<OutboundCommand>().is_err());
    }

    #[test]
    fn test_set_points() {
        let heading = OutboundCommand::DesiredHeading { heading: 270.0 };
        assert_eq!(heading.set_points(), vec![(DESIRED_HEADING_CHANNEL, 270.0)]);
        assert!(OutboundCommand::PowerOff.set_points().is_empty());
    }

    #[test]
    fn test_rudder_nudges_clamp_at_limit() {
        let mut state = ActuatorState::new();
        assert_eq!(state.step_rudder(1), OutboundCommand::Rudder { angle: 3.0 });
        assert_eq!(state.step_rudder(-2), OutboundCommand::Rudder { angle: -3.0 });
        for _ in 0..20 {
            state.step_rudder(-1);
        }
        assert_eq!(state.rudder, -45.0);
        assert_eq!(state.step_rudder(-1), OutboundCommand::Rudder { angle: -45.0 });
        assert_eq!(state.center_rudder(), OutboundCommand::Rudder { angle: 0.0 });
        assert_eq!(state.trim_tab, 0.0);
    }

    #[test]
    fn test_trim_steps() {
        let mut state = ActuatorState::new();
        assert_eq!(state.apply(ActuatorStep::TrimRight), OutboundCommand::TrimTab { angle: 3.0 });
        assert_eq!(state.apply(ActuatorStep::TrimRight), OutboundCommand::TrimTab { angle: 6.0 });
        assert_eq!(state.apply(ActuatorStep::TrimLeft), OutboundCommand::TrimTab { angle: 3.0 });
        assert_eq!(state.apply(ActuatorStep::TrimCenter), OutboundCommand::TrimTab { angle: 0.0 });
        assert_eq!(state.rudder, 0.0);
    }

    #[test]
    fn test_nudges_continue_from_typed_angle() {
        let mut state = ActuatorState::new();
        state.observe(&OutboundCommand::Rudder { angle: 44.0 });
        assert_eq!(state.apply(ActuatorStep::RudderRight), OutboundCommand::Rudder { angle: 45.0 });

        state.observe(&OutboundCommand::TrimTab { angle: -10.0 });
        state.observe(&OutboundCommand::PowerOff);
        assert_eq!(state.step_trim(-1), OutboundCommand::TrimTab { angle: -13.0 });
    }

    #[test]
    fn test_parse_actuator_steps() {
        assert_eq!("rudder-left".parse::<ActuatorStep>().unwrap(), ActuatorStep::RudderLeft);
        assert_eq!("Trim-Center".parse::<ActuatorStep>().unwrap(), ActuatorStep::TrimCenter);
        assert!("rudder-up".parse::<ActuatorStep>().is_err());
    }
}
