//! Relay host health
//!
//! A worker reads the relay's CPU temperature once per poll interval. Any reading
//! (even an error) refreshes the link state; the link turns DISCONNECTED once no
//! reading has arrived for `timeout` seconds.

use serde::Serialize;
use std::fmt;

/// Whether the relay host answers health polls
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RelayLink {
    Connected,
    Disconnected,
}

impl fmt::Display for RelayLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RelayLink::Connected => write!(f, "CONNECTED"),
            RelayLink::Disconnected => write!(f, "DISCONNECTED"),
        }
    }
}

/// Outcome of one health poll
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum HealthReading {
    /// CPU temperature in °C
    Temperature(f64),
    /// The command ran but printed no temperature
    Error,
    /// The command could not be run on the relay
    Disconnected,
}

impl HealthReading {
    fn link(&self) -> RelayLink {
        match self {
            HealthReading::Temperature(_) => RelayLink::Connected,
            HealthReading::Error | HealthReading::Disconnected => RelayLink::Disconnected,
        }
    }
}

/// Parse sysfs thermal output (millidegrees Celsius) into °C
pub fn parse_millidegrees(stdout: &str) -> Option<f64> {
    let millis: f64 = stdout.trim().parse().ok()?;
    Some(millis / 1000.0)
}

/// Link state and last temperature of the relay host
#[derive(Debug, Clone)]
pub struct RelayHealth {
    timeout: f64,
    link: RelayLink,
    last_update: f64,
    temperature: Option<f64>,
}

impl RelayHealth {
    /// Starts DISCONNECTED until the first reading
    pub fn new(timeout: f64, now: f64) -> Self {
        Self {
            timeout,
            link: RelayLink::Disconnected,
            last_update: now,
            temperature: None,
        }
    }

    /// Apply a reading. Returns the new link state when it changed.
    pub fn update(&mut self, now: f64, reading: HealthReading) -> Option<RelayLink> {
        self.last_update = now;
        self.temperature = match reading {
            HealthReading::Temperature(celsius) => Some(celsius),
            _ => None,
        };
        self.transition(reading.link())
    }

    /// Turn DISCONNECTED when readings have stopped arriving
    pub fn check(&mut self, now: f64) -> Option<RelayLink> {
        if now - self.last_update > self.timeout {
            self.temperature = None;
            return self.transition(RelayLink::Disconnected);
        }
        None
    }

    pub fn link(&self) -> RelayLink {
        self.link
    }

    pub fn temperature(&self) -> Option<f64> {
        self.temperature
    }

    /// Status line for the display, e.g. `RPI Temp: 48.3°C`
    pub fn label(&self) -> String {
        match self.temperature {
            Some(celsius) => format!("RPI Temp: {:.1}°C", celsius),
            None => "RPI Temp: --".to_string(),
        }
    }

    fn transition(&mut self, link: RelayLink) -> Option<RelayLink> {
        if self.link == link {
            return None;
        }
        log::info!("Relay {}", link);
        self.link = link;
        Some(link)
    }
}
