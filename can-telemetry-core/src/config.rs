//! Telemetry configuration types
//!
//! Everything the pipeline and the consumer need to know about the session: bus and
//! relay command names, window/eviction timing, heartbeat subsystems, relay health
//! polling, queue sizes and the log directory.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Configuration for the telemetry core
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Bus name used by the dump relay and outbound commands
    #[serde(default = "default_bus")]
    pub bus: String,

    /// Verb of outbound send commands
    #[serde(default = "default_send_verb")]
    pub send_verb: String,

    /// Flag digit placed after `##` in outbound commands
    #[serde(default = "default_flag_digit")]
    pub flag_digit: char,

    /// Command that streams bus traffic; `{bus}` is replaced with the bus name
    #[serde(default = "default_dump_command")]
    pub dump_command: String,

    /// Plot window in seconds
    #[serde(default = "default_window")]
    pub window_secs: f64,

    /// Extra retention beyond the window, in seconds
    #[serde(default = "default_margin")]
    pub margin_secs: f64,

    /// Seconds without a frame before a subsystem is reported stale
    #[serde(default = "default_heartbeat_timeout")]
    pub heartbeat_timeout_secs: f64,

    /// Consumer tick interval in milliseconds
    #[serde(default = "default_tick_interval")]
    pub tick_interval_ms: u64,

    /// Decode queue capacity; lines beyond it are dropped from the live display
    #[serde(default = "default_decode_capacity")]
    pub decode_queue_capacity: usize,

    /// Raw-log queue capacity; producers block when it is full
    #[serde(default = "default_raw_log_capacity")]
    pub raw_log_queue_capacity: usize,

    /// Directory receiving the CSV logs
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,

    /// How long shutdown waits for each worker before abandoning it
    #[serde(default = "default_join_timeout")]
    pub join_timeout_ms: u64,

    /// Subsystems whose frames count as heartbeats
    #[serde(default = "default_heartbeats")]
    pub heartbeats: Vec<HeartbeatConfig>,

    /// Command printing the relay's CPU temperature in millidegrees; `None` disables
    /// relay health polling
    #[serde(default = "default_health_command")]
    pub health_command: Option<String>,

    /// Relay health poll interval in milliseconds
    #[serde(default = "default_health_interval")]
    pub health_interval_ms: u64,

    /// Seconds without a health reading before the relay is reported disconnected
    #[serde(default = "default_health_timeout")]
    pub health_timeout_secs: f64,

    /// Remote relay host
    #[serde(default)]
    pub remote: RemoteEndpoint,
}

fn default_bus() -> String {
    "can0".to_string()
}

fn default_send_verb() -> String {
    "cansend".to_string()
}

fn default_flag_digit() -> char {
    '0'
}

fn default_dump_command() -> String {
    "candump {bus}".to_string()
}

fn default_window() -> f64 {
    60.0
}

fn default_margin() -> f64 {
    5.0
}

fn default_heartbeat_timeout() -> f64 {
    10.0
}

fn default_tick_interval() -> u64 {
    50
}

fn default_decode_capacity() -> usize {
    4096
}

fn default_raw_log_capacity() -> usize {
    1024
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("logs")
}

fn default_join_timeout() -> u64 {
    2000
}

fn default_health_command() -> Option<String> {
    Some("cat /sys/class/thermal/thermal_zone0/temp".to_string())
}

fn default_health_interval() -> u64 {
    1000
}

fn default_health_timeout() -> f64 {
    5.0
}

fn default_heartbeats() -> Vec<HeartbeatConfig> {
    vec![HeartbeatConfig::new("130", "PDB")]
}

/// Frame id whose arrival proves a subsystem alive
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HeartbeatConfig {
    /// 3-hex-digit frame id
    pub frame_id: String,
    /// Label shown next to the status indicator
    pub label: String,
}

impl HeartbeatConfig {
    pub fn new(frame_id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            frame_id: frame_id.into(),
            label: label.into(),
        }
    }
}

/// Where the bus relay runs
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RemoteEndpoint {
    pub host: String,
    pub user: String,
    #[serde(default)]
    pub password: String,
}

impl Default for RemoteEndpoint {
    fn default() -> Self {
        Self {
            host: "192.168.0.10".to_string(),
            user: "sailbot".to_string(),
            password: String::new(),
        }
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            bus: default_bus(),
            send_verb: default_send_verb(),
            flag_digit: default_flag_digit(),
            dump_command: default_dump_command(),
            window_secs: default_window(),
            margin_secs: default_margin(),
            heartbeat_timeout_secs: default_heartbeat_timeout(),
            tick_interval_ms: default_tick_interval(),
            decode_queue_capacity: default_decode_capacity(),
            raw_log_queue_capacity: default_raw_log_capacity(),
            log_dir: default_log_dir(),
            join_timeout_ms: default_join_timeout(),
            heartbeats: default_heartbeats(),
            health_command: default_health_command(),
            health_interval_ms: default_health_interval(),
            health_timeout_secs: default_health_timeout(),
            remote: RemoteEndpoint::default(),
        }
    }
}

impl TelemetryConfig {
    /// Create a configuration with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder method: set the bus name
    pub fn with_bus(mut self, bus: impl Into<String>) -> Self {
        self.bus = bus.into();
        self
    }

    /// Builder method: set plot window and retention margin
    pub fn with_window(mut self, window_secs: f64, margin_secs: f64) -> Self {
        self.window_secs = window_secs;
        self.margin_secs = margin_secs;
        self
    }

    /// Builder method: set the heartbeat timeout
    pub fn with_heartbeat_timeout(mut self, secs: f64) -> Self {
        self.heartbeat_timeout_secs = secs;
        self
    }

    /// Builder method: add a heartbeat subsystem
    pub fn add_heartbeat(mut self, frame_id: impl Into<String>, label: impl Into<String>) -> Self {
        self.heartbeats.push(HeartbeatConfig::new(frame_id, label));
        self
    }

    /// Builder method: set queue capacities
    pub fn with_queue_capacities(mut self, decode: usize, raw_log: usize) -> Self {
        self.decode_queue_capacity = decode;
        self.raw_log_queue_capacity = raw_log;
        self
    }

    /// Builder method: set the log directory
    pub fn with_log_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.log_dir = dir.into();
        self
    }

    /// Builder method: set the worker join timeout
    pub fn with_join_timeout(mut self, timeout: Duration) -> Self {
        self.join_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Builder method: set or disable the relay health command
    pub fn with_health_command(mut self, command: Option<String>) -> Self {
        self.health_command = command;
        self
    }

    /// Builder method: set the relay health poll interval and staleness timeout
    pub fn with_health_timing(mut self, interval: Duration, timeout_secs: f64) -> Self {
        self.health_interval_ms = interval.as_millis() as u64;
        self.health_timeout_secs = timeout_secs;
        self
    }

    /// The dump command with the bus name filled in
    pub fn dump_command(&self) -> String {
        self.dump_command.replace("{bus}", &self.bus)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn join_timeout(&self) -> Duration {
        Duration::from_millis(self.join_timeout_ms)
    }

    pub fn health_interval(&self) -> Duration {
        Duration::from_millis(self.health_interval_ms)
    }
}
