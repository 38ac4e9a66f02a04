//! Configuration loading and parsing

use anyhow::{Context, Result};
use can_telemetry_core::TelemetryConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Application configuration (loaded from a TOML file)
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default)]
    pub telemetry: TelemetryConfig,
    #[serde(default)]
    pub transport: TransportConfig,
}

/// How the relay is reached
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TransportConfig {
    #[serde(default)]
    pub mode: TransportMode,
    /// Recorded dump for `mode = "replay"`
    pub replay_file: Option<PathBuf>,
    /// Bytes per replayed chunk
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Pause between replayed chunks, in milliseconds
    #[serde(default)]
    pub chunk_delay_ms: u64,
}

fn default_chunk_size() -> usize {
    1024
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            mode: TransportMode::default(),
            replay_file: None,
            chunk_size: default_chunk_size(),
            chunk_delay_ms: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportMode {
    /// Run relay commands over SSH to `telemetry.remote`
    Ssh,
    /// Run relay commands on this host
    #[default]
    Local,
    Replay,
}

/// Load configuration from a TOML file
pub fn load_config(path: &Path) -> Result<AppConfig> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    let config: AppConfig = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {:?}", path))?;

    if config.transport.mode == TransportMode::Replay && config.transport.replay_file.is_none() {
        anyhow::bail!("Config {:?}: replay mode needs transport.replay_file", path);
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_deserialization() {
        let toml_content = r#"
            [telemetry]
            bus = "vcan0"
            window_secs = 30.0
            heartbeats = [
                { frame_id = "130", label = "PDB" },
                { frame_id = "204", label = "Rudder" },
            ]

            [telemetry.remote]
            host = "10.0.0.2"
            user = "pi"

            [transport]
            mode = "replay"
            replay_file = "dumps/harbour.log"
            chunk_size = 64
        "#;

        let config: AppConfig = toml::from_str(toml_content).unwrap();
        assert_eq!(config.telemetry.bus, "vcan0");
        assert_eq!(config.telemetry.window_secs, 30.0);
        assert_eq!(config.telemetry.margin_secs, 5.0);
        assert_eq!(config.telemetry.heartbeats.len(), 2);
        assert_eq!(config.telemetry.remote.host, "10.0.0.2");
        assert_eq!(config.telemetry.remote.password, "");
        assert_eq!(config.transport.mode, TransportMode::Replay);
        assert_eq!(config.transport.chunk_size, 64);
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config: AppConfig = toml::from_str("").unwrap();
        assert_eq!(config.telemetry.bus, "can0");
        assert_eq!(config.transport.mode, TransportMode::Local);
        assert_eq!(config.transport.chunk_size, 1024);
    }

    #[test]
    fn test_ssh_mode() {
        let toml_content = r#"
            [telemetry]
            health_command = "cat /sys/class/thermal/thermal_zone1/temp"

            [telemetry.remote]
            host = "sailbot.local"
            user = "pi"
            password = "raspberry"

            [transport]
            mode = "ssh"
        "#;

        let config: AppConfig = toml::from_str(toml_content).unwrap();
        assert_eq!(config.transport.mode, TransportMode::Ssh);
        assert_eq!(config.telemetry.remote.password, "raspberry");
        assert_eq!(config.telemetry.health_command.as_deref(), Some("cat /sys/class/thermal/thermal_zone1/temp"));
    }

    #[test]
    fn test_replay_without_file_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[transport]\nmode = \"replay\"\n").unwrap();
        assert!(load_config(&path).is_err());
    }
}
