//! CAN Telemetry Core
//!
//! Live telemetry for a vehicle whose CAN bus is relayed as text: a remote `candump`
//! streams one line per frame, and outbound frames are sent with `cansend`.
//!
//! # Architecture
//!
//! - `frames` / `frame_decoder`: static frame layouts and payload decoding
//! - `channel`: windowed time series, one per scalar quantity
//! - `entity`: the table of AIS-reported vessels
//! - `heartbeat`: subsystem liveness
//! - `health`: relay host link state and temperature
//! - `registry`: owns every store and routes decoded frames to them
//! - `pipeline`: reader, command worker and logger threads plus the consumer tick
//! - `logs`: the raw frame, values and entity CSV logs
//!
//! Drawing is not part of this crate: channels notify a `RedrawSink` and the
//! presentation layer polls `Consumer::snapshot`.
//!
//! # Example Usage
//!
//! ```no_run
//! use can_telemetry_core::pipeline::{Consumer, Pipeline, ReplayConnector};
//! use can_telemetry_core::{OutboundCommand, RawFrameLog, TelemetryConfig, TelemetryRegistry};
//! use std::time::Instant;
//!
//! let config = TelemetryConfig::new().with_bus("can0");
//! let started = Instant::now();
//! let connector = ReplayConnector::new("session.log");
//! let raw_log = RawFrameLog::create("logs/candump.csv".as_ref()).unwrap();
//!
//! let (pipeline, queues) = Pipeline::start(&config, &connector, raw_log, started).unwrap();
//! let registry = TelemetryRegistry::standard(&config, 0.0).unwrap();
//! let mut consumer = Consumer::new(&config, registry, queues, started);
//!
//! consumer.submit(&OutboundCommand::Rudder { angle: 5.0 }).unwrap();
//! for _ in 0..100 {
//!     let report = consumer.tick();
//!     for line in report.diagnostics {
//!         eprintln!("{}", line);
//!     }
//!     std::thread::sleep(config.tick_interval());
//! }
//! pipeline.shutdown();
//! ```

pub mod channel;
pub mod command;
pub mod config;
pub mod entity;
pub mod frame_decoder;
pub mod frames;
pub mod health;
pub mod heartbeat;
pub mod line;
pub mod logs;
pub mod pipeline;
pub mod registry;
pub mod rounding;
pub mod types;

// Re-export main types for convenience
pub use channel::{ChannelSpec, ChannelStore, RedrawSink};
pub use command::{canonicalize, ActuatorState, ActuatorStep, CommandEncoder, OutboundCommand};
pub use config::{HeartbeatConfig, RemoteEndpoint, TelemetryConfig};
pub use entity::{EntityKey, EntityRecord, EntitySink, EntityTrackTable};
pub use frame_decoder::FrameDecoder;
pub use frames::{FrameCatalog, FrameDescriptor};
pub use health::{HealthReading, RelayHealth, RelayLink};
pub use heartbeat::{HeartbeatMonitor, Liveness, LivenessChange};
pub use logs::{EntityLog, RawFrameLog, SessionLogs, ValuesLog};
pub use registry::{IngestOutcome, TelemetryRegistry};
pub use types::{DecodedField, DecodedFrame, FrameId, RawFrame, Result, TelemetryError};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_standard_registry_builds() {
        let registry = TelemetryRegistry::standard(&TelemetryConfig::default(), 0.0).unwrap();
        assert_eq!(registry.catalog().stats().num_frames, 8);
    }
}
