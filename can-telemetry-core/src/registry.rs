//! Telemetry registry
//!
//! Owns every store of the session (channels, tracked entities, heartbeats) and the
//! dispatch table that routes each decoded frame to them. The registry is built once
//! at startup; construction fails if a frame routes a field to a channel that does not
//! exist or if two channels share a name.

use crate::channel::{ChannelSpec, ChannelStore};
use crate::command::{OutboundCommand, DESIRED_HEADING_CHANNEL};
use crate::config::TelemetryConfig;
use crate::entity::{EntityRecord, EntityTrackTable};
use crate::frame_decoder::FrameDecoder;
use crate::frames::{FrameCatalog, FrameKind};
use crate::heartbeat::{HeartbeatMonitor, LivenessChange};
use crate::line::parse_dump_line;
use crate::types::{DecodedFrame, FrameId, Result, TelemetryError};
use std::collections::HashMap;

/// Where a frame's decoded fields go
#[derive(Debug, Clone, PartialEq)]
pub enum Route {
    /// Field i of the frame feeds channel `channels[i]`
    Channels(Vec<usize>),
    /// The frame is one AIS entity report
    Entity,
}

/// What happened to one inbound line
#[derive(Debug, Clone, PartialEq)]
pub enum IngestOutcome {
    /// Not a frame from the monitored bus
    Ignored,
    /// Frame id without a descriptor or a heartbeat mapping
    Unknown(FrameId),
    /// Channel values stored
    Channels { frame_id: FrameId, updated: usize },
    /// Entity stored; `batch_complete` is set for the last frame of a batch
    Entity { frame_id: FrameId, batch_complete: bool },
    /// Frame without a layout that only proves its sender alive
    Heartbeat { frame_id: FrameId },
}

/// The standard channel set; logged channels are in values-log column order
pub fn standard_channels() -> Vec<ChannelSpec> {
    let spec = |name: &str, dp: Option<u32>, unit: &str| ChannelSpec::new(name, dp, unit);
    vec![
        spec("gps_lon", Some(4), "DD"),
        spec("gps_lat", Some(4), "DD"),
        spec("pH", Some(1), ""),
        spec("Water_Temp", Some(3), "°C"),
        spec("Salinity", None, "µS/cm"),
        spec("Data_Wind_spd", Some(0), "knots"),
        spec("Data_Wind_dir", Some(0), "°"),
        spec("Actual_rdr_deg", Some(2), "°"),
        spec("Set_rdr_deg", Some(2), "°"),
        spec("Speed_over_gnd", Some(3), "km/h"),
        spec("IMU_roll", Some(2), "°"),
        spec("IMU_pitch", Some(2), "°"),
        spec("IMU_integral", Some(2), ""),
        spec("IMU_derivative", Some(2), ""),
        spec("IMU_heading", Some(3), "°"),
        spec("Temp1", Some(2), "°C"),
        spec("Temp2", Some(2), "°C"),
        spec("Temp3", Some(2), "°C"),
        spec("Volt1", Some(2), "V"),
        spec("Volt2", Some(2), "V"),
        spec("Volt3", Some(2), "V"),
        spec("Volt4", Some(2), "V"),
        spec("MPPT_curr_hull_port", Some(2), "A"),
        spec("MPPT_curr_sail_port", Some(2), "A"),
        spec("MPPT_curr_hull_star", Some(2), "A"),
        spec("MPPT_curr_sail_star", Some(2), "A"),
        spec(DESIRED_HEADING_CHANNEL, Some(3), "°").unlogged(),
    ]
}

/// Stores plus the frame dispatch table
#[derive(Debug)]
pub struct TelemetryRegistry {
    bus: String,
    catalog: FrameCatalog,
    routes: HashMap<FrameId, Route>,
    channels: Vec<ChannelStore>,
    channel_index: HashMap<String, usize>,
    entities: EntityTrackTable,
    heartbeats: HeartbeatMonitor,
    heartbeat_frames: HashMap<FrameId, String>,
    /// Transitions recorded by `ingest`, drained by `take_liveness`
    liveness: Vec<LivenessChange>,
}

impl TelemetryRegistry {
    /// Registry over the standard catalog and channel set
    pub fn standard(config: &TelemetryConfig, now: f64) -> Result<Self> {
        Self::new(FrameCatalog::standard()?, standard_channels(), config, now)
    }

    /// Build the dispatch table. `now` seeds the heartbeat records.
    pub fn new(catalog: FrameCatalog, specs: Vec<ChannelSpec>, config: &TelemetryConfig, now: f64) -> Result<Self> {
        let mut channel_index = HashMap::new();
        let mut channels = Vec::with_capacity(specs.len());
        for spec in specs {
            if channel_index.insert(spec.name.clone(), channels.len()).is_some() {
                return Err(TelemetryError::Registration(format!("duplicate channel '{}'", spec.name)));
            }
            channels.push(ChannelStore::new(spec));
        }

        let mut routes = HashMap::new();
        for descriptor in catalog.descriptors() {
            let route = match descriptor.kind {
                FrameKind::Channels => {
                    let targets = descriptor
                        .fields
                        .iter()
                        .map(|field| {
                            channel_index.get(field.name).copied().ok_or_else(|| {
                                TelemetryError::Registration(format!(
                                    "frame 0x{} routes '{}' to a missing channel",
                                    descriptor.id, field.name
                                ))
                            })
                        })
                        .collect::<Result<Vec<usize>>>()?;
                    Route::Channels(targets)
                }
                FrameKind::Entity => Route::Entity,
            };
            routes.insert(descriptor.id, route);
        }

        let mut heartbeats = HeartbeatMonitor::new(config.heartbeat_timeout_secs);
        let mut heartbeat_frames = HashMap::new();
        for entry in &config.heartbeats {
            let frame_id: FrameId = entry.frame_id.parse()?;
            if heartbeat_frames.insert(frame_id, entry.label.clone()).is_some() {
                return Err(TelemetryError::Registration(format!(
                    "frame 0x{} is mapped to more than one heartbeat",
                    frame_id
                )));
            }
            heartbeats.register(entry.label.clone(), now);
        }

        log::info!(
            "Registry ready: {} frames, {} channels, {} heartbeat subsystems",
            routes.len(),
            channels.len(),
            heartbeat_frames.len()
        );

        Ok(Self {
            bus: config.bus.clone(),
            catalog,
            routes,
            channels,
            channel_index,
            entities: EntityTrackTable::new(),
            heartbeats,
            heartbeat_frames,
            liveness: Vec::new(),
        })
    }

    /// Parse, decode and dispatch one dump line received at `now`.
    ///
    /// A frame from a monitored subsystem marks it alive before decoding, so a
    /// payload that fails to decode still proves the sender alive. Decode failures
    /// are returned as errors and leave the channel and entity stores untouched.
    pub fn ingest(&mut self, now: f64, line: &str) -> Result<IngestOutcome> {
        let Some(frame) = parse_dump_line(line, &self.bus)? else {
            log::trace!("Ignoring line: {}", line.trim_end());
            return Ok(IngestOutcome::Ignored);
        };

        let heartbeat = self.record_heartbeat(frame.frame_id, now);

        let (Some(descriptor), Some(route)) = (
            self.catalog.get(frame.frame_id),
            self.routes.get(&frame.frame_id),
        ) else {
            if heartbeat {
                return Ok(IngestOutcome::Heartbeat {
                    frame_id: frame.frame_id,
                });
            }
            log::info!("{}", TelemetryError::UnknownFrameId(frame.frame_id));
            return Ok(IngestOutcome::Unknown(frame.frame_id));
        };

        let decoded = FrameDecoder::decode(descriptor, &frame.data)?;
        log::trace!("Decoded 0x{}: {:?}", frame.frame_id, decoded.fields);

        let outcome = match route {
            Route::Channels(targets) => {
                let updated = dispatch_channels(&mut self.channels, targets, &decoded, now);
                IngestOutcome::Channels {
                    frame_id: frame.frame_id,
                    updated,
                }
            }
            Route::Entity => {
                let record = EntityRecord::from_decoded(&decoded)?;
                if record.total == 0 {
                    self.entities.clear();
                }
                let batch_complete = EntityTrackTable::is_batch_complete(&record);
                self.entities
                    .upsert(record.key, (record.longitude, record.latitude), record);
                IngestOutcome::Entity {
                    frame_id: frame.frame_id,
                    batch_complete,
                }
            }
        };
        Ok(outcome)
    }

    /// Returns true if `frame_id` belongs to a monitored subsystem
    fn record_heartbeat(&mut self, frame_id: FrameId, now: f64) -> bool {
        let Some(subsystem) = self.heartbeat_frames.get(&frame_id) else {
            return false;
        };
        self.liveness.extend(self.heartbeats.record(subsystem, now));
        true
    }

    /// Liveness transitions recorded by `ingest` since the last call
    pub fn take_liveness(&mut self) -> Vec<LivenessChange> {
        std::mem::take(&mut self.liveness)
    }

    /// Record the set points carried by an outbound command
    pub fn record_command(&mut self, now: f64, command: &OutboundCommand) -> usize {
        let mut recorded = 0;
        for (name, value) in command.set_points() {
            match self.channel_mut(name) {
                Some(channel) => {
                    channel.add(now, value);
                    recorded += 1;
                }
                None => log::warn!("No channel '{}' for set point {}", name, value),
            }
        }
        recorded
    }

    /// One eviction pass over every logged channel. Entity positions are keyed by
    /// longitude and only change through upserts and clears.
    pub fn evict(&mut self, now: f64, window: f64, margin: f64) -> usize {
        self.channels
            .iter_mut()
            .filter(|channel| channel.spec().logged)
            .map(|channel| channel.evict(now, window, margin))
            .sum()
    }

    /// One redraw pass: every visible store that changed since the last pass hands
    /// its points to its sink once. Returns how many sinks were called.
    pub fn redraw(&mut self) -> usize {
        let channels = self.channels.iter_mut().filter(|channel| channel.is_dirty()).map(ChannelStore::redraw);
        let drawn = channels.filter(|&drawn| drawn).count();
        drawn + usize::from(self.entities.positions_mut().redraw())
    }

    pub fn channel(&self, name: &str) -> Option<&ChannelStore> {
        self.channel_index.get(name).map(|&i| &self.channels[i])
    }

    pub fn channel_mut(&mut self, name: &str) -> Option<&mut ChannelStore> {
        match self.channel_index.get(name) {
            Some(&i) => self.channels.get_mut(i),
            None => None,
        }
    }

    /// Channels in values-log column order
    pub fn channels(&self) -> &[ChannelStore] {
        &self.channels
    }

    /// Names of the logged channels, in values-log column order
    pub fn channel_names(&self) -> Vec<String> {
        self.logged_channels().map(|c| c.name().to_string()).collect()
    }

    /// Current value of every logged channel, in values-log column order
    pub fn logged_values(&self) -> Vec<Option<f64>> {
        self.logged_channels().map(|c| c.current().map(|(_, v)| v)).collect()
    }

    fn logged_channels(&self) -> impl Iterator<Item = &ChannelStore> {
        self.channels.iter().filter(|c| c.spec().logged)
    }

    pub fn entities(&self) -> &EntityTrackTable {
        &self.entities
    }

    pub fn entities_mut(&mut self) -> &mut EntityTrackTable {
        &mut self.entities
    }

    pub fn heartbeats(&self) -> &HeartbeatMonitor {
        &self.heartbeats
    }

    pub fn heartbeats_mut(&mut self) -> &mut HeartbeatMonitor {
        &mut self.heartbeats
    }

    pub fn route(&self, frame_id: FrameId) -> Option<&Route> {
        self.routes.get(&frame_id)
    }

    pub fn catalog(&self) -> &FrameCatalog {
        &self.catalog
    }
}

/// Store every non-null field; returns how many channels changed
fn dispatch_channels(channels: &mut [ChannelStore], targets: &[usize], decoded: &DecodedFrame, now: f64) -> usize {
    let mut updated = 0;
    for (field, &target) in decoded.fields.iter().zip(targets) {
        let Some(channel) = channels.get_mut(target) else {
            continue;
        };
        match field.value {
            Some(value) => {
                channel.add(now, value);
                updated += 1;
            }
            None => log::debug!("{}: value not available in 0x{}", field.name, decoded.frame_id),
        }
    }
    updated
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::RedrawSink;
    use crate::frames::{FieldSpec, FrameDescriptor};
    use crate::heartbeat::Liveness;
    use std::sync::{Arc, Mutex};

    fn registry() -> TelemetryRegistry {
        TelemetryRegistry::standard(&TelemetryConfig::default(), 0.0).unwrap()
    }

    #[derive(Clone, Default)]
    struct CountingSink(Arc<Mutex<usize>>);

    impl RedrawSink for CountingSink {
        fn redraw(&mut self, _channel: &str, _points: &[(f64, f64)]) {
            *self.0.lock().unwrap() += 1;
        }
    }

    #[test]
    fn test_every_channel_frame_is_routed() {
        let registry = registry();
        assert_eq!(registry.channels().len(), 27);
        assert!(matches!(
            registry.route(FrameId::from_const(0x206)),
            Some(Route::Channels(targets)) if targets.len() == 11
        ));
        assert_eq!(registry.route(FrameId::from_const(0x060)), Some(&Route::Entity));
        assert_eq!(registry.route(FrameId::from_const(0x130)), None);
    }

    #[test]
    fn test_missing_channel_rejected() {
        let mut catalog = FrameCatalog::new();
        catalog
            .add(FrameDescriptor {
                id: FrameId::from_const(0x300),
                name: "mystery",
                length: 2,
                kind: FrameKind::Channels,
                fields: vec![FieldSpec::new("Nowhere", 0, 2, 1.0)],
            })
            .unwrap();
        let err = TelemetryRegistry::new(catalog, standard_channels(), &TelemetryConfig::default(), 0.0).unwrap_err();
        assert!(matches!(err, TelemetryError::Registration(_)));
    }

    #[test]
    fn test_duplicate_channel_rejected() {
        let mut specs = standard_channels();
        specs.push(ChannelSpec::new("pH", Some(1), ""));
        let result = TelemetryRegistry::new(FrameCatalog::new(), specs, &TelemetryConfig::default(), 0.0);
        assert!(matches!(result, Err(TelemetryError::Registration(_))));
    }

    #[test]
    fn test_ingest_channel_frame() {
        let mut registry = registry();
        let outcome = registry.ingest(1.5, "can0  110   [2]  D3 1B").unwrap();
        assert_eq!(
            outcome,
            IngestOutcome::Channels {
                frame_id: FrameId::from_const(0x110),
                updated: 1
            }
        );
        assert_eq!(registry.channel("pH").unwrap().current(), Some((1.5, 7.1)));
    }

    #[test]
    fn test_unknown_and_foreign_lines() {
        let mut registry = registry();
        let outcome = registry.ingest(0.0, "can0  7ff  [1]  00").unwrap();
        assert_eq!(outcome, IngestOutcome::Unknown(FrameId::from_const(0x7FF)));
        let outcome = registry.ingest(0.0, "can1  110  [2]  D3 1B").unwrap();
        assert_eq!(outcome, IngestOutcome::Ignored);
        assert!(registry.take_liveness().is_empty());
    }

    #[test]
    fn test_decode_error_leaves_channel_untouched() {
        let mut registry = registry();
        assert!(registry.ingest(0.0, "can0  110  [1]  D3").is_err());
        assert!(registry.channel("pH").unwrap().is_empty());
    }

    #[test]
    fn test_heartbeat_frame_revives_subsystem() {
        let mut registry = registry();
        assert_eq!(registry.heartbeats().state("PDB"), Some(Liveness::Stale));
        let outcome = registry.ingest(1.0, "can0  130  [1]  01").unwrap();
        assert_eq!(
            outcome,
            IngestOutcome::Heartbeat {
                frame_id: FrameId::from_const(0x130)
            }
        );
        let changes = registry.take_liveness();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].state, Liveness::Alive);
        assert!(registry.take_liveness().is_empty());
    }

    #[test]
    fn test_undecodable_frame_still_proves_sender_alive() {
        let config = TelemetryConfig::default().add_heartbeat("110", "pH sensor");
        let mut registry = TelemetryRegistry::standard(&config, 0.0).unwrap();
        assert!(registry.ingest(1.0, "can0  110  [1]  D3").is_err());
        assert_eq!(registry.heartbeats().state("pH sensor"), Some(Liveness::Alive));
        assert_eq!(registry.take_liveness()[0].subsystem, "pH sensor");
        assert!(registry.channel("pH").unwrap().is_empty());
    }

    #[test]
    fn test_set_points_recorded() {
        let mut registry = registry();
        let count = registry.record_command(3.0, &OutboundCommand::Rudder { angle: 12.5 });
        assert_eq!(count, 1);
        assert_eq!(registry.channel("Set_rdr_deg").unwrap().current(), Some((3.0, 12.5)));
        assert_eq!(registry.record_command(3.0, &OutboundCommand::PowerOff), 0);
    }

    #[test]
    fn test_evict_skips_entity_positions() {
        let mut registry = registry();
        registry.channel_mut("Volt1").unwrap().add(0.0, 12.0);
        registry.entities_mut().positions_mut().add(-123.0, 49.0);
        assert_eq!(registry.evict(100.0, 60.0, 5.0), 1);
        assert_eq!(registry.entities().positions().len(), 1);
    }

    #[test]
    fn test_desired_heading_kept_out_of_values_log() {
        let mut registry = registry();
        let names = registry.channel_names();
        assert_eq!(names.len(), 26);
        assert!(!names.iter().any(|name| name == DESIRED_HEADING_CHANNEL));
        assert_eq!(registry.logged_values().len(), 26);

        registry.record_command(0.0, &OutboundCommand::DesiredHeading { heading: 90.0 });
        assert_eq!(registry.evict(100.0, 60.0, 5.0), 0);
        assert_eq!(
            registry.channel(DESIRED_HEADING_CHANNEL).unwrap().current(),
            Some((0.0, 90.0))
        );
    }

    #[test]
    fn test_one_redraw_per_pass() {
        let mut registry = registry();
        let sink = CountingSink::default();
        let ph = registry.channel_mut("pH").unwrap();
        ph.set_sink(Box::new(sink.clone()));
        ph.set_visible(true);
        *sink.0.lock().unwrap() = 0;

        for i in 0..50 {
            registry.ingest(i as f64 * 0.01, "can0  110   [2]  D3 1B").unwrap();
        }
        assert_eq!(*sink.0.lock().unwrap(), 0);
        registry.evict(1.0, 60.0, 5.0);
        assert_eq!(registry.redraw(), 1);
        assert_eq!(*sink.0.lock().unwrap(), 1);
        assert_eq!(registry.redraw(), 0);
    }
}
