//! Consumer tick
//!
//! The only writer of the stores. Each tick drains every pending decode message
//! without blocking, dispatches it through the registry, writes the values and
//! entity logs, runs one eviction pass followed by one redraw pass, checks heartbeats
//! and relay health, and collects command responses as diagnostics for the
//! presentation layer.

use super::reader::ReaderStats;
use super::{CommandMessage, ConsumerQueues, Response};
use crate::command::{ActuatorState, ActuatorStep, CommandEncoder, OutboundCommand};
use crate::config::TelemetryConfig;
use crate::health::{HealthReading, RelayHealth, RelayLink};
use crate::heartbeat::{Liveness, LivenessChange};
use crate::logs::{EntityLog, ValuesLog};
use crate::registry::{IngestOutcome, TelemetryRegistry};
use crate::types::{Result, TelemetryError};
use chrono::{DateTime, Local};
use crossbeam::channel::{Receiver, Sender};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;

/// What one tick did
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickReport {
    /// Decode-queue lines handled
    pub processed: usize,
    /// Lines that failed to parse or decode
    pub decode_errors: usize,
    /// Diagnostic lines for the output display
    pub diagnostics: Vec<String>,
    /// Heartbeat transitions seen this tick
    pub liveness: Vec<LivenessChange>,
    /// Whether a values-log row was written
    pub values_row: bool,
    /// AIS batches that completed
    pub batches_flushed: usize,
    /// Points evicted
    pub evicted: usize,
    /// Stores redrawn in this tick's redraw pass
    pub redraws: usize,
    /// Relay link transitions seen this tick
    pub relay: Vec<RelayLink>,
}

/// Running totals
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Counters {
    pub lines_processed: u64,
    pub decode_errors: u64,
    pub unknown_frames: u64,
    pub batches_flushed: u64,
    pub values_rows: u64,
    pub commands_sent: u64,
    pub dropped_lines: u64,
}

/// Current value of one channel
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChannelReading {
    pub name: String,
    pub unit: String,
    pub time: Option<f64>,
    pub value: Option<f64>,
}

/// Liveness of one subsystem
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HeartbeatStatus {
    pub subsystem: String,
    pub state: Liveness,
    pub last_seen: f64,
}

/// Relay host link and temperature
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RelayStatus {
    pub link: RelayLink,
    pub temperature: Option<f64>,
    pub label: String,
}

/// Point-in-time view of the stores
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TelemetrySnapshot {
    pub elapsed_secs: f64,
    pub channels: Vec<ChannelReading>,
    pub entities: usize,
    pub heartbeats: Vec<HeartbeatStatus>,
    /// `None` when relay health polling is disabled
    pub relay: Option<RelayStatus>,
    pub rudder: f64,
    pub trim_tab: f64,
    pub counters: Counters,
}

/// Owns the registry and the session logs; driven by the presentation loop
pub struct Consumer {
    registry: TelemetryRegistry,
    encoder: CommandEncoder,
    window: f64,
    margin: f64,
    decode: Receiver<String>,
    responses: Receiver<Response>,
    commands: Sender<CommandMessage>,
    health: Receiver<HealthReading>,
    reader_stats: Arc<ReaderStats>,
    relay: Option<RelayHealth>,
    actuators: ActuatorState,
    values_log: Option<ValuesLog>,
    entity_log: Option<EntityLog>,
    started: Instant,
    set_point_pending: bool,
    counters: Counters,
}

impl Consumer {
    pub fn new(config: &TelemetryConfig, registry: TelemetryRegistry, queues: ConsumerQueues, started: Instant) -> Self {
        Self {
            registry,
            encoder: CommandEncoder::from_config(config),
            window: config.window_secs,
            margin: config.margin_secs,
            decode: queues.decode,
            responses: queues.responses,
            commands: queues.commands,
            health: queues.health,
            reader_stats: queues.reader_stats,
            relay: config
                .health_command
                .as_ref()
                .map(|_| RelayHealth::new(config.health_timeout_secs, started.elapsed().as_secs_f64())),
            actuators: ActuatorState::new(),
            values_log: None,
            entity_log: None,
            started,
            set_point_pending: false,
            counters: Counters::default(),
        }
    }

    /// Builder method: write values and entity rows to these logs
    pub fn with_logs(mut self, values: ValuesLog, entities: EntityLog) -> Self {
        self.values_log = Some(values);
        self.entity_log = Some(entities);
        self
    }

    /// Seconds since the session started
    pub fn elapsed(&self) -> f64 {
        self.started.elapsed().as_secs_f64()
    }

    /// Tick at the current time
    pub fn tick(&mut self) -> TickReport {
        let now = self.elapsed();
        self.tick_at(now, Local::now())
    }

    /// Tick with an explicit session time `now` and wall-clock stamp
    pub fn tick_at(&mut self, now: f64, wall: DateTime<Local>) -> TickReport {
        let mut report = TickReport::default();
        let mut changed = std::mem::take(&mut self.set_point_pending);

        let pending: Vec<String> = self.decode.try_iter().collect();
        for line in pending {
            report.processed += 1;
            match self.registry.ingest(now, &line) {
                Ok(IngestOutcome::Channels { updated, .. }) => changed |= updated > 0,
                Ok(IngestOutcome::Entity { batch_complete: true, .. }) => {
                    report.batches_flushed += 1;
                    self.flush_entities(now, wall, &mut report);
                }
                Ok(IngestOutcome::Unknown(_)) => self.counters.unknown_frames += 1,
                Ok(_) => {}
                Err(e) => {
                    report.decode_errors += 1;
                    log::warn!("{}", e);
                    report.diagnostics.push(parse_error_diagnostic(&e));
                }
            }
        }
        // undecodable frames still prove their sender alive
        report.liveness.extend(self.registry.take_liveness());

        if changed {
            self.write_values_row(now, wall, &mut report);
        }

        report.evicted = self.registry.evict(now, self.window, self.margin);
        report.redraws = self.registry.redraw();
        report.liveness.extend(self.registry.heartbeats_mut().check_all(now));

        if let Some(relay) = self.relay.as_mut() {
            for reading in self.health.try_iter() {
                report.relay.extend(relay.update(now, reading));
            }
            report.relay.extend(relay.check(now));
        }

        for response in self.responses.try_iter() {
            report.diagnostics.extend(response_diagnostics(&response));
        }

        self.counters.lines_processed += report.processed as u64;
        self.counters.decode_errors += report.decode_errors as u64;
        self.counters.batches_flushed += report.batches_flushed as u64;
        report
    }

    /// Encode `command`, record its set points and queue it for the command worker.
    /// Returns how many relay commands were queued.
    pub fn submit(&mut self, command: &OutboundCommand) -> Result<usize> {
        let encoded = self.encoder.encode(command)?;
        let now = self.elapsed();
        if self.registry.record_command(now, command) > 0 {
            self.set_point_pending = true;
        }
        for line in &encoded {
            self.commands
                .send(CommandMessage::Send(line.clone()))
                .map_err(|_| TelemetryError::TransportFailure("command worker is not running".to_string()))?;
        }
        log::info!("{}: {}", command.label(), encoded.join("; "));
        self.actuators.observe(command);
        self.counters.commands_sent += encoded.len() as u64;
        Ok(encoded.len())
    }

    /// Nudge an actuator and send its new angle
    pub fn nudge(&mut self, step: ActuatorStep) -> Result<usize> {
        let command = self.actuators.apply(step);
        self.submit(&command)
    }

    pub fn actuators(&self) -> &ActuatorState {
        &self.actuators
    }

    pub fn relay(&self) -> Option<&RelayHealth> {
        self.relay.as_ref()
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        let channels = self
            .registry
            .channels()
            .iter()
            .map(|channel| ChannelReading {
                name: channel.name().to_string(),
                unit: channel.spec().unit.clone(),
                time: channel.current_time(),
                value: channel.current().map(|(_, v)| v),
            })
            .collect();

        let heartbeats = self
            .registry
            .heartbeats()
            .records()
            .map(|record| HeartbeatStatus {
                subsystem: record.subsystem.clone(),
                state: record.state,
                last_seen: record.last_seen,
            })
            .collect();

        let mut counters = self.counters.clone();
        counters.dropped_lines = self.reader_stats.dropped();

        TelemetrySnapshot {
            elapsed_secs: self.elapsed(),
            channels,
            entities: self.registry.entities().len(),
            heartbeats,
            relay: self.relay.as_ref().map(|relay| RelayStatus {
                link: relay.link(),
                temperature: relay.temperature(),
                label: relay.label(),
            }),
            rudder: self.actuators.rudder,
            trim_tab: self.actuators.trim_tab,
            counters,
        }
    }

    pub fn registry(&self) -> &TelemetryRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut TelemetryRegistry {
        &mut self.registry
    }

    pub fn counters(&self) -> &Counters {
        &self.counters
    }

    fn flush_entities(&mut self, now: f64, wall: DateTime<Local>, report: &mut TickReport) {
        let Some(sink) = self.entity_log.as_mut() else {
            return;
        };
        if let Err(e) = self.registry.entities().flush(wall, now, sink) {
            log::error!("Entity log write failed: {}", e);
            report.diagnostics.push(format!("[LOG ERROR] {}", e));
        }
    }

    fn write_values_row(&mut self, now: f64, wall: DateTime<Local>, report: &mut TickReport) {
        let Some(values_log) = self.values_log.as_mut() else {
            return;
        };
        let values = self.registry.logged_values();
        match values_log.write(wall, now, &values) {
            Ok(()) => {
                report.values_row = true;
                self.counters.values_rows += 1;
            }
            Err(e) => {
                log::error!("Values log write failed: {}", e);
                report.diagnostics.push(format!("[LOG ERROR] {}", e));
            }
        }
    }
}

/// One diagnostic line for a frame that could not be decoded
pub fn parse_error_diagnostic(error: &TelemetryError) -> String {
    match error.frame_id() {
        Some(frame_id) => format!("[PARSE ERROR 0x{}] {}", frame_id, error),
        None => format!("[PARSE ERROR] {}", error),
    }
}

fn response_diagnostics(response: &Response) -> Vec<String> {
    let mut lines = Vec::new();
    let stdout = response.stdout.trim();
    let stderr = response.stderr.trim();
    if !stdout.is_empty() {
        lines.push(format!("{}: {}", response.command, stdout));
    }
    if !stderr.is_empty() {
        lines.push(format!("[ERROR] {}: {}", response.command, stderr));
    }
    lines
}
