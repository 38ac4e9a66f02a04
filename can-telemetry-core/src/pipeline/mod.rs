//! Ingestion pipeline
//!
//! Three worker threads connected to the consumer by typed queues:
//!
//! ```text
//! stream ──► Reader ──► raw-log queue (bounded, blocking) ──► Logger ──► CSV
//!                  └──► decode queue (bounded, lossy) ──────► Consumer::tick
//! Consumer::submit ──► command queue ──► CommandWorker ──► transport
//!                                              ├──► response queue ──► Consumer::tick
//!                                              └──► raw-log queue
//! HealthWorker ──► health queue ──► Consumer::tick
//! ```
//!
//! Shutdown sends `Shutdown` on the command and raw-log queues and stops the health
//! worker. The reader sits in a blocking receive; if it has not finished within the
//! join timeout the stream process is killed, which closes the stream, and the reader
//! is joined again. It is abandoned only if it still does not stop.

pub mod command_worker;
pub mod consumer;
pub mod health_worker;
pub mod logger;
pub mod reader;
pub mod transport;

pub use command_worker::CommandWorker;
pub use consumer::{ChannelReading, Consumer, Counters, HeartbeatStatus, RelayStatus, TelemetrySnapshot, TickReport};
pub use health_worker::HealthWorker;
pub use reader::{LineBuffer, Reader, ReaderStats};
pub use transport::{
    CommandOutput, Connector, KillHandle, LocalConnector, ReplayConnector, SshConnector, StreamSession, Transport,
};

use crate::config::TelemetryConfig;
use crate::health::HealthReading;
use crate::logs::RawFrameLog;
use crate::types::Result;
use chrono::{DateTime, Local};
use crossbeam::channel::{self, Receiver, Sender};
use std::io::Write;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

const JOIN_POLL: Duration = Duration::from_millis(10);

/// Message on the raw-log queue
#[derive(Debug, Clone, PartialEq)]
pub enum LogMessage {
    Line {
        at: DateTime<Local>,
        elapsed: f64,
        text: String,
    },
    Shutdown,
}

/// Message on the command queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandMessage {
    Send(String),
    Shutdown,
}

/// Result of one executed command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub command: String,
    pub stdout: String,
    pub stderr: String,
}

/// The consumer's ends of the queues
pub struct ConsumerQueues {
    pub decode: Receiver<String>,
    pub responses: Receiver<Response>,
    pub commands: Sender<CommandMessage>,
    pub health: Receiver<HealthReading>,
    pub reader_stats: Arc<ReaderStats>,
}

/// How shutdown went
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Rows the raw frame logger wrote, if it finished in time
    pub logged_rows: Option<u64>,
    /// The stream process was killed to unblock the reader
    pub stream_killed: bool,
    pub reader_abandoned: bool,
    pub command_worker_abandoned: bool,
    pub health_worker_abandoned: bool,
    /// Lines dropped from the decode queue over the session
    pub dropped_lines: u64,
}

/// Running worker threads
pub struct Pipeline {
    reader: JoinHandle<()>,
    command_worker: JoinHandle<()>,
    logger: JoinHandle<u64>,
    health_worker: Option<JoinHandle<()>>,
    stream_kill: Option<KillHandle>,
    commands: Sender<CommandMessage>,
    health_stop: Sender<()>,
    raw_log: Sender<LogMessage>,
    reader_stats: Arc<ReaderStats>,
    join_timeout: Duration,
}

impl Pipeline {
    /// Connect through `connector` (one transport streams, one sends, and one polls
    /// relay health when a health command is configured) and start the workers
    pub fn start<W>(
        config: &TelemetryConfig,
        connector: &dyn Connector,
        raw_frame_log: RawFrameLog<W>,
        started: Instant,
    ) -> Result<(Self, ConsumerQueues)>
    where
        W: Write + Send + 'static,
    {
        let mut stream_transport = connector.connect(&config.remote)?;
        let session = stream_transport.open_stream(&config.dump_command())?;
        let command_transport = connector.connect(&config.remote)?;
        let health_transport = match config.health_command {
            Some(_) => Some(connector.connect(&config.remote)?),
            None => None,
        };
        log::info!("Connected to {}@{}", config.remote.user, config.remote.host);
        Self::spawn(config, session, command_transport, health_transport, raw_frame_log, started)
    }

    /// Start the workers over an already opened stream and transport
    pub fn spawn<W>(
        config: &TelemetryConfig,
        session: Box<dyn StreamSession>,
        command_transport: Box<dyn Transport>,
        health_transport: Option<Box<dyn Transport>>,
        raw_frame_log: RawFrameLog<W>,
        started: Instant,
    ) -> Result<(Self, ConsumerQueues)>
    where
        W: Write + Send + 'static,
    {
        let stream_kill = session.kill_handle();
        let (raw_tx, raw_rx) = channel::bounded(config.raw_log_queue_capacity.max(1));
        let (decode_tx, decode_rx) = channel::bounded(config.decode_queue_capacity.max(1));
        let (command_tx, command_rx) = channel::unbounded();
        let (response_tx, response_rx) = channel::unbounded();
        let (health_tx, health_rx) = channel::unbounded();
        let (health_stop_tx, health_stop_rx) = channel::bounded(1);
        let reader_stats = Arc::new(ReaderStats::default());

        let logger = thread::Builder::new()
            .name("raw-logger".to_string())
            .spawn(move || logger::run(raw_frame_log, raw_rx))?;

        let reader = Reader::new(session, raw_tx.clone(), decode_tx, Arc::clone(&reader_stats), started);
        let reader = thread::Builder::new()
            .name("reader".to_string())
            .spawn(move || reader.run())?;

        let worker = CommandWorker::new(command_transport, command_rx, response_tx, raw_tx.clone(), started);
        let command_worker = thread::Builder::new()
            .name("command-worker".to_string())
            .spawn(move || worker.run())?;

        let health_worker = match (health_transport, &config.health_command) {
            (Some(transport), Some(command)) => {
                let worker = HealthWorker::new(transport, command.as_str(), config.health_interval(), health_tx, health_stop_rx);
                Some(
                    thread::Builder::new()
                        .name("health-worker".to_string())
                        .spawn(move || worker.run())?,
                )
            }
            _ => None,
        };

        log::info!(
            "Pipeline started (decode queue {}, raw-log queue {})",
            config.decode_queue_capacity,
            config.raw_log_queue_capacity
        );

        let pipeline = Self {
            reader,
            command_worker,
            logger,
            health_worker,
            stream_kill,
            commands: command_tx.clone(),
            health_stop: health_stop_tx,
            raw_log: raw_tx,
            reader_stats: Arc::clone(&reader_stats),
            join_timeout: config.join_timeout(),
        };
        let queues = ConsumerQueues {
            decode: decode_rx,
            responses: response_rx,
            commands: command_tx,
            health: health_rx,
            reader_stats,
        };
        Ok((pipeline, queues))
    }

    /// True once the reader has stopped (stream closed or failed)
    pub fn reader_finished(&self) -> bool {
        self.reader.is_finished()
    }

    pub fn reader_stats(&self) -> &ReaderStats {
        &self.reader_stats
    }

    /// Stop the command worker, then the logger and the health worker, then wait for
    /// the reader, killing the stream if it is still blocked
    pub fn shutdown(self) -> ShutdownReport {
        log::info!("Shutting down pipeline");
        let mut report = ShutdownReport::default();

        // the worker's last canonical lines must reach the logger before its sentinel
        if self.commands.send(CommandMessage::Shutdown).is_err() {
            log::debug!("Command worker already gone");
        }
        report.command_worker_abandoned = join_within(self.command_worker, self.join_timeout, "command worker").is_none();

        if self.raw_log.send(LogMessage::Shutdown).is_err() {
            log::debug!("Logger already gone");
        }
        drop(self.raw_log);
        report.logged_rows = join_within(self.logger, self.join_timeout, "logger");

        if let Some(health_worker) = self.health_worker {
            if self.health_stop.send(()).is_err() {
                log::debug!("Health worker already gone");
            }
            report.health_worker_abandoned = join_within(health_worker, self.join_timeout, "health worker").is_none();
        }

        if !wait_finished(&self.reader, self.join_timeout) {
            if let Some(kill) = self.stream_kill {
                log::info!("Reader still blocked after {:?}, killing the stream", self.join_timeout);
                kill.kill();
                report.stream_killed = true;
            }
        }
        report.reader_abandoned = join_within(self.reader, self.join_timeout, "reader").is_none();
        report.dropped_lines = self.reader_stats.dropped();
        report
    }
}

/// Wait up to `timeout` for the thread behind `handle` to finish
fn wait_finished<T>(handle: &JoinHandle<T>, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while !handle.is_finished() {
        if Instant::now() >= deadline {
            return false;
        }
        thread::sleep(JOIN_POLL);
    }
    true
}

/// Join `handle` if it finishes within `timeout`; otherwise leave it running
fn join_within<T>(handle: JoinHandle<T>, timeout: Duration, name: &str) -> Option<T> {
    if !wait_finished(&handle, timeout) {
        log::warn!("{} did not stop within {:?}, abandoning it", name, timeout);
        return None;
    }
    match handle.join() {
        Ok(value) => Some(value),
        Err(_) => {
            log::error!("{} panicked", name);
            None
        }
    }
}
