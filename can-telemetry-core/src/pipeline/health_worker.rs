//! Relay health poller
//!
//! Runs the health command on its own transport once per interval and sends the
//! reading to the consumer. Stops when the stop queue receives a message or closes.

use super::transport::Transport;
use crate::health::{parse_millidegrees, HealthReading};
use crossbeam::channel::{Receiver, RecvTimeoutError, Sender};
use std::time::Duration;

pub struct HealthWorker {
    transport: Box<dyn Transport>,
    command: String,
    interval: Duration,
    readings: Sender<HealthReading>,
    stop: Receiver<()>,
}

impl HealthWorker {
    pub fn new(
        transport: Box<dyn Transport>,
        command: impl Into<String>,
        interval: Duration,
        readings: Sender<HealthReading>,
        stop: Receiver<()>,
    ) -> Self {
        Self {
            transport,
            command: command.into(),
            interval,
            readings,
            stop,
        }
    }

    /// One poll of the relay
    pub fn poll(&mut self) -> HealthReading {
        match self.transport.exec(&self.command) {
            Ok(output) => match parse_millidegrees(&output.stdout) {
                Some(celsius) => HealthReading::Temperature(celsius),
                None => {
                    log::debug!("No temperature in '{}': {}", self.command, output.stderr.trim());
                    HealthReading::Error
                }
            },
            Err(e) => {
                log::debug!("Health poll failed: {}", e);
                HealthReading::Disconnected
            }
        }
    }

    pub fn run(mut self) {
        loop {
            let reading = self.poll();
            if self.readings.send(reading).is_err() {
                log::debug!("Health queue closed");
                return;
            }
            match self.stop.recv_timeout(self.interval) {
                Err(RecvTimeoutError::Timeout) => continue,
                Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                    log::debug!("Health worker shutting down");
                    return;
                }
            }
        }
    }
}
