//! Outbound command worker
//!
//! Executes send commands strictly one at a time. Every command produces a
//! `Response`; a command that completes without stderr output is also written to
//! the raw-log queue in dump layout so sent and received frames share one timeline.

use super::transport::Transport;
use super::{CommandMessage, LogMessage, Response};
use crate::command::canonicalize;
use chrono::Local;
use crossbeam::channel::{Receiver, Sender};
use std::time::Instant;

pub struct CommandWorker {
    transport: Box<dyn Transport>,
    commands: Receiver<CommandMessage>,
    responses: Sender<Response>,
    raw_log: Sender<LogMessage>,
    started: Instant,
}

impl CommandWorker {
    pub fn new(
        transport: Box<dyn Transport>,
        commands: Receiver<CommandMessage>,
        responses: Sender<Response>,
        raw_log: Sender<LogMessage>,
        started: Instant,
    ) -> Self {
        Self {
            transport,
            commands,
            responses,
            raw_log,
            started,
        }
    }

    /// Run until `Shutdown`, a closed queue, or a transport failure
    pub fn run(mut self) {
        while let Ok(message) = self.commands.recv() {
            let command = match message {
                CommandMessage::Send(command) => command,
                CommandMessage::Shutdown => {
                    log::debug!("Command worker shutting down");
                    return;
                }
            };

            log::debug!("tx: {}", command);
            let output = match self.transport.exec(&command) {
                Ok(output) => output,
                Err(e) => {
                    log::error!("Command worker stopped on '{}': {}", command, e);
                    return;
                }
            };

            if output.stderr.trim().is_empty() {
                match canonicalize(&command) {
                    Ok(pretty) => {
                        let message = LogMessage::Line {
                            at: Local::now(),
                            elapsed: self.started.elapsed().as_secs_f64(),
                            text: pretty,
                        };
                        if self.raw_log.send(message).is_err() {
                            log::warn!("Raw-log queue closed, '{}' not logged", command);
                        }
                    }
                    Err(e) => log::warn!("{}", e),
                }
            } else {
                log::warn!("'{}' failed: {}", command, output.stderr.trim());
            }

            let response = Response {
                command,
                stdout: output.stdout,
                stderr: output.stderr,
            };
            if self.responses.send(response).is_err() {
                log::debug!("Response queue closed");
            }
        }
        log::debug!("Command queue closed");
    }
}
