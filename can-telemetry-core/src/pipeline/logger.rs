//! Raw frame logger worker
//!
//! Blocks on the raw-log queue and writes one CSV row per message until it sees
//! `Shutdown` or every sender is gone. Nothing is dropped: a slow disk backs the
//! queue up and eventually blocks the producers instead.

use super::LogMessage;
use crate::logs::RawFrameLog;
use crossbeam::channel::Receiver;
use std::io::Write;

/// Run the logger; returns the number of rows written
pub fn run<W: Write>(mut raw_log: RawFrameLog<W>, messages: Receiver<LogMessage>) -> u64 {
    let mut failures = 0u64;
    while let Ok(message) = messages.recv() {
        match message {
            LogMessage::Line { at, elapsed, text } => {
                if let Err(e) = raw_log.write(at, elapsed, &text) {
                    failures += 1;
                    log::error!("Raw log write failed: {}", e);
                }
            }
            LogMessage::Shutdown => break,
        }
    }
    if failures > 0 {
        log::warn!("{} raw log rows could not be written", failures);
    }
    log::info!("Raw frame logger wrote {} rows", raw_log.rows());
    raw_log.rows()
}
