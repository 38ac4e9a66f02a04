//! Dump stream reader
//!
//! Reassembles lines from the chunks handed out by the stream session and fans each
//! line out to the raw-log queue (blocking, lossless) and the decode queue (lossy:
//! a full queue drops the line from the live display only).

use super::transport::StreamSession;
use super::LogMessage;
use chrono::Local;
use crossbeam::channel::{Sender, TrySendError};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

const RECEIVE_BUFFER: usize = 4096;

/// Splits a byte stream into lines, keeping partial lines across chunks
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk; returns every line it completed, without terminators
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);
        let mut lines = Vec::new();
        while let Some(pos) = self.pending.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            let text = String::from_utf8_lossy(&line);
            let text = text.trim_end_matches(['\n', '\r']);
            if !text.is_empty() {
                lines.push(text.to_string());
            }
        }
        lines
    }

    /// Trailing text of a stream that closed without a final newline
    pub fn finish(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.pending);
        let text = String::from_utf8_lossy(&rest).trim_end().to_string();
        (!text.is_empty()).then_some(text)
    }
}

/// Counters shared between the reader and the consumer
#[derive(Debug, Default)]
pub struct ReaderStats {
    lines: AtomicU64,
    dropped: AtomicU64,
}

impl ReaderStats {
    /// Lines received from the stream
    pub fn lines(&self) -> u64 {
        self.lines.load(Ordering::Relaxed)
    }

    /// Lines that did not fit in the decode queue
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Reader worker state
pub struct Reader {
    session: Box<dyn StreamSession>,
    raw_log: Sender<LogMessage>,
    decode: Sender<String>,
    stats: Arc<ReaderStats>,
    started: Instant,
}

impl Reader {
    pub fn new(
        session: Box<dyn StreamSession>,
        raw_log: Sender<LogMessage>,
        decode: Sender<String>,
        stats: Arc<ReaderStats>,
        started: Instant,
    ) -> Self {
        Self {
            session,
            raw_log,
            decode,
            stats,
            started,
        }
    }

    /// Run until the stream closes, fails, or the logger goes away
    pub fn run(mut self) {
        let mut buffer = LineBuffer::new();
        let mut chunk = vec![0u8; RECEIVE_BUFFER];

        loop {
            let n = match self.session.receive(&mut chunk) {
                Ok(0) => {
                    log::info!("Dump stream closed");
                    if let Some(line) = buffer.finish() {
                        self.forward(line);
                    }
                    return;
                }
                Ok(n) => n,
                Err(e) => {
                    log::error!("Reader stopped: {}", e);
                    return;
                }
            };

            for line in buffer.push(&chunk[..n]) {
                if !self.forward(line) {
                    log::warn!("Raw-log queue closed, reader stopping");
                    return;
                }
            }
        }
    }

    /// Returns false once the raw-log queue is gone
    fn forward(&self, line: String) -> bool {
        self.stats.lines.fetch_add(1, Ordering::Relaxed);
        log::trace!("rx: {}", line);

        match self.decode.try_send(line.clone()) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                let dropped = self.stats.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                log::warn!("Decode queue full, line dropped from display ({} so far)", dropped);
            }
            Err(TrySendError::Disconnected(_)) => {
                log::debug!("Decode queue closed");
            }
        }

        let message = LogMessage::Line {
            at: Local::now(),
            elapsed: self.started.elapsed().as_secs_f64(),
            text: line,
        };
        self.raw_log.send(message).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_split_across_chunks() {
        let mut buffer = LineBuffer::new();
        assert!(buffer.push(b"can0  110  [2]").is_empty());
        let lines = buffer.push(b"  D3 1B\ncan0  130");
        assert_eq!(lines, vec!["can0  110  [2]  D3 1B".to_string()]);
        let lines = buffer.push(b"  [00]\r\n");
        assert_eq!(lines, vec!["can0  130  [00]".to_string()]);
        assert_eq!(buffer.finish(), None);
    }

    #[test]
    fn test_several_lines_in_one_chunk() {
        let mut buffer = LineBuffer::new();
        let lines = buffer.push(b"a\n\nb\nc");
        assert_eq!(lines, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(buffer.finish(), Some("c".to_string()));
    }

    #[test]
    fn test_multibyte_character_split() {
        let mut buffer = LineBuffer::new();
        let text = "°C\n".as_bytes();
        assert!(buffer.push(&text[..1]).is_empty());
        assert_eq!(buffer.push(&text[1..]), vec!["°C".to_string()]);
    }
}
