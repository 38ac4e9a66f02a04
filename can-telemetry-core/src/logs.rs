//! Session CSV logs
//!
//! Three append-only logs per session, each row prefixed with a wall-clock timestamp
//! and the elapsed seconds since the session started:
//!
//! - raw frame log: every inbound line and every sent command (`CAN_Message`)
//! - values log: the current value of every channel, one row per tick with changes
//! - entity log: one row per tracked vessel whenever an AIS batch completes
//!
//! Rows are flushed as they are written so a crash loses at most the row in flight.

use crate::entity::{EntityRecord, EntitySink};
use crate::frames::ais;
use crate::types::Result;
use chrono::{DateTime, Local};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Row timestamp format (ISO-8601, microseconds)
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6f";
/// Session stamp used in log file names
pub const SESSION_STAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

const TIMESTAMP: &str = "Timestamp";
const ELAPSED: &str = "Elapsed_Time_s";
const MISSING: &str = "None";

/// Paths of the three logs of one session
#[derive(Debug, Clone, PartialEq)]
pub struct SessionLogs {
    pub raw_frames: PathBuf,
    pub values: PathBuf,
    pub entities: PathBuf,
}

impl SessionLogs {
    pub fn new(dir: &Path, started: DateTime<Local>) -> Self {
        let stamp = started.format(SESSION_STAMP_FORMAT);
        Self {
            raw_frames: dir.join(format!("candump_{}.csv", stamp)),
            values: dir.join(format!("values_{}.csv", stamp)),
            entities: dir.join(format!("ais_values_{}.csv", stamp)),
        }
    }
}

/// A CSV file whose rows start with timestamp and elapsed time
pub struct CsvLog<W: Write> {
    writer: csv::Writer<W>,
    rows: u64,
}

impl CsvLog<File> {
    /// Create `path` (and its directory) and write the header
    pub fn create(path: &Path, columns: &[&str]) -> Result<Self> {
        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() {
                fs::create_dir_all(dir)?;
            }
        }
        let created = Self::new(File::create(path)?, columns)?;
        log::info!("Logging to '{}'", path.display());
        Ok(created)
    }
}

impl<W: Write> CsvLog<W> {
    /// Wrap `inner` and write the header `Timestamp,Elapsed_Time_s,<columns>`
    pub fn new(inner: W, columns: &[&str]) -> Result<Self> {
        let mut writer = csv::Writer::from_writer(inner);
        let header = [TIMESTAMP, ELAPSED].into_iter().chain(columns.iter().copied());
        writer.write_record(header)?;
        writer.flush()?;
        Ok(Self { writer, rows: 0 })
    }

    /// Append one row and flush it
    pub fn write_row<I, S>(&mut self, now: DateTime<Local>, elapsed: f64, cells: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut record = csv::StringRecord::new();
        record.push_field(&now.format(TIMESTAMP_FORMAT).to_string());
        record.push_field(&format!("{:.3}", elapsed));
        for cell in cells {
            record.push_field(cell.as_ref());
        }
        self.writer.write_record(&record)?;
        self.writer.flush()?;
        self.rows += 1;
        Ok(())
    }

    /// Rows written after the header
    pub fn rows(&self) -> u64 {
        self.rows
    }
}

/// Every line received from the bus and every command sent to it
pub struct RawFrameLog<W: Write = File> {
    log: CsvLog<W>,
}

impl RawFrameLog<File> {
    pub fn create(path: &Path) -> Result<Self> {
        Ok(Self {
            log: CsvLog::create(path, &["CAN_Message"])?,
        })
    }
}

impl<W: Write> RawFrameLog<W> {
    pub fn new(inner: W) -> Result<Self> {
        Ok(Self {
            log: CsvLog::new(inner, &["CAN_Message"])?,
        })
    }

    pub fn write(&mut self, now: DateTime<Local>, elapsed: f64, message: &str) -> Result<()> {
        self.log.write_row(now, elapsed, [message.trim_end()])
    }

    pub fn rows(&self) -> u64 {
        self.log.rows()
    }
}

/// Snapshot of every channel's current value
pub struct ValuesLog<W: Write = File> {
    log: CsvLog<W>,
    columns: usize,
}

impl ValuesLog<File> {
    pub fn create(path: &Path, channels: &[String]) -> Result<Self> {
        let names: Vec<&str> = channels.iter().map(String::as_str).collect();
        Ok(Self {
            log: CsvLog::create(path, &names)?,
            columns: names.len(),
        })
    }
}

impl<W: Write> ValuesLog<W> {
    pub fn new(inner: W, channels: &[String]) -> Result<Self> {
        let names: Vec<&str> = channels.iter().map(String::as_str).collect();
        Ok(Self {
            log: CsvLog::new(inner, &names)?,
            columns: names.len(),
        })
    }

    /// One row; `values` is in header order and missing values are written as `None`
    pub fn write(&mut self, now: DateTime<Local>, elapsed: f64, values: &[Option<f64>]) -> Result<()> {
        debug_assert_eq!(values.len(), self.columns);
        self.log.write_row(now, elapsed, values.iter().map(|v| format_value(*v)))
    }

    pub fn rows(&self) -> u64 {
        self.log.rows()
    }
}

/// One row per tracked vessel per completed AIS batch
pub struct EntityLog<W: Write = File> {
    log: CsvLog<W>,
}

impl EntityLog<File> {
    pub fn create(path: &Path) -> Result<Self> {
        Ok(Self {
            log: CsvLog::create(path, &ais::ATTRIBUTES)?,
        })
    }
}

impl<W: Write> EntityLog<W> {
    pub fn new(inner: W) -> Result<Self> {
        Ok(Self {
            log: CsvLog::new(inner, &ais::ATTRIBUTES)?,
        })
    }

    pub fn rows(&self) -> u64 {
        self.log.rows()
    }
}

impl<W: Write> EntitySink for EntityLog<W> {
    fn write_entities(&mut self, now: DateTime<Local>, elapsed: f64, records: &[&EntityRecord]) -> Result<()> {
        for record in records {
            let cells = record.attribute_values().map(format_value);
            self.log.write_row(now, elapsed, cells)?;
        }
        Ok(())
    }
}

fn format_value(value: Option<f64>) -> String {
    match value {
        Some(v) => v.to_string(),
        None => MISSING.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at() -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 5, 17, 9, 30, 0).unwrap()
    }

    fn contents(log: CsvLog<Vec<u8>>) -> Vec<String> {
        let buffer = log.writer.into_inner().map_err(|_| "flush failed").unwrap();
        String::from_utf8(buffer).unwrap().lines().map(str::to_string).collect()
    }

    #[test]
    fn test_session_paths() {
        let logs = SessionLogs::new(Path::new("logs"), at());
        assert_eq!(logs.raw_frames, PathBuf::from("logs/candump_20240517_093000.csv"));
        assert_eq!(logs.values, PathBuf::from("logs/values_20240517_093000.csv"));
        assert_eq!(logs.entities, PathBuf::from("logs/ais_values_20240517_093000.csv"));
    }

    #[test]
    fn test_raw_frame_rows() {
        let mut log = RawFrameLog::new(Vec::new()).unwrap();
        log.write(at(), 1.23456, "can0  110   [2]  D3 1B\n").unwrap();
        assert_eq!(log.rows(), 1);

        let lines = contents(log.log);
        assert_eq!(lines[0], "Timestamp,Elapsed_Time_s,CAN_Message");
        assert_eq!(lines[1], "2024-05-17T09:30:00.000000,1.235,can0  110   [2]  D3 1B");
    }

    #[test]
    fn test_values_row_marks_missing() {
        let names = vec!["pH".to_string(), "Volt1".to_string()];
        let mut log = ValuesLog::new(Vec::new(), &names).unwrap();
        log.write(at(), 2.0, &[Some(7.1), None]).unwrap();

        let lines = contents(log.log);
        assert_eq!(lines[0], "Timestamp,Elapsed_Time_s,pH,Volt1");
        assert_eq!(lines[1], "2024-05-17T09:30:00.000000,2.000,7.1,None");
    }

    #[test]
    fn test_entity_rows_follow_header_order() {
        let record = EntityRecord {
            key: 316001234,
            latitude: 49.25,
            longitude: -123.1,
            speed_over_ground: Some(4.5),
            course_over_ground: None,
            true_heading: Some(270.0),
            rate_of_turn: None,
            length: Some(30.0),
            width: None,
            index: 0,
            total: 1,
        };
        let mut log = EntityLog::new(Vec::new()).unwrap();
        log.write_entities(at(), 0.5, &[&record]).unwrap();
        assert_eq!(log.rows(), 1);

        let lines = contents(log.log);
        assert_eq!(
            lines[0],
            "Timestamp,Elapsed_Time_s,ship_id,latitude,longitude,speed_over_gnd,course_over_gnd,\
             true_heading,rate_of_turn,ship_length,ship_width,index,total_ships"
        );
        assert_eq!(
            lines[1],
            "2024-05-17T09:30:00.000000,0.500,316001234,49.25,-123.1,4.5,None,270,None,30,None,0,1"
        );
    }

    #[test]
    fn test_create_makes_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("candump_test.csv");
        let mut log = RawFrameLog::create(&path).unwrap();
        log.write(at(), 0.0, "can0  130  [00]").unwrap();

        let text = fs::read_to_string(&path).unwrap();
        assert_eq!(text.lines().count(), 2);
    }
}
