//! Multi-entity (AIS) tracking
//!
//! Other vessels are reported in batches of AIS frames. Each frame carries one vessel
//! plus the frame's `index` within a batch of `total` frames. The table keeps the
//! latest record per vessel and a position channel (longitude → latitude) holding
//! exactly one point per tracked vessel.

use crate::channel::{ChannelSpec, ChannelStore};
use crate::frames::ais;
use crate::types::{DecodedFrame, Result, TelemetryError};
use chrono::{DateTime, Local};
use std::collections::BTreeMap;

/// Stable identifier of a tracked vessel (the AIS ship id)
pub type EntityKey = u32;

/// One tracked vessel as reported by its latest AIS frame
#[derive(Debug, Clone, PartialEq)]
pub struct EntityRecord {
    pub key: EntityKey,
    pub latitude: f64,
    pub longitude: f64,
    pub speed_over_ground: Option<f64>,
    pub course_over_ground: Option<f64>,
    pub true_heading: Option<f64>,
    pub rate_of_turn: Option<f64>,
    pub length: Option<f64>,
    pub width: Option<f64>,
    /// Position of the producing frame within its batch
    pub index: u32,
    /// Number of frames in the batch
    pub total: u32,
}

impl EntityRecord {
    /// Build a record from a decoded AIS frame
    pub fn from_decoded(frame: &DecodedFrame) -> Result<Self> {
        let required = |name: &str| {
            frame.get(name).ok_or_else(|| {
                TelemetryError::InvalidLine(format!("AIS frame 0x{} has no {}", frame.frame_id, name))
            })
        };

        Ok(Self {
            key: required(ais::SHIP_ID)? as EntityKey,
            latitude: required(ais::LATITUDE)?,
            longitude: required(ais::LONGITUDE)?,
            speed_over_ground: frame.get(ais::SPEED_OVER_GROUND),
            course_over_ground: frame.get(ais::COURSE_OVER_GROUND),
            true_heading: frame.get(ais::TRUE_HEADING),
            rate_of_turn: frame.get(ais::RATE_OF_TURN),
            length: frame.get(ais::SHIP_LENGTH),
            width: frame.get(ais::SHIP_WIDTH),
            index: required(ais::INDEX)? as u32,
            total: required(ais::TOTAL)? as u32,
        })
    }

    /// Values in `ais::ATTRIBUTES` column order; not-available values are `None`
    pub fn attribute_values(&self) -> [Option<f64>; 11] {
        [
            Some(self.key as f64),
            Some(self.latitude),
            Some(self.longitude),
            self.speed_over_ground,
            self.course_over_ground,
            self.true_heading,
            self.rate_of_turn,
            self.length,
            self.width,
            Some(self.index as f64),
            Some(self.total as f64),
        ]
    }
}

/// Writes one row per held record when a batch completes
pub trait EntitySink {
    fn write_entities(&mut self, now: DateTime<Local>, elapsed: f64, records: &[&EntityRecord]) -> Result<()>;
}

/// key → record table plus the position trace of every tracked vessel
#[derive(Debug)]
pub struct EntityTrackTable {
    records: BTreeMap<EntityKey, EntityRecord>,
    positions: ChannelStore,
}

impl EntityTrackTable {
    pub fn new() -> Self {
        Self {
            records: BTreeMap::new(),
            positions: ChannelStore::new(ChannelSpec::new("Ship Positions", Some(4), "DD")),
        }
    }

    /// Store `record` under `key`, replacing the vessel's previous position point
    pub fn upsert(&mut self, key: EntityKey, position: (f64, f64), record: EntityRecord) {
        if let Some(previous) = self.records.get(&key) {
            self.positions.remove(previous.longitude);
        }
        let (longitude, latitude) = position;
        self.positions.add(longitude, latitude);
        self.records.insert(key, record);
    }

    /// Forget every vessel
    pub fn clear(&mut self) {
        log::debug!("Clearing {} tracked entities", self.records.len());
        self.records.clear();
        self.positions.clear();
    }

    /// True when `record` is the last frame of its batch
    pub fn is_batch_complete(record: &EntityRecord) -> bool {
        record.total > 0 && record.index + 1 == record.total
    }

    /// Log every held record. The table is not cleared: vessels persist until
    /// replaced or the table is cleared by an empty batch.
    pub fn flush(&self, now: DateTime<Local>, elapsed: f64, sink: &mut dyn EntitySink) -> Result<usize> {
        if self.records.is_empty() {
            return Ok(0);
        }
        let records: Vec<&EntityRecord> = self.records.values().collect();
        sink.write_entities(now, elapsed, &records)?;
        log::info!("Logged {} AIS entities", records.len());
        Ok(records.len())
    }

    pub fn get(&self, key: EntityKey) -> Option<&EntityRecord> {
        self.records.get(&key)
    }

    pub fn records(&self) -> impl Iterator<Item = &EntityRecord> {
        self.records.values()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// The position trace (longitude → latitude)
    pub fn positions(&self) -> &ChannelStore {
        &self.positions
    }

    pub fn positions_mut(&mut self) -> &mut ChannelStore {
        &mut self.positions
    }
}

impl Default for EntityTrackTable {
    fn default() -> Self {
        Self::new()
    }
}
