//! The fixed frame catalog
//!
//! Every frame the vehicle emits is listed here. Layouts are enumerated in code rather
//! than loaded from a schema file; `FrameCatalog::add` rejects duplicate identifiers
//! and malformed layouts at registration time.

use super::descriptor::{FieldRange, FieldSpec, FrameDescriptor, FrameKind};
use crate::types::{FrameId, Result, TelemetryError};
use std::collections::HashMap;

/// Frame identifiers of the standard catalog
pub mod ids {
    use crate::types::FrameId;

    pub const DATA_WIND: FrameId = FrameId::from_const(0x041);
    pub const AIS: FrameId = FrameId::from_const(0x060);
    pub const GPS: FrameId = FrameId::from_const(0x070);
    pub const WATER_TEMP: FrameId = FrameId::from_const(0x100);
    pub const PH: FrameId = FrameId::from_const(0x110);
    pub const SALINITY: FrameId = FrameId::from_const(0x120);
    pub const RUDDER: FrameId = FrameId::from_const(0x204);
    pub const PDB: FrameId = FrameId::from_const(0x206);
}

/// AIS attribute names, in payload order
pub mod ais {
    pub const SHIP_ID: &str = "ship_id";
    pub const LATITUDE: &str = "latitude";
    pub const LONGITUDE: &str = "longitude";
    pub const SPEED_OVER_GROUND: &str = "speed_over_gnd";
    pub const COURSE_OVER_GROUND: &str = "course_over_gnd";
    pub const TRUE_HEADING: &str = "true_heading";
    pub const RATE_OF_TURN: &str = "rate_of_turn";
    pub const SHIP_LENGTH: &str = "ship_length";
    pub const SHIP_WIDTH: &str = "ship_width";
    pub const INDEX: &str = "index";
    pub const TOTAL: &str = "total_ships";

    /// Column order of the entity log
    pub const ATTRIBUTES: [&str; 11] = [
        SHIP_ID,
        LATITUDE,
        LONGITUDE,
        SPEED_OVER_GROUND,
        COURSE_OVER_GROUND,
        TRUE_HEADING,
        RATE_OF_TURN,
        SHIP_LENGTH,
        SHIP_WIDTH,
        INDEX,
        TOTAL,
    ];
}

/// Statistics about the registered frames
#[derive(Debug, Clone, Default)]
pub struct CatalogStats {
    pub num_frames: usize,
    pub num_fields: usize,
}

/// Frame id → descriptor table
#[derive(Debug, Clone, Default)]
pub struct FrameCatalog {
    frames: HashMap<FrameId, FrameDescriptor>,
}

impl FrameCatalog {
    /// Create an empty catalog
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a descriptor; duplicate ids and malformed layouts are rejected
    pub fn add(&mut self, descriptor: FrameDescriptor) -> Result<()> {
        descriptor.validate().map_err(TelemetryError::Registration)?;
        if self.frames.contains_key(&descriptor.id) {
            return Err(TelemetryError::Registration(format!(
                "duplicate descriptor for frame 0x{}",
                descriptor.id
            )));
        }
        log::debug!("Registered frame 0x{} ({})", descriptor.id, descriptor.name);
        self.frames.insert(descriptor.id, descriptor);
        Ok(())
    }

    /// Look up the descriptor for a frame id
    pub fn get(&self, id: FrameId) -> Option<&FrameDescriptor> {
        self.frames.get(&id)
    }

    /// All descriptors, ordered by frame id
    pub fn descriptors(&self) -> Vec<&FrameDescriptor> {
        let mut all: Vec<_> = self.frames.values().collect();
        all.sort_by_key(|d| d.id);
        all
    }

    pub fn stats(&self) -> CatalogStats {
        CatalogStats {
            num_frames: self.frames.len(),
            num_fields: self.frames.values().map(|d| d.fields.len()).sum(),
        }
    }

    /// The frames emitted by the vehicle's nodes
    pub fn standard() -> Result<Self> {
        let mut catalog = Self::new();
        for descriptor in standard_descriptors() {
            catalog.add(descriptor)?;
        }
        Ok(catalog)
    }
}

fn standard_descriptors() -> Vec<FrameDescriptor> {
    vec![
        FrameDescriptor {
            id: ids::DATA_WIND,
            name: "data_wind",
            length: 4,
            kind: FrameKind::Channels,
            fields: vec![
                FieldSpec::new("Data_Wind_dir", 0, 2, 1.0),
                FieldSpec::new("Data_Wind_spd", 2, 4, 10.0),
            ],
        },
        // The relay pads the 25-byte AIS payload to the next CAN-FD size.
        FrameDescriptor {
            id: ids::AIS,
            name: "ais",
            length: 32,
            kind: FrameKind::Entity,
            fields: vec![
                FieldSpec::new(ais::SHIP_ID, 0, 4, 1.0),
                FieldSpec::new(ais::LATITUDE, 4, 8, 1_000_000.0)
                    .with_offset(90.0)
                    .with_range(FieldRange::between(-90.0, 90.0)),
                FieldSpec::new(ais::LONGITUDE, 8, 12, 1_000_000.0)
                    .with_offset(180.0)
                    .with_range(FieldRange::between(-180.0, 180.0)),
                FieldSpec::new(ais::SPEED_OVER_GROUND, 12, 14, 10.0)
                    .with_sentinel(1023)
                    .with_range(FieldRange::at_least(0.0)),
                FieldSpec::new(ais::COURSE_OVER_GROUND, 14, 16, 10.0).with_sentinel(3600),
                FieldSpec::new(ais::TRUE_HEADING, 16, 18, 10.0).with_sentinel(511),
                // -128 after re-centering means "not available"
                FieldSpec::new(ais::RATE_OF_TURN, 18, 19, 1.0)
                    .with_offset(128.0)
                    .with_sentinel(0),
                FieldSpec::new(ais::SHIP_LENGTH, 19, 21, 1.0).with_sentinel(0),
                FieldSpec::new(ais::SHIP_WIDTH, 21, 23, 1.0).with_sentinel(0),
                FieldSpec::new(ais::INDEX, 23, 24, 1.0),
                FieldSpec::new(ais::TOTAL, 24, 25, 1.0),
            ],
        },
        FrameDescriptor {
            id: ids::GPS,
            name: "gps",
            length: 20,
            kind: FrameKind::Channels,
            fields: vec![
                FieldSpec::new("gps_lat", 0, 4, 1_000_000.0)
                    .with_offset(90.0)
                    .with_range(FieldRange::between(-90.0, 90.0)),
                FieldSpec::new("gps_lon", 4, 8, 1_000_000.0)
                    .with_offset(90.0)
                    .with_range(FieldRange::between(-180.0, 180.0)),
                FieldSpec::new("Speed_over_gnd", 16, 20, 1000.0).with_range(FieldRange::at_least(0.0)),
            ],
        },
        FrameDescriptor {
            id: ids::WATER_TEMP,
            name: "water_temp",
            length: 3,
            kind: FrameKind::Channels,
            fields: vec![FieldSpec::new("Water_Temp", 0, 3, 1000.0)
                .with_offset(273.15)
                .with_range(FieldRange::between(-130.0, 1350.0))
                .with_progressive_rounding()],
        },
        FrameDescriptor {
            id: ids::PH,
            name: "ph",
            length: 2,
            kind: FrameKind::Channels,
            fields: vec![FieldSpec::new("pH", 0, 2, 1000.0)
                .with_range(FieldRange::between(1.0, 14.0))
                .with_progressive_rounding()],
        },
        FrameDescriptor {
            id: ids::SALINITY,
            name: "salinity",
            length: 4,
            kind: FrameKind::Channels,
            fields: vec![FieldSpec::new("Salinity", 0, 4, 1000.0)
                .with_range(FieldRange::between(1.0, 550_000.0))
                .with_progressive_rounding()],
        },
        FrameDescriptor {
            id: ids::RUDDER,
            name: "rudder",
            length: 16,
            kind: FrameKind::Channels,
            fields: vec![
                FieldSpec::new("Actual_rdr_deg", 0, 2, 100.0).with_offset(90.0),
                FieldSpec::new("IMU_roll", 2, 4, 100.0).with_offset(180.0),
                FieldSpec::new("IMU_pitch", 4, 6, 100.0).with_offset(180.0),
                FieldSpec::new("IMU_heading", 6, 8, 100.0),
                FieldSpec::new("Set_rdr_deg", 8, 10, 100.0).with_offset(90.0),
                FieldSpec::new("IMU_integral", 10, 12, 1.0).with_offset(30_000.0),
                FieldSpec::new("IMU_derivative", 12, 14, 100.0).with_offset(3.0),
                FieldSpec::new("Speed_over_gnd", 14, 16, 1000.0),
            ],
        },
        FrameDescriptor {
            id: ids::PDB,
            name: "pdb",
            length: 24,
            kind: FrameKind::Channels,
            fields: vec![
                FieldSpec::new("Volt2", 0, 2, 1000.0),
                FieldSpec::new("Temp1", 2, 4, 100.0),
                FieldSpec::new("Volt3", 4, 6, 1000.0),
                FieldSpec::new("Temp2", 6, 8, 100.0),
                FieldSpec::new("Temp3", 8, 10, 100.0),
                FieldSpec::new("Volt4", 10, 12, 1000.0),
                FieldSpec::new("Volt1", 12, 14, 1000.0),
                FieldSpec::new("MPPT_curr_hull_port", 14, 16, 1000.0),
                FieldSpec::new("MPPT_curr_sail_port", 16, 18, 1000.0),
                FieldSpec::new("MPPT_curr_hull_star", 18, 20, 1000.0),
                FieldSpec::new("MPPT_curr_sail_star", 20, 22, 1000.0),
            ],
        },
    ]
}
