//! Subsystem liveness
//!
//! Each monitored subsystem is ALIVE while frames keep arriving and turns STALE once
//! `timeout` seconds pass without one. A subsystem that has never reported starts
//! STALE.

use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

/// Liveness of one subsystem
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Liveness {
    Alive,
    Stale,
}

impl fmt::Display for Liveness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Liveness::Alive => write!(f, "ALIVE"),
            Liveness::Stale => write!(f, "NOT RESPONDING"),
        }
    }
}

/// A one-shot liveness transition for the presentation layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LivenessChange {
    pub subsystem: String,
    pub state: Liveness,
}

/// Liveness bookkeeping for one subsystem
#[derive(Debug, Clone, PartialEq)]
pub struct HeartbeatRecord {
    pub subsystem: String,
    pub last_seen: f64,
    pub state: Liveness,
}

/// Tracks every monitored subsystem
#[derive(Debug, Clone)]
pub struct HeartbeatMonitor {
    timeout: f64,
    records: BTreeMap<String, HeartbeatRecord>,
}

impl HeartbeatMonitor {
    pub fn new(timeout: f64) -> Self {
        Self {
            timeout,
            records: BTreeMap::new(),
        }
    }

    /// Start monitoring `subsystem`; it begins STALE with `last_seen = now - timeout`
    pub fn register(&mut self, subsystem: impl Into<String>, now: f64) {
        let subsystem = subsystem.into();
        self.records.insert(
            subsystem.clone(),
            HeartbeatRecord {
                subsystem,
                last_seen: now - self.timeout,
                state: Liveness::Stale,
            },
        );
    }

    /// A frame arrived from `subsystem`. Returns a change when it was STALE.
    pub fn record(&mut self, subsystem: &str, now: f64) -> Option<LivenessChange> {
        let Some(record) = self.records.get_mut(subsystem) else {
            log::warn!("Heartbeat from unmonitored subsystem '{}'", subsystem);
            return None;
        };
        record.last_seen = now;
        if record.state == Liveness::Alive {
            return None;
        }
        record.state = Liveness::Alive;
        log::info!("{} heartbeat: {}", subsystem, Liveness::Alive);
        Some(LivenessChange {
            subsystem: subsystem.to_string(),
            state: Liveness::Alive,
        })
    }

    /// Mark `subsystem` STALE if its last frame is at least `timeout` old.
    /// Returns a change only on the ALIVE → STALE transition.
    pub fn check(&mut self, subsystem: &str, now: f64) -> Option<LivenessChange> {
        let record = self.records.get_mut(subsystem)?;
        if record.state == Liveness::Alive && now - record.last_seen >= self.timeout {
            record.state = Liveness::Stale;
            log::warn!("{} heartbeat: {}", subsystem, Liveness::Stale);
            return Some(LivenessChange {
                subsystem: subsystem.to_string(),
                state: Liveness::Stale,
            });
        }
        None
    }

    /// Check every subsystem
    pub fn check_all(&mut self, now: f64) -> Vec<LivenessChange> {
        let subsystems: Vec<String> = self.records.keys().cloned().collect();
        subsystems
            .iter()
            .filter_map(|subsystem| self.check(subsystem, now))
            .collect()
    }

    pub fn state(&self, subsystem: &str) -> Option<Liveness> {
        self.records.get(subsystem).map(|r| r.state)
    }

    pub fn records(&self) -> impl Iterator<Item = &HeartbeatRecord> {
        self.records.values()
    }

    pub fn timeout(&self) -> f64 {
        self.timeout
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_starts_stale() {
        let mut monitor = HeartbeatMonitor::new(10.0);
        monitor.register("PDB", 100.0);
        assert_eq!(monitor.state("PDB"), Some(Liveness::Stale));
        assert_eq!(monitor.records().next().unwrap().last_seen, 90.0);
        // checking a subsystem that is already stale changes nothing
        assert_eq!(monitor.check("PDB", 200.0), None);
    }

    #[test]
    fn test_alive_then_stale_once() {
        let mut monitor = HeartbeatMonitor::new(10.0);
        monitor.register("PDB", 0.0);

        let change = monitor.record("PDB", 0.0).unwrap();
        assert_eq!(change.state, Liveness::Alive);

        assert_eq!(monitor.check("PDB", 9.0), None);
        assert_eq!(monitor.state("PDB"), Some(Liveness::Alive));

        let change = monitor.check("PDB", 11.0).unwrap();
        assert_eq!(change.state, Liveness::Stale);
        assert_eq!(monitor.check("PDB", 12.0), None);
        assert_eq!(monitor.state("PDB"), Some(Liveness::Stale));
    }

    #[test]
    fn test_timeout_boundary_is_inclusive() {
        let mut monitor = HeartbeatMonitor::new(10.0);
        monitor.register("PDB", 0.0);
        monitor.record("PDB", 0.0);
        assert!(monitor.check("PDB", 10.0).is_some());
    }

    #[test]
    fn test_fresh_frame_revives_immediately() {
        let mut monitor = HeartbeatMonitor::new(10.0);
        monitor.register("PDB", 0.0);
        monitor.record("PDB", 0.0);
        monitor.check("PDB", 20.0);
        let change = monitor.record("PDB", 21.0).unwrap();
        assert_eq!(change.state, Liveness::Alive);
        // repeated frames while alive are not transitions
        assert_eq!(monitor.record("PDB", 22.0), None);
    }

    #[test]
    fn test_check_all_reports_each_subsystem_independently() {
        let mut monitor = HeartbeatMonitor::new(10.0);
        monitor.register("PDB", 0.0);
        monitor.register("Rudder", 0.0);
        monitor.record("PDB", 0.0);
        monitor.record("Rudder", 5.0);
        let changes = monitor.check_all(12.0);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].subsystem, "PDB");
        assert_eq!(monitor.state("Rudder"), Some(Liveness::Alive));
    }
}
