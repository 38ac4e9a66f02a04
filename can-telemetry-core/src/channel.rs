//! Windowed per-channel history
//!
//! A `ChannelStore` owns the time → value history of one scalar telemetry quantity.
//! History is pruned by eviction; the store itself lives for the whole run.
//!
//! Mutations only mark the store dirty. The redraw sink is called from `redraw`,
//! which the consumer runs once per tick, so redraw cost does not grow with the
//! number of frames received in a tick.

use crate::rounding::round_to;
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// Totally ordered `f64` key for the history map
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeKey(pub f64);

impl Eq for TimeKey {}

impl PartialOrd for TimeKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TimeKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

/// Receives the full point set of a channel whenever it must be redrawn
pub trait RedrawSink: Send {
    fn redraw(&mut self, channel: &str, points: &[(f64, f64)]);
}

/// Static description of a channel
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelSpec {
    pub name: String,
    /// Decimal places applied by `current()`; `None` means already rounded upstream
    pub dp: Option<u32>,
    pub unit: String,
    /// Written to the values log and pruned by the registry's eviction pass
    pub logged: bool,
}

impl ChannelSpec {
    pub fn new(name: impl Into<String>, dp: Option<u32>, unit: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            dp,
            unit: unit.into(),
            logged: true,
        }
    }

    /// Builder method: keep the channel out of the values log and the eviction pass
    pub fn unlogged(mut self) -> Self {
        self.logged = false;
        self
    }
}

/// History of one scalar quantity
pub struct ChannelStore {
    spec: ChannelSpec,
    points: BTreeMap<TimeKey, f64>,
    /// Key of the most recently inserted point (insertion order, not time order)
    current: Option<f64>,
    visible: bool,
    /// Points changed since the last redraw
    dirty: bool,
    sink: Option<Box<dyn RedrawSink>>,
}

impl ChannelStore {
    pub fn new(spec: ChannelSpec) -> Self {
        Self {
            spec,
            points: BTreeMap::new(),
            current: None,
            visible: false,
            dirty: false,
            sink: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }

    pub fn spec(&self) -> &ChannelSpec {
        &self.spec
    }

    /// Insert or overwrite the point at `time` and make it current
    pub fn add(&mut self, time: f64, value: f64) {
        self.points.insert(TimeKey(time), value);
        self.current = Some(time);
        self.dirty = true;
    }

    /// Remove the point at exactly `time`; returns false if there was none
    pub fn remove(&mut self, time: f64) -> bool {
        let removed = self.points.remove(&TimeKey(time)).is_some();
        if removed {
            self.dirty = true;
        } else {
            log::warn!("{}: no point at {} to remove", self.spec.name, time);
        }
        removed
    }

    /// Time of the most recently inserted point, even if eviction has removed it
    pub fn current_time(&self) -> Option<f64> {
        self.current
    }

    /// Time and rounded value of the most recently inserted point; `None` once that
    /// point has been evicted
    pub fn current(&self) -> Option<(f64, f64)> {
        let time = self.current?;
        let value = *self.points.get(&TimeKey(time))?;
        let value = match self.spec.dp {
            Some(dp) => round_to(value, dp as i32),
            None => value,
        };
        Some((time, value))
    }

    /// Drop every point older than `now - window - margin`; returns how many went
    pub fn evict(&mut self, now: f64, window: f64, margin: f64) -> usize {
        let cutoff = TimeKey(now - window - margin);
        let kept = self.points.split_off(&cutoff);
        let evicted = self.points.len();
        self.points = kept;
        if evicted > 0 {
            self.dirty = true;
        }
        evicted
    }

    /// Remove all points
    pub fn clear(&mut self) {
        if !self.points.is_empty() {
            self.dirty = true;
        }
        self.points.clear();
    }

    /// Hand the point set to the sink if it changed since the last redraw and the
    /// channel is visible; returns whether the sink was called
    pub fn redraw(&mut self) -> bool {
        if !std::mem::take(&mut self.dirty) || !self.visible {
            return false;
        }
        self.notify()
    }

    /// True if points changed since the last redraw
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Points in time order
    pub fn points(&self) -> Vec<(f64, f64)> {
        self.points.iter().map(|(t, v)| (t.0, *v)).collect()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn is_visible(&self) -> bool {
        self.visible
    }

    /// Show or hide the channel; becoming visible redraws the retained history
    pub fn set_visible(&mut self, visible: bool) {
        let became_visible = visible && !self.visible;
        self.visible = visible;
        if became_visible {
            self.dirty = false;
            self.notify();
        }
    }

    pub fn set_sink(&mut self, sink: Box<dyn RedrawSink>) {
        self.sink = Some(sink);
    }

    /// Label text in the `name: value unit` form the dashboard shows
    pub fn label(&self) -> String {
        match self.current() {
            Some((_, value)) => format!("{}: {} {}", self.spec.name, value, self.spec.unit),
            None => format!("{}: None {}", self.spec.name, self.spec.unit),
        }
        .trim_end()
        .to_string()
    }

    fn notify(&mut self) -> bool {
        let Some(sink) = self.sink.as_mut() else {
            return false;
        };
        let points: Vec<(f64, f64)> = self.points.iter().map(|(t, v)| (t.0, *v)).collect();
        sink.redraw(&self.spec.name, &points);
        true
    }
}

impl std::fmt::Debug for ChannelStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelStore")
            .field("spec", &self.spec)
            .field("points", &self.points.len())
            .field("current", &self.current)
            .field("visible", &self.visible)
            .field("dirty", &self.dirty)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct CountingSink(Arc<Mutex<Vec<usize>>>);

    impl RedrawSink for CountingSink {
        fn redraw(&mut self, _channel: &str, points: &[(f64, f64)]) {
            self.0.lock().unwrap().push(points.len());
        }
    }

    fn store(dp: Option<u32>) -> ChannelStore {
        ChannelStore::new(ChannelSpec::new("Volt1", dp, "V"))
    }

    #[test]
    fn test_current_follows_insertion_order() {
        let mut channel = store(Some(2));
        channel.add(10.0, 1.0);
        channel.add(5.0, 2.0);
        assert_eq!(channel.current(), Some((5.0, 2.0)));
    }

    #[test]
    fn test_reinsert_overwrites() {
        let mut channel = store(Some(2));
        channel.add(1.0, 1.0);
        channel.add(1.0, 3.0);
        assert_eq!(channel.len(), 1);
        assert_eq!(channel.current(), Some((1.0, 3.0)));
    }

    #[test]
    fn test_current_rounding() {
        let mut channel = store(Some(2));
        channel.add(1.0, 3.14159);
        assert_eq!(channel.current(), Some((1.0, 3.14)));

        let mut passthrough = store(None);
        passthrough.add(1.0, 3.14159);
        assert_eq!(passthrough.current(), Some((1.0, 3.14159)));
    }

    #[test]
    fn test_empty_channel_has_no_current() {
        let channel = store(Some(2));
        assert_eq!(channel.current(), None);
        assert_eq!(channel.label(), "Volt1: None V");
    }

    #[test]
    fn test_eviction_boundary() {
        let mut channel = store(Some(2));
        let now = 1000.0;
        channel.add(now - 66.001, 1.0);
        channel.add(now - 66.0, 2.0);
        channel.add(now, 3.0);
        let evicted = channel.evict(now, 60.0, 5.0);
        // the cutoff is now - 65
        assert_eq!(evicted, 2);

        let mut channel = store(Some(2));
        channel.add(now - 65.0, 1.0);
        channel.add(now - 65.001, 2.0);
        assert_eq!(channel.evict(now, 60.0, 5.0), 1);
        assert_eq!(channel.points(), vec![(now - 65.0, 1.0)]);
    }

    #[test]
    fn test_eviction_of_current_point_clears_current_value() {
        let mut channel = store(Some(2));
        channel.add(0.0, 1.0);
        channel.evict(100.0, 60.0, 5.0);
        assert_eq!(channel.current(), None);
        assert_eq!(channel.current_time(), Some(0.0));
        assert_eq!(channel.label(), "Volt1: None V");
    }

    #[test]
    fn test_sink_only_notified_when_visible() {
        let sink = CountingSink::default();
        let mut channel = store(Some(2));
        channel.set_sink(Box::new(sink.clone()));

        channel.add(1.0, 1.0);
        channel.evict(2.0, 60.0, 5.0);
        assert!(sink.0.lock().unwrap().is_empty());

        assert!(!channel.redraw());
        assert!(sink.0.lock().unwrap().is_empty());

        channel.set_visible(true);
        assert_eq!(*sink.0.lock().unwrap(), vec![1]);

        channel.add(2.0, 2.0);
        assert_eq!(*sink.0.lock().unwrap(), vec![1]);
        assert!(channel.redraw());
        assert_eq!(*sink.0.lock().unwrap(), vec![1, 2]);
    }

    #[test]
    fn test_many_inserts_redraw_once() {
        let sink = CountingSink::default();
        let mut channel = store(Some(2));
        channel.set_sink(Box::new(sink.clone()));
        channel.set_visible(true);
        sink.0.lock().unwrap().clear();

        for i in 0..50 {
            channel.add(i as f64 * 0.01, 7.1);
        }
        channel.evict(1.0, 60.0, 5.0);
        assert!(channel.is_dirty());
        assert!(channel.redraw());
        assert!(!channel.redraw());
        assert_eq!(*sink.0.lock().unwrap(), vec![50]);
    }
}
