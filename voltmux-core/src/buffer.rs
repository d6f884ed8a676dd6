//! Last-Value Reading Buffer
//!
//! ## Overview
//!
//! The buffer holds exactly one [`Reading`] per sensor id: the most
//! recent one. There is no history here (the system does not persist
//! past readings); a polling cycle builds a fresh buffer and the
//! service publishes it wholesale, so consumers always see a complete,
//! consistent snapshot of one cycle.
//!
//! Insertion order is preserved so that snapshots list sensors in the
//! order the cycle processed them, which in turn follows the registry's
//! configuration order. Upserting an existing id overwrites the reading
//! in place without disturbing that order.
//!
//! The buffer itself is single-threaded on purpose. Shared access is
//! the service layer's concern, which wraps it in a lock and swaps
//! whole buffers at cycle boundaries.

use std::collections::HashMap;

use crate::reading::Reading;

/// Latest reading per sensor id, in first-insertion order
#[derive(Debug, Clone, Default)]
pub struct ReadingBuffer {
    order: Vec<String>,
    readings: HashMap<String, Reading>,
}

impl ReadingBuffer {
    /// Create an empty buffer
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the reading for its sensor id
    pub fn upsert(&mut self, reading: Reading) {
        if !self.readings.contains_key(&reading.sensor_id) {
            self.order.push(reading.sensor_id.clone());
        }
        self.readings.insert(reading.sensor_id.clone(), reading);
    }

    /// Latest reading for one sensor
    pub fn get(&self, sensor_id: &str) -> Option<&Reading> {
        self.readings.get(sensor_id)
    }

    /// Iterate readings in insertion order
    pub fn iter(&self) -> impl Iterator<Item = &Reading> {
        self.order.iter().filter_map(|id| self.readings.get(id))
    }

    /// Owned copy of all readings in insertion order
    pub fn snapshot(&self) -> Vec<Reading> {
        self.iter().cloned().collect()
    }

    /// Drop all readings
    pub fn clear(&mut self) {
        self.order.clear();
        self.readings.clear();
    }

    /// Number of sensors with a reading
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Whether the buffer holds no readings
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reading::ReadingStatus;
    use crate::sensor::{SensorDefinition, SensorKind};
    use chrono::Utc;

    fn reading(id: &str, value: f64) -> Reading {
        let def = SensorDefinition {
            id: id.into(),
            name: id.into(),
            unit: String::new(),
            sampling_rate_ms: 1000,
            kind: SensorKind::Virtual {
                expression: "1".into(),
            },
        };
        Reading::processed(&def, value, Utc::now())
    }

    #[test]
    fn empty_buffer() {
        let buffer = ReadingBuffer::new();
        assert!(buffer.is_empty());
        assert!(buffer.get("anything").is_none());
        assert!(buffer.snapshot().is_empty());
    }

    #[test]
    fn upsert_preserves_first_insertion_order() {
        let mut buffer = ReadingBuffer::new();
        buffer.upsert(reading("a", 1.0));
        buffer.upsert(reading("b", 2.0));
        buffer.upsert(reading("a", 3.0));

        assert_eq!(buffer.len(), 2);
        assert_eq!(buffer.get("a").unwrap().value, 3.0);

        let ids: Vec<&str> = buffer.iter().map(|r| r.sensor_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn clear_empties_everything() {
        let mut buffer = ReadingBuffer::new();
        buffer.upsert(reading("a", 1.0));
        buffer.clear();
        assert!(buffer.is_empty());
        assert!(buffer.get("a").is_none());
    }

    #[test]
    fn snapshot_is_an_owned_copy() {
        let mut buffer = ReadingBuffer::new();
        buffer.upsert(reading("a", 1.0));

        let snapshot = buffer.snapshot();
        buffer.upsert(reading("a", 9.0));

        assert_eq!(snapshot[0].value, 1.0);
        assert_eq!(snapshot[0].status, ReadingStatus::Processed);
    }
}
