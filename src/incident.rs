//! Incident history.
//!
//! `IncidentLog` keeps the most recent `INCIDENT_LOG_CAPACITY` assessments in
//! arrival order, evicting the oldest on overflow. It lives only as long as
//! the process; there is no persistence and no deletion API.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::detect::DetectionResult;

pub const INCIDENT_LOG_CAPACITY: usize = 20;

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub lat: f64,
    pub lon: f64,
}

impl Coordinates {
    pub fn new(lat: f64, lon: f64) -> Result<Self> {
        if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lon) {
            return Err(anyhow!("coordinates out of range: lat={} lon={}", lat, lon));
        }
        Ok(Self { lat, lon })
    }
}

/// Maps location names reported by the detection service to coordinates.
#[derive(Clone, Debug, Default)]
pub struct LocationDirectory {
    entries: HashMap<String, Coordinates>,
}

impl LocationDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: &str, coords: Coordinates) {
        self.entries.insert(normalize_name(name), coords);
    }

    /// Case- and whitespace-insensitive lookup.
    pub fn resolve(&self, name: &str) -> Option<Coordinates> {
        self.entries.get(&normalize_name(name)).copied()
    }
}

fn normalize_name(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Immutable snapshot of one completed analysis cycle.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct IncidentRecord {
    pub detection: DetectionResult,
    /// Milliseconds since the Unix epoch.
    pub timestamp_ms: u64,
    pub location_coords: Option<Coordinates>,
}

impl IncidentRecord {
    pub fn new(
        detection: DetectionResult,
        timestamp: SystemTime,
        location_coords: Option<Coordinates>,
    ) -> Self {
        let timestamp_ms = timestamp
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        Self {
            detection,
            timestamp_ms,
            location_coords,
        }
    }
}

/// Per-location tally over the records currently in the log.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct LocationOverview {
    pub location: String,
    pub fire_sightings: u32,
    pub smoke_sightings: u32,
    pub crowd_sightings: u32,
    pub peak_crowd_density: f64,
    pub last_seen_ms: u64,
}

#[derive(Clone, Debug)]
pub struct IncidentLog {
    records: VecDeque<IncidentRecord>,
    capacity: usize,
}

impl IncidentLog {
    pub fn new() -> Self {
        Self::with_capacity(INCIDENT_LOG_CAPACITY)
    }

    pub(crate) fn with_capacity(capacity: usize) -> Self {
        Self {
            records: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    /// Append at the tail; evicts from the head once over capacity.
    pub fn append(&mut self, record: IncidentRecord) {
        self.records.push_back(record);
        while self.records.len() > self.capacity {
            self.records.pop_front();
        }
    }

    /// Oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &IncidentRecord> {
        self.records.iter()
    }

    pub fn latest(&self) -> Option<&IncidentRecord> {
        self.records.back()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn snapshot(&self) -> Vec<IncidentRecord> {
        self.records.iter().cloned().collect()
    }

    /// Sightings per location, sorted by location name.
    ///
    /// A crowd sighting is any record above the elevated-density threshold.
    pub fn overview(&self) -> Vec<LocationOverview> {
        let mut by_location: BTreeMap<&str, LocationOverview> = BTreeMap::new();
        for record in &self.records {
            let detection = &record.detection;
            let entry = by_location
                .entry(detection.location.as_str())
                .or_insert_with(|| LocationOverview {
                    location: detection.location.clone(),
                    ..LocationOverview::default()
                });
            if detection.fire_count > 0 {
                entry.fire_sightings += 1;
            }
            if detection.smoke_count > 0 {
                entry.smoke_sightings += 1;
            }
            if detection.crowd_density > crate::classify::CROWD_MEDIUM_DENSITY {
                entry.crowd_sightings += 1;
            }
            entry.peak_crowd_density = entry.peak_crowd_density.max(detection.crowd_density);
            entry.last_seen_ms = entry.last_seen_ms.max(record.timestamp_ms);
        }
        by_location.into_values().collect()
    }
}

impl Default for IncidentLog {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn record(n: u64, location: &str, fire: u32, density: f64) -> IncidentRecord {
        IncidentRecord::new(
            DetectionResult::new(fire, 0, density, location),
            UNIX_EPOCH + Duration::from_millis(n),
            None,
        )
    }

    #[test]
    fn keeps_the_most_recent_twenty_in_order() {
        let mut log = IncidentLog::new();
        for n in 0..25 {
            log.append(record(n, "Hall", 0, 0.0));
        }
        assert_eq!(log.len(), INCIDENT_LOG_CAPACITY);
        let stamps: Vec<u64> = log.iter().map(|r| r.timestamp_ms).collect();
        assert_eq!(stamps, (5..25).collect::<Vec<u64>>());
        assert_eq!(log.latest().map(|r| r.timestamp_ms), Some(24));
    }

    #[test]
    fn overview_tallies_per_location() {
        let mut log = IncidentLog::new();
        log.append(record(10, "Lobby", 1, 0.1));
        log.append(record(20, "Hall", 0, 0.5));
        log.append(record(30, "Lobby", 0, 0.8));
        log.append(record(40, "Hall", 0, 0.2));

        let overview = log.overview();
        assert_eq!(overview.len(), 2);
        assert_eq!(overview[0].location, "Hall");
        assert_eq!(overview[0].crowd_sightings, 1);
        assert_eq!(overview[0].last_seen_ms, 40);
        assert_eq!(overview[1].location, "Lobby");
        assert_eq!(overview[1].fire_sightings, 1);
        assert_eq!(overview[1].crowd_sightings, 1);
        assert!((overview[1].peak_crowd_density - 0.8).abs() < f64::EPSILON);
    }

    #[test]
    fn directory_lookup_ignores_case_and_padding() {
        let mut directory = LocationDirectory::new();
        directory.insert("Main Gate", Coordinates::new(12.97, 77.59).expect("coords"));
        assert!(directory.resolve("  main gate ").is_some());
        assert!(directory.resolve("Library").is_none());
    }

    #[test]
    fn rejects_out_of_range_coordinates() {
        assert!(Coordinates::new(91.0, 0.0).is_err());
        assert!(Coordinates::new(0.0, -180.5).is_err());
    }
}
