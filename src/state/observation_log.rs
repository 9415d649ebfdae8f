use std::collections::VecDeque;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::router::{Observation, SensorKind};

/// Bounded log of observations, kept sorted newest first.
///
/// Backs the data grid (all rows, newest on top), the line chart (points
/// per sensor inside a trailing window) and the gauges (latest value).
#[derive(Debug)]
pub struct ObservationLog {
    entries: VecDeque<Observation>,
    capacity: usize,
}

impl ObservationLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity.min(1024)),
            capacity: capacity.max(1),
        }
    }

    /// Insert keeping descending timestamp order; evicts the oldest when full.
    /// Equal timestamps keep arrival order, newer arrival first.
    pub fn insert(&mut self, observation: Observation) {
        let pos = self
            .entries
            .partition_point(|o| o.timestamp > observation.timestamp);
        self.entries.insert(pos, observation);

        if self.entries.len() > self.capacity {
            self.entries.pop_back();
        }
    }

    /// All entries, newest first
    pub fn iter(&self) -> impl Iterator<Item = &Observation> {
        self.entries.iter()
    }

    pub fn latest(&self, kind: SensorKind) -> Option<&Observation> {
        self.entries.iter().find(|o| o.kind == kind)
    }

    /// Chart points for one sensor within `window` of the newest entry,
    /// oldest first, at most `max_points`
    pub fn series(
        &self,
        kind: SensorKind,
        window: Duration,
        max_points: usize,
    ) -> Vec<(DateTime<Utc>, i32)> {
        let Some(newest) = self.entries.front() else {
            return Vec::new();
        };
        let window = chrono::Duration::from_std(window)
            .unwrap_or_else(|_| chrono::Duration::days(36_500));
        let cutoff = newest
            .timestamp
            .checked_sub_signed(window)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);

        let mut points: Vec<_> = self
            .entries
            .iter()
            .filter(|o| o.kind == kind && o.timestamp >= cutoff)
            .take(max_points)
            .map(|o| (o.timestamp, o.value))
            .collect();
        points.reverse();
        points
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
