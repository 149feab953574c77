//! Index Tracker (C7, spec §4.6).
//!
//! Latest snapshot per index id plus a bounded intraday sparkline. Breadth
//! (`advance_ratio`) is computed fresh on every update; the sparkline only
//! appends strictly-positive values, since a `0` index value is a "not yet
//! seen this tick" placeholder, not a real observation.

use std::collections::{HashMap, VecDeque};

use chrono::Utc;

use crate::models::{IndexData, IndexEvent, IntradayPoint};

const INTRADAY_CAP: usize = 21_600;

#[derive(Default)]
pub struct IndexTracker {
    indices: HashMap<String, IndexData>,
    intraday: HashMap<String, VecDeque<IntradayPoint>>,
}

impl IndexTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, event: IndexEvent) -> IndexData {
        let now = Utc::now();
        let sparkline = self.intraday.entry(event.index_id.clone()).or_default();
        if event.index_value > 0.0 {
            sparkline.push_back(IntradayPoint {
                timestamp: now,
                value: event.index_value,
            });
            while sparkline.len() > INTRADAY_CAP {
                sparkline.pop_front();
            }
        }

        let decided = event.advances + event.declines;
        let advance_ratio = if decided > 0 {
            event.advances as f64 / decided as f64
        } else {
            0.0
        };

        let data = IndexData {
            index_id: event.index_id.clone(),
            value: event.index_value,
            prior_value: event.prior_index_value,
            change: event.change,
            ratio_change: event.ratio_change,
            total_volume: event.total_qtty,
            advances: event.advances,
            declines: event.declines,
            no_changes: event.no_changes,
            advance_ratio,
            intraday: sparkline.iter().cloned().collect(),
            last_updated: now,
        };
        self.indices.insert(event.index_id, data.clone());
        data
    }

    pub fn get(&self, index_id: &str) -> Option<&IndexData> {
        self.indices.get(index_id)
    }

    /// Shortcut used by the derivatives tracker to read the VN30 spot value.
    pub fn get_vn30_value(&self) -> f64 {
        self.indices.get("VN30").map(|d| d.value).unwrap_or(0.0)
    }

    pub fn get_all(&self) -> &HashMap<String, IndexData> {
        &self.indices
    }

    pub fn reset(&mut self) {
        self.indices.clear();
        self.intraday.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(id: &str, value: f64, adv: i64, dec: i64) -> IndexEvent {
        IndexEvent {
            index_id: id.to_string(),
            index_value: value,
            prior_index_value: value - 1.0,
            change: 1.0,
            ratio_change: 0.1,
            total_qtty: 1000,
            total_val: 100000.0,
            advances: adv,
            declines: dec,
            no_changes: 0,
        }
    }

    #[test]
    fn advance_ratio_is_zero_when_no_decided_names() {
        let mut tracker = IndexTracker::new();
        let data = tracker.update(event("VN30", 1250.0, 0, 0));
        assert_eq!(data.advance_ratio, 0.0);
    }

    #[test]
    fn advance_ratio_computes_correctly() {
        let mut tracker = IndexTracker::new();
        let data = tracker.update(event("VN30", 1250.0, 18, 12));
        assert_eq!(data.advance_ratio, 0.6);
    }

    #[test]
    fn sparkline_skips_non_positive_values() {
        let mut tracker = IndexTracker::new();
        tracker.update(event("VN30", 0.0, 0, 0));
        tracker.update(event("VN30", 1250.0, 1, 1));
        let data = tracker.get("VN30").unwrap();
        assert_eq!(data.intraday.len(), 1);
    }

    #[test]
    fn vn30_shortcut_returns_zero_before_first_observation() {
        let tracker = IndexTracker::new();
        assert_eq!(tracker.get_vn30_value(), 0.0);
    }

    #[test]
    fn reset_clears_snapshots_and_sparkline() {
        let mut tracker = IndexTracker::new();
        tracker.update(event("VN30", 1250.0, 10, 5));
        tracker.reset();
        assert!(tracker.get("VN30").is_none());
    }
}
