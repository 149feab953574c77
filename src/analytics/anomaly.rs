//! Anomaly Detector (C9, spec §4.8).
//!
//! Four independent detectors, each a near-pure function of tracker state plus
//! a small amount of private rolling history. None of them talk to the alert
//! ring directly — they return `Option<Alert>` and the orchestrator (C11)
//! forwards a `Some` to the alert service (C10) for dedup/registration.

use std::collections::{HashMap, VecDeque};

use chrono::{Duration, Utc};
use serde_json::json;

use crate::models::{Alert, AlertType, Severity};

const VOL_WINDOW_MINUTES: i64 = 20;
const VOL_SPIKE_MULTIPLIER: f64 = 3.0;
const VOL_MIN_SAMPLES: usize = 10;
const VOL_HISTORY_CAP: usize = 1_200;

const FOREIGN_WINDOW_MINUTES: i64 = 5;
const FOREIGN_CHANGE_THRESHOLD: f64 = 0.30;
const FOREIGN_HISTORY_CAP: usize = 300;
const FOREIGN_MIN_VALUE: f64 = 1_000_000_000.0;

#[derive(Clone, Copy, PartialEq, Eq)]
enum TriState {
    Unknown,
    Premium,
    Discount,
}

#[derive(Default)]
pub struct AnomalyDetector {
    volume_history: HashMap<String, VecDeque<(chrono::DateTime<Utc>, i64)>>,
    foreign_history: HashMap<String, VecDeque<(chrono::DateTime<Utc>, f64)>>,
    prev_basis_sign: HashMap<String, TriState>,
}

impl AnomalyDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Volume spike: current trade volume more than 3x the trailing 20-minute
    /// average, requiring at least 10 samples in that window.
    pub fn check_volume_spike(&mut self, symbol: &str, trade_vol: i64) -> Option<Alert> {
        let now = Utc::now();
        let history = self.volume_history.entry(symbol.to_string()).or_default();
        history.push_back((now, trade_vol));
        while history.len() > VOL_HISTORY_CAP {
            history.pop_front();
        }

        let cutoff = now - Duration::minutes(VOL_WINDOW_MINUTES);
        let windowed: Vec<i64> = history
            .iter()
            .filter(|(ts, _)| *ts >= cutoff)
            .map(|(_, v)| *v)
            .collect();

        if windowed.len() < VOL_MIN_SAMPLES {
            return None;
        }
        let avg = windowed.iter().sum::<i64>() as f64 / windowed.len() as f64;
        if avg <= 0.0 {
            return None;
        }
        let ratio = trade_vol as f64 / avg;
        if ratio > VOL_SPIKE_MULTIPLIER {
            Some(Alert {
                alert_type: AlertType::VolumeSpike,
                severity: Severity::Warning,
                symbol: symbol.to_string(),
                message: format!("{symbol} volume {ratio:.1}x its 20-minute average"),
                data: json!({ "ratio": ratio, "current_vol": trade_vol, "avg_vol": avg }),
                created_at: now,
            })
        } else {
            None
        }
    }

    /// Price breakout: last price at or beyond the daily ceiling/floor.
    pub fn check_price_breakout(
        &self,
        symbol: &str,
        price: f64,
        ceiling: f64,
        floor: f64,
    ) -> Option<Alert> {
        if ceiling <= 0.0 || floor <= 0.0 {
            return None;
        }
        let direction = if price >= ceiling {
            "ceiling"
        } else if price <= floor {
            "floor"
        } else {
            return None;
        };
        Some(Alert {
            alert_type: AlertType::PriceBreakout,
            severity: Severity::Critical,
            symbol: symbol.to_string(),
            message: format!("{symbol} hit the daily {direction}"),
            data: json!({ "direction": direction, "price": price }),
            created_at: Utc::now(),
        })
    }

    /// Foreign acceleration: |change| over the trailing 5-minute window
    /// exceeds 30%, ignoring windows where the past value was negligible.
    pub fn check_foreign_acceleration(&mut self, symbol: &str, net_value: f64) -> Option<Alert> {
        let now = Utc::now();
        let history = self.foreign_history.entry(symbol.to_string()).or_default();

        let cutoff = now - Duration::minutes(FOREIGN_WINDOW_MINUTES);
        let past = history
            .iter()
            .rev()
            .find(|(ts, _)| *ts <= cutoff)
            .map(|(_, v)| *v);

        history.push_back((now, net_value));
        while history.len() > FOREIGN_HISTORY_CAP {
            history.pop_front();
        }

        let past_value = past?;
        if past_value.abs() < FOREIGN_MIN_VALUE {
            return None;
        }
        let change_pct = ((net_value - past_value) / past_value).abs();
        if change_pct > FOREIGN_CHANGE_THRESHOLD {
            let direction = if net_value > past_value { "buying" } else { "selling" };
            Some(Alert {
                alert_type: AlertType::ForeignAcceleration,
                severity: Severity::Warning,
                symbol: symbol.to_string(),
                message: format!("{symbol} foreign flow accelerating {direction}"),
                data: json!({ "direction": direction, "change_pct": change_pct }),
                created_at: now,
            })
        } else {
            None
        }
    }

    /// Basis flip: premium/discount sign change since the last observation.
    /// Never fires on the symbol's first basis observation.
    pub fn check_basis_flip(&mut self, symbol: &str, is_premium: bool) -> Option<Alert> {
        let now = Utc::now();
        let new_state = if is_premium { TriState::Premium } else { TriState::Discount };
        let prev = self
            .prev_basis_sign
            .insert(symbol.to_string(), new_state)
            .unwrap_or(TriState::Unknown);

        match prev {
            TriState::Unknown => None,
            TriState::Premium if new_state == TriState::Discount => Some(Alert {
                alert_type: AlertType::BasisDivergence,
                severity: Severity::Warning,
                symbol: symbol.to_string(),
                message: format!("{symbol} basis flipped premium→discount"),
                data: json!({ "from": "premium", "to": "discount" }),
                created_at: now,
            }),
            TriState::Discount if new_state == TriState::Premium => Some(Alert {
                alert_type: AlertType::BasisDivergence,
                severity: Severity::Warning,
                symbol: symbol.to_string(),
                message: format!("{symbol} basis flipped discount→premium"),
                data: json!({ "from": "discount", "to": "premium" }),
                created_at: now,
            }),
            _ => None,
        }
    }

    pub fn reset(&mut self) {
        self.volume_history.clear();
        self.foreign_history.clear();
        self.prev_basis_sign.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn volume_spike_requires_at_least_ten_samples() {
        let mut d = AnomalyDetector::new();
        for _ in 0..9 {
            assert!(d.check_volume_spike("VNM", 1000).is_none());
        }
        // 10th sample, even a huge spike, still can't exceed 3x a flat average of 1000
        // construct a genuine spike case separately below
    }

    #[test]
    fn volume_spike_fires_above_threshold_with_enough_samples() {
        let mut d = AnomalyDetector::new();
        for _ in 0..10 {
            d.check_volume_spike("VNM", 100);
        }
        let alert = d.check_volume_spike("VNM", 1000);
        assert!(alert.is_some());
        assert_eq!(alert.unwrap().alert_type, AlertType::VolumeSpike);
    }

    #[test]
    fn price_breakout_uses_at_or_beyond() {
        let d = AnomalyDetector::new();
        let alert = d.check_price_breakout("VNM", 85.8, 85.8, 74.6).unwrap();
        assert_eq!(alert.data["direction"], "ceiling");
        assert!(d.check_price_breakout("VNM", 80.0, 85.8, 74.6).is_none());
    }

    #[test]
    fn price_breakout_skipped_without_ceiling_floor() {
        let d = AnomalyDetector::new();
        assert!(d.check_price_breakout("VNM", 85.8, 0.0, 0.0).is_none());
    }

    #[test]
    fn foreign_acceleration_ignores_small_past_values() {
        let mut d = AnomalyDetector::new();
        // no history yet -> None regardless
        assert!(d.check_foreign_acceleration("VNM", 500.0).is_none());
    }

    #[test]
    fn basis_flip_does_not_fire_on_first_observation() {
        let mut d = AnomalyDetector::new();
        assert!(d.check_basis_flip("VN30F2603", true).is_none());
    }

    #[test]
    fn basis_flip_fires_on_sign_change() {
        let mut d = AnomalyDetector::new();
        d.check_basis_flip("VN30F2603", true);
        let alert = d.check_basis_flip("VN30F2603", false).unwrap();
        assert_eq!(alert.data["from"], "premium");
        assert_eq!(alert.data["to"], "discount");
    }

    #[test]
    fn basis_flip_silent_when_sign_unchanged() {
        let mut d = AnomalyDetector::new();
        d.check_basis_flip("VN30F2603", true);
        assert!(d.check_basis_flip("VN30F2603", true).is_none());
    }

    #[test]
    fn reset_clears_all_detector_state() {
        let mut d = AnomalyDetector::new();
        d.check_volume_spike("VNM", 100);
        d.check_basis_flip("VN30F2603", true);
        d.reset();
        assert!(d.check_basis_flip("VN30F2603", false).is_none());
    }
}
