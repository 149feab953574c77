//! Alert Service (C10, spec §4.9).
//!
//! A bounded ring of recent alerts plus a dedup cooldown keyed by
//! `(alert_type, symbol)`. Subscribers are notified in registration order;
//! a panicking subscriber is isolated so the rest still run (mirrored here as
//! `catch_unwind`, since Rust closures don't throw exceptions the way the
//! source's callbacks do).

use std::collections::{HashMap, VecDeque};
use std::panic::AssertUnwindSafe;

use chrono::{DateTime, Duration, Utc};
use metrics::counter;
use tracing::{error, info};

use crate::models::{Alert, AlertType, Severity};

const RING_CAP: usize = 500;
const DEDUP_WINDOW_SECONDS: i64 = 60;

type Subscriber = Box<dyn Fn(&Alert) + Send + Sync>;

#[derive(Default)]
pub struct AlertService {
    ring: VecDeque<Alert>,
    cooldowns: HashMap<(AlertType, String), DateTime<Utc>>,
    subscribers: Vec<Subscriber>,
}

impl AlertService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self, callback: Subscriber) {
        self.subscribers.push(callback);
    }

    /// Register an alert. Returns `false` if deduped (a matching
    /// `(alert_type, symbol)` pair fired within the last 60 seconds).
    pub fn register_alert(&mut self, alert: Alert) -> bool {
        let key = (alert.alert_type, alert.symbol.clone());
        let now = alert.created_at;

        if let Some(last) = self.cooldowns.get(&key) {
            if now - *last < Duration::seconds(DEDUP_WINDOW_SECONDS) {
                return false;
            }
        }

        self.cooldowns.insert(key, now);
        self.ring.push_back(alert.clone());
        while self.ring.len() > RING_CAP {
            self.ring.pop_front();
        }

        counter!("alerts_fired_total", "alert_type" => format!("{:?}", alert.alert_type)).increment(1);
        info!(alert_type = ?alert.alert_type, symbol = %alert.symbol, "alert fired");

        for sub in &self.subscribers {
            let result = std::panic::catch_unwind(AssertUnwindSafe(|| sub(&alert)));
            if result.is_err() {
                error!("alert subscriber panicked; continuing with remaining subscribers");
            }
        }
        true
    }

    /// Newest-first, optionally filtered by type and/or severity.
    pub fn get_recent_alerts(
        &self,
        limit: usize,
        alert_type: Option<AlertType>,
        severity: Option<Severity>,
    ) -> Vec<Alert> {
        self.ring
            .iter()
            .rev()
            .filter(|a| alert_type.map(|t| t == a.alert_type).unwrap_or(true))
            .filter(|a| severity.map(|s| s == a.severity).unwrap_or(true))
            .take(limit)
            .cloned()
            .collect()
    }

    pub fn reset_daily(&mut self) {
        self.ring.clear();
        self.cooldowns.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn alert(alert_type: AlertType, symbol: &str, at: DateTime<Utc>) -> Alert {
        Alert {
            alert_type,
            severity: Severity::Warning,
            symbol: symbol.to_string(),
            message: "test".to_string(),
            data: json!({}),
            created_at: at,
        }
    }

    #[test]
    fn second_registration_within_cooldown_is_deduped() {
        let mut svc = AlertService::new();
        let t0 = Utc::now();
        assert!(svc.register_alert(alert(AlertType::PriceBreakout, "VNM", t0)));
        let t1 = t0 + Duration::seconds(30);
        assert!(!svc.register_alert(alert(AlertType::PriceBreakout, "VNM", t1)));
        assert_eq!(svc.get_recent_alerts(10, None, None).len(), 1);
    }

    #[test]
    fn registration_after_cooldown_window_is_accepted() {
        let mut svc = AlertService::new();
        let t0 = Utc::now();
        svc.register_alert(alert(AlertType::PriceBreakout, "VNM", t0));
        let t1 = t0 + Duration::seconds(61);
        assert!(svc.register_alert(alert(AlertType::PriceBreakout, "VNM", t1)));
        assert_eq!(svc.get_recent_alerts(10, None, None).len(), 2);
    }

    #[test]
    fn different_symbols_do_not_share_cooldown() {
        let mut svc = AlertService::new();
        let t0 = Utc::now();
        assert!(svc.register_alert(alert(AlertType::PriceBreakout, "VNM", t0)));
        assert!(svc.register_alert(alert(AlertType::PriceBreakout, "HPG", t0)));
    }

    #[test]
    fn get_recent_alerts_is_newest_first_and_filterable() {
        let mut svc = AlertService::new();
        let t0 = Utc::now();
        svc.register_alert(alert(AlertType::PriceBreakout, "VNM", t0));
        svc.register_alert(alert(AlertType::VolumeSpike, "HPG", t0 + Duration::seconds(1)));
        let recent = svc.get_recent_alerts(10, None, None);
        assert_eq!(recent[0].symbol, "HPG");
        let filtered = svc.get_recent_alerts(10, Some(AlertType::VolumeSpike), None);
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].symbol, "HPG");
    }

    #[test]
    fn reset_daily_clears_ring_and_cooldowns() {
        let mut svc = AlertService::new();
        let t0 = Utc::now();
        svc.register_alert(alert(AlertType::PriceBreakout, "VNM", t0));
        svc.reset_daily();
        assert_eq!(svc.get_recent_alerts(10, None, None).len(), 0);
        // cooldown cleared too: same instant now accepted again
        assert!(svc.register_alert(alert(AlertType::PriceBreakout, "VNM", t0)));
    }
}
