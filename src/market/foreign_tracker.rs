//! Foreign Investor Tracker (C6, spec §4.5).
//!
//! Per symbol: previous raw event (for delta computation), current state,
//! a bounded history of deltas for the speed window, and the last speed for
//! acceleration. Foreign cumulative counters only ever increase within a
//! connected session; a decrease means the upstream reconnected underneath us
//! and is clamped rather than treated as a real outflow (spec §3, §7, §8).

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Duration, Utc};
use tracing::warn;

use crate::models::{ForeignEvent, ForeignState, ForeignSummary};

const SPEED_WINDOW_MINUTES: i64 = 5;
const HISTORY_CAP: usize = 600;

struct ForeignDelta {
    timestamp: DateTime<Utc>,
    buy_delta: i64,
    sell_delta: i64,
}

struct SymbolState {
    prev: ForeignEvent,
    history: VecDeque<ForeignDelta>,
    prev_buy_speed: f64,
    prev_sell_speed: f64,
    current: ForeignState,
}

#[derive(Default)]
pub struct ForeignTracker {
    symbols: HashMap<String, SymbolState>,
}

impl ForeignTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process one foreign-flow event, returning the refreshed state record.
    pub fn update(&mut self, event: ForeignEvent) -> ForeignState {
        let now = Utc::now();
        let symbol = event.symbol.clone();

        let (buy_delta, sell_delta, had_prev) = match self.symbols.get(&symbol) {
            Some(s) => {
                let raw_buy = event.f_buy_vol - s.prev.f_buy_vol;
                let raw_sell = event.f_sell_vol - s.prev.f_sell_vol;
                if raw_buy < 0 || raw_sell < 0 {
                    warn!(symbol = %symbol, raw_buy, raw_sell,
                        "foreign cumulative regressed, clamping delta (reconnect assumed)");
                }
                (raw_buy.max(0), raw_sell.max(0), true)
            }
            None => (event.f_buy_vol, event.f_sell_vol, false),
        };
        let _ = had_prev;

        let entry = self.symbols.entry(symbol.clone()).or_insert_with(|| SymbolState {
            prev: event.clone(),
            history: VecDeque::new(),
            prev_buy_speed: 0.0,
            prev_sell_speed: 0.0,
            current: ForeignState {
                symbol: symbol.clone(),
                buy_vol: 0,
                sell_vol: 0,
                buy_val: 0.0,
                sell_val: 0.0,
                net_vol: 0,
                net_val: 0.0,
                buy_speed_per_min: 0.0,
                sell_speed_per_min: 0.0,
                buy_acceleration: 0.0,
                sell_acceleration: 0.0,
                total_room: 0,
                current_room: 0,
                last_updated: now,
            },
        });

        entry.history.push_back(ForeignDelta {
            timestamp: now,
            buy_delta,
            sell_delta,
        });
        while entry.history.len() > HISTORY_CAP {
            entry.history.pop_front();
        }

        let cutoff = now - Duration::minutes(SPEED_WINDOW_MINUTES);
        let (buy_sum, sell_sum) = entry
            .history
            .iter()
            .filter(|d| d.timestamp >= cutoff)
            .fold((0i64, 0i64), |(b, s), d| (b + d.buy_delta, s + d.sell_delta));

        let buy_speed = buy_sum as f64 / SPEED_WINDOW_MINUTES as f64;
        let sell_speed = sell_sum as f64 / SPEED_WINDOW_MINUTES as f64;

        let buy_acceleration = buy_speed - entry.prev_buy_speed;
        let sell_acceleration = sell_speed - entry.prev_sell_speed;

        entry.prev = event.clone();
        entry.prev_buy_speed = buy_speed;
        entry.prev_sell_speed = sell_speed;

        let net_vol = event.f_buy_vol - event.f_sell_vol;
        let net_val = event.f_buy_val - event.f_sell_val;

        entry.current = ForeignState {
            symbol: symbol.clone(),
            buy_vol: event.f_buy_vol,
            sell_vol: event.f_sell_vol,
            buy_val: event.f_buy_val,
            sell_val: event.f_sell_val,
            net_vol,
            net_val,
            buy_speed_per_min: buy_speed,
            sell_speed_per_min: sell_speed,
            buy_acceleration,
            sell_acceleration,
            total_room: event.total_room,
            current_room: event.current_room,
            last_updated: now,
        };

        entry.current.clone()
    }

    pub fn get(&self, symbol: &str) -> Option<&ForeignState> {
        self.symbols.get(symbol).map(|s| &s.current)
    }

    /// Aggregate across all tracked symbols: totals plus top 5 buyers/sellers
    /// by net value, sorted ascending then split from each end (spec §4.5).
    pub fn get_summary(&self) -> ForeignSummary {
        let mut all: Vec<ForeignState> =
            self.symbols.values().map(|s| s.current.clone()).collect();
        all.sort_by(|a, b| a.net_val.partial_cmp(&b.net_val).unwrap());

        let total_buy_val: f64 = all.iter().map(|s| s.buy_val).sum();
        let total_sell_val: f64 = all.iter().map(|s| s.sell_val).sum();

        let top_sell: Vec<ForeignState> = all.iter().take(5).cloned().collect();
        // last five, reversed, so the biggest net buyer comes first
        let top_buy: Vec<ForeignState> = all.iter().rev().take(5).cloned().collect();

        ForeignSummary {
            total_buy_val,
            total_sell_val,
            net_val: total_buy_val - total_sell_val,
            top_buy,
            top_sell,
        }
    }

    /// Re-seed `prev` from a fresh snapshot without emitting deltas — used
    /// after a reconnect once the REST snapshot has been fetched (C15).
    pub fn reconcile(&mut self, event: ForeignEvent) {
        let symbol = event.symbol.clone();
        let entry = self.symbols.entry(symbol.clone()).or_insert_with(|| SymbolState {
            prev: event.clone(),
            history: VecDeque::new(),
            prev_buy_speed: 0.0,
            prev_sell_speed: 0.0,
            current: ForeignState {
                symbol,
                buy_vol: 0,
                sell_vol: 0,
                buy_val: 0.0,
                sell_val: 0.0,
                net_vol: 0,
                net_val: 0.0,
                buy_speed_per_min: 0.0,
                sell_speed_per_min: 0.0,
                buy_acceleration: 0.0,
                sell_acceleration: 0.0,
                total_room: 0,
                current_room: 0,
                last_updated: Utc::now(),
            },
        });
        entry.prev = event;
    }

    pub fn reset(&mut self) {
        self.symbols.clear();
    }
}
