//! Derivatives Tracker (C8, spec §4.7).
//!
//! Tracks every futures contract currently trading, designates the one with
//! the largest session volume as "active" (ties go to whichever updated most
//! recently), and recomputes the futures-spot basis on every futures trade.

use std::collections::{HashMap, VecDeque};

use chrono::{Duration, Utc};

use crate::market::index_tracker::IndexTracker;
use crate::market::quote_cache::QuoteCache;
use crate::models::{BasisPoint, DerivativesData, TradeEvent};

const BASIS_HISTORY_CAP: usize = 3_600;

struct ContractState {
    price: f64,
    volume: i64,
    change: f64,
    ratio_change: f64,
}

#[derive(Default)]
pub struct DerivativesTracker {
    contracts: HashMap<String, ContractState>,
    active_symbol: Option<String>,
    basis_history: VecDeque<BasisPoint>,
    current_basis: Option<BasisPoint>,
}

impl DerivativesTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process a futures trade: update per-contract state, possibly switch the
    /// active contract, and recompute the basis against the VN30 spot value.
    pub fn update_from_trade(
        &mut self,
        trade: &TradeEvent,
        indices: &IndexTracker,
        quotes: &QuoteCache,
    ) -> Option<BasisPoint> {
        let contract = self.contracts.entry(trade.symbol.clone()).or_insert(ContractState {
            price: 0.0,
            volume: 0,
            change: 0.0,
            ratio_change: 0.0,
        });
        contract.price = trade.last_price;
        contract.volume = trade.total_vol;
        contract.change = trade.change;
        contract.ratio_change = trade.ratio_change;

        let new_volume = contract.volume;
        let becomes_active = match &self.active_symbol {
            None => true,
            Some(active) if active == &trade.symbol => true,
            Some(active) => {
                let active_volume = self.contracts.get(active).map(|c| c.volume).unwrap_or(0);
                new_volume >= active_volume
            }
        };
        if becomes_active {
            self.active_symbol = Some(trade.symbol.clone());
        }

        let _ = quotes; // bid/ask for the active contract are read lazily in get_data()

        // Basis is recomputed for whichever contract just traded, regardless
        // of which one is active — `active_symbol` only picks which contract
        // `get_data()` reports, not whether this trade produces a basis point.
        self.compute_basis(&trade.symbol, trade.last_price, indices)
    }

    fn compute_basis(
        &mut self,
        futures_symbol: &str,
        futures_price: f64,
        indices: &IndexTracker,
    ) -> Option<BasisPoint> {
        let spot_value = indices.get_vn30_value();
        if spot_value <= 0.0 || futures_price <= 0.0 {
            return None;
        }
        let basis = futures_price - spot_value;
        let basis_pct = basis / spot_value * 100.0;
        let point = BasisPoint {
            timestamp: Utc::now(),
            futures_symbol: futures_symbol.to_string(),
            futures_price,
            spot_value,
            basis,
            basis_pct,
            is_premium: basis > 0.0,
        };
        self.basis_history.push_back(point.clone());
        while self.basis_history.len() > BASIS_HISTORY_CAP {
            self.basis_history.pop_front();
        }
        self.current_basis = Some(point.clone());
        Some(point)
    }

    pub fn current_basis(&self) -> Option<&BasisPoint> {
        self.current_basis.as_ref()
    }

    pub fn get_futures_price(&self) -> f64 {
        self.active_symbol
            .as_ref()
            .and_then(|s| self.contracts.get(s))
            .map(|c| c.price)
            .unwrap_or(0.0)
    }

    pub fn get_basis_trend(&self, minutes: i64) -> Vec<BasisPoint> {
        let cutoff = Utc::now() - Duration::minutes(minutes);
        self.basis_history
            .iter()
            .filter(|p| p.timestamp >= cutoff)
            .cloned()
            .collect()
    }

    pub fn get_data(&self, quotes: &QuoteCache) -> Option<DerivativesData> {
        let symbol = self.active_symbol.clone()?;
        let contract = self.contracts.get(&symbol)?;
        let (bid, ask) = quotes.get_bid_ask(&symbol);
        Some(DerivativesData {
            symbol,
            price: contract.price,
            volume: contract.volume,
            change: contract.change,
            ratio_change: contract.ratio_change,
            bid_price: bid,
            ask_price: ask,
            basis: self.current_basis.clone(),
        })
    }

    pub fn reset(&mut self) {
        self.contracts.clear();
        self.active_symbol = None;
        self.basis_history.clear();
        self.current_basis = None;
    }
}
