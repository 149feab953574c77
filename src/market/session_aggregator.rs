//! Session Aggregator (C5, spec §4.4).
//!
//! Running per-symbol totals split by auction/continuous phase. Entirely
//! session-scoped: `reset()` drops the whole table (unlike the quote cache).

use std::collections::HashMap;

use chrono::Utc;

use crate::models::{ClassifiedTrade, SessionStats, TradeType};

#[derive(Debug, Default)]
pub struct SessionAggregator {
    stats: HashMap<String, SessionStats>,
}

fn phase_for(session: &str) -> &'static str {
    match session {
        "ATO" => "ato",
        "ATC" => "atc",
        _ => "continuous",
    }
}

impl SessionAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one classified trade's volume/value to the symbol's overall and
    /// phase-keyed totals. Exactly one of `{mua,ban,neutral}_vol` increases at
    /// both levels, preserving `total_vol == mua_vol + ban_vol + neutral_vol
    /// == sum of phase total_vols` (spec §3 invariant).
    pub fn add_trade(&mut self, trade: &ClassifiedTrade) {
        let stats = self
            .stats
            .entry(trade.symbol.clone())
            .or_insert_with(|| SessionStats::new(trade.symbol.clone()));

        let phase = match phase_for(&trade.trading_session) {
            "ato" => &mut stats.ato,
            "atc" => &mut stats.atc,
            _ => &mut stats.continuous,
        };

        match trade.trade_type {
            TradeType::Mua => {
                stats.mua_vol += trade.volume;
                stats.mua_val += trade.value;
                phase.mua_vol += trade.volume;
            }
            TradeType::Ban => {
                stats.ban_vol += trade.volume;
                stats.ban_val += trade.value;
                phase.ban_vol += trade.volume;
            }
            TradeType::Neutral => {
                stats.neutral_vol += trade.volume;
                phase.neutral_vol += trade.volume;
            }
        }
        stats.total_vol += trade.volume;
        phase.total_vol += trade.volume;
        stats.last_updated = Utc::now();
    }

    pub fn get(&self, symbol: &str) -> Option<&SessionStats> {
        self.stats.get(symbol)
    }

    pub fn get_all(&self) -> &HashMap<String, SessionStats> {
        &self.stats
    }

    pub fn reset(&mut self) {
        self.stats.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classified(trade_type: TradeType, vol: i64, session: &str) -> ClassifiedTrade {
        ClassifiedTrade {
            symbol: "VNM".to_string(),
            price: 80.0,
            volume: vol,
            value: vol as f64 * 80.0 * 1000.0,
            trade_type,
            bid_price: 80.0,
            ask_price: 80.5,
            timestamp: Utc::now(),
            trading_session: session.to_string(),
        }
    }

    #[test]
    fn phase_conservation_holds_across_mixed_trades() {
        let mut agg = SessionAggregator::new();
        agg.add_trade(&classified(TradeType::Mua, 100, "LO"));
        agg.add_trade(&classified(TradeType::Ban, 50, "ATO"));
        agg.add_trade(&classified(TradeType::Neutral, 20, "ATC"));

        let stats = agg.get("VNM").unwrap();
        assert_eq!(stats.total_vol, 170);
        assert_eq!(stats.mua_vol + stats.ban_vol + stats.neutral_vol, 170);
        assert_eq!(
            stats.ato.total_vol + stats.continuous.total_vol + stats.atc.total_vol,
            170
        );
        assert_eq!(stats.ato.ban_vol, 50);
        assert_eq!(stats.continuous.mua_vol, 100);
        assert_eq!(stats.atc.neutral_vol, 20);
    }

    #[test]
    fn reset_clears_table() {
        let mut agg = SessionAggregator::new();
        agg.add_trade(&classified(TradeType::Mua, 100, "LO"));
        agg.reset();
        assert!(agg.get("VNM").is_none());
    }
}
