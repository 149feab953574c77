//! Quote Cache (C3, spec §4.2).
//!
//! Latest top-of-book per symbol. Single-writer (the async core); survives
//! `reset_session` — unlike every other tracker in this module, its entries are
//! never cleared except by being overwritten.

use std::collections::HashMap;

use crate::models::QuoteEvent;

#[derive(Debug, Default)]
pub struct QuoteCache {
    quotes: HashMap<String, QuoteEvent>,
}

impl QuoteCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, quote: QuoteEvent) {
        self.quotes.insert(quote.symbol.clone(), quote);
    }

    pub fn get_bid_ask(&self, symbol: &str) -> (f64, f64) {
        self.quotes
            .get(symbol)
            .map(|q| (q.bid_price_1, q.ask_price_1))
            .unwrap_or((0.0, 0.0))
    }

    pub fn get_price_refs(&self, symbol: &str) -> (f64, f64, f64) {
        self.quotes
            .get(symbol)
            .map(|q| (q.ref_price, q.ceiling, q.floor))
            .unwrap_or((0.0, 0.0, 0.0))
    }

    pub fn get(&self, symbol: &str) -> Option<&QuoteEvent> {
        self.quotes.get(symbol)
    }

    pub fn get_all(&self) -> &HashMap<String, QuoteEvent> {
        &self.quotes
    }
}
