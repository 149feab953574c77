//! Core event and data-model types shared across the pipeline (C1, data model of §3).
//!
//! These are the canonical, already-normalized shapes the ingestion demultiplexer
//! (`ingest`) produces and every tracker in `market`/`analytics` consumes. Nothing
//! in this module talks to the network or the database.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Auction/continuous trading phase tag carried on quote and trade frames.
pub type TradingSession = String;

/// A single trade print from the exchange.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TradeEvent {
    pub symbol: String,
    pub last_price: f64,
    /// Per-trade volume. NOT cumulative — see `total_vol` for the running total.
    pub last_vol: i64,
    pub total_vol: i64,
    pub total_val: f64,
    pub change: f64,
    pub ratio_change: f64,
    pub trading_session: TradingSession,
}

/// Top-of-book quote, three levels deep each side, plus the daily reference band.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct QuoteEvent {
    pub symbol: String,
    pub ref_price: f64,
    pub ceiling: f64,
    pub floor: f64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub bid_price_1: f64,
    pub bid_vol_1: i64,
    pub bid_price_2: f64,
    pub bid_vol_2: i64,
    pub bid_price_3: f64,
    pub bid_vol_3: i64,
    pub ask_price_1: f64,
    pub ask_vol_1: i64,
    pub ask_price_2: f64,
    pub ask_vol_2: i64,
    pub ask_price_3: f64,
    pub ask_vol_3: i64,
}

/// Cumulative-since-session-open foreign-investor flow for a symbol.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ForeignEvent {
    pub symbol: String,
    pub f_buy_vol: i64,
    pub f_sell_vol: i64,
    pub f_buy_val: f64,
    pub f_sell_val: f64,
    pub total_room: i64,
    pub current_room: i64,
}

/// A single index tick (e.g. VN30, VNINDEX, HNX).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IndexEvent {
    pub index_id: String,
    pub index_value: f64,
    pub prior_index_value: f64,
    pub change: f64,
    pub ratio_change: f64,
    pub total_qtty: i64,
    pub total_val: f64,
    pub advances: i64,
    pub declines: i64,
    pub no_changes: i64,
}

/// A pre-aggregated bar, carried through but not otherwise processed by the core.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BarEvent {
    pub symbol: String,
    pub time: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: i64,
}

/// Tagged union of every typed upstream event the demultiplexer can produce.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind")]
pub enum MarketEvent {
    Trade(TradeEvent),
    Quote(QuoteEvent),
    Foreign(ForeignEvent),
    Index(IndexEvent),
    Bar(BarEvent),
}

/// The aggressor side of a classified trade.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum TradeType {
    Mua,
    Ban,
    Neutral,
}

/// A trade enriched with the classifier's verdict (C4 output).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClassifiedTrade {
    pub symbol: String,
    pub price: f64,
    pub volume: i64,
    pub value: f64,
    pub trade_type: TradeType,
    pub bid_price: f64,
    pub ask_price: f64,
    pub timestamp: DateTime<Utc>,
    pub trading_session: TradingSession,
}

/// Volume/value totals for one trading phase (ATO / continuous / ATC).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct SessionBreakdown {
    pub mua_vol: i64,
    pub ban_vol: i64,
    pub neutral_vol: i64,
    pub total_vol: i64,
}

/// Running per-symbol session totals, split by phase (C5 output).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionStats {
    pub symbol: String,
    pub mua_vol: i64,
    pub mua_val: f64,
    pub ban_vol: i64,
    pub ban_val: f64,
    pub neutral_vol: i64,
    pub total_vol: i64,
    pub ato: SessionBreakdown,
    pub continuous: SessionBreakdown,
    pub atc: SessionBreakdown,
    pub last_updated: DateTime<Utc>,
}

impl SessionStats {
    pub fn new(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            mua_vol: 0,
            mua_val: 0.0,
            ban_vol: 0,
            ban_val: 0.0,
            neutral_vol: 0,
            total_vol: 0,
            ato: SessionBreakdown::default(),
            continuous: SessionBreakdown::default(),
            atc: SessionBreakdown::default(),
            last_updated: Utc::now(),
        }
    }
}

/// Per-symbol foreign-flow state with derived speed/acceleration (C6 output).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ForeignState {
    pub symbol: String,
    pub buy_vol: i64,
    pub sell_vol: i64,
    pub buy_val: f64,
    pub sell_val: f64,
    pub net_vol: i64,
    pub net_val: f64,
    pub buy_speed_per_min: f64,
    pub sell_speed_per_min: f64,
    pub buy_acceleration: f64,
    pub sell_acceleration: f64,
    pub total_room: i64,
    pub current_room: i64,
    pub last_updated: DateTime<Utc>,
}

/// Aggregate-by-symbol snapshot with top movers (C6 `get_summary`).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ForeignSummary {
    pub total_buy_val: f64,
    pub total_sell_val: f64,
    pub net_val: f64,
    pub top_buy: Vec<ForeignState>,
    pub top_sell: Vec<ForeignState>,
}

/// A single intraday sparkline sample.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IntradayPoint {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
}

/// Latest snapshot for one tracked index (C7 output).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IndexData {
    pub index_id: String,
    pub value: f64,
    pub prior_value: f64,
    pub change: f64,
    pub ratio_change: f64,
    pub total_volume: i64,
    pub advances: i64,
    pub declines: i64,
    pub no_changes: i64,
    pub advance_ratio: f64,
    pub intraday: Vec<IntradayPoint>,
    pub last_updated: DateTime<Utc>,
}

/// A single futures-spot basis observation (C8 output).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BasisPoint {
    pub timestamp: DateTime<Utc>,
    pub futures_symbol: String,
    pub futures_price: f64,
    pub spot_value: f64,
    pub basis: f64,
    pub basis_pct: f64,
    pub is_premium: bool,
}

/// Full state of the active futures contract, for the `market` channel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DerivativesData {
    pub symbol: String,
    pub price: f64,
    pub volume: i64,
    pub change: f64,
    pub ratio_change: f64,
    pub bid_price: f64,
    pub ask_price: f64,
    pub basis: Option<BasisPoint>,
}

/// Alert severity.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Warning,
    Critical,
}

/// Alert category (C9).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertType {
    VolumeSpike,
    PriceBreakout,
    ForeignAcceleration,
    BasisDivergence,
}

/// A single fired alert (C9/C10 output).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Alert {
    pub alert_type: AlertType,
    pub severity: Severity,
    pub symbol: String,
    pub message: String,
    pub data: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// A full market snapshot, sent on the `market` channel.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MarketSnapshot {
    pub quotes: std::collections::HashMap<String, QuoteEvent>,
    pub stats: std::collections::HashMap<String, SessionStats>,
    pub indices: std::collections::HashMap<String, IndexData>,
    pub foreign_summary: ForeignSummary,
    pub derivatives: Option<DerivativesData>,
}
