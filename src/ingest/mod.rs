//! Ingestion demultiplexer (C2, spec §4.1 and §6).
//!
//! Parses a raw upstream frame (JSON text, already-wrapped in a `Content`/`content`
//! envelope or flat), renames every known PascalCase field to the canonical
//! snake_case schema, and discriminates on `RType` to build the typed event(s).
//!
//! This module is pure and synchronous — it does no I/O and touches no async
//! runtime. The thread boundary (worker thread calling in, async core receiving
//! out) lives one layer up, in `stream::supervisor`, which is the only caller
//! that may legitimately invoke this from off the core.

use std::collections::HashMap;

use serde_json::Value;
use tracing::debug;

use crate::models::{ForeignEvent, IndexEvent, MarketEvent, QuoteEvent, TradeEvent};

/// PascalCase → snake_case field rename table (spec §6, exhaustive).
fn field_map() -> &'static HashMap<&'static str, &'static str> {
    use std::sync::OnceLock;
    static MAP: OnceLock<HashMap<&'static str, &'static str>> = OnceLock::new();
    MAP.get_or_init(|| {
        HashMap::from([
            ("Symbol", "symbol"),
            ("StockSymbol", "symbol"),
            ("LastPrice", "last_price"),
            ("LastVol", "last_vol"),
            ("TotalVol", "total_vol"),
            ("TotalVal", "total_val"),
            ("Change", "change"),
            ("RatioChange", "ratio_change"),
            ("TradingSession", "trading_session"),
            ("Ceiling", "ceiling"),
            ("Floor", "floor"),
            ("RefPrice", "ref_price"),
            ("Open", "open"),
            ("High", "high"),
            ("Low", "low"),
            ("BidPrice1", "bid_price_1"),
            ("BidVol1", "bid_vol_1"),
            ("AskPrice1", "ask_price_1"),
            ("AskVol1", "ask_vol_1"),
            ("BidPrice2", "bid_price_2"),
            ("BidVol2", "bid_vol_2"),
            ("AskPrice2", "ask_price_2"),
            ("AskVol2", "ask_vol_2"),
            ("BidPrice3", "bid_price_3"),
            ("BidVol3", "bid_vol_3"),
            ("AskPrice3", "ask_price_3"),
            ("AskVol3", "ask_vol_3"),
            ("FBuyVol", "f_buy_vol"),
            ("FSellVol", "f_sell_vol"),
            ("FBuyVal", "f_buy_val"),
            ("FSellVal", "f_sell_val"),
            ("TotalRoom", "total_room"),
            ("CurrentRoom", "current_room"),
            ("IndexId", "index_id"),
            ("IndexValue", "index_value"),
            ("PriorIndexValue", "prior_index_value"),
            ("TotalQtty", "total_qtty"),
            ("Advances", "advances"),
            ("Declines", "declines"),
            ("NoChanges", "no_changes"),
            ("Time", "time"),
            ("Volume", "volume"),
            ("Close", "close"),
        ])
    })
}

/// Rename every mapped key in `content`. Unmapped keys (including `RType`
/// itself, which the caller reads separately) are dropped.
fn normalize_fields(content: &Value) -> HashMap<String, Value> {
    let map = field_map();
    let mut out = HashMap::new();
    if let Some(obj) = content.as_object() {
        for (k, v) in obj {
            if let Some(renamed) = map.get(k.as_str()) {
                out.insert(renamed.to_string(), v.clone());
            }
        }
    }
    out
}

/// Unwrap the `Content`/`content` envelope; tolerate a flat payload.
fn extract_content(raw: &Value) -> Option<&Value> {
    if let Some(obj) = raw.as_object() {
        if let Some(v) = obj.get("Content").or_else(|| obj.get("content")) {
            return Some(v);
        }
        return Some(raw);
    }
    None
}

fn get_str(fields: &HashMap<String, Value>, key: &str) -> String {
    fields
        .get(key)
        .and_then(|v| v.as_str().map(str::to_string))
        .unwrap_or_default()
}

fn get_f64(fields: &HashMap<String, Value>, key: &str) -> f64 {
    fields.get(key).and_then(Value::as_f64).unwrap_or(0.0)
}

fn get_i64(fields: &HashMap<String, Value>, key: &str) -> i64 {
    fields.get(key).and_then(Value::as_i64).unwrap_or(0)
}

fn build_trade(fields: &HashMap<String, Value>) -> TradeEvent {
    TradeEvent {
        symbol: get_str(fields, "symbol"),
        last_price: get_f64(fields, "last_price"),
        last_vol: get_i64(fields, "last_vol"),
        total_vol: get_i64(fields, "total_vol"),
        total_val: get_f64(fields, "total_val"),
        change: get_f64(fields, "change"),
        ratio_change: get_f64(fields, "ratio_change"),
        trading_session: get_str(fields, "trading_session"),
    }
}

fn build_quote(fields: &HashMap<String, Value>) -> QuoteEvent {
    QuoteEvent {
        symbol: get_str(fields, "symbol"),
        ref_price: get_f64(fields, "ref_price"),
        ceiling: get_f64(fields, "ceiling"),
        floor: get_f64(fields, "floor"),
        open: get_f64(fields, "open"),
        high: get_f64(fields, "high"),
        low: get_f64(fields, "low"),
        bid_price_1: get_f64(fields, "bid_price_1"),
        bid_vol_1: get_i64(fields, "bid_vol_1"),
        bid_price_2: get_f64(fields, "bid_price_2"),
        bid_vol_2: get_i64(fields, "bid_vol_2"),
        bid_price_3: get_f64(fields, "bid_price_3"),
        bid_vol_3: get_i64(fields, "bid_vol_3"),
        ask_price_1: get_f64(fields, "ask_price_1"),
        ask_vol_1: get_i64(fields, "ask_vol_1"),
        ask_price_2: get_f64(fields, "ask_price_2"),
        ask_vol_2: get_i64(fields, "ask_vol_2"),
        ask_price_3: get_f64(fields, "ask_price_3"),
        ask_vol_3: get_i64(fields, "ask_vol_3"),
    }
}

fn build_foreign(fields: &HashMap<String, Value>) -> ForeignEvent {
    ForeignEvent {
        symbol: get_str(fields, "symbol"),
        f_buy_vol: get_i64(fields, "f_buy_vol"),
        f_sell_vol: get_i64(fields, "f_sell_vol"),
        f_buy_val: get_f64(fields, "f_buy_val"),
        f_sell_val: get_f64(fields, "f_sell_val"),
        total_room: get_i64(fields, "total_room"),
        current_room: get_i64(fields, "current_room"),
    }
}

fn build_index(fields: &HashMap<String, Value>) -> IndexEvent {
    IndexEvent {
        index_id: get_str(fields, "index_id"),
        index_value: get_f64(fields, "index_value"),
        prior_index_value: get_f64(fields, "prior_index_value"),
        change: get_f64(fields, "change"),
        ratio_change: get_f64(fields, "ratio_change"),
        total_qtty: get_i64(fields, "total_qtty"),
        total_val: get_f64(fields, "total_val"),
        advances: get_i64(fields, "advances"),
        declines: get_i64(fields, "declines"),
        no_changes: get_i64(fields, "no_changes"),
    }
}

/// Parse one raw upstream frame into zero or more typed events.
///
/// A `Trade`/`Quote`/`R`/`MI` frame yields exactly one event. A combined `X`
/// frame (trade+quote in one payload) yields both a `Trade` and a `Quote`.
/// Unknown `RType` or a malformed payload yields an empty vec and a debug log
/// — this function never panics and never returns an error, since its caller
/// is the upstream worker thread and must not be interrupted by a bad frame.
pub fn parse_frame(raw: &str) -> Vec<MarketEvent> {
    let value: Value = match serde_json::from_str(raw) {
        Ok(v) => v,
        Err(e) => {
            debug!(error = %e, "failed to parse upstream frame as JSON");
            return Vec::new();
        }
    };

    let content = match extract_content(&value) {
        Some(c) => c,
        None => {
            debug!("upstream frame has no usable content");
            return Vec::new();
        }
    };

    let rtype = content
        .as_object()
        .and_then(|o| o.get("RType"))
        .and_then(Value::as_str)
        .unwrap_or("");

    let fields = normalize_fields(content);

    match rtype {
        "Trade" => vec![MarketEvent::Trade(build_trade(&fields))],
        "Quote" => vec![MarketEvent::Quote(build_quote(&fields))],
        "X" => vec![
            MarketEvent::Trade(build_trade(&fields)),
            MarketEvent::Quote(build_quote(&fields)),
        ],
        "R" => vec![MarketEvent::Foreign(build_foreign(&fields))],
        "MI" => vec![MarketEvent::Index(build_index(&fields))],
        other => {
            debug!(rtype = other, "unknown RType, dropping frame");
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_flat_trade_frame() {
        let raw = r#"{"RType":"Trade","Symbol":"VNM","LastPrice":80.5,"LastVol":100,
            "TotalVol":10000,"TotalVal":1000000.0,"Change":0.5,"RatioChange":0.6,
            "TradingSession":"LO"}"#;
        let events = parse_frame(raw);
        assert_eq!(events.len(), 1);
        match &events[0] {
            MarketEvent::Trade(t) => {
                assert_eq!(t.symbol, "VNM");
                assert_eq!(t.last_price, 80.5);
                assert_eq!(t.last_vol, 100);
                assert_eq!(t.trading_session, "LO");
            }
            other => panic!("expected Trade, got {other:?}"),
        }
    }

    #[test]
    fn parses_wrapped_quote_frame() {
        let raw = r#"{"Content":{"RType":"Quote","Symbol":"VNM","Ceiling":85.8,
            "Floor":74.6,"RefPrice":80.2,"BidPrice1":80.0,"AskPrice1":80.5}}"#;
        let events = parse_frame(raw);
        assert_eq!(events.len(), 1);
        match &events[0] {
            MarketEvent::Quote(q) => {
                assert_eq!(q.symbol, "VNM");
                assert_eq!(q.ceiling, 85.8);
                assert_eq!(q.bid_price_1, 80.0);
                assert_eq!(q.ask_price_1, 80.5);
            }
            other => panic!("expected Quote, got {other:?}"),
        }
    }

    #[test]
    fn combined_x_frame_yields_trade_and_quote() {
        let raw = r#"{"RType":"X","Symbol":"VNM","LastPrice":80.5,"LastVol":100,
            "BidPrice1":80.0,"AskPrice1":80.5}"#;
        let events = parse_frame(raw);
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], MarketEvent::Trade(_)));
        assert!(matches!(events[1], MarketEvent::Quote(_)));
    }

    #[test]
    fn unknown_rtype_is_dropped() {
        let raw = r#"{"RType":"Z","Symbol":"VNM"}"#;
        assert!(parse_frame(raw).is_empty());
    }

    #[test]
    fn malformed_json_is_dropped() {
        assert!(parse_frame("not json").is_empty());
    }

    #[test]
    fn foreign_frame_round_trips_field_names() {
        let raw = r#"{"RType":"R","Symbol":"VNM","FBuyVol":5000,"FSellVol":3000,
            "FBuyVal":100.0,"FSellVal":80.0,"TotalRoom":1000000,"CurrentRoom":500000}"#;
        let events = parse_frame(raw);
        match &events[0] {
            MarketEvent::Foreign(f) => {
                assert_eq!(f.f_buy_vol, 5000);
                assert_eq!(f.f_sell_vol, 3000);
                assert_eq!(f.total_room, 1000000);
            }
            other => panic!("expected Foreign, got {other:?}"),
        }
    }
}
