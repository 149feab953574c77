//! Black-box integration tests wiring the orchestrator (C11) and its
//! trackers (C3–C8) together end to end, the way `processor::serve` wires
//! them at startup. Each module's own `#[cfg(test)]` unit tests cover a
//! single tracker in isolation; these exercise combinations a unit test
//! can't see on its own — e.g. a single symbol moving through the quote
//! cache, session aggregator, and alert service in one flow, or a dedup
//! decision made by the orchestrator rather than the alert service alone.
//!
//! No network or WebSocket plumbing is exercised here — constructing a real
//! `axum::extract::ws::WebSocket` split sink requires an actual HTTP upgrade,
//! which the source's own integration test avoids the same way: testing the
//! underlying components directly rather than the bound server.

use std::collections::HashSet;

use vn_market_pipeline::models::{ForeignEvent, IndexEvent, QuoteEvent, TradeEvent};
use vn_market_pipeline::processor::{Channel, PersistRecord, Processor, PublishSignal};

fn new_processor() -> (
    Processor,
    tokio::sync::mpsc::UnboundedReceiver<PublishSignal>,
    tokio::sync::mpsc::UnboundedReceiver<PersistRecord>,
) {
    let (ntx, nrx) = tokio::sync::mpsc::unbounded_channel();
    let (ptx, prx) = tokio::sync::mpsc::unbounded_channel();
    (Processor::new(HashSet::new(), ntx, ptx), nrx, prx)
}

fn quote(symbol: &str, ref_price: f64, ceiling: f64, floor: f64, bid: f64, ask: f64) -> QuoteEvent {
    QuoteEvent {
        symbol: symbol.to_string(),
        ref_price,
        ceiling,
        floor,
        bid_price_1: bid,
        ask_price_1: ask,
        ..Default::default()
    }
}

fn trade(symbol: &str, last_price: f64, last_vol: i64, total_vol: i64) -> TradeEvent {
    TradeEvent {
        symbol: symbol.to_string(),
        last_price,
        last_vol,
        total_vol,
        total_val: 0.0,
        change: 0.0,
        ratio_change: 0.0,
        trading_session: "LO".to_string(),
    }
}

/// A buy print inside the reference band shows up in the quote cache, the
/// session aggregator, and the market snapshot together — not just in
/// whichever single tracker owns it.
#[test]
fn active_buy_flows_through_quote_and_session_into_snapshot() {
    let (mut p, mut nrx, mut prx) = new_processor();

    p.handle_quote(quote("VNM", 80.2, 85.8, 74.6, 80.0, 80.5));
    let (classified, stats, basis) = p.handle_trade(trade("VNM", 80.5, 100, 100)).unwrap();

    assert_eq!(classified.trade_type, vn_market_pipeline::models::TradeType::Mua);
    assert!(basis.is_none());
    assert_eq!(stats.unwrap().mua_vol, 100);

    let snapshot = p.market_snapshot();
    assert_eq!(snapshot.quotes["VNM"].bid_price_1, 80.0);
    assert_eq!(snapshot.stats["VNM"].mua_vol, 100);

    assert!(matches!(prx.try_recv().unwrap(), PersistRecord::Tick(_)));
    assert!(matches!(
        nrx.try_recv().unwrap(),
        PublishSignal::StateChanged(Channel::Market)
    ));
}

/// A print at the ceiling fires a breakout alert that reaches both the
/// alert service's ring and the publisher's notify channel, in one pass
/// through the orchestrator.
#[test]
fn ceiling_breakout_reaches_alert_ring_and_notify_channel() {
    let (mut p, mut nrx, _prx) = new_processor();
    p.handle_quote(quote("VNM", 80.2, 85.8, 74.6, 0.0, 0.0));
    p.handle_trade(trade("VNM", 85.8, 100, 100));

    let alerts = p.alert_service.get_recent_alerts(10, None, None);
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].data["direction"], "ceiling");

    let mut saw_alert = false;
    while let Ok(signal) = nrx.try_recv() {
        if matches!(signal, PublishSignal::AlertFired(_)) {
            saw_alert = true;
        }
    }
    assert!(saw_alert);
}

/// Two breakouts on the same symbol inside the 60s cooldown: the orchestrator
/// only forwards the first to the publisher, even though both trades are
/// processed and persisted.
#[test]
fn repeated_breakout_within_cooldown_is_deduped_before_publish() {
    let (mut p, mut nrx, _prx) = new_processor();
    p.handle_quote(quote("VNM", 80.2, 85.8, 74.6, 0.0, 0.0));
    p.handle_trade(trade("VNM", 85.8, 100, 100));
    p.handle_trade(trade("VNM", 85.9, 50, 150));

    assert_eq!(p.alert_service.get_recent_alerts(10, None, None).len(), 1);

    let fired_count = std::iter::from_fn(|| nrx.try_recv().ok())
        .filter(|s| matches!(s, PublishSignal::AlertFired(_)))
        .count();
    assert_eq!(fired_count, 1);
}

/// A foreign-flow update after the upstream silently reconnects (cumulative
/// counters reset downward) is clamped by the orchestrator's call into the
/// foreign tracker, and the clamped state — not the raw regression — is what
/// gets persisted and notified.
#[test]
fn foreign_reconnect_regression_is_clamped_end_to_end() {
    let (mut p, _nrx, mut prx) = new_processor();
    p.handle_foreign(ForeignEvent {
        symbol: "VNM".to_string(),
        f_buy_vol: 5000,
        f_sell_vol: 3000,
        f_buy_val: 5000.0,
        f_sell_val: 3000.0,
        total_room: 1_000_000,
        current_room: 500_000,
    });
    let state = p
        .handle_foreign(ForeignEvent {
            symbol: "VNM".to_string(),
            f_buy_vol: 100,
            f_sell_vol: 50,
            f_buy_val: 100.0,
            f_sell_val: 50.0,
            total_room: 1_000_000,
            current_room: 500_000,
        })
        .unwrap();

    assert_eq!(state.buy_speed_per_min, 0.0);
    assert_eq!(state.sell_speed_per_min, 0.0);

    let mut persisted = Vec::new();
    while let Ok(record) = prx.try_recv() {
        persisted.push(record);
    }
    match persisted.last().unwrap() {
        PersistRecord::Foreign(f) => assert_eq!(f.buy_vol, 100),
        other => panic!("expected a Foreign record, got {other:?}"),
    }
}

/// A futures print trades a positive basis once VN30 has a spot value, and
/// the result surfaces in the combined market snapshot's derivatives field —
/// exercising the index tracker and derivatives tracker together through the
/// orchestrator, not in isolation.
#[test]
fn positive_basis_surfaces_in_market_snapshot_after_index_update() {
    let (mut p, _nrx, _prx) = new_processor();
    p.handle_index(IndexEvent {
        index_id: "VN30".to_string(),
        index_value: 1250.0,
        prior_index_value: 1249.0,
        change: 1.0,
        ratio_change: 0.08,
        total_qtty: 0,
        total_val: 0.0,
        advances: 10,
        declines: 5,
        no_changes: 0,
    });
    let (_, stats, basis) = p.handle_trade(trade("VN30F2603", 1260.0, 10, 100)).unwrap();
    assert!(stats.is_none());
    let basis = basis.unwrap();
    assert!(basis.is_premium);
    assert_eq!(basis.basis, 10.0);

    let snapshot = p.market_snapshot();
    let derivatives = snapshot.derivatives.unwrap();
    assert_eq!(derivatives.symbol, "VN30F2603");
    assert!(derivatives.basis.unwrap().is_premium);
}

/// A full day's worth of state across every tracker is wiped by a session
/// reset except the quote cache, which the orchestrator is required to
/// preserve across the boundary (spec §3/§4.10).
#[test]
fn session_reset_clears_every_tracker_but_the_quote_cache() {
    let (mut p, _nrx, _prx) = new_processor();
    p.handle_quote(quote("VNM", 80.2, 85.8, 74.6, 80.0, 80.5));
    p.handle_trade(trade("VNM", 80.5, 100, 100));
    p.handle_foreign(ForeignEvent {
        symbol: "VNM".to_string(),
        f_buy_vol: 5000,
        f_sell_vol: 3000,
        f_buy_val: 5000.0,
        f_sell_val: 3000.0,
        total_room: 1_000_000,
        current_room: 500_000,
    });
    p.handle_index(IndexEvent {
        index_id: "VN30".to_string(),
        index_value: 1250.0,
        prior_index_value: 1249.0,
        change: 1.0,
        ratio_change: 0.08,
        total_qtty: 0,
        total_val: 0.0,
        advances: 10,
        declines: 5,
        no_changes: 0,
    });
    p.handle_trade(trade("VN30F2603", 1260.0, 10, 100));

    p.reset_session();

    assert_eq!(p.quote_cache.get_bid_ask("VNM"), (80.0, 80.5));
    assert!(p.session_aggregator.get("VNM").is_none());
    assert!(p.foreign_tracker.get("VNM").is_none());
    assert!(p.index_tracker.get("VN30").is_none());
    assert!(p.market_snapshot().derivatives.is_none());
    assert!(p.alert_service.get_recent_alerts(10, None, None).is_empty());
}
