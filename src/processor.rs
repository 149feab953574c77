//! Processor Orchestrator (C11, spec §4.10).
//!
//! Owns every per-symbol tracker (C3–C8) plus the anomaly detector and alert
//! service (C9–C10), the watchlist, and the list of channel-tag subscribers
//! that feed the publisher (C12). This struct is meant to run exclusively on
//! the single cooperative core (§5) — nothing in here is `Send`-guarded
//! because nothing outside the core thread should ever touch it directly; the
//! upstream worker thread only ever reaches it through the handoff in
//! `stream::supervisor`.

use std::collections::HashSet;

use chrono::Utc;

use crate::analytics::alerts::AlertService;
use crate::analytics::anomaly::AnomalyDetector;
use crate::market::derivatives_tracker::DerivativesTracker;
use crate::market::foreign_tracker::ForeignTracker;
use crate::market::futures_resolver::FUTURES_PREFIX;
use crate::market::index_tracker::IndexTracker;
use crate::market::quote_cache::QuoteCache;
use crate::market::session_aggregator::SessionAggregator;
use crate::market::trade_classifier::TradeClassifier;
use crate::models::{
    Alert, BasisPoint, ClassifiedTrade, ForeignEvent, ForeignState, IndexData, IndexEvent,
    MarketSnapshot, QuoteEvent, SessionStats, TradeEvent,
};

/// Channel tag fanned out to the publisher (C12) after a mutating event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    Market,
    Foreign,
    Index,
    Alerts,
}

/// What the orchestrator hands the publisher on every `notify`. Market/
/// foreign/index carry only the tag — the publisher re-reads current state
/// from the orchestrator when its throttle fires. Alerts carry the fired
/// alert itself (spec §4.11: "alerts → the newly-registered alert object"),
/// since there is no separate "current alerts state" to re-read; a throttled
/// alert notification coalesces down to the most recent alert.
#[derive(Debug, Clone)]
pub enum PublishSignal {
    StateChanged(Channel),
    AlertFired(Alert),
}

/// A record persisted by the batch writer (C14), keyed by destination table.
#[derive(Debug, Clone)]
pub enum PersistRecord {
    Tick(ClassifiedTrade),
    Foreign(ForeignState),
    Index(IndexData),
    Basis(BasisPoint),
}

pub struct Processor {
    pub quote_cache: QuoteCache,
    pub session_aggregator: SessionAggregator,
    pub foreign_tracker: ForeignTracker,
    pub index_tracker: IndexTracker,
    pub derivatives_tracker: DerivativesTracker,
    pub anomaly_detector: AnomalyDetector,
    pub alert_service: AlertService,

    watchlist: HashSet<String>,
    notify_tx: tokio::sync::mpsc::UnboundedSender<PublishSignal>,
    persist_tx: tokio::sync::mpsc::UnboundedSender<PersistRecord>,
}

impl Processor {
    pub fn new(
        watchlist: HashSet<String>,
        notify_tx: tokio::sync::mpsc::UnboundedSender<PublishSignal>,
        persist_tx: tokio::sync::mpsc::UnboundedSender<PersistRecord>,
    ) -> Self {
        Self {
            quote_cache: QuoteCache::new(),
            session_aggregator: SessionAggregator::new(),
            foreign_tracker: ForeignTracker::new(),
            index_tracker: IndexTracker::new(),
            derivatives_tracker: DerivativesTracker::new(),
            anomaly_detector: AnomalyDetector::new(),
            alert_service: AlertService::new(),
            watchlist,
            notify_tx,
            persist_tx,
        }
    }

    /// Empty watchlist accepts everything; futures symbols are always
    /// accepted so the derivatives path runs regardless of watchlist content.
    fn is_watched(&self, symbol: &str) -> bool {
        if symbol.starts_with(FUTURES_PREFIX) {
            return true;
        }
        self.watchlist.is_empty() || self.watchlist.contains(symbol)
    }

    fn notify(&self, channel: Channel) {
        let _ = self.notify_tx.send(PublishSignal::StateChanged(channel));
    }

    /// Registers the alert (dedup/ring/subscribers) and, if it wasn't
    /// deduped, forwards the alert itself to the publisher.
    fn fire_alert(&mut self, alert: Alert) {
        if self.alert_service.register_alert(alert.clone()) {
            let _ = self.notify_tx.send(PublishSignal::AlertFired(alert));
        }
    }

    fn persist(&self, record: PersistRecord) {
        let _ = self.persist_tx.send(record);
    }

    pub fn handle_quote(&mut self, quote: QuoteEvent) {
        if !self.is_watched(&quote.symbol) {
            return;
        }
        self.quote_cache.update(quote);
        self.notify(Channel::Market);
    }

    /// Returns the classified trade (always) plus session stats (non-futures)
    /// or a basis point (futures), matching the dispatch table in spec §4.10.
    pub fn handle_trade(
        &mut self,
        trade: TradeEvent,
    ) -> Option<(ClassifiedTrade, Option<SessionStats>, Option<BasisPoint>)> {
        let is_futures = trade.symbol.starts_with(FUTURES_PREFIX);
        if !is_futures && !self.is_watched(&trade.symbol) {
            return None;
        }

        let classified = TradeClassifier::classify(&trade, &self.quote_cache);

        if is_futures {
            let basis = self.derivatives_tracker.update_from_trade(
                &trade,
                &self.index_tracker,
                &self.quote_cache,
            );
            if let Some(ref point) = basis {
                if let Some(alert) = self
                    .anomaly_detector
                    .check_basis_flip(&point.futures_symbol, point.is_premium)
                {
                    self.fire_alert(alert);
                }
                self.persist(PersistRecord::Basis(point.clone()));
            }
            // futures trades are still classified for tick persistence, but
            // never routed to the phase aggregator (spec §9 open question).
            self.persist(PersistRecord::Tick(classified.clone()));
            self.notify(Channel::Market);
            return Some((classified, None, basis));
        }

        self.session_aggregator.add_trade(&classified);
        let stats = self.session_aggregator.get(&trade.symbol).cloned();

        if let Some(alert) = self
            .anomaly_detector
            .check_volume_spike(&trade.symbol, classified.volume)
        {
            self.fire_alert(alert);
        }
        let (ref_price, ceiling, floor) = self.quote_cache.get_price_refs(&trade.symbol);
        let _ = ref_price;
        if let Some(alert) =
            self.anomaly_detector
                .check_price_breakout(&trade.symbol, trade.last_price, ceiling, floor)
        {
            self.fire_alert(alert);
        }

        self.persist(PersistRecord::Tick(classified.clone()));
        self.notify(Channel::Market);
        Some((classified, stats, None))
    }

    pub fn handle_foreign(&mut self, event: ForeignEvent) -> Option<ForeignState> {
        if !self.is_watched(&event.symbol) {
            return None;
        }
        let state = self.foreign_tracker.update(event);

        if let Some(alert) = self
            .anomaly_detector
            .check_foreign_acceleration(&state.symbol, state.net_val)
        {
            self.fire_alert(alert);
        }

        self.persist(PersistRecord::Foreign(state.clone()));
        self.notify(Channel::Foreign);
        Some(state)
    }

    pub fn handle_index(&mut self, event: IndexEvent) -> IndexData {
        let data = self.index_tracker.update(event);
        self.persist(PersistRecord::Index(data.clone()));
        self.notify(Channel::Index);
        data
    }

    /// Full-state snapshot for the `market` channel (spec §4.11).
    pub fn market_snapshot(&self) -> MarketSnapshot {
        MarketSnapshot {
            quotes: self.quote_cache.get_all().clone(),
            stats: self.session_aggregator.get_all().clone(),
            indices: self.index_tracker.get_all().clone(),
            foreign_summary: self.foreign_tracker.get_summary(),
            derivatives: self.derivatives_tracker.get_data(&self.quote_cache),
        }
    }

    /// Clears session-scoped state (C5–C9's rolling state). Quote cache and
    /// subscriber wiring survive, per spec §3/§4.10.
    pub fn reset_session(&mut self) {
        self.session_aggregator.reset();
        self.foreign_tracker.reset();
        self.index_tracker.reset();
        self.derivatives_tracker.reset();
        self.anomaly_detector.reset();
        tracing::info!(at = %Utc::now(), "session reset complete");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_processor() -> (
        Processor,
        tokio::sync::mpsc::UnboundedReceiver<PublishSignal>,
        tokio::sync::mpsc::UnboundedReceiver<PersistRecord>,
    ) {
        let (ntx, nrx) = tokio::sync::mpsc::unbounded_channel();
        let (ptx, prx) = tokio::sync::mpsc::unbounded_channel();
        (Processor::new(HashSet::new(), ntx, ptx), nrx, prx)
    }

    #[test]
    fn active_buy_on_vnm_scenario() {
        let (mut p, mut nrx, _prx) = new_processor();
        p.handle_quote(QuoteEvent {
            symbol: "VNM".to_string(),
            bid_price_1: 80.0,
            ask_price_1: 80.5,
            ..Default::default()
        });
        let result = p.handle_trade(TradeEvent {
            symbol: "VNM".to_string(),
            last_price: 80.5,
            last_vol: 100,
            total_vol: 100,
            total_val: 0.0,
            change: 0.0,
            ratio_change: 0.0,
            trading_session: "LO".to_string(),
        });
        let (classified, stats, basis) = result.unwrap();
        assert_eq!(classified.trade_type, crate::models::TradeType::Mua);
        assert!(basis.is_none());
        let stats = stats.unwrap();
        assert_eq!(stats.mua_vol, 100);
        assert_eq!(stats.continuous.total_vol, 100);

        // two notifies: one for the quote, one for the trade
        assert!(matches!(
            nrx.try_recv().unwrap(),
            PublishSignal::StateChanged(Channel::Market)
        ));
        assert!(matches!(
            nrx.try_recv().unwrap(),
            PublishSignal::StateChanged(Channel::Market)
        ));
    }

    #[test]
    fn ceiling_breakout_emits_alert_and_notifies_alerts_channel() {
        let (mut p, mut nrx, _prx) = new_processor();
        p.handle_quote(QuoteEvent {
            symbol: "VNM".to_string(),
            ref_price: 80.2,
            ceiling: 85.8,
            floor: 74.6,
            ..Default::default()
        });
        p.handle_trade(TradeEvent {
            symbol: "VNM".to_string(),
            last_price: 85.8,
            last_vol: 100,
            total_vol: 100,
            total_val: 0.0,
            change: 0.0,
            ratio_change: 0.0,
            trading_session: "LO".to_string(),
        });
        let alerts = p.alert_service.get_recent_alerts(10, None, None);
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].data["direction"], "ceiling");

        let mut saw_fired_alert = false;
        while let Ok(signal) = nrx.try_recv() {
            if let PublishSignal::AlertFired(alert) = signal {
                assert_eq!(alert.data["direction"], "ceiling");
                saw_fired_alert = true;
            }
        }
        assert!(saw_fired_alert);
    }

    #[test]
    fn session_reset_preserves_quote_cache() {
        let (mut p, _nrx, _prx) = new_processor();
        p.handle_quote(QuoteEvent {
            symbol: "VNM".to_string(),
            bid_price_1: 80.0,
            ask_price_1: 80.5,
            ..Default::default()
        });
        p.handle_trade(TradeEvent {
            symbol: "VNM".to_string(),
            last_price: 80.5,
            last_vol: 100,
            total_vol: 100,
            total_val: 0.0,
            change: 0.0,
            ratio_change: 0.0,
            trading_session: "LO".to_string(),
        });
        p.reset_session();
        assert_eq!(p.quote_cache.get_bid_ask("VNM"), (80.0, 80.5));
        assert!(p.session_aggregator.get("VNM").is_none());
    }

    #[test]
    fn futures_trade_is_classified_but_not_aggregated_by_session() {
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
        let result = p.handle_trade(TradeEvent {
            symbol: "VN30F2603".to_string(),
            last_price: 1260.0,
            last_vol: 10,
            total_vol: 100,
            total_val: 0.0,
            change: 0.0,
            ratio_change: 0.0,
            trading_session: "LO".to_string(),
        });
        let (_, stats, basis) = result.unwrap();
        assert!(stats.is_none());
        let basis = basis.unwrap();
        assert_eq!(basis.basis, 10.0);
        assert!(p.session_aggregator.get("VN30F2603").is_none());
    }

    #[test]
    fn watchlist_filters_unwatched_symbols_except_futures() {
        let mut watchlist = HashSet::new();
        watchlist.insert("VNM".to_string());
        let (ntx, _nrx) = tokio::sync::mpsc::unbounded_channel();
        let (ptx, _prx) = tokio::sync::mpsc::unbounded_channel();
        let mut p = Processor::new(watchlist, ntx, ptx);

        assert!(p
            .handle_trade(TradeEvent {
                symbol: "HPG".to_string(),
                last_price: 10.0,
                last_vol: 1,
                total_vol: 1,
                total_val: 0.0,
                change: 0.0,
                ratio_change: 0.0,
                trading_session: "LO".to_string(),
            })
            .is_none());
    }
}
