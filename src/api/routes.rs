//! Read-only history endpoints (C19, SPEC_FULL.md §10.5).
//!
//! Thin views over the tables `storage::batch_writer::BatchWriter` fills.
//! Mirrors the teacher's `get_signals()` shape: a typed query extractor, a
//! direct synchronous call against the store, a typed JSON response. Replies
//! `503` with `"database unavailable"` whenever `AppState.db` is `None`
//! (§7.2's persistent-storage-unavailable case).

use axum::extract::{Query, State as AxumState};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::{Deserialize, Serialize};

use crate::AppState;

const DEFAULT_LIMIT: usize = 200;
const MAX_LIMIT: usize = 2_000;

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub symbol: Option<String>,
    pub limit: Option<usize>,
}

impl HistoryQuery {
    fn limit(&self) -> usize {
        self.limit.unwrap_or(DEFAULT_LIMIT).min(MAX_LIMIT)
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

fn database_unavailable() -> Response {
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(ErrorBody {
            error: "database unavailable".to_string(),
        }),
    )
        .into_response()
}

#[derive(Debug, Serialize)]
pub struct TickRecord {
    pub symbol: String,
    pub price: f64,
    pub volume: i64,
    pub value: f64,
    pub trade_type: String,
    pub bid_price: f64,
    pub ask_price: f64,
    pub trading_session: String,
    pub ts: String,
}

/// `GET /api/history/ticks?symbol=VNM&limit=200`
pub async fn tick_history(
    Query(params): Query<HistoryQuery>,
    AxumState(state): AxumState<AppState>,
) -> Response {
    let Some(db) = state.db.clone() else {
        return database_unavailable();
    };
    let conn = db.conn();
    let conn = conn.lock();

    let limit = params.limit() as i64;
    let result = if let Some(symbol) = &params.symbol {
        let mut stmt = match conn.prepare(
            "SELECT symbol, price, volume, value, trade_type, bid_price, ask_price, trading_session, ts
             FROM tick_data WHERE symbol = ?1 ORDER BY ts DESC LIMIT ?2",
        ) {
            Ok(s) => s,
            Err(err) => return query_failed(err),
        };
        stmt.query_map(rusqlite::params![symbol, limit], tick_from_row)
            .and_then(|rows| rows.collect::<Result<Vec<_>, _>>())
    } else {
        let mut stmt = match conn.prepare(
            "SELECT symbol, price, volume, value, trade_type, bid_price, ask_price, trading_session, ts
             FROM tick_data ORDER BY ts DESC LIMIT ?1",
        ) {
            Ok(s) => s,
            Err(err) => return query_failed(err),
        };
        stmt.query_map(rusqlite::params![limit], tick_from_row)
            .and_then(|rows| rows.collect::<Result<Vec<_>, _>>())
    };

    match result {
        Ok(rows) => Json(rows).into_response(),
        Err(err) => query_failed(err),
    }
}

fn tick_from_row(row: &rusqlite::Row) -> rusqlite::Result<TickRecord> {
    Ok(TickRecord {
        symbol: row.get(0)?,
        price: row.get(1)?,
        volume: row.get(2)?,
        value: row.get(3)?,
        trade_type: row.get(4)?,
        bid_price: row.get(5)?,
        ask_price: row.get(6)?,
        trading_session: row.get(7)?,
        ts: row.get(8)?,
    })
}

#[derive(Debug, Serialize)]
pub struct CandleRecord {
    pub symbol: String,
    pub ts: String,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: i64,
}

/// `GET /api/history/candles?symbol=VNM&limit=200`
pub async fn candle_history(
    Query(params): Query<HistoryQuery>,
    AxumState(state): AxumState<AppState>,
) -> Response {
    let Some(db) = state.db.clone() else {
        return database_unavailable();
    };
    let conn = db.conn();
    let conn = conn.lock();
    let limit = params.limit() as i64;

    let result = if let Some(symbol) = &params.symbol {
        let mut stmt = match conn.prepare(
            "SELECT symbol, ts, open, high, low, close, volume
             FROM candles_1m WHERE symbol = ?1 ORDER BY ts DESC LIMIT ?2",
        ) {
            Ok(s) => s,
            Err(err) => return query_failed(err),
        };
        stmt.query_map(rusqlite::params![symbol, limit], candle_from_row)
            .and_then(|rows| rows.collect::<Result<Vec<_>, _>>())
    } else {
        let mut stmt = match conn.prepare(
            "SELECT symbol, ts, open, high, low, close, volume
             FROM candles_1m ORDER BY ts DESC LIMIT ?1",
        ) {
            Ok(s) => s,
            Err(err) => return query_failed(err),
        };
        stmt.query_map(rusqlite::params![limit], candle_from_row)
            .and_then(|rows| rows.collect::<Result<Vec<_>, _>>())
    };

    match result {
        Ok(rows) => Json(rows).into_response(),
        Err(err) => query_failed(err),
    }
}

fn candle_from_row(row: &rusqlite::Row) -> rusqlite::Result<CandleRecord> {
    Ok(CandleRecord {
        symbol: row.get(0)?,
        ts: row.get(1)?,
        open: row.get(2)?,
        high: row.get(3)?,
        low: row.get(4)?,
        close: row.get(5)?,
        volume: row.get(6)?,
    })
}

#[derive(Debug, Serialize)]
pub struct ForeignRecord {
    pub symbol: String,
    pub buy_vol: i64,
    pub sell_vol: i64,
    pub buy_val: f64,
    pub sell_val: f64,
    pub net_vol: i64,
    pub net_val: f64,
    pub total_room: i64,
    pub current_room: i64,
    pub ts: String,
}

/// `GET /api/history/foreign?symbol=VNM&limit=200`
pub async fn foreign_history(
    Query(params): Query<HistoryQuery>,
    AxumState(state): AxumState<AppState>,
) -> Response {
    let Some(db) = state.db.clone() else {
        return database_unavailable();
    };
    let conn = db.conn();
    let conn = conn.lock();
    let limit = params.limit() as i64;

    let result = if let Some(symbol) = &params.symbol {
        let mut stmt = match conn.prepare(
            "SELECT symbol, buy_vol, sell_vol, buy_val, sell_val, net_vol, net_val, total_room, current_room, ts
             FROM foreign_flow WHERE symbol = ?1 ORDER BY ts DESC LIMIT ?2",
        ) {
            Ok(s) => s,
            Err(err) => return query_failed(err),
        };
        stmt.query_map(rusqlite::params![symbol, limit], foreign_from_row)
            .and_then(|rows| rows.collect::<Result<Vec<_>, _>>())
    } else {
        let mut stmt = match conn.prepare(
            "SELECT symbol, buy_vol, sell_vol, buy_val, sell_val, net_vol, net_val, total_room, current_room, ts
             FROM foreign_flow ORDER BY ts DESC LIMIT ?1",
        ) {
            Ok(s) => s,
            Err(err) => return query_failed(err),
        };
        stmt.query_map(rusqlite::params![limit], foreign_from_row)
            .and_then(|rows| rows.collect::<Result<Vec<_>, _>>())
    };

    match result {
        Ok(rows) => Json(rows).into_response(),
        Err(err) => query_failed(err),
    }
}

fn foreign_from_row(row: &rusqlite::Row) -> rusqlite::Result<ForeignRecord> {
    Ok(ForeignRecord {
        symbol: row.get(0)?,
        buy_vol: row.get(1)?,
        sell_vol: row.get(2)?,
        buy_val: row.get(3)?,
        sell_val: row.get(4)?,
        net_vol: row.get(5)?,
        net_val: row.get(6)?,
        total_room: row.get(7)?,
        current_room: row.get(8)?,
        ts: row.get(9)?,
    })
}

fn query_failed(err: rusqlite::Error) -> Response {
    tracing::error!(%err, "history query failed");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorBody {
            error: "query failed".to_string(),
        }),
    )
        .into_response()
}

#[derive(Debug, Serialize)]
pub struct HealthBody {
    pub status: &'static str,
    pub db_available: bool,
    pub upstream_connected: bool,
}

/// `GET /health` — operator liveness check, not part of spec.md's core but
/// present on the source's own health surface (SPEC_FULL.md §10.4).
pub async fn health(AxumState(state): AxumState<AppState>) -> Json<HealthBody> {
    Json(HealthBody {
        status: "ok",
        db_available: state.db.is_some(),
        upstream_connected: state.upstream_connected.load(std::sync::atomic::Ordering::Relaxed),
    })
}

/// `GET /metrics` — Prometheus text exposition format.
pub async fn metrics_endpoint(AxumState(state): AxumState<AppState>) -> impl IntoResponse {
    state.metrics_handle.render()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn history_query_limit_is_capped() {
        let q = HistoryQuery {
            symbol: None,
            limit: Some(999_999),
        };
        assert_eq!(q.limit(), MAX_LIMIT);
    }

    #[test]
    fn history_query_defaults_when_absent() {
        let q = HistoryQuery {
            symbol: None,
            limit: None,
        };
        assert_eq!(q.limit(), DEFAULT_LIMIT);
    }
}
