//! Persistence layer (schema + connection setup for C14).
//!
//! The source writes these five tables via asyncpg's `COPY` protocol against
//! Postgres. Nothing in this corpus pulls in a Postgres driver (`sqlx`,
//! `tokio-postgres`, `postgres`) — every database-backed example uses
//! `rusqlite`. We keep the same five tables and the same batched-insert
//! shape, substituting one transaction per flush for `COPY` (see
//! `batch_writer`, and the note in DESIGN.md).
//!
//! `candles_1m` has no producer in this pipeline — nothing in `SPEC_FULL.md`
//! emits a `BarEvent` into the batch writer — but the table is created
//! anyway since it's part of the persisted schema the source maintains, and
//! `ingest` already parses `BarEvent` frames it isn't (yet) routed anywhere.

use std::sync::Arc;

use anyhow::{Context, Result};
use parking_lot::Mutex;
use rusqlite::{Connection, OpenFlags};
use tracing::{info, warn};

const SCHEMA_SQL: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;
PRAGMA cache_size = -64000;
PRAGMA temp_store = MEMORY;

CREATE TABLE IF NOT EXISTS tick_data (
    symbol TEXT NOT NULL,
    price REAL NOT NULL,
    volume INTEGER NOT NULL,
    value REAL NOT NULL,
    trade_type TEXT NOT NULL,
    bid_price REAL NOT NULL,
    ask_price REAL NOT NULL,
    trading_session TEXT NOT NULL,
    ts TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_tick_data_symbol_ts ON tick_data(symbol, ts DESC);

CREATE TABLE IF NOT EXISTS candles_1m (
    symbol TEXT NOT NULL,
    ts TEXT NOT NULL,
    open REAL NOT NULL,
    high REAL NOT NULL,
    low REAL NOT NULL,
    close REAL NOT NULL,
    volume INTEGER NOT NULL,
    PRIMARY KEY (symbol, ts)
);

CREATE TABLE IF NOT EXISTS foreign_flow (
    symbol TEXT NOT NULL,
    buy_vol INTEGER NOT NULL,
    sell_vol INTEGER NOT NULL,
    buy_val REAL NOT NULL,
    sell_val REAL NOT NULL,
    net_vol INTEGER NOT NULL,
    net_val REAL NOT NULL,
    total_room INTEGER NOT NULL,
    current_room INTEGER NOT NULL,
    ts TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_foreign_flow_symbol_ts ON foreign_flow(symbol, ts DESC);

CREATE TABLE IF NOT EXISTS index_snapshots (
    index_id TEXT NOT NULL,
    value REAL NOT NULL,
    change REAL NOT NULL,
    ratio_change REAL NOT NULL,
    volume INTEGER NOT NULL,
    advances INTEGER NOT NULL,
    declines INTEGER NOT NULL,
    no_changes INTEGER NOT NULL,
    ts TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_index_snapshots_id_ts ON index_snapshots(index_id, ts DESC);

CREATE TABLE IF NOT EXISTS derivatives (
    futures_symbol TEXT NOT NULL,
    futures_price REAL NOT NULL,
    spot_value REAL NOT NULL,
    basis REAL NOT NULL,
    basis_pct REAL NOT NULL,
    is_premium INTEGER NOT NULL,
    open_interest INTEGER NOT NULL DEFAULT 0,
    ts TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_derivatives_symbol_ts ON derivatives(futures_symbol, ts DESC);
"#;

/// Owns the SQLite connection used for both writes (via the batch writer)
/// and read-only history queries (via the HTTP surface). `rusqlite`'s
/// `Connection` isn't `Sync`, hence the mutex.
pub struct Db {
    conn: Arc<Mutex<Connection>>,
}

impl Db {
    pub fn open(path: &str) -> Result<Self> {
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        let conn = Connection::open_with_flags(path, flags)
            .with_context(|| format!("failed to open database at {path}"))?;
        conn.execute_batch(SCHEMA_SQL)
            .context("failed to initialize database schema")?;

        let journal_mode: String = conn
            .query_row("PRAGMA journal_mode", [], |row| row.get(0))
            .unwrap_or_default();
        if journal_mode.to_lowercase() != "wal" {
            warn!(%journal_mode, "WAL mode not active");
        }
        info!(%path, "database initialized");

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn conn(&self) -> Arc<Mutex<Connection>> {
        self.conn.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opening_creates_all_five_tables() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let db = Db::open(file.path().to_str().unwrap()).unwrap();
        let conn = db.conn();
        let conn = conn.lock();
        for table in ["tick_data", "candles_1m", "foreign_flow", "index_snapshots", "derivatives"] {
            let count: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?1",
                    [table],
                    |row| row.get(0),
                )
                .unwrap();
            assert_eq!(count, 1, "missing table {table}");
        }
    }
}
