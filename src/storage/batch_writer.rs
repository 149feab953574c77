//! Batch Writer (C14, spec §4.13).
//!
//! Four bounded queues, one per destination table, each holding at most
//! 10,000 pending records; `enqueue` never blocks — a full queue drops its
//! oldest entry to make room, and a queue at capacity zero (misconfigured)
//! just drops the incoming record instead. A timer flushes every queue on a
//! fixed interval (default 1s), draining up to 500 records per table into a
//! single `rusqlite` transaction — standing in for the source's asyncpg
//! `COPY`, since nothing in this corpus carries a Postgres driver (see
//! DESIGN.md).

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use metrics::histogram;
use parking_lot::Mutex;
use rusqlite::{params, Connection};
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{error, warn};

use crate::models::{BasisPoint, ClassifiedTrade, ForeignState, IndexData};
use crate::processor::PersistRecord;

const QUEUE_CAP: usize = 10_000;
const FLUSH_BATCH: usize = 500;

struct BoundedQueue<T> {
    items: Mutex<VecDeque<T>>,
    capacity: usize,
}

impl<T> BoundedQueue<T> {
    fn new(capacity: usize) -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            capacity,
        }
    }

    fn enqueue(&self, item: T, table: &str) {
        if self.capacity == 0 {
            warn!(table, "queue capacity is zero, dropping record");
            return;
        }
        let mut items = self.items.lock();
        if items.len() >= self.capacity {
            items.pop_front();
            warn!(table, "persist queue full, dropped oldest record");
        }
        items.push_back(item);
    }

    fn drain_batch(&self, max: usize) -> Vec<T> {
        let mut items = self.items.lock();
        let n = max.min(items.len());
        items.drain(..n).collect()
    }
}

pub struct BatchWriter {
    conn: Arc<Mutex<Connection>>,
    ticks: BoundedQueue<ClassifiedTrade>,
    foreign: BoundedQueue<ForeignState>,
    indices: BoundedQueue<IndexData>,
    basis: BoundedQueue<BasisPoint>,
    flush_interval: Duration,
}

impl BatchWriter {
    pub fn new(conn: Arc<Mutex<Connection>>, flush_interval: Duration) -> Self {
        Self {
            conn,
            ticks: BoundedQueue::new(QUEUE_CAP),
            foreign: BoundedQueue::new(QUEUE_CAP),
            indices: BoundedQueue::new(QUEUE_CAP),
            basis: BoundedQueue::new(QUEUE_CAP),
            flush_interval,
        }
    }

    fn enqueue(&self, record: PersistRecord) {
        match record {
            PersistRecord::Tick(t) => self.ticks.enqueue(t, "tick_data"),
            PersistRecord::Foreign(f) => self.foreign.enqueue(f, "foreign_flow"),
            PersistRecord::Index(i) => self.indices.enqueue(i, "index_snapshots"),
            PersistRecord::Basis(b) => self.basis.enqueue(b, "derivatives"),
        }
    }

    /// Drains every queue once, writing each table's batch in its own
    /// transaction. Called on the flush timer and once more on shutdown to
    /// drain anything left pending.
    fn flush_once(&self) {
        self.flush_ticks();
        self.flush_foreign();
        self.flush_indices();
        self.flush_basis();
    }

    fn flush_ticks(&self) {
        let batch = self.ticks.drain_batch(FLUSH_BATCH);
        if batch.is_empty() {
            return;
        }
        let start = Instant::now();
        let mut conn = self.conn.lock();
        let result = (|| -> rusqlite::Result<()> {
            let tx = conn.transaction()?;
            {
                let mut stmt = tx.prepare(
                    "INSERT INTO tick_data (symbol, price, volume, value, trade_type, bid_price, ask_price, trading_session, ts)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                )?;
                for t in &batch {
                    stmt.execute(params![
                        t.symbol,
                        t.price,
                        t.volume,
                        t.value,
                        format!("{:?}", t.trade_type),
                        t.bid_price,
                        t.ask_price,
                        t.trading_session,
                        t.timestamp.to_rfc3339(),
                    ])?;
                }
            }
            tx.commit()
        })();
        if let Err(err) = result {
            error!(%err, "failed to flush tick_data batch");
        }
        histogram!("db_write_duration_seconds", "table" => "tick_data")
            .record(start.elapsed().as_secs_f64());
    }

    fn flush_foreign(&self) {
        let batch = self.foreign.drain_batch(FLUSH_BATCH);
        if batch.is_empty() {
            return;
        }
        let start = Instant::now();
        let mut conn = self.conn.lock();
        let result = (|| -> rusqlite::Result<()> {
            let tx = conn.transaction()?;
            {
                let mut stmt = tx.prepare(
                    "INSERT INTO foreign_flow (symbol, buy_vol, sell_vol, buy_val, sell_val, net_vol, net_val, total_room, current_room, ts)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                )?;
                for f in &batch {
                    stmt.execute(params![
                        f.symbol,
                        f.buy_vol,
                        f.sell_vol,
                        f.buy_val,
                        f.sell_val,
                        f.net_vol,
                        f.net_val,
                        f.total_room,
                        f.current_room,
                        f.last_updated.to_rfc3339(),
                    ])?;
                }
            }
            tx.commit()
        })();
        if let Err(err) = result {
            error!(%err, "failed to flush foreign_flow batch");
        }
        histogram!("db_write_duration_seconds", "table" => "foreign_flow")
            .record(start.elapsed().as_secs_f64());
    }

    fn flush_indices(&self) {
        let batch = self.indices.drain_batch(FLUSH_BATCH);
        if batch.is_empty() {
            return;
        }
        let start = Instant::now();
        let mut conn = self.conn.lock();
        let result = (|| -> rusqlite::Result<()> {
            let tx = conn.transaction()?;
            {
                let mut stmt = tx.prepare(
                    "INSERT INTO index_snapshots (index_id, value, change, ratio_change, volume, advances, declines, no_changes, ts)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                )?;
                for i in &batch {
                    stmt.execute(params![
                        i.index_id,
                        i.value,
                        i.change,
                        i.ratio_change,
                        i.total_volume,
                        i.advances,
                        i.declines,
                        i.no_changes,
                        i.last_updated.to_rfc3339(),
                    ])?;
                }
            }
            tx.commit()
        })();
        if let Err(err) = result {
            error!(%err, "failed to flush index_snapshots batch");
        }
        histogram!("db_write_duration_seconds", "table" => "index_snapshots")
            .record(start.elapsed().as_secs_f64());
    }

    fn flush_basis(&self) {
        let batch = self.basis.drain_batch(FLUSH_BATCH);
        if batch.is_empty() {
            return;
        }
        let start = Instant::now();
        let mut conn = self.conn.lock();
        let result = (|| -> rusqlite::Result<()> {
            let tx = conn.transaction()?;
            {
                let mut stmt = tx.prepare(
                    "INSERT INTO derivatives (futures_symbol, futures_price, spot_value, basis, basis_pct, is_premium, open_interest, ts)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                )?;
                for b in &batch {
                    stmt.execute(params![
                        b.futures_symbol,
                        b.futures_price,
                        b.spot_value,
                        b.basis,
                        b.basis_pct,
                        b.is_premium as i32,
                        // not yet available from the upstream feed, same as the source
                        0_i64,
                        b.timestamp.to_rfc3339(),
                    ])?;
                }
            }
            tx.commit()
        })();
        if let Err(err) = result {
            error!(%err, "failed to flush derivatives batch");
        }
        histogram!("db_write_duration_seconds", "table" => "derivatives")
            .record(start.elapsed().as_secs_f64());
    }

    /// Runs until `persist_rx` closes, then flushes once more to drain
    /// anything left queued before returning.
    pub async fn run(self: Arc<Self>, mut persist_rx: UnboundedReceiver<PersistRecord>) {
        let mut ticker = tokio::time::interval(self.flush_interval);
        loop {
            tokio::select! {
                record = persist_rx.recv() => {
                    match record {
                        Some(r) => self.enqueue(r),
                        None => break,
                    }
                }
                _ = ticker.tick() => {
                    self.flush_once();
                }
            }
        }
        self.flush_once();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TradeType;
    use chrono::Utc;

    fn writer() -> BatchWriter {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE tick_data (symbol TEXT, price REAL, volume INTEGER, value REAL,
             trade_type TEXT, bid_price REAL, ask_price REAL, trading_session TEXT, ts TEXT);",
        )
        .unwrap();
        BatchWriter::new(Arc::new(Mutex::new(conn)), Duration::from_secs(1))
    }

    #[test]
    fn queue_drops_oldest_when_over_capacity() {
        let q: BoundedQueue<i32> = BoundedQueue::new(2);
        q.enqueue(1, "t");
        q.enqueue(2, "t");
        q.enqueue(3, "t");
        assert_eq!(q.drain_batch(10), vec![2, 3]);
    }

    #[test]
    fn flush_ticks_writes_batch_and_empties_queue() {
        let writer = writer();
        writer.ticks.enqueue(
            ClassifiedTrade {
                symbol: "VNM".to_string(),
                price: 80.5,
                volume: 100,
                value: 8_050_000.0,
                trade_type: TradeType::Mua,
                bid_price: 80.0,
                ask_price: 80.5,
                timestamp: Utc::now(),
                trading_session: "LO".to_string(),
            },
            "tick_data",
        );
        writer.flush_ticks();
        assert_eq!(writer.ticks.drain_batch(10).len(), 0);
        let conn = writer.conn.lock();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM tick_data", [], |r| r.get(0)).unwrap();
        assert_eq!(count, 1);
    }
}
