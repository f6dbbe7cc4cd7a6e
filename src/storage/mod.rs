//! Persistence layer. `Storage` owns the SQLite connection and the
//! direct-write paths (snapshot, log); [`writer::BatchWriter`] owns the
//! buffered diff write path.
//!
//! Grounded on `backtest_v2/l2_storage.rs`'s `L2Storage`: `Arc<Mutex<Connection>>`,
//! `open`/`open_memory` constructors, `execute_batch` schema bootstrap,
//! `query_row` with `QueryReturnedNoRows` handled as `Option::None`.

pub mod schema;
pub mod writer;

use crate::model::{Diff, LogRecord, Snapshot};
use anyhow::{Context, Result};
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OpenFlags, Row};
use std::path::Path;
use std::sync::Arc;

pub struct Storage {
    pub(crate) conn: Arc<Mutex<Connection>>,
}

impl Storage {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).context("creating database directory")?;
            }
        }
        let conn = Connection::open_with_flags(
            path.as_ref(),
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .context("opening database")?;
        conn.execute_batch(schema::SCHEMA)
            .context("initializing schema")?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("opening in-memory database")?;
        conn.execute_batch(schema::SCHEMA)
            .context("initializing schema")?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Direct, unbatched snapshot insert.
    pub fn insert_snapshot(&self, snapshot: &Snapshot) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            r#"
            INSERT INTO snapshot (
                symbol, ts, last_update_id,
                bids_price, bids_quantity, asks_price, asks_quantity
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
            params![
                snapshot.symbol,
                snapshot.ts.timestamp_millis(),
                snapshot.last_update_id as i64,
                serde_json::to_string(&snapshot.bids_price)?,
                serde_json::to_string(&snapshot.bids_quantity)?,
                serde_json::to_string(&snapshot.asks_price)?,
                serde_json::to_string(&snapshot.asks_quantity)?,
            ],
        )?;
        Ok(())
    }

    /// Log write. Callers (the [`crate::logger::Logger`]) swallow
    /// the error; this method just reports it so the logger can decide.
    pub fn insert_log_record(&self, record: &LogRecord) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO log (ts, msg, level, payload) VALUES (?1, ?2, ?3, ?4)",
            params![
                record.ts.timestamp_millis(),
                record.msg,
                record.level as i64,
                record.payload,
            ],
        )?;
        Ok(())
    }

    /// Earliest snapshot for `symbol` with `last_update_id > after_update_id`
    /// — the replay anchor.
    pub fn earliest_snapshot_after(
        &self,
        symbol: &str,
        after_update_id: u64,
    ) -> Result<Option<Snapshot>> {
        let conn = self.conn.lock();
        let result = conn.query_row(
            r#"
            SELECT ts, last_update_id, bids_price, bids_quantity, asks_price, asks_quantity, symbol
            FROM snapshot
            WHERE symbol = ?1 AND last_update_id > ?2
            ORDER BY ts ASC
            LIMIT 1
            "#,
            params![symbol, after_update_id as i64],
            row_to_snapshot,
        );
        match result {
            Ok(snap) => Ok(Some(snap)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// All snapshots for `symbol` with `last_update_id > after_update_id`,
    /// ordered by ts — the anchor (first row) plus the `pending_snapshots`
    /// remainder used for mid-stream re-anchoring.
    pub fn snapshots_after(&self, symbol: &str, after_update_id: u64) -> Result<Vec<Snapshot>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            r#"
            SELECT ts, last_update_id, bids_price, bids_quantity, asks_price, asks_quantity, symbol
            FROM snapshot
            WHERE symbol = ?1 AND last_update_id > ?2
            ORDER BY ts ASC
            "#,
        )?;
        let rows = stmt.query_map(params![symbol, after_update_id as i64], row_to_snapshot)?;
        rows.map(|r| r.map_err(Into::into)).collect()
    }

    /// All snapshot `last_update_id`s for a symbol, in timestamp order
    /// Used by data-block discovery.
    pub fn snapshot_update_ids(&self, symbol: &str) -> Result<Vec<u64>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT last_update_id FROM snapshot WHERE symbol = ?1 ORDER BY ts ASC",
        )?;
        let rows = stmt.query_map(params![symbol], |row| row.get::<_, i64>(0))?;
        rows.map(|r| r.map(|v| v as u64).map_err(Into::into))
            .collect()
    }

    /// Diffs for `symbol` with `final_update_id >= min_final_update_id`,
    /// ordered by ts for replay streaming. `after_first_update_id` is an
    /// additional strict lower bound on `first_update_id`, used by
    /// data-block discovery to resume after a previous block.
    pub fn diffs_from(
        &self,
        symbol: &str,
        min_final_update_id: u64,
        after_first_update_id: Option<u64>,
    ) -> Result<Vec<Diff>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            r#"
            SELECT ts, first_update_id, final_update_id,
                   bids_price, bids_quantity, asks_price, asks_quantity, symbol
            FROM diff
            WHERE symbol = ?1 AND final_update_id >= ?2
                AND (?3 IS NULL OR first_update_id > ?3)
            ORDER BY ts ASC, first_update_id ASC
            "#,
        )?;
        let after = after_first_update_id.map(|v| v as i64);
        let rows = stmt.query_map(
            params![symbol, min_final_update_id as i64, after],
            row_to_diff,
        )?;
        rows.map(|r| r.map_err(Into::into)).collect()
    }

    /// Diffs for `symbol` with `first_update_id > after_update_id`,
    /// ordered by `first_update_id` — the scan order data-block discovery
    /// needs, distinct from replay's `ts`-ordered stream.
    pub fn diffs_ordered_by_first_update_id(
        &self,
        symbol: &str,
        after_update_id: u64,
    ) -> Result<Vec<Diff>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            r#"
            SELECT ts, first_update_id, final_update_id,
                   bids_price, bids_quantity, asks_price, asks_quantity, symbol
            FROM diff
            WHERE symbol = ?1 AND first_update_id > ?2
            ORDER BY first_update_id ASC
            "#,
        )?;
        let rows = stmt.query_map(params![symbol, after_update_id as i64], row_to_diff)?;
        rows.map(|r| r.map_err(Into::into)).collect()
    }

    pub(crate) fn insert_diff_batch(&self, diffs: &[Diff]) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        for diff in diffs {
            tx.execute(
                r#"
                INSERT OR IGNORE INTO diff (
                    symbol, ts, first_update_id, final_update_id,
                    bids_price, bids_quantity, asks_price, asks_quantity
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                "#,
                params![
                    diff.symbol,
                    diff.ts.timestamp_millis(),
                    diff.first_update_id as i64,
                    diff.final_update_id as i64,
                    serde_json::to_string(&diff.bids_price)?,
                    serde_json::to_string(&diff.bids_quantity)?,
                    serde_json::to_string(&diff.asks_price)?,
                    serde_json::to_string(&diff.asks_quantity)?,
                ],
            )?;
        }
        tx.commit()?;
        Ok(())
    }
}

fn ts_from_millis(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).single().unwrap_or_else(Utc::now)
}

fn row_to_snapshot(row: &Row) -> rusqlite::Result<Snapshot> {
    Ok(Snapshot {
        ts: ts_from_millis(row.get(0)?),
        last_update_id: row.get::<_, i64>(1)? as u64,
        bids_price: parse_json_vec(row, 2)?,
        bids_quantity: parse_json_vec(row, 3)?,
        asks_price: parse_json_vec(row, 4)?,
        asks_quantity: parse_json_vec(row, 5)?,
        symbol: row.get(6)?,
    })
}

fn row_to_diff(row: &Row) -> rusqlite::Result<Diff> {
    Ok(Diff {
        ts: ts_from_millis(row.get(0)?),
        first_update_id: row.get::<_, i64>(1)? as u64,
        final_update_id: row.get::<_, i64>(2)? as u64,
        bids_price: parse_json_vec(row, 3)?,
        bids_quantity: parse_json_vec(row, 4)?,
        asks_price: parse_json_vec(row, 5)?,
        asks_quantity: parse_json_vec(row, 6)?,
        symbol: row.get(7)?,
    })
}

fn parse_json_vec(row: &Row, idx: usize) -> rusqlite::Result<Vec<f64>> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_round_trip() {
        let storage = Storage::open_memory().unwrap();
        let snap = Snapshot {
            ts: Utc::now(),
            last_update_id: 10,
            bids_price: vec![100.0, 99.0],
            bids_quantity: vec![1.0, 2.0],
            asks_price: vec![101.0],
            asks_quantity: vec![1.5],
            symbol: "BTCUSDT".to_string(),
        };
        storage.insert_snapshot(&snap).unwrap();
        let loaded = storage.earliest_snapshot_after("BTCUSDT", 0).unwrap().unwrap();
        assert_eq!(loaded.last_update_id, 10);
        assert_eq!(loaded.bids_price, vec![100.0, 99.0]);
    }

    #[test]
    fn duplicate_diff_insert_is_idempotent() {
        let storage = Storage::open_memory().unwrap();
        let diff = Diff {
            ts: Utc::now(),
            first_update_id: 11,
            final_update_id: 11,
            bids_price: vec![],
            bids_quantity: vec![],
            asks_price: vec![],
            asks_quantity: vec![],
            symbol: "BTCUSDT".to_string(),
        };
        storage.insert_diff_batch(&[diff.clone()]).unwrap();
        storage.insert_diff_batch(&[diff]).unwrap();
        let diffs = storage.diffs_from("BTCUSDT", 0, None).unwrap();
        assert_eq!(diffs.len(), 1);
    }
}
