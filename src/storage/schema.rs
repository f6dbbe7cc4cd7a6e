//! Persistence schema: three append-only tables with the
//! declared order/partition keys approximated as SQLite indexes, since
//! SQLite has no native partitioning. Grounded on the teacher's
//! `L2_STORAGE_SCHEMA` constant in `backtest_v2/l2_storage.rs` — same
//! PRAGMA tuning, `CREATE TABLE IF NOT EXISTS` + index-per-access-path
//! shape.

pub const SCHEMA: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;
PRAGMA cache_size = -64000;
PRAGMA temp_store = MEMORY;

-- ==========================================================================
-- SNAPSHOT: ordered by (ts, last_update_id), partitioned by symbol.
-- ==========================================================================
CREATE TABLE IF NOT EXISTS snapshot (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    symbol TEXT NOT NULL,
    ts INTEGER NOT NULL,
    last_update_id INTEGER NOT NULL,
    bids_price TEXT NOT NULL,
    bids_quantity TEXT NOT NULL,
    asks_price TEXT NOT NULL,
    asks_quantity TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_snapshot_symbol_ts_update
    ON snapshot(symbol, ts, last_update_id);

-- ==========================================================================
-- DIFF: ordered by (ts, first_update_id, final_update_id), partitioned by
-- (week(ts), symbol). Deduplication on the order key is permitted, so
-- idempotent re-writes of the same (symbol, first_update_id,
-- final_update_id) are safe via the UNIQUE index + INSERT OR IGNORE.
-- ==========================================================================
CREATE TABLE IF NOT EXISTS diff (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    symbol TEXT NOT NULL,
    ts INTEGER NOT NULL,
    first_update_id INTEGER NOT NULL,
    final_update_id INTEGER NOT NULL,
    bids_price TEXT NOT NULL,
    bids_quantity TEXT NOT NULL,
    asks_price TEXT NOT NULL,
    asks_quantity TEXT NOT NULL
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_diff_symbol_update_range
    ON diff(symbol, first_update_id, final_update_id);

CREATE INDEX IF NOT EXISTS idx_diff_symbol_ts
    ON diff(symbol, ts, first_update_id, final_update_id);

-- ==========================================================================
-- LOG: ordered by ts.
-- ==========================================================================
CREATE TABLE IF NOT EXISTS log (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    ts INTEGER NOT NULL,
    msg TEXT NOT NULL,
    level INTEGER NOT NULL,
    payload TEXT
);

CREATE INDEX IF NOT EXISTS idx_log_ts ON log(ts);
"#;
