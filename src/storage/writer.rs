//! Batching writer. Buffers diff rows and flushes the whole
//! buffer in one transaction when `dispatcher_buffer_size` is reached.
//! On flush failure the buffer is retained and the next `insert` retries
//! opportunistically — grounded on `backtest_v2/l2_storage.rs`'s
//! `store_delta_batch` (batched transaction) and on the original
//! `DiffDepthStreamDispatcher.insert_to_db`, whose `try/except` keeps the
//! buffer intact across a failed write.

use super::Storage;
use crate::model::Diff;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::warn;

pub struct BatchWriter {
    storage: Arc<Storage>,
    buffer: Mutex<Vec<Diff>>,
    buffer_size: usize,
}

impl BatchWriter {
    pub fn new(storage: Arc<Storage>, buffer_size: usize) -> Self {
        Self {
            storage,
            buffer: Mutex::new(Vec::with_capacity(buffer_size)),
            buffer_size,
        }
    }

    /// Buffer one row; flush when the buffer reaches `buffer_size`.
    /// There is no synchronous flush API exposed to callers.
    pub fn insert(&self, diff: Diff) {
        let mut buffer = self.buffer.lock();
        buffer.push(diff);
        if buffer.len() >= self.buffer_size {
            self.flush_locked(&mut buffer);
        }
    }

    fn flush_locked(&self, buffer: &mut Vec<Diff>) {
        match self.storage.insert_diff_batch(buffer) {
            Ok(()) => buffer.clear(),
            Err(e) => {
                warn!(error = %e, buffered = buffer.len(), "diff batch flush failed, buffer retained");
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn buffered_len(&self) -> usize {
        self.buffer.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn make_diff(first: u64, final_: u64) -> Diff {
        Diff {
            ts: Utc::now(),
            first_update_id: first,
            final_update_id: final_,
            bids_price: vec![],
            bids_quantity: vec![],
            asks_price: vec![],
            asks_quantity: vec![],
            symbol: "BTCUSDT".to_string(),
        }
    }

    #[test]
    fn flushes_at_threshold() {
        let storage = Arc::new(Storage::open_memory().unwrap());
        let writer = BatchWriter::new(storage.clone(), 2);
        writer.insert(make_diff(1, 1));
        assert_eq!(writer.buffered_len(), 1);
        writer.insert(make_diff(2, 2));
        assert_eq!(writer.buffered_len(), 0);
        assert_eq!(storage.diffs_from("BTCUSDT", 0, None).unwrap().len(), 2);
    }

    #[test]
    fn retains_buffer_below_threshold() {
        let storage = Arc::new(Storage::open_memory().unwrap());
        let writer = BatchWriter::new(storage, 10);
        writer.insert(make_diff(1, 1));
        writer.insert(make_diff(2, 2));
        assert_eq!(writer.buffered_len(), 2);
    }

    #[test]
    fn retains_buffer_on_flush_failure_then_succeeds_on_retry() {
        let storage = Arc::new(Storage::open_memory().unwrap());
        {
            let conn = storage.conn.lock();
            conn.execute("DROP TABLE diff", []).unwrap();
        }
        let writer = BatchWriter::new(storage.clone(), 1);
        writer.insert(make_diff(1, 1));
        // Flush failed (table missing); buffer must be retained, not dropped.
        assert_eq!(writer.buffered_len(), 1);

        {
            let conn = storage.conn.lock();
            conn.execute_batch(super::super::schema::SCHEMA).unwrap();
        }
        writer.insert(make_diff(2, 2));
        // The retained row plus the new one both flush once the table exists again.
        assert_eq!(writer.buffered_len(), 0);
        assert_eq!(storage.diffs_from("BTCUSDT", 0, None).unwrap().len(), 2);
    }
}
