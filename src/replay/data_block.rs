//! Data-block discovery: partitioning a symbol's persisted diff history
//! into maximal gap-free contiguous ranges usable for replay. No direct
//! teacher counterpart — the query shape follows `backtest_v2/l2_replay.rs`'s
//! load-then-scan pattern, generalized to this system's continuity and
//! re-anchor bookkeeping.

use crate::model::Diff;
use crate::storage::Storage;
use anyhow::Result;
use chrono::{DateTime, Utc};

#[derive(Debug, Clone, PartialEq)]
pub struct DataBlock {
    pub symbol: String,
    pub beginning_update_id: Option<u64>,
    pub ending_update_id: Option<u64>,
    pub size: usize,
    pub beginning_timestamp: Option<DateTime<Utc>>,
    pub ending_timestamp: Option<DateTime<Utc>>,
    pub block_snapshot_ids: Vec<u64>,
}

impl DataBlock {
    pub fn is_empty(&self) -> bool {
        self.size == 0
    }
}

/// Scans the `diff` table for `symbol` ordered by `first_update_id`,
/// starting strictly after `after_update_id`, and returns the maximal
/// continuous prefix.
pub fn discover_block(storage: &Storage, symbol: &str, after_update_id: u64) -> Result<DataBlock> {
    let rows = storage.diffs_ordered_by_first_update_id(symbol, after_update_id)?;

    let mut continuous: Vec<&Diff> = Vec::new();
    let mut prev_final_update_id: Option<u64> = None;
    for row in &rows {
        if let Some(prev) = prev_final_update_id {
            if prev + 1 != row.first_update_id {
                break;
            }
        }
        prev_final_update_id = Some(row.final_update_id);
        continuous.push(row);
    }

    if continuous.is_empty() {
        return Ok(DataBlock {
            symbol: symbol.to_string(),
            beginning_update_id: None,
            ending_update_id: None,
            size: 0,
            beginning_timestamp: None,
            ending_timestamp: None,
            block_snapshot_ids: Vec::new(),
        });
    }

    let beginning_update_id = continuous.first().unwrap().first_update_id;
    let ending_update_id = continuous.last().unwrap().final_update_id;
    let beginning_timestamp = continuous.first().unwrap().ts;
    let ending_timestamp = continuous.last().unwrap().ts;

    let block_snapshot_ids = storage
        .snapshot_update_ids(symbol)?
        .into_iter()
        .filter(|id| beginning_update_id <= id + 1 && id + 1 <= ending_update_id)
        .collect();

    Ok(DataBlock {
        symbol: symbol.to_string(),
        beginning_update_id: Some(beginning_update_id),
        ending_update_id: Some(ending_update_id),
        size: continuous.len(),
        beginning_timestamp: Some(beginning_timestamp),
        ending_timestamp: Some(ending_timestamp),
        block_snapshot_ids,
    })
}

/// Repeatedly builds blocks, using each block's `ending_update_id` as
/// the next anchor, until an empty block is produced.
pub fn all_data_blocks(storage: &Storage, symbol: &str, start: u64) -> Result<Vec<DataBlock>> {
    let mut blocks = Vec::new();
    let mut after = start;
    loop {
        let block = discover_block(storage, symbol, after)?;
        if block.is_empty() {
            break;
        }
        after = block.ending_update_id.unwrap();
        blocks.push(block);
    }
    Ok(blocks)
}
