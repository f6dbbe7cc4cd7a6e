//! Replay engine. Two concrete generators — [`FullBookReplay`]
//! and [`PartialBookReplay`] — share the five-step algorithm in
//! [`ReplayCore`], including a mid-stream re-anchor-on-intersecting-
//! snapshot behavior that the original Python `replay.py` does not
//! implement (it only anchors once, at the start).
//!
//! Grounded on the lazy, cursor-owning iterator shape of
//! `lvzzzx-chronicle-rs`'s pull-driven `StreamReader` trait in
//! `src/stream/mod.rs`, and the ordered price-map discipline of
//! `backtest_v2/book.rs`'s `OrderedPrice`, expressed here with
//! `std::cmp::Reverse` instead of a hand-rolled `is_bid` flag.

use crate::error::{ReplayError, ReplayResult};
use crate::model::{Diff, Snapshot};
use crate::storage::Storage;
use chrono::{DateTime, Utc};
use std::cmp::Reverse;
use std::collections::BTreeMap;

/// Total-ordered `f64` price wrapper. Exchange prices are never NaN, so
/// an unwrap-or-equal fallback is acceptable here.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Price(pub f64);

impl Eq for Price {}

impl PartialOrd for Price {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Price {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.partial_cmp(&other.0).unwrap_or(std::cmp::Ordering::Equal)
    }
}

/// Best bid (highest price) sorts first via `Reverse`.
pub type Bids = BTreeMap<Reverse<Price>, f64>;
/// Best ask (lowest price) sorts first.
pub type Asks = BTreeMap<Price, f64>;

pub const DEFAULT_LEVEL_MULTIPLIER: usize = 30;

pub struct FullBook {
    pub ts: DateTime<Utc>,
    pub last_update_id: u64,
    pub bids: Bids,
    pub asks: Asks,
    pub symbol: String,
}

pub struct FullBookRef<'a> {
    pub ts: DateTime<Utc>,
    pub last_update_id: u64,
    pub bids: &'a Bids,
    pub asks: &'a Asks,
    pub symbol: &'a str,
}

/// Zero-copy vs copy yield: when `return_copy` is false the caller
/// receives a [`FullBookRef`] borrowed from the generator's live books,
/// invalidated by the next call to `next`.
pub enum FullBookYield<'a> {
    Owned(FullBook),
    Ref(FullBookRef<'a>),
}

impl<'a> FullBookYield<'a> {
    pub fn last_update_id(&self) -> u64 {
        match self {
            Self::Owned(b) => b.last_update_id,
            Self::Ref(b) => b.last_update_id,
        }
    }

    pub fn bids(&self) -> &Bids {
        match self {
            Self::Owned(b) => &b.bids,
            Self::Ref(b) => b.bids,
        }
    }

    pub fn asks(&self) -> &Asks {
        match self {
            Self::Owned(b) => &b.asks,
            Self::Ref(b) => b.asks,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PartialBook {
    pub ts: DateTime<Utc>,
    pub last_update_id: u64,
    /// `[ask_1_px, ask_1_qty, bid_1_px, bid_1_qty, ask_2_px, ask_2_qty, …]`.
    pub book: Vec<f64>,
    pub symbol: String,
}

/// Shared five-step driver. Owns the live
/// books and a cursor over the pending diffs/snapshots; callers pull one
/// step at a time via [`ReplayCore::advance`].
struct ReplayCore {
    symbol: String,
    bids: Bids,
    asks: Asks,
    diffs: std::vec::IntoIter<Diff>,
    pending_snapshots: std::vec::IntoIter<Snapshot>,
    next_pending_snapshot: Option<Snapshot>,
    prev_final_update_id: Option<u64>,
    anchor_last_update_id: u64,
    anchor_ts: DateTime<Utc>,
    emitted_initial: bool,
    finished: bool,
    /// Partial replay's memory bound; `None` for full replay, which
    /// retains the entire book.
    retain_levels: Option<usize>,
}

enum Advance {
    Initial,
    Applied,
}

fn load_core(
    storage: &Storage,
    symbol: &str,
    start_update_id: u64,
    retain_levels: Option<usize>,
) -> ReplayResult<Option<ReplayCore>> {
    let mut snapshots = storage.snapshots_after(symbol, start_update_id)?;
    if snapshots.is_empty() {
        return Ok(None);
    }
    let anchor = snapshots.remove(0);
    let mut pending_snapshots = snapshots.into_iter();
    let next_pending_snapshot = pending_snapshots.next();

    let diffs = storage.diffs_from(symbol, anchor.last_update_id, None)?;

    let mut bids = Bids::new();
    for (price, qty) in anchor.bids_price.iter().zip(anchor.bids_quantity.iter()) {
        bids.insert(Reverse(Price(*price)), *qty);
    }
    let mut asks = Asks::new();
    for (price, qty) in anchor.asks_price.iter().zip(anchor.asks_quantity.iter()) {
        asks.insert(Price(*price), *qty);
    }

    Ok(Some(ReplayCore {
        symbol: symbol.to_string(),
        bids,
        asks,
        diffs: diffs.into_iter(),
        pending_snapshots,
        next_pending_snapshot,
        prev_final_update_id: None,
        anchor_last_update_id: anchor.last_update_id,
        anchor_ts: anchor.ts,
        emitted_initial: false,
        finished: false,
        retain_levels,
    }))
}

impl ReplayCore {
    fn advance(&mut self) -> Option<ReplayResult<(DateTime<Utc>, u64, Advance)>> {
        if self.finished {
            return None;
        }
        if !self.emitted_initial {
            self.emitted_initial = true;
            return Some(Ok((self.anchor_ts, self.anchor_last_update_id, Advance::Initial)));
        }

        let diff = match self.diffs.next() {
            Some(d) => d,
            None => {
                self.finished = true;
                return None;
            }
        };

        match self.prev_final_update_id {
            Some(prev) if prev + 1 != diff.first_update_id => {
                // Gap: clean termination, not an error.
                self.finished = true;
                return None;
            }
            None => {
                // Anchor sanity, first diff only.
                if self.anchor_last_update_id + 1 < diff.first_update_id
                    || self.anchor_last_update_id + 1 > diff.final_update_id
                {
                    self.finished = true;
                    return Some(Err(ReplayError::AnchorInconsistency {
                        symbol: self.symbol.clone(),
                        anchor_update_id: self.anchor_last_update_id,
                        first_update_id: diff.first_update_id,
                        final_update_id: diff.final_update_id,
                    }));
                }
            }
            _ => {}
        }

        if let Some(snapshot) = &self.next_pending_snapshot {
            if diff.first_update_id <= snapshot.last_update_id + 1
                && snapshot.last_update_id + 1 <= diff.final_update_id
            {
                self.reanchor(snapshot.clone());
                self.next_pending_snapshot = self.pending_snapshots.next();
            }
        }

        self.apply_diff(&diff);
        self.prev_final_update_id = Some(diff.final_update_id);
        Some(Ok((diff.ts, diff.final_update_id, Advance::Applied)))
    }

    fn reanchor(&mut self, snapshot: Snapshot) {
        self.bids.clear();
        self.asks.clear();
        for (price, qty) in snapshot.bids_price.iter().zip(snapshot.bids_quantity.iter()) {
            self.bids.insert(Reverse(Price(*price)), *qty);
        }
        for (price, qty) in snapshot.asks_price.iter().zip(snapshot.asks_quantity.iter()) {
            self.asks.insert(Price(*price), *qty);
        }
    }

    fn apply_diff(&mut self, diff: &Diff) {
        apply_side_reverse(&mut self.bids, &diff.bids_price, &diff.bids_quantity);
        apply_side(&mut self.asks, &diff.asks_price, &diff.asks_quantity);

        if let Some(cap) = self.retain_levels {
            truncate_top(&mut self.bids, cap);
            truncate_top(&mut self.asks, cap);
        }
    }
}

fn apply_side_reverse(book: &mut Bids, prices: &[f64], quantities: &[f64]) {
    for (price, qty) in prices.iter().zip(quantities.iter()) {
        let key = Reverse(Price(*price));
        if *qty == 0.0 {
            book.remove(&key);
        } else {
            book.insert(key, *qty);
        }
    }
}

fn apply_side(book: &mut Asks, prices: &[f64], quantities: &[f64]) {
    for (price, qty) in prices.iter().zip(quantities.iter()) {
        let key = Price(*price);
        if *qty == 0.0 {
            book.remove(&key);
        } else {
            book.insert(key, *qty);
        }
    }
}

fn truncate_top<K: Ord + Clone, V>(map: &mut BTreeMap<K, V>, cap: usize) {
    if map.len() <= cap {
        return;
    }
    let cutoff = map.keys().nth(cap).cloned();
    if let Some(cutoff) = cutoff {
        map.split_off(&cutoff);
    }
}

/// Full-book replay: yields the entire reconstructed book at every step.
pub struct FullBookReplay {
    core: ReplayCore,
    return_copy: bool,
}

impl FullBookReplay {
    pub fn open(
        storage: &Storage,
        symbol: &str,
        start_update_id: u64,
        return_copy: bool,
    ) -> ReplayResult<Option<Self>> {
        Ok(load_core(storage, symbol, start_update_id, None)?
            .map(|core| Self { core, return_copy }))
    }

    pub fn next(&mut self) -> Option<ReplayResult<FullBookYield<'_>>> {
        let (ts, last_update_id, _) = match self.core.advance()? {
            Ok(step) => step,
            Err(e) => return Some(Err(e)),
        };

        if self.return_copy {
            Some(Ok(FullBookYield::Owned(FullBook {
                ts,
                last_update_id,
                bids: self.core.bids.clone(),
                asks: self.core.asks.clone(),
                symbol: self.core.symbol.clone(),
            })))
        } else {
            Some(Ok(FullBookYield::Ref(FullBookRef {
                ts,
                last_update_id,
                bids: &self.core.bids,
                asks: &self.core.asks,
                symbol: &self.core.symbol,
            })))
        }
    }
}

/// Level-k replay: yields only the top-k bid/ask levels, interleaved
/// into a flat sequence. The internal book
/// retains `level * level_multiplier` levels per side to tolerate
/// deletes near the top without re-querying the snapshot.
pub struct PartialBookReplay {
    core: ReplayCore,
    level: usize,
}

impl PartialBookReplay {
    pub fn open(
        storage: &Storage,
        symbol: &str,
        start_update_id: u64,
        level: usize,
        level_multiplier: Option<usize>,
    ) -> ReplayResult<Option<Self>> {
        let cap = level * level_multiplier.unwrap_or(DEFAULT_LEVEL_MULTIPLIER);
        Ok(load_core(storage, symbol, start_update_id, Some(cap))?
            .map(|core| Self { core, level }))
    }

    pub fn next(&mut self) -> Option<ReplayResult<PartialBook>> {
        let (ts, last_update_id, _) = match self.core.advance()? {
            Ok(step) => step,
            Err(e) => return Some(Err(e)),
        };

        Some(Ok(PartialBook {
            ts,
            last_update_id,
            book: interleave(&self.core.bids, &self.core.asks, self.level),
            symbol: self.core.symbol.clone(),
        }))
    }
}

fn interleave(bids: &Bids, asks: &Asks, level: usize) -> Vec<f64> {
    let bid_levels: Vec<(f64, f64)> = bids
        .iter()
        .take(level)
        .map(|(Reverse(price), qty)| (price.0, *qty))
        .collect();
    let ask_levels: Vec<(f64, f64)> = asks.iter().take(level).map(|(p, q)| (p.0, *q)).collect();

    let mut out = Vec::with_capacity(level * 4);
    for i in 0..level {
        if let Some((px, qty)) = ask_levels.get(i) {
            out.push(*px);
            out.push(*qty);
        }
        if let Some((px, qty)) = bid_levels.get(i) {
            out.push(*px);
            out.push(*qty);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Diff, Snapshot};
    use crate::storage::Storage;
    use chrono::Utc;

    fn snapshot(last_update_id: u64, bids: &[(f64, f64)], asks: &[(f64, f64)]) -> Snapshot {
        Snapshot {
            ts: Utc::now(),
            last_update_id,
            bids_price: bids.iter().map(|(p, _)| *p).collect(),
            bids_quantity: bids.iter().map(|(_, q)| *q).collect(),
            asks_price: asks.iter().map(|(p, _)| *p).collect(),
            asks_quantity: asks.iter().map(|(_, q)| *q).collect(),
            symbol: "X".to_string(),
        }
    }

    fn diff(first: u64, final_: u64, bids: &[(f64, f64)], asks: &[(f64, f64)]) -> Diff {
        Diff {
            ts: Utc::now(),
            first_update_id: first,
            final_update_id: final_,
            bids_price: bids.iter().map(|(p, _)| *p).collect(),
            bids_quantity: bids.iter().map(|(_, q)| *q).collect(),
            asks_price: asks.iter().map(|(p, _)| *p).collect(),
            asks_quantity: asks.iter().map(|(_, q)| *q).collect(),
            symbol: "X".to_string(),
        }
    }

    #[test]
    fn applies_diffs_in_order_onto_the_anchor() {
        let storage = Storage::open_memory().unwrap();
        storage
            .insert_snapshot(&snapshot(10, &[(100.0, 1.0), (99.0, 2.0)], &[(101.0, 1.5)]))
            .unwrap();
        storage
            .insert_diff_batch(&[
                diff(11, 11, &[(100.0, 1.5)], &[]),
                diff(12, 12, &[], &[(101.0, 0.0), (102.0, 3.0)]),
            ])
            .unwrap();

        let mut replay = FullBookReplay::open(&storage, "X", 0, true).unwrap().unwrap();
        let initial = replay.next().unwrap().unwrap();
        assert_eq!(initial.last_update_id(), 10);

        let after_d1 = replay.next().unwrap().unwrap();
        assert_eq!(after_d1.last_update_id(), 11);

        let after_d2 = replay.next().unwrap().unwrap();
        assert_eq!(after_d2.last_update_id(), 12);
        let bids: Vec<(f64, f64)> = after_d2
            .bids()
            .iter()
            .map(|(Reverse(p), q)| (p.0, *q))
            .collect();
        assert_eq!(bids, vec![(100.0, 1.5), (99.0, 2.0)]);
        let asks: Vec<(f64, f64)> = after_d2.asks().iter().map(|(p, q)| (p.0, *q)).collect();
        assert_eq!(asks, vec![(102.0, 3.0)]);

        assert!(replay.next().is_none());
    }

    #[test]
    fn gap_terminates_cleanly() {
        let storage = Storage::open_memory().unwrap();
        storage.insert_snapshot(&snapshot(10, &[], &[])).unwrap();
        storage
            .insert_diff_batch(&[diff(11, 11, &[], &[]), diff(13, 13, &[], &[])])
            .unwrap();

        let mut replay = FullBookReplay::open(&storage, "X", 0, true).unwrap().unwrap();
        assert!(replay.next().unwrap().unwrap().last_update_id() == 10);
        assert!(replay.next().unwrap().unwrap().last_update_id() == 11);
        assert!(replay.next().is_none());
    }

    #[test]
    fn reanchor_replaces_book() {
        let storage = Storage::open_memory().unwrap();
        storage.insert_snapshot(&snapshot(10, &[(1.0, 1.0)], &[])).unwrap();
        storage
            .insert_snapshot(&snapshot(12, &[(50.0, 1.0)], &[(51.0, 1.0)]))
            .unwrap();
        storage
            .insert_diff_batch(&[diff(11, 15, &[(2.0, 1.0)], &[])])
            .unwrap();

        let mut replay = FullBookReplay::open(&storage, "X", 0, true).unwrap().unwrap();
        replay.next(); // initial, last_update_id=10
        let after = replay.next().unwrap().unwrap();
        assert_eq!(after.last_update_id(), 15);
        let bids: Vec<(f64, f64)> = after.bids().iter().map(|(Reverse(p), q)| (p.0, *q)).collect();
        // snapshot replaces the book (not merged), then the diff applies on top.
        assert_eq!(bids, vec![(50.0, 1.0), (2.0, 1.0)]);
        let asks: Vec<(f64, f64)> = after.asks().iter().map(|(p, q)| (p.0, *q)).collect();
        assert_eq!(asks, vec![(51.0, 1.0)]);
    }

    #[test]
    fn empty_snapshot_query_yields_empty_generator() {
        let storage = Storage::open_memory().unwrap();
        assert!(FullBookReplay::open(&storage, "X", 0, true).unwrap().is_none());
    }

    #[test]
    fn partial_and_full_agree_on_top_k() {
        let storage = Storage::open_memory().unwrap();
        storage
            .insert_snapshot(&snapshot(
                10,
                &[(100.0, 1.0), (99.0, 2.0), (98.0, 3.0)],
                &[(101.0, 1.0), (102.0, 2.0), (103.0, 3.0)],
            ))
            .unwrap();

        let mut full = FullBookReplay::open(&storage, "X", 0, true).unwrap().unwrap();
        let mut partial = PartialBookReplay::open(&storage, "X", 0, 2, Some(30)).unwrap().unwrap();

        let full_initial = full.next().unwrap().unwrap();
        let partial_initial = partial.next().unwrap().unwrap();

        let top_bids: Vec<(f64, f64)> = full_initial
            .bids()
            .iter()
            .take(2)
            .map(|(Reverse(p), q)| (p.0, *q))
            .collect();
        let top_asks: Vec<(f64, f64)> = full_initial.asks().iter().take(2).map(|(p, q)| (p.0, *q)).collect();

        let expected = interleave_expected(&top_bids, &top_asks);
        assert_eq!(partial_initial.book, expected);
    }

    fn interleave_expected(bids: &[(f64, f64)], asks: &[(f64, f64)]) -> Vec<f64> {
        let mut out = Vec::new();
        for i in 0..bids.len().max(asks.len()) {
            if let Some((p, q)) = asks.get(i) {
                out.push(*p);
                out.push(*q);
            }
            if let Some((p, q)) = bids.get(i) {
                out.push(*p);
                out.push(*q);
            }
        }
        out
    }
}
