//! End-to-end integration test exercising storage + replay through the
//! public `lob_archive` API, the way a downstream consumer of the crate
//! would use it (no access to crate-internal items).

use lob_archive::model::{Diff, Snapshot};
use lob_archive::replay::engine::FullBookReplay;
use lob_archive::storage::Storage;
use tempfile::NamedTempFile;

fn snapshot(last_update_id: u64, bids: &[(f64, f64)], asks: &[(f64, f64)]) -> Snapshot {
    Snapshot {
        ts: chrono::Utc::now(),
        last_update_id,
        bids_price: bids.iter().map(|(p, _)| *p).collect(),
        bids_quantity: bids.iter().map(|(_, q)| *q).collect(),
        asks_price: asks.iter().map(|(p, _)| *p).collect(),
        asks_quantity: asks.iter().map(|(_, q)| *q).collect(),
        symbol: "BTCUSDT".to_string(),
    }
}

fn diff(first: u64, final_: u64, bids: &[(f64, f64)], asks: &[(f64, f64)]) -> Diff {
    Diff {
        ts: chrono::Utc::now(),
        first_update_id: first,
        final_update_id: final_,
        bids_price: bids.iter().map(|(p, _)| *p).collect(),
        bids_quantity: bids.iter().map(|(_, q)| *q).collect(),
        asks_price: asks.iter().map(|(p, _)| *p).collect(),
        asks_quantity: asks.iter().map(|(_, q)| *q).collect(),
        symbol: "BTCUSDT".to_string(),
    }
}

#[test]
fn ingest_then_replay_round_trip_on_disk() {
    let db_file = NamedTempFile::new().unwrap();
    let storage = Storage::open(db_file.path()).unwrap();

    storage
        .insert_snapshot(&snapshot(100, &[(50000.0, 1.0)], &[(50010.0, 1.0)]))
        .unwrap();
    storage
        .insert_diff_batch(&[diff(101, 101, &[(50000.0, 1.5)], &[])])
        .unwrap();

    let mut replay = FullBookReplay::open(&storage, "BTCUSDT", 0, true)
        .unwrap()
        .expect("a snapshot exists, so replay must open");

    let initial = replay.next().unwrap().unwrap();
    assert_eq!(initial.last_update_id(), 100);

    let after_diff = replay.next().unwrap().unwrap();
    assert_eq!(after_diff.last_update_id(), 101);
    assert_eq!(after_diff.bids().len(), 1);

    assert!(replay.next().is_none());
}

#[test]
fn replay_of_unknown_symbol_yields_no_generator() {
    let storage = Storage::open_memory().unwrap();
    assert!(FullBookReplay::open(&storage, "NOSUCHSYMBOL", 0, true)
        .unwrap()
        .is_none());
}
