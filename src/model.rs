//! Core data model: the three append-only row types shared by
//! ingestion and replay, plus the log level enum used by the logger.

use crate::symbol::CanonicalSymbol;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A full depth snapshot, self-contained and immutable once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub ts: DateTime<Utc>,
    pub last_update_id: u64,
    pub bids_price: Vec<f64>,
    pub bids_quantity: Vec<f64>,
    pub asks_price: Vec<f64>,
    pub asks_quantity: Vec<f64>,
    pub symbol: String,
}

impl Snapshot {
    /// Parallel price/quantity arrays; all quantities must be positive.
    pub fn is_valid(&self) -> bool {
        self.bids_price.len() == self.bids_quantity.len()
            && self.asks_price.len() == self.asks_quantity.len()
            && self.bids_quantity.iter().all(|&q| q > 0.0)
            && self.asks_quantity.iter().all(|&q| q > 0.0)
    }
}

/// An incremental diff-depth update. `quantity == 0` at a price level
/// encodes removal of that level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diff {
    pub ts: DateTime<Utc>,
    pub first_update_id: u64,
    pub final_update_id: u64,
    pub bids_price: Vec<f64>,
    pub bids_quantity: Vec<f64>,
    pub asks_price: Vec<f64>,
    pub asks_quantity: Vec<f64>,
    pub symbol: String,
}

impl Diff {
    pub fn is_valid(&self) -> bool {
        self.first_update_id <= self.final_update_id
            && self.bids_price.len() == self.bids_quantity.len()
            && self.asks_price.len() == self.asks_quantity.len()
    }

    pub fn canonical_symbol(&self, symbol: &CanonicalSymbol) -> Diff {
        Diff {
            symbol: symbol.to_string(),
            ..self.clone()
        }
    }
}

/// One bid or ask price level, parsed from a venue payload before being
/// split into the parallel arrays [`Snapshot`]/[`Diff`] store on disk.
/// Mirrors the teacher's `Level`/`BookLevel` pattern.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Level {
    pub price: f64,
    pub quantity: f64,
}

impl Level {
    /// Splits a list of levels into parallel price/quantity arrays, the
    /// storage layer's on-disk representation.
    pub fn into_parallel(levels: Vec<Level>) -> (Vec<f64>, Vec<f64>) {
        let mut price = Vec::with_capacity(levels.len());
        let mut quantity = Vec::with_capacity(levels.len());
        for level in levels {
            price.push(level.price);
            quantity.push(level.quantity);
        }
        (price, quantity)
    }
}

/// Log severity, mirroring Python's `logging` levels so operators
/// familiar with the original system recognize the numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u8)]
pub enum LogLevel {
    NotSet = 0,
    Debug = 10,
    Info = 20,
    Warning = 30,
    Error = 40,
    Critical = 50,
}

impl LogLevel {
    pub fn name(self) -> &'static str {
        match self {
            Self::NotSet => "NOTSET",
            Self::Debug => "DEBUG",
            Self::Info => "INFO",
            Self::Warning => "WARNING",
            Self::Error => "ERROR",
            Self::Critical => "CRITICAL",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    pub ts: DateTime<Utc>,
    pub msg: String,
    pub level: LogLevel,
    pub payload: Option<String>,
}
