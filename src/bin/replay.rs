//! L2 order book replay tool.
//!
//! Reconstructs a symbol's book from archived snapshots and diffs and
//! prints it to stdout, one line per update.
//!
//! Usage:
//!   cargo run --release --bin lob-replay -- --db-path ./data/archive.db full BTCUSDT
//!   cargo run --release --bin lob-replay -- --db-path ./data/archive.db partial BTCUSDT --level 10
//!   cargo run --release --bin lob-replay -- --db-path ./data/archive.db blocks BTCUSDT

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use lob_archive::replay::data_block::all_data_blocks;
use lob_archive::replay::engine::{FullBookReplay, FullBookYield, PartialBookReplay};
use lob_archive::storage::Storage;
use std::cmp::Reverse;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "lob-replay")]
#[command(about = "Reconstruct an order book from archived snapshots and diffs")]
struct Cli {
    /// Path to the SQLite archive database.
    #[arg(long, default_value = "data/archive.db")]
    db_path: PathBuf,

    /// Resume after this update ID rather than from the start of history.
    #[arg(long, default_value_t = 0)]
    after: u64,

    /// Stop after this many yielded updates (0 means unbounded).
    #[arg(long, default_value_t = 0)]
    limit: usize,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Replay the full book: every price level on both sides.
    Full {
        symbol: String,

        /// Clone the book into each yielded step instead of borrowing it.
        #[arg(long)]
        copy: bool,
    },

    /// Replay only the top-k levels per side.
    Partial {
        symbol: String,

        /// Number of levels to report per side.
        #[arg(long, default_value_t = 10)]
        level: usize,

        /// Internal retention multiplier (levels kept = level * multiplier).
        #[arg(long)]
        level_multiplier: Option<usize>,
    },

    /// List the maximal gap-free diff ranges available for a symbol.
    Blocks { symbol: String },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let storage = Storage::open(&cli.db_path)
        .with_context(|| format!("opening archive at {}", cli.db_path.display()))?;

    match cli.command {
        Commands::Full { symbol, copy } => run_full(&storage, &symbol, cli.after, cli.limit, copy),
        Commands::Partial {
            symbol,
            level,
            level_multiplier,
        } => run_partial(&storage, &symbol, cli.after, cli.limit, level, level_multiplier),
        Commands::Blocks { symbol } => run_blocks(&storage, &symbol, cli.after),
    }
}

fn run_full(storage: &Storage, symbol: &str, after: u64, limit: usize, copy: bool) -> Result<()> {
    let mut replay = match FullBookReplay::open(storage, symbol, after, copy)? {
        Some(r) => r,
        None => {
            println!("no snapshot available for {symbol} after update {after}");
            return Ok(());
        }
    };

    let mut count = 0usize;
    while let Some(step) = replay.next() {
        let yielded = step?;
        print_full(&yielded);
        count += 1;
        if limit != 0 && count >= limit {
            break;
        }
    }
    println!("{count} updates replayed");
    Ok(())
}

fn print_full(yielded: &FullBookYield<'_>) {
    let best_bid = yielded.bids().iter().next().map(|(Reverse(p), q)| (p.0, *q));
    let best_ask = yielded.asks().iter().next().map(|(p, q)| (p.0, *q));
    println!(
        "update_id={} bids={} asks={} best_bid={:?} best_ask={:?}",
        yielded.last_update_id(),
        yielded.bids().len(),
        yielded.asks().len(),
        best_bid,
        best_ask,
    );
}

fn run_partial(
    storage: &Storage,
    symbol: &str,
    after: u64,
    limit: usize,
    level: usize,
    level_multiplier: Option<usize>,
) -> Result<()> {
    let mut replay = match PartialBookReplay::open(storage, symbol, after, level, level_multiplier)? {
        Some(r) => r,
        None => {
            println!("no snapshot available for {symbol} after update {after}");
            return Ok(());
        }
    };

    let mut count = 0usize;
    while let Some(step) = replay.next() {
        let book = step?;
        println!(
            "update_id={} {}",
            book.last_update_id,
            serde_json::to_string(&book.book)?
        );
        count += 1;
        if limit != 0 && count >= limit {
            break;
        }
    }
    println!("{count} updates replayed");
    Ok(())
}

fn run_blocks(storage: &Storage, symbol: &str, after: u64) -> Result<()> {
    let blocks = all_data_blocks(storage, symbol, after)?;
    for block in &blocks {
        println!(
            "[{:?}, {:?}] size={} snapshots={}",
            block.beginning_update_id,
            block.ending_update_id,
            block.size,
            block.block_snapshot_ids.len()
        );
    }
    println!("{} blocks", blocks.len());
    Ok(())
}
