//! L2 archive ingestion daemon.
//!
//! Loads configuration, opens the SQLite archive, and runs one stream
//! session per configured symbol until interrupted.
//!
//! Usage:
//!   cargo run --release --bin lob-ingest -- --config ./config.json

use anyhow::{Context, Result};
use clap::Parser;
use dotenv::dotenv;
use lob_archive::config::Config;
use lob_archive::ingest::supervisor::Supervisor;
use lob_archive::logger::Logger;
use lob_archive::storage::Storage;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "lob-ingest")]
#[command(about = "Continuously archive L2 order book snapshots and diffs")]
struct Cli {
    /// Path to the JSON configuration file.
    #[arg(short, long, default_value = "config.json")]
    config: PathBuf,
}

fn load_env() {
    let _ = dotenv();
    let manifest_dir = std::path::Path::new(env!("CARGO_MANIFEST_DIR"));
    for candidate in [manifest_dir.join(".env"), manifest_dir.join("../.env")] {
        if candidate.exists() {
            let _ = dotenv::from_path(&candidate);
        }
    }
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "lob_archive=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    load_env();
    init_tracing();

    let cli = Cli::parse();
    let config = Config::load(&cli.config)
        .with_context(|| format!("loading config from {}", cli.config.display()))?;

    let db_path = config.db_path();
    info!(db_path = %db_path.display(), symbols = ?config.symbols, "starting ingestion");

    let storage = Arc::new(Storage::open(&db_path).context("opening archive database")?);
    let logger = Arc::new(Logger::new(storage.clone(), config.log_to_console));
    let supervisor = Supervisor::spawn(&config, storage, logger)?;

    tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
    info!("shutdown signal received, stopping sessions");
    supervisor.shutdown().await;

    Ok(())
}
