//! Supervisor. Spawns one session task per configured symbol
//! and runs them concurrently; sessions share no state. Grounded on the
//! teacher's per-symbol spawn pattern in `binance_hardened_ingest.rs`
//! (`start()`/`stop()`), adapted from a dedicated OS thread per symbol to
//! a `tokio::spawn` task per symbol.

use crate::config::Config;
use crate::ingest::session::{SessionTuning, StreamSession};
use crate::ingest::snapshot::SnapshotFetcher;
use crate::logger::Logger;
use crate::storage::writer::BatchWriter;
use crate::storage::Storage;
use crate::symbol::canonicalize;
use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

pub struct Supervisor {
    handles: Vec<JoinHandle<()>>,
    shutdown_tx: watch::Sender<bool>,
}

impl Supervisor {
    /// Builds one [`StreamSession`] per configured symbol and spawns all
    /// of them. Sessions do not share state.
    pub fn spawn(config: &Config, storage: Arc<Storage>, logger: Arc<Logger>) -> Result<Self> {
        let writer = Arc::new(BatchWriter::new(
            storage.clone(),
            config.dispatcher_buffer_size,
        ));
        let fetcher = Arc::new(SnapshotFetcher::new(storage.clone(), logger.clone())?);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let mut handles = Vec::with_capacity(config.symbols.len());
        for configured in &config.symbols {
            let (family, canonical) = canonicalize(configured);
            let (_, upstream_symbol) = crate::symbol::AssetFamily::classify(configured);

            let session = Arc::new(StreamSession::new(
                canonical,
                upstream_symbol.to_string(),
                family,
                config.stream_suffix(),
                Duration::from_secs(config.full_fetch_interval),
                config.full_fetch_limit,
                writer.clone(),
                fetcher.clone(),
                logger.clone(),
                SessionTuning::default(),
            ));

            let rx = shutdown_rx.clone();
            handles.push(tokio::spawn(async move {
                session.run(rx).await;
            }));
        }

        Ok(Self {
            handles,
            shutdown_tx,
        })
    }

    /// Tears down all sessions, closing their WebSockets, and waits for
    /// every task to exit.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        for handle in self.handles {
            let _ = handle.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn spawn_and_shutdown_completes_cleanly() {
        let storage = Arc::new(Storage::open_memory().unwrap());
        let logger = Arc::new(Logger::new(storage.clone(), false));
        let config = Config {
            api_key: String::new(),
            api_secret: String::new(),
            symbols: vec!["BTCUSDT".to_string()],
            full_fetch_interval: 3600,
            full_fetch_limit: 1000,
            stream_interval: 100,
            log_to_console: false,
            dispatcher_buffer_size: 1000,
            db_name: "archive".to_string(),
            host_name: "localhost".to_string(),
        };

        let supervisor = Supervisor::spawn(&config, storage, logger).unwrap();
        assert_eq!(supervisor.handles.len(), 1);
        supervisor.shutdown().await;
    }
}
