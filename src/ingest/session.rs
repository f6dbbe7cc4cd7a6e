//! Stream session and its reconnect state machine.
//!
//! Grounded on `scrapers/binance_session.rs` (state machine shape,
//! `BackoffCalculator` with jitter) and `scrapers/binance_hardened_ingest.rs`
//! (the `tokio_tungstenite::connect_async` + `tokio::select!` connection
//! loop). Generalized from a single bookTicker stream to diff-depth
//! frames across the three asset families, and from the teacher's
//! dedicated-OS-thread-per-symbol model to a plain `tokio::spawn` task
//! per symbol: sessions here are I/O-bound, not latency-pinned, so the
//! teacher's thread-affinity engineering is not carried forward.

use crate::ingest::snapshot::SnapshotFetcher;
use crate::logger::Logger;
use crate::model::{Diff, Level};
use crate::storage::writer::BatchWriter;
use crate::symbol::{AssetFamily, CanonicalSymbol};
use chrono::{TimeZone, Utc};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio_tungstenite::tungstenite::Message;

/// Session-level tunables not carried in [`crate::config::Config`]
/// because they are reconnect engineering, not domain configuration —
/// same split the teacher makes between `SessionConfig` (ambient) and
/// symbol/stream parameters (business config).
#[derive(Debug, Clone)]
pub struct SessionTuning {
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
    pub backoff_multiplier: f64,
    pub jitter_factor: f64,
}

impl Default for SessionTuning {
    fn default() -> Self {
        Self {
            backoff_base_ms: 100,
            backoff_max_ms: 30_000,
            backoff_multiplier: 2.0,
            jitter_factor: 0.3,
        }
    }
}

/// Top-level session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Streaming(StreamingSubState),
}

/// Sub-state of `Streaming`: whether a `prev_final_update_id` has been
/// established yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamingSubState {
    PreFirstDiff,
    InSequence,
}

/// Exponential backoff with jitter, thundering-herd safe across many
/// concurrently-reconnecting symbol sessions. Ported from
/// `BackoffCalculator` in `binance_session.rs`.
struct BackoffCalculator {
    tuning: SessionTuning,
    attempt: u32,
    rng_state: u64,
}

impl BackoffCalculator {
    fn new(tuning: SessionTuning) -> Self {
        let rng_state = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(12345);
        Self {
            tuning,
            attempt: 0,
            rng_state,
        }
    }

    fn next_random(&mut self) -> f64 {
        self.rng_state ^= self.rng_state << 13;
        self.rng_state ^= self.rng_state >> 7;
        self.rng_state ^= self.rng_state << 17;
        (self.rng_state as f64) / (u64::MAX as f64)
    }

    fn next_backoff(&mut self) -> Duration {
        let base = (self.tuning.backoff_base_ms as f64)
            * self.tuning.backoff_multiplier.powi(self.attempt as i32);
        let capped = base.min(self.tuning.backoff_max_ms as f64);
        let jitter_range = capped * self.tuning.jitter_factor;
        let jitter = (self.next_random() * 2.0 - 1.0) * jitter_range;
        let final_ms = (capped + jitter).max(self.tuning.backoff_base_ms as f64);
        self.attempt += 1;
        Duration::from_millis(final_ms as u64)
    }

    fn reset(&mut self) {
        self.attempt = 0;
    }
}

#[derive(Debug, Deserialize)]
struct DepthFrame {
    #[allow(dead_code)]
    e: String,
    #[serde(rename = "E")]
    event_time_ms: i64,
    #[serde(rename = "s")]
    #[allow(dead_code)]
    symbol: String,
    #[serde(rename = "U")]
    first_update_id: u64,
    #[serde(rename = "u")]
    final_update_id: u64,
    b: Vec<[String; 2]>,
    a: Vec<[String; 2]>,
    pu: Option<u64>,
}

pub struct StreamSession {
    pub canonical_symbol: CanonicalSymbol,
    upstream_symbol: String,
    family: AssetFamily,
    stream_suffix: &'static str,
    full_fetch_interval: Duration,
    full_fetch_limit: u32,
    writer: Arc<BatchWriter>,
    fetcher: Arc<SnapshotFetcher>,
    logger: Arc<Logger>,
    tuning: SessionTuning,
    /// Exposed for observability/tests; the session owns it exclusively
    /// — no locking needed across symbols.
    state: AtomicU64,
}

const STATE_DISCONNECTED: u64 = 0;
const STATE_CONNECTING: u64 = 1;
const STATE_STREAMING_PRE_FIRST: u64 = 2;
const STATE_STREAMING_IN_SEQUENCE: u64 = 3;

impl StreamSession {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        canonical_symbol: CanonicalSymbol,
        upstream_symbol: String,
        family: AssetFamily,
        stream_suffix: &'static str,
        full_fetch_interval: Duration,
        full_fetch_limit: u32,
        writer: Arc<BatchWriter>,
        fetcher: Arc<SnapshotFetcher>,
        logger: Arc<Logger>,
        tuning: SessionTuning,
    ) -> Self {
        Self {
            canonical_symbol,
            upstream_symbol,
            family,
            stream_suffix,
            full_fetch_interval,
            full_fetch_limit,
            writer,
            fetcher,
            logger,
            tuning,
            state: AtomicU64::new(STATE_DISCONNECTED),
        }
    }

    pub fn state(&self) -> SessionState {
        match self.state.load(Ordering::Relaxed) {
            STATE_CONNECTING => SessionState::Connecting,
            STATE_STREAMING_PRE_FIRST => SessionState::Streaming(StreamingSubState::PreFirstDiff),
            STATE_STREAMING_IN_SEQUENCE => {
                SessionState::Streaming(StreamingSubState::InSequence)
            }
            _ => SessionState::Disconnected,
        }
    }

    fn set_state(&self, state: SessionState) {
        let encoded = match state {
            SessionState::Disconnected => STATE_DISCONNECTED,
            SessionState::Connecting => STATE_CONNECTING,
            SessionState::Streaming(StreamingSubState::PreFirstDiff) => STATE_STREAMING_PRE_FIRST,
            SessionState::Streaming(StreamingSubState::InSequence) => STATE_STREAMING_IN_SEQUENCE,
        };
        self.state.store(encoded, Ordering::Relaxed);
    }

    fn ws_url(&self) -> String {
        format!(
            "{}/{}{}",
            self.family.ws_base(),
            self.upstream_symbol.to_lowercase(),
            self.stream_suffix
        )
    }

    /// Runs until `shutdown` fires. Never returns on stream failure; only
    /// supervisor teardown ends it.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut backoff = BackoffCalculator::new(self.tuning.clone());
        loop {
            if *shutdown.borrow() {
                return;
            }
            self.set_state(SessionState::Connecting);
            match self.connect_and_stream(&mut shutdown).await {
                ConnectionOutcome::Shutdown => {
                    self.set_state(SessionState::Disconnected);
                    return;
                }
                ConnectionOutcome::Disconnected => {
                    backoff.reset();
                }
                ConnectionOutcome::Failed => {
                    let delay = backoff.next_backoff();
                    self.set_state(SessionState::Disconnected);
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = shutdown.changed() => {
                            if *shutdown.borrow() {
                                return;
                            }
                        }
                    }
                }
            }
        }
    }

    async fn connect_and_stream(&self, shutdown: &mut watch::Receiver<bool>) -> ConnectionOutcome {
        let url = self.ws_url();
        let (ws_stream, _) = match tokio_tungstenite::connect_async(&url).await {
            Ok(pair) => pair,
            Err(e) => {
                self.logger.error(
                    format!("connect failed for {}", self.canonical_symbol),
                    Some(e.to_string()),
                );
                return ConnectionOutcome::Failed;
            }
        };
        let (mut write, mut read) = ws_stream.split();

        // Immediately due on connect, sub-state resets to PreFirstDiff.
        let mut next_full_fetch_due_at = Instant::now();
        let mut prev_final_update_id: Option<u64> = None;
        self.set_state(SessionState::Streaming(StreamingSubState::PreFirstDiff));

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        let _ = write.close().await;
                        return ConnectionOutcome::Shutdown;
                    }
                }
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            self.handle_text_frame(
                                &text,
                                &mut prev_final_update_id,
                                &mut next_full_fetch_due_at,
                            );
                        }
                        Some(Ok(Message::Ping(payload))) => {
                            let _ = write.send(Message::Pong(payload)).await;
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            self.logger.info(format!(
                                "stream closed for {}, reconnecting",
                                self.canonical_symbol
                            ));
                            return ConnectionOutcome::Disconnected;
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            self.logger.error(
                                format!("transport error for {}", self.canonical_symbol),
                                Some(e.to_string()),
                            );
                            return ConnectionOutcome::Failed;
                        }
                    }
                }
            }
        }
    }

    /// Parses one depth frame, derives its update-id range, gap-checks
    /// against the previous frame, and persists the resulting diff.
    fn handle_text_frame(
        &self,
        text: &str,
        prev_final_update_id: &mut Option<u64>,
        next_full_fetch_due_at: &mut Instant,
    ) {
        let frame: DepthFrame = match serde_json::from_str(text) {
            Ok(f) => f,
            Err(e) => {
                self.logger.error(
                    format!("frame parse failure for {}", self.canonical_symbol),
                    Some(format!("{e}: {text}")),
                );
                return;
            }
        };

        let (first_update_id, final_update_id) = if self.family.uses_pu() {
            match frame.pu {
                Some(pu) => (pu + 1, frame.final_update_id),
                None => {
                    // Missing `pu` can occur on the first frame of a
                    // session; skip it and wait for the next periodic
                    // snapshot to re-anchor rather than crashing.
                    self.logger.info(format!(
                        "missing pu on frame for {}, skipping until snapshot re-anchors",
                        self.canonical_symbol
                    ));
                    return;
                }
            }
        } else {
            (frame.first_update_id, frame.final_update_id)
        };

        if Instant::now() >= *next_full_fetch_due_at {
            self.logger
                .info(format!("scheduling full depth refetch for {}", self.canonical_symbol));
            let fetcher = self.fetcher.clone();
            let upstream_symbol = self.upstream_symbol.clone();
            let family = self.family;
            let limit = self.full_fetch_limit;
            tokio::spawn(async move {
                let _ = fetcher.fetch_snapshot(&upstream_symbol, family, limit).await;
            });
            // Advance by at least one interval but never re-fire
            // immediately after a long disconnect.
            *next_full_fetch_due_at =
                (*next_full_fetch_due_at + self.full_fetch_interval).max(Instant::now());
        }

        if let Some(prev) = *prev_final_update_id {
            if prev + 1 != first_update_id {
                self.logger.info(format!(
                    "LOB dropped for {}, refetching full market depth",
                    self.canonical_symbol
                ));
            }
        }

        let ts = Utc
            .timestamp_millis_opt(frame.event_time_ms)
            .single()
            .unwrap_or_else(Utc::now);

        let (bids_price, bids_quantity) = Level::into_parallel(levels(&frame.b));
        let (asks_price, asks_quantity) = Level::into_parallel(levels(&frame.a));

        let diff = Diff {
            ts,
            first_update_id,
            final_update_id,
            bids_price,
            bids_quantity,
            asks_price,
            asks_quantity,
            symbol: String::new(),
        }
        .canonical_symbol(&self.canonical_symbol);
        self.writer.insert(diff);

        *prev_final_update_id = Some(final_update_id);
        self.set_state(SessionState::Streaming(StreamingSubState::InSequence));
    }
}

enum ConnectionOutcome {
    Shutdown,
    Disconnected,
    Failed,
}

fn levels(pairs: &[[String; 2]]) -> Vec<Level> {
    pairs
        .iter()
        .filter_map(|pair| {
            let price = pair[0].parse::<f64>().ok()?;
            let quantity = pair[1].parse::<f64>().ok()?;
            Some(Level { price, quantity })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_increases_and_caps() {
        let tuning = SessionTuning {
            backoff_base_ms: 100,
            backoff_max_ms: 1000,
            backoff_multiplier: 2.0,
            jitter_factor: 0.0,
        };
        let mut calc = BackoffCalculator::new(tuning);
        let first = calc.next_backoff();
        let second = calc.next_backoff();
        assert!(second >= first);
        for _ in 0..20 {
            assert!(calc.next_backoff() <= Duration::from_millis(1000));
        }
    }

    #[test]
    fn backoff_resets_attempt_counter() {
        let tuning = SessionTuning::default();
        let mut calc = BackoffCalculator::new(tuning);
        calc.next_backoff();
        calc.next_backoff();
        assert_eq!(calc.attempt, 2);
        calc.reset();
        assert_eq!(calc.attempt, 0);
    }

    fn test_session(family: AssetFamily) -> (StreamSession, Arc<crate::storage::Storage>) {
        let storage = Arc::new(crate::storage::Storage::open_memory().unwrap());
        let logger = Arc::new(Logger::new(storage.clone(), false));
        let writer = Arc::new(BatchWriter::new(storage.clone(), 1));
        let fetcher = Arc::new(SnapshotFetcher::new(storage.clone(), logger.clone()).unwrap());
        let session = StreamSession::new(
            CanonicalSymbol::new(family, "BTCUSDT"),
            "BTCUSDT".to_string(),
            family,
            "@depth@100ms",
            Duration::from_secs(3600),
            1000,
            writer,
            fetcher,
            logger,
            SessionTuning::default(),
        );
        (session, storage)
    }

    #[test]
    fn futures_pu_mapping_derives_first_update_id() {
        // A raw depthUpdate frame with u:200, pu:195 should be parsed and
        // persisted as a diff with first_update_id=196, final_update_id=200.
        let (session, storage) = test_session(AssetFamily::UsdFutures);
        let mut prev_final_update_id = None;
        let mut next_full_fetch_due_at = Instant::now() + Duration::from_secs(3600);

        let text = r#"{"e":"depthUpdate","E":1000,"s":"BTCUSDT","U":0,"u":200,"pu":195,"b":[],"a":[]}"#;
        session.handle_text_frame(text, &mut prev_final_update_id, &mut next_full_fetch_due_at);

        let diffs = storage
            .diffs_from(session.canonical_symbol.as_str(), 0, None)
            .unwrap();
        assert_eq!(diffs.len(), 1);
        assert_eq!(diffs[0].first_update_id, 196);
        assert_eq!(diffs[0].final_update_id, 200);
        assert_eq!(prev_final_update_id, Some(200));
    }

    #[test]
    fn missing_pu_on_futures_frame_skips_without_persisting() {
        let (session, storage) = test_session(AssetFamily::UsdFutures);
        let mut prev_final_update_id = None;
        let mut next_full_fetch_due_at = Instant::now() + Duration::from_secs(3600);

        let text = r#"{"e":"depthUpdate","E":1000,"s":"BTCUSDT","U":100,"u":200,"b":[],"a":[]}"#;
        session.handle_text_frame(text, &mut prev_final_update_id, &mut next_full_fetch_due_at);

        let diffs = storage
            .diffs_from(session.canonical_symbol.as_str(), 0, None)
            .unwrap();
        assert!(diffs.is_empty());
        assert_eq!(prev_final_update_id, None);
    }

    #[test]
    fn spot_frame_uses_u_and_u_directly() {
        let (session, storage) = test_session(AssetFamily::Spot);
        let mut prev_final_update_id = None;
        let mut next_full_fetch_due_at = Instant::now() + Duration::from_secs(3600);

        let text = r#"{"e":"depthUpdate","E":1000,"s":"BTCUSDT","U":50,"u":60,"b":[["100.0","1.5"]],"a":[]}"#;
        session.handle_text_frame(text, &mut prev_final_update_id, &mut next_full_fetch_due_at);

        let diffs = storage
            .diffs_from(session.canonical_symbol.as_str(), 0, None)
            .unwrap();
        assert_eq!(diffs.len(), 1);
        assert_eq!(diffs[0].first_update_id, 50);
        assert_eq!(diffs[0].final_update_id, 60);
        assert_eq!(diffs[0].bids_price, vec![100.0]);
        assert_eq!(diffs[0].bids_quantity, vec![1.5]);
    }
}
