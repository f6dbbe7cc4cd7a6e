//! Snapshot fetcher. One REST GET per call, parsed and
//! persisted directly (no batching). Grounded on `scrapers/dome_rest.rs`'s
//! `DomeRestClient`: a single shared `reqwest::Client`, `.context(...)`
//! at each fallible step, errors logged and swallowed by the caller.

use crate::logger::Logger;
use crate::model::{Level, Snapshot};
use crate::storage::Storage;
use crate::symbol::{AssetFamily, CanonicalSymbol};
use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Deserialize)]
struct DepthResponse {
    #[serde(rename = "lastUpdateId")]
    last_update_id: u64,
    bids: Vec<[String; 2]>,
    asks: Vec<[String; 2]>,
}

pub struct SnapshotFetcher {
    client: reqwest::Client,
    storage: Arc<Storage>,
    logger: Arc<Logger>,
}

impl SnapshotFetcher {
    pub fn new(storage: Arc<Storage>, logger: Arc<Logger>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .context("building snapshot HTTP client")?;
        Ok(Self {
            client,
            storage,
            logger,
        })
    }

    /// Issues one GET, persists one snapshot. Errors are logged and
    /// swallowed: a failed fetch must not block the session's schedule.
    pub async fn fetch_snapshot(
        &self,
        upstream_symbol: &str,
        family: AssetFamily,
        limit: u32,
    ) -> Result<()> {
        match self.try_fetch(upstream_symbol, family, limit).await {
            Ok(snapshot) => {
                if let Err(e) = self.storage.insert_snapshot(&snapshot) {
                    self.logger
                        .error("failed to persist snapshot", Some(e.to_string()));
                }
                Ok(())
            }
            Err(e) => {
                self.logger.error(
                    format!("snapshot fetch failed for {upstream_symbol}"),
                    Some(e.to_string()),
                );
                Ok(())
            }
        }
    }

    async fn try_fetch(
        &self,
        upstream_symbol: &str,
        family: AssetFamily,
        limit: u32,
    ) -> Result<Snapshot> {
        let response = self
            .client
            .get(family.rest_base())
            .query(&[
                ("symbol", upstream_symbol.to_string()),
                ("limit", limit.to_string()),
            ])
            .send()
            .await
            .context("sending depth request")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("depth request failed with {status}: {body}"));
        }

        let body: DepthResponse = response.json().await.context("parsing depth response")?;
        let canonical = CanonicalSymbol::new(family, upstream_symbol);

        let (bids_price, bids_quantity) = Level::into_parallel(parse_level_side(&body.bids)?);
        let (asks_price, asks_quantity) = Level::into_parallel(parse_level_side(&body.asks)?);

        Ok(Snapshot {
            ts: Utc::now(),
            last_update_id: body.last_update_id,
            bids_price,
            bids_quantity,
            asks_price,
            asks_quantity,
            symbol: canonical.to_string(),
        })
    }
}

fn parse_level_side(levels: &[[String; 2]]) -> Result<Vec<Level>> {
    levels
        .iter()
        .map(|pair| {
            Ok(Level {
                price: pair[0].parse::<f64>().context("parsing level price")?,
                quantity: pair[1].parse::<f64>().context("parsing level quantity")?,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_level_side_into_price_quantity_pairs() {
        let raw = vec![["100.5".to_string(), "2.25".to_string()]];
        let levels = parse_level_side(&raw).unwrap();
        assert_eq!(levels, vec![Level { price: 100.5, quantity: 2.25 }]);
    }

    #[test]
    fn rejects_non_numeric_level() {
        let raw = vec![["oops".to_string(), "1.0".to_string()]];
        assert!(parse_level_side(&raw).is_err());
    }
}
