//! Asset-family classification and canonical symbol construction.

use serde::{Deserialize, Serialize};

/// One of the three venue asset families, each with its own REST/WS
/// endpoints and a canonical symbol prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AssetFamily {
    Spot,
    UsdFutures,
    CoinFutures,
}

impl AssetFamily {
    /// Classify a configured symbol by its prefix: `USD_` ->
    /// USD_F_ with the prefix stripped, `COIN_` -> COIN_F_ with the
    /// prefix stripped, otherwise spot.
    pub fn classify(configured: &str) -> (Self, &str) {
        if let Some(rest) = configured.strip_prefix("USD_") {
            (Self::UsdFutures, rest)
        } else if let Some(rest) = configured.strip_prefix("COIN_") {
            (Self::CoinFutures, rest)
        } else {
            (Self::Spot, configured)
        }
    }

    pub fn canonical_prefix(self) -> &'static str {
        match self {
            Self::Spot => "",
            Self::UsdFutures => "USD_F_",
            Self::CoinFutures => "COIN_F_",
        }
    }

    pub fn rest_base(self) -> &'static str {
        match self {
            Self::Spot => "https://api.binance.com/api/v3/depth",
            Self::UsdFutures => "https://fapi.binance.com/fapi/v1/depth",
            Self::CoinFutures => "https://dapi.binance.com/dapi/v1/depth",
        }
    }

    pub fn ws_base(self) -> &'static str {
        match self {
            Self::Spot => "wss://stream.binance.com:9443/ws",
            Self::UsdFutures => "wss://fstream.binance.com/ws",
            Self::CoinFutures => "wss://dstream.binance.com/ws",
        }
    }

    /// Whether this family derives `(first_update_id, final_update_id)`
    /// from `(U, u)` directly (spot) or from `(pu + 1, u)` (futures).
    pub fn uses_pu(self) -> bool {
        !matches!(self, Self::Spot)
    }
}

/// A symbol in the system's canonical namespace: `asset_prefix ·
/// upstream_symbol`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CanonicalSymbol(String);

impl CanonicalSymbol {
    pub fn new(family: AssetFamily, upstream_symbol: &str) -> Self {
        Self(format!(
            "{}{}",
            family.canonical_prefix(),
            upstream_symbol.to_uppercase()
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Recover `(AssetFamily, upstream_symbol)` from a canonical string.
    pub fn parse(canonical: &str) -> (AssetFamily, &str) {
        if let Some(rest) = canonical.strip_prefix("USD_F_") {
            (AssetFamily::UsdFutures, rest)
        } else if let Some(rest) = canonical.strip_prefix("COIN_F_") {
            (AssetFamily::CoinFutures, rest)
        } else {
            (AssetFamily::Spot, canonical)
        }
    }
}

impl std::fmt::Display for CanonicalSymbol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Configured symbol -> canonical symbol, built from the asset family and upstream symbol. This is the
/// construction the supervisor performs once per configured symbol and
/// the stream session uses for every persisted row.
pub fn canonicalize(configured: &str) -> (AssetFamily, CanonicalSymbol) {
    let (family, upstream) = AssetFamily::classify(configured);
    (family, CanonicalSymbol::new(family, upstream))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spot_has_empty_prefix() {
        let (family, canonical) = canonicalize("BTCUSDT");
        assert_eq!(family, AssetFamily::Spot);
        assert_eq!(canonical.as_str(), "BTCUSDT");
    }

    #[test]
    fn usd_futures_canonicalization() {
        let (family, canonical) = canonicalize("USD_BTCUSDT");
        assert_eq!(family, AssetFamily::UsdFutures);
        assert_eq!(canonical.as_str(), "USD_F_BTCUSDT");
    }

    #[test]
    fn coin_futures_canonicalization() {
        let (family, canonical) = canonicalize("COIN_BTCUSD");
        assert_eq!(family, AssetFamily::CoinFutures);
        assert_eq!(canonical.as_str(), "COIN_F_BTCUSD");
    }

    #[test]
    fn parse_round_trips() {
        let (family, canonical) = canonicalize("USD_ETHUSDT");
        let (parsed_family, upstream) = CanonicalSymbol::parse(canonical.as_str());
        assert_eq!(parsed_family, family);
        assert_eq!(upstream, "ETHUSDT");
    }
}
