//! Typed error surfaces for the parts of the system that must report
//! failures to a caller rather than log-and-continue. Everything else
//! stays inside anyhow::Result at the task level.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid value for {field}: {message}")]
    InvalidValue { field: &'static str, message: String },

    #[error("stream_interval must be 100 or 1000 ms, got {0}")]
    InvalidStreamInterval(u64),
}

/// Errors surfaced by the replay engine to its caller. Everything else
/// (gaps, empty queries) is end-of-stream, not an error — see
/// [`crate::replay::engine`].
#[derive(Error, Debug)]
pub enum ReplayError {
    #[error(
        "anchor inconsistency for {symbol}: first diff after snapshot {anchor_update_id} \
         has range [{first_update_id}, {final_update_id}]"
    )]
    AnchorInconsistency {
        symbol: String,
        anchor_update_id: u64,
        first_update_id: u64,
        final_update_id: u64,
    },

    #[error("storage error during replay: {0}")]
    Storage(#[from] anyhow::Error),
}

pub type ConfigResult<T> = std::result::Result<T, ConfigError>;
pub type ReplayResult<T> = std::result::Result<T, ReplayError>;
