//! Application configuration.
//!
//! Loaded once from `config.json` at startup and overridable by
//! environment variables, then passed explicitly into the supervisor,
//! sessions and replay constructors as an immutable value — no
//! process-wide singleton, following the teacher's `Config::from_env`
//! convention in `src/models.rs` generalized to also read a JSON file,
//! matching the original Python implementation's file+env layering.

use crate::error::{ConfigError, ConfigResult};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub api_secret: String,

    pub symbols: Vec<String>,

    #[serde(default = "default_full_fetch_interval")]
    pub full_fetch_interval: u64,
    #[serde(default = "default_full_fetch_limit")]
    pub full_fetch_limit: u32,
    #[serde(default = "default_stream_interval")]
    pub stream_interval: u64,
    #[serde(default = "default_log_to_console")]
    pub log_to_console: bool,
    #[serde(default = "default_dispatcher_buffer_size")]
    pub dispatcher_buffer_size: usize,
    #[serde(default = "default_db_name")]
    pub db_name: String,
    #[serde(default = "default_host_name")]
    pub host_name: String,
}

fn default_full_fetch_interval() -> u64 {
    3600
}
fn default_full_fetch_limit() -> u32 {
    1000
}
fn default_stream_interval() -> u64 {
    100
}
fn default_log_to_console() -> bool {
    true
}
fn default_dispatcher_buffer_size() -> usize {
    1000
}
fn default_db_name() -> String {
    "archive".to_string()
}
fn default_host_name() -> String {
    "localhost".to_string()
}

impl Config {
    /// Load `config.json` from the given path, then apply environment
    /// overrides for the fields the original implementation exposes as
    /// env-tunable.
    pub fn load(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let mut config: Config =
            serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
                path: path.display().to_string(),
                source,
            })?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("FULL_FETCH_INTERVAL") {
            if let Ok(v) = v.parse() {
                self.full_fetch_interval = v;
            }
        }
        if let Ok(v) = std::env::var("STREAM_INTERVAL") {
            if let Ok(v) = v.parse() {
                self.stream_interval = v;
            }
        }
        if let Ok(v) = std::env::var("DISPATCHER_BUFFER_SIZE") {
            if let Ok(v) = v.parse() {
                self.dispatcher_buffer_size = v;
            }
        }
        if let Ok(v) = std::env::var("LOG_TO_CONSOLE") {
            if let Ok(v) = v.parse() {
                self.log_to_console = v;
            }
        }
        if let Ok(v) = std::env::var("DB_NAME") {
            self.db_name = v;
        }
        if let Ok(v) = std::env::var("HOST_NAME") {
            self.host_name = v;
        }
    }

    fn validate(&self) -> ConfigResult<()> {
        if self.stream_interval != 100 && self.stream_interval != 1000 {
            return Err(ConfigError::InvalidStreamInterval(self.stream_interval));
        }
        if self.symbols.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "symbols",
                message: "must configure at least one symbol".to_string(),
            });
        }
        Ok(())
    }

    /// Local on-disk substitute for the original's columnar-database
    /// `(host_name, db_name)` pair — SQLite has no server host, so the
    /// two collapse onto one filesystem path, `{host_name}/{db_name}.db`.
    pub fn db_path(&self) -> std::path::PathBuf {
        std::path::Path::new(&self.host_name).join(format!("{}.db", self.db_name))
    }

    /// WebSocket stream suffix for the configured update interval.
    pub fn stream_suffix(&self) -> &'static str {
        if self.stream_interval == 1000 {
            "@depth"
        } else {
            "@depth@100ms"
        }
    }
}
