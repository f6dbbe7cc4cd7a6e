//! Structured logger. Writes a [`LogRecord`] to the `log`
//! table and, when enabled, a formatted line via `tracing`. Log writes
//! must never propagate a failure into the caller: DB insert errors
//! are swallowed here, mirroring the teacher's pervasive `let _ = ...`
//! treatment of non-critical writes throughout `l2_storage.rs`.

use crate::model::{LogLevel, LogRecord};
use crate::storage::Storage;
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

pub struct Logger {
    storage: Arc<Storage>,
    log_to_console: bool,
}

impl Logger {
    pub fn new(storage: Arc<Storage>, log_to_console: bool) -> Self {
        Self {
            storage,
            log_to_console,
        }
    }

    pub fn log(&self, msg: impl Into<String>, level: LogLevel, payload: Option<String>) {
        let msg = msg.into();
        let record = LogRecord {
            ts: Utc::now(),
            msg: msg.clone(),
            level,
            payload: payload.clone(),
        };

        if let Err(e) = self.storage.insert_log_record(&record) {
            // Never propagate: a broken logger must not take down ingestion.
            if self.log_to_console {
                warn!(error = %e, "failed to persist log record");
            }
        }

        if self.log_to_console {
            match level {
                LogLevel::NotSet | LogLevel::Debug => debug!(%msg, payload = payload.as_deref()),
                LogLevel::Info => info!(%msg, payload = payload.as_deref()),
                LogLevel::Warning => warn!(%msg, payload = payload.as_deref()),
                LogLevel::Error | LogLevel::Critical => error!(%msg, payload = payload.as_deref()),
            }
        }
    }

    pub fn info(&self, msg: impl Into<String>) {
        self.log(msg, LogLevel::Info, None);
    }

    pub fn warning(&self, msg: impl Into<String>) {
        self.log(msg, LogLevel::Warning, None);
    }

    pub fn error(&self, msg: impl Into<String>, payload: Option<String>) {
        self.log(msg, LogLevel::Error, payload);
    }
}
