//! Runtime configuration.
//!
//! Configuration is loaded from environment variables with fallback to defaults.
//!
//! | Variable | Default |
//! |---|---|
//! | `STOCKLINE_DB_PATH` | `stockline.db` |
//! | `STOCKLINE_MAX_CONNECTIONS` | `5` |
//! | `STOCKLINE_BUSY_TIMEOUT_MS` | `5000` |
//! | `STOCKLINE_LOG` | `info,stockline_db=debug,sqlx=warn` |

use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::pool::DbConfig;

const DEFAULT_DB_PATH: &str = "stockline.db";
const DEFAULT_LOG_FILTER: &str = "info,stockline_db=debug,sqlx=warn";

/// Stockline runtime configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StocklineConfig {
    /// SQLite database file
    pub db_path: PathBuf,

    /// Pool size; one connection per concurrent terminal is plenty
    pub max_connections: u32,

    /// How long a writer waits for SQLite's write lock
    pub busy_timeout_ms: u64,

    /// `tracing` filter used when `RUST_LOG` is unset
    pub log_filter: String,
}

impl Default for StocklineConfig {
    fn default() -> Self {
        StocklineConfig {
            db_path: PathBuf::from(DEFAULT_DB_PATH),
            max_connections: 5,
            busy_timeout_ms: 5_000,
            log_filter: DEFAULT_LOG_FILTER.to_string(),
        }
    }
}

impl StocklineConfig {
    /// Load configuration from environment variables.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from any key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = StocklineConfig::default();

        let config = StocklineConfig {
            db_path: lookup("STOCKLINE_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.db_path),

            max_connections: match lookup("STOCKLINE_MAX_CONNECTIONS") {
                Some(raw) => raw.trim().parse().map_err(|_| {
                    ConfigError::InvalidValue("STOCKLINE_MAX_CONNECTIONS".to_string())
                })?,
                None => defaults.max_connections,
            },

            busy_timeout_ms: match lookup("STOCKLINE_BUSY_TIMEOUT_MS") {
                Some(raw) => raw.trim().parse().map_err(|_| {
                    ConfigError::InvalidValue("STOCKLINE_BUSY_TIMEOUT_MS".to_string())
                })?,
                None => defaults.busy_timeout_ms,
            },

            log_filter: lookup("STOCKLINE_LOG").unwrap_or(defaults.log_filter),
        };

        if config.max_connections == 0 {
            return Err(ConfigError::InvalidValue(
                "STOCKLINE_MAX_CONNECTIONS".to_string(),
            ));
        }
        if config.db_path.as_os_str().is_empty() {
            return Err(ConfigError::MissingRequired("STOCKLINE_DB_PATH".to_string()));
        }

        Ok(config)
    }

    /// Pool settings for [`crate::Database::new`].
    pub fn into_db_config(self) -> DbConfig {
        DbConfig::new(self.db_path)
            .max_connections(self.max_connections)
            .busy_timeout(Duration::from_millis(self.busy_timeout_ms))
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {0}")]
    InvalidValue(String),

    #[error("Missing required configuration: {0}")]
    MissingRequired(String),
}
