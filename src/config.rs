//! Runtime settings, read from the environment.

use std::env;
use std::time::Duration;

use thiserror::Error;

pub const DEFAULT_BATCH_CAP: usize = 500;
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(10);
pub const DEFAULT_SYNC_INTERVAL: Duration = Duration::from_secs(1);
pub const DEFAULT_COMPENSATION_INTERVAL: Duration = Duration::from_secs(10 * 60);
pub const DEFAULT_COMPENSATION_LIMIT: usize = 10;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value '{value}' for {key}")]
    Invalid { key: &'static str, value: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerConfig {
    /// Upper bound of records per insert and of balances per update.
    pub batch_cap: usize,
    /// Sleep of the record flusher when the queue is empty.
    pub flush_interval: Duration,
    /// Sleep of the balance synchronizer when nothing is dirty.
    pub sync_interval: Duration,
    pub compensation_interval: Duration,
    /// Records reversed per compensation cycle.
    pub compensation_limit: usize,
    /// `None` means unlimited.
    pub max_users: Option<usize>,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            batch_cap: DEFAULT_BATCH_CAP,
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            sync_interval: DEFAULT_SYNC_INTERVAL,
            compensation_interval: DEFAULT_COMPENSATION_INTERVAL,
            compensation_limit: DEFAULT_COMPENSATION_LIMIT,
            max_users: None,
        }
    }
}

impl LedgerConfig {
    /// Defaults overridden by `LEDGER_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for each `LEDGER_*` key.
    /// Blank values are treated as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &'static str| -> Result<Option<u64>, ConfigError> {
            let Some(raw) = lookup(key).filter(|v| !v.trim().is_empty()) else {
                return Ok(None);
            };
            match raw.trim().parse::<u64>() {
                Ok(value) if value > 0 => Ok(Some(value)),
                _ => Err(ConfigError::Invalid { key, value: raw }),
            }
        };

        let mut config = Self::default();
        if let Some(cap) = get("LEDGER_BATCH_CAP")? {
            config.batch_cap = cap as usize;
        }
        if let Some(ms) = get("LEDGER_FLUSH_INTERVAL_MS")? {
            config.flush_interval = Duration::from_millis(ms);
        }
        if let Some(ms) = get("LEDGER_SYNC_INTERVAL_MS")? {
            config.sync_interval = Duration::from_millis(ms);
        }
        if let Some(secs) = get("LEDGER_COMPENSATION_INTERVAL_SECS")? {
            config.compensation_interval = Duration::from_secs(secs);
        }
        if let Some(limit) = get("LEDGER_COMPENSATION_LIMIT")? {
            config.compensation_limit = limit as usize;
        }
        config.max_users = get("LEDGER_MAX_USERS")?.map(|n| n as usize);
        Ok(config)
    }
}
