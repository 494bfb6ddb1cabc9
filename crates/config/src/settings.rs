//! Settings structures for the cache, the usage buffer and the sink

use flightdeck_core::{constants::*, Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Complete flightdeck settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Single-flight composition cache
    pub cache: CacheSettings,
    /// Usage batch buffer
    pub usage: UsageSettings,
    /// ClickHouse sink
    pub clickhouse: ClickHouseSettings,
    /// Logging
    pub log: LogSettings,
}

/// Settings for the single-flight cache
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    /// Namespace for every Action Store key
    pub prefix: String,
    /// How often followers re-read an in-progress entry
    pub poll_interval_ms: u64,
    /// Upper bound of the random delay added to each poll
    pub poll_jitter_ms: u64,
    /// Leader factory deadline
    pub timeout_ms: u64,
    /// Lifetime of a cache entry, never shorter than `timeout_ms`
    pub ttl_ms: u64,
    /// Redis address; the in-process store is used when unset
    pub redis_url: Option<String>,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            prefix: DEFAULT_CACHE_PREFIX.to_string(),
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            poll_jitter_ms: DEFAULT_POLL_JITTER_MS,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            ttl_ms: DEFAULT_TTL_MS,
            redis_url: None,
        }
    }
}

impl CacheSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn poll_jitter(&self) -> Duration {
        Duration::from_millis(self.poll_jitter_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }
}

/// Settings for the usage batch buffer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UsageSettings {
    /// Maximum age of a batch before it is flushed
    pub interval_ms: u64,
    /// Batch size that forces a flush
    pub limit_in_bytes: usize,
}

impl Default for UsageSettings {
    fn default() -> Self {
        Self {
            interval_ms: DEFAULT_FLUSH_INTERVAL_MS,
            limit_in_bytes: DEFAULT_LIMIT_IN_BYTES,
        }
    }
}

impl UsageSettings {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

/// Settings for the ClickHouse HTTP sink
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClickHouseSettings {
    pub url: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub operations_table: String,
    pub registry_table: String,
    pub request_timeout_ms: u64,
    pub max_retries: usize,
}

impl Default for ClickHouseSettings {
    fn default() -> Self {
        Self {
            url: DEFAULT_CLICKHOUSE_URL.to_string(),
            username: None,
            password: None,
            operations_table: DEFAULT_OPERATIONS_TABLE.to_string(),
            registry_table: DEFAULT_REGISTRY_TABLE.to_string(),
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

impl ClickHouseSettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Logging settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    /// `EnvFilter` directive used when `RUST_LOG` is unset
    pub filter: String,
    /// Emit JSON lines instead of the compact format
    pub json: bool,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
            json: false,
        }
    }
}

impl Settings {
    /// Reject settings the runtime cannot operate with
    pub fn validate(&self) -> Result<()> {
        if self.cache.prefix.trim().is_empty() {
            return Err(Error::invalid_setting(
                "cache.prefix",
                &self.cache.prefix,
                "must not be empty",
            ));
        }
        for (key, value) in [
            ("cache.poll_interval_ms", self.cache.poll_interval_ms),
            ("cache.poll_jitter_ms", self.cache.poll_jitter_ms),
            ("cache.timeout_ms", self.cache.timeout_ms),
            ("cache.ttl_ms", self.cache.ttl_ms),
            ("usage.interval_ms", self.usage.interval_ms),
            ("clickhouse.request_timeout_ms", self.clickhouse.request_timeout_ms),
        ] {
            if value > MAX_DURATION_MS {
                return Err(Error::invalid_setting(
                    key,
                    value,
                    format!("must not exceed {MAX_DURATION_MS}"),
                ));
            }
        }
        if self.cache.poll_interval_ms == 0 {
            return Err(Error::invalid_setting(
                "cache.poll_interval_ms",
                0,
                "must be greater than zero",
            ));
        }
        if self.cache.timeout_ms == 0 {
            return Err(Error::invalid_setting(
                "cache.timeout_ms",
                0,
                "must be greater than zero",
            ));
        }
        if self.usage.interval_ms == 0 {
            return Err(Error::invalid_setting(
                "usage.interval_ms",
                0,
                "must be greater than zero",
            ));
        }
        if self.usage.limit_in_bytes == 0 {
            return Err(Error::invalid_setting(
                "usage.limit_in_bytes",
                0,
                "must be greater than zero",
            ));
        }
        if !(self.clickhouse.url.starts_with("http://")
            || self.clickhouse.url.starts_with("https://"))
        {
            return Err(Error::invalid_setting(
                "clickhouse.url",
                &self.clickhouse.url,
                "must be an http or https URL",
            ));
        }
        Ok(())
    }
}
