/// Constants used throughout the flightdeck codebase
// Application identity
pub const APP_NAME: &str = "flightdeck";
pub const CONFIG_FILE_NAME: &str = "config.json";

// Single-flight cache defaults
pub const DEFAULT_CACHE_PREFIX: &str = "flightdeck";
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 500;
pub const DEFAULT_POLL_JITTER_MS: u64 = 0;
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_TTL_MS: u64 = 60_000;

/// Upper bound for every millisecond duration setting (one year)
pub const MAX_DURATION_MS: u64 = 365 * 24 * 60 * 60 * 1000;

// Usage buffer defaults
pub const DEFAULT_FLUSH_INTERVAL_MS: u64 = 5_000;
pub const DEFAULT_LIMIT_IN_BYTES: usize = 10 * 1024 * 1024;

// ClickHouse defaults
pub const DEFAULT_CLICKHOUSE_URL: &str = "http://localhost:8123";
pub const DEFAULT_OPERATIONS_TABLE: &str = "operations";
pub const DEFAULT_REGISTRY_TABLE: &str = "operation_collection";
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_MAX_RETRIES: usize = 3;

// Environment variable names
pub const ENV_CONFIG_PATH: &str = "FLIGHTDECK_CONFIG";
pub const ENV_CACHE_PREFIX: &str = "FLIGHTDECK_CACHE_PREFIX";
pub const ENV_CACHE_POLL_INTERVAL_MS: &str = "FLIGHTDECK_CACHE_POLL_INTERVAL_MS";
pub const ENV_CACHE_POLL_JITTER_MS: &str = "FLIGHTDECK_CACHE_POLL_JITTER_MS";
pub const ENV_CACHE_TIMEOUT_MS: &str = "FLIGHTDECK_CACHE_TIMEOUT_MS";
pub const ENV_CACHE_TTL_MS: &str = "FLIGHTDECK_CACHE_TTL_MS";
pub const ENV_REDIS_URL: &str = "FLIGHTDECK_REDIS_URL";
pub const ENV_USAGE_INTERVAL_MS: &str = "FLIGHTDECK_USAGE_INTERVAL_MS";
pub const ENV_USAGE_LIMIT_IN_BYTES: &str = "FLIGHTDECK_USAGE_LIMIT_IN_BYTES";
pub const ENV_CLICKHOUSE_URL: &str = "FLIGHTDECK_CLICKHOUSE_URL";
pub const ENV_CLICKHOUSE_USERNAME: &str = "FLIGHTDECK_CLICKHOUSE_USERNAME";
pub const ENV_CLICKHOUSE_PASSWORD: &str = "FLIGHTDECK_CLICKHOUSE_PASSWORD";
pub const ENV_LOG_JSON: &str = "FLIGHTDECK_LOG_JSON";
