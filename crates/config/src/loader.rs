//! Settings loader with precedence tracking

use crate::settings::Settings;
use flightdeck_core::{constants::*, Error, Result};
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Where the effective value of the settings came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    /// Built-in defaults only
    Default,
    /// A JSON config file
    ConfigFile(PathBuf),
    /// Environment variables
    EnvironmentVariable(Vec<String>),
}

/// Settings together with the layers that produced them
#[derive(Debug, Clone)]
pub struct LoadedSettings {
    pub settings: Settings,
    pub sources: Vec<ConfigSource>,
}

/// Loads settings from defaults, an optional file and the environment
pub struct ConfigLoader {
    /// Explicit config file; falls back to `FLIGHTDECK_CONFIG` then the XDG path
    path: Option<PathBuf>,
    /// Whether `FLIGHTDECK_*` variables are consulted
    use_env: bool,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self {
            path: None,
            use_env: true,
        }
    }

    /// Use this config file instead of the default location
    pub fn path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Disable environment overrides
    pub fn without_env(mut self) -> Self {
        self.use_env = false;
        self
    }

    /// Load and validate the settings
    pub fn load(self) -> Result<LoadedSettings> {
        self.load_with(|key| std::env::var(key).ok())
    }

    /// Load using a custom variable lookup instead of the process environment
    pub fn load_with<F>(self, lookup: F) -> Result<LoadedSettings>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut settings = Settings::default();
        let mut sources = vec![ConfigSource::Default];

        let path = match self.path {
            Some(path) => Some(path),
            None if self.use_env => lookup(ENV_CONFIG_PATH).map(PathBuf::from),
            None => None,
        };
        let (path, required) = match path {
            Some(path) => (Some(path), true),
            None => (default_config_path(), false),
        };

        if let Some(path) = path {
            if path.exists() {
                settings = read_config_file(&path)?;
                tracing::debug!(path = %path.display(), "loaded config file");
                sources.push(ConfigSource::ConfigFile(path));
            } else if required {
                return Err(Error::file_system(
                    path,
                    "read config file",
                    std::io::Error::new(std::io::ErrorKind::NotFound, "config file not found"),
                ));
            }
        }

        if self.use_env {
            let applied = apply_env(&mut settings, &lookup)?;
            if !applied.is_empty() {
                tracing::debug!(variables = ?applied, "applied environment overrides");
                sources.push(ConfigSource::EnvironmentVariable(applied));
            }
        }

        settings.validate()?;
        Ok(LoadedSettings { settings, sources })
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

/// `$XDG_CONFIG_HOME/flightdeck/config.json`, or the platform config dir
pub fn default_config_path() -> Option<PathBuf> {
    let config_dir = match std::env::var("XDG_CONFIG_HOME") {
        Ok(dir) if !dir.is_empty() => PathBuf::from(dir),
        _ => dirs::config_dir()?,
    };
    Some(config_dir.join(APP_NAME).join(CONFIG_FILE_NAME))
}

fn read_config_file(path: &Path) -> Result<Settings> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::file_system(path, "read config file", e))?;
    serde_json::from_str(&content).map_err(|e| {
        Error::json(
            format!("failed to parse config file '{}'", path.display()),
            e,
        )
    })
}

/// Apply `FLIGHTDECK_*` overrides, returning the names of the variables used
fn apply_env<F>(settings: &mut Settings, lookup: &F) -> Result<Vec<String>>
where
    F: Fn(&str) -> Option<String>,
{
    let mut applied = Vec::new();

    if let Some(prefix) = lookup(ENV_CACHE_PREFIX) {
        settings.cache.prefix = prefix;
        applied.push(ENV_CACHE_PREFIX.to_string());
    }
    if let Some(v) = parse_var(lookup, ENV_CACHE_POLL_INTERVAL_MS)? {
        settings.cache.poll_interval_ms = v;
        applied.push(ENV_CACHE_POLL_INTERVAL_MS.to_string());
    }
    if let Some(v) = parse_var(lookup, ENV_CACHE_POLL_JITTER_MS)? {
        settings.cache.poll_jitter_ms = v;
        applied.push(ENV_CACHE_POLL_JITTER_MS.to_string());
    }
    if let Some(v) = parse_var(lookup, ENV_CACHE_TIMEOUT_MS)? {
        settings.cache.timeout_ms = v;
        applied.push(ENV_CACHE_TIMEOUT_MS.to_string());
    }
    if let Some(v) = parse_var(lookup, ENV_CACHE_TTL_MS)? {
        settings.cache.ttl_ms = v;
        applied.push(ENV_CACHE_TTL_MS.to_string());
    }
    if let Some(url) = lookup(ENV_REDIS_URL) {
        settings.cache.redis_url = Some(url);
        applied.push(ENV_REDIS_URL.to_string());
    }
    if let Some(v) = parse_var(lookup, ENV_USAGE_INTERVAL_MS)? {
        settings.usage.interval_ms = v;
        applied.push(ENV_USAGE_INTERVAL_MS.to_string());
    }
    if let Some(v) = parse_var(lookup, ENV_USAGE_LIMIT_IN_BYTES)? {
        settings.usage.limit_in_bytes = v;
        applied.push(ENV_USAGE_LIMIT_IN_BYTES.to_string());
    }
    if let Some(url) = lookup(ENV_CLICKHOUSE_URL) {
        settings.clickhouse.url = url;
        applied.push(ENV_CLICKHOUSE_URL.to_string());
    }
    if let Some(username) = lookup(ENV_CLICKHOUSE_USERNAME) {
        settings.clickhouse.username = Some(username);
        applied.push(ENV_CLICKHOUSE_USERNAME.to_string());
    }
    if let Some(password) = lookup(ENV_CLICKHOUSE_PASSWORD) {
        settings.clickhouse.password = Some(password);
        applied.push(ENV_CLICKHOUSE_PASSWORD.to_string());
    }
    if let Some(json) = lookup(ENV_LOG_JSON) {
        settings.log.json = matches!(json.to_lowercase().as_str(), "1" | "true" | "yes");
        applied.push(ENV_LOG_JSON.to_string());
    }

    Ok(applied)
}

fn parse_var<F, T>(lookup: &F, key: &str) -> Result<Option<T>>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| Error::invalid_setting(key, &raw, e.to_string())),
        None => Ok(None),
    }
}
