//! Single-flight cache configuration

use flightdeck_config::CacheSettings;
use std::time::Duration;

/// Behaviour of a [`crate::ReuseCache`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReuseConfig {
    /// Namespace for every Action Store key
    pub prefix: String,
    /// Delay between follower reads
    pub poll_interval: Duration,
    /// Upper bound of the random delay added to each poll
    pub poll_jitter: Duration,
    /// Leader factory deadline
    pub timeout: Duration,
    /// Lifetime of a cache entry
    pub ttl: Duration,
}

impl Default for ReuseConfig {
    fn default() -> Self {
        Self::from(&CacheSettings::default())
    }
}

impl From<&CacheSettings> for ReuseConfig {
    fn from(settings: &CacheSettings) -> Self {
        Self {
            prefix: settings.prefix.clone(),
            poll_interval: settings.poll_interval(),
            poll_jitter: settings.poll_jitter(),
            timeout: settings.timeout(),
            ttl: settings.ttl(),
        }
    }
}

impl ReuseConfig {
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_poll_jitter(mut self, poll_jitter: Duration) -> Self {
        self.poll_jitter = poll_jitter;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Raise `ttl` to at least `timeout`, returning whether it changed.
    ///
    /// An entry that expires while its leader is still running would let a
    /// second leader start the same work.
    pub(crate) fn clamp_ttl(&mut self) -> bool {
        if self.ttl < self.timeout {
            self.ttl = self.timeout;
            true
        } else {
            false
        }
    }
}
