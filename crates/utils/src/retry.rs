//! Retry with exponential backoff for transient failures

use flightdeck_core::Error;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

const DEFAULT_MAX_RETRIES: usize = 3;
const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(100);
const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(10);
const DEFAULT_JITTER_FACTOR: f64 = 0.1;

/// Retry policy
#[derive(Clone)]
pub struct RetryConfig {
    /// Retries after the first attempt
    pub max_retries: usize,
    /// Delay before the first retry, doubled for each later one
    pub base_delay: Duration,
    /// Upper bound for a single delay
    pub max_delay: Duration,
    /// Randomization applied to each delay (0.0 to 1.0)
    pub jitter_factor: f64,
    /// Which errors are worth retrying
    pub retry_if: Arc<dyn Fn(&Error) -> bool + Send + Sync>,
}

impl std::fmt::Debug for RetryConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryConfig")
            .field("max_retries", &self.max_retries)
            .field("base_delay", &self.base_delay)
            .field("max_delay", &self.max_delay)
            .field("jitter_factor", &self.jitter_factor)
            .finish_non_exhaustive()
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            jitter_factor: DEFAULT_JITTER_FACTOR,
            retry_if: Arc::new(Error::is_transient),
        }
    }
}

impl RetryConfig {
    /// Policy for HTTP sinks
    pub fn for_network(max_retries: usize) -> Self {
        Self {
            max_retries,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(30),
            jitter_factor: 0.2,
            ..Default::default()
        }
    }

    pub fn should_retry(&self, error: &Error) -> bool {
        (self.retry_if)(error)
    }

    /// Delay before retry number `attempt` (zero based)
    pub fn calculate_delay(&self, attempt: usize) -> Duration {
        let factor = 2u32.saturating_pow(attempt.min(16) as u32);
        let capped = self.base_delay.saturating_mul(factor).min(self.max_delay);

        if self.jitter_factor <= 0.0 {
            return capped;
        }
        let range = capped.as_millis() as f64 * self.jitter_factor.min(1.0);
        let jitter = (fastrand::f64() - 0.5) * 2.0 * range;
        let millis = (capped.as_millis() as f64 + jitter).max(0.0) as u64;
        Duration::from_millis(millis)
    }
}

/// Execute an operation, retrying transient failures
pub async fn retry<F, Fut, T>(config: &RetryConfig, operation: F) -> Result<T, Error>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, Error>>,
{
    let mut attempt = 0;
    loop {
        match operation().await {
            Ok(result) => {
                if attempt > 0 {
                    tracing::info!(retries = attempt, "operation succeeded after retrying");
                }
                return Ok(result);
            }
            Err(error) if attempt < config.max_retries && config.should_retry(&error) => {
                let delay = config.calculate_delay(attempt);
                tracing::warn!(
                    attempt = attempt + 1,
                    max_attempts = config.max_retries + 1,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "operation failed, retrying"
                );
                sleep(delay).await;
                attempt += 1;
            }
            Err(error) => return Err(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn fast_config(max_retries: usize) -> RetryConfig {
        RetryConfig {
            max_retries,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            jitter_factor: 0.0,
            ..Default::default()
        }
    }

    #[test]
    fn test_calculate_delay_is_capped() {
        let config = RetryConfig {
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(300),
            jitter_factor: 0.0,
            ..Default::default()
        };
        assert_eq!(config.calculate_delay(0), Duration::from_millis(100));
        assert_eq!(config.calculate_delay(1), Duration::from_millis(200));
        assert_eq!(config.calculate_delay(5), Duration::from_millis(300));
        assert_eq!(config.calculate_delay(100), Duration::from_millis(300));
    }

    #[test]
    fn test_jitter_stays_in_range() {
        let config = RetryConfig {
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(1),
            jitter_factor: 0.5,
            ..Default::default()
        };
        for _ in 0..50 {
            let delay = config.calculate_delay(2);
            assert!(delay >= Duration::from_millis(200));
            assert!(delay <= Duration::from_millis(600));
        }
    }

    #[tokio::test]
    async fn test_retries_transient_errors() {
        let calls = AtomicUsize::new(0);
        let counter = &calls;
        let result = retry(&fast_config(3), move || async move {
            if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(Error::network("sink", "connection reset"))
            } else {
                Ok(42)
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_retries() {
        let calls = AtomicUsize::new(0);
        let counter = &calls;
        let result: Result<(), _> = retry(&fast_config(2), move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(Error::network("sink", "connection refused"))
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_errors_are_not_retried() {
        let calls = AtomicUsize::new(0);
        let counter = &calls;
        let result: Result<(), _> = retry(&fast_config(5), move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(Error::configuration("bad request"))
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
