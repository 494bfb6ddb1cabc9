//! Single-flight execution of expensive actions across replicas
//!
//! Every replica that receives the same input races to claim the key
//! `prefix:group:checksum(input)` in the Action Store. The winner (leader)
//! runs the factory and records the outcome; everyone else (followers)
//! polls the key until a terminal state shows up. Entries expire after the
//! configured TTL, after which the next call starts a fresh lifecycle.

use crate::config::ReuseConfig;
use crate::entry::{self, ActionState, FailureKind, FailureRecord};
use crate::errors::ReuseError;
use crate::hashing::checksum;
use crate::metrics::{CallOutcome, ReuseMetrics};
use crate::store::ActionStore;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Attempts allowed when the entry keeps expiring under a follower
pub const MAX_ATTEMPTS: usize = 3;

/// Entry point for wrapping factories with single-flight semantics
#[derive(Clone)]
pub struct ReuseCache {
    store: Arc<dyn ActionStore>,
    config: ReuseConfig,
    metrics: Option<ReuseMetrics>,
}

impl ReuseCache {
    /// Create a cache on top of `store`
    ///
    /// A `ttl` shorter than `timeout` is raised to `timeout`.
    pub fn new(store: Arc<dyn ActionStore>, mut config: ReuseConfig) -> Self {
        let configured_ttl = config.ttl;
        if config.clamp_ttl() {
            tracing::warn!(
                ttl_ms = configured_ttl.as_millis() as u64,
                timeout_ms = config.timeout.as_millis() as u64,
                "cache ttl is shorter than the action timeout, using the timeout as ttl"
            );
        }
        Self {
            store,
            config,
            metrics: None,
        }
    }

    /// Record call outcomes and factory durations
    pub fn with_metrics(mut self, metrics: ReuseMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn config(&self) -> &ReuseConfig {
        &self.config
    }

    /// Wrap `factory` so that concurrent calls with the same input share one run
    pub fn reuse<F>(&self, group_key: impl Into<String>, factory: F) -> Reused<F> {
        Reused {
            cache: self.clone(),
            group_key: group_key.into(),
            factory,
        }
    }

    /// Action Store key for `input` in `group_key`
    pub fn key_for<I: Serialize + ?Sized>(
        &self,
        group_key: &str,
        input: &I,
    ) -> Result<String, serde_json::Error> {
        Ok(format!(
            "{}:{}:{}",
            self.config.prefix,
            group_key,
            checksum(input)?
        ))
    }

    fn record(&self, group_key: &str, outcome: CallOutcome) {
        if let Some(metrics) = &self.metrics {
            metrics.record(group_key, outcome);
        }
    }

    fn poll_delay(&self) -> Duration {
        let jitter_ms = self.config.poll_jitter.as_millis() as u64;
        if jitter_ms == 0 {
            self.config.poll_interval
        } else {
            self.config.poll_interval + Duration::from_millis(fastrand::u64(0..=jitter_ms))
        }
    }
}

/// A factory wrapped by [`ReuseCache::reuse`]
pub struct Reused<F> {
    cache: ReuseCache,
    group_key: String,
    factory: F,
}

impl<F> Reused<F> {
    pub fn group_key(&self) -> &str {
        &self.group_key
    }

    /// Run the factory for `input`, or wait for the run another caller owns
    ///
    /// The factory runs on its own task. When the deadline passes the task
    /// is left running; only the wait is abandoned.
    pub async fn call<I, O, E, Fut>(&self, input: I) -> Result<O, ReuseError<E>>
    where
        F: Fn(I) -> Fut,
        Fut: Future<Output = Result<O, E>> + Send + 'static,
        I: Serialize,
        O: Serialize + DeserializeOwned + Send + 'static,
        E: Display + Send + 'static,
    {
        let id = self
            .cache
            .key_for(&self.group_key, &input)
            .map_err(|e| ReuseError::serialization(&self.group_key, "checksum", e))?;

        for attempt in 1..=MAX_ATTEMPTS {
            if self.cache.store.set_if_absent(&id, entry::STARTED).await? {
                tracing::debug!(id = %id, attempt, "running action as leader");
                return self.lead(&id, input).await;
            }

            tracing::debug!(id = %id, attempt, "action already claimed, waiting for result");
            match self.follow::<O, E>(&id).await? {
                Some(result) => {
                    self.cache
                        .record(&self.group_key, CallOutcome::FollowerCompleted);
                    return Ok(result);
                }
                None => {
                    self.cache
                        .record(&self.group_key, CallOutcome::ExpiredRetry);
                    tracing::debug!(id = %id, attempt, "action entry expired before settling");
                }
            }
        }

        self.cache
            .record(&self.group_key, CallOutcome::TooManyAttempts);
        tracing::warn!(id = %id, attempts = MAX_ATTEMPTS, "giving up on action");
        Err(ReuseError::TooManyAttempts {
            id,
            attempts: MAX_ATTEMPTS,
        })
    }

    async fn lead<I, O, E, Fut>(&self, id: &str, input: I) -> Result<O, ReuseError<E>>
    where
        F: Fn(I) -> Fut,
        Fut: Future<Output = Result<O, E>> + Send + 'static,
        O: Serialize + Send + 'static,
        E: Display + Send + 'static,
    {
        let config = &self.cache.config;
        if let Err(e) = self.cache.store.set_expiry(id, config.ttl).await {
            // the claimed entry has no ttl yet and would block every follower
            tracing::error!(id = %id, error = %e, "failed to set action expiry");
            self.fail(id, FailureRecord::generic(e.to_string())).await;
            self.cache
                .record(&self.group_key, CallOutcome::LeaderFailed);
            return Err(e.into());
        }

        let started = Instant::now();
        let task = tokio::spawn((self.factory)(input));
        let outcome = tokio::time::timeout(config.timeout, task).await;
        if let Some(metrics) = &self.cache.metrics {
            metrics.observe_factory(&self.group_key, started.elapsed());
        }

        match outcome {
            Ok(Ok(Ok(result))) => {
                let encoded = match entry::encode_completed(&result) {
                    Ok(encoded) => encoded,
                    Err(e) => {
                        self.fail(id, FailureRecord::generic(e.to_string())).await;
                        self.cache
                            .record(&self.group_key, CallOutcome::LeaderFailed);
                        return Err(ReuseError::serialization(id, "encode", e));
                    }
                };
                self.cache
                    .store
                    .set_with_expiry(id, &encoded, config.ttl)
                    .await?;
                self.cache
                    .record(&self.group_key, CallOutcome::LeaderCompleted);
                Ok(result)
            }
            Ok(Ok(Err(error))) => {
                tracing::debug!(id = %id, error = %error, "action failed");
                self.fail(id, FailureRecord::generic(error.to_string()))
                    .await;
                self.cache
                    .record(&self.group_key, CallOutcome::LeaderFailed);
                Err(ReuseError::Factory(error))
            }
            Ok(Err(join_error)) => {
                let message = join_error.to_string();
                tracing::error!(id = %id, error = %message, "action task aborted");
                self.fail(id, FailureRecord::generic(message.clone())).await;
                self.cache
                    .record(&self.group_key, CallOutcome::LeaderFailed);
                Err(ReuseError::Aborted {
                    id: id.to_string(),
                    message,
                })
            }
            Err(_elapsed) => {
                tracing::warn!(
                    id = %id,
                    timeout_ms = config.timeout.as_millis() as u64,
                    "action timed out"
                );
                let message = format!("action timed out after {:?}", config.timeout);
                self.fail(id, FailureRecord::timeout(message)).await;
                self.cache
                    .record(&self.group_key, CallOutcome::LeaderTimeout);
                Err(ReuseError::Timeout {
                    id: id.to_string(),
                    timeout: config.timeout,
                })
            }
        }
    }

    /// Persist a failure; a store error here is logged so the caller still
    /// sees the factory's own error
    async fn fail(&self, id: &str, record: FailureRecord) {
        let encoded = match entry::encode_failed(record) {
            Ok(encoded) => encoded,
            Err(e) => {
                tracing::error!(id = %id, error = %e, "failed to encode action failure");
                return;
            }
        };
        if let Err(e) = self
            .cache
            .store
            .set_with_expiry(id, &encoded, self.cache.config.ttl)
            .await
        {
            tracing::error!(id = %id, error = %e, "failed to record action failure");
        }
    }

    /// Poll until the entry settles. `Ok(None)` means it expired first.
    async fn follow<O, E>(&self, id: &str) -> Result<Option<O>, ReuseError<E>>
    where
        O: DeserializeOwned,
    {
        loop {
            let Some(raw) = self.cache.store.get(id).await? else {
                return Ok(None);
            };
            let state = entry::decode::<O>(&raw)
                .map_err(|e| ReuseError::serialization(id, "decode", e))?;

            match state {
                ActionState::Started => tokio::time::sleep(self.cache.poll_delay()).await,
                ActionState::Completed { result } => return Ok(Some(result)),
                ActionState::Failed { error } => {
                    self.cache
                        .record(&self.group_key, CallOutcome::FollowerFailed);
                    return Err(match error.kind {
                        FailureKind::Timeout => ReuseError::Timeout {
                            id: id.to_string(),
                            timeout: self.cache.config.timeout,
                        },
                        FailureKind::Generic => ReuseError::Replayed {
                            message: error.message,
                        },
                    });
                }
            }
        }
    }
}
