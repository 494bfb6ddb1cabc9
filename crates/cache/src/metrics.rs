//! Prometheus metrics for single-flight calls

use prometheus::{HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry};
use std::time::Duration;

/// How a single call ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallOutcome {
    LeaderCompleted,
    LeaderFailed,
    LeaderTimeout,
    FollowerCompleted,
    FollowerFailed,
    ExpiredRetry,
    TooManyAttempts,
}

impl CallOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallOutcome::LeaderCompleted => "leader_completed",
            CallOutcome::LeaderFailed => "leader_failed",
            CallOutcome::LeaderTimeout => "leader_timeout",
            CallOutcome::FollowerCompleted => "follower_completed",
            CallOutcome::FollowerFailed => "follower_failed",
            CallOutcome::ExpiredRetry => "expired_retry",
            CallOutcome::TooManyAttempts => "too_many_attempts",
        }
    }
}

/// Counters and histograms registered on a caller-provided registry
#[derive(Clone)]
pub struct ReuseMetrics {
    calls: IntCounterVec,
    factory_duration: HistogramVec,
}

impl ReuseMetrics {
    pub fn new(registry: &Registry) -> Result<Self, prometheus::Error> {
        let calls = IntCounterVec::new(
            Opts::new(
                "flightdeck_reuse_calls_total",
                "Single-flight calls by group and outcome",
            ),
            &["group", "outcome"],
        )?;
        registry.register(Box::new(calls.clone()))?;

        let factory_duration = HistogramVec::new(
            HistogramOpts::new(
                "flightdeck_reuse_factory_duration_seconds",
                "Time spent by leaders waiting on the factory",
            ),
            &["group"],
        )?;
        registry.register(Box::new(factory_duration.clone()))?;

        Ok(Self {
            calls,
            factory_duration,
        })
    }

    pub fn record(&self, group: &str, outcome: CallOutcome) {
        self.calls
            .with_label_values(&[group, outcome.as_str()])
            .inc();
    }

    pub fn observe_factory(&self, group: &str, elapsed: Duration) {
        self.factory_duration
            .with_label_values(&[group])
            .observe(elapsed.as_secs_f64());
    }

    /// Current value of one outcome counter
    pub fn count(&self, group: &str, outcome: CallOutcome) -> u64 {
        self.calls
            .with_label_values(&[group, outcome.as_str()])
            .get()
    }
}
