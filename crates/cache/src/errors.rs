//! Errors returned by single-flight calls

use crate::store::StoreError;
use std::time::Duration;

/// Error from [`crate::Reused::call`]
///
/// `E` is the factory's own error type. Only the leader sees it; followers
/// receive [`ReuseError::Replayed`] carrying the message the leader recorded.
#[derive(Debug, thiserror::Error)]
pub enum ReuseError<E> {
    /// The factory failed in this call
    #[error("{0}")]
    Factory(E),

    /// The factory failed in another caller; only its message survived
    #[error("{message}")]
    Replayed { message: String },

    /// The factory did not finish within the deadline
    #[error("action '{id}' timed out after {timeout:?}")]
    Timeout { id: String, timeout: Duration },

    /// The entry expired under the caller more often than allowed
    #[error("action '{id}' gave up after {attempts} attempts")]
    TooManyAttempts { id: String, attempts: usize },

    /// The factory task panicked or was cancelled
    #[error("action '{id}' aborted: {message}")]
    Aborted { id: String, message: String },

    /// A cache entry or key could not be encoded or decoded
    #[error("failed to {operation} cache entry '{id}': {source}")]
    Serialization {
        id: String,
        operation: &'static str,
        #[source]
        source: serde_json::Error,
    },

    /// The Action Store failed
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl<E> ReuseError<E> {
    /// True for deadline failures, whether observed by the leader or replayed
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, ReuseError::Timeout { .. })
    }

    /// True when another caller's failure was replayed
    #[must_use]
    pub fn is_replayed(&self) -> bool {
        matches!(self, ReuseError::Replayed { .. })
    }

    pub(crate) fn serialization(
        id: &str,
        operation: &'static str,
        source: serde_json::Error,
    ) -> Self {
        ReuseError::Serialization {
            id: id.to_string(),
            operation,
            source,
        }
    }
}

/// Predicate form of [`ReuseError::is_timeout`]
pub fn is_timeout_error<E>(error: &ReuseError<E>) -> bool {
    error.is_timeout()
}
