//! Action Store: the shared key-value coordination substrate
//!
//! The single-flight cache only needs four primitives. Correctness rests on
//! `set_if_absent` being a true atomic operation on the backing store.

mod memory;
#[cfg(feature = "redis")]
mod redis_store;

pub use memory::MemoryActionStore;
#[cfg(feature = "redis")]
pub use redis_store::RedisActionStore;

use async_trait::async_trait;
use std::time::Duration;

/// Errors raised by an Action Store backend
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The store could not be reached
    #[error("action store unavailable: {message}")]
    Unavailable { message: String },

    /// A command was rejected or failed
    #[error("action store command '{command}' failed for key '{key}': {message}")]
    Command {
        command: &'static str,
        key: String,
        message: String,
    },
}

impl StoreError {
    pub fn command(command: &'static str, key: &str, message: impl ToString) -> Self {
        StoreError::Command {
            command,
            key: key.to_string(),
            message: message.to_string(),
        }
    }
}

/// Primitives the single-flight cache requires from its store
#[async_trait]
pub trait ActionStore: Send + Sync {
    /// Atomically create `key`; true iff this call created it
    async fn set_if_absent(&self, key: &str, value: &str) -> Result<bool, StoreError>;

    /// Expire `key` after `ttl`
    async fn set_expiry(&self, key: &str, ttl: Duration) -> Result<(), StoreError>;

    /// Current value, `None` when missing or expired
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Overwrite `key` and set its expiry in one step
    async fn set_with_expiry(&self, key: &str, value: &str, ttl: Duration)
        -> Result<(), StoreError>;
}
