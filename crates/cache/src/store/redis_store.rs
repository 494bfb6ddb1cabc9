//! Redis-backed Action Store shared by every replica

use super::{ActionStore, StoreError};
use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use std::time::Duration;

/// Action Store on top of `SET NX`, `PEXPIRE`, `GET` and `SET PX`
#[derive(Clone)]
pub struct RedisActionStore {
    connection: MultiplexedConnection,
}

impl RedisActionStore {
    /// Connect to `url` (for example `redis://127.0.0.1/`)
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(url).map_err(|e| StoreError::Unavailable {
            message: format!("invalid redis url: {e}"),
        })?;
        let connection = client
            .get_multiplexed_tokio_connection()
            .await
            .map_err(|e| StoreError::Unavailable {
                message: e.to_string(),
            })?;
        tracing::info!("connected to redis action store");
        Ok(Self { connection })
    }
}

fn millis(ttl: Duration) -> u64 {
    ttl.as_millis().clamp(1, u64::MAX as u128) as u64
}

#[async_trait]
impl ActionStore for RedisActionStore {
    async fn set_if_absent(&self, key: &str, value: &str) -> Result<bool, StoreError> {
        let mut connection = self.connection.clone();
        connection
            .set_nx::<_, _, bool>(key, value)
            .await
            .map_err(|e| StoreError::command("SETNX", key, e))
    }

    async fn set_expiry(&self, key: &str, ttl: Duration) -> Result<(), StoreError> {
        let mut connection = self.connection.clone();
        connection
            .pexpire::<_, bool>(key, millis(ttl) as i64)
            .await
            .map(|_| ())
            .map_err(|e| StoreError::command("PEXPIRE", key, e))
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut connection = self.connection.clone();
        connection
            .get::<_, Option<String>>(key)
            .await
            .map_err(|e| StoreError::command("GET", key, e))
    }

    async fn set_with_expiry(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        let mut connection = self.connection.clone();
        connection
            .pset_ex::<_, _, ()>(key, value, millis(ttl))
            .await
            .map_err(|e| StoreError::command("SET PX", key, e))
    }
}
