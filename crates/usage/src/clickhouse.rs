//! ClickHouse HTTP writer
//!
//! Each category is inserted with a single `INSERT ... FORMAT JSONEachRow`
//! request whose body is the newline framed rows of the batch.

use crate::writer::{concat, UsageWriter};
use async_trait::async_trait;
use bytes::Bytes;
use flightdeck_config::ClickHouseSettings;
use flightdeck_core::{Error, Result};
use flightdeck_utils::{retry, RetryConfig};
use std::time::Duration;
use tracing::debug;

pub struct ClickHouseWriter {
    client: reqwest::Client,
    url: String,
    username: Option<String>,
    password: Option<String>,
    operations_table: String,
    registry_table: String,
    request_timeout: Duration,
    retry: RetryConfig,
}

impl ClickHouseWriter {
    pub fn new(settings: &ClickHouseSettings) -> Result<Self> {
        let request_timeout = settings.request_timeout();
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| Error::network(&settings.url, e.to_string()))?;

        Ok(Self {
            client,
            url: settings.url.clone(),
            username: settings.username.clone(),
            password: settings.password.clone(),
            operations_table: settings.operations_table.clone(),
            registry_table: settings.registry_table.clone(),
            request_timeout,
            retry: RetryConfig::for_network(settings.max_retries),
        })
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    async fn insert(&self, table: &str, chunks: Vec<Bytes>) -> Result<()> {
        let body = concat(&chunks);
        let query = format!("INSERT INTO {table} FORMAT JSONEachRow");
        let this = self;
        let query = query.as_str();

        retry(&self.retry, move || this.send(query, body.clone())).await?;
        debug!(table, rows = chunks.len(), "Inserted usage rows");
        Ok(())
    }

    async fn send(&self, query: &str, body: Bytes) -> Result<()> {
        let mut request = self
            .client
            .post(&self.url)
            .query(&[("query", query)])
            .body(body);
        if let Some(username) = &self.username {
            request = request.basic_auth(username, self.password.as_ref());
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                Error::timeout("clickhouse insert", self.request_timeout)
            } else {
                Error::network(&self.url, e.to_string())
            }
        })?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let message = response.text().await.unwrap_or_default();
        let message = message.trim();
        if status.is_server_error() {
            Err(Error::network(
                &self.url,
                format!("status {}: {message}", status.as_u16()),
            ))
        } else {
            Err(Error::rejected(&self.url, status.as_u16(), message))
        }
    }
}

#[async_trait]
impl UsageWriter for ClickHouseWriter {
    async fn write_operations(&self, chunks: Vec<Bytes>) -> Result<()> {
        self.insert(&self.operations_table, chunks).await
    }

    async fn write_registry(&self, chunks: Vec<Bytes>) -> Result<()> {
        self.insert(&self.registry_table, chunks).await
    }
}
