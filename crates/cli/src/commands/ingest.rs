use eyre::WrapErr;
use flightdeck_config::Settings;
use flightdeck_usage::{BufferConfig, ClickHouseWriter, UsageBuffer, UsageMetrics, UsageReport};
use prometheus::{Encoder, Registry, TextEncoder};
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tracing::{info, warn};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct IngestSummary {
    pub accepted: u64,
    pub rejected: u64,
}

pub async fn execute(
    settings: &Settings,
    input: Option<PathBuf>,
    print_metrics: bool,
) -> eyre::Result<()> {
    let registry = Registry::new();
    let writer = ClickHouseWriter::new(&settings.clickhouse)?;
    let buffer = UsageBuffer::new(BufferConfig::from(&settings.usage), Arc::new(writer))
        .with_metrics(UsageMetrics::new(&registry)?);
    buffer.start();
    info!(
        clickhouse = %settings.clickhouse.url,
        interval_ms = settings.usage.interval_ms,
        limit_in_bytes = settings.usage.limit_in_bytes,
        "Ingesting usage reports"
    );

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
        info!("Interrupted, flushing pending reports");
    };

    let result = match &input {
        Some(path) => {
            let file = tokio::fs::File::open(path)
                .await
                .wrap_err_with(|| format!("failed to open {}", path.display()))?;
            pump(BufReader::new(file), &buffer, shutdown).await
        }
        None => pump(BufReader::new(tokio::io::stdin()), &buffer, shutdown).await,
    };

    // flush whatever was read even if the input failed part way
    buffer.stop().await;
    let summary = result.wrap_err("failed to read usage reports")?;

    let stats = buffer.stats();
    info!(
        accepted = summary.accepted,
        rejected = summary.rejected,
        flushes = stats.flushes,
        write_failures = stats.write_failures,
        "Ingestion finished"
    );

    if print_metrics {
        TextEncoder::new().encode(&registry.gather(), &mut std::io::stdout())?;
    }
    Ok(())
}

/// Feed one report per line into the buffer until EOF or shutdown
pub async fn pump<R, S>(
    reader: R,
    buffer: &UsageBuffer,
    shutdown: S,
) -> std::io::Result<IngestSummary>
where
    R: AsyncBufRead + Unpin,
    S: Future<Output = ()>,
{
    let mut lines = reader.lines();
    let mut summary = IngestSummary::default();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            line = lines.next_line() => match line? {
                Some(line) => accept(&line, buffer, &mut summary),
                None => break,
            },
            _ = &mut shutdown => break,
        }
    }
    Ok(summary)
}

fn accept(line: &str, buffer: &UsageBuffer, summary: &mut IngestSummary) {
    let line = line.trim();
    if line.is_empty() {
        return;
    }

    let record = UsageReport::from_json(line).and_then(|report| report.to_record());
    match record {
        Ok(record) => {
            buffer.add(record);
            summary.accepted += 1;
        }
        Err(e) => {
            warn!(error = %e, "Skipping malformed usage report");
            summary.rejected += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bytes::Bytes;
    use flightdeck_core::Result;
    use flightdeck_usage::UsageWriter;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct CollectingWriter {
        operations: Mutex<Vec<Bytes>>,
        registry: Mutex<Vec<Bytes>>,
    }

    #[async_trait]
    impl UsageWriter for CollectingWriter {
        async fn write_operations(&self, chunks: Vec<Bytes>) -> Result<()> {
            self.operations.lock().extend(chunks);
            Ok(())
        }

        async fn write_registry(&self, chunks: Vec<Bytes>) -> Result<()> {
            self.registry.lock().extend(chunks);
            Ok(())
        }
    }

    const INPUT: &str = concat!(
        r#"{"target":"t1","operations":[{"operation_hash":"a","timestamp":1,"duration_ns":5,"ok":true}]}"#,
        "\n\n",
        "not json\n",
        r#"{"target":"t2","registry":[{"operation_hash":"b","kind":"mutation","body":"mutation { x }","expires_at":9}]}"#,
        "\n",
    );

    #[tokio::test]
    async fn test_pump_reads_until_eof() {
        let writer = Arc::new(CollectingWriter::default());
        let buffer = UsageBuffer::new(BufferConfig::default(), writer.clone());

        let reader = BufReader::new(std::io::Cursor::new(INPUT.as_bytes().to_vec()));
        let summary = pump(reader, &buffer, std::future::pending()).await.unwrap();
        buffer.stop().await;

        assert_eq!(
            summary,
            IngestSummary {
                accepted: 2,
                rejected: 1
            }
        );
        let operations = writer.operations.lock();
        assert_eq!(operations.len(), 1);
        let row: serde_json::Value = serde_json::from_slice(&operations[0]).unwrap();
        assert_eq!(row["target"], "t1");

        let registry = writer.registry.lock();
        assert_eq!(registry.len(), 1);
        let row: serde_json::Value = serde_json::from_slice(&registry[0]).unwrap();
        assert_eq!(row["kind"], "mutation");
    }

    #[tokio::test]
    async fn test_pump_stops_on_shutdown() {
        let writer = Arc::new(CollectingWriter::default());
        let buffer = UsageBuffer::new(BufferConfig::default(), writer.clone());

        // the write half stays open, so only the shutdown signal ends the loop
        let (reader, _writer_half) = tokio::io::duplex(64);
        let summary = pump(BufReader::new(reader), &buffer, async {})
            .await
            .unwrap();
        buffer.stop().await;

        assert_eq!(summary, IngestSummary::default());
        assert!(writer.operations.lock().is_empty());
    }
}
