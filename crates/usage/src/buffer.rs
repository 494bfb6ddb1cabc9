//! Size and time bounded batch buffer with a background flusher
//!
//! Records accumulate as newline framed chunks in two categories. A batch is
//! drained when it is about to exceed the byte limit, when it reaches the
//! limit, when the interval has elapsed since the last flush, or on stop.
//! Drained batches are written concurrently by spawned tasks while new
//! records keep accumulating.

use crate::metrics::UsageMetrics;
use crate::record::UsageRecord;
use crate::writer::UsageWriter;
use bytes::{BufMut, Bytes, BytesMut};
use flightdeck_config::UsageSettings;
use flightdeck_core::{DEFAULT_FLUSH_INTERVAL_MS, DEFAULT_LIMIT_IN_BYTES};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, warn};

/// Frame terminator appended to every payload
pub const DELIMITER: u8 = b'\n';

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FlushReason {
    /// The incoming record would have pushed the batch over the limit
    FutureOversized,
    Oversized,
    IntervalTime,
    IntervalSize,
    Stop,
}

impl FlushReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlushReason::FutureOversized => "future-oversized",
            FlushReason::Oversized => "oversized",
            FlushReason::IntervalTime => "interval-time",
            FlushReason::IntervalSize => "interval-size",
            FlushReason::Stop => "stop",
        }
    }
}

impl std::fmt::Display for FlushReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    Operations,
    Registry,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Operations => "operations",
            Category::Registry => "registry",
        }
    }
}

#[derive(Debug, Clone)]
pub struct BufferConfig {
    /// Maximum time a record waits before its batch is flushed
    pub interval: Duration,
    pub limit_in_bytes: usize,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(DEFAULT_FLUSH_INTERVAL_MS),
            limit_in_bytes: DEFAULT_LIMIT_IN_BYTES,
        }
    }
}

impl From<&UsageSettings> for BufferConfig {
    fn from(settings: &UsageSettings) -> Self {
        Self {
            interval: settings.interval(),
            limit_in_bytes: settings.limit_in_bytes,
        }
    }
}

/// Counters observed since the buffer was created
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BufferStats {
    pub flushes: u64,
    pub flushed_bytes: u64,
    pub write_successes: u64,
    pub write_failures: u64,
}

#[derive(Debug, Default)]
struct StatCounters {
    flushes: AtomicU64,
    flushed_bytes: AtomicU64,
    write_successes: AtomicU64,
    write_failures: AtomicU64,
}

#[derive(Debug, Default)]
struct CategoryBatch {
    chunks: Vec<Bytes>,
    bytes: usize,
}

impl CategoryBatch {
    fn push(&mut self, chunk: Bytes) {
        self.bytes += chunk.len();
        self.chunks.push(chunk);
    }

    /// Take the chunks with the final delimiter removed
    fn take(&mut self) -> Vec<Bytes> {
        let mut chunks = std::mem::take(&mut self.chunks);
        self.bytes = 0;
        if let Some(last) = chunks.last_mut() {
            if last.last() == Some(&DELIMITER) {
                *last = last.slice(..last.len() - 1);
            }
        }
        chunks
    }
}

#[derive(Debug)]
struct BatchState {
    operations: CategoryBatch,
    registry: CategoryBatch,
    last_flushed_at: Instant,
}

impl BatchState {
    fn new() -> Self {
        Self {
            operations: CategoryBatch::default(),
            registry: CategoryBatch::default(),
            last_flushed_at: Instant::now(),
        }
    }

    fn total_bytes(&self) -> usize {
        self.operations.bytes + self.registry.bytes
    }

    fn is_empty(&self) -> bool {
        self.operations.chunks.is_empty() && self.registry.chunks.is_empty()
    }

    fn drain(&mut self) -> DrainedBatch {
        let bytes = self.total_bytes();
        self.last_flushed_at = Instant::now();
        DrainedBatch {
            operations: self.operations.take(),
            registry: self.registry.take(),
            bytes,
        }
    }
}

#[derive(Debug)]
struct DrainedBatch {
    operations: Vec<Bytes>,
    registry: Vec<Bytes>,
    bytes: usize,
}

fn frame(payload: &str) -> Bytes {
    let mut chunk = BytesMut::with_capacity(payload.len() + 1);
    chunk.put_slice(payload.as_bytes());
    chunk.put_u8(DELIMITER);
    chunk.freeze()
}

struct Shared {
    config: BufferConfig,
    writer: Arc<dyn UsageWriter>,
    state: Mutex<BatchState>,
    in_flight: Mutex<HashMap<u64, JoinHandle<()>>>,
    next_flush_id: AtomicU64,
    stats: StatCounters,
    metrics: Option<UsageMetrics>,
}

/// Batching buffer in front of a [`UsageWriter`]
pub struct UsageBuffer {
    shared: Arc<Shared>,
    ticker: Mutex<Option<JoinHandle<()>>>,
}

impl UsageBuffer {
    pub fn new(config: BufferConfig, writer: Arc<dyn UsageWriter>) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                writer,
                state: Mutex::new(BatchState::new()),
                in_flight: Mutex::new(HashMap::new()),
                next_flush_id: AtomicU64::new(0),
                stats: StatCounters::default(),
                metrics: None,
            }),
            ticker: Mutex::new(None),
        }
    }

    /// Attach Prometheus metrics; must be called before the buffer is shared
    pub fn with_metrics(mut self, metrics: UsageMetrics) -> Self {
        match Arc::get_mut(&mut self.shared) {
            Some(shared) => shared.metrics = Some(metrics),
            None => warn!("Usage buffer already shared, metrics not attached"),
        }
        self
    }

    pub fn config(&self) -> &BufferConfig {
        &self.shared.config
    }

    /// Append a record, flushing first or afterwards when the byte limit demands it
    ///
    /// Never waits on the writer; must be called from within a Tokio runtime.
    pub fn add(&self, record: UsageRecord) {
        let operations: Vec<Bytes> = record
            .operations_payloads
            .iter()
            .map(|payload| frame(payload))
            .collect();
        let registry: Vec<Bytes> = record
            .registry_payloads
            .iter()
            .map(|payload| frame(payload))
            .collect();
        let incoming: usize = operations.iter().chain(&registry).map(Bytes::len).sum();
        let limit = self.shared.config.limit_in_bytes;

        let mut drained = Vec::with_capacity(2);
        {
            let mut state = self.shared.state.lock();
            let total = state.total_bytes();
            if total > 0 && total + incoming > limit {
                drained.push((FlushReason::FutureOversized, state.drain()));
            }
            for chunk in operations {
                state.operations.push(chunk);
            }
            for chunk in registry {
                state.registry.push(chunk);
            }
            if !state.is_empty() && state.total_bytes() >= limit {
                drained.push((FlushReason::Oversized, state.drain()));
            }
        }

        for (reason, batch) in drained {
            Shared::dispatch(&self.shared, reason, batch);
        }
    }

    /// Start the periodic flusher; ticks every third of the interval
    pub fn start(&self) {
        let mut ticker = self.ticker.lock();
        if ticker.is_some() {
            return;
        }

        self.shared.state.lock().last_flushed_at = Instant::now();
        let shared = Arc::clone(&self.shared);
        let period = (shared.config.interval / 3).max(Duration::from_millis(1));
        debug!(period_ms = period.as_millis() as u64, "Starting usage flusher");

        *ticker = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // the first tick completes immediately
            interval.tick().await;
            loop {
                interval.tick().await;
                Shared::on_tick(&shared);
            }
        }));
    }

    /// Stop the ticker, flush what is left, and wait for every pending write
    pub async fn stop(&self) {
        if let Some(ticker) = self.ticker.lock().take() {
            ticker.abort();
        }

        let drained = {
            let mut state = self.shared.state.lock();
            (!state.is_empty()).then(|| state.drain())
        };
        if let Some(batch) = drained {
            Shared::dispatch(&self.shared, FlushReason::Stop, batch);
        }

        loop {
            let pending: Vec<JoinHandle<()>> = self
                .shared
                .in_flight
                .lock()
                .drain()
                .map(|(_, handle)| handle)
                .collect();
            if pending.is_empty() {
                break;
            }
            for handle in pending {
                if let Err(e) = handle.await {
                    error!(error = %e, "Usage flush task did not complete");
                }
            }
        }
        debug!("Usage buffer stopped");
    }

    pub fn stats(&self) -> BufferStats {
        let stats = &self.shared.stats;
        BufferStats {
            flushes: stats.flushes.load(Ordering::Relaxed),
            flushed_bytes: stats.flushed_bytes.load(Ordering::Relaxed),
            write_successes: stats.write_successes.load(Ordering::Relaxed),
            write_failures: stats.write_failures.load(Ordering::Relaxed),
        }
    }

    /// Bytes currently waiting for the next flush
    pub fn pending_bytes(&self) -> usize {
        self.shared.state.lock().total_bytes()
    }

    pub fn in_flight(&self) -> usize {
        self.shared.in_flight.lock().len()
    }
}

impl Drop for UsageBuffer {
    fn drop(&mut self) {
        if let Some(ticker) = self.ticker.get_mut().take() {
            ticker.abort();
        }
    }
}

impl Shared {
    fn on_tick(shared: &Arc<Self>) {
        let drained = {
            let mut state = shared.state.lock();
            if state.is_empty() {
                None
            } else if state.last_flushed_at.elapsed() >= shared.config.interval {
                Some((FlushReason::IntervalTime, state.drain()))
            } else if state.total_bytes() >= shared.config.limit_in_bytes {
                Some((FlushReason::IntervalSize, state.drain()))
            } else {
                None
            }
        };

        if let Some((reason, batch)) = drained {
            Self::dispatch(shared, reason, batch);
        }
    }

    fn dispatch(shared: &Arc<Self>, reason: FlushReason, batch: DrainedBatch) {
        shared.stats.flushes.fetch_add(1, Ordering::Relaxed);
        shared
            .stats
            .flushed_bytes
            .fetch_add(batch.bytes as u64, Ordering::Relaxed);
        if let Some(metrics) = &shared.metrics {
            metrics.record_flush(
                reason,
                batch.bytes,
                batch.operations.len(),
                batch.registry.len(),
            );
        }
        debug!(
            reason = %reason,
            bytes = batch.bytes,
            operations = batch.operations.len(),
            registry = batch.registry.len(),
            "Flushing usage batch"
        );

        let id = shared.next_flush_id.fetch_add(1, Ordering::Relaxed);
        let task_shared = Arc::clone(shared);
        // held across spawn so the task cannot remove itself before insertion
        let mut in_flight = shared.in_flight.lock();
        let handle = tokio::spawn(async move {
            task_shared.write(reason, batch).await;
            task_shared.in_flight.lock().remove(&id);
        });
        in_flight.insert(id, handle);
    }

    async fn write(&self, reason: FlushReason, batch: DrainedBatch) {
        let DrainedBatch {
            operations,
            registry,
            ..
        } = batch;
        tokio::join!(
            self.write_category(Category::Operations, reason, operations),
            self.write_category(Category::Registry, reason, registry),
        );
    }

    async fn write_category(&self, category: Category, reason: FlushReason, chunks: Vec<Bytes>) {
        if chunks.is_empty() {
            return;
        }
        let count = chunks.len();
        let result = match category {
            Category::Operations => self.writer.write_operations(chunks).await,
            Category::Registry => self.writer.write_registry(chunks).await,
        };

        let success = result.is_ok();
        if let Some(metrics) = &self.metrics {
            metrics.record_write(category, success);
        }
        match result {
            Ok(()) => {
                self.stats.write_successes.fetch_add(1, Ordering::Relaxed);
                debug!(category = category.as_str(), records = count, "Usage batch written");
            }
            Err(e) => {
                self.stats.write_failures.fetch_add(1, Ordering::Relaxed);
                error!(
                    error = %e,
                    category = category.as_str(),
                    reason = %reason,
                    records = count,
                    "Failed to write usage batch"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use flightdeck_core::{Error, Result};
    use prometheus::Registry;
    use std::sync::atomic::AtomicBool;

    #[derive(Default)]
    struct RecordingWriter {
        operations: Mutex<Vec<Vec<Bytes>>>,
        registry: Mutex<Vec<Vec<Bytes>>>,
        completed: AtomicU64,
        delay: Option<Duration>,
        fail_operations: AtomicBool,
    }

    impl RecordingWriter {
        fn slow(delay: Duration) -> Self {
            Self {
                delay: Some(delay),
                ..Self::default()
            }
        }

        fn operation_calls(&self) -> usize {
            self.operations.lock().len()
        }

        fn registry_calls(&self) -> usize {
            self.registry.lock().len()
        }

        fn operations_body(&self, call: usize) -> Bytes {
            crate::writer::concat(&self.operations.lock()[call])
        }
    }

    #[async_trait]
    impl UsageWriter for RecordingWriter {
        async fn write_operations(&self, chunks: Vec<Bytes>) -> Result<()> {
            self.operations.lock().push(chunks);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.completed.fetch_add(1, Ordering::SeqCst);
            if self.fail_operations.load(Ordering::SeqCst) {
                return Err(Error::network("test://sink", "connection reset"));
            }
            Ok(())
        }

        async fn write_registry(&self, chunks: Vec<Bytes>) -> Result<()> {
            self.registry.lock().push(chunks);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.completed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn record(operations: &[&str], registry: &[&str]) -> UsageRecord {
        UsageRecord::new(
            operations.iter().map(|s| s.to_string()).collect(),
            registry.iter().map(|s| s.to_string()).collect(),
        )
    }

    fn new_buffer(interval_ms: u64, limit_in_bytes: usize, writer: &Arc<RecordingWriter>) -> UsageBuffer {
        UsageBuffer::new(
            BufferConfig {
                interval: Duration::from_millis(interval_ms),
                limit_in_bytes,
            },
            writer.clone(),
        )
    }

    async fn eventually(condition: impl Fn() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(2);
        while !condition() {
            assert!(Instant::now() < deadline, "condition not met in time");
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    #[tokio::test]
    async fn test_time_flush() {
        let writer = Arc::new(RecordingWriter::default());
        let buffer = new_buffer(200, 1024 * 1024, &writer);
        buffer.start();

        buffer.add(record(&["op"], &["reg"]));
        tokio::time::sleep(Duration::from_millis(300)).await;

        assert_eq!(writer.operation_calls(), 1);
        assert_eq!(writer.registry_calls(), 1);
        assert_eq!(buffer.pending_bytes(), 0);
        buffer.stop().await;
        assert_eq!(buffer.stats().flushes, 1);
    }

    #[tokio::test]
    async fn test_no_flush_before_interval() {
        let writer = Arc::new(RecordingWriter::default());
        let buffer = new_buffer(1_000, 1024 * 1024, &writer);
        buffer.start();

        buffer.add(record(&["op"], &[]));
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert_eq!(writer.operation_calls(), 0);
        assert_eq!(buffer.pending_bytes(), 3);
        buffer.stop().await;
        assert_eq!(writer.operation_calls(), 1);
    }

    #[tokio::test]
    async fn test_size_flush() {
        let writer = Arc::new(RecordingWriter::default());
        let buffer = new_buffer(60_000, 1, &writer);

        buffer.add(record(&["op"], &["reg"]));
        // drained synchronously, written by a spawned task
        assert_eq!(buffer.stats().flushes, 1);
        assert_eq!(buffer.pending_bytes(), 0);

        eventually(|| writer.operation_calls() == 1 && writer.registry_calls() == 1).await;
        buffer.stop().await;
        assert_eq!(buffer.stats().flushes, 1);
    }

    #[tokio::test]
    async fn test_preemptive_flush() {
        let writer = Arc::new(RecordingWriter::default());
        let buffer = new_buffer(60_000, 3, &writer);

        buffer.add(record(&["a"], &[]));
        assert_eq!(buffer.stats().flushes, 0);

        // 2 + 2 bytes would exceed the limit, so "a" leaves alone
        buffer.add(record(&["b"], &[]));
        assert_eq!(buffer.stats().flushes, 1);
        assert_eq!(buffer.pending_bytes(), 2);

        eventually(|| writer.operation_calls() == 1).await;
        assert_eq!(writer.operations_body(0), Bytes::from_static(b"a"));

        buffer.stop().await;
        assert_eq!(writer.operation_calls(), 2);
        assert_eq!(writer.operations_body(1), Bytes::from_static(b"b"));
        // nothing was ever added to the registry category
        assert_eq!(writer.registry_calls(), 0);
    }

    #[tokio::test]
    async fn test_graceful_drain() {
        let writer = Arc::new(RecordingWriter::slow(Duration::from_millis(200)));
        let buffer = new_buffer(60_000, 1024 * 1024, &writer);
        buffer.start();

        buffer.add(record(&["op"], &["reg"]));
        let started = Instant::now();
        buffer.stop().await;

        assert!(started.elapsed() >= Duration::from_millis(200));
        assert_eq!(writer.operation_calls(), 1);
        assert_eq!(writer.registry_calls(), 1);
        assert_eq!(writer.completed.load(Ordering::SeqCst), 2);
        assert_eq!(buffer.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_stop_waits_for_earlier_flushes() {
        let writer = Arc::new(RecordingWriter::slow(Duration::from_millis(150)));
        let buffer = new_buffer(60_000, 4, &writer);

        buffer.add(record(&["one"], &[]));
        buffer.add(record(&["two"], &[]));
        assert_eq!(buffer.stats().flushes, 2);

        buffer.stop().await;
        assert_eq!(writer.completed.load(Ordering::SeqCst), 2);
        assert_eq!(buffer.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_delimiter_stripping() {
        let writer = Arc::new(RecordingWriter::default());
        let buffer = new_buffer(60_000, 1024 * 1024, &writer);

        buffer.add(record(&["a", "b"], &[]));
        buffer.add(record(&["c"], &[]));
        buffer.stop().await;

        assert_eq!(writer.operation_calls(), 1);
        assert_eq!(writer.operations_body(0), Bytes::from_static(b"a\nb\nc"));
        // earlier chunks keep their delimiter
        assert_eq!(writer.operations.lock()[0][0], Bytes::from_static(b"a\n"));
    }

    #[tokio::test]
    async fn test_stop_on_empty_buffer() {
        let writer = Arc::new(RecordingWriter::default());
        let buffer = new_buffer(100, 1024, &writer);
        buffer.start();
        buffer.stop().await;

        assert_eq!(buffer.stats(), BufferStats::default());
        assert_eq!(writer.operation_calls(), 0);
    }

    #[tokio::test]
    async fn test_write_failure_is_contained() {
        let writer = Arc::new(RecordingWriter::default());
        writer.fail_operations.store(true, Ordering::SeqCst);
        let registry = Registry::new();
        let metrics = UsageMetrics::new(&registry).unwrap();
        let buffer = new_buffer(60_000, 1024, &writer).with_metrics(metrics.clone());

        buffer.add(record(&["op"], &["reg"]));
        buffer.stop().await;

        let stats = buffer.stats();
        assert_eq!(stats.write_failures, 1);
        assert_eq!(stats.write_successes, 1);
        assert_eq!(metrics.flush_count(FlushReason::Stop), 1);
        assert_eq!(metrics.write_count(Category::Operations, false), 1);
        assert_eq!(metrics.write_count(Category::Registry, true), 1);

        // the buffer keeps accepting records after a failed write
        writer.fail_operations.store(false, Ordering::SeqCst);
        buffer.add(record(&["next"], &[]));
        buffer.stop().await;
        assert_eq!(buffer.stats().write_successes, 2);
    }

    #[tokio::test]
    async fn test_flush_reasons_recorded() {
        let writer = Arc::new(RecordingWriter::default());
        let registry = Registry::new();
        let metrics = UsageMetrics::new(&registry).unwrap();
        let buffer = new_buffer(60_000, 3, &writer).with_metrics(metrics.clone());

        buffer.add(record(&["a"], &[]));
        buffer.add(record(&["b"], &[]));
        buffer.add(record(&["cc"], &[]));
        buffer.stop().await;

        // "a" and "b" are each pushed out by the next record, "cc" fills the batch alone
        assert_eq!(metrics.flush_count(FlushReason::FutureOversized), 2);
        assert_eq!(metrics.flush_count(FlushReason::Oversized), 1);
        assert_eq!(metrics.flush_count(FlushReason::Stop), 0);
        assert_eq!(buffer.stats().flushed_bytes, 7);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_adds_lose_no_bytes() {
        const PRODUCERS: usize = 8;
        const RECORDS: usize = 2000;
        // 7 payload bytes plus the delimiter
        const FRAMED: usize = 8;

        let writer = Arc::new(RecordingWriter::default());
        let buffer = Arc::new(new_buffer(3, 50, &writer));
        buffer.start();

        let handles: Vec<_> = (0..PRODUCERS)
            .map(|_| {
                let buffer = Arc::clone(&buffer);
                tokio::spawn(async move {
                    let payload = "x".repeat(FRAMED - 1);
                    for i in 0..RECORDS {
                        buffer.add(record(&[payload.as_str()], &[]));
                        if i % 100 == 0 {
                            tokio::task::yield_now().await;
                        }
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }
        buffer.stop().await;

        assert_eq!(buffer.pending_bytes(), 0);
        assert_eq!(
            buffer.stats().flushed_bytes,
            (PRODUCERS * RECORDS * FRAMED) as u64
        );
        let rows: usize = writer.operations.lock().iter().map(Vec::len).sum();
        assert_eq!(rows, PRODUCERS * RECORDS);
    }

    #[test]
    fn test_reason_labels() {
        assert_eq!(FlushReason::FutureOversized.as_str(), "future-oversized");
        assert_eq!(FlushReason::IntervalSize.to_string(), "interval-size");
        assert_eq!(Category::Registry.as_str(), "registry");
    }
}
