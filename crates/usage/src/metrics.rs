//! Prometheus metrics for flushes and writes

use crate::buffer::{Category, FlushReason};
use prometheus::{exponential_buckets, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry};

#[derive(Clone)]
pub struct UsageMetrics {
    flushes: IntCounterVec,
    flush_bytes: HistogramVec,
    flush_records: HistogramVec,
    writes: IntCounterVec,
}

impl UsageMetrics {
    pub fn new(registry: &Registry) -> Result<Self, prometheus::Error> {
        let flushes = IntCounterVec::new(
            Opts::new("flightdeck_usage_flushes_total", "Buffer flushes by reason"),
            &["reason"],
        )?;
        registry.register(Box::new(flushes.clone()))?;

        let flush_bytes = HistogramVec::new(
            HistogramOpts::new("flightdeck_usage_flush_bytes", "Bytes drained per flush")
                .buckets(exponential_buckets(1024.0, 4.0, 10)?),
            &["reason"],
        )?;
        registry.register(Box::new(flush_bytes.clone()))?;

        let flush_records = HistogramVec::new(
            HistogramOpts::new(
                "flightdeck_usage_flush_records",
                "Records drained per flush and category",
            )
            .buckets(exponential_buckets(1.0, 4.0, 10)?),
            &["category", "reason"],
        )?;
        registry.register(Box::new(flush_records.clone()))?;

        let writes = IntCounterVec::new(
            Opts::new(
                "flightdeck_usage_writes_total",
                "Category writes by result",
            ),
            &["category", "result"],
        )?;
        registry.register(Box::new(writes.clone()))?;

        Ok(Self {
            flushes,
            flush_bytes,
            flush_records,
            writes,
        })
    }

    pub fn record_flush(
        &self,
        reason: FlushReason,
        bytes: usize,
        operations: usize,
        registry: usize,
    ) {
        let reason = reason.as_str();
        self.flushes.with_label_values(&[reason]).inc();
        self.flush_bytes
            .with_label_values(&[reason])
            .observe(bytes as f64);
        self.flush_records
            .with_label_values(&[Category::Operations.as_str(), reason])
            .observe(operations as f64);
        self.flush_records
            .with_label_values(&[Category::Registry.as_str(), reason])
            .observe(registry as f64);
    }

    pub fn record_write(&self, category: Category, success: bool) {
        let result = if success { "success" } else { "failure" };
        self.writes
            .with_label_values(&[category.as_str(), result])
            .inc();
    }

    pub fn flush_count(&self, reason: FlushReason) -> u64 {
        self.flushes.with_label_values(&[reason.as_str()]).get()
    }

    pub fn write_count(&self, category: Category, success: bool) -> u64 {
        let result = if success { "success" } else { "failure" };
        self.writes
            .with_label_values(&[category.as_str(), result])
            .get()
    }
}
