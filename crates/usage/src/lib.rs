//! Usage reporting pipeline for flightdeck
//!
//! Usage reports are converted into JSON rows, batched by [`UsageBuffer`]
//! and handed to a [`UsageWriter`] in two categories (operations and the
//! operation registry). [`ClickHouseWriter`] is the production sink.

pub mod buffer;
pub mod clickhouse;
pub mod metrics;
pub mod record;
pub mod writer;

pub use buffer::{BufferConfig, BufferStats, Category, FlushReason, UsageBuffer, DELIMITER};
pub use clickhouse::ClickHouseWriter;
pub use metrics::UsageMetrics;
pub use record::{OperationKind, OperationRecord, RegistryRecord, UsageRecord, UsageReport};
pub use writer::UsageWriter;
