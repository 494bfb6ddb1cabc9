//! Single-flight composition cache for flightdeck
//!
//! This crate deduplicates expensive actions (schema composition) across
//! service replicas:
//! - `hashing`: deterministic checksums used as key material
//! - `store`: the Action Store contract with in-process and Redis backends
//! - `entry`: the persisted `started | completed | failed` lifecycle
//! - `reuse`: the leader/follower protocol with TTL and timeout handling

pub mod config;
pub mod entry;
pub mod errors;
pub mod hashing;
pub mod metrics;
pub mod reuse;
pub mod store;

pub use config::ReuseConfig;
pub use errors::{is_timeout_error, ReuseError};
pub use hashing::checksum;
pub use metrics::{CallOutcome, ReuseMetrics};
pub use reuse::{ReuseCache, Reused, MAX_ATTEMPTS};
pub use store::{ActionStore, MemoryActionStore, StoreError};

#[cfg(feature = "redis")]
pub use store::RedisActionStore;
