//! Shared utilities for flightdeck
//!
//! Logging initialisation for binaries and a retry helper used by the
//! network-facing writers.

pub mod logging;
pub mod retry;

pub use logging::init_logging;
pub use retry::{retry, RetryConfig};
