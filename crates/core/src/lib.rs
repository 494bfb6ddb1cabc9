//! Core errors and constants for the `flightdeck` workspace.
//!
//! ## Key Components
//!
//! - **`errors`**: the shared `Error` enum and `Result` alias used by the
//!   configuration, utility and binary crates.
//! - **`constants`**: default values and environment variable names shared
//!   between the configuration loader and the runtime crates.

pub mod constants;
pub mod errors;

pub use self::{
    constants::*,
    errors::{Error, Result},
};
