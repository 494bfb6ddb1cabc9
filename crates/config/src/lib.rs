//! Configuration loading and validation for flightdeck
//!
//! Settings come from four layers, lowest precedence first: built-in
//! defaults, a JSON config file, `FLIGHTDECK_*` environment variables and
//! command line overrides applied by the binary.

pub mod loader;
pub mod settings;

pub use loader::{ConfigLoader, ConfigSource, LoadedSettings};
pub use settings::*;
