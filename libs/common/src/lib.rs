//! Shared utilities for the Mendeleev workspace
//!
//! Provides the pieces every binary and library in the workspace needs:
//! - tracing subscriber setup (console, optional JSON, optional rolling file)
//! - layered configuration loading (defaults, file, environment)
//! - uppercase hex formatting used for frame dumps

pub mod config_loader;
pub mod error;
pub mod hex;
pub mod logging;

pub use config_loader::{load_config, DEFAULT_ENV_PREFIX};
pub use error::{Error, Result};
pub use logging::LogConfig;
