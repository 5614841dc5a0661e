//! # Loggers Module
//!
//! Tracing bootstrap shared by the binaries: console output plus a daily rotating
//! JSON log file.

/// Subscriber setup.
pub mod setup;

pub use setup::setup_logging;
