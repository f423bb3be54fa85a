//! Tracing and logging setup shared by every binary.

/// Tracing configuration (filters, output format).
pub mod tracing;

pub use self::tracing::{LogConfig, LogFormat, init};
