//! liveloop CLI Library
//!
//! Shared functionality for the reception monitor.

pub mod config;
pub mod header;
pub mod stats;

pub use config::{ConfigError, MonitorConfig, SequenceMode};
pub use header::{HeaderError, RtpHeader};
pub use stats::{display_registry_stats, format_bytes, format_duration, format_gap, source_row};
