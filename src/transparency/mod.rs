//! Transparency module for proctoring telemetry.
//!
//! Tracks what the agent sends and what the dashboard applies, so both
//! sides can show exactly what was collected.

pub mod log;

// Re-export commonly used types
pub use log::{create_shared_log, SharedTelemetryLog, TelemetryLog, TelemetryStats};
