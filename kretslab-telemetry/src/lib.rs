//! # Kretslab Telemetry
//!
//! Structured logging setup and prometheus counters for simulation runs.

pub mod logging;
pub mod metrics;

pub use logging::EventLogger;
pub use metrics::MetricsRecorder;
