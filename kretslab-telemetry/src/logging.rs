//! ## kretslab-telemetry::logging
//! **Structured logging with tracing and OpenTelemetry attributes**
//!
//! Library crates only emit `tracing` events. The binary installs the
//! subscriber once through [`EventLogger::init`].

use opentelemetry::KeyValue;
use tracing::info_span;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Clone)]
pub struct EventLogger;

impl EventLogger {
    /// Installs the global fmt subscriber. `RUST_LOG` overrides
    /// `default_level`. Returns false when a subscriber was already set.
    pub fn init(default_level: &str) -> bool {
        fmt()
            .with_env_filter(
                EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| EnvFilter::new(default_level)),
            )
            .with_thread_names(true)
            .with_span_events(FmtSpan::ENTER)
            .try_init()
            .is_ok()
    }

    /// Emits one structured `simulation_event` span carrying `metadata`.
    pub fn log_event(event_type: &str, metadata: Vec<KeyValue>) {
        let span = info_span!(
            "simulation_event",
            event_type = event_type,
            otel.kind = "INTERNAL"
        );

        span.in_scope(|| {
            tracing::info!(
                metadata = ?metadata,
                "Simulation event occurred"
            );
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_test::traced_test;

    #[traced_test]
    #[test]
    fn test_logging() {
        EventLogger::log_event(
            "run_completed",
            vec![KeyValue::new("iterations", 2_i64), KeyValue::new("board", "uno-1")],
        );
        assert!(logs_contain("Simulation event occurred"));
        assert!(logs_contain("run_completed"));
    }
}
