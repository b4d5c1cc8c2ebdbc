//! ## kretslab-telemetry::metrics
//! **Prometheus counters and histograms for simulation runs**

use prometheus::{Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry};

#[derive(Debug, Clone)]
pub struct MetricsRecorder {
    pub registry: Registry,
    pub runs: IntCounter,
    pub faults: IntCounter,
    pub compile_failures: IntCounter,
    /// Hardware API calls, labelled by function (`digitalWrite`, `WiFi.begin`, ...).
    pub hardware_calls: IntCounterVec,
    pub iterations: Histogram,
}

impl MetricsRecorder {
    pub fn try_new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let runs = IntCounter::new("kretslab_runs_total", "Simulation runs started")?;
        let faults = IntCounter::new("kretslab_faults_total", "Runs ended by a runtime fault")?;
        let compile_failures = IntCounter::new(
            "kretslab_compile_failures_total",
            "Scripts rejected by the compiler",
        )?;
        let hardware_calls = IntCounterVec::new(
            Opts::new("kretslab_hardware_calls_total", "Virtual hardware API calls"),
            &["function"],
        )?;
        let iterations = Histogram::with_opts(
            HistogramOpts::new(
                "kretslab_run_iterations",
                "Loop iterations completed per run",
            )
            .buckets(vec![0.0, 1.0, 10.0, 100.0, 1_000.0, 10_000.0]),
        )?;

        registry.register(Box::new(runs.clone()))?;
        registry.register(Box::new(faults.clone()))?;
        registry.register(Box::new(compile_failures.clone()))?;
        registry.register(Box::new(hardware_calls.clone()))?;
        registry.register(Box::new(iterations.clone()))?;

        Ok(Self {
            registry,
            runs,
            faults,
            compile_failures,
            hardware_calls,
            iterations,
        })
    }

    /// Text exposition format.
    pub fn gather_metrics(&self) -> Result<String, prometheus::Error> {
        use prometheus::Encoder;
        let encoder = prometheus::TextEncoder::new();
        let mut buffer = Vec::<u8>::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }

    pub fn record_hardware_call(&self, function: &str) {
        self.hardware_calls.with_label_values(&[function]).inc();
    }

    pub fn record_run_end(&self, iterations: u64, faulted: bool) {
        self.iterations.observe(iterations as f64);
        if faulted {
            self.faults.inc();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_and_exports() {
        let metrics = MetricsRecorder::try_new().unwrap();
        metrics.runs.inc();
        metrics.record_hardware_call("digitalWrite");
        metrics.record_hardware_call("digitalWrite");
        metrics.record_run_end(2, true);

        assert_eq!(metrics.hardware_calls.with_label_values(&["digitalWrite"]).get(), 2);
        assert_eq!(metrics.faults.get(), 1);

        let text = metrics.gather_metrics().unwrap();
        assert!(text.contains("kretslab_runs_total 1"));
        assert!(text.contains("function=\"digitalWrite\""));
    }
}
