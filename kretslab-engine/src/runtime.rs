/*!
# Runtime Engine

Shared entry points for frontends: build a session from configuration and
a board layout, check scripts, run them on a blocking worker, and sweep
seeds looking for nondeterminism. Digest mismatches leave a YAML bug
report behind.
*/

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use opentelemetry::KeyValue;
use serde::Serialize;
use tracing::{error, info, instrument, warn};

use kretslab_config::KretslabConfig;
use kretslab_core::console::ConsoleEntry;
use kretslab_core::devices::{DeviceCatalog, DeviceClass};
use kretslab_script::{compile, CompileResult};
use kretslab_simulator::{
    BoardLayout, RunOptions, RunOutcome, RuntimeFault, SessionSettings, SessionStatus,
    SimulationSession, SnapshotEntry, StopReason,
};
use kretslab_telemetry::{EventLogger, MetricsRecorder};

use crate::error::EngineError;

/// Catalog named by the configuration, or the built-in one.
pub fn load_catalog(config: &KretslabConfig) -> Result<DeviceCatalog, EngineError> {
    let catalog = match &config.catalog.path {
        Some(path) => DeviceCatalog::load_from_path(path)?,
        None => DeviceCatalog::builtin()?,
    };
    info!(templates = catalog.len(), "device catalog loaded");
    Ok(catalog)
}

/// Layout file at `path`, or the default workbench.
pub fn load_layout<P: AsRef<Path>>(path: Option<P>) -> Result<BoardLayout, EngineError> {
    match path {
        Some(path) => Ok(BoardLayout::load_from_path(path)?),
        None => Ok(BoardLayout::default_workbench()),
    }
}

pub fn build_session(
    config: &KretslabConfig,
    catalog: DeviceCatalog,
    layout: &BoardLayout,
    metrics: Option<MetricsRecorder>,
) -> Result<SimulationSession, EngineError> {
    let mut session = SimulationSession::new(catalog, SessionSettings::from(config));
    if let Some(metrics) = metrics {
        session.attach_metrics(metrics);
    }
    layout.apply(&mut session)?;
    Ok(session)
}

/// Example code shipped with the board's template. Without a board, the
/// first controller that has some.
pub fn default_script(session: &SimulationSession, board: Option<&str>) -> Option<String> {
    match board {
        Some(id) => session
            .device(id)
            .and_then(|d| d.template().default_code.clone()),
        None => session
            .registry()
            .iter()
            .filter(|d| d.class() == DeviceClass::Controller)
            .find_map(|d| d.template().default_code.clone()),
    }
}

/// Compiles without executing anything.
#[instrument(level = "info", name = "check_script", skip(source))]
pub fn check_script(source: &str) -> CompileResult {
    let result = compile(source);
    EventLogger::log_event(
        "script_checked",
        vec![
            KeyValue::new("success", result.success),
            KeyValue::new("diagnostics", result.diagnostics.len() as i64),
        ],
    );
    result
}

#[derive(Debug, Clone)]
pub struct SimulationRequest {
    /// Script to run. Falls back to the board's example code.
    pub source: Option<String>,
    pub layout: BoardLayout,
    pub iterations: Option<u64>,
    pub seed: Option<u64>,
    pub validate_hash: Option<String>,
    pub report_dir: PathBuf,
}

impl SimulationRequest {
    pub fn new(layout: BoardLayout) -> Self {
        Self {
            source: None,
            layout,
            iterations: None,
            seed: None,
            validate_hash: None,
            report_dir: PathBuf::from("."),
        }
    }
}

/// Everything a frontend needs to print once a run is over.
#[derive(Debug, Clone)]
pub struct SimulationReport {
    pub source: String,
    pub outcome: RunOutcome,
    pub console: Vec<ConsoleEntry>,
    pub snapshot: Vec<SnapshotEntry>,
    pub digest: String,
    pub seed: u64,
}

impl SimulationReport {
    fn collect(session: &SimulationSession, source: String, outcome: RunOutcome) -> Self {
        Self {
            source,
            outcome,
            console: session.console().entries().cloned().collect(),
            snapshot: session.snapshot(),
            digest: session.state_digest(),
            seed: session.seed(),
        }
    }

    fn same_run(&self, other: &SimulationReport) -> bool {
        self.digest == other.digest
            && self.outcome.iterations == other.outcome.iterations
            && self
                .console
                .iter()
                .map(|e| &e.message)
                .eq(other.console.iter().map(|e| &e.message))
    }
}

fn run_options(config: &KretslabConfig, layout: &BoardLayout, iterations: Option<u64>) -> RunOptions {
    let mut options = RunOptions::from(&config.sandbox);
    if let Some(iterations) = iterations {
        options = options.with_max_iterations(iterations);
    }
    if let Some(board) = &layout.board {
        options = options.with_board(board.clone());
    }
    options
}

fn resolve_source(
    session: &SimulationSession,
    layout: &BoardLayout,
    source: Option<String>,
) -> Result<String, EngineError> {
    source
        .or_else(|| default_script(session, layout.board.as_deref()))
        .ok_or_else(|| EngineError::NoScript(layout.name.clone()))
}

/// Runs one script to completion on a blocking worker. Ctrl-C trips the
/// session's stop handle, so an interrupted run still reports.
#[instrument(level = "info", name = "run_simulation_mode", skip(config, request, metrics))]
pub async fn run_simulation_mode(
    config: &KretslabConfig,
    request: SimulationRequest,
    metrics: Option<MetricsRecorder>,
) -> Result<SimulationReport, EngineError> {
    let catalog = load_catalog(config)?;
    let mut session = build_session(config, catalog, &request.layout, metrics)?;
    if let Some(seed) = request.seed {
        session.set_seed(seed);
    }
    let source = resolve_source(&session, &request.layout, request.source.clone())?;
    let options = run_options(config, &request.layout, request.iterations);
    let stop = session.stop_handle();

    let mut worker = tokio::task::spawn_blocking(move || {
        let outcome = session.run(&source, options);
        (session, source, outcome)
    });

    let (session, source, outcome) = tokio::select! {
        joined = &mut worker => joined?,
        Ok(()) = tokio::signal::ctrl_c() => {
            warn!("interrupted, stopping simulation");
            stop.stop();
            worker.await?
        }
    };
    let report = SimulationReport::collect(&session, source, outcome?);

    info!(
        status = %report.outcome.status,
        reason = %report.outcome.reason,
        digest = %report.digest,
        "Simulation complete"
    );
    EventLogger::log_event(
        "simulation_complete",
        vec![
            KeyValue::new("layout", request.layout.name.clone()),
            KeyValue::new("seed", report.seed.to_string()),
            KeyValue::new("iterations", report.outcome.iterations as i64),
            KeyValue::new("reason", report.outcome.reason.to_string()),
            KeyValue::new("final_hash", report.digest.clone()),
        ],
    );

    if let Some(expected) = &request.validate_hash {
        if *expected != report.digest {
            let bug = BugReport::new(&request.layout, &report, expected.clone());
            let path = write_bug_report(&request.report_dir, &bug)?;
            error!(expected = %expected, actual = %report.digest, "state digest mismatch");
            return Err(EngineError::DigestMismatch {
                expected: expected.clone(),
                actual: report.digest,
                report: path,
            });
        }
    }
    Ok(report)
}

#[derive(Debug, Clone)]
pub struct FuzzRequest {
    pub source: Option<String>,
    pub layout: BoardLayout,
    /// First seed; each run uses the next one.
    pub seed: u64,
    /// Seeds to try, 0 runs until interrupted.
    pub runs: u64,
    pub iterations: Option<u64>,
    pub report_dir: PathBuf,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FuzzSummary {
    pub runs: u64,
    pub mismatches: u64,
    pub faults: u64,
    pub reports: Vec<PathBuf>,
}

/// Runs every seed twice on fresh sessions and compares digests and
/// consoles. Disagreements are written out as bug reports.
#[instrument(level = "info", name = "run_fuzz_mode", skip(config, request, metrics))]
pub async fn run_fuzz_mode(
    config: &KretslabConfig,
    request: FuzzRequest,
    metrics: Option<MetricsRecorder>,
) -> Result<FuzzSummary, EngineError> {
    let catalog = load_catalog(config)?;

    // Compile errors are the same for every seed.
    let scratch = build_session(config, catalog.clone(), &request.layout, None)?;
    let source = resolve_source(&scratch, &request.layout, request.source.clone())?;
    let checked = check_script(&source);
    if !checked.success {
        return Err(EngineError::CompileFailed(checked.diagnostics.len()));
    }

    let cancel = Arc::new(AtomicBool::new(false));
    let config = config.clone();
    let worker_cancel = Arc::clone(&cancel);
    let mut worker = tokio::task::spawn_blocking(move || {
        fuzz_sweep(&config, catalog, &request, &source, metrics, &worker_cancel)
    });

    let summary = tokio::select! {
        joined = &mut worker => joined??,
        Ok(()) = tokio::signal::ctrl_c() => {
            warn!("interrupted, finishing current seed");
            cancel.store(true, Ordering::Release);
            worker.await??
        }
    };

    EventLogger::log_event(
        "fuzz_complete",
        vec![
            KeyValue::new("runs", summary.runs as i64),
            KeyValue::new("mismatches", summary.mismatches as i64),
            KeyValue::new("faults", summary.faults as i64),
        ],
    );
    Ok(summary)
}

fn fuzz_sweep(
    config: &KretslabConfig,
    catalog: DeviceCatalog,
    request: &FuzzRequest,
    source: &str,
    metrics: Option<MetricsRecorder>,
    cancel: &AtomicBool,
) -> Result<FuzzSummary, EngineError> {
    let options = run_options(config, &request.layout, request.iterations);
    let mut summary = FuzzSummary::default();
    let mut seed = request.seed;

    while request.runs == 0 || summary.runs < request.runs {
        if cancel.load(Ordering::Acquire) {
            break;
        }
        let first = seeded_run(config, &catalog, request, source, &options, seed, metrics.clone())?;
        let second = seeded_run(config, &catalog, request, source, &options, seed, None)?;

        summary.runs += 1;
        if first.outcome.reason == StopReason::Faulted {
            summary.faults += 1;
        }
        if !first.same_run(&second) {
            summary.mismatches += 1;
            let bug = BugReport::new(&request.layout, &second, first.digest.clone());
            let path = write_bug_report(&request.report_dir, &bug)?;
            error!(seed, report = %path.display(), "nondeterministic run");
            summary.reports.push(path);
        }
        seed = seed.wrapping_add(1);
    }

    info!(
        runs = summary.runs,
        mismatches = summary.mismatches,
        faults = summary.faults,
        "fuzz sweep finished"
    );
    Ok(summary)
}

fn seeded_run(
    config: &KretslabConfig,
    catalog: &DeviceCatalog,
    request: &FuzzRequest,
    source: &str,
    options: &RunOptions,
    seed: u64,
    metrics: Option<MetricsRecorder>,
) -> Result<SimulationReport, EngineError> {
    let mut session = build_session(config, catalog.clone(), &request.layout, metrics)?;
    session.set_seed(seed);
    let outcome = session.run(source, options.clone())?;
    Ok(SimulationReport::collect(&session, source.to_string(), outcome))
}

/// Reproduction material for a run whose digest was not the expected one.
#[derive(Debug, Clone, Serialize)]
pub struct BugReport {
    pub created_at: DateTime<Utc>,
    pub layout: BoardLayout,
    pub seed: u64,
    pub expected_digest: String,
    pub actual_digest: String,
    pub status: SessionStatus,
    pub reason: StopReason,
    pub iterations: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fault: Option<RuntimeFault>,
    pub script: String,
    pub console: Vec<ConsoleEntry>,
    pub snapshot: Vec<SnapshotEntry>,
}

impl BugReport {
    pub fn new(layout: &BoardLayout, report: &SimulationReport, expected_digest: String) -> Self {
        Self {
            created_at: Utc::now(),
            layout: layout.clone(),
            seed: report.seed,
            expected_digest,
            actual_digest: report.digest.clone(),
            status: report.outcome.status,
            reason: report.outcome.reason,
            iterations: report.outcome.iterations,
            fault: report.outcome.fault.clone(),
            script: report.source.clone(),
            console: report.console.clone(),
            snapshot: report.snapshot.clone(),
        }
    }
}

/// Writes `report` as YAML under `dir` and returns the file's path.
pub fn write_bug_report(dir: &Path, report: &BugReport) -> Result<PathBuf, EngineError> {
    std::fs::create_dir_all(dir)?;
    let filename = format!(
        "bug_report_{}_seed{}.yaml",
        report.created_at.format("%Y%m%dT%H%M%S%3f"),
        report.seed
    );
    let path = dir.join(filename);
    std::fs::write(&path, serde_yaml::to_string(report)?)?;
    info!(path = %path.display(), "bug report written");
    Ok(path)
}
