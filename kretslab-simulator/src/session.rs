//! # Simulation Session
//!
//! A session owns the device registry, the connection graph, the console,
//! the virtual clock and the seeded noise source. It runs one script at a
//! time through `idle → compiling → running → stopped`, with `faulted` in
//! between when the script raises.
//!
//! A run can be driven to completion with [`SimulationSession::run`] or
//! polled one loop iteration at a time with [`SimulationSession::start`] and
//! [`SimulationSession::step`]. Cancellation requested through a
//! [`StopHandle`] is observed only between iterations.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use blake3::Hasher;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use kretslab_config::{KretslabConfig, SandboxConfig};
use kretslab_core::console::{ConsoleSink, DEFAULT_CONSOLE_CAPACITY};
use kretslab_core::devices::{DeviceCatalog, DeviceClass, DeviceInstance, DeviceRegistry};
use kretslab_core::graph::{Connection, ConnectionGraph, ConnectionId, Endpoint, FanInPolicy};
use kretslab_core::time::VirtualClock;
use kretslab_core::value::PropertyValue;
use kretslab_script::{compile, CompileResult, Diagnostic, ExecLimits, Interpreter, RuntimeError};
use kretslab_telemetry::MetricsRecorder;

use crate::emulation::{Emulation, EmulationParams};
use crate::error::SessionError;
use crate::hardware::HardwareBus;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Idle,
    Compiling,
    Running,
    Faulted,
    Stopped,
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionStatus::Idle => "idle",
            SessionStatus::Compiling => "compiling",
            SessionStatus::Running => "running",
            SessionStatus::Faulted => "faulted",
            SessionStatus::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Why the last run ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    Completed,
    Cancelled,
    TimeBudgetExhausted,
    Faulted,
    CompileFailed,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StopReason::Completed => "completed",
            StopReason::Cancelled => "cancelled",
            StopReason::TimeBudgetExhausted => "time budget exhausted",
            StopReason::Faulted => "faulted",
            StopReason::CompileFailed => "compile failed",
        };
        f.write_str(name)
    }
}

/// Routine that was executing when a fault was raised.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    TopLevel,
    Setup,
    Loop,
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunPhase::TopLevel => "top level",
            RunPhase::Setup => "setup",
            RunPhase::Loop => "loop",
        };
        f.write_str(name)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RuntimeFault {
    pub message: String,
    pub phase: RunPhase,
    /// Loop iteration in progress, 0 before the first one.
    pub iteration: u64,
    pub line: usize,
}

impl fmt::Display for RuntimeFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (in {}, iteration {}, line {})",
            self.message, self.phase, self.iteration, self.line
        )
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct RunOutcome {
    pub status: SessionStatus,
    pub reason: StopReason,
    pub iterations: u64,
    pub fault: Option<RuntimeFault>,
    /// Compile diagnostics; empty unless `reason` is `CompileFailed`.
    pub diagnostics: Vec<Diagnostic>,
    pub started_at: Option<DateTime<Utc>>,
    pub virtual_time_ms: u64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RunOptions {
    pub max_iterations: u64,
    /// Virtual milliseconds; `None` disables the budget.
    pub timeout_budget_ms: Option<u64>,
    pub step_budget: u64,
    pub max_call_depth: usize,
    /// Controller whose pins the script addresses. All controllers when unset.
    pub board: Option<String>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self::from(&SandboxConfig::default())
    }
}

impl From<&SandboxConfig> for RunOptions {
    fn from(config: &SandboxConfig) -> Self {
        Self {
            max_iterations: config.max_iterations,
            timeout_budget_ms: (config.timeout_budget_ms > 0).then_some(config.timeout_budget_ms),
            step_budget: config.step_budget,
            max_call_depth: config.max_call_depth,
            board: None,
        }
    }
}

impl RunOptions {
    pub fn with_max_iterations(mut self, max_iterations: u64) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn with_board(mut self, board: impl Into<String>) -> Self {
        self.board = Some(board.into());
        self
    }
}

/// Construction-time session parameters.
#[derive(Clone, Debug, PartialEq)]
pub struct SessionSettings {
    pub console_capacity: usize,
    pub fan_in: FanInPolicy,
    pub seed: u64,
    pub emulation: EmulationParams,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            console_capacity: DEFAULT_CONSOLE_CAPACITY,
            fan_in: FanInPolicy::default(),
            seed: 42,
            emulation: EmulationParams::default(),
        }
    }
}

impl From<&KretslabConfig> for SessionSettings {
    fn from(config: &KretslabConfig) -> Self {
        Self {
            console_capacity: config.console.capacity,
            // Validated against the same vocabulary when the config loads.
            fan_in: config.graph.input_fan_in.parse().unwrap_or_default(),
            seed: config.emulation.seed,
            emulation: EmulationParams::from(&config.emulation),
        }
    }
}

/// Cloneable cancellation flag, safe to trip from any thread.
#[derive(Clone, Debug, Default)]
pub struct StopHandle {
    flag: Arc<AtomicBool>,
}

impl StopHandle {
    pub fn stop(&self) {
        self.flag.store(true, Ordering::Release);
    }

    pub fn is_stopped(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    fn reset(&self) {
        self.flag.store(false, Ordering::Release);
    }
}

/// One instance in a snapshot.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SnapshotEntry {
    pub instance_id: String,
    pub template_id: String,
    pub state: BTreeMap<String, PropertyValue>,
}

struct ActiveRun {
    interpreter: Interpreter,
    max_iterations: u64,
    timeout_budget_ms: Option<u64>,
    boards: Vec<String>,
}

pub struct SimulationSession {
    catalog: DeviceCatalog,
    registry: DeviceRegistry,
    graph: ConnectionGraph,
    console: ConsoleSink,
    clock: VirtualClock,
    emulation: Emulation,
    seed: u64,
    status: SessionStatus,
    history: Vec<SessionStatus>,
    iteration: u64,
    started_at: Option<DateTime<Utc>>,
    active: Option<ActiveRun>,
    outcome: Option<RunOutcome>,
    last_compile: Option<(String, CompileResult)>,
    stop: StopHandle,
    metrics: Option<MetricsRecorder>,
}

impl SimulationSession {
    pub fn new(catalog: DeviceCatalog, settings: SessionSettings) -> Self {
        Self {
            catalog,
            registry: DeviceRegistry::new(),
            graph: ConnectionGraph::new(settings.fan_in),
            console: ConsoleSink::with_capacity(settings.console_capacity),
            clock: VirtualClock::new(0),
            emulation: Emulation::new(settings.seed, settings.emulation),
            seed: settings.seed,
            status: SessionStatus::Idle,
            history: vec![SessionStatus::Idle],
            iteration: 0,
            started_at: None,
            active: None,
            outcome: None,
            last_compile: None,
            stop: StopHandle::default(),
            metrics: None,
        }
    }

    pub fn attach_metrics(&mut self, metrics: MetricsRecorder) {
        self.metrics = Some(metrics);
    }

    pub fn metrics(&self) -> Option<&MetricsRecorder> {
        self.metrics.as_ref()
    }

    /// Seed used to reseed the noise source at the next run start.
    pub fn set_seed(&mut self, seed: u64) {
        self.seed = seed;
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn catalog(&self) -> &DeviceCatalog {
        &self.catalog
    }

    pub fn registry(&self) -> &DeviceRegistry {
        &self.registry
    }

    pub fn graph(&self) -> &ConnectionGraph {
        &self.graph
    }

    pub fn console(&self) -> &ConsoleSink {
        &self.console
    }

    pub fn device(&self, instance_id: &str) -> Option<&DeviceInstance> {
        self.registry.get(instance_id)
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    /// Every status the session has been in, oldest first.
    pub fn history(&self) -> &[SessionStatus] {
        &self.history
    }

    pub fn iteration(&self) -> u64 {
        self.iteration
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn virtual_time_ms(&self) -> u64 {
        self.clock.now_ms()
    }

    /// Result of the most recent run, once it has ended.
    pub fn outcome(&self) -> Option<&RunOutcome> {
        self.outcome.as_ref()
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    pub fn is_active(&self) -> bool {
        matches!(
            self.status,
            SessionStatus::Compiling | SessionStatus::Running
        )
    }

    fn ensure_inactive(&self) -> Result<(), SessionError> {
        if self.is_active() {
            return Err(SessionError::RunActive);
        }
        Ok(())
    }

    fn transition(&mut self, next: SessionStatus) {
        info!(from = %self.status, to = %next, "session status changed");
        self.status = next;
        self.history.push(next);
    }

    pub fn add_device(
        &mut self,
        template_id: &str,
        instance_id: &str,
    ) -> Result<&DeviceInstance, SessionError> {
        self.ensure_inactive()?;
        let template = self.catalog.get(template_id)?;
        Ok(self.registry.add(template, instance_id)?)
    }

    /// Removes an instance and every connection touching it.
    pub fn remove_device(&mut self, instance_id: &str) -> Result<DeviceInstance, SessionError> {
        self.ensure_inactive()?;
        let removed = self.registry.remove(instance_id)?;
        let dropped = self.graph.remove_instance(instance_id);
        debug!(instance = %instance_id, connections = dropped.len(), "cascaded removal");
        Ok(removed)
    }

    pub fn connect(&mut self, a: Endpoint, b: Endpoint) -> Result<ConnectionId, SessionError> {
        self.ensure_inactive()?;
        Ok(self.graph.connect(&self.registry, a, b)?)
    }

    pub fn disconnect(&mut self, id: ConnectionId) -> Result<Connection, SessionError> {
        self.ensure_inactive()?;
        Ok(self.graph.disconnect(id)?)
    }

    pub fn set_device_state(
        &mut self,
        instance_id: &str,
        key: &str,
        value: impl Into<PropertyValue>,
    ) -> Result<(), SessionError> {
        self.ensure_inactive()?;
        Ok(self.registry.set_state(instance_id, key, value)?)
    }

    pub fn clear_console(&mut self) -> Result<(), SessionError> {
        self.ensure_inactive()?;
        self.console.clear();
        Ok(())
    }

    /// Validates `source` without running it. The result is cached for the
    /// next run of the same source.
    pub fn compile(&mut self, source: &str) -> CompileResult {
        if let Some((cached, result)) = &self.last_compile {
            if cached == source {
                debug!("reusing cached compilation");
                return result.clone();
            }
        }
        let result = compile(source);
        self.last_compile = Some((source.to_string(), result.clone()));
        result
    }

    /// Compiles `source` and runs its top level and `setup`. The session is
    /// then `running` (advance it with [`step`](Self::step)), or the run has
    /// already ended and [`outcome`](Self::outcome) holds the result.
    pub fn start(&mut self, source: &str, options: RunOptions) -> Result<(), SessionError> {
        self.ensure_inactive()?;
        if let Some(board) = &options.board {
            let is_controller = self
                .registry
                .get(board)
                .is_some_and(|d| d.class() == DeviceClass::Controller);
            if !is_controller {
                return Err(SessionError::UnknownBoard(board.clone()));
            }
        }

        self.outcome = None;
        self.transition(SessionStatus::Compiling);
        let compiled = self.compile(source);
        let program = match compiled.program {
            Some(program) if compiled.success => program,
            _ => {
                warn!(
                    diagnostics = compiled.diagnostics.len(),
                    "script failed to compile"
                );
                if let Some(metrics) = &self.metrics {
                    metrics.compile_failures.inc();
                }
                self.iteration = 0;
                self.outcome = Some(RunOutcome {
                    status: SessionStatus::Idle,
                    reason: StopReason::CompileFailed,
                    iterations: 0,
                    fault: None,
                    diagnostics: compiled.diagnostics,
                    started_at: None,
                    virtual_time_ms: 0,
                });
                self.transition(SessionStatus::Idle);
                return Ok(());
            }
        };

        let boards: Vec<String> = match &options.board {
            Some(board) => vec![board.clone()],
            None => self
                .registry
                .iter()
                .filter(|d| d.class() == DeviceClass::Controller)
                .map(|d| d.id().to_string())
                .collect(),
        };

        self.clock.reset();
        self.emulation.reseed(self.seed);
        self.stop.reset();
        self.iteration = 0;
        self.started_at = Some(Utc::now());
        self.transition(SessionStatus::Running);
        if let Some(metrics) = &self.metrics {
            metrics.runs.inc();
        }
        info!(
            seed = self.seed,
            boards = ?boards,
            max_iterations = options.max_iterations,
            "simulation run started"
        );

        let interpreter = Interpreter::new(
            program,
            ExecLimits {
                step_budget: options.step_budget,
                max_call_depth: options.max_call_depth,
            },
        );
        let has_setup = interpreter.has_function("setup");
        let has_loop = interpreter.has_function("loop");
        self.active = Some(ActiveRun {
            interpreter,
            max_iterations: options.max_iterations,
            timeout_budget_ms: options.timeout_budget_ms,
            boards,
        });

        if let Err(err) = self.invoke(RunPhase::TopLevel) {
            self.fault(RunPhase::TopLevel, err);
            return Ok(());
        }
        if has_setup {
            if let Err(err) = self.invoke(RunPhase::Setup) {
                self.fault(RunPhase::Setup, err);
                return Ok(());
            }
        }
        if !has_loop || options.max_iterations == 0 {
            self.finish(StopReason::Completed, None);
        }
        Ok(())
    }

    /// Runs one loop iteration of the active run. Checks for cancellation
    /// and the time budget first. Returns the resulting status; a no-op
    /// unless the session is `running`.
    pub fn step(&mut self) -> SessionStatus {
        if self.status != SessionStatus::Running {
            return self.status;
        }
        let Some((max_iterations, budget)) = self
            .active
            .as_ref()
            .map(|run| (run.max_iterations, run.timeout_budget_ms))
        else {
            return self.status;
        };

        if self.stop.is_stopped() {
            self.console.log("Simulation stopped");
            self.finish(StopReason::Cancelled, None);
            return self.status;
        }
        if let Some(budget) = budget {
            if self.clock.now_ms() >= budget {
                self.console
                    .warn(format!("Simulation time budget of {}ms exhausted", budget));
                self.finish(StopReason::TimeBudgetExhausted, None);
                return self.status;
            }
        }
        if self.iteration >= max_iterations {
            self.finish(StopReason::Completed, None);
            return self.status;
        }

        self.iteration += 1;
        if let Err(err) = self.invoke(RunPhase::Loop) {
            self.fault(RunPhase::Loop, err);
            return self.status;
        }
        if self.iteration >= max_iterations {
            self.finish(StopReason::Completed, None);
        }
        self.status
    }

    /// Starts a run and drives it to its end.
    pub fn run(&mut self, source: &str, options: RunOptions) -> Result<RunOutcome, SessionError> {
        self.start(source, options)?;
        while self.status == SessionStatus::Running {
            self.step();
        }
        Ok(self.outcome.clone().unwrap_or_else(|| RunOutcome {
            status: self.status,
            reason: StopReason::Completed,
            iterations: self.iteration,
            fault: None,
            diagnostics: Vec::new(),
            started_at: self.started_at,
            virtual_time_ms: self.clock.now_ms(),
        }))
    }

    /// Ends the active run. A no-op unless the session is `running`.
    pub fn stop(&mut self) {
        if self.status != SessionStatus::Running {
            return;
        }
        self.console.log("Simulation stopped");
        self.finish(StopReason::Cancelled, None);
    }

    fn invoke(&mut self, phase: RunPhase) -> Result<(), RuntimeError> {
        let Some(run) = self.active.as_mut() else {
            return Ok(());
        };
        let mut bus = HardwareBus {
            registry: &mut self.registry,
            graph: &self.graph,
            console: &mut self.console,
            emulation: &mut self.emulation,
            clock: &self.clock,
            boards: &run.boards,
            metrics: self.metrics.as_ref(),
        };
        match phase {
            RunPhase::TopLevel => run.interpreter.run_top_level(&mut bus),
            RunPhase::Setup => run
                .interpreter
                .call_function("setup", Vec::new(), &mut bus)
                .map(drop),
            RunPhase::Loop => run
                .interpreter
                .call_function("loop", Vec::new(), &mut bus)
                .map(drop),
        }
    }

    fn fault(&mut self, phase: RunPhase, err: RuntimeError) {
        let fault = RuntimeFault {
            message: err.message,
            phase,
            iteration: self.iteration,
            line: err.line,
        };
        warn!(%fault, "script raised a runtime fault");
        self.console.error(format!("Runtime Error: {}", fault.message));
        self.transition(SessionStatus::Faulted);
        self.finish(StopReason::Faulted, Some(fault));
    }

    fn finish(&mut self, reason: StopReason, fault: Option<RuntimeFault>) {
        self.active = None;
        self.transition(SessionStatus::Stopped);
        if let Some(metrics) = &self.metrics {
            metrics.record_run_end(self.iteration, reason == StopReason::Faulted);
        }
        info!(
            %reason,
            iterations = self.iteration,
            virtual_time_ms = self.clock.now_ms(),
            "simulation run finished"
        );
        self.outcome = Some(RunOutcome {
            status: SessionStatus::Stopped,
            reason,
            iterations: self.iteration,
            fault,
            diagnostics: Vec::new(),
            started_at: self.started_at,
            virtual_time_ms: self.clock.now_ms(),
        });
    }

    /// Every instance with its state, in registry order.
    pub fn snapshot(&self) -> Vec<SnapshotEntry> {
        self.registry
            .iter()
            .map(|d| SnapshotEntry {
                instance_id: d.id().to_string(),
                template_id: d.template().id.clone(),
                state: d.state().clone(),
            })
            .collect()
    }

    /// Hex BLAKE3 digest of [`snapshot`](Self::snapshot).
    pub fn state_digest(&self) -> String {
        let mut hasher = Hasher::new();
        for entry in self.snapshot() {
            hasher.update(entry.instance_id.as_bytes());
            hasher.update(&[0]);
            hasher.update(entry.template_id.as_bytes());
            hasher.update(&[0]);
            for (key, value) in &entry.state {
                hasher.update(key.as_bytes());
                hasher.update(b"=");
                hasher.update(format!("{:?}", value).as_bytes());
                hasher.update(b"\n");
            }
        }
        hex::encode(hasher.finalize().as_bytes())
    }
}
