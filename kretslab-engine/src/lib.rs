pub mod error;
pub mod runtime;

// Frontends only need `kretslab_engine::run_simulation_mode` and friends.
pub use error::EngineError;
pub use runtime::{
    build_session, check_script, default_script, load_catalog, load_layout, run_fuzz_mode,
    run_simulation_mode, write_bug_report, BugReport, FuzzRequest, FuzzSummary,
    SimulationReport, SimulationRequest,
};
