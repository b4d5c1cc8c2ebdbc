//! Script execution bounds.
//!
//! The step budget and call depth cap each routine invocation. The time
//! budget is measured on the virtual clock, so a run that calls `delay`
//! heavily stops early while a tight loop without `delay` never trips it.

use serde::{Deserialize, Serialize};
use validator::Validate;

#[derive(Debug, Serialize, Deserialize, Validate, Clone, PartialEq)]
pub struct SandboxConfig {
    /// Loop iterations per run.
    #[serde(default = "default_max_iterations")]
    #[validate(range(max = 10_000_000))]
    pub max_iterations: u64,

    /// Virtual milliseconds per run. Zero disables the budget.
    #[serde(default = "default_timeout_budget_ms")]
    pub timeout_budget_ms: u64,

    /// Statements per routine invocation.
    #[serde(default = "default_step_budget")]
    #[validate(range(min = 1, max = 100_000_000))]
    pub step_budget: u64,

    #[serde(default = "default_max_call_depth")]
    #[validate(range(min = 1, max = 64))]
    pub max_call_depth: usize,
}

fn default_max_iterations() -> u64 {
    1000
}

fn default_timeout_budget_ms() -> u64 {
    10_000
}

fn default_step_budget() -> u64 {
    100_000
}

fn default_max_call_depth() -> usize {
    64
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            timeout_budget_ms: default_timeout_budget_ms(),
            step_budget: default_step_budget(),
            max_call_depth: default_max_call_depth(),
        }
    }
}
