//! Console sink sizing.

use serde::{Deserialize, Serialize};
use validator::Validate;

#[derive(Debug, Serialize, Deserialize, Validate, Clone, PartialEq)]
pub struct ConsoleConfig {
    /// Entries retained before the oldest is evicted.
    #[serde(default = "default_capacity")]
    #[validate(range(min = 1, max = 1_000_000))]
    pub capacity: usize,
}

fn default_capacity() -> usize {
    10_000
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
        }
    }
}
