//! Connection graph policy.

use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::validation;

#[derive(Debug, Serialize, Deserialize, Validate, Clone, PartialEq)]
pub struct GraphConfig {
    /// `reject` refuses a second connection into an `input` port, `allow`
    /// lets several outputs drive it.
    #[serde(default = "default_fan_in")]
    #[validate(custom(function = validation::validate_fan_in))]
    pub input_fan_in: String,
}

fn default_fan_in() -> String {
    "reject".into()
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            input_fan_in: default_fan_in(),
        }
    }
}
