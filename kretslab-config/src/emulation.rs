//! Device emulation parameters.

use serde::{Deserialize, Serialize};
use validator::Validate;

/// Noise and probabilities applied when scripts read sensors. All draws come
/// from a generator seeded with `seed` at the start of every run.
#[derive(Debug, Serialize, Deserialize, Validate, Clone, PartialEq)]
pub struct EmulationConfig {
    #[serde(default = "default_seed")]
    pub seed: u64,

    /// Maximum +/- noise added to `analogRead` of a sensor.
    #[serde(default = "default_analog_jitter")]
    #[validate(range(max = 1023))]
    pub analog_jitter: u32,

    /// Chance a motion sensor reports motion on each read.
    #[serde(default = "default_motion_probability")]
    #[validate(range(min = 0.0, max = 1.0))]
    pub motion_probability: f64,

    /// Maximum +/- drift of a temperature sensor per `sensor.read`.
    #[serde(default = "default_temperature_drift")]
    #[validate(range(min = 0.0, max = 100.0))]
    pub temperature_drift: f64,
}

fn default_seed() -> u64 {
    42
}

fn default_analog_jitter() -> u32 {
    2
}

fn default_motion_probability() -> f64 {
    0.3
}

fn default_temperature_drift() -> f64 {
    0.5
}

impl Default for EmulationConfig {
    fn default() -> Self {
        Self {
            seed: default_seed(),
            analog_jitter: default_analog_jitter(),
            motion_probability: default_motion_probability(),
            temperature_drift: default_temperature_drift(),
        }
    }
}
