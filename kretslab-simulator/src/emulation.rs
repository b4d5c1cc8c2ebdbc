//! # Device Emulation
//!
//! Seeded noise for sensor reads. One generator drives every draw in a run,
//! so a fixed seed replays a run exactly.
//!
//! ## Draws:
//! - analog noise: uniform integer in `[-jitter, jitter]`
//! - motion: Bernoulli with the configured probability
//! - temperature drift: uniform in `[-drift, drift]`
//! - script randomness: `random(min, max)` and `Math.random()`

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use kretslab_config::EmulationConfig;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EmulationParams {
    pub analog_jitter: u32,
    pub motion_probability: f64,
    pub temperature_drift: f64,
}

impl Default for EmulationParams {
    fn default() -> Self {
        Self::from(&EmulationConfig::default())
    }
}

impl From<&EmulationConfig> for EmulationParams {
    fn from(config: &EmulationConfig) -> Self {
        Self {
            analog_jitter: config.analog_jitter,
            motion_probability: config.motion_probability,
            temperature_drift: config.temperature_drift,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Emulation {
    params: EmulationParams,
    rng: ChaCha8Rng,
}

impl Emulation {
    pub fn new(seed: u64, params: EmulationParams) -> Self {
        Self {
            params,
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }

    /// Restarts the draw sequence from `seed`.
    pub fn reseed(&mut self, seed: u64) {
        self.rng = ChaCha8Rng::seed_from_u64(seed);
    }

    pub fn params(&self) -> EmulationParams {
        self.params
    }

    pub fn analog_noise(&mut self) -> i64 {
        let jitter = i64::from(self.params.analog_jitter);
        if jitter == 0 {
            return 0;
        }
        self.rng.random_range(-jitter..=jitter)
    }

    pub fn motion(&mut self) -> bool {
        let p = self.params.motion_probability;
        let p = if p.is_nan() { 0.0 } else { p.clamp(0.0, 1.0) };
        self.rng.random_bool(p)
    }

    pub fn temperature_step(&mut self) -> f64 {
        let drift = self.params.temperature_drift;
        if drift.is_nan() || drift <= 0.0 {
            return 0.0;
        }
        self.rng.random_range(-drift..=drift)
    }

    /// Integer in `[min, max)`, or `min` for an empty range.
    pub fn int_between(&mut self, min: i64, max: i64) -> i64 {
        if max <= min {
            return min;
        }
        self.rng.random_range(min..max)
    }

    /// Uniform in `[0, 1)`.
    pub fn unit(&mut self) -> f64 {
        self.rng.random::<f64>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> EmulationParams {
        EmulationParams {
            analog_jitter: 3,
            motion_probability: 0.5,
            temperature_drift: 0.5,
        }
    }

    #[test]
    fn same_seed_same_draws() {
        let mut a = Emulation::new(7, params());
        let mut b = Emulation::new(7, params());
        for _ in 0..100 {
            assert_eq!(a.analog_noise(), b.analog_noise());
            assert_eq!(a.motion(), b.motion());
            assert_eq!(a.temperature_step(), b.temperature_step());
        }
    }

    #[test]
    fn reseed_restarts_the_sequence() {
        let mut emulation = Emulation::new(9, params());
        let first: Vec<i64> = (0..10).map(|_| emulation.int_between(0, 1024)).collect();
        emulation.reseed(9);
        let second: Vec<i64> = (0..10).map(|_| emulation.int_between(0, 1024)).collect();
        assert_eq!(first, second);
    }

    #[test]
    fn draws_stay_in_range() {
        let mut emulation = Emulation::new(1, params());
        for _ in 0..1000 {
            assert!((-3..=3).contains(&emulation.analog_noise()));
            assert!(emulation.temperature_step().abs() <= 0.5);
            assert!((70..100).contains(&emulation.int_between(70, 100)));
            let unit = emulation.unit();
            assert!((0.0..1.0).contains(&unit));
        }
    }

    #[test]
    fn zero_parameters_are_silent() {
        let mut emulation = Emulation::new(
            1,
            EmulationParams {
                analog_jitter: 0,
                motion_probability: 0.0,
                temperature_drift: 0.0,
            },
        );
        for _ in 0..100 {
            assert_eq!(emulation.analog_noise(), 0);
            assert!(!emulation.motion());
            assert_eq!(emulation.temperature_step(), 0.0);
        }
        assert_eq!(emulation.int_between(5, 5), 5);
    }

    mod props {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn samples_stay_in_bounds(seed in any::<u64>(), jitter in 0u32..50, min in -1000i64..1000, span in 0i64..1000) {
                let mut emulation = Emulation::new(seed, EmulationParams {
                    analog_jitter: jitter,
                    ..EmulationParams::default()
                });
                let noise = emulation.analog_noise();
                prop_assert!(noise.abs() <= i64::from(jitter));
                let n = emulation.int_between(min, min + span);
                prop_assert!(n == min || (min..min + span).contains(&n));
                let u = emulation.unit();
                prop_assert!((0.0..1.0).contains(&u));
            }
        }
    }
}
