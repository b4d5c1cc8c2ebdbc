//! # Kretslab Configuration System
//!
//! Layered configuration for the simulator: built-in defaults, then
//! `config/kretslab.yaml`, then `config/<KRETSLAB_ENV>.yaml`, then
//! `KRETSLAB_*` environment variables (`__` separates nested keys, e.g.
//! `KRETSLAB_SANDBOX__MAX_ITERATIONS=5`). Every load is validated.

#![warn(unsafe_code)]
#![deny(rustdoc::broken_intra_doc_links)]

use std::path::Path;

use figment::{
    providers::{Env, Format, Serialized, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};
use tracing::debug;
use validator::Validate;

mod catalog;
mod console;
mod emulation;
mod error;
mod graph;
mod sandbox;
mod telemetry;
mod validation;

pub use catalog::CatalogConfig;
pub use console::ConsoleConfig;
pub use emulation::EmulationConfig;
pub use error::ConfigError;
pub use graph::GraphConfig;
pub use sandbox::SandboxConfig;
pub use telemetry::TelemetryConfig;

const BASE_FILE: &str = "config/kretslab.yaml";
const ENV_PREFIX: &str = "KRETSLAB_";

#[derive(Debug, Serialize, Deserialize, Validate, Default, Clone, PartialEq)]
pub struct KretslabConfig {
    #[serde(default)]
    #[validate(nested)]
    pub console: ConsoleConfig,

    #[serde(default)]
    #[validate(nested)]
    pub graph: GraphConfig,

    #[serde(default)]
    #[validate(nested)]
    pub sandbox: SandboxConfig,

    #[serde(default)]
    #[validate(nested)]
    pub emulation: EmulationConfig,

    #[serde(default)]
    #[validate(nested)]
    pub catalog: CatalogConfig,

    #[serde(default)]
    #[validate(nested)]
    pub telemetry: TelemetryConfig,
}

impl KretslabConfig {
    /// Load configuration from the default files and the environment.
    pub fn load() -> Result<Self, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(KretslabConfig::default()));

        if Path::new(BASE_FILE).exists() {
            figment = figment.merge(Yaml::file(BASE_FILE));
        } else {
            debug!("{} not found, using default configuration", BASE_FILE);
        }

        let env = std::env::var("KRETSLAB_ENV").unwrap_or_else(|_| "development".into());
        let env_file = format!("config/{}.yaml", env);
        if Path::new(&env_file).exists() {
            figment = figment.merge(Yaml::file(env_file));
        }

        Self::finish(figment)
    }

    /// Load a specific YAML file over the defaults. Environment variables
    /// still take precedence.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.to_path_buf()));
        }

        let figment = Figment::from(Serialized::defaults(KretslabConfig::default()))
            .merge(Yaml::file(path));
        Self::finish(figment)
    }

    /// Parse and validate an in-memory YAML document over the defaults.
    /// The environment is not consulted.
    pub fn from_yaml_str(source: &str) -> Result<Self, ConfigError> {
        let config: Self = Figment::from(Serialized::defaults(KretslabConfig::default()))
            .merge(Yaml::string(source))
            .extract()?;
        config.validate()?;
        Ok(config)
    }

    fn finish(figment: Figment) -> Result<Self, ConfigError> {
        let config: Self = figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        let config = KretslabConfig::default();
        config.validate().expect("Default config should validate");
        assert_eq!(config.console.capacity, 10_000);
        assert_eq!(config.graph.input_fan_in, "reject");
        assert_eq!(config.sandbox.max_iterations, 1000);
        assert_eq!(config.emulation.seed, 42);
        assert!(config.catalog.path.is_none());
    }

    #[test]
    fn partial_yaml_keeps_defaults() {
        let config = KretslabConfig::from_yaml_str(
            "sandbox:\n  max_iterations: 2\nemulation:\n  seed: 7\n",
        )
        .unwrap();
        assert_eq!(config.sandbox.max_iterations, 2);
        assert_eq!(config.sandbox.step_budget, 100_000);
        assert_eq!(config.emulation.seed, 7);
        assert_eq!(config.emulation.motion_probability, 0.3);
    }

    #[test]
    fn invalid_values_are_reported_with_their_path() {
        let err = KretslabConfig::from_yaml_str(
            "graph:\n  input_fan_in: sometimes\nemulation:\n  motion_probability: 1.5\n",
        )
        .unwrap_err();
        let message = err.to_string();
        assert!(matches!(err, ConfigError::Validation(_)));
        assert!(message.contains("graph.input_fan_in"), "{}", message);
        assert!(message.contains("emulation.motion_probability"), "{}", message);
    }

    #[test]
    fn call_depth_is_capped() {
        assert!(KretslabConfig::from_yaml_str("sandbox:\n  max_call_depth: 64\n").is_ok());
        let err = KretslabConfig::from_yaml_str("sandbox:\n  max_call_depth: 65\n").unwrap_err();
        assert!(err.to_string().contains("sandbox.max_call_depth"), "{}", err);
    }

    #[test]
    fn catalog_path_must_be_yaml() {
        let err = KretslabConfig::from_yaml_str("catalog:\n  path: devices.json\n").unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
    }

    #[test]
    fn missing_file_is_reported() {
        let err = KretslabConfig::load_from_path("does/not/exist.yaml").unwrap_err();
        assert!(matches!(err, ConfigError::FileNotFound(_)));
    }

    #[test]
    fn load_from_path_reads_file() {
        let path = std::env::temp_dir().join(format!("kretslab-config-{}.yaml", std::process::id()));
        std::fs::write(&path, "console:\n  capacity: 64\n").unwrap();
        let config = KretslabConfig::load_from_path(&path).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert_eq!(config.console.capacity, 64);
    }

    #[test]
    fn environment_override() {
        std::env::set_var("KRETSLAB_SANDBOX__MAX_CALL_DEPTH", "32");
        let config = KretslabConfig::load().unwrap();
        std::env::remove_var("KRETSLAB_SANDBOX__MAX_CALL_DEPTH");
        assert_eq!(config.sandbox.max_call_depth, 32);
    }
}
