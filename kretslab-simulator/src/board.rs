//! Board layout files.
//!
//! A layout lists device instances (with optional state overrides) and the
//! connections between them:
//!
//! ```yaml
//! name: blink
//! board: uno-1
//! devices:
//!   - { id: uno-1, template: arduino-uno }
//!   - { id: led-1, template: led, state: { color: green } }
//! connections:
//!   - { from: uno-1.d13, to: led-1.anode }
//! ```
//!
//! Applying a layout replays it against a session in file order, so the
//! first failing entry is reported and everything before it stays applied.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;
use validator::{Validate, ValidationError};

use kretslab_core::graph::Endpoint;
use kretslab_core::value::PropertyValue;

use crate::error::BoardError;
use crate::session::SimulationSession;

fn validate_endpoint(value: &str) -> Result<(), ValidationError> {
    value
        .parse::<Endpoint>()
        .map(drop)
        .map_err(|_| ValidationError::new("invalid_endpoint"))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct DeviceSpec {
    #[validate(length(min = 1))]
    pub id: String,
    #[validate(length(min = 1))]
    pub template: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub state: BTreeMap<String, PropertyValue>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct ConnectionSpec {
    #[validate(custom(function = validate_endpoint))]
    pub from: String,
    #[validate(custom(function = validate_endpoint))]
    pub to: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, Validate)]
pub struct BoardLayout {
    #[serde(default)]
    pub name: String,
    /// Controller scripts address by default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub board: Option<String>,
    #[serde(default)]
    #[validate(nested)]
    pub devices: Vec<DeviceSpec>,
    #[serde(default)]
    #[validate(nested)]
    pub connections: Vec<ConnectionSpec>,
}

impl BoardLayout {
    pub fn from_yaml_str(source: &str) -> Result<Self, BoardError> {
        let layout: Self = serde_yaml::from_str(source)?;
        layout.validate()?;
        Ok(layout)
    }

    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self, BoardError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(BoardError::FileNotFound(path.to_path_buf()));
        }
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    /// Arduino UNO with a temperature sensor on A0 and an LED on pin 13.
    pub fn default_workbench() -> Self {
        let device = |id: &str, template: &str| DeviceSpec {
            id: id.into(),
            template: template.into(),
            state: BTreeMap::new(),
        };
        let wire = |from: &str, to: &str| ConnectionSpec {
            from: from.into(),
            to: to.into(),
        };
        Self {
            name: "workbench".into(),
            board: Some("uno-1".into()),
            devices: vec![
                device("uno-1", "arduino-uno"),
                device("temp-1", "temp-sensor"),
                device("led-1", "led"),
            ],
            connections: vec![
                wire("uno-1.a0", "temp-1.data"),
                wire("uno-1.d13", "led-1.anode"),
            ],
        }
    }

    pub fn apply(&self, session: &mut SimulationSession) -> Result<(), BoardError> {
        for spec in &self.devices {
            session.add_device(&spec.template, &spec.id)?;
            for (key, value) in &spec.state {
                session.set_device_state(&spec.id, key, value.clone())?;
            }
        }
        for spec in &self.connections {
            let from: Endpoint = spec.from.parse().map_err(BoardError::Endpoint)?;
            let to: Endpoint = spec.to.parse().map_err(BoardError::Endpoint)?;
            session.connect(from, to)?;
        }
        info!(
            layout = %self.name,
            devices = self.devices.len(),
            connections = self.connections.len(),
            "board layout applied"
        );
        Ok(())
    }
}
