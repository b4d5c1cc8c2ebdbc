//! ## kretslab-core::devices
//! **Device templates, the catalog and live instances**
//!
//! ### Key Submodules:
//! - `catalog`: immutable template lookup, loaded once from YAML
//! - `registry`: live instances and their mutable state maps

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::value::PropertyValue;

pub mod catalog;
pub mod registry;

pub use catalog::DeviceCatalog;
pub use registry::{DeviceInstance, DeviceRegistry};

/// Device class. Drives how hardware calls treat an instance.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceClass {
    Sensor,
    Actuator,
    Controller,
    Display,
    Communication,
}

impl fmt::Display for DeviceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(match self {
            DeviceClass::Sensor => "sensor",
            DeviceClass::Actuator => "actuator",
            DeviceClass::Controller => "controller",
            DeviceClass::Display => "display",
            DeviceClass::Communication => "communication",
        })
    }
}

/// Electrical role of a port.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalKind {
    Power,
    Ground,
    Input,
    Output,
    Data,
}

impl SignalKind {
    /// Supply rails (power and ground) as opposed to signal pins.
    pub fn is_rail(self) -> bool {
        matches!(self, SignalKind::Power | SignalKind::Ground)
    }
}

impl fmt::Display for SignalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SignalKind::Power => "power",
            SignalKind::Ground => "ground",
            SignalKind::Input => "input",
            SignalKind::Output => "output",
            SignalKind::Data => "data",
        };
        f.write_str(name)
    }
}

/// Data encoding carried by a signal port.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataEncoding {
    Digital,
    Analog,
    I2c,
    Spi,
    Uart,
}

/// Side of the device body a port is drawn on. Layout only.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PinSide {
    Left,
    Right,
    Top,
    Bottom,
}

/// A named connection point on a template.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PortDef {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub kind: SignalKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encoding: Option<DataEncoding>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub side: Option<PinSide>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<u32>,
}

impl PortDef {
    pub fn new(id: impl Into<String>, kind: SignalKind, encoding: Option<DataEncoding>) -> Self {
        let id = id.into();
        Self {
            name: id.to_uppercase(),
            id,
            kind,
            encoding,
            side: None,
            position: None,
        }
    }
}

/// Rendering dimensions. Carried through, never interpreted.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

/// Immutable blueprint of a device.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DeviceTemplate {
    pub id: String,
    pub name: String,
    pub class: DeviceClass,
    #[serde(default)]
    pub description: String,
    pub ports: Vec<PortDef>,
    #[serde(default)]
    pub properties: BTreeMap<String, PropertyValue>,
    /// Quantity reported through `sensor.read(type)`, e.g. `temperature`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub senses: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dimensions: Option<Dimensions>,
}

impl DeviceTemplate {
    pub fn new(id: impl Into<String>, class: DeviceClass, ports: Vec<PortDef>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            class,
            description: String::new(),
            ports,
            properties: BTreeMap::new(),
            senses: None,
            default_code: None,
            dimensions: None,
        }
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<PropertyValue>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn port(&self, id: &str) -> Option<&PortDef> {
        self.ports.iter().find(|p| p.id == id)
    }
}
