//! Read-only registry of device templates.
//!
//! The catalog is external configuration: an ordered list of templates
//! supplied at process start. It is validated once on construction and never
//! mutated afterwards.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use serde::Deserialize;

use super::DeviceTemplate;
use crate::error::CatalogError;

const BUILTIN_CATALOG: &str = include_str!("../../catalog/devices.yaml");

#[derive(Deserialize)]
struct CatalogFile {
    devices: Vec<DeviceTemplate>,
}

/// Immutable template lookup.
#[derive(Clone, Debug, Default)]
pub struct DeviceCatalog {
    templates: Vec<Arc<DeviceTemplate>>,
}

impl DeviceCatalog {
    /// Builds a catalog, rejecting duplicate template ids and duplicate
    /// port ids within a template.
    pub fn from_templates(templates: Vec<DeviceTemplate>) -> Result<Self, CatalogError> {
        let mut seen = HashSet::new();
        for template in &templates {
            if !seen.insert(template.id.as_str()) {
                return Err(CatalogError::DuplicateTemplate(template.id.clone()));
            }
            let mut ports = HashSet::new();
            for port in &template.ports {
                if !ports.insert(port.id.as_str()) {
                    return Err(CatalogError::DuplicatePort {
                        template: template.id.clone(),
                        port: port.id.clone(),
                    });
                }
            }
        }

        Ok(Self {
            templates: templates.into_iter().map(Arc::new).collect(),
        })
    }

    /// Parses a YAML document with a top-level `devices` list.
    pub fn from_yaml_str(source: &str) -> Result<Self, CatalogError> {
        let file: CatalogFile = serde_yaml::from_str(source)?;
        Self::from_templates(file.devices)
    }

    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self, CatalogError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(CatalogError::FileNotFound(path.to_path_buf()));
        }
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    /// The catalog shipped with the crate.
    pub fn builtin() -> Result<Self, CatalogError> {
        Self::from_yaml_str(BUILTIN_CATALOG)
    }

    pub fn get(&self, id: &str) -> Result<Arc<DeviceTemplate>, CatalogError> {
        self.templates
            .iter()
            .find(|t| t.id == id)
            .cloned()
            .ok_or_else(|| CatalogError::NotFound(id.to_string()))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<DeviceTemplate>> {
        self.templates.iter()
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::devices::{DataEncoding, DeviceClass, PortDef, SignalKind};

    #[test]
    fn builtin_catalog_loads() {
        let catalog = DeviceCatalog::builtin().unwrap();
        let ids: Vec<_> = catalog.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(
            ids,
            vec![
                "temp-sensor",
                "motion-sensor",
                "led",
                "esp32",
                "arduino-uno",
                "lcd-display",
                "wifi-module"
            ]
        );

        let uno = catalog.get("arduino-uno").unwrap();
        assert_eq!(uno.class, DeviceClass::Controller);
        let d13 = uno.port("d13").unwrap();
        assert_eq!(d13.kind, SignalKind::Output);
        assert_eq!(d13.encoding, Some(DataEncoding::Digital));

        let temp = catalog.get("temp-sensor").unwrap();
        assert_eq!(temp.senses.as_deref(), Some("temperature"));
        assert_eq!(temp.properties["currentValue"].as_f64(), Some(22.0));
    }

    #[test]
    fn missing_template_is_not_found() {
        let catalog = DeviceCatalog::builtin().unwrap();
        assert!(matches!(
            catalog.get("flux-capacitor"),
            Err(CatalogError::NotFound(id)) if id == "flux-capacitor"
        ));
    }

    #[test]
    fn rejects_duplicate_templates() {
        let a = DeviceTemplate::new("led", DeviceClass::Actuator, vec![]);
        let result = DeviceCatalog::from_templates(vec![a.clone(), a]);
        assert!(matches!(result, Err(CatalogError::DuplicateTemplate(_))));
    }

    #[test]
    fn rejects_duplicate_ports() {
        let template = DeviceTemplate::new(
            "relay",
            DeviceClass::Actuator,
            vec![
                PortDef::new("in", SignalKind::Input, None),
                PortDef::new("in", SignalKind::Input, None),
            ],
        );
        let result = DeviceCatalog::from_templates(vec![template]);
        assert!(matches!(result, Err(CatalogError::DuplicatePort { .. })));
    }
}
