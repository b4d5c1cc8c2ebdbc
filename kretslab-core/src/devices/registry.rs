//! Live device instances.
//!
//! The registry owns every instance and its mutable state. Instance ids are
//! unique for the lifetime of the registry: an id stays reserved after its
//! instance is removed.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use tracing::debug;

use super::{DeviceClass, DeviceTemplate};
use crate::error::RegistryError;
use crate::value::PropertyValue;

/// A live, stateful occurrence of a template.
#[derive(Clone, Debug)]
pub struct DeviceInstance {
    id: String,
    template: Arc<DeviceTemplate>,
    state: BTreeMap<String, PropertyValue>,
}

impl DeviceInstance {
    fn new(id: String, template: Arc<DeviceTemplate>) -> Self {
        let state = template.properties.clone();
        Self {
            id,
            template,
            state,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn template(&self) -> &Arc<DeviceTemplate> {
        &self.template
    }

    pub fn class(&self) -> DeviceClass {
        self.template.class
    }

    pub fn state(&self) -> &BTreeMap<String, PropertyValue> {
        &self.state
    }

    pub fn get(&self, key: &str) -> Option<&PropertyValue> {
        self.state.get(key)
    }

    /// Adds or overwrites a state key. Keys are never removed, so every
    /// template default key stays present.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<PropertyValue>) {
        self.state.insert(key.into(), value.into());
    }
}

/// Ordered collection of live instances.
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    instances: Vec<DeviceInstance>,
    used_ids: HashSet<String>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an instance from `template`, deep-copying its default
    /// properties into the new state map.
    pub fn add(
        &mut self,
        template: Arc<DeviceTemplate>,
        instance_id: impl Into<String>,
    ) -> Result<&DeviceInstance, RegistryError> {
        let instance_id = instance_id.into();
        if instance_id.trim().is_empty() || instance_id.contains('.') {
            return Err(RegistryError::InvalidId(instance_id));
        }
        if self.used_ids.contains(&instance_id) {
            return Err(RegistryError::DuplicateId(instance_id));
        }

        debug!(instance = %instance_id, template = %template.id, "device added");
        self.used_ids.insert(instance_id.clone());
        self.instances.push(DeviceInstance::new(instance_id, template));
        Ok(&self.instances[self.instances.len() - 1])
    }

    pub fn remove(&mut self, instance_id: &str) -> Result<DeviceInstance, RegistryError> {
        let index = self
            .instances
            .iter()
            .position(|d| d.id == instance_id)
            .ok_or_else(|| RegistryError::NotFound(instance_id.to_string()))?;
        debug!(instance = %instance_id, "device removed");
        Ok(self.instances.remove(index))
    }

    pub fn get(&self, instance_id: &str) -> Option<&DeviceInstance> {
        self.instances.iter().find(|d| d.id == instance_id)
    }

    pub fn get_mut(&mut self, instance_id: &str) -> Option<&mut DeviceInstance> {
        self.instances.iter_mut().find(|d| d.id == instance_id)
    }

    pub fn contains(&self, instance_id: &str) -> bool {
        self.get(instance_id).is_some()
    }

    /// Direct state setter, the path used by monitors and board files.
    pub fn set_state(
        &mut self,
        instance_id: &str,
        key: impl Into<String>,
        value: impl Into<PropertyValue>,
    ) -> Result<(), RegistryError> {
        let instance = self
            .get_mut(instance_id)
            .ok_or_else(|| RegistryError::NotFound(instance_id.to_string()))?;
        instance.set(key, value);
        Ok(())
    }

    /// Instances in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &DeviceInstance> {
        self.instances.iter()
    }

    /// First instance of `class` in insertion order.
    pub fn first_of_class(&self, class: DeviceClass) -> Option<&DeviceInstance> {
        self.instances.iter().find(|d| d.class() == class)
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }
}
