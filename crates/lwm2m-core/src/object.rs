//! Object, instance and resource types

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::simulation::Dynamics;
use crate::value::ResourceValue;

/// Object identifier (e.g. 3 = device, 3303 = temperature)
pub type ObjectId = u16;
/// Instance index, unique within an object
pub type InstanceId = u16;
/// Resource identifier, unique within an instance
pub type ResourceId = u16;

/// Access mode of a resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Access {
    #[serde(rename = "R")]
    Read,
    #[serde(rename = "RW")]
    ReadWrite,
    #[serde(rename = "E")]
    Execute,
}

/// Declared type of a resource value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    String,
    Integer,
    Float,
    Boolean,
    Time,
    /// Executable resources carry no value
    None,
}

/// Metadata for a resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceDefinition {
    /// Display name
    pub name: String,
    pub value_type: ValueType,
    pub access: Access,
    /// Unit (e.g. "Cel", "%", "dBm")
    pub units: Option<String>,
    pub mandatory: bool,
    /// Multi-instance resource (list of values)
    pub multiple: bool,
}

impl ResourceDefinition {
    pub fn new(name: &str, value_type: ValueType, access: Access) -> Self {
        Self {
            name: name.to_string(),
            value_type,
            access,
            units: None,
            mandatory: false,
            multiple: false,
        }
    }

    pub fn units(mut self, units: &str) -> Self {
        self.units = Some(units.to_string());
        self
    }

    pub fn mandatory(mut self) -> Self {
        self.mandatory = true;
        self
    }

    pub fn multiple(mut self) -> Self {
        self.multiple = true;
        self
    }
}

/// One concrete occurrence of an object: its resource values
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Instance {
    resources: BTreeMap<ResourceId, ResourceValue>,
}

impl Instance {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build an instance from (resource id, value) pairs
    pub fn with_resources<I, V>(resources: I) -> Self
    where
        I: IntoIterator<Item = (ResourceId, V)>,
        V: Into<ResourceValue>,
    {
        Self {
            resources: resources.into_iter().map(|(id, v)| (id, v.into())).collect(),
        }
    }

    pub fn get(&self, resource_id: ResourceId) -> Option<&ResourceValue> {
        self.resources.get(&resource_id)
    }

    pub fn set(&mut self, resource_id: ResourceId, value: impl Into<ResourceValue>) {
        self.resources.insert(resource_id, value.into());
    }

    pub fn contains(&self, resource_id: ResourceId) -> bool {
        self.resources.contains_key(&resource_id)
    }

    /// Resource ids in ascending order
    pub fn resource_ids(&self) -> Vec<ResourceId> {
        self.resources.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }
}

/// A typed category of device functionality with its instances
#[derive(Debug, Clone)]
pub struct Object {
    pub id: ObjectId,
    pub name: String,
    definitions: BTreeMap<ResourceId, ResourceDefinition>,
    instances: BTreeMap<InstanceId, Instance>,
    dynamics: Dynamics,
}

impl Object {
    /// Create an object with no instances and static resources only
    pub fn new(id: ObjectId, name: &str) -> Self {
        Self {
            id,
            name: name.to_string(),
            definitions: BTreeMap::new(),
            instances: BTreeMap::new(),
            dynamics: Dynamics::Static,
        }
    }

    /// Attach the simulated behavior used on reads and refreshes
    pub fn with_dynamics(mut self, dynamics: Dynamics) -> Self {
        self.dynamics = dynamics;
        self
    }

    pub fn define(mut self, resource_id: ResourceId, definition: ResourceDefinition) -> Self {
        self.definitions.insert(resource_id, definition);
        self
    }

    pub fn with_instance(mut self, instance_id: InstanceId, instance: Instance) -> Self {
        self.instances.insert(instance_id, instance);
        self
    }

    pub fn dynamics(&self) -> Dynamics {
        self.dynamics
    }

    /// Metadata for a resource, if defined
    pub fn definition(&self, resource_id: ResourceId) -> Option<&ResourceDefinition> {
        self.definitions.get(&resource_id)
    }

    pub fn instance(&self, instance_id: InstanceId) -> Option<&Instance> {
        self.instances.get(&instance_id)
    }

    pub fn instance_mut(&mut self, instance_id: InstanceId) -> Option<&mut Instance> {
        self.instances.get_mut(&instance_id)
    }

    /// Instance ids in ascending order
    pub fn instance_ids(&self) -> Vec<InstanceId> {
        self.instances.keys().copied().collect()
    }

    pub fn instance_count(&self) -> usize {
        self.instances.len()
    }

    pub(crate) fn instances_mut(&mut self) -> &mut BTreeMap<InstanceId, Instance> {
        &mut self.instances
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instance_resources_are_ordered() {
        let instance = Instance::with_resources([(5700, 22.0), (5601, 18.0), (5602, 28.0)]);
        assert_eq!(instance.resource_ids(), vec![5601, 5602, 5700]);
        assert_eq!(instance.get(5700), Some(&ResourceValue::Float(22.0)));
        assert!(instance.get(1).is_none());
    }

    #[test]
    fn test_definition_builder() {
        let object = Object::new(3303, "Temperature").define(
            5700,
            ResourceDefinition::new("Sensor Value", ValueType::Float, Access::Read)
                .units("Cel")
                .mandatory(),
        );
        let def = object.definition(5700).unwrap();
        assert_eq!(def.units.as_deref(), Some("Cel"));
        assert!(def.mandatory);
        assert!(object.definition(5701).is_none());
    }
}
