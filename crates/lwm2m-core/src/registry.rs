//! Resource registry: objects → instances → resources
//!
//! The registry is the single owner of every resource value. Reads run the
//! object's [`Dynamics`](crate::simulation::Dynamics) for the resource first,
//! so a read may change the value it returns.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::object::{InstanceId, Object, ObjectId, ResourceId};
use crate::objects::standard_objects;
use crate::value::ResourceValue;

/// Registry handle shared by the dispatcher, the lifecycle controller and
/// the runtime loop. Every access holds the lock for one synchronous step.
pub type SharedRegistry = Arc<Mutex<Registry>>;

/// The only instance index a standard object may carry
pub const SOLE_INSTANCE: InstanceId = 0;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LookupError {
    #[error("Object /{0} not found")]
    ObjectNotFound(ObjectId),
    #[error("Instance /{object_id}/{instance_id} not found")]
    InstanceNotFound {
        object_id: ObjectId,
        instance_id: InstanceId,
    },
    #[error("Resource /{object_id}/{instance_id}/{resource_id} not found")]
    ResourceNotFound {
        object_id: ObjectId,
        instance_id: InstanceId,
        resource_id: ResourceId,
    },
}

/// In-memory store of the device's objects
pub struct Registry {
    objects: BTreeMap<ObjectId, Object>,
    rng: StdRng,
    diagnostics: Vec<String>,
}

impl Registry {
    /// Create a registry seeded from OS entropy
    pub fn new(objects: impl IntoIterator<Item = Object>) -> Self {
        Self::from_parts(objects, StdRng::from_entropy())
    }

    /// Create a registry with reproducible simulated values
    pub fn with_seed(objects: impl IntoIterator<Item = Object>, seed: u64) -> Self {
        Self::from_parts(objects, StdRng::seed_from_u64(seed))
    }

    /// Create the standard device registry (objects 0, 3, 4, 6, 3303, 3304)
    pub fn standard(server_uri: &str, binding_mode: &str, seed: Option<u64>) -> Self {
        let objects = standard_objects(server_uri, binding_mode);
        let registry = match seed {
            Some(seed) => Self::with_seed(objects, seed),
            None => Self::new(objects),
        };

        info!(
            objects = ?registry.object_ids(),
            "Initialized {} LwM2M objects",
            registry.objects.len()
        );
        for (object_id, resources) in registry.resource_counts() {
            if let Some(object) = registry.objects.get(&object_id) {
                info!(
                    object = object_id,
                    name = %object.name,
                    instances = object.instance_count(),
                    resources = resources,
                    "Object ready"
                );
            }
        }
        registry
    }

    fn from_parts(objects: impl IntoIterator<Item = Object>, rng: StdRng) -> Self {
        let mut registry = Self {
            objects: objects.into_iter().map(|o| (o.id, o)).collect(),
            rng,
            diagnostics: Vec::new(),
        };
        registry.enforce_single_instance();
        registry
    }

    /// Reduce every object to its instance 0, recording a diagnostic for
    /// each object that had to be trimmed or has no instance 0
    fn enforce_single_instance(&mut self) {
        for object in self.objects.values_mut() {
            let object_id = object.id;
            let count = object.instance_count();
            let instances = object.instances_mut();

            if !instances.contains_key(&SOLE_INSTANCE) {
                let message = format!("Object {} missing instance 0", object_id);
                error!(object = object_id, "{}", message);
                self.diagnostics.push(message);
                continue;
            }

            if count > 1 {
                let message = format!(
                    "Object {} has {} instances, keeping only instance 0",
                    object_id, count
                );
                warn!(object = object_id, instances = count, "{}", message);
                instances.retain(|id, _| *id == SOLE_INSTANCE);
                self.diagnostics.push(message);
            }
        }
    }

    /// Diagnostics recorded while normalizing the object set
    pub fn diagnostics(&self) -> &[String] {
        &self.diagnostics
    }

    pub fn into_shared(self) -> SharedRegistry {
        Arc::new(Mutex::new(self))
    }

    /// Object ids in ascending order
    pub fn object_ids(&self) -> Vec<ObjectId> {
        self.objects.keys().copied().collect()
    }

    pub fn object(&self, object_id: ObjectId) -> Option<&Object> {
        self.objects.get(&object_id)
    }

    /// Objects in ascending id order
    pub fn objects(&self) -> impl Iterator<Item = &Object> {
        self.objects.values()
    }

    /// Resource count of each object's instance 0, ascending by object id
    pub fn resource_counts(&self) -> Vec<(ObjectId, usize)> {
        self.objects
            .values()
            .map(|o| (o.id, o.instance(SOLE_INSTANCE).map(|i| i.len()).unwrap_or(0)))
            .collect()
    }

    /// Every (object, instance) pair currently held, ascending
    pub fn instance_links(&self) -> Vec<(ObjectId, InstanceId)> {
        self.objects
            .values()
            .flat_map(|o| o.instance_ids().into_iter().map(move |i| (o.id, i)))
            .collect()
    }

    /// Read a resource using the current wall-clock time
    pub fn read_resource(
        &mut self,
        object_id: ObjectId,
        instance_id: InstanceId,
        resource_id: ResourceId,
    ) -> Result<ResourceValue, LookupError> {
        self.read_resource_at(object_id, instance_id, resource_id, Utc::now())
    }

    /// Read a resource, recomputing it first if the object simulates it
    pub fn read_resource_at(
        &mut self,
        object_id: ObjectId,
        instance_id: InstanceId,
        resource_id: ResourceId,
        now: DateTime<Utc>,
    ) -> Result<ResourceValue, LookupError> {
        let object = self
            .objects
            .get_mut(&object_id)
            .ok_or(LookupError::ObjectNotFound(object_id))?;
        let dynamics = object.dynamics();
        let instance = object
            .instance_mut(instance_id)
            .ok_or(LookupError::InstanceNotFound {
                object_id,
                instance_id,
            })?;

        dynamics.on_read(resource_id, instance, now, &mut self.rng);

        instance
            .get(resource_id)
            .cloned()
            .ok_or(LookupError::ResourceNotFound {
                object_id,
                instance_id,
                resource_id,
            })
    }

    /// Resource ids of an instance in ascending order
    pub fn list_resources(
        &self,
        object_id: ObjectId,
        instance_id: InstanceId,
    ) -> Result<Vec<ResourceId>, LookupError> {
        let object = self
            .objects
            .get(&object_id)
            .ok_or(LookupError::ObjectNotFound(object_id))?;
        let instance = object
            .instance(instance_id)
            .ok_or(LookupError::InstanceNotFound {
                object_id,
                instance_id,
            })?;
        Ok(instance.resource_ids())
    }

    /// Recompute the dynamic resources of every refreshing object
    pub fn refresh_all(&mut self, now: DateTime<Utc>) {
        for object in self.objects.values_mut() {
            let dynamics = object.dynamics();
            if !dynamics.refreshes() {
                continue;
            }
            for instance in object.instances_mut().values_mut() {
                dynamics.on_refresh(instance, now, &mut self.rng);
            }
        }
    }

    /// Store a value into an existing instance
    pub fn write_resource(
        &mut self,
        object_id: ObjectId,
        instance_id: InstanceId,
        resource_id: ResourceId,
        value: impl Into<ResourceValue>,
    ) -> Result<(), LookupError> {
        let instance = self
            .objects
            .get_mut(&object_id)
            .ok_or(LookupError::ObjectNotFound(object_id))?
            .instance_mut(instance_id)
            .ok_or(LookupError::InstanceNotFound {
                object_id,
                instance_id,
            })?;
        instance.set(resource_id, value);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::Instance;
    use crate::objects::{connectivity, device, location, sensor};
    use chrono::TimeZone;

    fn registry() -> Registry {
        Registry::standard("coap://127.0.0.1:5683", "U", Some(42))
    }

    #[test]
    fn test_extra_instances_are_discarded() {
        let object = Object::new(3303, "Temperature")
            .with_instance(0, Instance::with_resources([(5700, 20.0)]))
            .with_instance(1, Instance::with_resources([(5700, 21.0)]))
            .with_instance(2, Instance::with_resources([(5700, 22.0)]));
        let registry = Registry::with_seed([object], 1);

        assert_eq!(registry.object(3303).unwrap().instance_ids(), vec![0]);
        assert_eq!(registry.diagnostics().len(), 1);
        assert_eq!(registry.instance_links(), vec![(3303, 0)]);
    }

    #[test]
    fn test_missing_instance_zero_is_recorded() {
        let object = Object::new(6, "Location").with_instance(3, Instance::new());
        let registry = Registry::with_seed([object], 1);
        assert_eq!(registry.diagnostics().len(), 1);
        assert_eq!(registry.object(6).unwrap().instance_ids(), vec![3]);
    }

    #[test]
    fn test_standard_registry_is_clean() {
        let registry = registry();
        assert!(registry.diagnostics().is_empty());
        assert_eq!(registry.object_ids(), vec![0, 3, 4, 6, 3303, 3304]);
        for object in registry.objects() {
            assert_eq!(object.instance_ids(), vec![0]);
        }
    }

    #[test]
    fn test_lookup_errors() {
        let mut registry = registry();
        assert_eq!(
            registry.read_resource(9, 0, 0),
            Err(LookupError::ObjectNotFound(9))
        );
        assert_eq!(
            registry.read_resource(3303, 1, 5700),
            Err(LookupError::InstanceNotFound {
                object_id: 3303,
                instance_id: 1
            })
        );
        assert_eq!(
            registry.read_resource(3303, 0, 9999),
            Err(LookupError::ResourceNotFound {
                object_id: 3303,
                instance_id: 0,
                resource_id: 9999
            })
        );
        assert!(registry.list_resources(3303, 0).unwrap().contains(&5700));
    }

    #[test]
    fn test_dynamic_reads_stay_in_bounds() {
        let mut registry = registry();
        for _ in 0..300 {
            let t = registry
                .read_resource(sensor::TEMPERATURE_OBJECT_ID, 0, sensor::SENSOR_VALUE)
                .unwrap()
                .as_f64()
                .unwrap();
            assert!((14.5..=29.5).contains(&t));

            let battery = registry
                .read_resource(device::OBJECT_ID, 0, device::BATTERY_LEVEL)
                .unwrap()
                .as_f64()
                .unwrap();
            assert!(battery >= 20.0);

            let signal = registry
                .read_resource(connectivity::OBJECT_ID, 0, connectivity::RADIO_SIGNAL_STRENGTH)
                .unwrap()
                .as_i64()
                .unwrap();
            assert!((-100..=-20).contains(&signal));

            let quality = registry
                .read_resource(connectivity::OBJECT_ID, 0, connectivity::LINK_QUALITY)
                .unwrap()
                .as_i64()
                .unwrap();
            assert!((0..=100).contains(&quality));
        }
    }

    #[test]
    fn test_reads_recompute_each_time() {
        let mut registry = registry();
        let now = Utc.with_ymd_and_hms(2026, 5, 4, 12, 0, 0).unwrap();

        let values: Vec<f64> = (0..20)
            .map(|_| {
                registry
                    .read_resource_at(location::OBJECT_ID, 0, location::LATITUDE, now)
                    .unwrap()
                    .as_f64()
                    .unwrap()
            })
            .collect();
        assert!(values.iter().any(|v| *v != values[0]));
        assert!(values.iter().all(|v| (v - 40.4168).abs() < 0.001));

        let ts = registry
            .read_resource_at(location::OBJECT_ID, 0, location::TIMESTAMP, now)
            .unwrap();
        assert_eq!(ts, ResourceValue::Integer(now.timestamp()));

        let time = registry
            .read_resource_at(device::OBJECT_ID, 0, device::CURRENT_TIME, now)
            .unwrap();
        assert_eq!(time, ResourceValue::Time(now));
    }

    #[test]
    fn test_static_reads_are_stable() {
        let mut registry = registry();
        let first = registry.read_resource(device::OBJECT_ID, 0, device::SERIAL_NUMBER);
        let second = registry.read_resource(device::OBJECT_ID, 0, device::SERIAL_NUMBER);
        assert_eq!(first, Ok(ResourceValue::String("001".to_string())));
        assert_eq!(first, second);
    }

    #[test]
    fn test_refresh_only_widens_temperature_bounds() {
        let mut registry = registry();
        let start = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let mut prev_min = f64::INFINITY;
        let mut prev_max = f64::NEG_INFINITY;

        for step in 0..200 {
            let now = start + chrono::Duration::minutes(30 * step);
            registry.refresh_all(now);

            let instance = registry
                .object(sensor::TEMPERATURE_OBJECT_ID)
                .unwrap()
                .instance(0)
                .unwrap();
            let value = instance.get(sensor::SENSOR_VALUE).unwrap().as_f64().unwrap();
            let min = instance.get(sensor::MIN_MEASURED).unwrap().as_f64().unwrap();
            let max = instance.get(sensor::MAX_MEASURED).unwrap().as_f64().unwrap();

            assert!(min <= value && value <= max);
            assert!(min <= prev_min);
            assert!(max >= prev_max);
            prev_min = min;
            prev_max = max;
        }
    }

    #[test]
    fn test_refresh_updates_utilization_but_read_does_not() {
        let mut registry = registry();
        for _ in 0..50 {
            let before = registry
                .object(connectivity::OBJECT_ID)
                .unwrap()
                .instance(0)
                .unwrap()
                .get(connectivity::LINK_UTILIZATION)
                .cloned();
            let read = registry
                .read_resource(connectivity::OBJECT_ID, 0, connectivity::LINK_UTILIZATION)
                .ok();
            assert_eq!(before, read);
        }

        registry.refresh_all(Utc::now());
        let utilization = registry
            .read_resource(connectivity::OBJECT_ID, 0, connectivity::LINK_UTILIZATION)
            .unwrap()
            .as_i64()
            .unwrap();
        assert!((1..=15).contains(&utilization));

        let memory = registry
            .read_resource(device::OBJECT_ID, 0, device::MEMORY_FREE)
            .unwrap()
            .as_i64()
            .unwrap();
        assert!(memory >= 100_000);
    }

    #[test]
    fn test_write_resource() {
        let mut registry = registry();
        registry
            .write_resource(sensor::TEMPERATURE_OBJECT_ID, 0, sensor::APPLICATION_TYPE, "Lab")
            .unwrap();
        assert_eq!(
            registry.read_resource(sensor::TEMPERATURE_OBJECT_ID, 0, sensor::APPLICATION_TYPE),
            Ok(ResourceValue::String("Lab".to_string()))
        );
        assert!(registry.write_resource(3303, 1, 5750, "x").is_err());
    }

    #[test]
    fn test_resource_counts_summary() {
        let registry = registry();
        assert_eq!(
            registry.resource_counts(),
            vec![(0, 4), (3, 9), (4, 10), (6, 6), (3303, 7), (3304, 7)]
        );
    }
}
