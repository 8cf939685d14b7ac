//! Standard LwM2M and IPSO objects of the simulated device
//!
//! Every object is seeded with exactly one instance, index 0.

use chrono::Utc;

use crate::object::{Access, Instance, Object, ObjectId, ResourceDefinition, ResourceId, ValueType};
use crate::simulation::{Dynamics, BASE_HUMIDITY, BASE_LATITUDE, BASE_LONGITUDE, BASE_TEMPERATURE};
use crate::value::ResourceValue;

/// LwM2M Security (object 0)
pub mod security {
    use super::*;

    pub const OBJECT_ID: ObjectId = 0;
    pub const SERVER_URI: ResourceId = 0;
    pub const BOOTSTRAP_SERVER: ResourceId = 1;
    pub const SECURITY_MODE: ResourceId = 2;
    pub const SHORT_SERVER_ID: ResourceId = 10;

    /// Security mode 3: no security
    pub const MODE_NO_SEC: i64 = 3;
}

/// LwM2M Device (object 3)
pub mod device {
    use super::*;

    pub const OBJECT_ID: ObjectId = 3;
    pub const MANUFACTURER: ResourceId = 0;
    pub const MODEL_NUMBER: ResourceId = 1;
    pub const SERIAL_NUMBER: ResourceId = 2;
    pub const FIRMWARE_VERSION: ResourceId = 3;
    pub const BATTERY_LEVEL: ResourceId = 9;
    pub const MEMORY_FREE: ResourceId = 10;
    pub const ERROR_CODE: ResourceId = 11;
    pub const CURRENT_TIME: ResourceId = 13;
    pub const BINDING_MODE: ResourceId = 16;
}

/// LwM2M Connectivity Monitoring (object 4)
pub mod connectivity {
    use super::*;

    pub const OBJECT_ID: ObjectId = 4;
    pub const NETWORK_BEARER: ResourceId = 0;
    pub const AVAILABLE_BEARERS: ResourceId = 1;
    pub const RADIO_SIGNAL_STRENGTH: ResourceId = 2;
    pub const IP_ADDRESSES: ResourceId = 4;
    pub const ROUTER_IP_ADDRESSES: ResourceId = 5;
    pub const CELL_ID: ResourceId = 8;
    pub const SMNC: ResourceId = 9;
    pub const SMCC: ResourceId = 10;
    pub const LINK_QUALITY: ResourceId = 11;
    pub const LINK_UTILIZATION: ResourceId = 12;
}

/// LwM2M Location (object 6)
pub mod location {
    use super::*;

    pub const OBJECT_ID: ObjectId = 6;
    pub const LATITUDE: ResourceId = 0;
    pub const LONGITUDE: ResourceId = 1;
    pub const ALTITUDE: ResourceId = 2;
    pub const RADIUS: ResourceId = 3;
    pub const TIMESTAMP: ResourceId = 5;
    pub const SPEED: ResourceId = 6;
}

/// IPSO sensor resources shared by temperature (3303) and humidity (3304)
pub mod sensor {
    use super::*;

    pub const TEMPERATURE_OBJECT_ID: ObjectId = 3303;
    pub const HUMIDITY_OBJECT_ID: ObjectId = 3304;

    pub const MIN_MEASURED: ResourceId = 5601;
    pub const MAX_MEASURED: ResourceId = 5602;
    pub const MIN_RANGE: ResourceId = 5603;
    pub const MAX_RANGE: ResourceId = 5604;
    pub const RESET_MIN_MAX: ResourceId = 5605;
    pub const SENSOR_VALUE: ResourceId = 5700;
    pub const SENSOR_UNITS: ResourceId = 5701;
    pub const APPLICATION_TYPE: ResourceId = 5750;
}

fn read(name: &str, value_type: ValueType) -> ResourceDefinition {
    ResourceDefinition::new(name, value_type, Access::Read)
}

/// Build the full standard object set, ascending by object id
pub fn standard_objects(server_uri: &str, binding_mode: &str) -> Vec<Object> {
    vec![
        security_object(server_uri),
        device_object(binding_mode),
        connectivity_object(),
        location_object(),
        temperature_object(),
        humidity_object(),
    ]
}

pub fn security_object(server_uri: &str) -> Object {
    use security::*;

    let mut instance = Instance::new();
    instance.set(SERVER_URI, server_uri);
    instance.set(BOOTSTRAP_SERVER, false);
    instance.set(SECURITY_MODE, MODE_NO_SEC);
    instance.set(SHORT_SERVER_ID, 1i64);

    Object::new(OBJECT_ID, "Security")
        .define(SERVER_URI, read("LwM2M Server URI", ValueType::String))
        .define(BOOTSTRAP_SERVER, read("Bootstrap Server", ValueType::Boolean))
        .define(SECURITY_MODE, read("Security Mode", ValueType::Integer))
        .define(SHORT_SERVER_ID, read("Short Server ID", ValueType::Integer))
        .with_instance(0, instance)
}

pub fn device_object(binding_mode: &str) -> Object {
    use device::*;

    let mut instance = Instance::new();
    instance.set(MANUFACTURER, "Rust LwM2M Client");
    instance.set(MODEL_NUMBER, "RsLwM2M-v1.0");
    instance.set(SERIAL_NUMBER, "001");
    instance.set(FIRMWARE_VERSION, "1.0.0");
    instance.set(BATTERY_LEVEL, 100.0);
    instance.set(MEMORY_FREE, 512_000i64);
    instance.set(ERROR_CODE, 0i64);
    instance.set(CURRENT_TIME, Utc::now());
    instance.set(BINDING_MODE, binding_mode);

    Object::new(OBJECT_ID, "Device")
        .with_dynamics(Dynamics::Device)
        .define(MANUFACTURER, read("Manufacturer", ValueType::String))
        .define(MODEL_NUMBER, read("Model Number", ValueType::String))
        .define(SERIAL_NUMBER, read("Serial Number", ValueType::String))
        .define(FIRMWARE_VERSION, read("Firmware Version", ValueType::String))
        .define(BATTERY_LEVEL, read("Battery Level", ValueType::Integer).units("%"))
        .define(MEMORY_FREE, read("Memory Free", ValueType::Integer).units("KB"))
        .define(ERROR_CODE, read("Error Code", ValueType::Integer))
        .define(
            CURRENT_TIME,
            ResourceDefinition::new("Current Time", ValueType::Time, Access::ReadWrite),
        )
        .define(BINDING_MODE, read("Binding Mode", ValueType::String))
        .with_instance(0, instance)
}

pub fn connectivity_object() -> Object {
    use connectivity::*;

    let mut instance = Instance::new();
    // Ethernet
    instance.set(NETWORK_BEARER, 1i64);
    instance.set(
        AVAILABLE_BEARERS,
        ResourceValue::List(vec![
            ResourceValue::Integer(50),
            ResourceValue::Integer(75),
            ResourceValue::Integer(90),
        ]),
    );
    instance.set(RADIO_SIGNAL_STRENGTH, -45i64);
    instance.set(IP_ADDRESSES, ResourceValue::List(vec!["192.168.0.100".into()]));
    instance.set(ROUTER_IP_ADDRESSES, ResourceValue::List(vec!["router.local".into()]));
    instance.set(CELL_ID, 6i64);
    instance.set(SMNC, 0i64);
    instance.set(SMCC, 0i64);
    instance.set(LINK_QUALITY, 95i64);
    instance.set(LINK_UTILIZATION, 1i64);

    Object::new(OBJECT_ID, "Connectivity Monitoring")
        .with_dynamics(Dynamics::Connectivity)
        .define(NETWORK_BEARER, read("Network Bearer", ValueType::Integer))
        .define(
            AVAILABLE_BEARERS,
            read("Available Network Bearer", ValueType::Integer).multiple(),
        )
        .define(
            RADIO_SIGNAL_STRENGTH,
            read("Radio Signal Strength", ValueType::Integer).units("dBm"),
        )
        .define(IP_ADDRESSES, read("IP Addresses", ValueType::String).multiple())
        .define(
            ROUTER_IP_ADDRESSES,
            read("Router IP Addresses", ValueType::String).multiple(),
        )
        .define(CELL_ID, read("Cell ID", ValueType::Integer))
        .define(SMNC, read("SMNC", ValueType::Integer))
        .define(SMCC, read("SMCC", ValueType::Integer))
        .define(LINK_QUALITY, read("Link Quality", ValueType::Integer).units("%"))
        .define(
            LINK_UTILIZATION,
            read("Link Utilization", ValueType::Integer).units("%"),
        )
        .with_instance(0, instance)
}

pub fn location_object() -> Object {
    use location::*;

    let instance = Instance::with_resources([
        (LATITUDE, ResourceValue::Float(BASE_LATITUDE)),
        (LONGITUDE, ResourceValue::Float(BASE_LONGITUDE)),
        (ALTITUDE, ResourceValue::Float(650.0)),
        (RADIUS, ResourceValue::Float(10.0)),
        (TIMESTAMP, ResourceValue::Integer(Utc::now().timestamp())),
        (SPEED, ResourceValue::Float(2.5)),
    ]);

    Object::new(OBJECT_ID, "Location")
        .with_dynamics(Dynamics::Location)
        .define(LATITUDE, read("Latitude", ValueType::Float).units("lat"))
        .define(LONGITUDE, read("Longitude", ValueType::Float).units("lon"))
        .define(ALTITUDE, read("Altitude", ValueType::Float).units("m"))
        .define(RADIUS, read("Radius", ValueType::Float).units("m"))
        .define(TIMESTAMP, read("Timestamp", ValueType::Integer).units("s"))
        .define(SPEED, read("Speed", ValueType::Float).units("m/s"))
        .with_instance(0, instance)
}

/// IPSO sensor object with the shared 56xx/57xx resource layout
fn ipso_sensor(
    object_id: ObjectId,
    name: &str,
    units: &str,
    application: &str,
    initial: [f64; 5],
    dynamics: Dynamics,
) -> Object {
    use sensor::*;

    let [value, min_measured, max_measured, min_range, max_range] = initial;
    let instance = Instance::with_resources([
        (SENSOR_VALUE, ResourceValue::Float(value)),
        (SENSOR_UNITS, ResourceValue::from(units)),
        (MIN_MEASURED, ResourceValue::Float(min_measured)),
        (MAX_MEASURED, ResourceValue::Float(max_measured)),
        (MIN_RANGE, ResourceValue::Float(min_range)),
        (MAX_RANGE, ResourceValue::Float(max_range)),
        (APPLICATION_TYPE, ResourceValue::from(application)),
    ]);

    Object::new(object_id, name)
        .with_dynamics(dynamics)
        .define(
            SENSOR_VALUE,
            read("Sensor Value", ValueType::Float).units(units).mandatory(),
        )
        .define(SENSOR_UNITS, read("Sensor Units", ValueType::String))
        .define(
            MIN_MEASURED,
            read("Min Measured Value", ValueType::Float).units(units),
        )
        .define(
            MAX_MEASURED,
            read("Max Measured Value", ValueType::Float).units(units),
        )
        .define(MIN_RANGE, read("Min Range Value", ValueType::Float).units(units))
        .define(MAX_RANGE, read("Max Range Value", ValueType::Float).units(units))
        .define(
            RESET_MIN_MAX,
            ResourceDefinition::new(
                "Reset Min and Max Measured Values",
                ValueType::None,
                Access::Execute,
            ),
        )
        .define(
            APPLICATION_TYPE,
            ResourceDefinition::new("Application Type", ValueType::String, Access::ReadWrite),
        )
        .with_instance(0, instance)
}

pub fn temperature_object() -> Object {
    ipso_sensor(
        sensor::TEMPERATURE_OBJECT_ID,
        "Temperature",
        "Cel",
        "Temperature Sensor",
        [BASE_TEMPERATURE, 18.0, 28.0, -40.0, 85.0],
        Dynamics::Temperature,
    )
}

pub fn humidity_object() -> Object {
    ipso_sensor(
        sensor::HUMIDITY_OBJECT_ID,
        "Humidity",
        "%RH",
        "Humidity Sensor",
        [BASE_HUMIDITY, 30.0, 80.0, 0.0, 100.0],
        Dynamics::Humidity,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_objects_have_single_instance() {
        let objects = standard_objects("coap://127.0.0.1:5683", "U");
        let ids: Vec<ObjectId> = objects.iter().map(|o| o.id).collect();
        assert_eq!(ids, vec![0, 3, 4, 6, 3303, 3304]);
        for object in &objects {
            assert_eq!(object.instance_ids(), vec![0], "object {}", object.id);
        }
    }

    #[test]
    fn test_security_carries_server_uri() {
        let object = security_object("coap://leshan.local:5683");
        let instance = object.instance(0).unwrap();
        assert_eq!(
            instance.get(security::SERVER_URI),
            Some(&ResourceValue::String("coap://leshan.local:5683".to_string()))
        );
        assert_eq!(
            instance.get(security::SECURITY_MODE),
            Some(&ResourceValue::Integer(3))
        );
    }

    #[test]
    fn test_temperature_layout() {
        let object = temperature_object();
        let instance = object.instance(0).unwrap();
        assert_eq!(
            instance.resource_ids(),
            vec![5601, 5602, 5603, 5604, 5700, 5701, 5750]
        );
        // Executable reset is defined but holds no value
        assert!(object.definition(sensor::RESET_MIN_MAX).is_some());
        assert!(!instance.contains(sensor::RESET_MIN_MAX));
    }

    #[test]
    fn test_device_identity() {
        let object = device_object("U");
        let instance = object.instance(0).unwrap();
        assert_eq!(
            instance.get(device::FIRMWARE_VERSION),
            Some(&ResourceValue::String("1.0.0".to_string()))
        );
        assert_eq!(
            instance.get(device::SERIAL_NUMBER),
            Some(&ResourceValue::String("001".to_string()))
        );
        assert_eq!(
            instance.get(device::BINDING_MODE),
            Some(&ResourceValue::String("U".to_string()))
        );
    }
}
