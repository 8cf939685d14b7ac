//! Inbound read dispatch
//!
//! The route table is derived once from the registry's contents. Every
//! object, instance and resource present at that point gets an address;
//! anything added later is not routable.

use lwm2m_core::{
    AddressTable, InboundRequest, InstanceId, Method, ObjectId, OutboundResponse, RequestHandler,
    ResourceId, ResponseCode, SharedRegistry,
};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error};

use crate::error::DispatchError;

/// A routable address
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Address {
    Object(ObjectId),
    Instance(ObjectId, InstanceId),
    Resource(ObjectId, InstanceId, ResourceId),
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Object(o) => write!(f, "/{}", o),
            Self::Instance(o, i) => write!(f, "/{}/{}", o, i),
            Self::Resource(o, i, r) => write!(f, "/{}/{}/{}", o, i, r),
        }
    }
}

pub struct Dispatcher {
    registry: SharedRegistry,
    routes: BTreeMap<String, Address>,
}

impl Dispatcher {
    /// Snapshot the registry's object tree into a route table
    pub fn new(registry: SharedRegistry) -> Self {
        let mut routes = BTreeMap::new();
        {
            let registry = registry.lock();
            for object in registry.objects() {
                let address = Address::Object(object.id);
                routes.insert(address.to_string(), address);

                for instance_id in object.instance_ids() {
                    let address = Address::Instance(object.id, instance_id);
                    routes.insert(address.to_string(), address);

                    let resource_ids = object
                        .instance(instance_id)
                        .map(|i| i.resource_ids())
                        .unwrap_or_default();
                    for resource_id in resource_ids {
                        let address = Address::Resource(object.id, instance_id, resource_id);
                        routes.insert(address.to_string(), address);
                    }
                }
            }
        }
        Self { registry, routes }
    }

    /// Number of routable addresses (objects + instances + resources)
    pub fn address_count(&self) -> usize {
        self.routes.len()
    }

    pub fn resolve(&self, path: &str) -> Option<Address> {
        self.routes.get(path).copied()
    }

    /// One handler per address, for the transport to serve
    pub fn address_table(self: &Arc<Self>) -> AddressTable {
        self.routes
            .iter()
            .map(|(path, address)| {
                let route = Route {
                    dispatcher: Arc::clone(self),
                    address: *address,
                };
                (path.clone(), Arc::new(route) as Arc<dyn RequestHandler>)
            })
            .collect()
    }

    /// Answer a request already resolved to an address
    pub fn respond(&self, address: Address, request: &InboundRequest) -> OutboundResponse {
        if request.method != Method::Get {
            debug!(path = %request.path, method = %request.method, "Rejecting non-read request");
            return OutboundResponse::status(ResponseCode::METHOD_NOT_ALLOWED);
        }

        match self.read(address) {
            Ok(response) => response,
            Err(e) => {
                error!(path = %request.path, error = %e, "Failed to answer read");
                OutboundResponse::internal_error()
            }
        }
    }

    fn read(&self, address: Address) -> Result<OutboundResponse, DispatchError> {
        match address {
            Address::Resource(object_id, instance_id, resource_id) => {
                let value = self
                    .registry
                    .lock()
                    .read_resource(object_id, instance_id, resource_id);
                match value {
                    Ok(value) => {
                        let body = value.to_payload().map_err(|source| DispatchError::Format {
                            path: address.to_string(),
                            source,
                        })?;
                        debug!(path = %address, value = %body, "Resource read");
                        Ok(OutboundResponse::text(body))
                    }
                    Err(e) => {
                        debug!(path = %address, error = %e, "Resource not found");
                        Ok(OutboundResponse::not_found())
                    }
                }
            }
            Address::Instance(object_id, instance_id) => {
                let resources = self.registry.lock().list_resources(object_id, instance_id);
                match resources {
                    Ok(ids) if !ids.is_empty() => Ok(OutboundResponse::text(format!(
                        "Object {} instance {} has {} resources",
                        object_id,
                        instance_id,
                        ids.len()
                    ))),
                    _ => Ok(OutboundResponse::not_found()),
                }
            }
            Address::Object(object_id) => {
                let registry = self.registry.lock();
                match registry.object(object_id) {
                    Some(object) => Ok(OutboundResponse::untagged(format!(
                        "LwM2M Object {} ({}) - {} instances",
                        object.id,
                        object.name,
                        object.instance_count()
                    ))),
                    None => Ok(OutboundResponse::not_found()),
                }
            }
        }
    }
}

impl RequestHandler for Dispatcher {
    fn handle(&self, request: &InboundRequest) -> OutboundResponse {
        match self.resolve(&request.path) {
            Some(address) => self.respond(address, request),
            None => OutboundResponse::not_found(),
        }
    }
}

/// Handler bound to a single address
struct Route {
    dispatcher: Arc<Dispatcher>,
    address: Address,
}

impl RequestHandler for Route {
    fn handle(&self, request: &InboundRequest) -> OutboundResponse {
        self.dispatcher.respond(self.address, request)
    }
}
