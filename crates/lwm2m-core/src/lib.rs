//! LwM2M Core - Object model, registry and transport contract
//!
//! This crate provides the foundational pieces of the simulated device:
//! - Typed object / instance / resource model with resource metadata
//! - The resource registry that answers reads and periodic refreshes
//! - The sensor simulation engine producing time-varying values
//! - The transport collaborator contract consumed by the client

pub mod object;
pub mod objects;
pub mod registry;
pub mod simulation;
pub mod transport;
pub mod value;

pub use object::{Access, Instance, InstanceId, Object, ObjectId, ResourceDefinition, ResourceId, ValueType};
pub use registry::{LookupError, Registry, SharedRegistry};
pub use simulation::Dynamics;
pub use transport::{
    AddressTable, ContentFormat, InboundRequest, Method, OutboundResponse, Request, RequestHandler,
    Response, ResponseCode, Transport, TransportError,
};
pub use value::{FormatError, ResourceValue};
