//! LwM2M Client - Device-side lifecycle on top of a transport
//!
//! - Registration lifecycle (register, update, deregister)
//! - Inbound read dispatch against the resource registry
//! - Runtime loop driving update and sensor refresh cadences

pub mod client;
pub mod dispatcher;
pub mod error;
pub mod registration;

#[cfg(test)]
pub(crate) mod testing;

pub use client::{Client, ClientSettings, ShutdownHandle};
pub use dispatcher::{Address, Dispatcher};
pub use error::{ClientError, ConnectError, DeregisterError, DispatchError, UpdateError};
pub use registration::{RegistrationController, RegistrationParams, RegistrationState};
