//! Client error taxonomy

use crate::registration::RegistrationState;
use lwm2m_core::{FormatError, ResponseCode, TransportError};
use thiserror::Error;

/// Registration could not be established
#[derive(Error, Debug)]
pub enum ConnectError {
    #[error("Registration request failed: {0}")]
    Transport(#[from] TransportError),
    #[error("Registration rejected with {status}: {message}")]
    Rejected { status: ResponseCode, message: String },
    #[error("Cannot register while {0}")]
    InvalidState(RegistrationState),
}

/// Registration update (keep-alive) failed
#[derive(Error, Debug)]
pub enum UpdateError {
    #[error("Update request failed: {0}")]
    Transport(#[from] TransportError),
    #[error("Update rejected with {status}: {message}")]
    Rejected { status: ResponseCode, message: String },
}

/// Deregistration failed
#[derive(Error, Debug)]
pub enum DeregisterError {
    #[error("Deregister request failed: {0}")]
    Transport(#[from] TransportError),
    #[error("Deregister rejected with {status}: {message}")]
    Rejected { status: ResponseCode, message: String },
}

/// Unexpected fault while answering an inbound request
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("Failed to format {path}: {source}")]
    Format {
        path: String,
        #[source]
        source: FormatError,
    },
}

#[derive(Error, Debug)]
pub enum ClientError {
    #[error(transparent)]
    Connect(#[from] ConnectError),
    #[error("Shutdown requested before registration completed")]
    Interrupted,
    #[error("Client is not registered (state: {0})")]
    NotConnected(RegistrationState),
}
