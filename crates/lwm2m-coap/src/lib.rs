//! LwM2M CoAP - CoAP over UDP transport
//!
//! This crate implements the transport contract of `lwm2m-core` with a
//! minimal RFC 7252 message codec and an async UDP socket that both sends
//! confirmable requests to the management server and answers its reads.

pub mod message;
pub mod transport;

pub use message::{CodecError, Message, MessageType};
pub use transport::{parse_server_uri, TransmissionParams, UdpTransport, COAP_PORT};
