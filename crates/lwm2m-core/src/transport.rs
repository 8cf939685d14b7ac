//! Transport collaborator contract
//!
//! The client decides what to send, when, and how to answer inbound reads.
//! Message encoding, delivery, retransmission and addressing belong to the
//! [`Transport`] implementation.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Request timed out")]
    Timeout,
    #[error("Request reset by peer")]
    Reset,
    #[error("Transport closed")]
    Closed,
    #[error("Invalid server URI: {0}")]
    InvalidUri(String),
    #[error("Malformed message: {0}")]
    Malformed(String),
}

/// Request method
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
        };
        write!(f, "{}", name)
    }
}

/// Response status, written `class.detail` (e.g. 2.05)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResponseCode {
    pub class: u8,
    pub detail: u8,
}

impl ResponseCode {
    pub const CREATED: Self = Self::new(2, 1);
    pub const DELETED: Self = Self::new(2, 2);
    pub const CHANGED: Self = Self::new(2, 4);
    pub const CONTENT: Self = Self::new(2, 5);
    pub const BAD_REQUEST: Self = Self::new(4, 0);
    pub const NOT_FOUND: Self = Self::new(4, 4);
    pub const METHOD_NOT_ALLOWED: Self = Self::new(4, 5);
    pub const INTERNAL_SERVER_ERROR: Self = Self::new(5, 0);

    pub const fn new(class: u8, detail: u8) -> Self {
        Self { class, detail }
    }

    pub fn is_success(self) -> bool {
        self.class == 2
    }
}

impl fmt::Display for ResponseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}", self.class, self.detail)
    }
}

/// Content-format tag from the CoRE registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContentFormat(pub u16);

impl ContentFormat {
    pub const TEXT_PLAIN: Self = Self(0);
    pub const LINK_FORMAT: Self = Self(40);
}

/// Outbound request to the management server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub method: Method,
    /// Path relative to the server, segments joined by `/` (e.g. `rd/5a3f`)
    pub path: String,
    /// Query parameters, each `key=value`
    pub query: Vec<String>,
    pub content_format: Option<ContentFormat>,
    pub payload: Vec<u8>,
}

impl Request {
    pub fn new(method: Method, path: &str) -> Self {
        Self {
            method,
            path: path.trim_matches('/').to_string(),
            query: Vec::new(),
            content_format: None,
            payload: Vec::new(),
        }
    }

    pub fn get(path: &str) -> Self {
        Self::new(Method::Get, path)
    }

    pub fn post(path: &str) -> Self {
        Self::new(Method::Post, path)
    }

    pub fn delete(path: &str) -> Self {
        Self::new(Method::Delete, path)
    }

    pub fn query(mut self, key: &str, value: impl fmt::Display) -> Self {
        self.query.push(format!("{}={}", key, value));
        self
    }

    pub fn payload(mut self, content_format: ContentFormat, payload: Vec<u8>) -> Self {
        self.content_format = Some(content_format);
        self.payload = payload;
        self
    }

    /// Path segments, empty segments dropped
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.path.split('/').filter(|s| !s.is_empty())
    }
}

/// Response from the management server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub code: ResponseCode,
    /// Server-assigned location (joined location path), if any
    pub location: Option<String>,
    pub payload: Vec<u8>,
}

impl Response {
    pub fn new(code: ResponseCode) -> Self {
        Self {
            code,
            location: None,
            payload: Vec::new(),
        }
    }

    pub fn payload_text(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }
}

/// Request received from the management server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundRequest {
    pub method: Method,
    /// Absolute address, e.g. `/3303/0/5700`
    pub path: String,
}

/// Answer to an [`InboundRequest`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundResponse {
    pub code: ResponseCode,
    pub content_format: Option<ContentFormat>,
    pub payload: Vec<u8>,
}

impl OutboundResponse {
    pub fn status(code: ResponseCode) -> Self {
        Self {
            code,
            content_format: None,
            payload: Vec::new(),
        }
    }

    /// 2.05 with a text/plain payload
    pub fn text(body: String) -> Self {
        Self {
            code: ResponseCode::CONTENT,
            content_format: Some(ContentFormat::TEXT_PLAIN),
            payload: body.into_bytes(),
        }
    }

    /// 2.05 without a content-format tag
    pub fn untagged(body: String) -> Self {
        Self {
            code: ResponseCode::CONTENT,
            content_format: None,
            payload: body.into_bytes(),
        }
    }

    pub fn not_found() -> Self {
        Self::status(ResponseCode::NOT_FOUND)
    }

    pub fn internal_error() -> Self {
        Self::status(ResponseCode::INTERNAL_SERVER_ERROR)
    }
}

/// Answers inbound requests for one address
pub trait RequestHandler: Send + Sync {
    fn handle(&self, request: &InboundRequest) -> OutboundResponse;
}

/// Address → handler table served by the transport
pub type AddressTable = BTreeMap<String, Arc<dyn RequestHandler>>;

/// Request/response transport to the management server
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send a request and wait for its response (retransmission and
    /// timeouts are the transport's own policy)
    async fn send_request(&self, request: Request) -> Result<Response, TransportError>;

    /// Install the address table used to answer inbound requests,
    /// replacing any previous table
    fn serve(&self, table: AddressTable);

    /// Stop serving and release the underlying socket
    async fn shutdown(&self);
}
