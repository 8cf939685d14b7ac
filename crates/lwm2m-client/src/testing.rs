//! Scripted in-memory transport for unit tests

use async_trait::async_trait;
use lwm2m_core::{
    AddressTable, InboundRequest, Method, OutboundResponse, Request, Response, ResponseCode,
    Transport, TransportError,
};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};

pub enum Scripted {
    Reply(Response),
    Fail(TransportError),
    /// Never answers
    Hang,
}

/// Records every request and answers them from a script, in order.
/// An exhausted script answers with a timeout.
#[derive(Default)]
pub struct MockTransport {
    sent: Mutex<Vec<Request>>,
    script: Mutex<VecDeque<Scripted>>,
    table: Mutex<Option<AddressTable>>,
    shut_down: AtomicBool,
}

impl MockTransport {
    pub fn new(script: impl IntoIterator<Item = Scripted>) -> Self {
        Self {
            script: Mutex::new(script.into_iter().collect()),
            ..Default::default()
        }
    }

    pub fn push(&self, step: Scripted) {
        self.script.lock().push_back(step);
    }

    pub fn sent(&self) -> Vec<Request> {
        self.sent.lock().clone()
    }

    pub fn sent_with(&self, method: Method, path: &str) -> usize {
        self.sent
            .lock()
            .iter()
            .filter(|r| r.method == method && r.path == path)
            .count()
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }

    pub fn served_addresses(&self) -> Vec<String> {
        self.table
            .lock()
            .as_ref()
            .map(|t| t.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Answer an inbound GET through the served table
    pub fn inbound_get(&self, path: &str) -> Option<OutboundResponse> {
        let handler = self.table.lock().as_ref()?.get(path).cloned()?;
        Some(handler.handle(&InboundRequest {
            method: Method::Get,
            path: path.to_string(),
        }))
    }
}

pub fn reply(code: ResponseCode) -> Scripted {
    Scripted::Reply(Response::new(code))
}

pub fn created(location: &str) -> Scripted {
    Scripted::Reply(Response {
        code: ResponseCode::CREATED,
        location: Some(location.to_string()),
        payload: Vec::new(),
    })
}

#[async_trait]
impl Transport for MockTransport {
    async fn send_request(&self, request: Request) -> Result<Response, TransportError> {
        self.sent.lock().push(request);
        let step = self.script.lock().pop_front();
        match step {
            Some(Scripted::Reply(response)) => Ok(response),
            Some(Scripted::Fail(e)) => Err(e),
            Some(Scripted::Hang) => std::future::pending().await,
            None => Err(TransportError::Timeout),
        }
    }

    fn serve(&self, table: AddressTable) {
        *self.table.lock() = Some(table);
    }

    async fn shutdown(&self) {
        self.shut_down.store(true, Ordering::SeqCst);
        *self.table.lock() = None;
    }
}
