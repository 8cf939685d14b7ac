//! Async CoAP over UDP transport
//!
//! One socket serves both directions: confirmable requests to the server
//! (with exponential back-off retransmission) and the server's inbound
//! requests, answered from the installed [`AddressTable`].

use async_trait::async_trait;
use lwm2m_core::{
    AddressTable, InboundRequest, OutboundResponse, Request, Response, ResponseCode, Transport,
    TransportError,
};
use parking_lot::{Mutex, RwLock};
use rand::Rng;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{timeout, Instant};
use tracing::{debug, trace, warn};

use crate::message::{
    encode_uint, method_code, method_from_code, option, response_code, response_from_code,
    Message, MessageType,
};

/// Default CoAP port
pub const COAP_PORT: u16 = 5683;

const MAX_DATAGRAM: usize = 1152;
const TOKEN_LEN: usize = 4;

/// Retransmission parameters (RFC 7252 §4.8)
#[derive(Debug, Clone)]
pub struct TransmissionParams {
    pub ack_timeout: Duration,
    pub ack_random_factor: f64,
    pub max_retransmit: u32,
    /// How long to wait for a separate response after an empty ACK
    pub exchange_lifetime: Duration,
}

impl Default for TransmissionParams {
    fn default() -> Self {
        Self {
            ack_timeout: Duration::from_secs(2),
            ack_random_factor: 1.5,
            max_retransmit: 4,
            exchange_lifetime: Duration::from_secs(247),
        }
    }
}

impl TransmissionParams {
    /// Initial timeout, randomized in [ACK_TIMEOUT, ACK_TIMEOUT * factor]
    fn initial_timeout(&self) -> Duration {
        let factor = rand::thread_rng().gen_range(1.0..=self.ack_random_factor.max(1.0));
        self.ack_timeout.mul_f64(factor)
    }
}

/// Split `coap://host[:port]` or `host:port` into host and port
pub fn parse_server_uri(uri: &str) -> Result<(String, u16), TransportError> {
    let rest = match uri.split_once("://") {
        Some(("coap", rest)) => rest,
        Some((scheme, _)) => {
            return Err(TransportError::InvalidUri(format!(
                "unsupported scheme '{}' in {}",
                scheme, uri
            )))
        }
        None => uri,
    };
    let authority = rest.split('/').next().unwrap_or_default();
    if authority.is_empty() {
        return Err(TransportError::InvalidUri(uri.to_string()));
    }

    // Bracketed IPv6 literal
    if let Some(stripped) = authority.strip_prefix('[') {
        let (host, tail) = stripped
            .split_once(']')
            .ok_or_else(|| TransportError::InvalidUri(uri.to_string()))?;
        let port = match tail.strip_prefix(':') {
            Some(p) => p
                .parse()
                .map_err(|_| TransportError::InvalidUri(uri.to_string()))?,
            None => COAP_PORT,
        };
        return Ok((host.to_string(), port));
    }

    match authority.rsplit_once(':') {
        Some((host, port)) => {
            let port = port
                .parse()
                .map_err(|_| TransportError::InvalidUri(uri.to_string()))?;
            Ok((host.to_string(), port))
        }
        None => Ok((authority.to_string(), COAP_PORT)),
    }
}

enum ExchangeEvent {
    Acknowledged,
    Reset,
    Response(Message),
}

struct Pending {
    message_id: u16,
    events: mpsc::UnboundedSender<ExchangeEvent>,
}

/// Encoded reply to an inbound confirmable request, resent verbatim when
/// the peer retransmits the same message id
struct CachedReply {
    expires: Instant,
    bytes: Vec<u8>,
}

struct Shared {
    socket: UdpSocket,
    server: SocketAddr,
    pending: Mutex<HashMap<Vec<u8>, Pending>>,
    replies: Mutex<HashMap<(SocketAddr, u16), CachedReply>>,
    exchange_lifetime: Duration,
    routes: RwLock<AddressTable>,
    next_message_id: AtomicU16,
    closed: AtomicBool,
}

impl Shared {
    fn next_message_id(&self) -> u16 {
        self.next_message_id.fetch_add(1, Ordering::Relaxed)
    }

    async fn send(&self, message: &Message, peer: SocketAddr) {
        match message.encode() {
            Ok(bytes) => self.send_bytes(&bytes, peer).await,
            Err(e) => warn!(error = %e, "Failed to encode CoAP message"),
        }
    }

    async fn send_bytes(&self, bytes: &[u8], peer: SocketAddr) {
        if let Err(e) = self.socket.send_to(bytes, peer).await {
            warn!(peer = %peer, error = %e, "Failed to send CoAP message");
        }
    }

    fn cached_reply(&self, peer: SocketAddr, message_id: u16) -> Option<Vec<u8>> {
        let now = Instant::now();
        let mut replies = self.replies.lock();
        replies.retain(|_, reply| reply.expires > now);
        replies.get(&(peer, message_id)).map(|reply| reply.bytes.clone())
    }

    fn cache_reply(&self, peer: SocketAddr, message_id: u16, bytes: Vec<u8>) {
        let expires = Instant::now() + self.exchange_lifetime;
        self.replies
            .lock()
            .insert((peer, message_id), CachedReply { expires, bytes });
    }

    async fn handle_datagram(&self, message: Message, peer: SocketAddr) {
        if message.is_empty() {
            self.handle_empty(message, peer).await;
        } else if message.is_response() {
            self.handle_response(message, peer).await;
        } else if message.is_request() {
            self.handle_request(message, peer).await;
        } else {
            debug!(peer = %peer, code = message.code, "Ignoring message with reserved code class");
        }
    }

    async fn handle_empty(&self, message: Message, peer: SocketAddr) {
        match message.kind {
            MessageType::Acknowledgement | MessageType::Reset => {
                if peer != self.server {
                    debug!(peer = %peer, "Ignoring empty message from unknown peer");
                    return;
                }
                let event = if message.kind == MessageType::Reset {
                    ExchangeEvent::Reset
                } else {
                    ExchangeEvent::Acknowledged
                };
                let pending = self.pending.lock();
                if let Some(p) = pending.values().find(|p| p.message_id == message.message_id) {
                    let _ = p.events.send(event);
                } else {
                    trace!(mid = message.message_id, "Empty message for unknown exchange");
                }
            }
            MessageType::Confirmable => {
                // CoAP ping
                self.send(&Message::empty(MessageType::Reset, message.message_id), peer)
                    .await;
            }
            MessageType::NonConfirmable => {}
        }
    }

    async fn handle_response(&self, message: Message, peer: SocketAddr) {
        if peer != self.server {
            debug!(peer = %peer, mid = message.message_id, "Ignoring response from unknown peer");
            return;
        }
        let is_confirmable = message.kind == MessageType::Confirmable;
        let message_id = message.message_id;

        let delivered = {
            let pending = self.pending.lock();
            match pending.get(&message.token) {
                Some(p) => p.events.send(ExchangeEvent::Response(message)).is_ok(),
                None => false,
            }
        };

        if is_confirmable {
            let kind = if delivered {
                MessageType::Acknowledgement
            } else {
                MessageType::Reset
            };
            self.send(&Message::empty(kind, message_id), peer).await;
        }
        if !delivered {
            debug!(peer = %peer, mid = message_id, "Response for unknown exchange");
        }
    }

    async fn handle_request(&self, message: Message, peer: SocketAddr) {
        let is_confirmable = message.kind == MessageType::Confirmable;
        if is_confirmable {
            if let Some(bytes) = self.cached_reply(peer, message.message_id) {
                debug!(peer = %peer, mid = message.message_id, "Duplicate request, resending reply");
                self.send_bytes(&bytes, peer).await;
                return;
            }
        }

        let path = format!("/{}", message.joined_path(option::URI_PATH));
        let response = match method_from_code(message.code) {
            Some(method) => {
                let handler = self.routes.read().get(&path).cloned();
                match handler {
                    Some(handler) => handler.handle(&InboundRequest {
                        method,
                        path: path.clone(),
                    }),
                    None => {
                        debug!(path = %path, "No route for inbound request");
                        OutboundResponse::not_found()
                    }
                }
            }
            None => OutboundResponse::status(ResponseCode::METHOD_NOT_ALLOWED),
        };

        trace!(path = %path, code = %response.code, "Answering inbound request");

        let request_id = message.message_id;
        let (kind, message_id) = if is_confirmable {
            (MessageType::Acknowledgement, request_id)
        } else {
            (MessageType::NonConfirmable, self.next_message_id())
        };
        let mut reply = Message::new(kind, response_code(response.code), message_id, message.token);
        if let Some(format) = response.content_format {
            reply.add_option(option::CONTENT_FORMAT, encode_uint(format.0 as u32));
        }
        reply.payload = response.payload;

        let bytes = match reply.encode() {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(error = %e, "Failed to encode CoAP reply");
                return;
            }
        };
        if is_confirmable {
            self.cache_reply(peer, request_id, bytes.clone());
        }
        self.send_bytes(&bytes, peer).await;
    }
}

/// Removes the exchange from the pending table when the request finishes
/// or its future is dropped
struct PendingGuard<'a> {
    shared: &'a Shared,
    token: Vec<u8>,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.shared.pending.lock().remove(&self.token);
    }
}

async fn receive_loop(shared: Arc<Shared>) {
    let mut buf = vec![0u8; MAX_DATAGRAM];
    loop {
        let (len, peer) = match shared.socket.recv_from(&mut buf).await {
            Ok(received) => received,
            Err(e) => {
                // ICMP errors surface here on some platforms
                debug!(error = %e, "UDP receive failed");
                continue;
            }
        };

        match Message::decode(&buf[..len]) {
            Ok(message) => shared.handle_datagram(message, peer).await,
            Err(e) => debug!(peer = %peer, error = %e, "Dropping malformed datagram"),
        }
    }
}

/// CoAP transport bound to one local UDP socket
pub struct UdpTransport {
    shared: Arc<Shared>,
    params: TransmissionParams,
    receiver: Mutex<Option<JoinHandle<()>>>,
}

impl UdpTransport {
    /// Resolve the server, bind a local socket and start receiving
    pub async fn bind(
        server_uri: &str,
        local_port: u16,
        params: TransmissionParams,
    ) -> Result<Self, TransportError> {
        let (host, port) = parse_server_uri(server_uri)?;
        let server = tokio::net::lookup_host((host.as_str(), port))
            .await?
            .next()
            .ok_or_else(|| TransportError::InvalidUri(server_uri.to_string()))?;

        let bind_addr: SocketAddr = if server.is_ipv6() {
            SocketAddr::from(([0u16; 8], local_port))
        } else {
            SocketAddr::from(([0u8; 4], local_port))
        };
        let socket = UdpSocket::bind(bind_addr).await?;
        debug!(local = ?socket.local_addr().ok(), server = %server, "CoAP transport bound");

        let shared = Arc::new(Shared {
            socket,
            server,
            pending: Mutex::new(HashMap::new()),
            replies: Mutex::new(HashMap::new()),
            exchange_lifetime: params.exchange_lifetime,
            routes: RwLock::new(AddressTable::new()),
            next_message_id: AtomicU16::new(rand::random()),
            closed: AtomicBool::new(false),
        });
        let receiver = tokio::spawn(receive_loop(shared.clone()));

        Ok(Self {
            shared,
            params,
            receiver: Mutex::new(Some(receiver)),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, TransportError> {
        Ok(self.shared.socket.local_addr()?)
    }

    pub fn server_addr(&self) -> SocketAddr {
        self.shared.server
    }

    fn build_message(&self, request: &Request, message_id: u16, token: Vec<u8>) -> Message {
        let mut message = Message::new(
            MessageType::Confirmable,
            method_code(request.method),
            message_id,
            token,
        );
        for segment in request.segments() {
            message.add_option(option::URI_PATH, segment.as_bytes().to_vec());
        }
        if let Some(format) = request.content_format {
            message.add_option(option::CONTENT_FORMAT, encode_uint(format.0 as u32));
        }
        for query in &request.query {
            message.add_option(option::URI_QUERY, query.as_bytes().to_vec());
        }
        message.payload = request.payload.clone();
        message
    }
}

fn to_response(message: &Message) -> Response {
    let location = message.joined_path(option::LOCATION_PATH);
    Response {
        code: response_from_code(message.code),
        location: if location.is_empty() { None } else { Some(location) },
        payload: message.payload.clone(),
    }
}

#[async_trait]
impl Transport for UdpTransport {
    async fn send_request(&self, request: Request) -> Result<Response, TransportError> {
        if self.shared.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }

        let token = rand::thread_rng().gen::<[u8; TOKEN_LEN]>().to_vec();
        let message_id = self.shared.next_message_id();
        let message = self.build_message(&request, message_id, token.clone());
        let packet = message
            .encode()
            .map_err(|e| TransportError::Malformed(e.to_string()))?;

        let (tx, mut rx) = mpsc::unbounded_channel();
        self.shared.pending.lock().insert(
            token.clone(),
            Pending {
                message_id,
                events: tx,
            },
        );
        let _guard = PendingGuard {
            shared: &self.shared,
            token,
        };

        trace!(
            method = %request.method,
            path = %request.path,
            mid = message_id,
            len = packet.len(),
            "Sending CoAP request"
        );
        self.shared.socket.send_to(&packet, self.shared.server).await?;

        let mut wait = self.params.initial_timeout();
        let mut retransmissions = 0;
        let mut acknowledged = false;

        loop {
            let deadline = if acknowledged {
                self.params.exchange_lifetime
            } else {
                wait
            };

            match timeout(deadline, rx.recv()).await {
                Ok(Some(ExchangeEvent::Response(reply))) => {
                    let response = to_response(&reply);
                    debug!(
                        method = %request.method,
                        path = %request.path,
                        code = %response.code,
                        "Received CoAP response"
                    );
                    return Ok(response);
                }
                Ok(Some(ExchangeEvent::Acknowledged)) => {
                    trace!(mid = message_id, "Request acknowledged, awaiting separate response");
                    acknowledged = true;
                }
                Ok(Some(ExchangeEvent::Reset)) => return Err(TransportError::Reset),
                Ok(None) => return Err(TransportError::Closed),
                Err(_) if acknowledged || retransmissions >= self.params.max_retransmit => {
                    return Err(TransportError::Timeout);
                }
                Err(_) => {
                    retransmissions += 1;
                    wait *= 2;
                    debug!(
                        mid = message_id,
                        attempt = retransmissions,
                        "Retransmitting CoAP request"
                    );
                    self.shared.socket.send_to(&packet, self.shared.server).await?;
                }
            }
        }
    }

    fn serve(&self, table: AddressTable) {
        debug!(addresses = table.len(), "Installing CoAP address table");
        *self.shared.routes.write() = table;
    }

    async fn shutdown(&self) {
        self.shared.closed.store(true, Ordering::Release);
        let receiver = self.receiver.lock().take();
        if let Some(receiver) = receiver {
            receiver.abort();
        }
        // Dropping the senders fails every in-flight exchange with Closed
        self.shared.pending.lock().clear();
        self.shared.replies.lock().clear();
        self.shared.routes.write().clear();
        debug!("CoAP transport shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lwm2m_core::{ContentFormat, RequestHandler};

    #[test]
    fn test_parse_server_uri() {
        assert_eq!(
            parse_server_uri("coap://192.168.0.100:5683").unwrap(),
            ("192.168.0.100".to_string(), 5683)
        );
        assert_eq!(
            parse_server_uri("coap://leshan.local").unwrap(),
            ("leshan.local".to_string(), COAP_PORT)
        );
        assert_eq!(
            parse_server_uri("10.0.0.1:15683").unwrap(),
            ("10.0.0.1".to_string(), 15683)
        );
        assert_eq!(
            parse_server_uri("coap://[::1]:5684").unwrap(),
            ("::1".to_string(), 5684)
        );
        assert!(parse_server_uri("coaps://host:5684").is_err());
        assert!(parse_server_uri("coap://").is_err());
        assert!(parse_server_uri("coap://host:port").is_err());
    }

    fn fast_params() -> TransmissionParams {
        TransmissionParams {
            ack_timeout: Duration::from_millis(50),
            ack_random_factor: 1.0,
            max_retransmit: 2,
            exchange_lifetime: Duration::from_millis(500),
        }
    }

    async fn fake_server() -> (UdpSocket, String) {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let uri = format!("coap://{}", socket.local_addr().unwrap());
        (socket, uri)
    }

    #[tokio::test]
    async fn test_registration_round_trip() {
        let (server, uri) = fake_server().await;
        let transport = UdpTransport::bind(&uri, 0, fast_params()).await.unwrap();

        let server_task = tokio::spawn(async move {
            let mut buf = [0u8; 1152];
            let (len, peer) = server.recv_from(&mut buf).await.unwrap();
            let request = Message::decode(&buf[..len]).unwrap();
            assert_eq!(request.kind, MessageType::Confirmable);
            assert_eq!(request.joined_path(option::URI_PATH), "rd");
            assert_eq!(request.content_format(), Some(40));
            assert_eq!(request.payload, b"</3/0>");

            let mut reply = Message::new(
                MessageType::Acknowledgement,
                response_code(ResponseCode::CREATED),
                request.message_id,
                request.token.clone(),
            );
            reply.add_option(option::LOCATION_PATH, b"rd".to_vec());
            reply.add_option(option::LOCATION_PATH, b"5a3f".to_vec());
            server.send_to(&reply.encode().unwrap(), peer).await.unwrap();
        });

        let response = transport
            .send_request(
                Request::post("rd")
                    .query("ep", "node-1")
                    .payload(ContentFormat::LINK_FORMAT, b"</3/0>".to_vec()),
            )
            .await
            .unwrap();
        server_task.await.unwrap();

        assert_eq!(response.code, ResponseCode::CREATED);
        assert_eq!(response.location.as_deref(), Some("rd/5a3f"));
    }

    #[tokio::test]
    async fn test_unanswered_request_times_out() {
        let (_server, uri) = fake_server().await;
        let transport = UdpTransport::bind(&uri, 0, fast_params()).await.unwrap();

        let result = transport.send_request(Request::get("rd")).await;
        assert!(matches!(result, Err(TransportError::Timeout)));
    }

    struct Fixed;

    impl RequestHandler for Fixed {
        fn handle(&self, _request: &InboundRequest) -> OutboundResponse {
            OutboundResponse::text("22.5".to_string())
        }
    }

    #[tokio::test]
    async fn test_inbound_requests_use_address_table() {
        let (server, uri) = fake_server().await;
        let transport = UdpTransport::bind(&uri, 0, fast_params()).await.unwrap();
        let mut table = AddressTable::new();
        table.insert("/3303/0/5700".to_string(), Arc::new(Fixed) as Arc<dyn RequestHandler>);
        transport.serve(table);

        let client_port = transport.local_addr().unwrap().port();
        let client: SocketAddr = ([127, 0, 0, 1], client_port).into();
        let mut buf = [0u8; 1152];

        let mut read = Message::new(MessageType::Confirmable, 1, 0x1234, vec![7]);
        for segment in ["3303", "0", "5700"] {
            read.add_option(option::URI_PATH, segment.as_bytes().to_vec());
        }
        server.send_to(&read.encode().unwrap(), client).await.unwrap();
        let (len, _) = server.recv_from(&mut buf).await.unwrap();
        let reply = Message::decode(&buf[..len]).unwrap();
        assert_eq!(reply.kind, MessageType::Acknowledgement);
        assert_eq!(reply.message_id, 0x1234);
        assert_eq!(reply.token, vec![7]);
        assert_eq!(response_from_code(reply.code), ResponseCode::CONTENT);
        assert_eq!(reply.content_format(), Some(0));
        assert_eq!(reply.payload, b"22.5");

        let mut unknown = Message::new(MessageType::Confirmable, 1, 0x1235, vec![8]);
        unknown.add_option(option::URI_PATH, b"9".to_vec());
        server.send_to(&unknown.encode().unwrap(), client).await.unwrap();
        let (len, _) = server.recv_from(&mut buf).await.unwrap();
        let reply = Message::decode(&buf[..len]).unwrap();
        assert_eq!(response_from_code(reply.code), ResponseCode::NOT_FOUND);

        transport.shutdown().await;
        let result = transport.send_request(Request::get("rd")).await;
        assert!(matches!(result, Err(TransportError::Closed)));
    }

    /// Answers with how many times it has been called
    #[derive(Default)]
    struct Counting {
        calls: std::sync::atomic::AtomicUsize,
    }

    impl RequestHandler for Counting {
        fn handle(&self, _request: &InboundRequest) -> OutboundResponse {
            let calls = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            OutboundResponse::text(calls.to_string())
        }
    }

    #[tokio::test]
    async fn test_duplicate_confirmable_request_gets_cached_reply() {
        let (server, uri) = fake_server().await;
        let transport = UdpTransport::bind(&uri, 0, fast_params()).await.unwrap();
        let handler = Arc::new(Counting::default());
        let mut table = AddressTable::new();
        table.insert("/3/0/9".to_string(), handler.clone() as Arc<dyn RequestHandler>);
        transport.serve(table);

        let client: SocketAddr = ([127, 0, 0, 1], transport.local_addr().unwrap().port()).into();
        let mut read = Message::new(MessageType::Confirmable, 1, 0x4242, vec![1, 2]);
        for segment in ["3", "0", "9"] {
            read.add_option(option::URI_PATH, segment.as_bytes().to_vec());
        }
        let packet = read.encode().unwrap();
        let mut buf = [0u8; 1152];

        let mut payloads = Vec::new();
        for _ in 0..2 {
            server.send_to(&packet, client).await.unwrap();
            let (len, _) = server.recv_from(&mut buf).await.unwrap();
            let reply = Message::decode(&buf[..len]).unwrap();
            assert_eq!(reply.message_id, 0x4242);
            payloads.push(reply.payload);
        }

        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
        assert_eq!(payloads[0], payloads[1]);

        // A new message id is a new request
        let mut next = read.clone();
        next.message_id = 0x4243;
        server.send_to(&next.encode().unwrap(), client).await.unwrap();
        let (len, _) = server.recv_from(&mut buf).await.unwrap();
        let reply = Message::decode(&buf[..len]).unwrap();
        assert_eq!(reply.payload, b"2");
        assert_eq!(handler.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_responses_from_other_peers_are_ignored() {
        let (server, uri) = fake_server().await;
        let stranger = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let transport = UdpTransport::bind(&uri, 0, fast_params()).await.unwrap();

        let server_task = tokio::spawn(async move {
            let mut buf = [0u8; 1152];
            let (len, peer) = server.recv_from(&mut buf).await.unwrap();
            let request = Message::decode(&buf[..len]).unwrap();

            let spoofed = Message::new(
                MessageType::Acknowledgement,
                response_code(ResponseCode::CONTENT),
                request.message_id,
                request.token.clone(),
            );
            stranger.send_to(&spoofed.encode().unwrap(), peer).await.unwrap();
            tokio::time::sleep(Duration::from_millis(10)).await;

            let genuine = Message::new(
                MessageType::Acknowledgement,
                response_code(ResponseCode::CREATED),
                request.message_id,
                request.token.clone(),
            );
            server.send_to(&genuine.encode().unwrap(), peer).await.unwrap();
        });

        let response = transport.send_request(Request::post("rd")).await.unwrap();
        server_task.await.unwrap();
        assert_eq!(response.code, ResponseCode::CREATED);
    }
}
