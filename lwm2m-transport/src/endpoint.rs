//! UDP endpoint serving inbound requests and issuing outbound exchanges

use crate::code::Code;
use crate::exchange::Exchange;
use crate::message::{Message, MessageType};
use crate::option::{number, CoapOption};
use crate::request::{Request, Response};
use crate::router::RouteTable;
use async_trait::async_trait;
use lwm2m_core::{Lwm2mError, Lwm2mResult};
use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Maximum UDP payload size
pub const MAX_DATAGRAM_SIZE: usize = 65507;

/// Length of the tokens generated for outbound requests
const TOKEN_LENGTH: usize = 4;

/// Critical options an inbound request may carry
const UNDERSTOOD_REQUEST_OPTIONS: [u16; 5] = [
    number::URI_HOST,
    number::URI_PORT,
    number::URI_PATH,
    number::URI_QUERY,
    number::ACCEPT,
];

/// How long an answered confirmable request is remembered (EXCHANGE_LIFETIME)
const EXCHANGE_LIFETIME: Duration = Duration::from_secs(247);

type PendingKey = (SocketAddr, Vec<u8>);

type InboundKey = (SocketAddr, u16);

/// Inbound confirmable request by peer and message id
enum Inbound {
    InProgress { received: Instant },
    Answered { received: Instant, reply: Message },
}

impl Inbound {
    fn received(&self) -> Instant {
        match self {
            Inbound::InProgress { received } | Inbound::Answered { received, .. } => *received,
        }
    }
}

struct PendingExchange {
    message_id: u16,
    reply: oneshot::Sender<Lwm2mResult<Message>>,
}

/// CoAP endpoint bound to one UDP socket
///
/// Inbound requests are routed through the shared [`RouteTable`], each on
/// its own task. Outbound exchanges are correlated with their responses by
/// peer address and token. A retransmitted confirmable request is answered
/// with the reply already sent instead of being routed again.
///
/// # Usage Example
/// ```rust,ignore
/// use lwm2m_transport::{CoapEndpoint, RouteTable};
/// use std::sync::Arc;
///
/// let routes = Arc::new(RouteTable::new());
/// let endpoint = CoapEndpoint::bind("0.0.0.0:5683".parse()?, routes).await?;
/// endpoint.serve();
/// ```
pub struct CoapEndpoint {
    socket: UdpSocket,
    routes: Arc<RouteTable>,
    pending: Mutex<HashMap<PendingKey, PendingExchange>>,
    inbound: Mutex<HashMap<InboundKey, Inbound>>,
    next_message_id: AtomicU16,
}

impl CoapEndpoint {
    /// Bind a new endpoint to `address`
    ///
    /// # Errors
    /// Returns error if binding to the address fails
    pub async fn bind(address: SocketAddr, routes: Arc<RouteTable>) -> Lwm2mResult<Arc<Self>> {
        let socket = UdpSocket::bind(address).await.map_err(|e| {
            Lwm2mError::Connection(std::io::Error::new(
                e.kind(),
                format!("Failed to bind to {}: {}", address, e),
            ))
        })?;

        Ok(Arc::new(Self {
            socket,
            routes,
            pending: Mutex::new(HashMap::new()),
            inbound: Mutex::new(HashMap::new()),
            next_message_id: AtomicU16::new(rand::random()),
        }))
    }

    pub fn local_addr(&self) -> Lwm2mResult<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    pub fn routes(&self) -> &Arc<RouteTable> {
        &self.routes
    }

    /// Transport handle for the device at `address`
    pub fn peer(self: &Arc<Self>, address: SocketAddr) -> Peer {
        Peer {
            endpoint: Arc::downgrade(self),
            address,
        }
    }

    /// Spawn the receive loop
    ///
    /// The loop runs until the returned task is aborted; errors on single
    /// datagrams are logged and never end it.
    pub fn serve(self: &Arc<Self>) -> JoinHandle<()> {
        let endpoint = self.clone();
        tokio::spawn(async move { endpoint.receive_loop().await })
    }

    /// Perform one confirmable exchange with `peer`
    pub async fn request(
        &self,
        peer: SocketAddr,
        request: &Request,
        timeout: Duration,
    ) -> Lwm2mResult<Response> {
        let message_id = self.next_message_id();
        let (reply, receiver) = oneshot::channel();
        let token = self.insert_pending(peer, message_id, reply);
        let _guard = PendingGuard {
            pending: &self.pending,
            key: (peer, token.clone()),
        };

        let message = request.to_message(MessageType::Confirmable, message_id, token);
        log::debug!(
            "Sending {} /{} to {} (mid {})",
            request.method,
            request.path_string(),
            peer,
            message_id
        );
        self.send(&message, peer).await?;

        let reply = tokio::time::timeout(timeout, receiver)
            .await
            .map_err(|_| Lwm2mError::Timeout)?
            .map_err(|_| Lwm2mError::ExchangeFailed("exchange abandoned".to_string()))??;

        Response::from_message(&reply)
    }

    /// Number of exchanges waiting for a response
    pub fn pending_count(&self) -> usize {
        self.lock_pending().len()
    }

    async fn receive_loop(self: Arc<Self>) {
        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
        if let Ok(address) = self.socket.local_addr() {
            log::info!("CoAP endpoint listening on {}", address);
        }

        loop {
            match self.socket.recv_from(&mut buf).await {
                Ok((len, peer)) => self.handle_datagram(&buf[..len], peer).await,
                Err(e) => {
                    log::error!("Error receiving datagram: {}", e);
                    // Continue receiving other datagrams
                }
            }
        }
    }

    async fn handle_datagram(self: &Arc<Self>, data: &[u8], peer: SocketAddr) {
        let message = match Message::decode(data) {
            Ok(message) => message,
            Err(e) => {
                log::warn!("Dropping malformed datagram from {}: {}", peer, e);
                return;
            }
        };

        if message.code.is_request() {
            if message.message_type == MessageType::Confirmable
                && self.answer_duplicate(&message, peer).await
            {
                return;
            }
            let endpoint = self.clone();
            tokio::spawn(async move { endpoint.handle_request(message, peer).await });
        } else if message.code.is_empty() {
            match message.message_type {
                MessageType::Confirmable => {
                    log::trace!("Ping from {}", peer);
                    self.send_or_log(&Message::reset(message.message_id), peer).await;
                }
                MessageType::Reset => self.fail_pending(peer, message.message_id),
                MessageType::Acknowledgement => {
                    log::trace!("Empty ACK from {} (mid {})", peer, message.message_id);
                }
                MessageType::NonConfirmable => {}
            }
        } else if message.code.is_response() {
            self.complete_pending(message, peer).await;
        } else {
            log::warn!("Dropping message with code {} from {}", message.code, peer);
        }
    }

    async fn handle_request(self: Arc<Self>, message: Message, peer: SocketAddr) {
        let response = match unrecognized_option(&message) {
            Some(option) => {
                log::warn!(
                    "Unrecognized critical option {} from {}",
                    option.number,
                    peer
                );
                Response::new(Code::BAD_OPTION)
            }
            None => self.route_request(&message, peer).await,
        };

        let (message_type, message_id) = match message.message_type {
            MessageType::Confirmable => (MessageType::Acknowledgement, message.message_id),
            _ => (MessageType::NonConfirmable, self.next_message_id()),
        };
        let reply = response.to_message(message_type, message_id, message.token);
        self.send_or_log(&reply, peer).await;

        if message.message_type == MessageType::Confirmable {
            if let Some(entry) = self.lock_inbound().get_mut(&(peer, message_id)) {
                *entry = Inbound::Answered {
                    received: entry.received(),
                    reply,
                };
            }
        }
    }

    /// Check `message` against the recently received confirmable requests
    ///
    /// # Returns
    /// `true` if the request is a duplicate and has been dealt with: the
    /// stored reply is sent again, or nothing is sent while the first copy
    /// is still being handled. `false` records the request as new.
    async fn answer_duplicate(&self, message: &Message, peer: SocketAddr) -> bool {
        let now = Instant::now();
        let reply = {
            let mut inbound = self.lock_inbound();
            inbound.retain(|_, entry| now.duration_since(entry.received()) < EXCHANGE_LIFETIME);
            match inbound.get(&(peer, message.message_id)) {
                None => {
                    inbound.insert(
                        (peer, message.message_id),
                        Inbound::InProgress { received: now },
                    );
                    return false;
                }
                Some(Inbound::InProgress { .. }) => None,
                Some(Inbound::Answered { reply, .. }) => Some(reply.clone()),
            }
        };

        log::debug!("Duplicate request mid {} from {}", message.message_id, peer);
        if let Some(reply) = reply {
            self.send_or_log(&reply, peer).await;
        }
        true
    }

    async fn route_request(self: &Arc<Self>, message: &Message, peer: SocketAddr) -> Response {
        match Request::from_message(message) {
            Ok(request) => {
                log::debug!(
                    "Received {} /{} from {}",
                    request.method,
                    request.path_string(),
                    peer
                );
                let handle: Arc<dyn Exchange> = Arc::new(self.peer(peer));
                self.routes.dispatch(request, handle).await
            }
            Err(e) => {
                log::warn!("Malformed request from {}: {}", peer, e);
                Response::new(Code::BAD_REQUEST)
            }
        }
    }

    async fn complete_pending(&self, message: Message, peer: SocketAddr) {
        if message.message_type == MessageType::Confirmable {
            // Separate response: acknowledge it on its own message id
            self.send_or_log(&Message::empty_ack(message.message_id), peer).await;
        }

        let pending = self.lock_pending().remove(&(peer, message.token.clone()));
        match pending {
            Some(pending) => {
                let _ = pending.reply.send(Ok(message));
            }
            None => {
                log::debug!(
                    "Unmatched {} response from {} (mid {})",
                    message.code,
                    peer,
                    message.message_id
                );
            }
        }
    }

    fn fail_pending(&self, peer: SocketAddr, message_id: u16) {
        let mut pending = self.lock_pending();
        let key = pending
            .iter()
            .find(|((address, _), exchange)| *address == peer && exchange.message_id == message_id)
            .map(|(key, _)| key.clone());

        if let Some(exchange) = key.and_then(|key| pending.remove(&key)) {
            log::debug!("Request mid {} reset by {}", message_id, peer);
            let _ = exchange.reply.send(Err(Lwm2mError::ExchangeFailed(
                "request reset by peer".to_string(),
            )));
        }
    }

    fn insert_pending(
        &self,
        peer: SocketAddr,
        message_id: u16,
        reply: oneshot::Sender<Lwm2mResult<Message>>,
    ) -> Vec<u8> {
        let mut pending = self.lock_pending();
        loop {
            let token = rand::random::<[u8; TOKEN_LENGTH]>().to_vec();
            let key = (peer, token.clone());
            if !pending.contains_key(&key) {
                pending.insert(key, PendingExchange { message_id, reply });
                return token;
            }
        }
    }

    fn next_message_id(&self) -> u16 {
        self.next_message_id.fetch_add(1, Ordering::Relaxed)
    }

    fn lock_pending(&self) -> MutexGuard<'_, HashMap<PendingKey, PendingExchange>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_inbound(&self) -> MutexGuard<'_, HashMap<InboundKey, Inbound>> {
        self.inbound.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn send(&self, message: &Message, peer: SocketAddr) -> Lwm2mResult<()> {
        let datagram = message.encode()?;
        self.socket.send_to(&datagram, peer).await?;
        Ok(())
    }

    async fn send_or_log(&self, message: &Message, peer: SocketAddr) {
        if let Err(e) = self.send(message, peer).await {
            log::error!("Cannot send {} to {}: {}", message.code, peer, e);
        }
    }
}

/// First critical option of `message` that requests are not expected to carry
fn unrecognized_option(message: &Message) -> Option<&CoapOption> {
    message
        .options()
        .iter()
        .find(|option| option.is_critical() && !UNDERSTOOD_REQUEST_OPTIONS.contains(&option.number))
}

/// Removes a pending exchange when the exchange future finishes or is dropped
struct PendingGuard<'a> {
    pending: &'a Mutex<HashMap<PendingKey, PendingExchange>>,
    key: PendingKey,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.key);
    }
}

/// Transport handle for one remote device
///
/// Holds the endpoint weakly: once the endpoint is gone every exchange
/// fails with a connection error.
#[derive(Clone)]
pub struct Peer {
    endpoint: Weak<CoapEndpoint>,
    address: SocketAddr,
}

impl fmt::Debug for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Peer").field("address", &self.address).finish()
    }
}

#[async_trait]
impl Exchange for Peer {
    async fn exchange(&self, request: Request, timeout: Duration) -> Lwm2mResult<Response> {
        let endpoint = self.endpoint.upgrade().ok_or_else(|| {
            Lwm2mError::Connection(std::io::Error::new(
                std::io::ErrorKind::NotConnected,
                "CoAP endpoint closed",
            ))
        })?;
        endpoint.request(self.address, &request, timeout).await
    }
}
