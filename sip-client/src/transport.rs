//! UDP transport and non-INVITE client transactions.
//!
//! A single [`SipEndpoint`] socket carries both directions: requests we send
//! to the PBX (REGISTER, SUBSCRIBE) and requests the PBX sends us (NOTIFY,
//! OPTIONS). Responses are matched to their client transaction by the Via
//! branch; inbound requests are forwarded on a channel.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::error::{MessageError, TransportError};
use rsip::{Request, Response, SipMessage};

use crate::message::{self, parse_message};

/// Sends a request and waits for its final response.
#[async_trait]
pub trait RequestSender: Send + Sync {
    async fn send_request(&self, request: Request) -> Result<Response, TransportError>;
}

/// Sends responses to inbound requests.
#[async_trait]
pub trait Responder: Send + Sync {
    async fn send_response(&self, response: Response, to: SocketAddr) -> Result<(), TransportError>;
}

/// A request received from the network
#[derive(Debug, Clone)]
pub struct InboundRequest {
    pub request: Request,
    pub source: SocketAddr,
}

/// RFC 3261 timer values for non-INVITE client transactions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransactionTimers {
    /// Initial retransmit interval (T1)
    pub t1: Duration,
    /// Retransmit interval cap (T2)
    pub t2: Duration,
    /// Transaction lifetime (Timer F, 64*T1)
    pub timeout: Duration,
}

impl Default for TransactionTimers {
    fn default() -> Self {
        let t1 = Duration::from_millis(500);
        Self {
            t1,
            t2: Duration::from_secs(4),
            timeout: t1 * 64,
        }
    }
}

type PendingMap = Arc<Mutex<HashMap<String, mpsc::UnboundedSender<Response>>>>;

/// Removes a transaction from the pending map however the send completes.
struct PendingGuard {
    pending: PendingMap,
    branch: String,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.pending.lock().remove(&self.branch);
    }
}

/// UDP SIP endpoint bound to a local address and talking to one PBX.
pub struct SipEndpoint {
    socket: Arc<UdpSocket>,
    peer: SocketAddr,
    pending: PendingMap,
    timers: TransactionTimers,
}

impl SipEndpoint {
    /// Bind `listen` and resolve `server` (`host[:port]`, default port 5060).
    pub async fn bind(listen: SocketAddr, server: &str) -> Result<Self, TransportError> {
        let peer = resolve_server(server).await?;
        let socket = UdpSocket::bind(listen)
            .await
            .map_err(|e| TransportError::Network(format!("Failed to bind {}: {}", listen, e)))?;

        info!(local = %listen, peer = %peer, "SIP endpoint bound");

        Ok(Self {
            socket: Arc::new(socket),
            peer,
            pending: Arc::new(Mutex::new(HashMap::new())),
            timers: TransactionTimers::default(),
        })
    }

    pub fn with_timers(mut self, timers: TransactionTimers) -> Self {
        self.timers = timers;
        self
    }

    pub fn local_addr(&self) -> Result<SocketAddr, TransportError> {
        self.socket
            .local_addr()
            .map_err(|e| TransportError::Network(e.to_string()))
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    async fn transmit(&self, bytes: &[u8]) -> Result<(), TransportError> {
        self.socket
            .send_to(bytes, self.peer)
            .await
            .map_err(|e| TransportError::Network(format!("Failed to send to {}: {}", self.peer, e)))?;
        Ok(())
    }

    /// Start the receive loop.
    ///
    /// Responses are routed to waiting transactions and requests are sent on
    /// `inbound`. The loop exits when `cancel` fires.
    pub fn spawn_receiver(
        &self,
        inbound: mpsc::UnboundedSender<InboundRequest>,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let socket = self.socket.clone();
        let pending = self.pending.clone();

        tokio::spawn(async move {
            let mut buffer = vec![0u8; 65_535];
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        info!("SIP listener stopped");
                        break;
                    }
                    received = socket.recv_from(&mut buffer) => match received {
                        Ok((size, source)) => {
                            route_datagram(&buffer[..size], source, &pending, &inbound);
                        }
                        Err(e) => {
                            // ICMP port unreachable surfaces here on some platforms
                            warn!(error = %e, "UDP receive failed");
                        }
                    }
                }
            }
        })
    }
}

fn route_datagram(
    data: &[u8],
    source: SocketAddr,
    pending: &PendingMap,
    inbound: &mpsc::UnboundedSender<InboundRequest>,
) {
    if data.iter().all(u8::is_ascii_whitespace) {
        trace!(%source, "keep-alive");
        return;
    }

    match parse_message(data) {
        Ok(SipMessage::Response(response)) => {
            let status = response.status_code.code();
            let Some(branch) = message::via_branch(&response.headers).map(str::to_string) else {
                debug!(%source, status, "response without Via branch dropped");
                return;
            };
            let waiter = pending.lock().get(&branch).cloned();
            match waiter {
                Some(tx) => {
                    let _ = tx.send(response);
                }
                None => debug!(%source, %branch, status, "stray response dropped"),
            }
        }
        Ok(SipMessage::Request(request)) => {
            debug!(%source, method = %request.method, "inbound request");
            if inbound.send(InboundRequest { request, source }).is_err() {
                warn!(%source, "inbound request dropped, dispatcher is gone");
            }
        }
        Err(e) => debug!(%source, error = %e, "unparseable datagram dropped"),
    }
}

async fn resolve_server(server: &str) -> Result<SocketAddr, TransportError> {
    let server = server.trim();
    let target = if server.rsplit_once(':').map_or(false, |(_, port)| port.parse::<u16>().is_ok()) {
        server.to_string()
    } else {
        format!("{}:5060", server)
    };
    let addr = tokio::net::lookup_host(&target)
        .await
        .map_err(|e| TransportError::Network(format!("Failed to resolve {}: {}", target, e)))?
        .next();
    addr.ok_or_else(|| TransportError::Network(format!("No address for {}", target)))
}

#[async_trait]
impl RequestSender for SipEndpoint {
    async fn send_request(&self, mut request: Request) -> Result<Response, TransportError> {
        let branch = message::via_branch(&request.headers)
            .map(str::to_string)
            .ok_or_else(|| MessageError::MissingHeader("Via branch".to_string()))?;
        message::set_content_length(&mut request.headers, &request.body);

        let (tx, mut rx) = mpsc::unbounded_channel();
        self.pending.lock().insert(branch.clone(), tx);
        let _guard = PendingGuard {
            pending: self.pending.clone(),
            branch: branch.clone(),
        };

        let bytes = request.to_string().into_bytes();
        self.transmit(&bytes).await?;
        debug!(method = %request.method, uri = %request.uri, %branch, "request sent");

        let deadline = Instant::now() + self.timers.timeout;
        let mut interval = self.timers.t1;
        let mut next_retransmit = Instant::now() + interval;

        loop {
            tokio::select! {
                response = rx.recv() => {
                    let Some(response) = response else {
                        break;
                    };
                    let status = response.status_code.code();
                    if status < 200 {
                        // Proceeding: keep retransmitting at T2
                        interval = self.timers.t2;
                        next_retransmit = Instant::now() + interval;
                        continue;
                    }
                    debug!(method = %request.method, status, %branch, "final response");
                    return Ok(response);
                }
                _ = sleep_until(next_retransmit.min(deadline)) => {
                    if Instant::now() >= deadline {
                        break;
                    }
                    trace!(method = %request.method, %branch, "retransmit");
                    self.transmit(&bytes).await?;
                    interval = (interval * 2).min(self.timers.t2);
                    next_retransmit = Instant::now() + interval;
                }
            }
        }

        warn!(method = %request.method, uri = %request.uri, %branch, "transaction died");
        Err(TransportError::TransactionTimeout {
            method: request.method.to_string(),
            branch,
        })
    }
}

#[async_trait]
impl Responder for SipEndpoint {
    async fn send_response(&self, mut response: Response, to: SocketAddr) -> Result<(), TransportError> {
        message::set_content_length(&mut response.headers, &response.body);
        self.socket
            .send_to(response.to_string().as_bytes(), to)
            .await
            .map_err(|e| TransportError::Network(format!("Failed to respond to {}: {}", to, e)))?;
        Ok(())
    }
}
