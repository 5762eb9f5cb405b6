//! Public address discovery over a list of STUN candidates.
//!
//! Candidates are tried strictly in order. Each one gets a single Binding
//! request and a bounded wait; the first mapped address wins.

use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::error::{Result, StunError};
use crate::message::{MessageType, StunMessage};

/// Port assumed when a candidate omits one
pub const DEFAULT_STUN_PORT: u16 = 19302;

/// Per-candidate wait used by the process entry point
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(3);

/// Normalize a candidate to `host:port`, defaulting the port to 19302.
///
/// A port that fails to parse is replaced by the default rather than rejected.
/// Bare IPv6 literals are bracketed.
pub fn normalize_server_addr(server: &str) -> String {
    let server = server.trim();

    if let Some(rest) = server.strip_prefix('[') {
        if let Some((host, tail)) = rest.split_once(']') {
            let port = tail
                .strip_prefix(':')
                .and_then(|p| p.parse::<u16>().ok())
                .unwrap_or(DEFAULT_STUN_PORT);
            return format!("[{}]:{}", host, port);
        }
    }

    match server.rsplit_once(':') {
        Some((host, port)) if !host.is_empty() && !host.contains(':') => {
            let port = port.parse::<u16>().unwrap_or(DEFAULT_STUN_PORT);
            format!("{}:{}", host, port)
        }
        Some(_) if server.parse::<std::net::Ipv6Addr>().is_ok() => {
            format!("[{}]:{}", server, DEFAULT_STUN_PORT)
        }
        _ => format!("{}:{}", server, DEFAULT_STUN_PORT),
    }
}

/// Discover this host's public address by querying `servers` in order.
///
/// Blank entries are ignored. Each failing candidate is logged and the next
/// one is tried.
///
/// # Errors
///
/// * [`StunError::NoServersConfigured`] when no usable candidate is given
/// * [`StunError::AllServersFailed`] naming every candidate tried and its failure
pub fn discover_public_address<S: AsRef<str>>(servers: &[S], timeout: Duration) -> Result<SocketAddr> {
    let candidates: Vec<String> = servers
        .iter()
        .map(|s| s.as_ref().trim())
        .filter(|s| !s.is_empty())
        .map(normalize_server_addr)
        .collect();

    if candidates.is_empty() {
        return Err(StunError::NoServersConfigured);
    }

    let mut failures = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        match query_server(&candidate, timeout) {
            Ok(addr) => {
                info!(server = %candidate, public_addr = %addr, "STUN discovery succeeded");
                return Ok(addr);
            }
            Err(e) => {
                warn!(server = %candidate, error = %e, "STUN server failed, trying next");
                failures.push((candidate, e.to_string()));
            }
        }
    }

    Err(StunError::AllServersFailed { failures })
}

/// Run one Binding transaction against a normalized `host:port`.
pub fn query_server(server: &str, timeout: Duration) -> Result<SocketAddr> {
    let target = server
        .to_socket_addrs()
        .map_err(|e| StunError::NetworkError(format!("Failed to resolve {}: {}", server, e)))?
        .next()
        .ok_or_else(|| StunError::NetworkError(format!("No address for {}", server)))?;

    let bind_addr = if target.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
    let socket = UdpSocket::bind(bind_addr)
        .map_err(|e| StunError::NetworkError(format!("Failed to bind UDP socket: {}", e)))?;

    let request = StunMessage::binding_request();
    socket
        .send_to(&request.encode(), target)
        .map_err(|e| StunError::NetworkError(format!("Failed to send Binding request: {}", e)))?;
    debug!(server = %server, target = %target, "sent STUN Binding request");

    let deadline = Instant::now() + timeout;
    let mut buffer = [0u8; 1024];

    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(StunError::Timeout);
        }
        socket
            .set_read_timeout(Some(remaining))
            .map_err(|e| StunError::NetworkError(format!("Failed to set read timeout: {}", e)))?;

        let (size, from) = match socket.recv_from(&mut buffer) {
            Ok(received) => received,
            Err(e)
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::TimedOut =>
            {
                return Err(StunError::Timeout);
            }
            Err(e) => return Err(StunError::NetworkError(format!("Socket error: {}", e))),
        };

        if from != target {
            continue;
        }
        let response = match StunMessage::decode(&buffer[..size]) {
            Ok(msg) if msg.transaction_id == request.transaction_id => msg,
            // Stray or malformed datagram, keep waiting
            _ => continue,
        };

        return match response.msg_type {
            MessageType::BindingSuccess => response.mapped_address().ok_or_else(|| {
                StunError::ProtocolError("Binding success without mapped address".to_string())
            }),
            MessageType::BindingError => {
                let detail = response
                    .error_code()
                    .map(|(code, reason)| format!("{} {}", code, reason))
                    .unwrap_or_else(|| "unspecified".to_string());
                Err(StunError::ProtocolError(format!("Binding error: {}", detail)))
            }
            other => Err(StunError::ProtocolError(format!(
                "unexpected message type 0x{:04x}",
                other.to_u16()
            ))),
        };
    }
}
