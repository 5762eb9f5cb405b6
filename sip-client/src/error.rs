//! Error types for the SIP client.

use thiserror::Error;

/// Errors raised while parsing SIP messages off the wire
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MessageError {
    /// The datagram is not a SIP message
    #[error("Malformed message: {0}")]
    Malformed(String),

    /// Content-Length promised more bytes than the datagram carried
    #[error("Truncated body: expected {expected} bytes, got {actual}")]
    TruncatedBody { expected: usize, actual: usize },

    /// The datagram is not valid UTF-8
    #[error("Message is not valid UTF-8")]
    InvalidEncoding,

    /// A header the operation depends on is absent
    #[error("Missing header: {0}")]
    MissingHeader(String),

    /// A request target that is not a SIP URI
    #[error("Invalid URI: {0}")]
    InvalidUri(String),
}

/// Errors from the UDP transport and client transactions
#[derive(Debug, Error)]
pub enum TransportError {
    /// Socket creation, send or name resolution failure
    #[error("Network error: {0}")]
    Network(String),

    /// No final response before the transaction timer fired
    #[error("Transaction timed out: {method} (branch {branch})")]
    TransactionTimeout { method: String, branch: String },

    /// The outbound message could not be built
    #[error("Invalid message: {0}")]
    Message(#[from] MessageError),
}

/// Errors while parsing a digest challenge or building credentials
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// The 401/407 reply carried no challenge header
    #[error("Missing {0} header")]
    MissingChallenge(&'static str),

    /// The challenge header could not be parsed
    #[error("Unparseable challenge: {0}")]
    Unparseable(String),

    /// The challenge is not a Digest challenge
    #[error("Unsupported authentication scheme: {0}")]
    UnsupportedScheme(String),

    /// Only MD5 digests are computed
    #[error("Unsupported digest algorithm: {0}")]
    UnsupportedAlgorithm(String),

    /// The challenge requires a qop other than auth
    #[error("Unsupported qop: {0}")]
    UnsupportedQop(String),
}

/// Errors from registration and subscription
#[derive(Debug, Error)]
pub enum SessionError {
    /// The transaction died or the socket failed
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// An outbound request could not be built
    #[error("Invalid request: {0}")]
    Message(#[from] MessageError),

    /// A 401/407 reply whose challenge could not be used
    #[error("Malformed challenge in {status} reply: {reason}")]
    MalformedChallenge { status: u16, reason: String },

    /// The peer challenged again after credentials were supplied
    #[error("Authentication rejected: {status} after credential retry")]
    ChallengeRepeated { status: u16 },

    /// 404 for the subscribed resource
    #[error("Resource not found: {target}")]
    NotFound { target: String },

    /// Any other non-2xx final response
    #[error("Request rejected: {status} {reason}")]
    Rejected { status: u16, reason: String },

    /// Subscribe was called with no extensions
    #[error("No extensions to subscribe")]
    NoExtensions,

    /// Every extension failed to subscribe
    #[error("All subscriptions failed (extensions: {}); check PBX dialplan hints and allow_subscribe", failed.join(", "))]
    AllSubscriptionsFailed { failed: Vec<String> },

    /// Shutdown began before the operation started
    #[error("Operation cancelled")]
    Cancelled,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_error_display() {
        let err = SessionError::AllSubscriptionsFailed {
            failed: vec!["1001".to_string(), "1002".to_string()],
        };
        assert!(err.to_string().starts_with("All subscriptions failed (extensions: 1001, 1002)"));

        let err = SessionError::Rejected {
            status: 403,
            reason: "Forbidden".to_string(),
        };
        assert_eq!(err.to_string(), "Request rejected: 403 Forbidden");
    }

    #[test]
    fn test_transport_error_from_message_error() {
        let err: TransportError = MessageError::MissingHeader("Via".to_string()).into();
        assert_eq!(err.to_string(), "Invalid message: Missing header: Via");
    }

    #[test]
    fn test_auth_error_display() {
        let err = AuthError::MissingChallenge("Proxy-Authenticate");
        assert_eq!(err.to_string(), "Missing Proxy-Authenticate header");
    }
}
