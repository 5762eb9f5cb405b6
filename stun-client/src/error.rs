//! Error types for public address discovery.

use std::fmt;

/// Error type for STUN operations.
#[derive(Debug)]
pub enum StunError {
    /// The candidate list was empty or contained only blank entries
    NoServersConfigured,
    /// Every candidate was tried and none produced a mapped address
    AllServersFailed {
        /// Normalized `host:port` of each candidate and why it failed, in the order tried
        failures: Vec<(String, String)>,
    },
    /// Socket or name resolution errors
    NetworkError(String),
    /// Malformed or unexpected STUN message
    ProtocolError(String),
    /// No reply arrived before the per-server deadline
    Timeout,
}

impl fmt::Display for StunError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StunError::NoServersConfigured => write!(f, "no STUN servers configured"),
            StunError::AllServersFailed { failures } => {
                write!(f, "all STUN servers failed (")?;
                for (i, (server, reason)) in failures.iter().enumerate() {
                    if i > 0 {
                        write!(f, "; ")?;
                    }
                    write!(f, "{}: {}", server, reason)?;
                }
                write!(f, ")")
            }
            StunError::NetworkError(msg) => write!(f, "Network error: {}", msg),
            StunError::ProtocolError(msg) => write!(f, "Protocol error: {}", msg),
            StunError::Timeout => write!(f, "STUN request timed out"),
        }
    }
}

impl std::error::Error for StunError {}

/// Convenience Result type alias for STUN operations.
pub type Result<T> = std::result::Result<T, StunError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_servers_failed_lists_candidates_and_reasons() {
        let err = StunError::AllServersFailed {
            failures: vec![
                ("a.example:19302".to_string(), StunError::Timeout.to_string()),
                (
                    "b.example:3478".to_string(),
                    "Network error: No address for b.example:3478".to_string(),
                ),
            ],
        };
        assert_eq!(
            err.to_string(),
            "all STUN servers failed (a.example:19302: STUN request timed out; \
             b.example:3478: Network error: No address for b.example:3478)"
        );
    }

    #[test]
    fn test_no_servers_display() {
        assert_eq!(StunError::NoServersConfigured.to_string(), "no STUN servers configured");
    }
}
