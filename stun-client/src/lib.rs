//! # STUN client
//!
//! Resolves the public (server-reflexive) address of this host so it can be
//! advertised as a SIP contact when the configured contact is a placeholder.
//!
//! ```no_run
//! use std::time::Duration;
//!
//! let servers = vec!["stun.l.google.com".to_string()];
//! if let Some(addr) = stun_client::resolve_contact_if_needed("auto", &servers, Duration::from_secs(3))? {
//!     println!("public address: {}", addr);
//! }
//! # Ok::<(), stun_client::StunError>(())
//! ```

pub mod error;
pub mod message;
mod discovery;

use std::net::SocketAddr;
use std::time::Duration;

pub use discovery::{
    discover_public_address, normalize_server_addr, query_server, DEFAULT_STUN_PORT, DEFAULT_TIMEOUT,
};
pub use error::{Result, StunError};

/// Returns true when the contact IP is a placeholder that needs discovery.
///
/// Empty (after trimming), `auto` and `stun` (any case) are placeholders.
pub fn is_contact_sentinel(contact_ip: &str) -> bool {
    let value = contact_ip.trim();
    value.is_empty() || value.eq_ignore_ascii_case("auto") || value.eq_ignore_ascii_case("stun")
}

/// Discover the public address only if `contact_ip` is a placeholder.
///
/// Returns `Ok(None)` when the configured contact is a concrete address and
/// no network traffic is generated.
pub fn resolve_contact_if_needed<S: AsRef<str>>(
    contact_ip: &str,
    servers: &[S],
    timeout: Duration,
) -> Result<Option<SocketAddr>> {
    if !is_contact_sentinel(contact_ip) {
        return Ok(None);
    }
    discover_public_address(servers, timeout).map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("", true)]
    #[case("   ", true)]
    #[case("auto", true)]
    #[case("AUTO", true)]
    #[case(" Stun ", true)]
    #[case("10.0.0.5", false)]
    #[case("pbx.example.com", false)]
    #[case("automatic", false)]
    fn test_is_contact_sentinel(#[case] input: &str, #[case] expected: bool) {
        assert_eq!(is_contact_sentinel(input), expected);
    }

    #[test]
    fn test_concrete_contact_skips_discovery() {
        let servers: Vec<String> = vec![];
        let result = resolve_contact_if_needed("192.0.2.10", &servers, Duration::from_millis(10));
        assert!(matches!(result, Ok(None)));
    }
}
