//! # SIP client for BLF monitoring
//!
//! Registers with a PBX over UDP, subscribes to the `dialog` event package
//! for a set of extensions, and turns the resulting NOTIFY requests into
//! normalized [`LineState`](blf_parser::LineState) callbacks.
//!
//! ## Architecture
//!
//! Messages are [`rsip`] requests and responses; this crate adds the
//! transaction, session and dispatch layers on top.
//!
//! - [`SipEndpoint`]: one UDP socket carrying client transactions (with
//!   retransmission) and inbound requests
//! - [`SessionManager`]: REGISTER and SUBSCRIBE with a single digest retry
//! - [`EventDispatcher`]: acknowledges NOTIFY and calls a [`LineStateHandler`]
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use async_trait::async_trait;
//! use blf_parser::LineState;
//! use sip_client::{EventDispatcher, LineStateHandler, SessionConfig, SessionManager, SipEndpoint};
//! use tokio::sync::mpsc;
//! use tokio_util::sync::CancellationToken;
//!
//! struct Print;
//!
//! #[async_trait]
//! impl LineStateHandler for Print {
//!     async fn on_line_state_change(&self, extension: &str, state: LineState) {
//!         println!("{} is {}", extension, state);
//!     }
//! }
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let endpoint = Arc::new(SipEndpoint::bind("0.0.0.0:5060".parse()?, "pbx.example.com").await?);
//! let cancel = CancellationToken::new();
//!
//! let (tx, rx) = mpsc::unbounded_channel();
//! endpoint.spawn_receiver(tx, cancel.clone());
//! let dispatcher = EventDispatcher::new(Arc::new(Print), endpoint.clone());
//! tokio::spawn({
//!     let cancel = cancel.clone();
//!     async move { dispatcher.run(rx, cancel).await }
//! });
//!
//! let config = SessionConfig::new("pbx.example.com", "blf", "secret", "192.0.2.10");
//! let session = SessionManager::new(config, endpoint.clone());
//! session.register().await?;
//! session.subscribe(&["1001", "1002"]).await?;
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod dispatcher;
pub mod error;
pub mod message;
pub mod session;
pub mod transport;

pub use rsip;

pub use auth::{authorize, ChallengeKind, Credentials};
pub use dispatcher::{interpret_notify, EventDispatcher, LineStateHandler};
pub use error::{AuthError, MessageError, SessionError, TransportError};
pub use message::{parse_message, response_to};
pub use session::{
    RegistrationStatus, SessionConfig, SessionManager, SubscribeReport, Subscription, SubscriptionStatus,
};
pub use transport::{InboundRequest, RequestSender, Responder, SipEndpoint, TransactionTimers};

/// Result type for session operations
pub type Result<T> = std::result::Result<T, SessionError>;
