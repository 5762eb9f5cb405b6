//! # Graph presence publishing
//!
//! Resolves a monitored line's owner (by sign-in name) to a Microsoft Graph
//! object id and asserts Teams presence for it.
//!
//! - [`GraphClient`] talks to Graph with app-only credentials
//! - [`PresencePublisher`] caches identities and issues `setPresence`
//! - [`SessionIdStore`] persists a per-extension session id on disk
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use blf_parser::LineState;
//! use graph_presence::{GraphClient, GraphCredentials, PresenceExpiry, PresencePublisher, SessionIdStore};
//!
//! # async fn example() -> graph_presence::Result<()> {
//! let credentials = GraphCredentials {
//!     tenant_id: "tenant".into(),
//!     client_id: "client".into(),
//!     client_secret: "secret".into(),
//! };
//! let client = Arc::new(GraphClient::new(credentials.clone())?);
//! let store = SessionIdStore::load("config/presence-state.json")?;
//! let publisher = PresencePublisher::new(client, store, credentials.client_id, PresenceExpiry::default());
//!
//! let (availability, activity) = LineState::Busy.to_presence();
//! publisher
//!     .publish_presence("alice@example.com", "1001", availability, activity)
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod error;
pub mod expiry;
pub mod identity;
pub mod publisher;
pub mod store;

pub use client::{DirectoryClient, GraphClient, GraphCredentials, PresenceUpdate};
pub use error::{PresenceError, Result};
pub use expiry::PresenceExpiry;
pub use identity::IdentityCache;
pub use publisher::PresencePublisher;
pub use store::SessionIdStore;
