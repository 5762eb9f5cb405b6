//! # sip-blf-sync
//!
//! Watches PBX extensions through SIP dialog-event subscriptions (BLF) and
//! mirrors each line's state into the Microsoft Teams presence of the user
//! who owns it.
//!
//! The binary wires the pieces together:
//!
//! 1. [`Config`] from flags, environment and `.env` files
//! 2. [`load_extensions`] for the extension to user mapping
//! 3. [`stun_client`] when the contact address must be discovered
//! 4. [`sip_client`] to register, subscribe and receive NOTIFY
//! 5. [`PresenceBridge`] to publish through [`graph_presence`]

pub mod bridge;
pub mod config;
pub mod extensions;
pub mod logging;

pub use bridge::PresenceBridge;
pub use config::{Config, ConfigError};
pub use extensions::{load_extensions, ExtensionDirectory, ExtensionEntry, ExtensionsError};
pub use logging::{init_logging, LoggingError, LoggingMode};
