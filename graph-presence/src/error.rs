//! Error types for presence publishing.

use thiserror::Error;

/// Errors from directory lookups, presence updates and the session-id store
#[derive(Debug, Error)]
pub enum PresenceError {
    /// The directory has no user for this identity
    #[error("User not found: {0}")]
    NotFound(String),

    /// The directory answered without an object id
    #[error("User {0} has no object id")]
    NoId(String),

    /// The directory service returned an error envelope
    #[error("Graph API error {status} ({code}): {message}")]
    Api {
        status: u16,
        code: String,
        message: String,
    },

    /// The client-credentials token could not be obtained
    #[error("Token request failed: {0}")]
    Token(String),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),

    /// Expiration outside the range the presence API accepts
    #[error("Invalid presence expiration: {0} minutes (allowed 5 to 240)")]
    InvalidExpiry(u32),

    #[error("Session store I/O error on {path}: {source}")]
    StoreIo {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Session store {path} is not valid JSON: {source}")]
    StoreFormat {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

impl PresenceError {
    /// Every message in the source chain, joined with `"; "`.
    pub fn chain(&self) -> String {
        let mut parts = vec![self.to_string()];
        let mut source = std::error::Error::source(self);
        while let Some(err) = source {
            parts.push(err.to_string());
            source = err.source();
        }
        parts.join("; ")
    }
}

pub type Result<T> = std::result::Result<T, PresenceError>;
