//! Directory and presence calls against Microsoft Graph.
//!
//! [`GraphClient`] authenticates with the OAuth2 client-credentials grant
//! (app-only) and caches the bearer token until shortly before it expires.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use blf_parser::{Activity, Availability};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;
use url::Url;

use crate::error::{PresenceError, Result};

pub const DEFAULT_LOGIN_URL: &str = "https://login.microsoftonline.com";
pub const DEFAULT_GRAPH_URL: &str = "https://graph.microsoft.com";
pub const GRAPH_SCOPE: &str = "https://graph.microsoft.com/.default";

/// Tokens are renewed this long before their reported expiry
const TOKEN_REFRESH_MARGIN: Duration = Duration::from_secs(60);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Body of a `setPresence` call
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceUpdate {
    pub session_id: String,
    pub availability: Availability,
    pub activity: Activity,
    /// ISO-8601 duration, e.g. `PT1H`
    pub expiration_duration: String,
}

/// The two remote operations presence publishing depends on.
#[async_trait]
pub trait DirectoryClient: Send + Sync {
    /// Resolve a sign-in name to the directory object id.
    async fn get_user(&self, external_id: &str) -> Result<String>;

    /// Assert presence for the user with `object_id`.
    async fn set_presence(&self, object_id: &str, update: &PresenceUpdate) -> Result<()>;
}

/// App registration used for the client-credentials grant
#[derive(Clone)]
pub struct GraphCredentials {
    pub tenant_id: String,
    pub client_id: String,
    pub client_secret: String,
}

impl std::fmt::Debug for GraphCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphCredentials")
            .field("tenant_id", &self.tenant_id)
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone)]
struct CachedToken {
    access_token: String,
    expires_at: Instant,
}

impl CachedToken {
    fn is_fresh(&self) -> bool {
        Instant::now() + TOKEN_REFRESH_MARGIN < self.expires_at
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_token_lifetime")]
    expires_in: u64,
}

fn default_token_lifetime() -> u64 {
    3599
}

#[derive(Debug, Deserialize)]
struct TokenErrorResponse {
    error: String,
    #[serde(default)]
    error_description: String,
}

#[derive(Debug, Deserialize)]
struct GraphErrorEnvelope {
    error: GraphErrorBody,
}

#[derive(Debug, Deserialize)]
struct GraphErrorBody {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct UserIdResponse {
    #[serde(default)]
    id: Option<String>,
}

/// HTTP client for the Graph directory and presence endpoints.
pub struct GraphClient {
    http: reqwest::Client,
    credentials: GraphCredentials,
    login_base: Url,
    graph_base: Url,
    token: Mutex<Option<CachedToken>>,
}

impl GraphClient {
    pub fn new(credentials: GraphCredentials) -> Result<Self> {
        Self::with_base_urls(credentials, DEFAULT_LOGIN_URL, DEFAULT_GRAPH_URL)
    }

    /// Point the client at alternative login and Graph hosts.
    pub fn with_base_urls(credentials: GraphCredentials, login_base: &str, graph_base: &str) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(concat!("sip-blf-sync/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            http,
            credentials,
            login_base: Url::parse(login_base)?,
            graph_base: Url::parse(graph_base)?,
            token: Mutex::new(None),
        })
    }

    pub fn client_id(&self) -> &str {
        &self.credentials.client_id
    }

    fn endpoint(base: &Url, segments: &[&str]) -> Result<Url> {
        let mut url = base.clone();
        url.path_segments_mut()
            .map_err(|_| PresenceError::Url(url::ParseError::RelativeUrlWithCannotBeABaseBase))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// Bearer token, fetched on first use and renewed near expiry.
    async fn access_token(&self) -> Result<String> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref().filter(|t| t.is_fresh()) {
            return Ok(token.access_token.clone());
        }

        let url = Self::endpoint(
            &self.login_base,
            &[self.credentials.tenant_id.as_str(), "oauth2", "v2.0", "token"],
        )?;
        let response = self
            .http
            .post(url)
            .form(&[
                ("grant_type", "client_credentials"),
                ("client_id", self.credentials.client_id.as_str()),
                ("client_secret", self.credentials.client_secret.as_str()),
                ("scope", GRAPH_SCOPE),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let reason = match serde_json::from_str::<TokenErrorResponse>(&body) {
                Ok(err) if err.error_description.is_empty() => err.error,
                Ok(err) => format!("{}: {}", err.error, err.error_description),
                Err(_) => format!("HTTP {}", status),
            };
            return Err(PresenceError::Token(reason));
        }

        let token: TokenResponse = response.json().await?;
        debug!(expires_in = token.expires_in, "acquired Graph access token");
        *cached = Some(CachedToken {
            access_token: token.access_token.clone(),
            expires_at: Instant::now() + Duration::from_secs(token.expires_in),
        });
        Ok(token.access_token)
    }

    /// Set the user's presence status message.
    pub async fn set_status_message(&self, object_id: &str, message: &str) -> Result<()> {
        let url = Self::endpoint(
            &self.graph_base,
            &["v1.0", "users", object_id, "presence", "setStatusMessage"],
        )?;
        let body = serde_json::json!({
            "statusMessage": {
                "message": { "content": message, "contentType": "text" }
            }
        });
        let response = self
            .http
            .post(url)
            .bearer_auth(self.access_token().await?)
            .json(&body)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(api_error(response).await);
        }
        Ok(())
    }
}

#[async_trait]
impl DirectoryClient for GraphClient {
    async fn get_user(&self, external_id: &str) -> Result<String> {
        let mut url = Self::endpoint(&self.graph_base, &["v1.0", "users", external_id])?;
        url.set_query(Some("$select=id"));

        let response = self
            .http
            .get(url)
            .bearer_auth(self.access_token().await?)
            .send()
            .await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(PresenceError::NotFound(external_id.to_string()));
        }
        if !response.status().is_success() {
            return Err(api_error(response).await);
        }

        let user: UserIdResponse = response.json().await?;
        user.id
            .filter(|id| !id.is_empty())
            .ok_or_else(|| PresenceError::NoId(external_id.to_string()))
    }

    async fn set_presence(&self, object_id: &str, update: &PresenceUpdate) -> Result<()> {
        let url = Self::endpoint(
            &self.graph_base,
            &["v1.0", "users", object_id, "presence", "setPresence"],
        )?;
        let response = self
            .http
            .post(url)
            .bearer_auth(self.access_token().await?)
            .json(update)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(api_error(response).await);
        }
        Ok(())
    }
}

async fn api_error(response: reqwest::Response) -> PresenceError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    match serde_json::from_str::<GraphErrorEnvelope>(&body) {
        Ok(envelope) => PresenceError::Api {
            status,
            code: envelope.error.code,
            message: envelope.error.message,
        },
        Err(_) => PresenceError::Api {
            status,
            code: String::new(),
            message: body,
        },
    }
}
