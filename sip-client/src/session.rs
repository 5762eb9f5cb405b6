//! Registration and dialog-event subscriptions.
//!
//! The [`SessionManager`] owns the registration state and one
//! [`Subscription`] per monitored extension. Every request that draws a 401
//! or 407 is answered exactly once with digest credentials; a second
//! challenge is final. Subscriptions fail independently so one missing BLF
//! hint on the PBX never stops the others from being monitored.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use rsip::headers::{self, UntypedHeader};
use rsip::{Header, Headers, Method, Request, Response, Uri, Version};

use crate::auth::{self, ChallengeKind, Credentials};
use crate::error::{MessageError, SessionError};
use crate::message;
use crate::transport::RequestSender;

/// Expiry requested for registrations and subscriptions, in seconds
pub const DEFAULT_EXPIRES: u32 = 3600;

/// Event package subscribed to
pub const DIALOG_EVENT: &str = "dialog";

/// Body type accepted in NOTIFY
pub const DIALOG_INFO_CONTENT_TYPE: &str = "application/dialog-info+xml";

const DEFAULT_SIP_PORT: u16 = 5060;

/// Floor of the refresh interval, in seconds
const MIN_REFRESH_SECS: u64 = 10;

/// Static settings of the signaling session
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// PBX address, `host[:port]`
    pub server: String,
    pub username: String,
    pub password: String,
    /// Address advertised in Contact and Via
    pub contact_ip: String,
    /// Port advertised in Contact; 0 when unknown
    pub contact_port: u16,
    pub user_agent: String,
    /// Requested expiry for REGISTER and SUBSCRIBE
    pub expires: u32,
}

impl SessionConfig {
    pub fn new(
        server: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
        contact_ip: impl Into<String>,
    ) -> Self {
        Self {
            server: server.into(),
            username: username.into(),
            password: password.into(),
            contact_ip: contact_ip.into(),
            contact_port: 0,
            user_agent: format!("sip-blf-sync/{}", env!("CARGO_PKG_VERSION")),
            expires: DEFAULT_EXPIRES,
        }
    }

    pub fn with_contact_port(mut self, port: u16) -> Self {
        self.contact_port = port;
        self
    }

    /// `<sip:user@ip>` or `<sip:user@ip:port>` when the port is known and not 5060
    pub fn contact_header(&self) -> String {
        if self.contact_port > 0 && self.contact_port != DEFAULT_SIP_PORT {
            format!("<sip:{}@{}:{}>", self.username, self.contact_ip, self.contact_port)
        } else {
            format!("<sip:{}@{}>", self.username, self.contact_ip)
        }
    }

    /// Host part of the server address, used in From
    pub fn server_host(&self) -> &str {
        let server = self.server.trim();
        if let Some(rest) = server.strip_prefix('[') {
            if let Some((host, _)) = rest.split_once(']') {
                return host;
            }
        }
        match server.rsplit_once(':') {
            Some((host, port)) if !host.contains(':') && port.parse::<u16>().is_ok() => host,
            _ => server,
        }
    }

    fn sent_by(&self) -> String {
        let port = if self.contact_port > 0 {
            self.contact_port
        } else {
            DEFAULT_SIP_PORT
        };
        format!("{}:{}", self.contact_ip, port)
    }

    fn credentials(&self) -> Credentials {
        Credentials {
            username: self.username.clone(),
            password: self.password.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationStatus {
    Unregistered,
    Registering,
    Registered,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionStatus {
    Pending,
    Authenticating,
    Active,
    PermanentlyFailed,
}

/// Per-extension subscription dialog
#[derive(Debug, Clone)]
pub struct Subscription {
    pub extension: String,
    pub event: &'static str,
    pub status: SubscriptionStatus,
    pub call_id: String,
    pub local_tag: String,
    pub remote_tag: Option<String>,
    pub cseq: u32,
    /// Expiry granted by the PBX in the last successful reply
    pub granted_expires: Option<u32>,
    pub activated_at: Option<Instant>,
    pub last_error: Option<String>,
}

impl Subscription {
    fn new(extension: &str, host: &str) -> Self {
        Self {
            extension: extension.to_string(),
            event: DIALOG_EVENT,
            status: SubscriptionStatus::Pending,
            call_id: new_call_id(host),
            local_tag: new_tag(),
            remote_tag: None,
            cseq: 0,
            granted_expires: None,
            activated_at: None,
            last_error: None,
        }
    }
}

/// Outcome of a subscribe pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscribeReport {
    pub active: Vec<String>,
    pub failed: Vec<String>,
}

#[derive(Debug)]
struct Registration {
    status: RegistrationStatus,
    call_id: String,
    local_tag: String,
    cseq: u32,
    granted_expires: Option<u32>,
}

/// Result of a request/credential-retry exchange
struct Exchange {
    response: Response,
    cseq: u32,
}

/// Owns registration and subscription state for one PBX.
pub struct SessionManager {
    config: SessionConfig,
    sender: Arc<dyn RequestSender>,
    registration: RwLock<Registration>,
    subscriptions: RwLock<Vec<Subscription>>,
    cancel: CancellationToken,
}

impl SessionManager {
    pub fn new(config: SessionConfig, sender: Arc<dyn RequestSender>) -> Self {
        let registration = Registration {
            status: RegistrationStatus::Unregistered,
            call_id: new_call_id(&config.contact_ip),
            local_tag: new_tag(),
            cseq: 0,
            granted_expires: None,
        };
        Self {
            config,
            sender,
            registration: RwLock::new(registration),
            subscriptions: RwLock::new(Vec::new()),
            cancel: CancellationToken::new(),
        }
    }

    /// Skip attempts that have not started once `cancel` fires.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn registration_status(&self) -> RegistrationStatus {
        self.registration.read().status
    }

    /// Snapshot of every subscription
    pub fn subscriptions(&self) -> Vec<Subscription> {
        self.subscriptions.read().clone()
    }

    pub fn status(&self, extension: &str) -> Option<SubscriptionStatus> {
        self.subscriptions
            .read()
            .iter()
            .find(|s| s.extension == extension)
            .map(|s| s.status)
    }

    /// Register the advertised contact with the PBX.
    ///
    /// # Errors
    ///
    /// Any failure is fatal for the caller: transport death, an unusable or
    /// repeated challenge, or a non-2xx final response.
    pub async fn register(&self) -> Result<(), SessionError> {
        if self.cancel.is_cancelled() {
            return Err(SessionError::Cancelled);
        }

        let request = {
            let mut registration = self.registration.write();
            registration.status = RegistrationStatus::Registering;
            registration.cseq += 1;
            self.register_request(&registration)
        };

        let result = match request {
            Ok(request) => self.send_with_auth(request, || {}).await,
            Err(e) => Err(e),
        };
        match result {
            Ok(exchange) => {
                let headers = &exchange.response.headers;
                let granted = message::contact_expires(headers)
                    .or_else(|| message::expires(headers))
                    .unwrap_or(self.config.expires);
                {
                    let mut registration = self.registration.write();
                    registration.status = RegistrationStatus::Registered;
                    registration.cseq = exchange.cseq;
                    registration.granted_expires = Some(granted);
                }
                info!(status = exchange.response.status_code.code(), expires = granted, "registered");
                Ok(())
            }
            Err(e) => {
                self.registration.write().status = RegistrationStatus::Unregistered;
                error!(error = %e, "registration failed");
                Err(e)
            }
        }
    }

    /// Subscribe to the dialog event package for each extension.
    ///
    /// Extensions are attempted one after another and fail independently.
    /// Returns the active and failed sets; only a total failure is an error.
    pub async fn subscribe<S: AsRef<str>>(&self, extensions: &[S]) -> Result<SubscribeReport, SessionError> {
        if extensions.is_empty() {
            return Err(SessionError::NoExtensions);
        }

        let mut report = SubscribeReport::default();
        for extension in extensions {
            let extension = extension.as_ref();
            if self.cancel.is_cancelled() {
                info!(extension, "shutdown in progress, remaining subscriptions skipped");
                break;
            }

            match self.subscribe_one(extension).await {
                Ok(expires) => {
                    info!(extension, expires, "subscribed to BLF");
                    report.active.push(extension.to_string());
                }
                Err(SessionError::NotFound { target }) => {
                    warn!(
                        extension,
                        target = %target,
                        hint = "check the PBX dialplan hint for this extension and that allow_subscribe is enabled",
                        "subscribe 404, extension may lack a BLF hint on the PBX"
                    );
                    report.failed.push(extension.to_string());
                }
                Err(e) => {
                    error!(extension, error = %e, "subscribe failed");
                    report.failed.push(extension.to_string());
                }
            }
        }

        if report.active.is_empty() {
            if self.cancel.is_cancelled() && report.failed.is_empty() {
                return Err(SessionError::Cancelled);
            }
            return Err(SessionError::AllSubscriptionsFailed {
                failed: report.failed,
            });
        }
        if !report.failed.is_empty() {
            warn!(failed = ?report.failed, "some extensions could not be subscribed");
        }
        Ok(report)
    }

    async fn subscribe_one(&self, extension: &str) -> Result<u32, SessionError> {
        let request = {
            let mut subscriptions = self.subscriptions.write();
            let index = match subscriptions.iter().position(|s| s.extension == extension) {
                Some(index) => index,
                None => {
                    subscriptions.push(Subscription::new(extension, &self.config.contact_ip));
                    subscriptions.len() - 1
                }
            };
            let subscription = &mut subscriptions[index];
            if subscription.status == SubscriptionStatus::PermanentlyFailed {
                // Retry with a fresh dialog
                *subscription = Subscription::new(extension, &self.config.contact_ip);
            }
            subscription.status = match subscription.status {
                SubscriptionStatus::Active => SubscriptionStatus::Active,
                _ => SubscriptionStatus::Pending,
            };
            subscription.cseq += 1;
            self.subscribe_request(subscription)
        };

        let on_challenge = || self.set_subscription_status(extension, SubscriptionStatus::Authenticating);

        let result = match request {
            Ok(request) => self.send_with_auth(request, on_challenge).await,
            Err(e) => Err(e),
        };
        match result {
            Ok(exchange) => {
                let granted = message::expires(&exchange.response.headers).unwrap_or(self.config.expires);
                let remote_tag = message::to_tag(&exchange.response.headers).map(str::to_string);
                let mut subscriptions = self.subscriptions.write();
                if let Some(subscription) = subscriptions.iter_mut().find(|s| s.extension == extension) {
                    subscription.status = SubscriptionStatus::Active;
                    subscription.cseq = exchange.cseq;
                    subscription.granted_expires = Some(granted);
                    subscription.activated_at = Some(Instant::now());
                    subscription.last_error = None;
                    if remote_tag.is_some() {
                        subscription.remote_tag = remote_tag;
                    }
                }
                Ok(granted)
            }
            Err(e) => {
                let mut subscriptions = self.subscriptions.write();
                if let Some(subscription) = subscriptions.iter_mut().find(|s| s.extension == extension) {
                    subscription.status = SubscriptionStatus::PermanentlyFailed;
                    subscription.last_error = Some(e.to_string());
                }
                Err(e)
            }
        }
    }

    fn set_subscription_status(&self, extension: &str, status: SubscriptionStatus) {
        if let Some(subscription) = self
            .subscriptions
            .write()
            .iter_mut()
            .find(|s| s.extension == extension)
        {
            subscription.status = status;
        }
    }

    /// Send `request`, answering at most one challenge.
    async fn send_with_auth(&self, request: Request, on_challenge: impl FnOnce()) -> Result<Exchange, SessionError> {
        let mut cseq = message::cseq(&request.headers).unwrap_or(1);
        let mut response = self.sender.send_request(request.clone()).await?;

        if let Some(kind) = ChallengeKind::from_status(response.status_code.code()) {
            on_challenge();
            let retry = self.authorize(&request, &response, kind)?;
            cseq = message::cseq(&retry.headers).unwrap_or(cseq + 1);
            debug!(
                method = %request.method,
                uri = %request.uri,
                status = response.status_code.code(),
                "retrying with credentials"
            );

            response = self.sender.send_request(retry).await?;
            if ChallengeKind::from_status(response.status_code.code()).is_some() {
                return Err(SessionError::ChallengeRepeated {
                    status: response.status_code.code(),
                });
            }
        }

        let status = response.status_code.code();
        if (200..300).contains(&status) {
            return Ok(Exchange { response, cseq });
        }
        if status == 404 {
            return Err(SessionError::NotFound {
                target: request.uri.to_string(),
            });
        }
        Err(SessionError::Rejected {
            status,
            reason: message::reason_phrase(&response.status_code),
        })
    }

    /// Clone `request` with credentials, the next CSeq and a fresh branch.
    fn authorize(&self, request: &Request, challenged: &Response, kind: ChallengeKind) -> Result<Request, SessionError> {
        let challenge = kind.challenge(challenged).map_err(|e| SessionError::MalformedChallenge {
            status: challenged.status_code.code(),
            reason: e.to_string(),
        })?;
        let authorization = auth::authorize(&challenge, request, &self.config.credentials());
        let seq = message::cseq(&request.headers).unwrap_or(1) + 1;

        let mut rebuilt = Headers::default();
        for header in request.headers.iter() {
            match header {
                Header::Via(_) => rebuilt.push(Header::Via(self.via())),
                Header::CSeq(_) => rebuilt.push(Header::CSeq(headers::CSeq::new(format!("{} {}", seq, request.method)))),
                Header::Authorization(_) | Header::ProxyAuthorization(_) => {}
                other => rebuilt.push(other.clone()),
            }
        }
        rebuilt.push(kind.credentials_header(&authorization));

        let mut retry = request.clone();
        retry.headers = rebuilt;
        Ok(retry)
    }

    fn via(&self) -> headers::Via {
        headers::Via::new(format!(
            "SIP/2.0/UDP {};rport;branch=z9hG4bK{}",
            self.config.sent_by(),
            Uuid::new_v4().simple()
        ))
    }

    fn base_request(
        &self,
        method: Method,
        uri: &str,
        to: String,
        call_id: &str,
        tag: &str,
        cseq: u32,
    ) -> Result<Request, SessionError> {
        let uri = Uri::try_from(uri).map_err(|e| MessageError::InvalidUri(format!("{}: {}", uri, e)))?;
        let from = format!(
            "<sip:{}@{}>;tag={}",
            self.config.username,
            self.config.server_host(),
            tag
        );

        let mut headers = Headers::default();
        headers.push(Header::Via(self.via()));
        headers.push(Header::MaxForwards(headers::MaxForwards::new("70")));
        headers.push(Header::From(headers::From::new(from)));
        headers.push(Header::To(headers::To::new(to)));
        headers.push(Header::CallId(headers::CallId::new(call_id)));
        headers.push(Header::CSeq(headers::CSeq::new(format!("{} {}", cseq, method))));
        headers.push(Header::Contact(headers::Contact::new(self.config.contact_header())));
        headers.push(Header::UserAgent(headers::UserAgent::new(self.config.user_agent.clone())));

        Ok(Request {
            method,
            uri,
            version: Version::V2,
            headers,
            body: Vec::new(),
        })
    }

    fn register_request(&self, registration: &Registration) -> Result<Request, SessionError> {
        let uri = format!("sip:{}@{}", self.config.username, self.config.server.trim());
        let to = format!("<sip:{}@{}>", self.config.username, self.config.server_host());
        let mut request = self.base_request(
            Method::Register,
            &uri,
            to,
            &registration.call_id,
            &registration.local_tag,
            registration.cseq,
        )?;
        request
            .headers
            .push(Header::Expires(headers::Expires::new(self.config.expires.to_string())));
        message::set_content_length(&mut request.headers, &request.body);
        Ok(request)
    }

    fn subscribe_request(&self, subscription: &Subscription) -> Result<Request, SessionError> {
        let uri = format!("sip:{}@{}", subscription.extension, self.config.server.trim());
        let mut to = format!("<{}>", uri);
        if let Some(tag) = &subscription.remote_tag {
            to.push_str(&format!(";tag={}", tag));
        }
        let mut request = self.base_request(
            Method::Subscribe,
            &uri,
            to,
            &subscription.call_id,
            &subscription.local_tag,
            subscription.cseq,
        )?;
        request.headers.push(Header::Event(headers::Event::new(subscription.event)));
        request
            .headers
            .push(Header::Expires(headers::Expires::new(self.config.expires.to_string())));
        request.headers.push(Header::Accept(headers::Accept::new(DIALOG_INFO_CONTENT_TYPE)));
        message::set_content_length(&mut request.headers, &request.body);
        Ok(request)
    }

    /// Delay until the next refresh pass: 90% of the shortest granted expiry.
    pub fn refresh_interval(&self) -> Duration {
        let registration = self.registration.read().granted_expires;
        let shortest = self
            .subscriptions
            .read()
            .iter()
            .filter(|s| s.status == SubscriptionStatus::Active)
            .filter_map(|s| s.granted_expires)
            .chain(registration)
            .min()
            .unwrap_or(self.config.expires);
        Duration::from_secs((u64::from(shortest) * 9 / 10).max(MIN_REFRESH_SECS))
    }

    /// Re-register and re-subscribe every extension before grants lapse.
    ///
    /// Failures are logged and retried on the next pass. Returns when
    /// `cancel` fires.
    pub async fn run_refresh<S: AsRef<str>>(&self, extensions: &[S], cancel: CancellationToken) {
        loop {
            let wait = self.refresh_interval();
            debug!(seconds = wait.as_secs(), "next SIP refresh scheduled");
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("SIP refresh loop stopped");
                    return;
                }
                _ = tokio::time::sleep(wait) => {}
            }

            if let Err(e) = self.register().await {
                error!(error = %e, "re-registration failed, will retry next cycle");
                continue;
            }
            match self.subscribe(extensions).await {
                Ok(report) => debug!(active = report.active.len(), failed = report.failed.len(), "subscriptions refreshed"),
                Err(e) => error!(error = %e, "subscription refresh failed"),
            }
        }
    }
}

fn new_call_id(host: &str) -> String {
    format!("{}@{}", Uuid::new_v4().simple(), host)
}

fn new_tag() -> String {
    format!("{:08x}", rand::random::<u32>())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(0, "<sip:blf@192.0.2.5>")]
    #[case(5060, "<sip:blf@192.0.2.5>")]
    #[case(40123, "<sip:blf@192.0.2.5:40123>")]
    fn test_contact_header(#[case] port: u16, #[case] expected: &str) {
        let config = SessionConfig::new("pbx:5060", "blf", "pw", "192.0.2.5").with_contact_port(port);
        assert_eq!(config.contact_header(), expected);
    }

    #[rstest]
    #[case("pbx.example.com:5060", "pbx.example.com")]
    #[case("pbx.example.com", "pbx.example.com")]
    #[case("10.0.0.1:5080", "10.0.0.1")]
    #[case("[2001:db8::5]:5060", "2001:db8::5")]
    fn test_server_host(#[case] server: &str, #[case] expected: &str) {
        let config = SessionConfig::new(server, "blf", "pw", "192.0.2.5");
        assert_eq!(config.server_host(), expected);
    }

    #[test]
    fn test_sent_by_defaults_port() {
        let config = SessionConfig::new("pbx", "blf", "pw", "192.0.2.5");
        assert_eq!(config.sent_by(), "192.0.2.5:5060");
        assert_eq!(config.with_contact_port(6000).sent_by(), "192.0.2.5:6000");
    }

    struct Unreachable;

    #[async_trait::async_trait]
    impl RequestSender for Unreachable {
        async fn send_request(&self, _request: Request) -> Result<Response, crate::error::TransportError> {
            Err(crate::error::TransportError::Network("unreachable".to_string()))
        }
    }

    fn manager(expires: u32) -> SessionManager {
        let mut config = SessionConfig::new("pbx.example.com", "blf", "pw", "192.0.2.5");
        config.expires = expires;
        SessionManager::new(config, Arc::new(Unreachable))
    }

    #[rstest]
    #[case(3600, 3240)]
    #[case(100, 90)]
    #[case(11, 10)]
    #[case(5, 10)]
    #[case(0, 10)]
    fn test_refresh_interval_floor_applies_after_scaling(#[case] granted: u32, #[case] expected: u64) {
        let manager = manager(3600);
        manager.registration.write().granted_expires = Some(granted);
        assert_eq!(manager.refresh_interval(), Duration::from_secs(expected));
    }

    #[test]
    fn test_refresh_interval_falls_back_to_configured_expiry() {
        assert_eq!(manager(600).refresh_interval(), Duration::from_secs(540));
    }

    #[test]
    fn test_register_request_headers() {
        let manager = manager(3600);
        let request = manager.register_request(&manager.registration.read()).unwrap();
        assert_eq!(request.method, Method::Register);
        assert_eq!(request.uri.to_string(), "sip:blf@pbx.example.com");
        assert_eq!(message::expires(&request.headers), Some(3600));
        assert_eq!(
            message::header_value(&request.headers, "Max-Forwards").as_deref(),
            Some("70")
        );
        assert!(message::via_branch(&request.headers).unwrap().starts_with("z9hG4bK"));
        assert_eq!(
            message::header_value(&request.headers, "Content-Length").as_deref(),
            Some("0")
        );
    }

    #[test]
    fn test_new_tag_is_hex() {
        let tag = new_tag();
        assert_eq!(tag.len(), 8);
        assert!(tag.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
