//! Inbound request handling.
//!
//! The [`EventDispatcher`] answers every request the PBX sends us and turns
//! dialog-event NOTIFY bodies into [`LineState`] callbacks.

use std::sync::Arc;

use async_trait::async_trait;
use blf_parser::{extension_from_dialog_info, parse_dialog_info, parse_presence_body, LineState};
use rsip::headers::{self, UntypedHeader};
use rsip::{Header, Method, Request, StatusCode};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, trace, warn};

use crate::message::{response_to, uri_user};
use crate::transport::{InboundRequest, Responder};

/// Methods answered by the dispatcher, advertised on 405 replies
pub const ALLOWED_METHODS: &str = "NOTIFY, OPTIONS, ACK";

/// Receives normalized line-state changes.
#[async_trait]
pub trait LineStateHandler: Send + Sync {
    async fn on_line_state_change(&self, extension: &str, state: LineState);
}

/// Acknowledges inbound requests and routes NOTIFY bodies to a handler.
#[derive(Clone)]
pub struct EventDispatcher {
    handler: Arc<dyn LineStateHandler>,
    responder: Arc<dyn Responder>,
    tasks: TaskTracker,
}

impl EventDispatcher {
    pub fn new(handler: Arc<dyn LineStateHandler>, responder: Arc<dyn Responder>) -> Self {
        Self {
            handler,
            responder,
            tasks: TaskTracker::new(),
        }
    }

    /// Process inbound requests until `cancel` fires or the channel closes.
    ///
    /// Returns once every handler call already started has finished.
    pub async fn run(&self, mut inbound: mpsc::UnboundedReceiver<InboundRequest>, cancel: CancellationToken) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                next = inbound.recv() => match next {
                    Some(request) => {
                        self.handle_request(request).await;
                    }
                    None => break,
                }
            }
        }

        self.tasks.close();
        if !self.tasks.is_empty() {
            debug!(pending = self.tasks.len(), "waiting for in-flight notifications");
        }
        self.tasks.wait().await;
        info!("event dispatcher stopped");
    }

    /// Answer one inbound request.
    ///
    /// For a NOTIFY with a body the returned handle tracks the spawned
    /// processing task; the 200 has already been sent when this returns.
    /// [`run`](Self::run) waits for these tasks before returning.
    pub async fn handle_request(&self, inbound: InboundRequest) -> Option<JoinHandle<()>> {
        let InboundRequest { request, source } = inbound;

        match request.method {
            Method::Notify => {
                let ok = response_to(&request, StatusCode::OK);
                if let Err(e) = self.responder.send_response(ok, source).await {
                    warn!(%source, error = %e, "failed to acknowledge NOTIFY");
                    return None;
                }
                if request.body.is_empty() {
                    debug!(%source, "empty NOTIFY body dropped");
                    return None;
                }

                let handler = self.handler.clone();
                Some(self.tasks.spawn(async move {
                    match interpret_notify(&request) {
                        Some((extension, state)) => {
                            debug!(extension = %extension, state = %state, "line state notification");
                            handler.on_line_state_change(&extension, state).await;
                        }
                        None => debug!(%source, "NOTIFY without a resolvable extension dropped"),
                    }
                }))
            }
            Method::Options => {
                let ok = response_to(&request, StatusCode::OK);
                if let Err(e) = self.responder.send_response(ok, source).await {
                    warn!(%source, error = %e, "failed to answer OPTIONS");
                }
                None
            }
            Method::Ack => {
                trace!(%source, "ACK ignored");
                None
            }
            _ => {
                let mut response = response_to(&request, StatusCode::MethodNotAllowed);
                response.headers.push(Header::Allow(headers::Allow::new(ALLOWED_METHODS)));
                if let Err(e) = self.responder.send_response(response, source).await {
                    warn!(%source, method = %request.method, error = %e, "failed to reject request");
                }
                None
            }
        }
    }
}

/// Extract the extension and line state from a NOTIFY.
///
/// The extension comes from the dialog-info entity, falling back to the user
/// part of the `To` header. The state falls back to the looser presence
/// interpretation when the dialog parser cannot decide.
pub fn interpret_notify(request: &Request) -> Option<(String, LineState)> {
    let body = request.body.as_slice();

    let extension = extension_from_dialog_info(body)
        .filter(|ext| !ext.is_empty())
        .or_else(|| {
            request
                .headers
                .iter()
                .find_map(|header| match header {
                    Header::To(to) => uri_user(to.value()),
                    _ => None,
                })
                .map(str::to_string)
        })?;

    let state = match parse_dialog_info(body) {
        LineState::Unknown => parse_presence_body(body),
        state => state,
    };

    Some((extension, state))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::parse_message;
    use rsip::SipMessage;

    fn notify(to: &str, body: &str) -> Request {
        let raw = format!(
            "NOTIFY sip:blf@10.0.0.2 SIP/2.0\r\n\
             Via: SIP/2.0/UDP 10.0.0.1:5060;branch=z9hG4bKn1\r\n\
             From: <sip:1001@pbx>;tag=a\r\n\
             To: {}\r\n\
             Call-ID: c1\r\n\
             CSeq: 2 NOTIFY\r\n\
             Event: dialog\r\n\
             Content-Type: application/dialog-info+xml\r\n\
             Content-Length: {}\r\n\r\n{}",
            to,
            body.len(),
            body
        );
        match parse_message(raw.as_bytes()).unwrap() {
            SipMessage::Request(request) => request,
            SipMessage::Response(_) => panic!("expected request"),
        }
    }

    #[test]
    fn test_interpret_notify_prefers_entity() {
        let body = r#"<dialog-info xmlns="urn:ietf:params:xml:ns:dialog-info" version="1" state="full" entity="sip:1001@pbx"><dialog id="1"><state>confirmed</state></dialog></dialog-info>"#;
        let request = notify("<sip:9999@pbx>;tag=b", body);
        assert_eq!(interpret_notify(&request), Some(("1001".to_string(), LineState::Busy)));
    }

    #[test]
    fn test_interpret_notify_falls_back_to_to_header() {
        let body = r#"<dialog-info version="1" state="full" entity="sip:1001@pbx"><dialog id="1" state="early"/></dialog-info>"#;
        let request = notify("<sip:2002@pbx>;tag=b", body);
        assert_eq!(interpret_notify(&request), Some(("2002".to_string(), LineState::Ringing)));
    }

    #[test]
    fn test_interpret_notify_without_extension() {
        let body = "<dialog-info/>";
        let request = notify("<sip:pbx>", body);
        assert_eq!(interpret_notify(&request), None);
    }

    #[test]
    fn test_interpret_notify_presence_fallback() {
        let body = "<presence><tuple><status><basic>open</basic></status></tuple></presence>";
        let request = notify("<sip:3003@pbx>", body);
        assert_eq!(interpret_notify(&request), Some(("3003".to_string(), LineState::Busy)));
    }
}
