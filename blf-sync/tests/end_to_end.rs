//! NOTIFY in, presence update out.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use blf_parser::{Activity, Availability};
use blf_sync::{ExtensionDirectory, ExtensionEntry, PresenceBridge};
use graph_presence::{
    DirectoryClient, PresenceError, PresenceExpiry, PresencePublisher, PresenceUpdate, SessionIdStore,
};
use parking_lot::Mutex;
use sip_client::rsip::{Response, SipMessage};
use sip_client::{parse_message, EventDispatcher, InboundRequest, Responder, TransportError};

#[derive(Default)]
struct FakeGraph {
    lookups: Mutex<usize>,
    updates: Mutex<Vec<(String, Availability, Activity)>>,
}

#[async_trait]
impl DirectoryClient for FakeGraph {
    async fn get_user(&self, external_id: &str) -> graph_presence::Result<String> {
        *self.lookups.lock() += 1;
        match external_id {
            "alice@example.com" => Ok("obj-alice".to_string()),
            other => Err(PresenceError::NotFound(other.to_string())),
        }
    }

    async fn set_presence(&self, object_id: &str, update: &PresenceUpdate) -> graph_presence::Result<()> {
        self.updates
            .lock()
            .push((object_id.to_string(), update.availability, update.activity));
        Ok(())
    }
}

#[derive(Default)]
struct FakeSocket {
    sent: Mutex<Vec<u16>>,
}

#[async_trait]
impl Responder for FakeSocket {
    async fn send_response(&self, response: Response, _to: SocketAddr) -> Result<(), TransportError> {
        self.sent.lock().push(response.status_code.code());
        Ok(())
    }
}

struct Harness {
    graph: Arc<FakeGraph>,
    socket: Arc<FakeSocket>,
    dispatcher: EventDispatcher,
    _state_dir: tempfile::TempDir,
}

fn harness() -> Harness {
    let state_dir = tempfile::tempdir().unwrap();
    let graph = Arc::new(FakeGraph::default());
    let socket = Arc::new(FakeSocket::default());

    let store = SessionIdStore::load(state_dir.path().join("presence-state.json")).unwrap();
    let publisher = Arc::new(PresencePublisher::new(
        graph.clone(),
        store,
        "client-id",
        PresenceExpiry::default(),
    ));
    let extensions = ExtensionDirectory::from_entries(
        vec![ExtensionEntry {
            extension: "1001".to_string(),
            email: "alice@example.com".to_string(),
        }],
        "inline",
    );
    let bridge = Arc::new(PresenceBridge::new(extensions, publisher));
    let dispatcher = EventDispatcher::new(bridge, socket.clone());

    Harness {
        graph,
        socket,
        dispatcher,
        _state_dir: state_dir,
    }
}

fn notify(extension: &str, cseq: u32, state: &str) -> InboundRequest {
    let body = format!(
        r#"<?xml version="1.0"?>
<dialog-info xmlns="urn:ietf:params:xml:ns:dialog-info" version="{cseq}" state="full" entity="sip:{extension}@pbx.example.com">
  <dialog id="call-1" direction="initiator"><state>{state}</state></dialog>
</dialog-info>"#
    );
    let raw = format!(
        "NOTIFY sip:blf-client@192.0.2.10 SIP/2.0\r\n\
         Via: SIP/2.0/UDP 192.0.2.1:5060;branch=z9hG4bK{cseq}\r\n\
         From: <sip:{extension}@pbx.example.com>;tag=pbx\r\n\
         To: <sip:blf-client@pbx.example.com>;tag=blf\r\n\
         Call-ID: sub-{extension}\r\n\
         CSeq: {cseq} NOTIFY\r\n\
         Event: dialog\r\n\
         Subscription-State: active;expires=3600\r\n\
         Content-Type: application/dialog-info+xml\r\n\
         Content-Length: {}\r\n\r\n{}",
        body.len(),
        body
    );
    let request = match parse_message(raw.as_bytes()).unwrap() {
        SipMessage::Request(request) => request,
        SipMessage::Response(_) => panic!("expected request"),
    };
    InboundRequest {
        request,
        source: "192.0.2.1:5060".parse().unwrap(),
    }
}

async fn deliver(harness: &Harness, request: InboundRequest) {
    if let Some(task) = harness.dispatcher.handle_request(request).await {
        task.await.unwrap();
    }
}

#[tokio::test]
async fn test_confirmed_dialog_publishes_busy() {
    let harness = harness();
    deliver(&harness, notify("1001", 1, "confirmed")).await;

    assert_eq!(*harness.socket.sent.lock(), vec![200]);
    assert_eq!(
        *harness.graph.updates.lock(),
        vec![("obj-alice".to_string(), Availability::Busy, Activity::InACall)]
    );
}

#[tokio::test]
async fn test_call_end_publishes_available() {
    let harness = harness();
    deliver(&harness, notify("1001", 1, "confirmed")).await;
    deliver(&harness, notify("1001", 2, "terminated")).await;

    assert_eq!(
        *harness.graph.updates.lock(),
        vec![
            ("obj-alice".to_string(), Availability::Busy, Activity::InACall),
            ("obj-alice".to_string(), Availability::Available, Activity::Available),
        ]
    );
    assert_eq!(*harness.graph.lookups.lock(), 1);
}

#[tokio::test]
async fn test_ringing_publishes_busy() {
    let harness = harness();
    deliver(&harness, notify("1001", 1, "early")).await;

    assert_eq!(
        *harness.graph.updates.lock(),
        vec![("obj-alice".to_string(), Availability::Busy, Activity::InACall)]
    );
}

#[tokio::test]
async fn test_unknown_extension_is_acknowledged_but_not_published() {
    let harness = harness();
    deliver(&harness, notify("2002", 1, "confirmed")).await;

    assert_eq!(*harness.socket.sent.lock(), vec![200]);
    assert!(harness.graph.updates.lock().is_empty());
    assert_eq!(*harness.graph.lookups.lock(), 0);
}
