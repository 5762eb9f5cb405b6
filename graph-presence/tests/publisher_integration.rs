//! PresencePublisher against an in-memory directory.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use blf_parser::{Activity, Availability, LineState};
use graph_presence::{
    DirectoryClient, PresenceError, PresenceExpiry, PresencePublisher, PresenceUpdate, Result, SessionIdStore,
};
use parking_lot::Mutex;

#[derive(Default)]
struct FakeDirectory {
    users: HashMap<String, String>,
    lookups: Mutex<Vec<String>>,
    updates: Mutex<Vec<(String, PresenceUpdate)>>,
    fail_presence: bool,
}

impl FakeDirectory {
    fn with_user(mut self, external_id: &str, object_id: &str) -> Self {
        self.users.insert(external_id.to_string(), object_id.to_string());
        self
    }
}

#[async_trait]
impl DirectoryClient for FakeDirectory {
    async fn get_user(&self, external_id: &str) -> Result<String> {
        self.lookups.lock().push(external_id.to_string());
        self.users
            .get(external_id)
            .cloned()
            .ok_or_else(|| PresenceError::NotFound(external_id.to_string()))
    }

    async fn set_presence(&self, object_id: &str, update: &PresenceUpdate) -> Result<()> {
        if self.fail_presence {
            return Err(PresenceError::Api {
                status: 503,
                code: "ServiceUnavailable".to_string(),
                message: "try later".to_string(),
            });
        }
        self.updates.lock().push((object_id.to_string(), update.clone()));
        Ok(())
    }
}

fn publisher(directory: Arc<FakeDirectory>, dir: &tempfile::TempDir) -> PresencePublisher {
    let store = SessionIdStore::load(dir.path().join("presence-state.json")).unwrap();
    PresencePublisher::new(
        directory,
        store,
        "app-client-id",
        PresenceExpiry::from_minutes(90).unwrap(),
    )
}

#[tokio::test]
async fn test_identity_resolved_once() {
    let dir = tempfile::tempdir().unwrap();
    let directory = Arc::new(FakeDirectory::default().with_user("alice@example.com", "obj-alice"));
    let publisher = publisher(directory.clone(), &dir);

    assert_eq!(publisher.resolve_identity("alice@example.com").await.unwrap(), "obj-alice");
    assert_eq!(publisher.resolve_identity("alice@example.com").await.unwrap(), "obj-alice");
    assert_eq!(directory.lookups.lock().len(), 1);
}

#[tokio::test]
async fn test_publish_uses_process_session_id() {
    let dir = tempfile::tempdir().unwrap();
    let directory = Arc::new(FakeDirectory::default().with_user("alice@example.com", "obj-alice"));
    let publisher = publisher(directory.clone(), &dir);

    let (availability, activity) = LineState::Busy.to_presence();
    publisher
        .publish_presence("alice@example.com", "1001", availability, activity)
        .await
        .unwrap();
    publisher
        .publish_presence("alice@example.com", "1001", Availability::Available, Activity::Available)
        .await
        .unwrap();

    let updates = directory.updates.lock();
    assert_eq!(updates.len(), 2);
    assert_eq!(updates[0].0, "obj-alice");
    assert_eq!(
        updates[0].1,
        PresenceUpdate {
            session_id: "app-client-id".to_string(),
            availability: Availability::Busy,
            activity: Activity::InACall,
            expiration_duration: "PT1H30M".to_string(),
        }
    );
    assert_eq!(updates[1].1.availability, Availability::Available);
    assert_eq!(directory.lookups.lock().len(), 1);
}

#[tokio::test]
async fn test_unresolved_identity_skips_update() {
    let dir = tempfile::tempdir().unwrap();
    let directory = Arc::new(FakeDirectory::default());
    let publisher = publisher(directory.clone(), &dir);

    let err = publisher
        .publish_presence("ghost@example.com", "1009", Availability::Busy, Activity::InACall)
        .await
        .unwrap_err();
    assert!(matches!(err, PresenceError::NotFound(_)));
    assert!(directory.updates.lock().is_empty());

    // Not cached: the next event looks the user up again
    let _ = publisher.resolve_identity("ghost@example.com").await;
    assert_eq!(directory.lookups.lock().len(), 2);
}

#[tokio::test]
async fn test_publish_failure_is_returned() {
    let dir = tempfile::tempdir().unwrap();
    let directory = Arc::new(FakeDirectory {
        fail_presence: true,
        ..FakeDirectory::default().with_user("alice@example.com", "obj-alice")
    });
    let publisher = publisher(directory.clone(), &dir);

    let err = publisher
        .publish_presence("alice@example.com", "1001", Availability::Busy, Activity::InACall)
        .await
        .unwrap_err();
    assert!(matches!(err, PresenceError::Api { status: 503, .. }));
}

#[tokio::test]
async fn test_session_token_capabilities_are_separate() {
    let dir = tempfile::tempdir().unwrap();
    let directory = Arc::new(FakeDirectory::default());
    let publisher = publisher(directory, &dir);

    let persisted = publisher.persisted_session_id("1001").unwrap();
    assert_eq!(publisher.persisted_session_id("1001").unwrap(), persisted);
    assert_ne!(persisted, publisher.process_session_id());
    assert_eq!(publisher.process_session_id(), "app-client-id");

    publisher.store_session_id("1002", "manual").unwrap();
    let reloaded = SessionIdStore::load(dir.path().join("presence-state.json")).unwrap();
    assert_eq!(reloaded.get("1001"), Some(persisted));
    assert_eq!(reloaded.get("1002").as_deref(), Some("manual"));
}
