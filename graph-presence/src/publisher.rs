//! Identity resolution and presence publishing.

use std::sync::Arc;

use blf_parser::{Activity, Availability};
use tracing::{debug, error};
use uuid::Uuid;

use crate::client::{DirectoryClient, PresenceUpdate};
use crate::error::Result;
use crate::expiry::PresenceExpiry;
use crate::identity::IdentityCache;
use crate::store::SessionIdStore;

/// Publishes presence for monitored extensions.
///
/// Owns the identity cache and the durable session-id store; neither map is
/// exposed directly.
pub struct PresencePublisher {
    directory: Arc<dyn DirectoryClient>,
    identities: IdentityCache,
    sessions: SessionIdStore,
    session_id: String,
    expiry: PresenceExpiry,
}

impl PresencePublisher {
    /// `session_id` is the process-scoped token sent with every update
    /// (the application's client id for app-only access).
    pub fn new(
        directory: Arc<dyn DirectoryClient>,
        sessions: SessionIdStore,
        session_id: impl Into<String>,
        expiry: PresenceExpiry,
    ) -> Self {
        Self {
            directory,
            identities: IdentityCache::new(),
            sessions,
            session_id: session_id.into(),
            expiry,
        }
    }

    pub fn expiry(&self) -> PresenceExpiry {
        self.expiry
    }

    /// Directory object id for `external_id`, looked up at most once.
    pub async fn resolve_identity(&self, external_id: &str) -> Result<String> {
        self.identities
            .get_or_resolve(external_id, || async {
                let object_id = self.directory.get_user(external_id).await?;
                debug!(external_id, object_id = %object_id, "resolved user to object id");
                Ok(object_id)
            })
            .await
    }

    /// Resolve `external_id` and assert the presence pair.
    ///
    /// Failures are logged with their context and returned; nothing is retried.
    pub async fn publish_presence(
        &self,
        external_id: &str,
        extension: &str,
        availability: Availability,
        activity: Activity,
    ) -> Result<()> {
        let object_id = match self.resolve_identity(external_id).await {
            Ok(object_id) => object_id,
            Err(e) => {
                error!(
                    external_id,
                    extension,
                    error = %e,
                    "resolve user id failed"
                );
                return Err(e);
            }
        };

        let update = PresenceUpdate {
            session_id: self.process_session_id().to_string(),
            availability,
            activity,
            expiration_duration: self.expiry.to_iso8601(),
        };

        if let Err(e) = self.directory.set_presence(&object_id, &update).await {
            error!(
                external_id,
                extension,
                object_id = %object_id,
                availability = %availability,
                activity = %activity,
                error = %e,
                error_chain = %e.chain(),
                "setPresence failed"
            );
            return Err(e);
        }

        debug!(external_id, extension, availability = %availability, "setPresence ok");
        Ok(())
    }

    /// Token sent with every presence update from this process.
    pub fn process_session_id(&self) -> &str {
        &self.session_id
    }

    /// Per-extension token from the durable store, created on first use.
    ///
    /// Publishing does not use this value.
    pub fn persisted_session_id(&self, extension: &str) -> Result<String> {
        self.sessions
            .get_or_insert_with(extension, || Uuid::new_v4().to_string())
    }

    /// Replace the stored token for `extension`.
    pub fn store_session_id(&self, extension: &str, session_id: &str) -> Result<()> {
        self.sessions.set(extension, session_id)
    }
}
