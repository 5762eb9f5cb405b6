//! Line-state callbacks to presence updates.

use std::sync::Arc;

use async_trait::async_trait;
use blf_parser::LineState;
use graph_presence::PresencePublisher;
use sip_client::LineStateHandler;
use tracing::{error, info, warn};

use crate::extensions::ExtensionDirectory;

/// Publishes presence for the owner of each extension that changes state.
pub struct PresenceBridge {
    extensions: ExtensionDirectory,
    publisher: Arc<PresencePublisher>,
}

impl PresenceBridge {
    pub fn new(extensions: ExtensionDirectory, publisher: Arc<PresencePublisher>) -> Self {
        Self { extensions, publisher }
    }
}

#[async_trait]
impl LineStateHandler for PresenceBridge {
    async fn on_line_state_change(&self, extension: &str, state: LineState) {
        let Some(email) = self.extensions.email_for(extension) else {
            warn!(extension, state = %state, "BLF for unknown extension");
            return;
        };

        let (availability, activity) = state.to_presence();
        match self
            .publisher
            .publish_presence(email, extension, availability, activity)
            .await
        {
            Ok(()) => info!(
                extension,
                state = %state,
                availability = %availability,
                activity = %activity,
                "presence updated"
            ),
            Err(e) => error!(extension, email, error = %e, "set presence failed"),
        }
    }
}
