//! Optional long-term session persistence

use async_trait::async_trait;
use metis_core::Event;

use crate::error::Result;
use crate::session::SessionRecord;

/// Write-behind sink for long-term session persistence
///
/// When configured on the session service, sessions and events are
/// replicated to the persister after every cache mutation. The persister
/// receives owned data copies and holds no references into the cache.
#[async_trait]
pub trait SessionPersister: Send + Sync {
    /// Save or update a session envelope
    async fn persist_session(&self, record: &SessionRecord) -> Result<()>;

    /// Save a single appended event
    async fn persist_event(&self, record: &SessionRecord, event: &Event) -> Result<()>;

    /// Remove a session and all its events
    async fn delete_session(
        &self,
        app_name: &str,
        user_id: &str,
        session_id: &str,
    ) -> Result<()>;

    /// Close the persister, draining any queued work
    async fn close(&self) -> Result<()>;
}
