//! Session handle and its stored envelope

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::events::EventsView;
use crate::state::SessionState;

/// The JSON envelope stored at the session key
///
/// This is the stable cache wire format, and the data copy handed to the
/// persister. The events list is stored separately.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    /// Session id
    pub id: String,
    /// Owning application
    pub app_name: String,
    /// Owning user
    pub user_id: String,
    /// State snapshot
    #[serde(default)]
    pub state: HashMap<String, serde_json::Value>,
    /// Time of the last mutation
    pub last_update_time: DateTime<Utc>,
}

/// A live session handle backed by the cache
///
/// Reads go to the cache; the state map persists its own mutations, and
/// the events view refreshes from the cache on iteration.
pub struct Session {
    id: String,
    app_name: String,
    user_id: String,
    state: SessionState,
    events: EventsView,
    last_update_time: DateTime<Utc>,
}

impl Session {
    pub(crate) fn new(
        record: SessionRecord,
        state: SessionState,
        events: EventsView,
    ) -> Self {
        Self {
            id: record.id,
            app_name: record.app_name,
            user_id: record.user_id,
            state,
            events,
            last_update_time: record.last_update_time,
        }
    }

    /// Session id
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Owning application
    #[must_use]
    pub fn app_name(&self) -> &str {
        &self.app_name
    }

    /// Owning user
    #[must_use]
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Time of the last mutation, as of when this handle was loaded
    #[must_use]
    pub fn last_update_time(&self) -> DateTime<Utc> {
        self.last_update_time
    }

    /// The session's state map
    #[must_use]
    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// The session's events view
    #[must_use]
    pub fn events(&self) -> &EventsView {
        &self.events
    }

    /// Snapshot this session as a stored envelope
    #[must_use]
    pub fn to_record(&self) -> SessionRecord {
        SessionRecord {
            id: self.id.clone(),
            app_name: self.app_name.clone(),
            user_id: self.user_id.clone(),
            state: self.state.all(),
            last_update_time: self.last_update_time,
        }
    }
}
