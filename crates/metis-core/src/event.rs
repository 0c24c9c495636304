//! Session event types
//!
//! An [`Event`] is one turn in a session. Events are append-only; the
//! session service assigns ids and timestamps on append. The serde
//! representation here is the stable wire format stored in the cache and
//! the durable store.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::content::Content;

/// One turn in a session
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Event {
    /// Event id, assigned by the session service if empty
    #[serde(default)]
    pub id: String,
    /// Id of the invocation that produced this event
    #[serde(default)]
    pub invocation_id: String,
    /// Author of the turn (agent name or "user")
    #[serde(default)]
    pub author: String,
    /// Server-assigned timestamp
    #[serde(default)]
    pub timestamp: DateTime<Utc>,
    /// Turn content
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<Content>,
    /// True for incremental streaming chunks
    #[serde(default)]
    pub partial: bool,
    /// True on the last event of a turn
    #[serde(default)]
    pub turn_complete: bool,
    /// Error code, when the turn failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    /// Error message, when the turn failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Side effects carried by this event
    #[serde(default)]
    pub actions: EventActions,
}

impl Event {
    /// Create an event with the given author and content
    #[must_use]
    pub fn new(author: impl Into<String>, content: Content) -> Self {
        Self {
            author: author.into(),
            timestamp: Utc::now(),
            content: Some(content),
            ..Self::default()
        }
    }
}

/// State and artifact deltas attached to an event
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventActions {
    /// Session-state keys this event changes
    #[serde(default)]
    pub state_delta: HashMap<String, serde_json::Value>,
    /// Artifact versions this event produces
    #[serde(default)]
    pub artifact_delta: HashMap<String, i64>,
}
