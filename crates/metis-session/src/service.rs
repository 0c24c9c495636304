//! Redis-backed cached session service
//!
//! The cache is authoritative for reads; every mutation resets the TTL of
//! the session record, its events list, and its per-user index entry, and
//! fans out to the optional persister as a best-effort replication.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use metis_core::Event;

use crate::error::{Error, Result};
use crate::events::EventsView;
use crate::persister::SessionPersister;
use crate::session::{Session, SessionRecord};
use crate::state::SessionState;

/// Default session expiration time
pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(24 * 60 * 60);

const SESSION_ID_BYTE_LENGTH: usize = 16;

/// Request to create a session
#[derive(Debug, Clone, Default)]
pub struct CreateSessionRequest {
    /// Owning application
    pub app_name: String,
    /// Owning user
    pub user_id: String,
    /// Session id; generated when absent
    pub session_id: Option<String>,
    /// Initial state
    pub state: HashMap<String, serde_json::Value>,
}

/// Request to load a session
#[derive(Debug, Clone, Default)]
pub struct GetSessionRequest {
    /// Owning application
    pub app_name: String,
    /// Owning user
    pub user_id: String,
    /// Session id
    pub session_id: String,
    /// Keep only the most recent N events
    pub num_recent_events: Option<usize>,
    /// Keep only events at or after this moment
    pub after: Option<DateTime<Utc>>,
}

/// Request to list a user's sessions
#[derive(Debug, Clone, Default)]
pub struct ListSessionsRequest {
    /// Owning application
    pub app_name: String,
    /// Owning user
    pub user_id: String,
}

/// Request to delete a session
#[derive(Debug, Clone, Default)]
pub struct DeleteSessionRequest {
    /// Owning application
    pub app_name: String,
    /// Owning user
    pub user_id: String,
    /// Session id
    pub session_id: String,
}

/// Session store fronting the cache, with optional write-behind
pub struct RedisSessionService {
    client: redis::Client,
    ttl: Duration,
    persister: Option<Arc<dyn SessionPersister>>,
}

pub(crate) fn build_session_key(app_name: &str, user_id: &str, session_id: &str) -> String {
    format!("session:{app_name}:{user_id}:{session_id}")
}

pub(crate) fn build_session_index_key(app_name: &str, user_id: &str) -> String {
    format!("session:{app_name}:{user_id}")
}

pub(crate) fn build_events_key(app_name: &str, user_id: &str, session_id: &str) -> String {
    format!("events:{app_name}:{user_id}:{session_id}")
}

/// Generate a session id: 16 random bytes, hex encoded
///
/// Falls back to the current nanosecond timestamp if the system RNG
/// fails.
pub(crate) fn generate_session_id() -> String {
    let mut bytes = [0u8; SESSION_ID_BYTE_LENGTH];
    if getrandom::getrandom(&mut bytes).is_err() {
        return Utc::now()
            .timestamp_nanos_opt()
            .unwrap_or_default()
            .to_string();
    }
    hex::encode(bytes)
}

/// Keep the tail N events, then drop events before `after`
pub(crate) fn apply_event_filters(
    mut events: Vec<Event>,
    num_recent_events: Option<usize>,
    after: Option<DateTime<Utc>>,
) -> Vec<Event> {
    if let Some(limit) = num_recent_events {
        if limit > 0 && events.len() > limit {
            events.drain(..events.len() - limit);
        }
    }
    if let Some(after) = after {
        events.retain(|event| event.timestamp >= after);
    }
    events
}

impl RedisSessionService {
    /// Create a session service over the given cache client
    ///
    /// A zero TTL snaps to the 24-hour default.
    #[must_use]
    pub fn new(client: redis::Client, ttl: Duration) -> Self {
        let ttl = if ttl.is_zero() {
            DEFAULT_SESSION_TTL
        } else {
            ttl
        };
        Self {
            client,
            ttl,
            persister: None,
        }
    }

    /// Attach a write-behind persister
    #[must_use]
    pub fn with_persister(mut self, persister: Arc<dyn SessionPersister>) -> Self {
        self.persister = Some(persister);
        self
    }

    async fn connection(&self) -> Result<redis::aio::MultiplexedConnection> {
        Ok(self.client.get_multiplexed_async_connection().await?)
    }

    fn ttl_secs(&self) -> u64 {
        self.ttl.as_secs()
    }

    /// Create a new session
    pub async fn create(&self, req: CreateSessionRequest) -> Result<Session> {
        let session_id = req
            .session_id
            .filter(|id| !id.is_empty())
            .unwrap_or_else(generate_session_id);

        let key = build_session_key(&req.app_name, &req.user_id, &session_id);
        let events_key = build_events_key(&req.app_name, &req.user_id, &session_id);
        let index_key = build_session_index_key(&req.app_name, &req.user_id);

        let record = SessionRecord {
            id: session_id.clone(),
            app_name: req.app_name,
            user_id: req.user_id,
            state: req.state,
            last_update_time: Utc::now(),
        };
        let data = serde_json::to_string(&record)?;

        let mut conn = self.connection().await?;
        redis::cmd("SET")
            .arg(&key)
            .arg(data)
            .arg("EX")
            .arg(self.ttl_secs())
            .query_async::<()>(&mut conn)
            .await?;

        redis::cmd("SADD")
            .arg(&index_key)
            .arg(&session_id)
            .query_async::<()>(&mut conn)
            .await?;
        if let Err(e) = redis::cmd("EXPIRE")
            .arg(&index_key)
            .arg(self.ttl_secs())
            .query_async::<()>(&mut conn)
            .await
        {
            warn!(key = %index_key, error = %e, "failed to refresh index ttl");
        }

        if let Some(persister) = &self.persister {
            if let Err(e) = persister.persist_session(&record).await {
                warn!(session_id = %record.id, error = %e, "failed to persist created session");
            }
        }

        debug!(session_id = %record.id, "session created");
        Ok(self.build_session(record, Vec::new(), key, events_key))
    }

    /// Load a session, its events filtered per the request
    pub async fn get(&self, req: GetSessionRequest) -> Result<Session> {
        let key = build_session_key(&req.app_name, &req.user_id, &req.session_id);
        let events_key = build_events_key(&req.app_name, &req.user_id, &req.session_id);

        let mut conn = self.connection().await?;
        let data: Option<String> = redis::cmd("GET").arg(&key).query_async(&mut conn).await?;
        let Some(data) = data else {
            return Err(Error::SessionNotFound(req.session_id));
        };
        let record: SessionRecord = serde_json::from_str(&data)?;

        let raw: Vec<String> = redis::cmd("LRANGE")
            .arg(&events_key)
            .arg(0)
            .arg(-1)
            .query_async(&mut conn)
            .await?;

        let mut events = Vec::with_capacity(raw.len());
        let mut decode_failures = 0usize;
        for (index, item) in raw.iter().enumerate() {
            match serde_json::from_str::<Event>(item) {
                Ok(event) => events.push(event),
                Err(e) => {
                    decode_failures += 1;
                    debug!(session_id = %req.session_id, index, error = %e, "dropping undecodable event");
                }
            }
        }
        if decode_failures > 0 {
            warn!(
                session_id = %req.session_id,
                count = decode_failures,
                "failed to decode events"
            );
        }

        let events = apply_event_filters(events, req.num_recent_events, req.after);
        Ok(self.build_session(record, events, key, events_key))
    }

    /// List all of a user's sessions
    ///
    /// Full envelopes are fetched in one pipelined round trip; the
    /// returned sessions carry empty, lazily-refreshing event views.
    /// Index entries whose record has expired are skipped.
    pub async fn list(&self, req: ListSessionsRequest) -> Result<Vec<Session>> {
        let index_key = build_session_index_key(&req.app_name, &req.user_id);

        let mut conn = self.connection().await?;
        let session_ids: Vec<String> = redis::cmd("SMEMBERS")
            .arg(&index_key)
            .query_async(&mut conn)
            .await?;
        if session_ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut pipe = redis::pipe();
        for session_id in &session_ids {
            pipe.get(build_session_key(&req.app_name, &req.user_id, session_id));
        }
        let values: Vec<Option<String>> = pipe.query_async(&mut conn).await?;

        let mut sessions = Vec::with_capacity(session_ids.len());
        for (session_id, value) in session_ids.iter().zip(values) {
            let Some(data) = value else {
                warn!(session_id = %session_id, "indexed session missing from cache, skipping");
                continue;
            };
            let record: SessionRecord = match serde_json::from_str(&data) {
                Ok(record) => record,
                Err(e) => {
                    warn!(session_id = %session_id, error = %e, "failed to decode session, skipping");
                    continue;
                }
            };

            let key = build_session_key(&req.app_name, &req.user_id, session_id);
            let events_key = build_events_key(&req.app_name, &req.user_id, session_id);
            sessions.push(self.build_session(record, Vec::new(), key, events_key));
        }

        Ok(sessions)
    }

    /// Delete a session from the cache and fan out to the persister
    pub async fn delete(&self, req: DeleteSessionRequest) -> Result<()> {
        let key = build_session_key(&req.app_name, &req.user_id, &req.session_id);
        let events_key = build_events_key(&req.app_name, &req.user_id, &req.session_id);
        let index_key = build_session_index_key(&req.app_name, &req.user_id);

        let mut conn = self.connection().await?;
        redis::pipe()
            .del(&key)
            .ignore()
            .del(&events_key)
            .ignore()
            .srem(&index_key, &req.session_id)
            .ignore()
            .query_async::<()>(&mut conn)
            .await?;

        if let Some(persister) = &self.persister {
            if let Err(e) = persister
                .delete_session(&req.app_name, &req.user_id, &req.session_id)
                .await
            {
                warn!(session_id = %req.session_id, error = %e, "failed to delete persisted session");
            }
        }

        debug!(session_id = %req.session_id, "session deleted");
        Ok(())
    }

    /// Append an event to a session
    ///
    /// The service assigns the timestamp and, when absent, the event id.
    /// The envelope read-modify-write here is not held under a lock;
    /// concurrent appends to one session may race on `last_update_time`,
    /// while the events list itself stays strictly ordered.
    pub async fn append_event(&self, session: &Session, event: &mut Event) -> Result<()> {
        event.timestamp = Utc::now();
        if event.id.is_empty() {
            event.id = generate_session_id();
        }
        let data = serde_json::to_string(&event)?;

        let events_key = build_events_key(session.app_name(), session.user_id(), session.id());
        let key = build_session_key(session.app_name(), session.user_id(), session.id());
        let index_key = build_session_index_key(session.app_name(), session.user_id());

        let mut conn = self.connection().await?;
        redis::cmd("RPUSH")
            .arg(&events_key)
            .arg(data)
            .query_async::<()>(&mut conn)
            .await?;
        for refresh_key in [&events_key, &index_key] {
            if let Err(e) = redis::cmd("EXPIRE")
                .arg(refresh_key)
                .arg(self.ttl_secs())
                .query_async::<()>(&mut conn)
                .await
            {
                warn!(key = %refresh_key, error = %e, "failed to refresh ttl");
            }
        }

        // Refresh the envelope: snapshot the live state and bump the
        // update time.
        let data: Option<String> = redis::cmd("GET").arg(&key).query_async(&mut conn).await?;
        let Some(data) = data else {
            return Err(Error::SessionNotFound(session.id().to_string()));
        };
        let mut record: SessionRecord = serde_json::from_str(&data)?;
        record.state = session.state().all();
        record.last_update_time = Utc::now();

        let updated = serde_json::to_string(&record)?;
        redis::cmd("SET")
            .arg(&key)
            .arg(updated)
            .arg("EX")
            .arg(self.ttl_secs())
            .query_async::<()>(&mut conn)
            .await?;

        if let Some(persister) = &self.persister {
            if let Err(e) = persister.persist_event(&record, event).await {
                warn!(
                    session_id = %session.id(),
                    event_id = %event.id,
                    error = %e,
                    "failed to persist event"
                );
            }
        }

        debug!(session_id = %session.id(), event_id = %event.id, "event appended");
        Ok(())
    }

    fn build_session(
        &self,
        record: SessionRecord,
        events: Vec<Event>,
        key: String,
        events_key: String,
    ) -> Session {
        let state = SessionState::new(
            record.state.clone(),
            self.client.clone(),
            key,
            self.ttl,
        );
        let events = EventsView::new(events, self.client.clone(), events_key);
        Session::new(record, state, events)
    }
}
