//! Session state map with atomic cache persistence

use std::collections::HashMap;
use std::time::Duration;

use dashmap::DashMap;
use tracing::{debug, warn};

use crate::error::Result;

/// Lua script that atomically rewrites the session envelope with a new
/// state map and refreshed `last_update_time`, keeping the TTL.
///
/// KEYS[1]: session key
/// ARGV[1]: new state JSON
/// ARGV[2]: TTL in seconds
/// ARGV[3]: RFC 3339 timestamp (passed in so the stored format matches
/// the envelope serializer, not Lua's date formatting)
///
/// Returns "OK", or "NOTFOUND" when no envelope exists at the key.
const UPDATE_STATE_SCRIPT: &str = r"
local data = redis.call('GET', KEYS[1])
if not data then
    return 'NOTFOUND'
end

local session = cjson.decode(data)
session.state = cjson.decode(ARGV[1])
session.last_update_time = ARGV[3]

local updated = cjson.encode(session)
local ttl = tonumber(ARGV[2])

if ttl > 0 then
    redis.call('SET', KEYS[1], updated, 'EX', ttl)
else
    redis.call('SET', KEYS[1], updated)
end

return 'OK'
";

/// Concurrent session state map
///
/// Reads are served locally. Every [`set`](Self::set) persists the full
/// snapshot through the atomic envelope-rewrite script, so competing
/// state writers cannot interleave partial envelopes.
pub struct SessionState {
    data: DashMap<String, serde_json::Value>,
    client: redis::Client,
    key: String,
    ttl: Duration,
}

impl SessionState {
    pub(crate) fn new(
        initial: HashMap<String, serde_json::Value>,
        client: redis::Client,
        key: String,
        ttl: Duration,
    ) -> Self {
        let data = DashMap::new();
        for (k, v) in initial {
            data.insert(k, v);
        }
        Self {
            data,
            client,
            key,
            ttl,
        }
    }

    /// Get a state value
    #[must_use]
    pub fn get(&self, key: &str) -> Option<serde_json::Value> {
        self.data.get(key).map(|entry| entry.value().clone())
    }

    /// Set a state value and persist the new snapshot atomically
    ///
    /// When the envelope is absent from the cache (new or expired
    /// session), the set succeeds against the local map only.
    pub async fn set(&self, key: impl Into<String>, value: serde_json::Value) -> Result<()> {
        self.data.insert(key.into(), value);

        if let Err(e) = self.persist_atomic().await {
            warn!(key = %self.key, error = %e, "failed to persist state");
            return Err(e);
        }
        Ok(())
    }

    /// Snapshot the full state map
    #[must_use]
    pub fn all(&self) -> HashMap<String, serde_json::Value> {
        self.data
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    async fn persist_atomic(&self) -> Result<()> {
        let state_json = serde_json::to_string(&self.all())?;
        let timestamp = chrono::Utc::now().to_rfc3339();

        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let result: String = redis::Script::new(UPDATE_STATE_SCRIPT)
            .key(&self.key)
            .arg(state_json)
            .arg(self.ttl.as_secs())
            .arg(timestamp)
            .invoke_async(&mut conn)
            .await?;

        if result == "NOTFOUND" {
            // No envelope yet; acceptable for sessions not in the cache.
            debug!(key = %self.key, "state set without cached envelope");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn local_state() -> SessionState {
        SessionState::new(
            HashMap::from([("count".to_string(), serde_json::json!(1))]),
            redis::Client::open("redis://127.0.0.1:6379/").unwrap(),
            "session:test:u1:s1".to_string(),
            Duration::from_secs(60),
        )
    }

    #[test]
    fn test_get_and_all_reflect_initial_state() {
        let state = local_state();
        assert_eq!(state.get("count"), Some(serde_json::json!(1)));
        assert_eq!(state.get("missing"), None);
        assert_eq!(state.all().len(), 1);
    }
}
