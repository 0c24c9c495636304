//! Live events view over the cache

use std::sync::RwLock;

use metis_core::Event;
use tracing::warn;

/// A session's events, refreshed from the cache on iteration
///
/// [`all`](Self::all) reloads the list from the cache (so appends made by
/// other holders of the session become visible), snapshots it under the
/// lock, and returns the snapshot. [`len`](Self::len) and
/// [`at`](Self::at) operate on the last snapshot.
pub struct EventsView {
    client: redis::Client,
    key: String,
    cached: RwLock<Vec<Event>>,
}

impl EventsView {
    pub(crate) fn new(events: Vec<Event>, client: redis::Client, key: String) -> Self {
        Self {
            client,
            key,
            cached: RwLock::new(events),
        }
    }

    /// Refresh from the cache and return a snapshot of all events
    ///
    /// On a cache read failure the previous snapshot is returned.
    pub async fn all(&self) -> Vec<Event> {
        if let Some(events) = self.load_from_cache().await {
            let mut cached = self.cached.write().expect("events lock poisoned");
            *cached = events;
        }
        self.cached.read().expect("events lock poisoned").clone()
    }

    /// Number of events in the last snapshot
    #[must_use]
    pub fn len(&self) -> usize {
        self.cached.read().expect("events lock poisoned").len()
    }

    /// True when the last snapshot holds no events
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Event at the given index in the last snapshot
    #[must_use]
    pub fn at(&self, index: usize) -> Option<Event> {
        self.cached
            .read()
            .expect("events lock poisoned")
            .get(index)
            .cloned()
    }

    async fn load_from_cache(&self) -> Option<Vec<Event>> {
        let mut conn = match self.client.get_multiplexed_async_connection().await {
            Ok(conn) => conn,
            Err(e) => {
                warn!(key = %self.key, error = %e, "failed to connect for events refresh");
                return None;
            }
        };

        let raw: Vec<String> = match redis::cmd("LRANGE")
            .arg(&self.key)
            .arg(0)
            .arg(-1)
            .query_async(&mut conn)
            .await
        {
            Ok(raw) => raw,
            Err(e) => {
                warn!(key = %self.key, error = %e, "failed to load events");
                return None;
            }
        };

        let mut events = Vec::with_capacity(raw.len());
        for (index, data) in raw.iter().enumerate() {
            match serde_json::from_str::<Event>(data) {
                Ok(event) => events.push(event),
                Err(e) => {
                    warn!(key = %self.key, index, error = %e, "dropping undecodable event");
                }
            }
        }
        Some(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use metis_core::Content;

    fn local_view(events: Vec<Event>) -> EventsView {
        EventsView::new(
            events,
            redis::Client::open("redis://127.0.0.1:6379/").unwrap(),
            "events:test:u1:s1".to_string(),
        )
    }

    #[test]
    fn test_len_and_at_use_the_snapshot() {
        let view = local_view(vec![
            Event::new("user", Content::user("hi")),
            Event::new("assistant", Content::model("hello")),
        ]);

        assert_eq!(view.len(), 2);
        assert!(!view.is_empty());
        assert_eq!(view.at(1).unwrap().author, "assistant");
        assert!(view.at(2).is_none());
    }

    #[test]
    fn test_empty_view() {
        let view = local_view(Vec::new());
        assert_eq!(view.len(), 0);
        assert!(view.is_empty());
        assert!(view.at(0).is_none());
    }
}
