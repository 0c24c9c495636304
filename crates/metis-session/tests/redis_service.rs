//! Live-Redis integration tests.
//!
//! Require a running Redis instance (default `redis://127.0.0.1:6379`,
//! override with `REDIS_URL`). Run with:
//!
//! ```text
//! cargo test -p metis-session --features redis-tests
//! ```

#![cfg(feature = "redis-tests")]

use std::collections::HashMap;
use std::time::Duration;

use metis_core::{Content, Event};
use metis_session::{
    CreateSessionRequest, DeleteSessionRequest, GetSessionRequest, ListSessionsRequest,
    RedisSessionService,
};

fn service() -> RedisSessionService {
    let url =
        std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());
    let client = redis::Client::open(url).unwrap();
    RedisSessionService::new(client, Duration::from_secs(300))
}

fn unique_user(prefix: &str) -> String {
    format!(
        "{prefix}-{}",
        chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default()
    )
}

#[tokio::test]
async fn test_create_then_get_round_trip() {
    let service = service();
    let user_id = unique_user("round-trip");

    let mut state = HashMap::new();
    state.insert("step".to_string(), serde_json::json!(1));
    let session = service
        .create(CreateSessionRequest {
            app_name: "itest".to_string(),
            user_id: user_id.clone(),
            session_id: None,
            state,
        })
        .await
        .unwrap();
    assert_eq!(session.id().len(), 32);

    let loaded = service
        .get(GetSessionRequest {
            app_name: "itest".to_string(),
            user_id: user_id.clone(),
            session_id: session.id().to_string(),
            ..GetSessionRequest::default()
        })
        .await
        .unwrap();

    assert_eq!(loaded.id(), session.id());
    assert_eq!(loaded.state().get("step"), Some(serde_json::json!(1)));
    assert!(loaded.events().is_empty());

    service
        .delete(DeleteSessionRequest {
            app_name: "itest".to_string(),
            user_id,
            session_id: session.id().to_string(),
        })
        .await
        .unwrap();
}

#[tokio::test]
async fn test_get_missing_session_is_not_found() {
    let service = service();
    let err = service
        .get(GetSessionRequest {
            app_name: "itest".to_string(),
            user_id: unique_user("missing"),
            session_id: "nope".to_string(),
            ..GetSessionRequest::default()
        })
        .await
        .unwrap_err();
    assert!(matches!(err, metis_session::Error::SessionNotFound(_)));
}

#[tokio::test]
async fn test_append_event_grows_the_tail() {
    let service = service();
    let user_id = unique_user("append");

    let session = service
        .create(CreateSessionRequest {
            app_name: "itest".to_string(),
            user_id: user_id.clone(),
            session_id: None,
            state: HashMap::new(),
        })
        .await
        .unwrap();

    for i in 0..3 {
        let mut event = Event::new("user", Content::user(format!("turn {i}")));
        service.append_event(&session, &mut event).await.unwrap();
        assert!(!event.id.is_empty());
    }

    let events = session.events().all().await;
    assert_eq!(events.len(), 3);
    assert_eq!(session.events().len(), 3);
    assert_eq!(
        session.events().at(2).unwrap().content.unwrap().flattened_text(),
        "turn 2"
    );
    // Service-assigned timestamps are non-decreasing.
    assert!(events.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));

    // Tail filter.
    let recent = service
        .get(GetSessionRequest {
            app_name: "itest".to_string(),
            user_id: user_id.clone(),
            session_id: session.id().to_string(),
            num_recent_events: Some(2),
            after: None,
        })
        .await
        .unwrap();
    assert_eq!(recent.events().len(), 2);

    service
        .delete(DeleteSessionRequest {
            app_name: "itest".to_string(),
            user_id,
            session_id: session.id().to_string(),
        })
        .await
        .unwrap();
}

#[tokio::test]
async fn test_list_returns_all_user_sessions() {
    let service = service();
    let user_id = unique_user("list");

    let mut ids = Vec::new();
    for _ in 0..3 {
        let session = service
            .create(CreateSessionRequest {
                app_name: "itest".to_string(),
                user_id: user_id.clone(),
                session_id: None,
                state: HashMap::new(),
            })
            .await
            .unwrap();
        ids.push(session.id().to_string());
    }

    let sessions = service
        .list(ListSessionsRequest {
            app_name: "itest".to_string(),
            user_id: user_id.clone(),
        })
        .await
        .unwrap();
    assert_eq!(sessions.len(), 3);
    for session in &sessions {
        assert!(ids.contains(&session.id().to_string()));
        assert!(session.events().is_empty());
    }

    for session_id in ids {
        service
            .delete(DeleteSessionRequest {
                app_name: "itest".to_string(),
                user_id: user_id.clone(),
                session_id,
            })
            .await
            .unwrap();
    }

    let sessions = service
        .list(ListSessionsRequest {
            app_name: "itest".to_string(),
            user_id,
        })
        .await
        .unwrap();
    assert!(sessions.is_empty());
}

#[tokio::test]
async fn test_state_set_persists_through_the_envelope() {
    let service = service();
    let user_id = unique_user("state");

    let session = service
        .create(CreateSessionRequest {
            app_name: "itest".to_string(),
            user_id: user_id.clone(),
            session_id: None,
            state: HashMap::new(),
        })
        .await
        .unwrap();

    session
        .state()
        .set("mood", serde_json::json!("curious"))
        .await
        .unwrap();

    let loaded = service
        .get(GetSessionRequest {
            app_name: "itest".to_string(),
            user_id: user_id.clone(),
            session_id: session.id().to_string(),
            ..GetSessionRequest::default()
        })
        .await
        .unwrap();
    assert_eq!(loaded.state().get("mood"), Some(serde_json::json!("curious")));

    service
        .delete(DeleteSessionRequest {
            app_name: "itest".to_string(),
            user_id,
            session_id: session.id().to_string(),
        })
        .await
        .unwrap();
}
