//! Write-behind session persister
//!
//! Operations enqueue onto a bounded channel and return immediately; a
//! single worker drains the queue serially. A full queue falls back to
//! the synchronous path inline. With a buffer size of zero the persister
//! runs fully synchronously.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::Row;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use metis_core::Event;

use super::PostgresClient;
use crate::error::{Error, Result};
use crate::persister::SessionPersister;
use crate::session::SessionRecord;

/// Default async queue capacity
pub const DEFAULT_ASYNC_BUFFER_SIZE: usize = 1000;

/// Every dequeued op runs under this timeout; the producer's context is
/// gone by the time the worker picks the op up.
const ASYNC_OP_TIMEOUT: Duration = Duration::from_secs(30);

enum AsyncOp {
    Session(SessionRecord),
    Event {
        record: SessionRecord,
        event: Event,
    },
    Delete {
        app_name: String,
        user_id: String,
        session_id: String,
    },
}

impl AsyncOp {
    fn kind(&self) -> &'static str {
        match self {
            Self::Session(_) => "session",
            Self::Event { .. } => "event",
            Self::Delete { .. } => "delete",
        }
    }
}

/// PostgreSQL write-behind persister
pub struct PostgresSessionPersister {
    client: PostgresClient,
    sender: Mutex<Option<mpsc::Sender<AsyncOp>>>,
    worker: tokio::sync::Mutex<Option<JoinHandle<()>>>,
    closed: Mutex<bool>,
}

impl PostgresSessionPersister {
    /// Create a persister with the default async buffer size
    pub async fn new(client: PostgresClient) -> Result<Self> {
        Self::with_buffer_size(client, DEFAULT_ASYNC_BUFFER_SIZE).await
    }

    /// Create a persister with the given async buffer size
    ///
    /// A size of zero disables the queue: every operation runs
    /// synchronously.
    pub async fn with_buffer_size(client: PostgresClient, buffer_size: usize) -> Result<Self> {
        init_schema(&client).await?;

        let (sender, worker) = if buffer_size > 0 {
            let (tx, mut rx) = mpsc::channel::<AsyncOp>(buffer_size);
            let worker_client = client.clone();
            let handle = tokio::spawn(async move {
                while let Some(op) = rx.recv().await {
                    process_async_op(&worker_client, op).await;
                }
            });
            (Some(tx), Some(handle))
        } else {
            (None, None)
        };

        info!(buffer_size, "postgres session persister initialized");
        Ok(Self {
            client,
            sender: Mutex::new(sender),
            worker: tokio::sync::Mutex::new(worker),
            closed: Mutex::new(false),
        })
    }

    /// The underlying client
    #[must_use]
    pub fn client(&self) -> &PostgresClient {
        &self.client
    }

    fn guard_closed(&self) -> Result<()> {
        if *self.closed.lock().expect("closed flag poisoned") {
            return Err(Error::Closed);
        }
        Ok(())
    }

    /// Try the async queue; returns the op back when it must run inline
    fn try_enqueue(&self, op: AsyncOp) -> Option<AsyncOp> {
        let sender = self.sender.lock().expect("sender lock poisoned");
        let Some(tx) = sender.as_ref() else {
            return Some(op);
        };
        match tx.try_send(op) {
            Ok(()) => None,
            Err(TrySendError::Full(op)) => {
                warn!(op = op.kind(), "async queue full, falling back to sync");
                Some(op)
            }
            Err(TrySendError::Closed(op)) => Some(op),
        }
    }
}

#[async_trait]
impl SessionPersister for PostgresSessionPersister {
    async fn persist_session(&self, record: &SessionRecord) -> Result<()> {
        self.guard_closed()?;
        match self.try_enqueue(AsyncOp::Session(record.clone())) {
            None => Ok(()),
            Some(AsyncOp::Session(record)) => persist_session_sync(&self.client, &record).await,
            Some(_) => unreachable!("enqueue returns the op it was given"),
        }
    }

    async fn persist_event(&self, record: &SessionRecord, event: &Event) -> Result<()> {
        self.guard_closed()?;
        let op = AsyncOp::Event {
            record: record.clone(),
            event: event.clone(),
        };
        match self.try_enqueue(op) {
            None => Ok(()),
            Some(AsyncOp::Event { record, event }) => {
                persist_event_sync(&self.client, &record, &event).await
            }
            Some(_) => unreachable!("enqueue returns the op it was given"),
        }
    }

    async fn delete_session(
        &self,
        app_name: &str,
        user_id: &str,
        session_id: &str,
    ) -> Result<()> {
        self.guard_closed()?;
        let op = AsyncOp::Delete {
            app_name: app_name.to_string(),
            user_id: user_id.to_string(),
            session_id: session_id.to_string(),
        };
        match self.try_enqueue(op) {
            None => Ok(()),
            Some(AsyncOp::Delete {
                app_name,
                user_id,
                session_id,
            }) => delete_session_sync(&self.client, &app_name, &user_id, &session_id).await,
            Some(_) => unreachable!("enqueue returns the op it was given"),
        }
    }

    /// Close the persister, waiting for queued work to drain
    ///
    /// The wait is unbounded: queued ops were already acknowledged to
    /// their producers. A second close is a no-op.
    async fn close(&self) -> Result<()> {
        {
            let mut closed = self.closed.lock().expect("closed flag poisoned");
            if *closed {
                return Ok(());
            }
            *closed = true;
        }

        // Dropping the sender closes the queue; the worker drains what is
        // left and exits.
        self.sender.lock().expect("sender lock poisoned").take();
        if let Some(handle) = self.worker.lock().await.take() {
            if let Err(e) = handle.await {
                warn!(error = %e, "persister worker terminated abnormally");
            }
        }

        info!("postgres session persister closed");
        Ok(())
    }
}

async fn process_async_op(client: &PostgresClient, op: AsyncOp) {
    let kind = op.kind();
    let result = tokio::time::timeout(ASYNC_OP_TIMEOUT, async {
        match op {
            AsyncOp::Session(record) => persist_session_sync(client, &record).await,
            AsyncOp::Event { record, event } => persist_event_sync(client, &record, &event).await,
            AsyncOp::Delete {
                app_name,
                user_id,
                session_id,
            } => delete_session_sync(client, &app_name, &user_id, &session_id).await,
        }
    })
    .await;

    // Async failures never reach the producer; they are logged and dropped.
    match result {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!(op = kind, error = %e, "async operation failed"),
        Err(_) => error!(op = kind, "async operation timed out"),
    }
}

async fn init_schema(client: &PostgresClient) -> Result<()> {
    let statements = [
        "CREATE TABLE IF NOT EXISTS sessions (
            id VARCHAR(255) NOT NULL,
            app_name VARCHAR(255) NOT NULL,
            user_id VARCHAR(255) NOT NULL,
            state JSONB NOT NULL DEFAULT '{}',
            last_update_time TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            PRIMARY KEY (app_name, user_id, id)
        )"
        .to_string(),
        "CREATE INDEX IF NOT EXISTS idx_sessions_app_user ON sessions(app_name, user_id)"
            .to_string(),
        "CREATE INDEX IF NOT EXISTS idx_sessions_user ON sessions(user_id)".to_string(),
        "CREATE INDEX IF NOT EXISTS idx_sessions_last_update ON sessions(last_update_time)"
            .to_string(),
    ];
    for statement in &statements {
        sqlx::query(statement).execute(client.pool()).await?;
    }

    for shard in 0..client.shard_count() {
        let statements = [
            format!(
                "CREATE TABLE IF NOT EXISTS session_events_{shard} (
                    id VARCHAR(255) NOT NULL,
                    app_name VARCHAR(255) NOT NULL,
                    user_id VARCHAR(255) NOT NULL,
                    session_id VARCHAR(255) NOT NULL,
                    event_order INT NOT NULL,
                    content JSONB NOT NULL,
                    author VARCHAR(255),
                    timestamp TIMESTAMPTZ NOT NULL,
                    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                    PRIMARY KEY (app_name, user_id, session_id, event_order)
                )"
            ),
            format!(
                "CREATE INDEX IF NOT EXISTS idx_events_{shard}_session
                 ON session_events_{shard}(app_name, user_id, session_id)"
            ),
            format!(
                "CREATE INDEX IF NOT EXISTS idx_events_{shard}_timestamp
                 ON session_events_{shard}(timestamp)"
            ),
        ];
        for statement in &statements {
            sqlx::query(statement).execute(client.pool()).await?;
        }
    }

    info!(shards = client.shard_count(), "schema initialized");
    Ok(())
}

async fn persist_session_sync(client: &PostgresClient, record: &SessionRecord) -> Result<()> {
    let state = serde_json::to_value(&record.state)
        .unwrap_or_else(|_| serde_json::Value::Object(serde_json::Map::new()));

    sqlx::query(
        "INSERT INTO sessions (id, app_name, user_id, state, last_update_time, created_at)
         VALUES ($1, $2, $3, $4, $5, NOW())
         ON CONFLICT (app_name, user_id, id) DO UPDATE
         SET state = EXCLUDED.state, last_update_time = EXCLUDED.last_update_time",
    )
    .bind(&record.id)
    .bind(&record.app_name)
    .bind(&record.user_id)
    .bind(&state)
    .bind(record.last_update_time)
    .execute(client.pool())
    .await?;

    debug!(session_id = %record.id, "session persisted");
    Ok(())
}

async fn persist_event_sync(
    client: &PostgresClient,
    record: &SessionRecord,
    event: &Event,
) -> Result<()> {
    let content = serde_json::to_value(event)?;
    let table = client.events_table_name(&record.user_id);

    let mut tx = client.pool().begin().await?;

    // Lock the session row to serialize inserts for this session. Best
    // effort: the row may not exist yet, the order query still runs.
    let _ = sqlx::query(
        "SELECT id FROM sessions WHERE app_name = $1 AND user_id = $2 AND id = $3 FOR UPDATE",
    )
    .bind(&record.app_name)
    .bind(&record.user_id)
    .bind(&record.id)
    .fetch_optional(&mut *tx)
    .await;

    let order_query = format!(
        "SELECT COALESCE(MAX(event_order), -1) + 1 FROM {table}
         WHERE app_name = $1 AND user_id = $2 AND session_id = $3"
    );
    let row = sqlx::query(&order_query)
        .bind(&record.app_name)
        .bind(&record.user_id)
        .bind(&record.id)
        .fetch_one(&mut *tx)
        .await?;
    let next_order: i32 = row.try_get(0)?;

    let insert_query = format!(
        "INSERT INTO {table}
         (id, app_name, user_id, session_id, event_order, content, author, timestamp, created_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, NOW())"
    );
    sqlx::query(&insert_query)
        .bind(&event.id)
        .bind(&record.app_name)
        .bind(&record.user_id)
        .bind(&record.id)
        .bind(next_order)
        .bind(&content)
        .bind(&event.author)
        .bind(event.timestamp)
        .execute(&mut *tx)
        .await?;

    if let Err(e) = sqlx::query(
        "UPDATE sessions SET last_update_time = $1
         WHERE app_name = $2 AND user_id = $3 AND id = $4",
    )
    .bind(event.timestamp)
    .bind(&record.app_name)
    .bind(&record.user_id)
    .bind(&record.id)
    .execute(&mut *tx)
    .await
    {
        // The event row is the payload; a stale session timestamp is not
        // worth failing the insert over.
        warn!(session_id = %record.id, error = %e, "failed to update session last_update_time");
    }

    tx.commit().await?;

    debug!(session_id = %record.id, event_id = %event.id, shard = %table, "event persisted");
    Ok(())
}

async fn delete_session_sync(
    client: &PostgresClient,
    app_name: &str,
    user_id: &str,
    session_id: &str,
) -> Result<()> {
    let table = client.events_table_name(user_id);
    let mut tx = client.pool().begin().await?;

    let events_query =
        format!("DELETE FROM {table} WHERE app_name = $1 AND user_id = $2 AND session_id = $3");
    sqlx::query(&events_query)
        .bind(app_name)
        .bind(user_id)
        .bind(session_id)
        .execute(&mut *tx)
        .await?;

    sqlx::query("DELETE FROM sessions WHERE app_name = $1 AND user_id = $2 AND id = $3")
        .bind(app_name)
        .bind(user_id)
        .bind(session_id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;

    debug!(session_id = %session_id, "session deleted from postgres");
    Ok(())
}
