//! Metis Session - Hybrid Session Store
//!
//! This crate provides the session infrastructure of the metis runtime:
//! - RedisSessionService: TTL-cached session store, authoritative for
//!   reads
//! - SessionPersister: the write-behind replication contract
//! - PostgresSessionPersister: durable sink with a bounded async queue,
//!   sharded event tables, and gap-free per-session event ordering

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod events;
pub mod persister;
pub mod postgres;
pub mod service;
pub mod session;
pub mod state;

pub use error::{Error, Result};
pub use events::EventsView;
pub use persister::SessionPersister;
pub use postgres::{PostgresClient, PostgresConfig, PostgresSessionPersister};
pub use service::{
    CreateSessionRequest, DeleteSessionRequest, GetSessionRequest, ListSessionsRequest,
    RedisSessionService, DEFAULT_SESSION_TTL,
};
pub use session::{Session, SessionRecord};
pub use state::SessionState;
