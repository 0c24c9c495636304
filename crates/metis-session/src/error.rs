//! Error types for metis-session

use thiserror::Error;

/// Session store error type
#[derive(Debug, Error)]
pub enum Error {
    /// The requested session does not exist in the cache
    #[error("session not found: {0}")]
    SessionNotFound(String),

    /// Cache backend error
    #[error("cache error: {0}")]
    Cache(#[from] redis::RedisError),

    /// Durable store error
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Serialization / deserialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Operation on a closed persister
    #[error("persister is closed")]
    Closed,

    /// General internal error
    #[error("{0}")]
    Internal(String),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
