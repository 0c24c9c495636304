//! Error types for metis-memory

use thiserror::Error;

/// Memory store error type
#[derive(Debug, Error)]
pub enum Error {
    /// Database error
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Serialization / deserialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Embedding generation failed
    #[error("embedding error: {0}")]
    Embedding(String),

    /// General internal error
    #[error("{0}")]
    Internal(String),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
