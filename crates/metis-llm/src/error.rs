//! Error types for metis-llm

use thiserror::Error;

/// LLM error type
#[derive(Debug, Error)]
pub enum Error {
    /// Provider not configured
    #[error("provider not configured: {0}")]
    NotConfigured(String),

    /// API error reported by the provider
    #[error("api error: {0}")]
    Api(String),

    /// Network error
    #[error("network error: {0}")]
    Network(String),

    /// Response could not be interpreted
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// The provider returned no choices
    #[error("no choices in response")]
    NoChoices,

    /// The provider returned no content
    #[error("no content in response")]
    NoContent,

    /// The embeddings endpoint returned an empty data array
    #[error("no embedding returned")]
    NoEmbedding,

    /// Serialization / deserialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
