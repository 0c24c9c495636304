//! Metis LLM - Provider Adapters and Embeddings
//!
//! This crate provides the LLM-facing infrastructure of the metis runtime:
//! - Llm: the provider-neutral generation contract with lazy response
//!   streams
//! - OpenAI: chat-completions adapter (OpenAI, Ollama `/v1`, vLLM, ...)
//! - Anthropic: messages adapter with tool-use history repair
//! - Embeddings: OpenAI-compatible `/embeddings` client with dimension
//!   auto-detection

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod embeddings;
pub mod error;
pub mod model;
pub mod providers;
pub mod util;

mod sse;

pub use embeddings::{EmbeddingConfig, EmbeddingModel, OpenAiCompatibleEmbedding};
pub use error::{Error, Result};
pub use model::{Llm, LlmResponseStream};
pub use providers::anthropic::{AnthropicConfig, AnthropicModel};
pub use providers::openai::{OpenAiConfig, OpenAiModel};
