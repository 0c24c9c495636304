//! Provider adapters

/// Anthropic-style messages adapter
pub mod anthropic;
/// OpenAI-style chat-completions adapter
pub mod openai;
