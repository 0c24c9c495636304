//! Generation response types

use crate::content::Content;

/// Why generation stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FinishReason {
    /// Natural stop, stop sequence, or tool call
    Stop,
    /// Token limit reached
    MaxTokens,
    /// Content filtered by the provider
    Safety,
    /// No reason reported
    #[default]
    Unspecified,
}

/// Token usage reported by the provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Usage {
    /// Tokens in the prompt
    pub prompt_tokens: i32,
    /// Tokens generated
    pub completion_tokens: i32,
    /// Prompt plus completion
    pub total_tokens: i32,
}

/// One yield from an adapter
///
/// Streaming calls produce zero or more partial responses
/// (`partial = true`) followed by exactly one final response
/// (`turn_complete = true`) carrying the aggregated content, tool calls,
/// finish reason, and usage.
#[derive(Debug, Clone, Default)]
pub struct LlmResponse {
    /// Generated content
    pub content: Option<Content>,
    /// Token usage, when the provider reported any
    pub usage: Option<Usage>,
    /// Finish reason
    pub finish_reason: FinishReason,
    /// True for incremental streaming chunks
    pub partial: bool,
    /// True on the last response of a turn
    pub turn_complete: bool,
}
