use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::util::mask_api_key;

/// Default API base URL
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Maximum tool-call id length accepted by the API, in bytes
pub(crate) const MAX_TOOL_CALL_ID_LENGTH: usize = 40;

/// OpenAI adapter configuration
///
/// Works with OpenAI and compatible providers (Ollama `/v1`, vLLM,
/// LocalAI, gateways).
#[derive(Clone)]
pub struct OpenAiConfig {
    /// Model name, e.g. `gpt-4o`, `qwen3:8b`
    pub model_name: String,
    /// API key; falls back to `OPENAI_API_KEY` when absent
    pub api_key: Option<String>,
    /// API base; falls back to `OPENAI_API_BASE`, then the provider default
    pub base_url: Option<String>,
    /// Request timeout
    pub timeout: Duration,
}

impl fmt::Debug for OpenAiConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenAiConfig")
            .field("model_name", &self.model_name)
            .field("api_key", &self.api_key.as_deref().map(mask_api_key))
            .field("base_url", &self.base_url)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl OpenAiConfig {
    /// Create a configuration for the given model
    #[must_use]
    pub fn new(model_name: impl Into<String>) -> Self {
        Self {
            model_name: model_name.into(),
            api_key: None,
            base_url: None,
            timeout: Duration::from_secs(60),
        }
    }

    /// Set the API key
    #[must_use]
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    /// Set the base URL
    #[must_use]
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Set the request timeout
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Resolve the API key: explicit value, then `OPENAI_API_KEY`
    pub(crate) fn resolved_api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
    }

    /// Resolve the base URL: explicit value, then `OPENAI_API_BASE`,
    /// then the provider default; a trailing slash is trimmed.
    pub(crate) fn resolved_base_url(&self) -> String {
        self.base_url
            .clone()
            .or_else(|| std::env::var("OPENAI_API_BASE").ok())
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
            .trim_end_matches('/')
            .to_string()
    }
}

// ── Request wire types ──────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub(crate) struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop: Option<StopSequences>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning_effort: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_format: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ToolParam>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream_options: Option<StreamOptions>,
}

/// Stop sequences: one string or an array, chosen by count
#[derive(Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub(crate) enum StopSequences {
    One(String),
    Many(Vec<String>),
}

#[derive(Debug, Serialize)]
pub(crate) struct StreamOptions {
    pub include_usage: bool,
}

#[derive(Debug, Serialize)]
pub(crate) struct ToolParam {
    pub r#type: &'static str,
    pub function: FunctionDef,
}

#[derive(Debug, Serialize)]
pub(crate) struct FunctionDef {
    pub name: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parameters: Option<serde_json::Value>,
}

#[derive(Debug, Serialize)]
pub(crate) struct ChatMessage {
    pub role: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<MessageContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCallParam>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    pub(crate) fn text(role: &'static str, text: String) -> Self {
        Self {
            role,
            content: Some(MessageContent::Text(text)),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    /// A tool-role message carrying a function result
    pub(crate) fn tool(tool_call_id: String, content: String) -> Self {
        Self {
            role: "tool",
            content: Some(MessageContent::Text(content)),
            tool_calls: None,
            tool_call_id: Some(tool_call_id),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub(crate) enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(crate) enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Serialize)]
pub(crate) struct ImageUrl {
    pub url: String,
    pub detail: &'static str,
}

#[derive(Debug, Serialize)]
pub(crate) struct ToolCallParam {
    pub id: String,
    pub r#type: &'static str,
    pub function: FunctionCallParam,
}

#[derive(Debug, Serialize)]
pub(crate) struct FunctionCallParam {
    pub name: String,
    pub arguments: String,
}

// ── Response wire types ─────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub(crate) struct ChatCompletion {
    #[serde(default)]
    pub choices: Vec<Choice>,
    #[serde(default)]
    pub usage: Option<UsageWire>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct Choice {
    pub message: AssistantMessage,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct AssistantMessage {
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub tool_calls: Vec<ToolCallWire>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ToolCallWire {
    #[serde(default)]
    pub id: String,
    pub function: FunctionCallWire,
}

#[derive(Debug, Deserialize)]
pub(crate) struct FunctionCallWire {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub arguments: String,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub(crate) struct UsageWire {
    #[serde(default)]
    pub prompt_tokens: i64,
    #[serde(default)]
    pub completion_tokens: i64,
    #[serde(default)]
    pub total_tokens: i64,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ApiErrorBody {
    pub error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ApiErrorDetail {
    #[serde(default)]
    pub r#type: String,
    #[serde(default)]
    pub message: String,
}

// ── Streaming wire types ────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub(crate) struct ChatCompletionChunk {
    #[serde(default)]
    pub choices: Vec<ChunkChoice>,
    #[serde(default)]
    pub usage: Option<UsageWire>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ChunkChoice {
    #[serde(default)]
    pub delta: Delta,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct Delta {
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub tool_calls: Vec<DeltaToolCall>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct DeltaToolCall {
    #[serde(default)]
    pub index: usize,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub function: DeltaFunction,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct DeltaFunction {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub arguments: Option<String>,
}
