//! Generation request types

use crate::content::Content;

/// Input to an LLM adapter: conversation contents plus optional config
#[derive(Debug, Clone, Default)]
pub struct LlmRequest {
    /// Ordered conversation messages
    pub contents: Vec<Content>,
    /// Optional generation settings
    pub config: Option<GenerateConfig>,
}

impl LlmRequest {
    /// Create a request from contents only
    #[must_use]
    pub fn new(contents: Vec<Content>) -> Self {
        Self {
            contents,
            config: None,
        }
    }

    /// Attach a generation config
    #[must_use]
    pub fn with_config(mut self, config: GenerateConfig) -> Self {
        self.config = Some(config);
        self
    }
}

/// Optional generation settings applied onto the provider request
#[derive(Debug, Clone, Default)]
pub struct GenerateConfig {
    /// Sampling temperature
    pub temperature: Option<f32>,
    /// Nucleus sampling
    pub top_p: Option<f32>,
    /// Maximum tokens to generate
    pub max_output_tokens: Option<u32>,
    /// Stop sequences (one-string vs array wire form chosen by count)
    pub stop_sequences: Vec<String>,
    /// Reasoning-effort level for reasoning models
    pub thinking_level: Option<ThinkingLevel>,
    /// Response MIME type; `application/json` enables JSON mode
    pub response_mime_type: Option<String>,
    /// Structured-output schema (strict mode)
    pub response_schema: Option<ResponseSchema>,
    /// Functions the model may call
    pub tools: Vec<ToolDeclaration>,
    /// System instruction, flattened and sent first
    pub system_instruction: Option<Content>,
}

/// Reasoning-effort level
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThinkingLevel {
    /// Minimal reasoning
    Low,
    /// Balanced reasoning
    Medium,
    /// Maximum reasoning
    High,
}

/// Schema for structured output
#[derive(Debug, Clone, Default)]
pub struct ResponseSchema {
    /// Human-readable description
    pub description: String,
    /// JSON-schema body
    pub schema: serde_json::Value,
}

/// A function the model may call
#[derive(Debug, Clone)]
pub struct ToolDeclaration {
    /// Function name
    pub name: String,
    /// Function description
    pub description: String,
    /// Loosely-typed parameters object (fallback)
    pub parameters: Option<serde_json::Value>,
    /// JSON-schema parameters (preferred when present)
    pub parameters_json_schema: Option<serde_json::Value>,
}

impl ToolDeclaration {
    /// Create a declaration with a JSON-schema parameters object
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters_json_schema: serde_json::Value,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters: None,
            parameters_json_schema: Some(parameters_json_schema),
        }
    }
}
