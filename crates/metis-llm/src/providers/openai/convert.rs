use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;

use metis_core::{
    Content, FinishReason, LlmResponse, Part, Role, ThinkingLevel, ToolDeclaration, Usage,
};

use super::types::{
    ChatCompletion, ChatCompletionChunk, ChatMessage, ContentPart, FunctionDef, ImageUrl,
    MessageContent, StopSequences, ToolCallParam, ToolParam, UsageWire,
};
use crate::error::{Error, Result};

/// Map a neutral role to the wire role
pub(crate) fn convert_role(role: Role) -> &'static str {
    match role {
        Role::Model => "assistant",
        Role::User => "user",
        Role::System => "system",
    }
}

/// Map a wire finish reason to the neutral enum
pub(crate) fn convert_finish_reason(reason: Option<&str>) -> FinishReason {
    match reason {
        Some("stop" | "tool_calls" | "function_call") => FinishReason::Stop,
        Some("length") => FinishReason::MaxTokens,
        Some("content_filter") => FinishReason::Safety,
        _ => FinishReason::Unspecified,
    }
}

/// Map a thinking level to the wire reasoning effort
pub(crate) fn convert_thinking_level(level: ThinkingLevel) -> &'static str {
    match level {
        ThinkingLevel::Low => "low",
        ThinkingLevel::High => "high",
        ThinkingLevel::Medium => "medium",
    }
}

/// Usage is attached only when the provider counted anything
pub(crate) fn convert_usage(usage: UsageWire) -> Option<Usage> {
    if usage.total_tokens == 0 {
        return None;
    }
    Some(Usage {
        prompt_tokens: usage.prompt_tokens as i32,
        completion_tokens: usage.completion_tokens as i32,
        total_tokens: usage.total_tokens as i32,
    })
}

/// Stop sequences: absent / one string / array, chosen by count
pub(crate) fn convert_stop_sequences(sequences: &[String]) -> Option<StopSequences> {
    match sequences {
        [] => None,
        [single] => Some(StopSequences::One(single.clone())),
        many => Some(StopSequences::Many(many.to_vec())),
    }
}

/// Parse tool-call arguments; empty or malformed JSON yields an empty map
pub(crate) fn parse_json_args(args_json: &str) -> serde_json::Map<String, serde_json::Value> {
    if args_json.is_empty() {
        return serde_json::Map::new();
    }
    serde_json::from_str(args_json).unwrap_or_default()
}

/// Recursively ensure every object schema node carries a `properties` map
///
/// The upstream validator rejects `{"type": "object"}` without one.
pub(crate) fn ensure_object_properties(schema: &mut serde_json::Value) {
    let Some(map) = schema.as_object_mut() else {
        return;
    };

    if map.get("type").and_then(|t| t.as_str()) == Some("object")
        && !map.contains_key("properties")
    {
        map.insert(
            "properties".to_string(),
            serde_json::Value::Object(serde_json::Map::new()),
        );
    }

    if let Some(props) = map.get_mut("properties").and_then(|p| p.as_object_mut()) {
        for prop in props.values_mut() {
            ensure_object_properties(prop);
        }
    }

    if let Some(items) = map.get_mut("items") {
        ensure_object_properties(items);
    }
}

/// Normalize a tool's parameters for the wire
///
/// The JSON-schema form is preferred; the loose form is the fallback.
/// Non-object parameter values cannot be normalized and are dropped.
pub(crate) fn convert_function_params(tool: &ToolDeclaration) -> Option<serde_json::Value> {
    let params = tool
        .parameters_json_schema
        .as_ref()
        .or(tool.parameters.as_ref())?;
    if !params.is_object() {
        return None;
    }
    let mut params = params.clone();
    ensure_object_properties(&mut params);
    Some(params)
}

/// Convert tool declarations to the wire tool list
pub(crate) fn convert_tools(tools: &[ToolDeclaration]) -> Vec<ToolParam> {
    tools
        .iter()
        .map(|tool| ToolParam {
            r#type: "function",
            function: FunctionDef {
                name: tool.name.clone(),
                description: tool.description.clone(),
                parameters: convert_function_params(tool),
            },
        })
        .collect()
}

/// Supported inline-image MIME types; anything else is dropped
const SUPPORTED_IMAGE_TYPES: &[&str] = &[
    "image/jpg",
    "image/jpeg",
    "image/png",
    "image/gif",
    "image/webp",
];

/// Convert inline image data to a data-URL content part
pub(crate) fn convert_inline_data(mime_type: &str, data: &[u8]) -> Option<ContentPart> {
    if !SUPPORTED_IMAGE_TYPES.contains(&mime_type) {
        return None;
    }
    Some(ContentPart::ImageUrl {
        image_url: ImageUrl {
            url: format!("data:{};base64,{}", mime_type, BASE64.encode(data)),
            detail: "auto",
        },
    })
}

pub(crate) fn join_texts(texts: &[String]) -> String {
    texts.join("\n")
}

/// Build a user message; images force the multi-part form
pub(crate) fn build_user_message(texts: &[String], images: Vec<ContentPart>) -> ChatMessage {
    if images.is_empty() {
        return ChatMessage::text("user", join_texts(texts));
    }

    let mut parts: Vec<ContentPart> = texts
        .iter()
        .map(|text| ContentPart::Text { text: text.clone() })
        .collect();
    parts.extend(images);

    ChatMessage {
        role: "user",
        content: Some(MessageContent::Parts(parts)),
        tool_calls: None,
        tool_call_id: None,
    }
}

/// Build an assistant message with optional text and tool calls
pub(crate) fn build_assistant_message(
    texts: &[String],
    tool_calls: Vec<ToolCallParam>,
) -> ChatMessage {
    ChatMessage {
        role: "assistant",
        content: (!texts.is_empty()).then(|| MessageContent::Text(join_texts(texts))),
        tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
        tool_call_id: None,
    }
}

/// Convert a complete API response into the neutral response
pub(crate) fn convert_response(resp: ChatCompletion) -> Result<LlmResponse> {
    let Some(choice) = resp.choices.into_iter().next() else {
        return Err(Error::NoChoices);
    };

    let mut parts = Vec::new();
    if let Some(text) = choice.message.content {
        if !text.is_empty() {
            parts.push(Part::text(text));
        }
    }
    for tc in choice.message.tool_calls {
        parts.push(Part::function_call(
            tc.id,
            tc.function.name,
            parse_json_args(&tc.function.arguments),
        ));
    }

    Ok(LlmResponse {
        content: Some(Content::new(Role::Model, parts)),
        usage: resp.usage.and_then(convert_usage),
        finish_reason: convert_finish_reason(choice.finish_reason.as_deref()),
        partial: false,
        turn_complete: true,
    })
}

/// Accumulates streaming chunks into the final response
#[derive(Default)]
pub(crate) struct ChunkAccumulator {
    content: String,
    tool_calls: Vec<AccumulatedToolCall>,
    finish_reason: Option<String>,
    usage: Option<UsageWire>,
}

#[derive(Default)]
struct AccumulatedToolCall {
    id: String,
    name: String,
    arguments: String,
}

impl ChunkAccumulator {
    /// Fold in one chunk; returns the text delta when it is non-empty
    pub(crate) fn add_chunk(&mut self, chunk: ChatCompletionChunk) -> Option<String> {
        if let Some(usage) = chunk.usage {
            self.usage = Some(usage);
        }

        let choice = chunk.choices.into_iter().next()?;
        if let Some(reason) = choice.finish_reason {
            self.finish_reason = Some(reason);
        }

        for tc in choice.delta.tool_calls {
            if self.tool_calls.len() <= tc.index {
                self.tool_calls
                    .resize_with(tc.index + 1, AccumulatedToolCall::default);
            }
            let slot = &mut self.tool_calls[tc.index];
            if let Some(id) = tc.id {
                slot.id = id;
            }
            if let Some(name) = tc.function.name {
                slot.name = name;
            }
            if let Some(arguments) = tc.function.arguments {
                slot.arguments.push_str(&arguments);
            }
        }

        match choice.delta.content {
            Some(text) if !text.is_empty() => {
                self.content.push_str(&text);
                Some(text)
            }
            _ => None,
        }
    }

    /// Build the final aggregated response
    pub(crate) fn build_final(&self) -> LlmResponse {
        let mut parts = Vec::new();
        if !self.content.is_empty() {
            parts.push(Part::text(self.content.clone()));
        }
        for tc in &self.tool_calls {
            parts.push(Part::function_call(
                tc.id.clone(),
                tc.name.clone(),
                parse_json_args(&tc.arguments),
            ));
        }

        LlmResponse {
            content: Some(Content::new(Role::Model, parts)),
            usage: self.usage.and_then(convert_usage),
            finish_reason: convert_finish_reason(self.finish_reason.as_deref()),
            partial: false,
            turn_complete: true,
        }
    }
}

/// A partial streaming response carrying one text fragment
pub(crate) fn partial_text_response(text: String) -> LlmResponse {
    LlmResponse {
        content: Some(Content::new(Role::Model, vec![Part::text(text)])),
        usage: None,
        finish_reason: FinishReason::Unspecified,
        partial: true,
        turn_complete: false,
    }
}
