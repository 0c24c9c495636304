use std::collections::HashSet;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use sha2::{Digest, Sha256};

use metis_core::{Content, FinishReason, LlmResponse, Part, Role, ToolDeclaration, Usage};

use super::types::{
    BlockDelta, ContentBlock, ImageSource, InputSchema, MessageParam, MessageWire, ResponseBlock,
    StreamEvent, ToolParam,
};
use crate::error::Result;

/// Supported inline-image MIME types; anything else is dropped
const SUPPORTED_IMAGE_TYPES: &[&str] = &[
    "image/jpg",
    "image/jpeg",
    "image/png",
    "image/gif",
    "image/webp",
];

/// Map a neutral role to the wire role; anything unexpected becomes user
pub(crate) fn convert_role(role: Role) -> &'static str {
    match role {
        Role::Model => "assistant",
        Role::User | Role::System => "user",
    }
}

/// Map a wire stop reason to the neutral enum
pub(crate) fn convert_stop_reason(reason: Option<&str>) -> FinishReason {
    match reason {
        Some("end_turn" | "stop_sequence" | "tool_use") => FinishReason::Stop,
        Some("max_tokens") => FinishReason::MaxTokens,
        _ => FinishReason::Unspecified,
    }
}

/// Rewrite ids outside `[A-Za-z0-9_-]+` to a hash-derived valid id
///
/// The provider echoes the sanitized id back, so no reverse map is kept.
pub(crate) fn sanitize_tool_id(id: &str) -> String {
    if !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return id.to_string();
    }

    let digest = hex::encode(Sha256::digest(id.as_bytes()));
    format!("toolu_{}", &digest[..32])
}

/// Encode tool-call args for the wire; empty args become `{}`
pub(crate) fn tool_input_to_value(args: &serde_json::Map<String, serde_json::Value>) -> serde_json::Value {
    serde_json::Value::Object(args.clone())
}

/// Decode a tool-use input into an args map; anything non-object is `{}`
pub(crate) fn tool_input_to_map(
    input: &serde_json::Value,
) -> serde_json::Map<String, serde_json::Value> {
    match input {
        serde_json::Value::Object(map) => map.clone(),
        _ => serde_json::Map::new(),
    }
}

/// Convert one content into a wire message; contents with no usable
/// blocks produce `None` and are skipped
pub(crate) fn convert_content_to_message(content: &Content) -> Result<Option<MessageParam>> {
    let mut blocks = Vec::new();

    for part in &content.parts {
        match part {
            Part::Text { text } if !text.is_empty() => {
                blocks.push(ContentBlock::Text { text: text.clone() });
            }
            Part::InlineData { mime_type, data } => {
                if SUPPORTED_IMAGE_TYPES.contains(&mime_type.as_str()) {
                    blocks.push(ContentBlock::Image {
                        source: ImageSource {
                            r#type: "base64",
                            media_type: mime_type.clone(),
                            data: BASE64.encode(data),
                        },
                    });
                }
            }
            Part::FunctionCall { id, name, args } => {
                blocks.push(ContentBlock::ToolUse {
                    id: sanitize_tool_id(id),
                    name: name.clone(),
                    input: tool_input_to_value(args),
                });
            }
            Part::FunctionResponse { id, response } => {
                let response_json = serde_json::to_string(response)?;
                blocks.push(ContentBlock::ToolResult {
                    tool_use_id: sanitize_tool_id(id),
                    content: response_json,
                    is_error: None,
                });
            }
            _ => {}
        }
    }

    if blocks.is_empty() {
        return Ok(None);
    }

    Ok(Some(MessageParam {
        role: convert_role(content.role),
        content: blocks,
    }))
}

/// Convert tool declarations to the wire tool list
///
/// `input_schema.type` must be `"object"`; `properties` and `required`
/// are copied from the declaration's schema map when present.
pub(crate) fn convert_tools(tools: &[ToolDeclaration]) -> Vec<ToolParam> {
    tools
        .iter()
        .map(|tool| {
            let params = tool
                .parameters_json_schema
                .as_ref()
                .or(tool.parameters.as_ref())
                .and_then(|p| p.as_object());

            ToolParam {
                name: tool.name.clone(),
                description: tool.description.clone(),
                input_schema: InputSchema {
                    r#type: "object",
                    properties: params.and_then(|m| m.get("properties").cloned()),
                    required: params.and_then(|m| m.get("required").cloned()),
                },
            }
        })
        .collect()
}

/// Convert a complete wire message into the neutral response
pub(crate) fn convert_response(message: &MessageWire) -> LlmResponse {
    let mut parts = Vec::new();
    for block in &message.content {
        match block {
            ResponseBlock::Text { text } => parts.push(Part::text(text.clone())),
            ResponseBlock::ToolUse { id, name, input } => {
                parts.push(Part::function_call(
                    id.clone(),
                    name.clone(),
                    tool_input_to_map(input),
                ));
            }
            ResponseBlock::Unknown => {}
        }
    }

    let usage = (message.usage.input_tokens > 0 || message.usage.output_tokens > 0).then(|| Usage {
        prompt_tokens: message.usage.input_tokens as i32,
        completion_tokens: message.usage.output_tokens as i32,
        total_tokens: (message.usage.input_tokens + message.usage.output_tokens) as i32,
    });

    LlmResponse {
        content: Some(Content::new(Role::Model, parts)),
        usage,
        finish_reason: convert_stop_reason(message.stop_reason.as_deref()),
        partial: false,
        turn_complete: true,
    }
}

// ── History repair ──────────────────────────────────────────────────

/// Remove orphaned `tool_use` blocks from a message list
///
/// The provider requires every assistant `tool_use` block to be answered
/// by a `tool_result` in the immediately following user message. Blocks
/// without a match are stripped; assistant messages left with no blocks
/// are dropped. Text and image blocks are never touched.
pub(crate) fn repair_message_history(messages: Vec<MessageParam>) -> Vec<MessageParam> {
    let mut result = Vec::with_capacity(messages.len());

    for (i, msg) in messages.iter().enumerate() {
        let has_tool_use = msg.role == "assistant"
            && msg
                .content
                .iter()
                .any(|block| matches!(block, ContentBlock::ToolUse { .. }));

        if !has_tool_use {
            result.push(msg.clone());
            continue;
        }

        let next_user = messages.get(i + 1).filter(|next| next.role == "user");
        let allowed = next_user.map(extract_tool_result_ids);
        let filtered = filter_tool_use(msg, allowed.as_ref());
        if !filtered.content.is_empty() {
            result.push(filtered);
        }
    }

    result
}

/// All `tool_result` ids in a message
fn extract_tool_result_ids(msg: &MessageParam) -> HashSet<String> {
    msg.content
        .iter()
        .filter_map(|block| match block {
            ContentBlock::ToolResult { tool_use_id, .. } => Some(tool_use_id.clone()),
            _ => None,
        })
        .collect()
}

/// Keep `tool_use` blocks whose ids are allowed; `None` removes them all
fn filter_tool_use(msg: &MessageParam, allowed: Option<&HashSet<String>>) -> MessageParam {
    let content = msg
        .content
        .iter()
        .filter(|block| match block {
            ContentBlock::ToolUse { id, .. } => allowed.is_some_and(|ids| ids.contains(id)),
            _ => true,
        })
        .cloned()
        .collect();

    MessageParam {
        role: msg.role,
        content,
    }
}

// ── Streaming accumulation ──────────────────────────────────────────

/// Accumulates stream events into a complete [`MessageWire`]
#[derive(Default)]
pub(crate) struct MessageAccumulator {
    pub(crate) message: MessageWire,
    /// Per-block partial tool-input JSON, by block index
    block_inputs: Vec<String>,
}

impl MessageAccumulator {
    /// Fold in one event; returns the text delta when it is non-empty
    pub(crate) fn apply(&mut self, event: StreamEvent) -> Option<String> {
        match event {
            StreamEvent::MessageStart { message } => {
                self.message = message;
                None
            }
            StreamEvent::ContentBlockStart {
                index,
                content_block,
            } => {
                self.ensure_block(index);
                self.message.content[index] = content_block;
                None
            }
            StreamEvent::ContentBlockDelta { index, delta } => {
                self.ensure_block(index);
                match delta {
                    BlockDelta::TextDelta { text } if !text.is_empty() => {
                        if let ResponseBlock::Text { text: existing } = &mut self.message.content[index]
                        {
                            existing.push_str(&text);
                        }
                        Some(text)
                    }
                    BlockDelta::InputJsonDelta { partial_json } => {
                        self.block_inputs[index].push_str(&partial_json);
                        None
                    }
                    _ => None,
                }
            }
            StreamEvent::ContentBlockStop { index } => {
                self.ensure_block(index);
                let buffered = &self.block_inputs[index];
                if !buffered.is_empty() {
                    if let ResponseBlock::ToolUse { input, .. } = &mut self.message.content[index] {
                        *input = serde_json::from_str(buffered)
                            .unwrap_or(serde_json::Value::Object(serde_json::Map::new()));
                    }
                }
                None
            }
            StreamEvent::MessageDelta { delta, usage } => {
                if delta.stop_reason.is_some() {
                    self.message.stop_reason = delta.stop_reason;
                }
                if let Some(usage) = usage {
                    self.message.usage.output_tokens = usage.output_tokens;
                }
                None
            }
            StreamEvent::MessageStop
            | StreamEvent::Ping
            | StreamEvent::Error { .. }
            | StreamEvent::Unknown => None,
        }
    }

    fn ensure_block(&mut self, index: usize) {
        while self.message.content.len() <= index {
            self.message.content.push(ResponseBlock::Text {
                text: String::new(),
            });
        }
        while self.block_inputs.len() <= index {
            self.block_inputs.push(String::new());
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
