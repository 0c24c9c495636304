//! OpenAI-style chat-completions adapter
//!
//! Works with OpenAI and compatible providers (Ollama `/v1`, vLLM,
//! LocalAI, gateways). Implements the [`Llm`] contract with reqwest and
//! hand-rolled wire types.

/// Message and schema conversion
mod convert;
/// Wire types and configuration
mod types;

#[cfg(test)]
mod tests;

pub use types::{OpenAiConfig, DEFAULT_BASE_URL};

use std::collections::HashMap;
use std::sync::RwLock;

use futures_util::{future, stream, StreamExt};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use metis_core::{Content, LlmRequest, Part};

use crate::error::{Error, Result};
use crate::model::{Llm, LlmResponseStream};
use crate::sse::{sse_response_stream, SseEvent, SseSignal};

use convert::{
    build_assistant_message, build_user_message, convert_inline_data, convert_response,
    convert_role, convert_stop_sequences, convert_thinking_level, convert_tools,
    ensure_object_properties, join_texts, partial_text_response, ChunkAccumulator,
};
use types::{
    ApiErrorBody, ChatCompletion, ChatCompletionChunk, ChatCompletionRequest, ChatMessage,
    ContentPart, FunctionCallParam, StreamOptions, ToolCallParam, MAX_TOOL_CALL_ID_LENGTH,
};

/// OpenAI-style LLM adapter
pub struct OpenAiModel {
    client: reqwest::Client,
    model_name: String,
    api_key: Option<String>,
    base_url: String,

    /// short id -> original id, for tool-call ids that had to be hashed
    tool_call_ids: RwLock<HashMap<String, String>>,
}

impl OpenAiModel {
    /// Create an adapter from the given configuration
    pub fn new(config: OpenAiConfig) -> Result<Self> {
        if config.model_name.is_empty() {
            return Err(Error::NotConfigured("model name is required".to_string()));
        }
        let base_url = config.resolved_base_url();
        let api_key = config.resolved_api_key();
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| Error::Network(e.to_string()))?;

        info!(model = %config.model_name, base_url = %base_url, "openai model created");

        Ok(Self {
            client,
            model_name: config.model_name,
            api_key,
            base_url,
            tool_call_ids: RwLock::new(HashMap::new()),
        })
    }

    /// Shorten ids exceeding the provider's 40-byte limit using a hash
    ///
    /// The short -> original mapping is recorded for reverse lookup.
    fn normalize_tool_call_id(&self, id: &str) -> String {
        if id.len() <= MAX_TOOL_CALL_ID_LENGTH {
            return id.to_string();
        }

        let digest = hex::encode(Sha256::digest(id.as_bytes()));
        let short_id = format!("tc_{}", &digest[..MAX_TOOL_CALL_ID_LENGTH - 3]);

        self.tool_call_ids
            .write()
            .expect("tool call id lock poisoned")
            .insert(short_id.clone(), id.to_string());

        debug!(original = %id, short = %short_id, "normalized tool call id");
        short_id
    }

    /// Restore the original id from a shortened one
    ///
    /// Returns the input unchanged when no mapping exists.
    #[must_use]
    pub fn denormalize_tool_call_id(&self, short_id: &str) -> String {
        self.tool_call_ids
            .read()
            .expect("tool call id lock poisoned")
            .get(short_id)
            .cloned()
            .unwrap_or_else(|| short_id.to_string())
    }

    /// Convert one content into wire messages
    ///
    /// Function responses become separate tool-role messages; text, images,
    /// and tool calls fold into a single role message.
    fn convert_content_to_messages(&self, content: &Content) -> Result<Vec<ChatMessage>> {
        let mut messages = Vec::new();
        let mut texts: Vec<String> = Vec::new();
        let mut tool_calls: Vec<ToolCallParam> = Vec::new();
        let mut images: Vec<ContentPart> = Vec::new();

        for part in &content.parts {
            match part {
                Part::FunctionResponse { id, response } => {
                    let response_json = serde_json::to_string(response)?;
                    let normalized = self.normalize_tool_call_id(id);
                    messages.push(ChatMessage::tool(normalized, response_json));
                }
                Part::FunctionCall { id, name, args } => {
                    let args_json =
                        serde_json::to_string(&serde_json::Value::Object(args.clone()))?;
                    let normalized = self.normalize_tool_call_id(id);
                    tool_calls.push(ToolCallParam {
                        id: normalized,
                        r#type: "function",
                        function: FunctionCallParam {
                            name: name.clone(),
                            arguments: args_json,
                        },
                    });
                }
                Part::Text { text } if !text.is_empty() => texts.push(text.clone()),
                Part::InlineData { mime_type, data } => {
                    if let Some(image) = convert_inline_data(mime_type, data) {
                        images.push(image);
                    }
                }
                _ => {}
            }
        }

        if !texts.is_empty() || !images.is_empty() || !tool_calls.is_empty() {
            match convert_role(content.role) {
                "user" => messages.push(build_user_message(&texts, images)),
                "assistant" => messages.push(build_assistant_message(&texts, tool_calls)),
                "system" => messages.push(ChatMessage::text("system", join_texts(&texts))),
                _ => {}
            }
        }

        Ok(messages)
    }

    /// Translate the neutral request into wire parameters
    fn build_request(&self, request: &LlmRequest, stream: bool) -> Result<ChatCompletionRequest> {
        let mut messages = Vec::new();

        if let Some(system) = request
            .config
            .as_ref()
            .and_then(|cfg| cfg.system_instruction.as_ref())
        {
            let text = system.flattened_text();
            if !text.is_empty() {
                debug!(length = text.len(), "added system instruction");
                messages.push(ChatMessage::text("system", text));
            }
        }

        for content in &request.contents {
            messages.extend(self.convert_content_to_messages(content)?);
        }
        debug!(count = messages.len(), "messages built");

        let mut params = ChatCompletionRequest {
            model: self.model_name.clone(),
            messages,
            temperature: None,
            top_p: None,
            max_tokens: None,
            stop: None,
            reasoning_effort: None,
            response_format: None,
            tools: None,
            stream: stream.then_some(true),
            stream_options: stream.then_some(StreamOptions {
                include_usage: true,
            }),
        };

        if let Some(cfg) = &request.config {
            params.temperature = cfg.temperature;
            params.top_p = cfg.top_p;
            params.max_tokens = cfg.max_output_tokens.filter(|&n| n > 0);
            params.stop = convert_stop_sequences(&cfg.stop_sequences);
            params.reasoning_effort = cfg.thinking_level.map(convert_thinking_level);

            if cfg.response_mime_type.as_deref() == Some("application/json") {
                params.response_format = Some(serde_json::json!({"type": "json_object"}));
            }
            if let Some(schema) = &cfg.response_schema {
                let mut body = schema.schema.clone();
                ensure_object_properties(&mut body);
                params.response_format = Some(serde_json::json!({
                    "type": "json_schema",
                    "json_schema": {
                        "name": "response",
                        "description": schema.description,
                        "schema": body,
                        "strict": true,
                    },
                }));
            }
            if !cfg.tools.is_empty() {
                params.tools = Some(convert_tools(&cfg.tools));
            }
        }

        Ok(params)
    }

    fn generate(&self, request: &LlmRequest) -> LlmResponseStream {
        let params = match self.build_request(request, false) {
            Ok(params) => params,
            Err(e) => return error_stream(e),
        };

        let client = self.client.clone();
        let url = format!("{}/chat/completions", self.base_url);
        let api_key = self.api_key.clone();

        Box::pin(stream::once(async move {
            let resp = send_request(&client, &url, api_key.as_deref(), &params).await?;
            let llm_resp = convert_response(resp)?;
            if let Some(usage) = llm_resp.usage {
                info!(
                    prompt_tokens = usage.prompt_tokens,
                    completion_tokens = usage.completion_tokens,
                    total_tokens = usage.total_tokens,
                    "generation completed"
                );
            }
            Ok(llm_resp)
        }))
    }

    fn generate_stream(&self, request: &LlmRequest) -> LlmResponseStream {
        let params = match self.build_request(request, true) {
            Ok(params) => params,
            Err(e) => return error_stream(e),
        };

        let client = self.client.clone();
        let url = format!("{}/chat/completions", self.base_url);
        let api_key = self.api_key.clone();

        let setup = async move {
            debug!(url = %url, "opening stream");
            let mut req = client.post(&url).json(&params);
            if let Some(key) = &api_key {
                req = req.header("Authorization", format!("Bearer {key}"));
            }

            let response = match req.send().await {
                Ok(response) => response,
                Err(e) => return error_stream(Error::Network(e.to_string())),
            };

            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return error_stream(api_error(status, &body));
            }

            let mut acc = ChunkAccumulator::default();
            let mut final_emitted = false;
            sse_response_stream(response.bytes_stream(), move |signal| match signal {
                SseSignal::Event(SseEvent::Data(json)) => {
                    match serde_json::from_str::<ChatCompletionChunk>(&json) {
                        Ok(chunk) => acc
                            .add_chunk(chunk)
                            .map(|text| Ok(partial_text_response(text)))
                            .into_iter()
                            .collect(),
                        Err(e) => vec![Err(Error::InvalidResponse(format!(
                            "stream chunk: {e}"
                        )))],
                    }
                }
                SseSignal::Event(SseEvent::Done) | SseSignal::End => {
                    if final_emitted {
                        Vec::new()
                    } else {
                        final_emitted = true;
                        vec![Ok(acc.build_final())]
                    }
                }
            })
        };

        Box::pin(stream::once(setup).flatten())
    }
}

impl Llm for OpenAiModel {
    fn name(&self) -> &str {
        &self.model_name
    }

    fn generate_content(&self, request: LlmRequest, stream: bool) -> LlmResponseStream {
        debug!(stream, contents = request.contents.len(), "generate_content called");
        if stream {
            self.generate_stream(&request)
        } else {
            self.generate(&request)
        }
    }
}

fn error_stream(error: Error) -> LlmResponseStream {
    warn!(%error, "request failed before streaming");
    Box::pin(stream::once(future::ready(Err(error))))
}

fn api_error(status: reqwest::StatusCode, body: &str) -> Error {
    if let Ok(err) = serde_json::from_str::<ApiErrorBody>(body) {
        return Error::Api(format!("{}: {}", err.error.r#type, err.error.message));
    }
    Error::Api(format!("HTTP {status}: {body}"))
}

async fn send_request(
    client: &reqwest::Client,
    url: &str,
    api_key: Option<&str>,
    params: &ChatCompletionRequest,
) -> Result<ChatCompletion> {
    debug!(url = %url, "sending request");

    let mut req = client.post(url).json(params);
    if let Some(key) = api_key {
        req = req.header("Authorization", format!("Bearer {key}"));
    }

    let response = req.send().await.map_err(|e| Error::Network(e.to_string()))?;
    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| Error::Network(e.to_string()))?;

    if !status.is_success() {
        return Err(api_error(status, &body));
    }

    serde_json::from_str(&body).map_err(|e| Error::InvalidResponse(e.to_string()))
}
