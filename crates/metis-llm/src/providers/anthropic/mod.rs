//! Anthropic-style messages adapter
//!
//! Implements the [`Llm`] contract against the messages API using reqwest
//! and hand-rolled wire types, including the pre-send history repair the
//! provider's tool-use invariant requires.

/// Message conversion, history repair, and stream accumulation
mod convert;
/// Wire types and configuration
mod types;


pub use types::{AnthropicConfig, API_VERSION, DEFAULT_BASE_URL};

use futures_util::{future, stream, StreamExt};
use tracing::{debug, info, warn};

use metis_core::LlmRequest;

use crate::error::{Error, Result};
use crate::model::{Llm, LlmResponseStream};
use crate::sse::{sse_response_stream, SseEvent, SseSignal};

use convert::{
    convert_content_to_message, convert_response, convert_tools, partial_text_response,
    repair_message_history, MessageAccumulator,
};
use types::{
    ApiErrorBody, MessageNewRequest, MessageWire, StreamEvent, DEFAULT_MAX_TOKENS,
};

/// Anthropic-style LLM adapter
pub struct AnthropicModel {
    client: reqwest::Client,
    model_name: String,
    api_key: Option<String>,
    base_url: String,
}

impl AnthropicModel {
    /// Create an adapter from the given configuration
    pub fn new(config: AnthropicConfig) -> Result<Self> {
        if config.model_name.is_empty() {
            return Err(Error::NotConfigured("model name is required".to_string()));
        }
        let base_url = config.resolved_base_url();
        let api_key = config.resolved_api_key();
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| Error::Network(e.to_string()))?;

        info!(model = %config.model_name, base_url = %base_url, "anthropic model created");

        Ok(Self {
            client,
            model_name: config.model_name,
            api_key,
            base_url,
        })
    }

    /// Translate the neutral request into wire parameters
    fn build_request(&self, request: &LlmRequest, stream: bool) -> Result<MessageNewRequest> {
        let config = request.config.as_ref();

        let mut params = MessageNewRequest {
            model: self.model_name.clone(),
            max_tokens: config
                .and_then(|cfg| cfg.max_output_tokens)
                .filter(|&n| n > 0)
                .unwrap_or(DEFAULT_MAX_TOKENS),
            system: None,
            messages: Vec::new(),
            temperature: None,
            top_p: None,
            stop_sequences: Vec::new(),
            tools: None,
            stream: stream.then_some(true),
        };

        if let Some(system) = config.and_then(|cfg| cfg.system_instruction.as_ref()) {
            let text = system.flattened_text();
            if !text.is_empty() {
                debug!(length = text.len(), "added system instruction");
                params.system = Some(text);
            }
        }

        let mut messages = Vec::new();
        for content in &request.contents {
            if let Some(message) = convert_content_to_message(content)? {
                messages.push(message);
            }
        }

        let original_len = messages.len();
        let messages = repair_message_history(messages);
        if messages.len() != original_len {
            debug!(
                original = original_len,
                repaired = messages.len(),
                "repaired message history"
            );
        }
        params.messages = messages;

        if let Some(cfg) = config {
            params.temperature = cfg.temperature;
            params.top_p = cfg.top_p;
            params.stop_sequences = cfg.stop_sequences.clone();
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
        let url = format!("{}/v1/messages", self.base_url);
        let api_key = self.api_key.clone();

        Box::pin(stream::once(async move {
            let message = send_request(&client, &url, api_key.as_deref(), &params).await?;
            if message.content.is_empty() {
                return Err(Error::NoContent);
            }

            let llm_resp = convert_response(&message);
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
        let url = format!("{}/v1/messages", self.base_url);
        let api_key = self.api_key.clone();

        let setup = async move {
            debug!(url = %url, "opening stream");
            let mut req = client
                .post(&url)
                .header("anthropic-version", API_VERSION)
                .header("content-type", "application/json")
                .json(&params);
            if let Some(key) = &api_key {
                req = req.header("x-api-key", key);
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

            let mut acc = MessageAccumulator::default();
            let mut final_emitted = false;
            sse_response_stream(response.bytes_stream(), move |signal| {
                let emit_final = |acc: &MessageAccumulator, emitted: &mut bool| {
                    if *emitted {
                        Vec::new()
                    } else {
                        *emitted = true;
                        vec![Ok(convert_response(&acc.message))]
                    }
                };

                match signal {
                    SseSignal::Event(SseEvent::Data(json)) => {
                        match serde_json::from_str::<StreamEvent>(&json) {
                            Ok(StreamEvent::Error { error }) => vec![Err(Error::Api(format!(
                                "{}: {}",
                                error.r#type, error.message
                            )))],
                            Ok(StreamEvent::MessageStop) => emit_final(&acc, &mut final_emitted),
                            Ok(event) => acc
                                .apply(event)
                                .map(|text| Ok(partial_text_response(text)))
                                .into_iter()
                                .collect(),
                            Err(e) => vec![Err(Error::InvalidResponse(format!(
                                "stream event: {e}"
                            )))],
                        }
                    }
                    SseSignal::Event(SseEvent::Done) | SseSignal::End => {
                        emit_final(&acc, &mut final_emitted)
                    }
                }
            })
        };

        Box::pin(stream::once(setup).flatten())
    }
}

impl Llm for AnthropicModel {
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
    params: &MessageNewRequest,
) -> Result<MessageWire> {
    debug!(url = %url, "sending request");

    let mut req = client
        .post(url)
        .header("anthropic-version", API_VERSION)
        .header("content-type", "application/json")
        .json(params);
    if let Some(key) = api_key {
        req = req.header("x-api-key", key);
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
