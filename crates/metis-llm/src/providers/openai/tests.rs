use std::time::Duration;

use futures_util::StreamExt;
use metis_core::{
    Content, FinishReason, GenerateConfig, LlmRequest, Part, Role, ThinkingLevel, ToolDeclaration,
};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use super::convert::{
    convert_finish_reason, convert_function_params, convert_inline_data, convert_response,
    convert_stop_sequences, convert_thinking_level, convert_usage, ensure_object_properties,
    parse_json_args, ChunkAccumulator,
};
use super::types::{ChatCompletion, ChatCompletionChunk, OpenAiConfig, StopSequences, UsageWire};
use super::OpenAiModel;
use crate::error::Error;
use crate::model::Llm;

fn test_model() -> OpenAiModel {
    OpenAiModel::new(
        OpenAiConfig::new("gpt-4o")
            .with_api_key("sk-test-1234567890")
            .with_base_url("http://localhost:0/v1"),
    )
    .unwrap()
}

#[test]
fn test_config_builder() {
    let config = OpenAiConfig::new("gpt-4o")
        .with_api_key("sk-test-1234567890")
        .with_base_url("http://localhost:11434/v1")
        .with_timeout(Duration::from_secs(30));

    assert_eq!(config.model_name, "gpt-4o");
    assert_eq!(config.api_key.as_deref(), Some("sk-test-1234567890"));
    assert_eq!(config.base_url.as_deref(), Some("http://localhost:11434/v1"));
    assert_eq!(config.timeout, Duration::from_secs(30));
}

#[test]
fn test_config_debug_masks_key() {
    let config = OpenAiConfig::new("gpt-4o").with_api_key("sk-1234567890abcdef");
    let debug_str = format!("{config:?}");
    assert!(!debug_str.contains("1234567890"));
}

#[test]
fn test_empty_model_name_is_rejected() {
    assert!(matches!(
        OpenAiModel::new(OpenAiConfig::new("").with_base_url("http://localhost/v1")),
        Err(Error::NotConfigured(_))
    ));
}

#[test]
fn test_tool_call_id_normalization_round_trip() {
    let model = test_model();
    let long_id = "x".repeat(60);

    let short_id = model.normalize_tool_call_id(&long_id);
    assert_eq!(short_id.len(), 40);
    assert!(short_id.starts_with("tc_"));
    assert_eq!(model.denormalize_tool_call_id(&short_id), long_id);
}

#[test]
fn test_short_tool_call_ids_pass_through() {
    let model = test_model();
    assert_eq!(model.normalize_tool_call_id("call_123"), "call_123");
    // Exactly at the limit is unchanged.
    let at_limit = "y".repeat(40);
    assert_eq!(model.normalize_tool_call_id(&at_limit), at_limit);
    // Unknown short ids denormalize to themselves.
    assert_eq!(model.denormalize_tool_call_id("call_999"), "call_999");
}

#[test]
fn test_ensure_object_properties_recurses() {
    let mut schema = serde_json::json!({
        "type": "object",
        "properties": {
            "nested": {"type": "object"},
            "list": {"type": "array", "items": {"type": "object"}},
        },
    });
    ensure_object_properties(&mut schema);

    assert_eq!(
        schema["properties"]["nested"]["properties"],
        serde_json::json!({})
    );
    assert_eq!(
        schema["properties"]["list"]["items"]["properties"],
        serde_json::json!({})
    );
}

#[test]
fn test_ensure_object_properties_adds_missing_root() {
    let mut schema = serde_json::json!({"type": "object"});
    ensure_object_properties(&mut schema);
    assert_eq!(schema["properties"], serde_json::json!({}));
}

#[test]
fn test_function_params_prefer_json_schema_form() {
    let tool = ToolDeclaration {
        name: "lookup".to_string(),
        description: "Lookup".to_string(),
        parameters: Some(serde_json::json!({"type": "object", "properties": {"a": {"type": "string"}}})),
        parameters_json_schema: Some(serde_json::json!({"type": "object"})),
    };
    let params = convert_function_params(&tool).unwrap();
    assert_eq!(params["properties"], serde_json::json!({}));

    let loose_only = ToolDeclaration {
        parameters_json_schema: None,
        ..tool.clone()
    };
    let params = convert_function_params(&loose_only).unwrap();
    assert!(params["properties"]["a"].is_object());

    let non_object = ToolDeclaration {
        parameters: Some(serde_json::json!("not a schema")),
        parameters_json_schema: None,
        ..tool
    };
    assert!(convert_function_params(&non_object).is_none());
}

#[test]
fn test_stop_sequence_forms() {
    assert_eq!(convert_stop_sequences(&[]), None);
    assert_eq!(
        convert_stop_sequences(&["END".to_string()]),
        Some(StopSequences::One("END".to_string()))
    );
    assert_eq!(
        convert_stop_sequences(&["A".to_string(), "B".to_string()]),
        Some(StopSequences::Many(vec!["A".to_string(), "B".to_string()]))
    );
}

#[test]
fn test_finish_reason_mapping() {
    assert_eq!(convert_finish_reason(Some("stop")), FinishReason::Stop);
    assert_eq!(convert_finish_reason(Some("tool_calls")), FinishReason::Stop);
    assert_eq!(
        convert_finish_reason(Some("function_call")),
        FinishReason::Stop
    );
    assert_eq!(
        convert_finish_reason(Some("length")),
        FinishReason::MaxTokens
    );
    assert_eq!(
        convert_finish_reason(Some("content_filter")),
        FinishReason::Safety
    );
    assert_eq!(
        convert_finish_reason(Some("weird")),
        FinishReason::Unspecified
    );
    assert_eq!(convert_finish_reason(None), FinishReason::Unspecified);
}

#[test]
fn test_thinking_level_mapping() {
    assert_eq!(convert_thinking_level(ThinkingLevel::Low), "low");
    assert_eq!(convert_thinking_level(ThinkingLevel::Medium), "medium");
    assert_eq!(convert_thinking_level(ThinkingLevel::High), "high");
}

#[test]
fn test_usage_absent_when_nothing_counted() {
    assert!(convert_usage(UsageWire::default()).is_none());
    let usage = convert_usage(UsageWire {
        prompt_tokens: 3,
        completion_tokens: 5,
        total_tokens: 8,
    })
    .unwrap();
    assert_eq!(usage.total_tokens, 8);
}

#[test]
fn test_parse_json_args_tolerates_garbage() {
    assert!(parse_json_args("").is_empty());
    assert!(parse_json_args("{not json").is_empty());
    assert!(parse_json_args("[1, 2]").is_empty());
    let args = parse_json_args(r#"{"city": "Paris"}"#);
    assert_eq!(args["city"], serde_json::json!("Paris"));
}

#[test]
fn test_unsupported_image_mime_is_dropped() {
    assert!(convert_inline_data("image/tiff", &[1, 2, 3]).is_none());
    assert!(convert_inline_data("image/png", &[1, 2, 3]).is_some());
}

#[test]
fn test_image_becomes_data_url() {
    let part = convert_inline_data("image/png", &[1, 2, 3]).unwrap();
    let json = serde_json::to_value(&part).unwrap();
    assert_eq!(json["type"], "image_url");
    assert_eq!(json["image_url"]["url"], "data:image/png;base64,AQID");
    assert_eq!(json["image_url"]["detail"], "auto");
}

#[test]
fn test_build_request_shapes() {
    let model = test_model();
    let mut config = GenerateConfig {
        temperature: Some(0.7),
        max_output_tokens: Some(256),
        stop_sequences: vec!["END".to_string()],
        response_mime_type: Some("application/json".to_string()),
        ..GenerateConfig::default()
    };
    config.system_instruction = Some(Content::system("be brief"));

    let request = LlmRequest::new(vec![Content::user("hi")]).with_config(config);
    let params = model.build_request(&request, false).unwrap();
    let json = serde_json::to_value(&params).unwrap();

    assert_eq!(json["messages"][0]["role"], "system");
    assert_eq!(json["messages"][0]["content"], "be brief");
    assert_eq!(json["messages"][1]["role"], "user");
    assert_eq!(json["temperature"], 0.7);
    assert_eq!(json["max_tokens"], 256);
    assert_eq!(json["stop"], "END");
    assert_eq!(json["response_format"]["type"], "json_object");
    assert!(json.get("stream").is_none());
}

#[test]
fn test_function_responses_become_tool_messages() {
    let model = test_model();
    let content = Content::new(
        Role::User,
        vec![Part::function_response(
            "call_1",
            serde_json::json!({"ok": true}),
        )],
    );
    let messages = model.convert_content_to_messages(&content).unwrap();
    let json = serde_json::to_value(&messages).unwrap();

    assert_eq!(json.as_array().unwrap().len(), 1);
    assert_eq!(json[0]["role"], "tool");
    assert_eq!(json[0]["tool_call_id"], "call_1");
    assert_eq!(json[0]["content"], r#"{"ok":true}"#);
}

#[test]
fn test_assistant_message_carries_text_and_tool_calls() {
    let model = test_model();
    let mut args = serde_json::Map::new();
    args.insert("q".to_string(), serde_json::json!("rust"));
    let content = Content::new(
        Role::Model,
        vec![
            Part::text("Searching."),
            Part::function_call("call_2", "search", args),
        ],
    );
    let messages = model.convert_content_to_messages(&content).unwrap();
    let json = serde_json::to_value(&messages).unwrap();

    assert_eq!(json[0]["role"], "assistant");
    assert_eq!(json[0]["content"], "Searching.");
    assert_eq!(json[0]["tool_calls"][0]["function"]["name"], "search");
    assert_eq!(
        json[0]["tool_calls"][0]["function"]["arguments"],
        r#"{"q":"rust"}"#
    );
}

#[test]
fn test_user_message_with_images_is_multi_part() {
    let model = test_model();
    let content = Content::new(
        Role::User,
        vec![
            Part::text("what is this"),
            Part::inline_data("image/jpeg", vec![0xff]),
        ],
    );
    let messages = model.convert_content_to_messages(&content).unwrap();
    let json = serde_json::to_value(&messages).unwrap();

    let parts = json[0]["content"].as_array().unwrap();
    assert_eq!(parts.len(), 2);
    assert_eq!(parts[0]["type"], "text");
    assert_eq!(parts[1]["type"], "image_url");
}

#[test]
fn test_convert_response_without_choices_is_an_error() {
    let resp: ChatCompletion = serde_json::from_str(r#"{"choices": []}"#).unwrap();
    assert!(matches!(convert_response(resp), Err(Error::NoChoices)));
}

#[test]
fn test_convert_response_extracts_text_and_tool_calls() {
    let resp: ChatCompletion = serde_json::from_str(
        r#"{
            "choices": [{
                "message": {
                    "content": "Done.",
                    "tool_calls": [{
                        "id": "call_9",
                        "function": {"name": "ping", "arguments": "{\"n\": 1}"}
                    }]
                },
                "finish_reason": "tool_calls"
            }],
            "usage": {"prompt_tokens": 4, "completion_tokens": 2, "total_tokens": 6}
        }"#,
    )
    .unwrap();

    let llm_resp = convert_response(resp).unwrap();
    assert!(llm_resp.turn_complete);
    let parts = &llm_resp.content.as_ref().unwrap().parts;
    assert_eq!(parts.len(), 2);
    assert!(matches!(&parts[0], Part::Text { text } if text == "Done."));
    assert!(
        matches!(&parts[1], Part::FunctionCall { name, args, .. } if name == "ping" && args["n"] == serde_json::json!(1))
    );
    assert_eq!(llm_resp.finish_reason, FinishReason::Stop);
    assert_eq!(llm_resp.usage.unwrap().total_tokens, 6);
}

fn chunk(json: &str) -> ChatCompletionChunk {
    serde_json::from_str(json).unwrap()
}

#[test]
fn test_chunk_accumulator_aggregates_text_and_usage() {
    let mut acc = ChunkAccumulator::default();

    for (delta, expected) in [("He", "He"), ("llo", "llo"), ("!", "!")] {
        let emitted = acc.add_chunk(chunk(&format!(
            r#"{{"choices": [{{"delta": {{"content": "{delta}"}}}}]}}"#
        )));
        assert_eq!(emitted.as_deref(), Some(expected));
    }

    // Terminal chunk: finish reason, then a usage-only chunk.
    assert!(acc
        .add_chunk(chunk(
            r#"{"choices": [{"delta": {}, "finish_reason": "stop"}]}"#
        ))
        .is_none());
    assert!(acc
        .add_chunk(chunk(
            r#"{"choices": [], "usage": {"prompt_tokens": 1, "completion_tokens": 3, "total_tokens": 4}}"#
        ))
        .is_none());

    let final_resp = acc.build_final();
    assert!(final_resp.turn_complete);
    assert!(!final_resp.partial);
    assert_eq!(final_resp.content.unwrap().flattened_text(), "Hello!");
    assert_eq!(final_resp.finish_reason, FinishReason::Stop);
    let usage = final_resp.usage.unwrap();
    assert_eq!(
        (usage.prompt_tokens, usage.completion_tokens, usage.total_tokens),
        (1, 3, 4)
    );
}

#[test]
fn test_chunk_accumulator_merges_tool_call_fragments() {
    let mut acc = ChunkAccumulator::default();
    acc.add_chunk(chunk(
        r#"{"choices": [{"delta": {"tool_calls": [{"index": 0, "id": "call_1", "function": {"name": "search", "arguments": "{\"q\":"}}]}}]}"#,
    ));
    acc.add_chunk(chunk(
        r#"{"choices": [{"delta": {"tool_calls": [{"index": 0, "function": {"arguments": " \"rust\"}"}}]}}]}"#,
    ));

    let final_resp = acc.build_final();
    let parts = final_resp.content.unwrap().parts;
    assert!(
        matches!(&parts[0], Part::FunctionCall { id, name, args } if id == "call_1" && name == "search" && args["q"] == serde_json::json!("rust"))
    );
}

#[tokio::test]
async fn test_streaming_turn_end_to_end() {
    let body = concat!(
        "data: {\"choices\": [{\"delta\": {\"content\": \"He\"}}]}\n\n",
        "data: {\"choices\": [{\"delta\": {\"content\": \"llo\"}}]}\n\n",
        "data: {\"choices\": [{\"delta\": {\"content\": \"!\"}}]}\n\n",
        "data: {\"choices\": [{\"delta\": {}, \"finish_reason\": \"stop\"}]}\n\n",
        "data: {\"choices\": [], \"usage\": {\"prompt_tokens\": 1, \"completion_tokens\": 3, \"total_tokens\": 4}}\n\n",
        "data: [DONE]\n\n",
    );

    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
        .mount(&server)
        .await;

    let model = OpenAiModel::new(
        OpenAiConfig::new("gpt-4o")
            .with_api_key("sk-test-1234567890")
            .with_base_url(format!("{}/v1", server.uri())),
    )
    .unwrap();

    let request = LlmRequest::new(vec![Content::user("hi")]);
    let responses: Vec<_> = model.generate_content(request, true).collect().await;

    let responses: Vec<_> = responses.into_iter().map(Result::unwrap).collect();
    assert_eq!(responses.len(), 4);
    for partial in &responses[..3] {
        assert!(partial.partial);
        assert!(!partial.turn_complete);
    }
    assert_eq!(responses[0].content.as_ref().unwrap().flattened_text(), "He");

    let final_resp = &responses[3];
    assert!(final_resp.turn_complete);
    assert_eq!(
        final_resp.content.as_ref().unwrap().flattened_text(),
        "Hello!"
    );
    assert_eq!(final_resp.finish_reason, FinishReason::Stop);
    assert_eq!(final_resp.usage.unwrap().total_tokens, 4);
}

#[tokio::test]
async fn test_non_streaming_yields_exactly_one_response() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "choices": [{"message": {"content": "Hi there"}, "finish_reason": "stop"}],
            "usage": {"prompt_tokens": 2, "completion_tokens": 2, "total_tokens": 4}
        })))
        .mount(&server)
        .await;

    let model = OpenAiModel::new(
        OpenAiConfig::new("gpt-4o")
            .with_api_key("sk-test-1234567890")
            .with_base_url(format!("{}/v1", server.uri())),
    )
    .unwrap();

    let request = LlmRequest::new(vec![Content::user("hello")]);
    let responses: Vec<_> = model.generate_content(request, false).collect().await;

    assert_eq!(responses.len(), 1);
    let resp = responses.into_iter().next().unwrap().unwrap();
    assert!(resp.turn_complete);
    assert_eq!(resp.content.unwrap().flattened_text(), "Hi there");
}

#[tokio::test]
async fn test_upstream_error_yields_single_terminal_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(429).set_body_json(serde_json::json!({
            "error": {"type": "rate_limit_exceeded", "message": "slow down"}
        })))
        .mount(&server)
        .await;

    let model = OpenAiModel::new(
        OpenAiConfig::new("gpt-4o")
            .with_api_key("sk-test-1234567890")
            .with_base_url(format!("{}/v1", server.uri())),
    )
    .unwrap();

    let request = LlmRequest::new(vec![Content::user("hello")]);
    let responses: Vec<_> = model.generate_content(request, true).collect().await;

    assert_eq!(responses.len(), 1);
    let err = responses.into_iter().next().unwrap().unwrap_err();
    assert!(err.to_string().contains("slow down"));
}
