use async_trait::async_trait;
use bytes::Bytes;
use serde_json::{Map, Value, json};

use bifrost_protocol::{
    Choice, Delta, DeltaEnvelope, NormalizedRequest, NormalizedResponse, ResponseMessage, Role,
    ToolCall, Usage,
};
use bifrost_provider_core::{
    HttpMethod, HttpRequest, HttpResponse, Key, MetaConfig, NetworkConfig, ProviderAdapter,
    ProviderError, ProviderResult, StreamChunkOutcome, UpstreamError, header_set,
};

use crate::common::{messages_to_openai_json, tools_to_openai_json};

const DEFAULT_BASE_URL: &str = "https://api.openai.com";

/// spec.md §4.6 — OpenAI chat completions adapter. Also the base shape that
/// [`crate::custom::CustomAdapter`] delegates to when `base_provider_type`
/// is `openai` (or unset).
pub struct OpenAiAdapter {
    name: &'static str,
    default_base_url: &'static str,
}

impl OpenAiAdapter {
    pub fn new() -> Self {
        Self {
            name: "openai",
            default_base_url: DEFAULT_BASE_URL,
        }
    }

    /// Used by the custom-provider adapter to reuse this implementation
    /// under a different `name()`/base URL (spec.md §4.6 "custom providers
    /// with a `base_provider_type`").
    pub fn with_name(name: &'static str, default_base_url: &'static str) -> Self {
        Self {
            name,
            default_base_url,
        }
    }

    fn build_body(&self, req: &NormalizedRequest) -> ProviderResult<Value> {
        build_chat_body(req)
    }
}

/// Shared OpenAI-shaped chat-completions body construction; reused as-is by
/// the Azure adapter, which only differs in URL shape and auth header.
pub(crate) fn build_chat_body(req: &NormalizedRequest) -> ProviderResult<Value> {
    let messages = crate::common::messages(req)
        .ok_or_else(|| ProviderError::InvalidConfig("openai requires a message list".into()))?;
    let mut body = Map::new();
    body.insert("model".to_string(), Value::String(req.model.clone()));
    body.insert(
        "messages".to_string(),
        Value::Array(messages_to_openai_json(messages)),
    );
    if let Some(t) = req.params.temperature {
        body.insert("temperature".to_string(), json!(t));
    }
    if let Some(p) = req.params.top_p {
        body.insert("top_p".to_string(), json!(p));
    }
    if let Some(mt) = req.params.max_tokens {
        body.insert("max_tokens".to_string(), json!(mt));
    }
    if let Some(tools) = &req.params.tools {
        body.insert("tools".to_string(), Value::Array(tools_to_openai_json(tools)?));
    }
    if let Some(tc) = &req.params.tool_choice {
        body.insert("tool_choice".to_string(), tc.clone());
    }
    if let Some(stop) = &req.params.stop {
        body.insert("stop".to_string(), json!(stop));
    }
    if let Some(seed) = req.params.seed {
        body.insert("seed".to_string(), json!(seed));
    }
    if let Some(rf) = &req.params.response_format {
        let value: Value = serde_json::from_str(rf.as_str())
            .map_err(|e| ProviderError::MalformedResponse(e.to_string()))?;
        body.insert("response_format".to_string(), value);
    }
    if req.params.stream {
        body.insert("stream".to_string(), Value::Bool(true));
    }
    for (k, v) in &req.params.extra {
        body.entry(k.clone()).or_insert_with(|| v.clone());
    }
    Ok(Value::Object(body))
}

impl Default for OpenAiAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProviderAdapter for OpenAiAdapter {
    fn name(&self) -> &str {
        self.name
    }

    async fn build_request(
        &self,
        req: &NormalizedRequest,
        key: &Key,
        network: &NetworkConfig,
        _meta: &MetaConfig,
    ) -> ProviderResult<HttpRequest> {
        let base = network.base_url.as_deref().unwrap_or(self.default_base_url);
        let body = self.build_body(req)?;
        let bytes = serde_json::to_vec(&body).map_err(|e| ProviderError::Other(e.to_string()))?;

        let mut headers = bifrost_provider_core::Headers::new();
        header_set(&mut headers, "content-type", "application/json");
        header_set(
            &mut headers,
            "authorization",
            format!("Bearer {}", key.resolved_value()),
        );

        Ok(HttpRequest {
            method: HttpMethod::Post,
            url: format!("{base}/v1/chat/completions"),
            headers,
            body: Some(Bytes::from(bytes)),
            is_stream: req.params.stream,
        })
    }

    fn parse_response(&self, response: &HttpResponse) -> ProviderResult<NormalizedResponse> {
        let value: Value = serde_json::from_slice(&response.body)
            .map_err(|e| ProviderError::MalformedResponse(e.to_string()))?;
        decode_chat_completion(&value)
    }

    fn parse_stream_chunk(&self, chunk: &Bytes) -> ProviderResult<StreamChunkOutcome> {
        decode_chat_completion_chunk(chunk)
    }

    fn translate_http_error(&self, response: &HttpResponse) -> UpstreamError {
        translate_openai_style_error(response)
    }
}

pub(crate) fn decode_chat_completion(value: &Value) -> ProviderResult<NormalizedResponse> {
    let id = value
        .get("id")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let model = value
        .get("model")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let choices = value
        .get("choices")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    let mut out_choices = Vec::with_capacity(choices.len());
    for (i, choice) in choices.iter().enumerate() {
        let message = choice.get("message").cloned().unwrap_or(Value::Null);
        out_choices.push(Choice {
            index: choice
                .get("index")
                .and_then(Value::as_u64)
                .unwrap_or(i as u64) as u32,
            message: decode_response_message(&message),
            finish_reason: choice
                .get("finish_reason")
                .and_then(Value::as_str)
                .map(|s| s.to_string()),
        });
    }

    let usage = value.get("usage").map(decode_usage).unwrap_or_default();

    Ok(NormalizedResponse {
        id,
        object: value
            .get("object")
            .and_then(Value::as_str)
            .unwrap_or("chat.completion")
            .to_string(),
        model,
        choices: out_choices,
        usage,
        extra_fields: Default::default(),
        raw_request: None,
        raw_response: None,
    })
}

fn decode_response_message(value: &Value) -> ResponseMessage {
    let role = value
        .get("role")
        .and_then(Value::as_str)
        .and_then(role_from_str);
    let content = value
        .get("content")
        .and_then(Value::as_str)
        .map(|s| s.to_string());
    let tool_calls = value
        .get("tool_calls")
        .and_then(Value::as_array)
        .map(|calls| calls.iter().filter_map(decode_tool_call).collect());
    ResponseMessage {
        role,
        content,
        tool_calls,
    }
}

fn decode_tool_call(value: &Value) -> Option<ToolCall> {
    let id = value.get("id")?.as_str()?.to_string();
    let function = value.get("function")?;
    let name = function.get("name")?.as_str()?.to_string();
    let arguments_json = function
        .get("arguments")
        .and_then(Value::as_str)
        .unwrap_or("{}")
        .to_string();
    Some(ToolCall {
        id,
        name,
        arguments_json,
    })
}

fn role_from_str(s: &str) -> Option<Role> {
    match s {
        "system" => Some(Role::System),
        "user" => Some(Role::User),
        "assistant" => Some(Role::Assistant),
        "tool" => Some(Role::Tool),
        _ => None,
    }
}

fn decode_usage(value: &Value) -> Usage {
    Usage {
        prompt_tokens: value
            .get("prompt_tokens")
            .and_then(Value::as_u64)
            .unwrap_or(0) as u32,
        completion_tokens: value
            .get("completion_tokens")
            .and_then(Value::as_u64)
            .unwrap_or(0) as u32,
        total_tokens: value
            .get("total_tokens")
            .and_then(Value::as_u64)
            .unwrap_or(0) as u32,
    }
}

pub(crate) fn decode_chat_completion_chunk(chunk: &Bytes) -> ProviderResult<StreamChunkOutcome> {
    let text = std::str::from_utf8(chunk).map_err(|e| ProviderError::MalformedResponse(e.to_string()))?;
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Ok(StreamChunkOutcome::Incomplete);
    }
    if trimmed == "[DONE]" {
        return Ok(StreamChunkOutcome::Done);
    }
    let value: Value =
        serde_json::from_str(trimmed).map_err(|e| ProviderError::MalformedResponse(e.to_string()))?;
    let choice = value
        .get("choices")
        .and_then(Value::as_array)
        .and_then(|arr| arr.first())
        .cloned()
        .unwrap_or(Value::Null);
    let delta_value = choice.get("delta").cloned().unwrap_or(Value::Null);
    let delta = Delta {
        role: delta_value
            .get("role")
            .and_then(Value::as_str)
            .and_then(role_from_str),
        content: delta_value
            .get("content")
            .and_then(Value::as_str)
            .map(|s| s.to_string()),
        tool_calls: delta_value
            .get("tool_calls")
            .and_then(Value::as_array)
            .map(|calls| calls.iter().filter_map(decode_tool_call).collect()),
    };
    let finish_reason = choice
        .get("finish_reason")
        .and_then(Value::as_str)
        .map(|s| s.to_string());
    Ok(StreamChunkOutcome::Delta(DeltaEnvelope {
        index: choice.get("index").and_then(Value::as_u64).unwrap_or(0) as u32,
        delta,
        finish_reason,
        error: None,
    }))
}

pub(crate) fn translate_openai_style_error(response: &HttpResponse) -> UpstreamError {
    let parsed: Option<Value> = serde_json::from_slice(&response.body).ok();
    let (code, message) = parsed
        .as_ref()
        .and_then(|v| v.get("error"))
        .map(|err| {
            let code = err
                .get("code")
                .and_then(Value::as_str)
                .unwrap_or("upstream_error")
                .to_string();
            let message = err
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("upstream error")
                .to_string();
            (code, message)
        })
        .unwrap_or_else(|| {
            (
                format!("http_{}", response.status),
                String::from_utf8_lossy(&response.body).to_string(),
            )
        });
    UpstreamError {
        status_code: response.status,
        error_type: "upstream".to_string(),
        code,
        message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_basic_chat_completion() {
        let value = json!({
            "id": "chatcmpl-1",
            "object": "chat.completion",
            "model": "gpt-4o-mini",
            "choices": [{
                "index": 0,
                "message": {"role": "assistant", "content": "hi there"},
                "finish_reason": "stop"
            }],
            "usage": {"prompt_tokens": 5, "completion_tokens": 3, "total_tokens": 8}
        });
        let resp = decode_chat_completion(&value).unwrap();
        assert_eq!(resp.choices[0].message.role, Some(Role::Assistant));
        assert_eq!(resp.choices[0].message.content.as_deref(), Some("hi there"));
        assert_eq!(resp.usage.total_tokens, 8);
    }

    #[test]
    fn decodes_done_sentinel() {
        let chunk = Bytes::from_static(b"[DONE]");
        assert!(matches!(
            decode_chat_completion_chunk(&chunk).unwrap(),
            StreamChunkOutcome::Done
        ));
    }
}
