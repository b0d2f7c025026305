use async_trait::async_trait;
use bytes::Bytes;
use serde_json::{Map, Value, json};

use bifrost_protocol::{
    Choice, Delta, DeltaEnvelope, MessageContent, NormalizedRequest, NormalizedResponse, Role,
    ResponseMessage, ToolCall, Usage,
};
use bifrost_provider_core::{
    HttpMethod, HttpRequest, HttpResponse, Key, MetaConfig, NetworkConfig, ProviderAdapter,
    ProviderError, ProviderResult, StreamChunkOutcome, UpstreamError, header_set,
};

use crate::common::{content_to_value, tools_to_anthropic_json};

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// spec.md §4.6 — Anthropic Messages API adapter.
pub struct AnthropicAdapter;

impl AnthropicAdapter {
    pub fn new() -> Self {
        Self
    }

    fn build_body(&self, req: &NormalizedRequest) -> ProviderResult<Value> {
        build_message_body(req)
    }
}

/// Shared message-body construction for the direct Anthropic API and the
/// Bedrock adapter's Anthropic-compatible `InvokeModel` body (which adds its
/// own `anthropic_version` field and strips `model` into the URL path).
pub(crate) fn build_message_body(req: &NormalizedRequest) -> ProviderResult<Value> {
    let messages = crate::common::messages(req)
        .ok_or_else(|| ProviderError::InvalidConfig("anthropic requires a message list".into()))?;

    let mut system_parts = Vec::new();
    let mut out_messages = Vec::with_capacity(messages.len());
    for m in messages {
        if m.role == Role::System {
            if let MessageContent::Text(text) = &m.content {
                system_parts.push(text.clone());
            }
            continue;
        }
        let mut obj = Map::new();
        obj.insert(
            "role".to_string(),
            Value::String(match m.role {
                Role::Assistant => "assistant",
                _ => "user",
            }.to_string()),
        );
        obj.insert("content".to_string(), content_to_value(&m.content));
        out_messages.push(Value::Object(obj));
    }

    let mut body = Map::new();
    body.insert("model".to_string(), Value::String(req.model.clone()));
    body.insert("messages".to_string(), Value::Array(out_messages));
    if !system_parts.is_empty() {
        body.insert("system".to_string(), Value::String(system_parts.join("\n\n")));
    }
    body.insert(
        "max_tokens".to_string(),
        json!(req.params.max_tokens.unwrap_or(4096)),
    );
    if let Some(t) = req.params.temperature {
        body.insert("temperature".to_string(), json!(t));
    }
    if let Some(p) = req.params.top_p {
        body.insert("top_p".to_string(), json!(p));
    }
    if let Some(stop) = &req.params.stop {
        body.insert("stop_sequences".to_string(), json!(stop));
    }
    if let Some(tools) = &req.params.tools {
        body.insert("tools".to_string(), Value::Array(tools_to_anthropic_json(tools)?));
    }
    if let Some(tc) = &req.params.tool_choice {
        body.insert("tool_choice".to_string(), tc.clone());
    }
    if req.params.stream {
        body.insert("stream".to_string(), Value::Bool(true));
    }
    for (k, v) in &req.params.extra {
        body.entry(k.clone()).or_insert_with(|| v.clone());
    }
    Ok(Value::Object(body))
}

impl Default for AnthropicAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProviderAdapter for AnthropicAdapter {
    fn name(&self) -> &str {
        "anthropic"
    }

    async fn build_request(
        &self,
        req: &NormalizedRequest,
        key: &Key,
        network: &NetworkConfig,
        _meta: &MetaConfig,
    ) -> ProviderResult<HttpRequest> {
        let base = network.base_url.as_deref().unwrap_or(DEFAULT_BASE_URL);
        let body = self.build_body(req)?;
        let bytes = serde_json::to_vec(&body).map_err(|e| ProviderError::Other(e.to_string()))?;

        let mut headers = bifrost_provider_core::Headers::new();
        header_set(&mut headers, "content-type", "application/json");
        header_set(&mut headers, "x-api-key", key.resolved_value());
        header_set(&mut headers, "anthropic-version", ANTHROPIC_VERSION);

        Ok(HttpRequest {
            method: HttpMethod::Post,
            url: format!("{base}/v1/messages"),
            headers,
            body: Some(Bytes::from(bytes)),
            is_stream: req.params.stream,
        })
    }

    fn parse_response(&self, response: &HttpResponse) -> ProviderResult<NormalizedResponse> {
        let value: Value = serde_json::from_slice(&response.body)
            .map_err(|e| ProviderError::MalformedResponse(e.to_string()))?;
        decode_anthropic_message(&value)
    }

    fn parse_stream_chunk(&self, chunk: &Bytes) -> ProviderResult<StreamChunkOutcome> {
        decode_anthropic_stream_event(chunk)
    }

    fn translate_http_error(&self, response: &HttpResponse) -> UpstreamError {
        let parsed: Option<Value> = serde_json::from_slice(&response.body).ok();
        let (code, message) = parsed
            .as_ref()
            .and_then(|v| v.get("error"))
            .map(|err| {
                (
                    err.get("type").and_then(Value::as_str).unwrap_or("upstream_error").to_string(),
                    err.get("message").and_then(Value::as_str).unwrap_or("upstream error").to_string(),
                )
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
}

pub(crate) fn decode_anthropic_message(value: &Value) -> ProviderResult<NormalizedResponse> {
    let id = value.get("id").and_then(Value::as_str).unwrap_or_default().to_string();
    let model = value.get("model").and_then(Value::as_str).unwrap_or_default().to_string();
    let content_blocks = value.get("content").and_then(Value::as_array).cloned().unwrap_or_default();

    let mut text = String::new();
    let mut tool_calls = Vec::new();
    for block in &content_blocks {
        match block.get("type").and_then(Value::as_str) {
            Some("text") => {
                if let Some(t) = block.get("text").and_then(Value::as_str) {
                    text.push_str(t);
                }
            }
            Some("tool_use") => {
                let id = block.get("id").and_then(Value::as_str).unwrap_or_default().to_string();
                let name = block.get("name").and_then(Value::as_str).unwrap_or_default().to_string();
                let arguments_json = block
                    .get("input")
                    .map(|v| v.to_string())
                    .unwrap_or_else(|| "{}".to_string());
                tool_calls.push(ToolCall { id, name, arguments_json });
            }
            _ => {}
        }
    }

    let message = ResponseMessage {
        role: Some(Role::Assistant),
        content: if text.is_empty() { None } else { Some(text) },
        tool_calls: if tool_calls.is_empty() { None } else { Some(tool_calls) },
    };

    let finish_reason = value
        .get("stop_reason")
        .and_then(Value::as_str)
        .map(|s| s.to_string());

    let usage_value = value.get("usage");
    let prompt_tokens = usage_value
        .and_then(|u| u.get("input_tokens"))
        .and_then(Value::as_u64)
        .unwrap_or(0) as u32;
    let completion_tokens = usage_value
        .and_then(|u| u.get("output_tokens"))
        .and_then(Value::as_u64)
        .unwrap_or(0) as u32;

    Ok(NormalizedResponse {
        id,
        object: "chat.completion".to_string(),
        model,
        choices: vec![Choice {
            index: 0,
            message,
            finish_reason,
        }],
        usage: Usage {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        },
        extra_fields: Default::default(),
        raw_request: None,
        raw_response: None,
    })
}

/// Anthropic streams named SSE events (`message_start`, `content_block_delta`,
/// `message_stop`, ...); the event name is also the `type` field of the JSON
/// payload, so a single framed `data:` line is enough to classify it without
/// needing the separate `event:` line.
pub(crate) fn decode_anthropic_stream_event(chunk: &Bytes) -> ProviderResult<StreamChunkOutcome> {
    let text = std::str::from_utf8(chunk).map_err(|e| ProviderError::MalformedResponse(e.to_string()))?;
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Ok(StreamChunkOutcome::Incomplete);
    }
    let value: Value =
        serde_json::from_str(trimmed).map_err(|e| ProviderError::MalformedResponse(e.to_string()))?;
    let event_type = value.get("type").and_then(Value::as_str).unwrap_or("");

    match event_type {
        "content_block_delta" => {
            let index = value.get("index").and_then(Value::as_u64).unwrap_or(0) as u32;
            let delta_value = value.get("delta").cloned().unwrap_or(Value::Null);
            let delta = match delta_value.get("type").and_then(Value::as_str) {
                Some("text_delta") => Delta {
                    role: None,
                    content: delta_value.get("text").and_then(Value::as_str).map(|s| s.to_string()),
                    tool_calls: None,
                },
                Some("input_json_delta") => Delta {
                    role: None,
                    content: delta_value
                        .get("partial_json")
                        .and_then(Value::as_str)
                        .map(|s| s.to_string()),
                    tool_calls: None,
                },
                _ => Delta::default(),
            };
            Ok(StreamChunkOutcome::Delta(DeltaEnvelope {
                index,
                delta,
                finish_reason: None,
                error: None,
            }))
        }
        "message_delta" => {
            let finish_reason = value
                .get("delta")
                .and_then(|d| d.get("stop_reason"))
                .and_then(Value::as_str)
                .map(|s| s.to_string());
            Ok(StreamChunkOutcome::Delta(DeltaEnvelope {
                index: 0,
                delta: Delta::default(),
                finish_reason,
                error: None,
            }))
        }
        "message_stop" => Ok(StreamChunkOutcome::Done),
        _ => Ok(StreamChunkOutcome::Incomplete),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_text_message() {
        let value = json!({
            "id": "msg_1",
            "model": "claude-3-5-sonnet-20241022",
            "content": [{"type": "text", "text": "hello"}],
            "stop_reason": "end_turn",
            "usage": {"input_tokens": 10, "output_tokens": 4}
        });
        let resp = decode_anthropic_message(&value).unwrap();
        assert_eq!(resp.choices[0].message.content.as_deref(), Some("hello"));
        assert_eq!(resp.usage.total_tokens, 14);
    }

    #[test]
    fn decodes_content_block_delta() {
        let chunk = Bytes::from_static(
            br#"{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"hi"}}"#,
        );
        match decode_anthropic_stream_event(&chunk).unwrap() {
            StreamChunkOutcome::Delta(env) => assert_eq!(env.delta.content.as_deref(), Some("hi")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn message_stop_is_done() {
        let chunk = Bytes::from_static(br#"{"type":"message_stop"}"#);
        assert!(matches!(decode_anthropic_stream_event(&chunk).unwrap(), StreamChunkOutcome::Done));
    }
}
