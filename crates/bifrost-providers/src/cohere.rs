//! Cohere Chat (v2) adapter — spec.md §4.6.

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::{Map, Value, json};

use bifrost_protocol::{
    Choice, Delta, DeltaEnvelope, NormalizedRequest, NormalizedResponse, Role, ResponseMessage, Usage,
};
use bifrost_provider_core::{
    HttpMethod, HttpRequest, HttpResponse, Key, MetaConfig, NetworkConfig, ProviderAdapter,
    ProviderError, ProviderResult, StreamChunkOutcome, UpstreamError, header_set,
};

use crate::common::messages_to_openai_json;

const DEFAULT_BASE_URL: &str = "https://api.cohere.com";

pub struct CohereAdapter;

impl CohereAdapter {
    pub fn new() -> Self {
        Self
    }

    fn build_body(&self, req: &NormalizedRequest) -> ProviderResult<Value> {
        let messages = crate::common::messages(req)
            .ok_or_else(|| ProviderError::InvalidConfig("cohere requires a message list".into()))?;
        let mut body = Map::new();
        body.insert("model".to_string(), Value::String(req.model.clone()));
        body.insert("messages".to_string(), Value::Array(messages_to_openai_json(messages)));
        if let Some(t) = req.params.temperature {
            body.insert("temperature".to_string(), json!(t));
        }
        if let Some(p) = req.params.top_p {
            body.insert("p".to_string(), json!(p));
        }
        if let Some(mt) = req.params.max_tokens {
            body.insert("max_tokens".to_string(), json!(mt));
        }
        if let Some(stop) = &req.params.stop {
            body.insert("stop_sequences".to_string(), json!(stop));
        }
        if req.params.stream {
            body.insert("stream".to_string(), Value::Bool(true));
        }
        for (k, v) in &req.params.extra {
            body.entry(k.clone()).or_insert_with(|| v.clone());
        }
        Ok(Value::Object(body))
    }
}

impl Default for CohereAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProviderAdapter for CohereAdapter {
    fn name(&self) -> &str {
        "cohere"
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
        header_set(&mut headers, "authorization", format!("Bearer {}", key.resolved_value()));

        Ok(HttpRequest {
            method: HttpMethod::Post,
            url: format!("{base}/v2/chat"),
            headers,
            body: Some(Bytes::from(bytes)),
            is_stream: req.params.stream,
        })
    }

    fn parse_response(&self, response: &HttpResponse) -> ProviderResult<NormalizedResponse> {
        let value: Value = serde_json::from_slice(&response.body)
            .map_err(|e| ProviderError::MalformedResponse(e.to_string()))?;
        decode_chat_response(&value)
    }

    fn parse_stream_chunk(&self, chunk: &Bytes) -> ProviderResult<StreamChunkOutcome> {
        let text = std::str::from_utf8(chunk).map_err(|e| ProviderError::MalformedResponse(e.to_string()))?;
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Ok(StreamChunkOutcome::Incomplete);
        }
        let value: Value =
            serde_json::from_str(trimmed).map_err(|e| ProviderError::MalformedResponse(e.to_string()))?;
        decode_stream_event(&value)
    }

    fn translate_http_error(&self, response: &HttpResponse) -> UpstreamError {
        let parsed: Option<Value> = serde_json::from_slice(&response.body).ok();
        let message = parsed
            .as_ref()
            .and_then(|v| v.get("message"))
            .and_then(Value::as_str)
            .map(|s| s.to_string())
            .unwrap_or_else(|| String::from_utf8_lossy(&response.body).to_string());
        UpstreamError {
            status_code: response.status,
            error_type: "upstream".to_string(),
            code: format!("http_{}", response.status),
            message,
        }
    }
}

fn decode_chat_response(value: &Value) -> ProviderResult<NormalizedResponse> {
    let id = value.get("id").and_then(Value::as_str).unwrap_or_default().to_string();
    let text = value
        .get("message")
        .and_then(|m| m.get("content"))
        .and_then(Value::as_array)
        .map(|parts| {
            parts
                .iter()
                .filter_map(|p| p.get("text").and_then(Value::as_str))
                .collect::<Vec<_>>()
                .join("")
        })
        .filter(|s| !s.is_empty());

    let usage = value.get("usage").and_then(|u| u.get("billed_units"));
    let prompt_tokens = usage.and_then(|u| u.get("input_tokens")).and_then(Value::as_f64).unwrap_or(0.0) as u32;
    let completion_tokens = usage.and_then(|u| u.get("output_tokens")).and_then(Value::as_f64).unwrap_or(0.0) as u32;

    Ok(NormalizedResponse {
        id,
        object: "chat.completion".to_string(),
        model: String::new(),
        choices: vec![Choice {
            index: 0,
            message: ResponseMessage {
                role: Some(Role::Assistant),
                content: text,
                tool_calls: None,
            },
            finish_reason: value.get("finish_reason").and_then(Value::as_str).map(|s| s.to_string()),
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

fn decode_stream_event(value: &Value) -> ProviderResult<StreamChunkOutcome> {
    let event_type = value.get("type").and_then(Value::as_str).unwrap_or("");
    match event_type {
        "content-delta" => {
            let text = value
                .get("delta")
                .and_then(|d| d.get("message"))
                .and_then(|m| m.get("content"))
                .and_then(|c| c.get("text"))
                .and_then(Value::as_str)
                .map(|s| s.to_string());
            Ok(StreamChunkOutcome::Delta(DeltaEnvelope {
                index: 0,
                delta: Delta {
                    role: None,
                    content: text,
                    tool_calls: None,
                },
                finish_reason: None,
                error: None,
            }))
        }
        "message-end" => {
            let finish_reason = value
                .get("delta")
                .and_then(|d| d.get("finish_reason"))
                .and_then(Value::as_str)
                .map(|s| s.to_string());
            Ok(StreamChunkOutcome::Delta(DeltaEnvelope {
                index: 0,
                delta: Delta::default(),
                finish_reason: Some(finish_reason.unwrap_or_else(|| "complete".to_string())),
                error: None,
            }))
        }
        _ => Ok(StreamChunkOutcome::Incomplete),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_basic_response() {
        let value = json!({
            "id": "abc",
            "message": {"role": "assistant", "content": [{"type": "text", "text": "hi"}]},
            "finish_reason": "COMPLETE",
            "usage": {"billed_units": {"input_tokens": 3.0, "output_tokens": 2.0}}
        });
        let resp = decode_chat_response(&value).unwrap();
        assert_eq!(resp.choices[0].message.content.as_deref(), Some("hi"));
        assert_eq!(resp.usage.total_tokens, 5);
    }
}
