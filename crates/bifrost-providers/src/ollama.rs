//! Ollama adapter — spec.md §4.6. A local server, so it speaks its own
//! `/api/chat` NDJSON shape rather than the OpenAI-compatible surface Ollama
//! also exposes; no credential is required, but one is still carried through
//! as an optional bearer token for proxied/authenticated Ollama deployments.

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

use crate::common::{content_to_value, role_str};

const DEFAULT_BASE_URL: &str = "http://localhost:11434";

pub struct OllamaAdapter;

impl OllamaAdapter {
    pub fn new() -> Self {
        Self
    }

    fn build_body(&self, req: &NormalizedRequest) -> ProviderResult<Value> {
        let messages = crate::common::messages(req)
            .ok_or_else(|| ProviderError::InvalidConfig("ollama requires a message list".into()))?;
        let rendered: Vec<Value> = messages
            .iter()
            .map(|m| json!({"role": role_str(m.role), "content": content_to_value(&m.content)}))
            .collect();

        let mut options = Map::new();
        if let Some(t) = req.params.temperature {
            options.insert("temperature".to_string(), json!(t));
        }
        if let Some(p) = req.params.top_p {
            options.insert("top_p".to_string(), json!(p));
        }
        if let Some(mt) = req.params.max_tokens {
            options.insert("num_predict".to_string(), json!(mt));
        }
        if let Some(stop) = &req.params.stop {
            options.insert("stop".to_string(), json!(stop));
        }

        let mut body = Map::new();
        body.insert("model".to_string(), Value::String(req.model.clone()));
        body.insert("messages".to_string(), Value::Array(rendered));
        body.insert("stream".to_string(), Value::Bool(req.params.stream));
        if !options.is_empty() {
            body.insert("options".to_string(), Value::Object(options));
        }
        Ok(Value::Object(body))
    }
}

impl Default for OllamaAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProviderAdapter for OllamaAdapter {
    fn name(&self) -> &str {
        "ollama"
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
        let token = key.resolved_value();
        if !token.is_empty() {
            header_set(&mut headers, "authorization", format!("Bearer {token}"));
        }

        Ok(HttpRequest {
            method: HttpMethod::Post,
            url: format!("{base}/api/chat"),
            headers,
            body: Some(Bytes::from(bytes)),
            is_stream: req.params.stream,
        })
    }

    fn parse_response(&self, response: &HttpResponse) -> ProviderResult<NormalizedResponse> {
        let value: Value = serde_json::from_slice(&response.body)
            .map_err(|e| ProviderError::MalformedResponse(e.to_string()))?;
        decode_chat_line(&value, true)
    }

    fn parse_stream_chunk(&self, chunk: &Bytes) -> ProviderResult<StreamChunkOutcome> {
        let text = std::str::from_utf8(chunk).map_err(|e| ProviderError::MalformedResponse(e.to_string()))?;
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Ok(StreamChunkOutcome::Incomplete);
        }
        let value: Value =
            serde_json::from_str(trimmed).map_err(|e| ProviderError::MalformedResponse(e.to_string()))?;
        let done = value.get("done").and_then(Value::as_bool).unwrap_or(false);
        let content = value
            .get("message")
            .and_then(|m| m.get("content"))
            .and_then(Value::as_str)
            .map(|s| s.to_string());
        Ok(StreamChunkOutcome::Delta(DeltaEnvelope {
            index: 0,
            delta: Delta {
                role: None,
                content,
                tool_calls: None,
            },
            finish_reason: if done { Some("stop".to_string()) } else { None },
            error: None,
        }))
    }

    fn translate_http_error(&self, response: &HttpResponse) -> UpstreamError {
        let parsed: Option<Value> = serde_json::from_slice(&response.body).ok();
        let message = parsed
            .as_ref()
            .and_then(|v| v.get("error"))
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

fn decode_chat_line(value: &Value, terminal: bool) -> ProviderResult<NormalizedResponse> {
    let model = value.get("model").and_then(Value::as_str).unwrap_or_default().to_string();
    let content = value
        .get("message")
        .and_then(|m| m.get("content"))
        .and_then(Value::as_str)
        .map(|s| s.to_string());
    let prompt_tokens = value.get("prompt_eval_count").and_then(Value::as_u64).unwrap_or(0) as u32;
    let completion_tokens = value.get("eval_count").and_then(Value::as_u64).unwrap_or(0) as u32;

    Ok(NormalizedResponse {
        id: String::new(),
        object: "chat.completion".to_string(),
        model,
        choices: vec![Choice {
            index: 0,
            message: ResponseMessage {
                role: Some(Role::Assistant),
                content,
                tool_calls: None,
            },
            finish_reason: terminal.then(|| "stop".to_string()),
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_non_streaming_response() {
        let value = json!({
            "model": "llama3",
            "message": {"role": "assistant", "content": "hi"},
            "done": true,
            "prompt_eval_count": 5,
            "eval_count": 2
        });
        let resp = decode_chat_line(&value, true).unwrap();
        assert_eq!(resp.choices[0].message.content.as_deref(), Some("hi"));
        assert_eq!(resp.usage.total_tokens, 7);
    }
}
