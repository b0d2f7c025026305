//! Vertex AI adapter — spec.md §4.6. Credentials are either an inline
//! service-account JSON object or an `env.NAME` indirection resolved via
//! [`bifrost_common::resolve_env_indirection`]; either way they're exchanged
//! for a bearer token through [`crate::vertex_oauth`].

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

use crate::common::content_to_value;
use crate::vertex_oauth::{fetch_access_token, parse_service_account};

const DEFAULT_LOCATION: &str = "us-central1";

pub struct VertexAdapter;

impl VertexAdapter {
    pub fn new() -> Self {
        Self
    }

    fn build_body(&self, req: &NormalizedRequest) -> ProviderResult<Value> {
        let messages = crate::common::messages(req)
            .ok_or_else(|| ProviderError::InvalidConfig("vertex requires a message list".into()))?;

        let mut system_instruction = None;
        let mut contents = Vec::with_capacity(messages.len());
        for m in messages {
            if m.role == Role::System {
                system_instruction = Some(json!({"parts": [content_to_value(&m.content)]}));
                continue;
            }
            let role = match m.role {
                Role::Assistant => "model",
                _ => "user",
            };
            contents.push(json!({
                "role": role,
                "parts": [{"text": plain_text(&m.content)}],
            }));
        }

        let mut generation_config = Map::new();
        if let Some(t) = req.params.temperature {
            generation_config.insert("temperature".to_string(), json!(t));
        }
        if let Some(p) = req.params.top_p {
            generation_config.insert("topP".to_string(), json!(p));
        }
        if let Some(mt) = req.params.max_tokens {
            generation_config.insert("maxOutputTokens".to_string(), json!(mt));
        }
        if let Some(stop) = &req.params.stop {
            generation_config.insert("stopSequences".to_string(), json!(stop));
        }

        let mut body = Map::new();
        body.insert("contents".to_string(), Value::Array(contents));
        if let Some(sys) = system_instruction {
            body.insert("systemInstruction".to_string(), sys);
        }
        if !generation_config.is_empty() {
            body.insert("generationConfig".to_string(), Value::Object(generation_config));
        }
        Ok(Value::Object(body))
    }
}

fn plain_text(content: &bifrost_protocol::MessageContent) -> String {
    match content {
        bifrost_protocol::MessageContent::Text(text) => text.clone(),
        bifrost_protocol::MessageContent::Parts(parts) => parts
            .iter()
            .filter_map(|p| match p {
                bifrost_protocol::ContentPart::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n"),
    }
}

impl Default for VertexAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProviderAdapter for VertexAdapter {
    fn name(&self) -> &str {
        "vertex"
    }

    async fn build_request(
        &self,
        req: &NormalizedRequest,
        key: &Key,
        network: &NetworkConfig,
        meta: &MetaConfig,
    ) -> ProviderResult<HttpRequest> {
        let credentials_raw = key
            .vertex_credentials
            .as_deref()
            .ok_or(ProviderError::MissingCredentialField("vertex_credentials"))?;
        let resolved = bifrost_common::resolve_env_indirection(credentials_raw);
        let account = parse_service_account(&resolved)?;
        let access_token = fetch_access_token(&account, false).await?;

        let location = meta.region.clone().unwrap_or_else(|| DEFAULT_LOCATION.to_string());
        let host = network
            .base_url
            .clone()
            .unwrap_or_else(|| format!("https://{location}-aiplatform.googleapis.com"));
        let op = if req.params.stream {
            "streamGenerateContent"
        } else {
            "generateContent"
        };
        let url = format!(
            "{host}/v1/projects/{}/locations/{location}/publishers/google/models/{}:{op}",
            account.project_id, req.model
        );

        let body = self.build_body(req)?;
        let bytes = serde_json::to_vec(&body).map_err(|e| ProviderError::Other(e.to_string()))?;

        let mut headers = bifrost_provider_core::Headers::new();
        header_set(&mut headers, "content-type", "application/json");
        header_set(&mut headers, "authorization", format!("Bearer {access_token}"));

        Ok(HttpRequest {
            method: HttpMethod::Post,
            url,
            headers,
            body: Some(Bytes::from(bytes)),
            is_stream: req.params.stream,
        })
    }

    fn parse_response(&self, response: &HttpResponse) -> ProviderResult<NormalizedResponse> {
        let value: Value = serde_json::from_slice(&response.body)
            .map_err(|e| ProviderError::MalformedResponse(e.to_string()))?;
        decode_generate_content(&value)
    }

    fn parse_stream_chunk(&self, chunk: &Bytes) -> ProviderResult<StreamChunkOutcome> {
        let text = std::str::from_utf8(chunk).map_err(|e| ProviderError::MalformedResponse(e.to_string()))?;
        let trimmed = text.trim().trim_start_matches(',').trim_start_matches('[').trim_end_matches(']');
        if trimmed.is_empty() {
            return Ok(StreamChunkOutcome::Incomplete);
        }
        let value: Value =
            serde_json::from_str(trimmed).map_err(|e| ProviderError::MalformedResponse(e.to_string()))?;
        decode_generate_content_chunk(&value)
    }

    fn translate_http_error(&self, response: &HttpResponse) -> UpstreamError {
        let parsed: Option<Value> = serde_json::from_slice(&response.body).ok();
        let message = parsed
            .as_ref()
            .and_then(|v| v.get("error"))
            .and_then(|e| e.get("message"))
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

fn decode_generate_content(value: &Value) -> ProviderResult<NormalizedResponse> {
    let candidates = value.get("candidates").and_then(Value::as_array).cloned().unwrap_or_default();
    let mut choices = Vec::with_capacity(candidates.len());
    for (i, candidate) in candidates.iter().enumerate() {
        choices.push(Choice {
            index: i as u32,
            message: decode_candidate_message(candidate),
            finish_reason: candidate
                .get("finishReason")
                .and_then(Value::as_str)
                .map(|s| s.to_string()),
        });
    }
    let usage_value = value.get("usageMetadata");
    let prompt_tokens = usage_value.and_then(|u| u.get("promptTokenCount")).and_then(Value::as_u64).unwrap_or(0) as u32;
    let completion_tokens = usage_value.and_then(|u| u.get("candidatesTokenCount")).and_then(Value::as_u64).unwrap_or(0) as u32;

    Ok(NormalizedResponse {
        id: String::new(),
        object: "chat.completion".to_string(),
        model: String::new(),
        choices,
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

fn decode_candidate_message(candidate: &Value) -> ResponseMessage {
    let text = candidate
        .get("content")
        .and_then(|c| c.get("parts"))
        .and_then(Value::as_array)
        .map(|parts| {
            parts
                .iter()
                .filter_map(|p| p.get("text").and_then(Value::as_str))
                .collect::<Vec<_>>()
                .join("")
        });
    ResponseMessage {
        role: Some(Role::Assistant),
        content: text.filter(|t| !t.is_empty()),
        tool_calls: None,
    }
}

fn decode_generate_content_chunk(value: &Value) -> ProviderResult<StreamChunkOutcome> {
    let candidate = value
        .get("candidates")
        .and_then(Value::as_array)
        .and_then(|c| c.first())
        .cloned()
        .unwrap_or(Value::Null);
    let content = candidate
        .get("content")
        .and_then(|c| c.get("parts"))
        .and_then(Value::as_array)
        .map(|parts| {
            parts
                .iter()
                .filter_map(|p| p.get("text").and_then(Value::as_str))
                .collect::<Vec<_>>()
                .join("")
        });
    let finish_reason = candidate.get("finishReason").and_then(Value::as_str).map(|s| s.to_string());
    Ok(StreamChunkOutcome::Delta(DeltaEnvelope {
        index: 0,
        delta: Delta {
            role: Some(Role::Assistant),
            content,
            tool_calls: None,
        },
        finish_reason,
        error: None,
    }))
}
