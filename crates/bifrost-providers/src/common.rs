//! Shared request/response shaping helpers used by more than one adapter.
//!
//! `serde_json`'s `preserve_order` feature (set workspace-wide in the root
//! `Cargo.toml`) backs `serde_json::Map` with an order-preserving map, so
//! converting an [`OpaqueJson`] blob to a `Value` for embedding in a larger
//! vendor body keeps the original key order intact end-to-end — the same
//! guarantee `OpaqueJson` documents at the type level, just crossed through
//! `Value` once instead of carried as raw bytes all the way out.

use bifrost_protocol::{ContentPart, Message, MessageContent, NormalizedRequest, Role, Tool};
use bifrost_provider_core::ProviderResult;
use serde_json::{Map, Value, json};

pub fn role_str(role: Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    }
}

pub fn content_to_value(content: &MessageContent) -> Value {
    match content {
        MessageContent::Text(text) => Value::String(text.clone()),
        MessageContent::Parts(parts) => Value::Array(parts.iter().map(part_to_value).collect()),
    }
}

fn part_to_value(part: &ContentPart) -> Value {
    match part {
        ContentPart::Text { text } => json!({"type": "text", "text": text}),
        ContentPart::ImageUrl { image_url } => {
            json!({"type": "image_url", "image_url": {"url": image_url}})
        }
        ContentPart::ImageBase64 {
            image_base64,
            mime_type,
        } => {
            let mime = mime_type.clone().unwrap_or_else(|| "image/png".to_string());
            json!({
                "type": "image_url",
                "image_url": {"url": format!("data:{mime};base64,{image_base64}")}
            })
        }
        ContentPart::Audio { audio_base64, format } => {
            json!({
                "type": "input_audio",
                "input_audio": {"data": audio_base64, "format": format.clone().unwrap_or_else(|| "wav".to_string())}
            })
        }
    }
}

pub fn messages_to_openai_json(messages: &[Message]) -> Vec<Value> {
    messages
        .iter()
        .map(|m| {
            let mut obj = Map::new();
            obj.insert("role".to_string(), Value::String(role_str(m.role).to_string()));
            obj.insert("content".to_string(), content_to_value(&m.content));
            if let Some(name) = &m.name {
                obj.insert("name".to_string(), Value::String(name.clone()));
            }
            if let Some(tool_call_id) = &m.tool_call_id {
                obj.insert("tool_call_id".to_string(), Value::String(tool_call_id.clone()));
            }
            Value::Object(obj)
        })
        .collect()
}

/// Renders `tools` into the OpenAI `{"type":"function","function":{...}}`
/// shape. `parameters` is passed through as an opaque, order-preserved blob
/// (spec.md §4.6/§9) — never touched field-by-field.
pub fn tools_to_openai_json(tools: &[Tool]) -> ProviderResult<Vec<Value>> {
    tools
        .iter()
        .map(|Tool::Function { function }| {
            let mut func = Map::new();
            func.insert("name".to_string(), Value::String(function.name.clone()));
            if let Some(desc) = &function.description {
                func.insert("description".to_string(), Value::String(desc.clone()));
            }
            if let Some(params) = &function.parameters {
                let value: Value = serde_json::from_str(params.as_str())
                    .map_err(|e| bifrost_provider_core::ProviderError::MalformedResponse(e.to_string()))?;
                func.insert("parameters".to_string(), value);
            }
            Ok(json!({"type": "function", "function": func}))
        })
        .collect()
}

/// Renders `tools` into Anthropic's `{"name","description","input_schema"}`
/// shape (no `type`/`function` wrapper).
pub fn tools_to_anthropic_json(tools: &[Tool]) -> ProviderResult<Vec<Value>> {
    tools
        .iter()
        .map(|Tool::Function { function }| {
            let mut obj = Map::new();
            obj.insert("name".to_string(), Value::String(function.name.clone()));
            if let Some(desc) = &function.description {
                obj.insert("description".to_string(), Value::String(desc.clone()));
            }
            if let Some(params) = &function.parameters {
                let value: Value = serde_json::from_str(params.as_str())
                    .map_err(|e| bifrost_provider_core::ProviderError::MalformedResponse(e.to_string()))?;
                obj.insert("input_schema".to_string(), value);
            }
            Ok(Value::Object(obj))
        })
        .collect()
}

pub fn base_url_or<'a>(network_base: &'a Option<String>, default: &'a str) -> &'a str {
    network_base.as_deref().unwrap_or(default)
}

pub fn plain_text_prompt(req: &NormalizedRequest) -> Option<&str> {
    match &req.input {
        bifrost_protocol::Input::PlainText(text) => Some(text.as_str()),
        _ => None,
    }
}

pub fn messages(req: &NormalizedRequest) -> Option<&[Message]> {
    match &req.input {
        bifrost_protocol::Input::Messages(messages) => Some(messages),
        _ => None,
    }
}
