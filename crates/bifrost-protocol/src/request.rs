use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::OpaqueJson;

/// spec.md §3 "Normalized Request" — `request_type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestType {
    TextCompletion,
    ChatCompletion,
    Responses,
    Embedding,
    Speech,
    Transcription,
    ImageGeneration,
    ImageEdit,
    ImageVariation,
}

/// spec.md §3 "Provider": closed enum + `custom`.
///
/// Serialized as a plain lowercase string (`"openai"`, `"bedrock"`, ...);
/// anything outside the known set round-trips as `Custom(name)` so that
/// spec.md §4.6's "custom providers with a `base_provider_type`" aren't
/// rejected by the wire format.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Provider {
    OpenAI,
    Anthropic,
    Bedrock,
    Azure,
    Vertex,
    Cohere,
    Ollama,
    Custom(String),
}

impl Provider {
    pub fn as_str(&self) -> &str {
        match self {
            Provider::OpenAI => "openai",
            Provider::Anthropic => "anthropic",
            Provider::Bedrock => "bedrock",
            Provider::Azure => "azure",
            Provider::Vertex => "vertex",
            Provider::Cohere => "cohere",
            Provider::Ollama => "ollama",
            Provider::Custom(name) => name,
        }
    }

    pub fn is_custom(&self) -> bool {
        matches!(self, Provider::Custom(_))
    }

    fn from_str(name: &str) -> Self {
        match name {
            "openai" => Provider::OpenAI,
            "anthropic" => Provider::Anthropic,
            "bedrock" => Provider::Bedrock,
            "azure" => Provider::Azure,
            "vertex" => Provider::Vertex,
            "cohere" => Provider::Cohere,
            "ollama" => Provider::Ollama,
            other => Provider::Custom(other.to_string()),
        }
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for Provider {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Provider {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Ok(Provider::from_str(&raw))
    }
}

/// An ordered `(provider, model)` pair — used both for the fallback list and
/// for `extra_fields.attempt_trail` entries (spec.md Glossary "Attempt trail").
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderModel {
    pub provider: Provider,
    pub model: String,
}

impl ProviderModel {
    pub fn new(provider: Provider, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// One part of a multi-part message `content` list (spec.md §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: String },
    ImageBase64 { image_base64: String, mime_type: Option<String> },
    Audio { audio_base64: String, format: Option<String> },
}

/// `content` is either a bare string or an ordered list of parts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: MessageContent,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Present on `role: tool` messages answering a prior tool call.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

/// A single embedding input item; providers differ on whether they accept
/// raw strings or pre-tokenized integer arrays, so both are represented.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EmbeddingItem {
    Text(String),
    Tokens(Vec<u32>),
}

/// One JSON-schema-shaped tool definition. `parameters` (and nested
/// `$defs`/`properties`/`items`) is carried as [`OpaqueJson`] per spec.md §4.6:
/// it must never round-trip through an unordered map on its way upstream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolFunction {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parameters: Option<OpaqueJson>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Tool {
    Function { function: ToolFunction },
}

/// The union of per-request-type inputs (spec.md §3 "input").
///
/// Invariant: exactly one variant is populated, and it must match
/// `request_type`; see [`NormalizedRequest::validate_shape`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Input {
    PlainText(String),
    Messages(Vec<Message>),
    Embedding(Vec<EmbeddingItem>),
    /// Binary audio payload for `speech`/`transcription`.
    Audio {
        audio_base64: String,
        format: Option<String>,
    },
    /// Prompt plus ordered image payloads for image edit/variation ops.
    PromptWithImages {
        prompt: Option<String>,
        images_base64: Vec<String>,
    },
}

/// The bag of tuning knobs (spec.md §3 "params"). Unknown keys pass through
/// verbatim via `extra` for forward-compatibility with provider-specific
/// knobs the core doesn't know about yet.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Params {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<Tool>>,
    /// Either a literal string (`"auto"`, `"none"`, `"required"`) or a
    /// provider-specific object naming a tool; left as a generic value since
    /// spec.md doesn't normalize its shape.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<JsonValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_format: Option<OpaqueJson>,
    #[serde(default)]
    pub stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream_format: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, JsonValue>,
}

/// spec.md §3 "Normalized Request" — the canonical dispatch input.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizedRequest {
    pub request_type: RequestType,
    pub provider: Provider,
    pub model: String,
    pub input: Input,
    #[serde(default)]
    pub params: Params,
    #[serde(default)]
    pub fallbacks: Vec<ProviderModel>,
    #[serde(default)]
    pub send_back_raw_request: bool,
    #[serde(default)]
    pub send_back_raw_response: bool,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ShapeError {
    #[error("input variant does not match request_type {0:?}")]
    InputMismatch(RequestType),
}

impl NormalizedRequest {
    /// spec.md §3 invariant: "exactly one input variant is present and
    /// matches `request_type`".
    pub fn validate_shape(&self) -> Result<(), ShapeError> {
        let ok = match (&self.request_type, &self.input) {
            (RequestType::TextCompletion, Input::PlainText(_)) => true,
            (RequestType::ChatCompletion, Input::Messages(_)) => true,
            (RequestType::Responses, Input::Messages(_)) => true,
            (RequestType::Embedding, Input::Embedding(_)) => true,
            (RequestType::Speech, Input::PlainText(_)) => true,
            (RequestType::Transcription, Input::Audio { .. }) => true,
            (RequestType::ImageGeneration, Input::PlainText(_)) => true,
            (RequestType::ImageGeneration, Input::PromptWithImages { .. }) => true,
            (RequestType::ImageEdit, Input::PromptWithImages { .. }) => true,
            (RequestType::ImageVariation, Input::PromptWithImages { .. }) => true,
            _ => false,
        };
        if ok {
            Ok(())
        } else {
            Err(ShapeError::InputMismatch(self.request_type))
        }
    }

    /// Primary attempt plus the ordered fallback list, as the Fallback
    /// Controller (spec.md §4.3) consumes it.
    pub fn attempt_order(&self) -> Vec<ProviderModel> {
        let mut attempts = Vec::with_capacity(1 + self.fallbacks.len());
        attempts.push(ProviderModel::new(self.provider.clone(), self.model.clone()));
        attempts.extend(self.fallbacks.iter().cloned());
        attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_chat_request() -> NormalizedRequest {
        NormalizedRequest {
            request_type: RequestType::ChatCompletion,
            provider: Provider::OpenAI,
            model: "gpt-4o-mini".to_string(),
            input: Input::Messages(vec![Message {
                role: Role::User,
                content: MessageContent::Text("hi".to_string()),
                name: None,
                tool_call_id: None,
            }]),
            params: Params::default(),
            fallbacks: vec![],
            send_back_raw_request: false,
            send_back_raw_response: false,
        }
    }

    #[test]
    fn shape_matches_for_chat_completion() {
        assert!(base_chat_request().validate_shape().is_ok());
    }

    #[test]
    fn shape_mismatch_is_rejected() {
        let mut req = base_chat_request();
        req.input = Input::PlainText("hi".to_string());
        assert_eq!(
            req.validate_shape(),
            Err(ShapeError::InputMismatch(RequestType::ChatCompletion))
        );
    }

    #[test]
    fn attempt_order_puts_primary_first() {
        let mut req = base_chat_request();
        req.fallbacks = vec![ProviderModel::new(Provider::Anthropic, "claude-3-sonnet")];
        let attempts = req.attempt_order();
        assert_eq!(attempts[0].provider, Provider::OpenAI);
        assert_eq!(attempts[1].provider, Provider::Anthropic);
    }
}
