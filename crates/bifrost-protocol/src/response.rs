use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::request::{Provider, Role};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    /// Arguments as emitted by the provider; kept opaque for the same reason
    /// request-side tool `parameters` are (spec.md §4.6/§9).
    pub arguments_json: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResponseMessage {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Choice {
    pub index: u32,
    pub message: ResponseMessage,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
}

/// spec.md Glossary "Attempt trail" — one entry per attempt, surfaced both on
/// successful recovered responses (for observability, spec.md §7) and on the
/// terminal error (spec.md §6 error envelope).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttemptTrailEntry {
    pub provider: Provider,
    pub model: String,
    pub outcome: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtraFields {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<Provider>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attempt_trail: Vec<AttemptTrailEntry>,
    #[serde(flatten)]
    pub other: serde_json::Map<String, JsonValue>,
}

/// spec.md §3 "Normalized Response".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizedResponse {
    pub id: String,
    pub object: String,
    pub model: String,
    pub choices: Vec<Choice>,
    pub usage: Usage,
    #[serde(default)]
    pub extra_fields: ExtraFields,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_request: Option<JsonValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_response: Option<JsonValue>,
}

/// spec.md §6 "Delta envelope" — one incremental streaming fragment.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Delta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeltaEnvelope {
    pub index: u32,
    pub delta: Delta,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
    /// spec.md §4.7 point 4: "On upstream error mid-stream, emits a terminal
    /// delta carrying the error and closes the channel." `None` for every
    /// ordinary delta.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorEnvelope>,
}

impl DeltaEnvelope {
    /// spec.md §3: terminal is a delta with `finish_reason != null`, followed
    /// by channel close. A mid-stream error delta is also terminal.
    pub fn is_terminal(&self) -> bool {
        self.finish_reason.is_some() || self.error.is_some()
    }

    pub fn error(index: u32, error: ErrorEnvelope) -> Self {
        Self {
            index,
            delta: Delta::default(),
            finish_reason: None,
            error: Some(error),
        }
    }
}

/// spec.md §6 "Error envelope" / §7 error taxonomy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    pub status_code: u16,
    #[serde(rename = "type")]
    pub error_type: String,
    pub code: String,
    pub message: String,
    pub is_bifrost_error: bool,
    pub allow_fallbacks: bool,
    #[serde(default)]
    pub extra_fields: ExtraFields,
}

impl ErrorEnvelope {
    pub fn push_attempt(&mut self, entry: AttemptTrailEntry) {
        self.extra_fields.attempt_trail.push(entry);
    }
}
