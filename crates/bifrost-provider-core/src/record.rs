use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use bifrost_common::resolve_env_indirection;

/// spec.md §3 "Key": a credential record for a provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Key {
    pub value: String,
    /// Models this key is restricted to. Empty means "any model not claimed
    /// by a more specific key" (spec.md §3 "Key Selection Invariant").
    #[serde(default)]
    pub models: Vec<String>,
    /// Weight in `(0, 1]`. Zero-weight keys are never selected.
    pub weight: f64,
    /// Vendor-specific extras (`azure_deployments`, `vertex_credentials`, ...).
    #[serde(default)]
    pub azure_deployments: HashMap<String, String>,
    #[serde(default)]
    pub azure_api_version: Option<String>,
    /// Vertex credentials: either an inline JSON object or an `env.NAME`
    /// reference (spec.md §4.6).
    #[serde(default)]
    pub vertex_credentials: Option<String>,
    /// Bedrock region; mandatory for that provider (spec.md §4.6/§6).
    #[serde(default)]
    pub region: Option<String>,
}

impl Key {
    /// Resolves `value` through spec.md §6's `env.NAME` indirection.
    pub fn resolved_value(&self) -> String {
        resolve_env_indirection(&self.value).into_owned()
    }

    /// spec.md §3: "a request specifies model M ... only such keys are
    /// candidates; otherwise keys with an empty model list are candidates."
    pub fn matches_model(&self, model: &str) -> bool {
        self.models.iter().any(|m| m == model)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProxyType {
    None,
    Http,
    Socks5,
    Environment,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    #[serde(rename = "type")]
    pub proxy_type: ProxyType,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            proxy_type: ProxyType::None,
            url: None,
            username: None,
            password: None,
        }
    }
}

/// spec.md §6 `network_config.*`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_request_timeout_secs")]
    pub default_request_timeout_in_seconds: u64,
    #[serde(default)]
    pub max_retries: u32,
    #[serde(default)]
    pub proxy_config: ProxyConfig,
}

fn default_request_timeout_secs() -> u64 {
    30
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            default_request_timeout_in_seconds: default_request_timeout_secs(),
            max_retries: 0,
            proxy_config: ProxyConfig::default(),
        }
    }
}

/// spec.md §6 `concurrency_and_buffer_size.*`; defaults match §6's Account
/// lookup interface defaults (5 / 100).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ConcurrencyConfig {
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
    /// If the queue is full: `true` drops with `queue_full`, `false` blocks
    /// the submitter until space frees up (spec.md §4.4).
    #[serde(default)]
    pub drop_excess_requests: bool,
}

fn default_concurrency() -> usize {
    5
}

fn default_buffer_size() -> usize {
    100
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            buffer_size: default_buffer_size(),
            drop_excess_requests: false,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetaConfig {
    /// Required for Bedrock (spec.md §4.6/§6).
    #[serde(default)]
    pub region: Option<String>,
    /// Set on "custom" providers (spec.md §4.6) to reuse a built-in adapter
    /// implementation with an overridden base URL.
    #[serde(default)]
    pub base_provider_type: Option<String>,
}

/// spec.md §3 "Provider Record".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderRecord {
    pub name: String,
    pub keys: Vec<Key>,
    #[serde(default)]
    pub network_config: NetworkConfig,
    #[serde(default)]
    pub concurrency_config: ConcurrencyConfig,
    #[serde(default)]
    pub proxy_config: ProxyConfig,
    #[serde(default)]
    pub meta_config: MetaConfig,
    #[serde(default)]
    pub send_back_raw_response: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_model_match_is_exact() {
        let key = Key {
            value: "sk".into(),
            models: vec!["gpt-4o".into()],
            weight: 1.0,
            azure_deployments: HashMap::new(),
            azure_api_version: None,
            vertex_credentials: None,
            region: None,
        };
        assert!(key.matches_model("gpt-4o"));
        assert!(!key.matches_model("gpt-4o-mini"));
    }
}
