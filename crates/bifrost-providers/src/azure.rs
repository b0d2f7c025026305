//! Azure OpenAI adapter — spec.md §4.6. Azure deployments are named
//! independently of the model id, and the API version is pinned per
//! resource, so both travel on the [`Key`] record
//! (`azure_deployments`, `azure_api_version`) rather than as adapter
//! constants.

use async_trait::async_trait;
use bytes::Bytes;

use bifrost_protocol::{NormalizedRequest, NormalizedResponse};
use bifrost_provider_core::{
    HttpMethod, HttpRequest, HttpResponse, Key, MetaConfig, NetworkConfig, ProviderAdapter,
    ProviderError, ProviderResult, StreamChunkOutcome, UpstreamError, header_set,
};

use crate::openai::{decode_chat_completion, decode_chat_completion_chunk, translate_openai_style_error};

const DEFAULT_API_VERSION: &str = "2024-06-01";

pub struct AzureAdapter;

impl AzureAdapter {
    pub fn new() -> Self {
        Self
    }
}

impl Default for AzureAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProviderAdapter for AzureAdapter {
    fn name(&self) -> &str {
        "azure"
    }

    async fn build_request(
        &self,
        req: &NormalizedRequest,
        key: &Key,
        network: &NetworkConfig,
        _meta: &MetaConfig,
    ) -> ProviderResult<HttpRequest> {
        let base = network
            .base_url
            .as_deref()
            .ok_or_else(|| ProviderError::InvalidConfig("azure requires network_config.base_url".into()))?;
        let deployment = key
            .azure_deployments
            .get(&req.model)
            .cloned()
            .unwrap_or_else(|| req.model.clone());
        let api_version = key.azure_api_version.clone().unwrap_or_else(|| DEFAULT_API_VERSION.to_string());

        let body = crate::openai::build_chat_body(req)?;
        let bytes = serde_json::to_vec(&body).map_err(|e| ProviderError::Other(e.to_string()))?;

        let mut headers = bifrost_provider_core::Headers::new();
        header_set(&mut headers, "content-type", "application/json");
        header_set(&mut headers, "api-key", key.resolved_value());

        let base = base.trim_end_matches('/');
        let url = format!(
            "{base}/openai/deployments/{deployment}/chat/completions?api-version={api_version}"
        );

        Ok(HttpRequest {
            method: HttpMethod::Post,
            url,
            headers,
            body: Some(Bytes::from(bytes)),
            is_stream: req.params.stream,
        })
    }

    fn parse_response(&self, response: &HttpResponse) -> ProviderResult<NormalizedResponse> {
        let value: serde_json::Value = serde_json::from_slice(&response.body)
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

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn falls_back_to_model_name_when_no_deployment_mapping() {
        let mut deployments = HashMap::new();
        deployments.insert("gpt-4o".to_string(), "my-gpt4o-deployment".to_string());
        let key = Key {
            value: "secret".into(),
            models: vec![],
            weight: 1.0,
            azure_deployments: deployments,
            azure_api_version: None,
            vertex_credentials: None,
            region: None,
        };
        assert_eq!(key.azure_deployments.get("gpt-4o").unwrap(), "my-gpt4o-deployment");
        assert!(key.azure_deployments.get("other-model").is_none());
    }
}
