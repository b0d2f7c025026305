//! Custom provider adapter — spec.md §4.6 "custom providers with a
//! `base_provider_type`": a user-declared provider that speaks one of the
//! built-in wire shapes against an arbitrary `network_config.base_url`.
//! Today only `openai` is supported as a delegate shape — the common case
//! for self-hosted OpenAI-compatible gateways.

use async_trait::async_trait;
use bytes::Bytes;

use bifrost_protocol::{NormalizedRequest, NormalizedResponse};
use bifrost_provider_core::{
    HttpRequest, HttpResponse, Key, MetaConfig, NetworkConfig, ProviderAdapter, ProviderError,
    ProviderResult, StreamChunkOutcome, UpstreamError,
};

use crate::openai::OpenAiAdapter;

pub struct CustomAdapter {
    name: String,
    delegate: OpenAiAdapter,
}

impl CustomAdapter {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            delegate: OpenAiAdapter::new(),
        }
    }
}

#[async_trait]
impl ProviderAdapter for CustomAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    async fn build_request(
        &self,
        req: &NormalizedRequest,
        key: &Key,
        network: &NetworkConfig,
        meta: &MetaConfig,
    ) -> ProviderResult<HttpRequest> {
        if network.base_url.is_none() {
            return Err(ProviderError::InvalidConfig(
                "custom providers require network_config.base_url".into(),
            ));
        }
        match meta.base_provider_type.as_deref() {
            None | Some("openai") => self.delegate.build_request(req, key, network, meta).await,
            Some(_) => Err(ProviderError::Unsupported(
                "unsupported base_provider_type for custom provider",
            )),
        }
    }

    fn parse_response(&self, response: &HttpResponse) -> ProviderResult<NormalizedResponse> {
        self.delegate.parse_response(response)
    }

    fn parse_stream_chunk(&self, chunk: &Bytes) -> ProviderResult<StreamChunkOutcome> {
        self.delegate.parse_stream_chunk(chunk)
    }

    fn translate_http_error(&self, response: &HttpResponse) -> UpstreamError {
        self.delegate.translate_http_error(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn carries_the_configured_name() {
        let adapter = CustomAdapter::new("my-gateway");
        assert_eq!(adapter.name(), "my-gateway");
    }
}
