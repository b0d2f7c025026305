use async_trait::async_trait;
use bytes::Bytes;

use bifrost_protocol::{DeltaEnvelope, NormalizedRequest, NormalizedResponse};

use crate::errors::ProviderResult;
use crate::http::{HttpRequest, HttpResponse, UpstreamError};
use crate::record::{Key, MetaConfig, NetworkConfig};

/// Outcome of decoding one raw stream chunk (spec.md §4.6 `parse_stream_chunk`).
#[derive(Debug, Clone)]
pub enum StreamChunkOutcome {
    /// A decoded delta to forward through the post-hook chain.
    Delta(DeltaEnvelope),
    /// The upstream stream's terminal sentinel; no delta carried (some
    /// vendors emit a bare `[DONE]`/empty terminal frame).
    Done,
    /// Not enough bytes yet to decode a full frame (e.g. a partial SSE
    /// event split across reads); the caller should buffer and retry once
    /// more bytes arrive.
    Incomplete,
}

/// spec.md §4.6 "Provider Adapter" — per-vendor translator.
///
/// One implementation per vendor lives in `bifrost-providers`. Adapters do
/// not perform I/O themselves; the Worker Pool (`bifrost-core::pool`) owns
/// the HTTP call and hands adapters only request/response bytes.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// The provider name this adapter answers to (spec.md §3 `Provider`).
    /// Built-in adapters return a literal; `CustomAdapter` (bifrost-providers)
    /// returns the name the operator configured for that custom provider.
    fn name(&self) -> &str;

    /// Builds the vendor HTTP request for `req` using `key` for
    /// authentication. Implementations MUST treat
    /// `req.params.tools[*].function.parameters` (and any other
    /// `OpaqueJson` field) as an opaque blob — see spec.md §4.6/§9.
    async fn build_request(
        &self,
        req: &NormalizedRequest,
        key: &Key,
        network: &NetworkConfig,
        meta: &MetaConfig,
    ) -> ProviderResult<HttpRequest>;

    /// Decodes a complete (non-streaming) upstream HTTP response into the
    /// normalized shape.
    fn parse_response(&self, response: &HttpResponse) -> ProviderResult<NormalizedResponse>;

    /// Decodes one raw chunk of a streaming upstream body (spec.md §4.7).
    /// Adapters that buffer partial frames internally should be
    /// constructed fresh per request (no shared mutable state across
    /// concurrent streams).
    fn parse_stream_chunk(&self, chunk: &Bytes) -> ProviderResult<StreamChunkOutcome>;

    /// spec.md §4.6 "Error translation": maps a non-2xx upstream response to
    /// the fixed `{status_code, type, code, message}` shape. The default
    /// passes the status through with a generic `type`/`code`; vendors with
    /// richer error bodies should override this.
    fn translate_http_error(&self, response: &HttpResponse) -> UpstreamError {
        UpstreamError {
            status_code: response.status,
            error_type: "upstream".to_string(),
            code: format!("http_{}", response.status),
            message: String::from_utf8_lossy(&response.body).to_string(),
        }
    }
}
