use bifrost_protocol::{AttemptTrailEntry, NormalizedRequest, ProviderModel};

use crate::context::RequestContext;
use crate::errors::BifrostError;
use crate::pool::DispatchOutcome;
use crate::registry::ProviderRegistry;

/// One attempt's trail entry plus whatever trail preceded it — returned
/// alongside both the success and failure paths so the Dispatcher can attach
/// it to the final response/error (spec.md §6 `extra_fields.attempt_trail`).
pub type Trail = Vec<AttemptTrailEntry>;

/// spec.md §4.3 "Fallback Controller".
///
/// Stateless over `registry`: orchestrates the primary attempt then each
/// fallback in order, stopping at the first success or the first
/// non-retryable error, per the spec.md §7 taxonomy encoded on
/// [`BifrostError::allow_fallbacks`]. Does not run plugin post-hooks itself —
/// that is the Dispatcher's job once an attempt chain resolves (spec.md
/// §4.1: "Fallback Controller -> (repeat) -> Client" happens *before* the
/// post-hook unwind in the flow diagram, but both unary post-hooks and the
/// per-delta streaming post-hooks need the Dispatcher's `executed` count,
/// which this type has no reason to know).
pub struct FallbackController<'a> {
    registry: &'a ProviderRegistry,
}

impl<'a> FallbackController<'a> {
    pub fn new(registry: &'a ProviderRegistry) -> Self {
        Self { registry }
    }

    /// Drives `attempts` in order (primary first). `base_ctx` is stamped with
    /// `attempt_index`/`is_fallback` per spec.md §4.8 for each attempt via
    /// [`RequestContext::for_attempt`].
    pub async fn dispatch(
        &self,
        base_ctx: &RequestContext,
        req: &NormalizedRequest,
        attempts: &[ProviderModel],
    ) -> Result<(DispatchOutcome, Trail), (BifrostError, Trail)> {
        let mut trail: Trail = Vec::new();
        let mut first_error: Option<BifrostError> = None;

        for (idx, attempt) in attempts.iter().enumerate() {
            // spec.md §4.3 point 1.
            if base_ctx.is_canceled() {
                return Err((BifrostError::Canceled, trail));
            }
            if base_ctx.is_expired() {
                return Err((BifrostError::DeadlineExceeded, trail));
            }

            let ctx = base_ctx.for_attempt(idx as u32, idx > 0);

            // spec.md §4.3 point 2: "Look up the Provider Record; if
            // missing/disabled, record and continue to next."
            let Some(runtime) = self.registry.get(attempt.provider.as_str()) else {
                trail.push(AttemptTrailEntry {
                    provider: attempt.provider.clone(),
                    model: attempt.model.clone(),
                    outcome: "provider_not_found".to_string(),
                });
                first_error.get_or_insert(BifrostError::NoProviders);
                continue;
            };

            let mut attempt_req = req.clone();
            attempt_req.provider = attempt.provider.clone();
            attempt_req.model = attempt.model.clone();

            // spec.md §4.3 point 3: "Enqueue ... await either response,
            // stream channel, or error."
            let outcome = match runtime.pool.submit(attempt_req, ctx).await {
                Ok(rx) => rx.await.unwrap_or(Err(BifrostError::Canceled)),
                Err(err) => Err(err),
            };

            match outcome {
                Ok(mut dispatch_outcome) => {
                    trail.push(AttemptTrailEntry {
                        provider: attempt.provider.clone(),
                        model: attempt.model.clone(),
                        outcome: "success".to_string(),
                    });
                    if let DispatchOutcome::Response(resp) = &mut dispatch_outcome {
                        resp.extra_fields.provider = Some(attempt.provider.clone());
                        resp.extra_fields.model = Some(attempt.model.clone());
                    }
                    return Ok((dispatch_outcome, trail));
                }
                Err(err) => {
                    trail.push(AttemptTrailEntry {
                        provider: attempt.provider.clone(),
                        model: attempt.model.clone(),
                        outcome: err.code().to_string(),
                    });
                    // spec.md §4.3 point 5: "allow_fallbacks = false -> stop,
                    // return error."
                    if !err.allow_fallbacks() {
                        return Err((err, trail));
                    }
                    first_error.get_or_insert(err);
                }
            }
        }

        // spec.md §4.3 point 6 / §7: "return the *first* error encountered,
        // annotated with the full attempt trail."
        Err((first_error.unwrap_or(BifrostError::NoProviders), trail))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bifrost_protocol::{Input, Message, MessageContent, Params, Provider, RequestType, Role};
    use bifrost_provider_core::{AdapterRegistry, ConcurrencyConfig, ProviderRecord};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn sample_request(provider: Provider) -> NormalizedRequest {
        NormalizedRequest {
            request_type: RequestType::ChatCompletion,
            provider,
            model: "m".into(),
            input: Input::Messages(vec![Message {
                role: Role::User,
                content: MessageContent::Text("hi".into()),
                name: None,
                tool_call_id: None,
            }]),
            params: Params::default(),
            fallbacks: vec![],
            send_back_raw_request: false,
            send_back_raw_response: false,
        }
    }

    struct CountingHttp {
        openai_calls: Arc<AtomicUsize>,
        anthropic_calls: Arc<AtomicUsize>,
    }

    #[async_trait::async_trait]
    impl crate::http_client::HttpClient for CountingHttp {
        async fn send(
            &self,
            req: &bifrost_provider_core::HttpRequest,
            _timeout: std::time::Duration,
            _proxy: &bifrost_provider_core::ProxyConfig,
        ) -> Result<bifrost_provider_core::HttpResponse, bifrost_provider_core::UpstreamError> {
            if req.url.contains("anthropic") {
                self.anthropic_calls.fetch_add(1, Ordering::SeqCst);
                return Ok(bifrost_provider_core::HttpResponse {
                    status: 200,
                    headers: vec![],
                    body: bytes::Bytes::from_static(
                        br#"{"id":"1","model":"claude","content":[{"type":"text","text":"hi"}],"usage":{"input_tokens":1,"output_tokens":1}}"#,
                    ),
                });
            }
            self.openai_calls.fetch_add(1, Ordering::SeqCst);
            Ok(bifrost_provider_core::HttpResponse {
                status: 503,
                headers: vec![],
                body: bytes::Bytes::from_static(b"service unavailable"),
            })
        }

        async fn send_stream(
            &self,
            _req: &bifrost_provider_core::HttpRequest,
            _idle_timeout: std::time::Duration,
            _proxy: &bifrost_provider_core::ProxyConfig,
        ) -> Result<crate::http_client::ChunkStream, bifrost_provider_core::UpstreamError> {
            let (_tx, rx) = tokio::sync::mpsc::channel(1);
            Ok(rx)
        }
    }

    fn provider_record(name: &str) -> ProviderRecord {
        ProviderRecord {
            name: name.to_string(),
            keys: vec![bifrost_provider_core::Key {
                value: "k".into(),
                models: vec![],
                weight: 1.0,
                azure_deployments: Default::default(),
                azure_api_version: None,
                vertex_credentials: None,
                region: None,
            }],
            network_config: Default::default(),
            concurrency_config: Default::default(),
            proxy_config: Default::default(),
            meta_config: Default::default(),
            send_back_raw_response: false,
        }
    }

    #[tokio::test]
    async fn falls_back_to_the_next_provider_on_a_5xx() {
        let mut adapters = AdapterRegistry::new();
        bifrost_providers::install_builtin_adapters(&mut adapters);
        let openai_calls = Arc::new(AtomicUsize::new(0));
        let anthropic_calls = Arc::new(AtomicUsize::new(0));
        let http = Arc::new(CountingHttp {
            openai_calls: openai_calls.clone(),
            anthropic_calls: anthropic_calls.clone(),
        });
        let registry = ProviderRegistry::new(adapters, http);
        registry
            .reload_provider("openai", provider_record("openai"), vec![], ConcurrencyConfig::default())
            .await
            .unwrap();
        registry
            .reload_provider(
                "anthropic",
                provider_record("anthropic"),
                vec![],
                ConcurrencyConfig::default(),
            )
            .await
            .unwrap();

        let fallback = FallbackController::new(&registry);
        let ctx = RequestContext::new();
        let req = sample_request(Provider::OpenAI);
        let attempts = vec![
            ProviderModel::new(Provider::OpenAI, "gpt-4"),
            ProviderModel::new(Provider::Anthropic, "claude-3-sonnet"),
        ];

        let (outcome, trail) = fallback.dispatch(&ctx, &req, &attempts).await.unwrap();
        let DispatchOutcome::Response(resp) = outcome else {
            panic!("expected a response");
        };
        assert_eq!(resp.extra_fields.provider, Some(Provider::Anthropic));
        assert_eq!(trail.len(), 2);
        assert_eq!(trail[0].outcome, "upstream_5xx");
        assert_eq!(trail[1].outcome, "success");
        assert_eq!(openai_calls.load(Ordering::SeqCst), 1);
        assert_eq!(anthropic_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn missing_provider_is_recorded_and_skipped() {
        let adapters = AdapterRegistry::new();
        let http = Arc::new(CountingHttp {
            openai_calls: Arc::new(AtomicUsize::new(0)),
            anthropic_calls: Arc::new(AtomicUsize::new(0)),
        });
        let registry = ProviderRegistry::new(adapters, http);
        let fallback = FallbackController::new(&registry);
        let ctx = RequestContext::new();
        let req = sample_request(Provider::OpenAI);
        let attempts = vec![ProviderModel::new(Provider::OpenAI, "gpt-4")];

        let (err, trail) = fallback.dispatch(&ctx, &req, &attempts).await.unwrap_err();
        assert!(matches!(err, BifrostError::NoProviders));
        assert_eq!(trail[0].outcome, "provider_not_found");
    }

    #[tokio::test]
    async fn canceled_context_short_circuits_before_any_attempt() {
        let adapters = AdapterRegistry::new();
        let http = Arc::new(CountingHttp {
            openai_calls: Arc::new(AtomicUsize::new(0)),
            anthropic_calls: Arc::new(AtomicUsize::new(0)),
        });
        let registry = ProviderRegistry::new(adapters, http);
        let fallback = FallbackController::new(&registry);
        let ctx = RequestContext::new();
        ctx.cancel();
        let req = sample_request(Provider::OpenAI);
        let attempts = vec![ProviderModel::new(Provider::OpenAI, "gpt-4")];

        let (err, _trail) = fallback.dispatch(&ctx, &req, &attempts).await.unwrap_err();
        assert!(matches!(err, BifrostError::Canceled));
    }
}
