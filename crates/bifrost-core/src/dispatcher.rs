use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use bifrost_protocol::{Delta, DeltaEnvelope, ErrorEnvelope, NormalizedRequest, NormalizedResponse};
use bifrost_provider_core::{AdapterRegistry, ConcurrencyConfig, Key, ProviderRecord};

use crate::context::RequestContext;
use crate::errors::BifrostError;
use crate::fallback::FallbackController;
use crate::http_client::HttpClient;
use crate::pipeline::{DeltaReceiver, Pipeline, Plugin, PreHookChainOutcome, ShortCircuitBody};
use crate::pool::DispatchOutcome;
use crate::plugins::PluginRegistry;
use crate::registry::{ProviderRegistry, ReloadError};
use crate::stream;

/// spec.md §4.1 "Dispatcher" — the engine's front door and the type
/// `apps/bifrost` (and any other HTTP transport) holds for the process
/// lifetime. Owns the two hot-swappable registries spec.md §9 "No global
/// mutable state" calls for: "provider registry and plugin list are held on
/// the dispatcher instance; tests must be able to build isolated instances."
pub struct Dispatcher {
    providers: ProviderRegistry,
    plugins: PluginRegistry,
}

impl Dispatcher {
    pub fn new(adapters: AdapterRegistry, http: Arc<dyn HttpClient>) -> Self {
        Self {
            providers: ProviderRegistry::new(adapters, http),
            plugins: PluginRegistry::new(),
        }
    }

    fn build_ctx(&self, deadline: Option<Duration>, virtual_key: Option<String>) -> RequestContext {
        let mut ctx = RequestContext::new();
        if let Some(d) = deadline {
            ctx = ctx.with_deadline(d);
        }
        if let Some(k) = virtual_key {
            ctx = ctx.with_virtual_key(k);
        }
        ctx
    }

    /// spec.md §4.1 `dispatch(ctx, req) -> (resp | streamChannel, error)`,
    /// unary half. `deadline`/`virtual_key` seed the [`RequestContext`]
    /// created here — spec.md §4.8 "created at dispatcher entry" takes
    /// precedence over the external-interface table's `ctx` parameter name,
    /// since nothing upstream of the Dispatcher has one to hand in yet (see
    /// DESIGN.md).
    pub async fn dispatch(
        &self,
        mut req: NormalizedRequest,
        deadline: Option<Duration>,
        virtual_key: Option<String>,
    ) -> Result<NormalizedResponse, ErrorEnvelope> {
        req.params.stream = false;

        // spec.md §4.1 point 1.
        if let Err(e) = req.validate_shape() {
            return Err(BifrostError::Validation(e.to_string()).into_envelope());
        }

        // spec.md §4.1 point 2.
        let ctx = self.build_ctx(deadline, virtual_key);
        let pipeline = Pipeline::new(self.plugins.snapshot());

        // spec.md §4.1 point 3.
        let pre_outcome = pipeline.run_pre_hooks(&ctx, req).await;

        // Carried alongside `post_input` rather than through `BifrostError`
        // itself — only attached to the final envelope, after post-hooks
        // have had a chance to recover the error (spec.md §4.2 "Recovery").
        let mut trail: Vec<bifrost_protocol::AttemptTrailEntry> = Vec::new();

        let (executed, post_input) = match pre_outcome {
            PreHookChainOutcome::Continue(req) => {
                // spec.md §4.1 point 5.
                let attempts = req.attempt_order();
                let fallback = FallbackController::new(&self.providers);
                match fallback.dispatch(&ctx, &req, &attempts).await {
                    Ok((DispatchOutcome::Response(mut resp), attempt_trail)) => {
                        resp.extra_fields.attempt_trail = attempt_trail;
                        (pipeline.len(), Ok(resp))
                    }
                    Ok((DispatchOutcome::Stream(_), _attempt_trail)) => (
                        pipeline.len(),
                        Err(BifrostError::PluginFatal(
                            "provider adapter produced a stream for a unary dispatch".to_string(),
                        )),
                    ),
                    Err((err, attempt_trail)) => {
                        tracing::warn!(request_id = %ctx.request_id(), error = %err, "all attempts exhausted");
                        trail = attempt_trail;
                        (pipeline.len(), Err(err))
                    }
                }
            }
            // spec.md §4.1 point 4 / §4.2: "the pipeline unwinds post-hooks
            // of already-executed plugins only."
            PreHookChainOutcome::ShortCircuit { executed, body } => match body {
                ShortCircuitBody::Response(resp) => (executed, Ok(resp)),
                ShortCircuitBody::Error(err) => (executed, Err(err)),
                ShortCircuitBody::Stream(_) => (
                    executed,
                    Err(BifrostError::PluginFatal(
                        "plugin short-circuited with a stream from a unary dispatch".to_string(),
                    )),
                ),
            },
        };

        match pipeline.run_post_hooks(&ctx, executed, post_input).await {
            Ok(resp) => Ok(resp),
            Err(err) => {
                let mut envelope = err.into_envelope();
                envelope.extra_fields.attempt_trail = trail;
                Err(envelope)
            }
        }
    }

    /// spec.md §4.1 `dispatch(ctx, req)`, streaming half (`dispatch_stream`
    /// in the external-interface table, spec.md §6): "Returns a read-only
    /// delta channel + cancel handle."
    pub async fn dispatch_stream(
        &self,
        mut req: NormalizedRequest,
        deadline: Option<Duration>,
        virtual_key: Option<String>,
    ) -> Result<(DeltaReceiver, CancellationToken), ErrorEnvelope> {
        req.params.stream = true;

        if let Err(e) = req.validate_shape() {
            return Err(BifrostError::Validation(e.to_string()).into_envelope());
        }

        let ctx = self.build_ctx(deadline, virtual_key);
        let pipeline = Pipeline::new(self.plugins.snapshot());
        let cancel_handle = ctx.cancel_token();

        let pre_outcome = pipeline.run_pre_hooks(&ctx, req).await;

        match pre_outcome {
            PreHookChainOutcome::Continue(req) => {
                let attempts = req.attempt_order();
                let fallback = FallbackController::new(&self.providers);
                match fallback.dispatch(&ctx, &req, &attempts).await {
                    Ok((DispatchOutcome::Stream(raw_rx), trail)) => {
                        if !trail.is_empty() {
                            tracing::info!(
                                request_id = %ctx.request_id(),
                                attempts = trail.len(),
                                "stream started after fallback"
                            );
                        }
                        let executed = pipeline.len();
                        let assembled = stream::assemble(pipeline, executed, ctx, raw_rx);
                        Ok((assembled, cancel_handle))
                    }
                    Ok((DispatchOutcome::Response(resp), _trail)) => {
                        let executed = pipeline.len();
                        Ok((single_delta_stream(pipeline, executed, ctx, resp), cancel_handle))
                    }
                    Err((err, trail)) => {
                        let mut envelope = err.into_envelope();
                        envelope.extra_fields.attempt_trail = trail;
                        Err(envelope)
                    }
                }
            }
            PreHookChainOutcome::ShortCircuit { executed, body } => match body {
                ShortCircuitBody::Stream(raw_rx) => {
                    let assembled = stream::assemble(pipeline, executed, ctx, raw_rx);
                    Ok((assembled, cancel_handle))
                }
                ShortCircuitBody::Response(resp) => {
                    Ok((single_delta_stream(pipeline, executed, ctx, resp), cancel_handle))
                }
                ShortCircuitBody::Error(err) => Err(err.into_envelope()),
            },
        }
    }

    /// spec.md §6 `reload_provider(name, record)`: "Hot-swap a provider
    /// record; drains old pool." `keys`/`concurrency` are supplied alongside
    /// the record because they are independently rotated (credential
    /// rotation vs. config reload; see DESIGN.md).
    pub async fn reload_provider(
        &self,
        name: &str,
        record: ProviderRecord,
        keys: Vec<Key>,
        concurrency: ConcurrencyConfig,
    ) -> Result<(), ReloadError> {
        self.providers.reload_provider(name, record, keys, concurrency).await
    }

    pub fn remove_provider(&self, name: &str) {
        self.providers.remove_provider(name);
    }

    /// spec.md §6 `reload_plugin(name, config)`.
    pub async fn reload_plugin(&self, name: &str, plugin: Arc<dyn Plugin>) {
        self.plugins.reload_plugin(name, plugin).await;
    }

    /// spec.md §6 `remove_plugin(name)`.
    pub async fn remove_plugin(&self, name: &str) {
        self.plugins.remove_plugin(name).await;
    }

    /// spec.md §5 "Graceful shutdown": "stop accepting new dispatch calls ->
    /// wait for all in-flight requests up to a shutdown deadline -> force-
    /// cancel remaining -> close provider pools -> run plugin `cleanup`
    /// hooks in reverse registration order." Callers stop routing new
    /// requests to this `Dispatcher` before calling `shutdown`; this method
    /// covers everything from "close provider pools" onward, since the
    /// engine itself has no request registry to force-cancel against (that
    /// bookkeeping lives in the HTTP transport external collaborator).
    pub async fn shutdown(&self, deadline: Duration) {
        let _ = tokio::time::timeout(deadline, self.providers.shutdown_all()).await;
        self.plugins.shutdown().await;
    }
}

/// Wraps a non-streaming response (from a short-circuit or a fallback-chain
/// success when the caller asked for `dispatch_stream`) as a single terminal
/// delta, so callers of `dispatch_stream` get a uniform channel shape
/// regardless of which path produced the final result.
fn single_delta_stream(
    pipeline: Pipeline,
    executed: usize,
    ctx: RequestContext,
    resp: NormalizedResponse,
) -> DeltaReceiver {
    let delta = DeltaEnvelope {
        index: 0,
        delta: Delta {
            role: resp.choices.first().and_then(|c| c.message.role),
            content: resp.choices.first().and_then(|c| c.message.content.clone()),
            tool_calls: resp.choices.first().and_then(|c| c.message.tool_calls.clone()),
        },
        finish_reason: Some(
            resp.choices
                .first()
                .and_then(|c| c.finish_reason.clone())
                .unwrap_or_else(|| "stop".to_string()),
        ),
        error: None,
    };

    let (raw_tx, raw_rx) = mpsc::channel(1);
    tokio::spawn(async move {
        let _ = raw_tx.send(delta).await;
    });
    stream::assemble(pipeline, executed, ctx, raw_rx)
}
