use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use bifrost_protocol::{DeltaEnvelope, NormalizedRequest, NormalizedResponse};

use crate::context::RequestContext;
use crate::errors::BifrostError;

/// A stream of deltas as handed between pre-hook short-circuit and the
/// Streaming Assembler (spec.md §4.7) — same channel shape the pool/adapter
/// path produces.
pub type DeltaReceiver = mpsc::Receiver<DeltaEnvelope>;
pub type DeltaSender = mpsc::Sender<DeltaEnvelope>;

/// Bounded capacity for a plugin-originated short-circuit stream — matches
/// spec.md §4.7 point 1's "small, e.g. 16" for the adapter-originated case.
pub const SHORT_CIRCUIT_STREAM_CAPACITY: usize = 16;

/// What a pre-hook produced in place of forwarding the request on (spec.md
/// §4.2 "Short-circuit").
pub enum ShortCircuitBody {
    Response(NormalizedResponse),
    Stream(DeltaReceiver),
    Error(BifrostError),
}

/// A single plugin's pre-hook verdict.
pub enum PreHookOutcome {
    Continue(NormalizedRequest),
    ShortCircuit(ShortCircuitBody),
}

pub type PostHookResult = Result<NormalizedResponse, BifrostError>;

/// spec.md §4.2 "Plugin Pipeline" contract. One implementation per
/// middleware concern spec.md §1 scopes out as a plugin (governance,
/// rate-limit accounting, semantic cache, MCP bridge, observability, UI).
#[async_trait]
pub trait Plugin: Send + Sync {
    fn name(&self) -> &str;

    /// Runs once when the plugin is (re)registered via `reload_plugin`
    /// (spec.md §6 "Inserts/replaces a plugin; runs its init."). Default is
    /// a no-op, symmetric with [`Plugin::cleanup`].
    async fn init(&self) {}

    /// Rewrites or short-circuits the request. Registration order across
    /// all enabled plugins determines pre-hook execution order.
    async fn pre_hook(&self, ctx: &RequestContext, req: NormalizedRequest) -> PreHookOutcome;

    /// Sees the post-state symmetric to whatever this plugin's pre-hook
    /// produced. May recover an error into a response, or censor a response
    /// into an error (spec.md §4.2 "Recovery"). Default is a pass-through,
    /// for plugins that only care about the pre-hook side (e.g. a cache
    /// writer that never alters responses it didn't itself produce).
    async fn post_hook(&self, _ctx: &RequestContext, result: PostHookResult) -> PostHookResult {
        result
    }

    /// Per-delta equivalent of [`Plugin::post_hook`] for streaming
    /// responses (spec.md §4.2 "Streaming post-hooks"). Default is
    /// identity — most plugins only need the unary post-hook.
    async fn post_hook_delta(&self, _ctx: &RequestContext, delta: DeltaEnvelope) -> DeltaEnvelope {
        delta
    }

    /// Runs once at shutdown, in reverse registration order across all
    /// plugins (spec.md §5 "Graceful shutdown"). Default is a no-op.
    async fn cleanup(&self) {}
}

/// The executed prefix of the pre-hook chain plus its verdict — what the
/// Pipeline needs to run a *symmetric* post-hook unwind (spec.md §4.2,
/// testable property 1/2).
pub enum PreHookChainOutcome {
    /// Every plugin ran its pre-hook; the (possibly rewritten) request is
    /// ready for the Fallback Controller.
    Continue(NormalizedRequest),
    /// Plugin at index `executed - 1` short-circuited; `executed` plugins'
    /// pre-hooks ran in total (spec.md testable property 2: pre-hook `k`
    /// short-circuiting means exactly the first `k` plugins' post-hooks run,
    /// in reverse — *including* the short-circuiting plugin's own, which is
    /// how it sees the response/stream/error it just produced).
    ShortCircuit { executed: usize, body: ShortCircuitBody },
}

/// The ordered chain of enabled plugins (spec.md §4.2). Holds no per-request
/// state; one instance is shared (via `Arc`) across concurrent requests.
#[derive(Clone, Default)]
pub struct Pipeline {
    plugins: Vec<Arc<dyn Plugin>>,
}

impl Pipeline {
    pub fn new(plugins: Vec<Arc<dyn Plugin>>) -> Self {
        Self { plugins }
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    pub fn plugin_names(&self) -> Vec<&str> {
        self.plugins.iter().map(|p| p.name()).collect()
    }

    /// Runs pre-hooks in registration order (spec.md §4.2/§5: "pre-hooks
    /// execute in order"). Stops at the first short-circuit.
    pub async fn run_pre_hooks(
        &self,
        ctx: &RequestContext,
        mut req: NormalizedRequest,
    ) -> PreHookChainOutcome {
        for (idx, plugin) in self.plugins.iter().enumerate() {
            tracing::debug!(request_id = %ctx.request_id(), plugin = plugin.name(), "pre_hook");
            match plugin.pre_hook(ctx, req).await {
                PreHookOutcome::Continue(rewritten) => req = rewritten,
                PreHookOutcome::ShortCircuit(body) => {
                    return PreHookChainOutcome::ShortCircuit {
                        executed: idx + 1,
                        body,
                    };
                }
            }
        }
        PreHookChainOutcome::Continue(req)
    }

    /// Runs post-hooks for the first `executed` plugins, in *reverse* order
    /// (spec.md §4.2/§9 "Plugin symmetry" — "implement as an explicit
    /// reverse walk, not by two independent lists").
    pub async fn run_post_hooks(
        &self,
        ctx: &RequestContext,
        executed: usize,
        mut result: PostHookResult,
    ) -> PostHookResult {
        for plugin in self.plugins[..executed.min(self.plugins.len())].iter().rev() {
            tracing::debug!(request_id = %ctx.request_id(), plugin = plugin.name(), "post_hook");
            result = plugin.post_hook(ctx, result).await;
        }
        result
    }

    /// Runs the reverse plugin chain over one streaming delta (spec.md
    /// §4.2 "Streaming post-hooks", §4.7 point 2).
    pub async fn run_post_hooks_delta(
        &self,
        ctx: &RequestContext,
        executed: usize,
        mut delta: DeltaEnvelope,
    ) -> DeltaEnvelope {
        for plugin in self.plugins[..executed.min(self.plugins.len())].iter().rev() {
            delta = plugin.post_hook_delta(ctx, delta).await;
        }
        delta
    }

    /// spec.md §5 "Graceful shutdown": "run plugin `cleanup` hooks in
    /// reverse registration order."
    pub async fn shutdown(&self) {
        for plugin in self.plugins.iter().rev() {
            plugin.cleanup().await;
        }
    }
}

/// Reference plugin implementations that exercise the contract without
/// carrying business logic (spec.md §1 scopes the real ones out as
/// external plugins).
pub mod builtin {
    use super::*;

    /// Logs pre/post-hook invocation; mirrors the teacher's
    /// `TerminalEventSink` — a minimal reference `EventSink` used in tests
    /// and examples, not a production feature.
    pub struct LoggingPlugin {
        name: &'static str,
    }

    impl LoggingPlugin {
        pub fn new() -> Self {
            Self { name: "logging" }
        }
    }

    impl Default for LoggingPlugin {
        fn default() -> Self {
            Self::new()
        }
    }

    #[async_trait]
    impl Plugin for LoggingPlugin {
        fn name(&self) -> &str {
            self.name
        }

        async fn pre_hook(&self, ctx: &RequestContext, req: NormalizedRequest) -> PreHookOutcome {
            tracing::info!(
                request_id = %ctx.request_id(),
                provider = %req.provider,
                model = %req.model,
                "dispatching request"
            );
            PreHookOutcome::Continue(req)
        }

        async fn post_hook(&self, ctx: &RequestContext, result: PostHookResult) -> PostHookResult {
            match &result {
                Ok(resp) => {
                    tracing::info!(request_id = %ctx.request_id(), model = %resp.model, "request succeeded")
                }
                Err(err) => {
                    tracing::warn!(request_id = %ctx.request_id(), error = %err, "request failed")
                }
            }
            result
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bifrost_protocol::{Input, MessageContent, Message, Provider, Role, RequestType, Params};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    fn base_request() -> NormalizedRequest {
        NormalizedRequest {
            request_type: RequestType::ChatCompletion,
            provider: Provider::OpenAI,
            model: "gpt-4o-mini".into(),
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

    fn sample_response() -> NormalizedResponse {
        NormalizedResponse {
            id: "resp_1".into(),
            object: "chat.completion".into(),
            model: "gpt-4o-mini".into(),
            choices: vec![],
            usage: Default::default(),
            extra_fields: Default::default(),
            raw_request: None,
            raw_response: None,
        }
    }

    /// Records pre/post-hook calls in a shared order log, to assert
    /// testable property 1: post-hook order is the reverse of the
    /// *observed* pre-hook order.
    struct OrderRecordingPlugin {
        name: &'static str,
        log: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl Plugin for OrderRecordingPlugin {
        fn name(&self) -> &str {
            self.name
        }

        async fn pre_hook(&self, _ctx: &RequestContext, req: NormalizedRequest) -> PreHookOutcome {
            self.log.lock().unwrap().push(format!("pre:{}", self.name));
            PreHookOutcome::Continue(req)
        }

        async fn post_hook(&self, _ctx: &RequestContext, result: PostHookResult) -> PostHookResult {
            self.log.lock().unwrap().push(format!("post:{}", self.name));
            result
        }
    }

    struct ShortCircuitPlugin {
        name: &'static str,
        log: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl Plugin for ShortCircuitPlugin {
        fn name(&self) -> &str {
            self.name
        }

        async fn pre_hook(&self, _ctx: &RequestContext, _req: NormalizedRequest) -> PreHookOutcome {
            self.log.lock().unwrap().push(format!("pre:{}", self.name));
            PreHookOutcome::ShortCircuit(ShortCircuitBody::Response(sample_response()))
        }

        async fn post_hook(&self, _ctx: &RequestContext, result: PostHookResult) -> PostHookResult {
            self.log.lock().unwrap().push(format!("post:{}", self.name));
            result
        }
    }

    struct NeverCalledPlugin {
        called: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Plugin for NeverCalledPlugin {
        fn name(&self) -> &str {
            "never"
        }

        async fn pre_hook(&self, _ctx: &RequestContext, req: NormalizedRequest) -> PreHookOutcome {
            self.called.fetch_add(1, Ordering::SeqCst);
            PreHookOutcome::Continue(req)
        }
    }

    #[tokio::test]
    async fn post_hooks_run_in_reverse_of_observed_pre_hook_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let pipeline = Pipeline::new(vec![
            Arc::new(OrderRecordingPlugin { name: "a", log: log.clone() }),
            Arc::new(OrderRecordingPlugin { name: "b", log: log.clone() }),
            Arc::new(OrderRecordingPlugin { name: "c", log: log.clone() }),
        ]);
        let ctx = RequestContext::new();
        let outcome = pipeline.run_pre_hooks(&ctx, base_request()).await;
        let PreHookChainOutcome::Continue(_) = outcome else {
            panic!("expected all pre-hooks to run");
        };
        let _ = pipeline.run_post_hooks(&ctx, 3, Ok(sample_response())).await;

        let observed = log.lock().unwrap().clone();
        assert_eq!(observed, vec!["pre:a", "pre:b", "pre:c", "post:c", "post:b", "post:a"]);
    }

    #[tokio::test]
    async fn short_circuit_runs_only_executed_post_hooks() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let never_called = Arc::new(AtomicUsize::new(0));
        let pipeline = Pipeline::new(vec![
            Arc::new(OrderRecordingPlugin { name: "a", log: log.clone() }),
            Arc::new(ShortCircuitPlugin { name: "b", log: log.clone() }),
            Arc::new(NeverCalledPlugin { called: never_called.clone() }),
        ]);
        let ctx = RequestContext::new();
        let outcome = pipeline.run_pre_hooks(&ctx, base_request()).await;
        let PreHookChainOutcome::ShortCircuit { executed, body } = outcome else {
            panic!("expected a short-circuit");
        };
        assert_eq!(executed, 2);
        assert_eq!(never_called.load(Ordering::SeqCst), 0);

        let ShortCircuitBody::Response(resp) = body else {
            panic!("expected a response short-circuit");
        };
        let _ = pipeline.run_post_hooks(&ctx, executed, Ok(resp)).await;

        let observed = log.lock().unwrap().clone();
        // Plugin a's pre-hook ran (testable property 2's `k-1..0`) and so
        // did b's own post-hook (S4: "its own post-hook runs").
        assert_eq!(observed, vec!["pre:a", "pre:b", "post:b", "post:a"]);
    }

    #[tokio::test]
    async fn post_hook_can_recover_an_error_into_a_response() {
        struct RecoveringPlugin;
        #[async_trait]
        impl Plugin for RecoveringPlugin {
            fn name(&self) -> &str {
                "recover"
            }
            async fn pre_hook(&self, _ctx: &RequestContext, req: NormalizedRequest) -> PreHookOutcome {
                PreHookOutcome::Continue(req)
            }
            async fn post_hook(&self, _ctx: &RequestContext, result: PostHookResult) -> PostHookResult {
                match result {
                    Err(_) => Ok(sample_response()),
                    ok => ok,
                }
            }
        }
        let pipeline = Pipeline::new(vec![Arc::new(RecoveringPlugin)]);
        let ctx = RequestContext::new();
        let result = pipeline
            .run_post_hooks(&ctx, 1, Err(BifrostError::UpstreamServer { status: 503, message: "boom".into() }))
            .await;
        assert!(result.is_ok());
    }
}
