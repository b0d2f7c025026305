use tokio::sync::mpsc;

use crate::context::RequestContext;
use crate::pipeline::{DeltaReceiver, Pipeline};

/// spec.md §4.7 point 1: "a bounded output channel (capacity = small, e.g.
/// 16) for delta responses."
pub const CLIENT_STREAM_CAPACITY: usize = 16;

/// spec.md §4.7 "Streaming Assembler".
///
/// Consumes the decoded-but-not-post-hooked delta channel the Worker Pool
/// produces (`bifrost-core::invoke`'s `DispatchOutcome::Stream`) and runs the
/// reverse plugin chain over each delta before forwarding it to the client
/// channel this function returns. Runs as its own long-lived task per open
/// stream (spec.md §5 "one background task per open stream").
pub fn assemble(
    pipeline: Pipeline,
    executed: usize,
    ctx: RequestContext,
    mut upstream: DeltaReceiver,
) -> DeltaReceiver {
    let (tx, rx) = mpsc::channel(CLIENT_STREAM_CAPACITY);

    tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;
                // spec.md §4.7 point 5 / §5 "Cancellation": every suspension
                // point selects against the context's cancel signal.
                _ = ctx.cancelled_or_expired() => break,
                next = upstream.recv() => {
                    let Some(delta) = next else {
                        // spec.md §4.7 point 3: "clean EOF ... closes the channel."
                        break;
                    };
                    let terminal = delta.is_terminal();
                    let processed = pipeline.run_post_hooks_delta(&ctx, executed, delta).await;
                    if tx.send(processed).await.is_err() {
                        break;
                    }
                    if terminal {
                        // spec.md §3: "a terminal `[DONE]` sentinel that
                        // closes the channel" — finish_reason/error deltas
                        // are terminal; dropping `tx` here closes it.
                        break;
                    }
                }
            }
        }
        // spec.md §4.2 "Streaming post-hooks": "stream state ... released
        // when the terminal delta is seen or the channel is closed."
        ctx.release_scratch();
    });

    rx
}

#[cfg(test)]
mod tests {
    use super::*;
    use bifrost_protocol::{Delta, DeltaEnvelope};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    async fn drain(mut rx: DeltaReceiver) -> Vec<DeltaEnvelope> {
        let mut out = Vec::new();
        while let Some(d) = rx.recv().await {
            out.push(d);
        }
        out
    }

    fn content_delta(index: u32, text: &str, finish: Option<&str>) -> DeltaEnvelope {
        DeltaEnvelope {
            index,
            delta: Delta {
                content: Some(text.to_string()),
                ..Default::default()
            },
            finish_reason: finish.map(|s| s.to_string()),
            error: None,
        }
    }

    #[tokio::test]
    async fn forwards_deltas_in_order_and_closes_after_terminal() {
        let (tx, upstream) = mpsc::channel(16);
        tx.send(content_delta(0, "He", None)).await.unwrap();
        tx.send(content_delta(1, "llo", None)).await.unwrap();
        tx.send(content_delta(2, " world", Some("stop"))).await.unwrap();
        drop(tx);

        let rx = assemble(Pipeline::default(), 0, RequestContext::new(), upstream);
        let deltas = drain(rx).await;
        let text: String = deltas.iter().filter_map(|d| d.delta.content.clone()).collect();
        assert_eq!(text, "Hello world");
        assert_eq!(deltas.last().unwrap().finish_reason.as_deref(), Some("stop"));
    }

    #[tokio::test]
    async fn runs_post_hook_delta_through_reverse_chain() {
        use async_trait::async_trait;
        use bifrost_protocol::NormalizedRequest;
        use crate::pipeline::{Plugin, PostHookResult, PreHookOutcome};

        struct CountingPlugin(Arc<AtomicUsize>);
        #[async_trait]
        impl Plugin for CountingPlugin {
            fn name(&self) -> &str {
                "counter"
            }
            async fn pre_hook(&self, _ctx: &RequestContext, req: NormalizedRequest) -> PreHookOutcome {
                PreHookOutcome::Continue(req)
            }
            async fn post_hook(&self, _ctx: &RequestContext, result: PostHookResult) -> PostHookResult {
                result
            }
            async fn post_hook_delta(&self, _ctx: &RequestContext, delta: DeltaEnvelope) -> DeltaEnvelope {
                self.0.fetch_add(1, Ordering::SeqCst);
                delta
            }
        }

        let calls = Arc::new(AtomicUsize::new(0));
        let pipeline = Pipeline::new(vec![Arc::new(CountingPlugin(calls.clone()))]);

        let (tx, upstream) = mpsc::channel(16);
        tx.send(content_delta(0, "hi", Some("stop"))).await.unwrap();
        drop(tx);

        let rx = assemble(pipeline, 1, RequestContext::new(), upstream);
        let _ = drain(rx).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
