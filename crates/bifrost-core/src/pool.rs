use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use arc_swap::ArcSwapOption;
use tokio::sync::{Mutex as AsyncMutex, mpsc, oneshot};
use tokio::task::JoinHandle;

use bifrost_protocol::NormalizedRequest;
use bifrost_provider_core::ConcurrencyConfig;

use crate::context::RequestContext;
use crate::errors::{BifrostError, BifrostResult};
use crate::pipeline::DeltaReceiver;

/// Either of the two shapes a provider call can produce (spec.md §4.1 flow:
/// unary response or the head of a stream).
pub enum DispatchOutcome {
    Response(bifrost_protocol::NormalizedResponse),
    Stream(DeltaReceiver),
}

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// The actual per-attempt work a worker performs: select a key, invoke the
/// Provider Adapter, make the HTTP call (spec.md §4.4 "Each worker loops").
/// Boxed so [`WorkerPool`] stays generic over how a given provider's call is
/// built, without a type parameter infecting every caller.
pub type ProviderCall =
    Arc<dyn Fn(NormalizedRequest, RequestContext) -> BoxFuture<'static, BifrostResult<DispatchOutcome>> + Send + Sync>;

struct Job {
    req: NormalizedRequest,
    ctx: RequestContext,
    respond_to: oneshot::Sender<BifrostResult<DispatchOutcome>>,
}

#[derive(Debug, thiserror::Error)]
pub enum PoolConfigError {
    #[error("concurrency ({concurrency}) must be less than buffer_size ({buffer_size})")]
    ConcurrencyNotLessThanBuffer { concurrency: usize, buffer_size: usize },
}

/// spec.md §4.4 "Worker Pool (per provider)".
///
/// Owns a bounded queue and `concurrency` long-lived worker tasks that drain
/// it. Reconfiguration (spec.md §4.4/§9 "Pool hot-swap") is not a method on
/// this type — callers (the provider registry) construct a fresh pool and
/// swap the `Arc` pointer; the old pool's tasks keep running against
/// whatever is already queued until [`WorkerPool::drain`] closes it.
pub struct WorkerPool {
    sender: ArcSwapOption<mpsc::Sender<Job>>,
    concurrency: usize,
    buffer_size: usize,
    drop_excess_requests: bool,
    dropped: AtomicU64,
    handles: std::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    pub fn new(cfg: ConcurrencyConfig, executor: ProviderCall) -> Result<Arc<Self>, PoolConfigError> {
        if cfg.concurrency >= cfg.buffer_size {
            return Err(PoolConfigError::ConcurrencyNotLessThanBuffer {
                concurrency: cfg.concurrency,
                buffer_size: cfg.buffer_size,
            });
        }
        let (tx, rx) = mpsc::channel(cfg.buffer_size);
        let rx = Arc::new(AsyncMutex::new(rx));

        let pool = Arc::new(Self {
            sender: ArcSwapOption::from_pointee(tx),
            concurrency: cfg.concurrency,
            buffer_size: cfg.buffer_size,
            drop_excess_requests: cfg.drop_excess_requests,
            dropped: AtomicU64::new(0),
            handles: std::sync::Mutex::new(Vec::new()),
        });

        let handles = (0..cfg.concurrency)
            .map(|_| tokio::spawn(worker_loop(rx.clone(), executor.clone())))
            .collect();
        *pool.handles.lock().unwrap() = handles;
        Ok(pool)
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// spec.md §4.4 "Submit semantics". Returns a future that resolves to
    /// the job's outcome once a worker has picked it up and run it.
    pub async fn submit(
        &self,
        req: NormalizedRequest,
        ctx: RequestContext,
    ) -> BifrostResult<oneshot::Receiver<BifrostResult<DispatchOutcome>>> {
        let guard = self.sender.load();
        let Some(sender) = guard.as_ref() else {
            return Err(BifrostError::NoProviders);
        };

        let (respond_to, rx) = oneshot::channel();
        let job = Job { req, ctx: ctx.clone(), respond_to };

        match sender.try_send(job) {
            Ok(()) => Ok(rx),
            Err(mpsc::error::TrySendError::Closed(_)) => Err(BifrostError::NoProviders),
            Err(mpsc::error::TrySendError::Full(job)) => {
                if self.drop_excess_requests {
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                    return Err(BifrostError::QueueFull);
                }
                // spec.md §4.4(c) / §5: block until space, but honor
                // cancellation at this suspension point.
                let sender = sender.clone();
                tokio::select! {
                    result = sender.send(job) => match result {
                        Ok(()) => Ok(rx),
                        Err(_) => Err(BifrostError::NoProviders),
                    },
                    _ = ctx.cancelled_or_expired() => Err(BifrostError::Canceled),
                }
            }
        }
    }

    /// spec.md §4.4/§9 "Pool hot-swap": "stop accepting new jobs, let
    /// in-flight finish, then release workers." Closing the sender lets
    /// already-queued jobs drain naturally; worker tasks exit once the
    /// channel is both closed and empty.
    pub async fn drain(&self) {
        self.sender.store(None);
        let handles = std::mem::take(&mut *self.handles.lock().unwrap());
        for handle in handles {
            let _ = handle.await;
        }
    }
}

async fn worker_loop(
    rx: Arc<AsyncMutex<mpsc::Receiver<Job>>>,
    executor: ProviderCall,
) {
    loop {
        let job = {
            let mut guard = rx.lock().await;
            guard.recv().await
        };
        let Some(job) = job else {
            break;
        };
        if job.ctx.is_canceled() {
            let _ = job.respond_to.send(Err(BifrostError::Canceled));
            continue;
        }
        let outcome = (executor)(job.req, job.ctx).await;
        let _ = job.respond_to.send(outcome);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bifrost_protocol::{Input, Message, MessageContent, Params, Provider, RequestType, Role};
    use std::time::Duration;

    fn sample_request() -> NormalizedRequest {
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

    fn immediate_success_executor() -> ProviderCall {
        Arc::new(|_req, _ctx| {
            Box::pin(async move {
                Ok(DispatchOutcome::Response(bifrost_protocol::NormalizedResponse {
                    id: "r1".into(),
                    object: "chat.completion".into(),
                    model: "gpt-4o-mini".into(),
                    choices: vec![],
                    usage: Default::default(),
                    extra_fields: Default::default(),
                    raw_request: None,
                    raw_response: None,
                }))
            })
        })
    }

    #[test]
    fn construction_rejects_concurrency_not_less_than_buffer() {
        let cfg = ConcurrencyConfig {
            concurrency: 10,
            buffer_size: 10,
            drop_excess_requests: false,
        };
        assert!(WorkerPool::new(cfg, immediate_success_executor()).is_err());
    }

    #[tokio::test]
    async fn submitted_job_resolves_via_worker() {
        let cfg = ConcurrencyConfig {
            concurrency: 2,
            buffer_size: 10,
            drop_excess_requests: false,
        };
        let pool = WorkerPool::new(cfg, immediate_success_executor()).unwrap();
        let rx = pool.submit(sample_request(), RequestContext::new()).await.unwrap();
        let outcome = rx.await.unwrap().unwrap();
        assert!(matches!(outcome, DispatchOutcome::Response(_)));
    }

    #[tokio::test]
    async fn saturated_pool_with_drop_policy_returns_queue_full_and_increments_counter() {
        let blocker = Arc::new(tokio::sync::Notify::new());
        let blocker_for_exec = blocker.clone();
        let executor: ProviderCall = Arc::new(move |_req, _ctx| {
            let blocker = blocker_for_exec.clone();
            Box::pin(async move {
                blocker.notified().await;
                Ok(DispatchOutcome::Response(bifrost_protocol::NormalizedResponse {
                    id: "r".into(),
                    object: "chat.completion".into(),
                    model: "m".into(),
                    choices: vec![],
                    usage: Default::default(),
                    extra_fields: Default::default(),
                    raw_request: None,
                    raw_response: None,
                }))
            })
        });
        let cfg = ConcurrencyConfig {
            concurrency: 1,
            buffer_size: 2,
            drop_excess_requests: true,
        };
        let pool = WorkerPool::new(cfg, executor).unwrap();

        // First submit occupies the sole worker (blocked on the notify).
        let _first = pool.submit(sample_request(), RequestContext::new()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        // Second and third fill the buffer_size=2 queue.
        let _second = pool.submit(sample_request(), RequestContext::new()).await.unwrap();
        let _third = pool.submit(sample_request(), RequestContext::new()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        // Fourth has nowhere to go: drop policy rejects it immediately.
        let before = pool.dropped_count();
        let result = pool.submit(sample_request(), RequestContext::new()).await;
        assert!(matches!(result, Err(BifrostError::QueueFull)));
        assert_eq!(pool.dropped_count(), before + 1);

        blocker.notify_waiters();
    }

    #[tokio::test]
    async fn drain_lets_in_flight_jobs_finish_then_stops_accepting() {
        let cfg = ConcurrencyConfig {
            concurrency: 1,
            buffer_size: 4,
            drop_excess_requests: false,
        };
        let pool = WorkerPool::new(cfg, immediate_success_executor()).unwrap();
        let rx = pool.submit(sample_request(), RequestContext::new()).await.unwrap();
        pool.drain().await;
        let outcome = rx.await.unwrap().unwrap();
        assert!(matches!(outcome, DispatchOutcome::Response(_)));

        let after_drain = pool.submit(sample_request(), RequestContext::new()).await;
        assert!(matches!(after_drain, Err(BifrostError::NoProviders)));
    }
}
