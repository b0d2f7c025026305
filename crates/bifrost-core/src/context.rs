use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use ulid::Ulid;

/// spec.md §4.8 "Request Context" — per-request ambient state.
///
/// Created at dispatcher entry, carried by value (cheap: an `Arc`-free
/// struct of small fields plus a clone-cheap [`CancellationToken`]) through
/// the pipeline, the pool, the adapter call, and — for streams — the
/// assembler task. Destroyed when the last response byte leaves the process,
/// i.e. when the last clone is dropped.
#[derive(Clone)]
pub struct RequestContext {
    /// Globally unique within the process (spec.md §4.8); a ULID so it sorts
    /// lexicographically by creation time, unlike a bare UUIDv4.
    request_id: Ulid,
    deadline: Option<Instant>,
    cancel: CancellationToken,
    attempt_index: u32,
    is_fallback: bool,
    virtual_key: Option<String>,
    scratch: std::sync::Arc<Mutex<HashMap<String, String>>>,
}

impl RequestContext {
    /// Starts a fresh context with no deadline, attempt 0, not a fallback.
    pub fn new() -> Self {
        Self {
            request_id: Ulid::new(),
            deadline: None,
            cancel: CancellationToken::new(),
            attempt_index: 0,
            is_fallback: false,
            virtual_key: None,
            scratch: std::sync::Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn with_deadline(mut self, timeout: Duration) -> Self {
        self.deadline = Some(Instant::now() + timeout);
        self
    }

    pub fn with_virtual_key(mut self, key: impl Into<String>) -> Self {
        self.virtual_key = Some(key.into());
        self
    }

    pub fn request_id(&self) -> Ulid {
        self.request_id
    }

    pub fn virtual_key(&self) -> Option<&str> {
        self.virtual_key.as_deref()
    }

    pub fn attempt_index(&self) -> u32 {
        self.attempt_index
    }

    pub fn is_fallback(&self) -> bool {
        self.is_fallback
    }

    /// Used by the Fallback Controller (spec.md §4.3) to stamp each retry
    /// with its attempt number without disturbing the shared cancel token
    /// or deadline.
    pub fn for_attempt(&self, attempt_index: u32, is_fallback: bool) -> Self {
        Self {
            request_id: self.request_id,
            deadline: self.deadline,
            cancel: self.cancel.clone(),
            attempt_index,
            is_fallback,
            virtual_key: self.virtual_key.clone(),
            scratch: self.scratch.clone(),
        }
    }

    /// spec.md §5: "three layers [of timeout] ... compose by taking the
    /// minimum." Returns the time remaining until the caller's deadline, if
    /// one was set.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline.map(|d| d.saturating_duration_since(Instant::now()))
    }

    /// The smaller of the caller's remaining deadline and `provider_timeout`
    /// (spec.md §5's per-provider `default_request_timeout_in_seconds`).
    pub fn effective_timeout(&self, provider_timeout: Duration) -> Duration {
        match self.remaining() {
            Some(remaining) => remaining.min(provider_timeout),
            None => provider_timeout,
        }
    }

    pub fn is_expired(&self) -> bool {
        matches!(self.remaining(), Some(d) if d.is_zero())
    }

    pub fn is_canceled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Waits until either cancellation or the caller-supplied deadline,
    /// whichever comes first — the building block every suspension point
    /// (spec.md §5) selects against instead of blocking bare.
    pub async fn cancelled_or_expired(&self) {
        match self.remaining() {
            Some(remaining) => {
                tokio::select! {
                    _ = self.cancel.cancelled() => {}
                    _ = tokio::time::sleep(remaining) => {}
                }
            }
            None => self.cancel.cancelled().await,
        }
    }

    /// Per-plugin scratch storage (spec.md §4.2 "stream state is kept in
    /// `plugin_scratch` keyed by request id"). Single-owner per request, no
    /// lock contention across requests since each [`RequestContext`] has its
    /// own map; the inner mutex only guards concurrent access from the
    /// inbound task and the streaming assembler task for the same request.
    pub fn scratch_set(&self, key: impl Into<String>, value: impl Into<String>) {
        self.scratch.lock().unwrap().insert(key.into(), value.into());
    }

    pub fn scratch_get(&self, key: &str) -> Option<String> {
        self.scratch.lock().unwrap().get(key).cloned()
    }

    pub fn scratch_remove(&self, key: &str) {
        self.scratch.lock().unwrap().remove(key);
    }

    /// Releases all plugin scratch state for this request (spec.md §4.2:
    /// "released when the terminal delta is seen or the channel is closed").
    pub fn release_scratch(&self) {
        self.scratch.lock().unwrap().clear();
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_context_is_not_canceled_or_expired() {
        let ctx = RequestContext::new();
        assert!(!ctx.is_canceled());
        assert!(!ctx.is_expired());
        assert_eq!(ctx.attempt_index(), 0);
        assert!(!ctx.is_fallback());
    }

    #[test]
    fn for_attempt_shares_cancel_token_and_scratch() {
        let ctx = RequestContext::new();
        ctx.scratch_set("k", "v");
        let retry = ctx.for_attempt(1, true);
        assert_eq!(retry.attempt_index(), 1);
        assert!(retry.is_fallback());
        assert_eq!(retry.scratch_get("k").as_deref(), Some("v"));
        ctx.cancel();
        assert!(retry.is_canceled());
    }

    #[test]
    fn zero_timeout_is_immediately_expired() {
        let ctx = RequestContext::new().with_deadline(Duration::from_secs(0));
        std::thread::sleep(Duration::from_millis(5));
        assert!(ctx.is_expired());
    }

    #[test]
    fn effective_timeout_takes_the_minimum() {
        let ctx = RequestContext::new().with_deadline(Duration::from_secs(5));
        let effective = ctx.effective_timeout(Duration::from_secs(30));
        assert!(effective <= Duration::from_secs(5));
    }
}
