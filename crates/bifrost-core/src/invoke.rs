use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use bifrost_protocol::{DeltaEnvelope, NormalizedRequest};
use bifrost_provider_core::{HttpRequest, Key, ProviderAdapter, ProviderRecord, StreamChunkOutcome, UpstreamError, select_key};

use crate::context::RequestContext;
use crate::errors::{BifrostError, BifrostResult};
use crate::http_client::HttpClient;
use crate::pipeline::DeltaReceiver;
use crate::pool::DispatchOutcome;
use crate::sse::SseParser;

/// spec.md §4.6 "Error translation" as applied by the Worker Pool: maps the
/// provider-agnostic [`UpstreamError`] shape an [`HttpClient`]/adapter
/// produces onto the spec.md §7 taxonomy the Fallback Controller reasons
/// about (4xx auth vs. client vs. rate vs. 5xx vs. network).
fn classify_upstream_error(err: UpstreamError) -> BifrostError {
    match err.status_code {
        0 => BifrostError::Network(err.message),
        401 | 403 => BifrostError::UpstreamAuth {
            status: err.status_code,
            message: err.message,
        },
        400 | 422 => BifrostError::UpstreamClient {
            status: err.status_code,
            message: err.message,
        },
        429 => BifrostError::UpstreamRate { message: err.message },
        500..=599 => BifrostError::UpstreamServer {
            status: err.status_code,
            message: err.message,
        },
        _ => BifrostError::UpstreamServer {
            status: err.status_code,
            message: err.message,
        },
    }
}

/// spec.md §4.4 "Each worker loops: take job -> select key -> invoke Provider
/// Adapter -> deliver result". This is the body of one such iteration for one
/// provider, built once per [`crate::registry::ProviderRuntime`] and captured
/// by the `ProviderCall` closure the Worker Pool runs.
pub async fn invoke(
    adapter: Arc<dyn ProviderAdapter>,
    http: Arc<dyn HttpClient>,
    record: Arc<ProviderRecord>,
    keys: Arc<Vec<Key>>,
    req: NormalizedRequest,
    ctx: RequestContext,
) -> BifrostResult<DispatchOutcome> {
    let key = {
        let mut rng = rand::rng();
        select_key(&keys, &req.model, &mut rng)
            .map_err(|_| BifrostError::NoKeyAvailable)?
            .clone()
    };

    let http_req = adapter
        .build_request(&req, &key, &record.network_config, &record.meta_config)
        .await
        .map_err(|e| BifrostError::Validation(e.to_string()))?;

    // spec.md §5: "three layers [of timeout] ... compose by taking the
    // minimum" — the caller's remaining deadline vs. this provider's network
    // config timeout.
    let timeout = ctx.effective_timeout(Duration::from_secs(
        record.network_config.default_request_timeout_in_seconds,
    ));

    if http_req.is_stream {
        invoke_stream(adapter, http, record, http_req, timeout).await
    } else {
        invoke_unary(adapter, http, record, http_req, timeout, req).await
    }
}

async fn invoke_unary(
    adapter: Arc<dyn ProviderAdapter>,
    http: Arc<dyn HttpClient>,
    record: Arc<ProviderRecord>,
    http_req: HttpRequest,
    timeout: Duration,
    req: NormalizedRequest,
) -> BifrostResult<DispatchOutcome> {
    let wire_body = http_req.body.clone();
    let response = http
        .send(&http_req, timeout, &record.proxy_config)
        .await
        .map_err(classify_upstream_error)?;

    if !(200..300).contains(&response.status) {
        return Err(classify_upstream_error(adapter.translate_http_error(&response)));
    }

    let mut normalized = adapter
        .parse_response(&response)
        .map_err(|e| BifrostError::UpstreamServer {
            status: response.status,
            message: e.to_string(),
        })?;

    // spec.md §4.6: "attach the exact wire bytes sent upstream ... without
    // re-serialization" when the request or the provider record asks for it.
    if req.send_back_raw_request {
        normalized.raw_request = wire_body.as_ref().and_then(|b| serde_json::from_slice(b).ok());
    }
    if req.send_back_raw_response || record.send_back_raw_response {
        normalized.raw_response = serde_json::from_slice(&response.body).ok();
    }

    Ok(DispatchOutcome::Response(normalized))
}

async fn invoke_stream(
    adapter: Arc<dyn ProviderAdapter>,
    http: Arc<dyn HttpClient>,
    record: Arc<ProviderRecord>,
    http_req: HttpRequest,
    timeout: Duration,
) -> BifrostResult<DispatchOutcome> {
    let idle_timeout = timeout;
    let mut raw = http
        .send_stream(&http_req, idle_timeout, &record.proxy_config)
        .await
        .map_err(classify_upstream_error)?;

    let (tx, rx): (mpsc::Sender<DeltaEnvelope>, DeltaReceiver) = mpsc::channel(16);

    tokio::spawn(async move {
        let mut parser = SseParser::new();
        let mut index: u32 = 0;
        'outer: while let Some(chunk) = raw.recv().await {
            for event in parser.push_bytes(&chunk) {
                match adapter.parse_stream_chunk(&bytes::Bytes::from(event.data)) {
                    Ok(StreamChunkOutcome::Delta(mut delta)) => {
                        delta.index = index;
                        index += 1;
                        let terminal = delta.is_terminal();
                        if tx.send(delta).await.is_err() {
                            break 'outer;
                        }
                        if terminal {
                            break 'outer;
                        }
                    }
                    Ok(StreamChunkOutcome::Done) => break 'outer,
                    Ok(StreamChunkOutcome::Incomplete) => continue,
                    Err(e) => {
                        let _ = tx
                            .send(DeltaEnvelope::error(
                                index,
                                BifrostError::Network(e.to_string()).into_envelope(),
                            ))
                            .await;
                        break 'outer;
                    }
                }
            }
        }
        for event in parser.finish() {
            if let Ok(StreamChunkOutcome::Delta(delta)) =
                adapter.parse_stream_chunk(&bytes::Bytes::from(event.data))
            {
                let _ = tx.send(delta).await;
            }
        }
    });

    Ok(DispatchOutcome::Stream(rx))
}
