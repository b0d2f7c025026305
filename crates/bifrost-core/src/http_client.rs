use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::StreamExt;
use tokio::sync::mpsc;
use wreq::{Client, Method, Proxy};

use bifrost_provider_core::{HttpMethod, HttpRequest, HttpResponse, Headers, ProxyConfig, ProxyType, UpstreamError};

/// A channel of raw upstream body chunks, exactly the shape the Streaming
/// Assembler (spec.md §4.7) reads from.
pub type ChunkStream = mpsc::Receiver<Bytes>;

/// The HTTP transport a Worker Pool job uses to actually call the upstream
/// provider (spec.md §4.4 "invoke Provider Adapter" + the resulting wire
/// call). Kept as a trait so tests can substitute a fake transport without
/// touching the network — mirrors the teacher's `UpstreamClient` trait
/// (`gproxy-core::upstream_client::UpstreamClient`).
#[async_trait]
pub trait HttpClient: Send + Sync {
    async fn send(
        &self,
        req: &HttpRequest,
        timeout: Duration,
        proxy: &ProxyConfig,
    ) -> Result<HttpResponse, UpstreamError>;

    async fn send_stream(
        &self,
        req: &HttpRequest,
        idle_timeout: Duration,
        proxy: &ProxyConfig,
    ) -> Result<ChunkStream, UpstreamError>;
}

/// `wreq`-backed [`HttpClient`], grounded on
/// `gproxy-core::upstream_client::WreqUpstreamClient`: same per-proxy client
/// cache (building a fresh TLS-capable client per distinct proxy URL is
/// expensive; most requests share one) and the same per-chunk idle-timeout
/// pattern for streaming reads.
#[derive(Clone)]
pub struct WreqHttpClient {
    clients: Arc<Mutex<HashMap<Option<String>, Client>>>,
}

impl WreqHttpClient {
    pub fn new() -> Self {
        Self {
            clients: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn client_for(&self, proxy: Option<String>) -> Result<Client, UpstreamError> {
        let mut guard = self.clients.lock().map_err(|_| UpstreamError {
            status_code: 0,
            error_type: "network".to_string(),
            code: "client_cache_poisoned".to_string(),
            message: "upstream client cache lock poisoned".to_string(),
        })?;
        if let Some(client) = guard.get(&proxy) {
            return Ok(client.clone());
        }
        let client = build_client(proxy.as_deref()).map_err(map_wreq_build_error)?;
        guard.insert(proxy, client.clone());
        Ok(client)
    }
}

impl Default for WreqHttpClient {
    fn default() -> Self {
        Self::new()
    }
}

fn build_client(proxy: Option<&str>) -> Result<Client, wreq::Error> {
    let mut builder = Client::builder().connect_timeout(Duration::from_secs(10));
    if let Some(proxy) = proxy {
        builder = builder.proxy(Proxy::all(proxy)?);
    }
    builder.build()
}

/// spec.md §6 `network_config.proxy_config` resolution. `Environment` is
/// left to `wreq`'s own default env-proxy detection (no explicit proxy set
/// on the client); `None` is an explicit absence.
fn resolve_proxy_url(cfg: &ProxyConfig) -> Option<String> {
    match cfg.proxy_type {
        ProxyType::None | ProxyType::Environment => None,
        ProxyType::Http | ProxyType::Socks5 => cfg.url.clone(),
    }
}

fn to_wreq_method(method: HttpMethod) -> Method {
    match method {
        HttpMethod::Get => Method::GET,
        HttpMethod::Post => Method::POST,
        HttpMethod::Put => Method::PUT,
        HttpMethod::Patch => Method::PATCH,
        HttpMethod::Delete => Method::DELETE,
    }
}

fn headers_from_wreq(map: &wreq::header::HeaderMap) -> Headers {
    let mut out = Vec::new();
    for (k, v) in map {
        if let Ok(s) = v.to_str() {
            out.push((k.as_str().to_string(), s.to_string()));
        }
    }
    out
}

fn map_wreq_build_error(err: wreq::Error) -> UpstreamError {
    UpstreamError::network(format!("client build failed: {err}"))
}

fn map_wreq_error(err: wreq::Error) -> UpstreamError {
    let message = err.to_string();
    if err.is_timeout() {
        return UpstreamError {
            status_code: 0,
            error_type: "network".to_string(),
            code: "timeout".to_string(),
            message,
        };
    }
    UpstreamError::network(message)
}

#[async_trait]
impl HttpClient for WreqHttpClient {
    async fn send(
        &self,
        req: &HttpRequest,
        timeout: Duration,
        proxy: &ProxyConfig,
    ) -> Result<HttpResponse, UpstreamError> {
        let client = self.client_for(resolve_proxy_url(proxy))?;
        let mut builder = client.request(to_wreq_method(req.method), &req.url).timeout(timeout);
        for (k, v) in &req.headers {
            builder = builder.header(k, v);
        }
        if let Some(body) = &req.body {
            builder = builder.body(body.clone());
        }
        let resp = builder.send().await.map_err(map_wreq_error)?;
        let status = resp.status().as_u16();
        let headers = headers_from_wreq(resp.headers());
        let body = resp.bytes().await.map_err(map_wreq_error)?;
        Ok(HttpResponse { status, headers, body })
    }

    async fn send_stream(
        &self,
        req: &HttpRequest,
        idle_timeout: Duration,
        proxy: &ProxyConfig,
    ) -> Result<ChunkStream, UpstreamError> {
        let client = self.client_for(resolve_proxy_url(proxy))?;
        let mut builder = client.request(to_wreq_method(req.method), &req.url);
        for (k, v) in &req.headers {
            builder = builder.header(k, v);
        }
        if let Some(body) = &req.body {
            builder = builder.body(body.clone());
        }
        let resp = builder.send().await.map_err(map_wreq_error)?;
        let status = resp.status().as_u16();
        if !(200..300).contains(&status) {
            let body = resp.bytes().await.unwrap_or_default();
            return Err(UpstreamError {
                status_code: status,
                error_type: "upstream".to_string(),
                code: format!("http_{status}"),
                message: String::from_utf8_lossy(&body).to_string(),
            });
        }

        // spec.md §4.7/§5: "a per-chunk idle timeout on streams (if no delta
        // arrives within idle window, the stream is failed)." The send side
        // enforces this by giving up on the upstream read; the Streaming
        // Assembler enforces its own copy against client-visible deltas.
        let (tx, rx) = mpsc::channel(16);
        tokio::spawn(async move {
            let mut stream = resp.bytes_stream();
            loop {
                let next = tokio::time::timeout(idle_timeout, stream.next()).await;
                let item = match next {
                    Ok(item) => item,
                    Err(_) => break,
                };
                let Some(item) = item else {
                    break;
                };
                let Ok(chunk) = item else {
                    break;
                };
                if tx.send(chunk).await.is_err() {
                    break;
                }
            }
        });
        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn environment_proxy_type_resolves_to_no_explicit_url() {
        let cfg = ProxyConfig {
            proxy_type: ProxyType::Environment,
            url: Some("http://ignored:8080".into()),
            username: None,
            password: None,
        };
        assert_eq!(resolve_proxy_url(&cfg), None);
    }

    #[test]
    fn http_proxy_type_resolves_to_its_url() {
        let cfg = ProxyConfig {
            proxy_type: ProxyType::Http,
            url: Some("http://proxy.local:8080".into()),
            username: None,
            password: None,
        };
        assert_eq!(resolve_proxy_url(&cfg).as_deref(), Some("http://proxy.local:8080"));
    }
}
