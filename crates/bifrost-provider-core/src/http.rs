use bytes::Bytes;

/// `(header name, header value)` pairs, order preserved. A newtype over a
/// plain `Vec` rather than a `HashMap` — same rationale as
/// `bifrost-protocol::OpaqueJson`: headers are small, ordered, and
/// case-insensitively keyed, which a hash map does not model for free.
pub type Headers = Vec<(String, String)>;

pub fn header_get<'a>(headers: &'a Headers, name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

pub fn header_set(headers: &mut Headers, name: impl Into<String>, value: impl Into<String>) {
    let name = name.into();
    if let Some(slot) = headers.iter_mut().find(|(k, _)| k.eq_ignore_ascii_case(&name)) {
        slot.1 = value.into();
    } else {
        headers.push((name, value.into()));
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
        }
    }
}

/// The wire request a [`crate::adapter::ProviderAdapter`] builds for the
/// Worker Pool to execute (spec.md §4.6 `build_request`).
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: Headers,
    pub body: Option<Bytes>,
    pub is_stream: bool,
}

/// A completed (non-streaming) upstream response, or the head of a streaming
/// one — the Streaming Assembler (spec.md §4.7) reads the body as chunks
/// separately rather than through this type once `is_stream` is true.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: Headers,
    pub body: Bytes,
}

/// spec.md §4.6 "Error translation": every upstream error is mapped to this
/// shape. Network/timeout failures use `status_code = 0` and
/// `error_type = "network"`.
#[derive(Debug, Clone)]
pub struct UpstreamError {
    pub status_code: u16,
    pub error_type: String,
    pub code: String,
    pub message: String,
}

impl UpstreamError {
    pub fn network(message: impl Into<String>) -> Self {
        Self {
            status_code: 0,
            error_type: "network".to_string(),
            code: "network_error".to_string(),
            message: message.into(),
        }
    }
}
