//! AWS Bedrock adapter — spec.md §4.6 "For Bedrock: region is mandatory;
//! SigV4 signing is the adapter's responsibility."
//!
//! Bedrock's `InvokeModel` API accepts the model's own vendor body shape; we
//! target the Anthropic-compatible Claude models on Bedrock, which is the
//! same request/response shape as [`crate::anthropic`] plus Bedrock's
//! `anthropic_version` field and a SigV4-signed envelope instead of a bearer
//! token. Credentials are carried in [`Key::value`] as
//! `"<access_key_id>:<secret_access_key>"` (optionally a third `:` segment
//! for a session token).

use async_trait::async_trait;
use bytes::Bytes;
use hmac::{Hmac, Mac};
use serde_json::Value;
use sha2::{Digest, Sha256};
use time::OffsetDateTime;

use bifrost_protocol::NormalizedRequest;
use bifrost_provider_core::{
    HttpMethod, HttpRequest, HttpResponse, Key, MetaConfig, NetworkConfig, ProviderAdapter,
    ProviderError, ProviderResult, StreamChunkOutcome, UpstreamError, header_set,
};

use crate::anthropic::{decode_anthropic_message, decode_anthropic_stream_event};

type HmacSha256 = Hmac<Sha256>;

const SERVICE: &str = "bedrock";
const ANTHROPIC_VERSION_BEDROCK: &str = "bedrock-2023-05-31";

pub struct BedrockAdapter;

impl BedrockAdapter {
    pub fn new() -> Self {
        Self
    }

    fn build_body(&self, req: &NormalizedRequest) -> ProviderResult<Value> {
        let anthropic_value = crate::anthropic::build_message_body(req)?;
        let mut body = match anthropic_value {
            Value::Object(map) => map,
            other => return Err(ProviderError::Other(format!("unexpected body shape: {other}"))),
        };
        // `model` travels in the URL path on Bedrock, not the body.
        body.remove("model");
        body.insert(
            "anthropic_version".to_string(),
            Value::String(ANTHROPIC_VERSION_BEDROCK.to_string()),
        );
        Ok(Value::Object(body))
    }
}

impl Default for BedrockAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProviderAdapter for BedrockAdapter {
    fn name(&self) -> &str {
        "bedrock"
    }

    async fn build_request(
        &self,
        req: &NormalizedRequest,
        key: &Key,
        network: &NetworkConfig,
        meta: &MetaConfig,
    ) -> ProviderResult<HttpRequest> {
        let region = key
            .region
            .clone()
            .or_else(|| meta.region.clone())
            .ok_or(ProviderError::MissingCredentialField("region"))?;
        let (access_key, secret_key, session_token) = split_credentials(&key.resolved_value())?;

        let host = network
            .base_url
            .clone()
            .unwrap_or_else(|| format!("bedrock-runtime.{region}.amazonaws.com"));
        let op = if req.params.stream {
            "invoke-with-response-stream"
        } else {
            "invoke"
        };
        let path = format!("/model/{}/{op}", urlencoding::encode(&req.model));

        let body = self.build_body(req)?;
        let payload = serde_json::to_vec(&body).map_err(|e| ProviderError::Other(e.to_string()))?;

        let now = OffsetDateTime::now_utc();
        let amz_date = format_amz_date(now);
        let date_stamp = format_date_stamp(now);

        let mut headers = bifrost_provider_core::Headers::new();
        header_set(&mut headers, "content-type", "application/json");
        header_set(&mut headers, "host", host.clone());
        header_set(&mut headers, "x-amz-date", amz_date.clone());
        if let Some(token) = &session_token {
            header_set(&mut headers, "x-amz-security-token", token.clone());
        }

        let authorization = sign_request(
            &access_key,
            &secret_key,
            &region,
            &host,
            &path,
            &payload,
            &amz_date,
            &date_stamp,
            &headers,
        );
        header_set(&mut headers, "authorization", authorization);

        Ok(HttpRequest {
            method: HttpMethod::Post,
            url: format!("https://{host}{path}"),
            headers,
            body: Some(Bytes::from(payload)),
            is_stream: req.params.stream,
        })
    }

    fn parse_response(&self, response: &HttpResponse) -> ProviderResult<bifrost_protocol::NormalizedResponse> {
        let value: Value = serde_json::from_slice(&response.body)
            .map_err(|e| ProviderError::MalformedResponse(e.to_string()))?;
        decode_anthropic_message(&value)
    }

    /// Bedrock's `invoke-with-response-stream` wraps each event in an AWS
    /// event-stream binary frame; the Worker Pool deframes that envelope and
    /// hands this adapter the inner JSON payload bytes (identical shape to
    /// Anthropic's own SSE `data:` payloads), so decoding reuses that logic.
    fn parse_stream_chunk(&self, chunk: &Bytes) -> ProviderResult<StreamChunkOutcome> {
        decode_anthropic_stream_event(chunk)
    }

    fn translate_http_error(&self, response: &HttpResponse) -> UpstreamError {
        let parsed: Option<Value> = serde_json::from_slice(&response.body).ok();
        let message = parsed
            .as_ref()
            .and_then(|v| v.get("message"))
            .and_then(Value::as_str)
            .map(|s| s.to_string())
            .unwrap_or_else(|| String::from_utf8_lossy(&response.body).to_string());
        UpstreamError {
            status_code: response.status,
            error_type: "upstream".to_string(),
            code: format!("http_{}", response.status),
            message,
        }
    }
}

fn split_credentials(value: &str) -> ProviderResult<(String, String, Option<String>)> {
    let mut parts = value.splitn(3, ':');
    let access_key = parts
        .next()
        .filter(|s| !s.is_empty())
        .ok_or(ProviderError::MissingCredentialField("access_key_id"))?
        .to_string();
    let secret_key = parts
        .next()
        .filter(|s| !s.is_empty())
        .ok_or(ProviderError::MissingCredentialField("secret_access_key"))?
        .to_string();
    let session_token = parts.next().map(|s| s.to_string());
    Ok((access_key, secret_key, session_token))
}

fn format_amz_date(now: OffsetDateTime) -> String {
    format!(
        "{}T{:02}{:02}{:02}Z",
        format_date_stamp(now),
        now.hour(),
        now.minute(),
        now.second()
    )
}

fn format_date_stamp(now: OffsetDateTime) -> String {
    format!("{:04}{:02}{:02}", now.year(), u8::from(now.month()), now.day())
}

fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex_encode(&hasher.finalize())
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts any key length");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// AWS Signature Version 4, scoped to a single-chunk `POST` body (spec.md
/// §4.6 leaves the scheme up to the adapter).
#[allow(clippy::too_many_arguments)]
fn sign_request(
    access_key: &str,
    secret_key: &str,
    region: &str,
    host: &str,
    path: &str,
    payload: &[u8],
    amz_date: &str,
    date_stamp: &str,
    headers: &bifrost_provider_core::Headers,
) -> String {
    let mut signed_headers: Vec<(String, String)> = headers
        .iter()
        .map(|(k, v)| (k.to_ascii_lowercase(), v.trim().to_string()))
        .collect();
    signed_headers.sort_by(|a, b| a.0.cmp(&b.0));

    let canonical_headers: String = signed_headers
        .iter()
        .map(|(k, v)| format!("{k}:{v}\n"))
        .collect();
    let signed_headers_list = signed_headers
        .iter()
        .map(|(k, _)| k.as_str())
        .collect::<Vec<_>>()
        .join(";");

    let payload_hash = sha256_hex(payload);
    let canonical_request = format!(
        "POST\n{path}\n\n{canonical_headers}\n{signed_headers_list}\n{payload_hash}",
    );

    let credential_scope = format!("{date_stamp}/{region}/{SERVICE}/aws4_request");
    let string_to_sign = format!(
        "AWS4-HMAC-SHA256\n{amz_date}\n{credential_scope}\n{}",
        sha256_hex(canonical_request.as_bytes())
    );

    let k_date = hmac_sha256(format!("AWS4{secret_key}").as_bytes(), date_stamp.as_bytes());
    let k_region = hmac_sha256(&k_date, region.as_bytes());
    let k_service = hmac_sha256(&k_region, SERVICE.as_bytes());
    let k_signing = hmac_sha256(&k_service, b"aws4_request");
    let signature = hex_encode(&hmac_sha256(&k_signing, string_to_sign.as_bytes()));

    let _ = host;
    format!(
        "AWS4-HMAC-SHA256 Credential={access_key}/{credential_scope}, SignedHeaders={signed_headers_list}, Signature={signature}"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_access_secret_and_session_token() {
        let (access, secret, token) = split_credentials("AKIA:SECRET:TOKEN").unwrap();
        assert_eq!(access, "AKIA");
        assert_eq!(secret, "SECRET");
        assert_eq!(token.as_deref(), Some("TOKEN"));
    }

    #[test]
    fn rejects_missing_secret() {
        assert!(split_credentials("AKIA").is_err());
    }

    #[test]
    fn signature_is_deterministic_for_fixed_inputs() {
        let mut headers = bifrost_provider_core::Headers::new();
        header_set(&mut headers, "host", "bedrock-runtime.us-east-1.amazonaws.com");
        header_set(&mut headers, "x-amz-date", "20240101T000000Z");
        let a = sign_request(
            "AKIA",
            "SECRET",
            "us-east-1",
            "bedrock-runtime.us-east-1.amazonaws.com",
            "/model/x/invoke",
            b"{}",
            "20240101T000000Z",
            "20240101",
            &headers,
        );
        let b = sign_request(
            "AKIA",
            "SECRET",
            "us-east-1",
            "bedrock-runtime.us-east-1.amazonaws.com",
            "/model/x/invoke",
            b"{}",
            "20240101T000000Z",
            "20240101",
            &headers,
        );
        assert_eq!(a, b);
    }
}
