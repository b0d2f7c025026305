/// Errors a [`crate::adapter::ProviderAdapter`] can raise while building a
/// request, parsing a response, or decoding a stream chunk.
pub type ProviderResult<T> = Result<T, ProviderError>;

#[derive(Debug, Clone, thiserror::Error)]
pub enum ProviderError {
    #[error("unsupported operation: {0}")]
    Unsupported(&'static str),
    #[error("invalid provider config: {0}")]
    InvalidConfig(String),
    #[error("missing credential field: {0}")]
    MissingCredentialField(&'static str),
    #[error("malformed upstream response: {0}")]
    MalformedResponse(String),
    #[error("{0}")]
    Other(String),
}
