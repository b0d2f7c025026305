use bifrost_protocol::{ErrorEnvelope, ExtraFields};

/// spec.md §7 error taxonomy. Each variant knows whether it admits a
/// fallback attempt (`allow_fallbacks`) and its HTTP-ish status/type/code,
/// so the Fallback Controller (spec.md §4.3) never has to re-derive that
/// policy from a stringly-typed error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum BifrostError {
    #[error("validation error: {0}")]
    Validation(String),
    #[error("no_key_available")]
    NoKeyAvailable,
    #[error("queue_full")]
    QueueFull,
    #[error("network error: {0}")]
    Network(String),
    #[error("request timed out")]
    Timeout,
    #[error("deadline exceeded")]
    DeadlineExceeded,
    #[error("canceled")]
    Canceled,
    #[error("upstream authentication/permission error: {status} {message}")]
    UpstreamAuth { status: u16, message: String },
    #[error("upstream rejected request content: {status} {message}")]
    UpstreamClient { status: u16, message: String },
    #[error("upstream rate limited: {message}")]
    UpstreamRate { message: String },
    #[error("upstream server error: {status} {message}")]
    UpstreamServer { status: u16, message: String },
    #[error("no_providers")]
    NoProviders,
    #[error("plugin short-circuit: {0}")]
    PluginShortCircuit(String),
    #[error("plugin fatal error: {0}")]
    PluginFatal(String),
}

impl BifrostError {
    /// spec.md §7: governs whether the Fallback Controller may try the next
    /// `(provider, model)` pair after this error.
    pub fn allow_fallbacks(&self) -> bool {
        !matches!(
            self,
            BifrostError::Validation(_)
                | BifrostError::Canceled
                | BifrostError::UpstreamClient { .. }
                | BifrostError::PluginFatal(_)
        )
    }

    /// `true` for anything originating inside this process (validation,
    /// cancellation, plugin decisions) rather than from the upstream vendor
    /// — spec.md §4.3/§7's `is_bifrost_error` signal.
    pub fn is_bifrost_error(&self) -> bool {
        matches!(
            self,
            BifrostError::Validation(_)
                | BifrostError::NoKeyAvailable
                | BifrostError::QueueFull
                | BifrostError::Canceled
                | BifrostError::DeadlineExceeded
                | BifrostError::NoProviders
                | BifrostError::PluginShortCircuit(_)
                | BifrostError::PluginFatal(_)
        )
    }

    pub fn status_code(&self) -> u16 {
        match self {
            BifrostError::Validation(_) => 400,
            BifrostError::NoKeyAvailable => 500,
            BifrostError::QueueFull => 503,
            BifrostError::Network(_) | BifrostError::Timeout => 0,
            BifrostError::DeadlineExceeded => 504,
            BifrostError::Canceled => 499,
            BifrostError::UpstreamAuth { status, .. } => *status,
            BifrostError::UpstreamClient { status, .. } => *status,
            BifrostError::UpstreamRate { .. } => 429,
            BifrostError::UpstreamServer { status, .. } => *status,
            BifrostError::NoProviders => 500,
            BifrostError::PluginShortCircuit(_) => 500,
            BifrostError::PluginFatal(_) => 500,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            BifrostError::Validation(_) => "validation",
            BifrostError::NoKeyAvailable => "no_key_available",
            BifrostError::QueueFull => "queue_full",
            BifrostError::Network(_) => "network",
            BifrostError::Timeout => "timeout",
            BifrostError::DeadlineExceeded => "deadline_exceeded",
            BifrostError::Canceled => "canceled",
            BifrostError::UpstreamAuth { .. } => "upstream_4xx_auth",
            BifrostError::UpstreamClient { .. } => "upstream_4xx_client",
            BifrostError::UpstreamRate { .. } => "upstream_4xx_rate",
            BifrostError::UpstreamServer { .. } => "upstream_5xx",
            BifrostError::NoProviders => "no_providers",
            BifrostError::PluginShortCircuit(_) => "plugin_short_circuit",
            BifrostError::PluginFatal(_) => "plugin_fatal",
        }
    }

    pub fn error_type(&self) -> &'static str {
        match self {
            BifrostError::Network(_) => "network",
            BifrostError::Validation(_) => "validation",
            _ if self.is_bifrost_error() => "bifrost",
            _ => "upstream",
        }
    }

    /// Builds the spec.md §6 error envelope, with an empty attempt trail;
    /// callers (the Fallback Controller) append entries via
    /// [`ErrorEnvelope::push_attempt`].
    pub fn into_envelope(self) -> ErrorEnvelope {
        ErrorEnvelope {
            status_code: self.status_code(),
            error_type: self.error_type().to_string(),
            code: self.code().to_string(),
            message: self.to_string(),
            is_bifrost_error: self.is_bifrost_error(),
            allow_fallbacks: self.allow_fallbacks(),
            extra_fields: ExtraFields::default(),
        }
    }
}

pub type BifrostResult<T> = Result<T, BifrostError>;
