use clap::Parser;

/// Mirrors the teacher's `gproxy-core::bootstrap::CliArgs`: every flag has an
/// `env` fallback so the binary runs the same way under a process manager or
/// a shell one-liner.
#[derive(Debug, Clone, Parser)]
#[command(name = "bifrost", version, about = "Bifrost dispatch engine demo binary")]
pub struct CliArgs {
    /// Path to a JSON array of provider records (spec.md §3 "Provider Record").
    #[arg(long, env = "BIFROST_PROVIDERS_CONFIG")]
    pub providers_config: String,

    /// Path to a JSON-encoded NormalizedRequest to dispatch. Reads stdin when omitted.
    #[arg(long, env = "BIFROST_REQUEST")]
    pub request: Option<String>,

    /// Dispatch via `dispatch_stream` instead of `dispatch` and print each delta.
    #[arg(long, env = "BIFROST_STREAM")]
    pub stream: bool,

    /// Overall deadline for the request, in seconds.
    #[arg(long, env = "BIFROST_DEADLINE_SECS")]
    pub deadline_secs: Option<u64>,

    /// Virtual key forwarded into the Request Context (spec.md §4.8).
    #[arg(long, env = "BIFROST_VIRTUAL_KEY")]
    pub virtual_key: Option<String>,
}
