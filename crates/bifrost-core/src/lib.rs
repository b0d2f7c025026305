//! The dispatch engine — spec.md §4: Dispatcher, Plugin Pipeline, Fallback
//! Controller, Worker Pool, Streaming Assembler, Request Context.
//!
//! Consumes [`bifrost_protocol::NormalizedRequest`] and produces
//! [`bifrost_protocol::NormalizedResponse`] or a channel of
//! [`bifrost_protocol::DeltaEnvelope`]; HTTP transport, the config store, and
//! plugin business logic (governance, rate limiting, semantic cache, MCP
//! bridge, observability, UI) are external collaborators (spec.md §1).

pub mod account;
pub mod context;
pub mod dispatcher;
pub mod errors;
pub mod fallback;
pub mod http_client;
mod invoke;
pub mod pipeline;
pub mod plugins;
pub mod pool;
pub mod registry;
mod sse;
pub mod stream;

pub use account::{AccountLookup, StaticAccountLookup};
pub use context::RequestContext;
pub use dispatcher::Dispatcher;
pub use errors::{BifrostError, BifrostResult};
pub use fallback::FallbackController;
pub use http_client::{ChunkStream, HttpClient, WreqHttpClient};
pub use pipeline::{Pipeline, Plugin, PostHookResult, PreHookOutcome, ShortCircuitBody};
pub use plugins::PluginRegistry;
pub use pool::{DispatchOutcome, PoolConfigError, WorkerPool};
pub use registry::{ProviderRegistry, ProviderRuntime, ReloadError};
