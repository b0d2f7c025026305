//! Provider Adapter contract, Key Selector, and provider/key data model.
//!
//! This crate intentionally does not perform network IO — adapters build
//! [`http::HttpRequest`] values, and `bifrost-core`'s Worker Pool executes
//! them (spec.md §4.6).

pub mod adapter;
pub mod errors;
pub mod http;
pub mod key_selector;
pub mod record;
pub mod registry;

pub use adapter::{ProviderAdapter, StreamChunkOutcome};
pub use errors::{ProviderError, ProviderResult};
pub use http::{HttpMethod, HttpRequest, HttpResponse, Headers, UpstreamError, header_get, header_set};
pub use key_selector::{NoKeyAvailable, candidates, select_key};
pub use record::{ConcurrencyConfig, Key, MetaConfig, NetworkConfig, ProviderRecord, ProxyConfig, ProxyType};
pub use registry::AdapterRegistry;
