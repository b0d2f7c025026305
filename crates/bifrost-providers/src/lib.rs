//! Built-in [`ProviderAdapter`] implementations — spec.md §4.6.
//!
//! Each vendor gets its own module; [`install_builtin_adapters`] is the one
//! entry point `bifrost-core`'s bootstrap calls to populate a fresh
//! [`AdapterRegistry`].

mod anthropic;
mod azure;
mod bedrock;
mod cohere;
pub mod common;
mod custom;
mod ollama;
mod openai;
mod vertex;
mod vertex_oauth;

use std::sync::Arc;

use bifrost_provider_core::AdapterRegistry;

pub use anthropic::AnthropicAdapter;
pub use azure::AzureAdapter;
pub use bedrock::BedrockAdapter;
pub use cohere::CohereAdapter;
pub use custom::CustomAdapter;
pub use ollama::OllamaAdapter;
pub use openai::OpenAiAdapter;
pub use vertex::VertexAdapter;

/// Registers every built-in adapter spec.md §4.6 names (`openai`,
/// `anthropic`, `bedrock`, `azure`, `vertex`, `cohere`, `ollama`) under its
/// canonical provider name. Custom providers are registered separately per
/// configured name, since their name comes from configuration, not a
/// built-in constant (spec.md §3 `Provider::Custom`).
pub fn install_builtin_adapters(registry: &mut AdapterRegistry) {
    registry.register(Arc::new(OpenAiAdapter::new()));
    registry.register(Arc::new(AnthropicAdapter::new()));
    registry.register(Arc::new(BedrockAdapter::new()));
    registry.register(Arc::new(AzureAdapter::new()));
    registry.register(Arc::new(VertexAdapter::new()));
    registry.register(Arc::new(CohereAdapter::new()));
    registry.register(Arc::new(OllamaAdapter::new()));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn installs_every_named_builtin() {
        let mut registry = AdapterRegistry::new();
        install_builtin_adapters(&mut registry);
        for name in ["openai", "anthropic", "bedrock", "azure", "vertex", "cohere", "ollama"] {
            assert!(registry.get(name).is_some(), "missing builtin adapter: {name}");
        }
    }
}
