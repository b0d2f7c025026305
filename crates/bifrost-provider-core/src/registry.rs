use std::collections::HashMap;
use std::sync::Arc;

use crate::adapter::ProviderAdapter;

/// The set of installed [`ProviderAdapter`] implementations, keyed by
/// provider name. Read-mostly (spec.md §5): built once at startup and wrapped
/// in an `ArcSwap` by `bifrost-core` for hot reload.
#[derive(Default, Clone)]
pub struct AdapterRegistry {
    adapters: HashMap<String, Arc<dyn ProviderAdapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, adapter: Arc<dyn ProviderAdapter>) {
        self.adapters.insert(adapter.name().to_string(), adapter);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ProviderAdapter>> {
        self.adapters.get(name).cloned()
    }

    pub fn names(&self) -> Vec<&str> {
        self.adapters.keys().map(|s| s.as_str()).collect()
    }
}
