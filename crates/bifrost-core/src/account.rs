use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use bifrost_provider_core::{ConcurrencyConfig, Key, ProviderRecord};

/// spec.md §6 "Account lookup interface" — externally implemented in the
/// real system by the SQL-backed config store, which spec.md §1 scopes out
/// of this core. The Dispatcher only ever talks to this trait; it never
/// reaches into a concrete store, mirroring the teacher's "runtime reads
/// must not hit the DB directly" discipline (`gproxy-core::state::AppState`
/// reads an in-memory `ArcSwap` snapshot, never the database, on the request
/// path).
#[async_trait]
pub trait AccountLookup: Send + Sync {
    async fn get_provider(&self, name: &str) -> Option<ProviderRecord>;
    async fn get_keys_for_provider(&self, name: &str) -> Vec<Key>;
    /// Defaults to `{concurrency: 5, buffer_size: 100}` per spec.md §6 when
    /// the implementation has no override for `name`.
    async fn get_concurrency(&self, name: &str) -> ConcurrencyConfig;
}

/// An in-memory [`AccountLookup`] for tests and the demo binary
/// (`apps/bifrost`), replacing the teacher's `SeaOrmStorage` — the SQL CRUD
/// store itself is explicitly out of scope (spec.md §1).
#[derive(Clone, Default)]
pub struct StaticAccountLookup {
    providers: Arc<HashMap<String, ProviderRecord>>,
}

impl StaticAccountLookup {
    pub fn new(providers: Vec<ProviderRecord>) -> Self {
        let map = providers.into_iter().map(|p| (p.name.clone(), p)).collect();
        Self {
            providers: Arc::new(map),
        }
    }
}

#[async_trait]
impl AccountLookup for StaticAccountLookup {
    async fn get_provider(&self, name: &str) -> Option<ProviderRecord> {
        self.providers.get(name).cloned()
    }

    async fn get_keys_for_provider(&self, name: &str) -> Vec<Key> {
        self.providers
            .get(name)
            .map(|p| p.keys.clone())
            .unwrap_or_default()
    }

    async fn get_concurrency(&self, name: &str) -> ConcurrencyConfig {
        self.providers
            .get(name)
            .map(|p| p.concurrency_config)
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bifrost_provider_core::NetworkConfig;

    fn provider(name: &str) -> ProviderRecord {
        ProviderRecord {
            name: name.to_string(),
            keys: vec![],
            network_config: NetworkConfig::default(),
            concurrency_config: ConcurrencyConfig::default(),
            proxy_config: Default::default(),
            meta_config: Default::default(),
            send_back_raw_response: false,
        }
    }

    #[tokio::test]
    async fn unknown_provider_returns_none() {
        let lookup = StaticAccountLookup::new(vec![]);
        assert!(lookup.get_provider("openai").await.is_none());
    }

    #[tokio::test]
    async fn unknown_provider_concurrency_defaults_to_5_100() {
        let lookup = StaticAccountLookup::new(vec![]);
        let cfg = lookup.get_concurrency("openai").await;
        assert_eq!(cfg.concurrency, 5);
        assert_eq!(cfg.buffer_size, 100);
    }

    #[tokio::test]
    async fn known_provider_round_trips() {
        let lookup = StaticAccountLookup::new(vec![provider("openai")]);
        assert!(lookup.get_provider("openai").await.is_some());
    }
}
