use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::pipeline::Plugin;

/// The ordered, named plugin list backing the Dispatcher's `reload_plugin`/
/// `remove_plugin` operations (spec.md §6). A plain `Vec` rather than a map:
/// registration order *is* pre-hook order (spec.md §4.2), so insertion needs
/// to preserve position on replace and append on first registration.
///
/// Held behind an `ArcSwap` for the same reason as
/// [`crate::registry::ProviderRegistry`]'s runtime map: readers (each
/// in-flight `dispatch` call building its [`crate::pipeline::Pipeline`]
/// snapshot) never block a concurrent `reload_plugin`/`remove_plugin` writer,
/// and in-flight requests keep running against whichever plugin list they
/// already captured.
pub struct PluginRegistry {
    entries: ArcSwap<Vec<(String, Arc<dyn Plugin>)>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self {
            entries: ArcSwap::from_pointee(Vec::new()),
        }
    }

    /// spec.md §6 `reload_plugin(name, config)`: "Inserts/replaces a plugin;
    /// runs its init." Replacing preserves the original position so
    /// pre-hook order for unrelated plugins is undisturbed.
    pub async fn reload_plugin(&self, name: &str, plugin: Arc<dyn Plugin>) {
        plugin.init().await;
        let mut entries = (**self.entries.load()).clone();
        match entries.iter().position(|(n, _)| n == name) {
            Some(idx) => entries[idx] = (name.to_string(), plugin),
            None => entries.push((name.to_string(), plugin)),
        }
        self.entries.store(Arc::new(entries));
        tracing::info!(plugin = name, "plugin reloaded");
    }

    /// spec.md §6 `remove_plugin(name)`: "Unregisters; runs cleanup."
    pub async fn remove_plugin(&self, name: &str) {
        let removed = {
            let mut entries = (**self.entries.load()).clone();
            let removed = entries
                .iter()
                .position(|(n, _)| n == name)
                .map(|idx| entries.remove(idx).1);
            self.entries.store(Arc::new(entries));
            removed
        };
        if let Some(plugin) = removed {
            plugin.cleanup().await;
        }
    }

    pub fn names(&self) -> Vec<String> {
        self.entries.load().iter().map(|(n, _)| n.clone()).collect()
    }

    /// A snapshot of the current ordered plugin list, ready to build a
    /// [`crate::pipeline::Pipeline`] for one request.
    pub fn snapshot(&self) -> Vec<Arc<dyn Plugin>> {
        self.entries.load().iter().map(|(_, p)| p.clone()).collect()
    }

    /// spec.md §5 "Graceful shutdown": "run plugin `cleanup` hooks in
    /// reverse registration order."
    pub async fn shutdown(&self) {
        for (_, plugin) in self.entries.load().iter().rev() {
            plugin.cleanup().await;
        }
    }
}

impl Default for PluginRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::RequestContext;
    use crate::pipeline::PreHookOutcome;
    use async_trait::async_trait;
    use bifrost_protocol::NormalizedRequest;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingPlugin {
        name: &'static str,
        inits: Arc<AtomicUsize>,
        cleanups: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Plugin for CountingPlugin {
        fn name(&self) -> &str {
            self.name
        }
        async fn init(&self) {
            self.inits.fetch_add(1, Ordering::SeqCst);
        }
        async fn pre_hook(&self, _ctx: &RequestContext, req: NormalizedRequest) -> PreHookOutcome {
            PreHookOutcome::Continue(req)
        }
        async fn cleanup(&self) {
            self.cleanups.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn reload_runs_init_and_replace_preserves_position() {
        let registry = PluginRegistry::new();
        let inits = Arc::new(AtomicUsize::new(0));
        let cleanups = Arc::new(AtomicUsize::new(0));
        registry
            .reload_plugin(
                "a",
                Arc::new(CountingPlugin { name: "a", inits: inits.clone(), cleanups: cleanups.clone() }),
            )
            .await;
        registry
            .reload_plugin(
                "b",
                Arc::new(CountingPlugin { name: "b", inits: inits.clone(), cleanups: cleanups.clone() }),
            )
            .await;
        assert_eq!(registry.names(), vec!["a".to_string(), "b".to_string()]);

        registry
            .reload_plugin(
                "a",
                Arc::new(CountingPlugin { name: "a", inits: inits.clone(), cleanups: cleanups.clone() }),
            )
            .await;
        assert_eq!(registry.names(), vec!["a".to_string(), "b".to_string()]);
        assert_eq!(inits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn remove_runs_cleanup() {
        let registry = PluginRegistry::new();
        let inits = Arc::new(AtomicUsize::new(0));
        let cleanups = Arc::new(AtomicUsize::new(0));
        registry
            .reload_plugin(
                "a",
                Arc::new(CountingPlugin { name: "a", inits, cleanups: cleanups.clone() }),
            )
            .await;
        registry.remove_plugin("a").await;
        assert!(registry.names().is_empty());
        assert_eq!(cleanups.load(Ordering::SeqCst), 1);
    }
}
