//! Keyed registry of running watchers.
//!
//! # Responsibilities
//! - At most one watcher per key
//! - Create and start watchers on first request, hand out the same `Arc` afterwards
//! - Stop watchers on removal and at shutdown
//!
//! # Design Decisions
//! - A single mutex around the map; creation happens under it so two callers
//!   racing on one key cannot both construct a watcher
//! - Watchers are built by a factory closure, so the registry stays agnostic
//!   of fetchers and settings

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::observability::metrics;
use crate::watch::watcher::{Watcher, WatchSource};

type Factory<S> = Box<dyn Fn(&<S as WatchSource>::Key) -> Watcher<S> + Send + Sync>;

/// Map from key to its single running watcher.
pub struct WatcherRegistry<S: WatchSource> {
    factory: Factory<S>,
    watchers: Mutex<HashMap<S::Key, Arc<Watcher<S>>>>,
}

impl<S: WatchSource> WatcherRegistry<S> {
    pub fn new(factory: impl Fn(&S::Key) -> Watcher<S> + Send + Sync + 'static) -> Self {
        Self {
            factory: Box::new(factory),
            watchers: Mutex::new(HashMap::new()),
        }
    }

    /// Return the watcher for `key`, creating it if needed. The returned watcher is running.
    pub fn get_or_create(&self, key: &S::Key) -> Arc<Watcher<S>> {
        let mut watchers = self.lock();
        let watcher = match watchers.get(key) {
            Some(existing) => Arc::clone(existing),
            None => {
                let created = Arc::new((self.factory)(key));
                watchers.insert(key.clone(), Arc::clone(&created));
                tracing::debug!(kind = S::KIND, key = %key, "Registered watcher");
                metrics::record_active_watchers(S::KIND, watchers.len());
                created
            }
        };
        watcher.start();
        watcher
    }

    pub fn get(&self, key: &S::Key) -> Option<Arc<Watcher<S>>> {
        self.lock().get(key).cloned()
    }

    /// Stop and forget the watcher for `key`. Returns false if there was none.
    pub fn remove(&self, key: &S::Key) -> bool {
        let removed = {
            let mut watchers = self.lock();
            let removed = watchers.remove(key);
            metrics::record_active_watchers(S::KIND, watchers.len());
            removed
        };

        match removed {
            Some(watcher) => {
                watcher.stop();
                true
            }
            None => false,
        }
    }

    /// Keys of every registered watcher, in no particular order.
    pub fn list(&self) -> Vec<S::Key> {
        self.lock().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Stop and remove every watcher. Returns how many were stopped.
    pub fn stop_all(&self) -> usize {
        let drained: Vec<_> = self.lock().drain().map(|(_, w)| w).collect();
        for watcher in &drained {
            watcher.stop();
        }
        metrics::record_active_watchers(S::KIND, 0);
        drained.len()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<S::Key, Arc<Watcher<S>>>> {
        self.watchers.lock().expect("watcher registry mutex poisoned")
    }
}

impl<S: WatchSource> std::fmt::Debug for WatcherRegistry<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatcherRegistry")
            .field("kind", &S::KIND)
            .field("watchers", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::time::Duration;

    use crate::config::CircuitBreakerConfig;
    use crate::control_plane::{ConfigFetcher, ConfigKey, ConfigSnapshot, FetchError};
    use crate::resilience::BackoffPolicy;
    use crate::watch::watcher::{ConfigSource, WatcherSettings};

    struct StaticConfig;

    #[async_trait]
    impl ConfigFetcher for StaticConfig {
        async fn fetch_config(&self, namespace: &str, group: &str, file_name: &str) -> Result<ConfigSnapshot, FetchError> {
            Ok(ConfigSnapshot::present(namespace, group, file_name, "k: v"))
        }
    }

    fn registry() -> WatcherRegistry<ConfigSource> {
        let settings = WatcherSettings {
            interval: Duration::from_secs(30),
            backoff: BackoffPolicy::new(Duration::from_millis(100), 2.0, Duration::from_secs(1), 0).unwrap(),
            breaker: CircuitBreakerConfig::default(),
        };
        let fetcher: Arc<dyn ConfigFetcher> = Arc::new(StaticConfig);
        WatcherRegistry::new(move |key: &ConfigKey| {
            Watcher::with_settings(ConfigSource::new(key.clone(), Arc::clone(&fetcher)), &settings)
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_same_key_same_watcher() {
        let registry = registry();
        let key = ConfigKey::new("app.yaml", "core", "default");

        let first = registry.get_or_create(&key);
        let second = registry.get_or_create(&key);
        assert!(Arc::ptr_eq(&first, &second));
        assert!(first.is_running());
        assert_eq!(registry.len(), 1);

        registry.get_or_create(&ConfigKey::new("db.yaml", "core", "default"));
        assert_eq!(registry.len(), 2);
        registry.stop_all();
    }

    #[tokio::test(start_paused = true)]
    async fn test_get_or_create_restarts_stopped_watcher() {
        let registry = registry();
        let key = ConfigKey::new("app.yaml", "core", "default");

        let watcher = registry.get_or_create(&key);
        watcher.stop();
        assert!(!watcher.is_running());

        let again = registry.get_or_create(&key);
        assert!(Arc::ptr_eq(&watcher, &again));
        assert!(again.is_running());
        registry.stop_all();
    }

    #[tokio::test(start_paused = true)]
    async fn test_remove_stops_watcher() {
        let registry = registry();
        let key = ConfigKey::new("app.yaml", "core", "default");
        let watcher = registry.get_or_create(&key);

        assert!(registry.remove(&key));
        assert!(!watcher.is_running());
        assert!(registry.get(&key).is_none());
        assert!(!registry.remove(&key));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_all() {
        let registry = registry();
        let watchers: Vec<_> = ["a", "b", "c"]
            .iter()
            .map(|f| registry.get_or_create(&ConfigKey::new(*f, "core", "default")))
            .collect();

        let mut keys: Vec<_> = registry.list().into_iter().map(|k| k.file_name).collect();
        keys.sort();
        assert_eq!(keys, ["a", "b", "c"]);

        assert_eq!(registry.stop_all(), 3);
        assert!(registry.is_empty());
        assert!(watchers.iter().all(|w| !w.is_running()));
    }
}
