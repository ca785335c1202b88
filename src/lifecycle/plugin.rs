//! Control-plane watch plugin.
//!
//! # Responsibilities
//! - Own one service registry and one config registry
//! - Gate every request on the plugin state (not started, running, stopped)
//! - Serve one-shot queries through a shared breaker and retry manager
//! - Attach health reporting to every watcher it creates
//! - Stop everything on `stop`
//!
//! # Design Decisions
//! - Explicitly constructed and passed around, never a global
//! - The plugin is single-use: once stopped it cannot be started again
//! - One-shot queries share one breaker; each watcher has its own
//! - Stopping cancels in-flight queries, which then report `Stopped`
//! - Watch requests register their watcher under the state lock, so none
//!   survives a concurrent `stop`

use std::sync::{Arc, Mutex, MutexGuard};

use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::{validate_config, ValidationError, WatchConfig};
use crate::control_plane::{
    ConfigFetcher, ConfigKey, ConfigSnapshot, FetchError, Instance, InstanceFetcher, InstanceSummary, ServiceKey,
};
use crate::observability::metrics;
use crate::resilience::{BackoffPolicy, CircuitBreaker, InvalidBackoff, RetryError, RetryManager};
use crate::watch::{
    ConfigSource, ConfigWatcher, ServiceSource, ServiceWatcher, WatchError, Watcher, WatcherRegistry,
    WatcherSettings,
};

/// Errors returned by the plugin API.
#[derive(Debug, Error)]
pub enum PluginError {
    #[error("control plane watch has not been started")]
    NotStarted,

    #[error("control plane watch has been stopped")]
    Stopped,

    #[error(transparent)]
    Watch(#[from] WatchError),

    #[error("config file {group}/{file} not found")]
    ConfigNotFound { group: String, file: String },

    #[error("invalid configuration: {}", join_errors(.0))]
    InvalidConfig(Vec<ValidationError>),

    #[error("invalid retry settings: {0}")]
    InvalidBackoff(#[from] InvalidBackoff),
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PluginState {
    NotStarted,
    Running,
    Stopped,
}

/// Client-side watch layer over a service registry and configuration store.
pub struct ControlPlaneWatch {
    config: WatchConfig,
    state: Mutex<PluginState>,
    cancel: CancellationToken,
    instance_fetcher: Arc<dyn InstanceFetcher>,
    config_fetcher: Arc<dyn ConfigFetcher>,
    retry: RetryManager,
    breaker: CircuitBreaker,
    services: WatcherRegistry<ServiceSource>,
    configs: WatcherRegistry<ConfigSource>,
}

impl ControlPlaneWatch {
    /// Validate `config` and build a plugin in the not-started state.
    pub fn new(
        config: WatchConfig,
        instance_fetcher: Arc<dyn InstanceFetcher>,
        config_fetcher: Arc<dyn ConfigFetcher>,
    ) -> Result<Self, PluginError> {
        validate_config(&config).map_err(PluginError::InvalidConfig)?;
        let backoff = BackoffPolicy::from_config(&config.retry)?;

        let service_settings = WatcherSettings {
            interval: config.watch.service_interval(),
            backoff: backoff.clone(),
            breaker: config.circuit_breaker.clone(),
        };
        let fetcher = Arc::clone(&instance_fetcher);
        let services = WatcherRegistry::new(move |key: &ServiceKey| {
            let source = ServiceSource::new(key.clone(), Arc::clone(&fetcher));
            let watcher = Watcher::with_settings(source, &service_settings);
            let service = key.service.clone();
            watcher.on_change(move |instances: &Vec<Instance>| report_service_health(&service, instances));
            let key = key.clone();
            watcher.on_error(move |err| {
                tracing::warn!(service = %key, error = %err, "Service watch error");
            });
            watcher
        });

        let config_settings = WatcherSettings {
            interval: config.watch.config_interval(),
            backoff: backoff.clone(),
            breaker: config.circuit_breaker.clone(),
        };
        let fetcher = Arc::clone(&config_fetcher);
        let configs = WatcherRegistry::new(move |key: &ConfigKey| {
            let source = ConfigSource::new(key.clone(), Arc::clone(&fetcher));
            let watcher = Watcher::with_settings(source, &config_settings);
            watcher.on_change(|snapshot: &ConfigSnapshot| {
                if snapshot.present {
                    tracing::info!(
                        group = %snapshot.group,
                        file = %snapshot.file_name,
                        content_length = snapshot.content.len(),
                        "Config file updated"
                    );
                } else {
                    tracing::warn!(group = %snapshot.group, file = %snapshot.file_name, "Config file removed");
                }
            });
            let key = key.clone();
            watcher.on_error(move |err| {
                tracing::warn!(config = %key, error = %err, "Config watch error");
            });
            watcher
        });

        let breaker = CircuitBreaker::new("control_plane_query", &config.circuit_breaker);

        Ok(Self {
            config,
            state: Mutex::new(PluginState::NotStarted),
            cancel: CancellationToken::new(),
            instance_fetcher,
            config_fetcher,
            retry: RetryManager::new(backoff),
            breaker,
            services,
            configs,
        })
    }

    pub fn config(&self) -> &WatchConfig {
        &self.config
    }

    /// Breaker guarding one-shot queries.
    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// Enter the running state. Idempotent while running; fails once stopped.
    pub fn start(&self) -> Result<(), PluginError> {
        let mut state = self.lock_state();
        match *state {
            PluginState::Running => Ok(()),
            PluginState::Stopped => Err(PluginError::Stopped),
            PluginState::NotStarted => {
                *state = PluginState::Running;
                tracing::info!(namespace = %self.config.namespace, "Control plane watch started");
                Ok(())
            }
        }
    }

    /// Stop every watcher and cancel in-flight queries. Idempotent.
    pub fn stop(&self) {
        {
            let mut state = self.lock_state();
            if *state == PluginState::Stopped {
                return;
            }
            *state = PluginState::Stopped;
        }

        self.cancel.cancel();
        let services = self.services.stop_all();
        let configs = self.configs.stop_all();
        tracing::info!(
            service_watchers = services,
            config_watchers = configs,
            "Control plane watch stopped, cleaned up watchers"
        );
    }

    pub fn is_running(&self) -> bool {
        *self.lock_state() == PluginState::Running
    }

    /// Watch `service` in the configured namespace, reusing an existing watcher.
    pub fn watch_service(&self, service: &str) -> Result<Arc<ServiceWatcher>, PluginError> {
        // held until the watcher is registered, so `stop` cannot slip in between
        let _state = self.running_state()?;
        let key = ServiceKey::new(service, &self.config.namespace);
        tracing::info!(service = %key, "Watching service");
        Ok(self.services.get_or_create(&key))
    }

    /// Watch `file_name` in `group`, reusing an existing watcher.
    pub fn watch_config(&self, file_name: &str, group: &str) -> Result<Arc<ConfigWatcher>, PluginError> {
        let _state = self.running_state()?;
        let key = ConfigKey::new(file_name, group, &self.config.namespace);
        tracing::info!(config = %key, "Watching config file");
        Ok(self.configs.get_or_create(&key))
    }

    /// Stop watching `service`. Returns false if it was not watched.
    pub fn unwatch_service(&self, service: &str) -> bool {
        self.services.remove(&ServiceKey::new(service, &self.config.namespace))
    }

    /// Stop watching `file_name` in `group`. Returns false if it was not watched.
    pub fn unwatch_config(&self, file_name: &str, group: &str) -> bool {
        self.configs.remove(&ConfigKey::new(file_name, group, &self.config.namespace))
    }

    /// Fetch the current instances of `service` once.
    pub async fn get_instances(&self, service: &str) -> Result<Vec<Instance>, PluginError> {
        self.ensure_running()?;
        let namespace = self.config.namespace.as_str();
        let started = Instant::now();

        let result = self
            .breaker
            .call_classified(
                || {
                    self.retry.run_cancellable_if(&self.cancel, FetchError::is_retryable, || {
                        self.instance_fetcher.fetch_instances(service, namespace)
                    })
                },
                |e: &RetryError<FetchError>| !e.is_cancelled(),
            )
            .await
            .map_err(WatchError::from);

        if self.cancel.is_cancelled() {
            return Err(PluginError::Stopped);
        }

        match result {
            Ok(instances) => {
                metrics::record_fetch("service", "success", started);
                tracing::info!(service, namespace, count = instances.len(), "Fetched service instances");
                report_service_health(service, &instances);
                Ok(instances)
            }
            Err(err) => Err(self.query_failed("service", service, err, started)),
        }
    }

    /// Fetch `file_name` in `group` once. A missing file is `ConfigNotFound`.
    pub async fn get_config(&self, file_name: &str, group: &str) -> Result<ConfigSnapshot, PluginError> {
        self.ensure_running()?;
        let namespace = self.config.namespace.as_str();
        let started = Instant::now();

        let result = self
            .breaker
            .call_classified(
                || {
                    self.retry.run_cancellable_if(&self.cancel, FetchError::is_retryable, || {
                        self.config_fetcher.fetch_config(namespace, group, file_name)
                    })
                },
                |e: &RetryError<FetchError>| !e.is_cancelled(),
            )
            .await
            .map_err(WatchError::from);

        if self.cancel.is_cancelled() {
            return Err(PluginError::Stopped);
        }

        match result {
            Ok(snapshot) if !snapshot.present => {
                metrics::record_fetch("config", "not_found", started);
                Err(PluginError::ConfigNotFound {
                    group: group.to_string(),
                    file: file_name.to_string(),
                })
            }
            Ok(snapshot) => {
                metrics::record_fetch("config", "success", started);
                tracing::debug!(group, file = file_name, content_length = snapshot.content.len(), "Fetched config file");
                Ok(snapshot)
            }
            Err(err) => Err(self.query_failed("config", file_name, err, started)),
        }
    }

    /// Keys of every service being watched.
    pub fn service_watchers(&self) -> Vec<ServiceKey> {
        self.services.list()
    }

    /// Keys of every config file being watched.
    pub fn config_watchers(&self) -> Vec<ConfigKey> {
        self.configs.list()
    }

    fn query_failed(&self, kind: &'static str, target: &str, err: WatchError, started: Instant) -> PluginError {
        if err.is_cancelled() {
            return PluginError::Stopped;
        }
        metrics::record_fetch(kind, "error", started);
        tracing::error!(kind, target, error = %err, "Control plane query failed");
        PluginError::Watch(err)
    }

    fn ensure_running(&self) -> Result<(), PluginError> {
        self.running_state().map(drop)
    }

    /// The state guard, if the plugin is running.
    fn running_state(&self) -> Result<MutexGuard<'_, PluginState>, PluginError> {
        let state = self.lock_state();
        match *state {
            PluginState::Running => Ok(state),
            PluginState::NotStarted => Err(PluginError::NotStarted),
            PluginState::Stopped => Err(PluginError::Stopped),
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, PluginState> {
        self.state.lock().expect("plugin state mutex poisoned")
    }
}

impl Drop for ControlPlaneWatch {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Publish the health breakdown of `service` and warn when it looks degraded.
fn report_service_health(service: &str, instances: &[Instance]) {
    let summary = InstanceSummary::from_instances(instances);
    metrics::record_instance_summary(service, &summary);

    if summary.total > 0 && summary.healthy == 0 {
        tracing::warn!(
            service,
            total = summary.total,
            unhealthy = summary.unhealthy,
            isolated = summary.isolated,
            "Service has no healthy instances"
        );
    } else if summary.healthy < summary.total / 2 {
        tracing::warn!(service, healthy = summary.healthy, total = summary.total, "Service has low healthy instance ratio");
    } else {
        tracing::debug!(service, healthy = summary.healthy, total = summary.total, "Service instances updated");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Fixed {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl InstanceFetcher for Fixed {
        async fn fetch_instances(&self, service: &str, _namespace: &str) -> Result<Vec<Instance>, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match service {
                "missing" => Err(FetchError::Rejected("unknown service".into())),
                _ => Ok(vec![Instance::new("1", "10.0.0.1", 8080)]),
            }
        }
    }

    #[async_trait]
    impl ConfigFetcher for Fixed {
        async fn fetch_config(&self, namespace: &str, group: &str, file_name: &str) -> Result<ConfigSnapshot, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match file_name {
                "app.yaml" => Ok(ConfigSnapshot::present(namespace, group, file_name, "port: 80")),
                _ => Ok(ConfigSnapshot::absent(namespace, group, file_name)),
            }
        }
    }

    fn plugin() -> (ControlPlaneWatch, Arc<Fixed>) {
        let fetcher = Arc::new(Fixed::default());
        let plugin = ControlPlaneWatch::new(WatchConfig::default(), fetcher.clone(), fetcher.clone()).unwrap();
        (plugin, fetcher)
    }

    #[test]
    fn test_rejects_invalid_config() {
        let mut config = WatchConfig::default();
        config.circuit_breaker.threshold = 1.5;
        let fetcher = Arc::new(Fixed::default());
        let err = ControlPlaneWatch::new(config, fetcher.clone(), fetcher).err().unwrap();
        assert!(matches!(err, PluginError::InvalidConfig(ref errors) if errors[0].field == "circuit_breaker.threshold"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_state_gates_requests() {
        let (plugin, fetcher) = plugin();
        assert!(matches!(plugin.watch_service("svc-a"), Err(PluginError::NotStarted)));
        assert!(matches!(plugin.get_instances("svc-a").await, Err(PluginError::NotStarted)));
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 0);

        plugin.start().unwrap();
        plugin.start().unwrap();
        assert!(plugin.is_running());

        plugin.stop();
        plugin.stop();
        assert!(matches!(plugin.watch_config("app.yaml", "core"), Err(PluginError::Stopped)));
        assert!(matches!(plugin.start(), Err(PluginError::Stopped)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_watch_reuses_watchers_and_stop_cleans_up() {
        let (plugin, _) = plugin();
        plugin.start().unwrap();

        let a = plugin.watch_service("svc-a").unwrap();
        let again = plugin.watch_service("svc-a").unwrap();
        assert!(Arc::ptr_eq(&a, &again));
        assert_eq!(a.key(), &ServiceKey::new("svc-a", "default"));
        assert_eq!(a.interval(), std::time::Duration::from_secs(10));

        let c = plugin.watch_config("app.yaml", "core").unwrap();
        assert_eq!(c.interval(), std::time::Duration::from_secs(30));
        assert_eq!(plugin.service_watchers().len(), 1);
        assert_eq!(plugin.config_watchers(), vec![ConfigKey::new("app.yaml", "core", "default")]);

        plugin.stop();
        assert!(!a.is_running());
        assert!(!c.is_running());
        assert!(plugin.service_watchers().is_empty());
        assert!(plugin.config_watchers().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unwatch() {
        let (plugin, _) = plugin();
        plugin.start().unwrap();
        let w = plugin.watch_service("svc-a").unwrap();

        assert!(plugin.unwatch_service("svc-a"));
        assert!(!w.is_running());
        assert!(!plugin.unwatch_service("svc-a"));
        assert!(!plugin.unwatch_config("app.yaml", "core"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_one_shot_queries() {
        let (plugin, _) = plugin();
        plugin.start().unwrap();

        let instances = plugin.get_instances("svc-a").await.unwrap();
        assert_eq!(instances.len(), 1);

        let snapshot = plugin.get_config("app.yaml", "core").await.unwrap();
        assert_eq!(snapshot.content, "port: 80");

        let err = plugin.get_config("gone.yaml", "core").await.unwrap_err();
        assert!(matches!(err, PluginError::ConfigNotFound { ref file, .. } if file == "gone.yaml"));
        assert_eq!(err.to_string(), "config file core/gone.yaml not found");
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_query_error() {
        let (plugin, fetcher) = plugin();
        plugin.start().unwrap();

        let err = plugin.get_instances("missing").await.unwrap_err();
        assert!(matches!(err, PluginError::Watch(WatchError::Fetch(FetchError::Rejected(_)))));
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
    }
}
