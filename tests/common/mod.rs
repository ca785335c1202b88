//! Shared utilities for integration testing.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use control_plane_watch::config::WatchConfig;
use control_plane_watch::control_plane::{ConfigFetcher, ConfigSnapshot, FetchError, Instance, InstanceFetcher};

/// In-memory control plane whose answers tests can change between ticks.
#[derive(Default)]
pub struct FakeControlPlane {
    services: Mutex<HashMap<String, Vec<Instance>>>,
    configs: Mutex<HashMap<(String, String), String>>,
    /// Errors returned, in order, before the stored state is served again.
    failures: Mutex<VecDeque<FetchError>>,
    /// Delay before every answer.
    latency: Mutex<Duration>,
    pub instance_calls: AtomicUsize,
    pub config_calls: AtomicUsize,
}

impl FakeControlPlane {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_instances(&self, service: &str, instances: Vec<Instance>) {
        self.services.lock().unwrap().insert(service.to_string(), instances);
    }

    pub fn set_config(&self, group: &str, file_name: &str, content: &str) {
        self.configs
            .lock()
            .unwrap()
            .insert((group.to_string(), file_name.to_string()), content.to_string());
    }

    pub fn delete_config(&self, group: &str, file_name: &str) {
        self.configs
            .lock()
            .unwrap()
            .remove(&(group.to_string(), file_name.to_string()));
    }

    /// Queue `n` copies of `err` for the next fetches of either kind.
    pub fn fail_next(&self, n: usize, err: FetchError) {
        let mut failures = self.failures.lock().unwrap();
        failures.extend(std::iter::repeat(err).take(n));
    }

    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock().unwrap() = latency;
    }

    pub fn instance_calls(&self) -> usize {
        self.instance_calls.load(Ordering::SeqCst)
    }

    pub fn config_calls(&self) -> usize {
        self.config_calls.load(Ordering::SeqCst)
    }

    fn next_failure(&self) -> Option<FetchError> {
        self.failures.lock().unwrap().pop_front()
    }

    async fn respond_delay(&self) {
        let latency = *self.latency.lock().unwrap();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
    }
}

#[async_trait]
impl InstanceFetcher for FakeControlPlane {
    async fn fetch_instances(&self, service: &str, _namespace: &str) -> Result<Vec<Instance>, FetchError> {
        self.instance_calls.fetch_add(1, Ordering::SeqCst);
        self.respond_delay().await;
        if let Some(err) = self.next_failure() {
            return Err(err);
        }
        Ok(self.services.lock().unwrap().get(service).cloned().unwrap_or_default())
    }
}

#[async_trait]
impl ConfigFetcher for FakeControlPlane {
    async fn fetch_config(&self, namespace: &str, group: &str, file_name: &str) -> Result<ConfigSnapshot, FetchError> {
        self.config_calls.fetch_add(1, Ordering::SeqCst);
        self.respond_delay().await;
        if let Some(err) = self.next_failure() {
            return Err(err);
        }
        let content = self
            .configs
            .lock()
            .unwrap()
            .get(&(group.to_string(), file_name.to_string()))
            .cloned();
        Ok(match content {
            Some(content) => ConfigSnapshot::present(namespace, group, file_name, content),
            None => ConfigSnapshot::absent(namespace, group, file_name),
        })
    }
}

pub fn instance(id: &str, healthy: bool) -> Instance {
    let mut instance = Instance::new(id, format!("10.0.0.{}", id), 8080);
    instance.healthy = healthy;
    instance
}

/// Default config with fast retries, suitable for paused-time tests.
pub fn test_config(max_attempts: u32) -> WatchConfig {
    let mut config = WatchConfig::default();
    config.retry.max_attempts = max_attempts;
    config.retry.base_delay_ms = 100;
    config.retry.max_delay_ms = 1000;
    config
}

/// Sleep until just past the `n`th tick of a watcher started at `start`.
pub async fn past_tick(start: Instant, interval: Duration, n: u32) {
    tokio::time::sleep_until(start + interval * n + Duration::from_millis(500)).await;
}
