//! Polling watchers.
//!
//! # Responsibilities
//! - Periodically fetch a snapshot from the control plane
//! - Guard each fetch with the watcher's own circuit breaker and retry manager
//! - Replace the snapshot and notify subscribers only when it changed
//! - Route fetch errors to `on_error` subscribers and keep polling
//!
//! # Design Decisions
//! - One tokio task per running watcher; ticks are strictly sequential
//! - The first tick fires one interval after `start`
//! - Callbacks run synchronously on the polling task, outside the watcher lock.
//!   A slow callback delays the next tick; offload heavy work to your own task.
//! - Callbacks must not panic: a panic ends the polling task
//! - `stop` only signals; the task exits at its next suspension point (tick
//!   wait, fetch or backoff) without a final callback. A result that lands
//!   after `stop` is dropped. Use `stop_and_wait` for strict drain.

use std::fmt;
use std::hash::Hash;
use std::ops::ControlFlow;
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::config::CircuitBreakerConfig;
use crate::control_plane::{
    ConfigFetcher, ConfigKey, ConfigSnapshot, FetchError, Instance, InstanceFetcher, ServiceKey,
};
use crate::observability::metrics;
use crate::resilience::{BackoffPolicy, CircuitBreaker, RetryError, RetryManager};
use crate::watch::diff::{config_changed, instances_changed};
use crate::watch::types::{ChangeCallback, ErrorCallback, WatchError};

/// Something a watcher can poll: a keyed fetch plus a change test.
#[async_trait]
pub trait WatchSource: Send + Sync + 'static {
    type Key: Clone + Eq + Hash + fmt::Display + fmt::Debug + Send + Sync + 'static;
    type Snapshot: Clone + Send + Sync + 'static;

    /// Label for logs and metrics ("service", "config").
    const KIND: &'static str;

    fn key(&self) -> &Self::Key;

    async fn fetch(&self) -> Result<Self::Snapshot, FetchError>;

    /// Whether `new` should replace `old` and be announced.
    fn changed(old: Option<&Self::Snapshot>, new: &Self::Snapshot) -> bool;
}

/// Polls the instance set of one service.
pub struct ServiceSource {
    key: ServiceKey,
    fetcher: Arc<dyn InstanceFetcher>,
}

impl ServiceSource {
    pub fn new(key: ServiceKey, fetcher: Arc<dyn InstanceFetcher>) -> Self {
        Self { key, fetcher }
    }
}

#[async_trait]
impl WatchSource for ServiceSource {
    type Key = ServiceKey;
    type Snapshot = Vec<Instance>;

    const KIND: &'static str = "service";

    fn key(&self) -> &ServiceKey {
        &self.key
    }

    async fn fetch(&self) -> Result<Vec<Instance>, FetchError> {
        self.fetcher
            .fetch_instances(&self.key.service, &self.key.namespace)
            .await
    }

    fn changed(old: Option<&Vec<Instance>>, new: &Vec<Instance>) -> bool {
        instances_changed(old.map(Vec::as_slice).unwrap_or(&[]), new)
    }
}

/// Polls one configuration file.
pub struct ConfigSource {
    key: ConfigKey,
    fetcher: Arc<dyn ConfigFetcher>,
}

impl ConfigSource {
    pub fn new(key: ConfigKey, fetcher: Arc<dyn ConfigFetcher>) -> Self {
        Self { key, fetcher }
    }
}

#[async_trait]
impl WatchSource for ConfigSource {
    type Key = ConfigKey;
    type Snapshot = ConfigSnapshot;

    const KIND: &'static str = "config";

    fn key(&self) -> &ConfigKey {
        &self.key
    }

    async fn fetch(&self) -> Result<ConfigSnapshot, FetchError> {
        self.fetcher
            .fetch_config(&self.key.namespace, &self.key.group, &self.key.file_name)
            .await
    }

    fn changed(old: Option<&ConfigSnapshot>, new: &ConfigSnapshot) -> bool {
        config_changed(old, Some(new))
    }
}

/// Per-watcher settings; each watcher builds its own breaker and retry manager from them.
#[derive(Debug, Clone)]
pub struct WatcherSettings {
    pub interval: Duration,
    pub backoff: BackoffPolicy,
    pub breaker: CircuitBreakerConfig,
}

struct Subscription<T> {
    last: Option<T>,
    on_change: Vec<ChangeCallback<T>>,
    on_error: Vec<ErrorCallback>,
}

struct PollTask {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// A polling watcher over one key.
pub struct Watcher<S: WatchSource> {
    source: S,
    interval: Duration,
    retry: RetryManager,
    breaker: CircuitBreaker,
    subscription: RwLock<Subscription<S::Snapshot>>,
    task: Mutex<Option<PollTask>>,
}

/// Watches the instance set of a service.
pub type ServiceWatcher = Watcher<ServiceSource>;

/// Watches a configuration file.
pub type ConfigWatcher = Watcher<ConfigSource>;

impl<S: WatchSource> Watcher<S> {
    pub fn new(source: S, interval: Duration, retry: RetryManager, breaker: CircuitBreaker) -> Self {
        Self {
            source,
            interval,
            retry,
            breaker,
            subscription: RwLock::new(Subscription {
                last: None,
                on_change: Vec::new(),
                on_error: Vec::new(),
            }),
            task: Mutex::new(None),
        }
    }

    /// Build a stopped watcher with a fresh breaker and retry manager.
    pub fn with_settings(source: S, settings: &WatcherSettings) -> Self {
        let breaker = CircuitBreaker::new(format!("{}:{}", S::KIND, source.key()), &settings.breaker);
        let retry = RetryManager::new(settings.backoff.clone());
        Self::new(source, settings.interval, retry, breaker)
    }

    pub fn key(&self) -> &S::Key {
        self.source.key()
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// This watcher's breaker, for state inspection or operational override.
    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// Spawn the polling task. No-op while already running.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(self: &Arc<Self>) {
        let mut task = self.lock_task();
        if task.as_ref().is_some_and(|t| !t.handle.is_finished()) {
            return;
        }

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(Arc::clone(self).run(cancel.clone()));
        *task = Some(PollTask { cancel, handle });

        tracing::info!(
            kind = S::KIND,
            key = %self.key(),
            interval = ?self.interval,
            "Started watching"
        );
    }

    /// Signal the polling task to exit and return immediately. No-op while stopped.
    pub fn stop(&self) {
        let task = self.lock_task().take();
        if let Some(task) = task {
            task.cancel.cancel();
            tracing::info!(kind = S::KIND, key = %self.key(), "Stopped watching");
        }
    }

    /// Stop and wait for the polling task to finish its current tick.
    ///
    /// Must not be called from one of this watcher's own callbacks.
    pub async fn stop_and_wait(&self) {
        let task = self.lock_task().take();
        if let Some(task) = task {
            task.cancel.cancel();
            if let Err(e) = task.handle.await {
                if e.is_panic() {
                    tracing::error!(kind = S::KIND, key = %self.key(), "Watch task panicked in a callback");
                }
            }
            tracing::info!(kind = S::KIND, key = %self.key(), "Stopped watching (drained)");
        }
    }

    pub fn is_running(&self) -> bool {
        self.lock_task()
            .as_ref()
            .is_some_and(|t| !t.handle.is_finished())
    }

    /// Register a callback for snapshot changes.
    pub fn on_change(&self, callback: impl Fn(&S::Snapshot) + Send + Sync + 'static) {
        self.write_subscription().on_change.push(Arc::new(callback));
    }

    /// Register a callback for failed ticks.
    pub fn on_error(&self, callback: impl Fn(&WatchError) + Send + Sync + 'static) {
        self.write_subscription().on_error.push(Arc::new(callback));
    }

    /// The most recently committed snapshot, if any.
    pub fn last_snapshot(&self) -> Option<S::Snapshot> {
        self.read_subscription().last.clone()
    }

    async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let mut ticker = time::interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            if self.tick(&cancel).await.is_break() {
                break;
            }
        }

        tracing::debug!(kind = S::KIND, key = %self.key(), "Watch loop exited");
    }

    async fn tick(&self, cancel: &CancellationToken) -> ControlFlow<()> {
        let started = Instant::now();
        let source = &self.source;

        let result = self
            .breaker
            .call_classified(
                || self.retry.run_cancellable_if(cancel, FetchError::is_retryable, || source.fetch()),
                |e: &RetryError<FetchError>| !e.is_cancelled(),
            )
            .await
            .map_err(WatchError::from);

        // stopped while the fetch was completing
        if cancel.is_cancelled() {
            return ControlFlow::Break(());
        }

        match result {
            Ok(snapshot) => {
                metrics::record_fetch(S::KIND, "success", started);
                self.apply(snapshot);
                ControlFlow::Continue(())
            }
            Err(WatchError::Cancelled) => ControlFlow::Break(()),
            Err(err) => {
                metrics::record_fetch(S::KIND, "error", started);
                tracing::error!(kind = S::KIND, key = %self.key(), error = %err, "Failed to fetch from control plane");
                self.notify_error(&err);
                ControlFlow::Continue(())
            }
        }
    }

    fn apply(&self, snapshot: S::Snapshot) {
        let callbacks = {
            let mut subscription = self.write_subscription();
            if !S::changed(subscription.last.as_ref(), &snapshot) {
                return;
            }
            subscription.last = Some(snapshot.clone());
            subscription.on_change.clone()
        };

        metrics::record_change(S::KIND);
        tracing::info!(kind = S::KIND, key = %self.key(), "Control plane snapshot changed");

        for callback in &callbacks {
            callback(&snapshot);
        }
    }

    fn notify_error(&self, err: &WatchError) {
        let callbacks = self.read_subscription().on_error.clone();
        for callback in &callbacks {
            callback(err);
        }
    }

    fn lock_task(&self) -> MutexGuard<'_, Option<PollTask>> {
        self.task.lock().expect("watcher task mutex poisoned")
    }

    fn read_subscription(&self) -> RwLockReadGuard<'_, Subscription<S::Snapshot>> {
        self.subscription.read().expect("watcher subscription lock poisoned")
    }

    fn write_subscription(&self) -> RwLockWriteGuard<'_, Subscription<S::Snapshot>> {
        self.subscription.write().expect("watcher subscription lock poisoned")
    }
}

impl Watcher<ServiceSource> {
    pub fn set_on_instances_changed(&self, callback: impl Fn(&Vec<Instance>) + Send + Sync + 'static) {
        self.on_change(callback);
    }

    pub fn set_on_error(&self, callback: impl Fn(&WatchError) + Send + Sync + 'static) {
        self.on_error(callback);
    }

    /// Last committed instance set; empty before the first change.
    pub fn last_instances(&self) -> Vec<Instance> {
        self.last_snapshot().unwrap_or_default()
    }
}

impl Watcher<ConfigSource> {
    pub fn set_on_config_changed(&self, callback: impl Fn(&ConfigSnapshot) + Send + Sync + 'static) {
        self.on_change(callback);
    }

    pub fn set_on_error(&self, callback: impl Fn(&WatchError) + Send + Sync + 'static) {
        self.on_error(callback);
    }

    pub fn last_config(&self) -> Option<ConfigSnapshot> {
        self.last_snapshot()
    }
}

impl<S: WatchSource> fmt::Debug for Watcher<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Watcher")
            .field("kind", &S::KIND)
            .field("key", self.key())
            .field("interval", &self.interval)
            .field("breaker", &self.breaker.state())
            .finish()
    }
}
